mod lifecycle;
mod tokenizer;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::backend::{ModelCapability, SamplingParams};
use crate::config::GenerationConfig;
use crate::device::ExecutionDevice;
use crate::errors::InferenceError;
use crate::prompting::{format_full_prompt, trim_echoed_prompt};

pub use lifecycle::CandleModel;

pub const APOLOGY: &str = "I'm sorry, I couldn't process your request. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub prompt: String,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Single-turn chat over a model capability. Keeps no conversation history:
/// every `chat` call stands alone.
pub struct ChatEngine<M> {
    model: M,
    config: GenerationConfig,
    device: ExecutionDevice,
}

impl<M: ModelCapability> ChatEngine<M> {
    pub fn new(model: M, config: GenerationConfig, device: ExecutionDevice) -> Self {
        match serde_json::to_string_pretty(&config) {
            Ok(dump) => tracing::info!(device = %device, "LLM loaded with the following config:\n{}", dump),
            Err(e) => tracing::warn!(error = %e, "Cannot render generation config."),
        }
        Self {
            model,
            config,
            device,
        }
    }

    pub fn device(&self) -> ExecutionDevice {
        self.device
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Always returns text. Errors and panics from the model are logged and
    /// turned into [`APOLOGY`].
    pub fn chat(&mut self, request: &ChatRequest) -> String {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_chat(request)));
        let err = match outcome {
            Ok(Ok(response)) => return response,
            Ok(Err(e)) => e,
            Err(payload) => InferenceError::Panicked(panic_message(payload.as_ref())),
        };
        tracing::error!(error = %err, "Chat request failed.");
        APOLOGY.to_string()
    }

    fn try_chat(&mut self, request: &ChatRequest) -> Result<String, InferenceError> {
        tracing::info!("Preparing input...");
        let full_prompt = format_full_prompt(&self.config.prompt_template, &request.prompt);

        tracing::info!("Tokenizing input...");
        let input_ids = self.model.encode(&full_prompt, self.device)?;

        tracing::info!(prompt_tokens = input_ids.len(), "Generating response...");
        let params = SamplingParams::from_config(&self.config, self.model.eos_token_id());
        let output_ids = self.model.generate(&input_ids, &params)?;

        tracing::info!(output_tokens = output_ids.len(), "Decoding response...");
        let decoded = self.model.decode(&output_ids)?;

        Ok(trim_echoed_prompt(&decoded, &full_prompt))
    }
}

/// Routes panic reports through `tracing` so contained panics don't also
/// print the default hook's message on stderr.
pub fn log_panics_with_tracing() {
    panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Panic caught.");
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
