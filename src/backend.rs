use std::path::{Path, PathBuf};

use anyhow::{Error as E, Result};
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::Sampling;
use candle_transformers::models::{llama, quantized_llama};

use crate::config::GenerationConfig;
use crate::device::ExecutionDevice;
use crate::errors::InferenceError;

/// The text-generation backend as the chat engine sees it: a tokenizer and a
/// model behind four operations. `generate` returns the input ids followed by
/// the generated ids.
pub trait ModelCapability {
    fn encode(&self, text: &str, device: ExecutionDevice) -> Result<Vec<u32>, InferenceError>;
    fn decode(&self, ids: &[u32]) -> Result<String, InferenceError>;
    fn generate(&mut self, ids: &[u32], params: &SamplingParams)
        -> Result<Vec<u32>, InferenceError>;
    fn eos_token_id(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub do_sample: bool,
    pub max_new_tokens: usize,
    pub top_p: f64,
    pub top_k: usize,
    pub temperature: f64,
    pub num_beams: usize,
    pub pad_token_id: u32,
}

impl SamplingParams {
    pub fn from_config(config: &GenerationConfig, pad_token_id: u32) -> Self {
        Self {
            do_sample: true,
            max_new_tokens: config.max_tokens,
            top_p: config.top_p,
            top_k: config.top_k,
            temperature: config.temperature,
            num_beams: config.num_beams,
            pad_token_id,
        }
    }

    /// `top_k == 0` disables the top-k filter, as in the usual HF semantics.
    pub fn sampling(&self) -> Sampling {
        if !self.do_sample {
            return Sampling::ArgMax;
        }
        if self.top_k == 0 {
            Sampling::TopP {
                p: self.top_p,
                temperature: self.temperature,
            }
        } else {
            Sampling::TopKThenTopP {
                k: self.top_k,
                p: self.top_p,
                temperature: self.temperature,
            }
        }
    }
}

pub enum RuntimeModel {
    Llama {
        model: llama::Llama,
        config: llama::Config,
        dtype: DType,
    },
    QuantizedLlama(quantized_llama::ModelWeights),
}

impl RuntimeModel {
    pub fn load_from_gguf(path: &Path, device: &Device) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| E::msg(format!("Failed to open model file {:?}: {}", path, e)))?;
        let content = gguf_file::Content::read(&mut file)?;
        let model = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)?;
        Ok(Self::QuantizedLlama(model))
    }

    pub fn load_from_safetensors(
        config_path: &Path,
        weights: &[PathBuf],
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let raw = std::fs::read(config_path)?;
        let config: llama::LlamaConfig = serde_json::from_slice(&raw)
            .map_err(|e| E::msg(format!("Invalid model config {:?}: {}", config_path, e)))?;
        let config = config.into_config(false);

        // SAFETY: the weight files are not modified while the mapping is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights, dtype, device)? };
        Ok(Self::from_llama_weights(vb, config, dtype)?)
    }

    pub fn from_llama_weights(
        vb: VarBuilder,
        config: llama::Config,
        dtype: DType,
    ) -> candle_core::Result<Self> {
        let model = llama::Llama::load(vb, &config)?;
        Ok(Self::Llama {
            model,
            config,
            dtype,
        })
    }

    /// Fresh per-sequence KV cache. Quantized weights keep theirs internally
    /// and reset it when a forward pass starts at position 0.
    pub fn new_cache(&self, device: &Device) -> candle_core::Result<Option<llama::Cache>> {
        match self {
            Self::Llama { config, dtype, .. } => {
                Ok(Some(llama::Cache::new(true, *dtype, config, device)?))
            }
            Self::QuantizedLlama(_) => Ok(None),
        }
    }

    pub fn context_limit(&self) -> Option<usize> {
        match self {
            Self::Llama { config, .. } => Some(config.max_position_embeddings),
            Self::QuantizedLlama(_) => None,
        }
    }

    pub fn forward(
        &mut self,
        input_tensor: &Tensor,
        position: usize,
        cache: Option<&mut llama::Cache>,
    ) -> candle_core::Result<Tensor> {
        match self {
            Self::Llama { model, .. } => {
                let cache = cache.ok_or_else(|| {
                    candle_core::Error::Msg("llama forward pass needs a KV cache".to_string())
                })?;
                model.forward(input_tensor, position, cache)
            }
            Self::QuantizedLlama(model) => model.forward(input_tensor, position),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llama { .. } => "llama (safetensors)",
            Self::QuantizedLlama(_) => "llama (gguf)",
        }
    }
}
