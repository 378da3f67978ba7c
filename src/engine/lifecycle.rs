use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Error as E, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use hf_hub::api::sync::{Api, ApiRepo};
use tokenizers::Tokenizer;

use crate::backend::{ModelCapability, RuntimeModel, SamplingParams};
use crate::config::{AppConfig, ModelSource};
use crate::device::{select_device, ExecutionDevice, HostProbe};
use crate::errors::InferenceError;

use super::tokenizer::{existing_hint, resolve_eos_token, resolve_tokenizer_path};
use super::ChatEngine;

/// Candle-backed model capability: one set of weights, one tokenizer, one
/// device, all fixed at load time.
pub struct CandleModel {
    model: RuntimeModel,
    tokenizer: Tokenizer,
    device: Device,
    target: ExecutionDevice,
    eos_token_id: u32,
    base_seed: u64,
    requests_served: u64,
    beam_warning_emitted: bool,
}

impl CandleModel {
    pub fn load(source: &ModelSource, target: ExecutionDevice, seed: Option<u64>) -> Result<Self> {
        let device = target.to_candle()?;

        let (model, tokenizer_path) = match &source.gguf_path {
            Some(path) => {
                tracing::info!(path = ?path, "Loading quantized model...");
                let model = RuntimeModel::load_from_gguf(path, &device)?;
                let tokenizer_path =
                    match resolve_tokenizer_path(Some(path.as_path()), source.tokenizer_path.as_deref()) {
                        Some(found) => found,
                        None => {
                            tracing::info!(
                                repo = %source.model_id,
                                "tokenizer.json not found locally, fetching from HF..."
                            );
                            Api::new()?.model(source.model_id.clone()).get("tokenizer.json")?
                        }
                    };
                (model, tokenizer_path)
            }
            None => {
                tracing::info!(repo = %source.model_id, "Initializing model from HF hub...");
                let repo = Api::new()?.model(source.model_id.clone());
                let config_path = repo.get("config.json")?;
                let weights = hub_safetensors(&repo)?;
                let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };
                tracing::info!(shards = weights.len(), ?dtype, "Loading model weights...");
                let model =
                    RuntimeModel::load_from_safetensors(&config_path, &weights, dtype, &device)?;
                let tokenizer_path = match existing_hint(source.tokenizer_path.as_deref()) {
                    Some(hint) => hint,
                    None => repo.get("tokenizer.json")?,
                };
                (model, tokenizer_path)
            }
        };

        tracing::info!(path = ?tokenizer_path, "Loading tokenizer...");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(E::msg)?;
        let eos_token_id = resolve_eos_token(&tokenizer).map_err(E::msg)?;

        let base_seed = match seed {
            Some(seed) => seed,
            None => draw_seed()?,
        };

        tracing::info!(
            kind = model.kind(),
            device = %target,
            eos_token_id,
            "Model & tokenizer ready."
        );

        Ok(Self::from_parts(model, tokenizer, device, target, eos_token_id, base_seed))
    }

    pub fn from_parts(
        model: RuntimeModel,
        tokenizer: Tokenizer,
        device: Device,
        target: ExecutionDevice,
        eos_token_id: u32,
        base_seed: u64,
    ) -> Self {
        Self {
            model,
            tokenizer,
            device,
            target,
            eos_token_id,
            base_seed,
            requests_served: 0,
            beam_warning_emitted: false,
        }
    }
}

impl ModelCapability for CandleModel {
    fn encode(&self, text: &str, device: ExecutionDevice) -> Result<Vec<u32>, InferenceError> {
        if device != self.target {
            return Err(InferenceError::Encode(format!(
                "model lives on {}, not {}",
                self.target, device
            )));
        }
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| InferenceError::Encode(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, InferenceError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| InferenceError::Decode(e.to_string()))
    }

    fn generate(
        &mut self,
        ids: &[u32],
        params: &SamplingParams,
    ) -> Result<Vec<u32>, InferenceError> {
        if ids.is_empty() {
            return Err(InferenceError::Generate("empty input sequence".to_string()));
        }
        if let Some(limit) = self.model.context_limit() {
            if ids.len() >= limit {
                return Err(InferenceError::Generate(format!(
                    "prompt of {} tokens does not fit the {} token context",
                    ids.len(),
                    limit
                )));
            }
        }
        if params.num_beams > 1 && !self.beam_warning_emitted {
            tracing::warn!(
                num_beams = params.num_beams,
                "Beam search is not supported by the candle backend, sampling a single beam."
            );
            self.beam_warning_emitted = true;
        }

        let seed = self.base_seed.wrapping_add(self.requests_served);
        self.requests_served += 1;
        let mut logits_processor = LogitsProcessor::from_sampling(seed, params.sampling());
        let mut cache = self.model.new_cache(&self.device)?;
        let limit = self.model.context_limit();

        let mut tokens = ids.to_vec();
        let mut index_pos = 0;

        for step in 0..params.max_new_tokens {
            if limit.is_some_and(|l| tokens.len() >= l) {
                tracing::debug!(tokens = tokens.len(), "Context window full.");
                break;
            }

            let context_size = if step == 0 { tokens.len() } else { 1 };
            let start_pos = tokens.len() - context_size;
            let input = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;

            let logits = self.model.forward(&input, index_pos, cache.as_mut())?;
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            index_pos += context_size;

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);

            if next_token == self.eos_token_id || next_token == params.pad_token_id {
                break;
            }
        }

        tracing::debug!(
            prompt_tokens = ids.len(),
            generated_tokens = tokens.len() - ids.len(),
            "Generation finished."
        );
        Ok(tokens)
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

impl ChatEngine<CandleModel> {
    /// Picks the device, loads the configured artifact once and wraps it.
    pub fn load(config: &AppConfig) -> Result<Self> {
        let device = select_device(&HostProbe, config.model.device);
        let model = CandleModel::load(&config.model, device, config.generation.seed)?;
        Ok(Self::new(model, config.generation.clone(), device))
    }
}

fn hub_safetensors(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(single) = repo.get("model.safetensors") {
        return Ok(vec![single]);
    }
    let index_path = repo.get("model.safetensors.index.json")?;
    let index: serde_json::Value = serde_json::from_slice(&std::fs::read(index_path)?)?;
    safetensors_shards(&index)?
        .iter()
        .map(|shard| repo.get(shard).map_err(E::from))
        .collect()
}

fn safetensors_shards(index: &serde_json::Value) -> Result<Vec<String>> {
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| E::msg("safetensors index has no weight_map"))?;
    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    if shards.is_empty() {
        return Err(E::msg("safetensors index lists no shards"));
    }
    Ok(shards.into_iter().collect())
}

fn draw_seed() -> Result<u64> {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).map_err(|e| E::msg(format!("cannot seed sampler: {}", e)))?;
    Ok(u64::from_le_bytes(buf))
}
