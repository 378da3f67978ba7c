use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::Serialize;

use crate::device::ExecutionDevice;
use crate::errors::ConfigError;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "User: {prompt}";
pub const DEFAULT_MAX_TOKENS: usize = 1024;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_TOP_K: usize = 50;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_NUM_BEAMS: usize = 1;

pub const DEFAULT_MODEL_ID: &str = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";
pub const DEFAULT_HA_URL: &str = "http://homeassistant.local:8123";

pub const PROMPT_TEMPLATE_KEY: &str = "LLM_PROMPT_TEMPLATE";
pub const MAX_TOKENS_KEY: &str = "LLM_MAX_TOKENS";
pub const TOP_P_KEY: &str = "LLM_TOP_P";
pub const TOP_K_KEY: &str = "LLM_TOP_K";
pub const TEMPERATURE_KEY: &str = "LLM_TEMPERATURE";
pub const NUM_BEAMS_KEY: &str = "LLM_NUM_BEAMS";
pub const SEED_KEY: &str = "LLM_SEED";
pub const MODEL_ID_KEY: &str = "LLM_MODEL_ID";
pub const MODEL_PATH_KEY: &str = "LLM_MODEL_PATH";
pub const TOKENIZER_PATH_KEY: &str = "LLM_TOKENIZER_PATH";
pub const DEVICE_KEY: &str = "LLM_DEVICE";
pub const HA_URL_KEY: &str = "HA_URL";
pub const HA_TOKEN_KEY: &str = "HA_TOKEN";

/// Where named overrides come from. The process environment in production,
/// a plain map in tests.
pub trait OverrideSource {
    fn get(&self, key: &'static str) -> Result<Option<String>, ConfigError>;
}

pub struct ProcessEnv;

impl OverrideSource for ProcessEnv {
    fn get(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        match env::var(key) {
            Ok(v) => Ok(Some(v)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Unreadable {
                key,
                reason: e.to_string(),
            }),
        }
    }
}

impl OverrideSource for HashMap<String, String> {
    fn get(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        Ok(HashMap::get(self, key).cloned())
    }
}

/// Sampling and decoding parameters plus the prompt template. Resolved once
/// at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub prompt_template: String,
    pub max_tokens: usize,
    pub top_p: f64,
    pub top_k: usize,
    pub temperature: f64,
    pub num_beams: usize,
    /// `None` means a fresh seed is drawn from the OS when the model loads.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            temperature: DEFAULT_TEMPERATURE,
            num_beams: DEFAULT_NUM_BEAMS,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(&ProcessEnv)
    }

    pub fn resolve_from(source: &impl OverrideSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let prompt_template = source
            .get(PROMPT_TEMPLATE_KEY)?
            .unwrap_or(defaults.prompt_template);
        if !prompt_template.contains("{prompt}") {
            return Err(ConfigError::InvalidTemplate {
                template: prompt_template,
            });
        }

        let max_tokens = read_count(source, MAX_TOKENS_KEY, 1, "an integer >= 1")?
            .unwrap_or(defaults.max_tokens);
        let top_p = read_float(
            source,
            TOP_P_KEY,
            |v| v > 0.0 && v <= 1.0,
            "a float in (0, 1]",
        )?
        .unwrap_or(defaults.top_p);
        let top_k =
            read_count(source, TOP_K_KEY, 0, "an integer >= 0")?.unwrap_or(defaults.top_k);
        let temperature = read_float(
            source,
            TEMPERATURE_KEY,
            |v| v.is_finite() && v > 0.0,
            "a finite float > 0",
        )?
        .unwrap_or(defaults.temperature);
        let num_beams = read_count(source, NUM_BEAMS_KEY, 1, "an integer >= 1")?
            .unwrap_or(defaults.num_beams);

        let seed = match source.get(SEED_KEY)? {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| ConfigError::Malformed {
                key: SEED_KEY,
                value: raw.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            prompt_template,
            max_tokens,
            top_p,
            top_k,
            temperature,
            num_beams,
            seed,
        })
    }
}

/// Which artifact to load and where to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSource {
    pub model_id: String,
    pub gguf_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
    pub device: Option<ExecutionDevice>,
}

impl ModelSource {
    pub fn resolve_from(source: &impl OverrideSource) -> Result<Self, ConfigError> {
        let model_id = non_empty(source.get(MODEL_ID_KEY)?)
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        let gguf_path = non_empty(source.get(MODEL_PATH_KEY)?).map(PathBuf::from);
        let tokenizer_path = non_empty(source.get(TOKENIZER_PATH_KEY)?).map(PathBuf::from);

        let device = match source.get(DEVICE_KEY)? {
            Some(raw) => Some(raw.parse::<ExecutionDevice>().map_err(|reason| {
                ConfigError::Malformed {
                    key: DEVICE_KEY,
                    value: raw.clone(),
                    reason,
                }
            })?),
            None => None,
        };

        Ok(Self {
            model_id,
            gguf_path,
            tokenizer_path,
            device,
        })
    }
}

/// Home Assistant endpoint of the surrounding process. Carried through
/// configuration, not used by inference.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeAssistantConfig {
    pub url: String,
    pub token: Option<String>,
}

impl HomeAssistantConfig {
    pub fn resolve_from(source: &impl OverrideSource) -> Result<Self, ConfigError> {
        Ok(Self {
            url: source
                .get(HA_URL_KEY)?
                .unwrap_or_else(|| DEFAULT_HA_URL.to_string()),
            token: source.get(HA_TOKEN_KEY)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub generation: GenerationConfig,
    pub model: ModelSource,
    pub home_assistant: HomeAssistantConfig,
}

impl AppConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(&ProcessEnv)
    }

    pub fn resolve_from(source: &impl OverrideSource) -> Result<Self, ConfigError> {
        Ok(Self {
            generation: GenerationConfig::resolve_from(source)?,
            model: ModelSource::resolve_from(source)?,
            home_assistant: HomeAssistantConfig::resolve_from(source)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn read_count(
    source: &impl OverrideSource,
    key: &'static str,
    min: i64,
    expected: &'static str,
) -> Result<Option<usize>, ConfigError> {
    let Some(raw) = source.get(key)? else {
        return Ok(None);
    };
    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|e| ConfigError::Malformed {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    if parsed < min {
        return Err(ConfigError::OutOfRange {
            key,
            value: raw,
            expected,
        });
    }
    usize::try_from(parsed)
        .map(Some)
        .map_err(|_| ConfigError::OutOfRange {
            key,
            value: raw,
            expected,
        })
}

fn read_float(
    source: &impl OverrideSource,
    key: &'static str,
    in_range: impl Fn(f64) -> bool,
    expected: &'static str,
) -> Result<Option<f64>, ConfigError> {
    let Some(raw) = source.get(key)? else {
        return Ok(None);
    };
    let parsed = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| ConfigError::Malformed {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    if !in_range(parsed) {
        return Err(ConfigError::OutOfRange {
            key,
            value: raw,
            expected,
        });
    }
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_nothing_is_overridden() {
        let cfg = GenerationConfig::resolve_from(&overrides(&[])).expect("resolve");
        assert_eq!(cfg, GenerationConfig::default());
        assert_eq!(cfg.prompt_template, "User: {prompt}");
        assert_eq!(cfg.max_tokens, 1024);
        assert_eq!(cfg.top_p, 0.95);
        assert_eq!(cfg.top_k, 50);
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.num_beams, 1);
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn present_overrides_replace_defaults() {
        let cfg = GenerationConfig::resolve_from(&overrides(&[
            ("LLM_MAX_TOKENS", "16"),
            ("LLM_TOP_P", "0.5"),
            ("LLM_TOP_K", "0"),
            ("LLM_TEMPERATURE", " 1.3 "),
            ("LLM_NUM_BEAMS", "4"),
            ("LLM_SEED", "42"),
        ]))
        .expect("resolve");
        assert_eq!(cfg.max_tokens, 16);
        assert_eq!(cfg.top_p, 0.5);
        assert_eq!(cfg.top_k, 0);
        assert_eq!(cfg.temperature, 1.3);
        assert_eq!(cfg.num_beams, 4);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.prompt_template, DEFAULT_PROMPT_TEMPLATE);
    }

    #[test]
    fn unparseable_override_is_rejected_not_defaulted() {
        let err = GenerationConfig::resolve_from(&overrides(&[("LLM_TOP_P", "abc")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Malformed { key: "LLM_TOP_P", .. }));

        let err = GenerationConfig::resolve_from(&overrides(&[("LLM_MAX_TOKENS", "12.5")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Malformed { key: "LLM_MAX_TOKENS", .. }));

        let err = GenerationConfig::resolve_from(&overrides(&[("LLM_SEED", "-1")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Malformed { key: "LLM_SEED", .. }));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            ("LLM_TOP_P", "0"),
            ("LLM_TOP_P", "1.01"),
            ("LLM_MAX_TOKENS", "-5"),
            ("LLM_MAX_TOKENS", "0"),
            ("LLM_TOP_K", "-1"),
            ("LLM_NUM_BEAMS", "0"),
            ("LLM_TEMPERATURE", "0"),
            ("LLM_TEMPERATURE", "inf"),
        ];
        for (key, value) in cases {
            let err = GenerationConfig::resolve_from(&overrides(&[(key, value)]))
                .expect_err("must fail");
            assert!(
                matches!(err, ConfigError::OutOfRange { key: k, .. } if k == key),
                "{}={} gave {:?}",
                key,
                value,
                err
            );
        }
    }

    #[test]
    fn template_override_needs_prompt_slot() {
        let cfg = GenerationConfig::resolve_from(&overrides(&[(
            "LLM_PROMPT_TEMPLATE",
            "System: {context}\n\nUser: {prompt}",
        )]))
        .expect("resolve");
        assert!(cfg.prompt_template.starts_with("System: "));

        let err = GenerationConfig::resolve_from(&overrides(&[("LLM_PROMPT_TEMPLATE", "User:")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidTemplate { .. }));
    }

    #[test]
    fn model_source_defaults_and_overrides() {
        let source = ModelSource::resolve_from(&overrides(&[])).expect("resolve");
        assert_eq!(source.model_id, DEFAULT_MODEL_ID);
        assert_eq!(source.gguf_path, None);
        assert_eq!(source.device, None);

        let source = ModelSource::resolve_from(&overrides(&[
            ("LLM_MODEL_PATH", "models/tinyllama.Q4_K_M.gguf"),
            ("LLM_TOKENIZER_PATH", ""),
            ("LLM_DEVICE", "CPU"),
        ]))
        .expect("resolve");
        assert_eq!(
            source.gguf_path,
            Some(PathBuf::from("models/tinyllama.Q4_K_M.gguf"))
        );
        assert_eq!(source.tokenizer_path, None);
        assert_eq!(source.device, Some(ExecutionDevice::Cpu));

        let err = ModelSource::resolve_from(&overrides(&[("LLM_DEVICE", "tpu")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Malformed { key: "LLM_DEVICE", .. }));
    }

    #[test]
    fn home_assistant_settings_are_carried() {
        let cfg = AppConfig::resolve_from(&overrides(&[("HA_TOKEN", "secret")])).expect("resolve");
        assert_eq!(cfg.home_assistant.url, DEFAULT_HA_URL);
        assert_eq!(cfg.home_assistant.token.as_deref(), Some("secret"));
        assert_eq!(cfg.generation, GenerationConfig::default());
    }
}
