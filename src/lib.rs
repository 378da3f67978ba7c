pub mod backend;
pub mod config;
pub mod device;
pub mod engine;
pub mod errors;
pub mod prompting;
pub mod session;

pub use backend::{ModelCapability, SamplingParams};
pub use config::{AppConfig, GenerationConfig};
pub use device::{select_device, ExecutionDevice};
pub use engine::{CandleModel, ChatEngine, ChatRequest, APOLOGY};
pub use errors::{ConfigError, InferenceError};
