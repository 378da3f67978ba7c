use std::io;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use autobutler::config::AppConfig;
use autobutler::engine::{log_panics_with_tracing, ChatEngine};
use autobutler::session::run_session;

fn usage() {
    eprintln!("Usage: butlerctl");
    eprintln!("  --help            Show this help message");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LLM_MAX_TOKENS, LLM_TOP_P, LLM_TOP_K, LLM_TEMPERATURE, LLM_NUM_BEAMS");
    eprintln!("  LLM_PROMPT_TEMPLATE, LLM_SEED, LLM_DEVICE (cuda|metal|cpu)");
    eprintln!("  LLM_MODEL_ID, LLM_MODEL_PATH (.gguf), LLM_TOKENIZER_PATH");
    eprintln!("  HA_URL, HA_TOKEN, RUST_LOG");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    log_panics_with_tracing();

    if std::env::args().skip(1).any(|arg| arg == "--help") {
        usage();
        return Ok(());
    }

    let config = AppConfig::resolve()?;
    tracing::info!(
        url = %config.home_assistant.url,
        token_set = config.home_assistant.token.is_some(),
        "Home Assistant endpoint configured."
    );

    let mut engine = ChatEngine::load(&config)?;

    let stdin = io::stdin();
    run_session(&mut engine, stdin.lock(), io::stdout().lock())?;
    Ok(())
}
