use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

const EOS_CANDIDATES: [&str; 3] = ["</s>", "<|end_of_text|>", "<|endoftext|>"];

/// Local tokenizer lookup: explicit hint, next to the model file, the working
/// directory, then `models/`. `None` means the hub has to provide it.
pub(super) fn resolve_tokenizer_path(
    model_path: Option<&Path>,
    tokenizer_hint: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(hint) = existing_hint(tokenizer_hint) {
        return Some(hint);
    }

    if let Some(model_path) = model_path {
        let parent_dir = model_path.parent().unwrap_or(Path::new("."));
        let local_tok_path = parent_dir.join("tokenizer.json");
        if local_tok_path.exists() {
            return Some(local_tok_path);
        }
    }

    let root_tok_path = Path::new("tokenizer.json");
    if root_tok_path.exists() {
        return Some(root_tok_path.to_path_buf());
    }

    let models_tok_path = Path::new("models").join("tokenizer.json");
    if models_tok_path.exists() {
        return Some(models_tok_path);
    }

    None
}

/// The hint when it points at a file. A dangling hint is logged and dropped.
pub(super) fn existing_hint(tokenizer_hint: Option<&Path>) -> Option<PathBuf> {
    let hint = tokenizer_hint?;
    if hint.exists() {
        return Some(hint.to_path_buf());
    }
    tracing::warn!(path = ?hint, "Tokenizer hint does not exist, searching elsewhere.");
    None
}

pub(super) fn resolve_eos_token(tokenizer: &Tokenizer) -> Result<u32, String> {
    EOS_CANDIDATES
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .ok_or_else(|| {
            format!(
                "Tokenizer/model incompatibility: no end-of-sequence token among {:?}.",
                EOS_CANDIDATES
            )
        })
}

/// Whole-string WordLevel tokenizer for tests; no pre-tokenizer, no specials.
#[cfg(test)]
pub(super) fn word_level_tokenizer(vocab: &[(&str, u32)]) -> Tokenizer {
    let vocab: serde_json::Map<String, serde_json::Value> = vocab
        .iter()
        .map(|(token, id)| (token.to_string(), serde_json::Value::from(*id)))
        .collect();
    let definition = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": null,
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
    });
    <Tokenizer as std::str::FromStr>::from_str(&definition.to_string()).expect("build word level tokenizer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn eos_prefers_llama2_marker() {
        let tokenizer = word_level_tokenizer(&[("<unk>", 0), ("<s>", 1), ("</s>", 2), ("<|endoftext|>", 7)]);
        assert_eq!(resolve_eos_token(&tokenizer), Ok(2));
    }

    #[test]
    fn eos_falls_back_to_other_markers() {
        let tokenizer = word_level_tokenizer(&[("<unk>", 0), ("<|endoftext|>", 9)]);
        assert_eq!(resolve_eos_token(&tokenizer), Ok(9));
    }

    #[test]
    fn missing_eos_is_an_error() {
        let tokenizer = word_level_tokenizer(&[("<unk>", 0), ("hello", 1)]);
        assert!(resolve_eos_token(&tokenizer).is_err());
    }

    #[test]
    fn tokenizer_next_to_model_is_found() {
        let base = mk_temp_dir("autobutler_tokenizer_sibling");
        fs::create_dir_all(&base).expect("create dir");
        let model = base.join("tinyllama.Q4_K_M.gguf");
        fs::write(&model, b"stub").expect("write model stub");
        fs::write(base.join("tokenizer.json"), b"{}").expect("write tokenizer stub");

        let found = resolve_tokenizer_path(Some(model.as_path()), None).expect("tokenizer found");
        assert_eq!(found, base.join("tokenizer.json"));

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn existing_hint_wins() {
        let base = mk_temp_dir("autobutler_tokenizer_hint");
        fs::create_dir_all(&base).expect("create dir");
        let hint = base.join("custom-tokenizer.json");
        fs::write(&hint, b"{}").expect("write hint stub");
        fs::write(base.join("tokenizer.json"), b"{}").expect("write sibling stub");

        let model = base.join("model.gguf");
        let found = resolve_tokenizer_path(Some(model.as_path()), Some(hint.as_path())).expect("tokenizer found");
        assert_eq!(found, hint);

        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn dangling_hint_is_dropped() {
        let base = mk_temp_dir("autobutler_tokenizer_dangling");
        let missing = base.join("nope.json");
        assert_eq!(existing_hint(Some(missing.as_path())), None);
        assert_eq!(existing_hint(None), None);

        fs::create_dir_all(&base).expect("create dir");
        fs::write(&missing, b"{}").expect("write hint stub");
        assert_eq!(existing_hint(Some(missing.as_path())), Some(missing.clone()));

        let _ = fs::remove_dir_all(base);
    }

    fn mk_temp_dir(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time ok")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), ts))
    }
}
