/// Tone guidance bound into the `{context}` slot of every template.
pub const CHAT_CONTEXT: &str =
    "Be cordial, succinct, and helpful. Do not dump huge walls of text.";

/// Builds the full prompt: the raw prompt is trimmed, `{context}` is filled
/// first so user text can never expand into it, then `{prompt}`.
pub fn format_full_prompt(template: &str, raw_prompt: &str) -> String {
    template
        .replace("{context}", CHAT_CONTEXT)
        .replace("{prompt}", raw_prompt.trim())
}

/// Drops the echoed full prompt from decoded model output. The cut is by
/// character count and clamps when the output is shorter than the prompt.
pub fn trim_echoed_prompt(decoded: &str, full_prompt: &str) -> String {
    let echoed = full_prompt.chars().count();
    match decoded.char_indices().nth(echoed) {
        Some((offset, _)) => decoded[offset..].trim().to_string(),
        None => String::new(),
    }
}
