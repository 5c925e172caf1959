use crate::departure::Language;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;

/// Longest key both cache tiers accept (the local tier uses it as a file name).
pub const MAX_KEY_LEN: usize = 200;

/// Derives the cache key shared by the local and remote tiers.
///
/// The hash covers the UTF-8 bytes of every input with a separator between
/// fields, so Khmer or Chinese text hashes exactly like Latin text. The result
/// is URL-safe base64 and never contains path separators.
pub fn derive_key(text: &str, language: Language, operator_id: &str, voice: Option<&str>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(text.as_bytes());
    hasher.update(b"\0");
    hasher.update(language.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(operator_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(voice.unwrap_or("").as_bytes());
    let digest = hasher.finalize().to_hex();

    let composed = format!("{}|{}|{}", language.as_str(), operator_id, &digest[..32]);
    let key = URL_SAFE_NO_PAD.encode(composed.as_bytes());
    if key.len() > MAX_KEY_LEN {
        tracing::warn!(
            %language,
            operator = operator_id,
            len = key.len(),
            "cache key too long; using uncacheable fallback key"
        );
        return fallback_key(text, language, operator_id);
    }
    key
}

/// A key that is unique per call, so lookups simply miss.
pub fn fallback_key(text: &str, language: Language, operator_id: &str) -> String {
    let operator = blake3::hash(operator_id.as_bytes()).to_hex();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "fallback-{}-{}-{}-{}",
        language.as_str(),
        &operator[..16],
        text.chars().count(),
        nanos
    )
}
