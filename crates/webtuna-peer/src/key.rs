use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

/// Length of a generated session key.
pub const KEY_LENGTH: usize = 20;

/// Generate a random session key of [`KEY_LENGTH`] word characters.
///
/// Random UUID bytes are base64-encoded, non-word characters dropped and
/// the tail kept; more UUID bytes are appended until the result is long
/// enough. Unique enough for rendezvous, not a secret-grade token.
pub fn generate_key() -> String {
    let mut raw = Vec::with_capacity(32);
    loop {
        raw.extend_from_slice(Uuid::new_v4().as_bytes());
        let word: Vec<char> = STANDARD
            .encode(&raw)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if word.len() >= KEY_LENGTH {
            return word[word.len() - KEY_LENGTH..].iter().collect();
        }
    }
}
