//! # Payload Error Types

use thiserror::Error;

/// Errors from turning an encrypted payload into features.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The private key material could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Malformed hex, truncated ciphertext, or a ciphertext that does not
    /// correspond to the key.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Plaintext is not UTF-8 JSON in the recordset envelope shape.
    #[error("unexpected payload format: {0}")]
    Format(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        assert!(format!("{}", PayloadError::Decryption("odd length".into())).contains("odd length"));
        assert!(format!("{}", PayloadError::Format("not an object".into())).starts_with("unexpected"));
        assert!(format!("{}", PayloadError::InvalidKey("short".into())).contains("private key"));
    }
}
