//! # SM2 Payload Decryption
//!
//! Ciphertext layout is C1‖C3‖C2: C1 is the ephemeral curve point
//! (uncompressed, 64 bytes of x‖y), C3 the 32-byte SM3 digest, C2 the
//! masked plaintext. Upstream sometimes prefixes the hex with `"04"`, the
//! SEC1 uncompressed-point tag.
//!
//! ## Marker Handling
//!
//! The marker is stripped only when present. Because an untagged body can
//! itself begin with byte `0x04`, a failed attempt on the stripped text is
//! retried on the full text before reporting an error.

use sm2::pke::{DecryptingKey, Mode};
use sm2::SecretKey;
use zeroize::Zeroizing;

use crate::envelope::{parse_envelope, DecodedPayload};
use crate::error::PayloadError;

/// Two-character prefix that may precede the ciphertext hex.
pub const PAYLOAD_MARKER: &str = "04";

/// SEC1 tag for an uncompressed point.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// x‖y of C1 plus the 32-byte C3 digest.
const MIN_BODY_LEN: usize = 64 + 32;

/// Return the ciphertext hex with the marker removed, if it was present.
pub fn strip_marker(payload: &str) -> Option<&str> {
    payload.strip_prefix(PAYLOAD_MARKER)
}

/// Holds the SM2 private key and decrypts service payloads.
pub struct PayloadDecryptor {
    key: DecryptingKey,
}

impl std::fmt::Debug for PayloadDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadDecryptor")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PayloadDecryptor {
    /// Build a decryptor from a 64-character hex private key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, PayloadError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_key.trim())
                .map_err(|e| PayloadError::InvalidKey(format!("hex decode: {e}")))?,
        );
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| PayloadError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self {
            key: DecryptingKey::new_with_mode(secret.to_nonzero_scalar(), Mode::C1C3C2),
        })
    }

    /// Decrypt a hex payload into plaintext bytes.
    pub fn decrypt(&self, payload: &str) -> Result<Vec<u8>, PayloadError> {
        let payload = payload.trim();
        match strip_marker(payload) {
            Some(body) => self.decrypt_body(body).or_else(|first| {
                tracing::debug!(error = %first, "stripped payload did not decrypt, retrying unstripped");
                self.decrypt_body(payload).map_err(|_| first)
            }),
            None => self.decrypt_body(payload),
        }
    }

    /// Decrypt and flatten a payload into features. An empty payload
    /// (the service returned no `data`) yields no features.
    pub fn decode(&self, payload: &str) -> Result<DecodedPayload, PayloadError> {
        if payload.trim().is_empty() {
            return Ok(DecodedPayload::default());
        }
        let plaintext = self.decrypt(payload)?;
        parse_envelope(&plaintext)
    }

    fn decrypt_body(&self, body_hex: &str) -> Result<Vec<u8>, PayloadError> {
        let body = hex::decode(body_hex)
            .map_err(|e| PayloadError::Decryption(format!("malformed hex: {e}")))?;
        if body.len() < MIN_BODY_LEN {
            return Err(PayloadError::Decryption(format!(
                "ciphertext too short: {} bytes, need at least {MIN_BODY_LEN}",
                body.len()
            )));
        }

        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(UNCOMPRESSED_TAG);
        framed.extend_from_slice(&body);

        self.key
            .decrypt(&framed)
            .map_err(|_| PayloadError::Decryption("ciphertext does not correspond to the key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use sm2::pke::EncryptingKey;

    const PLAINTEXT: &[u8] = br#"{"recordsets":[{"datasetName":"pro31@yndk","features":[]}]}"#;

    /// Private key of the fixed vectors below.
    const KAT_KEY: &str = "b03638648d9cd2b874bbdb7d465caef5474c968cb2e3b9b4dc3128d58a24f220";

    /// C1‖C3‖C2 of [`KAT_PLAINTEXT`] under [`KAT_KEY`], without the marker,
    /// produced by an independent GB/T 32918.4 implementation.
    const KAT_CIPHERTEXT: &str = concat!(
        "5eaf91f910ad2c9fccbfc3e6f0b29bc9cfdd1a5aeb8d0601c14328446317f925",
        "fafdd9a57569fe543429f759d26ed3f6a42b5ff6b9d690a1bb66ee89a8d299c2",
        "97fa39f2f27cb8d0f06fac70aae3278a75ac270a6b35cfe6388b9fe8cafefffc",
        "a3df28c35db0dbdb8a75e85733f513eefc339e3339366a58480454ae8c8a7566",
        "45576b4c134119c71a1913a064054f78bdca9c649baef60a8bbb549df1bc9893",
        "e011e28f20d03db935899852cfc0c359812a35d30a89ae14a7cc602c4608354b",
        "729fcd525055c710b202c104e80d6251a1c45d5d93ae75b27ce8bbd0e7c0d1a0",
        "4a7a58d25d51c33a5a5cb874efd8f6b75fb251c98355303a441d877a8c8d4e19",
        "ed71a91b0895648e575b4b4b1d5e4d3a6fbfdb23bf42ebc880bb028060526fbc",
        "80e7e4ea4deae956b771fcec0629a3c8447704ba812dd4358f8ddd0d87b7d0c8",
        "d37cdaade2b9384ec4f17246ce4851be0a8889fa45e7a462a9a57c2ea332ea04",
        "732afae5dd02e4a740ba65421e2d7aacf2a2254deeddbe5c5c1418",
    );

    const KAT_PLAINTEXT: &str = r#"{"recordsets":[{"datasetName":"pro31@yndk","features":[{"ID":7,"fieldNames":["SMID"],"fieldValues":["7"],"geometry":{"type":"REGION","parts":[5],"points":[{"x":120.64,"y":32.437},{"x":120.641,"y":32.437},{"x":120.641,"y":32.436},{"x":120.64,"y":32.436},{"x":120.64,"y":32.437}]}}]}]}"#;

    /// A second vector whose unmarked body itself starts with `04`.
    const KAT_CIPHERTEXT_04: &str = concat!(
        "04dae7d7fc6e71720592758dc68350c84c5dcf926ffd06e13e278eba4e01287b",
        "4ab36fa2782f30d4138c01c95251d891654b03bdc60ef898e19362c7785f9ed2",
        "c4f2217e68579c7ea33f1f377a9cfe9e36ba21b9c824dfb9ec7cdf37cef0cb7d",
        "065cbb711bc5cd17df3a5f96a62e7ba8b25d97ec02b88ffdbc47b768969a4075",
        "86fd7b327ac22e40",
    );

    const KAT_PLAINTEXT_04: &str = r#"{"recordsets":[{"datasetName":"empty"}]}"#;

    fn keypair() -> (SecretKey, String) {
        let secret = SecretKey::random(&mut OsRng);
        let hex_key = hex::encode(secret.to_bytes());
        (secret, hex_key)
    }

    fn encrypt(secret: &SecretKey, mode: Mode, msg: &[u8]) -> Vec<u8> {
        EncryptingKey::new_with_mode(secret.public_key(), mode)
            .encrypt(msg)
            .unwrap()
    }

    #[test]
    fn known_vector_decrypts_with_marker() {
        let decryptor = PayloadDecryptor::from_hex_key(KAT_KEY).unwrap();
        let plaintext = decryptor.decrypt(&format!("04{KAT_CIPHERTEXT}")).unwrap();
        assert_eq!(plaintext, KAT_PLAINTEXT.as_bytes());
    }

    #[test]
    fn known_vector_decrypts_without_marker() {
        let decryptor = PayloadDecryptor::from_hex_key(KAT_KEY).unwrap();
        let plaintext = decryptor.decrypt(KAT_CIPHERTEXT).unwrap();
        assert_eq!(plaintext, KAT_PLAINTEXT.as_bytes());
    }

    #[test]
    fn known_vector_with_leading_04_body_decrypts_both_ways() {
        let decryptor = PayloadDecryptor::from_hex_key(KAT_KEY).unwrap();
        assert!(KAT_CIPHERTEXT_04.starts_with(PAYLOAD_MARKER));
        assert_eq!(
            decryptor.decrypt(KAT_CIPHERTEXT_04).unwrap(),
            KAT_PLAINTEXT_04.as_bytes()
        );
        assert_eq!(
            decryptor.decrypt(&format!("04{KAT_CIPHERTEXT_04}")).unwrap(),
            KAT_PLAINTEXT_04.as_bytes()
        );
    }

    #[test]
    fn known_vector_decodes_to_features() {
        let decryptor = PayloadDecryptor::from_hex_key(KAT_KEY).unwrap();
        let decoded = decryptor.decode(&format!("04{KAT_CIPHERTEXT}")).unwrap();
        assert_eq!(decoded.recordsets, 1);
        assert_eq!(decoded.features.len(), 1);
        let feature = &decoded.features[0];
        assert_eq!(feature.id, 7);
        assert_eq!(feature.geometry.parts, vec![5]);
        assert_eq!(feature.geometry.points[1].x, 120.641);
    }

    #[test]
    fn known_vector_rejects_tampered_digest() {
        let decryptor = PayloadDecryptor::from_hex_key(KAT_KEY).unwrap();
        let mut bytes = hex::decode(KAT_CIPHERTEXT).unwrap();
        // First byte of C3.
        bytes[64] ^= 0x01;
        assert!(matches!(
            decryptor.decrypt(&hex::encode(bytes)),
            Err(PayloadError::Decryption(_))
        ));
    }

    #[test]
    fn strip_marker_is_conditional() {
        assert_eq!(strip_marker("04abcd"), Some("abcd"));
        assert_eq!(strip_marker("abcd"), None);
        assert_eq!(strip_marker(""), None);
    }

    #[test]
    fn decrypts_with_marker_present() {
        let (secret, hex_key) = keypair();
        let cipher = encrypt(&secret, Mode::C1C3C2, PLAINTEXT);
        assert_eq!(cipher[0], 0x04);

        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        let plaintext = decryptor.decrypt(&hex::encode(&cipher)).unwrap();
        assert_eq!(plaintext, PLAINTEXT);
    }

    #[test]
    fn decrypts_with_marker_absent() {
        let (secret, hex_key) = keypair();
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        // Repeat so that bodies whose x coordinate starts with 0x04 are
        // likely to be exercised as well.
        for _ in 0..32 {
            let cipher = encrypt(&secret, Mode::C1C3C2, PLAINTEXT);
            let plaintext = decryptor.decrypt(&hex::encode(&cipher[1..])).unwrap();
            assert_eq!(plaintext, PLAINTEXT);
        }
    }

    #[test]
    fn uppercase_hex_and_whitespace_are_accepted() {
        let (secret, hex_key) = keypair();
        let cipher = encrypt(&secret, Mode::C1C3C2, PLAINTEXT);
        let payload = format!("  {}\n", hex::encode_upper(&cipher));
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        assert_eq!(decryptor.decrypt(&payload).unwrap(), PLAINTEXT);
    }

    #[test]
    fn wrong_key_is_a_decryption_error() {
        let (secret, _) = keypair();
        let (_, other_hex) = keypair();
        let cipher = encrypt(&secret, Mode::C1C3C2, PLAINTEXT);
        let decryptor = PayloadDecryptor::from_hex_key(&other_hex).unwrap();
        assert!(matches!(
            decryptor.decrypt(&hex::encode(&cipher)),
            Err(PayloadError::Decryption(_))
        ));
    }

    #[test]
    fn other_layout_is_a_decryption_error() {
        let (secret, hex_key) = keypair();
        let cipher = encrypt(&secret, Mode::C1C2C3, PLAINTEXT);
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        assert!(matches!(
            decryptor.decrypt(&hex::encode(&cipher)),
            Err(PayloadError::Decryption(_))
        ));
    }

    #[test]
    fn malformed_hex_is_a_decryption_error() {
        let (_, hex_key) = keypair();
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        let err = decryptor.decrypt("04zz").unwrap_err();
        assert!(matches!(err, PayloadError::Decryption(ref m) if m.contains("hex")));
    }

    #[test]
    fn truncated_ciphertext_is_rejected_without_panicking() {
        let (_, hex_key) = keypair();
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        let err = decryptor.decrypt(&"ab".repeat(40)).unwrap_err();
        assert!(matches!(err, PayloadError::Decryption(ref m) if m.contains("too short")));
    }

    #[test]
    fn invalid_key_is_rejected() {
        assert!(matches!(
            PayloadDecryptor::from_hex_key("not-hex"),
            Err(PayloadError::InvalidKey(_))
        ));
        assert!(matches!(
            PayloadDecryptor::from_hex_key("abcd"),
            Err(PayloadError::InvalidKey(_))
        ));
    }

    #[test]
    fn decode_flattens_envelope() {
        let (secret, hex_key) = keypair();
        let body = br#"{"recordsets":[
            {"features":[{"ID":1,"geometry":{"parts":[1],"points":[{"x":1,"y":2}]}}]},
            {"datasetName":"empty"},
            {"features":[{"ID":2,"geometry":{"parts":[1],"points":[{"x":3,"y":4}]}}]}
        ]}"#;
        let cipher = encrypt(&secret, Mode::C1C3C2, body);
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        let decoded = decryptor.decode(&hex::encode(&cipher)).unwrap();
        let ids: Vec<i64> = decoded.features.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn decode_of_empty_payload_is_empty() {
        let (_, hex_key) = keypair();
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        let decoded = decryptor.decode("").unwrap();
        assert!(decoded.features.is_empty());
    }

    #[test]
    fn debug_redacts_key() {
        let (_, hex_key) = keypair();
        let decryptor = PayloadDecryptor::from_hex_key(&hex_key).unwrap();
        let dbg = format!("{decryptor:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(&hex_key));
    }
}
