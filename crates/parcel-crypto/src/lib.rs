//! # parcel-crypto — Payload Decryption
//!
//! The remote query service returns its result as a hex string holding an
//! SM2 public-key ciphertext. This crate recovers the plaintext with an
//! externally provisioned private key and flattens the JSON envelope into
//! a single ordered list of [`Feature`](parcel_core::Feature) records.
//!
//! - [`PayloadDecryptor`]: key holder; `decrypt` returns plaintext bytes,
//!   `decode` returns features.
//! - [`parse_envelope`]: envelope flattening, usable on its own for
//!   captured plaintexts.
//! - [`PayloadError`]: `Decryption` (bad hex, wrong key) vs `Format`
//!   (plaintext is not the expected JSON envelope).

pub mod envelope;
pub mod error;
pub mod sm2_payload;

pub use envelope::{parse_envelope, DecodedPayload};
pub use error::PayloadError;
pub use sm2_payload::{strip_marker, PayloadDecryptor, PAYLOAD_MARKER};
