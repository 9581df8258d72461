//! Cryptographic primitives for the NEKO transport.
//!
//! This module provides:
//! - AEAD encryption over four selectable ciphers
//! - BLAKE3-based parameter derivation (handshake and session keyspaces)
//! - Secure random number generation
//!
//! Derived key material is zeroized on drop to prevent memory leakage.

mod cipher;
mod kdf;
mod random;

pub use cipher::{parse_psk, CipherInstance, CipherKind};
pub use kdf::{
    decode_nonce, derive_handshake_params, derive_session_params, handshake_payload_len,
    window_id, xor_tag, HandshakeParams, SessionParams,
};
pub use random::SecureRandom;

/// Size of the pre-shared key in bytes
pub const PSK_LEN: usize = 32;

/// Size of the full AEAD authentication tag in bytes (128 bits)
pub const FULL_TAG_LEN: usize = 16;
