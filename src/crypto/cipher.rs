//! AEAD cipher abstraction.
//!
//! The transport supports four AEAD suites selected at configuration time.
//! The cipher is resolved to a concrete instance once, at construction; the
//! per-record hot path never inspects the cipher name again.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305, XNonce};

use crate::crypto::PSK_LEN;
use crate::error::{Error, Result};

/// The AEAD suites the transport can run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherKind {
    /// AES-128-GCM (key 16, nonce 12)
    Aes128Gcm,
    /// AES-256-GCM (key 32, nonce 12)
    Aes256Gcm,
    /// ChaCha20-Poly1305 (key 32, nonce 12)
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305 (key 32, nonce 24)
    XChaCha20Poly1305,
}

impl CipherKind {
    /// Resolve a configured cipher name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            "xchacha20-poly1305" => Ok(CipherKind::XChaCha20Poly1305),
            _ => Err(Error::config(format!("unsupported cipher: {name}"))),
        }
    }

    /// Key length in bytes.
    pub const fn key_len(self) -> usize {
        match self {
            CipherKind::Aes128Gcm => 16,
            _ => 32,
        }
    }

    /// Nonce length in bytes.
    pub const fn nonce_len(self) -> usize {
        match self {
            CipherKind::XChaCha20Poly1305 => 24,
            _ => 12,
        }
    }

    /// Canonical configuration name.
    pub const fn name(self) -> &'static str {
        match self {
            CipherKind::Aes128Gcm => "aes-128-gcm",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::ChaCha20Poly1305 => "chacha20-poly1305",
            CipherKind::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }
}

impl std::str::FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CipherKind::parse(s)
    }
}

impl std::fmt::Display for CipherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A live AEAD instance bound to one key.
pub enum CipherInstance {
    /// AES-128-GCM
    Aes128(Aes128Gcm),
    /// AES-256-GCM
    Aes256(Aes256Gcm),
    /// ChaCha20-Poly1305
    ChaCha20(ChaCha20Poly1305),
    /// XChaCha20-Poly1305
    XChaCha20(XChaCha20Poly1305),
}

impl CipherInstance {
    /// Build a cipher instance for `kind` from raw key bytes.
    pub fn new(kind: CipherKind, key: &[u8]) -> Result<Self> {
        if key.len() != kind.key_len() {
            return Err(Error::crypto("cipher key length mismatch"));
        }
        let instance = match kind {
            CipherKind::Aes128Gcm => Aes128Gcm::new_from_slice(key)
                .map(CipherInstance::Aes128)
                .map_err(|_| Error::crypto("invalid AES-128 key"))?,
            CipherKind::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map(CipherInstance::Aes256)
                .map_err(|_| Error::crypto("invalid AES-256 key"))?,
            CipherKind::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map(CipherInstance::ChaCha20)
                .map_err(|_| Error::crypto("invalid ChaCha20 key"))?,
            CipherKind::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key)
                .map(CipherInstance::XChaCha20)
                .map_err(|_| Error::crypto("invalid XChaCha20 key"))?,
        };
        Ok(instance)
    }

    /// The kind this instance was built for.
    pub fn kind(&self) -> CipherKind {
        match self {
            CipherInstance::Aes128(_) => CipherKind::Aes128Gcm,
            CipherInstance::Aes256(_) => CipherKind::Aes256Gcm,
            CipherInstance::ChaCha20(_) => CipherKind::ChaCha20Poly1305,
            CipherInstance::XChaCha20(_) => CipherKind::XChaCha20Poly1305,
        }
    }

    /// Seal `plaintext`, returning `ciphertext || tag` (tag is the final
    /// 16 bytes).
    pub fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != self.kind().nonce_len() {
            return Err(Error::crypto("nonce length mismatch"));
        }
        let sealed = match self {
            CipherInstance::Aes128(c) => c.encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext),
            CipherInstance::Aes256(c) => c.encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext),
            CipherInstance::ChaCha20(c) => {
                c.encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext)
            }
            CipherInstance::XChaCha20(c) => c.encrypt(XNonce::from_slice(nonce), plaintext),
        };
        sealed.map_err(|_| Error::crypto("encryption failed"))
    }

    /// Open `ciphertext || tag`.
    ///
    /// Fails when the key, nonce, or any authenticated byte does not match.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != self.kind().nonce_len() {
            return Err(Error::crypto("nonce length mismatch"));
        }
        let opened = match self {
            CipherInstance::Aes128(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext),
            CipherInstance::Aes256(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext),
            CipherInstance::ChaCha20(c) => {
                c.decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
            }
            CipherInstance::XChaCha20(c) => c.decrypt(XNonce::from_slice(nonce), ciphertext),
        };
        opened.map_err(|_| Error::crypto("decryption failed"))
    }
}

/// Parse a configured pre-shared key.
///
/// Accepts 32 raw bytes encoded as standard base64 (padded or unpadded) or
/// hex; everything else is rejected.
pub fn parse_psk(psk: &str) -> Result<[u8; PSK_LEN]> {
    let trimmed = psk.trim();
    if trimmed.is_empty() {
        return Err(Error::config("psk is empty"));
    }
    if let Ok(decoded) = STANDARD.decode(trimmed) {
        if let Ok(key) = <[u8; PSK_LEN]>::try_from(decoded) {
            return Ok(key);
        }
    }
    if let Ok(decoded) = STANDARD_NO_PAD.decode(trimmed) {
        if let Ok(key) = <[u8; PSK_LEN]>::try_from(decoded) {
            return Ok(key);
        }
    }
    if let Ok(decoded) = hex::decode(trimmed) {
        if let Ok(key) = <[u8; PSK_LEN]>::try_from(decoded) {
            return Ok(key);
        }
    }
    Err(Error::config("expected 32-byte PSK in base64 or hex"))
}
