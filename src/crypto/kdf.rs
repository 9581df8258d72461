//! Parameter derivation.
//!
//! All key material flows from the 32-byte PSK through BLAKE3 in two modes:
//! the keyed hash (`BLAKE3(key = PSK, data)`) and the `derive_key` construction
//! with byte-exact context strings. Handshake parameters rotate per time
//! window; session parameters bind to the client's random salt so the live
//! session keyspace is distinct from the handshake keyspace.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{CipherKind, FULL_TAG_LEN, PSK_LEN};

const CTX_CIPHER_KEY: &str = "neko-cipher-key";
const CTX_NONCE_MASK: &str = "neko-nonce-mask";
const CTX_TAG_MASK: &str = "neko-tag-mask";
const CTX_OFFSET_SEED: &str = "neko-offset-seed";
const CTX_SESSION_BASE: &str = "neko-session-base";
const CTX_SESSION_CIPHER: &str = "neko-session-cipher";
const CTX_SESSION_NONCE_MASK: &str = "neko-session-nonce-mask";
const CTX_SESSION_TAG_MASK: &str = "neko-session-tag-mask";

/// Per-window parameters governing the handshake record layout.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HandshakeParams {
    /// AEAD key, truncated to the cipher's key length
    pub cipher_key: Vec<u8>,
    /// XOR mask applied to the wire nonce, truncated to the nonce length
    pub nonce_mask: Vec<u8>,
    /// XOR mask applied to the split AEAD tag
    pub tag_mask: [u8; FULL_TAG_LEN],
    /// Window seed all other material derives from
    pub base_seed: [u8; 32],
    /// Leading-noise length burying the tag tail
    pub offset: usize,
    /// Count of tag bytes placed after the ciphertext; the rest lead the record
    pub tag_split: usize,
}

/// Per-session parameters derived from the PSK and the client's salt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionParams {
    /// AEAD key, truncated to the cipher's key length
    pub cipher_key: Vec<u8>,
    /// XOR mask applied to the wire nonce
    pub nonce_mask: Vec<u8>,
    /// XOR mask applied to the split AEAD tag
    pub tag_mask: [u8; FULL_TAG_LEN],
    /// Count of tag bytes placed after the ciphertext
    pub tag_split: usize,
}

/// The epoch a unix timestamp falls into.
pub fn window_id(timestamp: i64, window_size: u64) -> i64 {
    timestamp / window_size as i64
}

/// Derive handshake parameters for the window containing `timestamp`.
pub fn derive_handshake_params(
    psk: &[u8; PSK_LEN],
    timestamp: i64,
    cipher: CipherKind,
    window_size: u64,
    max_offset: usize,
) -> HandshakeParams {
    let id = window_id(timestamp, window_size);
    let base_seed = *blake3::keyed_hash(psk, &(id as u64).to_le_bytes()).as_bytes();

    let cipher_key_full = blake3::derive_key(CTX_CIPHER_KEY, &base_seed);
    let nonce_mask_full = blake3::derive_key(CTX_NONCE_MASK, &base_seed);
    let tag_mask_full = blake3::derive_key(CTX_TAG_MASK, &base_seed);
    let offset_seed = blake3::derive_key(CTX_OFFSET_SEED, &base_seed);

    let offset = if max_offset > 0 {
        offset_seed[0] as usize % max_offset
    } else {
        0
    };

    let mut tag_mask = [0u8; FULL_TAG_LEN];
    tag_mask.copy_from_slice(&tag_mask_full[..FULL_TAG_LEN]);

    HandshakeParams {
        cipher_key: cipher_key_full[..cipher.key_len()].to_vec(),
        nonce_mask: nonce_mask_full[..cipher.nonce_len()].to_vec(),
        tag_mask,
        base_seed,
        offset,
        tag_split: tag_split_from(base_seed[0]),
    }
}

/// Derive session parameters from the PSK and the 32-byte client salt.
pub fn derive_session_params(
    psk: &[u8; PSK_LEN],
    salt: &[u8; 32],
    cipher: CipherKind,
) -> SessionParams {
    let mut seed_input = Vec::with_capacity(PSK_LEN + salt.len());
    seed_input.extend_from_slice(psk);
    seed_input.extend_from_slice(salt);
    let seed = *blake3::hash(&seed_input).as_bytes();
    seed_input.zeroize();

    let session_base = blake3::derive_key(CTX_SESSION_BASE, &seed);
    let cipher_key_full = blake3::derive_key(CTX_SESSION_CIPHER, &session_base);
    let nonce_mask_full = blake3::derive_key(CTX_SESSION_NONCE_MASK, &session_base);
    let tag_mask_full = blake3::derive_key(CTX_SESSION_TAG_MASK, &session_base);

    let mut tag_mask = [0u8; FULL_TAG_LEN];
    tag_mask.copy_from_slice(&tag_mask_full[..FULL_TAG_LEN]);

    SessionParams {
        cipher_key: cipher_key_full[..cipher.key_len()].to_vec(),
        nonce_mask: nonce_mask_full[..cipher.nonce_len()].to_vec(),
        tag_mask,
        tag_split: tag_split_from(session_base[0]),
    }
}

/// Inner payload length of a handshake record for a given window seed.
pub fn handshake_payload_len(base_seed: &[u8; 32]) -> usize {
    320 + base_seed[0] as usize % 321
}

/// Recover the real nonce from its masked wire form.
pub fn decode_nonce(encoded: &[u8], mask: &[u8]) -> Vec<u8> {
    mask.iter().zip(encoded).map(|(m, e)| m ^ e).collect()
}

/// XOR-mask (or unmask) a full AEAD tag in place.
pub fn xor_tag(tag: &mut [u8; FULL_TAG_LEN], mask: &[u8; FULL_TAG_LEN]) {
    for (t, m) in tag.iter_mut().zip(mask) {
        *t ^= m;
    }
}

// tag_split stays in [12, 16] so the tail section is at most 4 bytes.
fn tag_split_from(seed_byte: u8) -> usize {
    12 + (seed_byte % 5) as usize
}
