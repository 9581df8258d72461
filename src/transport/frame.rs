//! Record codec.
//!
//! One record on the wire:
//!
//! ```text
//! [ tag_tail (16 - tag_split bytes) ]
//! [ encoded_nonce (24 bytes)        ]
//! [ ciphertext (10 + max_payload)   ]
//! [ tag_prefix (tag_split bytes)    ]
//! ```
//!
//! The plaintext is `seq_le64 || len_le16 || payload || random padding` to a
//! fixed length, so record sizes never reflect payload sizes. The AEAD tag is
//! split around the ciphertext and XOR-masked, and only the first `nonce_len`
//! bytes of the wire nonce are real (the rest is fresh noise). The handshake
//! record uses the same sealing but buries its tag tail at a derived offset
//! inside a run of leading noise.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{
    decode_nonce, xor_tag, CipherInstance, CipherKind, HandshakeParams, SecureRandom,
    SessionParams, FULL_TAG_LEN,
};
use crate::error::{Error, Result};
use crate::transport::replay::ReplayFilter;
use crate::transport::shaping::FrameShaper;
use crate::transport::{
    unix_now, ReplayAction, FRAME_META_LEN, MAX_SESSION_FRAMES, NETWORK_NONCE_LEN,
};

/// The per-record cryptographic state of one keyspace (handshake or session).
pub(crate) struct FrameCrypto {
    pub cipher: CipherInstance,
    pub nonce_mask: Vec<u8>,
    pub tag_split: usize,
    pub tag_mask: [u8; FULL_TAG_LEN],
}

impl FrameCrypto {
    pub fn from_handshake(kind: CipherKind, params: &HandshakeParams) -> Result<Self> {
        Ok(Self {
            cipher: CipherInstance::new(kind, &params.cipher_key)?,
            nonce_mask: params.nonce_mask.clone(),
            tag_split: params.tag_split,
            tag_mask: params.tag_mask,
        })
    }

    pub fn from_session(kind: CipherKind, params: &SessionParams) -> Result<Self> {
        Ok(Self {
            cipher: CipherInstance::new(kind, &params.cipher_key)?,
            nonce_mask: params.nonce_mask.clone(),
            tag_split: params.tag_split,
            tag_mask: params.tag_mask,
        })
    }

    /// Seal one record: pad the plaintext to `target_len`, encrypt under a
    /// fresh random nonce, split and mask the tag.
    fn seal(&self, seq: u64, target_len: usize, payload: &[u8]) -> Result<SealedRecord> {
        let available = target_len.saturating_sub(FRAME_META_LEN);
        if payload.len() > available {
            return Err(Error::crypto("payload too large for record"));
        }

        let mut frame = Vec::with_capacity(target_len);
        frame.extend_from_slice(&seq.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        if frame.len() < target_len {
            let mut padding = vec![0u8; target_len - frame.len()];
            SecureRandom::fill(&mut padding);
            frame.extend_from_slice(&padding);
        }

        let nonce_len = self.nonce_mask.len();
        let mut nonce = vec![0u8; nonce_len];
        SecureRandom::fill(&mut nonce);
        let mut encoded_nonce = [0u8; NETWORK_NONCE_LEN];
        SecureRandom::fill(&mut encoded_nonce);
        for i in 0..nonce_len {
            encoded_nonce[i] = nonce[i] ^ self.nonce_mask[i];
        }

        let mut sealed = self.cipher.encrypt(&nonce, &frame)?;
        if sealed.len() < FULL_TAG_LEN {
            return Err(Error::crypto("ciphertext too short"));
        }
        let ciphertext_len = sealed.len() - FULL_TAG_LEN;
        let mut tag = [0u8; FULL_TAG_LEN];
        tag.copy_from_slice(&sealed[ciphertext_len..]);
        xor_tag(&mut tag, &self.tag_mask);
        sealed.truncate(ciphertext_len);

        Ok(SealedRecord {
            encoded_nonce,
            ciphertext: sealed,
            tag,
            tag_split: self.tag_split,
        })
    }
}

struct SealedRecord {
    encoded_nonce: [u8; NETWORK_NONCE_LEN],
    ciphertext: Vec<u8>,
    tag: [u8; FULL_TAG_LEN],
    tag_split: usize,
}

impl SealedRecord {
    fn tag_prefix(&self) -> &[u8] {
        &self.tag[..self.tag_split]
    }

    fn tag_tail(&self) -> &[u8] {
        &self.tag[self.tag_split..]
    }

    /// Data-record wire form: tail, nonce, ciphertext, prefix.
    fn data_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            FULL_TAG_LEN + NETWORK_NONCE_LEN + self.ciphertext.len(),
        );
        out.extend_from_slice(self.tag_tail());
        out.extend_from_slice(&self.encoded_nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(self.tag_prefix());
        out
    }

    /// Handshake wire form: the tag tail is buried at `offset` inside a run
    /// of leading noise instead of leading the record.
    fn handshake_wire(&self, offset: usize) -> Vec<u8> {
        let tail = self.tag_tail();
        let mut noise = vec![0u8; offset + tail.len()];
        SecureRandom::fill(&mut noise);
        noise[offset..].copy_from_slice(tail);

        let mut out = Vec::with_capacity(
            noise.len() + NETWORK_NONCE_LEN + self.ciphertext.len() + self.tag_split,
        );
        out.extend_from_slice(&noise);
        out.extend_from_slice(&self.encoded_nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(self.tag_prefix());
        out
    }
}

/// Encode and send one data record, advancing `seq` on success.
pub(crate) async fn write_record<W>(
    w: &mut W,
    crypto: &FrameCrypto,
    seq: &mut u64,
    target_len: usize,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if *seq >= MAX_SESSION_FRAMES {
        return Err(Error::FramesExhausted);
    }
    let record = crypto.seal(*seq, target_len, payload)?;
    w.write_all(&record.data_wire()).await?;
    *seq = seq.wrapping_add(1);
    Ok(())
}

/// Send caller data as a run of shaped records.
pub(crate) async fn send_shaped<W>(
    w: &mut W,
    shaper: &FrameShaper,
    crypto: &FrameCrypto,
    seq: &mut u64,
    data: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let target_len = FRAME_META_LEN + shaper.max_payload_len();
    let mut cursor = 0usize;
    for segment in shaper.split(data.len()) {
        shaper.maybe_sleep().await;
        let take = segment.min(data.len() - cursor);
        write_record(w, crypto, seq, target_len, &data[cursor..cursor + take]).await?;
        cursor += take;
    }
    w.flush().await?;
    Ok(())
}

/// Encode and send the single handshake record. The inner length always
/// equals the derived handshake payload length; the caller's payload is
/// topped up with random bytes.
pub(crate) async fn write_handshake<W>(
    w: &mut W,
    crypto: &FrameCrypto,
    params: &HandshakeParams,
    seq: &mut u64,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload_len = crate::crypto::handshake_payload_len(&params.base_seed);
    if payload.len() > payload_len {
        return Err(Error::crypto("handshake payload too large"));
    }
    let mut padded = vec![0u8; payload_len];
    padded[..payload.len()].copy_from_slice(payload);
    SecureRandom::fill(&mut padded[payload.len()..]);

    let record = crypto.seal(*seq, FRAME_META_LEN + payload_len, &padded)?;
    w.write_all(&record.handshake_wire(params.offset)).await?;
    w.flush().await?;
    *seq = seq.wrapping_add(1);
    Ok(())
}

/// Read and decode one data record.
///
/// The replay filter, when present, is consulted on the recovered nonce
/// before the AEAD open; a hit yields a stochastic [`ReplayAction`] instead
/// of an ordinary error. Any decode failure after that point is EOF.
pub(crate) async fn read_record<R>(
    r: &mut R,
    crypto: &FrameCrypto,
    max_payload_len: usize,
    replay: Option<&ReplayFilter>,
    expected_seq: &mut u64,
    window_size: u64,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let target_len = FRAME_META_LEN + max_payload_len;
    let tag_tail_len = FULL_TAG_LEN - crypto.tag_split;

    let mut tag_tail = vec![0u8; tag_tail_len];
    read_full(r, &mut tag_tail).await?;
    let mut encoded_nonce = [0u8; NETWORK_NONCE_LEN];
    read_full(r, &mut encoded_nonce).await?;
    let mut ciphertext = vec![0u8; target_len];
    read_full(r, &mut ciphertext).await?;
    let mut tag_prefix = vec![0u8; crypto.tag_split];
    read_full(r, &mut tag_prefix).await?;

    let nonce = decode_nonce(&encoded_nonce, &crypto.nonce_mask);
    if let Some(filter) = replay {
        if window_size > 0 {
            let id = crate::crypto::window_id(unix_now(), window_size);
            if filter.check_and_set(id, &nonce) {
                return Err(Error::ReplayDetected(roll_replay_action()));
            }
        }
    }

    let mut tag = [0u8; FULL_TAG_LEN];
    tag[..crypto.tag_split].copy_from_slice(&tag_prefix);
    tag[crypto.tag_split..].copy_from_slice(&tag_tail);
    xor_tag(&mut tag, &crypto.tag_mask);
    ciphertext.extend_from_slice(&tag);

    let plaintext = crypto
        .cipher
        .decrypt(&nonce, &ciphertext)
        .map_err(|_| Error::Eof)?;
    if plaintext.len() < FRAME_META_LEN {
        return Err(Error::Eof);
    }
    let seq = u64::from_le_bytes(plaintext[..8].try_into().unwrap());
    if seq != *expected_seq {
        return Err(Error::Eof);
    }
    *expected_seq = expected_seq.wrapping_add(1);
    let length = u16::from_le_bytes(plaintext[8..10].try_into().unwrap()) as usize;
    if length > plaintext.len() - FRAME_META_LEN {
        return Err(Error::Eof);
    }
    Ok(plaintext[FRAME_META_LEN..FRAME_META_LEN + length].to_vec())
}

/// Try to open a handshake record sitting at the front of `prebuffer` with
/// one candidate window's parameters. Returns the inner payload, the real
/// nonce, and the number of pre-buffer bytes the record occupied.
pub(crate) fn open_handshake_record(
    prebuffer: &[u8],
    crypto: &FrameCrypto,
    params: &HandshakeParams,
) -> Option<(Vec<u8>, Vec<u8>, usize)> {
    let tag_tail_len = FULL_TAG_LEN - params.tag_split;
    let payload_len = crate::crypto::handshake_payload_len(&params.base_seed);
    let target_len = FRAME_META_LEN + payload_len;
    let expected_total =
        params.offset + tag_tail_len + NETWORK_NONCE_LEN + target_len + params.tag_split;
    if prebuffer.len() < expected_total {
        return None;
    }

    let nonce_pos = params.offset + tag_tail_len;
    let encoded_nonce = &prebuffer[nonce_pos..nonce_pos + NETWORK_NONCE_LEN];
    let nonce = decode_nonce(encoded_nonce, &crypto.nonce_mask);

    let ciphertext_start = nonce_pos + NETWORK_NONCE_LEN;
    let ciphertext_end = ciphertext_start + target_len;

    let mut tag = [0u8; FULL_TAG_LEN];
    tag[..params.tag_split]
        .copy_from_slice(&prebuffer[ciphertext_end..ciphertext_end + params.tag_split]);
    tag[params.tag_split..]
        .copy_from_slice(&prebuffer[params.offset..params.offset + tag_tail_len]);
    xor_tag(&mut tag, &params.tag_mask);

    let mut ciphertext = prebuffer[ciphertext_start..ciphertext_end].to_vec();
    ciphertext.extend_from_slice(&tag);
    let plaintext = crypto.cipher.decrypt(&nonce, &ciphertext).ok()?;

    if plaintext.len() < FRAME_META_LEN {
        return None;
    }
    let seq = u64::from_le_bytes(plaintext[..8].try_into().unwrap());
    if seq != 0 {
        return None;
    }
    let length = u16::from_le_bytes(plaintext[8..10].try_into().unwrap()) as usize;
    if length > plaintext.len() - FRAME_META_LEN {
        return None;
    }
    Some((
        plaintext[FRAME_META_LEN..FRAME_META_LEN + length].to_vec(),
        nonce,
        expected_total,
    ))
}

/// Equal-weight roll over the three counter-behaviours.
pub(crate) fn roll_replay_action() -> ReplayAction {
    match SecureRandom::below(100) {
        r if r < 34 => ReplayAction::Blackhole,
        r if r < 67 => ReplayAction::Fallback,
        _ => ReplayAction::Close,
    }
}

// A short read mid-record means the stream died; that is EOF, not a distinct
// I/O failure, at the record surface.
async fn read_full<R>(r: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if buf.is_empty() {
        return Ok(());
    }
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::Eof),
        Err(e) => Err(e.into()),
    }
}
