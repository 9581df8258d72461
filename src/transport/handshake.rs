//! Connection establishment.
//!
//! The client sends exactly one record whose layout (noise offset, tag split,
//! payload length) is derived from the PSK and the current time window, so
//! there is no fixed byte signature to match. The server cannot know which
//! window the client used, so it accumulates a pre-buffer and scans every
//! candidate window within the configured clock-skew span, attempting a
//! decode at each candidate's derived layout.

use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::Instant;

use crate::crypto::{
    derive_handshake_params, derive_session_params, handshake_payload_len, window_id,
    SecureRandom, FULL_TAG_LEN,
};
use crate::error::{Error, Result};
use crate::transport::frame::{open_handshake_record, write_handshake, FrameCrypto};
use crate::transport::replay::ReplayFilter;
use crate::transport::session::{PrefixedReader, Session};
use crate::transport::shaping::FrameShaper;
use crate::transport::{
    unix_now, ClientConfig, Mode, ServerConfig, DEFAULT_HANDSHAKE_SPAN, DEFAULT_MAX_OFFSET,
    DEFAULT_WINDOW_SIZE, FRAME_META_LEN, HANDSHAKE_MIN_PEEK, HANDSHAKE_PEEK_INTERVAL,
    HANDSHAKE_WAIT, NETWORK_NONCE_LEN, PREBUFFER_LEN, SESSION_SALT_LEN,
};

/// A successful server handshake.
pub struct ServerSession {
    /// The established session (inbound sequence 1, outbound 0)
    pub session: Session,
    /// Opaque target descriptor the client asked for
    pub target: Vec<u8>,
    /// Pre-buffer bytes beyond the handshake record; already spliced in
    /// front of the session's reader
    pub leftover: Vec<u8>,
    /// Stream or datagram session
    pub mode: Mode,
}

/// A failed server handshake. The connection is handed back so the caller
/// can run a probe response on it.
pub struct HandshakeFailure<S> {
    /// The connection, untouched beyond the consumed pre-buffer bytes
    pub stream: S,
    /// Why the handshake failed
    pub error: Error,
}

/// Perform the client side of the handshake and return the session.
///
/// Writes one handshake record carrying `salt || mode || target`, then
/// derives the session keyspace from the salt. The returned session starts
/// with outbound sequence 1 (the handshake consumed 0) and inbound 0.
pub async fn client_handshake<S>(
    stream: S,
    cfg: &ClientConfig,
    target: &[u8],
    mode: Mode,
) -> Result<Session>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    client_handshake_at(stream, cfg, target, mode, unix_now()).await
}

pub(crate) async fn client_handshake_at<S>(
    stream: S,
    cfg: &ClientConfig,
    target: &[u8],
    mode: Mode,
    now: i64,
) -> Result<Session>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let window_size = effective(cfg.window_size, DEFAULT_WINDOW_SIZE);
    let max_offset = effective(cfg.max_offset as u64, DEFAULT_MAX_OFFSET as u64) as usize;

    let params = derive_handshake_params(&cfg.psk, now, cfg.cipher, window_size, max_offset);
    let handshake_crypto = FrameCrypto::from_handshake(cfg.cipher, &params)?;

    let salt: [u8; SESSION_SALT_LEN] = SecureRandom::bytes();
    let mut payload = Vec::with_capacity(SESSION_SALT_LEN + 1 + target.len());
    payload.extend_from_slice(&salt);
    payload.push(mode.byte());
    payload.extend_from_slice(target);

    let (read_half, mut write_half) = split(stream);
    let mut seq = 0u64;
    write_handshake(&mut write_half, &handshake_crypto, &params, &mut seq, &payload).await?;

    let session_params = derive_session_params(&cfg.psk, &salt, cfg.cipher);
    let session_crypto = FrameCrypto::from_session(cfg.cipher, &session_params)?;

    Ok(Session::new(
        Box::new(read_half),
        Box::new(write_half),
        session_crypto,
        FrameShaper::new(&cfg.shaping),
        FrameShaper::new(&cfg.shaping),
        0,
        seq,
        None,
        window_size,
    ))
}

/// Perform the server side of the handshake.
///
/// Accumulates a pre-buffer sized to the largest candidate layout, then
/// attempts each candidate window in order. On success, leftover pre-buffer
/// bytes are spliced in front of the session reader. On failure the
/// connection comes back inside [`HandshakeFailure`] for probe response.
pub async fn server_handshake<S>(
    stream: S,
    cfg: &ServerConfig,
    replay: &Arc<ReplayFilter>,
) -> std::result::Result<ServerSession, HandshakeFailure<S>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut stream = stream;
    let window_size = effective(cfg.window_size, DEFAULT_WINDOW_SIZE);
    let max_offset = effective(cfg.max_offset as u64, DEFAULT_MAX_OFFSET as u64) as usize;
    let span = if cfg.handshake_candidate_span <= 0 {
        DEFAULT_HANDSHAKE_SPAN
    } else {
        cfg.handshake_candidate_span
    };
    let deltas: Vec<i64> = (-span..=span).collect();

    let now = unix_now();
    let mut required_peek = HANDSHAKE_MIN_PEEK;
    for delta in &deltas {
        let candidate_ts = now + delta * window_size as i64;
        let params =
            derive_handshake_params(&cfg.psk, candidate_ts, cfg.cipher, window_size, max_offset);
        let expected_total = expected_handshake_total(&params);
        required_peek = required_peek.max(expected_total);
    }
    required_peek = required_peek.min(PREBUFFER_LEN);

    let mut prebuffer = Vec::with_capacity(required_peek);
    let started = Instant::now();
    while prebuffer.len() < required_peek && started.elapsed() < HANDSHAKE_WAIT {
        let mut chunk = vec![0u8; required_peek - prebuffer.len()];
        match tokio::time::timeout(HANDSHAKE_PEEK_INTERVAL, stream.read(&mut chunk)).await {
            // poll deadline; keep accumulating until the wall-clock budget
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => prebuffer.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) => break,
        }
    }
    if prebuffer.is_empty() {
        return Err(HandshakeFailure {
            stream,
            error: Error::HandshakeFailed,
        });
    }

    let now = unix_now();
    for delta in &deltas {
        let candidate_ts = now + delta * window_size as i64;
        let params =
            derive_handshake_params(&cfg.psk, candidate_ts, cfg.cipher, window_size, max_offset);
        let Ok(handshake_crypto) = FrameCrypto::from_handshake(cfg.cipher, &params) else {
            continue;
        };
        let Some((payload, nonce, consumed)) =
            open_handshake_record(&prebuffer, &handshake_crypto, &params)
        else {
            continue;
        };
        if payload.len() < SESSION_SALT_LEN + 1 {
            continue;
        }
        let id = window_id(candidate_ts, window_size);
        if replay.check_and_set(id, &nonce) {
            continue;
        }

        let mut salt = [0u8; SESSION_SALT_LEN];
        salt.copy_from_slice(&payload[..SESSION_SALT_LEN]);
        let mode = Mode::from_byte(payload[SESSION_SALT_LEN]);
        let target = payload[SESSION_SALT_LEN + 1..].to_vec();

        let session_params = derive_session_params(&cfg.psk, &salt, cfg.cipher);
        let session_crypto = match FrameCrypto::from_session(cfg.cipher, &session_params) {
            Ok(c) => c,
            Err(error) => return Err(HandshakeFailure { stream, error }),
        };

        let leftover = prebuffer[consumed..].to_vec();
        let (read_half, write_half) = split(stream);
        let reader = PrefixedReader::new(read_half, leftover.clone());
        let session = Session::new(
            Box::new(reader),
            Box::new(write_half),
            session_crypto,
            FrameShaper::new(&cfg.shaping),
            FrameShaper::new(&cfg.shaping),
            1,
            0,
            Some(Arc::clone(replay)),
            window_size,
        );
        return Ok(ServerSession {
            session,
            target,
            leftover,
            mode,
        });
    }

    Err(HandshakeFailure {
        stream,
        error: Error::HandshakeFailed,
    })
}

fn expected_handshake_total(params: &crate::crypto::HandshakeParams) -> usize {
    let tag_tail_len = FULL_TAG_LEN - params.tag_split;
    params.offset
        + tag_tail_len
        + NETWORK_NONCE_LEN
        + FRAME_META_LEN
        + handshake_payload_len(&params.base_seed)
        + params.tag_split
}

fn effective(value: u64, default: u64) -> u64 {
    if value == 0 {
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKind;
    use crate::transport::DEFAULT_REPLAY_CAPACITY;

    fn client_cfg() -> ClientConfig {
        ClientConfig::new([0u8; 32], CipherKind::ChaCha20Poly1305)
    }

    fn server_cfg() -> ServerConfig {
        ServerConfig::new([0u8; 32], CipherKind::ChaCha20Poly1305)
    }

    const TARGET: &[u8] = &[0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x50];

    #[tokio::test(start_paused = true)]
    async fn test_handshake_roundtrip() {
        let (client_end, server_end) = tokio::io::duplex(16 * 1024);
        let replay = Arc::new(ReplayFilter::new(DEFAULT_REPLAY_CAPACITY, 4));

        let client = tokio::spawn(async move {
            client_handshake(client_end, &client_cfg(), TARGET, Mode::Tcp)
                .await
                .unwrap()
        });

        let established = server_handshake(server_end, &server_cfg(), &replay)
            .await
            .map_err(|f| f.error)
            .unwrap();
        assert_eq!(established.target, TARGET);
        assert_eq!(established.mode, Mode::Tcp);
        assert!(established.leftover.is_empty());

        let client_session = client.await.unwrap();

        // first client record after the handshake carries sequence 1
        client_session.write_frames(b"hello").await.unwrap();
        let payload = established.session.read_frame().await.unwrap();
        assert_eq!(payload, b"hello");

        // reverse channel begins at sequence 0
        established.session.write_frames(b"world").await.unwrap();
        let payload = client_session.read_frame().await.unwrap();
        assert_eq!(payload, b"world");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_udp_mode() {
        let (client_end, server_end) = tokio::io::duplex(16 * 1024);
        let replay = Arc::new(ReplayFilter::new(64, 4));

        tokio::spawn(async move {
            let _session = client_handshake(client_end, &client_cfg(), TARGET, Mode::Udp)
                .await
                .unwrap();
        });

        let established = server_handshake(server_end, &server_cfg(), &replay)
            .await
            .map_err(|f| f.error)
            .unwrap();
        assert_eq!(established.mode, Mode::Udp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_skew_within_span() {
        let (client_end, server_end) = tokio::io::duplex(16 * 1024);
        let replay = Arc::new(ReplayFilter::new(64, 4));
        let cfg = client_cfg();
        let window = cfg.window_size as i64;

        // client writes with a clock one full window behind the server
        tokio::spawn(async move {
            let _session = client_handshake_at(
                client_end,
                &cfg,
                TARGET,
                Mode::Tcp,
                unix_now() - window,
            )
            .await
            .unwrap();
        });

        let established = server_handshake(server_end, &server_cfg(), &replay)
            .await
            .map_err(|f| f.error)
            .unwrap();
        assert_eq!(established.target, TARGET);
    }

    #[tokio::test]
    async fn test_replayed_handshake_rejected() {
        // capture one valid handshake off a duplex pipe
        let (client_end, mut capture_end) = tokio::io::duplex(16 * 1024);
        tokio::spawn(async move {
            let _ = client_handshake(client_end, &client_cfg(), TARGET, Mode::Tcp).await;
        });
        let mut captured = vec![0u8; 4096];
        let n = capture_end.read(&mut captured).await.unwrap();
        captured.truncate(n);

        let replay = Arc::new(ReplayFilter::new(64, 4));

        // first presentation succeeds
        let (mut feeder, server_end) = tokio::io::duplex(16 * 1024);
        let bytes = captured.clone();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            feeder.write_all(&bytes).await.unwrap();
        });
        assert!(server_handshake(server_end, &server_cfg(), &replay)
            .await
            .is_ok());

        // identical bytes within the same window must not produce a session
        let (mut feeder, server_end) = tokio::io::duplex(16 * 1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            feeder.write_all(&captured).await.unwrap();
        });
        let failure = server_handshake(server_end, &server_cfg(), &replay)
            .await
            .err()
            .expect("replayed handshake must fail");
        assert!(matches!(failure.error, Error::HandshakeFailed));
    }

    #[tokio::test]
    async fn test_garbage_fails_handshake() {
        let (mut feeder, server_end) = tokio::io::duplex(16 * 1024);
        let replay = Arc::new(ReplayFilter::new(64, 4));

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut junk = vec![0u8; 1024];
            SecureRandom::fill(&mut junk);
            feeder.write_all(&junk).await.unwrap();
        });

        let failure = server_handshake(server_end, &server_cfg(), &replay)
            .await
            .err()
            .expect("garbage must fail");
        assert!(matches!(failure.error, Error::HandshakeFailed));
    }

    #[tokio::test]
    async fn test_empty_connection_fails_fast() {
        let (feeder, server_end) = tokio::io::duplex(64);
        let replay = Arc::new(ReplayFilter::new(64, 4));
        drop(feeder); // immediate EOF, zero bytes

        let failure = server_handshake(server_end, &server_cfg(), &replay)
            .await
            .err()
            .expect("empty connection must fail");
        assert!(matches!(failure.error, Error::HandshakeFailed));
    }
}
