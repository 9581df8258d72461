//! Probe response.
//!
//! Traffic that never authenticates gets one of three stochastic
//! counter-behaviours instead of an immediate disconnect: a slow-read
//! blackhole, a silent fallback that keeps the connection alive while
//! occasionally emitting entropy-shaped noise, or a plain close. The spread
//! denies active probers a stable timing fingerprint.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};

use crate::crypto::SecureRandom;
use crate::transport::config::FallbackConfig;
use crate::transport::session::Session;
use crate::transport::ReplayAction;

const BLACKHOLE_DURATION: Duration = Duration::from_secs(20);
const BLACKHOLE_READ_DEADLINE: Duration = Duration::from_secs(2);

/// Pick the behaviour for a failed handshake: half blackhole, mostly
/// fallback otherwise, occasionally a plain close.
pub fn pick_probe_response() -> ReplayAction {
    match SecureRandom::below(100) {
        r if r < 50 => ReplayAction::Blackhole,
        r if r < 90 => ReplayAction::Fallback,
        _ => ReplayAction::Close,
    }
}

/// Read-and-discard for 20 seconds under short read deadlines, then close.
/// Deadline expiries are expected and continued.
pub async fn blackhole<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut buf = [0u8; 1024];
    while started.elapsed() < BLACKHOLE_DURATION {
        match timeout(BLACKHOLE_READ_DEADLINE, stream.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
        }
    }
    let _ = stream.shutdown().await;
}

/// Keep reading with deadlines of 3–9 seconds; on each expiry, with 10%
/// probability write 1–8 random bytes. Returns on EOF or a real error.
pub async fn silent_fallback<S>(mut stream: S, fallback: Option<&FallbackConfig>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = fallback;
    let mut buf = [0u8; 256];
    loop {
        let deadline = Duration::from_secs(SecureRandom::range(3, 9));
        match timeout(deadline, stream.read(&mut buf)).await {
            Err(_) => {
                if SecureRandom::below(100) < 10 {
                    let mut noise = vec![0u8; SecureRandom::range(1, 8) as usize];
                    SecureRandom::fill(&mut noise);
                    if stream.write_all(&noise).await.is_err() {
                        return;
                    }
                    let _ = stream.flush().await;
                }
            }
            Ok(Ok(0)) => return,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return,
        }
    }
}

/// Blackhole on an established session's transport, then close it.
pub async fn blackhole_session(session: &Session) {
    let started = Instant::now();
    let mut buf = [0u8; 1024];
    while started.elapsed() < BLACKHOLE_DURATION {
        match timeout(BLACKHOLE_READ_DEADLINE, session.read_raw(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
        }
    }
    let _ = session.shutdown().await;
}

/// Silent fallback on an established session. Noise writes go through the
/// session write mutex and so coexist with any in-flight record writer.
pub async fn silent_fallback_session(session: &Session, fallback: Option<&FallbackConfig>) {
    let _ = fallback;
    let mut buf = [0u8; 256];
    loop {
        let deadline = Duration::from_secs(SecureRandom::range(3, 9));
        match timeout(deadline, session.read_raw(&mut buf)).await {
            Err(_) => {
                if SecureRandom::below(100) < 10 {
                    let mut noise = vec![0u8; SecureRandom::range(1, 8) as usize];
                    SecureRandom::fill(&mut noise);
                    if session.write_raw(&noise).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Ok(0)) => return,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return,
        }
    }
}
