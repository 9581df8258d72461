//! The NEKO transport core.
//!
//! Wire format, handshake, session state, replay filtering, traffic shaping,
//! and the server-side probe-response policy. The adapters in [`crate::client`]
//! and [`crate::server`] are thin glue over this module.

pub mod config;
pub(crate) mod frame;
pub mod handshake;
pub mod packet;
pub mod probe;
pub mod replay;
pub mod session;
pub mod shaping;

pub use config::{apply_transport, ClientConfig, FallbackConfig, ServerConfig, ShapingConfig,
    TransportConfig};
pub use handshake::{client_handshake, server_handshake, HandshakeFailure, ServerSession};
pub use packet::NekoPacketConn;
pub use replay::ReplayFilter;
pub use session::{NekoStream, ReplayHandler, Session};
pub use shaping::FrameShaper;

use std::time::Duration;

/// Default epoch length for parameter rotation, seconds
pub const DEFAULT_WINDOW_SIZE: u64 = 30;
/// Default bound on the handshake leading-noise offset
pub const DEFAULT_MAX_OFFSET: usize = 64;
/// Default nonce capacity of one replay window
pub const DEFAULT_REPLAY_CAPACITY: usize = 8192;
/// Default number of live replay windows
pub const DEFAULT_REPLAY_WINDOWS: usize = 4;
/// Default clock-skew span, in windows, scanned by the server handshake
pub const DEFAULT_HANDSHAKE_SPAN: i64 = 1;
/// On-wire nonce field length; longer than any cipher nonce, tail is noise
pub const NETWORK_NONCE_LEN: usize = 24;
/// Record metadata length: 8-byte sequence + 2-byte payload length
pub const FRAME_META_LEN: usize = 10;
/// Upper bound on the server handshake pre-buffer
pub const PREBUFFER_LEN: usize = 4096;
/// Wall-clock budget for accumulating the handshake pre-buffer
pub const HANDSHAKE_WAIT: Duration = Duration::from_millis(2000);
/// Per-poll read deadline while accumulating the pre-buffer
pub const HANDSHAKE_PEEK_INTERVAL: Duration = Duration::from_millis(100);
/// Minimum pre-buffer length worth scanning
pub const HANDSHAKE_MIN_PEEK: usize = 64;
/// Default destination for silent-fallback traffic
pub const DEFAULT_FALLBACK_DEST: &str = "127.0.0.1:80";
/// Hard cap on records per session, per direction
pub const MAX_SESSION_FRAMES: u64 = 1 << 30;
/// Length of the client-chosen session salt
pub const SESSION_SALT_LEN: usize = 32;
/// Default maximum record length before shaping
pub const DEFAULT_MAX_FRAME_LEN: usize = 1400;

/// Counter-behaviour directive raised instead of an ordinary error when the
/// replay filter refuses a record, and chosen against probers whose handshake
/// never verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplayAction {
    /// Read-and-discard for a fixed period, then close
    Blackhole,
    /// Keep the connection alive, occasionally emitting entropy-shaped noise
    Fallback,
    /// Close immediately
    Close,
}

/// Session mode carried in the handshake payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Proxied byte stream
    Tcp = 0x00,
    /// Proxied datagrams, one per record
    Udp = 0x01,
}

impl Mode {
    /// Wire byte for this mode.
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Decode a mode byte; anything that is not the UDP marker is a stream.
    pub fn from_byte(b: u8) -> Mode {
        if b == Mode::Udp.byte() {
            Mode::Udp
        } else {
            Mode::Tcp
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bytes() {
        assert_eq!(Mode::Tcp.byte(), 0x00);
        assert_eq!(Mode::Udp.byte(), 0x01);
        assert_eq!(Mode::from_byte(0x01), Mode::Udp);
        assert_eq!(Mode::from_byte(0x00), Mode::Tcp);
        assert_eq!(Mode::from_byte(0x7F), Mode::Tcp);
    }

    #[test]
    fn test_unix_now_is_sane() {
        // past 2020-01-01, and monotone enough for window math
        assert!(unix_now() > 1_577_836_800);
    }
}
