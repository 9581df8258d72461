//! Runtime configuration for both transport roles.

use tokio::net::TcpStream;

use crate::crypto::CipherKind;
use crate::transport::{
    DEFAULT_FALLBACK_DEST, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_OFFSET, DEFAULT_WINDOW_SIZE,
    FRAME_META_LEN,
};

/// Traffic shaping knobs shared by both directions of a session.
#[derive(Clone, Debug)]
pub struct ShapingConfig {
    /// Whether jitter injection is active
    pub enabled: bool,
    /// Jitter sleep bounds in milliseconds; swapped when inverted
    pub jitter_range: [u64; 2],
    /// Maximum record length; 0 means the default (1400)
    pub max_frame_len: usize,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jitter_range: [0, 0],
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ShapingConfig {
    /// Payload bytes available per record after the frame metadata, clamped
    /// so at least one payload byte always fits.
    pub fn max_payload_len(&self) -> usize {
        let mut max_frame_len = self.max_frame_len;
        if max_frame_len == 0 {
            max_frame_len = DEFAULT_MAX_FRAME_LEN;
        }
        if max_frame_len < FRAME_META_LEN + 1 {
            max_frame_len = FRAME_META_LEN + 1;
        }
        max_frame_len - FRAME_META_LEN
    }
}

/// Outbound (client) transport configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// 32-byte pre-shared key
    pub psk: [u8; 32],
    /// AEAD suite
    pub cipher: CipherKind,
    /// Traffic shaping
    pub shaping: ShapingConfig,
    /// Parameter-rotation window in seconds; 0 means the default (30)
    pub window_size: u64,
    /// Bound on the handshake noise offset; 0 means the default (64)
    pub max_offset: usize,
}

impl ClientConfig {
    /// A configuration with defaults for everything beyond key and cipher.
    pub fn new(psk: [u8; 32], cipher: CipherKind) -> Self {
        Self {
            psk,
            cipher,
            shaping: ShapingConfig::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            max_offset: DEFAULT_MAX_OFFSET,
        }
    }
}

/// Inbound (server) transport configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// 32-byte pre-shared key
    pub psk: [u8; 32],
    /// AEAD suite
    pub cipher: CipherKind,
    /// Traffic shaping
    pub shaping: ShapingConfig,
    /// Parameter-rotation window in seconds; 0 means the default (30)
    pub window_size: u64,
    /// Bound on the handshake noise offset; 0 means the default (64)
    pub max_offset: usize,
    /// Clock-skew span scanned during the handshake, in windows
    pub handshake_candidate_span: i64,
    /// Nonce capacity per replay window; 0 means the default (8192)
    pub replay_capacity: usize,
    /// Number of live replay windows; 0 means the default (4)
    pub replay_windows: usize,
}

impl ServerConfig {
    /// A configuration with defaults for everything beyond key and cipher.
    pub fn new(psk: [u8; 32], cipher: CipherKind) -> Self {
        Self {
            psk,
            cipher,
            shaping: ShapingConfig::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            max_offset: DEFAULT_MAX_OFFSET,
            handshake_candidate_span: crate::transport::DEFAULT_HANDSHAKE_SPAN,
            replay_capacity: crate::transport::DEFAULT_REPLAY_CAPACITY,
            replay_windows: crate::transport::DEFAULT_REPLAY_WINDOWS,
        }
    }
}

/// Socket-level options applied to the underlying TCP connection.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm
    pub tcp_nodelay: bool,
    /// Keep-alive interval; carried for the host but not applied here
    pub keep_alive_secs: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keep_alive_secs: None,
        }
    }
}

/// Where and how non-authenticating traffic is absorbed.
#[derive(Clone, Debug)]
pub struct FallbackConfig {
    /// Fallback destination as a SOCKS-style address literal
    pub dest: String,
    /// Opaque passthrough for the host fallback layer; not consumed here
    pub http_response: Option<String>,
    /// Source IPs exempt from probe response
    pub whitelist: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            dest: DEFAULT_FALLBACK_DEST.to_string(),
            http_response: None,
            whitelist: Vec::new(),
        }
    }
}

/// Apply socket-level options to an accepted or dialed connection.
pub fn apply_transport(stream: &TcpStream, cfg: &TransportConfig) {
    if let Err(e) = stream.set_nodelay(cfg.tcp_nodelay) {
        tracing::debug!("failed to set TCP_NODELAY: {}", e);
    }
}
