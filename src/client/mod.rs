//! Outbound adapter.
//!
//! Thin glue between the host proxy's dial path and the transport core:
//! validates options once at construction, then hands dialed connections to
//! the client handshake. TCP streams and UDP datagram sessions share the
//! same handshake, distinguished only by the mode byte.

use std::sync::Arc;

use serde::Deserialize;
use tokio::net::TcpStream;

use crate::crypto::{parse_psk, CipherKind};
use crate::error::{Error, Result};
use crate::proxy::socks5::SocksAddr;
use crate::transport::{
    apply_transport, client_handshake, ClientConfig, Mode, NekoPacketConn, NekoStream,
    ShapingConfig, TransportConfig,
};

/// Traffic-shaping options as they appear in host configuration.
///
/// `noise-ratio` and `persona` are recognised but deprecated; they are
/// warned about and ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShapingOptions {
    /// Enable jitter injection
    pub enabled: bool,
    /// Deprecated; ignored with a warning
    pub noise_ratio: Option<f64>,
    /// Deprecated; ignored with a warning
    pub persona: Option<String>,
    /// Jitter bounds in milliseconds; one or two entries
    pub jitter_range: Vec<i64>,
    /// Maximum record length; 0 means the default
    pub max_frame_len: usize,
}

impl ShapingOptions {
    pub(crate) fn to_config(&self, scope: &str) -> ShapingConfig {
        if self.noise_ratio.is_some() {
            tracing::warn!("{} shaping noise-ratio is deprecated and ignored", scope);
        }
        if self.persona.is_some() {
            tracing::warn!("{} shaping persona is deprecated and ignored", scope);
        }
        let jitter_range = match self.jitter_range.as_slice() {
            [] => [0, 0],
            [only] => [clamp_ms(*only), clamp_ms(*only)],
            [min, max, ..] => [clamp_ms(*min), clamp_ms(*max)],
        };
        ShapingConfig {
            enabled: self.enabled,
            jitter_range,
            max_frame_len: self.max_frame_len,
        }
    }
}

fn clamp_ms(ms: i64) -> u64 {
    ms.max(0) as u64
}

/// Socket-level options as they appear in host configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TransportOptions {
    /// Disable Nagle's algorithm; defaults to true
    pub tcp_nodelay: Option<bool>,
    /// Keep-alive seconds, carried for the host
    pub keep_alive_secs: Option<u64>,
}

impl TransportOptions {
    pub(crate) fn to_config(&self) -> TransportConfig {
        TransportConfig {
            tcp_nodelay: self.tcp_nodelay.unwrap_or(true),
            keep_alive_secs: self.keep_alive_secs,
        }
    }
}

/// Outbound configuration options.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutboundOptions {
    /// Server host
    pub server: String,
    /// Server port
    pub port: u16,
    /// Pre-shared key (base64 or hex)
    pub psk: String,
    /// AEAD suite name
    pub cipher: String,
    /// Whether this outbound should carry UDP
    #[serde(default)]
    pub udp: bool,
    /// Parameter-rotation window in seconds; 0 means the default
    #[serde(default)]
    pub window_size: u64,
    /// Bound on the handshake noise offset; 0 means the default
    #[serde(default)]
    pub max_offset: usize,
    /// Traffic shaping
    #[serde(default)]
    pub shaping: ShapingOptions,
    /// Socket-level options
    #[serde(default)]
    pub transport: TransportOptions,
}

/// Dials NEKO sessions to one configured server.
pub struct NekoConnector {
    addr: String,
    client_cfg: ClientConfig,
    transport_cfg: TransportConfig,
    udp: bool,
}

impl NekoConnector {
    /// Validate options and build a connector.
    pub fn new(options: &OutboundOptions) -> Result<Self> {
        if options.server.is_empty() {
            return Err(Error::config("server is required"));
        }
        if options.port == 0 {
            return Err(Error::config("invalid port: 0"));
        }
        if options.psk.is_empty() {
            return Err(Error::config("psk is required"));
        }
        let psk = parse_psk(&options.psk)?;
        if options.cipher.is_empty() {
            return Err(Error::config("cipher is required"));
        }
        let cipher = CipherKind::parse(&options.cipher)?;

        let client_cfg = ClientConfig {
            psk,
            cipher,
            shaping: options.shaping.to_config("outbound"),
            window_size: options.window_size,
            max_offset: options.max_offset,
        };

        Ok(Self {
            addr: format!("{}:{}", options.server, options.port),
            client_cfg,
            transport_cfg: options.transport.to_config(),
            udp: options.udp,
        })
    }

    /// The `server:port` this connector dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether UDP was requested for this outbound.
    pub fn udp_enabled(&self) -> bool {
        self.udp
    }

    /// Dial and establish a proxied byte stream to `target`.
    pub async fn connect(&self, target: &SocksAddr) -> Result<NekoStream> {
        let session = self.establish(target, Mode::Tcp).await?;
        Ok(NekoStream::new(Arc::new(session), Vec::new(), None))
    }

    /// Dial and establish a datagram session for `target`.
    pub async fn connect_packets(&self, target: &SocksAddr) -> Result<NekoPacketConn> {
        let session = self.establish(target, Mode::Udp).await?;
        Ok(NekoPacketConn::new(Arc::new(session)))
    }

    async fn establish(&self, target: &SocksAddr, mode: Mode) -> Result<crate::transport::Session> {
        let stream = TcpStream::connect(&self.addr).await?;
        apply_transport(&stream, &self.transport_cfg);
        client_handshake(stream, &self.client_cfg, &target.to_bytes(), mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> OutboundOptions {
        OutboundOptions {
            server: "198.51.100.7".into(),
            port: 443,
            psk: hex::encode([0u8; 32]),
            cipher: "chacha20-poly1305".into(),
            udp: false,
            window_size: 0,
            max_offset: 0,
            shaping: ShapingOptions::default(),
            transport: TransportOptions::default(),
        }
    }

    #[test]
    fn test_connector_construction() {
        let connector = NekoConnector::new(&options()).unwrap();
        assert_eq!(connector.addr(), "198.51.100.7:443");
        assert!(!connector.udp_enabled());
    }

    #[test]
    fn test_connector_rejects_bad_options() {
        let mut bad = options();
        bad.server = String::new();
        assert!(NekoConnector::new(&bad).is_err());

        let mut bad = options();
        bad.port = 0;
        assert!(NekoConnector::new(&bad).is_err());

        let mut bad = options();
        bad.psk = "short".into();
        assert!(NekoConnector::new(&bad).is_err());

        let mut bad = options();
        bad.cipher = "rot13".into();
        assert!(NekoConnector::new(&bad).is_err());
    }

    #[test]
    fn test_jitter_range_normalisation() {
        let mut opts = ShapingOptions {
            jitter_range: vec![25],
            ..ShapingOptions::default()
        };
        assert_eq!(opts.to_config("test").jitter_range, [25, 25]);

        opts.jitter_range = vec![-5, 40];
        assert_eq!(opts.to_config("test").jitter_range, [0, 40]);

        opts.jitter_range = vec![];
        assert_eq!(opts.to_config("test").jitter_range, [0, 0]);
    }

    #[test]
    fn test_deprecated_options_dropped() {
        let opts = ShapingOptions {
            enabled: true,
            noise_ratio: Some(0.3),
            persona: Some("browser".into()),
            jitter_range: vec![1, 2],
            max_frame_len: 1200,
        };
        let cfg = opts.to_config("test");
        assert!(cfg.enabled);
        assert_eq!(cfg.max_frame_len, 1200);
    }
}
