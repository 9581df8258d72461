//! Inbound adapter.
//!
//! Accepts TCP connections, gates them through the whitelist, runs the
//! server handshake, and routes failures into probe response. Established
//! sessions come back as [`Inbound`] values for the host proxy to route;
//! the replay handler wiring, early-data splice, and fallback-target
//! substitution all happen here so the transport core stays policy-free.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};

use crate::client::{ShapingOptions, TransportOptions};
use crate::crypto::{parse_psk, CipherKind};
use crate::error::{Error, Result};
use crate::proxy::socks5::SocksAddr;
use crate::transport::session::ReplayHandler;
use crate::transport::{
    apply_transport, probe, server_handshake, FallbackConfig, Mode, NekoPacketConn, NekoStream,
    ReplayAction, ReplayFilter, ServerConfig, Session, TransportConfig, DEFAULT_FALLBACK_DEST,
};

/// Fallback options as they appear in host configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FallbackOptions {
    /// Fallback destination address literal; empty means the default
    pub dest: String,
    /// Opaque passthrough for the host fallback layer
    pub http_response: Option<String>,
    /// Source IPs exempt from probe response
    pub whitelist: Vec<String>,
}

/// Inbound configuration options.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InboundOptions {
    /// Listen address, `host:port`
    pub listen: String,
    /// Pre-shared key (base64 or hex)
    pub psk: String,
    /// AEAD suite name
    pub cipher: String,
    /// Parameter-rotation window in seconds; 0 means the default
    #[serde(default)]
    pub window_size: u64,
    /// Bound on the handshake noise offset; 0 means the default
    #[serde(default)]
    pub max_offset: usize,
    /// Clock-skew span scanned during the handshake, in windows
    #[serde(default)]
    pub handshake_candidate_span: i64,
    /// Nonce capacity per replay window; 0 means the default
    #[serde(default)]
    pub replay_capacity: usize,
    /// Number of live replay windows; 0 means the default
    #[serde(default)]
    pub replay_windows: usize,
    /// Traffic shaping
    #[serde(default)]
    pub shaping: ShapingOptions,
    /// Socket-level options
    #[serde(default)]
    pub transport: TransportOptions,
    /// Probe-response fallback behaviour
    #[serde(default)]
    pub fallback: Option<FallbackOptions>,
}

/// An established inbound connection, ready for the host proxy to route.
pub enum Inbound {
    /// A proxied byte stream and the target the client asked for
    Stream {
        /// Byte-stream view over the session
        stream: NekoStream,
        /// Decoded target, or the fallback destination when undecodable
        target: SocksAddr,
        /// Source address
        peer: SocketAddr,
    },
    /// A datagram session
    Packets {
        /// Packet view over the session
        conn: NekoPacketConn,
        /// Source address
        peer: SocketAddr,
    },
}

struct ListenerContext {
    server_cfg: ServerConfig,
    transport_cfg: TransportConfig,
    fallback_cfg: Option<FallbackConfig>,
    fallback_addr: SocksAddr,
    replay: Arc<ReplayFilter>,
}

/// Listens for NEKO connections and absorbs everything that is not one.
pub struct NekoListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<ListenerContext>,
}

impl NekoListener {
    /// Validate options, bind the listen socket, and construct the
    /// per-listener replay filter.
    pub async fn bind(options: &InboundOptions) -> Result<Self> {
        if options.psk.is_empty() {
            return Err(Error::config("psk is required"));
        }
        let psk = parse_psk(&options.psk)?;
        if options.cipher.is_empty() {
            return Err(Error::config("cipher is required"));
        }
        let cipher = CipherKind::parse(&options.cipher)?;

        let server_cfg = ServerConfig {
            psk,
            cipher,
            shaping: options.shaping.to_config("inbound"),
            window_size: options.window_size,
            max_offset: options.max_offset,
            handshake_candidate_span: options.handshake_candidate_span,
            replay_capacity: options.replay_capacity,
            replay_windows: options.replay_windows,
        };

        let mut fallback_dest = DEFAULT_FALLBACK_DEST.to_string();
        let fallback_cfg = options.fallback.as_ref().map(|fb| {
            if !fb.dest.is_empty() {
                fallback_dest = fb.dest.clone();
            }
            FallbackConfig {
                dest: fallback_dest.clone(),
                http_response: fb.http_response.clone(),
                whitelist: fb.whitelist.clone(),
            }
        });
        let fallback_addr: SocksAddr = fallback_dest
            .parse()
            .map_err(|_| Error::config(format!("invalid fallback dest: {fallback_dest}")))?;

        let replay = Arc::new(ReplayFilter::new(
            options.replay_capacity,
            options.replay_windows,
        ));

        let listener = TcpListener::bind(&options.listen).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("neko inbound listening at {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            ctx: Arc::new(ListenerContext {
                server_cfg,
                transport_cfg: options.transport.to_config(),
                fallback_cfg,
                fallback_addr,
                replay,
            }),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one connection and drive it to an outcome. Returns `None`
    /// when probe response absorbed it. Connections are handled inline;
    /// use [`NekoListener::serve`] to overlap handshakes.
    pub async fn accept(&self) -> Result<Option<Inbound>> {
        let (stream, peer) = self.listener.accept().await?;
        Ok(handle_connection(stream, peer, &self.ctx).await)
    }

    /// Accept loop: each connection is handled on its own task and
    /// established sessions are sent to `tx`.
    pub async fn serve(self, tx: tokio::sync::mpsc::Sender<Inbound>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&self.ctx);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Some(inbound) = handle_connection(stream, peer, &ctx).await {
                            let _ = tx.send(inbound).await;
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &ListenerContext,
) -> Option<Inbound> {
    apply_transport(&stream, &ctx.transport_cfg);

    if let Some(fallback) = &ctx.fallback_cfg {
        if !fallback.whitelist.is_empty() {
            let source = peer.ip().to_string();
            if !fallback.whitelist.iter().any(|ip| *ip == source) {
                tracing::debug!("unlisted source {}, silent fallback", peer);
                probe::silent_fallback(stream, Some(fallback)).await;
                return None;
            }
        }
    }

    match server_handshake(stream, &ctx.server_cfg, &ctx.replay).await {
        Err(failure) => {
            let response = probe::pick_probe_response();
            tracing::debug!("handshake from {} failed, responding with {:?}", peer, response);
            match response {
                ReplayAction::Blackhole => probe::blackhole(failure.stream).await,
                ReplayAction::Fallback => {
                    probe::silent_fallback(failure.stream, ctx.fallback_cfg.as_ref()).await
                }
                ReplayAction::Close => drop(failure.stream),
            }
            None
        }
        Ok(established) => {
            let session = Arc::new(established.session);
            if established.mode == Mode::Udp {
                return Some(Inbound::Packets {
                    conn: NekoPacketConn::new(session),
                    peer,
                });
            }

            let payload = established.target;
            let parsed = SocksAddr::parse(&payload);
            let (target, target_len) = match parsed {
                Some((addr, consumed)) => (addr, consumed),
                None => (ctx.fallback_addr.clone(), 0),
            };

            // Traffic for the fallback destination keeps its raw descriptor
            // bytes as early data so the fallback peer sees them verbatim.
            let mut early_data = Vec::new();
            if target == ctx.fallback_addr && !payload.is_empty() {
                early_data = if target_len > 0 && target_len <= payload.len() {
                    payload[..target_len].to_vec()
                } else {
                    payload.clone()
                };
            }

            let handler = replay_handler(Arc::clone(&session), ctx.fallback_cfg.clone());
            let stream = NekoStream::new(session, early_data, Some(handler));
            Some(Inbound::Stream {
                stream,
                target,
                peer,
            })
        }
    }
}

// Raised mid-session by the replay filter: route to the matching
// counter-behaviour on a fresh task so no session mutex is held.
fn replay_handler(session: Arc<Session>, fallback: Option<FallbackConfig>) -> ReplayHandler {
    Box::new(move |action| {
        tokio::spawn(async move {
            match action {
                ReplayAction::Blackhole => probe::blackhole_session(&session).await,
                ReplayAction::Fallback => {
                    probe::silent_fallback_session(&session, fallback.as_ref()).await
                }
                ReplayAction::Close => {
                    let _ = session.shutdown().await;
                }
            }
        });
    })
}
