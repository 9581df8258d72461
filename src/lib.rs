//! # NEKO Transport
//!
//! An obfuscated, authenticated, bidirectional framing protocol for carrying
//! proxied TCP streams and UDP datagrams across a hostile network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Host Proxy (routing, dialing)              │
//! ├─────────────────────────────────────────────────────────┤
//! │  Adapters (outbound connector, inbound listener)        │
//! ├─────────────────────────────────────────────────────────┤
//! │  Session (records in/out, replay routing, shaping)      │
//! ├─────────────────────────────────────────────────────────┤
//! │  Handshake (windowed layout, candidate scanning)        │
//! ├─────────────────────────────────────────────────────────┤
//! │  Crypto Layer (BLAKE3 derivation, AEAD, CSPRNG)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Indistinguishability**: every byte on the wire looks random without
//!    the pre-shared key; the handshake has no fixed header
//! 2. **Probe absorption**: active probers are met with stochastic
//!    counter-behaviours instead of a fingerprint-friendly disconnect
//! 3. **Replay safety**: a bounded, rotating-window nonce filter refuses
//!    any record the server has already admitted

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod crypto;
pub mod error;
pub mod proxy;
pub mod server;
pub mod transport;

pub use client::NekoConnector;
pub use error::{Error, Result};
pub use proxy::socks5::SocksAddr;
pub use server::{Inbound, NekoListener};
pub use transport::{Mode, NekoPacketConn, NekoStream, ReplayAction, Session};
