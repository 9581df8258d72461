//! Datagram adapter.
//!
//! Each datagram travels in one record whose payload is a SOCKS5 UDP packet:
//! the target address prefixed to the datagram data. Senders prepend the
//! address, receivers strip it; payloads whose address fails to decode are
//! dropped silently.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::proxy::socks5::{self, SocksAddr};
use crate::transport::session::Session;

/// Packet-oriented view over an established session.
pub struct NekoPacketConn {
    session: Arc<Session>,
}

impl NekoPacketConn {
    /// Wrap a session in UDP mode.
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Receive one datagram and the address it belongs to.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocksAddr)> {
        loop {
            let payload = match self.session.read_packet().await {
                Ok(payload) => payload,
                Err(Error::ReplayDetected(_)) => return Err(Error::Eof),
                Err(e) => return Err(e),
            };
            match socks5::decode_udp_packet(&payload) {
                Some((addr, data)) => return Ok((data.to_vec(), addr)),
                None => continue,
            }
        }
    }

    /// Send one datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: &SocksAddr) -> Result<usize> {
        let packet = socks5::encode_udp_packet(addr, data);
        self.session.write_packet(&packet).await?;
        Ok(data.len())
    }

    /// Shut down the underlying connection.
    pub async fn close(&self) -> Result<()> {
        self.session.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_session_params, CipherKind};
    use crate::transport::frame::FrameCrypto;
    use crate::transport::shaping::FrameShaper;
    use crate::transport::ShapingConfig;

    fn packet_pair() -> (NekoPacketConn, NekoPacketConn) {
        let kind = CipherKind::ChaCha20Poly1305;
        let params = derive_session_params(&[1u8; 32], &[9u8; 32], kind);
        let shaper = FrameShaper::new(&ShapingConfig::default());
        let (left, right) = tokio::io::duplex(1 << 20);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);

        let a = Session::new(
            Box::new(left_read),
            Box::new(left_write),
            FrameCrypto::from_session(kind, &params).unwrap(),
            shaper.clone(),
            shaper.clone(),
            0,
            0,
            None,
            30,
        );
        let b = Session::new(
            Box::new(right_read),
            Box::new(right_write),
            FrameCrypto::from_session(kind, &params).unwrap(),
            shaper.clone(),
            shaper,
            0,
            0,
            None,
            30,
        );
        (
            NekoPacketConn::new(Arc::new(a)),
            NekoPacketConn::new(Arc::new(b)),
        )
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let (a, b) = packet_pair();
        let addr: SocksAddr = "1.2.3.4:9999".parse().unwrap();

        a.send_to(b"ping", &addr).await.unwrap();
        let (data, from) = b.recv_from().await.unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(from, addr);

        b.send_to(b"pong", &from).await.unwrap();
        let (data, from) = a.recv_from().await.unwrap();
        assert_eq!(data, b"pong");
        assert_eq!(from, addr);
    }

    #[tokio::test]
    async fn test_undecodable_datagram_dropped() {
        let (a, b) = packet_pair();

        // raw payload with a bogus address type byte is skipped silently
        a.session().write_packet(&[0, 0, 0, 0xEE, 1, 2, 3]).await.unwrap();
        let addr: SocksAddr = "8.8.8.8:53".parse().unwrap();
        a.send_to(b"good", &addr).await.unwrap();

        let (data, from) = b.recv_from().await.unwrap();
        assert_eq!(data, b"good");
        assert_eq!(from, addr);
    }

    #[tokio::test]
    async fn test_domain_datagram() {
        let (a, b) = packet_pair();
        let addr: SocksAddr = "example.com:443".parse().unwrap();

        a.send_to(b"query", &addr).await.unwrap();
        let (data, from) = b.recv_from().await.unwrap();
        assert_eq!(data, b"query");
        assert_eq!(from, addr);
    }
}
