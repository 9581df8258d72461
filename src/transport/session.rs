//! Session state and stream adapter.
//!
//! A [`Session`] is the record-level view of an established connection:
//! records in, records out, replay actions surfaced as a typed error. A read
//! mutex and a write mutex serialise concurrent callers; the guards are held
//! across record boundaries, never longer.
//!
//! [`NekoStream`] layers a byte-stream view on top: it owns a residual
//! buffer for partially consumed records, optionally a pre-read slice of
//! handshake early data, and a one-shot replay handler that runs off-lock.

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::transport::frame::{self, FrameCrypto};
use crate::transport::replay::ReplayFilter;
use crate::transport::shaping::FrameShaper;
use crate::transport::ReplayAction;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One-shot callback fired when a replay action is raised mid-session.
/// Runs outside the session mutexes; spawn a task for long-lived behaviour.
pub type ReplayHandler = Box<dyn FnOnce(ReplayAction) + Send + 'static>;

struct ReadState {
    io: BoxedReader,
    shaper: FrameShaper,
    seq: u64,
}

struct WriteState {
    io: BoxedWriter,
    shaper: FrameShaper,
    seq: u64,
}

/// The record-level state of one established connection.
pub struct Session {
    read: AsyncMutex<ReadState>,
    write: AsyncMutex<WriteState>,
    crypto: FrameCrypto,
    replay: Option<Arc<ReplayFilter>>,
    window_size: u64,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        reader: BoxedReader,
        writer: BoxedWriter,
        crypto: FrameCrypto,
        inbound_shaper: FrameShaper,
        outbound_shaper: FrameShaper,
        inbound_seq: u64,
        outbound_seq: u64,
        replay: Option<Arc<ReplayFilter>>,
        window_size: u64,
    ) -> Self {
        Self {
            read: AsyncMutex::new(ReadState {
                io: reader,
                shaper: inbound_shaper,
                seq: inbound_seq,
            }),
            write: AsyncMutex::new(WriteState {
                io: writer,
                shaper: outbound_shaper,
                seq: outbound_seq,
            }),
            crypto,
            replay,
            window_size,
        }
    }

    /// Read one record and return its payload (possibly empty).
    ///
    /// A replay hit surfaces as [`Error::ReplayDetected`]; any decode
    /// failure surfaces as [`Error::Eof`] and ends the session.
    pub async fn read_frame(&self) -> Result<Vec<u8>> {
        let mut state = self.read.lock().await;
        let ReadState { io, shaper, seq } = &mut *state;
        frame::read_record(
            io,
            &self.crypto,
            shaper.max_payload_len(),
            self.replay.as_deref(),
            seq,
            self.window_size,
        )
        .await
    }

    /// Read records until one carries a non-empty payload.
    pub async fn read_packet(&self) -> Result<Vec<u8>> {
        loop {
            let payload = self.read_frame().await?;
            if !payload.is_empty() {
                return Ok(payload);
            }
        }
    }

    /// Send caller data as a run of shaped records. Holds the write mutex
    /// across the whole shaped send.
    pub async fn write_frames(&self, data: &[u8]) -> Result<()> {
        let mut state = self.write.lock().await;
        let WriteState { io, shaper, seq } = &mut *state;
        frame::send_shaped(io, shaper, &self.crypto, seq, data).await
    }

    /// Send one datagram. The shaper may still segment oversized payloads.
    pub async fn write_packet(&self, data: &[u8]) -> Result<()> {
        self.write_frames(data).await
    }

    /// Shut down the write side of the underlying connection.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.write.lock().await;
        state.io.shutdown().await?;
        Ok(())
    }

    // Raw transport reads for probe behaviours: record structure is ignored.
    pub(crate) async fn read_raw(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.read.lock().await;
        state.io.read(buf).await
    }

    // Raw transport write under the session write mutex, so probe noise can
    // coexist with any in-flight record writer.
    pub(crate) async fn write_raw(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut state = self.write.lock().await;
        state.io.write_all(buf).await?;
        state.io.flush().await
    }
}

const STATE_NORMAL: u8 = 0;
const STATE_CLOSED: u8 = 1;

/// Byte-stream adapter over a [`Session`].
pub struct NekoStream {
    session: Arc<Session>,
    pre_read: Vec<u8>,
    pre_pos: usize,
    residual: Vec<u8>,
    residual_pos: usize,
    state: Arc<AtomicU8>,
    replay_handler: Arc<Mutex<Option<ReplayHandler>>>,
}

impl NekoStream {
    /// Wrap a session. `pre_read` is served before any record is decoded
    /// (server-side early data); `replay_handler` fires at most once, on the
    /// first replay action.
    pub fn new(
        session: Arc<Session>,
        pre_read: Vec<u8>,
        replay_handler: Option<ReplayHandler>,
    ) -> Self {
        Self {
            session,
            pre_read,
            pre_pos: 0,
            residual: Vec::new(),
            residual_pos: 0,
            state: Arc::new(AtomicU8::new(STATE_NORMAL)),
            replay_handler: Arc::new(Mutex::new(replay_handler)),
        }
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Replace the replay handler.
    pub fn set_replay_handler(&self, handler: ReplayHandler) {
        *self.replay_handler.lock() = Some(handler);
    }

    /// Read up to `buf.len()` bytes. Returns 0 at end of stream, after a
    /// replay action, and for zero-length `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pre_pos < self.pre_read.len() {
            let n = buf.len().min(self.pre_read.len() - self.pre_pos);
            buf[..n].copy_from_slice(&self.pre_read[self.pre_pos..self.pre_pos + n]);
            self.pre_pos += n;
            return Ok(n);
        }
        while self.residual_pos >= self.residual.len() {
            match self.session.read_frame().await {
                Ok(payload) => {
                    if payload.is_empty() {
                        continue;
                    }
                    self.residual = payload;
                    self.residual_pos = 0;
                }
                Err(Error::ReplayDetected(action)) => {
                    self.trigger_replay(action);
                    return Ok(0);
                }
                Err(e) if e.is_eof() => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        let n = buf.len().min(self.residual.len() - self.residual_pos);
        buf[..n].copy_from_slice(&self.residual[self.residual_pos..self.residual_pos + n]);
        self.residual_pos += n;
        Ok(n)
    }

    /// Read exactly `buf.len()` bytes or fail with EOF.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::Eof);
            }
            filled += n;
        }
        Ok(())
    }

    /// Write the whole buffer through the session.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.state.load(Ordering::Acquire) != STATE_NORMAL {
            return Err(Error::ClosedPipe);
        }
        self.session.write_frames(buf).await?;
        Ok(buf.len())
    }

    /// Close the stream. Subsequent writes fail with a closed-pipe error.
    pub async fn close(&mut self) -> Result<()> {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.session.shutdown().await
    }

    fn trigger_replay(&self, action: ReplayAction) {
        let handler = self.replay_handler.lock().take();
        self.state.store(STATE_CLOSED, Ordering::Release);
        if let Some(handler) = handler {
            handler(action);
        }
    }
}

/// Reader serving a small owned buffer before delegating to the inner
/// reader; used to stitch server handshake leftover in front of the socket.
pub(crate) struct PrefixedReader<R> {
    inner: R,
    prefix: Vec<u8>,
    pos: usize,
}

impl<R> PrefixedReader<R> {
    pub(crate) fn new(inner: R, prefix: Vec<u8>) -> Self {
        Self {
            inner,
            prefix,
            pos: 0,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PrefixedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = buf.remaining().min(this.prefix.len() - this.pos);
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            if this.pos >= this.prefix.len() {
                this.prefix = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
