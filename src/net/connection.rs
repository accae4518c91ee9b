//! Connection engine.
//!
//! # Responsibilities
//! - Pump bytes socket → receive pipe → frames → processor
//! - Pump frames send pipe → processor hook → socket
//! - Correlate duplex requests with their replies
//! - Tear everything down exactly once on disconnect
//!
//! # Data Flow
//! ```text
//!                 ┌───────── fill ─────────┐   ┌──────── parse ────────┐
//! socket read ───▶│ read_buf → PipeWriter  │──▶│ PipeReader → framing  │──▶ pending / processor
//!                 └────────────────────────┘   └───────────────────────┘
//!
//! send / request / reply ──▶ send pipe ──▶ ┌──────── flush ────────┐ ──▶ socket write
//!                                          │ framing → send hook   │
//!                                          └───────────────────────┘
//! ```
//!
//! # Connection States
//! ```text
//! Idle ──run──▶ Active ──disconnect──▶ Disconnecting ──loops done──▶ Closed
//!   └──────────────────disconnect──────────────────────────────────────┘
//! ```
//!
//! The three loops run joined inside the task that calls [`Connection::run`]
//! and share one cancellation signal. Any of them ending (EOF, I/O error,
//! framing error, cancellation) disconnects the connection, which stops the
//! other two.

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::ConnectionOptions;
use crate::error::{TransportError, TransportResult};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::message::Message;
use crate::net::correlation::{PendingRequests, Resolution, WaitError};
use crate::net::framing::{self, FrameError};
use crate::net::pipe::{self, PipeReader, PipeWriter, ReadStatus};
use crate::observability::metrics;
use crate::processor::FrameHandler;

/// Chunks that may wait on the send pipe.
const SEND_QUEUE_DEPTH: usize = 64;
/// Socket reads that may wait on the receive pipe.
const RECV_QUEUE_DEPTH: usize = 16;
const MIN_READ_CHUNK: usize = 512;
const MAX_READ_CHUNK: usize = 64 * 1024;
/// Settled correlation ids are remembered for this many request timeouts.
const SETTLED_RETENTION_FACTOR: u32 = 4;

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, loops not started.
    Idle,
    /// Loops running.
    Active,
    /// Disconnect requested, loops unwinding.
    Disconnecting,
    /// Loops finished, socket released.
    Closed,
}

#[derive(Debug)]
struct IoParts {
    stream: TcpStream,
    send_queue: PipeReader,
    replay: Bytes,
}

enum SendFailure {
    Framing(FrameError),
    Io(io::Error),
    Cancelled,
}

impl From<FrameError> for SendFailure {
    fn from(e: FrameError) -> Self {
        SendFailure::Framing(e)
    }
}

/// One framed TCP connection, shared by server sessions and clients.
#[derive(Debug)]
pub struct Connection {
    name: Arc<str>,
    peer: SocketAddr,
    options: Arc<ConnectionOptions>,
    send_queue: PipeWriter,
    pending: PendingRequests,
    state: Mutex<ConnectionState>,
    shutdown: Shutdown,
    io: Mutex<Option<IoParts>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Wrap an established stream. `replay` is fed to the receive side
    /// before anything read from the socket.
    pub(crate) fn new(
        name: Arc<str>,
        stream: TcpStream,
        peer: SocketAddr,
        options: Arc<ConnectionOptions>,
        replay: Bytes,
    ) -> Self {
        let (send_queue, send_rx) = pipe::pipe(
            SEND_QUEUE_DEPTH,
            options.send_buffer_size.min(MAX_READ_CHUNK),
        );
        let retention = options
            .duplex_timeout()
            .saturating_mul(SETTLED_RETENTION_FACTOR);

        Self {
            name,
            peer,
            send_queue,
            pending: PendingRequests::new(retention),
            state: Mutex::new(ConnectionState::Idle),
            shutdown: Shutdown::new(),
            io: Mutex::new(Some(IoParts {
                stream,
                send_queue: send_rx,
                replay,
            })),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective remote endpoint (the PROXY source when one was decoded).
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// `true` until a disconnect has been requested.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Idle | ConnectionState::Active
        )
    }

    /// A signal that fires when this connection starts disconnecting.
    pub fn cancel_signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }

    /// Resolves once a disconnect has been requested.
    pub async fn disconnected(&self) {
        self.shutdown.subscribe().cancelled().await
    }

    /// Requests currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Request a disconnect. Only the first call, from any task, returns `true`.
    pub fn disconnect(&self) -> bool {
        let mut state = lock(&self.state);
        let never_started = match *state {
            ConnectionState::Idle => true,
            ConnectionState::Active => false,
            ConnectionState::Disconnecting | ConnectionState::Closed => return false,
        };

        if never_started {
            *state = ConnectionState::Closed;
            lock(&self.io).take();
            self.pending.cancel_all();
        } else {
            *state = ConnectionState::Disconnecting;
        }
        self.shutdown.trigger();
        drop(state);

        tracing::debug!(name = %self.name, peer = %self.peer, "Disconnect requested");
        true
    }

    /// Run the receive, parse and send loops until the connection closes.
    ///
    /// With a `parent` signal, its cancellation also disconnects this connection.
    pub(crate) async fn run(
        &self,
        handler: &dyn FrameHandler,
        parent: Option<ShutdownSignal>,
    ) -> TransportResult<()> {
        let parts = {
            let mut state = lock(&self.state);
            match *state {
                ConnectionState::Idle => {}
                ConnectionState::Active => return Err(TransportError::AlreadyStarted),
                ConnectionState::Disconnecting | ConnectionState::Closed => return Ok(()),
            }
            let parts = lock(&self.io).take().ok_or(TransportError::AlreadyStarted)?;
            *state = ConnectionState::Active;
            parts
        };

        let IoParts {
            stream,
            send_queue,
            replay,
        } = parts;
        let (read_half, write_half) = stream.into_split();
        let (recv_tx, recv_rx) = pipe::pipe(
            RECV_QUEUE_DEPTH,
            self.options.recv_buffer_size.min(MAX_READ_CHUNK),
        );
        let cancel = self.shutdown.subscribe();

        tracing::debug!(
            name = %self.name,
            peer = %self.peer,
            duplex = self.options.duplex,
            "Connection started"
        );

        let pumps = async {
            tokio::join!(
                self.fill(read_half, recv_tx, replay, cancel.clone()),
                self.parse(recv_rx, handler, cancel.clone()),
                self.flush(write_half, send_queue, handler, cancel.clone()),
            )
        };
        tokio::pin!(pumps);

        let ((), parsed, flushed) = match parent {
            Some(parent) => {
                let finished = tokio::select! {
                    outcome = &mut pumps => Some(outcome),
                    _ = parent.cancelled() => None,
                };
                match finished {
                    Some(outcome) => outcome,
                    None => {
                        self.disconnect();
                        pumps.await
                    }
                }
            }
            None => pumps.await,
        };

        *lock(&self.state) = ConnectionState::Closed;
        self.pending.cancel_all();
        tracing::debug!(name = %self.name, peer = %self.peer, "Connection closed");

        parsed?;
        flushed?;
        Ok(())
    }

    async fn fill(
        &self,
        mut socket: OwnedReadHalf,
        pipe: PipeWriter,
        replay: Bytes,
        cancel: ShutdownSignal,
    ) {
        let chunk = self
            .options
            .recv_buffer_size
            .clamp(MIN_READ_CHUNK, MAX_READ_CHUNK);
        let mut buf = BytesMut::with_capacity(chunk);

        if pipe.write(replay).await.is_err() {
            self.disconnect();
            return;
        }

        loop {
            buf.reserve(chunk);
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = read_chunk(&mut socket, &mut buf, self.options.socket_timeout()) => read,
            };

            match read {
                Ok(0) => {
                    tracing::debug!(name = %self.name, peer = %self.peer, "Peer closed the stream");
                    break;
                }
                Ok(n) => {
                    metrics::record_bytes_received(n);
                    let data = buf.split().freeze();
                    let pushed = tokio::select! {
                        _ = cancel.cancelled() => break,
                        pushed = pipe.write(data) => pushed,
                    };
                    if pushed.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(name = %self.name, peer = %self.peer, error = %e, "Receive failed");
                    break;
                }
            }
        }

        drop(pipe);
        self.disconnect();
    }

    async fn parse(
        &self,
        mut pipe: PipeReader,
        handler: &dyn FrameHandler,
        cancel: ShutdownSignal,
    ) -> Result<(), FrameError> {
        let outcome = loop {
            // Bytes already read are processed even once a disconnect is underway.
            let status = tokio::select! {
                biased;
                status = pipe.read() => status,
                _ = cancel.cancelled() => break Ok(()),
            };

            if let Err(e) = self.drain_frames(pipe.buffer_mut(), handler, &cancel).await {
                break Err(e);
            }
            if status == ReadStatus::Completed {
                break Ok(());
            }
        };

        pipe.close();
        if let Err(e) = &outcome {
            tracing::error!(name = %self.name, peer = %self.peer, error = %e, "Framing error on receive");
            metrics::record_framing_error("receive");
        }
        self.disconnect();
        outcome
    }

    async fn drain_frames(
        &self,
        buffer: &mut BytesMut,
        handler: &dyn FrameHandler,
        cancel: &ShutdownSignal,
    ) -> Result<(), FrameError> {
        let capacity = self.options.recv_buffer_size;

        loop {
            let frame = if self.options.duplex {
                framing::take_duplex_frame(buffer, capacity)?.map(|f| (f.id, f.payload))
            } else {
                framing::take_plain_frame(buffer, capacity, |b| handler.message_size(b))?
                    .map(|payload| (Uuid::nil(), payload))
            };
            let Some((id, mut payload)) = frame else {
                return Ok(());
            };

            metrics::record_frame_received();
            handler.process_received_buffer(&mut payload);
            let payload = if self.options.copy_buffer {
                Bytes::copy_from_slice(&payload)
            } else {
                payload.freeze()
            };

            if !self.options.duplex {
                self.dispatch(handler, Message::new(id, payload), cancel).await;
                continue;
            }

            match self.pending.resolve(id, payload) {
                Resolution::Delivered => {}
                Resolution::Late => {
                    tracing::warn!(
                        name = %self.name,
                        peer = %self.peer,
                        correlation_id = %id,
                        "Dropping reply for a request that already completed"
                    );
                    metrics::record_dropped_reply();
                }
                Resolution::Unmatched(payload) => {
                    self.dispatch(handler, Message::new(id, payload), cancel).await;
                }
            }
        }
    }

    async fn dispatch(&self, handler: &dyn FrameHandler, message: Message, cancel: &ShutdownSignal) {
        let id = message.id;
        let outcome = AssertUnwindSafe(handler.on_message(message, cancel.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(name = %self.name, peer = %self.peer, correlation_id = %id, error = %e, "Message handler failed");
            }
            Err(_) => {
                tracing::error!(name = %self.name, peer = %self.peer, correlation_id = %id, "Message handler panicked");
            }
        }
    }

    async fn flush(
        &self,
        mut socket: OwnedWriteHalf,
        mut queue: PipeReader,
        handler: &dyn FrameHandler,
        cancel: ShutdownSignal,
    ) -> Result<(), FrameError> {
        let outcome = loop {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                status = queue.read() => status,
            };

            match self.write_frames(&mut socket, queue.buffer_mut(), handler, &cancel).await {
                Ok(()) => {}
                Err(SendFailure::Framing(e)) => break Err(e),
                Err(SendFailure::Io(e)) => {
                    tracing::warn!(name = %self.name, peer = %self.peer, error = %e, "Send failed");
                    break Ok(());
                }
                Err(SendFailure::Cancelled) => break Ok(()),
            }
            if status == ReadStatus::Completed {
                break Ok(());
            }
        };

        queue.close();
        if let Err(e) = &outcome {
            tracing::error!(name = %self.name, peer = %self.peer, error = %e, "Framing error on send");
            metrics::record_framing_error("send");
        }
        if let Err(e) = socket.shutdown().await {
            tracing::debug!(name = %self.name, peer = %self.peer, error = %e, "Socket shutdown failed");
        }
        self.disconnect();
        outcome
    }

    async fn write_frames(
        &self,
        socket: &mut OwnedWriteHalf,
        buffer: &mut BytesMut,
        handler: &dyn FrameHandler,
        cancel: &ShutdownSignal,
    ) -> Result<(), SendFailure> {
        let capacity = self.options.send_buffer_size;

        while let Some(mut frame) = framing::take_send_frame(buffer, self.options.duplex, capacity)? {
            handler.process_send_buffer(&mut frame);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SendFailure::Cancelled),
                written = write_frame(socket, &frame, self.options.socket_timeout()) => {
                    written.map_err(SendFailure::Io)?;
                }
            }
            metrics::record_frame_sent(frame.len());
        }
        Ok(())
    }

    /// Fire-and-forget send. In duplex mode the frame carries the nil id.
    pub async fn send(&self, payload: impl Into<Bytes>) -> TransportResult<()> {
        self.enqueue(Uuid::nil(), payload.into()).await
    }

    /// [`send`](Self::send) with the payload read from `reader` to its end.
    pub async fn send_reader<R>(&self, reader: R) -> TransportResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let payload = self.read_payload(reader).await?;
        self.send(payload).await
    }

    /// Send a request and wait for the reply carrying the same correlation id.
    ///
    /// Fails with [`TransportError::Timeout`] after the duplex timeout, and
    /// with [`TransportError::Cancelled`] if the connection goes away first.
    pub async fn request(&self, payload: impl Into<Bytes>) -> TransportResult<Bytes> {
        self.require_duplex("request")?;

        // Registered before the frame is queued so a fast reply finds its waiter.
        let slot = self.pending.register()?;
        let id = slot.id();
        self.enqueue(id, payload.into()).await?;

        let timeout = self.options.duplex_timeout();
        match slot.wait(timeout, &self.shutdown.subscribe()).await {
            Ok(reply) => Ok(reply),
            Err(WaitError::Timeout) => {
                metrics::record_request_timeout();
                tracing::warn!(
                    name = %self.name,
                    peer = %self.peer,
                    correlation_id = %id,
                    timeout = ?timeout,
                    "Request timed out"
                );
                if self.options.disconnect_on_timeout {
                    self.disconnect();
                }
                Err(TransportError::Timeout { id, timeout })
            }
            Err(WaitError::Cancelled) => Err(TransportError::Cancelled),
        }
    }

    pub async fn request_reader<R>(&self, reader: R) -> TransportResult<Bytes>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.require_duplex("request")?;
        let payload = self.read_payload(reader).await?;
        self.request(payload).await
    }

    /// Answer the request identified by `id`.
    pub async fn reply(&self, id: Uuid, payload: impl Into<Bytes>) -> TransportResult<()> {
        self.require_duplex("reply")?;
        self.enqueue(id, payload.into()).await
    }

    pub async fn reply_reader<R>(&self, id: Uuid, reader: R) -> TransportResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.require_duplex("reply")?;
        let payload = self.read_payload(reader).await?;
        self.reply(id, payload).await
    }

    fn require_duplex(&self, operation: &'static str) -> TransportResult<()> {
        if self.options.duplex {
            Ok(())
        } else {
            Err(TransportError::DuplexDisabled { operation })
        }
    }

    async fn read_payload<R>(&self, reader: R) -> TransportResult<Bytes>
    where
        R: AsyncRead + Unpin + Send,
    {
        // One byte past the limit is enough for the size check to reject it.
        let limit = self.options.send_buffer_size as u64 + 1;
        let mut payload = Vec::new();
        reader.take(limit).read_to_end(&mut payload).await?;
        Ok(Bytes::from(payload))
    }

    async fn enqueue(&self, id: Uuid, payload: Bytes) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let header = match framing::send_header(
            self.options.duplex,
            id,
            payload.len(),
            self.options.send_buffer_size,
        ) {
            Ok(header) => header,
            Err(e) => {
                tracing::error!(name = %self.name, peer = %self.peer, error = %e, "Outgoing message does not fit the send buffer");
                metrics::record_framing_error("send");
                self.disconnect();
                return Err(e.into());
            }
        };

        self.send_queue
            .write_all(&[header, payload])
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

async fn read_chunk(
    socket: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    limit: Option<Duration>,
) -> io::Result<usize> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, socket.read_buf(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "socket read timed out"))?,
        None => socket.read_buf(buf).await,
    }
}

async fn write_frame(
    socket: &mut OwnedWriteHalf,
    frame: &[u8],
    limit: Option<Duration>,
) -> io::Result<()> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, socket.write_all(frame))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "socket write timed out"))?,
        None => socket.write_all(frame).await,
    }
}
