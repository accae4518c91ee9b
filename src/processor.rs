//! Application callbacks.
//!
//! # Responsibilities
//! - [`ServerProcessor`]: per-session lifecycle and message callbacks for a server
//! - [`ClientProcessor`]: the same for a client connection
//! - Buffer hooks: plain-mode message sizing and in-place transforms on
//!   received payloads and outgoing frames
//!
//! # Data Flow
//! ```text
//! receive loop → message_size (plain mode) → process_received_buffer
//!     → correlation (duplex) → on_received_message
//! send loop → process_send_buffer → socket
//! ```
//!
//! Message callbacks are awaited one at a time in arrival order. A callback
//! that wants to `request` on its own connection must spawn that work, since
//! the reply is parsed by the loop that is awaiting the callback.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::Client;
use crate::error::ProcessorError;
use crate::lifecycle::ShutdownSignal;
use crate::message::Message;
use crate::server::Session;

#[async_trait]
pub trait ServerProcessor: Send + Sync + 'static {
    /// A session was accepted and registered.
    async fn on_session_connect(
        &self,
        _session: Arc<Session>,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// A session closed and was removed from the registry.
    async fn on_session_disconnect(&self, _session_id: Uuid) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn on_received_message(
        &self,
        session: &Arc<Session>,
        message: Message,
        cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError>;

    /// Plain mode only: size of the message at the front of `buffer`, or
    /// `None` while more bytes are needed.
    fn message_size(&self, _session: &Session, _buffer: &[u8]) -> Option<usize> {
        None
    }

    /// Transform a received payload in place before it is dispatched.
    fn process_received_buffer(&self, _session: &Session, _buffer: &mut [u8]) {}

    /// Transform an outgoing frame in place before it hits the socket.
    fn process_send_buffer(&self, _session: &Session, _buffer: &mut [u8]) {}
}

#[async_trait]
pub trait ClientProcessor: Send + Sync + 'static {
    async fn on_connected(
        &self,
        _client: Arc<Client>,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn on_disconnected(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn on_received_message(
        &self,
        client: &Arc<Client>,
        message: Message,
        cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError>;

    fn message_size(&self, _client: &Client, _buffer: &[u8]) -> Option<usize> {
        None
    }

    fn process_received_buffer(&self, _client: &Client, _buffer: &mut [u8]) {}

    fn process_send_buffer(&self, _client: &Client, _buffer: &mut [u8]) {}
}

/// What the connection loops call into, with the owning session or client bound.
#[async_trait]
pub(crate) trait FrameHandler: Send + Sync {
    async fn on_message(&self, message: Message, cancel: ShutdownSignal)
        -> Result<(), ProcessorError>;

    fn message_size(&self, buffer: &[u8]) -> Option<usize>;

    fn process_received_buffer(&self, buffer: &mut [u8]);

    fn process_send_buffer(&self, buffer: &mut [u8]);
}

pub(crate) struct SessionHandler {
    pub(crate) processor: Arc<dyn ServerProcessor>,
    pub(crate) session: Arc<Session>,
}

#[async_trait]
impl FrameHandler for SessionHandler {
    async fn on_message(
        &self,
        message: Message,
        cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        self.processor
            .on_received_message(&self.session, message, cancel)
            .await
    }

    fn message_size(&self, buffer: &[u8]) -> Option<usize> {
        self.processor.message_size(&self.session, buffer)
    }

    fn process_received_buffer(&self, buffer: &mut [u8]) {
        self.processor.process_received_buffer(&self.session, buffer)
    }

    fn process_send_buffer(&self, buffer: &mut [u8]) {
        self.processor.process_send_buffer(&self.session, buffer)
    }
}

pub(crate) struct ClientHandler {
    pub(crate) processor: Arc<dyn ClientProcessor>,
    pub(crate) client: Arc<Client>,
}

#[async_trait]
impl FrameHandler for ClientHandler {
    async fn on_message(
        &self,
        message: Message,
        cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        self.processor
            .on_received_message(&self.client, message, cancel)
            .await
    }

    fn message_size(&self, buffer: &[u8]) -> Option<usize> {
        self.processor.message_size(&self.client, buffer)
    }

    fn process_received_buffer(&self, buffer: &mut [u8]) {
        self.processor.process_received_buffer(&self.client, buffer)
    }

    fn process_send_buffer(&self, buffer: &mut [u8]) {
        self.processor.process_send_buffer(&self.client, buffer)
    }
}
