//! Error types for the transport.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::net::framing::FrameError;
use crate::net::listener::ListenerError;
use crate::net::proxy_protocol::ProxyProtocolError;

/// Boxed error returned by processor callbacks.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A duplex-only operation was used on a plain connection.
    #[error("{operation} requires duplex mode to be enabled")]
    DuplexDisabled {
        /// Operation that was refused.
        operation: &'static str,
    },

    /// A freshly generated correlation id was already pending.
    #[error("cannot track completion for correlation id {0}")]
    CorrelationConflict(Uuid),

    /// Framing violation; fatal to the connection.
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    /// No reply arrived within the duplex timeout.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout {
        /// Correlation id of the request.
        id: Uuid,
        /// Configured duplex timeout.
        timeout: Duration,
    },

    /// The operation was cancelled by a disconnect.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection is closed or closing.
    #[error("connection is closed")]
    Disconnected,

    /// The connection's pumping loops were already started.
    #[error("connection already started")]
    AlreadyStarted,

    /// PROXY protocol header could not be decoded.
    #[error("proxy protocol error: {0}")]
    ProxyProtocol(#[from] ProxyProtocolError),

    /// Binding or accepting failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
