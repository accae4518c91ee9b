//! TCP listener binding.
//!
//! # Responsibilities
//! - Bind to the configured endpoint with the configured backlog
//! - Apply socket buffer sizes before listening
//! - Accept connections and apply per-stream options

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerOptions;
use crate::net::socket;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) | ListenerError::Accept(e) => Some(e),
        }
    }
}

/// A bound listener carrying the server's connection options.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    options: ServerOptions,
}

impl Listener {
    /// Bind to `options.connection.endpoint`.
    pub async fn bind(options: &ServerOptions) -> Result<Self, ListenerError> {
        let addr = options.connection.endpoint;
        let socket = socket::new_socket(addr, &options.connection).map_err(ListenerError::Bind)?;
        socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;
        socket.bind(addr).map_err(ListenerError::Bind)?;
        let inner = socket.listen(options.backlog).map_err(ListenerError::Bind)?;

        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            name = %options.name,
            address = %local_addr,
            backlog = options.backlog,
            "Listener bound"
        );

        Ok(Self {
            inner,
            options: options.clone(),
        })
    }

    /// Accept the next connection with stream options applied.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        if let Err(e) = socket::configure_stream(&stream, &self.options.connection) {
            tracing::warn!(peer = %peer, error = %e, "Failed to apply stream options");
        }

        tracing::debug!(peer = %peer, "Connection accepted");
        Ok((stream, peer))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionOptionsBuilder, ServerBuilder};

    #[tokio::test]
    async fn binds_ephemeral_port_and_accepts() {
        let options = ServerBuilder::new("listener-test")
            .endpoint("127.0.0.1:0".parse().unwrap())
            .no_delay(true)
            .backlog(8)
            .build();
        let listener = Listener::bind(&options).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, peer) = listener.accept().await.unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(peer, client.await.unwrap().local_addr().unwrap());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let options = ServerBuilder::new("conflict")
            .endpoint(first.local_addr().unwrap())
            .build();
        let err = Listener::bind(&options).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
        assert!(err.to_string().starts_with("Failed to bind"));
    }
}
