//! Accept loop and session registry.
//!
//! # Responsibilities
//! - Bind the listener from validated [`ServerOptions`]
//! - Accept sockets, decode the PROXY header when configured
//! - Register each session, run its connection, deregister on close
//! - Dispatch session lifecycle callbacks to the processor
//! - Disconnect every session when the accept loop stops

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{validation, ConfigError, ConnectionOptions, ServerOptions};
use crate::error::{TransportError, TransportResult};
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::Connection;
use crate::net::listener::Listener;
use crate::net::proxy_protocol::{read_proxy_header, ProxyOutcome};
use crate::observability::metrics;
use crate::processor::{ServerProcessor, SessionHandler};
use crate::server::Session;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

struct Shared {
    name: Arc<str>,
    options: ServerOptions,
    connection: Arc<ConnectionOptions>,
    processor: Arc<dyn ServerProcessor>,
    sessions: DashMap<Uuid, Arc<Session>>,
}

/// A TCP server hosting framed sessions.
pub struct Server {
    shared: Arc<Shared>,
    listener: Mutex<Option<Listener>>,
    local_addr: SocketAddr,
}

impl Server {
    /// Validate `options` and bind the listener. Accepting starts with [`listen`](Self::listen).
    pub async fn bind(
        options: ServerOptions,
        processor: Arc<dyn ServerProcessor>,
    ) -> TransportResult<Self> {
        validation::validate_server(&options).map_err(ConfigError::Validation)?;

        let listener = Listener::bind(&options).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: Arc::from(options.name.as_str()),
                connection: Arc::new(options.connection.clone()),
                options,
                processor,
                sessions: DashMap::new(),
            }),
            listener: Mutex::new(Some(listener)),
            local_addr,
        })
    }

    /// Spawn the accept loop. It runs until `shutdown` fires, then
    /// disconnects every session.
    pub fn listen(&self, shutdown: ShutdownSignal) -> TransportResult<JoinHandle<()>> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let shared = self.shared.clone();
        Ok(tokio::spawn(accept_loop(shared, listener, shutdown)))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    /// Look up a live session.
    pub fn session(&self, id: Uuid) -> Option<Arc<Session>> {
        self.shared.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every live session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.shared
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: Listener, shutdown: ShutdownSignal) {
    tracing::info!(name = %shared.name, address = %shared.options.connection.endpoint, "Server listening");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { shared.serve(stream, peer, shutdown).await });
            }
            Err(e) => {
                tracing::warn!(name = %shared.name, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    drop(listener);

    let sessions: Vec<Arc<Session>> = shared
        .sessions
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    for session in &sessions {
        session.disconnect();
    }

    tracing::info!(name = %shared.name, sessions = sessions.len(), "Server stopped");
}

impl Shared {
    async fn serve(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr, shutdown: ShutdownSignal) {
        let outcome = if self.options.use_proxy {
            match self.decode_proxy(&mut stream, peer, &shutdown).await {
                Some(outcome) => outcome,
                None => return,
            }
        } else {
            ProxyOutcome {
                remote: peer,
                header: None,
                replay: Bytes::new(),
            }
        };

        let connection = Connection::new(
            self.name.clone(),
            stream,
            outcome.remote,
            self.connection.clone(),
            outcome.replay,
        );
        let session = Arc::new(Session::new(connection, outcome.header));
        let session_id = session.id();

        self.sessions.insert(session_id, session.clone());
        metrics::record_active_sessions(self.sessions.len());
        tracing::info!(
            name = %self.name,
            session_id = %session_id,
            peer = %session.remote_addr(),
            socket_peer = %peer,
            "Session connected"
        );

        {
            let processor = self.processor.clone();
            let session = session.clone();
            let cancel = session.cancel_signal();
            let name = self.name.clone();
            tokio::spawn(async move {
                let connected = AssertUnwindSafe(processor.on_session_connect(session, cancel))
                    .catch_unwind()
                    .await;
                log_callback(&name, session_id, "on_session_connect", connected);
            });
        }

        let handler = SessionHandler {
            processor: self.processor.clone(),
            session: session.clone(),
        };
        if let Err(e) = session.run(&handler, Some(shutdown)).await {
            tracing::warn!(name = %self.name, session_id = %session_id, error = %e, "Session ended with an error");
        }
        drop(handler);

        session.disconnect();
        self.sessions.remove(&session_id);
        metrics::record_active_sessions(self.sessions.len());
        tracing::info!(name = %self.name, session_id = %session_id, "Session disconnected");

        let disconnected = AssertUnwindSafe(self.processor.on_session_disconnect(session_id))
            .catch_unwind()
            .await;
        log_callback(&self.name, session_id, "on_session_disconnect", disconnected);
    }

    /// Read the PROXY header, bounded by the socket timeout and the server
    /// shutdown. `None` means the connection is dropped.
    async fn decode_proxy(
        &self,
        stream: &mut TcpStream,
        peer: SocketAddr,
        shutdown: &ShutdownSignal,
    ) -> Option<ProxyOutcome> {
        let limit = self.connection.socket_timeout();
        let decode = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, read_proxy_header(stream, peer))
                    .await
                    .ok(),
                None => Some(read_proxy_header(stream, peer).await),
            }
        };

        let decoded = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(name = %self.name, peer = %peer, "Server stopping before the PROXY header arrived");
                return None;
            }
            decoded = decode => decoded,
        };

        match decoded {
            Some(Ok(outcome)) => Some(outcome),
            Some(Err(e)) => {
                tracing::warn!(name = %self.name, peer = %peer, error = %e, "Rejecting connection with a bad PROXY header");
                None
            }
            None => {
                tracing::warn!(name = %self.name, peer = %peer, timeout = ?limit, "PROXY header timed out");
                None
            }
        }
    }
}

fn log_callback(
    name: &str,
    session_id: Uuid,
    callback: &'static str,
    outcome: std::thread::Result<Result<(), crate::error::ProcessorError>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(name = %name, session_id = %session_id, callback, error = %e, "Processor callback failed");
        }
        Err(_) => {
            tracing::error!(name = %name, session_id = %session_id, callback, "Processor callback panicked");
        }
    }
}
