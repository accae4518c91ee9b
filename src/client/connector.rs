//! Outbound connection.

use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;

use crate::config::{validation, ClientOptions, ConfigError};
use crate::error::TransportResult;
use crate::lifecycle::Shutdown;
use crate::net::connection::Connection;
use crate::net::socket;
use crate::processor::{ClientHandler, ClientProcessor};

/// A connected client. Derefs to [`Connection`] for `send`, `request`,
/// `reply` and `disconnect`.
#[derive(Debug)]
pub struct Client {
    options: ClientOptions,
    connection: Connection,
    closed: Shutdown,
}

impl Client {
    /// Validate `options`, connect, and start the connection loops.
    pub async fn connect(
        options: ClientOptions,
        processor: Arc<dyn ClientProcessor>,
    ) -> TransportResult<Arc<Self>> {
        validation::validate_client(&options).map_err(ConfigError::Validation)?;

        let stream = socket::connect(&options.connection).await?;
        let peer = stream.peer_addr()?;
        let connection = Connection::new(
            Arc::from(options.name.as_str()),
            stream,
            peer,
            Arc::new(options.connection.clone()),
            Bytes::new(),
        );

        let client = Arc::new(Self {
            options,
            connection,
            closed: Shutdown::new(),
        });
        tracing::info!(name = %client.options.name, peer = %peer, "Client connected");

        {
            let processor = processor.clone();
            let client = client.clone();
            tokio::spawn(async move {
                let cancel = client.cancel_signal();
                let outcome = AssertUnwindSafe(processor.on_connected(client.clone(), cancel))
                    .catch_unwind()
                    .await;
                client.log_callback("on_connected", outcome);
            });
        }

        let runner = client.clone();
        tokio::spawn(async move { runner.drive(processor).await });

        Ok(client)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Resolves once the loops have stopped and `on_disconnected` has returned.
    pub async fn closed(&self) {
        self.closed.subscribe().cancelled().await
    }

    async fn drive(self: Arc<Self>, processor: Arc<dyn ClientProcessor>) {
        let handler = ClientHandler {
            processor: processor.clone(),
            client: self.clone(),
        };
        if let Err(e) = self.connection.run(&handler, None).await {
            tracing::warn!(name = %self.options.name, error = %e, "Client connection ended with an error");
        }
        drop(handler);

        tracing::info!(name = %self.options.name, "Client disconnected");
        let outcome = AssertUnwindSafe(processor.on_disconnected())
            .catch_unwind()
            .await;
        self.log_callback("on_disconnected", outcome);
        self.closed.trigger();
    }

    fn log_callback(
        &self,
        callback: &'static str,
        outcome: std::thread::Result<Result<(), crate::error::ProcessorError>>,
    ) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(name = %self.options.name, callback, error = %e, "Processor callback failed");
            }
            Err(_) => {
                tracing::error!(name = %self.options.name, callback, "Processor callback panicked");
            }
        }
    }
}

impl Deref for Client {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}
