//! netpipe demo
//!
//! ```text
//! netpipe-demo server [--config server.toml] [--endpoint 0.0.0.0:38101]
//!     → Server::bind → listen → echo every request back as its reply
//!
//! netpipe-demo client [--config client.toml] [--endpoint 127.0.0.1:38101]
//!     → Client::connect → fire N requests concurrently → print reply sizes
//! ```
//!
//! Both modes run duplex by default when no config file is given.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};

use netpipe::config::{load_client_options, load_server_options};
use netpipe::lifecycle::signals;
use netpipe::observability::logging;
use netpipe::{
    Client, ClientBuilder, ClientProcessor, ConnectionOptionsBuilder, Message, ProcessorError,
    Server, ServerBuilder, ServerProcessor, Session, Shutdown, ShutdownSignal,
};

#[derive(Parser)]
#[command(name = "netpipe-demo")]
#[command(about = "Echo server and load client for the netpipe transport", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server until Ctrl+C
    Server {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, default_value = "0.0.0.0:38101")]
        endpoint: SocketAddr,
    },
    /// Connect, send requests and print the replies
    Client {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, default_value = "127.0.0.1:38101")]
        endpoint: SocketAddr,

        /// Requests to fire concurrently
        #[arg(short, long, default_value_t = 32)]
        requests: usize,
    },
}

struct EchoServer;

#[async_trait]
impl ServerProcessor for EchoServer {
    async fn on_session_connect(
        &self,
        session: Arc<Session>,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        tracing::info!(session_id = %session.id(), peer = %session.remote_addr(), "Session opened");
        Ok(())
    }

    async fn on_session_disconnect(&self, session_id: uuid::Uuid) -> Result<(), ProcessorError> {
        tracing::info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    async fn on_received_message(
        &self,
        session: &Arc<Session>,
        message: Message,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        tracing::debug!(
            session_id = %session.id(),
            correlation_id = %message.id,
            bytes = message.payload.len(),
            "Message received"
        );
        if message.expects_reply() {
            session.reply(message.id, message.payload).await?;
        }
        Ok(())
    }

    fn message_size(&self, _session: &Session, buffer: &[u8]) -> Option<usize> {
        Some(buffer.len())
    }
}

struct LoggingClient;

#[async_trait]
impl ClientProcessor for LoggingClient {
    async fn on_disconnected(&self) -> Result<(), ProcessorError> {
        tracing::info!("Disconnected from server");
        Ok(())
    }

    async fn on_received_message(
        &self,
        _client: &Arc<Client>,
        message: Message,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        tracing::info!(bytes = message.payload.len(), "Unsolicited message");
        Ok(())
    }

    fn message_size(&self, _client: &Client, buffer: &[u8]) -> Option<usize> {
        Some(buffer.len())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("netpipe=info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config, endpoint } => {
            let options = match config {
                Some(path) => load_server_options(&path)?,
                None => ServerBuilder::new("netpipe-demo-server")
                    .endpoint(endpoint)
                    .duplex(true, Duration::from_secs(5))
                    .no_delay(true)
                    .receive_buffer_size(1 << 20)
                    .send_buffer_size(1 << 20)
                    .build(),
            };

            let shutdown = Shutdown::new();
            let server = Server::bind(options, Arc::new(EchoServer)).await?;
            tracing::info!(address = %server.local_addr(), "Demo server ready");

            let accept = server.listen(shutdown.subscribe())?;
            signals::trigger_on_signal(&shutdown).await;
            accept.await?;
        }
        Commands::Client {
            config,
            endpoint,
            requests,
        } => {
            let options = match config {
                Some(path) => load_client_options(&path)?,
                None => ClientBuilder::new("netpipe-demo-client")
                    .endpoint(endpoint)
                    .duplex(true, Duration::from_secs(5))
                    .no_delay(true)
                    .receive_buffer_size(1 << 20)
                    .send_buffer_size(1 << 20)
                    .build(),
            };

            let client = Client::connect(options, Arc::new(LoggingClient)).await?;
            let started = Instant::now();

            let mut inflight = tokio::task::JoinSet::new();
            for i in 0..requests {
                let client = client.clone();
                inflight.spawn(async move {
                    let payload = Bytes::from(format!("request {i}"));
                    client.request(payload).await
                });
            }

            let mut ok = 0usize;
            while let Some(joined) = inflight.join_next().await {
                match joined? {
                    Ok(reply) => {
                        ok += 1;
                        tracing::debug!(bytes = reply.len(), "Reply received");
                    }
                    Err(e) => tracing::warn!(error = %e, "Request failed"),
                }
            }

            tracing::info!(
                ok,
                total = requests,
                elapsed = ?started.elapsed(),
                "Requests finished"
            );

            client.disconnect();
            client.closed().await;
        }
    }

    Ok(())
}
