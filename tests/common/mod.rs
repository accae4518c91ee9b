//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use netpipe::{
    Client, ClientBuilder, ClientOptions, ClientProcessor, ConnectionOptionsBuilder, Message,
    ProcessorError, Server, ServerBuilder, ServerOptions, ServerProcessor, Session, Shutdown,
    ShutdownSignal,
};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Payload that makes [`RecordingServer`] panic inside its message callback.
pub const PANIC_PAYLOAD: &[u8] = b"boom";

#[derive(Debug)]
#[allow(dead_code)]
pub enum ServerEvent {
    Connected(Uuid, SocketAddr),
    Received(Uuid, Message),
    Disconnected(Uuid),
}

/// Records every callback. Requests are echoed back unless `silent`; a
/// request equal to `delayed.0` is answered after `delayed.1` from a
/// spawned task.
pub struct RecordingServer {
    pub events: mpsc::UnboundedSender<ServerEvent>,
    pub silent: bool,
    pub delayed: Option<(Bytes, Duration)>,
    pub plain_size: usize,
}

impl RecordingServer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                silent: false,
                delayed: None,
                plain_size: 4,
            },
            rx,
        )
    }
}

#[async_trait]
impl ServerProcessor for RecordingServer {
    async fn on_session_connect(
        &self,
        session: Arc<Session>,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        let _ = self
            .events
            .send(ServerEvent::Connected(session.id(), session.remote_addr()));
        Ok(())
    }

    async fn on_session_disconnect(&self, session_id: Uuid) -> Result<(), ProcessorError> {
        let _ = self.events.send(ServerEvent::Disconnected(session_id));
        Ok(())
    }

    async fn on_received_message(
        &self,
        session: &Arc<Session>,
        message: Message,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        let _ = self
            .events
            .send(ServerEvent::Received(session.id(), message.clone()));

        if message.payload == PANIC_PAYLOAD {
            panic!("processor blew up");
        }
        if self.silent || !message.expects_reply() {
            return Ok(());
        }

        match &self.delayed {
            Some((trigger, delay)) if message.payload == *trigger => {
                let session = session.clone();
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = session.reply(message.id, message.payload).await;
                });
            }
            _ => session.reply(message.id, message.payload).await?,
        }
        Ok(())
    }

    fn message_size(&self, _session: &Session, buffer: &[u8]) -> Option<usize> {
        (buffer.len() >= self.plain_size).then_some(self.plain_size)
    }
}

/// Records unsolicited messages and the disconnect callback.
pub struct RecordingClient {
    pub messages: mpsc::UnboundedSender<Message>,
    pub disconnected: mpsc::UnboundedSender<()>,
}

#[allow(dead_code)]
pub struct ClientEvents {
    pub messages: mpsc::UnboundedReceiver<Message>,
    pub disconnected: mpsc::UnboundedReceiver<()>,
}

impl RecordingClient {
    pub fn new() -> (Self, ClientEvents) {
        let (messages, messages_rx) = mpsc::unbounded_channel();
        let (disconnected, disconnected_rx) = mpsc::unbounded_channel();
        (
            Self {
                messages,
                disconnected,
            },
            ClientEvents {
                messages: messages_rx,
                disconnected: disconnected_rx,
            },
        )
    }
}

#[async_trait]
impl ClientProcessor for RecordingClient {
    async fn on_disconnected(&self) -> Result<(), ProcessorError> {
        let _ = self.disconnected.send(());
        Ok(())
    }

    async fn on_received_message(
        &self,
        _client: &Arc<Client>,
        message: Message,
        _cancel: ShutdownSignal,
    ) -> Result<(), ProcessorError> {
        let _ = self.messages.send(message);
        Ok(())
    }

    fn message_size(&self, _client: &Client, buffer: &[u8]) -> Option<usize> {
        (buffer.len() >= 4).then_some(4)
    }
}

/// Duplex server options on an ephemeral loopback port.
#[allow(dead_code)]
pub fn duplex_server(timeout: Duration) -> ServerBuilder {
    ServerBuilder::new("test-server")
        .endpoint("127.0.0.1:0".parse().unwrap())
        .duplex(true, timeout)
        .no_delay(true)
}

/// Duplex client options pointed at `server`.
#[allow(dead_code)]
pub fn duplex_client(server: SocketAddr, timeout: Duration) -> ClientBuilder {
    ClientBuilder::new("test-client")
        .endpoint(server)
        .duplex(true, timeout)
        .no_delay(true)
}

/// Bind and start accepting. Triggering the returned [`Shutdown`] stops the server.
pub async fn start_server(
    options: ServerOptions,
    processor: RecordingServer,
) -> (Server, Shutdown, tokio::task::JoinHandle<()>) {
    let server = Server::bind(options, Arc::new(processor)).await.unwrap();
    let shutdown = Shutdown::new();
    let accept = server.listen(shutdown.subscribe()).unwrap();
    (server, shutdown, accept)
}

#[allow(dead_code)]
pub async fn connect(options: ClientOptions) -> (Arc<Client>, ClientEvents) {
    let (processor, events) = RecordingClient::new();
    let client = Client::connect(options, Arc::new(processor)).await.unwrap();
    (client, events)
}

/// Receive the next item or fail the test after [`WAIT`].
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches.
#[allow(dead_code)]
pub async fn next_matching<T, F>(rx: &mut mpsc::UnboundedReceiver<T>, mut matches: F) -> T
where
    F: FnMut(&T) -> bool,
{
    loop {
        let event = next(rx).await;
        if matches(&event) {
            return event;
        }
    }
}
