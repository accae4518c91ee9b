//! Fluent builders for server and client options.

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::schema::{ClientOptions, ConnectionOptions, ServerOptions};

/// Setters shared by the server and client builders.
pub trait ConnectionOptionsBuilder: Sized {
    fn connection_mut(&mut self) -> &mut ConnectionOptions;

    fn endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.connection_mut().endpoint = endpoint;
        self
    }

    fn no_delay(mut self, no_delay: bool) -> Self {
        self.connection_mut().no_delay = no_delay;
        self
    }

    /// Enable or disable duplex framing along with its request timeout.
    fn duplex(mut self, duplex: bool, timeout: Duration) -> Self {
        let connection = self.connection_mut();
        connection.duplex = duplex;
        connection.duplex_timeout_ms = millis(timeout);
        self
    }

    fn copy_buffer(mut self, copy_buffer: bool) -> Self {
        self.connection_mut().copy_buffer = copy_buffer;
        self
    }

    fn receive_buffer_size(mut self, size: usize) -> Self {
        self.connection_mut().recv_buffer_size = size;
        self
    }

    fn send_buffer_size(mut self, size: usize) -> Self {
        self.connection_mut().send_buffer_size = size;
        self
    }

    fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.connection_mut().socket_timeout_ms = millis(timeout);
        self
    }

    fn disconnect_on_timeout(mut self, disconnect: bool) -> Self {
        self.connection_mut().disconnect_on_timeout = disconnect;
        self
    }
}

/// Builder for [`ServerOptions`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    options: ServerOptions,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            options: ServerOptions {
                name: name.into(),
                ..ServerOptions::default()
            },
        }
    }

    /// Expect a PROXY protocol v2 header on every accepted stream.
    pub fn use_proxy(mut self, use_proxy: bool) -> Self {
        self.options.use_proxy = use_proxy;
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.options.backlog = backlog;
        self
    }

    pub fn build(self) -> ServerOptions {
        self.options
    }
}

impl ConnectionOptionsBuilder for ServerBuilder {
    fn connection_mut(&mut self) -> &mut ConnectionOptions {
        &mut self.options.connection
    }
}

/// Builder for [`ClientOptions`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    options: ClientOptions,
}

impl ClientBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            options: ClientOptions {
                name: name.into(),
                ..ClientOptions::default()
            },
        }
    }

    pub fn build(self) -> ClientOptions {
        self.options
    }
}

impl ConnectionOptionsBuilder for ClientBuilder {
    fn connection_mut(&mut self) -> &mut ConnectionOptions {
        &mut self.options.connection
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_builder_sets_every_field() {
        let options = ServerBuilder::new("sample")
            .endpoint("127.0.0.1:38101".parse().unwrap())
            .duplex(true, Duration::from_millis(750))
            .copy_buffer(false)
            .no_delay(true)
            .receive_buffer_size(4096)
            .send_buffer_size(2048)
            .socket_timeout(Duration::from_secs(3))
            .disconnect_on_timeout(false)
            .use_proxy(true)
            .backlog(16)
            .build();

        assert_eq!(options.name, "sample");
        assert!(options.connection.duplex);
        assert_eq!(options.connection.duplex_timeout_ms, 750);
        assert!(!options.connection.copy_buffer);
        assert!(options.connection.no_delay);
        assert_eq!(options.connection.recv_buffer_size, 4096);
        assert_eq!(options.connection.send_buffer_size, 2048);
        assert_eq!(options.connection.socket_timeout_ms, 3000);
        assert!(!options.connection.disconnect_on_timeout);
        assert!(options.use_proxy);
        assert_eq!(options.backlog, 16);
    }

    #[test]
    fn client_builder_keeps_defaults() {
        let options = ClientBuilder::new("sample-client")
            .endpoint("127.0.0.1:38101".parse().unwrap())
            .build();

        assert_eq!(options.name, "sample-client");
        assert!(!options.connection.duplex);
        assert!(options.connection.copy_buffer);
        assert!(options.connection.disconnect_on_timeout);
    }

    #[test]
    fn oversized_timeouts_saturate() {
        let options = ClientBuilder::new("sample-client")
            .duplex(true, Duration::MAX)
            .socket_timeout(Duration::MAX)
            .build();

        assert_eq!(options.connection.duplex_timeout_ms, u64::MAX);
        assert_eq!(options.connection.socket_timeout_ms, u64::MAX);
    }
}
