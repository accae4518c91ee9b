//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! every field has a default, so a minimal file only names what it changes.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options shared by every connection, client or server side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Server: bind address. Client: remote address to connect to.
    pub endpoint: SocketAddr,

    /// Disable Nagle's algorithm on the socket.
    pub no_delay: bool,

    /// Largest message (or duplex frame) the receive side can hold.
    pub recv_buffer_size: usize,

    /// Largest message (or duplex frame) the send side can hold.
    pub send_buffer_size: usize,

    /// Frame every message with a length and correlation id.
    pub duplex: bool,

    /// How long a request waits for its reply, in milliseconds.
    pub duplex_timeout_ms: u64,

    /// Hand the application an owned copy of each payload instead of a
    /// view into the receive buffer.
    pub copy_buffer: bool,

    /// Per read/write socket timeout in milliseconds (0 disables it).
    pub socket_timeout_ms: u64,

    /// Tear the connection down when a request times out.
    pub disconnect_on_timeout: bool,
}

impl ConnectionOptions {
    pub fn duplex_timeout(&self) -> Duration {
        Duration::from_millis(self.duplex_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        match self.socket_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::from(([0, 0, 0, 0], 0)),
            no_delay: false,
            recv_buffer_size: 1024,
            send_buffer_size: 1024,
            duplex: false,
            duplex_timeout_ms: 5000,
            copy_buffer: true,
            socket_timeout_ms: 0,
            disconnect_on_timeout: true,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Display name used in log records.
    pub name: String,

    #[serde(flatten)]
    pub connection: ConnectionOptions,

    /// Expect a PROXY protocol v2 header in front of every accepted stream.
    pub use_proxy: bool,

    /// Listen backlog.
    pub backlog: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "netpipe-server".to_string(),
            connection: ConnectionOptions::default(),
            use_proxy: false,
            backlog: 100,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Display name used in log records.
    pub name: String,

    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: "netpipe-client".to_string(),
            connection: ConnectionOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_server_file_uses_defaults() {
        let options: ServerOptions = toml::from_str(
            r#"
            endpoint = "127.0.0.1:38101"
            duplex = true
            "#,
        )
        .unwrap();

        assert_eq!(options.connection.endpoint, "127.0.0.1:38101".parse().unwrap());
        assert!(options.connection.duplex);
        assert_eq!(options.connection.recv_buffer_size, 1024);
        assert_eq!(options.connection.duplex_timeout(), Duration::from_secs(5));
        assert_eq!(options.connection.socket_timeout(), None);
        assert_eq!(options.backlog, 100);
        assert!(!options.use_proxy);
    }

    #[test]
    fn socket_timeout_zero_means_disabled() {
        let mut options = ConnectionOptions::default();
        assert!(options.socket_timeout().is_none());
        options.socket_timeout_ms = 250;
        assert_eq!(options.socket_timeout(), Some(Duration::from_millis(250)));
    }
}
