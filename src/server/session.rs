//! Server-side session.

use std::net::SocketAddr;
use std::ops::Deref;
use std::time::SystemTime;

use uuid::Uuid;

use crate::net::connection::Connection;
use crate::net::proxy_protocol::ProxyHeader;

/// One accepted connection, registered with its server under a fresh id.
///
/// Derefs to [`Connection`] for `send`, `request`, `reply` and `disconnect`.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    connected_at: SystemTime,
    proxy_header: Option<ProxyHeader>,
    connection: Connection,
}

impl Session {
    pub(crate) fn new(connection: Connection, proxy_header: Option<ProxyHeader>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connected_at: SystemTime::now(),
            proxy_header,
            connection,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Client endpoint; behind a proxy this is the address the header relayed.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// The PROXY header decoded for this session, if any.
    pub fn proxy_header(&self) -> Option<&ProxyHeader> {
        self.proxy_header.as_ref()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Deref for Session {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}
