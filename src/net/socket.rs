//! Socket option plumbing shared by the listener and the client.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpSocket, TcpStream};

use crate::config::ConnectionOptions;

/// Create an unbound socket for `addr`'s family with the configured OS buffer sizes.
pub(crate) fn new_socket(addr: SocketAddr, options: &ConnectionOptions) -> io::Result<TcpSocket> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };

    // Validation caps both sizes at i32::MAX.
    if let Err(e) = socket.set_recv_buffer_size(clamp_u32(options.recv_buffer_size)) {
        tracing::warn!(error = %e, "Could not set socket receive buffer size");
    }
    if let Err(e) = socket.set_send_buffer_size(clamp_u32(options.send_buffer_size)) {
        tracing::warn!(error = %e, "Could not set socket send buffer size");
    }

    Ok(socket)
}

/// Per-stream options applied after accept or connect.
pub(crate) fn configure_stream(stream: &TcpStream, options: &ConnectionOptions) -> io::Result<()> {
    stream.set_nodelay(options.no_delay)
}

/// Connect to `options.endpoint`, honouring the socket timeout.
pub(crate) async fn connect(options: &ConnectionOptions) -> io::Result<TcpStream> {
    let socket = new_socket(options.endpoint, options)?;
    let connecting = socket.connect(options.endpoint);

    let stream = match options.socket_timeout() {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
        None => connecting.await?,
    };

    configure_stream(&stream, options)?;
    Ok(stream)
}

fn clamp_u32(size: usize) -> u32 {
    u32::try_from(size).unwrap_or(u32::MAX)
}
