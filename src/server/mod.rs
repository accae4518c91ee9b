//! Server subsystem.
//!
//! # Data Flow
//! ```text
//! Server::bind (validate options, bind listener)
//!     → listen (spawned accept loop)
//!     → per socket: PROXY decode (optional) → Session registered
//!     → on_session_connect (spawned) ‖ connection loops
//!     → loops end → Session removed → on_session_disconnect
//! ```

mod acceptor;
mod session;

pub use acceptor::Server;
pub use session::Session;
