//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, backlog, socket buffers)
//!     → proxy_protocol.rs (optional PROXY v2 header)
//!     → connection.rs (fill / parse / flush loops)
//!         → pipe.rs (bounded byte pipes between the loops)
//!         → framing.rs (duplex and plain frame recognition)
//!         → correlation.rs (request/reply matching)
//!
//! Outgoing TCP connection
//!     → socket.rs (connect, socket options) → connection.rs
//! ```

pub mod connection;
pub(crate) mod correlation;
pub mod framing;
pub mod listener;
pub(crate) mod pipe;
pub mod proxy_protocol;
pub(crate) mod socket;
