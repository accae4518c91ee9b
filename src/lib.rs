//! Framed TCP transport with optional request/reply correlation.
//!
//! A [`Server`] accepts sockets and hosts one [`Session`] per connection; a
//! [`Client`] dials a server. Both sides share the same [`Connection`]
//! engine: bytes are pumped through bounded pipes, cut into frames (a
//! self-inclusive length plus correlation id in duplex mode, or
//! processor-sized messages in plain mode) and handed to a processor.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod net;
pub mod observability;
pub mod processor;
pub mod server;

pub use client::Client;
pub use config::{ClientBuilder, ClientOptions, ConnectionOptionsBuilder, ServerBuilder, ServerOptions};
pub use error::{ProcessorError, TransportError, TransportResult};
pub use lifecycle::{Shutdown, ShutdownSignal};
pub use message::Message;
pub use net::connection::{Connection, ConnectionState};
pub use processor::{ClientProcessor, ServerProcessor};
pub use server::{Server, Session};
