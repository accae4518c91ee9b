//! Client subsystem.
//!
//! # Data Flow
//! ```text
//! Client::connect (validate options, dial endpoint)
//!     → on_connected (spawned) ‖ connection loops (spawned)
//!     → loops end → on_disconnected → closed
//! ```

mod connector;

pub use connector::Client;
