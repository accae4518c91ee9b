//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Connection (per socket):
//!     Shutdown owned by the connection → ShutdownSignal cloned into
//!     the filler, parser and sender loops and into processor callbacks
//!
//! Server (accept loop):
//!     Caller-owned Shutdown → ShutdownSignal passed to listen()
//!     → accept loop exits → every session is disconnected
//!
//! Binaries:
//!     signals.rs (Ctrl+C / SIGTERM) → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - Built on a watch channel so late subscribers still observe a fired signal
//! - Triggering is idempotent; only the first trigger reports `true`

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
