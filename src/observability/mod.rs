//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! connection loops, server accept loop, request path
//!     → tracing events (name, session_id, peer, correlation_id, error)
//!     → metrics.rs (counters and gauges through the `metrics` facade)
//!
//! binaries and tests
//!     → logging.rs (subscriber installation)
//! ```

pub mod logging;
pub mod metrics;
