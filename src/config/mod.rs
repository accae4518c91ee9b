//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)            builder.rs (fluent, in code)
//!     → loader.rs (parse)              │
//!     → validation.rs (semantic checks) ◀┘
//!     → ServerOptions / ClientOptions (validated, immutable)
//!     → shared via Arc with every connection
//! ```
//!
//! # Design Decisions
//! - Options are immutable once a server binds or a client connects
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod builder;
pub mod loader;
pub mod schema;
pub mod validation;

pub use builder::{ClientBuilder, ConnectionOptionsBuilder, ServerBuilder};
pub use loader::{load_client_options, load_server_options, ConfigError};
pub use schema::{ClientOptions, ConnectionOptions, ServerOptions};
pub use validation::ValidationError;
