//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::config::schema::{ClientOptions, ServerOptions};
use crate::config::validation::{validate_client, validate_server, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate server options from a TOML file.
pub fn load_server_options(path: &Path) -> Result<ServerOptions, ConfigError> {
    let options: ServerOptions = read_toml(path)?;
    validate_server(&options).map_err(ConfigError::Validation)?;
    Ok(options)
}

/// Load and validate client options from a TOML file.
pub fn load_client_options(path: &Path) -> Result<ClientOptions, ConfigError> {
    let options: ClientOptions = read_toml(path)?;
    validate_client(&options).map_err(ConfigError::Validation)?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("netpipe-{}-{}.toml", name, std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_client_file() {
        let path = write_temp(
            "client",
            r#"
            name = "sample-client"
            endpoint = "127.0.0.1:38101"
            duplex = true
            recv_buffer_size = 4096
            "#,
        );

        let options = load_client_options(&path).unwrap();
        assert_eq!(options.name, "sample-client");
        assert_eq!(options.connection.recv_buffer_size, 4096);
        assert!(options.connection.duplex);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn rejects_invalid_server_file() {
        let path = write_temp("server-invalid", "backlog = 0\nsend_buffer_size = 0\n");

        match load_server_options(&path) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = load_server_options(Path::new("/nonexistent/netpipe.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
