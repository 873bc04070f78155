//! Configuration management for tailterm

mod server;
mod tuning;

pub use server::ServerConfig;
pub use tuning::SessionTuning;

use crate::error::ConfigError;
use std::path::PathBuf;

/// Default public bind address
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default Vite dev server URL
pub const DEFAULT_DEV_URL: &str = "http://localhost:5173";

/// Default static frontend directory
pub const DEFAULT_WEB_DIR: &str = "web/dist";

/// Resolve `~/.ssh/known_hosts`
pub fn default_known_hosts_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("known_hosts"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Normalize a bind address, accepting the `:port` shorthand for all interfaces
pub fn normalize_bind_address(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Ok(DEFAULT_BIND_ADDRESS.to_string());
    }

    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    let port_ok = normalized
        .rsplit_once(':')
        .map(|(_, port)| port.parse::<u16>().is_ok())
        .unwrap_or(false);

    if !port_ok {
        return Err(ConfigError::Invalid(format!(
            "bind address {:?} must be host:port or :port",
            addr
        )));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bind_address() {
        assert_eq!(normalize_bind_address(":3000").unwrap(), "0.0.0.0:3000");
        assert_eq!(
            normalize_bind_address("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080"
        );
        assert_eq!(normalize_bind_address("").unwrap(), DEFAULT_BIND_ADDRESS);
        assert!(normalize_bind_address("localhost").is_err());
        assert!(normalize_bind_address(":http").is_err());
    }
}
