//! Server configuration

use std::path::PathBuf;

use super::{SessionTuning, DEFAULT_BIND_ADDRESS, DEFAULT_DEV_URL, DEFAULT_WEB_DIR};

/// Configuration for the tailterm server
///
/// Built once at startup from flags and environment, then passed by
/// reference into every component that needs it.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the public HTTP server binds to
    pub bind_address: String,

    /// Control-plane URL for ephemeral mesh peers (vendor default when unset)
    pub control_url: Option<String>,

    /// Path to the OpenSSH known_hosts trust store
    pub known_hosts_path: PathBuf,

    /// Directory holding the built frontend
    pub web_dir: PathBuf,

    /// Development mode: proxy the frontend to the dev server and accept any origin
    pub dev: bool,

    /// Dev server URL used in development mode
    pub dev_url: String,

    /// `tailscaled` binary used for ephemeral peers
    pub tailscaled_bin: PathBuf,

    /// `tailscale` CLI binary used to drive ephemeral peers
    pub tailscale_bin: PathBuf,

    /// Per-session timing and retry limits
    pub tuning: SessionTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            control_url: None,
            known_hosts_path: super::default_known_hosts_path()
                .unwrap_or_else(|_| PathBuf::from(".ssh/known_hosts")),
            web_dir: PathBuf::from(DEFAULT_WEB_DIR),
            dev: false,
            dev_url: DEFAULT_DEV_URL.to_string(),
            tailscaled_bin: PathBuf::from("tailscaled"),
            tailscale_bin: PathBuf::from("tailscale"),
            tuning: SessionTuning::default(),
        }
    }
}
