//! Typed payload grammars carried in envelope `data` strings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// SSH credentials and target parsed from an `ssh-config` payload
///
/// Wire grammar: `username:password:host:port`, exactly four fields.
#[derive(Clone, PartialEq, Eq)]
pub struct SshSessionConfig {
    /// Remote username
    pub username: String,
    /// Password for keyboard/password authentication
    pub password: String,
    /// Target host as typed by the user (mesh DNS name or IP)
    pub host: String,
    /// Target port
    pub port: u16,
}

impl SshSessionConfig {
    /// `host:port` dial address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for SshSessionConfig {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        let [username, password, host, port] = fields.as_slice() else {
            return Err(ProtocolError::SshConfigFields(fields.len()));
        };

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ProtocolError::SshConfigPort(port.to_string()))?;

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

// Keep passwords out of logs
impl fmt::Debug for SshSessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSessionConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Terminal dimensions from a `size` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
    /// Width in pixels, if the browser reported it
    #[serde(default, rename = "x", skip_serializing_if = "Option::is_none")]
    pub pixel_width: Option<u32>,
    /// Height in pixels, if the browser reported it
    #[serde(default, rename = "y", skip_serializing_if = "Option::is_none")]
    pub pixel_height: Option<u32>,
}

impl TerminalSize {
    /// Create a new terminal size without pixel dimensions
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: None,
            pixel_height: None,
        }
    }

    /// Geometry requested for a fresh shell before the browser reports its own (80x40)
    pub fn initial() -> Self {
        Self::new(40, 80)
    }

    /// Parse the JSON payload of a `size` envelope
    pub fn from_payload(data: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(data).map_err(|e| ProtocolError::InvalidSize(e.to_string()))
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::initial()
    }
}

/// Outcome of one interactive host-key prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Record the key and continue the handshake
    Accept,
    /// Abort the handshake
    Reject,
}

impl TrustDecision {
    /// Parse an `ssh-host-action` payload; anything but `yes`/`accept` rejects
    pub fn from_payload(data: &str) -> Self {
        match data.trim().to_ascii_lowercase().as_str() {
            "yes" | "accept" => Self::Accept,
            _ => Self::Reject,
        }
    }
}

/// Connection info for one mesh peer, as shown in the browser's machine picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnInfo {
    /// Full DNS name without the trailing root dot
    pub domain: String,
    /// First DNS label
    pub short_domain: String,
    /// Mesh IP addresses
    pub ips: Vec<String>,
}

impl PeerConnInfo {
    /// Build from a raw DNS name (possibly ending in `.`) and IPs
    pub fn new(dns_name: &str, ips: Vec<String>) -> Self {
        let domain = dns_name.trim_end_matches('.').to_string();
        let short_domain = short_name(&domain).to_string();

        Self {
            domain,
            short_domain,
            ips,
        }
    }
}

/// First DNS label of a name (e.g. "lab-server.tailnet-abc.ts.net" -> "lab-server")
pub fn short_name(dns_name: &str) -> &str {
    dns_name.split('.').next().unwrap_or(dns_name)
}
