//! Envelope and message types for the tailterm WebSocket protocol
//!
//! # Message Flow
//!
//! A browser session uses two sockets. On the setup socket:
//!
//! 1. Server sends `info` while the ephemeral mesh peer starts (auth URL, addresses)
//! 2. Server sends `peers` with the current mesh peer snapshot
//! 3. Browser sends `ssh-config`
//! 4. Browser sends `tunnel-opened` once its mesh socket is connected
//!
//! On the mesh socket:
//!
//! 1. Server sends `info` describing the connection
//! 2. Server may send `ssh-host` for an unknown host key, browser answers `ssh-host-action`
//! 3. Server sends `ssh-error` on a failed handshake, browser answers `ssh-config`
//! 4. Server sends `ssh-success`, then terminal I/O flows as `input`/`size`/`output`
//!
//! Any `error`, `ssh-error` or `tunnel-error` envelope received by the server
//! is treated as a failure signal for every pending wait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Human-readable status line
    Info,
    /// JSON array of mesh peers
    Peers,
    /// SSH credentials and target, `username:password:host:port`
    SshConfig,
    /// Unknown host key prompt carrying the hostname
    SshHost,
    /// Browser's answer to an `ssh-host` prompt
    SshHostAction,
    /// SSH connection established
    SshSuccess,
    /// Generic failure
    Error,
    /// SSH handshake or authentication failed
    SshError,
    /// Browser failed to open or lost its mesh socket
    TunnelError,
    /// Browser opened its mesh socket
    TunnelOpened,
    /// Terminal resize, JSON `{"rows":..,"cols":..}`
    Size,
    /// Terminal input from the browser
    Input,
    /// Terminal output to the browser
    Output,
}

impl MessageType {
    /// All message types, in declaration order
    pub const ALL: [MessageType; 13] = [
        Self::Info,
        Self::Peers,
        Self::SshConfig,
        Self::SshHost,
        Self::SshHostAction,
        Self::SshSuccess,
        Self::Error,
        Self::SshError,
        Self::TunnelError,
        Self::TunnelOpened,
        Self::Size,
        Self::Input,
        Self::Output,
    ];

    /// Whether receiving this type signals a failure to every pending waiter
    pub fn is_error_class(&self) -> bool {
        matches!(self, Self::Error | Self::SshError | Self::TunnelError)
    }

    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Peers => "peers",
            Self::SshConfig => "ssh-config",
            Self::SshHost => "ssh-host",
            Self::SshHostAction => "ssh-host-action",
            Self::SshSuccess => "ssh-success",
            Self::Error => "error",
            Self::SshError => "ssh-error",
            Self::TunnelError => "tunnel-error",
            Self::TunnelOpened => "tunnel-opened",
            Self::Size => "size",
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only unit exchanged over the WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Type-dependent payload
    #[serde(default)]
    pub data: String,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(msg_type: MessageType, data: impl Into<String>) -> Self {
        Self {
            msg_type,
            data: data.into(),
        }
    }

    /// Envelope with an empty payload
    pub fn empty(msg_type: MessageType) -> Self {
        Self::new(msg_type, String::new())
    }

    /// `info` envelope
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageType::Info, text)
    }

    /// `error` envelope
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageType::Error, text)
    }


    /// Decode an envelope from a text frame
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the envelope as a text frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Whether this envelope is error-class
    pub fn is_error_class(&self) -> bool {
        self.msg_type.is_error_class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde() {
        for ty in MessageType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn test_decode_input() {
        let env = Envelope::from_json(r#"{"type":"input","data":"ls\n"}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::Input);
        assert_eq!(env.data, "ls\n");
    }

    #[test]
    fn test_decode_missing_data() {
        // The frontend sends tunnel-opened without a payload
        let env = Envelope::from_json(r#"{"type":"tunnel-opened"}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::TunnelOpened);
        assert!(env.data.is_empty());
    }

    #[test]
    fn test_decode_unknown_type_fails() {
        assert!(Envelope::from_json(r#"{"type":"bogus","data":""}"#).is_err());
        assert!(Envelope::from_json("not json").is_err());
    }

    #[test]
    fn test_error_class() {
        let errors: Vec<_> = MessageType::ALL
            .iter()
            .filter(|t| t.is_error_class())
            .copied()
            .collect();
        assert_eq!(
            errors,
            vec![
                MessageType::Error,
                MessageType::SshError,
                MessageType::TunnelError
            ]
        );
    }

    #[test]
    fn test_encode() {
        let json = Envelope::new(MessageType::SshHost, "box:22").to_json().unwrap();
        assert_eq!(json, r#"{"type":"ssh-host","data":"box:22"}"#);
    }
}
