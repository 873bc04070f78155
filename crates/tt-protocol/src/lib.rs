//! tt-protocol: Wire protocol for tailterm browser sessions
//!
//! Every WebSocket frame exchanged with the browser is a single JSON
//! [`Envelope`] carrying a [`MessageType`] and a string payload. The payload
//! grammar depends on the type; typed parsers for the structured payloads
//! live in [`payload`].

pub mod error;
pub mod message;
pub mod output;
pub mod payload;

pub use error::ProtocolError;
pub use message::{Envelope, MessageType};
pub use output::OutputDecoder;
pub use payload::{PeerConnInfo, SshSessionConfig, TerminalSize, TrustDecision};
