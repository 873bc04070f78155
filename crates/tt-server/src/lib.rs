//! tt-server: Browser terminals over ephemeral tailnet peers
//!
//! A browser opens a setup socket on `GET /ts`. The server creates a
//! short-lived mesh peer for it, walks the user through login and peer
//! selection, then serves an SSH shell to the browser's second socket on
//! that peer's mesh address.

pub mod bridge;
pub mod dev;
pub mod http;
pub mod session;
pub mod ssh;
pub mod ws;

pub use bridge::{BridgeError, IoBridge, OutputSource, ShellIo, ShellSession};
pub use http::{router, AppState};
pub use session::{SessionError, SessionLifecycle, SessionOrchestrator};
pub use ssh::{RusshDialer, SshDialer, SshError};
pub use ws::{MessageHub, SyncedConnection};
