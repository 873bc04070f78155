//! Session lifecycle token

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Shared end-of-session signal
///
/// Cloned into every task of a session. Closing it stops the mesh listener,
/// the I/O pumps and the tunnel watcher; closing twice is harmless. The
/// first task to fail it records the reason the session ended.
#[derive(Debug, Clone, Default)]
pub struct SessionLifecycle {
    token: CancellationToken,
    failure: Arc<OnceLock<String>>,
}

impl SessionLifecycle {
    /// Create an open lifecycle
    pub fn new() -> Self {
        Self::default()
    }

    /// End the session
    pub fn close(&self) {
        self.token.cancel();
    }

    /// End the session because of `reason`
    ///
    /// Only the first reason is kept, and only if the session was still open.
    pub fn fail(&self, reason: impl Into<String>) {
        if !self.token.is_cancelled() {
            let _ = self.failure.set(reason.into());
        }
        self.token.cancel();
    }

    /// Why the session ended, if it failed
    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// Whether the session has ended
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the session has ended
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}
