//! Typed message dispatch over one connection
//!
//! A single read loop decodes every inbound envelope and hands it to the
//! waiters registered for its type. Error-class envelopes (`error`,
//! `ssh-error`, `tunnel-error`) go to every waiter of every type. Waiters
//! come in two shapes:
//!
//! - one-shot slots from [`MessageHub::await_msg`], removed on first outcome
//! - streaming slots from [`MessageHub::subscribe`], which see every matching
//!   envelope in decode order
//!
//! When the read loop ends, every slot still registered resolves with
//! [`HubError::Closed`] and later registrations fail immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tt_protocol::{Envelope, MessageType};

use super::synced::SyncedConnection;
use super::HubError;

type SlotId = u64;
type Outcome = Result<Envelope, HubError>;

enum Slot {
    Once(oneshot::Sender<Outcome>),
    Stream(mpsc::UnboundedSender<Outcome>),
}

#[derive(Default)]
struct RegistryInner {
    next_id: SlotId,
    slots: HashMap<MessageType, Vec<(SlotId, Slot)>>,
    closed: bool,
}

/// Waiting slots keyed by message type
///
/// Exposes only register, unregister, deliver and broadcast. A slot is
/// removed exactly once, so it never sees a second outcome.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn register_once(&self, msg_type: MessageType) -> Result<(SlotId, oneshot::Receiver<Outcome>), HubError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(HubError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .slots
            .entry(msg_type)
            .or_default()
            .push((id, Slot::Once(tx)));

        Ok((id, rx))
    }

    fn register_stream(
        &self,
        types: &[MessageType],
    ) -> Result<(SlotId, mpsc::UnboundedReceiver<Outcome>), HubError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(HubError::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = inner.next_id;
        inner.next_id += 1;
        for msg_type in types {
            inner
                .slots
                .entry(*msg_type)
                .or_default()
                .push((id, Slot::Stream(tx.clone())));
        }

        Ok((id, rx))
    }

    /// Remove a slot under every type it was registered for
    pub fn unregister(&self, id: SlotId) {
        let mut inner = self.inner.lock();
        for slots in inner.slots.values_mut() {
            slots.retain(|(slot_id, _)| *slot_id != id);
        }
        inner.slots.retain(|_, slots| !slots.is_empty());
    }

    /// Hand a non-error envelope to the slots registered for its type
    ///
    /// One-shot slots are consumed; streaming slots stay until their receiver
    /// is dropped. Returns the number of slots that received it.
    pub fn deliver(&self, envelope: &Envelope) -> usize {
        let mut inner = self.inner.lock();
        let Some(slots) = inner.slots.remove(&envelope.msg_type) else {
            return 0;
        };

        let mut delivered = 0;
        let mut keep = Vec::new();
        for (id, slot) in slots {
            match slot {
                Slot::Once(tx) => {
                    if tx.send(Ok(envelope.clone())).is_ok() {
                        delivered += 1;
                    }
                }
                Slot::Stream(tx) => {
                    if tx.send(Ok(envelope.clone())).is_ok() {
                        delivered += 1;
                        keep.push((id, Slot::Stream(tx)));
                    }
                }
            }
        }

        if !keep.is_empty() {
            inner.slots.insert(envelope.msg_type, keep);
        }
        delivered
    }

    /// Resolve every slot of every type with the remote error
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let drained = std::mem::take(&mut self.inner.lock().slots);
        resolve_all(drained, || HubError::Remote {
            msg_type: envelope.msg_type,
            message: envelope.data.clone(),
        })
    }

    /// Resolve every slot with [`HubError::Closed`] and refuse new ones
    pub fn close(&self) {
        let drained = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.slots)
        };
        resolve_all(drained, || HubError::Closed);
    }

    /// Number of slots waiting on `msg_type`
    pub fn pending(&self, msg_type: MessageType) -> usize {
        self.inner
            .lock()
            .slots
            .get(&msg_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether the registry refuses new slots
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Send one error per distinct slot; a stream slot may sit under several types
fn resolve_all(
    slots: HashMap<MessageType, Vec<(SlotId, Slot)>>,
    error: impl Fn() -> HubError,
) -> usize {
    let mut seen = std::collections::HashSet::new();
    let mut resolved = 0;

    for (id, slot) in slots.into_values().flatten() {
        if !seen.insert(id) {
            continue;
        }
        let sent = match slot {
            Slot::Once(tx) => tx.send(Err(error())).is_ok(),
            Slot::Stream(tx) => tx.send(Err(error())).is_ok(),
        };
        if sent {
            resolved += 1;
        }
    }

    resolved
}

/// Typed pub/sub dispatcher over one [`SyncedConnection`]
pub struct MessageHub {
    conn: Arc<SyncedConnection>,
    registry: Arc<ListenerRegistry>,
    done: CancellationToken,
}

impl MessageHub {
    /// Start the read loop for `conn`
    ///
    /// The hub lives until the connection fails or is closed.
    pub fn start(conn: Arc<SyncedConnection>) -> Arc<Self> {
        let hub = Arc::new(Self {
            conn: Arc::clone(&conn),
            registry: Arc::new(ListenerRegistry::new()),
            done: CancellationToken::new(),
        });

        let registry = Arc::clone(&hub.registry);
        let done = hub.done.clone();
        tokio::spawn(async move {
            read_loop(conn, &registry).await;
            registry.close();
            done.cancel();
        });

        hub
    }

    /// Underlying connection
    pub fn connection(&self) -> &Arc<SyncedConnection> {
        &self.conn
    }

    /// Registry of pending waiters
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Write an envelope
    pub async fn send(&self, envelope: &Envelope) -> Result<(), HubError> {
        self.conn.write_json(envelope).await?;
        Ok(())
    }

    /// Wait for the next envelope of `msg_type`
    ///
    /// A zero `timeout` waits indefinitely. Any error-class envelope received
    /// meanwhile fails the wait with [`HubError::Remote`].
    pub async fn await_msg(&self, msg_type: MessageType, timeout: Duration) -> Result<Envelope, HubError> {
        let (id, rx) = self.registry.register_once(msg_type)?;
        // Unregisters on every exit, including the caller dropping this future
        let _slot = SlotGuard {
            registry: &self.registry,
            id,
        };

        if timeout.is_zero() {
            return rx.await.unwrap_or(Err(HubError::Closed));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(HubError::Closed)),
            Err(_) => Err(HubError::Timeout(msg_type)),
        }
    }

    /// Send `envelope`, then wait for a reply of `reply_type`
    ///
    /// The waiter registers only after the write completes, so a reply
    /// arriving in between is dropped.
    pub async fn request(
        &self,
        envelope: &Envelope,
        reply_type: MessageType,
        timeout: Duration,
    ) -> Result<Envelope, HubError> {
        self.send(envelope).await?;
        self.await_msg(reply_type, timeout).await
    }

    /// Receive every envelope of the given types until dropped
    pub fn subscribe(&self, types: &[MessageType]) -> Result<Subscription, HubError> {
        let (id, rx) = self.registry.register_stream(types)?;
        Ok(Subscription {
            id,
            rx,
            registry: Arc::clone(&self.registry),
            finished: false,
        })
    }

    /// Whether the read loop has ended
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the read loop has ended
    pub async fn closed(&self) {
        self.done.cancelled().await
    }
}

struct SlotGuard<'a> {
    registry: &'a ListenerRegistry,
    id: SlotId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

async fn read_loop(conn: Arc<SyncedConnection>, registry: &ListenerRegistry) {
    loop {
        let envelope: Envelope = match conn.read_json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Message hub read loop ended: {}", e);
                return;
            }
        };

        match envelope.msg_type {
            MessageType::Input | MessageType::Output => {
                tracing::trace!("Received {} ({} bytes)", envelope.msg_type, envelope.data.len())
            }
            MessageType::SshConfig => tracing::debug!("Received {}", envelope.msg_type),
            _ => tracing::debug!("Received {}: {:?}", envelope.msg_type, envelope.data),
        }

        if envelope.is_error_class() {
            let resolved = registry.broadcast(&envelope);
            tracing::debug!("{} failed {} waiters", envelope.msg_type, resolved);
        } else if registry.deliver(&envelope) == 0 {
            tracing::trace!("No listener for {}, dropped", envelope.msg_type);
        }
    }
}

/// Long-lived registration for one or more message types
pub struct Subscription {
    id: SlotId,
    rx: mpsc::UnboundedReceiver<Outcome>,
    registry: Arc<ListenerRegistry>,
    finished: bool,
}

impl Subscription {
    /// Next matching envelope
    ///
    /// Yields `Some(Err(_))` once on an error-class envelope or hub closure,
    /// then `None`.
    pub async fn recv(&mut self) -> Option<Result<Envelope, HubError>> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(Ok(envelope)) => Some(Ok(envelope)),
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                Some(Err(HubError::Closed))
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
