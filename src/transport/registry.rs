//! Single-conversation connection registry.
//!
//! Tracks which conversation a client is attached to and the engine that
//! backs it. At most one conversation is active per client.
//!
//! # States
//!
//! ```text
//!                connect(id, is_room)
//! Disconnected ───────────────────────► DirectMessage | GroupChat
//!      ▲                                          │
//!      └──────────────── disconnect() ────────────┘
//! ```
//!
//! The slot is reserved before the asynchronous handshake starts, so a second
//! `connect` racing the first fails instead of opening another socket.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::ConnectionKind;

use super::CorrelationEngine;

// ============================================================================
// Slot
// ============================================================================

#[derive(Default)]
struct Slot {
    kind: ConnectionKind,
    target: Option<String>,
    /// `None` while the handshake is in flight.
    engine: Option<CorrelationEngine>,
    /// Bumped on every transition; stale reservations compare against it.
    generation: u64,
}

impl Slot {
    fn describe(&self) -> String {
        match &self.target {
            Some(target) => format!("{} {target}", self.kind),
            None => self.kind.to_string(),
        }
    }

    fn reset(&mut self) -> Option<CorrelationEngine> {
        self.kind = ConnectionKind::Disconnected;
        self.target = None;
        self.generation += 1;
        self.engine.take()
    }

    /// Drops an attachment whose transport has already ended.
    fn prune(&mut self) {
        if self.engine.as_ref().is_some_and(CorrelationEngine::is_closed) {
            debug!(conversation = %self.describe(), "Pruning closed connection");
            self.reset();
        }
    }
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Enforces one active conversation per client.
#[derive(Default)]
pub struct ConnectionRegistry {
    slot: Mutex<Slot>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("ConnectionRegistry")
            .field("kind", &slot.kind)
            .field("target", &slot.target)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Creates a disconnected registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        let mut slot = self.slot.lock();
        slot.prune();
        slot.kind
    }

    /// Returns the id of the attached conversation.
    #[must_use]
    pub fn target(&self) -> Option<String> {
        let mut slot = self.slot.lock();
        slot.prune();
        slot.target.clone()
    }

    /// Returns the engine of the attached conversation.
    #[must_use]
    pub fn engine(&self) -> Option<CorrelationEngine> {
        let mut slot = self.slot.lock();
        slot.prune();
        slot.engine.clone()
    }

    /// Attaches a conversation.
    ///
    /// `open` receives the new kind and must produce the engine; the slot is
    /// held while it runs and released again if it fails.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] naming the held conversation
    /// - any error returned by `open`
    pub async fn connect<F, Fut>(
        &self,
        target: impl Into<String>,
        is_room: bool,
        open: F,
    ) -> Result<CorrelationEngine>
    where
        F: FnOnce(ConnectionKind) -> Fut,
        Fut: Future<Output = Result<CorrelationEngine>>,
    {
        let kind = if is_room {
            ConnectionKind::GroupChat
        } else {
            ConnectionKind::DirectMessage
        };
        let target = target.into();

        let reservation = self.reserve(kind, &target)?;
        let engine = open(kind).await?;
        reservation.commit(engine.clone())?;

        info!(%kind, %target, "Conversation attached");
        Ok(engine)
    }

    /// Detaches the current conversation and closes its transport.
    ///
    /// Returns `false` if nothing was attached.
    pub fn disconnect(&self) -> bool {
        let (description, engine) = {
            let mut slot = self.slot.lock();
            if !slot.kind.is_active() {
                return false;
            }
            (slot.describe(), slot.reset())
        };

        if let Some(engine) = engine {
            engine.close();
        }

        info!(conversation = %description, "Conversation detached");
        true
    }

    fn reserve(&self, kind: ConnectionKind, target: &str) -> Result<Reservation<'_>> {
        let mut slot = self.slot.lock();
        slot.prune();

        if slot.kind.is_active() {
            return Err(Error::already_connected(slot.describe()));
        }

        slot.kind = kind;
        slot.target = Some(target.to_string());
        slot.generation += 1;

        debug!(%kind, target, "Connection slot reserved");

        Ok(Reservation {
            registry: self,
            generation: slot.generation,
            committed: false,
        })
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Holds the slot during the handshake; releases it unless committed.
struct Reservation<'a> {
    registry: &'a ConnectionRegistry,
    generation: u64,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, engine: CorrelationEngine) -> Result<()> {
        let mut slot = self.registry.slot.lock();

        // A disconnect() during the handshake invalidates the reservation.
        if slot.generation != self.generation {
            engine.close();
            return Err(Error::ConnectionClosed);
        }

        slot.engine = Some(engine);
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let mut slot = self.registry.slot.lock();
        if slot.generation == self.generation {
            debug!(conversation = %slot.describe(), "Connection slot released");
            slot.reset();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tokio::sync::oneshot;

    use crate::transport::test_support::duplex_pair;

    async fn engine_for(kind: ConnectionKind) -> CorrelationEngine {
        let (transport, server) = duplex_pair().await;
        // Keep the server half alive for the test's duration.
        std::mem::forget(server);
        CorrelationEngine::new(transport, kind).expect("engine")
    }

    #[tokio::test]
    async fn test_connect_direct_message() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.kind(), ConnectionKind::Disconnected);

        let engine = registry
            .connect("chat-1", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect("connect");

        assert_eq!(engine.kind(), ConnectionKind::DirectMessage);
        assert_eq!(registry.kind(), ConnectionKind::DirectMessage);
        assert_eq!(registry.target().as_deref(), Some("chat-1"));
        assert!(registry.engine().is_some());
    }

    #[tokio::test]
    async fn test_second_connect_names_current_conversation() {
        let registry = ConnectionRegistry::new();
        registry
            .connect("room-9", true, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect("connect");

        let err = registry
            .connect("chat-2", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect_err("already connected");

        assert!(matches!(err, Error::AlreadyConnected { .. }));
        assert!(err.to_string().contains("group chat room-9"));
        assert_eq!(registry.kind(), ConnectionKind::GroupChat);
    }

    #[tokio::test]
    async fn test_disconnect_closes_engine() {
        let registry = ConnectionRegistry::new();
        let engine = registry
            .connect("chat-1", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect("connect");

        assert!(registry.disconnect());
        assert!(engine.is_closed());
        assert_eq!(registry.kind(), ConnectionKind::Disconnected);
        assert!(!registry.disconnect());

        registry
            .connect("chat-2", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect("reconnect after disconnect");
    }

    #[tokio::test]
    async fn test_failed_open_releases_slot() {
        let registry = ConnectionRegistry::new();
        let result = registry
            .connect("chat-1", false, |_| async { Err(Error::connection("refused")) })
            .await;

        assert!(matches!(result, Err(Error::Connection { .. })));
        assert_eq!(registry.kind(), ConnectionKind::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_during_handshake_is_rejected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let first = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move {
                registry
                    .connect("chat-1", false, |kind| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(engine_for(kind).await)
                    })
                    .await
            }
        });

        started_rx.await.expect("handshake started");
        assert_eq!(registry.kind(), ConnectionKind::DirectMessage);

        let err = registry
            .connect("chat-2", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect_err("slot is reserved");
        assert!(matches!(err, Error::AlreadyConnected { .. }));

        release_tx.send(()).expect("release");
        first.await.expect("join").expect("first connect");
        assert_eq!(registry.target().as_deref(), Some("chat-1"));
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_discards_engine() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let first = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move {
                registry
                    .connect("chat-1", false, |kind| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(engine_for(kind).await)
                    })
                    .await
            }
        });

        started_rx.await.expect("handshake started");
        assert!(registry.disconnect());
        release_tx.send(()).expect("release");

        assert!(matches!(
            first.await.expect("join"),
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(registry.kind(), ConnectionKind::Disconnected);
    }

    #[tokio::test]
    async fn test_closed_transport_counts_as_disconnected() {
        let registry = ConnectionRegistry::new();
        let engine = registry
            .connect("chat-1", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect("connect");

        engine.close();

        assert_eq!(registry.kind(), ConnectionKind::Disconnected);
        registry
            .connect("chat-2", false, |kind| async move { Ok(engine_for(kind).await) })
            .await
            .expect("closed slot is free");
    }
}
