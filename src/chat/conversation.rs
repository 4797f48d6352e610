//! One attached conversation.
//!
//! A [`Conversation`] binds a chat or room id to its correlation engine, its
//! turn cache and the history backend.
//!
//! # Example
//!
//! ```no_run
//! # use parley::Client;
//! # async fn example(client: Client) -> parley::Result<()> {
//! let conversation = client.connect_direct("chat-id").await?;
//!
//! conversation.refresh().await?;
//! let reply = conversation.send_message("Hello!").await?;
//! println!("{}", reply.content());
//!
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::{CandidateId, CharacterId, ChatId, TurnId};
use crate::protocol::{Author, ChatCommand, CommandEnvelope, ConnectionKind, Frame, Turn, TurnKey};
use crate::transport::{Correlated, CorrelationEngine, CorrelationRequest};

use super::cache::ConversationCache;
use super::history::HistoryBackend;

// ============================================================================
// Constants
// ============================================================================

/// First RPC id after the handshake, which uses id 1.
const FIRST_RPC_ID: u32 = 2;

// ============================================================================
// Types
// ============================================================================

/// Target of [`Conversation::bulk_delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkDelete {
    /// The oldest `n` cached turns.
    Count(usize),
    /// These turns, verbatim.
    Ids(Vec<TurnId>),
}

/// Unfreezes the cache if a refresh is dropped or fails midway.
struct RefreshGuard<'a> {
    cache: &'a Mutex<ConversationCache>,
    armed: bool,
}

impl RefreshGuard<'_> {
    fn finish(mut self, history: Vec<Turn>, pinned: &FxHashSet<TurnId>) {
        self.armed = false;
        self.cache.lock().finish_refresh(history, pinned);
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut cache = self.cache.lock();
            debug!(chat_id = %cache.chat_id(), "Refresh abandoned, unfreezing cache");
            cache.abort_refresh();
        }
    }
}

/// Internal shared state for a conversation.
struct ConversationInner {
    chat_id: ChatId,
    engine: CorrelationEngine,
    cache: Mutex<ConversationCache>,
    history: Arc<dyn HistoryBackend>,
    author: Author,
    character_id: Mutex<Option<CharacterId>>,
    request_timeout: Option<Duration>,
    next_rpc_id: AtomicU32,
}

// ============================================================================
// Conversation
// ============================================================================

/// Handle to an attached chat or room.
///
/// Cloning is cheap; clones share the cache and the connection.
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("chat_id", &self.inner.chat_id)
            .field("kind", &self.inner.engine.kind())
            .field("cached", &self.inner.cache.lock().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Conversation - Constructor
// ============================================================================

impl Conversation {
    pub(crate) fn new(
        engine: CorrelationEngine,
        cache: ConversationCache,
        history: Arc<dyn HistoryBackend>,
        author: Author,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(ConversationInner {
                chat_id: cache.chat_id().clone(),
                engine,
                cache: Mutex::new(cache),
                history,
                author,
                character_id: Mutex::new(None),
                request_timeout,
                next_rpc_id: AtomicU32::new(FIRST_RPC_ID),
            }),
        }
    }
}

// ============================================================================
// Conversation - Accessors
// ============================================================================

impl Conversation {
    /// Returns the chat id. For rooms this is the room id.
    #[inline]
    #[must_use]
    pub fn chat_id(&self) -> &ChatId {
        &self.inner.chat_id
    }

    /// Returns the connection kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.inner.engine.kind()
    }

    /// Returns the character replying in a direct message.
    #[must_use]
    pub fn character_id(&self) -> Option<CharacterId> {
        self.inner.character_id.lock().clone()
    }

    /// Sets the character replying in a direct message.
    pub fn set_character_id(&self, character_id: CharacterId) {
        *self.inner.character_id.lock() = Some(character_id);
    }

    /// Returns the cached turns, most recent first.
    #[must_use]
    pub fn messages(&self) -> Vec<Turn> {
        self.inner.cache.lock().snapshot()
    }

    /// Returns a cached turn.
    #[must_use]
    pub fn turn(&self, turn_id: &TurnId) -> Option<Turn> {
        self.inner.cache.lock().get(turn_id).cloned()
    }

    /// Returns the cache capacity.
    #[must_use]
    pub fn max_messages_stored(&self) -> usize {
        self.inner.cache.lock().capacity()
    }

    /// Returns `true` while a refresh is running.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.cache.lock().is_frozen()
    }

    /// Returns `true` once the connection has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.engine.is_closed()
    }

    /// Returns the number of requests waiting for a reply.
    #[inline]
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.engine.pending_count()
    }
}

// ============================================================================
// Conversation - Messaging
// ============================================================================

impl Conversation {
    /// Sends a message and waits for the character's final reply.
    ///
    /// The user's turn and the reply are added to the cache.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the service rejects the message
    /// - [`Error::ConnectionClosed`] if the connection closes first
    /// - [`Error::RequestTimeout`] if a request timeout is configured and hit
    pub async fn send_message(&self, text: impl Into<String>) -> Result<Turn> {
        let command = ChatCommand::create_turn(
            self.kind(),
            &self.inner.chat_id,
            self.character_id(),
            self.inner.author.clone(),
            text,
        );
        let echo = command.echo_turn();

        let chat_id = self.inner.chat_id.clone();
        let request = CorrelationRequest::new(self.encode(command)?)
            .await_response(true)
            .fail_on_remote_error(true)
            .matching(move |turn| turn.chat_id() == &chat_id && !turn.is_human());

        let reply = self
            .correlate(request)
            .await?
            .into_turn()
            .ok_or_else(|| Error::protocol("reply stream ended without a turn"))?;

        {
            let mut cache = self.inner.cache.lock();
            if let Some(echo) = echo {
                cache.add_turn(echo);
            }
            cache.add_turn(reply.clone());
        }

        debug!(chat_id = %self.inner.chat_id, turn_id = %reply.id(), "Reply received");
        Ok(reply)
    }

    /// Asks the character for another candidate of `turn_id`.
    ///
    /// Returns the turn with the new candidate, which also replaces the
    /// cached copy.
    ///
    /// # Errors
    ///
    /// Same as [`send_message`](Self::send_message).
    pub async fn regenerate(&self, turn_id: &TurnId) -> Result<Turn> {
        let key = TurnKey::new(self.inner.chat_id.clone(), turn_id.clone());
        let command = ChatCommand::regenerate(key, self.character_id());

        let target = turn_id.clone();
        let request = CorrelationRequest::new(self.encode(command)?)
            .await_response(true)
            .fail_on_remote_error(true)
            .matching(move |turn| turn.id() == &target && !turn.is_human());

        let turn = self
            .correlate(request)
            .await?
            .into_turn()
            .ok_or_else(|| Error::protocol("regeneration ended without a turn"))?;

        self.inner.cache.lock().add_turn(turn.clone());
        Ok(turn)
    }

    /// Makes `candidate_id` the primary candidate of a cached turn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the turn is not cached or has no
    /// such candidate.
    pub fn switch_primary(&self, turn_id: &TurnId, candidate_id: &CandidateId) -> Result<()> {
        let mut cache = self.inner.cache.lock();
        let turn = cache
            .get_mut(turn_id)
            .ok_or_else(|| Error::invalid_argument(format!("turn {turn_id} is not cached")))?;
        turn.set_primary(candidate_id)
    }

    fn encode(&self, command: ChatCommand) -> Result<Frame> {
        let rpc_id = self.inner.next_rpc_id.fetch_add(1, Ordering::Relaxed);
        CommandEnvelope::new(command).into_frame(self.kind(), rpc_id)
    }

    async fn correlate(&self, request: CorrelationRequest) -> Result<Correlated> {
        match self.inner.request_timeout {
            Some(deadline) => {
                self.inner
                    .engine
                    .send_and_correlate_timeout(request, deadline)
                    .await
            }
            None => self.inner.engine.send_and_correlate(request).await,
        }
    }
}

// ============================================================================
// Conversation - History
// ============================================================================

impl Conversation {
    /// Reloads the cache from history.
    ///
    /// Returns `false` without touching the cache if a refresh is already
    /// running. Live turns arriving meanwhile are replayed afterwards.
    ///
    /// # Errors
    ///
    /// Propagates history backend errors; the cache is left empty but
    /// unfrozen.
    pub async fn refresh(&self) -> Result<bool> {
        let capacity = {
            let mut cache = self.inner.cache.lock();
            if !cache.begin_refresh() {
                debug!(chat_id = %self.inner.chat_id, "Refresh already running");
                return Ok(false);
            }
            cache.capacity()
        };

        let guard = RefreshGuard {
            cache: &self.inner.cache,
            armed: true,
        };

        let history = self.fetch_history(capacity).await?;
        let pinned = self.fetch_pinned().await?;

        info!(
            chat_id = %self.inner.chat_id,
            turns = history.len(),
            pinned = pinned.len(),
            "Conversation refreshed"
        );

        guard.finish(history, &pinned);
        Ok(true)
    }

    async fn fetch_history(&self, capacity: usize) -> Result<Vec<Turn>> {
        let mut turns = Vec::with_capacity(capacity);
        let mut token: Option<String> = None;

        loop {
            let batch = self
                .inner
                .history
                .fetch_batch(&self.inner.chat_id, token.as_deref(), false)
                .await?;
            if batch.is_empty() {
                break;
            }

            token = batch.next_token().map(str::to_owned);
            turns.extend(batch.turns);

            if turns.len() >= capacity || token.is_none() {
                break;
            }
        }

        turns.truncate(capacity);
        Ok(turns)
    }

    async fn fetch_pinned(&self) -> Result<FxHashSet<TurnId>> {
        let mut pinned = FxHashSet::default();
        let mut token: Option<String> = None;

        loop {
            let batch = self
                .inner
                .history
                .fetch_batch(&self.inner.chat_id, token.as_deref(), true)
                .await?;
            if batch.is_empty() {
                break;
            }

            token = batch.next_token().map(str::to_owned);
            pinned.extend(batch.turns.iter().map(|turn| turn.id().clone()));

            if token.is_none() {
                break;
            }
        }

        Ok(pinned)
    }

    /// Deletes turns remotely, then drops them from the cache.
    ///
    /// Returns how many were cached. If a refresh started while the remote
    /// delete was in flight, the removal is applied once the refresh ends and
    /// this returns 0.
    ///
    /// # Errors
    ///
    /// - [`Error::CacheFrozen`] while a refresh is running
    /// - any history backend error; the cache is then left untouched
    pub async fn delete_turns(&self, turn_ids: &[TurnId]) -> Result<usize> {
        self.inner.cache.lock().ensure_not_frozen()?;

        if turn_ids.is_empty() {
            return Ok(0);
        }

        self.inner
            .history
            .delete_turns(&self.inner.chat_id, turn_ids)
            .await?;

        let removed = self.inner.cache.lock().remove_ids(turn_ids);
        debug!(chat_id = %self.inner.chat_id, requested = turn_ids.len(), removed, "Turns deleted");
        Ok(removed)
    }

    /// Deletes the oldest cached turns or an explicit id list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] unless a count is in
    /// `(0, capacity)`, plus every error of [`delete_turns`](Self::delete_turns).
    pub async fn bulk_delete(&self, target: BulkDelete) -> Result<usize> {
        let ids = match target {
            BulkDelete::Count(count) => {
                let cache = self.inner.cache.lock();
                cache.ensure_not_frozen()?;
                if count == 0 || count >= cache.capacity() {
                    return Err(Error::invalid_argument(format!(
                        "bulk delete count {count} must be between 1 and {}",
                        cache.capacity() - 1
                    )));
                }
                cache.oldest_ids(count)
            }
            BulkDelete::Ids(ids) => ids,
        };

        self.delete_turns(&ids).await
    }

    /// Changes the cache capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] unless `capacity` is a positive
    /// multiple of 50.
    pub fn set_max_messages_stored(&self, capacity: usize) -> Result<()> {
        self.inner.cache.lock().set_capacity(capacity)
    }

    /// Closes the connection, failing every pending request.
    pub fn close(&self) {
        info!(chat_id = %self.inner.chat_id, "Closing conversation");
        self.inner.engine.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use futures_util::SinkExt;
    use tokio::io::DuplexStream;
    use tokio::sync::Notify;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;

    use crate::chat::cache::EvictionPolicy;
    use crate::chat::history::TurnBatch;
    use crate::transport::test_support::{duplex_pair, next_text, turn_frame, turn_json};

    const DM: ConnectionKind = ConnectionKind::DirectMessage;

    // ------------------------------------------------------------------------
    // Fake history backend
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeHistory {
        pages: Vec<TurnBatch>,
        pinned: Vec<Turn>,
        gate: Option<Arc<Notify>>,
        delete_gate: Option<Arc<Notify>>,
        delete_calls: AtomicUsize,
        fail_delete: bool,
        fetches: AtomicUsize,
        deleted: Mutex<Vec<TurnId>>,
    }

    #[async_trait]
    impl HistoryBackend for FakeHistory {
        async fn fetch_batch(
            &self,
            _chat_id: &ChatId,
            token: Option<&str>,
            pinned_only: bool,
        ) -> Result<TurnBatch> {
            if pinned_only {
                return Ok(TurnBatch::new(self.pinned.clone(), None));
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.fetches.fetch_add(1, Ordering::SeqCst);
            let page = token
                .and_then(|t| t.strip_prefix('p'))
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            Ok(self.pages.get(page).cloned().unwrap_or_default())
        }

        async fn delete_turns(&self, _chat_id: &ChatId, turn_ids: &[TurnId]) -> Result<()> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.delete_gate {
                gate.notified().await;
            }
            if self.fail_delete {
                return Err(Error::remote("delete refused"));
            }
            self.deleted.lock().extend_from_slice(turn_ids);
            Ok(())
        }
    }

    fn turn(id: &str) -> Turn {
        serde_json::from_value(turn_json("c1", id, false, id, true)).expect("turn")
    }

    fn page(range: std::ops::RangeInclusive<usize>, next: Option<&str>) -> TurnBatch {
        let turns = range.rev().map(|i| turn(&format!("t{i}"))).collect();
        TurnBatch::new(turns, next.map(str::to_owned))
    }

    async fn conversation_with(
        kind: ConnectionKind,
        history: FakeHistory,
        capacity: usize,
    ) -> (Conversation, Arc<FakeHistory>, WebSocketStream<DuplexStream>) {
        let (transport, server) = duplex_pair().await;
        let engine = CorrelationEngine::new(transport, kind).expect("engine");
        let cache = ConversationCache::new(ChatId::new("c1"), capacity, EvictionPolicy::Pair)
            .expect("cache");
        let history = Arc::new(history);
        let conversation = Conversation::new(
            engine,
            cache,
            history.clone(),
            Author::human("user-1", "me"),
            None,
        );
        (conversation, history, server)
    }

    fn seed(conversation: &Conversation, ids: &[&str]) {
        let mut cache = conversation.inner.cache.lock();
        for id in ids {
            cache.add_turn(turn(id));
        }
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_message_streams_and_caches_reply() {
        let (conversation, _, mut server) = conversation_with(DM, FakeHistory::default(), 100).await;
        conversation.set_character_id(CharacterId::new("char-1"));

        let task = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.send_message("hello").await }
        });

        let sent = next_text(&mut server).await;
        let value: serde_json::Value = serde_json::from_str(&sent).expect("json");
        assert_eq!(value["command"], "create_and_generate_turn");
        assert_eq!(value["payload"]["character_id"], "char-1");
        let human_id = value["payload"]["turn"]["turn_key"]["turn_id"]
            .as_str()
            .expect("turn id")
            .to_string();

        // Human echo is not a reply.
        let echo = turn_frame(DM, "c1", &human_id, true, "hello", true);
        server.send(Message::text(echo.into_string())).await.expect("send");

        let partial = turn_frame(DM, "c1", "r1", false, "Hi", false);
        server.send(Message::text(partial.into_string())).await.expect("send");
        assert_eq!(next_text(&mut server).await, sent, "partial is acknowledged");

        let done = turn_frame(DM, "c1", "r1", false, "Hi there", true);
        server.send(Message::text(done.into_string())).await.expect("send");

        let reply = task.await.expect("join").expect("reply");
        assert_eq!(reply.content(), "Hi there");

        let cached: Vec<String> = conversation.messages().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(cached, vec!["r1".to_string(), human_id]);
        assert_eq!(conversation.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_send_message_surfaces_remote_error() {
        let (conversation, _, mut server) = conversation_with(DM, FakeHistory::default(), 100).await;

        let task = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.send_message("hello").await }
        });

        next_text(&mut server).await;
        server
            .send(Message::text(r#"{"command":"neo_error","comment":"rate limited"}"#))
            .await
            .expect("send");

        let err = task.await.expect("join").expect_err("remote error");
        assert!(matches!(err, Error::Remote { ref message } if message == "rate limited"));
        assert!(conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn test_room_message_is_rpc_wrapped() {
        let (conversation, _, mut server) =
            conversation_with(ConnectionKind::GroupChat, FakeHistory::default(), 100).await;

        let task = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.send_message("hi room").await }
        });

        let sent: serde_json::Value =
            serde_json::from_str(&next_text(&mut server).await).expect("json");
        assert_eq!(sent["id"], FIRST_RPC_ID);
        assert_eq!(sent["rpc"]["data"]["payload"]["chat_type"], "TYPE_MU_ROOM");

        let reply = turn_frame(ConnectionKind::GroupChat, "c1", "r1", false, "welcome", true);
        server.send(Message::text(reply.into_string())).await.expect("send");

        let reply = task.await.expect("join").expect("reply");
        assert_eq!(reply.content(), "welcome");
    }

    #[tokio::test]
    async fn test_regenerate_replaces_cached_turn() {
        let (conversation, _, mut server) = conversation_with(DM, FakeHistory::default(), 100).await;
        seed(&conversation, &["r1"]);

        let task = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.regenerate(&TurnId::new("r1")).await }
        });

        let sent: serde_json::Value =
            serde_json::from_str(&next_text(&mut server).await).expect("json");
        assert_eq!(sent["command"], "generate_turn_candidate");
        assert_eq!(sent["payload"]["turn_key"]["turn_id"], "r1");

        let other = turn_frame(DM, "c1", "r0", false, "unrelated", true);
        server.send(Message::text(other.into_string())).await.expect("send");
        let fresh = turn_frame(DM, "c1", "r1", false, "another take", true);
        server.send(Message::text(fresh.into_string())).await.expect("send");

        let turn = task.await.expect("join").expect("regenerated");
        assert_eq!(turn.content(), "another take");
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(
            conversation.turn(&TurnId::new("r1")).map(|t| t.content().to_string()),
            Some("another take".to_string())
        );
    }

    #[tokio::test]
    async fn test_switch_primary() {
        let (conversation, _, _server) = conversation_with(DM, FakeHistory::default(), 100).await;
        seed(&conversation, &["r1"]);

        let err = conversation
            .switch_primary(&TurnId::new("r1"), &CandidateId::new("missing"))
            .expect_err("unknown candidate");
        assert!(matches!(err, Error::InvalidArgument { .. }));

        conversation
            .switch_primary(&TurnId::new("r1"), &CandidateId::new("r1-c"))
            .expect("known candidate");

        let err = conversation
            .switch_primary(&TurnId::new("nope"), &CandidateId::new("r1-c"))
            .expect_err("unknown turn");
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_close_rejects_pending_message() {
        let (conversation, _, mut server) = conversation_with(DM, FakeHistory::default(), 100).await;

        let task = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.send_message("hello").await }
        });
        next_text(&mut server).await;

        conversation.close();

        let err = task.await.expect("join").expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(conversation.is_closed());
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_pages_until_capacity() {
        let history = FakeHistory {
            pages: vec![
                page(151..=200, Some("p1")),
                page(101..=150, Some("p2")),
                page(51..=100, Some("p3")),
            ],
            pinned: vec![turn("t150")],
            ..FakeHistory::default()
        };
        let (conversation, history, _server) = conversation_with(DM, history, 100).await;

        assert!(conversation.refresh().await.expect("refresh"));

        let turns = conversation.messages();
        assert_eq!(turns.len(), 100);
        assert_eq!(turns[0].id().as_str(), "t200");
        assert_eq!(turns[99].id().as_str(), "t101");
        assert_eq!(history.fetches.load(Ordering::SeqCst), 2);
        assert!(conversation.turn(&TurnId::new("t150")).is_some_and(|t| t.is_pinned));
        assert!(!conversation.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_stops_on_empty_batch() {
        let history = FakeHistory {
            pages: vec![page(1..=10, Some("p1"))],
            ..FakeHistory::default()
        };
        let (conversation, history, _server) = conversation_with(DM, history, 100).await;

        conversation.refresh().await.expect("refresh");

        assert_eq!(conversation.messages().len(), 10);
        assert_eq!(history.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_noop() {
        let gate = Arc::new(Notify::new());
        let history = FakeHistory {
            pages: vec![page(1..=3, None)],
            gate: Some(gate.clone()),
            ..FakeHistory::default()
        };
        let (conversation, _, _server) = conversation_with(DM, history, 100).await;
        seed(&conversation, &["old"]);

        let first = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.refresh().await }
        });
        while !conversation.is_refreshing() {
            tokio::task::yield_now().await;
        }

        assert!(!conversation.refresh().await.expect("second refresh"));
        assert!(conversation.messages().is_empty());

        let err = conversation
            .delete_turns(&[TurnId::new("t1")])
            .await
            .expect_err("frozen");
        assert!(matches!(err, Error::CacheFrozen { .. }));

        gate.notify_one();
        assert!(first.await.expect("join").expect("first refresh"));
        assert_eq!(conversation.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_dropped_refresh_unfreezes() {
        let history = FakeHistory {
            gate: Some(Arc::new(Notify::new())),
            ..FakeHistory::default()
        };
        let (conversation, _, _server) = conversation_with(DM, history, 100).await;

        let task = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.refresh().await }
        });
        while !conversation.is_refreshing() {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());
        assert!(!conversation.is_refreshing());
    }

    #[tokio::test]
    async fn test_delete_requires_remote_ack() {
        let history = FakeHistory {
            fail_delete: true,
            ..FakeHistory::default()
        };
        let (conversation, _, _server) = conversation_with(DM, history, 100).await;
        seed(&conversation, &["t1", "t2"]);

        let err = conversation
            .delete_turns(&[TurnId::new("t1")])
            .await
            .expect_err("refused");

        assert!(matches!(err, Error::Remote { .. }));
        assert_eq!(conversation.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_turns_removes_after_ack() {
        let (conversation, history, _server) = conversation_with(DM, FakeHistory::default(), 100).await;
        seed(&conversation, &["t1", "t2"]);

        let removed = conversation
            .delete_turns(&[TurnId::new("t1")])
            .await
            .expect("delete");

        assert_eq!(removed, 1);
        assert_eq!(history.deleted.lock().as_slice(), &[TurnId::new("t1")]);
        assert!(conversation.turn(&TurnId::new("t1")).is_none());
    }

    #[tokio::test]
    async fn test_delete_racing_refresh_applies_after_refill() {
        let fetch_gate = Arc::new(Notify::new());
        let delete_gate = Arc::new(Notify::new());
        let history = FakeHistory {
            pages: vec![page(1..=2, None)],
            gate: Some(fetch_gate.clone()),
            delete_gate: Some(delete_gate.clone()),
            ..FakeHistory::default()
        };
        let (conversation, history, _server) = conversation_with(DM, history, 100).await;
        seed(&conversation, &["t1", "t2"]);

        let delete = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.delete_turns(&[TurnId::new("t1")]).await }
        });
        while history.delete_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let refresh = tokio::spawn({
            let conversation = conversation.clone();
            async move { conversation.refresh().await }
        });
        while !conversation.is_refreshing() {
            tokio::task::yield_now().await;
        }

        delete_gate.notify_one();
        assert_eq!(delete.await.expect("join").expect("delete"), 0);
        assert!(conversation.is_refreshing());
        assert!(conversation.messages().is_empty());

        // The refill still carries the deleted turn.
        fetch_gate.notify_one();
        assert!(refresh.await.expect("join").expect("refresh"));

        let left: Vec<String> = conversation.messages().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(left, vec!["t2"]);
    }

    #[tokio::test]
    async fn test_bulk_delete_count() {
        let (conversation, history, _server) = conversation_with(DM, FakeHistory::default(), 50).await;
        seed(&conversation, &["t1", "t2", "t3", "t4"]);

        for count in [0, 50, 51] {
            let err = conversation
                .bulk_delete(BulkDelete::Count(count))
                .await
                .expect_err("out of range");
            assert!(matches!(err, Error::InvalidArgument { .. }));
        }

        let removed = conversation
            .bulk_delete(BulkDelete::Count(2))
            .await
            .expect("bulk delete");

        assert_eq!(removed, 2);
        assert_eq!(
            history.deleted.lock().as_slice(),
            &[TurnId::new("t1"), TurnId::new("t2")]
        );
        let left: Vec<String> = conversation.messages().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(left, vec!["t4", "t3"]);
    }

    #[tokio::test]
    async fn test_bulk_delete_ids_verbatim() {
        let (conversation, history, _server) = conversation_with(DM, FakeHistory::default(), 50).await;
        seed(&conversation, &["t1"]);

        let ids = vec![TurnId::new("t1"), TurnId::new("gone")];
        let removed = conversation
            .bulk_delete(BulkDelete::Ids(ids.clone()))
            .await
            .expect("bulk delete");

        assert_eq!(removed, 1);
        assert_eq!(history.deleted.lock().clone(), ids);
    }

    #[tokio::test]
    async fn test_set_max_messages_stored() {
        let (conversation, _, _server) = conversation_with(DM, FakeHistory::default(), 100).await;

        let err = conversation.set_max_messages_stored(75).expect_err("not aligned");
        assert!(matches!(err, Error::InvalidCapacity { capacity: 75 }));
        assert_eq!(conversation.max_messages_stored(), 100);

        conversation.set_max_messages_stored(150).expect("aligned");
        assert_eq!(conversation.max_messages_stored(), 150);
    }
}
