//! Chat client coordinator.
//!
//! The [`Client`] holds the configuration and enforces that at most one
//! conversation is attached at a time. Independent clients are independent.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::chat::{Conversation, ConversationCache};
use crate::error::Result;
use crate::identifiers::{ChatId, RoomId};
use crate::protocol::{Author, ConnectionKind};
use crate::transport::{
    ConnectionRegistry, CorrelationEngine, Credentials, FramedTransport, Handshake,
};

use super::builder::{ClientBuilder, ClientConfig};

// ============================================================================
// Types
// ============================================================================

struct ClientInner {
    config: ClientConfig,
    registry: ConnectionRegistry,
    conversation: Mutex<Option<Conversation>>,
}

/// Where and how to open the socket for one conversation.
struct Target<'a> {
    id: String,
    chat_id: ChatId,
    is_room: bool,
    url: &'a str,
    handshake: Option<Handshake>,
}

// ============================================================================
// Client
// ============================================================================

/// Entry point: attaches to one direct message or group chat at a time.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use parley::{Client, HistoryBackend};
/// # async fn example(history: Arc<dyn HistoryBackend>) -> parley::Result<()> {
/// let client = Client::builder()
///     .token("my-api-token")
///     .history_backend(history)
///     .build()?;
///
/// let room = client.connect_room("room-id").await?;
/// room.send_message("hello everyone").await?;
///
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

// ============================================================================
// Client - Display
// ============================================================================

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("user_id", &self.inner.config.user_id)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Public API
// ============================================================================

impl Client {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                registry: ConnectionRegistry::new(),
                conversation: Mutex::new(None),
            }),
        }
    }

    /// Attaches to a direct-message chat.
    ///
    /// Opens a fresh socket on the direct-message endpoint. The user channel
    /// is subscribed only when a user id is configured.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`](crate::Error::AlreadyConnected) if a conversation is attached
    /// - [`Error::Connection`](crate::Error::Connection) or
    ///   [`Error::ConnectionTimeout`](crate::Error::ConnectionTimeout) if the socket fails to open
    pub async fn connect_direct(&self, chat_id: impl Into<ChatId>) -> Result<Conversation> {
        let chat_id = chat_id.into();
        let config = &self.inner.config;
        let handshake = config
            .user_id
            .as_ref()
            .map(|user_id| Handshake::for_user(config.client_name.as_str(), user_id));

        self.attach(Target {
            id: chat_id.to_string(),
            chat_id,
            is_room: false,
            url: &config.dm_url,
            handshake,
        })
        .await
    }

    /// Attaches to a group chat.
    ///
    /// # Errors
    ///
    /// Same as [`connect_direct`](Self::connect_direct).
    pub async fn connect_room(&self, room_id: impl Into<RoomId>) -> Result<Conversation> {
        let room_id = room_id.into();
        let config = &self.inner.config;

        self.attach(Target {
            id: room_id.to_string(),
            chat_id: ChatId::new(room_id.as_str()),
            is_room: true,
            url: &config.room_url,
            handshake: Some(Handshake::for_room(config.client_name.as_str(), &room_id)),
        })
        .await
    }

    /// Detaches the current conversation and closes its socket.
    ///
    /// Returns `false` if nothing was attached.
    pub fn disconnect(&self) -> bool {
        self.inner.conversation.lock().take();
        self.inner.registry.disconnect()
    }

    /// Returns the state of the connection slot.
    #[must_use]
    pub fn connection_kind(&self) -> ConnectionKind {
        self.inner.registry.kind()
    }

    /// Returns the attached conversation.
    #[must_use]
    pub fn conversation(&self) -> Option<Conversation> {
        let mut slot = self.inner.conversation.lock();
        if slot.as_ref().is_some_and(Conversation::is_closed) {
            slot.take();
        }
        slot.clone()
    }
}

// ============================================================================
// Client - Internal
// ============================================================================

impl Client {
    async fn attach(&self, target: Target<'_>) -> Result<Conversation> {
        let config = &self.inner.config;
        let cache = ConversationCache::new(
            target.chat_id.clone(),
            config.max_messages_stored,
            config.eviction_policy,
        )?;

        let credentials = match &config.user_id {
            Some(user_id) => Credentials::new(config.token.as_str()).with_user_id(user_id.clone()),
            None => Credentials::new(config.token.as_str()),
        };
        let url = target.url;
        let handshake = target.handshake;
        let handshake_timeout = config.handshake_timeout;

        let engine = self
            .inner
            .registry
            .connect(target.id, target.is_room, |kind| async move {
                let transport =
                    FramedTransport::connect(url, &credentials, handshake.as_ref(), handshake_timeout)
                        .await?;
                CorrelationEngine::new(transport, kind)
            })
            .await?;

        let author = Author::human(
            config
                .user_id
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default(),
            config.user_name.as_str(),
        );

        let conversation = Conversation::new(
            engine,
            cache,
            config.history.clone(),
            author,
            config.request_timeout,
        );
        *self.inner.conversation.lock() = Some(conversation.clone());

        debug!(chat_id = %target.chat_id, kind = %conversation.kind(), "Conversation ready");
        Ok(conversation)
    }
}

// ============================================================================
// Tests
// ============================================================================
