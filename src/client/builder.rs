//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use parley::{Client, HistoryBackend};
//! # fn example(history: Arc<dyn HistoryBackend>) -> parley::Result<()> {
//! let client = Client::builder()
//!     .token("my-api-token")
//!     .user_id("1234")
//!     .history_backend(history)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::chat::{DEFAULT_CAPACITY, EvictionPolicy, HistoryBackend, validate_capacity};
use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::transport::DEFAULT_HANDSHAKE_TIMEOUT;

use super::core::Client;

// ============================================================================
// Constants
// ============================================================================

/// Socket serving direct messages.
pub const DEFAULT_DM_URL: &str = "wss://neo.character.ai/ws/";

/// Socket serving group chats.
pub const DEFAULT_ROOM_URL: &str = "wss://neo.character.ai/connection/websocket";

/// Client name announced in the connect frame.
pub const DEFAULT_CLIENT_NAME: &str = "js";

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated client configuration.
#[derive(Clone)]
pub(crate) struct ClientConfig {
    pub token: String,
    pub user_id: Option<UserId>,
    pub user_name: String,
    pub dm_url: String,
    pub room_url: String,
    pub client_name: String,
    pub max_messages_stored: usize,
    pub eviction_policy: EvictionPolicy,
    pub handshake_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub history: Arc<dyn HistoryBackend>,
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    token: Option<String>,
    user_id: Option<UserId>,
    user_name: Option<String>,
    dm_url: String,
    room_url: String,
    client_name: String,
    max_messages_stored: usize,
    eviction_policy: EvictionPolicy,
    handshake_timeout: Duration,
    request_timeout: Option<Duration>,
    history: Option<Arc<dyn HistoryBackend>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            token: None,
            user_id: None,
            user_name: None,
            dm_url: DEFAULT_DM_URL.to_string(),
            room_url: DEFAULT_ROOM_URL.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            max_messages_stored: DEFAULT_CAPACITY,
            eviction_policy: EvictionPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: None,
            history: None,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .field("dm_url", &self.dm_url)
            .field("room_url", &self.room_url)
            .field("max_messages_stored", &self.max_messages_stored)
            .field("history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default endpoints and no credentials.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API token. Required.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the authenticated user's id.
    ///
    /// Direct-message connections only subscribe to the user channel when
    /// this is set.
    #[inline]
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the display name sent with messages.
    #[inline]
    #[must_use]
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Overrides the direct-message socket URL.
    #[inline]
    #[must_use]
    pub fn dm_url(mut self, url: impl Into<String>) -> Self {
        self.dm_url = url.into();
        self
    }

    /// Overrides the group-chat socket URL.
    #[inline]
    #[must_use]
    pub fn room_url(mut self, url: impl Into<String>) -> Self {
        self.room_url = url.into();
        self
    }

    /// Overrides the client name announced in the handshake.
    #[inline]
    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Sets how many turns each conversation keeps.
    ///
    /// Must be a positive multiple of 50.
    #[inline]
    #[must_use]
    pub fn max_messages_stored(mut self, capacity: usize) -> Self {
        self.max_messages_stored = capacity;
        self
    }

    /// Sets the cache eviction policy.
    #[inline]
    #[must_use]
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Sets the limit for opening the socket and sending the handshake.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bounds every request by `timeout`. Unbounded by default.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the history backend. Required.
    #[inline]
    #[must_use]
    pub fn history_backend(mut self, history: Arc<dyn HistoryBackend>) -> Self {
        self.history = Some(history);
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the token or history backend is missing, or a
    ///   socket URL does not use `ws`/`wss`
    /// - [`Error::Url`] if a socket URL does not parse
    /// - [`Error::InvalidCapacity`] for a bad `max_messages_stored`
    pub fn build(self) -> Result<Client> {
        let token = self.validate_token()?;
        let history = self.history.clone().ok_or_else(|| {
            Error::config(
                "History backend is required. Use .history_backend() to set it.\n\
                 Example: Client::builder().history_backend(Arc::new(MyHistory))",
            )
        })?;
        validate_socket_url(&self.dm_url)?;
        validate_socket_url(&self.room_url)?;
        let max_messages_stored = validate_capacity(self.max_messages_stored)?;

        if self.handshake_timeout.is_zero() {
            return Err(Error::config("Handshake timeout must be positive"));
        }

        Ok(Client::new(ClientConfig {
            token,
            user_name: self.user_name.unwrap_or_default(),
            user_id: self.user_id,
            dm_url: self.dm_url,
            room_url: self.room_url,
            client_name: self.client_name,
            max_messages_stored,
            eviction_policy: self.eviction_policy,
            handshake_timeout: self.handshake_timeout,
            request_timeout: self.request_timeout,
            history,
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_token(&self) -> Result<String> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(Error::config(
                "API token is required. Use .token() to set it.\n\
                 Example: Client::builder().token(\"...\")",
            )),
        }
    }
}

fn validate_socket_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(Error::config(format!(
            "Socket URL {raw} must use ws:// or wss://, not {other}://"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
