//! Parley - streaming chat client over a single multiplexed websocket.
//!
//! This library attaches to a character chat service, sends messages and
//! streams the replies back, keeping a bounded window of each conversation's
//! turns in memory.
//!
//! # Architecture
//!
//! The client follows a single-socket model:
//!
//! - **Transport**: one websocket per conversation, with one event-loop task
//! - **Correlation**: replies carry no request id, so each pending request
//!   matches inbound frames by shape with its own predicate
//! - **Cache**: recency-ordered turn window, refilled from paginated history
//!
//! Key design principles:
//!
//! - Every pending request is an independent subscriber of the inbound stream
//!   and sees every frame in arrival order
//! - Streaming replies are acknowledged chunk by chunk by re-sending the
//!   request frame
//! - Closing a transport fails every pending request; nothing hangs
//! - At most one conversation is attached per [`Client`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use parley::{Client, HistoryBackend, Result};
//!
//! # async fn example(history: Arc<dyn HistoryBackend>) -> Result<()> {
//! let client = Client::builder()
//!     .token("my-api-token")
//!     .user_id("1234")
//!     .user_name("me")
//!     .history_backend(history)
//!     .build()?;
//!
//! let chat = client.connect_direct("chat-id").await?;
//! chat.refresh().await?;
//!
//! let reply = chat.send_message("Hello!").await?;
//! println!("{}", reply.content());
//!
//! client.disconnect();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`chat`] | [`Conversation`], turn cache, history backend |
//! | [`client`] | [`Client`] and [`ClientBuilder`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hydrate`] | Typed objects from flat wire mappings |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Frames, turns and commands |
//! | [`transport`] | Websocket transport and correlation |
//!
//! # Features
//!
//! - `rustls`: TLS for `wss://` endpoints

// ============================================================================
// Modules
// ============================================================================

/// Conversations and their turn caches.
pub mod chat;

/// Client entry point and configuration.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed objects from flat wire mappings.
pub mod hydrate;

/// Type-safe identifiers for chat entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// Websocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Chat types
pub use chat::{
    BulkDelete, Conversation, ConversationCache, EvictionPolicy, HistoryBackend, TurnBatch,
};

// Client types
pub use client::{Client, ClientBuilder};

// Error types
pub use error::{Error, Result};

// Hydration
pub use hydrate::{Avatar, CharacterProfile, Hydrate};

// Identifier types
pub use identifiers::{CandidateId, CharacterId, ChatId, RoomId, TurnId, UserId};

// Protocol types
pub use protocol::{Author, Candidate, ConnectionKind, Frame, Turn, TurnKey};

// Transport types
pub use transport::{CorrelationEngine, CorrelationRequest, Correlated, FramedTransport};
