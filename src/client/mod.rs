//! Client entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Attaches to one conversation at a time |
//! | [`ClientBuilder`] | Fluent configuration builder |
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use parley::{Client, HistoryBackend, Result};
//! # async fn example(history: Arc<dyn HistoryBackend>) -> Result<()> {
//! let client = Client::builder()
//!     .token("my-api-token")
//!     .user_id("1234")
//!     .history_backend(history)
//!     .build()?;
//!
//! let chat = client.connect_direct("chat-id").await?;
//! let reply = chat.send_message("Hi!").await?;
//! println!("{}", reply.content());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{ClientBuilder, DEFAULT_CLIENT_NAME, DEFAULT_DM_URL, DEFAULT_ROOM_URL};
pub use core::Client;
