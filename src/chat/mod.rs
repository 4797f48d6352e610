//! Conversations and their turn caches.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cache` | Bounded, recency-ordered turn window |
//! | `conversation` | Messaging and history operations on one chat |
//! | `history` | Paginated history collaborator |

// ============================================================================
// Submodules
// ============================================================================

/// Bounded turn cache.
pub mod cache;

/// Attached conversation handle.
pub mod conversation;

/// History backend trait and page type.
pub mod history;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::{AddOutcome, ConversationCache, DEFAULT_CAPACITY, EvictionPolicy, validate_capacity};
pub use conversation::{BulkDelete, Conversation};
pub use history::{HistoryBackend, PAGE_SIZE, TurnBatch};
