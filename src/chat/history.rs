//! Paginated history collaborator.
//!
//! The conversation never talks to the history service directly; it goes
//! through a [`HistoryBackend`] so tests and alternative stores can plug in.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifiers::{ChatId, TurnId};
use crate::protocol::Turn;

// ============================================================================
// Constants
// ============================================================================

/// Fixed number of turns per history page.
pub const PAGE_SIZE: usize = 50;

// ============================================================================
// TurnBatch
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct BatchMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

/// One page of historical turns, most recent first.
///
/// Deserializes from `{"turns": [...], "meta": {"next_token": "..."}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnBatch {
    /// Turns in this page.
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    meta: BatchMeta,
}

impl TurnBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(turns: Vec<Turn>, next_token: Option<String>) -> Self {
        Self {
            turns,
            meta: BatchMeta { next_token },
        }
    }

    /// Creates an empty terminal batch.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the continuation token for the next page.
    #[inline]
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.meta.next_token.as_deref()
    }

    /// Returns `true` if the page carries no turns.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ============================================================================
// HistoryBackend
// ============================================================================

/// Remote store of a conversation's past turns.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Fetches one page of turns.
    ///
    /// `token` is the continuation token of the previous page, `None` for the
    /// first page. With `pinned_only` only pinned turns are returned.
    async fn fetch_batch(
        &self,
        chat_id: &ChatId,
        token: Option<&str>,
        pinned_only: bool,
    ) -> Result<TurnBatch>;

    /// Deletes turns remotely. Returns once the service acknowledged.
    async fn delete_turns(&self, chat_id: &ChatId, turn_ids: &[TurnId]) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
