//! Turns and candidates.
//!
//! A [`Turn`] is one exchange unit of a conversation. It owns an ordered list
//! of [`Candidate`]s, one of which is primary. The candidate order never
//! changes once received; only the primary pointer moves.
//!
//! # Format
//!
//! ```json
//! {
//!   "turn_key": { "chat_id": "...", "turn_id": "..." },
//!   "author": { "author_id": "...", "name": "...", "is_human": true },
//!   "candidates": [
//!     { "candidate_id": "...", "raw_content": "...", "is_final": true }
//!   ],
//!   "primary_candidate_id": "...",
//!   "is_pinned": false
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::{CandidateId, ChatId, TurnId};

// ============================================================================
// TurnKey
// ============================================================================

/// Composite key of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnKey {
    /// Conversation the turn belongs to.
    pub chat_id: ChatId,
    /// Turn id within the conversation.
    pub turn_id: TurnId,
}

impl TurnKey {
    /// Creates a turn key.
    #[inline]
    #[must_use]
    pub fn new(chat_id: ChatId, turn_id: TurnId) -> Self {
        Self { chat_id, turn_id }
    }
}

// ============================================================================
// Author
// ============================================================================

/// Author of a turn: the user or a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Service-side author id.
    pub author_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// `true` when a human wrote the turn.
    #[serde(default)]
    pub is_human: bool,
}

impl Author {
    /// Creates a human author.
    #[must_use]
    pub fn human(author_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            name: name.into(),
            is_human: true,
        }
    }

    /// Creates a character author.
    #[must_use]
    pub fn character(author_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            name: name.into(),
            is_human: false,
        }
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// One content variant of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate id.
    pub candidate_id: CandidateId,
    /// Raw text content.
    #[serde(default)]
    pub raw_content: String,
    /// `true` once generation of this candidate has finished.
    #[serde(default)]
    pub is_final: bool,
    /// `true` when the service truncated the content for safety.
    #[serde(default)]
    pub safety_truncated: bool,
    /// Creation timestamp as sent by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

impl Candidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new(candidate_id: CandidateId, raw_content: impl Into<String>, is_final: bool) -> Self {
        Self {
            candidate_id,
            raw_content: raw_content.into(),
            is_final,
            safety_truncated: false,
            create_time: None,
        }
    }
}

// ============================================================================
// Turn
// ============================================================================

/// One exchange unit in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    turn_key: TurnKey,
    author: Author,
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_candidate_id: Option<CandidateId>,
    /// `true` when the user pinned this turn.
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
}

impl Turn {
    /// Creates a turn whose primary candidate is the first one.
    #[must_use]
    pub fn new(turn_key: TurnKey, author: Author, candidates: Vec<Candidate>) -> Self {
        let primary_candidate_id = candidates.first().map(|c| c.candidate_id.clone());
        Self {
            turn_key,
            author,
            candidates,
            primary_candidate_id,
            is_pinned: false,
            create_time: None,
            state: None,
        }
    }

    /// Returns the composite key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &TurnKey {
        &self.turn_key
    }

    /// Returns the turn id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &TurnId {
        &self.turn_key.turn_id
    }

    /// Returns the conversation id.
    #[inline]
    #[must_use]
    pub fn chat_id(&self) -> &ChatId {
        &self.turn_key.chat_id
    }

    /// Returns the author.
    #[inline]
    #[must_use]
    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Returns `true` when a human authored the turn.
    #[inline]
    #[must_use]
    pub fn is_human(&self) -> bool {
        self.author.is_human
    }

    /// Returns all candidates in their received order.
    #[inline]
    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Returns a candidate by id.
    #[must_use]
    pub fn candidate(&self, candidate_id: &CandidateId) -> Option<&Candidate> {
        self.candidates
            .iter()
            .find(|c| &c.candidate_id == candidate_id)
    }

    /// Returns the primary candidate.
    ///
    /// Falls back to the first candidate when the primary pointer is absent
    /// or names a candidate this turn does not hold.
    #[must_use]
    pub fn primary(&self) -> Option<&Candidate> {
        self.primary_candidate_id
            .as_ref()
            .and_then(|id| self.candidate(id))
            .or_else(|| self.candidates.first())
    }

    /// Returns the primary candidate id, if any.
    #[inline]
    #[must_use]
    pub fn primary_candidate_id(&self) -> Option<&CandidateId> {
        self.primary().map(|c| &c.candidate_id)
    }

    /// Returns `true` once the primary candidate is final.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.primary().is_some_and(|c| c.is_final)
    }

    /// Returns the primary candidate's text, or an empty string.
    #[inline]
    #[must_use]
    pub fn content(&self) -> &str {
        self.primary().map_or("", |c| c.raw_content.as_str())
    }

    /// Returns the creation timestamp as sent by the service.
    #[inline]
    #[must_use]
    pub fn create_time(&self) -> Option<&str> {
        self.create_time.as_deref()
    }

    /// Returns the service-side turn state, e.g. `STATE_OK`.
    #[inline]
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Moves the primary pointer to another candidate.
    ///
    /// The candidate list itself is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the turn has no such candidate.
    pub fn set_primary(&mut self, candidate_id: &CandidateId) -> Result<()> {
        if self.candidate(candidate_id).is_none() {
            return Err(Error::invalid_argument(format!(
                "turn {} has no candidate {candidate_id}",
                self.turn_key.turn_id
            )));
        }

        self.primary_candidate_id = Some(candidate_id.clone());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
