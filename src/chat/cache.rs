//! Bounded, recency-ordered turn window.
//!
//! The front of the cache is the most recent turn. Live turns are pushed to
//! the front; history pages are appended at the back in arrival order.
//!
//! # Freezing
//!
//! A refresh clears the cache and refills it from history. While it runs the
//! cache is frozen: live turns and removals are queued and replayed, in
//! arrival order, once the refresh finishes or fails.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ChatId, TurnId};
use crate::protocol::Turn;

use super::history::PAGE_SIZE;

// ============================================================================
// Constants
// ============================================================================

/// Default number of turns kept per conversation.
pub const DEFAULT_CAPACITY: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// What to drop when a live turn overflows the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Drop the two oldest turns. An overflow by one settles at
    /// `capacity - 1`.
    #[default]
    Pair,
    /// Drop only the oldest turn.
    Single,
}

impl EvictionPolicy {
    #[inline]
    const fn batch(self) -> usize {
        match self {
            Self::Pair => 2,
            Self::Single => 1,
        }
    }
}

/// Result of [`ConversationCache::add_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Inserted at the front. Lists the ids evicted to make room.
    Inserted {
        /// Evicted turn ids, oldest first.
        evicted: Vec<TurnId>,
    },
    /// A turn with the same id was replaced in place.
    Replaced,
    /// The cache is frozen; the turn will be applied after the refresh.
    Queued,
}

/// A change held back while the cache is frozen.
#[derive(Debug)]
enum Pending {
    Add(Turn),
    Remove(Vec<TurnId>),
}

/// Checks that `capacity` is positive and page aligned.
///
/// # Errors
///
/// Returns [`Error::InvalidCapacity`] otherwise.
pub fn validate_capacity(capacity: usize) -> Result<usize> {
    if capacity == 0 || capacity % PAGE_SIZE != 0 {
        return Err(Error::invalid_capacity(capacity));
    }
    Ok(capacity)
}

// ============================================================================
// ConversationCache
// ============================================================================

/// Size-bounded window of one conversation's turns.
#[derive(Debug)]
pub struct ConversationCache {
    chat_id: ChatId,
    turns: VecDeque<Turn>,
    index: FxHashSet<TurnId>,
    capacity: usize,
    policy: EvictionPolicy,
    frozen: bool,
    queued: VecDeque<Pending>,
    /// Set after the first overflow so the warning is logged once.
    capacity_warned: bool,
}

impl ConversationCache {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] for a bad capacity.
    pub fn new(chat_id: ChatId, capacity: usize, policy: EvictionPolicy) -> Result<Self> {
        let capacity = validate_capacity(capacity)?;
        Ok(Self {
            chat_id,
            turns: VecDeque::with_capacity(capacity + 1),
            index: FxHashSet::default(),
            capacity,
            policy,
            frozen: false,
            queued: VecDeque::new(),
            capacity_warned: false,
        })
    }

    /// Returns the conversation id.
    #[inline]
    #[must_use]
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Returns the capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the eviction policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns the number of cached turns.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if no turn is cached.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns `true` while a refresh is running.
    #[inline]
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns the number of changes waiting for the refresh to end.
    #[inline]
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Returns a cached turn.
    #[must_use]
    pub fn get(&self, turn_id: &TurnId) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id() == turn_id)
    }

    /// Returns a cached turn for in-place edits.
    pub fn get_mut(&mut self, turn_id: &TurnId) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|turn| turn.id() == turn_id)
    }

    /// Returns the cached turns, most recent first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Returns the ids of the `n` oldest turns, oldest first.
    #[must_use]
    pub fn oldest_ids(&self, n: usize) -> Vec<TurnId> {
        self.turns
            .iter()
            .rev()
            .take(n)
            .map(|turn| turn.id().clone())
            .collect()
    }

    /// Fails with [`Error::CacheFrozen`] while a refresh is running.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn ensure_not_frozen(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::cache_frozen(self.chat_id.clone()));
        }
        Ok(())
    }

    /// Changes the capacity, trimming the oldest turns if it shrinks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] and leaves the cache untouched
    /// unless `capacity` is a positive multiple of 50.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        self.capacity = validate_capacity(capacity)?;

        while self.turns.len() > self.capacity {
            self.pop_oldest();
        }

        debug!(chat_id = %self.chat_id, capacity, "Cache capacity set");
        Ok(())
    }

    /// Adds a live turn as the most recent entry.
    pub fn add_turn(&mut self, turn: Turn) -> AddOutcome {
        if self.frozen {
            self.queued.push_back(Pending::Add(turn));
            return AddOutcome::Queued;
        }

        if self.index.contains(turn.id()) {
            if let Some(slot) = self.get_mut(turn.id()) {
                *slot = turn;
            }
            return AddOutcome::Replaced;
        }

        self.index.insert(turn.id().clone());
        self.turns.push_front(turn);

        let mut evicted = Vec::new();
        if self.turns.len() > self.capacity {
            if !self.capacity_warned {
                self.capacity_warned = true;
                warn!(
                    chat_id = %self.chat_id,
                    capacity = self.capacity,
                    "Conversation cache is full, evicting oldest turns"
                );
            }

            while self.turns.len() > self.capacity {
                for _ in 0..self.policy.batch() {
                    if let Some(id) = self.pop_oldest() {
                        evicted.push(id);
                    }
                }
            }
        }

        AddOutcome::Inserted { evicted }
    }

    /// Removes turns by id. Returns how many were cached.
    ///
    /// While frozen the removal is queued behind earlier live turns and
    /// this returns 0.
    pub fn remove_ids(&mut self, turn_ids: &[TurnId]) -> usize {
        if self.frozen {
            self.queued.push_back(Pending::Remove(turn_ids.to_vec()));
            return 0;
        }

        let doomed: FxHashSet<&TurnId> = turn_ids.iter().collect();
        let before = self.turns.len();

        self.turns.retain(|turn| !doomed.contains(turn.id()));
        for id in turn_ids {
            self.index.remove(id);
        }

        before - self.turns.len()
    }

    /// Freezes and clears the cache for a refill.
    ///
    /// Returns `false`, changing nothing, if a refresh is already running.
    pub fn begin_refresh(&mut self) -> bool {
        if self.frozen {
            return false;
        }

        self.frozen = true;
        self.turns.clear();
        self.index.clear();
        true
    }

    /// Installs refreshed history and unfreezes.
    ///
    /// `history` is in arrival order, most recent first. Turns whose id is in
    /// `pinned` are marked pinned. Returns the number of replayed changes.
    pub fn finish_refresh(&mut self, history: Vec<Turn>, pinned: &FxHashSet<TurnId>) -> usize {
        for mut turn in history {
            if self.turns.len() >= self.capacity {
                break;
            }
            if !self.index.insert(turn.id().clone()) {
                continue;
            }
            if pinned.contains(turn.id()) {
                turn.is_pinned = true;
            }
            self.turns.push_back(turn);
        }

        self.unfreeze()
    }

    /// Unfreezes after a failed refresh. Returns the number of replayed changes.
    pub fn abort_refresh(&mut self) -> usize {
        self.unfreeze()
    }

    fn unfreeze(&mut self) -> usize {
        self.frozen = false;

        let queued = std::mem::take(&mut self.queued);
        let replayed = queued.len();
        for pending in queued {
            match pending {
                Pending::Add(turn) => {
                    self.add_turn(turn);
                }
                Pending::Remove(turn_ids) => {
                    self.remove_ids(&turn_ids);
                }
            }
        }

        if replayed > 0 {
            debug!(chat_id = %self.chat_id, replayed, "Replayed turns queued during refresh");
        }
        replayed
    }

    fn pop_oldest(&mut self) -> Option<TurnId> {
        let turn = self.turns.pop_back()?;
        self.index.remove(turn.id());
        Some(turn.id().clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
