//! Type-safe identifier wrappers.
//!
//! Every identifier handed out by the chat service is an opaque string.
//! Wrapping each kind in its own newtype prevents passing a turn id where a
//! chat id is expected.
//!
//! | Type | Identifies |
//! |------|------------|
//! | [`ChatId`] | Direct-message conversation |
//! | [`RoomId`] | Group-chat room |
//! | [`TurnId`] | Turn within a conversation |
//! | [`CandidateId`] | Candidate within a turn |
//! | [`UserId`] | Authenticated user |
//! | [`CharacterId`] | Character the user talks to |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Macro
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            #[inline]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

string_id!(
    /// Identifier of a direct-message conversation.
    ChatId
);

string_id!(
    /// Identifier of a group-chat room.
    RoomId
);

string_id!(
    /// Identifier of a turn, unique within its conversation.
    TurnId
);

string_id!(
    /// Identifier of a candidate, unique within its turn.
    CandidateId
);

string_id!(
    /// Identifier of the authenticated user.
    UserId
);

string_id!(
    /// Identifier of a character.
    CharacterId
);

// ============================================================================
// Generated Identifiers
// ============================================================================

impl TurnId {
    /// Generates a fresh client-side turn id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl CandidateId {
    /// Generates a fresh client-side candidate id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
