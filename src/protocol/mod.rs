//! Wire message types.
//!
//! This module defines what travels over the persistent connection and how
//! inbound frames are interpreted.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | connect / subscribe | Local → Remote | Handshake after the socket opens |
//! | `{}` | Both | Keepalive, echoed verbatim |
//! | command envelope | Local → Remote | Post or regenerate a turn |
//! | turn frame | Remote → Local | Partial or final turn |
//! | `neo_error` | Remote → Local | Service-side failure |
//!
//! Replies carry no client request id, so inbound frames are matched to
//! requests by shape. See [`crate::transport::correlation`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound command envelopes |
//! | `frame` | Frame type, control frames, turn projection |
//! | `turn` | Turn and candidate model |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command envelopes.
pub mod command;

/// Frame type and projection helpers.
pub mod frame;

/// Turn and candidate model.
pub mod turn;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{ChatCommand, CommandEnvelope};
pub use frame::{ConnectionKind, Frame, project_turn, remote_error};
pub use turn::{Author, Candidate, Turn, TurnKey};
