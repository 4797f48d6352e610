//! Outbound chat commands.
//!
//! Commands are serialized as `{"command": ..., "payload": {...}}` inside a
//! [`CommandEnvelope`] that adds the request id and origin. Room connections
//! expect the envelope wrapped in an RPC frame.
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `create_and_generate_turn` | Post a user turn and generate a reply |
//! | `generate_turn_candidate` | Generate another candidate for a reply |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::identifiers::{CandidateId, CharacterId, ChatId, TurnId};

use super::{Author, Candidate, ConnectionKind, Frame, Turn, TurnKey};

// ============================================================================
// Constants
// ============================================================================

/// Origin tag the service expects on every command.
const ORIGIN_ID: &str = "web-next";

/// RPC method name used to tunnel commands through a room connection.
const ROOM_RPC_METHOD: &str = "unused_command";

/// Chat type marker for room turns.
const ROOM_CHAT_TYPE: &str = "TYPE_MU_ROOM";

// ============================================================================
// ChatCommand
// ============================================================================

/// Commands understood by the chat service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum ChatCommand {
    /// Post a user turn and generate the character's reply.
    CreateAndGenerateTurn(CreateTurnPayload),
    /// Generate a new candidate for an existing character turn.
    GenerateTurnCandidate(GenerateCandidatePayload),
}

/// Payload of `create_and_generate_turn`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTurnPayload {
    /// Character expected to reply; absent in rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<CharacterId>,
    /// Room chat type marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<&'static str>,
    /// Candidates to generate.
    pub num_candidates: u32,
    /// Whether the service should synthesize speech.
    pub tts_enabled: bool,
    /// Display name of the user.
    pub user_name: String,
    /// The user's turn.
    pub turn: OutboundTurn,
}

/// Payload of `generate_turn_candidate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateCandidatePayload {
    /// Character to regenerate for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<CharacterId>,
    /// Whether the service should synthesize speech.
    pub tts_enabled: bool,
    /// Turn receiving the new candidate.
    pub turn_key: TurnKey,
}

/// A turn authored locally, before the service assigns anything.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundTurn {
    /// Client-generated key.
    pub turn_key: TurnKey,
    /// The user.
    pub author: Author,
    /// Single candidate holding the message.
    pub candidates: Vec<OutboundCandidate>,
    /// Id of that candidate.
    pub primary_candidate_id: CandidateId,
}

/// Candidate of an [`OutboundTurn`].
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCandidate {
    /// Client-generated candidate id.
    pub candidate_id: CandidateId,
    /// Message text.
    pub raw_content: String,
}

impl ChatCommand {
    /// Builds a `create_and_generate_turn` command for a message.
    ///
    /// Turn and candidate ids are generated here.
    #[must_use]
    pub fn create_turn(
        kind: ConnectionKind,
        chat_id: &ChatId,
        character_id: Option<CharacterId>,
        author: Author,
        text: impl Into<String>,
    ) -> Self {
        let candidate_id = CandidateId::generate();
        let user_name = author.name.clone();

        Self::CreateAndGenerateTurn(CreateTurnPayload {
            character_id,
            chat_type: (kind == ConnectionKind::GroupChat).then_some(ROOM_CHAT_TYPE),
            num_candidates: 1,
            tts_enabled: false,
            user_name,
            turn: OutboundTurn {
                turn_key: TurnKey::new(chat_id.clone(), TurnId::generate()),
                author,
                candidates: vec![OutboundCandidate {
                    candidate_id: candidate_id.clone(),
                    raw_content: text.into(),
                }],
                primary_candidate_id: candidate_id,
            },
        })
    }

    /// Builds a `generate_turn_candidate` command.
    #[must_use]
    pub fn regenerate(turn_key: TurnKey, character_id: Option<CharacterId>) -> Self {
        Self::GenerateTurnCandidate(GenerateCandidatePayload {
            character_id,
            tts_enabled: false,
            turn_key,
        })
    }

    /// Returns the id of the turn this command creates, if any.
    #[must_use]
    pub fn created_turn_id(&self) -> Option<&TurnId> {
        match self {
            Self::CreateAndGenerateTurn(payload) => Some(&payload.turn.turn_key.turn_id),
            Self::GenerateTurnCandidate(_) => None,
        }
    }

    /// Returns the user's turn as it will appear once the service accepts it.
    #[must_use]
    pub fn echo_turn(&self) -> Option<Turn> {
        let Self::CreateAndGenerateTurn(payload) = self else {
            return None;
        };

        let outbound = &payload.turn;
        let candidates = outbound
            .candidates
            .iter()
            .map(|c| Candidate::new(c.candidate_id.clone(), c.raw_content.clone(), true))
            .collect();

        Some(Turn::new(
            outbound.turn_key.clone(),
            outbound.author.clone(),
            candidates,
        ))
    }
}

// ============================================================================
// CommandEnvelope
// ============================================================================

/// A command with its request id and origin.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    /// The command and its payload.
    #[serde(flatten)]
    pub command: ChatCommand,
    /// Client-generated request id.
    pub request_id: Uuid,
    /// Origin tag.
    pub origin_id: &'static str,
}

impl CommandEnvelope {
    /// Wraps a command with a fresh request id.
    #[inline]
    #[must_use]
    pub fn new(command: ChatCommand) -> Self {
        Self {
            command,
            request_id: Uuid::new_v4(),
            origin_id: ORIGIN_ID,
        }
    }

    /// Encodes the envelope for the given connection kind.
    ///
    /// Room connections receive `{"rpc":{"method":..,"data":<envelope>},"id":<rpc_id>}`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn into_frame(self, kind: ConnectionKind, rpc_id: u32) -> Result<Frame> {
        #[derive(Serialize)]
        struct Rpc {
            rpc: RpcBody,
            id: u32,
        }

        #[derive(Serialize)]
        struct RpcBody {
            method: &'static str,
            data: CommandEnvelope,
        }

        match kind {
            ConnectionKind::GroupChat => Frame::from_json(&Rpc {
                rpc: RpcBody {
                    method: ROOM_RPC_METHOD,
                    data: self,
                },
                id: rpc_id,
            }),
            _ => Frame::from_json(&self),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
