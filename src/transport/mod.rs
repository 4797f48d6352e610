//! WebSocket transport layer.
//!
//! This module owns the persistent connection to the chat service and the
//! logic that pairs inbound frames with the request that caused them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                            ┌──────────────────┐
//! │  Conversation    │                            │  Chat service    │
//! │                  │         WebSocket          │                  │
//! │ CorrelationEngine│◄──────────────────────────►│  /ws/  (DM)      │
//! │ → FramedTransport│      wss://, cookie auth   │  /connection/... │
//! │                  │                            │        (rooms)   │
//! └──────────────────┘                            └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `FramedTransport::connect` - Open the socket and send the handshake
//! 2. `CorrelationEngine::new` - Bind the transport to a connection kind
//! 3. `CorrelationEngine::send_and_correlate` - Send and await the reply
//! 4. `FramedTransport::close` - Close the socket, fail waiting listeners
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Socket, event loop and inbound fan-out |
//! | `correlation` | Request/response matching by frame shape |
//! | `registry` | One-active-conversation state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Socket, event loop and inbound fan-out.
pub mod connection;

/// Request/response matching.
pub mod correlation;

/// Single-conversation connection registry.
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{
    Credentials, DEFAULT_HANDSHAKE_TIMEOUT, FrameSubscription, FramedTransport, Handshake,
};
pub use correlation::{
    Correlated, CorrelationEngine, CorrelationRequest, Correlator, Step, StreamChunk,
    TurnPredicate,
};
pub use registry::ConnectionRegistry;
