//! Request/response correlation over the shared inbound stream.
//!
//! The service multiplexes every turn event for a user (or room) onto one
//! stream and never echoes a request id, so replies are matched by shape.
//!
//! # Algorithm
//!
//! 1. Subscribe to the inbound stream, then write the outbound frame.
//! 2. Parse each inbound frame and project the turn it carries for the
//!    connection kind (`turn` or `push.data.turn`).
//! 3. Frames without a turn never resolve; they are kept in the stream
//!    accumulator when streaming.
//! 4. A turn resolves the call when the request's predicate accepts it and
//!    either `await_response` is off or the primary candidate is final.
//! 5. After every accepted non-final turn the outbound frame is written
//!    again; the service stalls streaming without that acknowledgement.
//!
//! Steps 2 to 5 live in [`Correlator`], a pure state machine; the engine only
//! moves frames between it and the transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{ConnectionKind, Frame, Turn, project_turn, remote_error};

use super::FramedTransport;

// ============================================================================
// Types
// ============================================================================

/// Narrowing predicate over candidate reply turns.
pub type TurnPredicate = Box<dyn Fn(&Turn) -> bool + Send + Sync>;

// ============================================================================
// CorrelationRequest
// ============================================================================

/// An outbound frame plus the rules for recognizing its reply.
///
/// # Example
///
/// ```ignore
/// let request = CorrelationRequest::new(frame)
///     .await_response(true)
///     .streaming(true)
///     .matching(move |turn| !turn.is_human());
/// let reply = engine.send_and_correlate(request).await?;
/// ```
pub struct CorrelationRequest {
    frame: Frame,
    await_response: bool,
    streaming: bool,
    acknowledge_partials: bool,
    fail_on_remote_error: bool,
    predicate: Option<TurnPredicate>,
}

impl CorrelationRequest {
    /// Creates a one-shot request: the first reply turn resolves it.
    #[must_use]
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            await_response: false,
            streaming: false,
            acknowledge_partials: true,
            fail_on_remote_error: false,
            predicate: None,
        }
    }

    /// Waits for a turn whose primary candidate is final.
    #[inline]
    #[must_use]
    pub fn await_response(mut self, await_response: bool) -> Self {
        self.await_response = await_response;
        self
    }

    /// Resolves with every observed frame instead of the single match.
    #[inline]
    #[must_use]
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Re-sends the outbound frame after each accepted partial turn.
    ///
    /// Enabled by default.
    #[inline]
    #[must_use]
    pub fn acknowledge_partials(mut self, acknowledge: bool) -> Self {
        self.acknowledge_partials = acknowledge;
        self
    }

    /// Fails the call with [`Error::Remote`] on a service error frame.
    #[inline]
    #[must_use]
    pub fn fail_on_remote_error(mut self, fail: bool) -> Self {
        self.fail_on_remote_error = fail;
        self
    }

    /// Narrows which turns belong to this request.
    ///
    /// Turns rejected here are ignored entirely. Calling this again adds a
    /// further condition.
    #[must_use]
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Turn) -> bool + Send + Sync + 'static,
    {
        let combined: TurnPredicate = match self.predicate.take() {
            Some(existing) => Box::new(move |turn: &Turn| existing(turn) && predicate(turn)),
            None => Box::new(predicate),
        };
        self.predicate = Some(combined);
        self
    }

    /// Returns the outbound frame.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Returns `true` if the turn belongs to this request.
    fn concerns(&self, turn: &Turn) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(turn))
    }

    /// Returns `true` if the turn ends the wait.
    fn is_terminal(&self, turn: &Turn) -> bool {
        !self.await_response || turn.is_final()
    }
}

impl fmt::Debug for CorrelationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationRequest")
            .field("frame", &self.frame)
            .field("await_response", &self.await_response)
            .field("streaming", &self.streaming)
            .field("acknowledge_partials", &self.acknowledge_partials)
            .field("fail_on_remote_error", &self.fail_on_remote_error)
            .field("narrowed", &self.predicate.is_some())
            .finish()
    }
}

// ============================================================================
// Correlated
// ============================================================================

/// One accumulated frame of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    /// The raw frame.
    pub frame: Frame,
    /// The turn it carried, if any.
    pub turn: Option<Turn>,
}

impl StreamChunk {
    /// Returns `true` if the chunk carries a final turn.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.turn.as_ref().is_some_and(Turn::is_final)
    }
}

/// Result of a resolved correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlated {
    /// The single matching frame and its turn.
    Reply {
        /// Matching frame.
        frame: Frame,
        /// Turn projected from it.
        turn: Turn,
    },
    /// Every frame observed, in order, ending with the match.
    Stream(Vec<StreamChunk>),
}

impl Correlated {
    /// Returns the turn that resolved the call.
    #[must_use]
    pub fn turn(&self) -> Option<&Turn> {
        match self {
            Self::Reply { turn, .. } => Some(turn),
            Self::Stream(chunks) => chunks.last().and_then(|c| c.turn.as_ref()),
        }
    }

    /// Consumes the result, returning the turn that resolved the call.
    #[must_use]
    pub fn into_turn(self) -> Option<Turn> {
        match self {
            Self::Reply { turn, .. } => Some(turn),
            Self::Stream(mut chunks) => chunks.pop().and_then(|c| c.turn),
        }
    }

    /// Returns the accumulated chunks; empty for a single reply.
    #[must_use]
    pub fn chunks(&self) -> &[StreamChunk] {
        match self {
            Self::Reply { .. } => &[],
            Self::Stream(chunks) => chunks,
        }
    }
}

// ============================================================================
// Correlator
// ============================================================================

/// Outcome of feeding one frame to a [`Correlator`].
#[derive(Debug)]
pub enum Step {
    /// Keep waiting; write the outbound frame again if `acknowledge`.
    Continue {
        /// Whether to re-send the outbound frame now.
        acknowledge: bool,
    },
    /// The call resolved.
    Resolved(Correlated),
    /// The service reported an error.
    Failed(Error),
}

/// Per-call correlation state.
pub struct Correlator {
    kind: ConnectionKind,
    request: CorrelationRequest,
    accumulated: Vec<StreamChunk>,
}

impl Correlator {
    /// Creates the state for one pending request.
    #[must_use]
    pub fn new(kind: ConnectionKind, request: CorrelationRequest) -> Self {
        Self {
            kind,
            request,
            accumulated: Vec::new(),
        }
    }

    /// Returns the frames accumulated so far.
    #[inline]
    #[must_use]
    pub fn accumulated(&self) -> &[StreamChunk] {
        &self.accumulated
    }

    /// Feeds one inbound frame.
    pub fn observe(&mut self, frame: Frame) -> Step {
        let Some(value) = frame.parse_json() else {
            trace!(len = frame.as_str().len(), "Non-JSON frame swallowed");
            self.accumulate(frame, None);
            return Step::Continue { acknowledge: false };
        };

        if self.request.fail_on_remote_error
            && let Some(message) = remote_error(self.kind, &value)
        {
            debug!(%message, "Remote error frame");
            return Step::Failed(Error::remote(message));
        }

        let Some(turn) = project_turn(self.kind, &value) else {
            self.accumulate(frame, None);
            return Step::Continue { acknowledge: false };
        };

        if !self.request.concerns(&turn) {
            trace!(turn_id = %turn.id(), "Turn belongs to another request");
            return Step::Continue { acknowledge: false };
        }

        if self.request.is_terminal(&turn) {
            trace!(turn_id = %turn.id(), "Correlation resolved");
            let resolved = if self.request.streaming {
                self.accumulate(frame, Some(turn));
                Correlated::Stream(std::mem::take(&mut self.accumulated))
            } else {
                Correlated::Reply { frame, turn }
            };
            return Step::Resolved(resolved);
        }

        self.accumulate(frame, Some(turn));
        Step::Continue {
            acknowledge: self.request.acknowledge_partials,
        }
    }

    fn accumulate(&mut self, frame: Frame, turn: Option<Turn>) {
        if self.request.streaming {
            self.accumulated.push(StreamChunk { frame, turn });
        }
    }
}

// ============================================================================
// CorrelationEngine
// ============================================================================

/// Sends requests over one transport and waits for their replies.
///
/// Every pending call is an independent subscriber of the transport, so
/// concurrent calls each see every frame in arrival order.
#[derive(Clone)]
pub struct CorrelationEngine {
    transport: FramedTransport,
    kind: ConnectionKind,
}

impl fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("kind", &self.kind)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl CorrelationEngine {
    /// Binds an engine to a transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for [`ConnectionKind::Disconnected`].
    pub fn new(transport: FramedTransport, kind: ConnectionKind) -> Result<Self> {
        if !kind.is_active() {
            return Err(Error::invalid_argument(
                "correlation engine needs a direct-message or group-chat connection",
            ));
        }
        Ok(Self { transport, kind })
    }

    /// Returns the connection kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Returns the underlying transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &FramedTransport {
        &self.transport
    }

    /// Returns the number of listeners registered on the transport.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.transport.subscriber_count()
    }

    /// Returns `true` once the transport has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Closes the transport, rejecting every pending call.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Writes the request's frame and waits for its reply.
    ///
    /// There is no built-in timeout; wrap the call in a timer or use
    /// [`send_and_correlate_timeout`](Self::send_and_correlate_timeout).
    /// Dropping the returned future unregisters its listener.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the transport closes first
    /// - [`Error::Connection`] if the socket fails
    /// - [`Error::TransportClosed`] if the transport was already closed
    /// - [`Error::Remote`] on a service error frame, when requested
    pub async fn send_and_correlate(&self, request: CorrelationRequest) -> Result<Correlated> {
        // Register before writing so the reply cannot be missed.
        let mut frames = self.transport.inbound_frames()?;
        let outbound = request.frame.clone();

        self.transport.send(outbound.clone()).await?;
        debug!(kind = %self.kind, "Request sent, awaiting correlation");

        let mut correlator = Correlator::new(self.kind, request);

        loop {
            let frame = frames.recv().await?;

            match correlator.observe(frame) {
                Step::Continue { acknowledge: true } => {
                    if let Err(err) = self.acknowledge(&outbound).await {
                        // A failed write always ends the connection.
                        debug!(error = %err, "Acknowledgement failed");
                        return Err(frames.termination().await);
                    }
                }
                Step::Continue { acknowledge: false } => {}
                Step::Resolved(correlated) => {
                    debug!(kind = %self.kind, "Request correlated");
                    return Ok(correlated);
                }
                Step::Failed(err) => return Err(err),
            }
        }
    }

    /// Like [`send_and_correlate`](Self::send_and_correlate), bounded by a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTimeout`] if no reply matched in time, plus
    /// every error of `send_and_correlate`.
    pub async fn send_and_correlate_timeout(
        &self,
        request: CorrelationRequest,
        deadline: Duration,
    ) -> Result<Correlated> {
        timeout(deadline, self.send_and_correlate(request))
            .await
            .map_err(|_| Error::request_timeout(deadline.as_millis() as u64))?
    }

    /// Re-sends the outbound frame after a partial reply.
    async fn acknowledge(&self, outbound: &Frame) -> Result<()> {
        trace!("Acknowledging partial reply");
        self.transport.send(outbound.clone()).await
    }
}

// ============================================================================
// Tests
// ============================================================================
