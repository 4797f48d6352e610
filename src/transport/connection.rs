//! WebSocket connection and event loop.
//!
//! This module owns the single physical connection to the chat service,
//! including the connect/subscribe handshake, keepalive echo and fan-out of
//! inbound frames.
//!
//! # Event Loop
//!
//! The transport spawns a tokio task that handles:
//!
//! - Incoming frames from the service, delivered to every subscriber
//! - Outgoing frames from the Rust API
//! - Heartbeat echo (`{}` is answered and never delivered)
//! - Terminal delivery to every subscriber when the socket ends
//!
//! # Fan-out
//!
//! Each [`FrameSubscription`] owns an unbounded queue fed by the event loop.
//! Frames reach all subscribers in arrival order and no subscriber can take
//! a frame away from another. Dropping a subscription unregisters it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RoomId, UserId};
use crate::protocol::Frame;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for opening the socket and sending the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Identifier of one inbound-frame subscriber.
type SubscriberId = u64;

/// What a subscriber receives: a frame, or the reason the stream ended.
type Delivery = std::result::Result<Frame, Termination>;

/// Why the inbound stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Termination {
    /// Closed locally or by the remote end.
    Closed,
    /// Socket error.
    Failed(String),
}

impl Termination {
    fn into_error(self) -> Error {
        match self {
            Self::Closed => Error::ConnectionClosed,
            Self::Failed(message) => Error::connection(message),
        }
    }
}

/// Internal commands for the event loop.
enum TransportCommand {
    /// Write one frame.
    Send {
        frame: Frame,
        ack_tx: oneshot::Sender<Result<()>>,
    },
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Credentials
// ============================================================================

/// Credentials presented when opening the socket.
#[derive(Clone)]
pub struct Credentials {
    token: String,
    user_id: Option<UserId>,
}

impl Credentials {
    /// Creates credentials from an API token.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
        }
    }

    /// Attaches the authenticated user's id.
    #[inline]
    #[must_use]
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Returns the user id, if known.
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    fn cookie(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&format!("HTTP_AUTHORIZATION=\"Token {}\"", self.token))
            .map_err(|_| Error::config("token contains characters not allowed in a header"))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Connect/subscribe handshake sent before any application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    client_name: String,
    channel: String,
}

impl Handshake {
    /// Creates a handshake for an explicit channel.
    #[inline]
    #[must_use]
    pub fn new(client_name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            channel: channel.into(),
        }
    }

    /// Subscribes to a user's personal channel (`user#<id>`).
    #[must_use]
    pub fn for_user(client_name: impl Into<String>, user_id: &UserId) -> Self {
        Self::new(client_name, format!("user#{user_id}"))
    }

    /// Subscribes to a room's channel (`room:<id>`).
    #[must_use]
    pub fn for_room(client_name: impl Into<String>, room_id: &RoomId) -> Self {
        Self::new(client_name, format!("room:{room_id}"))
    }

    /// Returns the subscribed channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The two frames, in the order they are sent.
    #[must_use]
    pub fn frames(&self) -> [Frame; 2] {
        [
            Frame::connect(&self.client_name),
            Frame::subscribe(&self.channel),
        ]
    }
}

// ============================================================================
// Subscribers
// ============================================================================

/// Subscriber table shared between handles and the event loop.
#[derive(Default)]
struct Subscribers {
    senders: FxHashMap<SubscriberId, mpsc::UnboundedSender<Delivery>>,
    /// Set once; no subscriber may register afterwards.
    terminated: Option<Termination>,
}

/// State shared by every transport handle and its event loop.
#[derive(Default)]
struct Shared {
    subscribers: Mutex<Subscribers>,
    next_subscriber: AtomicU64,
}

impl Shared {
    /// Delivers one frame to every live subscriber, pruning dead ones.
    fn dispatch(&self, frame: &Frame) {
        let mut subscribers = self.subscribers.lock();
        subscribers
            .senders
            .retain(|_, tx| tx.send(Ok(frame.clone())).is_ok());
    }

    /// Ends the stream for every subscriber. Only the first call has effect.
    fn terminate(&self, termination: Termination) {
        let drained: Vec<_> = {
            let mut subscribers = self.subscribers.lock();
            if subscribers.terminated.is_some() {
                return;
            }
            subscribers.terminated = Some(termination.clone());
            subscribers.senders.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(termination.clone()));
        }

        if count > 0 {
            debug!(count, ?termination, "Terminated pending subscribers");
        }
    }

    fn is_terminated(&self) -> bool {
        self.subscribers.lock().terminated.is_some()
    }
}

// ============================================================================
// FramedTransport
// ============================================================================

/// One persistent duplex connection to the chat service.
///
/// Cloning yields another handle to the same connection. The event loop ends
/// when [`close`](Self::close) is called, the remote end closes, or every
/// handle is dropped.
///
/// # Thread Safety
///
/// `FramedTransport` is `Send + Sync` and can be shared across tasks.
pub struct FramedTransport {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Subscriber table (shared with event loop).
    shared: Arc<Shared>,
}

impl Clone for FramedTransport {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedTransport")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FramedTransport {
    /// Opens a connection and performs the handshake.
    ///
    /// When `handshake` is given, its connect and subscribe frames are
    /// written back-to-back before this returns, so they precede every
    /// application frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if opening or the handshake exceeds `handshake_timeout`
    /// - [`Error::Connection`] if the socket cannot be opened or the handshake write fails
    /// - [`Error::WebSocket`] if `url` is not a valid websocket request target
    pub async fn connect(
        url: &str,
        credentials: &Credentials,
        handshake: Option<&Handshake>,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let timeout_ms = handshake_timeout.as_millis() as u64;

        let mut request = url.into_client_request()?;
        request.headers_mut().insert(COOKIE, credentials.cookie()?);

        let (mut ws_stream, _response) =
            timeout(handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| Error::connection_timeout(timeout_ms))?
                .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        debug!(url, "WebSocket connection opened");

        if let Some(handshake) = handshake {
            let send_handshake = async {
                for frame in handshake.frames() {
                    ws_stream
                        .send(Message::Text(frame.into_string().into()))
                        .await?;
                }
                Ok::<_, tokio_tungstenite::tungstenite::Error>(())
            };

            timeout(handshake_timeout, send_handshake)
                .await
                .map_err(|_| Error::connection_timeout(timeout_ms))?
                .map_err(|e| Error::connection(format!("Handshake failed: {e}")))?;

            debug!(channel = handshake.channel(), "Handshake sent");
        }

        info!(url, "Transport connected");

        Ok(Self::from_stream(ws_stream))
    }

    /// Wraps an established websocket and spawns the event loop.
    pub(crate) fn from_stream<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&shared),
        ));

        Self { command_tx, shared }
    }

    /// Writes one frame.
    ///
    /// Resolves once the frame is written; never waits for a reply.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`] if the connection is not open
    /// - [`Error::WebSocket`] if the write fails
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.shared.is_terminated() {
            return Err(Error::TransportClosed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(TransportCommand::Send { frame, ack_tx })
            .map_err(|_| Error::TransportClosed)?;

        ack_rx.await.map_err(|_| Error::TransportClosed)?
    }

    /// Subscribes to every inbound frame from now on.
    ///
    /// Heartbeats are never delivered. When the connection ends the
    /// subscription yields one terminal error and then finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the connection already ended.
    pub fn inbound_frames(&self) -> Result<FrameSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);

        {
            let mut subscribers = self.shared.subscribers.lock();
            if subscribers.terminated.is_some() {
                return Err(Error::TransportClosed);
            }
            subscribers.senders.insert(id, tx);
        }

        trace!(subscriber = id, "Inbound subscriber registered");

        Ok(FrameSubscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Returns the number of registered subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().senders.len()
    }

    /// Returns `true` once the connection has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Closes the connection.
    ///
    /// Every subscriber is released with [`Error::ConnectionClosed`] before
    /// this returns. Idempotent.
    pub fn close(&self) {
        self.shared.terminate(Termination::Closed);
        let _ = self.command_tx.send(TransportCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        shared: Arc<Shared>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let termination = loop {
            tokio::select! {
                // Incoming frames from the service
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let frame = Frame::new(text.as_str());

                            if frame.is_heartbeat() {
                                trace!("Heartbeat received");
                                if let Err(e) = ws_write
                                    .send(Message::Text(frame.into_string().into()))
                                    .await
                                {
                                    warn!(error = %e, "Failed to echo heartbeat");
                                }
                                continue;
                            }

                            trace!(len = frame.as_str().len(), "Frame received");
                            shared.dispatch(&frame);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break Termination::Closed;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break Termination::Failed(e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break Termination::Closed;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send { frame, ack_tx }) => {
                            let result = ws_write
                                .send(Message::Text(frame.into_string().into()))
                                .await
                                .map_err(Error::from);

                            let failed = result.as_ref().err().map(ToString::to_string);
                            let _ = ack_tx.send(result);

                            if let Some(message) = failed {
                                error!(error = %message, "Failed to write frame");
                                break Termination::Failed(message);
                            }
                        }

                        Some(TransportCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break Termination::Closed;
                        }

                        None => {
                            debug!("All transport handles dropped");
                            let _ = ws_write.close().await;
                            break Termination::Closed;
                        }
                    }
                }
            }
        };

        // Fail every subscriber on shutdown
        shared.terminate(termination);

        debug!("Event loop terminated");
    }
}

// ============================================================================
// FrameSubscription
// ============================================================================

/// A subscriber's view of the inbound frame stream.
///
/// Yields frames in arrival order, then one terminal error when the
/// connection ends. Dropping it unregisters the subscriber.
pub struct FrameSubscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Delivery>,
    shared: Arc<Shared>,
}

impl FrameSubscription {
    /// Waits for the next inbound frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] once the connection has closed
    /// - [`Error::Connection`] if the socket failed
    pub async fn recv(&mut self) -> Result<Frame> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(termination)) => Err(termination.into_error()),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Skips buffered frames and returns the reason the stream ended.
    ///
    /// Waits for the connection to end if it has not yet.
    pub(crate) async fn termination(mut self) -> Error {
        loop {
            match self.rx.recv().await {
                Some(Ok(_)) => {}
                Some(Err(termination)) => return termination.into_error(),
                None => return Error::ConnectionClosed,
            }
        }
    }
}

impl Stream for FrameSubscription {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|delivery| delivery.map(|d| d.map_err(Termination::into_error)))
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        if self.shared.subscribers.lock().senders.remove(&self.id).is_some() {
            trace!(subscriber = self.id, "Inbound subscriber released");
        }
    }
}

impl fmt::Debug for FrameSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use crate::transport::test_support::{duplex_pair, init_tracing, next_text};

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_HANDSHAKE_TIMEOUT.as_secs(), 30);
    }

    #[test]
    fn test_handshake_channels() {
        let user = Handshake::for_user("js", &UserId::new("42"));
        assert_eq!(user.channel(), "user#42");

        let room = Handshake::for_room("js", &RoomId::new("r1"));
        assert_eq!(room.channel(), "room:r1");

        let [connect, subscribe] = user.frames();
        assert_eq!(connect.as_str(), r#"{"connect":{"name":"js"},"id":1}"#);
        assert_eq!(subscribe.as_str(), r#"{"subscribe":{"channel":"user#42"},"id":1}"#);
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let credentials = Credentials::new("secret-token").with_user_id(UserId::new("1"));
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("redacted"));
    }

    #[tokio::test]
    async fn test_connect_sends_handshake_before_application_frames() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("addr"));
        let cookie = Arc::new(parking_lot::Mutex::new(None::<String>));

        let cookie_slot = Arc::clone(&cookie);
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let callback = move |request: &Request,
                                 response: Response|
                  -> std::result::Result<Response, ErrorResponse> {
                *cookie_slot.lock() = request
                    .headers()
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .expect("upgrade");

            let mut received = Vec::new();
            for _ in 0..3 {
                received.push(next_text(&mut ws).await);
            }
            received
        });

        let credentials = Credentials::new("tok").with_user_id(UserId::new("42"));
        let handshake = Handshake::for_user("js", &UserId::new("42"));
        let transport = FramedTransport::connect(
            &url,
            &credentials,
            Some(&handshake),
            Duration::from_secs(5),
        )
        .await
        .expect("connect");

        transport
            .send(Frame::new(r#"{"app":true}"#))
            .await
            .expect("send");

        let received = server.await.expect("server task");
        assert_eq!(
            received,
            vec![
                r#"{"connect":{"name":"js"},"id":1}"#.to_string(),
                r#"{"subscribe":{"channel":"user#42"},"id":1}"#.to_string(),
                r#"{"app":true}"#.to_string(),
            ]
        );
        assert_eq!(
            cookie.lock().as_deref(),
            Some("HTTP_AUTHORIZATION=\"Token tok\"")
        );

        transport.close();
    }

    #[tokio::test]
    async fn test_connect_without_handshake_sends_nothing_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("addr"));

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            next_text(&mut ws).await
        });

        let transport = FramedTransport::connect(
            &url,
            &Credentials::new("tok"),
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("connect");
        transport.send(Frame::new("first")).await.expect("send");

        assert_eq!(server.await.expect("server task"), "first");
        transport.close();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}", listener.local_addr().expect("addr"));
        drop(listener);

        let result = FramedTransport::connect(
            &url,
            &Credentials::new("tok"),
            None,
            Duration::from_secs(5),
        )
        .await;

        let err = result.expect_err("nothing is listening");
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_heartbeat_echoed_and_suppressed() {
        let (transport, mut server) = duplex_pair().await;
        let mut frames = transport.inbound_frames().expect("subscribe");

        server.send(Message::Text("{}".into())).await.expect("heartbeat");
        server
            .send(Message::Text(r#"{"n":1}"#.into()))
            .await
            .expect("frame");

        assert_eq!(frames.recv().await.expect("frame").as_str(), r#"{"n":1}"#);
        assert_eq!(next_text(&mut server).await, "{}");

        transport.close();
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order_for_every_subscriber() {
        let (transport, mut server) = duplex_pair().await;
        let mut first = transport.inbound_frames().expect("subscribe");
        let mut second = transport.inbound_frames().expect("subscribe");
        assert_eq!(transport.subscriber_count(), 2);

        for n in 0..5 {
            server
                .send(Message::Text(format!("frame-{n}").into()))
                .await
                .expect("send");
        }

        for n in 0..5 {
            let expected = format!("frame-{n}");
            assert_eq!(first.recv().await.expect("first").as_str(), expected);
            assert_eq!(second.recv().await.expect("second").as_str(), expected);
        }

        transport.close();
    }

    #[tokio::test]
    async fn test_close_releases_subscribers() {
        let (transport, _server) = duplex_pair().await;
        let mut subs: Vec<_> = (0..3)
            .map(|_| transport.inbound_frames().expect("subscribe"))
            .collect();

        transport.close();
        transport.close();

        assert_eq!(transport.subscriber_count(), 0);
        assert!(transport.is_closed());
        for sub in &mut subs {
            assert!(matches!(sub.recv().await, Err(Error::ConnectionClosed)));
        }

        assert!(matches!(
            transport.send(Frame::new("late")).await,
            Err(Error::TransportClosed)
        ));
        assert!(matches!(
            transport.inbound_frames(),
            Err(Error::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_remote_close_terminates_subscribers() {
        let (transport, mut server) = duplex_pair().await;
        let mut frames = transport.inbound_frames().expect("subscribe");

        server.close(None).await.expect("close");

        assert!(matches!(frames.recv().await, Err(Error::ConnectionClosed)));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_socket_failure_terminates_with_connection_error() {
        let (transport, server) = duplex_pair().await;
        let mut frames = transport.inbound_frames().expect("subscribe");

        // Reset without a closing handshake.
        drop(server);

        let err = frames.recv().await.expect_err("reset");
        assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_termination_skips_buffered_frames() {
        let (transport, mut server) = duplex_pair().await;
        let frames = transport.inbound_frames().expect("subscribe");
        let mut sentinel = transport.inbound_frames().expect("subscribe");

        server.send(Message::Text("late".into())).await.expect("send");
        sentinel.recv().await.expect("delivered");
        transport.close();

        assert!(matches!(frames.termination().await, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_dropped_subscription_unregisters() {
        let (transport, _server) = duplex_pair().await;
        let frames = transport.inbound_frames().expect("subscribe");
        assert_eq!(transport.subscriber_count(), 1);

        drop(frames);
        assert_eq!(transport.subscriber_count(), 0);

        transport.close();
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        let (transport, mut server) = duplex_pair().await;
        let mut frames = transport.inbound_frames().expect("subscribe");

        server.send(Message::Text("a".into())).await.expect("send");
        let next = frames.next().await.expect("item").expect("frame");
        assert_eq!(next.as_str(), "a");

        transport.close();
        assert!(matches!(frames.next().await, Some(Err(Error::ConnectionClosed))));
        assert!(frames.next().await.is_none());
    }
}
