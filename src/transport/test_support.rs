//! Test helpers shared by transport, chat and client tests.

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing_subscriber::EnvFilter;

use crate::protocol::{ConnectionKind, Frame};

use super::FramedTransport;

/// Installs a test-writer subscriber once; later calls are no-ops.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A transport wired to an in-memory server socket.
pub(crate) async fn duplex_pair() -> (FramedTransport, WebSocketStream<DuplexStream>) {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, server) = tokio::join!(
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
    );
    (FramedTransport::from_stream(client), server)
}

/// Reads the next text message, skipping control messages.
pub(crate) async fn next_text<S>(ws: &mut WebSocketStream<S>) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
            Some(Ok(_)) => {}
            other => panic!("expected text message, got {other:?}"),
        }
    }
}

/// Wire JSON of a single-candidate turn.
pub(crate) fn turn_json(chat_id: &str, turn_id: &str, is_human: bool, text: &str, is_final: bool) -> Value {
    json!({
        "turn_key": {"chat_id": chat_id, "turn_id": turn_id},
        "author": {
            "author_id": if is_human { "user-1" } else { "char-1" },
            "name": if is_human { "me" } else { "Ada" },
            "is_human": is_human
        },
        "candidates": [{
            "candidate_id": format!("{turn_id}-c"),
            "raw_content": text,
            "is_final": is_final
        }],
        "primary_candidate_id": format!("{turn_id}-c")
    })
}

/// A turn frame shaped for the given connection kind.
pub(crate) fn turn_frame(
    kind: ConnectionKind,
    chat_id: &str,
    turn_id: &str,
    is_human: bool,
    text: &str,
    is_final: bool,
) -> Frame {
    let turn = turn_json(chat_id, turn_id, is_human, text, is_final);
    let value = match kind {
        ConnectionKind::GroupChat => json!({"push": {"data": {"turn": turn}}}),
        _ => json!({"command": "update_turn", "turn": turn}),
    };
    Frame::new(value.to_string())
}
