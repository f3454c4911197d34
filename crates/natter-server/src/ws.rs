//! The live connection: `GET /ws`, upgraded once the caller's identity is
//! bound.
//!
//! Each socket gets a writer task draining the connection's outbound queue,
//! while this task reads inbound frames in arrival order. A frame that does
//! not match the inbound schema closes the socket; a rejected send is
//! answered with an error frame and the socket stays open.

use std::time::Duration;

use axum::{
  extract::{
    State,
    ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
  },
  response::{IntoResponse, Response},
};
use futures_util::{SinkExt as _, Stream, StreamExt as _};
use natter_core::{
  UserId,
  store::ChatStore,
  wire::{ErrorFrame, InboundFrame, OutboundFrame},
};
use natter_hub::{Broker, ConnectionHandle};
use tokio::sync::{mpsc, watch};

use crate::{AppState, auth::Identity, error::Error};

/// How long the writer may keep flushing after the reader stops.
const WRITER_GRACE: Duration = Duration::from_secs(1);

pub async fn upgrade<S, B>(
  State(state): State<AppState<S, B>>,
  Identity(user): Identity,
  ws: WebSocketUpgrade,
) -> Response
where
  S: ChatStore + 'static,
  B: Broker,
{
  if state.hub.is_shutting_down() {
    return Error::Hub(natter_hub::Error::ShuttingDown).into_response();
  }
  ws.on_upgrade(move |socket| serve_connection(socket, state, user))
}

async fn serve_connection<S, B>(socket: WebSocket, state: AppState<S, B>, user: UserId)
where
  S: ChatStore + 'static,
  B: Broker,
{
  let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.config.outbound_buffer.max(1));
  let handle = match state.hub.connect(user, tx.clone()).await {
    Ok(handle) => handle,
    Err(e) => {
      tracing::warn!(user = %user, error = %e, "connection refused");
      return;
    }
  };

  let (mut sink, mut stream) = socket.split();

  let mut writer = tokio::spawn(async move {
    while let Some(frame) = rx.recv().await {
      let text = match frame.to_json() {
        Ok(text) => text,
        Err(e) => {
          tracing::warn!(error = %e, "could not encode outbound frame");
          continue;
        }
      };
      if sink.send(WsMessage::Text(text.into())).await.is_err() {
        return;
      }
    }
    let _ = sink.close().await;
  });

  let exit = read_loop(&state, &handle, &tx, &mut stream, &mut writer).await;

  state.hub.disconnect(&handle);
  drop(tx);

  // With every sender gone the writer flushes what is queued, then closes.
  if exit != Exit::WriterGone && tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
    writer.abort();
  }
}

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
  Shutdown,
  WriterGone,
  Closed,
}

/// Read inbound frames in arrival order until the peer closes, a frame is
/// malformed, the writer ends, or the hub starts draining.
async fn read_loop<S, B, St, W>(
  state: &AppState<S, B>,
  handle: &ConnectionHandle,
  tx: &mpsc::Sender<OutboundFrame>,
  stream: &mut St,
  writer: &mut W,
) -> Exit
where
  S: ChatStore + 'static,
  B: Broker,
  St: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
  W: Future + Unpin,
{
  let mut shutdown = state.hub.shutdown_signal();
  loop {
    tokio::select! {
      _ = stopped(&mut shutdown) => {
        tracing::debug!(connection = %handle.id, "closing for shutdown");
        return Exit::Shutdown;
      }
      _ = &mut *writer => return Exit::WriterGone,
      next = stream.next() => {
        let keep_open = match next {
          Some(Ok(WsMessage::Text(text))) => {
            handle_frame(state, handle, tx, text.as_str().as_bytes()).await
          }
          Some(Ok(WsMessage::Binary(bytes))) => handle_frame(state, handle, tx, &bytes).await,
          Some(Ok(WsMessage::Close(_))) | None => false,
          Some(Ok(_)) => true,
          Some(Err(e)) => {
            tracing::debug!(connection = %handle.id, error = %e, "socket error");
            false
          }
        };
        if !keep_open {
          return Exit::Closed;
        }
      }
    }
  }
}

/// Handle one inbound frame. Returns whether the socket stays open.
async fn handle_frame<S, B>(
  state: &AppState<S, B>,
  handle: &ConnectionHandle,
  tx: &mpsc::Sender<OutboundFrame>,
  raw: &[u8],
) -> bool
where
  S: ChatStore + 'static,
  B: Broker,
{
  let frame = match InboundFrame::parse(raw) {
    Ok(frame) => frame,
    Err(e) => {
      tracing::debug!(connection = %handle.id, error = %e, "malformed frame; closing");
      reply(tx, ErrorFrame { error: e.to_string(), conversation_id: None });
      return false;
    }
  };

  let conversation = frame.conversation_id;
  match state.hub.send_message(handle.user_id, frame).await {
    Ok(outcome) => {
      tracing::debug!(
        connection = %handle.id,
        conversation = %conversation,
        message = %outcome.message.id,
        pushed = outcome.pushed,
        "message accepted",
      );
    }
    Err(e) => {
      tracing::debug!(connection = %handle.id, conversation = %conversation, error = %e, "send rejected");
      reply(tx, ErrorFrame { error: e.to_string(), conversation_id: Some(conversation) });
    }
  }
  true
}

async fn stopped(signal: &mut watch::Receiver<bool>) {
  let _ = signal.wait_for(|stop| *stop).await;
}

fn reply(tx: &mpsc::Sender<OutboundFrame>, frame: ErrorFrame) {
  if tx.try_send(OutboundFrame::Error(frame)).is_err() {
    tracing::debug!("outbound queue unavailable; error frame dropped");
  }
}

#[cfg(test)]
mod tests {
  use std::future;

  use futures_util::stream;
  use natter_core::{
    ConversationId,
    conversation::ConversationKind,
    wire::Envelope,
  };

  use super::*;
  use crate::{ServerConfig, tests::fixture};

  type Incoming = Result<WsMessage, axum::Error>;

  fn text(raw: &str) -> Incoming { Ok(WsMessage::Text(raw.to_owned().into())) }

  fn error_frame(rx: &mut mpsc::Receiver<OutboundFrame>) -> ErrorFrame {
    match rx.try_recv() {
      Ok(OutboundFrame::Error(frame)) => frame,
      other => panic!("expected an error frame, got {other:?}"),
    }
  }

  async fn envelope(rx: &mut mpsc::Receiver<OutboundFrame>) -> Envelope {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
      Ok(Some(OutboundFrame::Message(env))) => env,
      other => panic!("expected a message, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn frame_with_unknown_field_closes_with_error_reply() {
    let f = fixture(ServerConfig::default()).await;
    let (conn_tx, _conn_rx) = mpsc::channel(8);
    let handle = f.state.hub.connect(f.alice, conn_tx).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);

    let keep_open = handle_frame(
      &f.state,
      &handle,
      &tx,
      br#"{"conversationID":1,"content":"x","extra":1}"#,
    )
    .await;

    assert!(!keep_open);
    let frame = error_frame(&mut rx);
    assert_eq!(frame.conversation_id, None);
    assert!(!frame.error.is_empty());
  }

  #[tokio::test]
  async fn rejected_send_names_the_conversation_and_stays_open() {
    let f = fixture(ServerConfig::default()).await;
    let conv = f
      .state
      .hub
      .create_conversation(f.alice, ConversationKind::Direct, None, [f.bob])
      .await
      .unwrap();

    let (conn_tx, mut conn_rx) = mpsc::channel(8);
    let handle = f.state.hub.connect(f.carol, conn_tx).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);

    let raw = format!(r#"{{"conversationID":{},"content":"let me in"}}"#, conv.id);
    assert!(handle_frame(&f.state, &handle, &tx, raw.as_bytes()).await);

    let frame = error_frame(&mut rx);
    assert_eq!(frame.conversation_id, Some(conv.id));
    assert!(conn_rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn accepted_send_has_no_reply_and_reaches_members() {
    let f = fixture(ServerConfig::default()).await;
    let conv = f
      .state
      .hub
      .create_conversation(f.alice, ConversationKind::Direct, None, [f.bob])
      .await
      .unwrap();

    let (alice_tx, _alice_rx) = mpsc::channel(8);
    let (bob_tx, mut bob_rx) = mpsc::channel(8);
    let handle = f.state.hub.connect(f.alice, alice_tx).await.unwrap();
    f.state.hub.connect(f.bob, bob_tx).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);

    let raw = format!(r#"{{"conversationID":{},"content":"hi bob"}}"#, conv.id);
    assert!(handle_frame(&f.state, &handle, &tx, raw.as_bytes()).await);

    let env = envelope(&mut bob_rx).await;
    assert_eq!(env.content, "hi bob");
    assert_eq!(env.sender_id, f.alice);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn reader_keeps_going_after_a_rejected_send() {
    let f = fixture(ServerConfig::default()).await;
    let (conn_tx, _conn_rx) = mpsc::channel(8);
    let handle = f.state.hub.connect(f.alice, conn_tx).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);

    let mut incoming = stream::iter([
      text(r#"{"conversationID":404,"content":"nobody here"}"#),
      Ok(WsMessage::Ping(Default::default())),
      text("not a frame"),
    ])
    .chain(stream::pending());
    let mut writer = future::pending::<()>();

    let exit = tokio::time::timeout(
      Duration::from_secs(2),
      read_loop(&f.state, &handle, &tx, &mut incoming, &mut writer),
    )
    .await
    .unwrap();

    assert_eq!(exit, Exit::Closed);
    assert_eq!(error_frame(&mut rx).conversation_id, Some(ConversationId(404)));
    assert_eq!(error_frame(&mut rx).conversation_id, None);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn drain_closes_an_idle_reader() {
    let f = fixture(ServerConfig::default()).await;
    let (conn_tx, _conn_rx) = mpsc::channel(8);
    let handle = f.state.hub.connect(f.alice, conn_tx).await.unwrap();
    let (tx, _rx) = mpsc::channel(8);

    let mut incoming = stream::pending::<Incoming>();
    let mut writer = future::pending::<()>();

    let (exit, drained) = tokio::time::timeout(
      Duration::from_secs(2),
      async {
        tokio::join!(
          read_loop(&f.state, &handle, &tx, &mut incoming, &mut writer),
          f.state.hub.drain(Duration::from_millis(50)),
        )
      },
    )
    .await
    .unwrap();

    assert_eq!(exit, Exit::Shutdown);
    // The handle is only released by the caller of `read_loop`.
    assert!(!drained);
  }

  #[tokio::test]
  async fn writer_ending_stops_the_reader() {
    let f = fixture(ServerConfig::default()).await;
    let (conn_tx, _conn_rx) = mpsc::channel(8);
    let handle = f.state.hub.connect(f.alice, conn_tx).await.unwrap();
    let (tx, _rx) = mpsc::channel(8);

    let mut incoming = stream::pending::<Incoming>();
    let mut writer = future::ready(());

    let exit = read_loop(&f.state, &handle, &tx, &mut incoming, &mut writer).await;
    assert_eq!(exit, Exit::WriterGone);
  }
}
