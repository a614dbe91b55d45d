use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::auth::middleware::Identity;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::protocol::{self, ServerEvent};
use crate::ws::{ConnectionHandle, Outbound};

/// Close code used when the client stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor for an authenticated WebSocket.
///
/// The socket is split: a writer task owns the sink and drains the
/// connection's queue, a heartbeat task pings the client, and this task
/// reads frames until the client leaves, the heartbeat fails or a newer
/// connection for the same user supersedes this one.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let user_id = identity.user_id().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (handle, rx) = ConnectionHandle::new(&user_id);
    let connection_id = handle.id;

    state.connections.register(&user_id, handle.clone());
    handle.send(ServerEvent::Connected {
        user_id: user_id.clone(),
        connection_id,
    });

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        role = identity.role.as_str(),
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));
    let writer_abort = writer_handle.abort_handle();

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = tokio::spawn(heartbeat_task(
        handle.clone(),
        pong_rx,
        state.settings.heartbeat_interval,
        state.settings.heartbeat_timeout,
    ));

    loop {
        let frame = tokio::select! {
            _ = handle.closed() => {
                tracing::debug!(connection_id = %connection_id, "Connection closed by server");
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &handle, &state, &identity).await;
                }
                Message::Binary(_) => {
                    handle.send(ServerEvent::error(
                        None,
                        &ChatError::InvalidMessage("binary frames are not supported".to_string()),
                    ));
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    handle.send_frame(Outbound::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    state.connections.unregister(&user_id, &handle);
    state.chat.connection_closed(&user_id, connection_id);

    // The writer stops on a queued close frame or once every handle clone
    // is gone.
    drop(handle);
    if timeout(WRITER_FLUSH_TIMEOUT, writer_handle).await.is_err() {
        writer_abort.abort();
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Forward queued frames to the socket, serializing events as JSON text.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = rx.recv().await {
        let (msg, last) = match frame {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode server event");
                    continue;
                }
            },
            Outbound::Ping(data) => (Message::Ping(data), false),
            Outbound::Pong(data) => (Message::Pong(data), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if ws_sender.send(msg).await.is_err() || last {
            break;
        }
    }
}

/// Ping every `every`; close the connection when no pong arrives within
/// `deadline`.
async fn heartbeat_task(
    handle: ConnectionHandle,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    every: Duration,
    deadline: Duration,
) {
    let mut ping_timer = interval(every);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Pongs that arrived unprompted don't count for this round
        while pong_rx.try_recv().is_ok() {}

        if !handle.send_frame(Outbound::Ping(Bytes::from_static(b"hb"))) {
            break;
        }

        match timeout(deadline, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(
                    user_id = %handle.user_id,
                    connection_id = %handle.id,
                    "Pong timeout, closing connection"
                );
                handle.close(CLOSE_GOING_AWAY, "Pong timeout");
                break;
            }
        }
    }
}
