//! Worker messaging channel: one WebSocket per worker process.
//!
//! Each connection runs its own task. Inbound text frames are decoded and
//! handed to the controller in arrival order; `health_check` handling is
//! spawned off so a promotion's handoff wait never blocks the frames that
//! follow. Outbound frames come from the connection's outbox, which the
//! controller drops on eviction.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use baton_core::{ConnectionId, GatewayEvent, ProtocolError, WorkerEvent};
use baton_rollout::Controller;

use crate::GatewayState;

/// GET /ws
pub async fn upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    let id = state.next_connection_id();
    let controller = Arc::clone(&state.controller);
    ws.on_upgrade(move |socket| serve(controller, id, socket))
}

/// What an inbound frame asks of the connection loop.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Event(WorkerEvent),
    /// Transport keep-alives; axum answers pings itself.
    Control,
    Close,
}

/// Classify one WebSocket message.
pub fn decode_message(message: Message) -> Result<Inbound, ProtocolError> {
    match message {
        Message::Text(text) => WorkerEvent::decode(text.as_str()).map(Inbound::Event),
        Message::Binary(bytes) => Err(ProtocolError::UnsupportedFrame(format!(
            "binary frame of {} bytes",
            bytes.len()
        ))),
        Message::Ping(_) | Message::Pong(_) => Ok(Inbound::Control),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

async fn serve(controller: Arc<Controller>, id: ConnectionId, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.connect(id.clone(), tx).await;
    info!(worker = %id, "channel opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(worker = %id, error = %e, "channel read failed");
                        break;
                    }
                    None => break,
                };
                match decode_message(message) {
                    Ok(Inbound::Event(event)) => dispatch(&controller, &id, event).await,
                    Ok(Inbound::Control) => {}
                    Ok(Inbound::Close) => break,
                    Err(err) => {
                        controller.malformed(&id, &err).await;
                        // Flush whatever the eviction queued, then hang up.
                        while let Ok(event) = rx.try_recv() {
                            if !send_event(&mut socket, &id, &event).await {
                                break;
                            }
                        }
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            outbound = rx.recv() => match outbound {
                Some(event) => {
                    if !send_event(&mut socket, &id, &event).await {
                        break;
                    }
                }
                None => {
                    debug!(worker = %id, "outbox closed by gateway");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    controller.disconnect(&id).await;
    info!(worker = %id, "channel closed");
}

async fn dispatch(controller: &Arc<Controller>, id: &ConnectionId, event: WorkerEvent) {
    if matches!(event, WorkerEvent::HealthCheck(_)) {
        let controller = Arc::clone(controller);
        let id = id.clone();
        tokio::spawn(async move { controller.handle(&id, event).await });
    } else {
        controller.handle(id, event).await;
    }
}

/// Write one frame. Returns false once the socket is unusable.
async fn send_event(socket: &mut WebSocket, id: &ConnectionId, event: &GatewayEvent) -> bool {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(worker = %id, error = %e, "failed to encode frame");
            return true;
        }
    };
    match socket.send(Message::Text(frame.into())).await {
        Ok(()) => true,
        Err(e) => {
            debug!(worker = %id, error = %e, "channel write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_decode_to_events() {
        let inbound = decode_message(Message::Text(r#"{"t":"heartbeat","d":{}}"#.into())).unwrap();
        assert_eq!(inbound, Inbound::Event(WorkerEvent::Heartbeat));
    }

    #[test]
    fn binary_frames_are_malformed() {
        let err = decode_message(Message::Binary(vec![1, 2, 3].into())).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedFrame(_)));
    }

    #[test]
    fn unknown_events_are_malformed() {
        let err = decode_message(Message::Text(r#"{"t":"reboot","d":{}}"#.into())).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(decode_message(Message::Text("not json".into())).is_err());
    }

    #[test]
    fn control_frames_pass_through() {
        assert_eq!(
            decode_message(Message::Ping(Default::default())).unwrap(),
            Inbound::Control
        );
        assert_eq!(decode_message(Message::Close(None)).unwrap(), Inbound::Close);
    }
}
