use axum::{
  extract::{
    ws::{Message, WebSocket, WebSocketUpgrade},
    State,
  },
  response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::events::{BroadcastEmitter, BroadcastEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
  #[serde(rename = "type")]
  pub msg_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payload: Option<serde_json::Value>,
}

impl WsMessage {
  fn control(msg_type: &str) -> Self {
    Self {
      msg_type: msg_type.to_string(),
      event: None,
      payload: None,
    }
  }

  fn event(event: BroadcastEvent) -> Self {
    Self {
      msg_type: "event".to_string(),
      event: Some(event.event_type),
      payload: Some(event.payload),
    }
  }
}

#[derive(Clone, Default)]
pub struct WsState {
  event_emitter: Option<Arc<BroadcastEmitter>>,
}

impl WsState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_emitter(emitter: Arc<BroadcastEmitter>) -> Self {
    Self {
      event_emitter: Some(emitter),
    }
  }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
  ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
  sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
  msg: &WsMessage,
) -> bool {
  match serde_json::to_string(msg) {
    Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
    Err(e) => {
      log::error!("[ws] Failed to serialize message: {e}");
      true
    }
  }
}

async fn handle_socket(socket: WebSocket, state: WsState) {
  let (mut sender, mut receiver) = socket.split();

  // Subscribe before greeting so nothing emitted after "connected" is missed
  let mut event_rx = state.event_emitter.as_ref().map(|e| e.subscribe());

  log::info!("[ws] Client connected");

  if !send_json(&mut sender, &WsMessage::control("connected")).await {
    return;
  }

  loop {
    tokio::select! {
      Some(msg) = receiver.next() => {
        match msg {
          Ok(Message::Text(text)) => {
            match serde_json::from_str::<WsMessage>(&text) {
              Ok(ws_msg) if ws_msg.msg_type == "ping" => {
                if !send_json(&mut sender, &WsMessage::control("pong")).await {
                  break;
                }
              }
              Ok(ws_msg) => {
                log::debug!("[ws] Received unknown message type: {}", ws_msg.msg_type);
              }
              Err(e) => {
                log::debug!("[ws] Ignoring malformed message: {e}");
              }
            }
          }
          Ok(Message::Ping(data)) => {
            let _ = sender.send(Message::Pong(data)).await;
          }
          Ok(Message::Close(_)) => {
            log::info!("[ws] Client disconnected");
            break;
          }
          Err(e) => {
            log::error!("[ws] Error receiving message: {e}");
            break;
          }
          _ => {}
        }
      }

      Some(event) = async {
        match event_rx.as_mut() {
          Some(rx) => loop {
            match rx.recv().await {
              Ok(event) => break Some(event),
              Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("[ws] Client lagging, dropped {skipped} events");
              }
              Err(tokio::sync::broadcast::error::RecvError::Closed) => break None,
            }
          },
          None => std::future::pending::<Option<BroadcastEvent>>().await,
        }
      } => {
        if !send_json(&mut sender, &WsMessage::event(event)).await {
          log::error!("[ws] Failed to send event to client");
          break;
        }
      }

      else => break,
    }
  }

  log::info!("[ws] WebSocket connection closed");
}
