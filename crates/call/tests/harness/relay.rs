//! In-process signaling relay
//!
//! Speaks the same JSON `{"event","data"}` frames as the production server:
//! `joinRoom` answers with `existingPeers` and announces `peerJoined` to the
//! room; `offer`/`answer`/`iceCandidate` are stamped with `senderId` and
//! forwarded to `targetPeerId` (or the rest of the room); a closed socket
//! is announced as `peerDisconnected`.

use super::HarnessResult;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

struct Client {
    room: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    accepted: u64,
    clients: HashMap<String, Client>,
    joins: Vec<(String, String)>,
    relayed: Vec<(String, Value)>,
}

impl RelayState {
    fn room_members(&self, room: &str, except: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .clients
            .iter()
            .filter(|(id, client)| id.as_str() != except && client.room.as_deref() == Some(room))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort();
        members
    }

    fn send_to(&self, id: &str, frame: Value) {
        if let Some(client) = self.clients.get(id) {
            let _ = client.tx.send(Message::Text(frame.to_string()));
        }
    }
}

pub struct SignalingRelay {
    addr: SocketAddr,
    state: Arc<Mutex<RelayState>>,
    accept_task: JoinHandle<()>,
}

impl SignalingRelay {
    pub async fn start() -> HarnessResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(RelayState::default()));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(serve(state, stream));
            }
        });

        info!("Signaling relay listening on {}", addr);
        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// WebSocket connections accepted so far
    pub fn accepted(&self) -> u64 {
        self.state.lock().accepted
    }

    pub fn active_clients(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// `(client id, room)` for every `joinRoom` received
    pub fn joins(&self) -> Vec<(String, String)> {
        self.state.lock().joins.clone()
    }

    /// Frames of `event` forwarded so far
    pub fn relayed(&self, event: &str) -> Vec<Value> {
        self.state
            .lock()
            .relayed
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Send an arbitrary frame to every client
    pub fn broadcast(&self, frame: Value) {
        let state = self.state.lock();
        for id in state.clients.keys() {
            state.send_to(id, frame.clone());
        }
    }

    /// Close every socket from the server side
    pub fn kick_all(&self) {
        let state = self.state.lock();
        for client in state.clients.values() {
            let _ = client.tx.send(Message::Close(None));
        }
    }

    /// Stop accepting and close every socket
    pub fn shutdown(&self) {
        self.kick_all();
        self.accept_task.abort();
    }
}

impl Drop for SignalingRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(state: Arc<Mutex<RelayState>>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Relay handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let id = {
        let mut state = state.lock();
        state.next_id += 1;
        state.accepted += 1;
        let id = format!("peer-{}", state.next_id);
        state
            .clients
            .insert(id.clone(), Client { room: None, tx });
        id
    };
    debug!("Relay client {} connected", id);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = read.next().await {
        match frame {
            Message::Text(text) => handle_frame(&state, &id, &text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    let mut state = state.lock();
    if let Some(Client {
        room: Some(room), ..
    }) = state.clients.remove(&id)
    {
        for member in state.room_members(&room, &id) {
            state.send_to(
                &member,
                json!({"event": "peerDisconnected", "data": {"peerId": id}}),
            );
        }
    }
    writer.abort();
    debug!("Relay client {} gone", id);
}

fn handle_frame(state: &Mutex<RelayState>, id: &str, text: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let event = frame["event"].as_str().unwrap_or_default().to_string();
    let mut data = frame.get("data").cloned().unwrap_or(Value::Null);
    let mut state = state.lock();

    match event.as_str() {
        "joinRoom" => {
            let Some(room) = data.as_str().map(str::to_string) else {
                return;
            };
            let existing = state.room_members(&room, id);
            if let Some(client) = state.clients.get_mut(id) {
                client.room = Some(room.clone());
            }
            state.joins.push((id.to_string(), room));
            state.send_to(id, json!({"event": "existingPeers", "data": existing}));
            for member in &existing {
                state.send_to(member, json!({"event": "peerJoined", "data": {"peerId": id}}));
            }
        }
        "offer" | "answer" | "iceCandidate" => {
            if let Some(fields) = data.as_object_mut() {
                fields.insert("senderId".to_string(), json!(id));
            }
            let targets = match data.get("targetPeerId").and_then(Value::as_str) {
                Some(target) => vec![target.to_string()],
                None => {
                    let room = state.clients.get(id).and_then(|c| c.room.clone());
                    room.map(|room| state.room_members(&room, id))
                        .unwrap_or_default()
                }
            };
            state.relayed.push((event.clone(), data.clone()));
            for target in targets {
                state.send_to(&target, json!({"event": event, "data": data}));
            }
        }
        _ => debug!("Relay ignoring {}", event),
    }
}
