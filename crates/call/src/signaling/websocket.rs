//! WebSocket signaling channel with auto-reconnect
//!
//! Each `connect` that actually opens spawns one driver task. The driver is
//! the only reader of its socket, reconnects with the configured back-off and
//! replays the current room's `joinRoom` on every open. A generation counter
//! silences drivers that were superseded by [`SignalingChannel::disconnect`].

use super::channel::{ChannelEvent, ChannelEventSink, ChannelStatus, SignalingChannel};
use super::protocol::{InboundMessage, OutboundMessage};
use crate::config::SignalingRetryPolicy;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Signaling channel over a single WebSocket connection
pub struct WebSocketChannel {
    shared: Arc<Shared>,
}

struct Shared {
    url: String,
    policy: SignalingRetryPolicy,
    sink: ChannelEventSink,
    state: Mutex<DriverState>,
}

struct DriverState {
    status: ChannelStatus,
    generation: u64,
    room: Option<String>,
    writer: Option<mpsc::UnboundedSender<Message>>,
    shutdown: Option<watch::Sender<bool>>,
    drivers_started: u64,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>, policy: SignalingRetryPolicy, sink: ChannelEventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                policy,
                sink,
                state: Mutex::new(DriverState {
                    status: ChannelStatus::Idle,
                    generation: 0,
                    room: None,
                    writer: None,
                    shutdown: None,
                    drivers_started: 0,
                }),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Number of connection drivers spawned over the channel's lifetime
    pub fn drivers_started(&self) -> u64 {
        self.shared.state.lock().drivers_started
    }
}

impl SignalingChannel for WebSocketChannel {
    fn connect(&self) {
        let mut state = self.shared.state.lock();
        if matches!(state.status, ChannelStatus::Connecting | ChannelStatus::Open) {
            debug!("Signaling channel already {}", state.status);
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot connect signaling channel outside a runtime: {}", e);
                state.status = ChannelStatus::Closed;
                self.shared.sink.emit(ChannelEvent::ConnectError {
                    message: e.to_string(),
                });
                return;
            }
        };

        state.generation += 1;
        state.status = ChannelStatus::Connecting;
        state.drivers_started += 1;
        let generation = state.generation;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        state.shutdown = Some(shutdown_tx);
        drop(state);

        info!("Connecting signaling channel to {}", self.shared.url);
        runtime.spawn(run_driver(Arc::clone(&self.shared), generation, shutdown_rx));
    }

    fn join_room(&self, room_id: &str) {
        let frame = match OutboundMessage::join_room(room_id).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode joinRoom: {}", e);
                return;
            }
        };

        let mut state = self.shared.state.lock();
        state.room = Some(room_id.to_string());
        if state.status == ChannelStatus::Open {
            if let Some(writer) = &state.writer {
                if writer.send(Message::Text(frame)).is_ok() {
                    debug!("Joining room {}", room_id);
                    return;
                }
            }
        }
        drop(state);

        debug!("Channel not open, joining room {} after connect", room_id);
        self.connect();
    }

    fn send(&self, message: OutboundMessage) -> bool {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode '{}': {}", message.event(), e);
                return false;
            }
        };

        let state = self.shared.state.lock();
        match (state.status, &state.writer) {
            (ChannelStatus::Open, Some(writer)) => writer.send(Message::Text(frame)).is_ok(),
            (status, _) => {
                debug!("Dropping '{}' while channel is {}", message.event(), status);
                false
            }
        }
    }

    fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        let was_active = matches!(state.status, ChannelStatus::Connecting | ChannelStatus::Open);
        state.generation += 1;
        state.status = ChannelStatus::Closed;
        state.writer = None;
        state.room = None;
        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(true);
        }
        drop(state);

        if was_active {
            info!("Signaling channel disconnected");
        }
    }

    fn status(&self) -> ChannelStatus {
        self.shared.state.lock().status
    }

    fn current_room(&self) -> Option<String> {
        self.shared.state.lock().room.clone()
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    /// Emit `event` only if `generation` is still the active driver
    fn emit_if_current(&self, generation: u64, event: ChannelEvent) -> bool {
        let state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        self.sink.emit(event);
        true
    }

    fn dispatch(&self, generation: u64, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => {
                debug!("Received '{}'", message.event());
                self.emit_if_current(generation, ChannelEvent::Message(message));
            }
            Err(e) => warn!("Dropping signaling frame: {}", e),
        }
    }
}

async fn run_driver(shared: Arc<Shared>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let mut failures: u32 = 0;
    let mut drops: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let attempt = tokio::select! {
            result = connect_async(shared.url.as_str()) => result,
            _ = shutdown.changed() => return,
        };

        match attempt {
            Ok((socket, _response)) => {
                failures = 0;
                let (writer, outbound) = mpsc::unbounded_channel();
                let room = {
                    let mut state = shared.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.status = ChannelStatus::Open;
                    state.writer = Some(writer.clone());
                    shared.sink.emit(ChannelEvent::Connected);
                    if drops > 0 {
                        shared.sink.emit(ChannelEvent::Reconnected { attempt: drops });
                    }
                    state.room.clone()
                };
                info!("Signaling channel open ({})", shared.url);

                if let Some(room) = room {
                    match OutboundMessage::join_room(room.as_str()).to_frame() {
                        Ok(frame) => {
                            debug!("Joining room {}", room);
                            let _ = writer.send(Message::Text(frame));
                        }
                        Err(e) => warn!("Failed to encode joinRoom: {}", e),
                    }
                }
                drop(writer);

                let Some(reason) = pump(&shared, generation, socket, outbound, &mut shutdown).await
                else {
                    return;
                };

                {
                    let mut state = shared.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.status = ChannelStatus::Connecting;
                    state.writer = None;
                    shared.sink.emit(ChannelEvent::Disconnected {
                        reason: reason.clone(),
                    });
                }
                drops += 1;
                warn!("Signaling channel lost: {}", reason);
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Signaling connect attempt {}/{} failed: {}",
                    failures, shared.policy.max_attempts, e
                );
                if !shared.emit_if_current(
                    generation,
                    ChannelEvent::ConnectError {
                        message: e.to_string(),
                    },
                ) {
                    return;
                }

                if !shared.policy.should_retry(failures) {
                    let mut state = shared.state.lock();
                    if state.generation == generation {
                        state.status = ChannelStatus::Closed;
                        state.writer = None;
                        state.shutdown = None;
                        shared.sink.emit(ChannelEvent::ReconnectFailed);
                    }
                    warn!("Signaling channel gave up after {} attempts", failures);
                    return;
                }
            }
        }

        let delay = shared.policy.delay_for(failures.saturating_sub(1));
        debug!("Reconnecting signaling channel in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Move frames until the socket drops; `None` means shutdown was requested
async fn pump(
    shared: &Shared,
    generation: u64,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<String> {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return None;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = write.send(message).await {
                    return Some(format!("send failed: {}", e));
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.dispatch(generation, &text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.dispatch(generation, &text),
                    Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Some("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(e.to_string()),
            }
        }
    }
}
