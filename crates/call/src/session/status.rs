//! Status messages published alongside the state

pub const SIGNALING_CONNECTED: &str = "Connected to signaling server";
pub const SIGNALING_LOST: &str = "Lost connection to signaling server, reconnecting";
pub const SIGNALING_GAVE_UP: &str = "Could not reach the signaling server";
pub const WAITING_FOR_PEER: &str = "Waiting for the other participant";
pub const PEER_JOINED: &str = "Participant joined, connecting";
pub const IN_CALL: &str = "In call";
pub const PEER_LEFT: &str = "The other participant left the call";
pub const PEER_DISCONNECTED: &str = "The other participant disconnected";
pub const RECOVERY_FAILED: &str = "Connection lost. Rejoin the call to reconnect.";
pub const CALL_ENDED: &str = "Call ended";

pub fn joining(room_id: &str) -> String {
    format!("Joining room {}", room_id)
}

pub fn connect_error(message: &str) -> String {
    format!("Signaling connection failed: {}", message)
}

pub fn room_error(message: &str) -> String {
    format!("Room error: {}", message)
}

pub fn restarting(attempt: u32, max: u32) -> String {
    format!("Connection lost, reconnecting ({}/{})", attempt, max)
}

pub fn peer_setup_failed(message: &str) -> String {
    format!("Could not set up the call: {}", message)
}
