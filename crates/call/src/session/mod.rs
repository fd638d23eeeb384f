//! Call session: state machine, recovery and the public handle

mod actor;
pub mod handle;
pub mod state;
pub mod status;

pub use handle::{CallSession, CallSessionBuilder};
pub use state::{SessionObservers, SessionSnapshot, SessionState};
