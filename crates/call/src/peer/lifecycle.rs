//! Peer connection recovery
//!
//! Bounded ICE-restart attempts. A `failed` link restarts immediately while
//! attempts remain; a `disconnected` link arms one delayed check that
//! restarts only if the link has not come back by the time it fires.

use crate::config::RecoveryPolicy;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of asking for another restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Go ahead; this is attempt number `n` (1-based)
    Attempt(u32),
    /// The cap is reached; recovery now needs a manual rejoin
    Exhausted,
}

struct PendingRestart {
    token: u64,
    handle: JoinHandle<()>,
}

/// ICE-restart counter and the single pending restart timer
///
/// Owned by the session task; the timer only posts its token back, the
/// decision to restart is taken by the owner via [`take_fired`](Self::take_fired).
pub struct ReconnectionController {
    policy: RecoveryPolicy,
    attempts: u32,
    exhausted: bool,
    pending: Option<PendingRestart>,
    next_token: u64,
}

impl ReconnectionController {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            exhausted: false,
            pending: None,
            next_token: 0,
        }
    }

    /// Restart attempts made since the link was last connected
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_ice_restarts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn restart_delay(&self) -> Duration {
        self.policy.restart_delay()
    }

    /// Count one restart attempt if the cap allows it
    pub fn begin_attempt(&mut self) -> RestartDecision {
        if self.attempts >= self.policy.max_ice_restarts {
            if !self.exhausted {
                warn!(
                    "ICE restart limit reached ({} attempts)",
                    self.policy.max_ice_restarts
                );
            }
            self.exhausted = true;
            return RestartDecision::Exhausted;
        }

        self.attempts += 1;
        info!(
            "ICE restart attempt {}/{}",
            self.attempts, self.policy.max_ice_restarts
        );
        RestartDecision::Attempt(self.attempts)
    }

    /// Arm the delayed restart check
    ///
    /// `fire` runs with the timer's token once the delay elapses. Nothing is
    /// armed while another check is pending or after recovery gave up.
    /// Returns the token of the armed timer.
    pub fn schedule<F>(&mut self, fire: F) -> Option<u64>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if self.pending.is_some() {
            debug!("Restart check already pending");
            return None;
        }
        if self.exhausted {
            debug!("Recovery exhausted, not scheduling a restart check");
            return None;
        }

        self.next_token += 1;
        let token = self.next_token;
        let delay = self.policy.restart_delay();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(token);
        });
        self.pending = Some(PendingRestart { token, handle });

        debug!("Restart check {} in {:?}", token, delay);
        Some(token)
    }

    /// Claim a timer firing; `false` for a cancelled or superseded timer
    pub fn take_fired(&mut self, token: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.token == token => {
                self.pending = None;
                true
            }
            _ => {
                debug!("Ignoring stale restart check {}", token);
                false
            }
        }
    }

    pub fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
            debug!("Cancelled restart check {}", pending.token);
        }
    }

    /// The link is up again: cancel the timer and start counting from zero
    pub fn on_connected(&mut self) {
        self.cancel_pending();
        if self.attempts > 0 || self.exhausted {
            info!("Peer link recovered after {} restart(s)", self.attempts);
        }
        self.attempts = 0;
        self.exhausted = false;
    }

    /// Forget every attempt and cancel the timer
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.attempts = 0;
        self.exhausted = false;
    }
}

impl Drop for ReconnectionController {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
