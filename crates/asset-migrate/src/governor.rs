//! Deadline governor: RUNNING -> DRAINING -> STOPPED.
//!
//! While RUNNING, idle workers take new assets. The governor enters DRAINING
//! when the soft time budget expires, when the external cancellation token
//! fires (SIGINT/SIGTERM), or when the pool reports a fatal error. From then
//! on no new asset is handed out, and once the grace period has elapsed the
//! abort token fires so that transfers still in flight are dropped. The
//! owner moves the governor to STOPPED when the pool has finished.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Governor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    Running,
    Draining,
    Stopped,
}

/// What moved the governor out of RUNNING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// The soft time budget expired.
    Budget,
    /// External cancellation (signal).
    Cancelled,
    /// The pool hit an error it cannot continue past.
    Fatal,
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainReason::Budget => f.write_str("time budget reached"),
            DrainReason::Cancelled => f.write_str("cancellation requested"),
            DrainReason::Fatal => f.write_str("fatal error"),
        }
    }
}

struct Shared {
    state: watch::Sender<GovernorState>,
    reason: Mutex<Option<DrainReason>>,
    /// Cancelled on entering DRAINING.
    intake: CancellationToken,
    /// Cancelled when the grace period after DRAINING has elapsed.
    abort: CancellationToken,
    grace: Duration,
}

impl Shared {
    fn begin_drain(&self, reason: DrainReason) {
        let entered = self.state.send_if_modified(|state| {
            if *state == GovernorState::Running {
                *state = GovernorState::Draining;
                true
            } else {
                false
            }
        });
        if !entered {
            return;
        }
        if let Ok(mut slot) = self.reason.lock() {
            *slot = Some(reason);
        }
        match reason {
            DrainReason::Fatal => warn!(
                "Draining ({}): no new assets will be dispatched, {:?} grace for in-flight work",
                reason, self.grace
            ),
            _ => info!(
                "Draining ({}): no new assets will be dispatched, {:?} grace for in-flight work",
                reason, self.grace
            ),
        }
        self.intake.cancel();
    }
}

/// Enforces the soft budget and grace period for one run.
#[derive(Clone)]
pub struct DeadlineGovernor {
    shared: Arc<Shared>,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DeadlineGovernor {
    /// Start the clock. Must be called from within a Tokio runtime.
    ///
    /// A zero budget enters DRAINING before returning.
    pub fn start(budget: Duration, grace: Duration, external: &CancellationToken) -> Self {
        let (state, _) = watch::channel(GovernorState::Running);
        let shared = Arc::new(Shared {
            state,
            reason: Mutex::new(None),
            intake: CancellationToken::new(),
            abort: CancellationToken::new(),
            grace,
        });

        if budget.is_zero() {
            shared.begin_drain(DrainReason::Budget);
        } else if external.is_cancelled() {
            shared.begin_drain(DrainReason::Cancelled);
        }

        let timer_shared = shared.clone();
        let external = external.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(budget) => timer_shared.begin_drain(DrainReason::Budget),
                _ = external.cancelled() => timer_shared.begin_drain(DrainReason::Cancelled),
                _ = timer_shared.intake.cancelled() => {}
            }
            tokio::time::sleep(timer_shared.grace).await;
            if *timer_shared.state.borrow() == GovernorState::Draining {
                warn!("Grace period expired, aborting in-flight transfers");
            }
            timer_shared.abort.cancel();
        });

        Self {
            shared,
            timer: Arc::new(Mutex::new(Some(timer))),
        }
    }

    pub fn state(&self) -> GovernorState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<GovernorState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == GovernorState::Running
    }

    pub fn drain_reason(&self) -> Option<DrainReason> {
        self.shared.reason.lock().ok().and_then(|r| *r)
    }

    /// Fires when new work must stop being dispatched.
    pub fn intake_token(&self) -> CancellationToken {
        self.shared.intake.clone()
    }

    /// Fires when in-flight work must be abandoned.
    pub fn abort_token(&self) -> CancellationToken {
        self.shared.abort.clone()
    }

    /// Enter DRAINING now. No-op unless RUNNING.
    pub fn drain(&self, reason: DrainReason) {
        self.shared.begin_drain(reason);
    }

    /// Enter STOPPED and cancel the timer.
    pub fn stop(&self) {
        self.shared.state.send_replace(GovernorState::Stopped);
        self.shared.intake.cancel();
        if let Some(timer) = self.timer.lock().ok().and_then(|mut t| t.take()) {
            timer.abort();
        }
    }
}

impl fmt::Debug for DeadlineGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineGovernor")
            .field("state", &self.state())
            .field("reason", &self.drain_reason())
            .finish()
    }
}
