use crate::types::CloseReason;

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, Instrument};

/// Two independent countdowns that end a call: an idle timer re-armed on every turn, and a
/// one-shot ceiling on the call's total length.  Neither closes anything itself; firing sends a
/// single close request to whoever drives the call.
pub struct Watchdog {
    idle_timeout: Duration,
    max_duration: Duration,
    close_requests: mpsc::UnboundedSender<CloseReason>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    duration_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(
        idle_timeout: Duration,
        max_duration: Duration,
        close_requests: mpsc::UnboundedSender<CloseReason>,
    ) -> Self {
        Self {
            idle_timeout,
            max_duration,
            close_requests,
            idle_timer: Mutex::new(None),
            duration_timer: Mutex::new(None),
        }
    }

    /// Arm the call-length ceiling.  Only the first call has any effect.
    pub fn arm_duration(&self) {
        let mut timer = self
            .duration_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if timer.is_some() {
            return;
        }
        *timer = Some(self.spawn_timer(self.max_duration, CloseReason::MaxDuration));
    }

    /// Restart the inactivity countdown, cancelling whichever one was pending.
    pub fn reset_idle(&self) {
        let mut timer = self.idle_timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = timer.take() {
            pending.abort();
        }
        *timer = Some(self.spawn_timer(self.idle_timeout, CloseReason::Idle));
    }

    /// Cancel both timers.
    pub fn stop(&self) {
        for timer in [&self.idle_timer, &self.duration_timer] {
            if let Some(pending) = timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
                pending.abort();
            }
        }
        debug!("watchdog stopped");
    }

    fn spawn_timer(&self, after: Duration, reason: CloseReason) -> JoinHandle<()> {
        let close_requests = self.close_requests.clone();
        let timer = async move {
            sleep(after).await;
            match reason {
                CloseReason::Idle => {
                    info!(secs = after.as_secs(), "no activity on the line; closing the call")
                }
                _ => info!(
                    secs = after.as_secs(),
                    "maximum call duration reached; closing the call"
                ),
            }
            // the receiver is gone once the call is already over
            let _ = close_requests.send(reason);
        };
        tokio::spawn(timer.in_current_span())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
