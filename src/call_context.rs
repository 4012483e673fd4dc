use crate::consts::{DURATION_FAREWELL, FAREWELL_TIMEOUT, GREETING, IDLE_FAREWELL, UNKNOWN_CALLER};
use crate::engine::{ConversationEngine, SessionHandler};
use crate::reporter::Reporter;
use crate::types::{
    CallPhase, CallRecord, CloseReason, ParticipantAttributes, Role, TranscriptTurn,
};
use crate::utils::{iso8601, rome_now};
use crate::watchdog::Watchdog;

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Everything that belongs to one call.  Handlers get the context instead of reaching for
/// process-wide state.
pub struct CallContext {
    engine: Arc<dyn ConversationEngine>,
    watchdog: Watchdog,
    reporter: Reporter,
    attributes: ParticipantAttributes,
    started_at: OffsetDateTime,
    /// Conversation so far, in arrival order
    transcript: Mutex<Vec<TranscriptTurn>>,
    phase: Mutex<CallPhase>,
    /// Held for the whole of a turn so replies are never generated concurrently
    turn_lock: tokio::sync::Mutex<()>,
}

impl CallContext {
    pub fn new(
        engine: Arc<dyn ConversationEngine>,
        watchdog: Watchdog,
        reporter: Reporter,
        attributes: ParticipantAttributes,
    ) -> Self {
        Self {
            engine,
            watchdog,
            reporter,
            attributes,
            started_at: rome_now(),
            transcript: Mutex::new(vec![]),
            phase: Mutex::new(CallPhase::Active),
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> CallPhase {
        *lock(&self.phase)
    }

    #[cfg(test)]
    pub fn transcript(&self) -> Vec<TranscriptTurn> {
        lock(&self.transcript).clone()
    }

    fn push_turn(&self, turn: TranscriptTurn) {
        lock(&self.transcript).push(turn);
    }

    fn call_record(&self, ended_at: OffsetDateTime) -> CallRecord {
        let duration = ended_at - self.started_at;
        CallRecord {
            called_number: self
                .attributes
                .phone_number
                .clone()
                .unwrap_or_else(|| UNKNOWN_CALLER.to_string()),
            chat_transcript: lock(&self.transcript).clone(),
            start_time: iso8601(self.started_at),
            end_time: iso8601(ended_at),
            duration_seconds: duration.as_seconds_f64(),
        }
    }

    async fn reply_to(&self, input: &str) {
        let reply = match self.engine.generate_reply(input).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error=%e, "failed to generate reply; dropping turn");
                return;
            }
        };
        if let Err(e) = self.engine.say(&reply).await {
            error!(error=%e, "failed to speak reply; dropping turn");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn farewell_for(reason: CloseReason) -> Option<&'static str> {
    match reason {
        CloseReason::Idle => Some(IDLE_FAREWELL),
        CloseReason::MaxDuration => Some(DURATION_FAREWELL),
        CloseReason::CallerHungUp | CloseReason::EngineClosed => None,
    }
}

#[async_trait]
impl SessionHandler for CallContext {
    async fn session_started(&self) {
        self.watchdog.arm_duration();
        info!(
            caller = self.attributes.phone_number.as_deref().unwrap_or(UNKNOWN_CALLER),
            recording_url = ?self.attributes.recording_url,
            "incoming call"
        );
        {
            let _turn = self.turn_lock.lock().await;
            if let Err(e) = self.engine.say(GREETING).await {
                error!(error=%e, "failed to speak greeting");
            }
        }
        self.watchdog.reset_idle();
    }

    async fn turn_received(&self, turn: TranscriptTurn) {
        let _turn = self.turn_lock.lock().await;
        if self.phase() != CallPhase::Active {
            debug!(role = turn.role.as_str(), "call is closing; ignoring turn");
            return;
        }
        self.watchdog.reset_idle();
        debug!(role = turn.role.as_str(), text = %turn.text, "conversation item added");
        let reply_needed = turn.role == Role::User && !turn.text.trim().is_empty();
        let input = turn.text.clone();
        self.push_turn(turn);
        if reply_needed {
            self.reply_to(&input).await;
        }
    }

    async fn turn_unhandled(&self, turn: TranscriptTurn) {
        if self.phase() != CallPhase::Active {
            return;
        }
        debug!(role = turn.role.as_str(), "recording turn left over at close");
        self.push_turn(turn);
    }

    async fn session_closed(&self, reason: CloseReason) {
        {
            let mut phase = lock(&self.phase);
            if *phase != CallPhase::Active {
                debug!(?reason, "close already handled");
                return;
            }
            *phase = CallPhase::Closing;
        }
        info!(?reason, "session has ended; performing cleanup");
        self.watchdog.stop();

        if let Some(farewell) = farewell_for(reason) {
            match timeout(FAREWELL_TIMEOUT, self.engine.say(farewell)).await {
                Ok(Ok(())) => self.push_turn(TranscriptTurn::assistant(farewell)),
                Ok(Err(e)) => error!(error=%e, "failed to speak farewell"),
                Err(_) => warn!("timed out speaking farewell"),
            }
        }
        if let Err(e) = self.engine.close().await {
            error!(error=%e, "failed to close engine session");
        }

        let record = self.call_record(rome_now());
        info!(
            turns = record.chat_transcript.len(),
            duration_seconds = record.duration_seconds,
            "reporting call"
        );
        self.reporter.report(&record).await;
        lock(&self.transcript).clear();
        *lock(&self.phase) = CallPhase::Closed;
    }
}
