use crate::config::AppConfig;
use crate::consts::CONNECT_PAYLOAD_TTL;
use crate::twilio_types::TwilioConnectPayload;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

pub struct AppState {
    pub config: AppConfig,
    pub http_client: reqwest::Client,
    pub streams: ConnectCache,
}

/// Connect payloads waiting for their media stream, keyed by call sid.  A payload whose stream
/// never shows up expires after `CONNECT_PAYLOAD_TTL`.
#[derive(Default)]
pub struct ConnectCache {
    entries: Mutex<HashMap<String, (Instant, TwilioConnectPayload)>>,
}

impl ConnectCache {
    /// Cache a payload, dropping any that have expired.
    pub fn insert(&self, payload: TwilioConnectPayload) {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, (cached_at, _)| now.duration_since(*cached_at) < CONNECT_PAYLOAD_TTL);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "dropped stale connect payloads");
        }
        entries.insert(payload.call_sid.clone(), (now, payload));
    }

    /// Remove the payload for a call.  Expired payloads are removed but not returned.
    pub fn take(&self, call_sid: &str) -> Option<TwilioConnectPayload> {
        let (cached_at, payload) = self.entries().remove(call_sid)?;
        if cached_at.elapsed() >= CONNECT_PAYLOAD_TTL {
            debug!(call_sid, "connect payload expired before its stream arrived");
            return None;
        }
        Some(payload)
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (Instant, TwilioConnectPayload)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversational item.  It goes over the wire as `"<role>: <text>"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct TranscriptTurn {
    pub role: Role,
    pub text: String,
}

impl TranscriptTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

impl From<TranscriptTurn> for String {
    fn from(turn: TranscriptTurn) -> Self {
        format!("{}: {}", turn.role.as_str(), turn.text)
    }
}

/// Attributes of the remote participant as reported by the call transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantAttributes {
    pub phone_number: Option<String>,
    pub recording_url: Option<String>,
}

impl ParticipantAttributes {
    /// Prefer what Twilio told us when the call came in; fall back to custom parameters passed on
    /// the media stream.
    pub fn resolve(
        connect: Option<&TwilioConnectPayload>,
        custom_parameters: &HashMap<String, String>,
    ) -> Self {
        let non_empty = |v: &String| !v.trim().is_empty();
        let phone_number = connect
            .map(|c| c.from.clone())
            .filter(non_empty)
            .or_else(|| custom_parameters.get("phoneNumber").cloned())
            .filter(non_empty);
        let recording_url = connect
            .and_then(|c| c.sip_header_recording_url.clone())
            .filter(non_empty)
            .or_else(|| custom_parameters.get("recordingUrl").cloned())
            .filter(non_empty);
        Self {
            phone_number,
            recording_url,
        }
    }
}

/// The record posted to the webhook once a call is over.
#[derive(Debug, Serialize)]
pub struct CallRecord {
    pub called_number: String,
    pub chat_transcript: Vec<TranscriptTurn>,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
}

/// Why a call is being torn down.  Only the first request is honored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// No conversational activity within the idle window
    Idle,
    /// The call reached its maximum length
    MaxDuration,
    /// Twilio reported the end of the media stream
    CallerHungUp,
    /// The realtime session went away
    EngineClosed,
}

/// Events the conversational engine reports to whoever drives the call.
#[derive(Debug)]
pub enum EngineEvent {
    ItemAdded(TranscriptTurn),
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPhase {
    Active,
    Closing,
    Closed,
}
