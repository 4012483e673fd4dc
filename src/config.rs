use crate::error::AppError;

use std::str::FromStr;
use std::time::Duration;
use tracing::error;

/// Everything the service reads from its environment.  Values come from the process environment,
/// optionally seeded from a `.env` file by `dotenvy` before `AppConfig::from_env` runs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    /// Name under which the worker registers itself; also used as the Twilio stream name
    pub agent_name: String,
    pub realtime: RealtimeConfig,
    pub scheduling: SchedulingConfig,
    pub webhook_url: String,
    pub idle_timeout: Duration,
    pub max_call_duration: Duration,
    /// Credentials for ending calls through the Twilio REST API; without them a call ends when the
    /// media stream is closed.
    pub twilio: Option<TwilioCredentials>,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub api_key: String,
    pub url: String,
    pub model: String,
    pub voice: String,
}

#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub api_base: String,
    pub api_key: String,
    pub event_type_id: u64,
    pub event_type_slug: String,
    pub organization_slug: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let realtime = RealtimeConfig {
            api_key: required(&lookup, "OPENAI_API_KEY")?,
            url: or_default(&lookup, "REALTIME_URL", "wss://api.openai.com/v1/realtime"),
            model: or_default(&lookup, "REALTIME_MODEL", "gpt-4o-realtime-preview"),
            voice: or_default(&lookup, "REALTIME_VOICE", "shimmer"),
        };
        let scheduling = SchedulingConfig {
            api_base: or_default(&lookup, "CAL_API_BASE", "https://api.cal.com"),
            api_key: required(&lookup, "CAL_API_KEY")?,
            event_type_id: parsed(&lookup, "CAL_EVENT_TYPE_ID", 2_029_915)?,
            event_type_slug: or_default(&lookup, "CAL_EVENT_TYPE_SLUG", "my-event-type"),
            organization_slug: or_default(&lookup, "CAL_ORGANIZATION_SLUG", "acme-corp"),
            api_version: or_default(&lookup, "CAL_API_VERSION", "2024-08-13"),
        };
        let twilio = match (
            lookup("TWILIO_ACCOUNT_SID"),
            lookup("TWILIO_AUTH_TOKEN"),
        ) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioCredentials {
                account_sid,
                auth_token,
            }),
            _ => None,
        };

        Ok(Self {
            bind_address: or_default(&lookup, "BIND_ADDRESS", "0.0.0.0:3000"),
            agent_name: or_default(&lookup, "AGENT_NAME", "inbound-agent"),
            realtime,
            scheduling,
            webhook_url: required(&lookup, "WEBHOOK_URL")?,
            idle_timeout: Duration::from_secs(parsed(&lookup, "IDLE_TIMEOUT_SECS", 30)?),
            max_call_duration: Duration::from_secs(parsed(
                &lookup,
                "MAX_CALL_DURATION_SECS",
                300,
            )?),
            twilio,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, AppError> {
    lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
        error!(key = %key, "required environment variable not set");
        AppError("missing required configuration")
    })
}

fn or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            error!(key = %key, value = %raw, "failed to parse environment variable");
            AppError("invalid configuration value")
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("OPENAI_API_KEY", "sk-test"),
        ("CAL_API_KEY", "cal_test"),
        ("WEBHOOK_URL", "https://hooks.example.com/calls"),
    ];

    #[test]
    fn defaults_fill_everything_optional() {
        let config = AppConfig::from_lookup(lookup_from(REQUIRED)).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.agent_name, "inbound-agent");
        assert_eq!(config.realtime.voice, "shimmer");
        assert_eq!(config.scheduling.event_type_id, 2_029_915);
        assert_eq!(config.scheduling.api_version, "2024-08-13");
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_call_duration, Duration::from_secs(300));
        assert!(config.twilio.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(&[
            ("IDLE_TIMEOUT_SECS", "45"),
            ("MAX_CALL_DURATION_SECS", " 600 "),
            ("CAL_EVENT_TYPE_ID", "42"),
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
        ]);
        let config = AppConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(45));
        assert_eq!(config.max_call_duration, Duration::from_secs(600));
        assert_eq!(config.scheduling.event_type_id, 42);
        assert_eq!(config.twilio.unwrap().account_sid, "AC123");
    }

    #[test]
    fn missing_credential_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&REQUIRED[1..])).unwrap_err();
        assert_eq!(err, AppError("missing required configuration"));
    }

    #[test]
    fn malformed_number_is_an_error() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("IDLE_TIMEOUT_SECS", "thirty"));
        let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert_eq!(err, AppError("invalid configuration value"));
    }
}
