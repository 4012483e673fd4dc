mod cal_types;
mod call_context;
mod config;
mod engine;
mod error;
mod handlers;
mod prompt;
mod realtime;
mod realtime_types;
mod reporter;
mod scheduling;
mod tasks;
#[cfg(test)]
mod test_support;
mod tools;
mod twilio_types;
mod types;
mod utils;
mod watchdog;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::types::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

pub mod consts {
    use std::time::Duration;

    pub const GREETING: &str =
        "Ciao, sono Martina, l’assistente di Michele. Come posso aiutarti?";
    pub const IDLE_FAREWELL: &str = "Sembra che la linea sia silenziosa da un po'. \
        Chiudo la chiamata, ma puoi richiamare quando vuoi.";
    pub const DURATION_FAREWELL: &str =
        "La chiamata ha raggiunto il tempo massimo. Ti auguro una buona giornata!";
    /// Reported in place of a caller number Twilio never gave us
    pub const UNKNOWN_CALLER: &str = "unknown";

    pub const TIME_ZONE: &str = "Europe/Rome";
    pub const ATTENDEE_LANGUAGE: &str = "it";

    pub const SCHEDULING_TIMEOUT: Duration = Duration::from_secs(10);
    pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const FAREWELL_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MARK_TIMEOUT: Duration = Duration::from_secs(10);
    pub const TWILIO_TIMEOUT: Duration = Duration::from_secs(5);
    /// Bound on waiting for the model to confirm a cancelled response
    pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(3);
    /// How long a connect payload waits for its media stream
    pub const CONNECT_PAYLOAD_TTL: Duration = Duration::from_secs(60);
    pub const MAX_TOOL_ROUNDS: usize = 4;

    pub const HANGUP_MARK: &str = "hangup";
    pub const TWILIO_API_BASE: &str = "https://api.twilio.com";
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // a missing .env is fine; the process environment may already be complete
    let _ = dotenvy::dotenv();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("inbound_agent", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        eprintln!("failed to install tracing subscriber: {e}");
        AppError("tracing subscriber")
    })?;

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error=%e, bind_address=%config.bind_address, "invalid bind address");
        AppError("invalid bind address")
    })?;
    let app_state = Arc::new(AppState {
        config,
        http_client: reqwest::Client::new(),
        streams: Default::default(),
    });

    let app = Router::new()
        .route("/connect", get(handlers::ws_handler))
        .route("/twilio/twiml/start", post(handlers::twiml_start_connect))
        .route("/", get(|| async { "Hello, World!" }))
        .with_state(app_state);

    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| {
            error!(error=%e, "server error");
            AppError("server error")
        })
}
