use crate::call_context::CallContext;
use crate::config::TwilioCredentials;
use crate::consts::{HANGUP_MARK, MARK_TIMEOUT, TWILIO_API_BASE, TWILIO_TIMEOUT};
use crate::engine::SessionHandler;
use crate::error::{handle_error, AppError};
use crate::prompt::system_prompt;
use crate::realtime::{CallLinks, RealtimeEngine};
use crate::realtime_types::ClientEvent;
use crate::reporter::Reporter;
use crate::scheduling::SchedulingClient;
use crate::tools::SchedulingTools;
use crate::twilio_types::{OutboundMarkMeta, StartMeta, TwilioMessage, TwilioOutbound};
use crate::types::{AppState, CloseReason, EngineEvent, ParticipantAttributes, TranscriptTurn};
use crate::utils::rome_now;
use crate::watchdog::Watchdog;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, Stream, StreamExt},
};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Task that streams all Twilio media messages with encoded caller-side audio to the realtime
/// session.  Any sign that the caller is gone becomes a close request.
pub async fn stream_twilio_audio_to_realtime<S, E>(
    mut twilio_stream: S,
    realtime_sink: mpsc::Sender<ClientEvent>,
    marks: mpsc::UnboundedSender<String>,
    close_requests: mpsc::UnboundedSender<CloseReason>,
    token: CancellationToken,
) -> Result<(), AppError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            msg = twilio_stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(json))) => match serde_json::from_str(&json) {
                Ok(TwilioMessage::Media { media, .. }) => {
                    let append = ClientEvent::InputAudioBufferAppend {
                        audio: media.payload,
                    };
                    if realtime_sink.send(append).await.is_err() {
                        debug!("realtime session gone; dropping caller audio");
                    }
                }
                Ok(TwilioMessage::Mark { mark, .. }) => {
                    debug!(name=%mark.name, "twilio played out to mark");
                    let _ = marks.send(mark.name);
                }
                Ok(TwilioMessage::Stop {
                    sequence_number, ..
                }) => {
                    info!(sequence_number=%sequence_number, "twilio stopped the media stream");
                    let _ = close_requests.send(CloseReason::CallerHungUp);
                    break Ok(());
                }
                Ok(_) => warn!("unexpected Connected or Start message mid-stream"),
                Err(e) => error!(error=%e, "failed to parse Twilio text message"),
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("end of twilio stream");
                let _ = close_requests.send(CloseReason::CallerHungUp);
                break Ok(());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!(error=%e, "failed to receive message from Twilio");
                let _ = close_requests.send(CloseReason::CallerHungUp);
                break Err(AppError("Failed to receive message from Twilio stream"));
            }
        }
    }
}

/// Task that is the funnel of all TwilioOutbound messages going to Twilio.
pub async fn send_twilio_ws_messages(
    mut twilio_outbound_stream: mpsc::Receiver<TwilioOutbound>,
    mut twilio_ws_sink: SplitSink<WebSocket, Message>,
    token: CancellationToken,
) -> Result<(), AppError> {
    loop {
        let twilio_outbound = tokio::select! {
            _ = token.cancelled() => {
                let _ = twilio_ws_sink.send(Message::Close(None)).await;
                break Ok(());
            }
            outbound = twilio_outbound_stream.recv() => outbound,
        };
        let Some(twilio_outbound) = twilio_outbound else {
            break Ok(());
        };
        let json = serde_json::to_string(&twilio_outbound).map_err(|e| {
            error!(error=%e, "failed to serialize Twilio outbound");
            AppError("Twilio message serialization error")
        })?;
        twilio_ws_sink.send(Message::Text(json)).await.map_err(|e| {
            error!(error=%e, "failed to send message to Twilio");
            AppError("Failed to send message to Twilio")
        })?;
    }
}

/// Feeds turns to the handler one at a time, in arrival order.
async fn run_turns<H: SessionHandler>(
    handler: Arc<H>,
    turns: Arc<Mutex<mpsc::UnboundedReceiver<TranscriptTurn>>>,
) {
    handler.session_started().await;
    loop {
        let turn = turns.lock().await.recv().await;
        let Some(turn) = turn else {
            break;
        };
        handler.turn_received(turn).await;
    }
}

/// Deliver engine events to the handler until something asks the call to close, then tear the
/// session down.  A close request preempts whatever turn is in flight.
pub async fn drive_session<H: SessionHandler + 'static>(
    handler: Arc<H>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    mut close_requests: mpsc::UnboundedReceiver<CloseReason>,
) -> CloseReason {
    let (turns_tx, turns_rx) = mpsc::unbounded_channel();
    let turns_rx = Arc::new(Mutex::new(turns_rx));
    let worker = tokio::spawn(run_turns(handler.clone(), turns_rx.clone()).in_current_span());

    let reason = loop {
        tokio::select! {
            biased;
            Some(reason) = close_requests.recv() => break reason,
            event = events.recv() => match event {
                Some(EngineEvent::ItemAdded(turn)) => {
                    let _ = turns_tx.send(turn);
                }
                Some(EngineEvent::Closed) | None => {
                    warn!("realtime session went away");
                    break CloseReason::EngineClosed;
                }
            },
        }
    };

    worker.abort();
    // wait until the aborted turn has actually been dropped
    let _ = worker.await;

    // turns the worker never got to, then items the engine reported after them
    let mut unhandled = vec![];
    {
        let mut turns_rx = turns_rx.lock().await;
        while let Ok(turn) = turns_rx.try_recv() {
            unhandled.push(turn);
        }
    }
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::ItemAdded(turn) = event {
            unhandled.push(turn);
        }
    }
    if !unhandled.is_empty() {
        debug!(count = unhandled.len(), "recording turns left over at close");
    }
    for turn in unhandled {
        handler.turn_unhandled(turn).await;
    }
    handler.session_closed(reason).await;
    reason
}

/// End the call through the Twilio REST API.
pub async fn hang_up_call(
    http_client: &reqwest::Client,
    api_base: &str,
    credentials: &TwilioCredentials,
    call_sid: &str,
) -> Result<(), AppError> {
    let account_sid = &credentials.account_sid;
    let url = format!("{api_base}/2010-04-01/Accounts/{account_sid}/Calls/{call_sid}.json");
    let resp = http_client
        .post(url)
        .basic_auth(account_sid, Some(&credentials.auth_token))
        .form(&[("Status", "completed")])
        .timeout(TWILIO_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            error!(error=%e, "failed to send hang up request to twilio");
            AppError("twilio calls api")
        })?;
    resp.error_for_status().map_err(|e| {
        error!(error=%e, "twilio refused to hang up the call");
        AppError("twilio calls api")
    })?;
    info!("hung up the call");
    Ok(())
}

/// Task that runs one call from the Twilio start message to hang up.
pub async fn manage_call(
    twilio_stream: SplitStream<WebSocket>,
    twilio_sink: SplitSink<WebSocket, Message>,
    start_meta: StartMeta,
    attributes: ParticipantAttributes,
    app_state: Arc<AppState>,
) -> Result<(), AppError> {
    let config = &app_state.config;
    let token = CancellationToken::new();
    let (twilio_outbound_tx, twilio_outbound_rx) = mpsc::channel(64);
    let twilio_writer = tokio::spawn(
        send_twilio_ws_messages(twilio_outbound_rx, twilio_sink, token.clone()).in_current_span(),
    );
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = mpsc::unbounded_channel();
    let (marks_tx, mut marks_rx) = mpsc::unbounded_channel();

    let tools = SchedulingTools::new(SchedulingClient::new(
        app_state.http_client.clone(),
        config.scheduling.clone(),
    ));
    let links = CallLinks {
        stream_sid: start_meta.stream_sid.clone(),
        twilio_outbound: twilio_outbound_tx.clone(),
        events: events_tx,
        token: token.clone(),
    };
    let engine = match RealtimeEngine::connect(
        &config.realtime,
        system_prompt(rome_now()),
        tools,
        links,
    )
    .await
    {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            token.cancel();
            let _ = twilio_writer.await;
            return Err(e);
        }
    };

    let twilio_reader = tokio::spawn(
        stream_twilio_audio_to_realtime(
            twilio_stream,
            engine.audio_sink(),
            marks_tx,
            close_tx.clone(),
            token.clone(),
        )
        .in_current_span(),
    );

    let context = Arc::new(CallContext::new(
        engine,
        Watchdog::new(config.idle_timeout, config.max_call_duration, close_tx),
        Reporter::new(app_state.http_client.clone(), config.webhook_url.clone()),
        attributes,
    ));
    let reason = drive_session(context, events_rx, close_rx).await;

    if reason != CloseReason::CallerHungUp {
        // let Twilio play out the farewell before the line drops
        let mark = TwilioOutbound::Mark {
            mark: OutboundMarkMeta {
                name: HANGUP_MARK.to_string(),
            },
            stream_sid: start_meta.stream_sid.clone(),
        };
        if twilio_outbound_tx.send(mark).await.is_ok() {
            let played = timeout(MARK_TIMEOUT, async {
                while let Some(name) = marks_rx.recv().await {
                    if name == HANGUP_MARK {
                        break;
                    }
                }
            })
            .await;
            if played.is_err() {
                warn!("timed out waiting for twilio to play out the farewell");
            }
        }
    }
    token.cancel();

    if reason != CloseReason::CallerHungUp {
        match &config.twilio {
            Some(credentials) => {
                if let Err(e) = hang_up_call(
                    &app_state.http_client,
                    TWILIO_API_BASE,
                    credentials,
                    &start_meta.call_sid,
                )
                .await
                {
                    handle_error(e).await;
                }
            }
            None => debug!("no twilio credentials; closing the media stream ends the call"),
        }
    }

    let (writer, reader) = tokio::join!(twilio_writer, twilio_reader);
    for res in [writer, reader] {
        match res {
            Ok(Err(e)) => handle_error(e).await,
            Err(e) => error!(error=%e, "call task panicked"),
            Ok(Ok(())) => (),
        }
    }
    info!(?reason, "call finished");
    Ok(())
}
