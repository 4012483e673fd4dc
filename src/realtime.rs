use crate::config::RealtimeConfig;
use crate::consts::{CANCEL_TIMEOUT, MAX_TOOL_ROUNDS, RESPONSE_TIMEOUT};
use crate::engine::ConversationEngine;
use crate::error::AppError;
use crate::prompt::verbatim_instructions;
use crate::realtime_types::{
    ClientEvent, ConversationItem, ResponseConfig, ResponseObject, ServerEvent, SessionConfig,
    TranscriptionConfig, TurnDetection,
};
use crate::tools::SchedulingTools;
use crate::twilio_types::{OutboundMediaMeta, TwilioOutbound};
use crate::types::{EngineEvent, TranscriptTurn};

use async_trait::async_trait;
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};

type RealtimeSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;
type RealtimeStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Where the realtime session delivers what it hears and says.
pub struct CallLinks {
    pub stream_sid: String,
    pub twilio_outbound: mpsc::Sender<TwilioOutbound>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
    /// Cancelled when the call is over.  The engine runs on a child of it.
    pub token: CancellationToken,
}

/// Conversation engine backed by a realtime speech-to-speech model session.
pub struct RealtimeEngine {
    outbound: mpsc::Sender<ClientEvent>,
    /// Holding the lock means owning the one response in flight.
    responses: Mutex<ResponseQueue>,
    events: mpsc::UnboundedSender<EngineEvent>,
    tools: SchedulingTools,
    token: CancellationToken,
}

/// Finished responses, in order, and how many requested ones are still owed.  A request whose
/// caller gave up stays owed until its `response.done` has been consumed.
struct ResponseQueue {
    done: mpsc::UnboundedReceiver<ResponseObject>,
    outstanding: usize,
}

impl RealtimeEngine {
    /// Open the realtime websocket, start its reader and writer tasks and configure the session.
    pub async fn connect(
        config: &RealtimeConfig,
        instructions: String,
        tools: SchedulingTools,
        links: CallLinks,
    ) -> Result<Self, AppError> {
        let (sink, stream) = open_realtime_stream(config).await?;
        let token = links.token.child_token();
        let (outbound, outbound_rx) = mpsc::channel(64);
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();

        tokio::spawn(send_realtime_events(outbound_rx, sink, token.clone()).in_current_span());
        tokio::spawn(
            read_realtime_events(
                stream,
                links.stream_sid,
                links.twilio_outbound,
                links.events.clone(),
                responses_tx,
                token.clone(),
            )
            .in_current_span(),
        );

        let engine = Self {
            outbound,
            responses: Mutex::new(ResponseQueue {
                done: responses_rx,
                outstanding: 0,
            }),
            events: links.events,
            tools,
            token,
        };
        engine
            .send(ClientEvent::SessionUpdate {
                session: session_config(config, instructions),
            })
            .await?;
        Ok(engine)
    }

    /// Where caller audio goes.
    pub fn audio_sink(&self) -> mpsc::Sender<ClientEvent> {
        self.outbound.clone()
    }

    async fn send(&self, event: ClientEvent) -> Result<(), AppError> {
        self.outbound.send(event).await.map_err(|_| {
            warn!("realtime writer has stopped");
            AppError("realtime session closed")
        })
    }

    /// Ask for a response and wait for it to finish.
    async fn request_response(
        &self,
        queue: &mut ResponseQueue,
        config: ResponseConfig,
    ) -> Result<ResponseObject, AppError> {
        while let Ok(stale) = queue.done.try_recv() {
            queue.outstanding = queue.outstanding.saturating_sub(1);
            debug!(status=%stale.status, "discarding stale realtime response");
        }
        if queue.outstanding > 0 {
            self.cancel_abandoned(queue).await?;
        }
        self.send(ClientEvent::ResponseCreate { response: config })
            .await?;
        queue.outstanding += 1;
        let response = match timeout(RESPONSE_TIMEOUT, queue.done.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => return Err(AppError("realtime session closed")),
            Err(_) => {
                warn!("timed out waiting for realtime response");
                return Err(AppError("realtime response timed out"));
            }
        };
        queue.outstanding -= 1;
        if !response.is_completed() {
            warn!(status=%response.status, "realtime response did not complete");
            return Err(AppError("realtime response did not complete"));
        }
        Ok(response)
    }

    /// Cancel what an abandoned request left running and wait until the server is done with it,
    /// so its `response.done` is never taken for the next request's.
    async fn cancel_abandoned(&self, queue: &mut ResponseQueue) -> Result<(), AppError> {
        debug!(outstanding = queue.outstanding, "cancelling abandoned realtime response");
        self.send(ClientEvent::ResponseCancel).await?;
        while queue.outstanding > 0 {
            match timeout(CANCEL_TIMEOUT, queue.done.recv()).await {
                Ok(Some(stale)) => {
                    queue.outstanding -= 1;
                    debug!(status=%stale.status, "abandoned realtime response finished");
                }
                Ok(None) => return Err(AppError("realtime session closed")),
                Err(_) => {
                    warn!("abandoned realtime response never finished");
                    queue.outstanding = 0;
                }
            }
        }
        Ok(())
    }
}

fn session_config(config: &RealtimeConfig, instructions: String) -> SessionConfig {
    SessionConfig {
        modalities: vec!["text".to_string(), "audio".to_string()],
        instructions,
        voice: config.voice.clone(),
        input_audio_format: "g711_ulaw".to_string(),
        output_audio_format: "g711_ulaw".to_string(),
        input_audio_transcription: TranscriptionConfig {
            model: "whisper-1".to_string(),
            language: Some("it".to_string()),
        },
        turn_detection: TurnDetection {
            kind: "server_vad".to_string(),
            create_response: false,
        },
        tools: SchedulingTools::definitions(),
        tool_choice: "auto".to_string(),
    }
}

#[async_trait]
impl ConversationEngine for RealtimeEngine {
    async fn generate_reply(&self, user_input: &str) -> Result<String, AppError> {
        // the caller's audio is already part of the conversation; the transcript is only for logs
        debug!(input=%user_input, "generating reply");
        let mut queue = self.responses.lock().await;
        let mut response = self
            .request_response(&mut queue, ResponseConfig::text_only())
            .await?;
        let mut rounds = 0;
        loop {
            let calls = response.function_calls();
            if calls.is_empty() {
                return response.text().ok_or_else(|| {
                    warn!("realtime response carried no text");
                    AppError("empty realtime response")
                });
            }
            if rounds == MAX_TOOL_ROUNDS {
                error!(rounds, "model kept calling tools");
                return Err(AppError("too many tool rounds"));
            }
            rounds += 1;
            for call in calls {
                let output = self.tools.dispatch(&call.name, &call.arguments).await;
                self.send(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::FunctionCallOutput {
                        call_id: call.call_id,
                        output: output.to_string(),
                    },
                })
                .await?;
            }
            response = self
                .request_response(&mut queue, ResponseConfig::text_only())
                .await?;
        }
    }

    async fn say(&self, text: &str) -> Result<(), AppError> {
        let mut queue = self.responses.lock().await;
        self.request_response(
            &mut queue,
            ResponseConfig::verbatim_speech(verbatim_instructions(text)),
        )
        .await?;
        // the driver may already be gone during teardown
        let _ = self
            .events
            .send(EngineEvent::ItemAdded(TranscriptTurn::assistant(text)));
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.token.cancel();
        Ok(())
    }
}

/// Open websocket connection to the realtime API.
async fn open_realtime_stream(
    config: &RealtimeConfig,
) -> Result<(RealtimeSink, RealtimeStream), AppError> {
    trace!("Connecting to realtime API");
    let uri = format!("{}?model={}", config.url, config.model);
    let mut rq = uri.as_str().into_client_request().map_err(|e| {
        error!(error=%e, uri=%uri, "invalid realtime url");
        AppError("invalid realtime url")
    })?;
    let bearer = http::header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| {
            error!(error=%e, "realtime api key is not a valid header value");
            AppError("invalid realtime api key")
        })?;
    rq.headers_mut()
        .insert(http::header::AUTHORIZATION, bearer);
    rq.headers_mut().insert(
        "openai-beta",
        http::header::HeaderValue::from_static("realtime=v1"),
    );
    let (ws_stream, _) = connect_async(rq).await.map_err(|e| {
        error!(error=%e, "failed to connect to realtime API");
        AppError("failed to connect to realtime API")
    })?;
    info!(model=%config.model, "opened realtime session");
    Ok(ws_stream.split())
}

/// Task that is the funnel of all client events going to the realtime API.
async fn send_realtime_events(
    mut outbound: mpsc::Receiver<ClientEvent>,
    mut sink: RealtimeSink,
    token: CancellationToken,
) -> Result<(), AppError> {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => {
                debug!("closing realtime session");
                let _ = sink.send(tungstenite::Message::Close(None)).await;
                break Ok(());
            }
            event = outbound.recv() => event,
        };
        let Some(event) = event else {
            break Ok(());
        };
        let json = serde_json::to_string(&event).map_err(|e| {
            error!(error=%e, "failed to serialize realtime client event");
            AppError("realtime event serialization error")
        })?;
        sink.send(tungstenite::Message::Text(json))
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send event to realtime API");
                AppError("Failed to send event to realtime API")
            })?;
    }
}

/// Task that reads the realtime API's events and routes them to Twilio, the call driver and
/// whoever waits on a response.
async fn read_realtime_events(
    mut stream: RealtimeStream,
    stream_sid: String,
    twilio_outbound: mpsc::Sender<TwilioOutbound>,
    events: mpsc::UnboundedSender<EngineEvent>,
    responses: mpsc::UnboundedSender<ResponseObject>,
    token: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => return,
            msg = stream.next() => msg,
        };
        let json = match msg {
            Some(Ok(tungstenite::Message::Text(json))) => json,
            Some(Ok(tungstenite::Message::Close(frame))) => {
                info!(frame=?frame, "realtime API closed the session");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!(error=%e, "failed to receive realtime event");
                break;
            }
            None => break,
        };
        let event = match serde_json::from_str::<ServerEvent>(&json) {
            Ok(event) => event,
            Err(e) => {
                warn!(error=%e, "failed to parse realtime event");
                continue;
            }
        };
        match event {
            ServerEvent::Error { error } => {
                error!(code=?error.code, message=%error.message, "realtime API error");
            }
            ServerEvent::SpeechStarted => {
                // caller barged in; drop whatever Twilio still has queued
                let clear = TwilioOutbound::Clear {
                    stream_sid: stream_sid.clone(),
                };
                if twilio_outbound.send(clear).await.is_err() {
                    debug!("twilio funnel gone; dropping clear");
                }
            }
            ServerEvent::InputTranscriptionCompleted {
                item_id,
                transcript,
            } => {
                trace!(item_id=%item_id, transcript=%transcript, "caller transcript");
                let _ = events.send(EngineEvent::ItemAdded(TranscriptTurn::user(
                    transcript.trim(),
                )));
            }
            ServerEvent::AudioDelta { delta } => {
                let media = TwilioOutbound::Media {
                    media: OutboundMediaMeta { payload: delta },
                    stream_sid: stream_sid.clone(),
                };
                if twilio_outbound.send(media).await.is_err() {
                    debug!("twilio funnel gone; dropping audio");
                }
            }
            ServerEvent::ResponseDone { response } => {
                let _ = responses.send(response);
            }
            ServerEvent::Other => (),
        }
    }
    if !token.is_cancelled() {
        let _ = events.send(EngineEvent::Closed);
    }
}
