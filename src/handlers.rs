use crate::error::{handle_error, AppError};
use crate::tasks::manage_call;
use crate::twilio_types::{
    wrap_twiml, ConnectAction, Connection, Response, ResponseAction, StartMeta, StreamAction,
    StreamTrack, TwilioConnectPayload, TwilioMessage,
};
use crate::types::{AppState, ParticipantAttributes};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Host, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use futures_util::stream::{SplitStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info_span, trace, Instrument};
use uuid::Uuid;

/// Capture the Twilio Start media message from the beginning of a Twilio websocket stream for the
/// stream id.
async fn get_twilio_start_meta(
    twilio_stream: &mut SplitStream<WebSocket>,
) -> Result<StartMeta, AppError> {
    loop {
        match twilio_stream.next().await {
            Some(msg) => match msg {
                Ok(Message::Text(json)) => match serde_json::from_str(&json) {
                    Ok(message) => match message {
                        TwilioMessage::Connected { protocol, version } => {
                            trace!("Got connected message with {protocol} and {version}");
                        }
                        TwilioMessage::Start {
                            start: start_meta, ..
                        } => {
                            break Ok(start_meta);
                        }
                        _ => {
                            break Err(AppError(
                                "At this point in a stream, we only expect a Connected message \
                                 or a Start message.  Any others constitute an error.",
                            ));
                        }
                    },
                    Err(e) => {
                        error!(error=%e, "failed to deserialize Twilio text message");
                        break Err(AppError("Error deserializing twilio text message"));
                    }
                },
                _ => {
                    break Err(AppError(
                        "Got unexpected websocket message type from Twilio!",
                    ));
                }
            },
            None => break Err(AppError("End of stream")),
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_handler(socket, app_state))
}

async fn socket_handler(socket: WebSocket, app_state: Arc<AppState>) {
    let (twilio_sink, mut twilio_stream) = socket.split();
    let start_meta = match get_twilio_start_meta(&mut twilio_stream).await {
        Ok(start_meta) => start_meta,
        Err(e) => {
            handle_error(e).await;
            return;
        }
    };
    debug!(meta = ?start_meta, "got start meta from twilio stream");

    // the connect payload is only needed once, so take it out of the cache
    let connect_payload = app_state.streams.take(&start_meta.call_sid);
    if connect_payload.is_none() {
        debug!(call_sid=%start_meta.call_sid, "no cached connect payload for call");
    }
    let attributes =
        ParticipantAttributes::resolve(connect_payload.as_ref(), &start_meta.custom_parameters);

    let span = info_span!("call", call_id=%Uuid::new_v4(), call_sid=%start_meta.call_sid);
    if let Err(e) = manage_call(twilio_stream, twilio_sink, start_meta, attributes, app_state)
        .instrument(span)
        .await
    {
        handle_error(e).await;
    }
}

/// TwiML that connects the call to our media stream endpoint.
fn connect_twiml(host: &str, stream_name: &str) -> String {
    let stream_action = StreamAction {
        url: format!("wss://{}/connect", host),
        name: Some(stream_name.to_string()),
        track: Some(StreamTrack::Inbound),
    };
    let response = Response {
        actions: vec![ResponseAction::Connect(ConnectAction {
            connection: Connection::Stream(stream_action),
        })],
    };
    wrap_twiml(xmlserde::xml_serialize(response))
}

pub async fn twiml_start_connect(
    Host(host): Host,
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "start request body");
    let payload = match serde_urlencoded::from_str::<TwilioConnectPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize Twilio connect payload");
            return (
                StatusCode::BAD_REQUEST,
                HeaderMap::new(),
                "Bad request".to_string(),
            );
        }
    };
    debug!(call_sid=%payload.call_sid, from=%payload.from, "incoming call");
    app_state.streams.insert(payload);

    let twiml = connect_twiml(&host, &app_state.config.agent_name);
    trace!("twiml: '{}'", twiml);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    (StatusCode::OK, headers, twiml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twiml_streams_inbound_audio_to_connect_endpoint() {
        let twiml = connect_twiml("agent.example.com", "inbound-agent");
        assert!(twiml.starts_with("<?xml"));
        assert!(twiml.contains("<Connect>"));
        assert!(twiml.contains("wss://agent.example.com/connect"));
        assert!(twiml.contains("inbound-agent"));
        assert!(twiml.contains("inbound_track"));
    }
}
