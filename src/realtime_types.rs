use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events we send to the realtime API.
#[derive(Serialize, Debug)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },
    /// Stops the response currently being generated, if any
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

#[derive(Serialize, Debug)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

#[derive(Serialize, Debug)]
pub struct TranscriptionConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    /// Replies are requested explicitly, one turn at a time
    pub create_response: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Serialize, Debug, Default)]
pub struct ResponseConfig {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// `"none"` keeps the response out of the default conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
}

impl ResponseConfig {
    pub fn text_only() -> Self {
        Self {
            modalities: vec!["text".to_string()],
            ..Default::default()
        }
    }

    pub fn verbatim_speech(instructions: String) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: Some(instructions),
            conversation: Some("none".to_string()),
        }
    }
}

/// Events the realtime API sends us.  Everything we do not act on lands in `Other`.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { item_id: String, transcript: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseObject },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ResponseObject {
    pub status: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    FunctionCall {
        name: String,
        call_id: String,
        arguments: String,
    },
    #[serde(other)]
    Other,
}

/// Text parts carry `text`, audio parts carry `transcript`.
#[derive(Deserialize, Debug, Clone)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

/// A function call the model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub call_id: String,
    pub arguments: String,
}

impl ResponseObject {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall {
                    name,
                    call_id,
                    arguments,
                } => Some(FunctionCall {
                    name: name.clone(),
                    call_id: call_id.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Concatenated message text, or `None` if the response said nothing.
    pub fn text(&self) -> Option<String> {
        let text = self
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content } => Some(content),
                _ => None,
            })
            .flatten()
            .filter_map(|part| part.text.as_deref().or(part.transcript.as_deref()))
            .collect::<Vec<&str>>()
            .join(" ");
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_done_with_function_call() {
        let json = json!({
            "type": "response.done",
            "event_id": "event_1",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [{
                    "id": "item_1",
                    "type": "function_call",
                    "name": "check_availability",
                    "call_id": "call_1",
                    "arguments": json!({
                        "start_time": "2026-10-20T09:00:00+02:00",
                        "end_time": "2026-10-20T12:00:00+02:00"
                    })
                    .to_string()
                }]
            }
        });
        match serde_json::from_value::<ServerEvent>(json).unwrap() {
            ServerEvent::ResponseDone { response } => {
                assert!(response.is_completed());
                assert_eq!(response.text(), None);
                let calls = response.function_calls();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "check_availability");
                assert_eq!(calls[0].call_id, "call_1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn response_text_joins_message_parts() {
        let response: ResponseObject = serde_json::from_value(json!({
            "status": "completed",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [
                    { "type": "text", "text": "Perfetto." },
                    { "type": "audio", "transcript": "A presto!" }
                ]
            }]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("Perfetto. A presto!"));
    }

    #[test]
    fn unhandled_events_are_tolerated() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "rate_limits.updated",
            "rate_limits": []
        }))
        .unwrap();
        assert!(matches!(event, ServerEvent::Other));

        let event: ServerEvent = serde_json::from_value(json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 1000,
            "item_id": "item_2"
        }))
        .unwrap();
        assert!(matches!(event, ServerEvent::SpeechStarted));
    }

    #[test]
    fn cancel_carries_only_its_type() {
        assert_eq!(
            serde_json::to_value(&ClientEvent::ResponseCancel).unwrap(),
            json!({ "type": "response.cancel" })
        );
    }

    #[test]
    fn out_of_band_speech_request_shape() {
        let event = ClientEvent::ResponseCreate {
            response: ResponseConfig::verbatim_speech("Di' ciao".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "response.create",
                "response": {
                    "modalities": ["audio", "text"],
                    "instructions": "Di' ciao",
                    "conversation": "none"
                }
            })
        );
    }
}
