pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde::xml_serde_enum;
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Connect")]
        Connect(ConnectAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub struct ConnectAction {
        #[xmlserde(ty = "untag")]
        pub connection: Connection,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum Connection {
        #[xmlserde(name = b"Stream")]
        Stream(StreamAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct StreamAction {
        #[xmlserde(name = b"url", ty = "attr")]
        pub url: String,
        #[xmlserde(name = b"name", ty = "attr")]
        pub name: Option<String>,
        #[xmlserde(name = b"track", ty = "attr")]
        pub track: Option<StreamTrack>,
    }

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        StreamTrack {
            Inbound => "inbound_track",
            Outbound => "outbound_track",
            Both => "both_tracks",
        }
    }
}
pub use twiml::*;

mod ws {
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct OutboundMarkMeta {
        pub name: String,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase", tag = "event")]
    pub enum TwilioOutbound {
        Mark {
            mark: OutboundMarkMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Media {
            media: OutboundMediaMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Clear {
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct OutboundMediaMeta {
        pub payload: String,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "lowercase", tag = "event")]
    pub enum TwilioMessage {
        Connected {
            protocol: String,
            version: String,
        },
        Start {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            start: StartMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Media {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            media: MediaMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Stop {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            stop: StopMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Mark {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            mark: MarkMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub struct StartMeta {
        #[serde(rename = "streamSid")]
        pub stream_sid: String,
        #[serde(rename = "accountSid")]
        pub account_sid: String,
        #[serde(rename = "callSid")]
        pub call_sid: String,
        #[serde(default)]
        pub tracks: Vec<String>,
        #[serde(rename = "customParameters", default)]
        pub custom_parameters: HashMap<String, String>,
        #[serde(rename = "mediaFormat")]
        pub media_format: MediaFormat,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub struct MediaFormat {
        pub encoding: String,
        #[serde(rename = "sampleRate")]
        pub sample_rate: u32,
        pub channels: u16,
    }

    #[derive(Serialize, Deserialize)]
    pub struct MediaMeta {
        pub track: MediaTrack,
        pub chunk: String,
        pub timestamp: String,
        pub payload: String,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum MediaTrack {
        Inbound,
        Outbound,
    }

    #[derive(Serialize, Deserialize)]
    pub struct StopMeta {
        #[serde(rename = "accountSid")]
        pub account_sid: String,
        #[serde(rename = "callSid")]
        pub call_sid: String,
    }

    #[derive(Serialize, Deserialize)]
    pub struct MarkMeta {
        pub name: String,
    }
}
pub use ws::*;

mod connect {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "kebab-case")]
    pub enum CallStatus {
        Queued,
        Ringing,
        InProgress,
        Completed,
        Busy,
        Failed,
        NoAnswer,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "kebab-case")]
    pub enum CallDirection {
        Inbound,
        OutboundApi,
        OutboundDial,
    }

    /// Form body of the inbound-call webhook.  SIP trunks forward custom headers as
    /// `SipHeader_<name>` fields.
    #[allow(dead_code)]
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct TwilioConnectPayload {
        pub account_sid: String,
        pub call_sid: String,
        pub call_status: CallStatus,
        pub direction: CallDirection,
        pub from: String,
        pub to: String,
        pub caller: Option<String>,
        pub called: Option<String>,
        #[serde(rename = "SipHeader_X-RecordingUrl")]
        pub sip_header_recording_url: Option<String>,
    }
}
pub use connect::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_message_with_custom_parameters() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0",
                "accountSid": "AC123",
                "callSid": "CA456",
                "tracks": ["inbound"],
                "customParameters": {"phoneNumber": "+393331112222"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ18ad3ab5a668481ce02b83e7395059f0"
        }"#;
        match serde_json::from_str::<TwilioMessage>(json).unwrap() {
            TwilioMessage::Start { start, .. } => {
                assert_eq!(start.call_sid, "CA456");
                assert_eq!(start.media_format.sample_rate, 8000);
                assert_eq!(start.custom_parameters["phoneNumber"], "+393331112222");
            }
            _ => panic!("expected a start message"),
        }
    }

    #[test]
    fn parses_connect_payload_with_sip_header() {
        let body = "AccountSid=AC123&CallSid=CA456&CallStatus=ringing&Direction=inbound\
                    &From=%2B393331112222&To=%2B390212345678\
                    &SipHeader_X-RecordingUrl=https%3A%2F%2Frec.example.com%2F1";
        let payload = serde_urlencoded::from_str::<TwilioConnectPayload>(body).unwrap();
        assert_eq!(payload.from, "+393331112222");
        assert!(matches!(payload.call_status, CallStatus::Ringing));
        assert_eq!(
            payload.sip_header_recording_url.as_deref(),
            Some("https://rec.example.com/1")
        );
    }

    #[test]
    fn outbound_clear_is_tagged_by_event() {
        let clear = TwilioOutbound::Clear {
            stream_sid: "MZ1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&clear).unwrap(),
            r#"{"event":"clear","streamSid":"MZ1"}"#
        );
    }
}
