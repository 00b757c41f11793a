//! Wire model of the live conversation endpoint
//!
//! Client frames are externally tagged JSON objects (`{"setup": ...}`,
//! `{"realtimeInput": ...}`); server frames carry at most one of
//! `setupComplete`, `serverContent` or `goAway`. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

use crate::events::{AudioFragment, InboundMessage};

/// MIME type of every outbound audio chunk
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Messages sent by the client
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Opening frame: model, spoken responses in `voice`, persona text
    pub fn setup(model: &str, voice: &str, system_instruction: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part::text(system_instruction)],
            },
        })
    }

    /// One base64 PCM16 block at 16kHz
    pub fn realtime_audio(data: &str) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: INPUT_MIME_TYPE.to_string(),
                data: data.to_string(),
            }],
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Base64 payload with its MIME type
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Raw server frame
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// What a server frame means to the session
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Content(InboundMessage),
    /// The server will close soon
    GoAway { time_left: Option<String> },
    /// Nothing actionable (transcripts, usage metadata, empty content)
    Ignored,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn into_event(self) -> ServerEvent {
        if self.setup_complete.is_some() {
            return ServerEvent::SetupComplete;
        }

        if let Some(go_away) = self.go_away {
            return ServerEvent::GoAway {
                time_left: go_away.time_left,
            };
        }

        match self.server_content.and_then(ServerContent::into_inbound) {
            Some(message) => ServerEvent::Content(message),
            None => ServerEvent::Ignored,
        }
    }
}

impl ServerContent {
    /// Collapse the optional fields into one tagged message
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let fragments: Vec<AudioFragment> = self
            .model_turn
            .map(|turn| turn.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.inline_data)
            .filter(|blob| blob.mime_type.starts_with("audio/"))
            .map(|blob| AudioFragment {
                mime_type: blob.mime_type,
                data: blob.data,
            })
            .collect();

        match (self.interrupted, fragments.is_empty()) {
            (true, true) => Some(InboundMessage::Interrupted),
            (true, false) => Some(InboundMessage::InterruptedThenAudio(fragments)),
            (false, false) => Some(InboundMessage::Audio(fragments)),
            (false, true) if self.turn_complete => Some(InboundMessage::TurnComplete),
            (false, true) => None,
        }
    }
}
