//! JSON messages of the bidirectional streaming protocol.

use super::{ChannelEvent, OpenRequest};
use crate::codec::TransportBlob;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client -> service
// ---------------------------------------------------------------------------

/// First message on a new connection.
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
struct TextPart {
    text: String,
}

impl SetupMessage {
    /// Build the setup message for an open request.
    #[must_use]
    pub fn new(request: &OpenRequest) -> Self {
        let model = if request.model.starts_with("models/") {
            request.model.clone()
        } else {
            format!("models/{}", request.model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![request.response_modality.as_wire()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: request.voice_name.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: request.instructions.clone(),
                    }],
                },
            },
        }
    }
}

/// Streamed microphone audio.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    data: String,
    mime_type: String,
}

impl RealtimeInputMessage {
    /// Wrap one outbound blob.
    #[must_use]
    pub fn new(blob: &TransportBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    data: blob.payload().to_owned(),
                    mime_type: blob.format().mime_type(),
                }],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Service -> client
// ---------------------------------------------------------------------------

/// Any message from the service. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: Option<String>,
}

/// Notice that the service will end the connection soon.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Remaining time before disconnect, as sent by the service.
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Parse a message from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `text` is not a valid message object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The go-away notice, if present.
    #[must_use]
    pub fn go_away(&self) -> Option<&GoAway> {
        self.go_away.as_ref()
    }

    /// Channel events carried by this message, in delivery order.
    ///
    /// Only the first part of a model turn is read. Audio precedes the
    /// interruption flag when both are present.
    #[must_use]
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(ChannelEvent::Opened);
        }
        if let Some(content) = self.server_content {
            if let Some(data) = content
                .model_turn
                .and_then(|turn| turn.parts.into_iter().next())
                .and_then(|part| part.inline_data)
                .and_then(|inline| inline.data)
                .filter(|data| !data.is_empty())
            {
                events.push(ChannelEvent::AudioChunk(data));
            }
            if content.interrupted {
                events.push(ChannelEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ChannelEvent::TurnComplete);
            }
        }
        events
    }
}
