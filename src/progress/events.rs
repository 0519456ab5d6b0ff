use serde::Deserialize;
use serde_json::Value;

use super::steps::StepUpdate;

/// Final result of a generation job.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompletionData {
    #[serde(default, alias = "videoUrl", alias = "video_url", alias = "url")]
    pub result_url: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Envelope {
    Progress {
        data: StepUpdate,
    },
    Complete {
        #[serde(default)]
        data: CompletionData,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    Ping,
}

/// One inbound frame from the progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Progress(StepUpdate),
    Complete(CompletionData),
    Error(String),
    Ping,
}

impl ServerEvent {
    /// Parse a text frame. `None` for unknown types and malformed payloads.
    pub fn parse(text: &str) -> Option<ServerEvent> {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => Some(envelope.into()),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unrecognized progress frame");
                None
            }
        }
    }
}

impl From<Envelope> for ServerEvent {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Progress { data } => ServerEvent::Progress(data),
            Envelope::Complete { data } => ServerEvent::Complete(data),
            Envelope::Error { message, data } => {
                let nested = data
                    .as_ref()
                    .and_then(|d| d.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ServerEvent::Error(
                    message
                        .or(nested)
                        .unwrap_or_else(|| "Generation failed".to_string()),
                )
            }
            Envelope::Ping => ServerEvent::Ping,
        }
    }
}
