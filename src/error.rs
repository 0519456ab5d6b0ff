use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReelError>;

#[derive(Error, Debug)]
pub enum ReelError {
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Clip not found: {0}")]
    ClipNotFound(String),

    #[error("Media not found in library: {0}")]
    MediaNotFound(String),

    #[error("Zoom segment not found: {0}")]
    ZoomSegmentNotFound(String),

    #[error("Track {0} is locked")]
    TrackLocked(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("A drag gesture is already in progress on clip {0}")]
    GestureInProgress(String),

    #[error("Capture device unavailable: {0}")]
    CaptureDenied(String),

    #[error("Could not create encoder: {0}")]
    EncoderUnavailable(String),

    #[error("Recording produced no data")]
    EmptyRecording,

    #[error("Cannot {action} while {state}")]
    InvalidRecorderState { action: String, state: String },

    #[error("{}", .kind.user_message())]
    Api { kind: ApiErrorKind, detail: String },

    #[error("Connection lost, the result may still be processing")]
    ConnectionLost,

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Network failure classes, each with its own message for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    ConnectionFailed,
    Timeout,
    Server(u16),
    Client(u16),
    Other,
}

impl ApiErrorKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiErrorKind::ConnectionFailed => {
                "Cannot reach the generation server. Check that it is running and reachable."
            }
            ApiErrorKind::Timeout => "The server took too long to respond. Please try again.",
            ApiErrorKind::Server(_) => "The server hit an internal error. Please try again later.",
            ApiErrorKind::Client(_) => "The request was rejected by the server.",
            ApiErrorKind::Other => "Something went wrong while talking to the server.",
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => ApiErrorKind::Server(status),
            400..=499 => ApiErrorKind::Client(status),
            _ => ApiErrorKind::Other,
        }
    }
}

impl From<reqwest::Error> for ReelError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ApiErrorKind::Timeout
        } else if err.is_connect() {
            ApiErrorKind::ConnectionFailed
        } else if let Some(status) = err.status() {
            ApiErrorKind::from_status(status.as_u16())
        } else {
            ApiErrorKind::Other
        };
        ReelError::Api {
            kind,
            detail: err.to_string(),
        }
    }
}

impl ReelError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ReelError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Error code for JSON output
    pub fn code(&self) -> &'static str {
        match self {
            ReelError::TrackNotFound(_) => "TRACK_NOT_FOUND",
            ReelError::ClipNotFound(_) => "CLIP_NOT_FOUND",
            ReelError::MediaNotFound(_) => "MEDIA_NOT_FOUND",
            ReelError::ZoomSegmentNotFound(_) => "ZOOM_SEGMENT_NOT_FOUND",
            ReelError::TrackLocked(_) => "TRACK_LOCKED",
            ReelError::InvalidValue { .. } => "INVALID_VALUE",
            ReelError::GestureInProgress(_) => "GESTURE_IN_PROGRESS",
            ReelError::CaptureDenied(_) => "CAPTURE_DENIED",
            ReelError::EncoderUnavailable(_) => "ENCODER_UNAVAILABLE",
            ReelError::EmptyRecording => "EMPTY_RECORDING",
            ReelError::InvalidRecorderState { .. } => "INVALID_RECORDER_STATE",
            ReelError::Api { kind, .. } => match kind {
                ApiErrorKind::ConnectionFailed => "CONNECTION_FAILED",
                ApiErrorKind::Timeout => "TIMEOUT",
                ApiErrorKind::Server(_) => "SERVER_ERROR",
                ApiErrorKind::Client(_) => "CLIENT_ERROR",
                ApiErrorKind::Other => "API_ERROR",
            },
            ReelError::ConnectionLost => "CONNECTION_LOST",
            ReelError::GenerationFailed(_) => "GENERATION_FAILED",
            ReelError::ExportFailed(_) => "EXPORT_FAILED",
            ReelError::Io(_) => "IO_ERROR",
            ReelError::Json(_) => "JSON_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(ApiErrorKind::from_status(503), ApiErrorKind::Server(503));
        assert_eq!(ApiErrorKind::from_status(404), ApiErrorKind::Client(404));
        assert_eq!(ApiErrorKind::from_status(302), ApiErrorKind::Other);
    }

    #[test]
    fn api_errors_display_the_user_message() {
        let err = ReelError::Api {
            kind: ApiErrorKind::Timeout,
            detail: "operation timed out".into(),
        };
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.to_string().contains("too long"));
    }
}
