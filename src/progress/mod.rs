pub mod client;
pub mod events;
pub mod steps;
pub mod stream;

pub use client::{
    validate_media_file, validate_topic, Celebrity, GenerateRequest, GenerateResponse, GenerationClient,
    QuestionSet, RefinedPrompt, UploadKind, UploadProgress, UploadedMedia,
};
pub use events::{CompletionData, ServerEvent};
pub use steps::{PipelineStep, ProgressState, StepProgress, StepStatus, StepUpdate};
pub use stream::{
    EventConnector, EventSource, Frame, ProgressSession, ReconnectPolicy, StreamOutcome, WsConnector,
};
