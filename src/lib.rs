pub mod config;
pub mod editor;
pub mod error;
pub mod progress;
pub mod recorder;

pub use config::{ClientState, Config};
pub use editor::EditorStore;
pub use error::{ApiErrorKind, ReelError, Result};
pub use progress::{GenerationClient, ProgressSession, ProgressState, StreamOutcome};
pub use recorder::{CaptureBackend, FfmpegCaptureBackend, RecordedArtifact, RecordingController, RecordingState};
