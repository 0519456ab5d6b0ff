pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use reelkit::editor::export::{ExportFormat, ExportQuality};
use reelkit::progress::UploadKind;
use reelkit::recorder::CaptureMode;

#[derive(Parser)]
#[command(name = "reelkit")]
#[command(about = "Record the screen, edit timelines and drive AI video generation")]
#[command(version)]
pub struct Cli {
    /// Use alternate config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Human-readable output instead of JSON
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check ffmpeg and generation server availability
    Doctor,

    /// Submit a generation job and follow its progress
    Generate(GenerateArgs),

    /// Reattach to a job (defaults to the last submitted one)
    Resume(ResumeArgs),

    /// Ask the server for follow-up questions about a topic
    Questions(QuestionsArgs),

    /// List celebrities available for cameo videos
    Celebrities,

    /// Uploaded photos and audio
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },

    /// Record the screen to a WebM file
    Record(RecordArgs),

    /// Render a project timeline to a video file
    Export(ExportArgs),

    /// Project file operations
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
pub struct GenerateArgs {
    /// What the video should be about
    pub topic: String,

    /// Renderer to use on the server
    #[arg(long)]
    pub renderer: Option<String>,

    /// Celebrity id to feature (repeatable)
    #[arg(long = "celebrity")]
    pub celebrities: Vec<String>,

    /// Answer follow-up questions before submitting
    #[arg(long)]
    pub refine: bool,

    /// Submit and exit without following progress
    #[arg(long)]
    pub detach: bool,
}

#[derive(Args)]
pub struct ResumeArgs {
    /// Job id; the last submitted job when omitted
    pub job_id: Option<String>,

    /// Topic sent with the resume request; the recorded topic of the job
    /// when omitted
    #[arg(long)]
    pub topic: Option<String>,

    #[arg(long)]
    pub renderer: Option<String>,
}

#[derive(Args)]
pub struct QuestionsArgs {
    pub topic: String,

    #[arg(long, default_value_t = 5)]
    pub max: u32,
}

#[derive(Subcommand)]
pub enum MediaCommands {
    /// Upload a photo or audio file
    Upload {
        #[arg(value_enum)]
        kind: UploadKind,
        file: PathBuf,
        /// Owner; defaults to `api.user_id`
        #[arg(long)]
        user: Option<String>,
    },
    /// List uploaded files
    List {
        #[arg(value_enum)]
        kind: UploadKind,
        #[arg(long)]
        user: Option<String>,
    },
    /// Delete an uploaded file
    Delete {
        #[arg(value_enum)]
        kind: UploadKind,
        id: String,
    },
}

#[derive(Args)]
pub struct RecordArgs {
    /// Output file
    #[arg(short, long, default_value = "recording.webm")]
    pub output: PathBuf,

    /// Capture mode, overriding `recorder.mode`
    #[arg(long, value_enum)]
    pub mode: Option<CaptureMode>,

    /// Window id, display id or `WxH+X,Y` area
    #[arg(long)]
    pub source: Option<String>,

    /// Record without the microphone
    #[arg(long)]
    pub no_mic: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<f64>,

    /// Add the recording to this project file (created if missing)
    #[arg(long)]
    pub project: Option<PathBuf>,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Project JSON file
    pub project: PathBuf,

    /// Output file; defaults to the project name with the format extension
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub format: Option<ExportFormat>,

    #[arg(long, value_enum)]
    pub quality: Option<ExportQuality>,

    /// Output size as WIDTHxHEIGHT
    #[arg(long)]
    pub resolution: Option<String>,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Summarize tracks, clips and zoom segments
    Info { project: PathBuf },
    /// Split the clip under `time` on every unlocked track
    Split { project: PathBuf, time: f64 },
    /// Add a zoom segment at `time` (or select the one already there)
    Zoom { project: PathBuf, time: f64 },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
