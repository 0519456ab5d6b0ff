use anyhow::{Context, Result};
use serde_json::json;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reelkit::config::{ClientState, Config};
use reelkit::editor::{
    click_zoom_lane, plan_export, EditorStore, ExportSettings, FfmpegExporter, NewClip, ProjectFile,
    TrackKind, ZoomLaneClick,
};
use reelkit::progress::{
    GenerateRequest, GenerateResponse, GenerationClient, ProgressSession, ProgressState, StepStatus,
    StreamOutcome, UploadKind, UploadProgress, WsConnector,
};
use reelkit::recorder::{FfmpegCaptureBackend, RecordedArtifact, RecorderSettings, RecordingController};

use super::{
    Commands, ConfigCommands, ExportArgs, GenerateArgs, MediaCommands, ProjectCommands, RecordArgs,
    ResumeArgs,
};

pub async fn dispatch(config: &Config, config_path: Option<&Path>, command: Commands, pretty: bool) -> Result<()> {
    match command {
        Commands::Doctor => doctor(config, pretty).await,
        Commands::Generate(args) => generate(config, args, pretty).await,
        Commands::Resume(args) => resume(config, args, pretty).await,
        Commands::Questions(args) => questions(config, &args.topic, args.max, pretty).await,
        Commands::Celebrities => celebrities(config, pretty).await,
        Commands::Media { command } => media(config, command, pretty).await,
        Commands::Record(args) => record(config, args, pretty).await,
        Commands::Export(args) => export(config, args, pretty).await,
        Commands::Project { command } => project(config, command, pretty).await,
        Commands::Config { command } => config_command(config, config_path, command, pretty),
    }
}

/// Doctor command - check ffmpeg and the generation server
pub async fn doctor(config: &Config, pretty: bool) -> Result<()> {
    let mut checks = vec![];

    let backend = FfmpegCaptureBackend::from_config(config);
    checks.push(match backend.check_ffmpeg().await {
        Ok(version) => json!({
            "name": "ffmpeg",
            "status": "ok",
            "message": version,
            "path": config.ffmpeg_path()
        }),
        Err(e) => json!({
            "name": "ffmpeg",
            "status": "error",
            "message": e.to_string(),
            "path": config.ffmpeg_path()
        }),
    });

    let client = GenerationClient::new(&config.api)?;
    checks.push(match client.list_celebrities().await {
        Ok(list) => json!({
            "name": "server",
            "status": "ok",
            "message": format!("{} celebrities available", list.len()),
            "path": config.api.base_url
        }),
        Err(e) => json!({
            "name": "server",
            "status": if e.code() == "CONNECTION_FAILED" { "warning" } else { "error" },
            "message": e.to_string(),
            "path": config.api.base_url
        }),
    });

    if pretty {
        println!("reelkit doctor\n");
        for check in &checks {
            let icon = match check["status"].as_str().unwrap_or("unknown") {
                "ok" => "\u{2714}",
                "warning" => "\u{26A0}",
                "error" => "\u{2718}",
                _ => "?",
            };
            println!(
                "{} {}: {}",
                icon,
                check["name"].as_str().unwrap_or(""),
                check["message"].as_str().unwrap_or("")
            );
            if let Some(path) = check["path"].as_str() {
                println!("    Path: {}", path);
            }
        }
    } else {
        println!("{}", json!({ "checks": checks }));
    }
    Ok(())
}

pub async fn generate(config: &Config, args: GenerateArgs, pretty: bool) -> Result<()> {
    let client = GenerationClient::new(&config.api)?;

    let refined_context = if args.refine {
        Some(refine_interactively(&client, &args.topic).await?)
    } else {
        None
    };

    let request = GenerateRequest {
        topic: args.topic,
        renderer: args.renderer,
        refined_context,
        celebrities: args.celebrities,
        resume_job_id: None,
    };
    let job = client.generate(&request).await?;
    remember_job(&job.job_id, request.topic.trim());

    if args.detach {
        print_job(&job, pretty)?;
        return Ok(());
    }
    follow(&client, &job, pretty).await
}

pub async fn resume(config: &Config, args: ResumeArgs, pretty: bool) -> Result<()> {
    let state = ClientState::load(&ClientState::default_path())?;
    let (job_id, topic) = resume_target(args.job_id, args.topic, &state)?;
    let client = GenerationClient::new(&config.api)?;
    let job = client
        .resume(&job_id, &topic, args.renderer.as_deref())
        .await?;
    remember_job(&job.job_id, topic.trim());
    follow(&client, &job, pretty).await
}

/// Job id and topic for a resume request, filled in from the last recorded
/// job where the arguments leave them out.
fn resume_target(job_id: Option<String>, topic: Option<String>, state: &ClientState) -> Result<(String, String)> {
    let job_id = match job_id {
        Some(id) => id,
        None => state
            .last_job_id
            .clone()
            .context("No job id given and no previous job recorded")?,
    };
    let topic = match topic {
        Some(topic) => topic,
        None if state.last_job_id.as_deref() == Some(job_id.as_str()) => state
            .last_topic
            .clone()
            .with_context(|| format!("No topic recorded for job {}; pass --topic", job_id))?,
        None => anyhow::bail!("No topic recorded for job {}; pass --topic", job_id),
    };
    Ok((job_id, topic))
}

fn remember_job(job_id: &str, topic: &str) {
    let path = ClientState::default_path();
    let state = ClientState {
        last_job_id: Some(job_id.to_string()),
        last_topic: Some(topic.to_string()),
    };
    if let Err(e) = state.save(&path) {
        tracing::warn!("Could not record last job id: {:#}", e);
    }
}

fn print_job(job: &GenerateResponse, pretty: bool) -> Result<()> {
    if pretty {
        println!("Job {} submitted", job.job_id);
        if !job.message.is_empty() {
            println!("{}", job.message);
        }
    } else {
        println!("{}", serde_json::to_string(job)?);
    }
    Ok(())
}

/// Ask the follow-up questions on the terminal and return the refined prompt
async fn refine_interactively(client: &GenerationClient, topic: &str) -> Result<String> {
    let set = client.generate_questions(topic, 5).await?;
    if let Some(secs) = set.estimated_time_seconds {
        println!("Estimated generation time: ~{} min", secs.div_ceil(60));
    }
    let mut answers = Vec::with_capacity(set.questions.len());
    for (i, question) in set.questions.iter().enumerate() {
        print!("\n{}. {}\n> ", i + 1, question);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        answers.push(input.trim().to_string());
    }
    let refined = client.refine_prompt(topic, &set.questions, &answers).await?;
    Ok(refined.context.unwrap_or(refined.refined_prompt))
}

/// Follow the job's progress stream until it ends or Ctrl-C
async fn follow(client: &GenerationClient, job: &GenerateResponse, pretty: bool) -> Result<()> {
    let url = client.ws_url_for(job);
    let mut session = ProgressSession::new(Arc::new(WsConnector), url);
    let token = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    if pretty {
        println!("Following job {}\n", job.job_id);
    }
    let outcome = session.run(|state| print_progress(state, pretty)).await;

    match &outcome {
        StreamOutcome::Completed { result_url, duration } => {
            if pretty {
                println!("\n\u{2714} Video ready: {}", result_url.as_deref().unwrap_or("(no url)"));
                if let Some(d) = duration {
                    println!("  Duration: {:.1}s", d);
                }
            } else {
                println!(
                    "{}",
                    json!({ "event": "complete", "jobId": job.job_id, "url": result_url, "duration": duration })
                );
            }
        }
        StreamOutcome::Closed | StreamOutcome::Cancelled => {
            if pretty {
                println!("\nStopped following. Resume with: reelkit resume {}", job.job_id);
            } else {
                println!("{}", json!({ "event": "detached", "jobId": job.job_id }));
            }
        }
        StreamOutcome::Failed(_) | StreamOutcome::ConnectionLost => {}
    }
    outcome.into_result()?;
    Ok(())
}

fn print_progress(state: &ProgressState, pretty: bool) {
    if !pretty {
        let steps: Vec<_> = state
            .iter()
            .map(|(step, p)| json!({ "step": step, "status": p.status, "message": p.message, "progress": p.progress }))
            .collect();
        println!("{}", json!({ "event": "progress", "steps": steps }));
        return;
    }
    let Some(step) = state.current() else {
        return;
    };
    let detail = state.get(step);
    let percent = detail
        .and_then(|d| d.progress)
        .map(|p| format!(" {:>3.0}%", p))
        .unwrap_or_default();
    let message = detail
        .and_then(|d| d.message.as_deref())
        .map(|m| format!(" - {}", m))
        .unwrap_or_default();
    let done = state
        .iter()
        .filter(|(_, p)| p.status == StepStatus::Completed)
        .count();
    println!("[{}/8] {}{}{}", done, step.label(), percent, message);
}

pub async fn questions(config: &Config, topic: &str, max: u32, pretty: bool) -> Result<()> {
    let client = GenerationClient::new(&config.api)?;
    let set = client.generate_questions(topic, max).await?;
    if pretty {
        for (i, q) in set.questions.iter().enumerate() {
            println!("{}. {}", i + 1, q);
        }
    } else {
        println!("{}", serde_json::to_string(&set)?);
    }
    Ok(())
}

pub async fn celebrities(config: &Config, pretty: bool) -> Result<()> {
    let client = GenerationClient::new(&config.api)?;
    let list = client.list_celebrities().await?;
    if pretty {
        for c in &list {
            let audio = if c.has_audio { " (voice)" } else { "" };
            println!("{:16} {}{}", c.id, c.name, audio);
        }
    } else {
        println!("{}", serde_json::to_string(&list)?);
    }
    Ok(())
}

pub async fn media(config: &Config, command: MediaCommands, pretty: bool) -> Result<()> {
    let client = GenerationClient::new(&config.api)?;
    match command {
        MediaCommands::Upload { kind, file, user } => {
            let user = user.unwrap_or_else(|| config.api.user_id().to_string());
            let progress: Option<UploadProgress> = pretty.then(|| {
                Arc::new(|sent: u64, total: u64| {
                    print!("\rUploading... {:>3}%", sent * 100 / total.max(1));
                    let _ = io::stdout().flush();
                }) as UploadProgress
            });
            let uploaded = client.upload_media(kind, &file, &user, progress).await?;
            if pretty {
                println!("\n\u{2714} Uploaded {} as {}", file.display(), uploaded.id);
            } else {
                println!("{}", serde_json::to_string(&uploaded)?);
            }
        }
        MediaCommands::List { kind, user } => {
            let user = user.unwrap_or_else(|| config.api.user_id().to_string());
            let items = client.list_media(kind, &user).await?;
            if pretty {
                println!("{} {} file(s)", items.len(), kind_name(kind));
                for item in &items {
                    println!("  {}  {}", item.id, item.filename.as_deref().unwrap_or(""));
                }
            } else {
                println!("{}", serde_json::to_string(&items)?);
            }
        }
        MediaCommands::Delete { kind, id } => {
            client.delete_media(kind, &id).await?;
            if pretty {
                println!("\u{2714} Deleted {} {}", kind_name(kind), id);
            } else {
                println!("{}", json!({ "deleted": id }));
            }
        }
    }
    Ok(())
}

fn kind_name(kind: UploadKind) -> &'static str {
    match kind {
        UploadKind::Photo => "photo",
        UploadKind::Audio => "audio",
    }
}

pub async fn record(config: &Config, args: RecordArgs, pretty: bool) -> Result<()> {
    let mut recorder = config.recorder.clone();
    if let Some(mode) = args.mode {
        recorder.mode = mode;
    }
    if args.source.is_some() {
        recorder.source = args.source.clone();
    }
    if args.no_mic {
        recorder.microphone = false;
    }

    let backend = Arc::new(FfmpegCaptureBackend::from_config(config));
    let mut controller = RecordingController::new(backend, RecorderSettings::from(&recorder));
    controller.start_recording().await?;

    if pretty {
        match args.duration {
            Some(secs) => println!("Recording for {:.0}s (Ctrl-C to stop early)...", secs),
            None => println!("Recording... press Ctrl-C to stop"),
        }
    }
    let stop = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = stop => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                controller.cancel().await;
                return Err(e).context("Failed to listen for Ctrl-C");
            }
        }
    }

    let artifact = controller.finish().await?;
    tokio::fs::write(&args.output, artifact.to_bytes())
        .await
        .with_context(|| format!("Failed to write recording to {:?}", args.output))?;

    if let Some(project) = &args.project {
        add_to_project(config, project, &artifact, &args.output).await?;
    }

    if pretty {
        println!(
            "\u{2714} Saved {} ({:.1}s, {} bytes)",
            args.output.display(),
            artifact.duration.as_secs_f64(),
            artifact.len()
        );
    } else {
        println!(
            "{}",
            json!({
                "output": args.output,
                "mimeType": artifact.mime_type,
                "duration": artifact.duration.as_secs_f64(),
                "bytes": artifact.len(),
                "chunks": artifact.chunks.len()
            })
        );
    }
    Ok(())
}

async fn open_project(config: &Config, path: &Path) -> Result<EditorStore> {
    let mut store = EditorStore::from_config(&config.editor);
    if path.exists() {
        ProjectFile::load(path)
            .await
            .with_context(|| format!("Failed to read project {:?}", path))?
            .restore(&mut store)?;
    }
    Ok(store)
}

async fn save_project(store: &EditorStore, path: &Path) -> Result<()> {
    ProjectFile::capture(store)
        .save(path)
        .await
        .with_context(|| format!("Failed to save project {:?}", path))?;
    Ok(())
}

/// Append the recording to the end of the first unlocked video track
async fn add_to_project(config: &Config, path: &Path, artifact: &RecordedArtifact, output: &Path) -> Result<()> {
    let mut store = open_project(config, path).await?;
    let location = std::fs::canonicalize(output).unwrap_or_else(|_| output.to_path_buf());
    let name = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Recording".to_string());
    let media_id = store.add_media(artifact.to_media_item(name, location.to_string_lossy()))?;

    let existing = store
        .tracks()
        .iter()
        .find(|t| t.kind == TrackKind::Video && !t.locked)
        .map(|t| t.id.clone());
    let track_id = match existing {
        Some(id) => id,
        None => store.add_track(TrackKind::Video),
    };
    let start = store.track(&track_id).map(|t| t.end_time()).unwrap_or(0.0);
    store.add_clip(&track_id, NewClip::new(&media_id, start))?;
    save_project(&store, path).await
}

pub async fn export(config: &Config, args: ExportArgs, pretty: bool) -> Result<()> {
    let store = open_project(config, &args.project).await?;
    let mut settings = ExportSettings::from(&config.export);
    if let Some(format) = args.format {
        settings.format = format;
    }
    if let Some(quality) = args.quality {
        settings.quality = quality;
    }
    if let Some(resolution) = &args.resolution {
        let (w, h) = parse_resolution(resolution)?;
        settings.width = w;
        settings.height = h;
    }

    let clips = plan_export(&store)?;
    if pretty {
        println!("Exporting {} clip(s) at {}x{}...", clips.len(), settings.width, settings.height);
    }
    let bytes = FfmpegExporter::new(config.ffmpeg_path())
        .export(&clips, &settings)
        .await?;

    let output = args
        .output
        .unwrap_or_else(|| args.project.with_extension(settings.format.extension()));
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("Failed to write export to {:?}", output))?;

    if pretty {
        println!("\u{2714} Wrote {} ({} bytes)", output.display(), bytes.len());
    } else {
        println!(
            "{}",
            json!({ "output": output, "bytes": bytes.len(), "clips": clips.len(), "duration": store.duration() })
        );
    }
    Ok(())
}

fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("Invalid resolution {:?}, expected WIDTHxHEIGHT", value))?;
    let w: u32 = w.trim().parse().with_context(|| format!("Invalid width in {:?}", value))?;
    let h: u32 = h.trim().parse().with_context(|| format!("Invalid height in {:?}", value))?;
    if w == 0 || h == 0 {
        anyhow::bail!("Resolution must be non-zero: {}", value);
    }
    Ok((w, h))
}

pub async fn project(config: &Config, command: ProjectCommands, pretty: bool) -> Result<()> {
    match command {
        ProjectCommands::Info { project } => {
            if !project.exists() {
                anyhow::bail!("Project not found: {:?}", project);
            }
            let store = open_project(config, &project).await?;
            print_project(&store, pretty)
        }
        ProjectCommands::Split { project, time } => {
            let mut store = open_project(config, &project).await?;
            let targets: Vec<String> = store
                .tracks()
                .iter()
                .filter(|t| !t.locked)
                .filter_map(|t| t.clips.iter().find(|c| c.contains(time)).map(|c| c.id.clone()))
                .collect();
            let split: Vec<&String> = targets.iter().filter(|id| store.split_clip(id, time)).collect();
            save_project(&store, &project).await?;
            if pretty {
                println!("Split {} clip(s) at {:.2}s", split.len(), time);
            } else {
                println!("{}", json!({ "split": split, "time": time }));
            }
            Ok(())
        }
        ProjectCommands::Zoom { project, time } => {
            let mut store = open_project(config, &project).await?;
            let click = click_zoom_lane(&mut store, time)?;
            save_project(&store, &project).await?;
            let (action, id) = match &click {
                ZoomLaneClick::Created(id) => ("created", id),
                ZoomLaneClick::Selected(id) => ("selected", id),
            };
            if pretty {
                println!("Zoom segment {} {}", id, action);
            } else {
                println!("{}", json!({ "action": action, "id": id }));
            }
            Ok(())
        }
    }
}

fn print_project(store: &EditorStore, pretty: bool) -> Result<()> {
    if !pretty {
        let tracks: Vec<_> = store
            .tracks()
            .iter()
            .map(|t| json!({ "id": t.id, "kind": t.kind, "name": t.name, "clips": t.clips.len(), "locked": t.locked }))
            .collect();
        println!(
            "{}",
            json!({
                "duration": store.duration(),
                "media": store.media().len(),
                "tracks": tracks,
                "zoomSegments": store.zoom_segments()
            })
        );
        return Ok(());
    }

    println!("Duration: {:.2}s", store.duration());
    println!("Media: {} item(s)", store.media().len());
    println!("\nTracks:");
    for track in store.tracks() {
        let lock = if track.locked { " [locked]" } else { "" };
        println!("  {} ({:?}, {} clips){}", track.name, track.kind, track.clips.len(), lock);
        for clip in track.sorted_clips() {
            let name = store
                .media_item(&clip.media_id)
                .map(|m| m.name.as_str())
                .unwrap_or("?");
            println!("    {:>8.2}s - {:>8.2}s  {}", clip.start_time, clip.end_time(), name);
        }
    }
    if !store.zoom_segments().is_empty() {
        println!("\nZoom segments:");
        for seg in store.zoom_segments() {
            println!(
                "  {:>8.2}s +{:.2}s  {:.1}x {:?}",
                seg.start_time, seg.duration, seg.zoom_level, seg.mode
            );
        }
    }
    Ok(())
}

fn config_command(config: &Config, config_path: Option<&Path>, command: ConfigCommands, pretty: bool) -> Result<()> {
    let path: PathBuf = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);
    match command {
        ConfigCommands::Show => {
            if pretty {
                println!("{}", toml::to_string_pretty(config).context("Failed to serialize config")?);
            } else {
                println!("{}", serde_json::to_string(config)?);
            }
        }
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("Config already exists at {:?}; pass --force to overwrite", path);
            }
            Config::default().write(&path)?;
            if pretty {
                println!("\u{2714} Wrote default configuration to {}", path.display());
            } else {
                println!("{}", json!({ "written": path }));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_parses_width_and_height() {
        assert_eq!(parse_resolution("1280x720").unwrap(), (1280, 720));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("0x720").is_err());
    }

    #[test]
    fn resume_reuses_the_recorded_topic() {
        let state = ClientState {
            last_job_id: Some("job-42".into()),
            last_topic: Some("how tides work".into()),
        };
        let (job, topic) = resume_target(None, None, &state).unwrap();
        assert_eq!((job.as_str(), topic.as_str()), ("job-42", "how tides work"));

        let (_, topic) = resume_target(Some("job-42".into()), Some("volcanoes".into()), &state).unwrap();
        assert_eq!(topic, "volcanoes");
    }

    #[test]
    fn resume_of_an_unknown_job_needs_a_topic() {
        let state = ClientState {
            last_job_id: Some("job-42".into()),
            last_topic: Some("how tides work".into()),
        };
        assert!(resume_target(Some("job-9".into()), None, &state).is_err());
        assert!(resume_target(None, None, &ClientState::default()).is_err());
        let (job, topic) = resume_target(Some("job-9".into()), Some("volcanoes".into()), &ClientState::default()).unwrap();
        assert_eq!((job.as_str(), topic.as_str()), ("job-9", "volcanoes"));
    }
}
