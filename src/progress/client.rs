use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use crate::config::ApiConfig;
use crate::error::{ApiErrorKind, ReelError, Result};

pub const MIN_TOPIC_LEN: usize = 3;
pub const MAX_TOPIC_LEN: usize = 500;
pub const MAX_PHOTO_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_AUDIO_BYTES: u64 = 25 * 1024 * 1024;
pub const MIN_PHOTO_SIDE: u32 = 256;

/// Called with `(bytes_sent, total_bytes)` while an upload streams.
pub type UploadProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Photo,
    Audio,
}

impl UploadKind {
    fn path(&self) -> &'static str {
        match self {
            UploadKind::Photo => "photo",
            UploadKind::Audio => "audio",
        }
    }

    fn max_bytes(&self) -> u64 {
        match self {
            UploadKind::Photo => MAX_PHOTO_BYTES,
            UploadKind::Audio => MAX_AUDIO_BYTES,
        }
    }

    /// MIME type for an accepted file extension
    fn mime_for(&self, extension: &str) -> Option<&'static str> {
        match (self, extension) {
            (UploadKind::Photo, "jpg" | "jpeg") => Some("image/jpeg"),
            (UploadKind::Photo, "png") => Some("image/png"),
            (UploadKind::Photo, "webp") => Some("image/webp"),
            (UploadKind::Audio, "mp3") => Some("audio/mpeg"),
            (UploadKind::Audio, "wav") => Some("audio/wav"),
            (UploadKind::Audio, "m4a") => Some("audio/mp4"),
            (UploadKind::Audio, "ogg") => Some("audio/ogg"),
            (UploadKind::Audio, "webm") => Some("audio/webm"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined_context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub celebrities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_job_id: Option<String>,
}

impl GenerateRequest {
    /// Copy with the topic validated and trimmed, as it goes on the wire
    pub fn normalized(&self) -> Result<Self> {
        let topic = validate_topic(&self.topic)?;
        Ok(Self {
            topic: topic.to_string(),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(rename = "jobId", alias = "job_id")]
    pub job_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "websocketUrl", alias = "websocket_url", skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub questions: Vec<String>,
    #[serde(default)]
    pub estimated_time_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedPrompt {
    pub refined_prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Celebrity {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "image_url")]
    pub image_url: Option<String>,
    #[serde(default, alias = "has_audio")]
    pub has_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Serialize)]
struct QuestionsRequest<'a> {
    topic: &'a str,
    max_questions: u32,
}

#[derive(Serialize)]
struct RefineRequest<'a> {
    original_topic: &'a str,
    questions: &'a [String],
    answers: &'a [String],
}

/// A media file that passed pre-flight checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedFile {
    pub file_name: String,
    pub mime: &'static str,
    pub size: u64,
}

/// Reject topics outside the accepted length before any request is made.
pub fn validate_topic(topic: &str) -> Result<&str> {
    let topic = topic.trim();
    let len = topic.chars().count();
    if len < MIN_TOPIC_LEN {
        return Err(ReelError::invalid(
            "topic",
            format!("must be at least {} characters", MIN_TOPIC_LEN),
        ));
    }
    if len > MAX_TOPIC_LEN {
        return Err(ReelError::invalid(
            "topic",
            format!("must be at most {} characters (got {})", MAX_TOPIC_LEN, len),
        ));
    }
    Ok(topic)
}

/// Check file type, size and, for photos, pixel dimensions.
pub fn validate_media_file(kind: UploadKind, path: &Path) -> Result<ValidatedFile> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = kind.mime_for(&extension).ok_or_else(|| {
        ReelError::invalid("file", format!("unsupported {} type: .{}", kind.path(), extension))
    })?;

    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Err(ReelError::invalid("file", "file is empty"));
    }
    if size > kind.max_bytes() {
        return Err(ReelError::invalid(
            "file",
            format!(
                "{:.1} MB exceeds the {} MB limit",
                size as f64 / (1024.0 * 1024.0),
                kind.max_bytes() / (1024 * 1024)
            ),
        ));
    }

    if kind == UploadKind::Photo {
        let (width, height) = image::image_dimensions(path)
            .map_err(|e| ReelError::invalid("file", format!("unreadable image: {}", e)))?;
        if width < MIN_PHOTO_SIDE || height < MIN_PHOTO_SIDE {
            return Err(ReelError::invalid(
                "file",
                format!(
                    "image is {}x{}, at least {}x{} required",
                    width, height, MIN_PHOTO_SIDE, MIN_PHOTO_SIDE
                ),
            ));
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("upload.{}", extension));
    Ok(ValidatedFile { file_name, mime, size })
}

/// HTTP client for the generation service.
#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    ws_base: String,
}

impl GenerationClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ws_base: config.ws_base(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Progress stream address for a submitted job
    pub fn ws_url_for(&self, job: &GenerateResponse) -> String {
        match &job.websocket_url {
            Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => url.clone(),
            Some(path) => format!("{}/{}", self.ws_base, path.trim_start_matches('/')),
            None => format!("{}/ws/{}", self.ws_base, job.job_id),
        }
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let request = request.normalized()?;
        tracing::info!(topic = %request.topic, resume = ?request.resume_job_id, "submitting generation job");
        let response = self
            .http
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await?;
        let job: GenerateResponse = decode(response).await?;
        tracing::info!(job_id = %job.job_id, "generation job accepted");
        Ok(job)
    }

    /// Pick up a previously submitted job
    pub async fn resume(&self, job_id: &str, topic: &str, renderer: Option<&str>) -> Result<GenerateResponse> {
        let request = GenerateRequest {
            topic: topic.to_string(),
            renderer: renderer.map(str::to_string),
            resume_job_id: Some(job_id.to_string()),
            ..GenerateRequest::default()
        };
        self.generate(&request).await
    }

    pub async fn generate_questions(&self, topic: &str, max_questions: u32) -> Result<QuestionSet> {
        let topic = validate_topic(topic)?;
        let response = self
            .http
            .post(self.url("/api/generate-questions"))
            .json(&QuestionsRequest { topic, max_questions })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn refine_prompt(
        &self,
        original_topic: &str,
        questions: &[String],
        answers: &[String],
    ) -> Result<RefinedPrompt> {
        let original_topic = validate_topic(original_topic)?;
        if questions.len() != answers.len() {
            return Err(ReelError::invalid(
                "answers",
                format!("{} answers for {} questions", answers.len(), questions.len()),
            ));
        }
        let response = self
            .http
            .post(self.url("/api/refine-prompt"))
            .json(&RefineRequest {
                original_topic,
                questions,
                answers,
            })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn list_celebrities(&self) -> Result<Vec<Celebrity>> {
        let response = self.http.get(self.url("/api/celebrities")).send().await?;
        decode(response).await
    }

    /// Validate and stream a file to the media store.
    pub async fn upload_media(
        &self,
        kind: UploadKind,
        path: &Path,
        user_id: &str,
        on_progress: Option<UploadProgress>,
    ) -> Result<UploadedMedia> {
        let file = validate_media_file(kind, path)?;
        let total = file.size;
        tracing::info!(file = %file.file_name, bytes = total, "uploading {}", kind.path());

        let reader = tokio::fs::File::open(path).await?;
        let mut sent = 0u64;
        let stream = ReaderStream::new(reader).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                if let Some(report) = &on_progress {
                    report(sent, total);
                }
            }
            chunk
        });
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file.file_name)
            .mime_str(file.mime)?;
        let form = Form::new().text("user_id", user_id.to_string()).part("file", part);

        let response = self
            .http
            .post(self.url(&format!("/api/media/{}", kind.path())))
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn list_media(&self, kind: UploadKind, user_id: &str) -> Result<Vec<UploadedMedia>> {
        let response = self
            .http
            .get(self.url(&format!("/api/media/{}", kind.path())))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn delete_media(&self, kind: UploadKind, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/media/{}/{}", kind.path(), id)))
            .send()
            .await?;
        check_status(response).await?;
        tracing::info!(id, "deleted {}", kind.path());
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ReelError::Api {
        kind: ApiErrorKind::from_status(status.as_u16()),
        detail: error_detail(&body).unwrap_or_else(|| status.to_string()),
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

/// Server-provided reason from a `{"detail": ...}` or `{"error": ...}` body
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "message"]
        .iter()
        .find_map(|key| value.get(key))
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GenerationClient {
        GenerationClient::new(&ApiConfig {
            base_url: "http://127.0.0.1:1/".into(),
            timeout_secs: 2,
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn topic_length_is_checked_before_sending() {
        assert!(validate_topic("  ab ").is_err());
        assert_eq!(validate_topic("  black holes ").unwrap(), "black holes");
        let long = "x".repeat(MAX_TOPIC_LEN + 1);
        let err = validate_topic(&long).unwrap_err();
        assert_eq!(err.code(), "INVALID_VALUE");
    }

    #[test]
    fn socket_url_prefers_the_server_hint() {
        let client = client();
        let mut job = GenerateResponse {
            job_id: "abc".into(),
            message: String::new(),
            websocket_url: None,
        };
        assert_eq!(client.ws_url_for(&job), "ws://127.0.0.1:1/ws/abc");
        job.websocket_url = Some("/ws/custom".into());
        assert_eq!(client.ws_url_for(&job), "ws://127.0.0.1:1/ws/custom");
        job.websocket_url = Some("wss://push.example.com/ws/abc".into());
        assert_eq!(client.ws_url_for(&job), "wss://push.example.com/ws/abc");
    }

    #[test]
    fn generate_response_accepts_both_spellings() {
        let camel: GenerateResponse =
            serde_json::from_str(r#"{"jobId":"j1","message":"queued","websocketUrl":"/ws/j1"}"#).unwrap();
        let snake: GenerateResponse = serde_json::from_str(r#"{"job_id":"j1"}"#).unwrap();
        assert_eq!(camel.job_id, snake.job_id);
        assert_eq!(camel.websocket_url.as_deref(), Some("/ws/j1"));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let err = validate_media_file(UploadKind::Audio, &path).unwrap_err();
        assert!(err.to_string().contains("unsupported audio type"));
    }

    #[test]
    fn small_photos_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.png");
        image::RgbImage::new(64, 64).save(&small).unwrap();
        let err = validate_media_file(UploadKind::Photo, &small).unwrap_err();
        assert!(err.to_string().contains("64x64"));

        let ok = dir.path().join("ok.png");
        image::RgbImage::new(300, 300).save(&ok).unwrap();
        let file = validate_media_file(UploadKind::Photo, &ok).unwrap();
        assert_eq!(file.mime, "image/png");
        assert_eq!(file.file_name, "ok.png");
    }

    #[test]
    fn oversized_audio_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.mp3");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_AUDIO_BYTES + 1).unwrap();
        let err = validate_media_file(UploadKind::Audio, &path).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn error_detail_reads_common_shapes() {
        assert_eq!(error_detail(r#"{"detail":"topic too vague"}"#).as_deref(), Some("topic too vague"));
        assert_eq!(error_detail(r#"{"error":"nope"}"#).as_deref(), Some("nope"));
        assert_eq!(error_detail(r#"{"other":1}"#).as_deref(), Some(r#"{"other":1}"#));
        assert_eq!(error_detail("<html>"), None);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_failure() {
        let err = client().list_celebrities().await.unwrap_err();
        assert!(matches!(
            err,
            ReelError::Api {
                kind: ApiErrorKind::ConnectionFailed,
                ..
            }
        ));
    }

    #[test]
    fn normalized_request_carries_the_trimmed_topic() {
        let request = GenerateRequest {
            topic: "  black holes \n".into(),
            resume_job_id: Some("j1".into()),
            ..GenerateRequest::default()
        };
        let normalized = request.normalized().unwrap();
        assert_eq!(normalized.topic, "black holes");
        assert_eq!(normalized.resume_job_id.as_deref(), Some("j1"));
    }

    /// Accept one HTTP request, answer it with `reply` and hand back the body.
    async fn answer_once(listener: tokio::net::TcpListener, reply: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        let body = loop {
            let n = socket.read(&mut buf).await.unwrap();
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let length = head
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if body.len() >= length {
                    break body.to_string();
                }
            }
            if n == 0 {
                break String::new();
            }
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            reply.len(),
            reply
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        body
    }

    #[tokio::test]
    async fn generate_sends_the_trimmed_topic() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(answer_once(listener, r#"{"jobId":"j7"}"#));
        let client = GenerationClient::new(&ApiConfig {
            base_url: format!("http://{}", addr),
            timeout_secs: 5,
            ..ApiConfig::default()
        })
        .unwrap();

        let job = client
            .generate(&GenerateRequest {
                topic: "   how tides work   ".into(),
                ..GenerateRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(job.job_id, "j7");
        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["topic"], "how tides work");
    }

    #[tokio::test]
    async fn invalid_topic_never_reaches_the_network() {
        let err = client()
            .generate(&GenerateRequest {
                topic: "hi".into(),
                ..GenerateRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_VALUE");
    }
}
