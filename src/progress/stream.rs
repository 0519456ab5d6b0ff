use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::events::ServerEvent;
use super::steps::ProgressState;
use crate::error::{ReelError, Result};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// The stream ended. `clean` is a normal close handshake.
    Closed { clean: bool },
}

#[async_trait]
pub trait EventConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn EventSource>>;
}

#[async_trait]
pub trait EventSource: Send {
    /// Next text frame or the end of the stream
    async fn next_frame(&mut self) -> Frame;
}

/// Websocket transport
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

struct WsSource {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EventConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn EventSource>> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| ReelError::Api {
            kind: crate::error::ApiErrorKind::ConnectionFailed,
            detail: e.to_string(),
        })?;
        tracing::debug!(url, "progress stream connected");
        Ok(Box::new(WsSource { socket }))
    }
}

#[async_trait]
impl EventSource for WsSource {
    async fn next_frame(&mut self) -> Frame {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame.map_or(true, |f| f.code == CloseCode::Normal);
                    return Frame::Closed { clean };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "progress stream errored");
                    return Frame::Closed { clean: false };
                }
                None => return Frame::Closed { clean: false },
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        result_url: Option<String>,
        duration: Option<f64>,
    },
    /// The job reported an error
    Failed(String),
    /// Reconnects exhausted; the job may still finish server-side
    ConnectionLost,
    /// Server closed the stream normally before a result arrived
    Closed,
    Cancelled,
}

impl StreamOutcome {
    pub fn into_result(self) -> Result<Option<String>> {
        match self {
            StreamOutcome::Completed { result_url, .. } => Ok(result_url),
            StreamOutcome::Failed(message) => Err(ReelError::GenerationFailed(message)),
            StreamOutcome::ConnectionLost => Err(ReelError::ConnectionLost),
            StreamOutcome::Closed | StreamOutcome::Cancelled => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: RECONNECT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

enum Drained {
    Finished(StreamOutcome),
    Dropped,
}

/// Follows one job's progress stream until it reaches a terminal outcome.
pub struct ProgressSession {
    connector: Arc<dyn EventConnector>,
    url: String,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state: ProgressState,
    connects: u32,
}

impl ProgressSession {
    pub fn new(connector: Arc<dyn EventConnector>, url: impl Into<String>) -> Self {
        Self {
            connector,
            url: url.into(),
            policy: ReconnectPolicy::default(),
            cancel: CancellationToken::new(),
            state: ProgressState::new(),
            connects: 0,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token that tears the session down, including any pending backoff
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Connection attempts made so far, the first one included
    pub fn connects(&self) -> u32 {
        self.connects
    }

    /// Consume the stream, calling `on_update` after every applied step
    /// update.
    pub async fn run<F>(&mut self, mut on_update: F) -> StreamOutcome
    where
        F: FnMut(&ProgressState) + Send,
    {
        let mut attempt = 0;
        loop {
            self.connects += 1;
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                c = self.connector.connect(&self.url) => c,
            };
            match connected {
                Ok(mut source) => {
                    match self.drain(source.as_mut(), &mut attempt, &mut on_update).await {
                        Drained::Finished(outcome) => return outcome,
                        Drained::Dropped => {}
                    }
                }
                Err(e) => tracing::warn!(error = %e, "progress stream connection failed"),
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(attempts = attempt, "giving up on progress stream");
                return StreamOutcome::ConnectionLost;
            }
            attempt += 1;
            let delay = self.policy.delay(attempt);
            tracing::info!(attempt, ?delay, "progress stream dropped, reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn drain<F>(&mut self, source: &mut dyn EventSource, attempt: &mut u32, on_update: &mut F) -> Drained
    where
        F: FnMut(&ProgressState) + Send,
    {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Drained::Finished(StreamOutcome::Cancelled),
                f = source.next_frame() => f,
            };
            let text = match frame {
                Frame::Text(text) => text,
                Frame::Closed { clean: true } => {
                    tracing::debug!("progress stream closed by server");
                    return Drained::Finished(StreamOutcome::Closed);
                }
                Frame::Closed { clean: false } => return Drained::Dropped,
            };
            // the reconnected stream is healthy again
            *attempt = 0;

            match ServerEvent::parse(&text) {
                Some(ServerEvent::Progress(update)) => {
                    if self.state.apply(update) {
                        on_update(&self.state);
                    }
                }
                Some(ServerEvent::Complete(data)) => {
                    tracing::info!(result = ?data.result_url, "generation complete");
                    return Drained::Finished(StreamOutcome::Completed {
                        result_url: data.result_url,
                        duration: data.duration,
                    });
                }
                Some(ServerEvent::Error(message)) => {
                    tracing::warn!(%message, "generation failed");
                    return Drained::Finished(StreamOutcome::Failed(message));
                }
                Some(ServerEvent::Ping) | None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::steps::{PipelineStep, StepStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Each connect pops one scripted session; an empty script fails to
    /// connect.
    struct Scripted {
        sessions: Mutex<VecDeque<Vec<Frame>>>,
        connected_at: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(sessions: Vec<Vec<Frame>>) -> Arc<Self> {
            Arc::new(Self {
                sessions: Mutex::new(sessions.into()),
                connected_at: Mutex::new(Vec::new()),
            })
        }
    }

    struct ScriptedSource(VecDeque<Frame>);

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_frame(&mut self) -> Frame {
            match self.0.pop_front() {
                Some(frame) => frame,
                // hang like an idle socket
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl EventConnector for Scripted {
        async fn connect(&self, _url: &str) -> Result<Box<dyn EventSource>> {
            self.connected_at.lock().unwrap().push(Instant::now());
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(frames) => Ok(Box::new(ScriptedSource(frames.into()))),
                None => Err(ReelError::ConnectionLost),
            }
        }
    }

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    fn dropped() -> Frame {
        Frame::Closed { clean: false }
    }

    #[tokio::test]
    async fn progress_then_completion() {
        let connector = Scripted::new(vec![vec![
            text(r#"{"type":"progress","data":{"step":"generating_script","status":"in_progress"}}"#),
            text(r#"{"type":"ping"}"#),
            text(r#"{"type":"progress","data":{"step":"generating_script","status":"completed"}}"#),
            text(r#"{"type":"complete","data":{"videoUrl":"/videos/job-1.mp4","duration":42.0}}"#),
        ]]);
        let mut session = ProgressSession::new(connector, "ws://test/ws/job-1");
        let mut updates = 0;
        let outcome = session.run(|_| updates += 1).await;

        assert_eq!(
            outcome,
            StreamOutcome::Completed {
                result_url: Some("/videos/job-1.mp4".into()),
                duration: Some(42.0)
            }
        );
        assert_eq!(updates, 2);
        assert_eq!(session.state().status_of(PipelineStep::GeneratingScript), StepStatus::Completed);
        assert_eq!(session.state().status_of(PipelineStep::CreatingAudio), StepStatus::Pending);
    }

    #[tokio::test]
    async fn four_drops_make_three_attempts_then_connection_lost() {
        tokio::time::pause();
        let connector = Scripted::new(vec![vec![dropped()], vec![dropped()], vec![dropped()], vec![dropped()]]);
        let mut session = ProgressSession::new(connector.clone(), "ws://test/ws/job-2");
        let outcome = session.run(|_| {}).await;

        assert_eq!(outcome, StreamOutcome::ConnectionLost);
        assert_eq!(session.connects(), 4);
        let times = connector.connected_at.lock().unwrap().clone();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        // the paused clock still advances by a millisecond per timer tick
        for (attempt, gap) in (1u64..).zip(&gaps) {
            let expected = Duration::from_secs(2 * attempt);
            assert!(
                *gap >= expected && *gap - expected < Duration::from_millis(10),
                "attempt {} waited {:?}",
                attempt,
                gap
            );
        }
    }

    #[tokio::test]
    async fn error_event_suppresses_reconnect() {
        let connector = Scripted::new(vec![vec![text(r#"{"type":"error","message":"boom"}"#), dropped()]]);
        let mut session = ProgressSession::new(connector, "ws://test");
        assert_eq!(session.run(|_| {}).await, StreamOutcome::Failed("boom".into()));
        assert_eq!(session.connects(), 1);
    }

    #[tokio::test]
    async fn clean_close_suppresses_reconnect() {
        let connector = Scripted::new(vec![vec![Frame::Closed { clean: true }]]);
        let mut session = ProgressSession::new(connector, "ws://test");
        assert_eq!(session.run(|_| {}).await, StreamOutcome::Closed);
        assert_eq!(session.connects(), 1);
    }

    #[tokio::test]
    async fn frame_on_reconnected_stream_resets_attempts() {
        tokio::time::pause();
        let ping = || text(r#"{"type":"ping"}"#);
        let connector = Scripted::new(vec![
            vec![dropped()],
            vec![dropped()],
            vec![ping(), dropped()],
            vec![dropped()],
            vec![dropped()],
            vec![text(r#"{"type":"complete","data":{}}"#)],
        ]);
        let mut session = ProgressSession::new(connector, "ws://test");
        let outcome = session.run(|_| {}).await;
        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        assert_eq!(session.connects(), 6);
    }

    #[tokio::test]
    async fn cancel_clears_pending_backoff() {
        tokio::time::pause();
        let connector = Scripted::new(vec![vec![dropped()], vec![text(r#"{"type":"complete","data":{}}"#)]]);
        let mut session = ProgressSession::new(connector, "ws://test");
        let token = session.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });
        assert_eq!(session.run(|_| {}).await, StreamOutcome::Cancelled);
        assert_eq!(session.connects(), 1);
    }

    #[test]
    fn outcomes_map_to_errors() {
        assert!(matches!(StreamOutcome::ConnectionLost.into_result(), Err(ReelError::ConnectionLost)));
        assert!(matches!(
            StreamOutcome::Failed("x".into()).into_result(),
            Err(ReelError::GenerationFailed(_))
        ));
    }
}
