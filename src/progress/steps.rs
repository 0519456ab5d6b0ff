use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stages of the generation pipeline, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    GeneratingScript,
    CreatingAudio,
    ExtractingTimestamps,
    PlanningVisuals,
    GeneratingAnimations,
    CreatingCelebrityVideos,
    LipSyncing,
    CompositingVideo,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 8] = [
        PipelineStep::GeneratingScript,
        PipelineStep::CreatingAudio,
        PipelineStep::ExtractingTimestamps,
        PipelineStep::PlanningVisuals,
        PipelineStep::GeneratingAnimations,
        PipelineStep::CreatingCelebrityVideos,
        PipelineStep::LipSyncing,
        PipelineStep::CompositingVideo,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::GeneratingScript => "Generating script",
            PipelineStep::CreatingAudio => "Creating audio",
            PipelineStep::ExtractingTimestamps => "Extracting timestamps",
            PipelineStep::PlanningVisuals => "Planning visuals",
            PipelineStep::GeneratingAnimations => "Generating animations",
            PipelineStep::CreatingCelebrityVideos => "Creating celebrity videos",
            PipelineStep::LipSyncing => "Lip syncing",
            PipelineStep::CompositingVideo => "Compositing video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepProgress {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// Payload of a `progress` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub step: PipelineStep,
    pub status: StepStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Latest known status per pipeline step. Steps without an update are
/// pending.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProgressState {
    steps: BTreeMap<PipelineStep, StepProgress>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert one step. Returns false when the update was dropped because
    /// the step already completed and the update would move it backwards.
    pub fn apply(&mut self, update: StepUpdate) -> bool {
        if self.status_of(update.step) == StepStatus::Completed
            && matches!(update.status, StepStatus::Pending | StepStatus::InProgress)
        {
            tracing::debug!(step = ?update.step, status = ?update.status, "ignoring regression of completed step");
            return false;
        }
        self.steps.insert(
            update.step,
            StepProgress {
                status: update.status,
                message: update.message,
                progress: update.progress.map(|p| p.clamp(0.0, 100.0)),
            },
        );
        true
    }

    pub fn status_of(&self, step: PipelineStep) -> StepStatus {
        self.steps.get(&step).map(|s| s.status).unwrap_or_default()
    }

    pub fn get(&self, step: PipelineStep) -> Option<&StepProgress> {
        self.steps.get(&step)
    }

    /// Every step in pipeline order, pending ones included
    pub fn iter(&self) -> impl Iterator<Item = (PipelineStep, StepProgress)> + '_ {
        PipelineStep::ALL
            .into_iter()
            .map(|step| (step, self.steps.get(&step).cloned().unwrap_or_default()))
    }

    /// The step currently running, if any
    pub fn current(&self) -> Option<PipelineStep> {
        PipelineStep::ALL
            .into_iter()
            .find(|s| self.status_of(*s) == StepStatus::InProgress)
    }

    /// Share of completed steps, 0-100
    pub fn percent_complete(&self) -> f64 {
        let done = PipelineStep::ALL
            .iter()
            .filter(|s| self.status_of(**s) == StepStatus::Completed)
            .count();
        done as f64 * 100.0 / PipelineStep::ALL.len() as f64
    }

    pub fn reset(&mut self) {
        self.steps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(step: PipelineStep, status: StepStatus) -> StepUpdate {
        StepUpdate {
            step,
            status,
            message: None,
            progress: None,
        }
    }

    #[test]
    fn upsert_leaves_unseen_steps_pending() {
        let mut state = ProgressState::new();
        state.apply(update(PipelineStep::GeneratingScript, StepStatus::InProgress));
        state.apply(update(PipelineStep::GeneratingScript, StepStatus::Completed));

        assert_eq!(state.status_of(PipelineStep::GeneratingScript), StepStatus::Completed);
        for (step, progress) in state.iter().skip(1) {
            assert_eq!(progress.status, StepStatus::Pending, "{:?}", step);
        }
    }

    #[test]
    fn completed_step_does_not_regress() {
        let mut state = ProgressState::new();
        state.apply(update(PipelineStep::CreatingAudio, StepStatus::Completed));
        assert!(!state.apply(update(PipelineStep::CreatingAudio, StepStatus::InProgress)));
        assert_eq!(state.status_of(PipelineStep::CreatingAudio), StepStatus::Completed);
        assert!(state.apply(update(PipelineStep::CreatingAudio, StepStatus::Error)));
    }

    #[test]
    fn iteration_follows_pipeline_order_not_arrival() {
        let mut state = ProgressState::new();
        state.apply(update(PipelineStep::CompositingVideo, StepStatus::InProgress));
        state.apply(update(PipelineStep::CreatingAudio, StepStatus::Completed));
        let order: Vec<PipelineStep> = state.iter().map(|(s, _)| s).collect();
        assert_eq!(order, PipelineStep::ALL.to_vec());
        assert_eq!(state.current(), Some(PipelineStep::CompositingVideo));
        assert_eq!(state.percent_complete(), 12.5);
    }

    #[test]
    fn step_names_use_wire_spelling() {
        let json = serde_json::to_string(&PipelineStep::CreatingCelebrityVideos).unwrap();
        assert_eq!(json, "\"creating_celebrity_videos\"");
        let status: StepStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, StepStatus::InProgress);
    }
}
