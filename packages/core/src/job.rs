//! Job domain types: identity, lifecycle state machine, stage outcomes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::layout::{ArtifactKeys, JobLayout};
use crate::message::JobMessage;

/// Identifier of one processing attempt, using ULID for chronological sorting.
///
/// A redelivered message gets a fresh id; the correlation id stays the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status announced to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Progress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Progress => "PROGRESS",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Progress)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four external build stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Crop,
    Infer,
    Vectorize,
    Compile,
}

impl Stage {
    /// Fixed execution order.
    pub const ALL: [Stage; 4] = [Stage::Crop, Stage::Infer, Stage::Vectorize, Stage::Compile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Crop => "crop",
            Stage::Infer => "infer",
            Stage::Vectorize => "vectorize",
            Stage::Compile => "compile",
        }
    }

    /// Prefix for the stage's output lines in the job log.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Crop => "CROP",
            Stage::Infer => "INFERENCE",
            Stage::Vectorize => "SVG",
            Stage::Compile => "TTF/WOFF",
        }
    }

    /// Conventional executable name inside the scripts directory.
    pub fn default_program(&self) -> &'static str {
        match self {
            Stage::Crop => "1_crop_glyphs.sh",
            Stage::Infer => "2_run_inference.sh",
            Stage::Vectorize => "3_run_jpg2svg.sh",
            Stage::Compile => "4_run_svg2ttf.sh",
        }
    }

    /// Command-line arguments the stage is invoked with.
    pub fn args(&self, message: &JobMessage) -> Vec<String> {
        match self {
            Stage::Compile => vec![
                "-f".to_string(),
                message.font_name.clone(),
                "-e".to_string(),
                message.font_eng_name.clone(),
            ],
            _ => vec![message.font_name.clone()],
        }
    }

    /// Lifecycle state while this stage runs.
    pub fn state(&self) -> JobState {
        match self {
            Stage::Crop => JobState::StageCrop,
            Stage::Infer => JobState::StageInfer,
            Stage::Vectorize => JobState::StageVectorize,
            Stage::Compile => JobState::StageCompile,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a job attempt.
///
/// The happy path is strictly linear; every non-terminal state may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    Validated,
    FetchingInput,
    StageCrop,
    StageInfer,
    StageVectorize,
    StageCompile,
    Publishing,
    Reporting,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// The next state on the success path, if any.
    pub fn successor(&self) -> Option<JobState> {
        use JobState::*;
        match self {
            Received => Some(Validated),
            Validated => Some(FetchingInput),
            FetchingInput => Some(StageCrop),
            StageCrop => Some(StageInfer),
            StageInfer => Some(StageVectorize),
            StageVectorize => Some(StageCompile),
            StageCompile => Some(Publishing),
            Publishing => Some(Reporting),
            Reporting => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobState::Failed || self.successor() == Some(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Validated => "validated",
            JobState::FetchingInput => "fetching_input",
            JobState::StageCrop => "stage_crop",
            JobState::StageInfer => "stage_infer",
            JobState::StageVectorize => "stage_vectorize",
            JobState::StageCompile => "stage_compile",
            JobState::Publishing => "publishing",
            JobState::Reporting => "reporting",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Outcome of one stage invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    /// Process exit code; `None` if it never started, was killed, or timed out.
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Combined stdout/stderr, trimmed, blank lines dropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    pub elapsed: Duration,
    #[serde(default)]
    pub timed_out: bool,
}

/// Locators of everything a job durably stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub font_ttf: String,
    pub font_woff2: String,
    /// Filled once the log has been uploaded, which happens last.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// A validated job in flight.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub message: JobMessage,
    pub layout: JobLayout,
    pub keys: ArtifactKeys,
    state: JobState,
    /// Every state entered, with the time it was entered.
    trail: Vec<(JobState, DateTime<Utc>)>,
    history: Vec<StageResult>,
}

impl Job {
    /// Build a job from a message that already passed validation.
    pub fn new(message: JobMessage, received_at: DateTime<Utc>, layout: JobLayout) -> Self {
        let keys = ArtifactKeys::for_message(&message);
        Self {
            id: JobId::new(),
            message,
            layout,
            keys,
            state: JobState::Validated,
            trail: vec![
                (JobState::Received, received_at),
                (JobState::Validated, Utc::now()),
            ],
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn trail(&self) -> impl Iterator<Item = JobState> + '_ {
        self.trail.iter().map(|(state, _)| *state)
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.trail[0].1
    }

    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.trail.push((next, Utc::now()));
        Ok(())
    }

    /// Move to FAILED from wherever the job is; a no-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
            self.trail.push((JobState::Failed, Utc::now()));
        }
    }

    pub fn record(&mut self, result: StageResult) {
        self.history.push(result);
    }

    pub fn history(&self) -> &[StageResult] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        let message = JobMessage {
            font_id: "1".into(),
            file_key: "k".into(),
            member_id: "m".into(),
            font_name: "F".into(),
            font_eng_name: "F".into(),
            template_url: "t.png".into(),
            author: "a".into(),
            request_uuid: "r".into(),
        };
        let layout = JobLayout::for_message("/tmp", &message);
        Job::new(message, Utc::now(), layout)
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut job = job();
        let mut state = job.state();
        while let Some(next) = state.successor() {
            job.transition(next).expect("linear transition");
            state = next;
        }
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(job.trail().count(), 10);
        assert_eq!(job.trail().next(), Some(JobState::Received));
    }

    #[test]
    fn stages_cannot_be_skipped() {
        let mut job = job();
        job.transition(JobState::FetchingInput).expect("fetch");
        job.transition(JobState::StageCrop).expect("crop");
        let err = job
            .transition(JobState::StageCompile)
            .expect_err("skip to compile");
        assert_eq!(err.from, JobState::StageCrop);
        assert_eq!(job.state(), JobState::StageCrop);
    }

    #[test]
    fn every_non_terminal_state_may_fail() {
        let mut state = JobState::Received;
        while let Some(next) = state.successor() {
            assert!(state.can_transition_to(JobState::Failed), "{state}");
            state = next;
        }
        assert!(!JobState::Done.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
    }

    #[test]
    fn fail_is_idempotent() {
        let mut job = job();
        job.fail();
        job.fail();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.trail().filter(|s| *s == JobState::Failed).count(), 1);
    }

    #[test]
    fn stage_order_and_arguments() {
        let job = job();
        assert_eq!(
            Stage::ALL.map(|s| s.state()),
            [
                JobState::StageCrop,
                JobState::StageInfer,
                JobState::StageVectorize,
                JobState::StageCompile
            ]
        );
        assert_eq!(Stage::Crop.args(&job.message), vec!["F"]);
        assert_eq!(Stage::Compile.args(&job.message), vec!["-f", "F", "-e", "F"]);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Progress).expect("serialize"),
            "\"PROGRESS\""
        );
        assert!(JobStatus::Done.is_terminal());
        assert!(!JobStatus::Progress.is_terminal());
    }
}
