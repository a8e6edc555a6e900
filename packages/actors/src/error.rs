use std::path::PathBuf;

use font_core::{InvalidTransition, Stage};
use storage::StorageError;
use thiserror::Error;

use crate::fetch::FetchError;

/// Why a job attempt ended in FAILED.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("failed to prepare job workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("template fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("{stage} stage failed: {detail}")]
    Stage { stage: Stage, detail: String },

    #[error("compile stage did not produce {0}")]
    MissingArtifact(PathBuf),

    #[error("artifact upload failed: {0}")]
    Publish(#[from] StorageError),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}
