//! Core domain types for the font build worker.
//!
//! This crate contains shared types used across all packages:
//! - JobMessage and its schema validation
//! - Job, JobState and the stage/status enums
//! - Working-directory layout and artifact key naming

mod job;
mod layout;
mod message;

pub use job::{
    ArtifactSet, InvalidTransition, Job, JobId, JobState, JobStatus, Stage, StageResult,
};
pub use layout::{
    ArtifactKeys, CROPPED_DIR, FONTS_DIR, INFERENCE_DIR, JobLayout, SVG_DIR, TEMPLATE_DIR,
    is_path_segment, sanitize_segment,
};
pub use message::{JobMessage, MessageError, REQUIRED_FIELDS, ValidatedFields, validate_required};
