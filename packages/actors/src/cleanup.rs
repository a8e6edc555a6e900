//! Removal of a job's scratch directories.

use std::io::ErrorKind;
use std::path::PathBuf;

use font_core::JobLayout;

use crate::job_logger::JobLogger;

/// What cleanup did, directory by directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    /// Already absent; not an error.
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every scratch directory of `layout`, continuing past failures.
///
/// Idempotent and infallible: problems are logged and reported, never raised.
pub async fn cleanup(layout: &JobLayout, logger: &JobLogger) -> CleanupReport {
    let mut report = CleanupReport::default();
    for dir in layout.scratch_dirs() {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => report.removed.push(dir),
            Err(e) if e.kind() == ErrorKind::NotFound => report.missing.push(dir),
            Err(e) => {
                logger.warn(format!("Failed to remove {}: {}", dir.display(), e));
                report.failed.push((dir, e.to_string()));
            }
        }
    }

    logger.info(format!(
        "Cleanup finished: {} removed, {} already absent, {} failed",
        report.removed.len(),
        report.missing.len(),
        report.failed.len()
    ));
    report
}
