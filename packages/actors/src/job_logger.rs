//! Per-job log sink.
//!
//! A [`JobLogger`] is created by the processor for each job attempt and passed
//! by reference to everything that runs on the job's behalf. Every line is
//! written to the job's own log file (later uploaded next to the artifacts)
//! and mirrored to the process-wide `tracing` subscriber with the job's
//! correlation fields attached.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use font_core::{JobMessage, sanitize_segment};
use tracing::Level;

pub struct JobLogger {
    short_id: String,
    font_id: String,
    member_id: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for JobLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLogger")
            .field("short_id", &self.short_id)
            .field("path", &self.path)
            .finish()
    }
}

impl JobLogger {
    /// Open (truncating) the log file for `message` under `log_dir`.
    pub fn create(log_dir: &Path, message: &JobMessage) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(Self::file_name(message));
        let file = File::create(&path)?;
        Ok(Self {
            short_id: message.short_id().to_string(),
            font_id: message.font_id.clone(),
            member_id: message.member_id.clone(),
            path,
            file: Mutex::new(file),
        })
    }

    /// `<short>_<memberId>_<fontId>_<fontName>.log`
    ///
    /// Member id and font name are already single path segments; the other two
    /// parts are free-form and get sanitised.
    pub fn file_name(message: &JobMessage) -> String {
        format!(
            "{}_{}_{}_{}.log",
            sanitize_segment(message.short_id()),
            message.member_id,
            sanitize_segment(&message.font_id),
            message.font_name
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::WARN, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::ERROR, message.as_ref());
    }

    fn log(&self, level: Level, message: &str) {
        let (short, font_id, member_id) = (&self.short_id, &self.font_id, &self.member_id);
        match level {
            Level::ERROR => {
                tracing::error!(correlation = %short, font_id = %font_id, member_id = %member_id, "{message}")
            }
            Level::WARN => {
                tracing::warn!(correlation = %short, font_id = %font_id, member_id = %member_id, "{message}")
            }
            _ => {
                tracing::info!(correlation = %short, font_id = %font_id, member_id = %member_id, "{message}")
            }
        }

        let line = format!(
            "{} - {} - [{}] - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            level,
            short,
            message
        );
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(correlation = %short, "Failed to write job log {}: {}", self.path.display(), e);
        }
    }

    /// Push buffered lines to disk before the file is uploaded.
    pub fn flush(&self) -> io::Result<()> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}
