#![allow(dead_code)]

use std::error::Error;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    Collaborators, FetchError, JobProcessor, StatusAck, StatusConfig, StatusError,
    StatusReporter, TemplateFetcher, TemplateSource, WorkerConfig,
};
use bytes::Bytes;
use font_core::{JobLayout, JobMessage, JobStatus, Stage};
use serde_json::{Value, json};
use storage::{ArtifactStore, BoxFuture, Storage, StorageConfig, StorageError};
use tempfile::TempDir;
use work_queue::{DeadLetter, MemoryQueue, QueueError, ReceivedMessage, WorkQueue};

pub const TEMPLATE_KEY: &str = "templates/7.png";

/// A tiny PNG: header chunk and end marker, no pixel data.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 2, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(b"IEND");
    bytes.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
    bytes
}

pub fn job_json(font_id: &str, file_key: &str, request_uuid: &str) -> Value {
    json!({
        "fontId": font_id,
        "fileKey": file_key,
        "memberId": "7",
        "fontName": "Brush",
        "fontEngName": "BrushEng",
        "templateUrl": TEMPLATE_KEY,
        "author": "kim",
        "requestUuid": request_uuid,
    })
}

pub fn job_body(font_id: &str, file_key: &str, request_uuid: &str) -> String {
    job_json(font_id, file_key, request_uuid).to_string()
}

/// Records every status announcement instead of calling out.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<(String, JobStatus)>>,
}

impl RecordingReporter {
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.calls
            .lock()
            .expect("reporter lock")
            .iter()
            .map(|(_, status)| *status)
            .collect()
    }
}

impl StatusReporter for RecordingReporter {
    fn report<'a>(
        &'a self,
        font_id: &'a str,
        status: JobStatus,
    ) -> BoxFuture<'a, Result<StatusAck, StatusError>> {
        self.calls
            .lock()
            .expect("reporter lock")
            .push((font_id.to_string(), status));
        Box::pin(async move {
            Ok(StatusAck {
                status: 200,
                body: String::new(),
            })
        })
    }
}

/// Records status announcements and answers every one with a 503.
#[derive(Debug, Default)]
pub struct FailingReporter {
    calls: Mutex<Vec<JobStatus>>,
}

impl FailingReporter {
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.calls.lock().expect("reporter lock").clone()
    }
}

impl StatusReporter for FailingReporter {
    fn report<'a>(
        &'a self,
        _font_id: &'a str,
        status: JobStatus,
    ) -> BoxFuture<'a, Result<StatusAck, StatusError>> {
        self.calls.lock().expect("reporter lock").push(status);
        Box::pin(async move {
            Err(StatusError::Rejected {
                status: 503,
                body: "control plane unavailable".to_string(),
            })
        })
    }
}

/// Log store that refuses every upload.
pub struct FailingLogStore;

impl ArtifactStore for FailingLogStore {
    fn publish<'a>(
        &'a self,
        _local_path: &'a Path,
        _key: &'a str,
    ) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(async move {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "log bucket is read-only",
            )))
        })
    }
}

/// Artifact store whose `.woff2` uploads always fail.
pub struct FailingWoff2Store {
    pub inner: Storage,
}

impl ArtifactStore for FailingWoff2Store {
    fn publish<'a>(
        &'a self,
        local_path: &'a Path,
        key: &'a str,
    ) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(async move {
            if key.ends_with(".woff2") {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
            self.inner.publish_file(local_path, key).await
        })
    }
}

/// Scratch worker: fake stage scripts, in-memory queue and storage.
pub struct Harness {
    pub dir: TempDir,
    pub config: WorkerConfig,
    pub queue: Arc<MemoryQueue>,
    pub artifacts: Storage,
    pub logs: Storage,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub async fn new() -> Result<Self, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;

        let mut config = WorkerConfig::new(StatusConfig::new("http://127.0.0.1:9", "/progress"));
        config.work_root = dir.path().join("result");
        config.log_dir = dir.path().join("log");
        config.scripts_dir = dir.path().join("scripts");
        config.poll_wait = Duration::from_millis(1);
        config.poll_interval = Duration::from_millis(10);
        config.stage_timeout = Some(Duration::from_secs(30));

        let artifacts = Storage::new(StorageConfig::memory()).await?;
        artifacts
            .put_bytes(TEMPLATE_KEY, Bytes::from(png(1200, 1600)))
            .await?;
        let logs = Storage::new(StorageConfig::memory()).await?;

        let harness = Self {
            dir,
            config,
            queue: Arc::new(MemoryQueue::new()),
            artifacts,
            logs,
            reporter: Arc::new(RecordingReporter::default()),
        };
        harness.install_default_stages();
        Ok(harness)
    }

    pub fn calls_file(&self) -> PathBuf {
        self.dir.path().join("calls.txt")
    }

    /// Stages invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.calls_file())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Replace a stage script; the stage name is still recorded first.
    pub fn write_stage(&self, stage: Stage, body: &str) {
        std::fs::create_dir_all(&self.config.scripts_dir).expect("scripts dir");
        let path = self.config.scripts_dir.join(stage.default_program());
        let script = format!(
            "#!/bin/sh\necho {} >> '{}'\n{}\n",
            stage.as_str(),
            self.calls_file().display(),
            body
        );
        std::fs::write(&path, script).expect("write stage");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    fn install_default_stages(&self) {
        self.write_stage(
            Stage::Crop,
            "echo \"cropping $1\"\nmkdir -p \"1_cropped/$1\"\ncp \"$FONT_TEMPLATE_PATH\" \"1_cropped/$1/\"",
        );
        self.write_stage(
            Stage::Infer,
            "echo \"inferring $1\"\nmkdir -p \"2_inference/$1\"",
        );
        self.write_stage(Stage::Vectorize, "mkdir -p \"3_svg/$1\"");
        self.write_stage(
            Stage::Compile,
            "echo \"compiling $2 as $4\"\nmkdir -p 4_fonts\nprintf 'ttf %s' \"$FONT_JOB_ROOT\" > \"4_fonts/$2.ttf\"\nprintf 'woff2' > \"4_fonts/$2.woff2\"",
        );
    }

    pub fn fetcher(&self) -> TemplateFetcher {
        TemplateFetcher::new(self.artifacts.clone(), Duration::from_secs(5)).expect("fetcher")
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            queue: self.queue.clone(),
            templates: Arc::new(self.fetcher()),
            artifacts: Arc::new(self.artifacts.clone()),
            logs: Arc::new(self.logs.clone()),
            reporter: self.reporter.clone(),
        }
    }

    pub fn processor(&self) -> JobProcessor {
        JobProcessor::new(&self.config, self.collaborators())
    }

    /// Everything left under the work root.
    pub fn leftover_job_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.work_root) {
            Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn uploaded_log(&self, font_id: &str) -> Option<String> {
        let bytes = self.logs.get_bytes(&format!("{font_id}.log")).await.ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Template source that panics on its first call and delegates afterwards.
pub struct PanicOnce {
    pub inner: TemplateFetcher,
    pub tripped: AtomicBool,
}

impl PanicOnce {
    pub fn new(inner: TemplateFetcher) -> Self {
        Self {
            inner,
            tripped: AtomicBool::new(false),
        }
    }
}

impl TemplateSource for PanicOnce {
    fn fetch<'a>(
        &'a self,
        message: &'a JobMessage,
        layout: &'a JobLayout,
    ) -> BoxFuture<'a, Result<PathBuf, FetchError>> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("template source blew up");
        }
        self.inner.fetch(message, layout)
    }
}

/// Queue whose first receive panics; later calls go to the wrapped queue.
pub struct PanicOnceQueue {
    pub inner: Arc<MemoryQueue>,
    pub tripped: AtomicBool,
}

impl PanicOnceQueue {
    pub fn new(inner: Arc<MemoryQueue>) -> Self {
        Self {
            inner,
            tripped: AtomicBool::new(false),
        }
    }
}

impl WorkQueue for PanicOnceQueue {
    fn receive(&self, wait: Duration) -> BoxFuture<'_, Result<Option<ReceivedMessage>, QueueError>> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("queue connection blew up");
        }
        self.inner.receive(wait)
    }

    fn delete<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        self.inner.delete(message)
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> BoxFuture<'a, Result<DeadLetter, QueueError>> {
        self.inner.dead_letter(message)
    }
}

/// In-memory sink for formatted tracing output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("capture lock")).into_owned()
    }

    /// Route tracing events on the current thread into this buffer.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("capture lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
