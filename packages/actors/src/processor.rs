//! One iteration of the queue consumer.
//!
//! [`JobProcessor::poll_once`] receives at most one message and carries it all
//! the way to a terminal outcome: validate, fetch the template, run the
//! pipeline, publish, report, acknowledge. Every failure is caught here and
//! turned into a FAILED outcome; nothing escapes to the caller.
//!
//! Deleting the queue message is the commit point. It only happens after
//! every artifact is stored and DONE has been announced; every other path
//! leaves the message for redelivery. Cleanup and the log upload run on all
//! paths once the outcome is known.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use font_core::{
    ArtifactSet, Job, JobId, JobLayout, JobMessage, JobState, JobStatus, MessageError, StageResult,
};
use futures::FutureExt;
use storage::ArtifactStore;
use work_queue::{DeadLetter, ReceivedMessage, WorkQueue};

use crate::cleanup::{CleanupReport, cleanup};
use crate::config::WorkerConfig;
use crate::counters::{
    ConsumerStats, DEAD_LETTERED, MESSAGES_PROCESSED, MESSAGES_RECEIVED, POLLS,
    PROCESSING_DURATION, PROCESSING_ERRORS,
};
use crate::error::JobFailure;
use crate::fetch::TemplateSource;
use crate::job_logger::JobLogger;
use crate::pipeline::PipelineRunner;
use crate::status::StatusReporter;

/// External systems the processor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<dyn WorkQueue>,
    pub templates: Arc<dyn TemplateSource>,
    /// Destination of the compiled fonts.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Destination of job logs.
    pub logs: Arc<dyn ArtifactStore>,
    pub reporter: Arc<dyn StatusReporter>,
}

/// Result of one [`JobProcessor::poll_once`] call.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing to do.
    Empty,
    /// The queue could not be read.
    QueueUnavailable(String),
    /// The body is not a valid job; it stays on the queue.
    Malformed {
        message_id: String,
        error: MessageError,
    },
    /// Delivered too many times and given up on.
    DeadLettered {
        message_id: String,
        forwarded: bool,
        deleted: bool,
    },
    /// A job ran to a terminal state.
    Finished(Box<JobReport>),
}

/// Everything observable about one finished job attempt.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub font_id: String,
    pub state: JobState,
    pub trail: Vec<JobState>,
    pub stages: Vec<StageResult>,
    /// Present only when every artifact was published.
    pub artifacts: Option<ArtifactSet>,
    pub failure: Option<String>,
    /// Whether the queue message was acknowledged.
    pub deleted: bool,
    pub cleanup: CleanupReport,
}

#[derive(Clone)]
pub struct JobProcessor {
    work_root: PathBuf,
    log_dir: PathBuf,
    poll_wait: Duration,
    max_receive_attempts: Option<u32>,
    report_progress: bool,
    pipeline: PipelineRunner,
    deps: Collaborators,
    stats: ConsumerStats,
    idle: bool,
}

impl JobProcessor {
    pub fn new(config: &WorkerConfig, deps: Collaborators) -> Self {
        Self {
            work_root: config.work_root.clone(),
            log_dir: config.log_dir.clone(),
            poll_wait: config.poll_wait,
            max_receive_attempts: config.max_receive_attempts,
            report_progress: config.report_progress,
            pipeline: PipelineRunner::new(&config.scripts_dir, config.stage_timeout),
            deps,
            stats: ConsumerStats::default(),
            idle: false,
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Receive at most one message and drive it to a terminal outcome.
    pub async fn poll_once(&mut self) -> PollOutcome {
        metrics::counter!(POLLS).increment(1);
        self.stats.polls += 1;

        let received = match self.deps.queue.receive(self.poll_wait).await {
            Ok(Some(received)) => received,
            Ok(None) => {
                if !self.idle {
                    tracing::info!("No message received, waiting...");
                    self.idle = true;
                }
                return PollOutcome::Empty;
            }
            Err(e) => {
                tracing::error!("Failed to receive from queue: {}", e);
                return PollOutcome::QueueUnavailable(e.to_string());
            }
        };
        self.idle = false;
        let received_at = Utc::now();

        metrics::counter!(MESSAGES_RECEIVED).increment(1);
        self.stats.received += 1;
        tracing::info!(
            message_id = %received.message_id,
            receive_count = received.receive_count,
            "Message received"
        );

        if let Some(max) = self.max_receive_attempts
            && received.receive_count > max
        {
            return self.give_up(&received, max).await;
        }

        match JobMessage::parse(&received.body) {
            Ok(message) => {
                let report = self.process(&received, message, received_at).await;
                PollOutcome::Finished(Box::new(report))
            }
            Err(error) => {
                tracing::error!(
                    message_id = %received.message_id,
                    "Malformed job message, leaving it for redelivery: {}",
                    error
                );
                self.record_error();
                PollOutcome::Malformed {
                    message_id: received.message_id,
                    error,
                }
            }
        }
    }

    /// Forward an exhausted message to the dead-letter queue and drop it.
    async fn give_up(&mut self, received: &ReceivedMessage, max: u32) -> PollOutcome {
        let message_id = received.message_id.clone();
        tracing::warn!(
            message_id = %message_id,
            "Message delivered {} times (limit {}), giving up",
            received.receive_count,
            max
        );

        let forwarded = match self.deps.queue.dead_letter(received).await {
            Ok(DeadLetter::Forwarded) => true,
            Ok(DeadLetter::NotConfigured) => {
                tracing::warn!(message_id = %message_id, "No dead-letter queue configured, dropping message");
                false
            }
            Err(e) => {
                tracing::error!(message_id = %message_id, "Dead-letter forward failed, keeping message: {}", e);
                return PollOutcome::DeadLettered {
                    message_id,
                    forwarded: false,
                    deleted: false,
                };
            }
        };

        let deleted = match self.deps.queue.delete(received).await {
            Ok(()) => {
                metrics::counter!(DEAD_LETTERED).increment(1);
                self.stats.dead_lettered += 1;
                true
            }
            Err(e) => {
                tracing::error!(message_id = %message_id, "Failed to delete exhausted message: {}", e);
                false
            }
        };

        PollOutcome::DeadLettered {
            message_id,
            forwarded,
            deleted,
        }
    }

    async fn process(
        &mut self,
        received: &ReceivedMessage,
        message: JobMessage,
        received_at: DateTime<Utc>,
    ) -> JobReport {
        let started = Instant::now();
        let layout = JobLayout::for_message(&self.work_root, &message);
        let mut job = Job::new(message, received_at, layout);

        let logger = match JobLogger::create(&self.log_dir, &job.message) {
            Ok(logger) => logger,
            Err(e) => return self.abort_without_log(job, e, started).await,
        };

        logger.info(format!(
            "Received job fontId={} memberId={} fontName={} author={} (job {}, delivery {})",
            job.message.font_id,
            job.message.member_id,
            job.message.font_name,
            job.message.author,
            job.id,
            received.receive_count
        ));
        if self.report_progress {
            self.report(&job, JobStatus::Progress, &logger).await;
        }

        // A panicking collaborator fails the job like any other error, so the
        // FAILED report, cleanup and log upload below still happen.
        let built = AssertUnwindSafe(self.build(&mut job, &logger))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobFailure::Panicked(panic_message(panic.as_ref()))));

        let (artifacts, failure, deleted) = match built {
            Ok(artifacts) => {
                self.report(&job, JobStatus::Done, &logger).await;
                let deleted = match self.deps.queue.delete(received).await {
                    Ok(()) => {
                        logger.info("Queue message deleted");
                        true
                    }
                    Err(e) => {
                        logger.error(format!("Failed to delete queue message: {e}"));
                        false
                    }
                };
                if let Err(e) = job.transition(JobState::Done) {
                    logger.error(e.to_string());
                }

                if deleted {
                    metrics::counter!(MESSAGES_PROCESSED).increment(1);
                    self.stats.processed += 1;
                } else {
                    self.record_error();
                }
                (Some(artifacts), None, deleted)
            }
            Err(failure) => {
                job.fail();
                logger.error(format!("Job failed: {failure}"));
                self.report(&job, JobStatus::Failed, &logger).await;
                self.record_error();
                (None, Some(failure.to_string()), false)
            }
        };

        let cleanup = cleanup(&job.layout, &logger).await;
        let elapsed = started.elapsed();
        logger.info(format!(
            "Job {} in {:.1}s",
            job.state(),
            elapsed.as_secs_f64()
        ));

        let log = self.upload_log(&job, &logger).await;
        metrics::histogram!(PROCESSING_DURATION).record(elapsed.as_secs_f64());

        JobReport {
            job_id: job.id,
            font_id: job.message.font_id.clone(),
            state: job.state(),
            trail: job.trail().collect(),
            stages: job.history().to_vec(),
            artifacts: artifacts.map(|set| ArtifactSet { log, ..set }),
            failure,
            deleted,
            cleanup,
        }
    }

    /// Fetch, build and publish. Leaves the job in REPORTING on success.
    async fn build(&self, job: &mut Job, logger: &JobLogger) -> Result<ArtifactSet, JobFailure> {
        job.transition(JobState::FetchingInput)?;
        tokio::fs::create_dir_all(job.layout.root())
            .await
            .map_err(JobFailure::Workspace)?;
        let template = self.deps.templates.fetch(&job.message, &job.layout).await?;
        logger.info(format!("Template saved to {}", template.display()));

        let fonts = self.pipeline.run(job, &template, logger).await?;

        job.transition(JobState::Publishing)?;
        let font_ttf = self
            .deps
            .artifacts
            .publish(&fonts.ttf, &job.keys.font_ttf)
            .await?;
        logger.info(format!("Uploaded {} to {}", fonts.ttf.display(), font_ttf));
        let font_woff2 = self
            .deps
            .artifacts
            .publish(&fonts.woff2, &job.keys.font_woff2)
            .await?;
        logger.info(format!("Uploaded {} to {}", fonts.woff2.display(), font_woff2));

        job.transition(JobState::Reporting)?;
        Ok(ArtifactSet {
            font_ttf,
            font_woff2,
            log: None,
        })
    }

    /// Best effort: failures are logged and otherwise ignored.
    async fn report(&self, job: &Job, status: JobStatus, logger: &JobLogger) {
        match self.deps.reporter.report(&job.message.font_id, status).await {
            Ok(ack) => logger.info(format!("Reported {status}: {} {}", ack.status, ack.body)),
            Err(e) => logger.error(format!("Failed to report {status}: {e}")),
        }
    }

    async fn upload_log(&self, job: &Job, logger: &JobLogger) -> Option<String> {
        logger.info(format!("Uploading job log as {}", job.keys.log));
        if let Err(e) = logger.flush() {
            tracing::warn!(correlation = %logger.short_id(), "Failed to flush job log: {}", e);
        }

        match self.deps.logs.publish(logger.path(), &job.keys.log).await {
            Ok(locator) => {
                tracing::info!(correlation = %logger.short_id(), "Job log uploaded to {}", locator);
                Some(locator)
            }
            Err(e) => {
                tracing::error!(correlation = %logger.short_id(), "Failed to upload job log: {}", e);
                None
            }
        }
    }

    /// The job log could not even be opened: fail the job with console logging only.
    async fn abort_without_log(
        &mut self,
        mut job: Job,
        error: std::io::Error,
        started: Instant,
    ) -> JobReport {
        let font_id = job.message.font_id.clone();
        tracing::error!(font_id = %font_id, "Cannot open job log in {}: {}", self.log_dir.display(), error);
        job.fail();
        if let Err(e) = self.deps.reporter.report(&font_id, JobStatus::Failed).await {
            tracing::error!(font_id = %font_id, "Failed to report FAILED: {}", e);
        }
        self.record_error();
        metrics::histogram!(PROCESSING_DURATION).record(started.elapsed().as_secs_f64());

        JobReport {
            job_id: job.id,
            font_id,
            state: job.state(),
            trail: job.trail().collect(),
            stages: Vec::new(),
            artifacts: None,
            failure: Some(format!("cannot open job log: {error}")),
            deleted: false,
            cleanup: CleanupReport::default(),
        }
    }

    fn record_error(&mut self) {
        metrics::counter!(PROCESSING_ERRORS).increment(1);
        self.stats.errors += 1;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
