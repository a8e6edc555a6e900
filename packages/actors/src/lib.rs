//! Job pipeline orchestration for the font worker.
//!
//! This crate provides the Ractor-based consumer that pulls font build jobs
//! off the work queue and drives each one through the external stages.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that keeps the consumer alive
//! - `ConsumerActor` - Polls the queue and runs one job at a time
//! - `JobProcessor` - One consumer iteration, from receive to cleanup
//! - `PipelineRunner` / `StageRunner` - The four external stages
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Collaborators, ConsumerArgs, JobProcessor, start_supervisor};
//!
//! let processor = JobProcessor::new(&config, collaborators);
//! let (supervisor, handle) = start_supervisor(ConsumerArgs {
//!     processor,
//!     poll_interval: config.poll_interval,
//! })
//! .await?;
//! ```

mod cleanup;
mod config;
mod consumer_actor;
pub mod counters;
mod error;
mod fetch;
mod job_logger;
mod messages;
mod pipeline;
mod processor;
mod stage_runner;
mod status;
mod supervisor;

pub use cleanup::{CleanupReport, cleanup};
pub use config::{ConfigError, MAX_POLL_WAIT, StatusConfig, WorkerConfig};
pub use consumer_actor::{ConsumerActor, ConsumerArgs};
pub use counters::{ConsumerStats, describe_metrics};
pub use error::JobFailure;
pub use fetch::{FetchError, TemplateFetcher, TemplateSource};
pub use job_logger::JobLogger;
pub use messages::{ConsumerMessage, SupervisorMessage, SupervisorStatus};
pub use pipeline::{CompiledFonts, PipelineRunner};
pub use processor::{Collaborators, JobProcessor, JobReport, PollOutcome};
pub use stage_runner::{StageCommand, StageError, StageRunner};
pub use status::{HttpStatusReporter, StatusAck, StatusError, StatusReporter};
pub use supervisor::{Supervisor, start_supervisor};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
