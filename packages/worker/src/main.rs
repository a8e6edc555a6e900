//! `font-worker`: consumes font build jobs from the queue until interrupted.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    Collaborators, ConsumerArgs, HttpStatusReporter, JobProcessor, SupervisorMessage,
    TemplateFetcher, WorkerConfig, describe_metrics, start_supervisor,
};
use storage::{Storage, StorageConfig};
use work_queue::SqsQueue;

mod telemetry;

const TEMPLATE_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    telemetry::init()?;
    describe_metrics();

    let config = WorkerConfig::from_env()?;
    let queue = SqsQueue::from_env().await?;
    let artifacts = Storage::from_env().await?;
    let logs = Storage::new(StorageConfig::from_env_with_prefix("LOG_")?).await?;
    tracing::info!(
        artifacts = artifacts.kind_str(),
        logs = logs.kind_str(),
        work_root = %config.work_root.display(),
        scripts_dir = %config.scripts_dir.display(),
        "Font worker configured"
    );

    let deps = Collaborators {
        queue: Arc::new(queue),
        templates: Arc::new(TemplateFetcher::new(artifacts.clone(), TEMPLATE_TIMEOUT)?),
        artifacts: Arc::new(artifacts),
        logs: Arc::new(logs),
        reporter: Arc::new(HttpStatusReporter::new(config.status.clone())?),
    };
    let processor = JobProcessor::new(&config, deps);

    let (supervisor, mut handle) = start_supervisor(ConsumerArgs {
        processor,
        poll_interval: config.poll_interval,
    })
    .await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Interrupt received, finishing current job");
            supervisor.send_message(SupervisorMessage::Shutdown)?;
            handle.await?;
        }
        joined = &mut handle => {
            joined?;
            tracing::error!("Supervisor exited on its own");
        }
    }

    tracing::info!("Font worker stopped");
    Ok(())
}
