//! The four build stages, run in order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use font_core::{Job, Stage};

use crate::counters::STAGE_FAILURES;
use crate::error::JobFailure;
use crate::job_logger::JobLogger;
use crate::stage_runner::{StageCommand, StageRunner};

/// Compiled font files left in the job's `4_fonts` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFonts {
    pub ttf: PathBuf,
    pub woff2: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineRunner {
    scripts_dir: PathBuf,
    runner: StageRunner,
}

impl PipelineRunner {
    pub fn new(scripts_dir: impl Into<PathBuf>, stage_timeout: Option<Duration>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            runner: StageRunner::new(stage_timeout),
        }
    }

    /// Resolve the invocation of `stage` for `job`.
    ///
    /// Stages run inside the job root and learn about it through the
    /// environment as well as their arguments.
    pub fn command(&self, stage: Stage, job: &Job, template: &Path) -> StageCommand {
        let root = job.layout.root();
        StageCommand {
            stage,
            program: self.scripts_dir.join(stage.default_program()),
            args: stage.args(&job.message),
            cwd: root.to_path_buf(),
            env: vec![
                ("FONT_JOB_ROOT".to_string(), root.display().to_string()),
                ("FONT_TEMPLATE_PATH".to_string(), template.display().to_string()),
                ("FONT_NAME".to_string(), job.message.font_name.clone()),
            ],
        }
    }

    /// Run crop, infer, vectorize and compile, stopping at the first failure.
    pub async fn run(
        &self,
        job: &mut Job,
        template: &Path,
        logger: &JobLogger,
    ) -> Result<CompiledFonts, JobFailure> {
        for stage in Stage::ALL {
            job.transition(stage.state())?;
            logger.info(format!("[{}] starting {}", stage.label(), stage.default_program()));

            let result = self.runner.run(&self.command(stage, job, template), logger).await;
            let elapsed = result.elapsed;
            let failure = (!result.success)
                .then(|| result.error.clone().unwrap_or_else(|| "unknown error".to_string()));
            job.record(result);

            if let Some(detail) = failure {
                metrics::counter!(STAGE_FAILURES, "stage" => stage.as_str()).increment(1);
                logger.error(format!(
                    "[{}] failed after {:.1}s: {detail}",
                    stage.label(),
                    elapsed.as_secs_f64()
                ));
                return Err(JobFailure::Stage { stage, detail });
            }
            logger.info(format!(
                "[{}] completed in {:.1}s",
                stage.label(),
                elapsed.as_secs_f64()
            ));
        }

        let fonts = CompiledFonts {
            ttf: job.layout.font_ttf(),
            woff2: job.layout.font_woff2(),
        };
        for path in [&fonts.ttf, &fonts.woff2] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(JobFailure::MissingArtifact(path.clone()));
            }
        }
        Ok(fonts)
    }
}
