//! Supervision of one external stage process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use font_core::{Stage, StageResult};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::job_logger::JobLogger;

/// Time a timed-out stage gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage executable not found: {0}")]
    MissingExecutable(PathBuf),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("exited with status {0}")]
    Exit(i32),

    #[error("terminated by signal")]
    Signalled,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("I/O error while waiting for the process: {0}")]
    Wait(std::io::Error),
}

/// A fully resolved stage invocation.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub stage: Stage,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Runs stage commands as child processes, one at a time.
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    timeout: Option<Duration>,
}

impl StageRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Run `command` to completion, streaming its output into `logger`.
    ///
    /// Never fails: every problem is folded into an unsuccessful [`StageResult`].
    pub async fn run(&self, command: &StageCommand, logger: &JobLogger) -> StageResult {
        let started = Instant::now();
        let mut output = Vec::new();
        let outcome = self.execute(command, logger, &mut output).await;

        let (success, exit_code, error, timed_out) = match outcome {
            Ok(()) => (true, Some(0), None, false),
            Err(err) => {
                let code = match err {
                    StageError::Exit(code) => Some(code),
                    _ => None,
                };
                let timed_out = matches!(err, StageError::TimedOut(_));
                (false, code, Some(err.to_string()), timed_out)
            }
        };

        StageResult {
            stage: command.stage,
            success,
            exit_code,
            error,
            output,
            elapsed: started.elapsed(),
            timed_out,
        }
    }

    async fn execute(
        &self,
        command: &StageCommand,
        logger: &JobLogger,
        output: &mut Vec<String>,
    ) -> Result<(), StageError> {
        ensure_executable(&command.program, logger)?;

        // Own process group, so a timeout also reaches whatever the script started.
        let mut child: AsyncGroupChild = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .group_spawn()
            .map_err(|source| StageError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        // Both pipes feed one channel so lines are logged in arrival order.
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.inner().stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.inner().stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let label = command.stage.label();
        let supervised = async {
            while let Some(line) = rx.recv().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                logger.info(format!("[{label}] {line}"));
                output.push(line.to_string());
            }
            child.wait().await
        };

        let status = match self.timeout {
            None => supervised.await.map_err(StageError::Wait)?,
            Some(limit) => match tokio::time::timeout(limit, supervised).await {
                Ok(status) => status.map_err(StageError::Wait)?,
                Err(_) => {
                    logger.error(format!(
                        "[{label}] timed out after {limit:?}, killing process group"
                    ));
                    terminate_process_group(&mut child, KILL_GRACE, logger).await;
                    return Err(StageError::TimedOut(limit));
                }
            },
        };

        check_status(status)
    }
}

fn check_status(status: ExitStatus) -> Result<(), StageError> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(StageError::Exit(code)),
        None => Err(StageError::Signalled),
    }
}

/// SIGTERM the whole group, then SIGKILL whatever is left after `grace`, then reap.
#[cfg(unix)]
async fn terminate_process_group(child: &mut AsyncGroupChild, grace: Duration, logger: &JobLogger) {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.inner().id() else {
        return;
    };
    let pgid = Pid::from_raw(-(pid as i32));

    if let Err(e) = signal::kill(pgid, Signal::SIGTERM)
        && e != Errno::ESRCH
    {
        logger.warn(format!("SIGTERM to process group {pid} failed: {e}"));
    }

    let deadline = tokio::time::Instant::now() + grace;
    let mut leader_exited = false;
    while tokio::time::Instant::now() < deadline {
        if child.inner().try_wait().ok().flatten().is_some() {
            leader_exited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // The leader may be gone while its children still hold the group.
    if let Err(e) = signal::kill(pgid, Signal::SIGKILL)
        && e != Errno::ESRCH
    {
        logger.warn(format!("SIGKILL to process group {pid} failed: {e}"));
    }
    if !leader_exited {
        let _ = child.wait().await;
    }
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut AsyncGroupChild, _grace: Duration, logger: &JobLogger) {
    if let Err(e) = child.kill().await {
        logger.warn(format!("kill failed: {e}"));
    }
    let _ = child.wait().await;
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Make sure the stage file exists and can be executed.
fn ensure_executable(program: &Path, logger: &JobLogger) -> Result<(), StageError> {
    let metadata = std::fs::metadata(program)
        .map_err(|_| StageError::MissingExecutable(program.to_path_buf()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if metadata.permissions().mode() & 0o111 == 0 {
            logger.warn(format!(
                "{} is not executable, setting mode 755",
                program.display()
            ));
            std::fs::set_permissions(program, std::fs::Permissions::from_mode(0o755)).map_err(
                |source| StageError::Spawn {
                    program: program.to_path_buf(),
                    source,
                },
            )?;
        }
    }
    #[cfg(not(unix))]
    let _ = (metadata, logger);

    Ok(())
}
