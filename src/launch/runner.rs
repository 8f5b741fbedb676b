//! Async process runner that tees child output into the log file.

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{create_log_file, LaunchPlan};
use crate::GlmError;

/// Which child stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Result of one launch
#[derive(Debug)]
pub struct LaunchOutcome {
    /// Exit status of the launcher process
    pub status: ExitStatus,
    /// Log file holding the combined output
    pub log_path: PathBuf,
    /// Wall time from spawn to exit
    pub elapsed: Duration,
}

impl LaunchOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code to report; a signal-terminated child maps to 1
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(1)
    }
}

/// Run a plan to completion, writing output to a new timestamped log file.
///
/// Blocks until the process group exits. A non-zero exit is not an error
/// here; callers inspect [`LaunchOutcome::status`].
pub async fn run(plan: &LaunchPlan, now: DateTime<Local>) -> crate::Result<LaunchOutcome> {
    let (log_path, log_file) = create_log_file(&plan.log_dir, &plan.log_name, now)?;
    tracing::info!("Logging to {:?}", log_path);

    let mut log = tokio::fs::File::from_std(log_file);

    let mut command = Command::new(&plan.command.program);
    command
        .args(&plan.command.args)
        .envs(plan.env.iter())
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &plan.working_dir {
        command.current_dir(dir);
    }

    tracing::info!("Launching: {} {}", plan.env.render(), plan.command.render());
    let start = Instant::now();

    let mut child = command.spawn().map_err(|e| {
        GlmError::LaunchError(format!("failed to start {}: {}", plan.command.program, e))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GlmError::LaunchError("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| GlmError::LaunchError("child stderr not captured".to_string()))?;

    let (tx, mut rx) = mpsc::channel::<(Stream, Vec<u8>)>(64);
    let stdout_task = tokio::spawn(pump(stdout, Stream::Stdout, tx.clone()));
    let stderr_task = tokio::spawn(pump(stderr, Stream::Stderr, tx));

    let mut console_out = tokio::io::stdout();
    let mut console_err = tokio::io::stderr();

    // Closes once both pumps reach EOF
    while let Some((stream, chunk)) = rx.recv().await {
        log.write_all(&chunk).await?;
        if plan.echo {
            match stream {
                Stream::Stdout => {
                    console_out.write_all(&chunk).await?;
                    console_out.flush().await?;
                }
                Stream::Stderr => {
                    console_err.write_all(&chunk).await?;
                    console_err.flush().await?;
                }
            }
        }
    }

    for task in [stdout_task, stderr_task] {
        task.await
            .map_err(|e| GlmError::LaunchError(format!("output pump failed: {}", e)))??;
    }
    log.flush().await?;

    let status = child.wait().await?;
    let elapsed = start.elapsed();

    if status.success() {
        tracing::info!("Process exited successfully after {:.1}s", elapsed.as_secs_f64());
    } else {
        tracing::error!(
            "Process exited with {} after {:.1}s, see {:?}",
            status,
            elapsed.as_secs_f64(),
            log_path
        );
    }

    Ok(LaunchOutcome {
        status,
        log_path,
        elapsed,
    })
}

async fn pump<R>(mut reader: R, stream: Stream, tx: mpsc::Sender<(Stream, Vec<u8>)>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if tx.send((stream, buf[..n].to_vec())).await.is_err() {
            return Ok(());
        }
    }
}
