#![forbid(unsafe_code)]

//! Helpers for running the external programs (browser, yt-dlp, ffmpeg,
//! ffprobe) under a per-call timeout.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// How many trailing bytes of stderr are kept in a failure report.
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program} could not be started: {source}")]
    Launch { program: String, source: io::Error },

    #[error("{program} timed out after {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("{program} exited with {status}{}", stderr_suffix(.stderr))]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{program} i/o failed: {source}")]
    Io { program: String, source: io::Error },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// Builds a command that never reads from our stdin and dies with its
/// handle.
pub fn tool_command(program: &Path) -> Command {
    let mut command = Command::new(program);
    command.stdin(Stdio::null()).kill_on_drop(true);
    command
}

fn program_label(command: &Command) -> String {
    PathBuf::from(command.as_std().get_program())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "command".to_string())
}

/// Runs `command` to completion and returns its captured output. A non-zero
/// exit is reported as [`ToolError::Failed`].
pub async fn run_captured(mut command: Command, limit: Duration) -> Result<Output, ToolError> {
    let program = program_label(&command);
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!("running {:?}", command.as_std());

    let output = match tokio::time::timeout(limit, command.output()).await {
        Err(_) => {
            return Err(ToolError::TimedOut {
                program,
                after: limit,
            });
        }
        Ok(Err(source)) => return Err(ToolError::Launch { program, source }),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(ToolError::Failed {
            program,
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(output)
}

/// Runs `command` and forwards each stdout line to the log while it runs.
pub async fn run_streaming(
    mut command: Command,
    limit: Duration,
    label: &str,
) -> Result<(), ToolError> {
    let program = program_label(&command);
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!("running {:?}", command.as_std());

    let mut child = command.spawn().map_err(|source| ToolError::Launch {
        program: program.clone(),
        source,
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let work = async {
        let forward = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).split(b'\n');
                while let Some(line) = lines.next_segment().await? {
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        debug!("[{label}] {line}");
                    }
                }
            }
            Ok::<_, io::Error>(())
        };
        let collect = async {
            let mut buffer = Vec::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_end(&mut buffer).await?;
            }
            Ok::<_, io::Error>(buffer)
        };
        let (forwarded, collected) = tokio::join!(forward, collect);
        forwarded?;
        let stderr = collected?;
        let status = child.wait().await?;
        Ok::<_, io::Error>((status, stderr))
    };

    let outcome = tokio::time::timeout(limit, work).await;
    match outcome {
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(ToolError::TimedOut {
                program,
                after: limit,
            })
        }
        Ok(Err(source)) => Err(ToolError::Io { program, source }),
        Ok(Ok((status, _))) if status.success() => Ok(()),
        Ok(Ok((status, stderr))) => Err(ToolError::Failed {
            program,
            status,
            stderr: stderr_tail(&stderr),
        }),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
