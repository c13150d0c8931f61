//! Subprocess spawning and output capture

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::binder::BoundCommand;
use crate::executor::ExecuteError;

/// Stderr kept for logging; anything beyond is drained and dropped
const STDERR_CAPTURE: usize = 64 * 1024;

/// What came back from a finished (or stopped) child
#[derive(Debug)]
pub(crate) struct RawOutput {
    /// Exit status, `None` if the child was killed for exceeding the output ceiling
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Spawn `command` and collect its output.
///
/// Stdout beyond `max_output` bytes kills the child. The child is also killed
/// if this future is dropped, which is how timeouts stop it.
#[instrument(skip(prepare), fields(program = %command.program))]
pub(crate) async fn run_captured(
    command: &BoundCommand,
    max_output: Option<usize>,
    prepare: impl FnOnce(&mut Command),
) -> Result<RawOutput, ExecuteError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    prepare(&mut cmd);

    let mut child = cmd.spawn().map_err(|source| ExecuteError::Spawn {
        program: command.program.clone(),
        source,
    })?;
    debug!(pid = ?child.id(), "spawned script");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        match stderr {
            Some(pipe) => read_capped(pipe, STDERR_CAPTURE, true).await,
            None => Ok((Vec::new(), false)),
        }
    });

    let (stdout, overflowed) = match stdout {
        Some(pipe) => read_capped(pipe, max_output.unwrap_or(usize::MAX), false).await?,
        None => (Vec::new(), false),
    };

    if overflowed {
        debug!(limit = ?max_output, "stdout exceeded ceiling, killing script");
        child.kill().await?;
        stderr_task.abort();
        return Ok(RawOutput {
            status: None,
            stdout,
            stderr: Vec::new(),
        });
    }

    let status = child.wait().await?;
    let (stderr, _) = stderr_task
        .await
        .map_err(|e| ExecuteError::Io(std::io::Error::other(e)))??;

    Ok(RawOutput {
        status: Some(status),
        stdout,
        stderr,
    })
}

/// Read up to `cap` bytes. Returns the bytes and whether more were available.
///
/// With `drain` set, input past the cap is read and discarded so the writer
/// never blocks; otherwise reading stops at the first byte past the cap.
async fn read_capped<R>(mut reader: R, cap: usize, drain: bool) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut overflowed = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
        if n > room {
            overflowed = true;
            if !drain {
                break;
            }
        }
    }
    Ok((kept, overflowed))
}
