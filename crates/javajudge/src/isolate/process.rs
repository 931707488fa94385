//! Running commands inside a box
//!
//! Input and output go through files in the box; the isolate keeper itself
//! gets no stdio. The meta file lives in a host-only directory outside the
//! box, where the sandboxed program cannot forge it. The keeper is raced against an
//! optional host-side deadline and the cancel token, and is killed when
//! either wins.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::isolate::IsolateError;
use crate::isolate::box_manager::IsolateBox;
use crate::isolate::command::IsolateCommand;
use crate::isolate::meta::MetaFile;
use crate::types::ExecutionResult;

/// How a keeper process ended
#[derive(Debug)]
enum KeeperExit {
    Finished(MetaFile),
    /// The host deadline passed; the keeper was killed
    Overran(Duration),
}

async fn run_isolate_command(
    args: Vec<String>,
    meta_path: &Path,
    deadline: Option<Duration>,
    cancel: &CancelToken,
) -> Result<KeeperExit, IsolateError> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| IsolateError::CommandFailed("empty command arguments".to_owned()))?;

    let started = Instant::now();
    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the future below kills the keeper; `isolate --cleanup`
        // then reaps whatever is left in the box.
        .kill_on_drop(true)
        .spawn()
        .map_err(IsolateError::SpawnFailed)?;

    let wait = child.wait_with_output();
    let deadline_elapsed = async {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    let output = tokio::select! {
        output = wait => output?,
        () = deadline_elapsed => {
            let elapsed = started.elapsed();
            warn!(?elapsed, "sandboxed process overran its wall budget, killed by host");
            return Ok(KeeperExit::Overran(elapsed));
        }
        () = cancel.cancelled() => {
            debug!("cancelled, killing sandboxed process");
            return Err(IsolateError::Cancelled);
        }
    };

    if !meta_path.exists() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IsolateError::CommandFailed(stderr.trim().to_owned()));
    }
    Ok(KeeperExit::Finished(MetaFile::load(meta_path).await?))
}

/// Captured result of one sandboxed run
struct Captured {
    result: ExecutionResult,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
}

async fn run_captured(
    sandbox: &IsolateBox,
    command: IsolateCommand,
    prefix: &str,
    stdin_data: &[u8],
    deadline: Option<Duration>,
    cancel: &CancelToken,
) -> Result<Captured, IsolateError> {
    let stdin_name = format!("{prefix}stdin.txt");
    let stdout_name = format!("{prefix}stdout.txt");
    let stderr_name = format!("{prefix}stderr.txt");
    let meta_dir = tempfile::Builder::new().prefix("javajudge-meta-").tempdir()?;
    let meta_path = meta_dir.path().join(format!("{prefix}meta.txt"));

    // isolate opens --stdin inside the sandbox, so the file must exist even
    // when there is no input
    sandbox.write_file(&stdin_name, stdin_data).await?;

    let args = command
        .meta_file(&meta_path)
        .stdio(
            sandbox.sandbox_path(&stdin_name)?,
            sandbox.sandbox_path(&stdout_name)?,
            sandbox.sandbox_path(&stderr_name)?,
        )
        .build();
    debug!(?args, "running isolate command");

    let result = match run_isolate_command(args, &meta_path, deadline, cancel).await? {
        KeeperExit::Finished(meta) => meta.to_execution_result(),
        KeeperExit::Overran(elapsed) => ExecutionResult::killed_by_host(elapsed),
    };

    Ok(Captured {
        result,
        stdout: sandbox.read_optional(&stdout_name).await?,
        stderr: sandbox.read_optional(&stderr_name).await?,
    })
}

/// Run a program with the given stdin, capturing stdout and stderr into the
/// result.
#[instrument(skip_all, fields(box_id = sandbox.id()))]
pub async fn run_batch(
    sandbox: &IsolateBox,
    command: IsolateCommand,
    stdin_data: &[u8],
    deadline: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ExecutionResult, IsolateError> {
    let captured = run_captured(sandbox, command, "", stdin_data, deadline, cancel).await?;
    let mut result = captured.result;
    result.stdout = captured.stdout;
    result.stderr = captured.stderr;

    debug!(
        status = ?result.status,
        time = result.time,
        wall_time = result.wall_time,
        memory = result.memory,
        "execution complete"
    );
    Ok(result)
}

/// Run a compiler, returning its stdout and stderr merged as diagnostics
#[instrument(skip_all, fields(box_id = sandbox.id()))]
pub async fn run_with_output(
    sandbox: &IsolateBox,
    command: IsolateCommand,
    deadline: Option<Duration>,
    cancel: &CancelToken,
) -> Result<(ExecutionResult, String), IsolateError> {
    let captured = run_captured(sandbox, command, "compile_", b"", deadline, cancel).await?;

    let mut diagnostics = String::new();
    for stream in [captured.stdout, captured.stderr].into_iter().flatten() {
        let text = String::from_utf8_lossy(&stream);
        if text.is_empty() {
            continue;
        }
        if !diagnostics.is_empty() {
            diagnostics.push('\n');
        }
        diagnostics.push_str(&text);
    }

    Ok((captured.result, diagnostics))
}
