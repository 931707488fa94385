//! IOI Isolate wrapper
//!
//! Command building, box lifecycle and meta file parsing for the isolate
//! sandbox.
//!
//! References for Isolate's CLI arguments and meta-files:
//! - https://www.ucw.cz/isolate/isolate.1.html
//! - https://github.com/ioi/isolate

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::isolate::box_manager::{BoxPool, IsolateBox};
pub use crate::isolate::command::{IsolateAction, IsolateCommand};
pub use crate::isolate::meta::{MetaFile, MetaParseError};
pub use crate::isolate::process::{run_batch, run_with_output};
use crate::types::MountConfig;

mod box_manager;
mod command;
mod meta;
mod process;

#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("failed to initialize box {id}: {message}")]
    InitFailed { id: u32, message: String },

    #[error("failed to cleanup box {id}: {message}")]
    CleanupFailed { id: u32, message: String },

    #[error("isolate command failed: {0}")]
    CommandFailed(String),

    #[error("failed to spawn isolate process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed to parse meta file: {0}")]
    MetaParseFailed(String),

    #[error("no available boxes in pool")]
    PoolExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(String),

    #[error("sandboxed process cancelled")]
    Cancelled,
}

/// Attempt to set up the cgroup v2 hierarchy for isolate.
///
/// In containers `isolate-cg-keeper` is usually absent. This does its job:
/// create `cg_root` and enable the memory and pids controllers so per-box
/// child cgroups work.
///
/// Returns `Ok(false)` when cgroup v2 or the memory controller is
/// unavailable and the caller should fall back to RLIMIT_AS.
pub fn prepare_cgroup(cg_root: &Path) -> Result<bool, IsolateError> {
    let cg_base = Path::new("/sys/fs/cgroup");

    let controllers_path = cg_base.join("cgroup.controllers");
    if !controllers_path.exists() {
        return Ok(false);
    }
    let controllers = fs::read_to_string(&controllers_path)?;
    if !controllers.split_whitespace().any(|c| c == "memory") {
        return Ok(false);
    }

    if let Ok(content) = fs::read_to_string(cg_root.join("cgroup.subtree_control"))
        && content.split_whitespace().any(|c| c == "memory")
    {
        return Ok(true);
    }

    // cgroup v2 forbids enabling controllers on a cgroup that has processes
    // of its own, so move ourselves into a leaf first.
    let init_cg = cg_base.join("init");
    if !init_cg.exists() {
        fs::create_dir(&init_cg)?;
    }
    fs::write(init_cg.join("cgroup.procs"), std::process::id().to_string())?;
    fs::write(cg_base.join("cgroup.subtree_control"), "+memory +pids")?;

    if !cg_root.exists() {
        fs::create_dir(cg_root)?;
    }
    fs::write(cg_root.join("cgroup.subtree_control"), "+memory +pids")?;

    Ok(true)
}

/// Fail on the first non-optional mount whose source is missing
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), IsolateError> {
    match mounts
        .iter()
        .find(|m| !m.optional && !Path::new(&m.source).exists())
    {
        Some(missing) => Err(IsolateError::MountSourceNotFound(missing.source.clone())),
        None => Ok(()),
    }
}

/// Resolve a bare program name (`java`) to an absolute path on the host.
///
/// Isolate execs without a PATH search. Symlinks are resolved too:
/// `/usr/bin/java` is normally a chain through `/etc/alternatives` into the
/// JDK, and the sandbox only needs the final target mounted.
pub fn resolve_program(program: &str) -> Result<PathBuf, IsolateError> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return match path.exists() {
            true => Ok(path),
            false => Err(IsolateError::CommandFailed(format!("'{program}' does not exist"))),
        };
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    path_var
        .split(':')
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.is_file())
        .map(|candidate| fs::canonicalize(&candidate).unwrap_or(candidate))
        .ok_or_else(|| IsolateError::CommandFailed(format!("command '{program}' not found in PATH")))
}

/// [`resolve_program`] applied to the first element of a command line
pub fn resolve_command(command: &mut [String]) -> Result<(), IsolateError> {
    if let Some(first) = command.first_mut() {
        *first = resolve_program(first)?.to_string_lossy().into_owned();
    }
    Ok(())
}
