//! [`Sandbox`] on IOI Isolate
//!
//! Each compilation and each test run happens in a box of its own that is
//! initialized right before and cleaned up right after, whatever the outcome.
//! Compiled classes are copied out of the compile box into a host temporary
//! directory and copied into every run box.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::{CLASSES_DIR, Config, Placeholders, expand_command};
use crate::isolate::{
    BoxPool, IsolateBox, IsolateCommand, IsolateError, resolve_command, resolve_program,
    run_batch, run_with_output, validate_mounts,
};
use crate::model::{CompilationResult, Submission};
use crate::sandbox::java::JavaUnit;
use crate::sandbox::{ArtifactHandle, Sandbox, SandboxError};
use crate::types::{ExecutionResult, ExecutionStatus, MountConfig};

/// Slack on top of isolate's own wall limit before the host kills the keeper
const HOST_GRACE: Duration = Duration::from_secs(5);

/// Classes plus compiler output on success, diagnostics on rejection
type CompileOutcome = Result<(TempDir, String), String>;

/// Compiled classes owned by the sandbox
#[derive(Debug)]
struct Artifact {
    classes: TempDir,
    unit: JavaUnit,
}

#[derive(Debug)]
pub struct IsolateSandbox {
    config: Config,
    pool: BoxPool,
    compile_command: Vec<String>,
    run_command: Vec<String>,
    run_mounts: Vec<MountConfig>,
    artifacts: Mutex<HashMap<u64, Artifact>>,
    next_artifact: AtomicU64,
}

impl IsolateSandbox {
    /// Resolve tools and mounts up front so a broken installation fails at
    /// start-up instead of on the first submission
    pub fn new(config: Config) -> Result<Self, SandboxError> {
        let isolate = resolve_program(&config.isolate_binary().to_string_lossy())
            .map_err(|e| SandboxError::ToolNotFound("isolate", e.to_string()))?;

        let mut compile_command = config.compile.command.clone();
        resolve_command(&mut compile_command)
            .map_err(|e| SandboxError::ToolNotFound("compiler", e.to_string()))?;
        let mut run_command = config.run.command.clone();
        resolve_command(&mut run_command)
            .map_err(|e| SandboxError::ToolNotFound("runtime", e.to_string()))?;

        validate_mounts(&config.sandbox_mounts)?;
        validate_mounts(&config.run.mounts)?;
        let run_mounts = config
            .sandbox_mounts
            .iter()
            .chain(&config.run.mounts)
            .cloned()
            .collect();

        info!(
            isolate = %isolate.display(),
            compiler = ?compile_command.first(),
            runtime = ?run_command.first(),
            boxes = ?config.box_ids(),
            cgroup = config.cgroup,
            "isolate sandbox ready"
        );

        Ok(Self {
            pool: BoxPool::new(config.box_ids(), isolate, config.cgroup),
            config,
            compile_command,
            run_command,
            run_mounts,
            artifacts: Mutex::new(HashMap::new()),
            next_artifact: AtomicU64::new(1),
        })
    }

    /// Number of compiled units currently held
    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or(0)
    }

    fn base_command(&self, sandbox: &IsolateBox, program: Vec<String>) -> IsolateCommand {
        IsolateCommand::run(self.pool.isolate_path(), sandbox.id(), program)
            .cgroup(self.pool.cgroup())
            .env("PATH", &self.config.run.path)
            .working_dir("/box")
    }

    async fn compile_in(
        &self,
        sandbox: &IsolateBox,
        unit: &JavaUnit,
        source: &str,
        cancel: &CancelToken,
    ) -> Result<CompileOutcome, SandboxError> {
        let file_name = unit.file_name();
        sandbox.write_file(&file_name, source.as_bytes()).await?;
        sandbox.create_shared_dir(CLASSES_DIR).await?;

        let main_class = unit.main_class();
        let program = expand_command(
            &self.compile_command,
            &Placeholders {
                source: &file_name,
                classes: CLASSES_DIR,
                main_class: &main_class,
            },
        );
        let limits = self.config.compile_limits();
        let deadline = limits.wall_budget().map(|budget| budget + HOST_GRACE);
        let command = self
            .base_command(sandbox, program)
            .limits(limits)
            .mounts(&self.config.sandbox_mounts)
            .envs(&self.config.compile.env);

        let (result, diagnostics) = run_with_output(sandbox, command, deadline, cancel).await?;
        debug!(status = ?result.status, exit_code = ?result.exit_code, "compiler finished");

        match result.status {
            ExecutionStatus::InternalError => Err(SandboxError::Internal(
                result.message.unwrap_or_default(),
            )),
            ExecutionStatus::TimeLimitExceeded => Ok(Err(join_diagnostics(
                &format!(
                    "compilation timed out after {}s",
                    self.config.compile.timeout
                ),
                &diagnostics,
            ))),
            _ if result.is_success() => {
                let classes = tempfile::Builder::new()
                    .prefix("javajudge-classes-")
                    .tempdir()
                    .map_err(|e| SandboxError::Isolate(IsolateError::Io(e)))?;
                sandbox.copy_out(CLASSES_DIR, classes.path()).await?;
                Ok(Ok((classes, diagnostics)))
            }
            _ => {
                // javac reports its own errors; a signal or limit kill needs a note
                let note = match (result.signal, &result.message) {
                    (Some(sig), _) => format!("compiler killed by signal {sig}"),
                    (None, Some(message)) if result.exit_code.is_none() => message.clone(),
                    _ => String::new(),
                };
                Ok(Err(join_diagnostics(&note, &diagnostics)))
            }
        }
    }

    async fn run_in(
        &self,
        sandbox: &IsolateBox,
        classes: &Path,
        unit: &JavaUnit,
        input: &str,
        time_limit: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError> {
        sandbox.copy_in(classes, CLASSES_DIR).await?;

        let file_name = unit.file_name();
        let main_class = unit.main_class();
        let program = expand_command(
            &self.run_command,
            &Placeholders {
                source: &file_name,
                classes: CLASSES_DIR,
                main_class: &main_class,
            },
        );
        let limits = self.config.run_limits(time_limit);
        let deadline = limits.wall_budget().map(|budget| budget + HOST_GRACE);
        let memory_limit = limits.memory_limit;
        let command = self
            .base_command(sandbox, program)
            .limits(limits)
            .mounts(&self.run_mounts)
            .envs(&self.config.run.env);

        let mut result = run_batch(sandbox, command, input.as_bytes(), deadline, cancel).await?;
        if result.status == ExecutionStatus::InternalError {
            return Err(SandboxError::Internal(result.message.unwrap_or_default()));
        }
        if let Some(limit) = memory_limit {
            result.detect_memory_limit(limit);
        }
        Ok(result)
    }

    fn lookup(&self, artifact: &ArtifactHandle) -> Result<(PathBuf, JavaUnit), SandboxError> {
        let artifacts = self
            .artifacts
            .lock()
            .map_err(|_| SandboxError::UnknownArtifact(artifact.clone()))?;
        artifacts
            .get(&artifact.id())
            .map(|a| (a.classes.path().to_path_buf(), a.unit.clone()))
            .ok_or_else(|| SandboxError::UnknownArtifact(artifact.clone()))
    }

    fn register(&self, classes: TempDir, unit: JavaUnit) -> ArtifactHandle {
        let id = self.next_artifact.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut artifacts) = self.artifacts.lock() {
            artifacts.insert(id, Artifact { classes, unit });
        }
        ArtifactHandle::new(id)
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    #[instrument(skip_all, fields(exercise = %submission.exercise_id, student = %submission.student_id))]
    async fn compile(
        &self,
        submission: &Submission,
        cancel: &CancelToken,
    ) -> Result<CompilationResult, SandboxError> {
        cancel.check()?;
        let unit = JavaUnit::analyze(&submission.source_code);
        debug!(file = %unit.file_name(), main_class = %unit.main_class(), "compiling");

        let mut sandbox = self.pool.acquire().await?;
        let outcome = self
            .compile_in(&sandbox, &unit, &submission.source_code, cancel)
            .await;
        let cleanup = sandbox.cleanup().await;

        match settle(outcome, cleanup)? {
            Ok((classes, diagnostics)) => {
                let handle = self.register(classes, unit);
                debug!(%handle, "compilation succeeded");
                Ok(CompilationResult::succeeded(diagnostics, handle))
            }
            Err(diagnostics) => {
                debug!("compilation failed");
                Ok(CompilationResult::failed(diagnostics))
            }
        }
    }

    #[instrument(skip(self, input, cancel), fields(input_len = input.len()))]
    async fn run(
        &self,
        artifact: &ArtifactHandle,
        input: &str,
        time_limit: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError> {
        cancel.check()?;
        let (classes, unit) = self.lookup(artifact)?;

        let mut sandbox = self.pool.acquire().await?;
        let outcome = self
            .run_in(&sandbox, &classes, &unit, input, time_limit, cancel)
            .await;
        let cleanup = sandbox.cleanup().await;
        settle(outcome, cleanup)
    }

    async fn release(&self, artifact: ArtifactHandle) {
        let removed = self
            .artifacts
            .lock()
            .ok()
            .and_then(|mut artifacts| artifacts.remove(&artifact.id()));
        // Dropping the TempDir deletes the classes
        if removed.is_some() {
            debug!(%artifact, "released compiled unit");
        }
    }
}

/// Combine the work result with the box cleanup result. The work error wins
/// when both failed.
fn settle<T>(
    outcome: Result<T, SandboxError>,
    cleanup: Result<(), IsolateError>,
) -> Result<T, SandboxError> {
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!(error = %cleanup_err, "box cleanup failed after sandbox error");
            Err(err)
        }
    }
}

fn join_diagnostics(note: &str, diagnostics: &str) -> String {
    match (note.is_empty(), diagnostics.trim().is_empty()) {
        (true, _) => diagnostics.to_owned(),
        (false, true) => note.to_owned(),
        (false, false) => format!("{note}\n{diagnostics}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_prefers_work_error() {
        let both: Result<(), _> = settle(
            Err(SandboxError::Cancelled),
            Err(IsolateError::CleanupFailed {
                id: 0,
                message: "busy".into(),
            }),
        );
        assert!(matches!(both, Err(SandboxError::Cancelled)));

        let cleanup_only: Result<u8, _> = settle(
            Ok(1),
            Err(IsolateError::CleanupFailed {
                id: 0,
                message: "busy".into(),
            }),
        );
        assert!(cleanup_only.unwrap_err().is_environment_fault());

        assert_eq!(settle(Ok(2), Ok(())).unwrap(), 2);
    }

    #[test]
    fn join_diagnostics_variants() {
        assert_eq!(join_diagnostics("", "Main.java:3: error"), "Main.java:3: error");
        assert_eq!(join_diagnostics("timed out", "  "), "timed out");
        assert_eq!(
            join_diagnostics("timed out", "warning: x"),
            "timed out\nwarning: x"
        );
    }

    #[test]
    fn missing_isolate_is_tool_not_found() {
        let mut config = Config::default();
        config.isolate_path = Some(PathBuf::from("definitely-not-isolate-binary"));
        let err = IsolateSandbox::new(config).unwrap_err();
        assert!(matches!(err, SandboxError::ToolNotFound("isolate", _)));
        assert!(err.is_environment_fault());
    }
}
