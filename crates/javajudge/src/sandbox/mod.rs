//! Compilation and execution of untrusted code
//!
//! [`Sandbox`] is the capability the rest of the judge sees: compile a
//! submission, run the compiled unit against one input under a limit, and
//! release the unit. [`IsolateSandbox`] implements it on IOI Isolate.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use crate::sandbox::backend::IsolateSandbox;
pub use crate::sandbox::java::JavaUnit;
use crate::cancel::{CancelToken, Cancelled};
use crate::isolate::IsolateError;
use crate::model::{CompilationResult, Submission};
use crate::types::ExecutionResult;

mod backend;
pub mod java;

/// Opaque reference to a compiled unit held by the sandbox that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactHandle(u64);

impl ArtifactHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Isolate(IsolateError),

    /// Isolate reported `XX`: it could not set up or supervise the process
    #[error("sandbox internal error: {0}")]
    Internal(String),

    #[error("unknown {0}")]
    UnknownArtifact(ArtifactHandle),

    #[error("{0} not found: {1}")]
    ToolNotFound(&'static str, String),

    #[error("sandbox operation cancelled")]
    Cancelled,
}

impl SandboxError {
    /// Whether the judging environment itself is broken, as opposed to one
    /// submission's outcome. Environment faults stop the daemon.
    pub fn is_environment_fault(&self) -> bool {
        match self {
            SandboxError::Isolate(_) | SandboxError::Internal(_) | SandboxError::ToolNotFound(..) => {
                true
            }
            SandboxError::UnknownArtifact(_) | SandboxError::Cancelled => false,
        }
    }
}

impl From<IsolateError> for SandboxError {
    fn from(err: IsolateError) -> Self {
        match err {
            IsolateError::Cancelled => SandboxError::Cancelled,
            other => SandboxError::Isolate(other),
        }
    }
}

impl From<Cancelled> for SandboxError {
    fn from(_: Cancelled) -> Self {
        SandboxError::Cancelled
    }
}

/// Resource-bounded compile and run capability.
///
/// Implementations must tear down every process and working directory they
/// create before returning, including on error and cancellation.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Compile the submission's source. A compiler rejection or timeout is an
    /// `Ok` result with `succeeded == false`; `Err` means the sandbox failed.
    async fn compile(
        &self,
        submission: &Submission,
        cancel: &CancelToken,
    ) -> Result<CompilationResult, SandboxError>;

    /// Run the compiled unit once with `input` on stdin and a hard wall-clock
    /// limit of `time_limit`
    async fn run(
        &self,
        artifact: &ArtifactHandle,
        input: &str,
        time_limit: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError>;

    /// Drop the compiled unit. Unknown handles are ignored.
    async fn release(&self, artifact: ArtifactHandle);
}
