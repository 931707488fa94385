//! Test runner
//!
//! Runs a compiled unit once per declared test case, in order, and turns each
//! sandbox execution into a [`TestResult`].

use tracing::{debug, info, instrument};

pub use crate::runner::compare::{ComparePolicy, normalize, tail};

mod compare;

use crate::cancel::CancelToken;
use crate::model::{FailureKind, TestCase, TestResult};
use crate::sandbox::{ArtifactHandle, Sandbox, SandboxError};
use crate::types::{ExecutionResult, ExecutionStatus};

/// Runner settings
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub policy: ComparePolicy,
    /// Characters of stdout kept in [`TestResult::actual_output`]
    pub output_tail: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            policy: ComparePolicy::default(),
            output_tail: 600,
        }
    }
}

/// Classify one execution against its test case.
///
/// Timeouts are decided before anything looks at the output, so a program
/// killed mid-print is never reported as wrong output.
pub fn classify(
    case: &TestCase,
    result: &ExecutionResult,
    options: &RunnerOptions,
) -> TestResult {
    let stdout = result.stdout_lossy();
    let failure_kind = match result.status {
        ExecutionStatus::TimeLimitExceeded => FailureKind::Timeout,
        ExecutionStatus::Signaled => FailureKind::Crashed,
        ExecutionStatus::RuntimeError => FailureKind::RuntimeError,
        // The sandbox reports isolate failures as errors, never as results
        ExecutionStatus::InternalError => FailureKind::Crashed,
        ExecutionStatus::Ok if result.exit_code.is_some_and(|code| code != 0) => {
            FailureKind::RuntimeError
        }
        ExecutionStatus::Ok if options.policy.matches(&case.expected_output, &stdout) => {
            FailureKind::None
        }
        ExecutionStatus::Ok => FailureKind::WrongOutput,
    };

    let mut actual_output = tail(&stdout, options.output_tail);
    if failure_kind == FailureKind::RuntimeError && stdout.trim().is_empty() {
        // An uncaught exception only shows up on stderr
        actual_output = tail(&result.stderr_lossy(), options.output_tail);
    }

    TestResult {
        test_name: case.name.clone(),
        passed: failure_kind == FailureKind::None,
        actual_output,
        duration: result.wall_duration(),
        failure_kind,
    }
}

/// Executes test cases through a [`Sandbox`]
pub struct TestRunner<'a, S: Sandbox + ?Sized> {
    sandbox: &'a S,
    options: RunnerOptions,
}

impl<'a, S: Sandbox + ?Sized> TestRunner<'a, S> {
    pub fn new(sandbox: &'a S, options: RunnerOptions) -> Self {
        Self { sandbox, options }
    }

    /// Run every case in declared order.
    ///
    /// A failing case never stops the ones after it. Only sandbox errors
    /// (including cancellation) end the run early.
    #[instrument(skip_all, fields(%artifact, cases = cases.len()))]
    pub async fn run_all(
        &self,
        artifact: &ArtifactHandle,
        cases: &[TestCase],
        cancel: &CancelToken,
    ) -> Result<Vec<TestResult>, SandboxError> {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            cancel.check()?;
            let execution = self
                .sandbox
                .run(artifact, &case.input, case.time_limit, cancel)
                .await?;
            let result = classify(case, &execution, &self.options);
            debug!(
                test = %result.test_name,
                passed = result.passed,
                kind = %result.failure_kind,
                duration_ms = result.duration.as_millis() as u64,
                "test case finished"
            );
            results.push(result);
        }

        let passed = results.iter().filter(|r| r.passed).count();
        info!(passed, total = results.len(), "test cases finished");
        Ok(results)
    }
}
