//! Verdict aggregation
//!
//! [`aggregate`] folds a compilation outcome and the per-test results into an
//! [`ExerciseVerdict`]. It performs no I/O. A result set that does not line
//! up with the submission's declared test cases is a bug upstream and is
//! reported as [`InvariantViolation`] instead of being papered over.

use std::collections::HashSet;

use chrono::Utc;
use thiserror::Error;

use crate::analysis::AbstractionReport;
use crate::model::{
    CompilationResult, ExerciseVerdict, OverallStatus, RecordKey, Submission, TestResult,
};

#[derive(Debug, Error)]
#[error("invariant violated for {key}: {kind}")]
pub struct InvariantViolation {
    pub key: RecordKey,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationKind {
    #[error("compilation failed but {0} test results were produced")]
    ResultsAfterFailedCompile(usize),

    #[error("expected {expected} test results, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("result #{index} is '{actual}' but test case is '{expected}'")]
    NameMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("duplicate test name '{0}'")]
    DuplicateName(String),
}

/// Build the verdict for `submission`.
///
/// The artifact handle is dropped from the stored compilation result; it
/// refers to sandbox state that does not outlive the judging run.
pub fn aggregate(
    submission: &Submission,
    mut compilation: CompilationResult,
    test_results: Vec<TestResult>,
    abstraction: Option<AbstractionReport>,
) -> Result<ExerciseVerdict, InvariantViolation> {
    check(submission, &compilation, &test_results).map_err(|kind| InvariantViolation {
        key: submission.key(),
        kind,
    })?;

    let overall_status = if !compilation.succeeded {
        OverallStatus::CompileFailed
    } else if test_results.iter().all(|r| r.passed) {
        OverallStatus::Passed
    } else {
        OverallStatus::Failed
    };
    compilation.artifact = None;

    Ok(ExerciseVerdict {
        submission: submission.to_ref(),
        compilation,
        test_results,
        overall_status,
        finalized_at: Utc::now(),
        abstraction,
    })
}

fn check(
    submission: &Submission,
    compilation: &CompilationResult,
    results: &[TestResult],
) -> Result<(), ViolationKind> {
    if !compilation.succeeded {
        return match results.len() {
            0 => Ok(()),
            n => Err(ViolationKind::ResultsAfterFailedCompile(n)),
        };
    }

    let cases = &submission.test_cases;
    if results.len() != cases.len() {
        return Err(ViolationKind::CountMismatch {
            expected: cases.len(),
            actual: results.len(),
        });
    }

    let mut seen = HashSet::new();
    for (index, (case, result)) in cases.iter().zip(results).enumerate() {
        if case.name != result.test_name {
            return Err(ViolationKind::NameMismatch {
                index,
                expected: case.name.clone(),
                actual: result.test_name.clone(),
            });
        }
        if !seen.insert(result.test_name.as_str()) {
            return Err(ViolationKind::DuplicateName(result.test_name.clone()));
        }
    }
    Ok(())
}
