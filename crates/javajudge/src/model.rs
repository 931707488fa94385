//! Judging data model
//!
//! A [`Submission`] comes out of the extractor, the sandbox turns it into a
//! [`CompilationResult`], the test runner produces one [`TestResult`] per
//! [`TestCase`], and the aggregator folds all of it into an
//! [`ExerciseVerdict`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analysis::{AbstractionReport, AbstractionRules};
use crate::sandbox::ArtifactHandle;

/// One declared functional test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Fed verbatim to the program's stdin
    pub input: String,
    pub expected_output: String,
    /// Hard wall-clock limit for one run
    #[serde(rename = "time_limit_ms", with = "duration_ms")]
    pub time_limit: Duration,
}

/// One student's attempt at one exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub exercise_id: String,
    /// Display name from the page-identifier table
    pub exercise_name: String,
    pub student_id: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstraction: Option<AbstractionRules>,
}

impl Submission {
    /// Content hash over everything that influences the verdict.
    ///
    /// `received_at` is left out so a re-scraped, unchanged submission hashes
    /// the same.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.exercise_id, &self.student_id, &self.source_code] {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        for case in &self.test_cases {
            hasher.update(case.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(case.input.as_bytes());
            hasher.update(b"\0");
            hasher.update(case.expected_output.as_bytes());
            hasher.update(b"\0");
            hasher.update(case.time_limit.as_millis().to_le_bytes());
        }
        if let Some(rules) = &self.abstraction {
            for (literal, count) in &rules.required {
                hasher.update(literal.as_bytes());
                hasher.update(count.to_le_bytes());
            }
            for pattern in &rules.banned {
                hasher.update(pattern.as_bytes());
                hasher.update(b"\0");
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Store key of this submission
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.exercise_id, &self.student_id)
    }

    /// Identity of this submission as carried by its verdict
    pub fn to_ref(&self) -> SubmissionRef {
        SubmissionRef {
            exercise_id: self.exercise_id.clone(),
            exercise_name: self.exercise_name.clone(),
            student_id: self.student_id.clone(),
            received_at: self.received_at,
            fingerprint: self.fingerprint(),
        }
    }
}

/// Reference from a verdict back to the submission it judges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub exercise_id: String,
    pub exercise_name: String,
    pub student_id: String,
    pub received_at: DateTime<Utc>,
    pub fingerprint: String,
}

impl SubmissionRef {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.exercise_id, &self.student_id)
    }
}

/// Persistence key: one record per student per exercise
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub exercise_id: String,
    pub student_id: String,
}

impl RecordKey {
    pub fn new(exercise_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            exercise_id: exercise_id.into(),
            student_id: student_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exercise_id, self.student_id)
    }
}

/// Outcome of compiling one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationResult {
    /// Decided by the compiler's exit status only
    pub succeeded: bool,
    /// Compiler stdout and stderr, advisory
    pub diagnostics: String,
    /// Compiled unit, owned by the sandbox that produced it
    #[serde(skip)]
    pub artifact: Option<ArtifactHandle>,
}

impl CompilationResult {
    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            diagnostics: diagnostics.into(),
            artifact: None,
        }
    }

    pub fn succeeded(diagnostics: impl Into<String>, artifact: ArtifactHandle) -> Self {
        Self {
            succeeded: true,
            diagnostics: diagnostics.into(),
            artifact: Some(artifact),
        }
    }
}

/// Why a test case did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    None,
    WrongOutput,
    Timeout,
    RuntimeError,
    Crashed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::None => "none",
            FailureKind::WrongOutput => "wrong output",
            FailureKind::Timeout => "timeout",
            FailureKind::RuntimeError => "runtime error",
            FailureKind::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Outcome of one test case run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub actual_output: String,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub failure_kind: FailureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    CompileFailed,
    Passed,
    Failed,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::CompileFailed => "compile_failed",
            OverallStatus::Passed => "passed",
            OverallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final judgment of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseVerdict {
    pub submission: SubmissionRef,
    pub compilation: CompilationResult,
    pub test_results: Vec<TestResult>,
    pub overall_status: OverallStatus,
    pub finalized_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstraction: Option<AbstractionReport>,
}

impl ExerciseVerdict {
    pub fn key(&self) -> RecordKey {
        self.submission.key()
    }

    pub fn passed_count(&self) -> usize {
        self.test_results.iter().filter(|r| r.passed).count()
    }

    /// First test case that did not pass, in declared order
    pub fn first_failure(&self) -> Option<&TestResult> {
        self.test_results.iter().find(|r| !r.passed)
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
