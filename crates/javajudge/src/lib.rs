//! A library for judging student Java submissions.
//!
//! Javajudge extracts submissions from scraped exercise pages, compiles and
//! tests them inside IOI Isolate sandboxes, and reports a verdict per
//! student and exercise to a local state file and an external control
//! process.
//!
//! # Pipeline
//!
//! - **Extraction**: page JSON into [`Submission`] records, one per block.
//! - **Sandbox**: fresh isolate box per compilation and per test run, with
//!   CPU, wall-clock, memory and process limits.
//! - **Test runner**: every declared test case in order, classified as pass,
//!   wrong output, timeout, runtime error or crash.
//! - **Aggregation**: an [`ExerciseVerdict`] checked against its submission.
//! - **Reporting**: atomic local persistence, then delivery with retries.
//! - **Control loop**: polling, change detection and cancellation.

pub use analysis::{AbstractionReport, AbstractionRules};
pub use cancel::{CancelToken, Cancelled};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use daemon::{
    ControlLoop, ControlState, CycleReport, DaemonError, DaemonOptions, DirectorySource,
    JudgeError, PageSource, SourceError, judge,
};
pub use extract::{ExtractOptions, ExtractionError, PageContent, PageTable, extract};
pub use isolate::{IsolateError, prepare_cgroup};
pub use model::{
    CompilationResult, ExerciseVerdict, FailureKind, OverallStatus, RecordKey, Submission,
    SubmissionRef, TestCase, TestResult,
};
pub use report::{
    Delivery, HttpIpcClient, IpcTransport, ReportError, Reporter, RetryPolicy, StateStore,
    TransportError, VerdictMessage,
};
pub use runner::{ComparePolicy, RunnerOptions, TestRunner};
pub use sandbox::{ArtifactHandle, IsolateSandbox, Sandbox, SandboxError};
pub use types::{ExecutionResult, ExecutionStatus, LimitExceeded, MountConfig, ResourceLimits};
pub use verdict::{InvariantViolation, aggregate};

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod daemon;
pub mod extract;
pub mod isolate;
pub mod model;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod types;
pub mod verdict;
