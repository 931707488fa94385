//! Judging pipeline and control loop
//!
//! [`judge`] takes one submission through compile, test and aggregation.
//! [`ControlLoop`] polls the page source and feeds every new or changed
//! submission through [`judge`] and the [`Reporter`], one at a time.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

pub use crate::daemon::source::{DirectorySource, PageSource, SourceError};
use crate::analysis::PatternError;
use crate::cancel::{CancelToken, Cancelled};
use crate::config::Config;
use crate::extract::{ExtractOptions, PageContent, PageTable, extract};
use crate::model::{ExerciseVerdict, RecordKey, Submission};
use crate::report::{ReportError, Reporter, StateStore};
use crate::runner::{RunnerOptions, TestRunner};
use crate::sandbox::{Sandbox, SandboxError};
use crate::verdict::{InvariantViolation, aggregate};

mod source;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("abstraction check failed: {0}")]
    Pattern(#[from] PatternError),
}

impl JudgeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JudgeError::Sandbox(SandboxError::Cancelled))
    }

    pub fn is_environment_fault(&self) -> bool {
        matches!(self, JudgeError::Sandbox(e) if e.is_environment_fault())
    }
}

impl From<Cancelled> for JudgeError {
    fn from(_: Cancelled) -> Self {
        JudgeError::Sandbox(SandboxError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("judging environment failure: {0}")]
    Environment(#[source] SandboxError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("page source failed for {cycles} consecutive cycles")]
    SourceUnavailable { cycles: u32 },

    #[error("daemon cancelled")]
    Cancelled,
}

/// Judge one submission.
///
/// The compiled unit is released before returning on every path. A compile
/// failure is a verdict, not an error.
#[instrument(skip_all, fields(key = %submission.key(), tests = submission.test_cases.len()))]
pub async fn judge<S: Sandbox + ?Sized>(
    sandbox: &S,
    submission: &Submission,
    options: &RunnerOptions,
    cancel: &CancelToken,
) -> Result<ExerciseVerdict, JudgeError> {
    cancel.check()?;
    let compilation = sandbox.compile(submission, cancel).await?;
    if !compilation.succeeded {
        debug!("compilation failed");
        return Ok(aggregate(submission, compilation, Vec::new(), None)?);
    }
    let Some(artifact) = compilation.artifact.clone() else {
        return Err(SandboxError::Internal("compilation succeeded without an artifact".into()).into());
    };

    let results = TestRunner::new(sandbox, *options)
        .run_all(&artifact, &submission.test_cases, cancel)
        .await;
    sandbox.release(artifact).await;
    let results = results?;

    let abstraction = submission
        .abstraction
        .as_ref()
        .map(|rules| rules.check(&submission.source_code))
        .transpose()?;

    Ok(aggregate(submission, compilation, results, abstraction)?)
}

/// Loop settings
#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    pub poll_interval: Duration,
    /// Consecutive cycles with every fetch failing before giving up
    pub max_source_failures: u32,
    pub runner: RunnerOptions,
    pub extract: ExtractOptions,
}

impl From<&Config> for DaemonOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.daemon.poll_interval(),
            max_source_failures: config.daemon.max_source_failures,
            runner: RunnerOptions {
                policy: config.judge.comparison,
                output_tail: config.judge.output_tail,
            },
            extract: ExtractOptions::from(&config.judge),
        }
    }
}

/// State carried from one cycle to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    pub cycle: u64,
    /// Fingerprint of the last judged submission per key
    pub last_seen: HashMap<RecordKey, String>,
    pub consecutive_source_failures: u32,
}

impl ControlState {
    /// Seed from persisted verdicts so a restart does not re-judge
    /// unchanged submissions
    pub fn from_store(store: &StateStore) -> Self {
        Self {
            last_seen: store
                .records()
                .map(|r| (r.key(), r.fingerprint.clone()))
                .collect(),
            ..Self::default()
        }
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pages: usize,
    pub fetch_failures: usize,
    pub extraction_failures: usize,
    pub unchanged: usize,
    pub judged: usize,
    pub abandoned: usize,
    pub resent: usize,
}

pub struct ControlLoop<S, P> {
    sandbox: S,
    source: P,
    table: PageTable,
    reporter: Reporter,
    options: DaemonOptions,
}

impl<S: Sandbox, P: PageSource> ControlLoop<S, P> {
    pub fn new(
        sandbox: S,
        source: P,
        table: PageTable,
        reporter: Reporter,
        options: DaemonOptions,
    ) -> Self {
        Self {
            sandbox,
            source,
            table,
            reporter,
            options,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Poll until cancelled or an unrecoverable failure.
    ///
    /// Cancellation is a clean stop and returns `Ok`.
    pub async fn run(&mut self, cancel: &CancelToken) -> Result<(), DaemonError> {
        match self.reporter.transport().status().await {
            Ok(status) => info!(status = %status.trim(), "control process reachable"),
            Err(e) => warn!(error = %e, "control process not reachable, verdicts will queue"),
        }

        let mut state = ControlState::from_store(self.reporter.store());
        info!(
            pages = self.table.len(),
            known = state.last_seen.len(),
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "daemon started"
        );

        loop {
            match self.run_cycle(&mut state, cancel).await {
                Ok(report) => info!(
                    cycle = state.cycle,
                    judged = report.judged,
                    unchanged = report.unchanged,
                    abandoned = report.abandoned,
                    extraction_failures = report.extraction_failures,
                    fetch_failures = report.fetch_failures,
                    "cycle finished"
                ),
                Err(DaemonError::Cancelled) => break,
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!(cycles = state.cycle, "daemon stopped");
        Ok(())
    }

    /// One pass over every page.
    ///
    /// Pending re-sends go first. Per-page and per-submission problems are
    /// logged and skipped; only environment faults, store failures, a dead
    /// page source and cancellation end the cycle with an error.
    #[instrument(skip_all, fields(cycle = state.cycle + 1))]
    pub async fn run_cycle(
        &mut self,
        state: &mut ControlState,
        cancel: &CancelToken,
    ) -> Result<CycleReport, DaemonError> {
        state.cycle += 1;
        let mut report = CycleReport::default();

        if cancel.is_cancelled() {
            return Err(DaemonError::Cancelled);
        }
        report.resent = self.reporter.resend_pending(cancel).await?.delivered;

        let page_ids: Vec<String> = self.table.page_ids().map(str::to_owned).collect();
        for page_id in &page_ids {
            if cancel.is_cancelled() {
                return Err(DaemonError::Cancelled);
            }
            report.pages += 1;

            let text = match self.source.fetch(page_id).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    warn!(page = %page_id, error = %e, "fetch failed");
                    report.fetch_failures += 1;
                    continue;
                }
            };
            let content = match PageContent::from_json(page_id.as_str(), &text) {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "skipping page");
                    report.extraction_failures += 1;
                    continue;
                }
            };

            for extracted in extract(&content, &self.table, &self.options.extract) {
                match extracted {
                    Ok(submission) => self.process(submission, state, &mut report, cancel).await?,
                    Err(e) => {
                        warn!(error = %e, "skipping block");
                        report.extraction_failures += 1;
                    }
                }
            }
        }

        if report.pages > 0 && report.fetch_failures == report.pages {
            state.consecutive_source_failures += 1;
            warn!(
                consecutive = state.consecutive_source_failures,
                "every page fetch failed"
            );
            if state.consecutive_source_failures >= self.options.max_source_failures {
                return Err(DaemonError::SourceUnavailable {
                    cycles: state.consecutive_source_failures,
                });
            }
        } else {
            state.consecutive_source_failures = 0;
        }

        Ok(report)
    }

    async fn process(
        &mut self,
        submission: Submission,
        state: &mut ControlState,
        report: &mut CycleReport,
        cancel: &CancelToken,
    ) -> Result<(), DaemonError> {
        if cancel.is_cancelled() {
            return Err(DaemonError::Cancelled);
        }

        let key = submission.key();
        let fingerprint = submission.fingerprint();
        if state.last_seen.get(&key) == Some(&fingerprint) {
            report.unchanged += 1;
            return Ok(());
        }

        match judge(&self.sandbox, &submission, &self.options.runner, cancel).await {
            Ok(verdict) => {
                self.reporter.report(&submission, verdict, cancel).await?;
                report.judged += 1;
            }
            Err(e) if e.is_cancelled() => return Err(DaemonError::Cancelled),
            Err(JudgeError::Sandbox(e)) if e.is_environment_fault() => {
                error!(key = %key, error = %e, "sandbox unusable");
                return Err(DaemonError::Environment(e));
            }
            Err(e) => {
                error!(
                    key = %key,
                    exercise = %submission.exercise_name,
                    fingerprint = %fingerprint,
                    error = %e,
                    "submission abandoned"
                );
                report.abandoned += 1;
            }
        }
        // Abandoned submissions are not retried until they change
        state.last_seen.insert(key, fingerprint);
        Ok(())
    }
}
