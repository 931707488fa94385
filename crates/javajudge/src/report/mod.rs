//! Result reporting
//!
//! A finalized verdict is first written to the local [`StateStore`], then
//! forwarded to the control process over an [`IpcTransport`]. Local
//! persistence never waits on the channel: a verdict that cannot be delivered
//! stays in the store flagged `pending_resend` and is sent again on the next
//! cycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use crate::report::ipc::{HttpIpcClient, IpcTransport, TransportError, send_with_retry};
pub use crate::report::store::{StateStore, StoreError, VerdictRecord};
#[cfg(test)]
pub(crate) use crate::report::ipc::fake::FakeTransport;
use crate::analysis::AbstractionReport;
use crate::cancel::CancelToken;
use crate::model::{ExerciseVerdict, FailureKind, OverallStatus, RecordKey, Submission, TestCase};
use crate::runner::tail;

mod ipc;
mod store;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounded exponential backoff for IPC sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// What the control process receives for one verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictMessage {
    pub exercise_id: String,
    pub exercise_name: String,
    pub student_id: String,
    pub overall_status: OverallStatus,
    pub finalized_at: DateTime<Utc>,
    pub summary: VerdictSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub compiled: bool,
    /// Tail of the compiler output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostics: String,
    pub tests_passed: usize,
    pub tests_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<FailureSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstraction: Option<AbstractionReport>,
}

/// The first failing test, with enough context for feedback to the student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub test_name: String,
    pub failure_kind: FailureKind,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
}

impl VerdictMessage {
    /// Summarize `verdict`. `cases` are the submission's test cases, used to
    /// echo the failing test's input and expected output. Long texts keep
    /// their last `tail_chars` characters.
    pub fn new(verdict: &ExerciseVerdict, cases: &[TestCase], tail_chars: usize) -> Self {
        let first_failure = verdict.first_failure().map(|result| {
            let case = cases.iter().find(|c| c.name == result.test_name);
            FailureSummary {
                test_name: result.test_name.clone(),
                failure_kind: result.failure_kind,
                input: case.map(|c| tail(&c.input, tail_chars)).unwrap_or_default(),
                expected_output: case
                    .map(|c| tail(&c.expected_output, tail_chars))
                    .unwrap_or_default(),
                actual_output: result.actual_output.clone(),
            }
        });

        let submission = &verdict.submission;
        Self {
            exercise_id: submission.exercise_id.clone(),
            exercise_name: submission.exercise_name.clone(),
            student_id: submission.student_id.clone(),
            overall_status: verdict.overall_status,
            finalized_at: verdict.finalized_at,
            summary: VerdictSummary {
                compiled: verdict.compilation.succeeded,
                diagnostics: tail(verdict.compilation.diagnostics.trim_end(), tail_chars),
                tests_passed: verdict.passed_count(),
                tests_total: verdict.test_results.len(),
                first_failure,
                abstraction: verdict.abstraction.clone(),
            },
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.exercise_id, &self.student_id)
    }
}

/// Whether a reported verdict reached the control process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Stored locally, flagged for re-send
    Pending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResendSummary {
    pub delivered: usize,
    pub still_pending: usize,
}

/// Sole writer of the state store
pub struct Reporter {
    store: StateStore,
    transport: Box<dyn IpcTransport>,
    policy: RetryPolicy,
    tail_chars: usize,
}

impl Reporter {
    pub fn new(
        store: StateStore,
        transport: Box<dyn IpcTransport>,
        policy: RetryPolicy,
        tail_chars: usize,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            tail_chars,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn transport(&self) -> &dyn IpcTransport {
        self.transport.as_ref()
    }

    /// Persist `verdict` for `submission`, then forward it.
    ///
    /// Reporting the same verdict again overwrites the same record. An
    /// undeliverable message is not an error: the record stays pending.
    #[instrument(skip_all, fields(key = %verdict.key(), status = %verdict.overall_status))]
    pub async fn report(
        &mut self,
        submission: &Submission,
        verdict: ExerciseVerdict,
        cancel: &CancelToken,
    ) -> Result<Delivery, ReportError> {
        let key = verdict.key();
        let message = VerdictMessage::new(&verdict, &submission.test_cases, self.tail_chars);
        self.store.upsert(VerdictRecord {
            verdict,
            fingerprint: submission.fingerprint(),
            message: message.clone(),
            pending_resend: true,
        });
        self.store.save()?;

        match send_with_retry(self.transport.as_ref(), &message, &self.policy, cancel).await {
            Ok(_) => {
                self.store.set_pending(&key, false);
                self.store.save()?;
                info!("verdict reported");
                Ok(Delivery::Delivered)
            }
            Err(err) => {
                warn!(error = %err, "verdict stored, delivery deferred");
                Ok(Delivery::Pending)
            }
        }
    }

    /// Try once more (with retries) to deliver every pending record
    #[instrument(skip_all)]
    pub async fn resend_pending(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<ResendSummary, ReportError> {
        let pending: Vec<VerdictMessage> =
            self.store.pending().map(|r| r.message.clone()).collect();
        if pending.is_empty() {
            return Ok(ResendSummary::default());
        }

        let mut summary = ResendSummary::default();
        for message in &pending {
            if cancel.is_cancelled() {
                break;
            }
            match send_with_retry(self.transport.as_ref(), message, &self.policy, cancel).await {
                Ok(_) => {
                    self.store.set_pending(&message.key(), false);
                    summary.delivered += 1;
                }
                Err(err) => warn!(key = %message.key(), error = %err, "re-send failed"),
            }
        }
        summary.still_pending = self.store.pending().count();

        if summary.delivered > 0 {
            self.store.save()?;
        }
        info!(
            delivered = summary.delivered,
            still_pending = summary.still_pending,
            "pending verdicts re-sent"
        );
        Ok(summary)
    }
}
