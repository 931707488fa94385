use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use javajudge::{
    CancelToken, ControlLoop, ControlState, DaemonOptions, DirectorySource, FailureKind,
    IpcTransport, IsolateSandbox, OverallStatus, PageTable, Reporter, RetryPolicy, StateStore,
    TransportError, VerdictMessage,
};
use tempfile::TempDir;

use super::{FIXTURES_PATH, test_config};

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<VerdictMessage>>>,
}

#[async_trait]
impl IpcTransport for Recorder {
    async fn send(&self, message: &VerdictMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn status(&self) -> Result<String, TransportError> {
        Ok("ok".to_owned())
    }
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_full_cycle_over_fixture_pages() {
    let state_dir = TempDir::new().unwrap();
    let state_file = state_dir.path().join("state.json");
    let pages = std::path::Path::new(FIXTURES_PATH).join("pages");

    let config = test_config(250);
    let options = DaemonOptions::from(&config);
    let table = PageTable::load(&pages.join("page_ids.json")).unwrap();
    let recorder = Recorder::default();
    let reporter = Reporter::new(
        StateStore::open(&state_file).unwrap(),
        Box::new(recorder.clone()),
        retry(),
        1000,
    );
    let sandbox = IsolateSandbox::new(config).expect("sandbox");
    let mut control = ControlLoop::new(
        sandbox,
        DirectorySource::new(&pages),
        table,
        reporter,
        options,
    );

    let cancel = CancelToken::new();
    let mut state = ControlState::from_store(control.reporter().store());
    let report = control.run_cycle(&mut state, &cancel).await.expect("cycle");

    assert_eq!(report.pages, 2);
    assert_eq!(report.judged, 3);
    assert_eq!(report.extraction_failures, 1);

    let sent = recorder.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 3);
    let by_student = |exercise: &str, student: &str| {
        sent.iter()
            .find(|m| m.exercise_id == exercise && m.student_id == student)
            .cloned()
            .expect("verdict sent")
    };

    let suma = by_student("4711", "alu01");
    assert_eq!(suma.overall_status, OverallStatus::Passed);
    assert_eq!(suma.summary.tests_passed, 2);
    assert!(suma.summary.abstraction.is_some());

    let broken = by_student("4711", "alu02");
    assert_eq!(broken.overall_status, OverallStatus::CompileFailed);
    assert!(!broken.summary.compiled);
    assert!(!broken.summary.diagnostics.is_empty());

    // Second expected output carries no trailing newline; both pass
    let saludo = by_student("4712", "alu01");
    assert_eq!(saludo.overall_status, OverallStatus::Passed);

    let store = StateStore::open(&state_file).unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(store.pending().count(), 0);

    // Nothing changed, so the next cycle judges nothing
    let report = control.run_cycle(&mut state, &cancel).await.expect("cycle");
    assert_eq!(report.judged, 0);
    assert_eq!(report.unchanged, 3);
    assert_eq!(recorder.sent.lock().unwrap().len(), 3);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_judge_reports_first_failure() {
    let sandbox = IsolateSandbox::new(test_config(251)).expect("sandbox");
    let sub = super::submission(
        "Suma.java",
        vec![
            super::case("bien", "3 4", "7", Duration::from_secs(5)),
            super::case("mal", "1 1", "3", Duration::from_secs(5)),
        ],
    );

    let verdict = javajudge::judge(
        &sandbox,
        &sub,
        &javajudge::RunnerOptions::default(),
        &CancelToken::new(),
    )
    .await
    .expect("judge");

    assert_eq!(verdict.overall_status, OverallStatus::Failed);
    assert_eq!(verdict.passed_count(), 1);
    let failure = verdict.first_failure().expect("failure");
    assert_eq!(failure.test_name, "mal");
    assert_eq!(failure.failure_kind, FailureKind::WrongOutput);
    assert_eq!(failure.actual_output.trim(), "2");
    assert_eq!(sandbox.artifact_count(), 0);
}
