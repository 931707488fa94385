use std::time::{Duration, Instant};

use javajudge::cancel::CancelToken;
use javajudge::model::FailureKind;
use javajudge::runner::{RunnerOptions, TestRunner};
use javajudge::sandbox::{IsolateSandbox, Sandbox};
use javajudge::types::ExecutionStatus;

use super::{case, submission, test_config};

async fn compile(sandbox: &IsolateSandbox, source: &str) -> javajudge::sandbox::ArtifactHandle {
    let result = sandbox
        .compile(&submission(source, vec![]), &CancelToken::new())
        .await
        .expect("compile call");
    assert!(result.succeeded, "diagnostics: {}", result.diagnostics);
    result.artifact.expect("artifact")
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_run_sum() {
    let sandbox = IsolateSandbox::new(test_config(230)).expect("sandbox");
    let artifact = compile(&sandbox, "Suma.java").await;

    let result = sandbox
        .run(&artifact, "3 4", Duration::from_secs(5), &CancelToken::new())
        .await
        .expect("run");

    assert!(result.is_success());
    assert_eq!(result.stdout_lossy(), "7\n");
    sandbox.release(artifact).await;
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_infinite_loop_times_out() {
    let sandbox = IsolateSandbox::new(test_config(231)).expect("sandbox");
    let artifact = compile(&sandbox, "InfiniteLoop.java").await;
    let cases = vec![
        case("bucle", "", "7", Duration::from_secs(2)),
        case("otra", "", "7", Duration::from_secs(2)),
    ];

    let started = Instant::now();
    let results = TestRunner::new(&sandbox, RunnerOptions::default())
        .run_all(&artifact, &cases, &CancelToken::new())
        .await
        .expect("run_all");
    sandbox.release(artifact).await;

    // Output "7" was printed before the loop; it must not count
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.failure_kind, FailureKind::Timeout);
        assert!(!result.passed);
    }
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_nonzero_exit_is_runtime_error() {
    let sandbox = IsolateSandbox::new(test_config(232)).expect("sandbox");
    let artifact = compile(&sandbox, "ExitCode.java").await;

    let results = TestRunner::new(&sandbox, RunnerOptions::default())
        .run_all(
            &artifact,
            &[case("salida", "", "7", Duration::from_secs(5))],
            &CancelToken::new(),
        )
        .await
        .expect("run_all");
    sandbox.release(artifact).await;

    assert_eq!(results[0].failure_kind, FailureKind::RuntimeError);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_uncaught_exception() {
    let sandbox = IsolateSandbox::new(test_config(233)).expect("sandbox");
    let artifact = compile(&sandbox, "UncaughtException.java").await;

    let result = sandbox
        .run(&artifact, "", Duration::from_secs(5), &CancelToken::new())
        .await
        .expect("run");
    sandbox.release(artifact).await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert!(result.stderr_lossy().contains("ArrayIndexOutOfBoundsException"));
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_each_run_gets_a_fresh_box() {
    let sandbox = IsolateSandbox::new(test_config(234)).expect("sandbox");
    let artifact = compile(&sandbox, "WritesFile.java").await;
    let cancel = CancelToken::new();

    for _ in 0..2 {
        let result = sandbox
            .run(&artifact, "", Duration::from_secs(5), &cancel)
            .await
            .expect("run");
        assert_eq!(result.stdout_lossy().trim(), "clean");
    }
    sandbox.release(artifact).await;
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_cancel_kills_running_program() {
    let sandbox = IsolateSandbox::new(test_config(235)).expect("sandbox");
    let artifact = compile(&sandbox, "InfiniteLoop.java").await;
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = sandbox
        .run(&artifact, "", Duration::from_secs(30), &cancel)
        .await
        .unwrap_err();
    assert!(!err.is_environment_fault());
    assert!(started.elapsed() < Duration::from_secs(10));
    sandbox.release(artifact).await;
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_unknown_artifact() {
    let sandbox = IsolateSandbox::new(test_config(236)).expect("sandbox");
    let err = sandbox
        .run(
            &javajudge::sandbox::ArtifactHandle::new(999),
            "",
            Duration::from_secs(1),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, javajudge::sandbox::SandboxError::UnknownArtifact(_)));
}
