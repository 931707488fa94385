use std::time::Duration;

use javajudge::cancel::CancelToken;
use javajudge::model::FailureKind;
use javajudge::runner::{RunnerOptions, TestRunner};
use javajudge::sandbox::{IsolateSandbox, Sandbox};
use javajudge::types::ResourceLimits;

use super::{case, submission, test_config};

#[tokio::test]
#[ignore = "requires root"]
async fn test_memory_hog_fails() {
    let mut config = test_config(240);
    config.run.limits = Some(ResourceLimits::none().with_memory_limit(384 * ResourceLimits::MB));
    let sandbox = IsolateSandbox::new(config).expect("sandbox");
    let sub = submission("MemoryHog.java", vec![case("memoria", "", "", Duration::from_secs(10))]);
    let cancel = CancelToken::new();

    let compiled = sandbox.compile(&sub, &cancel).await.expect("compile");
    let artifact = compiled.artifact.expect("artifact");
    let results = TestRunner::new(&sandbox, RunnerOptions::default())
        .run_all(&artifact, &sub.test_cases, &cancel)
        .await
        .expect("run_all");
    sandbox.release(artifact).await;

    // OutOfMemoryError exits non-zero; a cgroup OOM kill shows up as a signal
    assert!(matches!(
        results[0].failure_kind,
        FailureKind::RuntimeError | FailureKind::Crashed
    ));
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_test_time_limit_is_wall_clock() {
    let sandbox = IsolateSandbox::new(test_config(241)).expect("sandbox");
    let sub = submission("InfiniteLoop.java", vec![]);
    let cancel = CancelToken::new();

    let artifact = sandbox
        .compile(&sub, &cancel)
        .await
        .expect("compile")
        .artifact
        .expect("artifact");
    let result = sandbox
        .run(&artifact, "", Duration::from_secs(1), &cancel)
        .await
        .expect("run");
    sandbox.release(artifact).await;

    assert!(result.limit_exceeded.is_exceeded());
    assert!(result.wall_duration() < Duration::from_secs(5));
}
