use javajudge::cancel::CancelToken;
use javajudge::sandbox::{IsolateSandbox, Sandbox};

use super::{case, submission, test_config};

#[tokio::test]
#[ignore = "requires root"]
async fn test_compile_success() {
    let sandbox = IsolateSandbox::new(test_config(220)).expect("sandbox");
    let sub = submission("Suma.java", vec![]);

    let result = sandbox
        .compile(&sub, &CancelToken::new())
        .await
        .expect("Compilation call failed");

    assert!(result.succeeded, "diagnostics: {}", result.diagnostics);
    let artifact = result.artifact.expect("artifact");
    assert_eq!(sandbox.artifact_count(), 1);

    sandbox.release(artifact).await;
    assert_eq!(sandbox.artifact_count(), 0);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_compile_error() {
    let sandbox = IsolateSandbox::new(test_config(221)).expect("sandbox");
    let sub = submission("SyntaxError.java", vec![]);

    let result = sandbox
        .compile(&sub, &CancelToken::new())
        .await
        .expect("Compilation call failed");

    assert!(!result.succeeded);
    assert!(result.artifact.is_none());
    assert!(result.diagnostics.contains("';' expected"));
    assert_eq!(sandbox.artifact_count(), 0);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_compile_public_class_and_helpers() {
    let sandbox = IsolateSandbox::new(test_config(222)).expect("sandbox");
    let sub = submission(
        "Helpers.java",
        vec![case("producto", "6 7", "42", std::time::Duration::from_secs(5))],
    );
    let cancel = CancelToken::new();

    let result = sandbox.compile(&sub, &cancel).await.expect("compile");
    assert!(result.succeeded, "diagnostics: {}", result.diagnostics);
    let artifact = result.artifact.expect("artifact");

    let run = sandbox
        .run(&artifact, "6 7", std::time::Duration::from_secs(5), &cancel)
        .await
        .expect("run");
    assert_eq!(run.stdout_lossy().trim(), "42");
    sandbox.release(artifact).await;
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_compile_cancelled() {
    let sandbox = IsolateSandbox::new(test_config(223)).expect("sandbox");
    let sub = submission("Suma.java", vec![]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = sandbox.compile(&sub, &cancel).await.unwrap_err();
    assert!(!err.is_environment_fault());
    assert_eq!(sandbox.artifact_count(), 0);
}
