use javajudge::isolate::MetaFile;
use javajudge::types::{ExecutionStatus, LimitExceeded};

use super::FIXTURES_PATH;

fn load_meta_fixture(name: &str) -> MetaFile {
    let path = format!("{FIXTURES_PATH}/meta/{name}");
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read meta fixture {path}: {e}"));
    MetaFile::try_parse(&content).unwrap_or_else(|e| panic!("{name}: {e}"))
}

#[test]
fn test_meta_success() {
    let meta = load_meta_fixture("success.meta");
    assert_eq!(meta.status(), ExecutionStatus::Ok);
    assert_eq!(meta.exit_code, Some(0));
    assert_eq!(meta.wall_time, Some(0.164));
    assert_eq!(meta.limit_exceeded(), LimitExceeded::NotExceeded);
    assert!(meta.to_execution_result().is_success());
}

#[test]
fn test_meta_tle() {
    let meta = load_meta_fixture("tle.meta");
    assert_eq!(meta.status(), ExecutionStatus::TimeLimitExceeded);
    assert_eq!(meta.limit_exceeded(), LimitExceeded::Time);
    assert!(meta.killed);
}

#[test]
fn test_meta_wall_tle() {
    let meta = load_meta_fixture("wall_tle.meta");
    assert_eq!(meta.status(), ExecutionStatus::TimeLimitExceeded);
    assert_eq!(meta.limit_exceeded(), LimitExceeded::WallTime);
}

#[test]
fn test_meta_jvm_oom_kill() {
    let meta = load_meta_fixture("oom.meta");
    assert_eq!(meta.status(), ExecutionStatus::Signaled);
    assert_eq!(meta.signal, Some(9));
    // cg-mem is preferred over max-rss
    assert_eq!(meta.memory(), 524288);
}

#[test]
fn test_meta_signal() {
    let meta = load_meta_fixture("signal.meta");
    assert_eq!(meta.status(), ExecutionStatus::Signaled);
    assert_eq!(meta.signal, Some(6)); // SIGABRT from a JVM crash
}

#[test]
fn test_meta_runtime_error() {
    let meta = load_meta_fixture("runtime_error.meta");
    assert_eq!(meta.status(), ExecutionStatus::RuntimeError);
    assert_eq!(meta.exit_code, Some(1));
}

#[test]
fn test_meta_internal_error() {
    let meta = load_meta_fixture("internal_error.meta");
    assert_eq!(meta.status(), ExecutionStatus::InternalError);
    assert!(meta.message.unwrap().contains("execve"));
}

#[test]
fn test_meta_malformed_is_rejected() {
    let content = std::fs::read_to_string(format!("{FIXTURES_PATH}/meta/malformed.meta")).unwrap();
    let err = MetaFile::try_parse(&content).unwrap_err();
    assert_eq!(err.line_number, 2);

    // The lenient parser keeps what it can read
    assert_eq!(MetaFile::parse(&content).time, Some(0.1));
}
