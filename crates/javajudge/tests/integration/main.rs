//! Integration tests for javajudge
//!
//! These tests require the isolate binary and a JDK to be installed.
//! Run with: cargo test -p javajudge --features integration-tests
//!
//! Tests that require root are marked `#[ignore]`. To include them:
//!    cargo test -p javajudge --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::time::Duration;

use javajudge::config::Config;
use javajudge::model::{Submission, TestCase};

mod compilation;
mod config_loading;
mod execution;
mod extraction;
mod judging;
mod meta_file_fixtures;
mod resource_limits;
mod sandbox_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_text(path: &str) -> String {
    let path = format!("{FIXTURES_PATH}/{path}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

pub(crate) fn fixture_source(name: &str) -> String {
    fixture_text(&format!("sources/{name}"))
}

/// Create a test config with cgroup support if available, falling back to
/// non-cgroup mode. Each test passes its own box range so tests running in
/// parallel never share a box.
pub(crate) fn test_config(first_box_id: u32) -> Config {
    let mut config = Config::default();
    config.first_box_id = first_box_id;
    config.box_count = 1;
    if config.cgroup {
        match javajudge::prepare_cgroup(&config.cg_root) {
            Ok(true) => {}              // cgroups ready
            _ => config.cgroup = false, // not available, fall back
        }
    }
    config
}

pub(crate) fn case(name: &str, input: &str, expected: &str, time_limit: Duration) -> TestCase {
    TestCase {
        name: name.to_owned(),
        input: input.to_owned(),
        expected_output: expected.to_owned(),
        time_limit,
    }
}

pub(crate) fn submission(source: &str, test_cases: Vec<TestCase>) -> Submission {
    Submission {
        exercise_id: "4711".to_owned(),
        exercise_name: "Suma de dos numeros".to_owned(),
        student_id: "alu01".to_owned(),
        source_code: fixture_source(source),
        test_cases,
        received_at: chrono::Utc::now(),
        abstraction: None,
    }
}
