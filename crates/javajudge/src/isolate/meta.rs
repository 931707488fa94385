//! Isolate meta file parsing
//!
//! After `isolate --run` the keeper writes `key:value` lines describing how
//! the sandboxed process ended. Only the keys the judge acts on are kept.

use std::path::Path;

use thiserror::Error;

use crate::isolate::IsolateError;
use crate::types::{ExecutionResult, ExecutionStatus, LimitExceeded};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("meta file line {line_number}: {message} ({line:?})")]
pub struct MetaParseError {
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

/// Typed view of one isolate meta file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaFile {
    /// `status`; absent means the process exited normally with code 0
    pub status: Option<String>,
    pub time: Option<f64>,
    pub wall_time: Option<f64>,
    pub cg_mem: Option<u64>,
    pub max_rss: Option<u64>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub message: Option<String>,
    pub killed: bool,
}

impl MetaFile {
    /// Parse leniently, skipping lines without a `key:value` shape and values
    /// that fail to parse.
    pub fn parse(content: &str) -> Self {
        let mut meta = Self::default();
        for line in content.lines() {
            if let Some((key, value)) = line.trim().split_once(':') {
                meta.apply(key.trim(), value.trim());
            }
        }
        meta
    }

    /// Parse, rejecting any non-empty line that is not `key:value`
    pub fn try_parse(content: &str) -> Result<Self, MetaParseError> {
        let mut meta = Self::default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let error = |message: &str| MetaParseError {
                line_number: idx + 1,
                line: line.to_owned(),
                message: message.to_owned(),
            };
            let (key, value) = trimmed
                .split_once(':')
                .ok_or_else(|| error("missing colon separator"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(error("empty key before colon"));
            }
            meta.apply(key, value.trim());
        }
        Ok(meta)
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "status" => self.status = Some(value.to_owned()),
            "time" => self.time = value.parse().ok(),
            "time-wall" => self.wall_time = value.parse().ok(),
            "cg-mem" => self.cg_mem = value.parse().ok(),
            "max-rss" => self.max_rss = value.parse().ok(),
            "exitcode" => self.exit_code = value.parse().ok(),
            "exitsig" => self.signal = value.parse().ok(),
            "message" => self.message = Some(value.to_owned()),
            "killed" => self.killed = true,
            // csw-voluntary, cg-oom-killed and friends are not used
            _ => {}
        }
    }

    /// Read and strictly parse a meta file written by isolate
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IsolateError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::try_parse(&content).map_err(|e| IsolateError::MetaParseFailed(e.to_string()))
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
            .as_deref()
            .map(ExecutionStatus::from_isolate_status)
            .unwrap_or(ExecutionStatus::Ok)
    }

    /// Peak memory in kilobytes; the cgroup figure wins when present
    pub fn memory(&self) -> u64 {
        self.cg_mem.or(self.max_rss).unwrap_or(0)
    }

    pub fn limit_exceeded(&self) -> LimitExceeded {
        let from_message = LimitExceeded::from_message(self.message.as_deref());
        if from_message.is_exceeded() {
            return from_message;
        }
        if self.status() == ExecutionStatus::TimeLimitExceeded {
            return LimitExceeded::Time;
        }
        LimitExceeded::NotExceeded
    }

    pub fn to_execution_result(&self) -> ExecutionResult {
        ExecutionResult {
            status: self.status(),
            limit_exceeded: self.limit_exceeded(),
            time: self.time.unwrap_or(0.0),
            wall_time: self.wall_time.unwrap_or(0.0),
            memory: self.memory(),
            exit_code: self.exit_code,
            signal: self.signal,
            message: self.message.clone(),
            stdout: None,
            stderr: None,
        }
    }
}
