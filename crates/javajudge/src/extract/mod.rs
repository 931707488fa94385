//! Submission extraction
//!
//! Turns scraped page content into [`Submission`] records. A page is a JSON
//! document holding a list of exercise blocks:
//!
//! ```json
//! { "blocks": [
//!     { "student_id": "alu01",
//!       "source": "public class Main { ... }",
//!       "test_cases": [ { "inputs": [3, 4], "outputs": ["7"] } ] }
//! ] }
//! ```
//!
//! Each block is extracted on its own: a malformed block yields an
//! [`ExtractionError`] in its slot and the remaining blocks are still
//! extracted.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analysis::AbstractionRules;
use crate::config::JudgeConfig;
use crate::model::{Submission, TestCase};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("page {page}: invalid JSON: {source}")]
    Json {
        page: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("page {0}: expected an array of blocks or an object with a 'blocks' array")]
    Layout(String),

    #[error("page {0} is not in the page table")]
    UnknownPage(String),

    #[error("page {page}, block {index}: malformed block: {message}")]
    Malformed {
        page: String,
        index: usize,
        message: String,
    },

    #[error("page {page}, block {index}: missing '{field}'")]
    MissingField {
        page: String,
        index: usize,
        field: &'static str,
    },

    #[error("page {page}, block {index}: invalid '{field}': {message}")]
    InvalidField {
        page: String,
        index: usize,
        field: &'static str,
        message: String,
    },

    #[error("page {page}, block {index}: no test cases")]
    NoTestCases { page: String, index: usize },

    #[error("page {page}, block {index}: duplicate test case name '{name}'")]
    DuplicateTest {
        page: String,
        index: usize,
        name: String,
    },
}

#[derive(Debug, Error)]
pub enum PageTableError {
    #[error("failed to read page table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid page table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Page identifier to exercise display name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PageTable(BTreeMap<String, String>);

impl PageTable {
    pub fn load(path: &Path) -> Result<Self, PageTableError> {
        let text = std::fs::read_to_string(path).map_err(|source| PageTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, PageTableError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self, page_id: &str) -> Option<&str> {
        self.0.get(page_id).map(String::as_str)
    }

    /// Page ids in sorted order
    pub fn page_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for PageTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Scraped content of one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub page_id: String,
    pub body: Value,
}

impl PageContent {
    pub fn from_json(page_id: impl Into<String>, text: &str) -> Result<Self, ExtractionError> {
        let page_id = page_id.into();
        match serde_json::from_str(text) {
            Ok(body) => Ok(Self { page_id, body }),
            Err(source) => Err(ExtractionError::Json {
                page: page_id,
                source,
            }),
        }
    }
}

/// Test case time limits applied during extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    pub default_time_limit: Duration,
    pub max_time_limit: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            default_time_limit: Duration::from_secs(2),
            max_time_limit: Duration::from_secs(10),
        }
    }
}

impl From<&JudgeConfig> for ExtractOptions {
    fn from(judge: &JudgeConfig) -> Self {
        Self {
            default_time_limit: judge.default_time_limit(),
            max_time_limit: judge.max_time_limit(),
        }
    }
}

#[derive(Deserialize)]
struct RawBlock {
    student_id: Option<String>,
    exercise_id: Option<String>,
    source: Option<String>,
    submitted_at: Option<String>,
    test_cases: Option<Vec<RawTestCase>>,
    abstraction: Option<AbstractionRules>,
}

#[derive(Deserialize)]
struct RawTestCase {
    name: Option<String>,
    input: Option<String>,
    inputs: Option<Vec<Value>>,
    expected_output: Option<String>,
    outputs: Option<Vec<Value>>,
    time_limit_ms: Option<u64>,
}

/// Extract every block of `page`.
///
/// The result holds one entry per block, in page order. A page-level problem
/// (unknown page, unparseable layout) is a single error entry.
pub fn extract(
    page: &PageContent,
    table: &PageTable,
    options: &ExtractOptions,
) -> Vec<Result<Submission, ExtractionError>> {
    let Some(exercise_name) = table.name(&page.page_id) else {
        return vec![Err(ExtractionError::UnknownPage(page.page_id.clone()))];
    };

    let blocks = match &page.body {
        Value::Array(blocks) => blocks,
        Value::Object(map) => match map.get("blocks") {
            Some(Value::Array(blocks)) => blocks,
            _ => return vec![Err(ExtractionError::Layout(page.page_id.clone()))],
        },
        _ => return vec![Err(ExtractionError::Layout(page.page_id.clone()))],
    };

    let results: Vec<_> = blocks
        .iter()
        .enumerate()
        .map(|(index, block)| {
            let ctx = BlockContext {
                page: &page.page_id,
                index,
                exercise_name,
                options,
            };
            ctx.extract(block)
        })
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(page = %page.page_id, failed, total = results.len(), "skipping malformed blocks");
    }
    debug!(page = %page.page_id, blocks = results.len(), "page extracted");
    results
}

struct BlockContext<'a> {
    page: &'a str,
    index: usize,
    exercise_name: &'a str,
    options: &'a ExtractOptions,
}

impl BlockContext<'_> {
    fn extract(&self, block: &Value) -> Result<Submission, ExtractionError> {
        let raw: RawBlock =
            serde_json::from_value(block.clone()).map_err(|e| ExtractionError::Malformed {
                page: self.page.to_owned(),
                index: self.index,
                message: e.to_string(),
            })?;

        let student_id = non_blank(raw.student_id).ok_or_else(|| self.missing("student_id"))?;
        let source_code = raw
            .source
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.missing("source"))?;
        let exercise_id = non_blank(raw.exercise_id).unwrap_or_else(|| self.page.to_owned());

        let received_at = match raw.submitted_at {
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| self.invalid("submitted_at", e.to_string()))?,
            None => Utc::now(),
        };

        let raw_cases = raw.test_cases.unwrap_or_default();
        if raw_cases.is_empty() {
            return Err(ExtractionError::NoTestCases {
                page: self.page.to_owned(),
                index: self.index,
            });
        }
        let mut names = HashSet::new();
        let mut test_cases = Vec::with_capacity(raw_cases.len());
        for (n, raw_case) in raw_cases.into_iter().enumerate() {
            let case = self.test_case(n + 1, raw_case)?;
            if !names.insert(case.name.clone()) {
                return Err(ExtractionError::DuplicateTest {
                    page: self.page.to_owned(),
                    index: self.index,
                    name: case.name,
                });
            }
            test_cases.push(case);
        }

        if let Some(rules) = &raw.abstraction {
            rules
                .validate()
                .map_err(|e| self.invalid("abstraction", e.to_string()))?;
        }

        Ok(Submission {
            exercise_id,
            exercise_name: self.exercise_name.to_owned(),
            student_id,
            source_code,
            test_cases,
            received_at,
            abstraction: raw.abstraction,
        })
    }

    fn test_case(&self, position: usize, raw: RawTestCase) -> Result<TestCase, ExtractionError> {
        let name = non_blank(raw.name).unwrap_or_else(|| format!("test-{position}"));

        let input = match (raw.input, raw.inputs) {
            (Some(_), Some(_)) => {
                return Err(self.invalid("input", format!("{name}: both 'input' and 'inputs' given")));
            }
            (Some(input), None) => input,
            (None, Some(items)) => items.iter().map(|v| format!("{}\n", stringify(v))).collect(),
            (None, None) => String::new(),
        };

        let expected_output = match (raw.expected_output, raw.outputs) {
            (Some(_), Some(_)) => {
                return Err(self.invalid(
                    "expected_output",
                    format!("{name}: both 'expected_output' and 'outputs' given"),
                ));
            }
            (Some(expected), None) => expected,
            (None, Some(items)) => items.iter().map(stringify).collect::<Vec<_>>().join("\n"),
            (None, None) => return Err(self.missing("expected_output")),
        };

        let time_limit = match raw.time_limit_ms {
            Some(0) => {
                return Err(self.invalid("time_limit_ms", format!("{name}: must be positive")));
            }
            Some(ms) => Duration::from_millis(ms),
            None => self.options.default_time_limit,
        };
        if time_limit > self.options.max_time_limit {
            debug!(
                test = %name,
                requested_ms = time_limit.as_millis() as u64,
                "clamping time limit"
            );
        }

        Ok(TestCase {
            name,
            input,
            expected_output,
            time_limit: time_limit.min(self.options.max_time_limit),
        })
    }

    fn missing(&self, field: &'static str) -> ExtractionError {
        ExtractionError::MissingField {
            page: self.page.to_owned(),
            index: self.index,
            field,
        }
    }

    fn invalid(&self, field: &'static str, message: String) -> ExtractionError {
        ExtractionError::InvalidField {
            page: self.page.to_owned(),
            index: self.index,
            field,
            message,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// Strings verbatim, everything else as its JSON text
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
