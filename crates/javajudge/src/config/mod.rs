use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::toolchain::{
    CLASSES_DIR, CompileConfig, DEFAULT_SANDBOX_PATH, Placeholders, RunConfig, expand_command,
};
use crate::report::RetryPolicy;
use crate::runner::ComparePolicy;
use crate::types::{MountConfig, ResourceLimits};

mod loader;
pub mod toolchain;

/// Example configuration embedded at compile time.
///
/// `javajudge init` writes this out as a starter file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../javajudge.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for javajudge
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the Isolate binary (uses PATH if not specified).
    #[serde(default)]
    pub isolate_path: Option<PathBuf>,

    /// Use cgroup memory limiting instead of RLIMIT_AS.
    ///
    /// When enabled, isolate uses `--cg` and `--cg-mem` which limit actual memory
    /// usage rather than virtual address space. The JVM needs this.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root path for isolate. Must match isolate's `cg_root` config value.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// First isolate box id the daemon may use
    #[serde(default)]
    pub first_box_id: u32,

    /// Number of box ids reserved for the daemon
    #[serde(default = "default_box_count")]
    pub box_count: u32,

    /// Directory mounts applied to every sandbox (compilation and execution)
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Base resource limits, refined by the compile and run sections
    #[serde(default)]
    pub default_limits: ResourceLimits,

    #[serde(default)]
    pub compile: CompileConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub judge: JudgeConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub ipc: IpcConfig,
}

/// Judging policy
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    /// Per-test wall-clock limit when a test case declares none, in seconds
    #[serde(default = "default_time_limit")]
    pub default_time_limit: f64,

    /// Upper bound for declared per-test limits, in seconds
    #[serde(default = "default_max_time_limit")]
    pub max_time_limit: f64,

    #[serde(default)]
    pub comparison: ComparePolicy,

    /// Characters of program output kept in a test result
    #[serde(default = "default_output_tail")]
    pub output_tail: usize,

    /// Characters of compiler diagnostics forwarded over IPC
    #[serde(default = "default_diagnostics_tail")]
    pub diagnostics_tail: usize,
}

/// Control loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// JSON object mapping page identifiers to exercise names
    #[serde(default = "default_page_ids")]
    pub page_ids: PathBuf,

    /// Directory the scraper drops `<page_id>.json` snapshots into
    #[serde(default = "default_pages_dir")]
    pub pages_dir: PathBuf,

    /// Persisted verdict store
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Pause between cycles, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    /// Consecutive fully failed cycles before giving up
    #[serde(default = "default_max_source_failures")]
    pub max_source_failures: u32,
}

/// Channel to the external control process
#[derive(Debug, Clone, Deserialize)]
pub struct IpcConfig {
    /// Base URL; verdicts are POSTed to `<endpoint>/publish`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the shared secret
    #[serde(default = "default_secret_env")]
    pub secret_env: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in seconds, doubled per attempt
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: f64,

    /// Retry delay ceiling in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff: f64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
}

impl Config {
    /// Create a config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the path to the isolate binary
    pub fn isolate_binary(&self) -> PathBuf {
        self.isolate_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("isolate"))
    }

    /// Limits for one compilation: defaults, then the compile table, then the
    /// compile timeout as wall limit.
    pub fn compile_limits(&self) -> ResourceLimits {
        let mut limits = match &self.compile.limits {
            Some(section) => self.default_limits.with_overrides(section),
            None => self.default_limits.clone(),
        };
        limits.wall_time_limit = Some(self.compile.timeout);
        limits
    }

    /// Limits for one test run with the given wall-clock limit.
    ///
    /// The wall limit decides. A JVM burns CPU on several threads at once, so
    /// the run gets no CPU limit of its own unless the run table pins one;
    /// `default_limits.time_limit` only applies to compilation.
    pub fn run_limits(&self, wall_limit: Duration) -> ResourceLimits {
        let wall = wall_limit.as_secs_f64();
        let mut limits = ResourceLimits {
            time_limit: None,
            ..self.default_limits.clone()
        };
        if let Some(section) = &self.run.limits {
            limits = limits.with_overrides(section);
        }
        limits.wall_time_limit = Some(wall);
        limits
    }

    /// Box ids reserved for the daemon
    pub fn box_ids(&self) -> std::ops::Range<u32> {
        self.first_box_id..self.first_box_id.saturating_add(self.box_count)
    }
}

impl JudgeConfig {
    pub fn default_time_limit(&self) -> Duration {
        secs(self.default_time_limit)
    }

    pub fn max_time_limit(&self) -> Duration {
        secs(self.max_time_limit)
    }
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval)
    }
}

impl IpcConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: secs(self.initial_backoff),
            max_backoff: secs(self.max_backoff),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            default_time_limit: default_time_limit(),
            max_time_limit: default_max_time_limit(),
            comparison: ComparePolicy::default(),
            output_tail: default_output_tail(),
            diagnostics_tail: default_diagnostics_tail(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            page_ids: default_page_ids(),
            pages_dir: default_pages_dir(),
            state_file: default_state_file(),
            poll_interval: default_poll_interval(),
            max_source_failures: default_max_source_failures(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            secret_env: default_secret_env(),
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Seconds to Duration; validation rejects negative and non-finite values
/// before this is reached.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/isolate")
}

fn default_box_count() -> u32 {
    1
}

fn default_time_limit() -> f64 {
    2.0
}

fn default_max_time_limit() -> f64 {
    30.0
}

fn default_output_tail() -> usize {
    600
}

fn default_diagnostics_tail() -> usize {
    1000
}

fn default_page_ids() -> PathBuf {
    PathBuf::from("page_ids.json")
}

fn default_pages_dir() -> PathBuf {
    PathBuf::from("pages")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data.json")
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_max_source_failures() -> u32 {
    10
}

fn default_endpoint() -> String {
    "http://127.0.0.1:6000".to_owned()
}

fn default_secret_env() -> String {
    "JAVAJUDGE_IPC_SECRET".to_owned()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> f64 {
    1.0
}

fn default_max_backoff() -> f64 {
    30.0
}

fn default_request_timeout() -> f64 {
    10.0
}
