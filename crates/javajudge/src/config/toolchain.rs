use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{MountConfig, ResourceLimits};

/// Default PATH for sandbox execution
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/bin:/bin";

/// Directory (relative to the box root) that receives compiled classes
pub const CLASSES_DIR: &str = "classes";

/// Values substituted into command templates
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    /// `{source}`: source file name inside the box
    pub source: &'a str,
    /// `{classes}`: class output directory inside the box
    pub classes: &'a str,
    /// `{main_class}`: fully qualified class to launch
    pub main_class: &'a str,
}

/// Expand `{source}`, `{classes}` and `{main_class}` in every argument
pub fn expand_command(command: &[String], values: &Placeholders<'_>) -> Vec<String> {
    command
        .iter()
        .map(|arg| {
            arg.replace("{source}", values.source)
                .replace("{classes}", values.classes)
                .replace("{main_class}", values.main_class)
        })
        .collect()
}

/// How `javac` is invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    pub command: Vec<String>,

    /// Wall-clock budget for one compilation, in seconds
    #[serde(default = "default_compile_timeout")]
    pub timeout: f64,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for compilation (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// How the compiled unit is launched for each test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    pub command: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Extra mounts for test runs only
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// PATH environment variable for the sandbox
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides defaults). The wall time
    /// limit always comes from the test case.
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            command: ["javac", "-encoding", "UTF-8", "-d", "{classes}", "{source}"]
                .map(String::from)
                .to_vec(),
            timeout: default_compile_timeout(),
            env: HashMap::new(),
            limits: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: ["java", "-cp", "{classes}", "{main_class}"]
                .map(String::from)
                .to_vec(),
            env: HashMap::new(),
            mounts: Vec::new(),
            path: default_sandbox_path(),
            limits: None,
        }
    }
}

fn default_compile_timeout() -> f64 {
    30.0
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}
