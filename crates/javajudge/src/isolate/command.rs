//! Argument builder for the isolate CLI
//!
//! See <https://www.ucw.cz/isolate/isolate.1.html> for the flag reference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{MountConfig, ResourceLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateAction {
    Init,
    Run,
    Cleanup,
}

/// Builder for one isolate invocation
#[derive(Debug)]
pub struct IsolateCommand {
    isolate_path: PathBuf,
    action: IsolateAction,
    box_id: u32,
    cgroup: bool,
    limits: Option<ResourceLimits>,
    mounts: Vec<MountConfig>,
    // Sorted so the argument list is deterministic
    env: BTreeMap<String, String>,
    meta_file: Option<PathBuf>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    working_dir: Option<String>,
    program: Vec<String>,
}

impl IsolateCommand {
    fn with_action(isolate_path: impl Into<PathBuf>, box_id: u32, action: IsolateAction) -> Self {
        Self {
            isolate_path: isolate_path.into(),
            action,
            box_id,
            cgroup: false,
            limits: None,
            mounts: Vec::new(),
            env: BTreeMap::new(),
            meta_file: None,
            stdin: None,
            stdout: None,
            stderr: None,
            working_dir: None,
            program: Vec::new(),
        }
    }

    /// `isolate --init`
    pub fn init(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self::with_action(isolate_path, box_id, IsolateAction::Init)
    }

    /// `isolate --cleanup`
    pub fn cleanup(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self::with_action(isolate_path, box_id, IsolateAction::Cleanup)
    }

    /// `isolate --run -- <program...>`
    pub fn run(
        isolate_path: impl Into<PathBuf>,
        box_id: u32,
        program: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut cmd = Self::with_action(isolate_path, box_id, IsolateAction::Run);
        cmd.program = program.into_iter().map(Into::into).collect();
        cmd
    }

    pub fn cgroup(mut self, enable: bool) -> Self {
        self.cgroup = enable;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn mounts<'a>(mut self, mounts: impl IntoIterator<Item = &'a MountConfig>) -> Self {
        self.mounts.extend(mounts.into_iter().cloned());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Host path isolate writes the meta file to
    pub fn meta_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_file = Some(path.into());
        self
    }

    /// Redirect stdin, stdout and stderr to files opened inside the sandbox
    pub fn stdio(
        mut self,
        stdin: impl Into<PathBuf>,
        stdout: impl Into<PathBuf>,
        stderr: impl Into<PathBuf>,
    ) -> Self {
        self.stdin = Some(stdin.into());
        self.stdout = Some(stdout.into());
        self.stderr = Some(stderr.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    /// Produce the full argument vector, program first
    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            self.isolate_path.to_string_lossy().into_owned(),
            format!("--box-id={}", self.box_id),
        ];
        if self.cgroup {
            args.push("--cg".to_owned());
        }

        match self.action {
            IsolateAction::Init => args.push("--init".to_owned()),
            IsolateAction::Cleanup => args.push("--cleanup".to_owned()),
            IsolateAction::Run => {
                args.push("--run".to_owned());
                if let Some(limits) = &self.limits {
                    push_limits(&mut args, limits, self.cgroup);
                }
                push_mounts(&mut args, &self.mounts);
                for (key, value) in &self.env {
                    args.push(format!("--env={key}={value}"));
                }
                let files = [
                    ("--meta", &self.meta_file),
                    ("--stdin", &self.stdin),
                    ("--stdout", &self.stdout),
                    ("--stderr", &self.stderr),
                ];
                for (flag, path) in files {
                    if let Some(path) = path {
                        args.push(format!("{flag}={}", path.display()));
                    }
                }
                if let Some(dir) = &self.working_dir {
                    args.push(format!("--chdir={dir}"));
                }
                args.push("--".to_owned());
                args.extend(self.program);
            }
        }

        args
    }
}

fn push_limits(args: &mut Vec<String>, limits: &ResourceLimits, cgroup: bool) {
    if let Some(time) = limits.time_limit {
        args.push(format!("--time={time}"));
    }
    if let Some(wall) = limits.wall_time_limit {
        args.push(format!("--wall-time={wall}"));
    }
    if let Some(extra) = limits.extra_time {
        args.push(format!("--extra-time={extra}"));
    }
    if let Some(memory) = limits.memory_limit {
        // RLIMIT_AS is useless for the JVM, which reserves far more address
        // space than it uses; the cgroup limit counts resident memory.
        let flag = if cgroup { "--cg-mem" } else { "--mem" };
        args.push(format!("{flag}={memory}"));
    }
    if let Some(stack) = limits.stack_limit {
        args.push(format!("--stack={stack}"));
    }
    if let Some(procs) = limits.max_processes {
        args.push(format!("--processes={procs}"));
    }
    if let Some(fsize) = limits.max_output {
        args.push(format!("--fsize={fsize}"));
    }
    if let Some(files) = limits.max_open_files {
        args.push(format!("--open-files={files}"));
    }
}

fn push_mounts(args: &mut Vec<String>, mounts: &[MountConfig]) {
    for mount in mounts {
        if mount.optional && !Path::new(&mount.source).exists() {
            continue;
        }
        let mut opts = String::new();
        if mount.writable {
            opts.push_str(":rw");
        }
        if mount.optional {
            opts.push_str(":maybe");
        }
        args.push(format!("--dir={}={}{}", mount.target, mount.source, opts));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn java_run() -> IsolateCommand {
        IsolateCommand::run(
            "isolate",
            3,
            ["/usr/bin/java", "-cp", "classes", "Main"],
        )
    }

    fn has(args: &[String], flag: &str) -> bool {
        args.iter().any(|a| a == flag)
    }

    #[test]
    fn init_and_cleanup_are_minimal() {
        assert_eq!(
            IsolateCommand::init("isolate", 0).build(),
            vec!["isolate", "--box-id=0", "--init"]
        );
        assert_eq!(
            IsolateCommand::cleanup("isolate", 5).cgroup(true).build(),
            vec!["isolate", "--box-id=5", "--cg", "--cleanup"]
        );
    }

    #[test]
    fn program_follows_separator() {
        let args = java_run().build();
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(&args[sep + 1..], ["/usr/bin/java", "-cp", "classes", "Main"]);
    }

    #[test]
    fn limits_without_cgroup_use_address_space() {
        let limits = ResourceLimits::none()
            .with_time_limit(2.0)
            .with_wall_time_limit(2.0)
            .with_memory_limit(262144);
        let args = java_run().limits(limits).build();
        assert!(has(&args, "--time=2"));
        assert!(has(&args, "--wall-time=2"));
        assert!(has(&args, "--mem=262144"));
        assert!(!has(&args, "--cg"));
    }

    #[test]
    fn limits_with_cgroup_use_cg_mem() {
        let args = java_run()
            .cgroup(true)
            .limits(ResourceLimits::default())
            .build();
        assert!(has(&args, "--cg"));
        assert!(has(&args, "--cg-mem=524288"));
        assert!(has(&args, "--processes=64"));
        assert!(has(&args, "--stack=65536"));
        assert!(has(&args, "--fsize=16384"));
        assert!(has(&args, "--open-files=128"));
        assert!(has(&args, "--extra-time=0.5"));
    }

    #[test]
    fn no_limits_no_flags() {
        let args = java_run().limits(ResourceLimits::none()).build();
        for prefix in ["--time=", "--wall-time=", "--mem=", "--processes=", "--fsize="] {
            assert!(!args.iter().any(|a| a.starts_with(prefix)), "{prefix}");
        }
    }

    #[test]
    fn mounts_render_options() {
        let mounts = [
            MountConfig {
                source: "/usr/lib/jvm".to_owned(),
                target: "/usr/lib/jvm".to_owned(),
                writable: false,
                optional: false,
            },
            MountConfig {
                source: "/tmp".to_owned(),
                target: "/scratch".to_owned(),
                writable: true,
                optional: false,
            },
            MountConfig {
                source: "/definitely/not/here".to_owned(),
                target: "/x".to_owned(),
                writable: false,
                optional: true,
            },
        ];
        let args = java_run().mounts(&mounts).build();
        assert!(has(&args, "--dir=/usr/lib/jvm=/usr/lib/jvm"));
        assert!(has(&args, "--dir=/scratch=/tmp:rw"));
        assert!(!args.iter().any(|a| a.starts_with("--dir=/x=")));
    }

    #[test]
    fn env_is_sorted() {
        let args = java_run()
            .env("PATH", "/usr/bin:/bin")
            .env("LANG", "C.UTF-8")
            .build();
        let lang = args.iter().position(|a| a == "--env=LANG=C.UTF-8").unwrap();
        let path = args.iter().position(|a| a == "--env=PATH=/usr/bin:/bin").unwrap();
        assert!(lang < path);
    }

    #[test]
    fn io_meta_and_chdir() {
        let args = java_run()
            .meta_file("/tmp/javajudge-meta-x/meta.txt")
            .stdio("/box/stdin.txt", "/box/stdout.txt", "/box/stderr.txt")
            .working_dir("/box")
            .build();
        assert!(has(&args, "--meta=/tmp/javajudge-meta-x/meta.txt"));
        assert!(has(&args, "--stdin=/box/stdin.txt"));
        assert!(has(&args, "--stdout=/box/stdout.txt"));
        assert!(has(&args, "--stderr=/box/stderr.txt"));
        assert!(has(&args, "--chdir=/box"));
    }

    #[test]
    fn init_ignores_run_options() {
        let mut cmd = IsolateCommand::init("isolate", 0)
            .env("PATH", "/usr/bin")
            .working_dir("/box")
            .limits(ResourceLimits::default());
        cmd.program = vec!["java".to_owned()];
        assert_eq!(cmd.build(), vec!["isolate", "--box-id=0", "--init"]);
    }

    #[test]
    fn accessors() {
        let cmd = IsolateCommand::init("/usr/local/bin/isolate", 42);
        assert_eq!(cmd.box_id(), 42);
        assert_eq!(cmd.isolate_path(), Path::new("/usr/local/bin/isolate"));
    }
}
