//! Javajudge CLI
//!
//! Runs the judging daemon and a few operator commands around it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use javajudge::{
    CancelToken, Config, ControlLoop, DaemonOptions, DirectorySource, EXAMPLE_CONFIG,
    ExtractOptions, HttpIpcClient, IsolateSandbox, PageContent, PageTable, Reporter,
    RunnerOptions, StateStore, extract, judge, prepare_cgroup,
};
use serde_json::json;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "javajudge")]
#[command(about = "Sandboxed judging of student Java submissions")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll page snapshots and judge new or changed submissions
    Daemon,

    /// Judge one local Java file and print the verdict as JSON
    Judge {
        /// Java source file
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// JSON array of test cases
        #[arg(short, long, value_name = "JSON")]
        tests: PathBuf,
    },

    /// Re-send every verdict still waiting for delivery
    Resend,

    /// Initialize a new configuration file
    Init {
        /// Output path (default: javajudge.toml)
        #[arg(short, long, default_value = "javajudge.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Daemon => run_daemon(with_cgroup(config)).await,
        Commands::Judge { source, tests } => judge_file(with_cgroup(config), &source, &tests).await,
        Commands::Resend => resend(&config).await,
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Set up the cgroup hierarchy, or fall back to RLIMIT_AS when it is not
/// available
fn with_cgroup(mut config: Config) -> Config {
    if config.cgroup {
        match prepare_cgroup(&config.cg_root) {
            Ok(true) => debug!("cgroup hierarchy ready"),
            Ok(false) => {
                warn!(
                    "cgroup support unavailable (memory controller not found), falling back to RLIMIT_AS"
                );
                config.cgroup = false;
            }
            Err(e) => {
                warn!("cgroup setup failed: {e}, falling back to RLIMIT_AS memory limiting");
                config.cgroup = false;
            }
        }
    }
    config
}

/// Cancel `token` on Ctrl-C or SIGTERM
fn cancel_on_signal(token: CancelToken) -> Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
            _ = term.recv() => info!("SIGTERM received, shutting down"),
        }
        token.cancel();
    });
    Ok(())
}

fn reporter(config: &Config) -> Result<Reporter> {
    let store = StateStore::open(&config.daemon.state_file).context("failed to open state file")?;
    let secret = std::env::var(&config.ipc.secret_env).ok();
    if secret.is_none() {
        warn!(var = %config.ipc.secret_env, "IPC secret not set, sending unauthenticated");
    }
    let client = HttpIpcClient::new(&config.ipc.endpoint, secret, config.ipc.request_timeout())
        .context("failed to create IPC client")?;
    Ok(Reporter::new(
        store,
        Box::new(client),
        config.ipc.retry_policy(),
        config.judge.diagnostics_tail,
    ))
}

async fn run_daemon(config: Config) -> Result<()> {
    let table = PageTable::load(&config.daemon.page_ids).context("failed to load page table")?;
    let source = DirectorySource::new(&config.daemon.pages_dir);
    let reporter = reporter(&config)?;
    let options = DaemonOptions::from(&config);
    let sandbox = IsolateSandbox::new(config).context("failed to set up sandbox")?;

    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone())?;

    let mut control = ControlLoop::new(sandbox, source, table, reporter, options);
    control.run(&cancel).await.context("daemon failed")?;
    Ok(())
}

async fn judge_file(config: Config, source: &Path, tests: &Path) -> Result<()> {
    let source_code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;
    let tests_json = tokio::fs::read_to_string(tests)
        .await
        .context("failed to read test file")?;
    let test_cases: serde_json::Value =
        serde_json::from_str(&tests_json).context("test file is not valid JSON")?;

    let name = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "local".to_owned());
    let page = PageContent {
        page_id: name.clone(),
        body: json!([{
            "student_id": "local",
            "source": source_code,
            "test_cases": test_cases,
        }]),
    };
    let table: PageTable = [(name.clone(), name)].into_iter().collect();
    let submission = extract(&page, &table, &ExtractOptions::from(&config.judge))
        .into_iter()
        .next()
        .context("nothing to judge")?
        .context("invalid submission")?;

    let options = RunnerOptions {
        policy: config.judge.comparison,
        output_tail: config.judge.output_tail,
    };
    let sandbox = IsolateSandbox::new(config).context("failed to set up sandbox")?;
    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone())?;

    let verdict = judge(&sandbox, &submission, &options, &cancel)
        .await
        .context("judging failed")?;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn resend(config: &Config) -> Result<()> {
    let mut reporter = reporter(config)?;
    let pending = reporter.store().pending().count();
    if pending == 0 {
        println!("Nothing to re-send");
        return Ok(());
    }

    let cancel = CancelToken::new();
    cancel_on_signal(cancel.clone())?;
    let summary = reporter
        .resend_pending(&cancel)
        .await
        .context("failed to update state file")?;
    println!(
        "Delivered {} of {} pending verdicts",
        summary.delivered, pending
    );
    if summary.still_pending > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn show_config(config: &Config) {
    println!("Default resource limits:");
    println!("  Time limit: {:?}", config.default_limits.time_limit);
    println!(
        "  Wall time limit: {:?}",
        config.default_limits.wall_time_limit
    );
    println!(
        "  Memory limit: {:?} KB",
        config.default_limits.memory_limit
    );
    println!("  Stack limit: {:?} KB", config.default_limits.stack_limit);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!();
    println!("Isolate binary: {}", config.isolate_binary().display());
    println!("Boxes: {:?}", config.box_ids());
    println!();
    println!("Compile: {}", config.compile.command.join(" "));
    println!("  Timeout: {}s", config.compile.timeout);
    println!("Run: {}", config.run.command.join(" "));
    println!(
        "Test time limit: {}s default, {}s max",
        config.judge.default_time_limit, config.judge.max_time_limit
    );
    println!("Comparison: {:?}", config.judge.comparison);
    println!();
    println!("Page table: {}", config.daemon.page_ids.display());
    println!("Page snapshots: {}", config.daemon.pages_dir.display());
    println!("State file: {}", config.daemon.state_file.display());
    println!("Poll interval: {}s", config.daemon.poll_interval);
    println!("IPC endpoint: {}", config.ipc.endpoint);
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
