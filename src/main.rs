use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use stream_bus::{SignalBridge, Supervisor, SupervisorOptions};

mod cli;
mod config;

/// `-v` sets the base level; module directives from `env` still refine it.
fn log_builder(verbosity: u8, env: env_logger::Env<'_>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env);
    builder.filter_level(cli::level_filter(verbosity));
    builder
}

fn init_logging(verbosity: u8) {
    log_builder(verbosity, env_logger::Env::default()).init();
}

/// Detach from the terminal. Must happen before the tokio runtime exists.
#[cfg(unix)]
fn daemonize() -> anyhow::Result<()> {
    use daemonize::Daemonize;

    Daemonize::new()
        .working_directory(std::env::current_dir()?)
        .start()
        .context("Daemonization failed")?;
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> anyhow::Result<()> {
    anyhow::bail!("Daemon mode is only available on unix")
}

/// How long blocking-pool work (stdin reads, stdout writes) may linger once
/// the supervisor has returned.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Run `job` to completion, then shut the runtime down without waiting on
/// blocking reads that cancellation cannot reach.
fn block_on_and_release<F: Future>(runtime: tokio::runtime::Runtime, job: F) -> F::Output {
    let output = runtime.block_on(job);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    output
}

fn run(args: cli::Args) -> anyhow::Result<i32> {
    if args.verbosity() >= cli::DEBUG {
        log::debug!("{}", args);
    }

    let specs = config::load(&args.config)?;
    if args.verbosity() >= cli::DEBUG {
        for (index, spec) in specs.iter().enumerate() {
            log::debug!("Config entry {}:\n{}", index, spec);
        }
    }
    let stream = config::build(specs).context("Config check failed")?;

    if args.daemonize {
        daemonize()?;
    }

    let options = SupervisorOptions::default().with_probe(args.test_only);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let report = block_on_and_release(runtime, async move {
        let bridge = SignalBridge::install().context("Error when setting signal handler")?;
        let report = Supervisor::new(stream, options).run(&bridge).await;
        drop(bridge);
        anyhow::Ok(report)
    })?;

    if args.test_only {
        log::info!(
            "Reachability test {}",
            if report.is_success() { "passed" } else { "failed" }
        );
    }
    Ok(report.exit_code())
}

fn main() -> ! {
    let args = cli::Args::parse();
    init_logging(args.verbosity());

    let code = run(args).unwrap_or_else(|e| {
        log::error!("{:#}", e);
        1
    });
    std::process::exit(code);
}
