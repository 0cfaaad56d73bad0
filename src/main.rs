//! orbit-relay CLI - drives one or more replication profiles from a config
//! file, printing progress and leaving a structured audit trail behind.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use console::style;
use orbit_relay::config::{load_run_config, RunConfig};
use orbit_relay::event_sink::{EventSink, FileEventSink};
use orbit_relay::orchestrator::{Orchestrator, Run, RunSummary};
use orbit_relay::snapshot::{NullSnapshotManager, SnapshotManager, VssSnapshotManager};

#[derive(Parser, Debug)]
#[command(name = "orbit-relay", author, version, about = "Parallel directory replication orchestrator", long_about = None)]
struct Cli {
    /// Path to the run configuration (TOML).
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// Only run the named profile instead of every profile in the config.
    #[arg(short, long)]
    profile: Option<String>,

    /// Skip the interactive profile picker and console progress bars.
    #[arg(long)]
    headless: bool,

    /// Force DEBUG-level logging regardless of RUST_LOG.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> orbit_relay::Result<()> {
    let config = load_run_config(&cli.config)?;

    let run_paths = orbit_relay::logging::run_log_paths(&config.log_root);
    orbit_relay::logging::init_logging(&run_paths.session_log, cli.verbose, cli.headless)?;
    tracing::info!(
        version = orbit_relay::VERSION,
        log_path = %run_paths.session_log.display(),
        "orbit-relay starting"
    );

    let profiles = select_profiles(&config, cli.profile.as_deref(), cli.headless)?;

    let event_sink: Box<dyn EventSink> = Box::new(FileEventSink::new(&run_paths.audit_log)?);

    let snapshot_manager: Box<dyn SnapshotManager> = if cfg!(target_os = "windows") {
        Box::new(VssSnapshotManager::new())
    } else {
        Box::new(NullSnapshotManager)
    };

    let orchestrator = Orchestrator::new(
        profiles
            .first()
            .map(|p| p.copier_binary.clone())
            .unwrap_or_else(|| "robocopy".to_string()),
        snapshot_manager,
        event_sink,
        config.max_concurrent_jobs,
        config.threads_per_job,
        run_paths.jobs_dir.clone(),
    );

    let mut run = Run::new(orchestrator, profiles);

    let summary = if cli.headless {
        drive_headless(&mut run)?
    } else {
        drive_with_progress(&mut run)?
    };

    report_summary(&summary);
    std::process::exit(summary.process_exit_code());
}

/// Resolve which profiles this invocation should run: a single named one,
/// every configured profile, or — in the interactive shell — whatever the
/// user picks from a `dialoguer` multi-select (spec.md §6 process
/// boundary: "run all enabled profiles, run a single named profile").
fn select_profiles(
    config: &RunConfig,
    requested: Option<&str>,
    headless: bool,
) -> orbit_relay::Result<Vec<orbit_relay::config::Profile>> {
    if let Some(name) = requested {
        let profile = config.find_profile(name).ok_or_else(|| {
            orbit_relay::OrbitError::Config(format!("no such profile: {}", name))
        })?;
        return Ok(vec![profile.clone()]);
    }

    if headless || config.profiles.len() == 1 {
        return Ok(config.profiles.clone());
    }

    let labels: Vec<&str> = config.profiles.iter().map(|p| p.name.as_str()).collect();
    let selected = dialoguer::MultiSelect::new()
        .with_prompt("Select profiles to run")
        .items(&labels)
        .defaults(&vec![true; labels.len()])
        .interact()
        .map_err(|e| orbit_relay::OrbitError::Other(format!("profile picker failed: {}", e)))?;

    if selected.is_empty() {
        return Err(orbit_relay::OrbitError::Other(
            "no profiles selected".to_string(),
        ));
    }

    Ok(selected
        .into_iter()
        .map(|i| config.profiles[i].clone())
        .collect())
}

/// Drive a run to completion with no console output beyond tracing —
/// the shape a scheduled task (spec.md §6) invokes.
fn drive_headless(run: &mut Run) -> orbit_relay::Result<RunSummary> {
    loop {
        if let Some(summary) = run.tick()? {
            return Ok(summary);
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

/// Drive a run with an `indicatif` progress bar tracking estimated bytes
/// complete against the current profile's total.
fn drive_with_progress(run: &mut Run) -> orbit_relay::Result<RunSummary> {
    let bar = indicatif::ProgressBar::new(0);
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let mut last_profile: Option<String> = None;

    let summary = loop {
        if let Some(summary) = run.tick()? {
            break summary;
        }

        let progress = run.progress();
        if progress.total_bytes_estimated > 0 {
            bar.set_length(progress.total_bytes_estimated as u64);
            bar.set_position(progress.bytes_complete_estimated.max(0) as u64);
        }

        if let Some(name) = run.current_profile_name() {
            if last_profile.as_deref() != Some(name.as_str()) {
                bar.set_message(name.clone());
                last_profile = Some(name);
            }
        }

        std::thread::sleep(Duration::from_millis(150));
    };

    bar.finish_and_clear();
    Ok(summary)
}

fn report_summary(summary: &RunSummary) {
    println!("run {}", summary.run_id);
    for result in &summary.profile_results {
        let status = if result.any_failed() {
            style("FAILED").red().bold()
        } else if result.stopped {
            style("STOPPED").yellow().bold()
        } else {
            style("OK").green().bold()
        };
        println!(
            "  {} {} — {} completed, {} failed",
            status,
            result.profile_name,
            result.completed_chunks.len(),
            result.failed_chunks.len()
        );
    }
}
