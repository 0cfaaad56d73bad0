/*!
 * Copier Driver (spec.md §4.C)
 *
 * Owns the one place in the crate that knows the external copier's argument
 * vector and log format. Builds the command line for a chunk, spawns it,
 * waits on it with a timeout, and turns its exit status plus log tail into a
 * `ChunkOutcome`. Never touches file bytes itself.
 */

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::chunker::Chunk;
use crate::config::{CopierOptions, Profile};
use crate::error::{OrbitError, Result};
use crate::exit_code::{interpret, ExitCodeResult};
use crate::units::parse_size_token;

/// Switches the driver owns outright; any matching entry in
/// `CopierOptions::extra_switches` is dropped rather than passed through
/// twice, per spec.md §4.C.
const RESERVED_PREFIXES: &[&str] = &[
    "/MIR", "/E", "/MT", "/R:", "/W:", "/LOG:", "/TEE", "/NP", "/BYTES", "/XJD", "/XJF", "/XF",
    "/XD", "/L", "/NJH", "/NJS", "/IPG:",
];

fn is_reserved(switch: &str) -> bool {
    let upper = switch.to_ascii_uppercase();
    RESERVED_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
}

/// Build the argument vector for one chunk's copier invocation. Order is
/// fixed: source, dest, copy-mode, threading, retry/wait, logging, junction
/// skip, excludes, user extras (reserved ones filtered), files-only limiter.
pub fn build_args(
    chunk: &Chunk,
    copier: &CopierOptions,
    threads_per_job: u32,
    log_path: &Path,
) -> Vec<String> {
    let mut args = Vec::new();

    args.push(chunk.source_path.to_string_lossy().to_string());
    args.push(chunk.dest_path.to_string_lossy().to_string());

    args.push(if copier.no_mirror { "/E".to_string() } else { "/MIR".to_string() });

    for switch in &copier.extra_switches {
        if is_reserved(switch) {
            tracing::warn!(switch = %switch, "copier driver: dropping user switch that collides with an orchestrator-owned switch");
            continue;
        }
        args.push(switch.clone());
    }

    args.push(format!("/MT:{}", threads_per_job.max(1)));
    args.push(format!("/R:{}", copier.retry_count));
    args.push(format!("/W:{}", copier.retry_wait_secs));
    args.push(format!("/LOG:{}", log_path.display()));
    args.push("/TEE".to_string());
    args.push("/NP".to_string());
    args.push("/BYTES".to_string());

    if copier.skip_reparse_points {
        args.push("/XJD".to_string());
        args.push("/XJF".to_string());
    }

    if !copier.exclude_file_patterns.is_empty() {
        args.push("/XF".to_string());
        args.extend(copier.exclude_file_patterns.iter().cloned());
    }
    if !copier.exclude_dir_patterns.is_empty() {
        args.push("/XD".to_string());
        args.extend(copier.exclude_dir_patterns.iter().cloned());
    }

    if copier.inter_packet_gap_ms > 0 {
        // Robocopy's /IPG is expressed in milliseconds per 64KB packet.
        args.push(format!("/IPG:{}", copier.inter_packet_gap_ms));
    }

    args.extend(chunk.extra_args.iter().cloned());

    args
}

/// A running or finished copier invocation for one chunk.
pub struct Job {
    pub chunk_id: u64,
    pub log_path: PathBuf,
    started_at: Instant,
    child: Child,
}

/// Spawn the copier for `chunk`. `log_path` is where the copier is told to
/// write its own log (`/LOG:`), distinct from the crate's own event sink.
pub fn start_job(
    chunk: &Chunk,
    profile: &Profile,
    threads_per_job: u32,
    log_path: PathBuf,
) -> Result<Job> {
    let args = build_args(chunk, &profile.copier, threads_per_job, &log_path);

    let child = Command::new(&profile.copier_binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| OrbitError::CopierSpawnFailed(format!("{}: {}", profile.copier_binary, e)))?;

    Ok(Job {
        chunk_id: chunk.id,
        log_path,
        started_at: Instant::now(),
        child,
    })
}

pub enum JobPoll {
    Running,
    Finished(i32),
    TimedOut,
}

/// Kill a still-running job immediately. Used by the Orchestrator's stop
/// sequence (spec.md §5 "Cancellation kills every active subprocess
/// immediately, best effort"); idempotent against a job that has already
/// exited.
pub fn kill_job(job: &mut Job) {
    job.child.kill().ok();
    job.child.wait().ok();
}

/// Non-blocking poll of a running job. Kills and reports `TimedOut` once
/// `timeout` has elapsed since spawn.
pub fn poll_job(job: &mut Job, timeout: Duration) -> Result<JobPoll> {
    match job.child.try_wait()? {
        Some(status) => Ok(JobPoll::Finished(status.code().unwrap_or(16))),
        None => {
            if job.started_at.elapsed() >= timeout {
                job.child.kill().ok();
                job.child.wait().ok();
                Ok(JobPoll::TimedOut)
            } else {
                Ok(JobPoll::Running)
            }
        }
    }
}

/// Summary totals pulled from the copier's own log tail (spec.md §4.C).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSummary {
    pub dirs_copied: Option<u64>,
    pub files_copied: Option<u64>,
    pub bytes_copied: Option<i64>,
    pub failed_count: Option<u64>,
}

/// Parse the copier's summary block. Tolerant of extra whitespace and
/// missing lines — this is a best-effort progress surface, not a contract
/// (spec.md §9), so a line that doesn't match the expected
/// `Label: total copied skipped mismatch failed extras` column shape is
/// skipped rather than erroring. Column order is fixed: total, copied,
/// skipped, mismatch, failed, extras — the `*_copied` fields below read the
/// "Copied" column (index 1), not "Total" (index 0).
pub fn parse_log(text: &str) -> LogSummary {
    let mut summary = LogSummary::default();

    for line in text.lines() {
        let trimmed = line.trim();
        let Some((label, rest)) = trimmed.split_once(':') else {
            continue;
        };
        let columns: Vec<&str> = rest.split_whitespace().collect();
        if columns.len() < 2 {
            continue;
        }

        match label.trim().to_ascii_lowercase().as_str() {
            "dirs" => {
                if let Some(n) = parse_size_token(columns[1]) {
                    summary.dirs_copied = Some(n.max(0) as u64);
                }
            }
            "files" => {
                if let Some(n) = parse_size_token(columns[1]) {
                    summary.files_copied = Some(n.max(0) as u64);
                }
                if columns.len() >= 5 {
                    if let Some(n) = parse_size_token(columns[4]) {
                        summary.failed_count = Some(n.max(0) as u64);
                    }
                }
            }
            "bytes" => {
                if let Some(n) = parse_size_token(columns[1]) {
                    summary.bytes_copied = Some(n);
                }
            }
            _ => {}
        }
    }

    summary
}

/// Combine a finished job's exit code, mismatch policy, and log tail into
/// the outcome the Orchestrator records against its chunk.
pub struct ChunkOutcome {
    pub chunk_id: u64,
    pub exit: ExitCodeResult,
    pub summary: LogSummary,
}

pub fn complete_job(job: &Job, exit_code: i32, policy: crate::config::MismatchPolicy) -> ChunkOutcome {
    let log_text = std::fs::read_to_string(&job.log_path).unwrap_or_default();
    ChunkOutcome {
        chunk_id: job.chunk_id,
        exit: interpret(exit_code, policy),
        summary: parse_log(&log_text),
    }
}
