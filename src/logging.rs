/*!
 * Logging and tracing initialization
 *
 * Two destinations, matching spec.md §6's on-disk layout: a compact
 * console stream for interactive use, and a JSON session log under the
 * run's log root for later inspection. This is the operational log — the
 * structured per-chunk audit trail lives in `event_sink.rs`.
 */

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{OrbitError, Result};

/// The on-disk layout for one run, exactly as spec.md §6 describes: a dated
/// directory holding the operational session log, the structured audit
/// JSONL stream, and a `Jobs/` subdirectory for per-chunk copier logs.
#[derive(Debug, Clone)]
pub struct RunLogPaths {
    pub dated_dir: PathBuf,
    pub session_log: PathBuf,
    pub audit_log: PathBuf,
    pub jobs_dir: PathBuf,
}

/// Compute this run's on-disk layout under `log_root`:
/// `<log_root>/<YYYY-MM-DD>/Session_<HHMMSS>_<ms>.log`,
/// `<log_root>/<YYYY-MM-DD>/Audit_<HHMMSS>_<ms>.jsonl`,
/// `<log_root>/<YYYY-MM-DD>/Jobs/`.
/// Computed once per run so the session and audit stamps always agree.
pub fn run_log_paths(log_root: &Path) -> RunLogPaths {
    let now = Utc::now();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H%M%S").to_string();
    let millis = now.timestamp_subsec_millis();

    let dated_dir = log_root.join(date);
    let session_log = dated_dir.join(format!("Session_{}_{}.log", time, millis));
    let audit_log = dated_dir.join(format!("Audit_{}_{}.jsonl", time, millis));
    let jobs_dir = dated_dir.join("Jobs");

    RunLogPaths {
        dated_dir,
        session_log,
        audit_log,
        jobs_dir,
    }
}

/// Per-chunk copier log path: `<jobs_dir>/Chunk_<NNN>.log`, id zero-padded
/// to 3 digits (spec.md §6).
pub fn chunk_log_path(jobs_dir: &Path, chunk_id: u64) -> PathBuf {
    jobs_dir.join(format!("Chunk_{:03}.log", chunk_id))
}

/// Initialize structured logging for a run. `verbose` forces `DEBUG`
/// regardless of `RUST_LOG`. When `headless` is true, skip the console
/// layer entirely (the file layer is the only output) since there's no
/// interactive terminal to write to. `session_log_path` is the file this
/// run's operational log is written to (see `run_log_paths`).
pub fn init_logging(session_log_path: &Path, verbose: bool, headless: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("orbit_relay={}", level)))
        .map_err(|e| OrbitError::Config(format!("failed to build log filter: {}", e)))?;

    if let Some(parent) = session_log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(session_log_path)?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if headless {
        registry.init();
    } else {
        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_span_events(FmtSpan::NONE)
            .compact();
        registry.with(console_layer).init();
    }

    Ok(())
}

/// Test-only subscriber: writes to the test harness's captured output,
/// initialized at most once per process.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orbit_relay=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
