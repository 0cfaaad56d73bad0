/*!
 * orbit-relay - parallel directory replication orchestrator
 *
 * Wraps an external Robocopy-compatible copier binary and drives it across
 * a bounded pool of subprocesses, partitioning very large directory trees
 * into independently retryable chunks so a single pathological subtree
 * can't stall an entire mirror.
 *
 * The orchestrator never touches file bytes itself — that's the external
 * copier's job. This crate owns profiling, chunking, subprocess lifecycle,
 * exit-code interpretation, snapshot coordination, and the audit trail a
 * run leaves behind.
 */

pub mod chunker;
pub mod config;
pub mod copier;
pub mod error;
pub mod event_sink;
pub mod exit_code;
pub mod logging;
pub mod orchestrator;
pub mod profiler;
pub mod snapshot;
pub mod units;

pub use config::{CopierOptions, MismatchPolicy, Profile, RunConfig, ScanMode};
pub use error::{ErrorCategory, OrbitError, Result};
pub use orchestrator::{Orchestrator, Phase, ProfileResult, ProgressSnapshot, Run, RunSummary};

/// Library version, exposed so the CLI binary and logs can report it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
