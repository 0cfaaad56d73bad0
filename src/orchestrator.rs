/*!
 * Orchestrator (spec.md §4.D)
 *
 * Single-threaded cooperative driver: one `tick()` call advances the
 * current profile's run by a bounded amount of work. Parallelism comes
 * from a bounded pool of OS subprocesses the tick loop manages directly,
 * not from threads inside this crate — `OrchestrationState` is therefore
 * owned outright, not behind `Arc<Mutex<_>>`. A reentrancy guard turns a
 * concurrent `tick()` call into a panic rather than a silent data race,
 * since "single driving thread" is an invariant, not a convention.
 */

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::chunker::{partition_for_scan, Chunk, ChunkStatus};
use crate::config::{MismatchPolicy, Profile};
use crate::copier::{self, Job, JobPoll};
use crate::error::{OrbitError, Result};
use crate::event_sink::{self, Event, EventSink};
use crate::exit_code::Severity;
use crate::profiler::Profiler;
use crate::snapshot::{Snapshot, SnapshotManager};

pub const MAX_CHUNK_RETRIES: u32 = 3;
const JOB_TIMEOUT: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Replicating,
    Complete,
    Stopped,
}

struct ActiveJob {
    job: Job,
    chunk: Chunk,
}

/// Everything that changes over the course of one profile's run. Owned
/// directly by `Orchestrator` — see module docs for why this isn't
/// `Arc<Mutex<_>>`. `completed` and `failed` are kept as two separate bags
/// (spec.md §3 `OrchestrationState`: "a bag of completed chunks and a bag
/// of failed chunks"), not one list discriminated by status, so the
/// "completedChunks ∩ failedChunks = ∅" invariant (spec.md §8 property 3)
/// is structural rather than something a reader has to take on faith.
struct OrchestrationState {
    phase: Phase,
    profile: Option<Profile>,
    jobs_dir: PathBuf,
    queue: VecDeque<Chunk>,
    active: HashMap<u64, ActiveJob>,
    completed: Vec<Chunk>,
    failed: Vec<Chunk>,
    total_chunks: u64,
    total_bytes_estimated: i64,
    snapshot: Option<Snapshot>,
    stop_requested: bool,
    pause_requested: bool,
}

impl OrchestrationState {
    fn idle(jobs_dir: PathBuf) -> Self {
        Self {
            phase: Phase::Idle,
            profile: None,
            jobs_dir,
            queue: VecDeque::new(),
            active: HashMap::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            total_chunks: 0,
            total_bytes_estimated: 0,
            snapshot: None,
            stop_requested: false,
            pause_requested: false,
        }
    }
}

/// Summary of one profile's finished run, handed to the caller once
/// `tick()` drives the phase to `Complete` or `Stopped`.
#[derive(Debug, Clone)]
pub struct ProfileResult {
    pub profile_name: String,
    pub completed_chunks: Vec<Chunk>,
    pub failed_chunks: Vec<Chunk>,
    pub stopped: bool,
}

impl ProfileResult {
    pub fn any_failed(&self) -> bool {
        !self.failed_chunks.is_empty()
    }

    /// All chunks the profile touched, completed and failed alike — handy
    /// for callers that only want a combined count.
    pub fn all_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.completed_chunks.iter().chain(self.failed_chunks.iter())
    }
}

/// Point-in-time progress snapshot, recomputed every tick (spec.md §4.D
/// step 6-7: "recompute aggregate bytes-complete ... invoke onProgress").
/// Consumed by the CLI to drive its progress bar instead of a callback
/// closure — the orchestrator's own thread never blocks, so a poll-once-
/// per-tick snapshot is equivalent and keeps `tick()` a plain function.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub total_chunks: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub total_bytes_estimated: i64,
    pub bytes_complete_estimated: i64,
}

pub struct Orchestrator {
    profiler: Profiler,
    snapshot_manager: Box<dyn SnapshotManager>,
    event_sink: Box<dyn EventSink>,
    max_concurrent_jobs: usize,
    threads_per_job: u32,
    state: OrchestrationState,
    driving: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        copier_binary_for_profiling: impl Into<String>,
        snapshot_manager: Box<dyn SnapshotManager>,
        event_sink: Box<dyn EventSink>,
        max_concurrent_jobs: usize,
        threads_per_job: u32,
        jobs_dir: PathBuf,
    ) -> Self {
        Self {
            profiler: Profiler::new(copier_binary_for_profiling),
            snapshot_manager,
            event_sink,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            threads_per_job,
            state: OrchestrationState::idle(jobs_dir),
            driving: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn request_stop(&mut self) {
        self.state.stop_requested = true;
    }

    pub fn request_pause(&mut self) {
        self.state.pause_requested = true;
    }

    pub fn request_resume(&mut self) {
        self.state.pause_requested = false;
    }

    /// Begin a run of `profile`: take a snapshot if requested, partition the
    /// source tree into chunks, and move to `Replicating`.
    pub fn start_profile(&mut self, profile: Profile) -> Result<()> {
        if self.state.phase != Phase::Idle && self.state.phase != Phase::Complete && self.state.phase != Phase::Stopped {
            return Err(OrbitError::Other(
                "cannot start a profile while another is in progress".into(),
            ));
        }

        self.state = OrchestrationState::idle(self.state.jobs_dir.clone());
        self.state.phase = Phase::Scanning;
        self.event_sink.emit(event_sink::profile_start(&profile.name)).ok();

        let snapshot = if profile.want_snapshot && self.snapshot_manager.is_supported() {
            let volume = volume_root(&profile.source_path());
            match self.snapshot_manager.create(&volume) {
                Ok(snap) => Some(snap),
                Err(e) => {
                    tracing::warn!(profile = %profile.name, error = %e, "orchestrator: snapshot request failed, continuing against live volume");
                    None
                }
            }
        } else {
            None
        };

        let effective_source = snapshot
            .as_ref()
            .map(|s| s.translate_path(&profile.source_path()))
            .unwrap_or_else(|| profile.source_path());

        let profiler = &self.profiler;
        let profile_fn = |path: &std::path::Path| profiler.profile(path, true, None);
        let chunks = partition_for_scan(
            &profile_fn,
            &effective_source,
            &profile.destination_path(),
            &profile.bounds,
            profile.scan_mode,
        );

        self.state.total_chunks = chunks.len() as u64;
        self.state.total_bytes_estimated = chunks.iter().map(|c| c.estimated_size_bytes).sum();
        self.state.queue = chunks.into_iter().collect();
        self.state.snapshot = snapshot;
        self.state.profile = Some(profile);
        self.state.phase = Phase::Replicating;
        Ok(())
    }

    /// Aggregate progress as of the last completed tick (spec.md §4.D step
    /// 6-7). Bytes-complete counts finished chunks at their full estimate
    /// plus whatever the copier's own log has reported so far for chunks
    /// still running.
    pub fn progress(&self) -> ProgressSnapshot {
        let bytes_from_completed: i64 = self.state.completed.iter().map(|c| c.estimated_size_bytes).sum();
        let bytes_from_active: i64 = self
            .state
            .active
            .values()
            .map(|a| copier::parse_log(&std::fs::read_to_string(&a.job.log_path).unwrap_or_default())
                .bytes_copied
                .unwrap_or(0))
            .sum();

        ProgressSnapshot {
            total_chunks: self.state.total_chunks,
            completed_count: self.state.completed.len() as u64,
            failed_count: self.state.failed.len() as u64,
            total_bytes_estimated: self.state.total_bytes_estimated,
            bytes_complete_estimated: bytes_from_completed + bytes_from_active,
        }
    }

    /// Emit an event through this orchestrator's configured sink. Exposed
    /// so a multi-profile `Run` can record session-level events without
    /// reaching into orchestrator-private state.
    pub fn emit(&self, event: Event) -> Result<()> {
        self.event_sink.emit(event)
    }

    /// Advance the run by one step: fill idle job slots, poll running jobs,
    /// retire finished ones. Returns `Some(result)` once the profile has
    /// reached a terminal phase.
    pub fn tick(&mut self) -> Result<Option<ProfileResult>> {
        if self.driving.swap(true, Ordering::SeqCst) {
            panic!("Orchestrator::tick called reentrantly — single-driver invariant violated");
        }
        let result = self.tick_inner();
        self.driving.store(false, Ordering::SeqCst);
        result
    }

    fn tick_inner(&mut self) -> Result<Option<ProfileResult>> {
        if self.state.phase != Phase::Replicating {
            return Ok(None);
        }

        if self.state.stop_requested {
            return Ok(Some(self.finish(true)?));
        }

        if !self.state.pause_requested {
            self.fill_slots()?;
        }

        self.poll_active()?;

        if self.state.active.is_empty() && self.state.queue.is_empty() {
            return Ok(Some(self.finish(false)?));
        }

        Ok(None)
    }

    fn fill_slots(&mut self) {
        let profile = match &self.state.profile {
            Some(p) => p.clone(),
            None => return,
        };

        while self.state.active.len() < self.max_concurrent_jobs {
            let Some(mut chunk) = self.state.queue.pop_front() else {
                break;
            };

            let log_path = crate::logging::chunk_log_path(&self.state.jobs_dir, chunk.id);

            self.event_sink
                .emit(event_sink::chunk_start(
                    &profile.name,
                    chunk.id,
                    &chunk.source_path,
                    &chunk.dest_path,
                ))
                .ok();

            match copier::start_job(&chunk, &profile, self.threads_per_job, log_path) {
                Ok(job) => {
                    chunk.status = ChunkStatus::Running;
                    self.state.active.insert(chunk.id, ActiveJob { job, chunk });
                }
                Err(e) => {
                    chunk.status = ChunkStatus::Failed;
                    chunk.last_error = Some(e.to_string());
                    self.event_sink
                        .emit(event_sink::chunk_error(
                            &profile.name,
                            chunk.id,
                            &chunk.source_path,
                            &chunk.dest_path,
                            e.to_string(),
                        ))
                        .ok();
                    self.state.failed.push(chunk);
                }
            }
        }
    }

    fn poll_active(&mut self) -> Result<()> {
        let profile = match &self.state.profile {
            Some(p) => p.clone(),
            None => return Ok(()),
        };

        let mut finished: Vec<(u64, i32)> = Vec::new();
        let mut timed_out: Vec<u64> = Vec::new();

        for (id, active_job) in self.state.active.iter_mut() {
            match copier::poll_job(&mut active_job.job, JOB_TIMEOUT)? {
                JobPoll::Finished(code) => finished.push((*id, code)),
                JobPoll::TimedOut => timed_out.push(*id),
                JobPoll::Running => {}
            }
        }

        for (id, code) in finished {
            let ActiveJob { job, mut chunk } = self.state.active.remove(&id).unwrap();
            let summary = copier::complete_job(&job, code, profile.mismatch_policy).summary;
            self.handle_finished_chunk(&profile, &mut chunk, code, &summary);
        }

        for id in timed_out {
            let ActiveJob { mut chunk, .. } = self.state.active.remove(&id).unwrap();
            self.fail_chunk_non_retryable(&profile, &mut chunk, "copier job timed out");
        }

        Ok(())
    }

    /// Fail a chunk outright with no retry, regardless of `maxChunkRetries`
    /// (spec.md §5 "Timeouts": "records a timeout outcome (Error,
    /// retryable=false)"; §7 `CopierTimedOut` → Failed, Retried? no).
    fn fail_chunk_non_retryable(&mut self, profile: &Profile, chunk: &mut Chunk, reason: &str) {
        chunk.last_error = Some(reason.to_string());
        chunk.status = ChunkStatus::Failed;
        self.event_sink
            .emit(event_sink::chunk_error(
                &profile.name,
                chunk.id,
                &chunk.source_path,
                &chunk.dest_path,
                reason,
            ))
            .ok();
        self.state.failed.push(chunk.clone());
    }

    fn handle_finished_chunk(
        &mut self,
        profile: &Profile,
        chunk: &mut Chunk,
        code: i32,
        summary: &copier::LogSummary,
    ) {
        let outcome = crate::exit_code::interpret(code, profile.mismatch_policy);
        chunk.last_exit_code = Some(code);

        let terminal_status = match outcome.severity {
            Severity::Success => ChunkStatus::Complete,
            Severity::Warning => ChunkStatus::CompleteWithWarnings,
            Severity::Error | Severity::Fatal => ChunkStatus::Failed,
        };

        // handleFailedChunk (spec.md §4.D) only runs for Error/Fatal
        // severity, and increments the retry counter unconditionally
        // before deciding whether another attempt is allowed — this is
        // what makes `maxChunkRetries = 3` mean "exactly 3 subprocess
        // launches" (spec.md §8 scenario 4), not 4.
        if matches!(outcome.severity, Severity::Error | Severity::Fatal) {
            chunk.record_attempt();
            if outcome.retryable && chunk.retry_attempts < MAX_CHUNK_RETRIES {
                chunk.status = ChunkStatus::Pending;
                self.state.queue.push_back(chunk.clone());
                tracing::warn!(
                    chunk_id = chunk.id,
                    attempt = chunk.retry_attempts,
                    "orchestrator: requeuing retryable chunk"
                );
                return;
            }
        }

        chunk.status = terminal_status;

        let event = if terminal_status == ChunkStatus::Failed {
            chunk.last_error = Some(outcome.human_message.clone());
            event_sink::chunk_error(
                &profile.name,
                chunk.id,
                &chunk.source_path,
                &chunk.dest_path,
                outcome.human_message.clone(),
            )
        } else {
            event_sink::chunk_complete(
                &profile.name,
                chunk.id,
                &chunk.source_path,
                &chunk.dest_path,
                code,
                summary.bytes_copied.unwrap_or(0),
                summary.files_copied.unwrap_or(0),
            )
        };
        self.event_sink.emit(event).ok();

        if terminal_status == ChunkStatus::Failed {
            self.state.failed.push(chunk.clone());
        } else {
            self.state.completed.push(chunk.clone());
        }
    }

    fn finish(&mut self, stopped: bool) -> Result<ProfileResult> {
        if stopped {
            // Cancellation kills every active subprocess immediately,
            // best-effort, and drops the queue (spec.md §5 "Cancellation").
            for (_, mut active) in self.state.active.drain() {
                copier::kill_job(&mut active.job);
                active.chunk.status = ChunkStatus::Failed;
                active.chunk.last_error = Some("stopped by user".to_string());
                self.state.failed.push(active.chunk);
            }
            self.state.queue.clear();
        }

        if let Some(snapshot) = self.state.snapshot.take() {
            if let Err(e) = self.snapshot_manager.release(&snapshot) {
                tracing::warn!(error = %e, "orchestrator: snapshot release failed");
            }
        }

        let profile_name = self
            .state
            .profile
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();

        let event = if stopped {
            event_sink::session_end(&profile_name).with_message("stopped by user")
        } else {
            event_sink::profile_complete(&profile_name)
        };
        self.event_sink.emit(event).ok();

        self.state.phase = if stopped { Phase::Stopped } else { Phase::Complete };

        Ok(ProfileResult {
            profile_name,
            completed_chunks: std::mem::take(&mut self.state.completed),
            failed_chunks: std::mem::take(&mut self.state.failed),
            stopped,
        })
    }
}

fn volume_root(path: &std::path::Path) -> String {
    path.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_else(|| "C:".to_string())
}

/// Outcome of a full run across every configured profile (spec.md §4.D
/// `startRun`).
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub profile_results: Vec<ProfileResult>,
    pub stopped: bool,
}

impl RunSummary {
    /// Exit-code rule from spec.md §6: 0 if every profile completed with
    /// zero failed chunks; 1 if any chunk failed or any profile stopped.
    pub fn process_exit_code(&self) -> i32 {
        let any_failed = self.profile_results.iter().any(|r| r.any_failed());
        if self.stopped || any_failed {
            1
        } else {
            0
        }
    }
}

/// Drives a single `Orchestrator` across an ordered list of profiles
/// (spec.md §4.D `startRun`/`completeProfile`: "profile N+1 does not start
/// until profile N is fully drained ... If more profiles remain, calls
/// startProfile on the next one"). A fresh run id is minted on `start()`
/// (spec.md §3 `OrchestrationState.runId`: "fresh on each start").
pub struct Run {
    orchestrator: Orchestrator,
    pending: VecDeque<Profile>,
    results: Vec<ProfileResult>,
    run_id: String,
    started: bool,
}

impl Run {
    pub fn new(orchestrator: Orchestrator, profiles: Vec<Profile>) -> Self {
        Self {
            orchestrator,
            pending: profiles.into_iter().collect(),
            results: Vec::new(),
            run_id: uuid::Uuid::new_v4().to_string(),
            started: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn request_stop(&mut self) {
        self.orchestrator.request_stop();
    }

    pub fn request_pause(&mut self) {
        self.orchestrator.request_pause();
    }

    pub fn request_resume(&mut self) {
        self.orchestrator.request_resume();
    }

    /// Aggregate progress for the profile currently in flight. Once a
    /// profile finishes its counters reset with the next `startProfile`
    /// call, per spec.md §5 "Memory discipline".
    pub fn progress(&self) -> ProgressSnapshot {
        self.orchestrator.progress()
    }

    pub fn current_profile_name(&self) -> Option<String> {
        self.orchestrator.state.profile.as_ref().map(|p| p.name.clone())
    }

    /// Begin the run: emit `SessionStart` and start the first profile.
    pub fn start(&mut self) -> Result<()> {
        self.orchestrator.emit(event_sink::session_start(&self.run_id)).ok();
        if let Some(first) = self.pending.pop_front() {
            self.orchestrator.start_profile(first)?;
        }
        self.started = true;
        Ok(())
    }

    /// Advance the current profile by one tick. Returns `Some(summary)`
    /// once every profile has been driven to completion (or the run was
    /// stopped), `None` while work remains.
    pub fn tick(&mut self) -> Result<Option<RunSummary>> {
        if !self.started {
            self.start()?;
        }

        let Some(result) = self.orchestrator.tick()? else {
            return Ok(None);
        };

        let stopped = result.stopped;
        self.results.push(result);

        if stopped || self.pending.is_empty() {
            self.orchestrator.emit(event_sink::session_end(&self.run_id)).ok();
            return Ok(Some(RunSummary {
                run_id: self.run_id.clone(),
                profile_results: std::mem::take(&mut self.results),
                stopped,
            }));
        }

        let next = self.pending.pop_front().unwrap();
        self.orchestrator.start_profile(next)?;
        Ok(None)
    }
}
