//! End-to-end orchestration tests against a `FakeCopier` test double: a
//! tiny shell script standing in for the external Robocopy-compatible
//! binary spec.md §6 describes, so the Orchestrator's retry, cancellation,
//! and multi-profile sequencing can be exercised without a real copier on
//! the test host (the `tests/` + test-double pattern SPEC_FULL.md §2
//! grounds in the teacher's own `tests/` directory).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use orbit_relay::config::{ChunkingBounds, CopierOptions, MismatchPolicy, Profile, ScanMode};
use orbit_relay::event_sink::MemoryEventSink;
use orbit_relay::orchestrator::{Orchestrator, Phase, Run};
use orbit_relay::snapshot::{NullSnapshotManager, Snapshot, SnapshotManager};
use tempfile::TempDir;

/// Writes a shell script that always exits with `code`, writing a minimal
/// summary block to whatever `/LOG:<path>` it was given (mirroring what a
/// real copier does for `parseLog` to read back).
fn write_fake_copier(dir: &Path, code: i32) -> PathBuf {
    let path = dir.join("fake-copier.sh");
    let script = format!(
        "#!/bin/sh\nlog=\"\"\nfor arg in \"$@\"; do\n  case \"$arg\" in\n    /LOG:*) log=\"${{arg#/LOG:}}\" ;;\n  esac\ndone\nif [ -n \"$log\" ]; then\n  mkdir -p \"$(dirname \"$log\")\"\n  cat > \"$log\" <<'EOF'\n   Dirs :         1         1         0         0         0         0\n  Files :         1         1         0         0         0         0\n  Bytes :      1024      1024         0         0         0         0\nEOF\nfi\nexit {code}\n"
    );
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn profile_for(name: &str, source: &Path, dest: &Path, copier_binary: &Path) -> Profile {
    Profile {
        name: name.into(),
        source: source.to_string_lossy().to_string(),
        destination: dest.to_string_lossy().to_string(),
        want_snapshot: false,
        scan_mode: ScanMode::Smart,
        bounds: ChunkingBounds {
            max_size_bytes: 1024 * 1024,
            max_files: 10_000,
            max_depth: 5,
            min_size_bytes: 0,
        },
        copier: CopierOptions::default(),
        mismatch_policy: MismatchPolicy::Warning,
        copier_binary: copier_binary.to_string_lossy().to_string(),
    }
}

fn drive_to_completion(orchestrator: &mut Orchestrator) -> orbit_relay::orchestrator::ProfileResult {
    loop {
        if let Some(result) = orchestrator.tick().unwrap() {
            return result;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

// spec.md §8 Scenario 4 — retry to exhaustion: a chunk whose copier exits 8
// on every attempt sees exactly 3 subprocess launches and ends Failed.
#[test]
fn retry_exhaustion_yields_exactly_three_launches() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.txt"), b"hi").unwrap();
    let dest = temp.path().join("dest");
    let copier = write_fake_copier(temp.path(), 8);

    let sink = std::sync::Arc::new(MemoryEventSink::new());
    let mut orchestrator = Orchestrator::new(
        copier.to_string_lossy().to_string(),
        Box::new(NullSnapshotManager),
        Box::new(ForwardingSink(sink.clone())),
        1,
        1,
        temp.path().join("logs"),
    );

    orchestrator
        .start_profile(profile_for("t", &source, &dest, &copier))
        .unwrap();

    let result = drive_to_completion(&mut orchestrator);

    assert!(result.any_failed());
    assert_eq!(result.failed_chunks.len(), 1);
    assert_eq!(result.failed_chunks[0].retry_attempts, 3);

    let chunk_errors = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e.event_type, orbit_relay::event_sink::EventType::ChunkError))
        .count();
    assert_eq!(chunk_errors, 1, "exactly one ChunkError audit event");
}

struct ForwardingSink(std::sync::Arc<MemoryEventSink>);

impl orbit_relay::event_sink::EventSink for ForwardingSink {
    fn emit(&self, event: orbit_relay::event_sink::Event) -> orbit_relay::error::Result<()> {
        self.0.emit(event)
    }
}

// spec.md §8 Scenario 3 end-to-end: a chunk that always succeeds (exit 0)
// completes without any retry.
#[test]
fn successful_copier_run_completes_without_retry() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.txt"), b"hi").unwrap();
    let dest = temp.path().join("dest");
    let copier = write_fake_copier(temp.path(), 0);

    let mut orchestrator = Orchestrator::new(
        copier.to_string_lossy().to_string(),
        Box::new(NullSnapshotManager),
        Box::new(MemoryEventSink::new()),
        2,
        1,
        temp.path().join("logs"),
    );

    orchestrator
        .start_profile(profile_for("t", &source, &dest, &copier))
        .unwrap();

    let result = drive_to_completion(&mut orchestrator);

    assert!(!result.any_failed());
    assert_eq!(result.completed_chunks.len(), 1);
    assert_eq!(result.completed_chunks[0].retry_attempts, 0);
}

// spec.md §8 Scenario 5 — snapshot guarantee under failure: release is
// invoked exactly once even though the profile's chunk fails outright.
#[test]
fn snapshot_is_released_even_when_profile_fails() {
    struct CountingSnapshotManager {
        released: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl SnapshotManager for CountingSnapshotManager {
        fn is_supported(&self) -> bool {
            true
        }
        fn create(&self, source_volume: &str) -> orbit_relay::error::Result<Snapshot> {
            Ok(Snapshot {
                id: "{fake}".into(),
                source_volume: source_volume.to_string(),
                shadow_device_path: "/fake-shadow".into(),
            })
        }
        fn release(&self, _snapshot: &Snapshot) -> orbit_relay::error::Result<()> {
            self.released.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.txt"), b"hi").unwrap();
    let dest = temp.path().join("dest");
    let copier = write_fake_copier(temp.path(), 24); // fatal + failed bits

    let released = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut profile = profile_for("t", &source, &dest, &copier);
    profile.want_snapshot = true;

    let mut orchestrator = Orchestrator::new(
        copier.to_string_lossy().to_string(),
        Box::new(CountingSnapshotManager {
            released: released.clone(),
        }),
        Box::new(MemoryEventSink::new()),
        1,
        1,
        temp.path().join("logs"),
    );

    orchestrator.start_profile(profile).unwrap();
    let result = drive_to_completion(&mut orchestrator);

    assert!(result.any_failed());
    assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(orchestrator.phase(), Phase::Complete);
}

// spec.md §8 Scenario 6 — cancellation mid-run kills active jobs, drops the
// queue, and reaches Stopped.
#[test]
fn stop_request_kills_active_jobs_and_drops_queue() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    fs::create_dir_all(&source).unwrap();
    for i in 0..20 {
        fs::write(source.join(format!("f{i}.dat")), vec![0u8; 1024]).unwrap();
    }
    let dest = temp.path().join("dest");
    // A script that sleeps, so the job is still "active" when stop fires.
    let copier_path = temp.path().join("slow-fake-copier.sh");
    fs::write(&copier_path, "#!/bin/sh\nsleep 5\nexit 0\n").unwrap();
    let mut perms = fs::metadata(&copier_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&copier_path, perms).unwrap();

    let mut profile = profile_for("t", &source, &dest, &copier_path);
    profile.bounds.max_files = 1; // force many small chunks so several jobs start

    let mut orchestrator = Orchestrator::new(
        copier_path.to_string_lossy().to_string(),
        Box::new(NullSnapshotManager),
        Box::new(MemoryEventSink::new()),
        4,
        1,
        temp.path().join("logs"),
    );
    orchestrator.start_profile(profile).unwrap();

    // One tick to start jobs, then request stop before any can finish.
    orchestrator.tick().unwrap();
    orchestrator.request_stop();

    let result = orchestrator.tick().unwrap();
    assert!(result.is_some());
    let result = result.unwrap();
    assert!(result.stopped);
    assert_eq!(orchestrator.phase(), Phase::Stopped);
}

// Multi-profile sequencing via `Run`: profile N+1 only starts once N has
// fully drained, and the run-level summary aggregates every profile.
#[test]
fn run_sequences_profiles_and_aggregates_results() {
    let temp = TempDir::new().unwrap();
    let copier = write_fake_copier(temp.path(), 1); // files copied, success

    let mut profiles = Vec::new();
    for name in ["alpha", "beta"] {
        let source = temp.path().join(format!("{name}-source"));
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"hi").unwrap();
        let dest = temp.path().join(format!("{name}-dest"));
        profiles.push(profile_for(name, &source, &dest, &copier));
    }

    let orchestrator = Orchestrator::new(
        copier.to_string_lossy().to_string(),
        Box::new(NullSnapshotManager),
        Box::new(MemoryEventSink::new()),
        2,
        1,
        temp.path().join("logs"),
    );

    let mut run = Run::new(orchestrator, profiles);
    let summary = loop {
        if let Some(summary) = run.tick().unwrap() {
            break summary;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    };

    assert_eq!(summary.profile_results.len(), 2);
    assert!(!summary.stopped);
    assert_eq!(summary.process_exit_code(), 0);
    let names: Vec<_> = summary
        .profile_results
        .iter()
        .map(|r| r.profile_name.clone())
        .collect();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}
