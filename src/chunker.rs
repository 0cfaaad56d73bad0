/*!
 * Chunker (spec.md §4.B)
 *
 * Recursively partitions a source tree into chunks respecting size/file/
 * depth bounds, emitting a terminal files-only chunk whenever a node mixes
 * immediate files with subdirectories.
 */

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{ChunkingBounds, ScanMode};
use crate::profiler::DirectoryProfile;

static NEXT_CHUNK_ID: AtomicU64 = AtomicU64::new(1);

fn next_chunk_id() -> u64 {
    NEXT_CHUNK_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Running,
    Complete,
    CompleteWithWarnings,
    Failed,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChunkStatus::Complete | ChunkStatus::CompleteWithWarnings | ChunkStatus::Failed
        )
    }
}

/// B's output, D's unit of work (spec.md §3 `Chunk`).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u64,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub estimated_size_bytes: i64,
    pub estimated_file_count: u64,
    pub files_only: bool,
    pub extra_args: Vec<String>,
    pub status: ChunkStatus,
    pub retry_attempts: u32,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
}

impl Chunk {
    fn new(
        source_path: PathBuf,
        dest_path: PathBuf,
        estimated_size_bytes: i64,
        estimated_file_count: u64,
        files_only: bool,
        extra_args: Vec<String>,
    ) -> Self {
        Self {
            id: next_chunk_id(),
            source_path,
            dest_path,
            estimated_size_bytes,
            estimated_file_count,
            files_only,
            extra_args,
            status: ChunkStatus::Pending,
            retry_attempts: 0,
            last_exit_code: None,
            last_error: None,
        }
    }

    /// Record a retry attempt. There is deliberately no decrement operation
    /// — the counter never decreases (spec.md §3 `Chunk` invariant).
    pub fn record_attempt(&mut self) {
        self.retry_attempts += 1;
    }
}

/// Map a source path under `source_root` to the equivalent path under
/// `dest_root`. Falls back to `dest_root.join(basename(source))` for
/// pathological input that doesn't actually start with `source_root`
/// (case-insensitive prefix compare, per spec.md §4.B).
pub fn map_destination(source: &Path, source_root: &Path, dest_root: &Path) -> PathBuf {
    let source_str = source.to_string_lossy();
    let source_lower = source_str.to_lowercase();
    let root_lower = source_root.to_string_lossy().to_lowercase();

    // Path prefixes here are Windows drive-letter paths (ASCII), so the
    // lowercased string's byte length matches the original's, and slicing
    // the original by the lowered prefix's byte length recovers the
    // original-case remainder.
    if source_lower.starts_with(&root_lower) && root_lower.len() <= source_str.len() {
        let remainder = source_str[root_lower.len()..].trim_start_matches(['\\', '/']);
        if remainder.is_empty() {
            dest_root.to_path_buf()
        } else {
            dest_root.join(remainder)
        }
    } else {
        tracing::warn!(
            source = %source.display(),
            source_root = %source_root.display(),
            "chunker: source does not start with source root, falling back to basename mapping"
        );
        let basename = source.file_name().unwrap_or_default();
        dest_root.join(basename)
    }
}

fn immediate_children(node: &Path) -> (Vec<PathBuf>, bool) {
    let mut dirs = Vec::new();
    let mut has_files = false;

    match std::fs::read_dir(node) {
        Ok(entries) => {
            for entry in entries.flatten() {
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => dirs.push(entry.path()),
                    Ok(_) => has_files = true,
                    Err(_) => {}
                }
            }
        }
        Err(e) => {
            tracing::warn!(path = %node.display(), error = %e, "chunker: failed to enumerate children");
        }
    }

    (dirs, has_files)
}

/// Depth-1 limiter argument applied to files-only chunks so the copier
/// processes only the one level it is rooted at.
fn files_only_extra_args() -> Vec<String> {
    vec!["/LEV:1".to_string()]
}

/// Abstraction over "measure this directory" so the Chunker doesn't need a
/// live copier binary to be tested. In production this is
/// `|path| profiler.profile(path, true, None)`; tests supply a fake.
pub trait DirectoryProfileSource {
    fn profile(&self, path: &Path) -> DirectoryProfile;
}

impl<F> DirectoryProfileSource for F
where
    F: Fn(&Path) -> DirectoryProfile,
{
    fn profile(&self, path: &Path) -> DirectoryProfile {
        self(path)
    }
}

/// Partition `node` (conceptually rooted under `source_root`, mapped into
/// `dest_root`) into a list of chunks.
pub fn partition(
    profiles: &dyn DirectoryProfileSource,
    node: &Path,
    source_root: &Path,
    dest_root: &Path,
    bounds: &ChunkingBounds,
    depth: u32,
) -> Vec<Chunk> {
    let profile = profiles.profile(node);
    let dest_path = map_destination(node, source_root, dest_root);

    let fits = profile.total_size_bytes <= bounds.max_size_bytes
        && profile.file_count <= bounds.max_files;

    if fits {
        return vec![Chunk::new(
            node.to_path_buf(),
            dest_path,
            profile.total_size_bytes,
            profile.file_count,
            false,
            Vec::new(),
        )];
    }

    if depth >= bounds.max_depth {
        tracing::warn!(
            path = %node.display(),
            depth,
            "chunker: reached max depth with an oversized node; emitting single unsplit chunk"
        );
        return vec![Chunk::new(
            node.to_path_buf(),
            dest_path,
            profile.total_size_bytes,
            profile.file_count,
            false,
            Vec::new(),
        )];
    }

    let (child_dirs, has_immediate_files) = immediate_children(node);

    if child_dirs.is_empty() {
        return vec![Chunk::new(
            node.to_path_buf(),
            dest_path,
            profile.total_size_bytes,
            profile.file_count,
            false,
            Vec::new(),
        )];
    }

    let mut chunks = Vec::new();
    for child in &child_dirs {
        chunks.extend(partition(
            profiles,
            child,
            source_root,
            dest_root,
            bounds,
            depth + 1,
        ));
    }

    if has_immediate_files {
        chunks.push(Chunk::new(
            node.to_path_buf(),
            dest_path,
            0,
            0,
            true,
            files_only_extra_args(),
        ));
    }

    chunks
}

/// Entry point used by the Orchestrator: apply the profile's scan mode
/// before recursing.
pub fn partition_for_scan(
    profiles: &dyn DirectoryProfileSource,
    source_root: &Path,
    dest_root: &Path,
    bounds: &ChunkingBounds,
    mode: ScanMode,
) -> Vec<Chunk> {
    let effective_bounds = bounds.effective_for(mode);
    partition(profiles, source_root, source_root, dest_root, &effective_bounds, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn bounds(max_size: i64, max_files: u64, max_depth: u32) -> ChunkingBounds {
        ChunkingBounds {
            max_size_bytes: max_size,
            max_files,
            max_depth,
            min_size_bytes: 0,
        }
    }

    fn write_n_files(dir: &Path, n: usize, size: usize) {
        std::fs::create_dir_all(dir).unwrap();
        for i in 0..n {
            std::fs::write(dir.join(format!("f{i}.dat")), vec![0u8; size]).unwrap();
        }
    }

    /// Real-filesystem profile source used by tests: walks the actual temp
    /// directory tree to compute exact totals, standing in for what a real
    /// copier's list-only mode would report.
    fn real_fs_profiler(path: &Path) -> DirectoryProfile {
        fn walk(path: &Path, total: &mut i64, files: &mut u64, dirs: &mut u64) {
            let entries = match std::fs::read_dir(path) {
                Ok(e) => e,
                Err(_) => return,
            };
            for entry in entries.flatten() {
                let entry_path = entry.path();
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => {
                        *dirs += 1;
                        walk(&entry_path, total, files, dirs);
                    }
                    Ok(_) => {
                        *files += 1;
                        *total += entry.metadata().map(|m| m.len() as i64).unwrap_or(0);
                    }
                    Err(_) => {}
                }
            }
        }

        let mut total = 0i64;
        let mut files = 0u64;
        let mut dirs = 0u64;
        walk(path, &mut total, &mut files, &mut dirs);

        DirectoryProfile {
            canonical_path: path.to_string_lossy().to_lowercase(),
            total_size_bytes: total,
            file_count: files,
            dir_count: dirs,
            average_file_size: if files > 0 { total as f64 / files as f64 } else { 0.0 },
            last_scanned: SystemTime::now(),
        }
    }

    // spec.md §8 Scenario 1 — balanced tree: one chunk per child, each
    // unsplittable because it has no subdirectories of its own.
    #[test]
    fn scenario_1_balanced_tree_one_chunk_per_child() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        for child in ["A", "B", "C"] {
            write_n_files(&root.join(child), 3, 2 * 1024 * 1024);
        }

        let dest = PathBuf::from("D:\\Backup");
        let chunks = partition_for_scan(
            &real_fs_profiler,
            root,
            &dest,
            &bounds(5 * 1024 * 1024, 10, 5),
            ScanMode::Smart,
        );

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| !c.files_only));
        assert!(chunks.iter().all(|c| c.estimated_size_bytes == 6 * 1024 * 1024));
    }

    // spec.md §8 Scenario 2 — mixed node at root.
    #[test]
    fn scenario_2_mixed_node_emits_files_only_chunk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        std::fs::write(root.join("a.dat"), vec![0u8; 1024 * 1024]).unwrap();
        std::fs::write(root.join("b.dat"), vec![0u8; 1024 * 1024]).unwrap();
        write_n_files(&root.join("S"), 100, 1024);

        let dest = PathBuf::from("D:\\Backup");
        let chunks = partition_for_scan(
            &real_fs_profiler,
            root,
            &dest,
            &bounds(500 * 1024, 10, 5),
            ScanMode::Smart,
        );

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.iter().filter(|c| c.files_only).count(), 1);
        let files_only = chunks.iter().find(|c| c.files_only).unwrap();
        assert_eq!(files_only.source_path, root);
        assert_eq!(files_only.extra_args, vec!["/LEV:1".to_string()]);
    }

    // spec.md §8 property 11 — empty source.
    #[test]
    fn empty_source_yields_one_chunk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let dest = PathBuf::from("D:\\Backup");
        let chunks = partition_for_scan(&real_fs_profiler, root, &dest, &bounds(1024, 10, 5), ScanMode::Smart);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].files_only);
        assert_eq!(chunks[0].estimated_size_bytes, 0);
    }

    // spec.md §8 property 12 — single oversized file, unsplittable.
    #[test]
    fn single_oversized_file_yields_one_unsplittable_chunk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("huge.bin"), vec![0u8; 10 * 1024]).unwrap();

        let dest = PathBuf::from("D:\\Backup");
        let chunks = partition_for_scan(&real_fs_profiler, root, &dest, &bounds(1024, 10, 5), ScanMode::Smart);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].files_only);
    }

    #[test]
    fn no_subdirectories_yields_single_unsplittable_chunk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write_n_files(root, 5, 10 * 1024);

        let dest = PathBuf::from("D:\\Backup");
        // max_files=1 forces "doesn't fit", but root has no subdirectories.
        let chunks = partition(&real_fs_profiler, root, root, &dest, &bounds(1024 * 1024, 1, 5), 0);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].files_only);
    }

    #[test]
    fn depth_exhaustion_on_oversized_node_emits_single_chunk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write_n_files(&root.join("deep"), 5, 10 * 1024);

        let dest = PathBuf::from("D:\\Backup");
        // max_depth=0 means depth(0) >= max_depth immediately.
        let chunks = partition(&real_fs_profiler, root, root, &dest, &bounds(1, 1, 0), 0);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].files_only);
    }

    #[test]
    fn flat_mode_forces_single_level_chunking() {
        let bounds = ChunkingBounds::default();
        let effective = bounds.effective_for(ScanMode::Flat);
        assert_eq!(effective.max_depth, 1);
    }

    // spec.md §4.B Flat mode: "each immediate top-level directory becomes a
    // single chunk and files at the root become one files-only chunk."
    #[test]
    fn flat_mode_yields_one_chunk_per_top_level_directory_plus_root_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        std::fs::write(root.join("root.dat"), vec![0u8; 1024]).unwrap();
        // Each top-level directory is oversized on its own and has further
        // nested structure, but Flat mode must not descend into it.
        for child in ["A", "B"] {
            write_n_files(&root.join(child).join("nested"), 5, 10 * 1024);
        }

        let dest = PathBuf::from("D:\\Backup");
        let chunks = partition_for_scan(
            &real_fs_profiler,
            root,
            &dest,
            &bounds(1, 1, 5),
            ScanMode::Flat,
        );

        assert_eq!(chunks.len(), 3);
        let files_only: Vec<_> = chunks.iter().filter(|c| c.files_only).collect();
        assert_eq!(files_only.len(), 1);
        assert_eq!(files_only[0].source_path, root);

        let top_level: Vec<_> = chunks.iter().filter(|c| !c.files_only).collect();
        assert_eq!(top_level.len(), 2);
        let mut names: Vec<_> = top_level
            .iter()
            .map(|c| c.source_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn destination_mapping_preserves_relative_path() {
        let source_root = Path::new("C:\\Data");
        let dest_root = Path::new("D:\\Backup");
        let mapped = map_destination(Path::new("C:\\Data\\Sub\\leaf"), source_root, dest_root);
        assert_eq!(mapped, PathBuf::from("D:\\Backup\\Sub\\leaf"));
    }

    #[test]
    fn destination_mapping_is_case_insensitive_on_prefix() {
        let source_root = Path::new("c:\\data");
        let dest_root = Path::new("D:\\Backup");
        let mapped = map_destination(Path::new("C:\\Data\\Sub"), source_root, dest_root);
        assert_eq!(mapped, PathBuf::from("D:\\Backup\\Sub"));
    }

    #[test]
    fn destination_mapping_falls_back_for_pathological_input() {
        let source_root = Path::new("C:\\Data");
        let dest_root = Path::new("D:\\Backup");
        let mapped = map_destination(Path::new("E:\\Elsewhere\\leaf"), source_root, dest_root);
        assert_eq!(mapped, PathBuf::from("D:\\Backup\\leaf"));
    }

    #[test]
    fn chunk_ids_are_unique_and_monotonic() {
        let a = Chunk::new(PathBuf::from("a"), PathBuf::from("a"), 0, 0, false, vec![]);
        let b = Chunk::new(PathBuf::from("b"), PathBuf::from("b"), 0, 0, false, vec![]);
        assert!(b.id > a.id);
    }

    #[test]
    fn record_attempt_never_decreases() {
        let mut chunk = Chunk::new(PathBuf::from("a"), PathBuf::from("a"), 0, 0, false, vec![]);
        assert_eq!(chunk.retry_attempts, 0);
        chunk.record_attempt();
        chunk.record_attempt();
        assert_eq!(chunk.retry_attempts, 2);
    }

    // spec.md §8 property 9 — idempotent partitioning for the same input.
    #[test]
    fn partitioning_is_idempotent_in_shape() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for child in ["A", "B"] {
            write_n_files(&root.join(child), 2, 1024);
        }
        let dest = PathBuf::from("D:\\Backup");
        let b = bounds(1, 10, 5);

        let first = partition_for_scan(&real_fs_profiler, root, &dest, &b, ScanMode::Smart);
        let second = partition_for_scan(&real_fs_profiler, root, &dest, &b, ScanMode::Smart);

        let shape = |chunks: &[Chunk]| -> Vec<(PathBuf, bool)> {
            let mut v: Vec<_> = chunks.iter().map(|c| (c.source_path.clone(), c.files_only)).collect();
            v.sort();
            v
        };
        assert_eq!(shape(&first), shape(&second));
    }
}
