/*!
 * The statically-typed configuration surface the orchestrator consumes.
 *
 * Loading and validating an on-disk format is explicitly out of scope for
 * the core (spec.md §1); this module only defines the shapes a validated
 * loader upstream hands over, plus the invariant checks spec.md §3 states.
 * `load_run_config` is a thin TOML→struct pass-through kept here only so
 * the CLI binary has something to call — it is not a general-purpose
 * config file parser.
 */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};

/// Directory enumeration strategy. `Flat` recurses exactly one level past
/// the root, turning every immediate top-level directory into a single
/// chunk (plus a files-only chunk for any files at the root itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Smart,
    Flat,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::Smart
    }
}

/// How a mismatch bit (bit 2 of the copier's exit code) should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Default: a mismatch is a non-retryable warning.
    Warning,
    /// Promote mismatches to a retryable error.
    Error,
    /// Demote mismatches to a non-retryable success.
    Success,
}

impl Default for MismatchPolicy {
    fn default() -> Self {
        MismatchPolicy::Warning
    }
}

/// Chunking bounds, spec.md §3 `Profile` invariants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingBounds {
    pub max_size_bytes: i64,
    pub max_files: u64,
    pub max_depth: u32,
    pub min_size_bytes: i64,
}

impl Default for ChunkingBounds {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024 * 1024,
            max_files: 250_000,
            max_depth: 10,
            min_size_bytes: 0,
        }
    }
}

impl ChunkingBounds {
    fn validate(&self) -> Result<()> {
        if self.max_size_bytes <= self.min_size_bytes {
            return Err(OrbitError::Config(
                "maxSizeBytes must be greater than minSizeBytes".into(),
            ));
        }
        if !(1..=20).contains(&self.max_depth) {
            return Err(OrbitError::Config(
                "maxDepth must be between 1 and 20".into(),
            ));
        }
        if !(1..=10_000_000).contains(&self.max_files) {
            return Err(OrbitError::Config(
                "maxFiles must be between 1 and 10,000,000".into(),
            ));
        }
        Ok(())
    }

    /// Bounds as they apply once `ScanMode::Flat` forces a one-level
    /// recursion: the root itself is never split further than its immediate
    /// children, so each top-level directory becomes a single chunk and
    /// files at the root become one files-only chunk (spec.md §4.B "Flat
    /// ... forces maxDepth=0, each immediate top-level directory becomes a
    /// single chunk"). That requires the Chunker to recurse exactly one
    /// level past the root before the depth cutoff fires, hence `max_depth:
    /// 1` here rather than `0` — `partition` starts at depth 0, so `0` would
    /// cut off at the root itself and never look at the top-level
    /// directories at all.
    pub fn effective_for(&self, mode: ScanMode) -> ChunkingBounds {
        match mode {
            ScanMode::Smart => *self,
            ScanMode::Flat => ChunkingBounds {
                max_depth: 1,
                ..*self
            },
        }
    }
}

/// Copier switches under the profile's control (spec.md §4.C).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopierOptions {
    /// Extra switches, in order. Any that collide with an orchestrator-owned
    /// switch are filtered out by the Copier Driver, never here.
    #[serde(default)]
    pub extra_switches: Vec<String>,
    #[serde(default)]
    pub exclude_file_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_dir_patterns: Vec<String>,
    /// True selects `/E` (copy, no deletion); false selects `/MIR` (mirror).
    #[serde(default)]
    pub no_mirror: bool,
    #[serde(default)]
    pub skip_reparse_points: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u32,
    #[serde(default)]
    pub inter_packet_gap_ms: u32,
}

fn default_retry_count() -> u32 {
    1
}

fn default_retry_wait_secs() -> u32 {
    2
}

/// One source→destination replication task (spec.md §3 `Profile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub want_snapshot: bool,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default)]
    pub bounds: ChunkingBounds,
    #[serde(default)]
    pub copier: CopierOptions,
    #[serde(default)]
    pub mismatch_policy: MismatchPolicy,
    /// Name or path of the external copier binary. Configurable rather than
    /// hard-coded so the core's dependency stays on the argument/output
    /// contract (spec.md §6), not a fixed executable path.
    #[serde(default = "default_copier_binary")]
    pub copier_binary: String,
}

fn default_copier_binary() -> String {
    "robocopy".to_string()
}

impl Profile {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrbitError::Config("profile name must not be empty".into()));
        }
        if self.source.trim().is_empty() {
            return Err(OrbitError::Config("source must not be empty".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(OrbitError::Config(
                "destination must not be empty".into(),
            ));
        }
        self.bounds.validate()?;
        Ok(())
    }

    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.source)
    }

    pub fn destination_path(&self) -> PathBuf {
        PathBuf::from(&self.destination)
    }
}

/// Global run configuration: the ordered profile list plus the two global
/// values and the operational-log root (spec.md §6 "Configuration surface
/// consumed from the outside").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub profiles: Vec<Profile>,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_threads_per_job")]
    pub threads_per_job: u32,
    pub log_root: PathBuf,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_threads_per_job() -> u32 {
    8
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(OrbitError::Config("no profiles configured".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(OrbitError::Config(
                "maxConcurrentJobs must be at least 1".into(),
            ));
        }
        for profile in &self.profiles {
            profile.validate()?;
        }
        Ok(())
    }

    pub fn find_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

/// Thin TOML→struct pass-through. No validation beyond `RunConfig::validate`
/// — parsing the on-disk format itself belongs to the external collaborator
/// described in spec.md §1, this just gives the CLI something to call.
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: RunConfig = toml::from_str(&text)
        .map_err(|e| OrbitError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
