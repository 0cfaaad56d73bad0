/*!
 * Snapshot Manager (spec.md §4.E)
 *
 * Wraps Volume Shadow Copy the same way the rest of the crate wraps the
 * copier: by shelling out to the platform CLI (`vssadmin`) rather than
 * binding the VSS COM interfaces directly. A hand-written COM binding can't
 * be exercised without a compiler, and `vssadmin create shadow` /
 * `vssadmin delete shadows` already expose the lifecycle this component
 * needs (spec.md §3 `Snapshot`).
 */

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{OrbitError, Result};

/// A live shadow copy of one volume, plus the translation needed to read
/// a source path through it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub source_volume: String,
    pub shadow_device_path: String,
}

impl Snapshot {
    /// Rewrite `path` (on `source_volume`) to the equivalent path under the
    /// shadow device, so the copier reads a frozen view instead of the live
    /// volume.
    pub fn translate_path(&self, path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let volume_prefix = format!("{}\\", self.source_volume.trim_end_matches('\\'));
        if let Some(remainder) = path_str.strip_prefix(&volume_prefix) {
            PathBuf::from(format!("{}\\{}", self.shadow_device_path, remainder))
        } else {
            tracing::warn!(
                path = %path.display(),
                volume = %self.source_volume,
                "snapshot: path does not start with the snapshotted volume, leaving untranslated"
            );
            path.to_path_buf()
        }
    }
}

/// Component E's contract: create, translate through, and release a
/// snapshot for the duration of one profile's run.
pub trait SnapshotManager: Send + Sync {
    fn is_supported(&self) -> bool;
    fn create(&self, source_volume: &str) -> Result<Snapshot>;
    fn release(&self, snapshot: &Snapshot) -> Result<()>;

    /// Run `body` with a snapshot of `source_volume` in scope, guaranteeing
    /// release happens even if `body` fails (spec.md §4.E invariant: a
    /// snapshot is always released, win or lose).
    fn with_snapshot<T>(
        &self,
        source_volume: &str,
        body: impl FnOnce(&Snapshot) -> Result<T>,
    ) -> Result<T> {
        let snapshot = self.create(source_volume)?;
        let result = body(&snapshot);
        if let Err(e) = self.release(&snapshot) {
            tracing::warn!(snapshot_id = %snapshot.id, error = %e, "snapshot: release failed");
        }
        result
    }
}

/// Production manager: `vssadmin create shadow /for:<volume>` and
/// `vssadmin delete shadows /shadow=<id>`.
pub struct VssSnapshotManager {
    vssadmin_binary: String,
}

impl VssSnapshotManager {
    pub fn new() -> Self {
        Self {
            vssadmin_binary: "vssadmin".to_string(),
        }
    }

    #[cfg(test)]
    fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            vssadmin_binary: binary.into(),
        }
    }
}

impl Default for VssSnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `vssadmin create shadow` output for the shadow copy ID and device
/// object path. Tolerant of localized/reordered label text: looks for the
/// `{...}` GUID and the `\\?\GLOBALROOT\...` device path wherever they
/// appear.
fn parse_create_output(text: &str) -> Option<(String, String)> {
    let id = text
        .lines()
        .find_map(|line| {
            let start = line.find('{')?;
            let end = line[start..].find('}')? + start + 1;
            Some(line[start..end].to_string())
        })?;

    let device_path = text
        .lines()
        .find_map(|line| {
            let idx = line.find("\\\\?\\")?;
            Some(line[idx..].trim().to_string())
        })?;

    Some((id, device_path))
}

impl SnapshotManager for VssSnapshotManager {
    fn is_supported(&self) -> bool {
        cfg!(windows)
    }

    fn create(&self, source_volume: &str) -> Result<Snapshot> {
        if !self.is_supported() {
            return Err(OrbitError::SnapshotUnavailable(
                "volume shadow copy is only available on Windows".into(),
            ));
        }

        let output = Command::new(&self.vssadmin_binary)
            .arg("create")
            .arg("shadow")
            .arg(format!("/for:{}", source_volume))
            .output()
            .map_err(|e| OrbitError::SnapshotUnavailable(format!("failed to invoke vssadmin: {}", e)))?;

        if !output.status.success() {
            return Err(OrbitError::SnapshotUnavailable(format!(
                "vssadmin create shadow exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let (id, shadow_device_path) = parse_create_output(&text).ok_or_else(|| {
            OrbitError::SnapshotUnavailable(
                "could not find shadow copy ID/device path in vssadmin output".into(),
            )
        })?;

        Ok(Snapshot {
            id,
            source_volume: source_volume.to_string(),
            shadow_device_path,
        })
    }

    fn release(&self, snapshot: &Snapshot) -> Result<()> {
        let output = Command::new(&self.vssadmin_binary)
            .arg("delete")
            .arg("shadows")
            .arg(format!("/shadow={}", snapshot.id))
            .arg("/quiet")
            .output()
            .map_err(|e| OrbitError::SnapshotReleaseFailed(format!("failed to invoke vssadmin: {}", e)))?;

        if !output.status.success() {
            return Err(OrbitError::SnapshotReleaseFailed(format!(
                "vssadmin delete shadows exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }
}

/// Used when a profile doesn't request a snapshot, or on a platform where
/// VSS makes no sense. `create` always fails; callers gate on
/// `is_supported`/`Profile::want_snapshot` before calling it.
pub struct NullSnapshotManager;

impl SnapshotManager for NullSnapshotManager {
    fn is_supported(&self) -> bool {
        false
    }

    fn create(&self, _source_volume: &str) -> Result<Snapshot> {
        Err(OrbitError::SnapshotUnavailable(
            "snapshots are disabled for this run".into(),
        ))
    }

    fn release(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}
