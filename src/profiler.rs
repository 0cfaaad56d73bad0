/*!
 * Profiler (spec.md §4.A)
 *
 * Measures a directory's total size, file count, and directory count by
 * invoking the external copier in list-only mode. A profile failure must
 * never propagate: callers see a zero-valued `DirectoryProfile` and treat
 * "zero size, zero files" as "unmeasurable and out of scope."
 */

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::units::parse_size_token;

/// A's output: the measured shape of one directory (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryProfile {
    pub canonical_path: String,
    pub total_size_bytes: i64,
    pub file_count: u64,
    pub dir_count: u64,
    pub average_file_size: f64,
    pub last_scanned: SystemTime,
}

impl DirectoryProfile {
    fn zero(canonical_path: String) -> Self {
        Self {
            canonical_path,
            total_size_bytes: 0,
            file_count: 0,
            dir_count: 0,
            average_file_size: 0.0,
            last_scanned: SystemTime::now(),
        }
    }
}

struct CacheEntry {
    profile: DirectoryProfile,
    cached_at: SystemTime,
}

/// Process-wide, thread-safe directory-profile cache with a default 24h TTL.
pub struct Profiler {
    copier_binary: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
    default_max_age: Duration,
}

impl Profiler {
    pub fn new(copier_binary: impl Into<String>) -> Self {
        Self {
            copier_binary: copier_binary.into(),
            cache: Mutex::new(HashMap::new()),
            default_max_age: Duration::from_secs(24 * 3600),
        }
    }

    /// Normalize a path to its cache key: lowercase (host case-insensitivity
    /// is assumed, matching the copier's own Windows-path semantics),
    /// trailing separators stripped.
    pub fn cache_key(path: &Path) -> String {
        let s = path.to_string_lossy().to_string();
        let trimmed = s.trim_end_matches(['\\', '/']);
        trimmed.to_lowercase()
    }

    pub fn profile(&self, path: &Path, use_cache: bool, max_age: Option<Duration>) -> DirectoryProfile {
        let key = Self::cache_key(path);
        let max_age = max_age.unwrap_or(self.default_max_age);

        if use_cache {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&key) {
                if entry.cached_at.elapsed().unwrap_or(Duration::MAX) <= max_age {
                    return entry.profile.clone();
                }
                cache.remove(&key);
            }
        }

        let profile = self.compute(path, &key);

        if use_cache {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(
                key,
                CacheEntry {
                    profile: profile.clone(),
                    cached_at: SystemTime::now(),
                },
            );
        }

        profile
    }

    fn compute(&self, path: &Path, key: &str) -> DirectoryProfile {
        let output = Command::new(&self.copier_binary)
            .arg(path)
            .arg("/L")
            .arg("/NJH")
            .arg("/NJS")
            .arg("/BYTES")
            .arg("/R:0")
            .arg("/W:0")
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "profiler: failed to invoke copier");
                return DirectoryProfile::zero(key.to_string());
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        let (total_size, file_count, dir_count) = parse_listing_output(&text);

        let average_file_size = if file_count > 0 {
            total_size as f64 / file_count as f64
        } else {
            0.0
        };

        DirectoryProfile {
            canonical_path: key.to_string(),
            total_size_bytes: total_size,
            file_count,
            dir_count,
            average_file_size,
            last_scanned: SystemTime::now(),
        }
    }
}

/// Parse the copier's list-only-mode output: lines matching
/// `<leading spaces><bytes><whitespace><path>`. A trailing path separator
/// marks a directory (contributes only to `dir_count`); anything else is a
/// file (contributes its byte count to the total and increments
/// `file_count`). Unrecognized lines are silently skipped.
pub fn parse_listing_output(text: &str) -> (i64, u64, u64) {
    let mut total_size: i64 = 0;
    let mut file_count: u64 = 0;
    let mut dir_count: u64 = 0;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }

        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let size_token = match parts.next() {
            Some(t) => t,
            None => continue,
        };
        let rest = match parts.next() {
            Some(r) => r.trim_start(),
            None => continue,
        };

        let size = match parse_size_token(size_token) {
            Some(s) => s,
            None => continue,
        };

        if rest.ends_with(['\\', '/']) {
            dir_count += 1;
        } else if !rest.is_empty() {
            file_count += 1;
            total_size += size;
        }
    }

    (total_size, file_count, dir_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_files_and_directories() {
        let text = "\
        1024    C:\\Data\\a.txt
           0    C:\\Data\\Sub\\
        2048    C:\\Data\\b.txt
";
        let (size, files, dirs) = parse_listing_output(text);
        assert_eq!(size, 3072);
        assert_eq!(files, 2);
        assert_eq!(dirs, 1);
    }

    #[test]
    fn ignores_unparseable_lines() {
        let text = "---------------\n   Total    Copied\nnonsense line here\n";
        let (size, files, dirs) = parse_listing_output(text);
        assert_eq!(size, 0);
        assert_eq!(files, 0);
        assert_eq!(dirs, 0);
    }

    #[test]
    fn empty_source_yields_zero_profile() {
        let (size, files, dirs) = parse_listing_output("");
        assert_eq!((size, files, dirs), (0, 0, 0));
    }

    #[test]
    fn scaled_size_units_are_applied() {
        let text = "   1.5k    C:\\Data\\big.bin\n";
        let (size, files, _) = parse_listing_output(text);
        assert_eq!(size, 1536);
        assert_eq!(files, 1);
    }

    #[test]
    fn cache_key_is_lowercased_and_separator_stripped() {
        assert_eq!(
            Profiler::cache_key(Path::new("C:\\Data\\Sub\\")),
            "c:\\data\\sub"
        );
    }

    #[test]
    fn profiler_with_missing_binary_returns_zero_profile_not_panic() {
        let profiler = Profiler::new("definitely-not-a-real-copier-binary-xyz");
        let profile = profiler.profile(Path::new("C:\\Data"), false, None);
        assert_eq!(profile.total_size_bytes, 0);
        assert_eq!(profile.file_count, 0);
        assert_eq!(profile.dir_count, 0);
    }

    #[test]
    fn cache_hit_within_ttl_returns_identical_totals() {
        let profiler = Profiler::new("definitely-not-a-real-copier-binary-xyz");
        let path = Path::new("C:\\Data");
        let first = profiler.profile(path, true, Some(Duration::from_secs(3600)));
        let second = profiler.profile(path, true, Some(Duration::from_secs(3600)));
        assert_eq!(first.total_size_bytes, second.total_size_bytes);
        assert_eq!(first.file_count, second.file_count);
        assert_eq!(first.dir_count, second.dir_count);
    }
}
