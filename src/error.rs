/*!
 * Error types for the orchestrator core
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, OrbitError>;

#[derive(Debug)]
pub enum OrbitError {
    /// Profile failed basic invariant validation (§3 Profile invariants)
    Config(String),

    /// I/O error surfaced while touching the filesystem or a log file
    Io(io::Error),

    /// The copier process could not be spawned (OS refused, binary missing, ...)
    CopierSpawnFailed(String),

    /// The copier process ran past its per-job timeout and was killed
    CopierTimedOut,

    /// A requested snapshot could not be created
    SnapshotUnavailable(String),

    /// A snapshot could not be released (logged as warning, never fatal)
    SnapshotReleaseFailed(String),

    /// Invalid path supplied to a component
    InvalidPath(PathBuf),

    /// Generic error with message
    Other(String),
}

impl OrbitError {
    /// Error category for logging/event-sink tagging
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrbitError::Config(_) => ErrorCategory::Configuration,
            OrbitError::Io(_) => ErrorCategory::IoError,
            OrbitError::CopierSpawnFailed(_) => ErrorCategory::Spawn,
            OrbitError::CopierTimedOut => ErrorCategory::Timeout,
            OrbitError::SnapshotUnavailable(_) | OrbitError::SnapshotReleaseFailed(_) => {
                ErrorCategory::Snapshot
            }
            OrbitError::InvalidPath(_) => ErrorCategory::Validation,
            OrbitError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    IoError,
    Spawn,
    Timeout,
    Snapshot,
    Validation,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Spawn => write!(f, "spawn"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Snapshot => write!(f, "snapshot"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for OrbitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbitError::Config(msg) => write!(f, "configuration error: {}", msg),
            OrbitError::Io(err) => write!(f, "I/O error: {}", err),
            OrbitError::CopierSpawnFailed(msg) => write!(f, "failed to start copier: {}", msg),
            OrbitError::CopierTimedOut => write!(f, "copier job timed out"),
            OrbitError::SnapshotUnavailable(msg) => write!(f, "snapshot unavailable: {}", msg),
            OrbitError::SnapshotReleaseFailed(msg) => {
                write!(f, "snapshot release failed: {}", msg)
            }
            OrbitError::InvalidPath(path) => write!(f, "invalid path: {}", path.display()),
            OrbitError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for OrbitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrbitError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OrbitError {
    fn from(err: io::Error) -> Self {
        OrbitError::Io(err)
    }
}
