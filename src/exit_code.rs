/*!
 * Exit-code Interpreter (spec.md §4.F)
 *
 * The copier encodes its outcome as a 5-bit flag word. This module is a
 * pure function of that integer plus the profile's mismatch-severity
 * policy — no I/O, no state, fully covered by scenario 3 in spec.md §8.
 */

use crate::config::MismatchPolicy;

const BIT_FILES_COPIED: i32 = 1;
const BIT_EXTRAS: i32 = 2;
const BIT_MISMATCH: i32 = 4;
const BIT_FAILED: i32 = 8;
const BIT_FATAL: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
    Fatal,
}

/// The interpreter's full classification of one exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCodeResult {
    pub exit_code: i32,
    pub severity: Severity,
    pub retryable: bool,
    pub human_message: String,
    pub files_copied: bool,
    pub extras: bool,
    pub mismatches: bool,
    pub failed: bool,
    pub fatal: bool,
}

/// Classify a copier exit code, worst-first, per spec.md §4.F.
pub fn interpret(exit_code: i32, policy: MismatchPolicy) -> ExitCodeResult {
    let files_copied = exit_code & BIT_FILES_COPIED != 0;
    let extras = exit_code & BIT_EXTRAS != 0;
    let mismatches = exit_code & BIT_MISMATCH != 0;
    let failed = exit_code & BIT_FAILED != 0;
    let fatal = exit_code & BIT_FATAL != 0;

    let (severity, retryable, human_message) = if fatal {
        (Severity::Fatal, true, "fatal copier error".to_string())
    } else if failed {
        (
            Severity::Error,
            true,
            "some files could not be copied".to_string(),
        )
    } else if mismatches {
        match policy {
            MismatchPolicy::Error => (
                Severity::Error,
                true,
                "mismatches detected (promoted to error)".to_string(),
            ),
            MismatchPolicy::Success => (
                Severity::Success,
                false,
                "mismatches detected (treated as success)".to_string(),
            ),
            MismatchPolicy::Warning => (
                Severity::Warning,
                false,
                "mismatches detected between source and destination".to_string(),
            ),
        }
    } else if extras {
        (Severity::Success, false, "extras cleaned".to_string())
    } else if files_copied {
        (Severity::Success, false, "files copied".to_string())
    } else {
        (Severity::Success, false, "no changes needed".to_string())
    };

    ExitCodeResult {
        exit_code,
        severity,
        retryable,
        human_message,
        files_copied,
        extras,
        mismatches,
        failed,
        fatal,
    }
}
