//! Optimistic-concurrency contract for appends to an event stream.

use serde::{Deserialize, Serialize};

/// Expected stream version when appending events.
///
/// Writers operate under single-writer-per-aggregate semantics; the expected
/// version is the guard that turns a violated assumption into a conflict
/// instead of a silently interleaved stream.
///
/// - `Any`: append regardless of the current version (the publish path).
/// - `Exact(n)`: append only if the stream's latest version is exactly `n`
///   (`0` means the stream must not exist yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    /// Does the current stream version satisfy this expectation?
    pub fn matches(&self, current: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(expected) => *expected == current,
        }
    }
}
