// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Crate-wide error types, per spec.md §7.

/// User-visible logical errors: the request was well-formed but violates a
/// graph-level invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalError {
    VertexAlreadyExists,
    VertexDoesNotExist,
    EdgeAlreadyExists,
    EdgeDoesNotExist,
    ReadOnlyTransaction,
    InvalidLogicalVertexId,
}

impl std::fmt::Display for LogicalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::VertexAlreadyExists => "vertex already exists",
            Self::VertexDoesNotExist => "vertex does not exist",
            Self::EdgeAlreadyExists => "edge already exists",
            Self::EdgeDoesNotExist => "edge does not exist",
            Self::ReadOnlyTransaction => "transaction is read-only",
            Self::InvalidLogicalVertexId => "invalid logical vertex identifier",
        };
        write!(f, "{msg}")
    }
}

/// Errors that can occur in the Teseo storage engine.
///
/// Per spec.md §7, `Abort`, `NotSureIfVertexExists`, `NeedsRebalance` and
/// `TooManyReaders` are local control-flow signals: a correctly behaving
/// driver loop retries on them internally and they never reach a caller of
/// the public API. They are still part of this type (rather than a private
/// one) because the segment/file/latch layers are `pub(crate)` and need a
/// single error currency to thread through `?`.
#[derive(Debug)]
pub enum Error {
    /// An optimistic reader observed a concurrent modification; retry.
    Abort,

    /// A writer could not prove the source vertex exists; retry with a wider search.
    NotSureIfVertexExists,

    /// A writer found no space in the segment; a rebalance was scheduled, retry.
    NeedsRebalance,

    /// A crawler's window was absorbed by another, concurrently racing crawler.
    RebalanceNotNecessary,

    /// The segment latch is saturated with readers; back off and retry.
    TooManyReaders,

    /// A user-visible logical error.
    Logical(LogicalError),

    /// An invariant was violated; the transaction is unrecoverable.
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "optimistic read aborted"),
            Self::NotSureIfVertexExists => write!(f, "cannot prove source vertex exists"),
            Self::NeedsRebalance => write!(f, "segment needs rebalance"),
            Self::RebalanceNotNecessary => write!(f, "rebalance window already absorbed"),
            Self::TooManyReaders => write!(f, "too many concurrent readers"),
            Self::Logical(e) => write!(f, "{e}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<LogicalError> for Error {
    fn from(value: LogicalError) -> Self {
        Self::Logical(value)
    }
}

/// Storage engine result.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a single attempt at a cooperative, retryable step.
///
/// Internal layers (segment, file, crawler) return this instead of
/// propagating `Abort`/`NotSureIfVertexExists`/`NeedsRebalance` as `Err`
/// through `?`, so that the decision to retry, back off, or request a
/// rebalance is made explicitly by the outer driver loop (spec.md §9,
/// "Coroutine-less retry loops").
pub enum StepOutcome<T> {
    /// The step completed.
    Done(T),
    /// The step observed contention; retry from scratch.
    Retry,
    /// The step needs the segment rebalanced before it can proceed.
    NeedsRebalance,
}

impl<T> StepOutcome<T> {
    #[must_use]
    pub fn done(value: T) -> Self {
        Self::Done(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn logical_error_converts_into_error() {
        let e: Error = LogicalError::VertexDoesNotExist.into();
        assert!(matches!(e, Error::Logical(LogicalError::VertexDoesNotExist)));
    }

    #[test]
    fn display_messages_are_non_empty() {
        for e in [
            Error::Abort,
            Error::NotSureIfVertexExists,
            Error::NeedsRebalance,
            Error::RebalanceNotNecessary,
            Error::TooManyReaders,
            Error::Internal("oops".into()),
        ] {
            assert!(!format!("{e}").is_empty());
        }
    }
}
