//! The kernel-wide error type returned by fallible core APIs.

use core::fmt;

/// Errors produced by the trap-and-task substrate.
///
/// Every fallible operation in `vm`, `task` and `trap` returns
/// `crate::prelude::Result<T> = Result<T, Error>` rather than panicking,
/// except for the handful of conditions documented in SPEC_FULL.md §7 that
/// are always fatal (double fault, exception-stack overflow, illegal
/// programmer usage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No physical frames, or no heap memory, remained to satisfy a request.
    NoMemory,
    /// An argument violated a documented precondition.
    InvalidArgs,
    /// A resource-constrained structure (e.g. the ready queue) has no more
    /// capacity.
    NotEnoughResources,
    /// A virtual page was already mapped and the caller did not ask to
    /// replace it.
    AlreadyMapped,
    /// The scheduler's ready queue is full.
    ReadyQueueFull,
    /// An operation was refused (e.g. installing an override on a critical
    /// exception vector).
    Refused,
    /// The requested object does not exist.
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoMemory => "out of memory",
            Error::InvalidArgs => "invalid arguments",
            Error::NotEnoughResources => "not enough resources",
            Error::AlreadyMapped => "page already mapped",
            Error::ReadyQueueFull => "ready queue full",
            Error::Refused => "operation refused",
            Error::NotFound => "not found",
        };
        write!(f, "{}", msg)
    }
}
