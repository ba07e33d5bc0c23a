// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named error kinds for the IPC core. Every public operation still returns
// `std::io::Result<T>`; this enum is the payload carried inside
// `io::Error::new(io::ErrorKind::Other, ..)` so callers can match on the
// domain meaning instead of parsing a message string.

use std::fmt;
use std::io;

/// Domain error kinds raised by the shared-memory IPC core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcErrorKind {
    /// The OS refused a named-shared-memory operation.
    ShmUnavailable,
    /// An existing shared object's size disagrees with the requested size.
    SizeMismatch,
    /// All 32 receiver bits are occupied.
    TooManyReceivers,
    /// A `RobustMutex::lock` exceeded its recovery budget.
    LockFailed,
    /// `RobustMutex::unlock` was called by a non-owner.
    NotOwner,
    /// A monotonic deadline was reached before the operation completed.
    TimedOut,
    /// `Waiter::quit_waiting` was invoked while this call was blocked.
    Shutdown,
    /// The payload exceeds the implementation's size cap.
    PayloadTooLarge,
    /// `LargeMsgPool::acquire` found no free chunk and waiting was not requested.
    PoolExhausted,
}

impl fmt::Display for IpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            IpcErrorKind::ShmUnavailable => "shared memory namespace operation refused by the OS",
            IpcErrorKind::SizeMismatch => "existing shared object size disagrees with request",
            IpcErrorKind::TooManyReceivers => "too many receivers (max 32)",
            IpcErrorKind::LockFailed => "mutex recovery budget exceeded",
            IpcErrorKind::NotOwner => "caller does not own the lock",
            IpcErrorKind::TimedOut => "deadline reached",
            IpcErrorKind::Shutdown => "quit_waiting was invoked",
            IpcErrorKind::PayloadTooLarge => "payload exceeds the implementation size cap",
            IpcErrorKind::PoolExhausted => "large-message pool exhausted",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for IpcErrorKind {}

/// Wrap an [`IpcErrorKind`] as an `io::Error` (`ErrorKind::Other`).
pub fn err(kind: IpcErrorKind) -> io::Error {
    io::Error::new(io::ErrorKind::Other, kind)
}

/// Extract the [`IpcErrorKind`] from an `io::Error`, if it carries one.
pub fn kind_of(e: &io::Error) -> Option<IpcErrorKind> {
    e.get_ref()?.downcast_ref::<IpcErrorKind>().copied()
}
