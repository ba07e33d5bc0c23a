// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of cpp-ipc/src/libipc/waiter.h.
// Condition-variable + mutex wrapper used by the IPC channel to
// sleep/wake sender and receiver threads.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::condition::CondVar;
use crate::error::{err, IpcErrorKind};
use crate::mutex::RobustMutex;

/// A named waiter combining a condition variable, a mutex, and a quit flag.
///
/// Used internally by IPC channels to implement blocking send/recv with
/// timeout support. Mirrors `ipc::detail::waiter` from the C++ library.
pub struct Waiter {
    cond: CondVar,
    lock: RobustMutex,
    quit: AtomicBool,
}

impl Waiter {
    /// Open a named waiter. Creates the underlying condition variable and mutex
    /// with names derived from `name`.
    pub fn open(name: &str) -> io::Result<Self> {
        let cond_name = format!("{name}_WAITER_COND_");
        let lock_name = format!("{name}_WAITER_LOCK_");
        let cond = CondVar::open(&cond_name)?;
        let lock = RobustMutex::open(&lock_name)?;
        Ok(Self {
            cond,
            lock,
            quit: AtomicBool::new(false),
        })
    }

    /// Block until `pred` returns `false` or quit is signalled.
    /// Returns `false` on timeout, `true` otherwise.
    ///
    /// This is the teacher's original predicate convention: `pred` describes
    /// the blocking condition ("still full", "still empty"), the loop keeps
    /// waiting while it holds.
    pub fn wait_if<F>(&self, pred: F, timeout_ms: Option<u64>) -> io::Result<bool>
    where
        F: Fn() -> bool,
    {
        self.lock.lock()?;
        while !self.quit.load(Ordering::Relaxed) && pred() {
            match self.cond.wait(&self.lock, timeout_ms)? {
                false => {
                    self.lock.unlock()?;
                    return Ok(false); // timeout
                }
                true => {} // signalled, re-check predicate
            }
        }
        self.lock.unlock()?;
        Ok(true)
    }

    /// Block until `pred` returns `true` or quit is signalled.
    ///
    /// Acquires the lock, loops while `!quit && !pred()` calling
    /// `cond.wait`, and returns `Ok(true)` once `pred` holds. A timed-out
    /// wait surfaces as `TimedOut`; a quit signalled before `pred` becomes
    /// true surfaces as `Shutdown`.
    pub fn wait<F>(&self, pred: F, timeout_ms: Option<u64>) -> io::Result<bool>
    where
        F: Fn() -> bool,
    {
        self.lock.lock()?;
        while !self.quit.load(Ordering::Relaxed) && !pred() {
            if !self.cond.wait(&self.lock, timeout_ms)? {
                self.lock.unlock()?;
                return Err(err(IpcErrorKind::TimedOut));
            }
        }
        let quit = self.quit.load(Ordering::Relaxed);
        let satisfied = pred();
        self.lock.unlock()?;
        if quit && !satisfied {
            return Err(err(IpcErrorKind::Shutdown));
        }
        Ok(true)
    }

    /// Wake one waiter.
    pub fn notify(&self) -> io::Result<()> {
        // Barrier: briefly acquire lock to ensure waiter is in cond_wait
        self.lock.lock()?;
        self.lock.unlock()?;
        self.cond.notify()
    }

    /// Wake all waiters.
    pub fn broadcast(&self) -> io::Result<()> {
        self.lock.lock()?;
        self.lock.unlock()?;
        self.cond.broadcast()
    }

    /// Signal quit and broadcast to wake all waiters.
    pub fn quit_waiting(&self) -> io::Result<()> {
        self.lock.lock()?;
        self.quit.store(true, Ordering::Release);
        self.lock.unlock()?;
        self.broadcast()
    }

    /// Remove the backing storage for a named waiter.
    pub fn clear_storage(name: &str) {
        CondVar::clear_storage(&format!("{name}_WAITER_COND_"));
        RobustMutex::clear_storage(&format!("{name}_WAITER_LOCK_"));
    }
}
