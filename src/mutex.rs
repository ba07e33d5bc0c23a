// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process mutex with bounded owner-death recovery.
// Delegates to platform::PlatformMutex (POSIX or Windows).

use std::io;
use std::time::{Duration, Instant};

use crate::error::{err, IpcErrorKind};
use crate::platform::PlatformMutex;

/// Recovery attempts `lock()` spends retrying after an owner-dead state
/// before giving up with `LockFailed`. 16 per the documented bound.
const MAX_RECOVERIES: u32 = 16;

/// A named, inter-process mutex that recovers from a crashed owner.
///
/// On POSIX this is a `pthread_mutex_t` stored in shared memory with
/// `PTHREAD_PROCESS_SHARED`, `PTHREAD_MUTEX_ROBUST` (where supported), and
/// `PTHREAD_MUTEX_ERRORCHECK` attributes, so a dead owner surfaces as
/// `EOWNERDEAD` and an unlock by a non-owner surfaces as `EPERM`.
/// On Windows this is a kernel named mutex via `CreateMutex`, whose
/// `WAIT_ABANDONED` plays the same role as `EOWNERDEAD`.
pub struct RobustMutex {
    inner: PlatformMutex,
}

impl RobustMutex {
    /// Open (or create) a named inter-process mutex.
    pub fn open(name: &str) -> io::Result<Self> {
        let inner = PlatformMutex::open(name)?;
        Ok(Self { inner })
    }

    /// Lock the mutex (blocking). Recovers from an owner-dead state up to
    /// [`MAX_RECOVERIES`] times before giving up with `LockFailed`.
    ///
    /// The platform layer already performs one recovery attempt internally
    /// on `EOWNERDEAD`; this loop only matters if the lock keeps flipping
    /// to owner-dead across successive acquisitions (a pathological
    /// crash-loop among peers), which is the scenario the bound guards.
    pub fn lock(&self) -> io::Result<()> {
        for _ in 0..MAX_RECOVERIES {
            match self.inner.lock() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if is_owner_dead(&e) {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(err(IpcErrorKind::LockFailed))
    }

    /// Non-blocking lock attempt. Same recovery rule as `lock`.
    pub fn try_lock(&self) -> io::Result<bool> {
        for _ in 0..MAX_RECOVERIES {
            match self.inner.try_lock() {
                Ok(acquired) => return Ok(acquired),
                Err(e) => {
                    if is_owner_dead(&e) {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(err(IpcErrorKind::LockFailed))
    }

    /// Lock with a monotonic timeout. Owner-dead recovery does not restart
    /// the deadline — only the elapsed wait counts against `duration`.
    pub fn try_lock_for(&self, duration: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + duration;
        let mut recoveries = 0u32;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let remaining = deadline - now;
            #[cfg(unix)]
            {
                match self.inner.lock_timeout(remaining.as_millis() as u64) {
                    Ok(acquired) => return Ok(acquired),
                    Err(e) => {
                        if is_owner_dead(&e) {
                            recoveries += 1;
                            if recoveries >= MAX_RECOVERIES {
                                return Err(err(IpcErrorKind::LockFailed));
                            }
                            continue;
                        }
                        return Err(e);
                    }
                }
            }
            #[cfg(windows)]
            {
                // Windows named mutexes have no separate timed-lock path;
                // poll try_lock within the remaining budget.
                if self.try_lock()? {
                    return Ok(true);
                }
                std::thread::sleep(std::cmp::min(remaining, Duration::from_millis(1)));
            }
        }
    }

    /// Unlock the mutex. Fails with `NotOwner` if the caller does not
    /// currently hold the lock.
    pub fn unlock(&self) -> io::Result<()> {
        self.inner.unlock().map_err(|e| {
            if e.raw_os_error() == Some(libc_eperm()) {
                err(IpcErrorKind::NotOwner)
            } else {
                e
            }
        })
    }

    /// Remove the backing storage for a named mutex (static helper).
    pub fn clear_storage(name: &str) {
        PlatformMutex::clear_storage(name);
    }

    pub(crate) fn native_ptr(&self) -> *mut u8 {
        #[cfg(unix)]
        {
            self.inner.native_ptr()
        }
        #[cfg(windows)]
        {
            std::ptr::null_mut()
        }
    }
}

#[cfg(unix)]
fn is_owner_dead(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EOWNERDEAD)
}

#[cfg(windows)]
fn is_owner_dead(_e: &io::Error) -> bool {
    // WAIT_ABANDONED is already absorbed into a successful lock() by the
    // platform layer, so by the time it reaches here it is a genuine error.
    false
}

#[cfg(unix)]
fn libc_eperm() -> i32 {
    libc::EPERM
}

#[cfg(windows)]
fn libc_eperm() -> i32 {
    // No EPERM-equivalent surfaces from ReleaseMutex on a non-owned handle;
    // Windows returns a generic failure which PlatformMutex::unlock already
    // turns into `io::Error::last_os_error()`.
    -1
}
