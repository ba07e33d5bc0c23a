// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named, reference-counted shared-memory region.
// Delegates to platform::PlatformShm (POSIX or Windows).

use std::io;

use crate::error::{err, IpcErrorKind};
use crate::platform::PlatformShm;

/// Open mode for shared memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively — fail if already exists.
    Create,
    /// Open existing — fail if it does not exist.
    Open,
    /// Create if missing, open if it already exists.
    CreateOrOpen,
}

/// A named, inter-process shared memory region.
///
/// The mapped region carries a trailing reference counter shared between
/// every process that maps the same segment: at most one mapped view per
/// process holds the name key, the region exists as long as the refcount is
/// positive in any live process, and the name is cleared from the OS
/// namespace only after the decrement that brings it to zero.
pub struct ShmObject {
    inner: PlatformShm,
    released: bool,
}

impl ShmObject {
    /// Acquire a named shared memory region of `size` bytes (user-visible).
    ///
    /// Creates the region if absent (`mode != Open`), else attaches to the
    /// existing one. Attaching increments the region's refcount atomically.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode) -> io::Result<Self> {
        #[cfg(unix)]
        let platform_mode = match mode {
            ShmOpenMode::Create => crate::platform::posix::ShmMode::Create,
            ShmOpenMode::Open => crate::platform::posix::ShmMode::Open,
            ShmOpenMode::CreateOrOpen => crate::platform::posix::ShmMode::CreateOrOpen,
        };
        #[cfg(windows)]
        let platform_mode = match mode {
            ShmOpenMode::Create => crate::platform::windows::ShmMode::Create,
            ShmOpenMode::Open => crate::platform::windows::ShmMode::Open,
            ShmOpenMode::CreateOrOpen => crate::platform::windows::ShmMode::CreateOrOpen,
        };

        let inner = PlatformShm::acquire(name, size, platform_mode).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound || e.kind() == io::ErrorKind::AlreadyExists {
                e
            } else {
                err(IpcErrorKind::ShmUnavailable)
            }
        })?;
        Ok(Self {
            inner,
            released: false,
        })
    }

    /// Acquire, then verify the mapped object's user size matches `size`
    /// exactly. Use when two differently-sized channels must not share a
    /// name (mismatched slot size / alignment).
    pub fn acquire_checked(name: &str, size: usize, mode: ShmOpenMode) -> io::Result<Self> {
        let shm = Self::acquire(name, size, mode)?;
        if shm.user_size() != size {
            return Err(err(IpcErrorKind::SizeMismatch));
        }
        Ok(shm)
    }

    /// Pointer to the start of the user-visible shared memory region.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    /// Mutable pointer to the start of the user-visible shared memory region.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Mutable pointer to the user-visible region (alias for `as_mut_ptr`).
    pub fn get(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Total mapped size (including the trailing ref counter).
    pub fn mapped_size(&self) -> usize {
        self.inner.mapped_size()
    }

    /// User-requested size (the usable portion).
    pub fn user_size(&self) -> usize {
        self.inner.user_size()
    }

    /// The platform name used to open the segment.
    #[cfg(unix)]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Current reference count (number of processes/handles mapping this segment).
    pub fn ref_count(&self) -> i32 {
        self.inner.ref_count()
    }

    /// Decrement the refcount and return the value after the decrement.
    ///
    /// When the result is 0, this handle unmaps and unlinks the OS name.
    /// The race of two processes reaching 0 simultaneously resolves the same
    /// way: only the decrement that produces 0 unlinks. A second call
    /// (including the implicit one in `Drop`) is a no-op and returns the
    /// current refcount.
    pub fn release(&mut self) -> i32 {
        if self.released {
            return self.ref_count();
        }
        self.released = true;
        self.inner.release()
    }

    /// Force-remove the backing file / kernel object. Mapped views already
    /// attached remain valid until they detach.
    pub fn unlink(&self) {
        self.inner.unlink();
    }

    /// Remove a named shm segment by name without needing an open handle.
    /// Administrative cleanup after crashes.
    pub fn clear_storage(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}

impl Drop for ShmObject {
    fn drop(&mut self) {
        self.release();
    }
}
