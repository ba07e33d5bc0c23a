// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process condition variable.
// POSIX: pthread_cond_t in shared memory with PTHREAD_PROCESS_SHARED.
// Windows: named semaphore + RobustMutex + a waiter counter kept in a small
// shared-memory region, so the counter itself is visible cross-process
// (CONDITION_VARIABLE has no cross-process story on Windows).

use std::io;

use crate::mutex::RobustMutex;

/// A named, inter-process condition variable, always paired with a
/// [`RobustMutex`] the caller must hold across `wait`.
pub struct CondVar {
    #[cfg(unix)]
    inner: PosixCondition,
    #[cfg(windows)]
    inner: WindowsCondition,
}

impl CondVar {
    /// Open (or create) a named condition variable.
    pub fn open(name: &str) -> io::Result<Self> {
        #[cfg(unix)]
        let inner = PosixCondition::open(name)?;
        #[cfg(windows)]
        let inner = WindowsCondition::open(name)?;
        Ok(Self { inner })
    }

    /// Wait on the condition variable. The caller must hold `mtx` locked.
    /// The mutex is atomically released and re-acquired around the wait.
    /// If `timeout_ms` is `None`, blocks indefinitely.
    /// Returns `Ok(true)` if signalled, `Ok(false)` on timeout.
    pub fn wait(&self, mtx: &RobustMutex, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait(mtx, timeout_ms)
    }

    /// Wake one waiter.
    pub fn notify(&self) -> io::Result<()> {
        self.inner.notify()
    }

    /// Wake all waiters.
    pub fn broadcast(&self) -> io::Result<()> {
        self.inner.broadcast()
    }

    /// Remove the backing storage for a named condition variable.
    pub fn clear_storage(name: &str) {
        #[cfg(unix)]
        PosixCondition::clear_storage(name);
        #[cfg(windows)]
        WindowsCondition::clear_storage(name);
    }
}

// ---------------------------------------------------------------------------
// POSIX implementation — pthread_cond_t in shared memory
// ---------------------------------------------------------------------------

#[cfg(unix)]
use std::sync::Arc;

#[cfg(unix)]
use crate::platform::posix::{self, CachedShm};

#[cfg(unix)]
struct PosixCondition {
    cached: Arc<CachedShm>,
    name: String,
}

#[cfg(unix)]
impl PosixCondition {
    fn open(name: &str) -> io::Result<Self> {
        let shm_size = std::mem::size_of::<libc::pthread_cond_t>();
        let cached = posix::cached_shm_acquire(posix::cond_cache(), name, shm_size, |base| {
            let cond_ptr = base as *mut libc::pthread_cond_t;
            unsafe {
                std::ptr::write_bytes(cond_ptr, 0, 1);

                let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
                let mut eno = libc::pthread_condattr_init(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }

                eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                if eno != 0 {
                    libc::pthread_condattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(eno));
                }

                eno = libc::pthread_cond_init(cond_ptr, &attr);
                libc::pthread_condattr_destroy(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        self.cached.shm.as_mut_ptr() as *mut libc::pthread_cond_t
    }

    fn wait(&self, mtx: &RobustMutex, timeout_ms: Option<u64>) -> io::Result<bool> {
        let mtx_ptr = mtx.native_ptr() as *mut libc::pthread_mutex_t;

        match timeout_ms {
            None => {
                let eno = unsafe { libc::pthread_cond_wait(self.cond_ptr(), mtx_ptr) };
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
                Ok(true)
            }
            Some(ms) => {
                use std::time::{SystemTime, UNIX_EPOCH};
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let deadline = now + std::time::Duration::from_millis(ms);
                let ts = libc::timespec {
                    tv_sec: deadline.as_secs() as libc::time_t,
                    tv_nsec: deadline.subsec_nanos() as libc::c_long,
                };
                let eno = unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), mtx_ptr, &ts) };
                if eno == 0 {
                    return Ok(true);
                }
                if eno == libc::ETIMEDOUT {
                    return Ok(false);
                }
                Err(io::Error::from_raw_os_error(eno))
            }
        }
    }

    fn notify(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_signal(self.cond_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    fn broadcast(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_broadcast(self.cond_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    fn clear_storage(name: &str) {
        posix::cached_shm_purge(posix::cond_cache(), name);
        posix::PlatformShm::unlink_by_name(name);
    }
}

#[cfg(unix)]
impl Drop for PosixCondition {
    fn drop(&mut self) {
        // Don't call pthread_cond_destroy here. On macOS, the virtual
        // address may be recycled to a different shm segment after munmap,
        // and destroy would zero the __sig field of whatever condition now
        // lives at that address. The shm munmap + unlink in
        // PlatformShm::Drop is sufficient to reclaim the memory.
        posix::cached_shm_release(posix::cond_cache(), &self.name);
    }
}

// ---------------------------------------------------------------------------
// Windows implementation — named semaphore + RobustMutex + shared counter
// ---------------------------------------------------------------------------

#[cfg(windows)]
struct WindowsCondition {
    sem: windows_sys::Win32::Foundation::HANDLE,
    lock: RobustMutex,
    counter_shm: crate::platform::windows::PlatformShm,
}

#[cfg(windows)]
impl WindowsCondition {
    fn counter(&self) -> &std::sync::atomic::AtomicI32 {
        unsafe { &*(self.counter_shm.as_ptr() as *const std::sync::atomic::AtomicI32) }
    }

    fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::System::Threading::CreateSemaphoreW;
        use std::ptr;

        let wide: Vec<u16> = format!("{name}_COND_SEM_")
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let sem = unsafe { CreateSemaphoreW(ptr::null(), 0, i32::MAX, wide.as_ptr()) };
        if sem == 0 {
            return Err(io::Error::last_os_error());
        }
        let lock = RobustMutex::open(&format!("{name}_COND_LOCK_"))?;
        let counter_shm = crate::platform::windows::PlatformShm::acquire(
            &format!("{name}_COND_CTR_"),
            std::mem::size_of::<std::sync::atomic::AtomicI32>(),
            crate::platform::windows::ShmMode::CreateOrOpen,
        )?;
        Ok(Self {
            sem,
            lock,
            counter_shm,
        })
    }

    fn wait(&self, mtx: &RobustMutex, timeout_ms: Option<u64>) -> io::Result<bool> {
        use std::sync::atomic::Ordering;
        use windows_sys::Win32::System::Threading::WaitForSingleObject;
        use windows_sys::Win32::Foundation::{WAIT_OBJECT_0, WAIT_TIMEOUT, INFINITE};

        {
            self.lock.lock()?;
            self.counter().fetch_add(1, Ordering::AcqRel);
            self.lock.unlock()?;
        }
        mtx.unlock()?;

        let millis = timeout_ms.map(|ms| ms as u32).unwrap_or(INFINITE);
        let ret = unsafe { WaitForSingleObject(self.sem, millis) };
        mtx.lock()?;

        match ret {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => {
                self.lock.lock()?;
                self.counter().fetch_sub(1, Ordering::AcqRel);
                self.lock.unlock()?;
                Ok(false)
            }
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn notify(&self) -> io::Result<()> {
        use std::sync::atomic::Ordering;
        use windows_sys::Win32::System::Threading::ReleaseSemaphore;

        self.lock.lock()?;
        let c = self.counter().load(Ordering::Acquire);
        if c > 0 {
            self.counter().fetch_sub(1, Ordering::AcqRel);
            unsafe { ReleaseSemaphore(self.sem, 1, std::ptr::null_mut()) };
        }
        self.lock.unlock()?;
        Ok(())
    }

    fn broadcast(&self) -> io::Result<()> {
        use std::sync::atomic::Ordering;
        use windows_sys::Win32::System::Threading::ReleaseSemaphore;

        self.lock.lock()?;
        let c = self.counter().load(Ordering::Acquire);
        if c > 0 {
            self.counter().store(0, Ordering::Release);
            unsafe { ReleaseSemaphore(self.sem, c, std::ptr::null_mut()) };
        }
        self.lock.unlock()?;
        Ok(())
    }

    fn clear_storage(name: &str) {
        crate::platform::windows::PlatformShm::unlink_by_name(&format!("{name}_COND_CTR_"));
    }
}

#[cfg(windows)]
impl Drop for WindowsCondition {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        if self.sem != 0 {
            unsafe { CloseHandle(self.sem) };
        }
    }
}
