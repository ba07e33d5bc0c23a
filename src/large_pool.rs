// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Generalises chunk_storage.rs's single-size chunk pool into a
// multi-size-class `LargeMsgPool`. Payloads above `config::LARGE_LIMIT`
// go here instead of being fragmented across ring slots; only a 4-byte
// `storage_id` plus a size-class tag travel through the ring.
//
// Differs from the original chunk pool in one deliberate way: the
// freelist is guarded by a `RobustMutex`, not a spin-lock, so a process
// that crashes mid-allocation doesn't wedge the pool for everyone else —
// the next `acquire` recovers it instead of spinning forever.
//
// Shared-memory layout for one size class:
//
//   [ ChunkInfo header ]
//   [ class_size bytes ] × MAX_COUNT

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config;
use crate::error::{err, IpcErrorKind};
use crate::mutex::RobustMutex;
use crate::shm::{ShmObject, ShmOpenMode};

/// Maximum slots per size class.
pub const MAX_COUNT: usize = config::LARGE_CACHE;

/// Multipliers of `config::LARGE_ALIGN` defining the pool's size classes,
/// smallest first. A payload picks the smallest class it fits in, and
/// falls back to the next larger class when that one is exhausted. The
/// largest class (128 * LARGE_ALIGN = 128 KiB) must stay comfortably above
/// a 100 KiB payload so the documented large-message round trip doesn't
/// bottom out against `PayloadTooLarge`.
const CLASS_MULTIPLIERS: [usize; 5] = [1, 4, 16, 64, 128];

/// Bytes consumed by the per-chunk connection bitmask at the start of a chunk.
const CHUNK_HEADER: usize = std::mem::size_of::<u32>();

/// A `storage_id` value; -1 means "invalid / not allocated".
pub type StorageId = i32;

/// Header stored at the start of each size class's shm segment.
#[repr(C)]
struct ChunkInfo {
    cursor: AtomicU32,
    next: [AtomicU32; MAX_COUNT],
    constructed: std::sync::atomic::AtomicBool,
}

impl ChunkInfo {
    const fn shm_size(class_size: usize) -> usize {
        std::mem::size_of::<ChunkInfo>() + MAX_COUNT * class_size
    }

    fn ensure_init(&self) {
        if !self.constructed.load(Ordering::Acquire) {
            for i in 0..MAX_COUNT {
                let nxt = if i + 1 == MAX_COUNT {
                    MAX_COUNT as u32
                } else {
                    (i + 1) as u32
                };
                self.next[i].store(nxt, Ordering::Relaxed);
            }
            self.cursor.store(0, Ordering::Relaxed);
            self.constructed.store(true, Ordering::Release);
        }
    }

    fn acquire(&self) -> StorageId {
        let cur = self.cursor.load(Ordering::Relaxed);
        if cur as usize >= MAX_COUNT {
            return -1;
        }
        let id = cur as StorageId;
        let next = self.next[id as usize].load(Ordering::Relaxed);
        self.cursor.store(next, Ordering::Relaxed);
        id
    }

    fn release(&self, id: StorageId) {
        if id < 0 || id as usize >= MAX_COUNT {
            return;
        }
        let cur = self.cursor.load(Ordering::Relaxed);
        self.next[id as usize].store(cur, Ordering::Relaxed);
        self.cursor.store(id as u32, Ordering::Relaxed);
    }
}

/// Round `payload_size` up to the next multiple of `config::LARGE_ALIGN`,
/// then add the per-chunk connection-bitmask header.
fn calc_chunk_size(payload_size: usize) -> usize {
    let align = config::LARGE_ALIGN;
    let aligned = ((payload_size + align - 1) / align) * align;
    let total = CHUNK_HEADER + aligned;
    let word = std::mem::align_of::<u128>();
    (total + word - 1) / word * word
}

struct SizeClass {
    class_size: usize,
    shm: ShmObject,
    freelist_lock: RobustMutex,
}

/// Cross-process pool of size-classed chunks for large-message payloads.
///
/// Each size class is its own named shared memory segment with its own
/// freelist and freelist mutex; `acquire` walks classes from smallest
/// (that still fits `payload_len`) to largest until one has a free slot.
pub struct LargeMsgPool {
    prefix: String,
    classes: Vec<SizeClass>,
}

impl LargeMsgPool {
    /// Open (or create) every size class's backing shared memory.
    pub fn open(prefix: &str) -> io::Result<Self> {
        let mut classes = Vec::with_capacity(CLASS_MULTIPLIERS.len());
        for &mult in CLASS_MULTIPLIERS.iter() {
            let class_size = calc_chunk_size(mult * config::LARGE_ALIGN);
            let name = format!("{prefix}CH_CONN__{class_size}");
            let shm = ShmObject::acquire(&name, ChunkInfo::shm_size(class_size), ShmOpenMode::CreateOrOpen)?;
            let lock = RobustMutex::open(&format!("{prefix}CH_LOCK__{class_size}"))?;
            let info = unsafe { &*(shm.as_ptr() as *const ChunkInfo) };
            lock.lock()?;
            info.ensure_init();
            lock.unlock()?;
            classes.push(SizeClass {
                class_size,
                shm,
                freelist_lock: lock,
            });
        }
        Ok(Self {
            prefix: prefix.to_string(),
            classes,
        })
    }

    /// Acquire a free slot able to hold `payload_len` bytes, stamping
    /// `conns` (the broadcast reader bitmask) into its header.
    ///
    /// Returns `(class_index, storage_id, payload_ptr)`. Falls back to the
    /// next larger class when the best-fit one is exhausted; fails with
    /// `PoolExhausted` once every class able to hold the payload is full.
    pub fn acquire(&self, payload_len: usize, conns: u32) -> io::Result<(usize, StorageId, *mut u8)> {
        let start = self
            .classes
            .iter()
            .position(|c| c.class_size >= payload_len + CHUNK_HEADER)
            .ok_or_else(|| err(IpcErrorKind::PayloadTooLarge))?;

        for idx in start..self.classes.len() {
            let class = &self.classes[idx];
            let info = unsafe { &*(class.shm.as_ptr() as *const ChunkInfo) };
            class.freelist_lock.lock()?;
            let id = info.acquire();
            class.freelist_lock.unlock()?;
            if id < 0 {
                continue;
            }
            let base = class.shm.as_mut_ptr();
            let conns_ptr = unsafe { chunk_conns_ptr(base, class.class_size, id) };
            unsafe { (*conns_ptr).store(conns, Ordering::Relaxed) };
            let payload_ptr = chunk_payload_ptr(base, class.class_size, id);
            return Ok((idx, id, payload_ptr));
        }
        Err(err(IpcErrorKind::PoolExhausted))
    }

    /// Pointer to the payload of `id` within size class `class_idx`.
    pub fn find(&self, class_idx: usize, id: StorageId) -> Option<*mut u8> {
        let class = self.classes.get(class_idx)?;
        if id < 0 || id as usize >= MAX_COUNT {
            return None;
        }
        Some(chunk_payload_ptr(class.shm.as_mut_ptr(), class.class_size, id))
    }

    /// Usable payload capacity of size class `class_idx`, in bytes.
    pub fn payload_capacity(&self, class_idx: usize) -> usize {
        self.classes
            .get(class_idx)
            .map(|c| c.class_size - CHUNK_HEADER)
            .unwrap_or(0)
    }

    /// Clear `conn_id`'s reader bit from the chunk's bitmask; when the
    /// bitmask reaches zero (last broadcast reader), return the slot to
    /// its size class's freelist. Used by the broadcast transport path.
    pub fn recycle(&self, class_idx: usize, id: StorageId, conn_id: u32) -> io::Result<()> {
        let Some(class) = self.classes.get(class_idx) else {
            return Ok(());
        };
        if id < 0 || id as usize >= MAX_COUNT {
            return Ok(());
        }
        let base = class.shm.as_mut_ptr();
        let conns_ptr = unsafe { chunk_conns_ptr(base, class.class_size, id) };
        let conns = unsafe { &*conns_ptr };

        let mut k = 0u32;
        let last = loop {
            let cur = conns.load(Ordering::Acquire);
            let nxt = cur & !conn_id;
            if conns
                .compare_exchange_weak(cur, nxt, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break nxt == 0;
            }
            crate::spin_lock::adaptive_yield_pub(&mut k);
        };

        if last {
            self.release(class_idx, id)?;
        }
        Ok(())
    }

    /// Unconditionally return a slot to its size class's freelist, for
    /// single-owner (unicast) consumption where there is no bitmask to
    /// drain first — distinct from [`LargeMsgPool::recycle`]'s
    /// refcounted broadcast teardown.
    pub fn release(&self, class_idx: usize, id: StorageId) -> io::Result<()> {
        let Some(class) = self.classes.get(class_idx) else {
            return Ok(());
        };
        let info = unsafe { &*(class.shm.as_ptr() as *const ChunkInfo) };
        class.freelist_lock.lock()?;
        info.release(id);
        class.freelist_lock.unlock()?;
        Ok(())
    }

    /// Remove every size class's backing shared memory for `prefix`.
    pub fn clear_storage(prefix: &str) {
        for &mult in CLASS_MULTIPLIERS.iter() {
            let class_size = calc_chunk_size(mult * config::LARGE_ALIGN);
            ShmObject::clear_storage(&format!("{prefix}CH_CONN__{class_size}"));
            RobustMutex::clear_storage(&format!("{prefix}CH_LOCK__{class_size}"));
        }
    }

    /// The name prefix this pool was opened with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

unsafe fn chunk_conns_ptr(base: *mut u8, class_size: usize, id: StorageId) -> *mut AtomicU32 {
    let chunks_base = base.add(std::mem::size_of::<ChunkInfo>());
    chunks_base.add(class_size * id as usize) as *mut AtomicU32
}

fn chunk_payload_ptr(base: *mut u8, class_size: usize, id: StorageId) -> *mut u8 {
    unsafe {
        let chunks_base = base.add(std::mem::size_of::<ChunkInfo>());
        chunks_base.add(class_size * id as usize).add(CHUNK_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_header_plus_aligned_payload() {
        let sz = calc_chunk_size(config::LARGE_ALIGN);
        assert!(sz >= config::LARGE_ALIGN + CHUNK_HEADER);
        assert_eq!(sz % std::mem::align_of::<u128>(), 0);
    }
}
