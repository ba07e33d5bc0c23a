// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of cpp-ipc/src/libipc/circ/elem_def.h + elem_array.h, generalised
// from a single hard-coded 256-slot broadcast ring into the shared
// `CircularArray<CAP>` used by every ProdConsEngine variant.
//
// The circular buffer uses a fixed-size array of CAP elements (CAP must be
// a power of two so index wrapping is a plain mask). Connection tracking
// uses a 32-bit bitmask for broadcast topologies, or a plain counter for
// unicast ones — both live in `circ::{BroadcastConnHead, UnicastConnHead}`,
// outside this struct, since only `Queue` needs them (see queue.rs).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::config;
use crate::spin_lock::SpinLock;

/// Connection ID type — a 32-bit bitmask (broadcast) or counter (unicast).
pub type ConnId = u32;

/// Truncate a u32 cursor to a ring index via mask. `cap` must be power-of-two.
#[inline]
pub const fn mask_index(cursor: u32, cap: usize) -> usize {
    (cursor as usize) & (cap - 1)
}

/// Bitmask for the connection bits in a slot's 64-bit `rc` field (low 32 bits).
pub const EP_MASK: u64 = 0x0000_0000_ffff_ffff;
/// Increment for the epoch stored in the high 32 bits of a slot's `rc`.
pub const EP_INCR: u64 = 0x0000_0001_0000_0000;

/// Bit 31 of a slot's `size`: this is the last fragment of a message.
pub const SIZE_LAST: u32 = 0x8000_0000;
/// Bit 30 of a slot's `size`: payload is a `storage_id` (large-pool path).
pub const SIZE_STORAGE: u32 = 0x4000_0000;
/// Mask for the actual byte count stored in the low 30 bits of `size`.
pub const SIZE_MASK: u32 = 0x3FFF_FFFF;
/// Bit 0 of a unicast slot's `rc`: producer has finished writing the payload.
pub const COMMIT_FLAG: u64 = 0x1;

// ---------------------------------------------------------------------------
// Slot — one element of the ring
// ---------------------------------------------------------------------------

/// One slot in the circular ring buffer.
///
/// `rc` is interpreted differently per topology:
/// - broadcast: low 32 bits = outstanding-reader bitmask, high 32 = epoch.
/// - competitive unicast: bit 0 = commit flag, remaining bits = epoch.
#[repr(C)]
pub struct Slot {
    /// Message payload, up to `config::INLINE_SIZE` bytes.
    pub data: [u8; config::INLINE_SIZE],
    /// Actual byte count plus `SIZE_LAST`/`SIZE_STORAGE` flags.
    pub size: AtomicU32,
    /// Sender identity stamp, used for self-message filtering in broadcast mode.
    pub cc_id: AtomicU32,
    /// Reader mask / commit flag, packed with an epoch. See module docs.
    pub rc: AtomicU64,
}

// ---------------------------------------------------------------------------
// CircularArray — cursors + slot storage, cache-line isolated
// ---------------------------------------------------------------------------

/// Fixed-capacity slot array shared across processes. `CAP` must be a
/// power of two; constructing a `Queue` over a non-power-of-two capacity
/// is a programming error and panics via [`CircularArray::ASSERT_POW2`].
///
/// `write_cursor`, `read_cursor`, and `epoch` each get their own cache
/// line (64-byte padding) so a busy producer and a busy consumer don't
/// ping-pong the same line.
#[repr(C)]
pub struct CircularArray<const CAP: usize = { config::SLOT_COUNT }> {
    /// Producer head. Every topology advances this on publish/reservation.
    pub write_cursor: AtomicU32,
    _pad_wc: [u8; 64 - std::mem::size_of::<AtomicU32>()],
    /// Consumer tail. Only meaningful for unicast topologies — broadcast
    /// consumers keep a private cursor in their `Queue` connection record.
    pub read_cursor: AtomicU32,
    _pad_rc: [u8; 64 - std::mem::size_of::<AtomicU32>()],
    /// Generation counter, bumped on a force-push past a stalled slot.
    pub epoch: AtomicU64,
    _pad_ep: [u8; 64 - std::mem::size_of::<AtomicU64>()],
    /// Count of connected senders (informational; unicast producer-side CAS
    /// does not need to enumerate producers).
    pub sender_count: AtomicU32,
    _pad_sc: [u8; 64 - std::mem::size_of::<AtomicU32>()],
    slots: [Slot; CAP],
}

impl<const CAP: usize> CircularArray<CAP> {
    /// Evaluating this forces a compile-time-shaped panic if `CAP` is not a
    /// power of two. Referenced once from `Queue::open`.
    pub const ASSERT_POW2: () = assert!(CAP.is_power_of_two(), "CircularArray capacity must be a power of two");

    /// Total shared-memory size of the header plus `CAP` slots.
    pub const fn shm_size() -> usize {
        std::mem::size_of::<Self>()
    }

    #[inline]
    pub fn mask(cursor: u32) -> usize {
        mask_index(cursor, CAP)
    }

    /// Slot at ring position `cursor` (already masked).
    #[inline]
    pub fn slot(&self, cursor: u32) -> &Slot {
        &self.slots[Self::mask(cursor)]
    }

    /// Current producer head (Acquire load — pairs with a Release publish).
    pub fn cursor(&self) -> u32 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Current consumer tail (unicast only).
    pub fn tail(&self) -> u32 {
        self.read_cursor.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// ConnHead — connection tracking header, stored alongside a CircularArray
// in the Queue's shared layout (see queue.rs).
// ---------------------------------------------------------------------------

/// Broadcast-mode connection head.
/// Each receiver is assigned a unique bit in the bitmask.
#[repr(C)]
pub struct BroadcastConnHead {
    cc: AtomicU32,
    lock: SpinLock,
    constructed: AtomicBool,
}

impl BroadcastConnHead {
    /// Initialise (idempotent via DCLP).
    pub fn init(&self) {
        if !self.constructed.load(Ordering::Acquire) {
            self.lock.lock();
            if !self.constructed.load(Ordering::Relaxed) {
                self.cc.store(0, Ordering::Relaxed);
                self.constructed.store(true, Ordering::Release);
            }
            self.lock.unlock();
        }
    }

    /// Current connection bitmask.
    pub fn connections(&self, order: Ordering) -> ConnId {
        self.cc.load(order)
    }

    /// Connect a new receiver — finds the first zero bit and sets it.
    /// Returns the bit-mask for this receiver, or 0 if full.
    pub fn connect(&self) -> ConnId {
        let mut k = 0u32;
        loop {
            let curr = self.cc.load(Ordering::Acquire);
            let next = curr | (curr.wrapping_add(1)); // set first 0 bit
            if next == curr {
                return 0; // full
            }
            if self
                .cc
                .compare_exchange_weak(curr, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return next ^ curr; // the bit we just set
            }
            crate::spin_lock::adaptive_yield_pub(&mut k);
        }
    }

    /// Disconnect a receiver by clearing its bits from the bitmask.
    /// Returns the resulting bitmask.
    pub fn disconnect(&self, cc_id: ConnId) -> ConnId {
        self.cc.fetch_and(!cc_id, Ordering::AcqRel) & !cc_id
    }

    /// Whether the given receiver is still connected.
    pub fn connected(&self, cc_id: ConnId) -> bool {
        (self.connections(Ordering::Acquire) & cc_id) != 0
    }

    /// Number of connected receivers (popcount of the bitmask).
    pub fn conn_count(&self, order: Ordering) -> usize {
        self.cc.load(order).count_ones() as usize
    }
}

/// Unicast-mode connection head.
/// Simple counter of connected receivers.
#[repr(C)]
pub struct UnicastConnHead {
    cc: AtomicU32,
    lock: SpinLock,
    constructed: AtomicBool,
}

impl UnicastConnHead {
    pub fn init(&self) {
        if !self.constructed.load(Ordering::Acquire) {
            self.lock.lock();
            if !self.constructed.load(Ordering::Relaxed) {
                self.cc.store(0, Ordering::Relaxed);
                self.constructed.store(true, Ordering::Release);
            }
            self.lock.unlock();
        }
    }

    pub fn connections(&self, order: Ordering) -> ConnId {
        self.cc.load(order)
    }

    pub fn connect(&self) -> ConnId {
        self.cc.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn disconnect(&self, cc_id: ConnId) -> ConnId {
        if cc_id == !0u32 {
            self.cc.store(0, Ordering::Relaxed);
            return 0;
        }
        self.cc.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn connected(&self, cc_id: ConnId) -> bool {
        (self.connections(Ordering::Acquire) != 0) && (cc_id != 0)
    }

    pub fn conn_count(&self, order: Ordering) -> usize {
        self.connections(order) as usize
    }
}
