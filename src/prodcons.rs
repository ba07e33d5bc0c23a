// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The five producer/consumer protocols over a `CircularArray`. Every
// variant is a set of free functions over `&CircularArray<CAP>` plus the
// caller's own cursor/identity fields (kept in `Queue`) — engine state
// lives entirely in the ring, matching the broadcast algorithm this module
// generalises from `channel.rs`'s original `ChanInner::send`/`recv`.

use std::io;
use std::time::{Duration, Instant};

use crate::circ::{
    CircularArray, Slot, COMMIT_FLAG, EP_INCR, EP_MASK, SIZE_LAST, SIZE_MASK, SIZE_STORAGE,
};
use crate::waiter::Waiter;

/// Which of the five protocols a `Queue` was constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// (a) single producer / single consumer, unicast.
    SpscUnicast,
    /// (b) single producer / multi consumer, competitive unicast.
    SpmcUnicast,
    /// (c) multi producer / multi consumer, competitive unicast.
    MpmcUnicast,
    /// (d) single producer / multi consumer, broadcast.
    SpmcBroadcast,
    /// (e) multi producer / multi consumer, broadcast.
    MpmcBroadcast,
}

impl Topology {
    pub fn is_broadcast(self) -> bool {
        matches!(self, Topology::SpmcBroadcast | Topology::MpmcBroadcast)
    }

    pub fn is_multi_producer(self) -> bool {
        matches!(self, Topology::MpmcUnicast | Topology::MpmcBroadcast)
    }
}

/// Retries spent spinning before a full/empty ring falls back to a `Waiter`.
const SPIN_COUNT: u32 = 32;

/// Spin-then-wait helper shared by every variant: spins on `pred` up to
/// `SPIN_COUNT` times, then falls back to the condition variable. Returns
/// `false` on timeout, `true` once `pred` becomes false.
fn wait_while<F>(waiter: &Waiter, pred: F, timeout_ms: Option<u64>) -> io::Result<bool>
where
    F: Fn() -> bool,
{
    if matches!(timeout_ms, Some(0)) {
        return Ok(!pred());
    }
    let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut k = 0u32;
    while pred() {
        if k < SPIN_COUNT {
            std::thread::yield_now();
            k += 1;
        } else {
            let tm = deadline
                .map(|dl| dl.saturating_duration_since(Instant::now()).as_millis() as u64);
            if matches!(tm, Some(0)) {
                return Ok(false);
            }
            if !waiter.wait_if(&pred, tm)? {
                return Ok(false);
            }
            k = 0;
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// (a) SPSC unicast
// ---------------------------------------------------------------------------

/// Push one payload through a single-producer/single-consumer ring.
/// `data.len()` must be `<= config::INLINE_SIZE`; callers enforce that.
/// `is_storage` stamps the slot's `SIZE_STORAGE` bit so the receiver can
/// tell a `LargeMsgPool` reference apart from an inline payload without
/// inspecting the bytes themselves.
pub fn push_spsc<const CAP: usize>(
    ring: &CircularArray<CAP>,
    wt_waiter: &Waiter,
    data: &[u8],
    is_storage: bool,
    timeout_ms: Option<u64>,
) -> io::Result<bool> {
    let head = ring.write_cursor.load(std::sync::atomic::Ordering::Relaxed);
    let next = head.wrapping_add(1);

    let full = || {
        let t = ring.read_cursor.load(std::sync::atomic::Ordering::Acquire);
        next.wrapping_sub(t) as usize > CAP
    };
    if !wait_while(wt_waiter, full, timeout_ms)? {
        return Ok(false);
    }

    let slot = ring.slot(head);
    write_slot(slot, data, true, is_storage);
    ring.write_cursor
        .store(next, std::sync::atomic::Ordering::Release);
    Ok(true)
}

/// Pop one payload from a single-producer/single-consumer ring into `out`.
/// `*is_storage` is set to whether the popped slot carried a
/// `LargeMsgPool` reference rather than an inline payload.
pub fn pop_spsc<const CAP: usize>(
    ring: &CircularArray<CAP>,
    rd_waiter: &Waiter,
    out: &mut Vec<u8>,
    is_storage: &mut bool,
    timeout_ms: Option<u64>,
) -> io::Result<bool> {
    let tail = ring.read_cursor.load(std::sync::atomic::Ordering::Relaxed);
    let empty = || ring.cursor() == tail;
    if !wait_while(rd_waiter, empty, timeout_ms)? {
        return Ok(false);
    }

    let slot = ring.slot(tail);
    read_slot(slot, out, is_storage);
    ring.read_cursor
        .store(tail.wrapping_add(1), std::sync::atomic::Ordering::Release);
    Ok(true)
}

// ---------------------------------------------------------------------------
// (b)/(c) competitive unicast — single or multi producer, multi consumer
// ---------------------------------------------------------------------------

/// Reserve-write-commit a slot for (b)/(c). With a single producer the head
/// CAS always succeeds on the first attempt, so the same code serves both.
pub fn push_unicast_competitive<const CAP: usize>(
    ring: &CircularArray<CAP>,
    wt_waiter: &Waiter,
    data: &[u8],
    is_storage: bool,
    timeout_ms: Option<u64>,
) -> io::Result<bool> {
    use std::sync::atomic::Ordering;

    loop {
        let head = ring.write_cursor.load(Ordering::Relaxed);
        let tail = ring.read_cursor.load(Ordering::Acquire);
        if head.wrapping_sub(tail) as usize >= CAP {
            let full = || {
                let t = ring.read_cursor.load(Ordering::Acquire);
                head.wrapping_sub(t) as usize >= CAP
            };
            if !wait_while(wt_waiter, full, timeout_ms)? {
                return Ok(false);
            }
            continue;
        }
        if ring
            .write_cursor
            .compare_exchange_weak(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            continue;
        }
        let slot = ring.slot(head);
        // Clear the previous generation's commit flag before writing so a
        // racing consumer never observes a stale commit for this index.
        slot.rc.store(0, Ordering::Relaxed);
        write_slot(slot, data, false, is_storage);
        slot.rc.store(COMMIT_FLAG, Ordering::Release);
        return Ok(true);
    }
}

/// Competitively claim and consume one slot for (b)/(c).
pub fn pop_unicast_competitive<const CAP: usize>(
    ring: &CircularArray<CAP>,
    rd_waiter: &Waiter,
    out: &mut Vec<u8>,
    is_storage: &mut bool,
    timeout_ms: Option<u64>,
) -> io::Result<bool> {
    use std::sync::atomic::Ordering;

    loop {
        let tail = ring.read_cursor.load(Ordering::Relaxed);
        let head = ring.write_cursor.load(Ordering::Acquire);
        if tail == head {
            let empty = || ring.write_cursor.load(Ordering::Acquire) == tail;
            if !wait_while(rd_waiter, empty, timeout_ms)? {
                return Ok(false);
            }
            continue;
        }
        if ring
            .read_cursor
            .compare_exchange_weak(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            continue;
        }
        let slot = ring.slot(tail);
        // Producer may still be mid-write for a just-reserved slot; spin on
        // the commit flag (bounded — the reservation above guarantees a
        // producer is actively writing, not absent).
        let mut k = 0u32;
        while slot.rc.load(Ordering::Acquire) & COMMIT_FLAG == 0 {
            crate::spin_lock::adaptive_yield_pub(&mut k);
        }
        read_slot(slot, out, is_storage);
        slot.rc.store(0, Ordering::Release);
        return Ok(true);
    }
}

// ---------------------------------------------------------------------------
// (d)/(e) broadcast — single or multi producer, multi consumer
// ---------------------------------------------------------------------------

/// Publish one payload to every currently-connected receiver.
///
/// `connections` is the live `BroadcastConnHead` bitmask; `cc_id` stamps
/// the slot so a sender can recognise (and silently drop) its own
/// broadcasts if it is also connected as a receiver.
#[allow(clippy::too_many_arguments)]
pub fn push_broadcast<const CAP: usize>(
    ring: &CircularArray<CAP>,
    connections: &crate::circ::BroadcastConnHead,
    wt_waiter: &Waiter,
    rd_waiter: &Waiter,
    cc_id: u32,
    data: &[u8],
    is_storage: bool,
    timeout_ms: u64,
) -> io::Result<bool> {
    use std::sync::atomic::Ordering;

    let mut offset = 0usize;
    let inline_size = crate::config::INLINE_SIZE;
    if data.is_empty() {
        return Ok(false);
    }

    while offset < data.len() {
        let chunk_len = std::cmp::min(inline_size, data.len() - offset);
        let is_last = (offset + chunk_len) >= data.len();

        let claimed: u32;
        'claim: loop {
            let cc = connections.connections(Ordering::Relaxed) as u64;
            if cc == 0 {
                return Ok(false); // no receivers
            }
            let epoch = ring.epoch.load(Ordering::Relaxed);
            let wt = ring.write_cursor.load(Ordering::Relaxed);
            let slot = ring.slot(wt);
            let cur_rc = slot.rc.load(Ordering::Acquire);
            let rem_cc = cur_rc & EP_MASK;

            if (cc & rem_cc) != 0 && (cur_rc & !EP_MASK) == epoch {
                let ok = wait_while(
                    wt_waiter,
                    || {
                        let rc = slot.rc.load(Ordering::Acquire);
                        let ep = ring.epoch.load(Ordering::Relaxed);
                        (cc & (rc & EP_MASK)) != 0 && (rc & !EP_MASK) == ep
                    },
                    Some(timeout_ms),
                )?;
                if ok {
                    continue 'claim;
                }
                // force_push: bump epoch, disconnect stale receivers.
                ring.epoch.fetch_add(EP_INCR, Ordering::AcqRel);
                let cur_rc2 = slot.rc.load(Ordering::Acquire);
                let rem_cc2 = cur_rc2 & EP_MASK;
                if rem_cc2 != 0 {
                    let new_cc = connections.disconnect(rem_cc2 as u32);
                    if new_cc == 0 {
                        return Ok(false);
                    }
                    slot.rc.fetch_and(!rem_cc2, Ordering::AcqRel);
                }
                continue 'claim;
            }

            let new_rc = epoch | cc;
            if slot
                .rc
                .compare_exchange_weak(cur_rc, new_rc, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                claimed = wt;
                break 'claim;
            }
            std::thread::yield_now();
        }

        let slot = ring.slot(claimed);
        slot.cc_id.store(cc_id, Ordering::Relaxed);
        let slot_ptr = slot.data.as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr().add(offset), slot_ptr, chunk_len);
        }
        let mut size_val = chunk_len as u32;
        if is_last {
            size_val |= SIZE_LAST;
        }
        if is_storage {
            size_val |= SIZE_STORAGE;
        }
        slot.size.store(size_val, Ordering::Relaxed);
        ring.write_cursor.fetch_add(1, Ordering::Release);
        offset += chunk_len;
        let _ = rd_waiter.broadcast();
    }
    Ok(true)
}

/// Consume slots visible to receiver `conn_id`/`cursor` until a complete
/// message has been assembled into `out` (own broadcasts are skipped
/// entirely — a sender that is also a receiver never sees its own traffic).
///
/// Callers track `cursor` themselves: broadcast consumers have no shared
/// tail, each keeps a private read position advancing independently.
/// `*is_storage` is set to whether the assembled message carried a
/// `LargeMsgPool` reference rather than an inline payload.
#[allow(clippy::too_many_arguments)]
pub fn pop_broadcast<const CAP: usize>(
    ring: &CircularArray<CAP>,
    rd_waiter: &Waiter,
    wt_waiter: &Waiter,
    conn_id: u32,
    cc_id: u32,
    cursor: &mut u32,
    out: &mut Vec<u8>,
    is_storage: &mut bool,
    timeout_ms: Option<u64>,
) -> io::Result<bool> {
    use std::sync::atomic::Ordering;

    loop {
        let cur = *cursor;
        let empty = || ring.write_cursor.load(Ordering::Acquire) == cur;
        if !wait_while(rd_waiter, empty, timeout_ms)? {
            return Ok(false);
        }

        let slot = ring.slot(cur);
        let size_val = slot.size.load(Ordering::Relaxed);
        let chunk_len = (size_val & SIZE_MASK) as usize;
        let is_last = (size_val & SIZE_LAST) != 0;
        let slot_is_storage = (size_val & SIZE_STORAGE) != 0;
        let is_own = slot.cc_id.load(Ordering::Relaxed) == cc_id;

        if !is_own {
            let chunk = unsafe { std::slice::from_raw_parts(slot.data.as_ptr(), chunk_len) };
            out.extend_from_slice(chunk);
            *is_storage = slot_is_storage;
        }

        // CAS-clear our bit from the low 32 bits of rc, preserving the epoch.
        let mut k = 0u32;
        loop {
            let cur_rc = slot.rc.load(Ordering::Acquire);
            let nxt_rc = cur_rc & !(conn_id as u64);
            if slot
                .rc
                .compare_exchange_weak(cur_rc, nxt_rc, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            crate::spin_lock::adaptive_yield_pub(&mut k);
        }
        let _ = wt_waiter.broadcast();
        *cursor = cur.wrapping_add(1);

        if is_last {
            if is_own {
                out.clear();
                continue;
            }
            return Ok(true);
        }
        if is_own {
            out.clear();
        }
    }
}

fn write_slot(slot: &Slot, data: &[u8], mark_last: bool, is_storage: bool) {
    use std::sync::atomic::Ordering;
    let ptr = slot.data.as_ptr() as *mut u8;
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
    }
    let mut size_val = data.len() as u32;
    if mark_last {
        size_val |= SIZE_LAST;
    }
    if is_storage {
        size_val |= SIZE_STORAGE;
    }
    slot.size.store(size_val, Ordering::Relaxed);
}

fn read_slot(slot: &Slot, out: &mut Vec<u8>, is_storage: &mut bool) {
    use std::sync::atomic::Ordering;
    let size_val = slot.size.load(Ordering::Relaxed);
    let len = (size_val & SIZE_MASK) as usize;
    *is_storage = (size_val & SIZE_STORAGE) != 0;
    let chunk = unsafe { std::slice::from_raw_parts(slot.data.as_ptr(), len) };
    out.extend_from_slice(chunk);
}
