// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// ChannelTransport — picks an encoding for a payload and drives the
// matching Queue/LargeMsgPool calls. Three bands, in increasing size:
//
//   inline     len <= config::INLINE_SIZE             one ring slot
//   segmented  INLINE_SIZE < len <= LARGE_LIMIT        consecutive slots
//   large-pool len > LARGE_LIMIT                       LargeMsgPool chunk,
//                                                       storage_id in the slot
//
// Per the documented thresholds (INLINE_SIZE == LARGE_LIMIT == 64) the
// segmented band is empty by default — every payload either fits in one
// slot or goes to the pool. Raising LARGE_LIMIT above INLINE_SIZE activates
// it; `push`/`pop` below already handle both cases uniformly.
//
// Large-pool references are told apart from inline payloads by the ring
// slot's own `SIZE_STORAGE` bit (threaded through `Queue::push_tagged`/
// `pop_tagged`), not by inspecting the popped bytes — an 8-byte inline
// payload is otherwise indistinguishable from an encoded storage tag.

use std::io;
use std::sync::Arc;

use crate::buffer::{IpcBuffer, ReceivedMessage};
use crate::config;
use crate::error::{err, IpcErrorKind};
use crate::large_pool::LargeMsgPool;
use crate::prodcons::Topology;
use crate::queue::Queue;

/// Binds a [`Queue`] to a [`LargeMsgPool`] and picks an encoding per
/// payload size. `CAP` is the queue's ring capacity.
///
/// The pool is `Arc`-wrapped so a [`ReceivedMessage`]'s release closure can
/// outlive this transport being moved (it only needs to outlive the
/// message itself, which the caller is responsible for).
pub struct ChannelTransport<const CAP: usize = { config::SLOT_COUNT }> {
    queue: Queue<CAP>,
    pool: Arc<LargeMsgPool>,
    topology: Topology,
}

impl<const CAP: usize> ChannelTransport<CAP> {
    pub fn new(queue: Queue<CAP>, pool: LargeMsgPool, topology: Topology) -> Self {
        Self {
            queue,
            pool: Arc::new(pool),
            topology,
        }
    }

    pub fn queue(&self) -> &Queue<CAP> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Queue<CAP> {
        &mut self.queue
    }

    pub fn connect_sender(&self) -> io::Result<()> {
        self.queue.connect_sender()
    }

    pub fn disconnect_sender(&self) -> io::Result<()> {
        self.queue.disconnect_sender()
    }

    pub fn connect_receiver(&mut self) -> io::Result<()> {
        self.queue.connect_receiver()
    }

    /// Unregister this handle as a receiver.
    ///
    /// For broadcast topologies, first drains every message still pending
    /// for this receiver exactly as `recv` would, so any `LargeMsgPool`
    /// chunk stamped with this receiver's bit gets that bit recycled
    /// before the bit itself disappears from the connection mask — a
    /// receiver that disconnects before calling `recv` on a pool-backed
    /// message must not leak that chunk's refcount forever.
    pub fn disconnect_receiver(&mut self) -> io::Result<()> {
        if self.topology.is_broadcast() && self.queue.conn_id() != 0 {
            while let Some(()) = self.drain_one_pending()? {}
        }
        self.queue.disconnect_receiver()
    }

    /// Pop one pending message without blocking and recycle its pool
    /// refcount if it was storage-backed; returns `None` once the ring has
    /// nothing left for this receiver.
    fn drain_one_pending(&mut self) -> io::Result<Option<()>> {
        let mut raw = Vec::new();
        let mut is_storage = false;
        if !self.queue.pop_tagged(&mut raw, &mut is_storage, Some(0))? {
            return Ok(None);
        }
        if is_storage {
            if raw.len() != STORAGE_TAG_LEN {
                return Err(err(IpcErrorKind::ShmUnavailable));
            }
            let (class_idx, storage_id) = decode_storage_tag(&raw);
            let conn_id = self.queue.conn_id();
            let _ = self.pool.recycle(class_idx, storage_id, conn_id);
        }
        Ok(Some(()))
    }

    /// Encode and send `data`, blocking up to `timeout_ms`.
    pub fn send(&self, data: &[u8], timeout_ms: Option<u64>) -> io::Result<bool> {
        if data.len() <= config::INLINE_SIZE {
            return self.queue.push(data, timeout_ms);
        }

        if data.len() <= config::LARGE_LIMIT && self.topology.is_broadcast() {
            // Segmented band: only meaningful for broadcast, whose
            // push_broadcast already splits payloads across consecutive
            // slots tagged with SIZE_LAST on the final fragment.
            return self.queue.push(data, timeout_ms);
        }

        if data.len() > config::LARGE_LIMIT {
            return self.send_via_pool(data, timeout_ms);
        }

        // Unicast variants have no segmented band (config::push_unicast_*
        // rejects payloads above INLINE_SIZE) — route anything this large
        // through the pool instead.
        self.send_via_pool(data, timeout_ms)
    }

    fn send_via_pool(&self, data: &[u8], timeout_ms: Option<u64>) -> io::Result<bool> {
        let conns = self.queue.connected_mask();
        let (class_idx, storage_id, payload_ptr) = self.pool.acquire(data.len() + 4, conns)?;
        unsafe {
            std::ptr::copy_nonoverlapping((data.len() as u32).to_le_bytes().as_ptr(), payload_ptr, 4);
            std::ptr::copy_nonoverlapping(data.as_ptr(), payload_ptr.add(4), data.len());
        }
        let tag = encode_storage_tag(class_idx, storage_id);
        self.queue.push_tagged(&tag, true, timeout_ms)
    }

    /// Receive one message, decoding whichever band it arrived in.
    pub fn recv(&mut self, timeout_ms: Option<u64>) -> io::Result<Option<ReceivedMessage>> {
        let mut raw = Vec::new();
        let mut is_storage = false;
        if !self.queue.pop_tagged(&mut raw, &mut is_storage, timeout_ms)? {
            return Ok(None);
        }
        self.decode(raw, is_storage)
    }

    fn decode(&self, raw: Vec<u8>, is_storage: bool) -> io::Result<Option<ReceivedMessage>> {
        if is_storage {
            if raw.len() != STORAGE_TAG_LEN {
                return Err(err(IpcErrorKind::ShmUnavailable));
            }
            let (class_idx, storage_id) = decode_storage_tag(&raw);
            let Some(ptr) = self.pool.find(class_idx, storage_id) else {
                return Err(err(IpcErrorKind::ShmUnavailable));
            };
            let len = unsafe { u32::from_le_bytes(*(ptr as *const [u8; 4])) } as usize;
            let bytes = unsafe { std::slice::from_raw_parts(ptr.add(4), len) };
            let data = IpcBuffer::from_slice(bytes);

            let pool = Arc::clone(&self.pool);
            let broadcast = self.topology.is_broadcast();
            let conn_id = self.queue.conn_id();
            let release = move || {
                let _ = if broadcast {
                    pool.recycle(class_idx, storage_id, conn_id)
                } else {
                    pool.release(class_idx, storage_id)
                };
            };
            return Ok(Some(ReceivedMessage::pooled(data, release)));
        }
        Ok(Some(ReceivedMessage::inline(IpcBuffer::from_vec(raw))))
    }

    /// Remove the backing storage for a named transport.
    pub fn clear_storage(name: &str, topology: Topology) {
        Queue::<CAP>::clear_storage(name, topology);
        LargeMsgPool::clear_storage(name);
    }
}

/// A storage tag is a fixed-length encoding of `(class_idx, storage_id)`
/// placed in the ring slot instead of the payload itself. The slot's own
/// `SIZE_STORAGE` bit (see `Queue::push_tagged`/`pop_tagged`) is what
/// tells `decode` this is a tag and not an inline payload of the same
/// length — the tag bytes alone are not self-describing.
const STORAGE_TAG_LEN: usize = 8;

fn encode_storage_tag(class_idx: usize, storage_id: i32) -> [u8; STORAGE_TAG_LEN] {
    let mut tag = [0u8; STORAGE_TAG_LEN];
    tag[1] = class_idx as u8;
    tag[2..6].copy_from_slice(&storage_id.to_le_bytes());
    tag
}

fn decode_storage_tag(raw: &[u8]) -> (usize, i32) {
    let class_idx = raw[1] as usize;
    let storage_id = i32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]);
    (class_idx, storage_id)
}
