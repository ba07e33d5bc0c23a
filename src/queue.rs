// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Queue — the public front-end binding a ProdConsEngine topology to a
// named `CircularArray`, its `ConnectionMask`, and a pair of `Waiter`s.
// Grounded on channel.rs's `ChanInner`/`Route` pairing of a ring with a
// name-derived mutex/condvar set, generalised across all five topologies
// instead of hard-coding the broadcast one.

use std::io;
use std::sync::atomic::Ordering;

use crate::circ::{BroadcastConnHead, CircularArray, ConnId, UnicastConnHead};
use crate::config;
use crate::error::{err, IpcErrorKind};
use crate::prodcons::{self, Topology};
use crate::shm::{ShmObject, ShmOpenMode};
use crate::waiter::Waiter;

/// Shared-memory layout behind a `Queue<CAP>`: both connection-head shapes
/// are always present (unicast counter, broadcast bitmask) but only the one
/// matching the queue's topology is ever touched — this keeps the layout
/// POD and topology-independent so `clear_storage` doesn't need to know
/// which variant last used a name.
#[repr(C)]
struct QueueLayout<const CAP: usize> {
    broadcast_head: BroadcastConnHead,
    unicast_head: UnicastConnHead,
    ring: CircularArray<CAP>,
}

/// A named multi-process queue implementing one of the five topologies
/// in [`Topology`].
pub struct Queue<const CAP: usize = { config::SLOT_COUNT }> {
    name: String,
    topology: Topology,
    shm: ShmObject,
    wt_waiter: Waiter,
    rd_waiter: Waiter,
    /// This process's connection id: bitmask bit (broadcast) or counter
    /// value (unicast). Zero until `connect_receiver` succeeds.
    conn_id: ConnId,
    /// Identity stamp written into broadcast slots for self-filtering.
    cc_id: u32,
    /// Private broadcast read cursor; unused for unicast topologies.
    cursor: u32,
}

impl<const CAP: usize> Queue<CAP> {
    fn layout_name(name: &str, topology: Topology) -> String {
        let tag = match topology {
            Topology::SpscUnicast => "SPSC",
            Topology::SpmcUnicast => "SPMCU",
            Topology::MpmcUnicast => "MPMCU",
            Topology::SpmcBroadcast => "SPMCB",
            Topology::MpmcBroadcast => "MPMCB",
        };
        format!(
            "{name}__Q_{tag}__D{}_A{}",
            config::INLINE_SIZE,
            config::ALIGN_SIZE
        )
    }

    /// Open (or create) a named queue with the given topology.
    pub fn open(name: &str, topology: Topology, mode: ShmOpenMode) -> io::Result<Self> {
        #[allow(clippy::let_unit_value)]
        let _ = CircularArray::<CAP>::ASSERT_POW2;

        let layout_name = Self::layout_name(name, topology);
        let size = std::mem::size_of::<QueueLayout<CAP>>();
        let shm = ShmObject::acquire_checked(&layout_name, size, mode)?;

        let layout = unsafe { &*(shm.as_ptr() as *const QueueLayout<CAP>) };
        layout.broadcast_head.init();
        layout.unicast_head.init();

        let wt_waiter = Waiter::open(&format!("{layout_name}_WT"))?;
        let rd_waiter = Waiter::open(&format!("{layout_name}_RD"))?;

        let cc_id = std::process::id()
            .wrapping_mul(2654435761)
            .wrapping_add(Self::next_local_id());

        Ok(Self {
            name: layout_name,
            topology,
            shm,
            wt_waiter,
            rd_waiter,
            conn_id: 0,
            cc_id,
            cursor: 0,
        })
    }

    fn next_local_id() -> u32 {
        use std::sync::atomic::AtomicU32;
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    fn layout(&self) -> &QueueLayout<CAP> {
        unsafe { &*(self.shm.as_ptr() as *const QueueLayout<CAP>) }
    }

    fn ring(&self) -> &CircularArray<CAP> {
        &self.layout().ring
    }

    /// Register this handle as a sender.
    pub fn connect_sender(&self) -> io::Result<()> {
        self.ring().sender_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Unregister this handle as a sender.
    pub fn disconnect_sender(&self) -> io::Result<()> {
        self.ring().sender_count.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Register this handle as a receiver. Fails with `TooManyReceivers`
    /// once all 32 connection bits (broadcast) or the counter is occupied.
    pub fn connect_receiver(&mut self) -> io::Result<()> {
        let id = if self.topology.is_broadcast() {
            self.layout().broadcast_head.connect()
        } else {
            self.layout().unicast_head.connect()
        };
        if id == 0 {
            return Err(err(IpcErrorKind::TooManyReceivers));
        }
        self.conn_id = id;
        self.cursor = self.ring().cursor();
        Ok(())
    }

    /// Unregister this handle as a receiver.
    pub fn disconnect_receiver(&mut self) -> io::Result<()> {
        if self.conn_id == 0 {
            return Ok(());
        }
        if self.topology.is_broadcast() {
            self.layout().broadcast_head.disconnect(self.conn_id);
        } else {
            self.layout().unicast_head.disconnect(self.conn_id);
        }
        self.conn_id = 0;
        Ok(())
    }

    /// This handle's own connection id: a single bitmask bit (broadcast)
    /// or counter value (unicast). Zero until `connect_receiver` succeeds.
    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Currently connected receiver mask (broadcast) or count (unicast).
    pub fn connected_mask(&self) -> ConnId {
        if self.topology.is_broadcast() {
            self.layout().broadcast_head.connections(Ordering::Acquire)
        } else {
            self.layout().unicast_head.connections(Ordering::Acquire)
        }
    }

    /// Push a payload, blocking up to `timeout_ms` (`None` = block forever).
    pub fn push(&self, data: &[u8], timeout_ms: Option<u64>) -> io::Result<bool> {
        self.push_tagged(data, false, timeout_ms)
    }

    /// Push a payload, stamping the slot's `SIZE_STORAGE` bit when
    /// `is_storage` is set (used by `ChannelTransport` to mark a
    /// `LargeMsgPool` reference apart from an inline payload).
    pub fn push_tagged(&self, data: &[u8], is_storage: bool, timeout_ms: Option<u64>) -> io::Result<bool> {
        if data.len() > config::INLINE_SIZE && !self.topology.is_broadcast() {
            return Err(err(IpcErrorKind::PayloadTooLarge));
        }
        match self.topology {
            Topology::SpscUnicast => {
                prodcons::push_spsc(self.ring(), &self.wt_waiter, data, is_storage, timeout_ms)
            }
            Topology::SpmcUnicast | Topology::MpmcUnicast => prodcons::push_unicast_competitive(
                self.ring(),
                &self.wt_waiter,
                data,
                is_storage,
                timeout_ms,
            ),
            Topology::SpmcBroadcast | Topology::MpmcBroadcast => prodcons::push_broadcast(
                self.ring(),
                &self.layout().broadcast_head,
                &self.wt_waiter,
                &self.rd_waiter,
                self.cc_id,
                data,
                is_storage,
                timeout_ms.unwrap_or(u64::MAX),
            ),
        }
    }

    /// Pop a payload into `out`, blocking up to `timeout_ms`.
    pub fn pop(&mut self, out: &mut Vec<u8>, timeout_ms: Option<u64>) -> io::Result<bool> {
        let mut is_storage = false;
        self.pop_tagged(out, &mut is_storage, timeout_ms)
    }

    /// Pop a payload into `out` along with whether it carried a
    /// `LargeMsgPool` reference (`*is_storage`), blocking up to
    /// `timeout_ms`.
    pub fn pop_tagged(
        &mut self,
        out: &mut Vec<u8>,
        is_storage: &mut bool,
        timeout_ms: Option<u64>,
    ) -> io::Result<bool> {
        match self.topology {
            Topology::SpscUnicast => {
                prodcons::pop_spsc(self.ring(), &self.rd_waiter, out, is_storage, timeout_ms)
            }
            Topology::SpmcUnicast | Topology::MpmcUnicast => prodcons::pop_unicast_competitive(
                self.ring(),
                &self.rd_waiter,
                out,
                is_storage,
                timeout_ms,
            ),
            Topology::SpmcBroadcast | Topology::MpmcBroadcast => {
                if self.conn_id == 0 {
                    return Err(err(IpcErrorKind::ShmUnavailable));
                }
                prodcons::pop_broadcast(
                    self.ring(),
                    &self.rd_waiter,
                    &self.wt_waiter,
                    self.conn_id,
                    self.cc_id,
                    &mut self.cursor,
                    out,
                    is_storage,
                    timeout_ms,
                )
            }
        }
    }

    /// Wake every blocked sender/receiver and mark this handle as quitting.
    pub fn shutdown(&self) -> io::Result<()> {
        self.wt_waiter.quit_waiting()?;
        self.rd_waiter.quit_waiting()
    }

    /// Remove the backing storage for a named queue of this topology.
    pub fn clear_storage(name: &str, topology: Topology) {
        let layout_name = Self::layout_name(name, topology);
        Waiter::clear_storage(&format!("{layout_name}_WT"));
        Waiter::clear_storage(&format!("{layout_name}_RD"));
        ShmObject::clear_storage(&layout_name);
    }

    /// The fully-qualified shared-memory name backing this queue.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<const CAP: usize> Drop for Queue<CAP> {
    fn drop(&mut self) {
        let _ = self.disconnect_receiver();
    }
}
