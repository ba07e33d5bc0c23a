// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Route and Channel — the two broadcast-topology front ends, now thin
// wrappers over `Queue` + `ChannelTransport` + `LargeMsgPool`. The ring
// CAS/force-push algorithm that used to live here directly was lifted
// into `prodcons::push_broadcast`/`pop_broadcast` so every broadcast
// topology (single- and multi-producer) shares one implementation.

use std::io;
use std::time::{Duration, Instant};

use crate::buffer::IpcBuffer;
use crate::config;
use crate::large_pool::LargeMsgPool;
use crate::prodcons::Topology;
use crate::queue::Queue;
use crate::shm::ShmOpenMode;
use crate::transport::ChannelTransport;

/// Whether this endpoint is a sender or receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sender,
    Receiver,
}

/// Shared implementation for `Route` and `Channel`: everything but the
/// topology (and therefore the cross-producer CAS behaviour) is identical.
struct ChanInner {
    name: String,
    mode: Mode,
    transport: ChannelTransport<{ config::SLOT_COUNT }>,
}

impl ChanInner {
    fn open(prefix: &str, name: &str, mode: Mode, topology: Topology) -> io::Result<Self> {
        let full_name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}_{name}")
        };

        let queue = Queue::open(&full_name, topology, ShmOpenMode::CreateOrOpen)?;
        let pool = LargeMsgPool::open(&full_name)?;
        let mut transport = ChannelTransport::new(queue, pool, topology);

        match mode {
            Mode::Sender => transport.connect_sender()?,
            Mode::Receiver => transport.connect_receiver()?,
        }

        Ok(Self {
            name: name.to_string(),
            mode,
            transport,
        })
    }

    fn recv_count(&self) -> usize {
        self.transport.queue().connected_mask().count_ones() as usize
    }

    /// Wait until at least `count` receivers are connected.
    ///
    /// Connection accounting is a handshake, not a hot loop, so this polls
    /// at 1ms resolution rather than threading a dedicated waiter through
    /// `Queue` the way `wt_waiter`/`rd_waiter` are for the data path.
    fn wait_for_recv(&self, count: usize, timeout_ms: Option<u64>) -> io::Result<bool> {
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        loop {
            if self.recv_count() >= count {
                return Ok(true);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Ok(false);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn send(&mut self, data: &[u8], timeout_ms: u64) -> io::Result<bool> {
        if self.mode != Mode::Sender {
            return Err(io::Error::new(io::ErrorKind::Other, "not a sender"));
        }
        if data.is_empty() {
            return Ok(false);
        }
        self.transport.send(data, Some(timeout_ms))
    }

    fn try_send(&mut self, data: &[u8]) -> io::Result<bool> {
        self.send(data, 0)
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> io::Result<IpcBuffer> {
        if self.mode != Mode::Receiver {
            return Err(io::Error::new(io::ErrorKind::Other, "not a receiver"));
        }
        match self.transport.recv(timeout_ms)? {
            Some(msg) => Ok(IpcBuffer::from_vec(msg.into_vec())),
            None => Ok(IpcBuffer::new()),
        }
    }

    fn try_recv(&mut self) -> io::Result<IpcBuffer> {
        self.recv(Some(0))
    }
}

impl Drop for ChanInner {
    fn drop(&mut self) {
        let _ = match self.mode {
            Mode::Sender => self.transport.disconnect_sender(),
            Mode::Receiver => self.transport.disconnect_receiver(),
        };
    }
}

fn split_prefix(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}_{name}")
    }
}

// ---------------------------------------------------------------------------
// Route — single producer, multi consumer (broadcast)
// ---------------------------------------------------------------------------

/// A single-producer, multi-consumer broadcast IPC channel.
///
/// One `Route` in `Sender` mode sends messages that are received by all
/// `Route` instances in `Receiver` mode with the same name. Nothing
/// enforces single-sender at this layer (that guarantee comes from the
/// caller's own usage); `Channel` is the variant that is safe with
/// multiple concurrent senders.
pub struct Route {
    inner: ChanInner,
}

impl Route {
    /// Connect to a named route as either sender or receiver.
    pub fn connect(name: &str, mode: Mode) -> io::Result<Self> {
        Self::connect_with_prefix("", name, mode)
    }

    /// Connect with a prefix.
    pub fn connect_with_prefix(prefix: &str, name: &str, mode: Mode) -> io::Result<Self> {
        let inner = ChanInner::open(prefix, name, mode, Topology::SpmcBroadcast)?;
        Ok(Self { inner })
    }

    /// The channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current mode (sender or receiver).
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Number of connected receivers.
    pub fn recv_count(&self) -> usize {
        self.inner.recv_count()
    }

    /// Wait until at least `count` receivers are connected.
    pub fn wait_for_recv(&self, count: usize, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait_for_recv(count, timeout_ms)
    }

    /// Send data (sender only). Returns `true` on success.
    pub fn send(&mut self, data: &[u8], timeout_ms: u64) -> io::Result<bool> {
        self.inner.send(data, timeout_ms)
    }

    /// Send a buffer.
    pub fn send_buf(&mut self, buf: &IpcBuffer, timeout_ms: u64) -> io::Result<bool> {
        self.inner.send(buf.data(), timeout_ms)
    }

    /// Send a string (with null terminator for C++ compat).
    pub fn send_str(&mut self, s: &str, timeout_ms: u64) -> io::Result<bool> {
        let buf = IpcBuffer::from_str(s);
        self.inner.send(buf.data(), timeout_ms)
    }

    /// Try sending without blocking.
    pub fn try_send(&mut self, data: &[u8]) -> io::Result<bool> {
        self.inner.try_send(data)
    }

    /// Receive a message (receiver only). Returns empty buffer on timeout.
    pub fn recv(&mut self, timeout_ms: Option<u64>) -> io::Result<IpcBuffer> {
        self.inner.recv(timeout_ms)
    }

    /// Try receiving without blocking.
    pub fn try_recv(&mut self) -> io::Result<IpcBuffer> {
        self.inner.try_recv()
    }

    /// Remove all backing storage for a named route.
    pub fn clear_storage(name: &str) {
        Self::clear_storage_with_prefix("", name);
    }

    /// Remove all backing storage with a prefix.
    pub fn clear_storage_with_prefix(prefix: &str, name: &str) {
        let full_name = split_prefix(prefix, name);
        ChannelTransport::<{ config::SLOT_COUNT }>::clear_storage(
            &full_name,
            Topology::SpmcBroadcast,
        );
    }
}

// ---------------------------------------------------------------------------
// Channel — multi producer, multi consumer (broadcast)
// ---------------------------------------------------------------------------

/// A multi-producer, multi-consumer broadcast IPC channel.
///
/// Multiple `Channel` instances in `Sender` mode can send messages to all
/// `Channel` instances in `Receiver` mode with the same name. Internally
/// this is `Route`'s same ring, same CAS-based slot claim — multiple
/// senders racing the same CAS is exactly what makes it safe for them to
/// share a ring without a dedicated sender-side lock.
pub struct Channel {
    inner: ChanInner,
}

impl Channel {
    /// Connect to a named channel as either sender or receiver.
    pub fn connect(name: &str, mode: Mode) -> io::Result<Self> {
        Self::connect_with_prefix("", name, mode)
    }

    /// Connect with a prefix.
    pub fn connect_with_prefix(prefix: &str, name: &str, mode: Mode) -> io::Result<Self> {
        let inner = ChanInner::open(prefix, name, mode, Topology::MpmcBroadcast)?;
        Ok(Self { inner })
    }

    /// The channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Number of connected receivers.
    pub fn recv_count(&self) -> usize {
        self.inner.recv_count()
    }

    /// Wait until at least `count` receivers are connected.
    pub fn wait_for_recv(&self, count: usize, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait_for_recv(count, timeout_ms)
    }

    /// Send data (sender only).
    pub fn send(&mut self, data: &[u8], timeout_ms: u64) -> io::Result<bool> {
        self.inner.send(data, timeout_ms)
    }

    /// Send a buffer.
    pub fn send_buf(&mut self, buf: &IpcBuffer, timeout_ms: u64) -> io::Result<bool> {
        self.inner.send(buf.data(), timeout_ms)
    }

    /// Send a string.
    pub fn send_str(&mut self, s: &str, timeout_ms: u64) -> io::Result<bool> {
        let buf = IpcBuffer::from_str(s);
        self.inner.send(buf.data(), timeout_ms)
    }

    /// Try sending without blocking.
    pub fn try_send(&mut self, data: &[u8]) -> io::Result<bool> {
        self.inner.try_send(data)
    }

    /// Receive a message (receiver only).
    pub fn recv(&mut self, timeout_ms: Option<u64>) -> io::Result<IpcBuffer> {
        self.inner.recv(timeout_ms)
    }

    /// Try receiving without blocking.
    pub fn try_recv(&mut self) -> io::Result<IpcBuffer> {
        self.inner.try_recv()
    }

    /// Remove all backing storage for a named channel.
    pub fn clear_storage(name: &str) {
        Self::clear_storage_with_prefix("", name);
    }

    /// Remove all backing storage with a prefix.
    pub fn clear_storage_with_prefix(prefix: &str, name: &str) {
        let full_name = split_prefix(prefix, name);
        ChannelTransport::<{ config::SLOT_COUNT }>::clear_storage(
            &full_name,
            Topology::MpmcBroadcast,
        );
    }
}
