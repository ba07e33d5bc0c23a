// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process messaging over named shared memory: unicast,
// competitive-unicast, and broadcast channels built on a lock-free
// circular buffer, with robust-mutex/condvar recovery from a crashed
// peer. Binary layout, naming conventions, and recovery semantics are
// our own; the platform syscalls (shm_open/mmap, pthread robust mutexes,
// CreateFileMapping) are standard POSIX/Win32.

pub mod error;
pub use error::IpcErrorKind;

pub mod config;

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmObject, ShmOpenMode};

mod mutex;
pub use mutex::RobustMutex;

mod condition;
pub use condition::CondVar;

mod waiter;
pub use waiter::Waiter;

mod spin_lock;
pub use spin_lock::SpinLock;

mod rw_lock;
pub use rw_lock::RwLock;

pub mod circ;
pub use circ::CircularArray;

pub mod prodcons;
pub use prodcons::Topology;

mod queue;
pub use queue::Queue;

mod large_pool;
pub use large_pool::LargeMsgPool;

mod buffer;
pub use buffer::{IpcBuffer, ReceivedMessage};

mod transport;
pub use transport::ChannelTransport;

mod channel;
pub use channel::{Channel, Mode, Route};

mod scoped_access;
pub use scoped_access::ScopedAccess;
