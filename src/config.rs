// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Compile-time configuration constants. These are baked into the shared
// memory wire layout (slot size, ring capacity, ...) so they are crate
// consts, not a runtime-configurable struct — mirrors how the teacher bakes
// `DATA_LENGTH`/`RING_SIZE`/`CHUNK_ALIGN` as consts in channel.rs and
// chunk_storage.rs rather than threading a config object through.

/// Inline slot payload size, in bytes.
pub const INLINE_SIZE: usize = 64;

/// Alignment of the inline slot payload.
pub const ALIGN_SIZE: usize = 8;

/// Ring capacity. Must be a power of two.
pub const SLOT_COUNT: usize = 256;

/// Threshold above which `ChannelTransport` uses the large-message pool
/// instead of an inline/segmented slot. Per the documented thresholds
/// (`INLINE_SIZE == LARGE_LIMIT == 64`) the segmented band is empty by
/// default; raising `LARGE_LIMIT` above `INLINE_SIZE` activates segmenting.
pub const LARGE_LIMIT: usize = 64;

/// Large-pool chunk alignment, in bytes.
pub const LARGE_ALIGN: usize = 1024;

/// Cached chunk count per size class in the large-message pool.
pub const LARGE_CACHE: usize = 32;

/// Fixed receiver bound — width of `ConnectionMask`.
pub const MAX_RECEIVERS: usize = 32;

/// Retries before a hot CAS loop falls back to blocking on a `Waiter`.
pub const SPIN_BUDGET: u32 = 1024;

const _: () = assert!(SLOT_COUNT.is_power_of_two());
