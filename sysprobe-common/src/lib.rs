#![cfg_attr(not(test), no_std)]

mod event;

pub use event::*;

/// Name of the ring buffer map shared by the probe and the consumer.
pub const EVENTS_MAP: &str = "EVENTS";

/// Name of the per-CPU array holding the count of records that found no room.
pub const LOST_MAP: &str = "LOST";

/// Name of the tracepoint program in the probe object.
pub const PROGRAM_NAME: &str = "sys_enter";

/// 16 MiB. Power of two and a multiple of the page size, as the kernel requires.
pub const DEFAULT_RING_SIZE: u32 = 1 << 24;
