use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Width of the kernel's task comm buffer (`TASK_COMM_LEN`), NUL included.
pub const COMM_LEN: usize = 16;

/// One syscall entry, as published by the probe.
///
/// The layout is shared verbatim with the kernel side, so every field is
/// fixed width and the struct carries no padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SyscallEvent {
	pub pid: u32,              // 0..4   | tgid of the caller
	pub syscall_id: u32,       // 4..8
	pub comm: [u8; COMM_LEN],  // 8..24
}

pub const EVENT_SIZE: usize = core::mem::size_of::<SyscallEvent>();

// region:    --- Tests


// endregion: --- Tests
