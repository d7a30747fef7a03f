mod hosted;
mod kernel;

pub use hosted::*;
pub use kernel::*;

use std::time::Duration;

use sysprobe_common::{DEFAULT_RING_SIZE, PROGRAM_NAME};

use crate::Result;

/// Where and how the probe gets attached.
#[derive(Clone, Debug)]
pub struct ProbeDefinition {
	pub program: &'static str,
	pub category: &'static str,
	pub name: &'static str,
	/// Channel capacity in bytes.
	pub ring_size: u32,
}

impl ProbeDefinition {
	/// Every syscall entry, system wide.
	pub fn sys_enter(ring_size: u32) -> Self {
		Self {
			program: PROGRAM_NAME,
			category: "raw_syscalls",
			name: "sys_enter",
			ring_size,
		}
	}
}

impl Default for ProbeDefinition {
	fn default() -> Self {
		Self::sys_enter(DEFAULT_RING_SIZE)
	}
}

/// Reader side of a channel the probe publishes into.
#[allow(async_fn_in_trait)]
pub trait RecordSource {
	/// Appends every record that is visible now to `out`. When there is none,
	/// waits up to `timeout` for one. Returns how many were appended.
	async fn poll(&mut self, timeout: Duration, out: &mut Vec<Vec<u8>>) -> Result<usize>;

	/// Records the probe could not publish because the channel was full.
	fn lost(&self) -> Result<u64>;
}

/// Puts a probe in place and takes it down again.
pub trait ProbeAttach {
	type Handle;
	type Source: RecordSource;

	fn attach(&mut self, def: &ProbeDefinition) -> Result<(Self::Handle, Self::Source)>;

	fn detach(&mut self, handle: Self::Handle) -> Result<()>;
}
