use std::time::Duration;

use aya::{
	maps::{MapData, PerCpuArray, RingBuf},
	programs::{trace_point::TracePointLinkId, TracePoint},
	Ebpf, EbpfLoader,
};
use sysprobe_common::{EVENTS_MAP, LOST_MAP};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use super::{ProbeAttach, ProbeDefinition, RecordSource};
use crate::error::{Error, Result};

/// Attaches the embedded eBPF object to a tracepoint.
pub struct KernelAttach {
	object: &'static [u8],
}

impl KernelAttach {
	pub fn new(object: &'static [u8]) -> Self {
		Self { object }
	}
}

pub struct KernelHandle {
	ebpf: Ebpf,
	program: &'static str,
	link: TracePointLinkId,
}

impl ProbeAttach for KernelAttach {
	type Handle = KernelHandle;
	type Source = KernelRing;

	fn attach(&mut self, def: &ProbeDefinition) -> Result<(KernelHandle, KernelRing)> {
		bump_memlock_rlimit();

		let mut ebpf = EbpfLoader::new()
			.set_max_entries(EVENTS_MAP, def.ring_size)
			.load(self.object)?;

		let program: &mut TracePoint = ebpf
			.program_mut(def.program)
			.ok_or(Error::EbpfProgNotFound(def.program))?
			.try_into()?;
		program.load()?;
		let link = program.attach(def.category, def.name)?;
		info!(
			"attached '{}' to {}/{} (ring {} bytes)",
			def.program, def.category, def.name, def.ring_size
		);

		let ring_buf = RingBuf::try_from(ebpf.take_map(EVENTS_MAP).ok_or(Error::EbpfMapNotFound(EVENTS_MAP))?)?;
		let lost = PerCpuArray::try_from(ebpf.take_map(LOST_MAP).ok_or(Error::EbpfMapNotFound(LOST_MAP))?)?;

		let handle = KernelHandle {
			ebpf,
			program: def.program,
			link,
		};
		let source = KernelRing {
			ringbuf_fd: AsyncFd::new(ring_buf)?,
			lost,
		};

		Ok((handle, source))
	}

	fn detach(&mut self, mut handle: KernelHandle) -> Result<()> {
		let program: &mut TracePoint = handle
			.ebpf
			.program_mut(handle.program)
			.ok_or(Error::EbpfProgNotFound(handle.program))?
			.try_into()?;
		program.detach(handle.link)?;
		info!("detached '{}'", handle.program);
		Ok(())
	}
}

/// The kernel ring buffer plus the per-CPU drop counter.
pub struct KernelRing {
	ringbuf_fd: AsyncFd<RingBuf<MapData>>,
	lost: PerCpuArray<MapData, u64>,
}

/// Most records taken by one drain. The ring keeps filling under load, so
/// without a cap a single poll could run on and delay the stop check.
const MAX_BATCH: usize = 4096;

impl KernelRing {
	fn drain(&mut self, out: &mut Vec<Vec<u8>>) -> usize {
		let ring_buf = self.ringbuf_fd.get_mut();
		take_batch(std::iter::from_fn(|| ring_buf.next().map(|item| item.to_vec())), out)
	}
}

fn take_batch(records: impl Iterator<Item = Vec<u8>>, out: &mut Vec<Vec<u8>>) -> usize {
	let before = out.len();
	out.extend(records.take(MAX_BATCH));
	out.len() - before
}

impl RecordSource for KernelRing {
	async fn poll(&mut self, timeout: Duration, out: &mut Vec<Vec<u8>>) -> Result<usize> {
		// Readiness is edge triggered, so look before waiting.
		let count = self.drain(out);
		if count > 0 {
			return Ok(count);
		}

		match tokio::time::timeout(timeout, self.ringbuf_fd.readable_mut()).await {
			// Clear first: anything committed after this raises a fresh edge.
			Ok(guard) => guard?.clear_ready(),
			Err(_) => return Ok(0),
		}

		Ok(self.drain(out))
	}

	fn lost(&self) -> Result<u64> {
		let per_cpu = self.lost.get(&0, 0)?;
		Ok(per_cpu.iter().sum())
	}
}

fn bump_memlock_rlimit() {
	// Bump the memlock rlimit. This is needed for older kernels that don't use the
	// new memcg based accounting, see https://lwn.net/Articles/837122/
	let rlim = libc::rlimit {
		rlim_cur: libc::RLIM_INFINITY,
		rlim_max: libc::RLIM_INFINITY,
	};
	let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
	if ret != 0 {
		debug!("remove limit on locked memory failed, ret is: {ret}");
	}
}

// region:    --- Tests


// endregion: --- Tests
