use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sysprobe_common::{SyscallEvent, COMM_LEN, EVENT_SIZE};
use tracing::{debug, info};
use zerocopy::IntoBytes;

use super::{ProbeAttach, ProbeDefinition, RecordSource};
use crate::channel::{ring_channel, ChannelReader, ChannelWriter};
use crate::error::{Error, Result};
use crate::event::CommName;

/// What a probe sees when its trigger fires.
#[derive(Clone, Copy, Debug)]
pub struct TriggerContext {
	pub pid: u32,
	pub syscall_id: u32,
	pub comm: [u8; COMM_LEN],
}

impl TriggerContext {
	pub fn new(pid: u32, syscall_id: u32, comm: &str) -> Self {
		Self {
			pid,
			syscall_id,
			comm: CommName::truncated(comm).to_raw(),
		}
	}
}

/// Userspace counterpart of the eBPF probe, publishing into a hosted channel.
#[derive(Clone)]
pub struct HostedProbe {
	writer: ChannelWriter,
}

impl HostedProbe {
	pub fn new(writer: ChannelWriter) -> Self {
		Self { writer }
	}

	/// Publishes one record or drops it. Returns whether it was published.
	///
	/// Never waits and never retries; a drop is already counted by the
	/// channel when `reserve` fails.
	pub fn trigger(&self, ctx: &TriggerContext) -> bool {
		let Some(mut slot) = self.writer.reserve(EVENT_SIZE) else {
			return false;
		};

		let record = SyscallEvent {
			pid: ctx.pid,
			syscall_id: ctx.syscall_id,
			comm: ctx.comm,
		};
		slot.fill(record.as_bytes());
		slot.submit();
		true
	}
}

impl RecordSource for ChannelReader {
	async fn poll(&mut self, timeout: Duration, out: &mut Vec<Vec<u8>>) -> Result<usize> {
		Ok(ChannelReader::poll(self, timeout, out).await)
	}

	fn lost(&self) -> Result<u64> {
		Ok(ChannelReader::lost(self))
	}
}

// region:    --- Loopback

/// First pid handed to loopback writers. The kernel never assigns pids at or
/// above `PID_MAX_LIMIT` (4194304), so these cannot collide with real ones.
pub const LOOPBACK_PID_BASE: u32 = 1 << 22;

/// Synthetic load for the hosted channel.
#[derive(Clone, Debug)]
pub struct LoopbackConfig {
	pub writers: u32,
	/// Triggers per writer.
	pub events: u32,
	/// Pause between two triggers of the same writer.
	pub interval: Duration,
}

/// Attaches writer threads that behave like the kernel probe firing on
/// several CPUs. Writer `n` reports pid `LOOPBACK_PID_BASE + n` and comm `loopback-n`;
/// its syscall ids count up from 0, so per-writer order is visible in the
/// output.
pub struct LoopbackAttach {
	config: LoopbackConfig,
	base_pid: u32,
}

impl LoopbackAttach {
	pub fn new(config: LoopbackConfig) -> Self {
		Self {
			config,
			base_pid: LOOPBACK_PID_BASE,
		}
	}
}

pub struct LoopbackHandle {
	stop: Arc<AtomicBool>,
	writers: Vec<JoinHandle<()>>,
}

impl ProbeAttach for LoopbackAttach {
	type Handle = LoopbackHandle;
	type Source = ChannelReader;

	fn attach(&mut self, def: &ProbeDefinition) -> Result<(LoopbackHandle, ChannelReader)> {
		let (writer, reader) = ring_channel(def.ring_size as u64)?;
		let stop = Arc::new(AtomicBool::new(false));

		let mut writers = Vec::with_capacity(self.config.writers as usize);
		for n in 0..self.config.writers {
			let probe = HostedProbe::new(writer.clone());
			let stop = stop.clone();
			let config = self.config.clone();
			let comm = format!("loopback-{n}");
			let pid = self.base_pid + n;

			let handle = thread::Builder::new()
				.name(comm.clone())
				.spawn(move || run_writer(&probe, &stop, &config, pid, &comm))?;
			writers.push(handle);
		}

		info!(
			"loopback attached: {} writers, {} events each, ring {} bytes",
			self.config.writers,
			self.config.events,
			writer.capacity()
		);

		Ok((LoopbackHandle { stop, writers }, reader))
	}

	fn detach(&mut self, handle: LoopbackHandle) -> Result<()> {
		handle.stop.store(true, Ordering::Relaxed);
		let mut panicked = false;
		for writer in handle.writers {
			panicked |= writer.join().is_err();
		}
		if panicked {
			return Err(Error::WriterPanicked);
		}
		debug!("loopback writers joined");
		Ok(())
	}
}

fn run_writer(probe: &HostedProbe, stop: &AtomicBool, config: &LoopbackConfig, pid: u32, comm: &str) {
	for seq in 0..config.events {
		if stop.load(Ordering::Relaxed) {
			break;
		}
		probe.trigger(&TriggerContext::new(pid, seq, comm));
		if !config.interval.is_zero() {
			thread::sleep(config.interval);
		}
	}
}

// endregion: --- Loopback

// region:    --- Tests


// endregion: --- Tests
