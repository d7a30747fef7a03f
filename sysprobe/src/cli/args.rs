use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use humantime::Duration;
use sysprobe_common::DEFAULT_RING_SIZE;

use crate::channel::{MAX_CAPACITY, MIN_CAPACITY};
use crate::consumer::ConsumerConfig;
use crate::filter::{CommMatch, Filter};
use crate::output::OutputFormat;
use crate::probe::LoopbackConfig;

#[derive(Parser, Debug)]
#[command(name = "sysprobe", about = "Trace syscall entries system wide")]
pub struct Cli {
	#[arg(long, value_enum, default_value = "kernel")]
	pub source: SourceKind,

	#[arg(long, conflicts_with = "comm_prefix", help = "Only emit events whose command name is exactly this")]
	pub comm: Option<String>,

	#[arg(long, help = "Only emit events whose command name starts with this")]
	pub comm_prefix: Option<String>,

	#[arg(long = "exclude", value_name = "PREFIX", help = "Drop command names starting with PREFIX (repeatable)")]
	pub exclude: Vec<String>,

	#[arg(long, help = "Keep events raised by the tracer itself")]
	pub include_self: bool,

	#[arg(long, default_value = "100ms")]
	pub poll_timeout: Duration,

	#[arg(long, default_value = "100ms")]
	pub drain_timeout: Duration,

	#[arg(long, value_parser = parse_ring_size, default_value_t = DEFAULT_RING_SIZE, help = "Channel size in bytes, a power of two")]
	pub ring_size: u32,

	#[arg(long, value_enum, default_value = "text")]
	pub format: OutputFormat,

	#[arg(long, help = "Stop after this long (e.g., 20s, 5m, 1h)")]
	pub time: Option<Duration>,

	#[arg(long, help = "Write logs to a daily rolling file instead of stderr")]
	pub log_file: Option<PathBuf>,

	// -- Loopback source
	#[arg(long, default_value_t = 4)]
	pub writers: u32,

	#[arg(long, default_value_t = 10_000, help = "Events per loopback writer")]
	pub events: u32,

	#[arg(long, default_value = "1ms")]
	pub interval: Duration,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum SourceKind {
	/// eBPF tracepoint on raw_syscalls/sys_enter. Needs root.
	Kernel,
	/// Userspace writer threads over the hosted channel.
	Loopback,
}

impl Cli {
	/// Filter from the name options. With the kernel source the tracer's own
	/// pid (`self_pid`) is dropped too, unless `--include-self` is given.
	/// Loopback events never carry a real pid, so nothing is excluded there.
	pub fn filter(&self, self_pid: u32) -> Filter {
		let filter = match (&self.comm, &self.comm_prefix) {
			(Some(name), _) => Filter::only(CommMatch::exact(name)),
			(None, Some(prefix)) => Filter::only(CommMatch::prefix(prefix)),
			(None, None) => Filter::accept_all(),
		};

		let filter = self
			.exclude
			.iter()
			.fold(filter, |filter, prefix| filter.excluding(CommMatch::prefix(prefix)));

		match self.source {
			SourceKind::Kernel if !self.include_self => filter.excluding_pid(self_pid),
			_ => filter,
		}
	}

	pub fn consumer_config(&self) -> ConsumerConfig {
		ConsumerConfig {
			poll_timeout: self.poll_timeout.into(),
			drain_timeout: self.drain_timeout.into(),
		}
	}

	pub fn loopback_config(&self) -> LoopbackConfig {
		LoopbackConfig {
			writers: self.writers,
			events: self.events,
			interval: self.interval.into(),
		}
	}
}

fn parse_ring_size(val: &str) -> core::result::Result<u32, String> {
	let size: u32 = val.parse().map_err(|err| format!("'{val}' is not a byte count: {err}"))?;
	let size_64 = size as u64;
	if !size.is_power_of_two() || size_64 < MIN_CAPACITY || size_64 > MAX_CAPACITY {
		return Err(format!(
			"ring size must be a power of two between {MIN_CAPACITY} and {MAX_CAPACITY}, got {size}"
		));
	}
	Ok(size)
}

// region:    --- Tests


// endregion: --- Tests
