// region:    --- Modules
mod channel;
mod cli;
mod consumer;
mod error;
mod event;
mod filter;
mod output;
mod probe;
mod signal;
mod supervisor;
mod trx;
// endregion: --- Modules

use crate::{
	cli::args::{Cli, SourceKind},
	consumer::Consumer,
	event::TraceEvent,
	output::OutputWorker,
	probe::{KernelAttach, LoopbackAttach, ProbeDefinition},
	signal::{cancel_after, install_signal_handlers},
	supervisor::Supervisor,
	trx::new_channel,
};

pub use self::error::{Error, Result};
use clap::Parser;
use std::{
	ffi::OsStr,
	io::{self, BufWriter},
	path::Path,
};
use tracing::info;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
	let args = Cli::parse();
	let _tracing_guard = init_tracing(args.log_file.as_deref());

	let filter = args.filter(std::process::id());

	let mut supervisor = Supervisor::new();
	install_signal_handlers(supervisor.token())?;
	if let Some(run_time) = args.time {
		cancel_after(supervisor.token(), run_time.into());
	}

	let (events_tx, events_rx) = new_channel::<TraceEvent>("events");
	let output = OutputWorker::new(events_rx, args.format, BufWriter::new(io::stdout()));
	supervisor.spawn("output", output.run());

	let def = ProbeDefinition::sys_enter(args.ring_size);
	let config = args.consumer_config();
	info!("tracing {}/{} from {:?} source", def.category, def.name, args.source);

	// The consumer owns the only sender, so the output worker finishes once
	// the session is over.
	let report = match args.source {
		SourceKind::Kernel => {
			let attach = KernelAttach::new(aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/sysprobe")));
			Consumer::new(attach, filter, events_tx, config)
				.run(&def, supervisor.token())
				.await
		}
		SourceKind::Loopback => {
			let attach = LoopbackAttach::new(args.loopback_config());
			Consumer::new(attach, filter, events_tx, config)
				.run(&def, supervisor.token())
				.await
		}
	};

	supervisor.shutdown().await?;
	let report = report?;
	eprintln!("{report}");

	Ok(())
}

/// Logs go to stderr, or to a daily rolling file with `--log-file`. Stdout is
/// reserved for events.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
	let builder = tracing_subscriber::fmt()
		.with_target(false)
		.with_env_filter(EnvFilter::from_default_env());

	match log_file {
		Some(path) => {
			let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
			let file_name = path.file_name().unwrap_or(OsStr::new("sysprobe.log"));
			let (non_blocking_writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, file_name));
			builder.with_writer(non_blocking_writer).with_ansi(false).init();
			Some(guard)
		}
		None => {
			builder.with_writer(io::stderr).init();
			None
		}
	}
}
