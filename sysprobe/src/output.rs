use std::io::Write;

use clap::ValueEnum;
use tracing::debug;

use crate::event::TraceEvent;
use crate::trx::{Rx, Tx};
use crate::Result;

/// Where accepted events go.
pub trait EventSink {
	fn emit(&mut self, evt: TraceEvent) -> Result<()>;
}

impl EventSink for Tx<TraceEvent> {
	fn emit(&mut self, evt: TraceEvent) -> Result<()> {
		self.send_sync(evt)
	}
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// `PID <pid> (<comm>) called syscall ID <id>`
	#[default]
	Text,
	/// One JSON object per line.
	Json,
}

/// Writes events off the consumer loop, one line each.
pub struct OutputWorker<W> {
	rx: Rx<TraceEvent>,
	format: OutputFormat,
	out: W,
}

impl<W: Write> OutputWorker<W> {
	pub fn new(rx: Rx<TraceEvent>, format: OutputFormat, out: W) -> Self {
		Self { rx, format, out }
	}

	/// Runs until every sender is gone and the queue is empty.
	pub async fn run(mut self) -> Result<()> {
		let mut lines = 0u64;
		while let Ok(evt) = self.rx.recv().await {
			render(&mut self.out, self.format, &evt)?;
			lines += 1;
			while let Some(evt) = self.rx.try_recv() {
				render(&mut self.out, self.format, &evt)?;
				lines += 1;
			}
			self.out.flush()?;
		}
		self.out.flush()?;
		debug!("'{}' closed after {lines} lines", self.rx.name());

		Ok(())
	}
}

pub fn render(out: &mut impl Write, format: OutputFormat, evt: &TraceEvent) -> Result<()> {
	match format {
		OutputFormat::Text => {
			writeln!(out, "PID {} ({}) called syscall ID {}", evt.pid, evt.comm, evt.syscall_id)?;
		}
		OutputFormat::Json => {
			serde_json::to_writer(&mut *out, evt)?;
			out.write_all(b"\n")?;
		}
	}
	Ok(())
}

// region:    --- Tests


// endregion: --- Tests
