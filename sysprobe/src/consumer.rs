use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::TraceEvent;
use crate::filter::Filter;
use crate::output::EventSink;
use crate::probe::{ProbeAttach, ProbeDefinition, RecordSource};
use crate::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConsumerState {
	Attaching,
	Running,
	Draining,
	Stopped,
}

#[derive(Copy, Clone, Debug)]
pub struct ConsumerConfig {
	/// Upper bound of one poll while running. Also bounds how long a stop
	/// request can go unnoticed.
	pub poll_timeout: Duration,
	/// Upper bound of the final poll once a stop was requested.
	pub drain_timeout: Duration,
}

impl Default for ConsumerConfig {
	fn default() -> Self {
		Self {
			poll_timeout: Duration::from_millis(100),
			drain_timeout: Duration::from_millis(100),
		}
	}
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
	pub received: u64,
	pub emitted: u64,
	pub filtered: u64,
	pub malformed: u64,
}

/// Session summary, taken at `Stopped`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Report {
	pub lost: u64,
	pub filtered: u64,
	pub emitted: u64,
	pub malformed: u64,
}

impl fmt::Display for Report {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "lost={} filtered={} emitted={}", self.lost, self.filtered, self.emitted)
	}
}

/// Drives one trace session: attach, poll/decode/filter/emit until asked to
/// stop, one last bounded poll, detach.
pub struct Consumer<A, S> {
	attach: A,
	filter: Filter,
	sink: S,
	config: ConsumerConfig,
	state: ConsumerState,
	stats: Stats,
}

impl<A: ProbeAttach, S: EventSink> Consumer<A, S> {
	pub fn new(attach: A, filter: Filter, sink: S, config: ConsumerConfig) -> Self {
		Self {
			attach,
			filter,
			sink,
			config,
			state: ConsumerState::Attaching,
			stats: Stats::default(),
		}
	}

	/// Runs the session to `Stopped`.
	///
	/// A failed attach stops right away with nothing to detach. Once attached,
	/// the probe is always detached, even when polling or emitting failed.
	pub async fn run(mut self, def: &ProbeDefinition, cancel: CancellationToken) -> Result<Report> {
		let (handle, mut source) = match self.attach.attach(def) {
			Ok(attached) => attached,
			Err(err) => {
				self.enter(ConsumerState::Stopped);
				error!("attach of '{}' failed: {err}", def.program);
				return Err(err);
			}
		};

		self.enter(ConsumerState::Running);
		let mut batch = Vec::new();
		let mut outcome = self.run_until_cancelled(&mut source, &mut batch, &cancel).await;

		if outcome.is_ok() {
			self.enter(ConsumerState::Draining);
			outcome = self.poll_once(&mut source, self.config.drain_timeout, &mut batch).await;
		}

		self.enter(ConsumerState::Stopped);
		let lost = source.lost();
		drop(source);
		let detached = self.attach.detach(handle);

		if let Err(err) = &outcome {
			warn!("trace session ended on error: {err}");
		}
		outcome?;
		detached?;

		let report = Report {
			lost: lost?,
			filtered: self.stats.filtered,
			emitted: self.stats.emitted,
			malformed: self.stats.malformed,
		};
		info!(
			"session done: received={} malformed={} {report}",
			self.stats.received, report.malformed
		);

		Ok(report)
	}

	async fn run_until_cancelled(
		&mut self,
		source: &mut A::Source,
		batch: &mut Vec<Vec<u8>>,
		cancel: &CancellationToken,
	) -> Result<()> {
		while !cancel.is_cancelled() {
			self.poll_once(source, self.config.poll_timeout, batch).await?;
		}
		debug!("stop requested");
		Ok(())
	}

	async fn poll_once(&mut self, source: &mut A::Source, timeout: Duration, batch: &mut Vec<Vec<u8>>) -> Result<()> {
		source.poll(timeout, batch).await?;
		self.process(batch)
	}

	/// Decode, filter, emit. Each record lands in exactly one counter.
	fn process(&mut self, batch: &mut Vec<Vec<u8>>) -> Result<()> {
		for record in batch.drain(..) {
			self.stats.received += 1;

			let evt = match TraceEvent::decode(&record) {
				Ok(evt) => evt,
				Err(err) => {
					self.stats.malformed += 1;
					debug!("dropping record: {err}");
					continue;
				}
			};

			if !self.filter.accepts(&evt) {
				self.stats.filtered += 1;
				continue;
			}

			self.sink.emit(evt)?;
			self.stats.emitted += 1;
		}
		Ok(())
	}

	fn enter(&mut self, state: ConsumerState) {
		debug!("consumer {:?} -> {state:?}", self.state);
		self.state = state;
	}
}

// region:    --- Tests

#[cfg(test)]
mod tests {
	type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>; // For tests.

	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};
	use std::time::Instant;

	use sysprobe_common::EVENT_SIZE;

	use super::*;
	use crate::channel::{record_len, ring_channel, ChannelReader};
	use crate::error::Error;
	use crate::filter::CommMatch;
	use crate::probe::{HostedProbe, LoopbackAttach, LoopbackConfig, TriggerContext, LOOPBACK_PID_BASE};
	use crate::trx::{new_channel, Rx, Tx};

	/// Hands out a prepared source, or refuses to attach.
	struct FxAttach<R> {
		source: Option<R>,
		detached: Arc<AtomicUsize>,
	}

	impl<R> FxAttach<R> {
		fn new(source: Option<R>) -> (Self, Arc<AtomicUsize>) {
			let detached = Arc::new(AtomicUsize::new(0));
			let attach = Self {
				source,
				detached: detached.clone(),
			};
			(attach, detached)
		}
	}

	impl<R: RecordSource> ProbeAttach for FxAttach<R> {
		type Handle = ();
		type Source = R;

		fn attach(&mut self, _def: &ProbeDefinition) -> crate::Result<((), R)> {
			let source = self.source.take().ok_or(Error::custom("attach refused"))?;
			Ok(((), source))
		}

		fn detach(&mut self, _handle: ()) -> crate::Result<()> {
			self.detached.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	struct BrokenSource;

	impl RecordSource for BrokenSource {
		async fn poll(&mut self, _timeout: Duration, _out: &mut Vec<Vec<u8>>) -> crate::Result<usize> {
			Err(Error::custom("ring gone"))
		}

		fn lost(&self) -> crate::Result<u64> {
			Ok(0)
		}
	}

	fn fx_config() -> ConsumerConfig {
		ConsumerConfig {
			poll_timeout: Duration::from_millis(20),
			drain_timeout: Duration::from_millis(20),
		}
	}

	fn fx_consumer<R: RecordSource>(
		source: Option<R>,
		filter: Filter,
	) -> (Consumer<FxAttach<R>, Tx<TraceEvent>>, Rx<TraceEvent>, Arc<AtomicUsize>) {
		let (attach, detached) = FxAttach::new(source);
		let (tx, rx) = new_channel::<TraceEvent>("events");
		(Consumer::new(attach, filter, tx, fx_config()), rx, detached)
	}

	fn collect(rx: &Rx<TraceEvent>) -> Vec<TraceEvent> {
		std::iter::from_fn(|| rx.try_recv()).collect()
	}

	fn cancelled() -> CancellationToken {
		let token = CancellationToken::new();
		token.cancel();
		token
	}

	#[tokio::test]
	async fn accept_all_emits_in_submission_order() -> Result<()> {
		// -- Setup & Fixtures
		let (writer, reader) = ring_channel(1024)?;
		let probe = HostedProbe::new(writer);
		for (pid, comm) in [(1, "A"), (2, "B"), (1, "A")] {
			probe.trigger(&TriggerContext::new(pid, 0, comm));
		}
		let (consumer, rx, _) = fx_consumer::<ChannelReader>(Some(reader), Filter::accept_all());
		let cancel = CancellationToken::new();
		let stopper = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(50)).await;
			stopper.cancel();
		});

		// -- Exec
		let report = consumer.run(&ProbeDefinition::default(), cancel).await?;

		// -- Check
		let comms: Vec<String> = collect(&rx).iter().map(|e| e.comm.to_string()).collect();
		assert_eq!(comms, ["A", "B", "A"]);
		assert_eq!(report.to_string(), "lost=0 filtered=0 emitted=3");

		Ok(())
	}

	#[tokio::test]
	async fn exact_filter_splits_emitted_filtered_and_malformed() -> Result<()> {
		// -- Setup & Fixtures
		let (writer, reader) = ring_channel(1024)?;
		let probe = HostedProbe::new(writer.clone());
		for comm in ["X", "Y", "Xy", "X"] {
			probe.trigger(&TriggerContext::new(5, 1, comm));
		}
		let mut short = writer.reserve(5).ok_or("no space for short record")?;
		short.fill(b"short");
		short.submit();
		let received = 5;
		let (consumer, rx, _) =
			fx_consumer::<ChannelReader>(Some(reader), Filter::only(CommMatch::exact("X")));

		// -- Exec
		let report = consumer.run(&ProbeDefinition::default(), cancelled()).await?;

		// -- Check
		let emitted = collect(&rx);
		assert_eq!(emitted.len(), 2);
		assert!(emitted.iter().all(|e| e.comm.as_str() == "X"));
		assert_eq!(report.malformed, 1);
		assert_eq!(report.filtered, received - report.emitted - report.malformed);
		assert_eq!(report.filtered, 2);

		Ok(())
	}

	#[tokio::test]
	async fn full_channel_reports_lost_records() -> Result<()> {
		// -- Setup & Fixtures
		let (writer, reader) = ring_channel(4 * record_len(EVENT_SIZE))?;
		let probe = HostedProbe::new(writer);
		let published: Vec<bool> = (0..6)
			.map(|n| probe.trigger(&TriggerContext::new(n, n, "burst")))
			.collect();
		let (consumer, rx, _) = fx_consumer::<ChannelReader>(Some(reader), Filter::accept_all());

		// -- Exec
		let report = consumer.run(&ProbeDefinition::default(), cancelled()).await?;

		// -- Check
		assert_eq!(published, [true, true, true, true, false, false]);
		assert_eq!(report.to_string(), "lost=2 filtered=0 emitted=4");
		let pids: Vec<u32> = collect(&rx).iter().map(|e| e.pid).collect();
		assert_eq!(pids, [0, 1, 2, 3]);

		Ok(())
	}

	#[tokio::test]
	async fn loopback_events_survive_self_pid_exclusion() -> Result<()> {
		// -- Setup & Fixtures
		let fx_loopback = LoopbackConfig {
			writers: 3,
			events: 50,
			interval: Duration::ZERO,
		};
		// A tracer pid in the range old loopback pids used to take.
		let filter = Filter::accept_all().excluding_pid(10_001);
		let (tx, rx) = new_channel::<TraceEvent>("events");
		let consumer = Consumer::new(LoopbackAttach::new(fx_loopback), filter, tx, fx_config());
		let cancel = CancellationToken::new();
		let stopper = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(200)).await;
			stopper.cancel();
		});

		// -- Exec
		let report = consumer.run(&ProbeDefinition::sys_enter(1 << 16), cancel).await?;

		// -- Check
		assert_eq!(report.to_string(), "lost=0 filtered=0 emitted=150");
		let emitted = collect(&rx);
		assert_eq!(emitted.len(), 150);
		assert!(emitted.iter().all(|e| e.pid >= LOOPBACK_PID_BASE));

		Ok(())
	}

	#[tokio::test]
	async fn failed_attach_stops_without_detach() -> Result<()> {
		// -- Setup & Fixtures
		let (consumer, rx, detached) = fx_consumer::<ChannelReader>(None, Filter::accept_all());

		// -- Exec
		let res = consumer.run(&ProbeDefinition::default(), CancellationToken::new()).await;

		// -- Check
		assert!(res.is_err());
		assert_eq!(detached.load(Ordering::SeqCst), 0);
		assert!(rx.try_recv().is_none());

		Ok(())
	}

	#[tokio::test]
	async fn poll_failure_still_detaches_once() -> Result<()> {
		// -- Setup & Fixtures
		let (consumer, _rx, detached) = fx_consumer(Some(BrokenSource), Filter::accept_all());

		// -- Exec
		let res = consumer.run(&ProbeDefinition::default(), CancellationToken::new()).await;

		// -- Check
		assert!(res.is_err());
		assert_eq!(detached.load(Ordering::SeqCst), 1);

		Ok(())
	}

	#[tokio::test]
	async fn stops_within_one_poll_and_one_drain() -> Result<()> {
		// -- Setup & Fixtures
		let (_writer, reader) = ring_channel(1024)?;
		let (consumer, _rx, detached) = fx_consumer::<ChannelReader>(Some(reader), Filter::accept_all());
		let cancel = CancellationToken::new();
		let stopper = cancel.clone();
		let canceller = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(30)).await;
			stopper.cancel();
			Instant::now()
		});

		// -- Exec
		consumer.run(&ProbeDefinition::default(), cancel).await?;
		let stopped_at = Instant::now();
		let cancelled_at = canceller.await?;

		// -- Check
		let bound = fx_config().poll_timeout + fx_config().drain_timeout;
		assert!(stopped_at.duration_since(cancelled_at) < bound + Duration::from_millis(100));
		assert_eq!(detached.load(Ordering::SeqCst), 1);

		Ok(())
	}

	#[tokio::test]
	async fn emit_failure_ends_the_session() -> Result<()> {
		// -- Setup & Fixtures
		let (writer, reader) = ring_channel(1024)?;
		HostedProbe::new(writer).trigger(&TriggerContext::new(1, 1, "a"));
		let (consumer, rx, detached) = fx_consumer::<ChannelReader>(Some(reader), Filter::accept_all());
		drop(rx);

		// -- Exec
		let res = consumer.run(&ProbeDefinition::default(), cancelled()).await;

		// -- Check
		assert!(res.is_err());
		assert_eq!(detached.load(Ordering::SeqCst), 1);

		Ok(())
	}
}

// endregion: --- Tests
