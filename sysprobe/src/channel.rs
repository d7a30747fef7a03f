//! In-process ring channel with the kernel ring buffer's semantics.
//!
//! Many writers reserve space, fill it, then submit or discard; a single
//! reader drains committed records in reservation order. Records are laid
//! out like `BPF_MAP_TYPE_RINGBUF` ones: an 8 byte header holding the
//! payload length plus BUSY/DISCARD bits, then the payload, padded to 8.
//!
//! Only the producer position is guarded by a lock. Payload writes happen
//! outside it and are published by a release store of the header, which the
//! reader observes with an acquire load before touching the payload.

use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc, Mutex, PoisonError,
};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};

const HDR_SIZE: u64 = 8;
const WORD: u64 = 8;
const BUSY_BIT: u64 = 1 << 31;
const DISCARD_BIT: u64 = 1 << 30;
const LEN_MASK: u64 = DISCARD_BIT - 1;

pub const MIN_CAPACITY: u64 = 16;
pub const MAX_CAPACITY: u64 = 1 << 30;

struct Shared {
	words: Box<[AtomicU64]>,
	capacity: u64,
	/// Reservation bookkeeping. Holds the next free byte position.
	reserve_lock: Mutex<u64>,
	producer_pos: AtomicU64,
	consumer_pos: AtomicU64,
	lost: AtomicU64,
	notify: Notify,
}

impl Shared {
	fn word(&self, pos: u64) -> &AtomicU64 {
		let idx = (pos / WORD) & (self.words.len() as u64 - 1);
		&self.words[idx as usize]
	}
}

/// Creates a channel of `capacity` bytes and returns its two ends.
///
/// The writer end is cheap to clone, one clone per producing thread. The
/// reader end is unique.
pub fn ring_channel(capacity: u64) -> Result<(ChannelWriter, ChannelReader)> {
	if !capacity.is_power_of_two() || !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
		return Err(Error::InvalidRingSize {
			size: capacity,
			min: MIN_CAPACITY,
			max: MAX_CAPACITY,
		});
	}

	let len = (capacity / WORD) as usize;
	let mut words = Vec::new();
	words
		.try_reserve_exact(len)
		.map_err(|_| Error::ChannelAlloc { size: capacity })?;
	words.resize_with(len, || AtomicU64::new(0));

	let shared = Arc::new(Shared {
		words: words.into_boxed_slice(),
		capacity,
		reserve_lock: Mutex::new(0),
		producer_pos: AtomicU64::new(0),
		consumer_pos: AtomicU64::new(0),
		lost: AtomicU64::new(0),
		notify: Notify::new(),
	});

	Ok((
		ChannelWriter {
			shared: shared.clone(),
		},
		ChannelReader { shared },
	))
}

/// Space taken by a record of `size` payload bytes, header included.
pub fn record_len(size: usize) -> u64 {
	(size as u64 + HDR_SIZE).div_ceil(WORD) * WORD
}

// region:    --- Writer

#[derive(Clone)]
pub struct ChannelWriter {
	shared: Arc<Shared>,
}

impl ChannelWriter {
	/// Claims room for a `size` byte record.
	///
	/// Never blocks on the reader and never overwrites unread data. When the
	/// free space is too small the loss counter is bumped and `None` returned.
	pub fn reserve(&self, size: usize) -> Option<Reservation<'_>> {
		let shared = &*self.shared;
		let total = record_len(size);
		if size as u64 > LEN_MASK || total > shared.capacity {
			shared.lost.fetch_add(1, Ordering::Relaxed);
			return None;
		}

		let mut next = shared.reserve_lock.lock().unwrap_or_else(PoisonError::into_inner);
		let start = *next;
		let consumer = shared.consumer_pos.load(Ordering::Acquire);
		if start - consumer + total > shared.capacity {
			drop(next);
			shared.lost.fetch_add(1, Ordering::Relaxed);
			return None;
		}

		shared.word(start).store(size as u64 | BUSY_BIT, Ordering::Relaxed);
		*next = start + total;
		shared.producer_pos.store(start + total, Ordering::Release);
		drop(next);

		Some(Reservation {
			shared,
			start,
			size,
			committed: false,
		})
	}

	pub fn capacity(&self) -> u64 {
		self.shared.capacity
	}
}

/// A claimed, not yet visible, region of the channel.
///
/// Dropping it without `submit` discards it: the reader skips the space
/// and nothing written into it is ever observed.
#[must_use = "a reservation holds channel space until it is submitted or discarded"]
pub struct Reservation<'a> {
	shared: &'a Shared,
	start: u64,
	size: usize,
	committed: bool,
}

impl Reservation<'_> {
	/// Copies `payload` into the reserved region, zero filling any tail.
	/// Bytes past the reserved length are ignored.
	pub fn fill(&mut self, payload: &[u8]) {
		let payload = &payload[..payload.len().min(self.size)];
		let base = self.start + HDR_SIZE;
		let words = self.size.div_ceil(WORD as usize);

		for i in 0..words {
			let mut buf = [0u8; WORD as usize];
			let from = i * WORD as usize;
			if from < payload.len() {
				let to = (from + WORD as usize).min(payload.len());
				buf[..to - from].copy_from_slice(&payload[from..to]);
			}
			self.shared
				.word(base + i as u64 * WORD)
				.store(u64::from_le_bytes(buf), Ordering::Relaxed);
		}
	}

	/// Makes the record visible to the reader.
	pub fn submit(mut self) {
		self.commit(false);
	}

	/// Both outcomes wake the reader: records held back behind this one
	/// become drainable either way.
	fn commit(&mut self, discard: bool) {
		let mut hdr = self.size as u64;
		if discard {
			hdr |= DISCARD_BIT;
		}
		self.shared.word(self.start).store(hdr, Ordering::Release);
		self.committed = true;
		self.shared.notify.notify_one();
	}
}

impl Drop for Reservation<'_> {
	fn drop(&mut self) {
		if !self.committed {
			self.commit(true);
		}
	}
}

// endregion: --- Writer

// region:    --- Reader

pub struct ChannelReader {
	shared: Arc<Shared>,
}

impl ChannelReader {
	/// Moves every committed record into `out`, in reservation order.
	///
	/// Stops at the first record still being filled, so a slow writer holds
	/// back the ones reserved after it. Discarded records are skipped.
	pub fn drain(&mut self, out: &mut Vec<Vec<u8>>) -> usize {
		let shared = &*self.shared;
		// Only this reader stores the consumer position.
		let mut consumer = shared.consumer_pos.load(Ordering::Relaxed);
		let producer = shared.producer_pos.load(Ordering::Acquire);
		let mut count = 0;

		while consumer < producer {
			let hdr = shared.word(consumer).load(Ordering::Acquire);
			if hdr & BUSY_BIT != 0 {
				break;
			}

			let len = (hdr & LEN_MASK) as usize;
			if hdr & DISCARD_BIT == 0 {
				out.push(self.read_payload(consumer + HDR_SIZE, len));
				count += 1;
			}

			consumer += record_len(len);
			shared.consumer_pos.store(consumer, Ordering::Release);
		}

		count
	}

	/// Returns whatever is committed, waiting up to `timeout` for the first
	/// record when the channel is empty.
	pub async fn poll(&mut self, timeout: Duration, out: &mut Vec<Vec<u8>>) -> usize {
		let deadline = Instant::now() + timeout;
		loop {
			let count = self.drain(out);
			if count > 0 {
				return count;
			}

			let notified = self.shared.notify.notified();
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return self.drain(out);
			}
		}
	}

	pub fn lost(&self) -> u64 {
		self.shared.lost.load(Ordering::Relaxed)
	}

	fn read_payload(&self, pos: u64, len: usize) -> Vec<u8> {
		let mut payload = Vec::with_capacity(len.div_ceil(WORD as usize) * WORD as usize);
		let mut at = pos;
		while payload.len() < len {
			let word = self.shared.word(at).load(Ordering::Relaxed);
			payload.extend_from_slice(&word.to_le_bytes());
			at += WORD;
		}
		payload.truncate(len);
		payload
	}
}

// endregion: --- Reader

// region:    --- Tests


// endregion: --- Tests
