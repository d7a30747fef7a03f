use std::{fmt, sync::Arc};

use serde::{Serialize, Serializer};
use sysprobe_common::{SyscallEvent, COMM_LEN, EVENT_SIZE};
use zerocopy::FromBytes;

use crate::error::{Error, Result};

/// Longest name the kernel keeps; the last comm byte is always NUL there.
pub const COMM_MAX: usize = COMM_LEN - 1;

/// A process short name, bounded to what the kernel captures.
///
/// Names longer than `COMM_MAX` bytes are cut, the same way the kernel cuts
/// `task->comm`, so user supplied names compare equal to captured ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommName(Arc<str>);

impl CommName {
	/// Bytes up to the first NUL, or the whole buffer when there is none.
	pub fn from_raw(raw: &[u8; COMM_LEN]) -> Self {
		let len = raw.iter().position(|&b| b == 0).unwrap_or(COMM_LEN);
		Self(Arc::from(String::from_utf8_lossy(&raw[..len])))
	}

	pub fn truncated(name: &str) -> Self {
		let mut end = name.len().min(COMM_MAX);
		while !name.is_char_boundary(end) {
			end -= 1;
		}
		Self(Arc::from(&name[..end]))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Raw comm buffer as the kernel would fill it.
	pub fn to_raw(&self) -> [u8; COMM_LEN] {
		let mut raw = [0u8; COMM_LEN];
		let bytes = self.0.as_bytes();
		let len = bytes.len().min(COMM_MAX);
		raw[..len].copy_from_slice(&bytes[..len]);
		raw
	}
}

impl fmt::Display for CommName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Serialize for CommName {
	fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

/// A decoded syscall entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
	pub pid: u32,
	pub syscall_id: u32,
	pub comm: CommName,
}

impl TraceEvent {
	/// Decodes one ring buffer record. Anything but an exact-size record is
	/// rejected, since the probe only ever publishes whole `SyscallEvent`s.
	pub fn decode(data: &[u8]) -> Result<Self> {
		let raw = SyscallEvent::read_from_bytes(data).map_err(|_| Error::InvalidEventSize {
			len: data.len(),
			expected: EVENT_SIZE,
		})?;
		Ok(Self::from(raw))
	}
}

impl From<SyscallEvent> for TraceEvent {
	fn from(raw: SyscallEvent) -> Self {
		Self {
			pid: raw.pid,
			syscall_id: raw.syscall_id,
			comm: CommName::from_raw(&raw.comm),
		}
	}
}

// region:    --- Tests

#[cfg(test)]
mod tests {
	type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>; // For tests.

	use super::*;
	use zerocopy::IntoBytes;

	fn fx_raw(pid: u32, syscall_id: u32, comm: &[u8]) -> SyscallEvent {
		let mut buf = [0u8; COMM_LEN];
		buf[..comm.len()].copy_from_slice(comm);
		SyscallEvent { pid, syscall_id, comm: buf }
	}

	#[test]
	fn decode_exact_record() -> Result<()> {
		// -- Setup & Fixtures
		let fx_evt = fx_raw(4242, 0, b"bash");

		// -- Exec
		let evt = TraceEvent::decode(fx_evt.as_bytes())?;

		// -- Check
		assert_eq!(evt.pid, 4242);
		assert_eq!(evt.syscall_id, 0);
		assert_eq!(evt.comm.as_str(), "bash");

		Ok(())
	}

	#[test]
	fn decode_rejects_truncated_and_oversized_records() {
		// -- Setup & Fixtures
		let fx_evt = fx_raw(1, 1, b"cat");
		let bytes = fx_evt.as_bytes();
		let mut padded = bytes.to_vec();
		padded.extend_from_slice(&[0u8; 8]);

		// -- Exec & Check
		assert!(matches!(
			TraceEvent::decode(&bytes[..EVENT_SIZE - 1]),
			Err(Error::InvalidEventSize { len, .. }) if len == EVENT_SIZE - 1
		));
		assert!(matches!(TraceEvent::decode(&padded), Err(Error::InvalidEventSize { .. })));
		assert!(matches!(TraceEvent::decode(&[]), Err(Error::InvalidEventSize { len: 0, .. })));
	}

	#[test]
	fn comm_without_nul_uses_full_width() {
		let fx_comm = *b"0123456789abcdef";

		let comm = CommName::from_raw(&fx_comm);

		assert_eq!(comm.as_str(), "0123456789abcdef");
	}

	#[test]
	fn comm_ignores_bytes_after_nul() {
		let mut fx_comm = [0xFFu8; COMM_LEN];
		fx_comm[..5].copy_from_slice(b"sshd\0");

		let comm = CommName::from_raw(&fx_comm);

		assert_eq!(comm.as_str(), "sshd");
	}

	#[test]
	fn truncated_matches_kernel_width() {
		// -- Setup & Fixtures
		let fx_long = "trace_syscalls_user";

		// -- Exec
		let comm = CommName::truncated(fx_long);

		// -- Check
		assert_eq!(comm.as_str(), "trace_syscalls_");
		assert_eq!(CommName::from_raw(&comm.to_raw()), comm);
	}

	#[test]
	fn truncated_keeps_char_boundaries() {
		// 14 ASCII bytes then a 2 byte char straddling the cut.
		let fx_name = "abcdefghijklmné";

		let comm = CommName::truncated(fx_name);

		assert_eq!(comm.as_str(), "abcdefghijklmn");
	}

	#[test]
	fn trace_event_serializes_as_flat_object() -> Result<()> {
		let evt = TraceEvent::from(fx_raw(7, 59, b"ls"));

		let json = serde_json::to_string(&evt)?;

		assert_eq!(json, r#"{"pid":7,"syscall_id":59,"comm":"ls"}"#);
		Ok(())
	}
}

// endregion: --- Tests
