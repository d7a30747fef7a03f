use aya_ebpf::{
	helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid},
	programs::TracePointContext,
};
use sysprobe_common::{SyscallEvent, COMM_LEN};

use crate::{EVENTS, LOST};

// raw_syscalls/sys_enter: `field:long id; offset:8; size:8;`
// cat /sys/kernel/debug/tracing/events/raw_syscalls/sys_enter/format
const SYSCALL_ID_OFFSET: usize = 8;

pub fn try_sys_enter(ctx: TracePointContext) -> Result<u32, u32> {
	let syscall_id: i64 = match unsafe { ctx.read_at(SYSCALL_ID_OFFSET) } {
		Ok(val) => val,
		Err(_) => return Err(1),
	};

	let Some(mut entry) = EVENTS.reserve::<SyscallEvent>(0) else {
		record_lost();
		return Ok(0);
	};

	let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
	let comm = bpf_get_current_comm().unwrap_or([0u8; COMM_LEN]);

	entry.write(SyscallEvent {
		pid,
		syscall_id: syscall_id as u32,
		comm,
	});
	entry.submit(0);

	Ok(0)
}

/// Per-CPU slot, so a plain increment cannot race with another writer.
fn record_lost() {
	if let Some(counter) = LOST.get_ptr_mut(0) {
		unsafe { *counter += 1 };
	}
}
