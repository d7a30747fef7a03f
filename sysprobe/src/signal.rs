use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;

/// Cancels `token` on the first SIGINT or SIGTERM.
///
/// Both handlers are registered before this returns, so a registration
/// failure is reported as a setup error.
pub fn install_signal_handlers(token: CancellationToken) -> Result<()> {
	let mut sigint = signal(SignalKind::interrupt())?;
	let mut sigterm = signal(SignalKind::terminate())?;

	tokio::spawn(async move {
		tokio::select! {
			_ = sigint.recv() => info!("SIGINT received, stopping"),
			_ = sigterm.recv() => info!("SIGTERM received, stopping"),
			_ = token.cancelled() => return,
		}
		token.cancel();
	});

	Ok(())
}

/// Cancels `token` once `run_time` has elapsed.
pub fn cancel_after(token: CancellationToken, run_time: Duration) {
	tokio::spawn(async move {
		tokio::select! {
			_ = tokio::time::sleep(run_time) => {
				info!("run time of {} elapsed, stopping", humantime::format_duration(run_time));
				token.cancel();
			}
			_ = token.cancelled() => {}
		}
	});
}

// region:    --- Tests


// endregion: --- Tests
