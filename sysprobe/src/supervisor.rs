use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Result;

/// Owns the background tasks of a trace session and the token that stops it.
pub struct Supervisor {
	shutdown: CancellationToken,
	tasks: JoinSet<Result<()>>,
}

impl Supervisor {
	pub fn new() -> Self {
		Self {
			shutdown: CancellationToken::new(),
			tasks: JoinSet::new(),
		}
	}

	pub fn token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	pub fn spawn<F>(&mut self, name: &'static str, fut: F)
	where
		F: Future<Output = Result<()>> + Send + 'static,
	{
		debug!("spawning '{name}'");
		self.tasks.spawn(fut);
	}

	/// Cancels the token and waits for every task. The first task error wins.
	pub async fn shutdown(mut self) -> Result<()> {
		info!("supervisor shutdown starting");
		self.shutdown.cancel();

		while let Some(res) = self.tasks.join_next().await {
			res??;
		}
		info!("supervisor shutdown complete");

		Ok(())
	}
}

// region:    --- Tests

#[cfg(test)]
mod tests {
	type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>; // For tests.

	use super::*;
	use crate::Error;

	#[tokio::test]
	async fn shutdown_cancels_and_joins() -> Result<()> {
		// -- Setup & Fixtures
		let mut supervisor = Supervisor::new();
		let token = supervisor.token();
		supervisor.spawn("waiter", async move {
			token.cancelled().await;
			Ok(())
		});

		// -- Exec
		let res = supervisor.shutdown().await;

		// -- Check
		assert!(res.is_ok());

		Ok(())
	}

	#[tokio::test]
	async fn shutdown_surfaces_task_errors() -> Result<()> {
		// -- Setup & Fixtures
		let mut supervisor = Supervisor::new();
		supervisor.spawn("failing", async { Err(Error::custom("stdout closed")) });

		// -- Exec
		let res = supervisor.shutdown().await;

		// -- Check
		assert!(res.is_err());

		Ok(())
	}
}

// endregion: --- Tests
