use crate::event::{CommName, TraceEvent};

/// How a configured name is compared against a captured comm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommMatch {
	Exact(CommName),
	Prefix(CommName),
}

impl CommMatch {
	/// Patterns are cut to the kernel comm width, so a long exact name still
	/// matches its own truncated capture.
	pub fn exact(name: &str) -> Self {
		Self::Exact(CommName::truncated(name))
	}

	pub fn prefix(name: &str) -> Self {
		Self::Prefix(CommName::truncated(name))
	}

	pub fn matches(&self, comm: &CommName) -> bool {
		match self {
			Self::Exact(name) => comm == name,
			Self::Prefix(prefix) => comm.as_str().starts_with(prefix.as_str()),
		}
	}
}

/// Decides, per decoded event, whether it reaches the output.
///
/// Stateless: the same event always gets the same answer.
#[derive(Clone, Debug, Default)]
pub struct Filter {
	include: Option<CommMatch>,
	exclude: Vec<CommMatch>,
	exclude_pid: Option<u32>,
}

impl Filter {
	pub fn accept_all() -> Self {
		Self::default()
	}

	pub fn only(rule: CommMatch) -> Self {
		Self {
			include: Some(rule),
			..Self::default()
		}
	}

	pub fn excluding(mut self, rule: CommMatch) -> Self {
		self.exclude.push(rule);
		self
	}

	/// Drops events raised by `pid`, typically the tracer itself.
	pub fn excluding_pid(mut self, pid: u32) -> Self {
		self.exclude_pid = Some(pid);
		self
	}

	pub fn accepts(&self, evt: &TraceEvent) -> bool {
		if self.exclude_pid == Some(evt.pid) {
			return false;
		}
		if self.exclude.iter().any(|rule| rule.matches(&evt.comm)) {
			return false;
		}
		match &self.include {
			Some(rule) => rule.matches(&evt.comm),
			None => true,
		}
	}
}

// region:    --- Tests


// endregion: --- Tests
