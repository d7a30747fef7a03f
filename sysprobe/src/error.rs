use derive_more::{Display, From};
use flume::RecvError;
use tokio::task::JoinError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display, From)]
#[display("{self:?}")]
pub enum Error {
	#[from(String, &String, &str)]
	Custom(String),
	EventSend(String),
	EventRecv(RecvError),

	// -- Setup
	#[display("eBPF program '{_0}' not found in the probe object")]
	EbpfProgNotFound(&'static str),
	#[display("eBPF map '{_0}' not found in the probe object")]
	EbpfMapNotFound(&'static str),
	#[display("ring size must be a power of two between {min} and {max} bytes, got {size}")]
	InvalidRingSize { size: u64, min: u64, max: u64 },
	#[display("could not allocate a {size} byte channel")]
	ChannelAlloc { size: u64 },
	#[display("loopback writer thread panicked")]
	WriterPanicked,

	// -- Decode
	#[display("record is {len} bytes, expected {expected}")]
	InvalidEventSize { len: usize, expected: usize },

	// -- Externals
	#[from]
	JoinError(JoinError),
	#[from]
	AyaEbpf(aya::EbpfError),
	#[from]
	AyaMaps(aya::maps::MapError),
	#[from]
	AyaProgram(aya::programs::ProgramError),
	#[from]
	Json(serde_json::Error),
	#[from]
	Io(std::io::Error),
}

impl From<RecvError> for Error {
	fn from(err: RecvError) -> Self {
		Self::EventRecv(err)
	}
}

// region:    --- Custom

impl Error {
	pub fn custom(val: impl Into<String>) -> Self {
		Self::Custom(val.into())
	}
}

// endregion: --- Custom

// region:    --- Error Boilerplate

impl std::error::Error for Error {}

// endregion: --- Error Boilerplate
