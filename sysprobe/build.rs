use aya_build::cargo_metadata::{self, Metadata, MetadataCommand, Package};
use derive_more::Display;

const EBPF_PACKAGE: &str = "sysprobe-ebpf";

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Display)]
#[display("{self:?}")]
pub enum Error {
	#[display("cargo metadata failed: {_0}")]
	Metadata(String),
	#[display("package 'sysprobe-ebpf' is not a workspace member")]
	EbpfPackageNotFound,
	#[display("building the probe failed: {_0}")]
	Build(String),
}

/// Compiles the probe for the bpf target and drops the object in `OUT_DIR`,
/// where `include_bytes_aligned!` picks it up.
fn main() -> Result<()> {
	let Metadata { packages, .. } = MetadataCommand::new()
		.no_deps()
		.exec()
		.map_err(|err: cargo_metadata::Error| Error::Metadata(err.to_string()))?;

	let probe = packages
		.into_iter()
		.find(|Package { name, .. }| name == EBPF_PACKAGE)
		.ok_or(Error::EbpfPackageNotFound)?;

	aya_build::build_ebpf([probe]).map_err(|err| Error::Build(err.to_string()))?;
	Ok(())
}
