use which::which;

/// Rebuild the probe whenever bpf-linker changes.
///
/// aya-build drives this crate through a nested cargo invocation, which does
/// not notice a new linker on its own.
fn main() -> anyhow::Result<()> {
	let bpf_linker = which("bpf-linker")?;
	println!("cargo:rerun-if-changed={}", bpf_linker.display());
	Ok(())
}
