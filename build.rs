//! Puts `memory.x` on the linker search path and links the `defmt` section script when enabled.

use std::env;
use std::fs;
use std::path::PathBuf;


fn main() {
	let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
	fs::write(out.join("memory.x"), include_bytes!("memory.x")).expect("failed to write memory.x");
	println!("cargo:rustc-link-search={}", out.display());

	if env::var_os("CARGO_FEATURE_DEFMT").is_some() && env::var("TARGET").is_ok_and(|target| target.starts_with("thumb")) {
		println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
	}

	println!("cargo:rerun-if-changed=memory.x");
	println!("cargo:rerun-if-changed=build.rs");
}
