//! Selects the platform linker script for bare-metal builds.

use std::env;

fn main() {
    let target = env::var("TARGET").unwrap_or_default();
    if !target.starts_with("aarch64") || !target.ends_with("none") {
        // Host builds (unit tests) link normally.
        return;
    }
    let script = if env::var("CARGO_FEATURE_PLAT_PI").is_ok() {
        "linker-pi.ld"
    } else {
        "linker-qemu.ld"
    };
    let dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    println!("cargo:rustc-link-arg-bins=-T{dir}/{script}");
    println!("cargo:rerun-if-changed={script}");
}
