use std::{env, path::PathBuf, process::Command};

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0000000000000000000000000000000000000000".to_string());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let kernel_dir = PathBuf::from(manifest_dir);

    // Bare-metal builds target the custom i686-impos.json spec (see
    // i686-impos.json) and link against our multiboot linker script. Host
    // builds (`cargo test` on x86_64-unknown-linux-gnu) skip this entirely.
    let target = env::var("TARGET").unwrap_or_default();
    if target == "i686-impos" || target.contains("i686") {
        let linker_script = kernel_dir.join("src/arch/x86/link.ld");
        println!("cargo:rustc-link-arg=-T{}", linker_script.display());
    }

    println!("cargo:rerun-if-changed=src/arch/x86/link.ld");
}
