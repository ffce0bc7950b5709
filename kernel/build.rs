use std::{env, path::Path};

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR");
    let linker_script = Path::new(&manifest_dir).join("linker.ld");

    // Only the bare-metal image is linked with our script; host builds and
    // unit tests use the platform defaults.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        println!("cargo:rustc-link-arg-bins=-T{}", linker_script.display());
    }
    println!("cargo:rerun-if-changed={}", linker_script.display());
}
