use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=TDSOFT_VERSION");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let version = env::var("TDSOFT_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").expect("CARGO_PKG_VERSION"));

    let contents = format!(
        "/// Version string for this build.\n\
         /// Set via TDSOFT_VERSION at build time, or the Cargo.toml version.\n\
         pub const VERSION: &str = \"{version}\";\n"
    );
    fs::write(out_dir.join("version.rs"), contents).expect("write version.rs");
}
