//! Generates the C header for the `tensorfuzz_*` entry points.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=build.rs");

    let (Ok(crate_dir), Ok(out_dir)) = (env::var("CARGO_MANIFEST_DIR"), env::var("OUT_DIR")) else {
        println!("cargo:warning=skipping header generation: cargo environment not set");
        return;
    };

    let header = PathBuf::from(out_dir).join("tensorfuzz.h");
    let result = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("TENSORFUZZ_H")
        .with_documentation(true)
        .generate();

    match result {
        Ok(bindings) => {
            bindings.write_to_file(&header);
        }
        Err(e) => println!("cargo:warning=failed to generate {}: {e}", header.display()),
    }
}
