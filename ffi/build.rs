//! Generates `curlkit.h` for C hosts into `OUT_DIR`.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("CURLKIT_H")
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("curlkit.h"));
        }
        // A header failure must not break the library build.
        Err(e) => println!("cargo:warning=cbindgen: {e}"),
    }
}
