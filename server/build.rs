//! Build script for orderform-server
//!
//! Rebuild the server whenever the embedded page or the wasm bundle built by
//! wasm-pack changes.

fn main() {
    println!("cargo:rerun-if-changed=static");
    println!("cargo:rerun-if-changed=static/public/pkg");
    println!("cargo:rerun-if-changed=static/public");
}
