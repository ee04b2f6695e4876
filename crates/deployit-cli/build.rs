//! Embeds every file under `keys/` into the binary as a deploy key table.

use std::env;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    let keys_dir = manifest_dir.join("keys");
    println!("cargo:rerun-if-changed={}", keys_dir.display());

    let mut keys = Vec::new();
    if let Ok(entries) = fs::read_dir(&keys_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let id = entry.file_name().to_string_lossy().into_owned();
            if id.starts_with('.') || !path.is_file() {
                continue;
            }
            keys.push((id, path));
        }
    }
    keys.sort();

    let mut table = String::from("pub static KEY_TABLE: &[::deployit_core::EmbeddedKey] = &[\n");
    for (id, path) in &keys {
        writeln!(
            table,
            "    ::deployit_core::EmbeddedKey {{ id: {:?}, bytes: include_bytes!({:?}) }},",
            id, path
        )
        .expect("writing to a String cannot fail");
    }
    table.push_str("];\n");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::write(out_dir.join("embedded_keys.rs"), table).expect("failed to write embedded_keys.rs");
}
