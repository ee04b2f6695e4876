//! Deploy keys compiled into the binary by the build script.

use deployit_core::EmbeddedKeys;

include!(concat!(env!("OUT_DIR"), "/embedded_keys.rs"));

/// Loader over every key that was present in `keys/` at build time.
pub fn embedded() -> EmbeddedKeys {
    EmbeddedKeys::new(KEY_TABLE)
}
