//! Deploy keys bundled into the binary at build time.
//!
//! Keys live only in memory. The loader is a plain lookup over a table that
//! the binary's build script generates; an identifier missing from that table
//! is a packaging defect, never an environment condition.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CredentialError;

/// Private key material scoped to one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct DeployKey(Bytes);

impl DeployKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Wrap key material that is compiled into the binary without copying it.
    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Raw key bytes, for handing to the transport.
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short SHA-256 fingerprint that is safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        format!("SHA256:{}", &hex::encode(digest)[..16])
    }
}

impl fmt::Debug for DeployKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeployKey([redacted; {} bytes])", self.0.len())
    }
}

/// Resolves a key identifier to its key material.
pub trait CredentialLoader: Send + Sync {
    fn load(&self, id: &str) -> Result<DeployKey, CredentialError>;
}

/// One entry of the build-time key table.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedKey {
    pub id: &'static str,
    pub bytes: &'static [u8],
}

/// Credential loader backed by a table of keys compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedKeys {
    table: &'static [EmbeddedKey],
}

impl EmbeddedKeys {
    pub const fn new(table: &'static [EmbeddedKey]) -> Self {
        Self { table }
    }
}

impl CredentialLoader for EmbeddedKeys {
    fn load(&self, id: &str) -> Result<DeployKey, CredentialError> {
        self.table
            .iter()
            .find(|key| key.id == id)
            .map(|key| DeployKey::from_static(key.bytes))
            .ok_or_else(|| CredentialError::KeyNotFound(id.to_string()))
    }
}
