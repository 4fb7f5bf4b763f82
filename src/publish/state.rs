use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::OutboxError;
use crate::fsio::atomic_write;

/// SHA-256 of `bytes`, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Last published fingerprint per publish key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishState {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl PublishState {
    /// Loads the state file. A missing file is an empty state; an unreadable
    /// or corrupt one is logged and also treated as empty, which only costs
    /// a full republish.
    pub fn load(path: &Path) -> Result<Self, OutboxError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(OutboxError::io(path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "publish state unreadable, starting empty");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), OutboxError> {
        atomic_write(path, &serde_json::to_vec_pretty(self)?)
    }

    pub fn is_current(&self, key: &str, fingerprint: &str) -> bool {
        self.files.get(key).is_some_and(|f| f == fingerprint)
    }

    pub fn record(&mut self, key: String, fingerprint: String) {
        self.files.insert(key, fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn load_missing_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(PublishState::load(&tmp.path().join("s.json")).unwrap(), PublishState::default());
    }

    #[test]
    fn corrupt_state_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.json");
        fs::write(&path, "{{{").unwrap();
        assert!(PublishState::load(&path).unwrap().files.is_empty());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ops/s.json");
        let mut state = PublishState::default();
        state.record("results/a.md".into(), fingerprint(b"a"));
        state.save(&path).unwrap();

        let loaded = PublishState::load(&path).unwrap();
        assert!(loaded.is_current("results/a.md", &fingerprint(b"a")));
        assert!(!loaded.is_current("results/a.md", &fingerprint(b"b")));
    }
}
