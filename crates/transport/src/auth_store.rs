//! Durable storage for the transport's credential blob.
//!
//! The blob is opaque to everything but the transport that produced it.
//! Writes go to a temp file first and are renamed into place so a crash
//! never leaves a truncated `creds.json`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use wb_domain::Result;

const CREDS_FILE: &str = "creds.json";

pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    pub fn new(auth_dir: &Path) -> Self {
        Self {
            path: auth_dir.join(CREDS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_credentials(&self) -> bool {
        self.path.is_file()
    }

    /// Persist `creds`, stamping the write time under `saved_at`.
    pub fn save(&self, creds: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = serde_json::json!({
            "saved_at": Utc::now().to_rfc3339(),
            "creds": creds,
        });
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), "transport credentials saved");
        Ok(())
    }

    /// Load the stored blob, if any.
    pub fn load(&self) -> Result<Option<Value>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let mut record: Value = serde_json::from_slice(&bytes)?;
                Ok(record.get_mut("creds").map(Value::take))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the stored blob.  Idempotent.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "transport credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::new(&dir.path().join("auth"));
        assert!(!store.has_credentials());
        assert!(store.load().unwrap().is_none());

        store
            .save(&serde_json::json!({ "me": "51987654321@s.whatsapp.net" }))
            .unwrap();
        assert!(store.has_credentials());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded["me"], "51987654321@s.whatsapp.net");

        store.clear().unwrap();
        assert!(!store.has_credentials());
        store.clear().unwrap();
    }

    #[test]
    fn save_overwrites_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthStore::new(dir.path());
        store.save(&serde_json::json!({ "v": 1 })).unwrap();
        store.save(&serde_json::json!({ "v": 2 })).unwrap();
        assert_eq!(store.load().unwrap().unwrap()["v"], 2);
        assert!(!dir.path().join("creds.json.tmp").exists());
    }
}
