//! Single-instance PID file.
//!
//! `serve` writes its PID to the configured path under an `fs2` exclusive
//! lock, so a second gateway pointed at the same file (and therefore at the
//! same WhatsApp account) refuses to start.  Two processes driving one
//! account would fight over the pairing.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs2::FileExt;

/// Held for the lifetime of the server.  Dropping it releases the lock;
/// [`PidFile::release`] also removes the file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        // Do not truncate before the lock is ours: the file may belong to a
        // running instance.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening PID file {}", path.display()))?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "another wabridge instance is running (PID file {} is locked)",
                path.display()
            )
        })?;

        let pid = std::process::id();
        file.set_len(0)?;
        writeln!(file, "{pid}")?;
        file.flush()?;

        tracing::info!(path = %path.display(), pid, "PID file written");
        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file and release the lock.
    pub fn release(self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "PID file removed"),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove PID file")
            }
        }
        let _ = self.file.unlock();
    }
}
