//! Persisted max-generation-rate record.
//!
//! A single versioned JSON record on disk; survives restarts and caps
//! every future `start(rate)`. Writes go through a temp file and an
//! atomic rename under an exclusive lock.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

const STORE_VERSION: u32 = 1;

/// Default cap when no record exists yet.
pub const DEFAULT_MAX_RATE: u32 = 50;

#[derive(Debug, Serialize, Deserialize)]
struct MaxRateRecord {
    version: u32,
    rate: u32,
}

pub struct MaxRateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cached: AtomicU32,
}

impl MaxRateStore {
    /// Open the store, loading the persisted rate if a readable record
    /// exists. A missing or corrupt file falls back to the default.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let rate = match Self::load(&path) {
            Ok(Some(rate)) => rate,
            Ok(None) => DEFAULT_MAX_RATE,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable max-rate store; using default");
                DEFAULT_MAX_RATE
            }
        };

        Self {
            path,
            write_lock: Mutex::new(()),
            cached: AtomicU32::new(rate),
        }
    }

    fn load(path: &Path) -> Result<Option<u32>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let record: MaxRateRecord =
            serde_json::from_str(&contents).context("parsing max-rate record")?;
        if record.version != STORE_VERSION {
            anyhow::bail!("unsupported store version {}", record.version);
        }
        Ok(Some(record.rate))
    }

    pub fn get(&self) -> u32 {
        self.cached.load(Ordering::Acquire)
    }

    /// Persist a new cap. Zero is rejected; the write is atomic.
    pub fn set(&self, rate: u32) -> Result<()> {
        if rate == 0 {
            anyhow::bail!("max rate must be positive");
        }

        let _guard = self.write_lock.lock();
        let record = MaxRateRecord {
            version: STORE_VERSION,
            rate,
        };
        let payload = serde_json::to_string_pretty(&record)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, payload)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;

        let old = self.cached.swap(rate, Ordering::Release);
        info!(old_rate = old, new_rate = rate, "Max generation rate updated");
        Ok(())
    }
}
