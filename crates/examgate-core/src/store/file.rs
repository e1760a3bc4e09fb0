use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use super::DurableStore;

/// Store file name in the cache directory
const STORE_FILE: &str = "store.json";

type Entries = BTreeMap<String, String>;

/// File-backed store. Every operation re-reads the document so another
/// process writing the same file is picked up on the next call.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("Failed to create store directory: {}", cache_dir.display()))?;
        Ok(Self {
            path: cache_dir.join(STORE_FILE),
            lock: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<Entries> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read store file")?;

        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Store file is corrupt, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save(&self, entries: &Entries) -> Result<()> {
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write store file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace store file")?;
        Ok(())
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut Entries) -> (bool, T),
    ) -> Result<T> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("Store lock poisoned"))?;
        let mut entries = self.load()?;
        let (dirty, out) = f(&mut entries);
        if dirty {
            self.save(&entries)?;
        }
        Ok(out)
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| (false, entries.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        debug!(key, "Store set");
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
            (true, ())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| {
            let removed = entries.remove(key).is_some();
            if removed {
                debug!(key, "Store remove");
            }
            (removed, ())
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_entries(|entries| {
            let keys = entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            (false, keys)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
