// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Small JSON-backed persistence for the `horde` binary.
//!
//! The library crates keep all state in memory; the binary uses this crate
//! to remember the last conversation between invocations so that
//! `horde prompt --continue` can rebuild the full multi-turn prompt.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to determine cache directory: neither XDG_CACHE_HOME nor HOME is set")]
    NoCacheDir,
}

/// Returns the cache directory used by the binary.
///
/// `$XDG_CACHE_HOME/horde/` when that variable is set and non-empty,
/// otherwise `$HOME/.cache/horde/`.
pub fn horde_cache_root() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(xdg);
        path.push("horde");
        return Ok(path);
    }
    let home = env::var_os("HOME").ok_or(CacheError::NoCacheDir)?;
    let mut path = PathBuf::from(home);
    path.push(".cache");
    path.push("horde");
    Ok(path)
}

/// JSON file holding a single serde value.
///
/// Writes go through a temporary sibling file followed by a rename so a
/// crash mid-write never leaves a truncated document behind.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Store named `{store_name}.json` under [`horde_cache_root`].
    pub fn new(store_name: &str) -> Result<Self> {
        Self::with_root(horde_cache_root()?, store_name)
    }

    /// Store under an explicit root directory, created if missing.
    pub fn with_root<P: AsRef<Path>>(root: P, store_name: &str) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create cache root at {}", root.display()))?;
        Ok(Self {
            path: root.join(format!("{store_name}.json")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the file is missing or blank.
    pub fn load_optional<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        if !self.path.exists() {
            return Ok(None);
        }
        let buf = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read cache file {}", self.path.display()))?;
        if buf.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&buf)
            .with_context(|| format!("failed to parse JSON from {}", self.path.display()))?;
        Ok(Some(value))
    }

    pub fn load_or_default<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.load_optional()?.unwrap_or_default())
    }

    pub fn save<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let json = serde_json::to_string_pretty(value)
            .context("failed to serialise value to JSON for cache")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json.as_bytes()).with_context(|| {
            format!("failed to write temporary cache file {}", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }

    /// Remove the backing file if present.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove cache file {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Turns {
        prompts: Vec<String>,
    }

    fn temp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        env::temp_dir().join(format!("horde-cache-{tag}-{nanos}"))
    }

    #[test]
    fn saved_value_loads_back() {
        let root = temp_root("save");
        let store = JsonStore::with_root(&root, "conversation").unwrap();
        let turns = Turns {
            prompts: vec!["hello".into(), "and then?".into()],
        };
        store.save(&turns).unwrap();

        let loaded: Turns = store.load_or_default().unwrap();
        assert_eq!(loaded, turns);
        assert!(!store.path().with_extension("json.tmp").exists());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_or_blank_file_loads_as_none() {
        let root = temp_root("blank");
        let store = JsonStore::with_root(&root, "conversation").unwrap();
        assert!(store.load_optional::<Turns>().unwrap().is_none());

        fs::write(store.path(), "   \n").unwrap();
        assert!(store.load_optional::<Turns>().unwrap().is_none());
        assert_eq!(store.load_or_default::<Turns>().unwrap(), Turns::default());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn corrupt_file_is_reported() {
        let root = temp_root("corrupt");
        let store = JsonStore::with_root(&root, "conversation").unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(store.load_optional::<Turns>().is_err());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn clear_removes_file() {
        let root = temp_root("clear");
        let store = JsonStore::with_root(&root, "conversation").unwrap();
        store.save(&Turns::default()).unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();

        fs::remove_dir_all(root).ok();
    }
}
