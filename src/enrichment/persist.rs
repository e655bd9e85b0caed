//! JSON map persistence for the auto-learning stores.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Read a key → entry map. A missing file is an empty store; an unreadable
/// one is logged and also treated as empty so a run never aborts on it.
pub async fn load_map<V: DeserializeOwned>(path: &Path) -> BTreeMap<String, V> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "store not found, starting empty");
            return BTreeMap::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read store, starting empty");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse store, starting empty");
            BTreeMap::new()
        }
    }
}

/// Copy the current file to `<path>.backup`, then write the new contents to
/// a temp file and rename it into place. Keys come out sorted.
pub async fn save_map<V: Serialize>(path: &Path, map: &BTreeMap<String, V>) -> Result<()> {
    let content = serde_json::to_string_pretty(map).context("serializing store")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let backup = with_suffix(path, ".backup");
        tokio::fs::copy(path, &backup)
            .await
            .with_context(|| format!("backing up {} to {}", path.display(), backup.display()))?;
    }

    let tmp = with_suffix(path, ".tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("writing temp file {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    name.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_keeps_backup_of_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let first = BTreeMap::from([("b".to_string(), 2), ("a".to_string(), 1)]);
        save_map(&path, &first).await.unwrap();
        assert!(!dir.path().join("store.json.backup").exists());

        let second = BTreeMap::from([("c".to_string(), 3)]);
        save_map(&path, &second).await.unwrap();

        let backup: BTreeMap<String, i32> = load_map(&dir.path().join("store.json.backup")).await;
        assert_eq!(backup, first);
        let current: BTreeMap<String, i32> = load_map(&path).await;
        assert_eq!(current, second);

        let raw = std::fs::read_to_string(dir.path().join("store.json.backup")).unwrap();
        assert!(raw.find("\"a\"").unwrap() < raw.find("\"b\"").unwrap());
    }

    #[tokio::test]
    async fn corrupt_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        let map: BTreeMap<String, i32> = load_map(&path).await;
        assert!(map.is_empty());
    }
}
