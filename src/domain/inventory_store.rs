//! InventoryStore: atomic file I/O for the inventory document with SHA-256
//! integrity and write locking.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::failure::FailureSummary;
use super::host_record::HostRecord;

/// The serialized output of one collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryDocument {
    /// SHA-256 checksum of the serialized host map: "sha256:<hex>"
    pub checksum: String,
    pub collected_at: DateTime<Utc>,
    pub collector_version: String,
    pub hosts: BTreeMap<String, HostRecord>,
    pub summary: FailureSummary,
}

impl InventoryDocument {
    pub fn new(hosts: BTreeMap<String, HostRecord>, summary: FailureSummary) -> Self {
        Self {
            checksum: checksum_of(&hosts),
            collected_at: Utc::now(),
            collector_version: env!("CARGO_PKG_VERSION").to_string(),
            hosts,
            summary,
        }
    }

    /// Verify the checksum matches the host data.
    pub fn verify(&self) -> bool {
        self.checksum == checksum_of(&self.hosts)
    }
}

fn checksum_of(hosts: &BTreeMap<String, HostRecord>) -> String {
    let serialized = serde_json::to_string(hosts).unwrap_or_default();
    format!("sha256:{:x}", Sha256::digest(serialized.as_bytes()))
}

pub struct InventoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl InventoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize to a `.tmp` sibling, then rename over the final path.
    pub async fn write(&self, document: &InventoryDocument) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let content = serde_json::to_string_pretty(document)
            .context("failed to serialize inventory document")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating directory {}", parent.display()))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content)
            .await
            .with_context(|| format!("writing temp file {}", tmp_path.display()))?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "renaming {} to {}",
                    tmp_path.display(),
                    self.path.display()
                )
            })?;

        info!(
            path = %self.path.display(),
            hosts = document.hosts.len(),
            "inventory written"
        );
        Ok(())
    }

    /// Read the document back and verify its checksum.
    pub async fn read(&self) -> Result<InventoryDocument> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;

        let document: InventoryDocument = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        if !document.verify() {
            warn!(path = %self.path.display(), "inventory checksum mismatch");
            bail!("checksum verification failed for {}", self.path.display());
        }

        Ok(document)
    }
}
