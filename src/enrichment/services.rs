//! ServiceStore: persistent service name → descriptor map that learns every
//! service it has not seen before.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::persist;

pub const UNKNOWN_CATEGORY: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub display_name: String,
    pub category: String,
    pub description: String,
    /// e.g. "22/tcp".
    #[serde(default)]
    pub ports: Vec<String>,
    pub discovered_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub auto_generated: bool,
    /// Hand-maintained fields (documentation links, notes, ...) survive a save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ServiceDescriptor {
    /// Entry recorded the first time an unknown service is seen.
    pub fn placeholder(name: &str, category: &str) -> Self {
        let today = today();
        Self {
            display_name: display_name_for(name),
            category: category.to_string(),
            description: format!("Unknown service - discovered on {today}"),
            ports: Vec::new(),
            discovered_date: today.clone(),
            last_seen: Some(today),
            auto_generated: true,
            extra: BTreeMap::new(),
        }
    }

    fn listens_on(&self, port: u16) -> bool {
        self.ports.iter().any(|p| {
            p.split(['/', ' '])
                .next()
                .and_then(|n| n.parse::<u16>().ok())
                == Some(port)
        })
    }
}

pub struct ServiceStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, ServiceDescriptor>>,
    dirty: AtomicBool,
}

impl ServiceStore {
    pub async fn load(path: &Path) -> Self {
        let entries: BTreeMap<String, ServiceDescriptor> = persist::load_map(path).await;
        debug!(path = %path.display(), entries = entries.len(), "service store loaded");
        Self::with_entries(path, entries)
    }

    pub fn with_entries(path: &Path, entries: BTreeMap<String, ServiceDescriptor>) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub async fn get(&self, name: &str) -> Option<ServiceDescriptor> {
        let entries = self.entries.read().await;
        lookup(&entries, name).map(|(_, d)| d.clone())
    }

    /// Existing descriptor for `name`, or a freshly inserted placeholder.
    pub async fn get_or_create(&self, name: &str) -> ServiceDescriptor {
        self.get_or_create_in(name, UNKNOWN_CATEGORY).await
    }

    /// Like `get_or_create`, with the category new placeholders start in.
    pub async fn get_or_create_in(&self, name: &str, category: &str) -> ServiceDescriptor {
        let today = today();
        {
            let entries = self.entries.read().await;
            if let Some((_, descriptor)) = lookup(&entries, name) {
                if descriptor.last_seen.as_deref() == Some(today.as_str()) {
                    return descriptor.clone();
                }
            }
        }

        let mut entries = self.entries.write().await;
        // Another worker may have inserted or touched it while we waited.
        if let Some(key) = lookup(&entries, name).map(|(k, _)| k.to_string()) {
            let descriptor = entries
                .get_mut(&key)
                .map(|d| {
                    if d.last_seen.as_deref() != Some(today.as_str()) {
                        d.last_seen = Some(today.clone());
                        self.dirty.store(true, Ordering::Release);
                    }
                    d.clone()
                });
            if let Some(descriptor) = descriptor {
                return descriptor;
            }
        }

        let descriptor = ServiceDescriptor::placeholder(name, category);
        entries.insert(name.to_string(), descriptor.clone());
        self.dirty.store(true, Ordering::Release);
        info!(service = name, "new service added to store");
        descriptor
    }

    /// Display name of a known service that declares `port`.
    pub async fn describe_port(&self, port: u16) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .values()
            .find(|d| d.listens_on(port))
            .map(|d| d.display_name.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Persist if anything changed since load. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let entries = self.entries.read().await;
        persist::save_map(&self.path, &entries).await?;
        self.dirty.store(false, Ordering::Release);
        info!(path = %self.path.display(), entries = entries.len(), "service store saved");
        Ok(true)
    }
}

/// Exact name first, then the name without its systemd `.service` suffix.
fn lookup<'a>(
    entries: &'a BTreeMap<String, ServiceDescriptor>,
    name: &str,
) -> Option<(&'a str, &'a ServiceDescriptor)> {
    entries
        .get_key_value(name)
        .or_else(|| entries.get_key_value(name.trim_end_matches(".service")))
        .map(|(k, v)| (k.as_str(), v))
}

fn display_name_for(name: &str) -> String {
    name.trim_end_matches(".service")
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn known(display: &str, ports: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor {
            display_name: display.into(),
            category: "Remote Access".into(),
            description: "Secure shell daemon".into(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
            discovered_date: "2024-01-01".into(),
            last_seen: None,
            auto_generated: false,
            extra: BTreeMap::from([(
                "documentation_url".to_string(),
                serde_json::json!("https://www.openssh.com/manual.html"),
            )]),
        }
    }

    #[tokio::test]
    async fn concurrent_discovery_inserts_once() {
        let store = Arc::new(ServiceStore::with_entries(
            Path::new("unused.json"),
            BTreeMap::new(),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.spawn(async move { store.get_or_create("frobnicated.service").await });
        }
        let mut seen = Vec::new();
        while let Some(result) = tasks.join_next().await {
            seen.push(result.unwrap());
        }

        assert_eq!(store.len().await, 1);
        assert!(seen.iter().all(|d| d == &seen[0]));
        assert!(seen[0].auto_generated);
        assert_eq!(seen[0].display_name, "Frobnicated");
        assert_eq!(seen[0].category, UNKNOWN_CATEGORY);
    }

    #[tokio::test]
    async fn known_service_matches_without_unit_suffix() {
        let store = ServiceStore::with_entries(
            Path::new("unused.json"),
            BTreeMap::from([("sshd".to_string(), known("OpenSSH Server", &["22/tcp"]))]),
        );
        let descriptor = store.get_or_create("sshd.service").await;
        assert_eq!(descriptor.display_name, "OpenSSH Server");
        assert!(!descriptor.auto_generated);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.describe_port(22).await.as_deref(), Some("OpenSSH Server"));
        assert_eq!(store.describe_port(80).await, None);
    }

    #[tokio::test]
    async fn flush_only_when_mutated_and_keeps_extra_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        let mut entry = known("OpenSSH Server", &["22/tcp"]);
        entry.last_seen = Some(today());
        persist::save_map(&path, &BTreeMap::from([("sshd".to_string(), entry)]))
            .await
            .unwrap();

        let store = ServiceStore::load(&path).await;
        store.get_or_create("sshd").await;
        assert!(!store.flush().await.unwrap());

        store.get_or_create("dockerd").await;
        assert!(store.flush().await.unwrap());

        let reloaded = ServiceStore::load(&path).await;
        assert_eq!(reloaded.len().await, 2);
        let sshd = reloaded.get("sshd").await.unwrap();
        assert_eq!(
            sshd.extra.get("documentation_url"),
            Some(&serde_json::json!("https://www.openssh.com/manual.html"))
        );
        assert!(dir.path().join("services.json.backup").exists());
    }

    #[test]
    fn placeholder_display_names() {
        assert_eq!(display_name_for("nginx.service"), "Nginx");
        assert_eq!(display_name_for("pve-cluster"), "Pve Cluster");
        assert_eq!(display_name_for("qemu_guest_agent"), "Qemu Guest Agent");
    }
}
