//! MacVendorStore: OUI prefix → vendor map, learned from a rate-limited
//! external lookup API.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::persist;
use crate::config::VendorApiConfig;

pub const UNKNOWN_VENDOR: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorSource {
    Seed,
    Api,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacVendorEntry {
    pub vendor: String,
    pub date_added: String,
    pub source: VendorSource,
}

/// First six hex digits of a MAC, uppercased, in any common notation.
pub fn oui(mac: &str) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .take(6)
        .collect::<String>()
        .to_uppercase();
    (hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}

/// External source of vendor names.
#[async_trait]
pub trait VendorLookup: Send + Sync {
    async fn vendor(&self, mac: &str) -> Option<String>;
}

/// macvendors.com-style API: `GET {url}/{mac}` answers the vendor as plain text.
pub struct MacVendorsApi {
    http: Client,
    base_url: String,
    delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl MacVendorsApi {
    pub fn new(config: &VendorApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            delay: Duration::from_millis(config.delay_ms),
            last_call: Mutex::new(None),
        })
    }
}

#[async_trait]
impl VendorLookup for MacVendorsApi {
    async fn vendor(&self, mac: &str) -> Option<String> {
        // Held for the whole call so requests are spaced by at least `delay`.
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        let result = self
            .http
            .get(format!("{}/{}", self.base_url, mac))
            .send()
            .await;
        *last_call = Some(Instant::now());

        match result {
            Ok(response) if response.status() == StatusCode::OK => {
                let vendor = response.text().await.ok()?.trim().to_string();
                (!vendor.is_empty()).then_some(vendor)
            }
            Ok(response) => {
                debug!(mac, status = %response.status(), "vendor API returned no match");
                None
            }
            Err(e) => {
                debug!(mac, error = %e, "vendor API request failed");
                None
            }
        }
    }
}

pub struct MacVendorStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, MacVendorEntry>>,
    api: Option<Arc<dyn VendorLookup>>,
    /// Serializes misses so one OUI is only ever looked up once at a time.
    miss_lock: Mutex<HashSet<String>>,
    dirty: AtomicBool,
}

impl MacVendorStore {
    pub async fn load(path: &Path, api: Option<Arc<dyn VendorLookup>>) -> Self {
        let entries: BTreeMap<String, MacVendorEntry> = persist::load_map(path).await;
        debug!(path = %path.display(), entries = entries.len(), "MAC vendor store loaded");
        Self::with_entries(path, entries, api)
    }

    pub fn with_entries(
        path: &Path,
        entries: BTreeMap<String, MacVendorEntry>,
        api: Option<Arc<dyn VendorLookup>>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            api,
            miss_lock: Mutex::new(HashSet::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Vendor for `mac`, or "Unknown". Unknown answers are not persisted.
    pub async fn lookup(&self, mac: &str) -> String {
        let Some(prefix) = oui(mac) else {
            return UNKNOWN_VENDOR.to_string();
        };
        if let Some(entry) = self.entries.read().await.get(&prefix) {
            return entry.vendor.clone();
        }
        let Some(api) = &self.api else {
            return UNKNOWN_VENDOR.to_string();
        };

        // Failed prefixes are remembered for the rest of the run.
        let mut failed = self.miss_lock.lock().await;
        if let Some(entry) = self.entries.read().await.get(&prefix) {
            return entry.vendor.clone();
        }
        if failed.contains(&prefix) {
            return UNKNOWN_VENDOR.to_string();
        }

        match api.vendor(mac).await {
            Some(vendor) => {
                self.insert(&prefix, &vendor, VendorSource::Api).await;
                vendor
            }
            None => {
                failed.insert(prefix);
                UNKNOWN_VENDOR.to_string()
            }
        }
    }

    /// Add an entry unless the prefix is already known.
    pub async fn insert(&self, prefix: &str, vendor: &str, source: VendorSource) -> bool {
        let Some(prefix) = oui(prefix) else {
            return false;
        };
        let mut entries = self.entries.write().await;
        if entries.contains_key(&prefix) {
            return false;
        }
        info!(oui = %prefix, vendor, "new MAC vendor added to store");
        entries.insert(
            prefix,
            MacVendorEntry {
                vendor: vendor.to_string(),
                date_added: Local::now().format("%Y-%m-%d").to_string(),
                source,
            },
        );
        self.dirty.store(true, Ordering::Release);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn flush(&self) -> Result<bool> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(false);
        }
        let entries = self.entries.read().await;
        persist::save_map(&self.path, &entries).await?;
        self.dirty.store(false, Ordering::Release);
        info!(path = %self.path.display(), entries = entries.len(), "MAC vendor store saved");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingApi {
        calls: AtomicUsize,
        answer: Option<&'static str>,
    }

    #[async_trait]
    impl VendorLookup for CountingApi {
        async fn vendor(&self, _mac: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.answer.map(str::to_string)
        }
    }

    fn api(answer: Option<&'static str>) -> Arc<CountingApi> {
        Arc::new(CountingApi {
            calls: AtomicUsize::new(0),
            answer,
        })
    }

    #[test]
    fn oui_normalizes_notations() {
        assert_eq!(oui("00:11:32:aa:bb:cc").as_deref(), Some("001132"));
        assert_eq!(oui("00-11-32-AA-BB-CC").as_deref(), Some("001132"));
        assert_eq!(oui("0011.32aa.bbcc").as_deref(), Some("001132"));
        assert_eq!(oui("zz:11:32"), None);
        assert_eq!(oui("00:11"), None);
    }

    #[tokio::test]
    async fn api_hit_is_learned_once_under_concurrency() {
        let counting = api(Some("Synology Incorporated"));
        let store = Arc::new(MacVendorStore::with_entries(
            Path::new("unused.json"),
            BTreeMap::new(),
            Some(counting.clone()),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.spawn(async move { store.lookup(&format!("00:11:32:00:00:{i:02x}")).await });
        }
        while let Some(vendor) = tasks.join_next().await {
            assert_eq!(vendor.unwrap(), "Synology Incorporated");
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn api_miss_returns_unknown_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mac-ouis.json");
        let counting = api(None);
        let store = MacVendorStore::with_entries(&path, BTreeMap::new(), Some(counting.clone()));

        assert_eq!(store.lookup("aa:bb:cc:00:00:01").await, UNKNOWN_VENDOR);
        assert_eq!(store.lookup("aa:bb:cc:00:00:02").await, UNKNOWN_VENDOR);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await);
        assert!(!store.flush().await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn seeded_entries_answer_offline() {
        let store = MacVendorStore::with_entries(Path::new("unused.json"), BTreeMap::new(), None);
        assert!(store.insert("b8:27:eb", "Raspberry Pi Foundation", VendorSource::Seed).await);
        assert!(!store.insert("B827EB", "Someone Else", VendorSource::Manual).await);
        assert_eq!(store.lookup("B8:27:EB:12:34:56").await, "Raspberry Pi Foundation");
        assert_eq!(store.lookup("00:00:00:00:00:01").await, UNKNOWN_VENDOR);
    }

    #[tokio::test]
    async fn api_requests_are_spaced() {
        let config = VendorApiConfig {
            enabled: true,
            // Nothing listens here; each call fails fast after the spacing delay.
            url: "http://127.0.0.1:9".into(),
            delay_ms: 200,
            timeout_secs: 1,
        };
        let api = MacVendorsApi::new(&config).unwrap();
        let started = Instant::now();
        assert_eq!(api.vendor("00:11:32:00:00:01").await, None);
        assert_eq!(api.vendor("00:11:32:00:00:02").await, None);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
