//! Host record: the normalized per-host result of one collection run.
//!
//! A record is either *reachable* (a session was established and some subset
//! of the fact blocks below is populated) or *unreachable* (no fact blocks,
//! only the classified failure).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{FailureCategory, PlatformType, Protocol};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Address the host was scanned as (IP or name from the candidate list).
    pub address: String,
    /// Name the host reports for itself, once connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub reachable: bool,
    pub platform: PlatformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    pub collected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<HostFailure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<ClusterInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<HypervisorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas: Option<NasInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<WindowsInfo>,
}

impl HostRecord {
    /// A record for a host with an established session; fact blocks are
    /// filled in by the collectors afterwards.
    pub fn connected(address: &str, platform: PlatformType, protocol: Protocol) -> Self {
        Self {
            address: address.to_string(),
            hostname: None,
            reachable: true,
            platform,
            protocol: Some(protocol),
            collected_at: Utc::now(),
            failure: None,
            system: None,
            resources: None,
            network: None,
            services: None,
            containers: None,
            orchestration: None,
            hypervisor: None,
            nas: None,
            windows: None,
        }
    }

    /// A record for a host the cascade never connected to. Carries no facts.
    pub fn unreachable(address: &str, platform: PlatformType, failure: HostFailure) -> Self {
        Self {
            address: address.to_string(),
            hostname: None,
            reachable: false,
            platform,
            protocol: None,
            collected_at: Utc::now(),
            failure: Some(failure),
            system: None,
            resources: None,
            network: None,
            services: None,
            containers: None,
            orchestration: None,
            hypervisor: None,
            nas: None,
            windows: None,
        }
    }

    /// Whether any fact block is populated.
    pub fn has_facts(&self) -> bool {
        self.system.is_some()
            || self.resources.is_some()
            || self.network.is_some()
            || self.services.is_some()
            || self.containers.is_some()
            || self.orchestration.is_some()
            || self.hypervisor.is_some()
            || self.nas.is_some()
            || self.windows.is_some()
    }

    /// Names of the populated fact blocks, in record order.
    pub fn fact_blocks(&self) -> Vec<&'static str> {
        let mut blocks = Vec::new();
        if self.system.is_some() {
            blocks.push("system");
        }
        if self.resources.is_some() {
            blocks.push("resources");
        }
        if self.network.is_some() {
            blocks.push("network");
        }
        if self.services.is_some() {
            blocks.push("services");
        }
        if self.containers.is_some() {
            blocks.push("containers");
        }
        if self.orchestration.is_some() {
            blocks.push("orchestration");
        }
        if self.hypervisor.is_some() {
            blocks.push("hypervisor");
        }
        if self.nas.is_some() {
            blocks.push("nas");
        }
        if self.windows.is_some() {
            blocks.push("windows");
        }
        blocks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostFailure {
    pub category: FailureCategory,
    pub message: String,
}

// ── System ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: OsRelease,
    pub kernel: String,
    pub architecture: String,
    pub uptime: String,
    pub cpu_model: String,
    pub cpu_cores: String,
    /// Firmware fields as reported by lshw (vendor, version, date, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bios: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsRelease {
    pub name: String,
    pub version: String,
    pub version_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_like: Option<String>,
    pub pretty_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_codename: Option<String>,
}

impl Default for OsRelease {
    fn default() -> Self {
        Self {
            name: "Unknown".into(),
            version: "Unknown".into(),
            version_id: "Unknown".into(),
            id: "unknown".into(),
            id_like: None,
            pretty_name: "Unknown".into(),
            version_codename: None,
        }
    }
}

/// Resource figures, kept in the unit strings the host printed them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub load_average: String,
    pub memory_total: String,
    pub memory_used: String,
    /// e.g. "12G/48G (26%)" for the root filesystem.
    pub disk_usage: String,
}

// ── Network ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ip_addresses: Vec<String>,
    pub listening_ports: Vec<ListeningPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningPort {
    /// Local address as printed by ss, e.g. "0.0.0.0:22".
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Services / containers ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub status: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub status: String,
}

// ── Kubernetes ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub kubectl_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_info: Option<String>,
    pub nodes: Vec<K8sNode>,
    pub namespaces: Vec<String>,
    pub pods: Vec<K8sPod>,
    pub problematic_pods: Vec<K8sPod>,
    pub services: Vec<K8sService>,
    pub deployments: Vec<K8sDeployment>,
    pub health: ClusterHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sNode {
    pub name: String,
    pub status: String,
    pub roles: String,
    pub age: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sPod {
    pub namespace: String,
    pub name: String,
    pub ready: String,
    pub status: String,
    pub restarts: u32,
    pub age: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sService {
    pub namespace: String,
    pub name: String,
    pub service_type: String,
    pub cluster_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
    pub ports: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sDeployment {
    pub namespace: String,
    pub name: String,
    pub ready: String,
    pub up_to_date: String,
    pub available: String,
    pub age: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub total_nodes: u32,
    pub ready_nodes: u32,
    pub total_pods: u32,
    pub running_pods: u32,
    pub problematic_pods: u32,
}

// ── Hypervisor ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypervisorInfo {
    pub pve_version: String,
    pub vms: Vec<GuestInfo>,
    pub containers: Vec<GuestInfo>,
    pub storage: Vec<HypervisorStorage>,
    pub problematic: Vec<GuestInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Container,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub vmid: String,
    pub name: String,
    pub status: String,
    pub kind: GuestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypervisorStorage {
    pub name: String,
    pub storage_type: String,
    pub status: String,
    pub total: String,
    pub used: String,
    pub available: String,
    pub usage_percent: String,
}

// ── NAS ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NasInfo {
    pub nas_type: String,
    pub model: NasModel,
    pub volumes: Vec<NasVolume>,
    pub shares: Vec<NasShare>,
    pub storage_pools: Vec<StoragePool>,
    pub disk_health: Vec<DiskHealth>,
    pub interfaces: Vec<NasInterface>,
    pub installed_packages: Vec<String>,
    pub status: NasStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NasModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_os: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NasVolume {
    pub device: String,
    pub mount_point: String,
    pub size: String,
    pub used: String,
    pub available: String,
    pub usage_percent: String,
    pub volume_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NasShare {
    pub name: String,
    pub share_type: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    pub pool_type: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskHealth {
    pub device: String,
    pub size: String,
    pub model: String,
    /// "PASSED", "FAILED" or "Unknown".
    pub health: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NasInterface {
    pub name: String,
    pub state: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NasStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_average: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
}

// ── Windows ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowsInfo {
    pub os: WindowsVersion,
    pub cpu_model: String,
    pub cpu_cores: String,
    pub architecture: String,
    pub uptime: String,
    pub memory_total: String,
    pub memory_available: String,
    pub disks: Vec<WindowsDisk>,
    pub adapters: Vec<WindowsAdapter>,
    pub services: Vec<ServiceEntry>,
    /// Installed roles and features.
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<HotFix>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowsVersion {
    pub name: String,
    pub version: String,
    pub build: String,
}

impl Default for WindowsVersion {
    fn default() -> Self {
        Self {
            name: "Windows".into(),
            version: "Unknown".into(),
            build: "Unknown".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowsDisk {
    pub device: String,
    pub filesystem: String,
    pub size: String,
    pub used: String,
    pub available: String,
    pub usage_percent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowsAdapter {
    pub name: String,
    pub description: String,
    pub speed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotFix {
    pub hotfix_id: String,
    pub installed_on: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_record_carries_no_facts() {
        let record = HostRecord::unreachable(
            "10.0.0.6",
            PlatformType::Unknown,
            HostFailure {
                category: FailureCategory::Unreachable,
                message: "no management port open".into(),
            },
        );
        assert!(!record.reachable);
        assert!(!record.has_facts());
        assert!(record.fact_blocks().is_empty());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["failure"]["category"], "unreachable");
    }

    #[test]
    fn fact_blocks_lists_populated_sections() {
        let mut record = HostRecord::connected("10.0.0.5", PlatformType::Linux, Protocol::LinuxSsh);
        record.system = Some(SystemInfo::default());
        record.containers = Some(Vec::new());
        assert_eq!(record.fact_blocks(), vec!["system", "containers"]);
    }
}
