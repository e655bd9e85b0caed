//! Windows facts over a WinRM session. Every probe is a PowerShell snippet;
//! structured answers come back through `ConvertTo-Json`.

use anyhow::Result;
use serde_json::Value;

use super::{lines, run, CollectContext};
use crate::domain::host_record::{
    HotFix, ServiceEntry, WindowsAdapter, WindowsDisk, WindowsInfo, WindowsVersion,
};

pub const WINDOWS_SERVICE_CATEGORY: &str = "windows_service";

const MAX_SERVICES: usize = 20;
const MAX_FEATURES: usize = 10;

const PS_COMPUTER_INFO: &str =
    "Get-ComputerInfo -Property WindowsProductName,WindowsVersion,WindowsBuildLabEx | ConvertTo-Json";
const PS_PROCESSOR: &str =
    "Get-CimInstance Win32_Processor | Select-Object Name,NumberOfCores | ConvertTo-Json";
const PS_UPTIME: &str = "$u = (Get-Date) - (Get-CimInstance Win32_OperatingSystem).LastBootUpTime; \
     '{0} days, {1} hours, {2} minutes' -f $u.Days,$u.Hours,$u.Minutes";
const PS_ARCH: &str = "$env:PROCESSOR_ARCHITECTURE";
const PS_MEMORY: &str = "$t = (Get-CimInstance Win32_PhysicalMemory | Measure-Object Capacity -Sum).Sum; \
     $f = (Get-CimInstance Win32_OperatingSystem).FreePhysicalMemory * 1KB; \
     @{ TotalGB = [math]::Round($t / 1GB, 1); FreeGB = [math]::Round($f / 1GB, 1) } | ConvertTo-Json";
const PS_DISKS: &str = "Get-CimInstance Win32_LogicalDisk -Filter 'DriveType=3' | \
     Select-Object DeviceID,FileSystem,Size,FreeSpace | ConvertTo-Json";
const PS_ADAPTERS: &str = "Get-NetAdapter | Where-Object Status -eq 'Up' | \
     Select-Object Name,InterfaceDescription,LinkSpeed | ConvertTo-Json";
const PS_SERVICES: &str = "Get-Service | Where-Object Status -eq 'Running' | \
     Select-Object -First 20 Name,DisplayName | ConvertTo-Json";
const PS_FEATURES: &str = "Get-WindowsFeature | Where-Object Installed | \
     Select-Object -First 10 -ExpandProperty Name";
const PS_HOTFIX: &str = "Get-HotFix | Sort-Object InstalledOn -Descending | Select-Object -First 1 \
     HotFixID,@{n='InstalledOn';e={ if ($_.InstalledOn) { $_.InstalledOn.ToString('yyyy-MM-dd') } }} | ConvertTo-Json";

pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<WindowsInfo>> {
    let session = ctx.session;
    let computer = run(session, PS_COMPUTER_INFO).await?.map(|j| json_items(&j));
    let processor = run(session, PS_PROCESSOR).await?.map(|j| json_items(&j));
    if computer.is_none() && processor.is_none() {
        return Ok(None);
    }

    let os = computer
        .as_deref()
        .and_then(<[Value]>::first)
        .map(|info| {
            let defaults = WindowsVersion::default();
            WindowsVersion {
                name: field(info, "WindowsProductName").unwrap_or(defaults.name),
                version: field(info, "WindowsVersion").unwrap_or(defaults.version),
                build: field(info, "WindowsBuildLabEx").unwrap_or(defaults.build),
            }
        })
        .unwrap_or_default();

    let processors = processor.unwrap_or_default();
    let cpu_model = processors
        .first()
        .and_then(|p| field(p, "Name"))
        .unwrap_or_else(|| "Unknown".into());
    let cores: u64 = processors
        .iter()
        .filter_map(|p| p.get("NumberOfCores").and_then(Value::as_u64))
        .sum();

    let memory = run(session, PS_MEMORY).await?.map(|j| json_items(&j));
    let memory = memory.as_deref().and_then(<[Value]>::first);
    let gb = |key: &str| {
        memory
            .and_then(|m| field(m, key))
            .map(|v| format!("{v} GB"))
            .unwrap_or_else(|| "Unknown".into())
    };

    let services = match run(session, PS_SERVICES).await? {
        Some(json) => enrich_services(&json_items(&json), ctx).await,
        None => Vec::new(),
    };

    Ok(Some(WindowsInfo {
        os,
        cpu_model,
        cpu_cores: if cores > 0 { cores.to_string() } else { "Unknown".into() },
        architecture: run(session, PS_ARCH).await?.unwrap_or_else(|| "Unknown".into()),
        uptime: run(session, PS_UPTIME).await?.unwrap_or_else(|| "Unknown".into()),
        memory_total: gb("TotalGB"),
        memory_available: gb("FreeGB"),
        disks: run(session, PS_DISKS)
            .await?
            .map(|j| json_items(&j).iter().filter_map(parse_disk).collect())
            .unwrap_or_default(),
        adapters: run(session, PS_ADAPTERS)
            .await?
            .map(|j| {
                json_items(&j)
                    .iter()
                    .map(|a| WindowsAdapter {
                        name: field(a, "Name").unwrap_or_default(),
                        description: field(a, "InterfaceDescription").unwrap_or_default(),
                        speed: field(a, "LinkSpeed").unwrap_or_else(|| "Unknown".into()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        services,
        features: run(session, PS_FEATURES)
            .await?
            .map(|out| lines(&out).map(|l| l.trim().to_string()).take(MAX_FEATURES).collect())
            .unwrap_or_default(),
        last_update: run(session, PS_HOTFIX).await?.and_then(|j| {
            let items = json_items(&j);
            let fix = items.first()?;
            Some(HotFix {
                hotfix_id: field(fix, "HotFixID")?,
                installed_on: field(fix, "InstalledOn").unwrap_or_else(|| "Unknown".into()),
            })
        }),
    }))
}

async fn enrich_services(items: &[Value], ctx: &CollectContext<'_>) -> Vec<ServiceEntry> {
    let mut services = Vec::new();
    for item in items.iter().take(MAX_SERVICES) {
        let Some(name) = field(item, "Name") else {
            continue;
        };
        let descriptor = ctx
            .services
            .get_or_create_in(&name, WINDOWS_SERVICE_CATEGORY)
            .await;
        // The service manager's own display name beats a generated one.
        let display_name = match field(item, "DisplayName") {
            Some(display) if descriptor.auto_generated => display,
            _ => descriptor.display_name,
        };
        services.push(ServiceEntry {
            name,
            status: "Running".into(),
            display_name,
            category: descriptor.category,
            description: descriptor.description,
        });
    }
    services
}

fn parse_disk(disk: &Value) -> Option<WindowsDisk> {
    let size = disk.get("Size").and_then(Value::as_f64)?;
    let free = disk.get("FreeSpace").and_then(Value::as_f64).unwrap_or(0.0);
    let gib = |bytes: f64| format!("{:.1} GB", bytes / 1024f64.powi(3));
    let percent = if size > 0.0 { (size - free) / size * 100.0 } else { 0.0 };
    Some(WindowsDisk {
        device: field(disk, "DeviceID")?,
        filesystem: field(disk, "FileSystem").unwrap_or_else(|| "Unknown".into()),
        size: gib(size),
        used: gib(size - free),
        available: gib(free),
        usage_percent: format!("{percent:.0}%"),
    })
}

/// `ConvertTo-Json` emits a bare object for one result and an array for several.
fn json_items(text: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items,
        Ok(value @ Value::Object(_)) => vec![value],
        _ => Vec::new(),
    }
}

/// String or number field as text; null and empty strings count as absent.
fn field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::clients::scripted::ScriptedSession;
    use crate::domain::types::{PlatformType, Protocol};
    use crate::enrichment::ServiceStore;

    #[test]
    fn single_object_or_array() {
        assert_eq!(json_items(r#"{"Name": "a"}"#).len(), 1);
        assert_eq!(json_items(r#"[{"Name": "a"}, {"Name": "b"}]"#).len(), 2);
        assert!(json_items("not json").is_empty());
    }

    #[test]
    fn disk_usage_from_bytes() {
        let disk = serde_json::json!({
            "DeviceID": "C:",
            "FileSystem": "NTFS",
            "Size": 107374182400u64,
            "FreeSpace": 26843545600u64
        });
        let disk = parse_disk(&disk).unwrap();
        assert_eq!(disk.size, "100.0 GB");
        assert_eq!(disk.used, "75.0 GB");
        assert_eq!(disk.usage_percent, "75%");
    }

    #[tokio::test]
    async fn windows_block() {
        let session = ScriptedSession::new("10.0.0.50", Protocol::Winrm)
            .ok(
                "Get-ComputerInfo",
                r#"{"WindowsProductName": "Windows Server 2022 Standard", "WindowsVersion": "2009", "WindowsBuildLabEx": "20348.1.amd64fre.fe_release.210507-1500"}"#,
            )
            .ok(
                "Win32_Processor",
                r#"[{"Name": "Intel(R) Xeon(R) Silver 4210", "NumberOfCores": 10}, {"Name": "Intel(R) Xeon(R) Silver 4210", "NumberOfCores": 10}]"#,
            )
            .ok("PROCESSOR_ARCHITECTURE", "AMD64")
            .ok("Win32_PhysicalMemory", r#"{"TotalGB": 64, "FreeGB": 41.5}"#)
            .ok(
                "Get-Service",
                r#"[{"Name": "W32Time", "DisplayName": "Windows Time"}, {"Name": "DNS", "DisplayName": "DNS Server"}]"#,
            )
            .ok("Get-WindowsFeature", "AD-Domain-Services\nDNS\n")
            .ok("Get-HotFix", r#"{"HotFixID": "KB5034439", "InstalledOn": "2024-02-14"}"#);
        let store = ServiceStore::with_entries(Path::new("unused.json"), Default::default());
        let ctx = CollectContext {
            session: &session,
            platform: PlatformType::Windows,
            services: &store,
        };

        let info = collect(&ctx).await.unwrap().unwrap();
        assert_eq!(info.os.name, "Windows Server 2022 Standard");
        assert_eq!(info.cpu_cores, "20");
        assert_eq!(info.architecture, "AMD64");
        assert_eq!(info.memory_total, "64 GB");
        assert_eq!(info.memory_available, "41.5 GB");
        assert_eq!(info.uptime, "Unknown");
        assert!(info.disks.is_empty());
        assert_eq!(info.services.len(), 2);
        assert_eq!(info.services[0].display_name, "Windows Time");
        assert_eq!(info.services[0].category, WINDOWS_SERVICE_CATEGORY);
        assert_eq!(info.features, vec!["AD-Domain-Services", "DNS"]);
        assert_eq!(info.last_update.unwrap().hotfix_id, "KB5034439");
        assert_eq!(store.len().await, 2);
    }
}
