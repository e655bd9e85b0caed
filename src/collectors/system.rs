//! Host identity, OS release, resources and network.

use std::collections::BTreeMap;

use anyhow::Result;

use super::{human_bytes, lines, run, CollectContext};
use crate::clients::RemoteSession;
use crate::domain::host_record::{ListeningPort, NetworkConfig, OsRelease, ResourceUsage, SystemInfo};
use crate::domain::types::PlatformType;
use crate::enrichment::ServiceStore;

const MAX_LISTENING_PORTS: usize = 20;

pub struct SystemFacts {
    pub hostname: Option<String>,
    pub system: SystemInfo,
    pub resources: ResourceUsage,
    pub network: NetworkConfig,
}

pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<SystemFacts>> {
    match ctx.platform {
        PlatformType::FreeBsd => collect_freebsd(ctx.session, ctx.services).await,
        _ => collect_linux(ctx.session, ctx.services).await,
    }
}

// ── Linux ──────────────────────────────────────────────────

async fn collect_linux(
    session: &dyn RemoteSession,
    services: &ServiceStore,
) -> Result<Option<SystemFacts>> {
    let os_release = run(session, "cat /etc/os-release").await?;
    let kernel = run(session, "uname -r").await?;
    if os_release.is_none() && kernel.is_none() {
        return Ok(None);
    }

    let hostname = run(session, "hostname -f 2>/dev/null || hostname").await?;
    let architecture = run(session, "uname -m").await?;
    let uptime = run(session, "uptime -p").await?;
    let load = run(session, r#"uptime | awk -F"load average:" '{print $2}'"#).await?;
    let memory = run(session, "free -h | grep Mem").await?;
    let disk = run(session, "df -h / | tail -1").await?;
    let cpu_model = run(session, r#"lscpu | grep "Model name""#)
        .await?
        .and_then(|line| line.split_once(':').map(|(_, v)| v.trim().to_string()));
    let cpu_cores = run(session, "nproc").await?;
    let bios = run(session, "lshw -c memory 2>/dev/null")
        .await?
        .map(|out| parse_lshw_firmware(&out))
        .unwrap_or_default();
    let ips = run(session, "ip -4 addr show | grep inet")
        .await?
        .map(|out| parse_inet_lines(&out))
        .unwrap_or_default();
    let ports = run(session, "ss -tlnp | grep LISTEN")
        .await?
        .map(|out| parse_ss_listen(&out))
        .unwrap_or_default();

    let (memory_total, memory_used) = memory
        .as_deref()
        .map(parse_free_mem)
        .unwrap_or_else(unknown_pair);

    Ok(Some(SystemFacts {
        hostname,
        system: SystemInfo {
            os: os_release.as_deref().map(parse_os_release).unwrap_or_default(),
            kernel: or_unknown(kernel),
            architecture: or_unknown(architecture),
            uptime: or_unknown(uptime),
            cpu_model: or_unknown(cpu_model),
            cpu_cores: or_unknown(cpu_cores),
            bios,
        },
        resources: ResourceUsage {
            load_average: or_unknown(load),
            memory_total,
            memory_used,
            disk_usage: disk.as_deref().map(parse_df_root).unwrap_or_else(|| "Unknown".into()),
        },
        network: NetworkConfig {
            ip_addresses: ips,
            listening_ports: describe_ports(ports, services).await,
        },
    }))
}

/// `/etc/os-release` key=value lines; missing keys fall back to "Unknown".
pub fn parse_os_release(content: &str) -> OsRelease {
    let fields: BTreeMap<&str, String> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').to_string()))
        .collect();
    let get = |key: &str| fields.get(key).cloned();
    let defaults = OsRelease::default();

    let name = get("NAME").unwrap_or(defaults.name);
    OsRelease {
        version: get("VERSION").unwrap_or(defaults.version),
        version_id: get("VERSION_ID").unwrap_or(defaults.version_id),
        id: get("ID").unwrap_or(defaults.id),
        id_like: get("ID_LIKE"),
        pretty_name: get("PRETTY_NAME").unwrap_or_else(|| name.clone()),
        version_codename: get("VERSION_CODENAME"),
        name,
    }
}

/// Key/value lines of the `*-firmware` section of `lshw -c memory`.
pub fn parse_lshw_firmware(output: &str) -> BTreeMap<String, String> {
    let mut bios = BTreeMap::new();
    let mut in_firmware = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(section) = trimmed.strip_prefix("*-") {
            in_firmware = section.starts_with("firmware");
            continue;
        }
        if !in_firmware {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            let value = value.trim();
            if !value.is_empty() {
                bios.insert(key.trim().replace(' ', "_"), value.to_string());
            }
        }
    }
    bios
}

/// `Mem:  15Gi  8.2Gi  ...` → (total, used).
fn parse_free_mem(line: &str) -> (String, String) {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match (parts.get(1), parts.get(2)) {
        (Some(total), Some(used)) => (total.to_string(), used.to_string()),
        _ => unknown_pair(),
    }
}

/// Last line of `df -h /` → "used/size (pct)".
fn parse_df_root(line: &str) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 5 {
        format!("{}/{} ({})", parts[2], parts[1], parts[4])
    } else {
        "Unknown".into()
    }
}

/// Addresses from `inet 10.0.0.5/24 ...` lines, loopback excluded.
fn parse_inet_lines(output: &str) -> Vec<String> {
    lines(output)
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            words.find(|w| *w == "inet")?;
            let addr = words.next()?;
            let addr = addr.split('/').next().unwrap_or(addr);
            (!addr.starts_with("127.")).then(|| addr.to_string())
        })
        .collect()
}

/// `LISTEN 0 128 0.0.0.0:22 0.0.0.0:* users:(("sshd",pid=812,fd=3))`
fn parse_ss_listen(output: &str) -> Vec<ListeningPort> {
    lines(output)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let address = parts.get(3)?.to_string();
            let process = parts
                .iter()
                .find(|p| p.starts_with("users:"))
                .and_then(|p| p.split('"').nth(1))
                .map(str::to_string);
            Some(ListeningPort {
                address,
                process,
                description: None,
            })
        })
        .take(MAX_LISTENING_PORTS)
        .collect()
}

/// Named processes are learned into the service store; anonymous sockets
/// are matched against the ports known services declare.
async fn describe_ports(ports: Vec<ListeningPort>, services: &ServiceStore) -> Vec<ListeningPort> {
    let mut described = Vec::with_capacity(ports.len());
    for mut port in ports {
        port.description = match &port.process {
            Some(process) => Some(services.get_or_create(process).await.display_name),
            None => match port_number(&port.address) {
                Some(number) => services.describe_port(number).await,
                None => None,
            },
        };
        described.push(port);
    }
    described
}

fn port_number(address: &str) -> Option<u16> {
    address.rsplit([':', '.']).next()?.parse().ok()
}

// ── FreeBSD ────────────────────────────────────────────────

async fn collect_freebsd(
    session: &dyn RemoteSession,
    services: &ServiceStore,
) -> Result<Option<SystemFacts>> {
    let kernel = run(session, "uname -r").await?;
    let Some(kernel) = kernel else {
        return Ok(None);
    };

    let hostname = run(session, "hostname").await?;
    let version = run(session, "freebsd-version").await?;
    let architecture = run(session, "uname -m").await?;
    let uptime = run(session, "uptime").await?;
    let load = run(session, "sysctl -n vm.loadavg").await?;
    let physmem = run(session, "sysctl -n hw.physmem").await?;
    let free_pages = run(session, "sysctl -n vm.stats.vm.v_free_count").await?;
    let page_size = run(session, "sysctl -n hw.pagesize").await?;
    let disk = run(session, "df -h / | tail -1").await?;
    let cpu_model = run(session, "sysctl -n hw.model").await?;
    let cpu_cores = run(session, "sysctl -n hw.ncpu").await?;
    let ips = run(session, r#"ifconfig | grep "inet ""#)
        .await?
        .map(|out| parse_inet_lines(&out))
        .unwrap_or_default();
    let ports = run(session, "sockstat -4l")
        .await?
        .map(|out| parse_sockstat(&out))
        .unwrap_or_default();

    let total: Option<u64> = physmem.and_then(|v| v.parse().ok());
    let free = free_pages
        .and_then(|v| v.parse::<u64>().ok())
        .zip(page_size.and_then(|v| v.parse::<u64>().ok()))
        .map(|(pages, size)| pages * size);
    let version = version.unwrap_or_else(|| kernel.clone());

    Ok(Some(SystemFacts {
        hostname,
        system: SystemInfo {
            os: OsRelease {
                name: "FreeBSD".into(),
                version: version.clone(),
                version_id: version.clone(),
                id: "freebsd".into(),
                id_like: None,
                pretty_name: format!("FreeBSD {version}"),
                version_codename: None,
            },
            kernel,
            architecture: or_unknown(architecture),
            uptime: uptime.as_deref().map(parse_bsd_uptime).unwrap_or_else(|| "Unknown".into()),
            cpu_model: or_unknown(cpu_model),
            cpu_cores: or_unknown(cpu_cores),
            bios: BTreeMap::new(),
        },
        resources: ResourceUsage {
            load_average: load
                .map(|l| l.trim_matches(|c| c == '{' || c == '}' || c == ' ').to_string())
                .unwrap_or_else(|| "Unknown".into()),
            memory_total: total.map(human_bytes).unwrap_or_else(|| "Unknown".into()),
            memory_used: match (total, free) {
                (Some(total), Some(free)) => human_bytes(total.saturating_sub(free)),
                _ => "Unknown".into(),
            },
            disk_usage: disk.as_deref().map(parse_df_root).unwrap_or_else(|| "Unknown".into()),
        },
        network: NetworkConfig {
            ip_addresses: ips,
            listening_ports: describe_ports(ports, services).await,
        },
    }))
}

/// ` 3:41PM  up 12 days,  4:02, 1 user, load averages: ...` → "12 days,  4:02".
fn parse_bsd_uptime(line: &str) -> String {
    let Some((_, rest)) = line.split_once("up ") else {
        return line.trim().to_string();
    };
    let end = rest.find(" user").and_then(|i| rest[..i].rfind(','));
    match end {
        Some(end) => rest[..end].trim().to_string(),
        None => rest.trim().to_string(),
    }
}

/// `USER COMMAND PID FD PROTO LOCAL FOREIGN`, TCP listeners only.
fn parse_sockstat(output: &str) -> Vec<ListeningPort> {
    lines(output)
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 || !parts[4].starts_with("tcp") {
                return None;
            }
            Some(ListeningPort {
                address: parts[5].to_string(),
                process: Some(parts[1].to_string()),
                description: None,
            })
        })
        .take(MAX_LISTENING_PORTS)
        .collect()
}

fn or_unknown(value: Option<String>) -> String {
    value.unwrap_or_else(|| "Unknown".into())
}

fn unknown_pair() -> (String, String) {
    ("Unknown".into(), "Unknown".into())
}
