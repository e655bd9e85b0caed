//! Proxmox VE guests and storage.

use anyhow::Result;

use super::{lines, output, run, CollectContext};
use crate::domain::host_record::{GuestInfo, GuestKind, HypervisorInfo, HypervisorStorage};

pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<HypervisorInfo>> {
    let session = ctx.session;
    let Some(version) = run(session, "pveversion 2>/dev/null").await? else {
        return Ok(None);
    };

    let vms = output(session, "qm list 2>/dev/null")
        .await?
        .map(|out| parse_qm_list(&out))
        .unwrap_or_default();
    let containers = output(session, "pct list 2>/dev/null")
        .await?
        .map(|out| parse_pct_list(&out))
        .unwrap_or_default();
    let storage = output(session, "pvesm status 2>/dev/null")
        .await?
        .map(|out| parse_pvesm_status(&out))
        .unwrap_or_default();

    let problematic = vms
        .iter()
        .chain(containers.iter())
        .filter(|g| is_problematic(g))
        .cloned()
        .collect();

    Ok(Some(HypervisorInfo {
        pve_version: version,
        vms,
        containers,
        storage,
        problematic,
    }))
}

/// `VMID NAME STATUS MEM(MB) BOOTDISK(GB) PID`
fn parse_qm_list(output: &str) -> Vec<GuestInfo> {
    lines(output)
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 3 {
                return None;
            }
            Some(GuestInfo {
                vmid: cols[0].to_string(),
                name: cols[1].to_string(),
                status: cols[2].to_string(),
                kind: GuestKind::Vm,
                memory: cols
                    .get(3)
                    .map(|m| if m.chars().all(|c| c.is_ascii_digit()) { format!("{m}MB") } else { m.to_string() }),
                disk: cols
                    .get(4)
                    .and_then(|d| d.parse::<f64>().ok())
                    .map(|gb| format!("{gb:.1}GB")),
                lock: None,
            })
        })
        .collect()
}

/// `VMID Status Lock Name`; the lock column is blank for unlocked guests.
fn parse_pct_list(output: &str) -> Vec<GuestInfo> {
    lines(output)
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let (lock, name) = match cols.len() {
                0..=1 => return None,
                2 => (None, String::new()),
                3 => (None, cols[2].to_string()),
                _ => (Some(cols[2]), cols[3..].join(" ")),
            };
            Some(GuestInfo {
                vmid: cols[0].to_string(),
                name,
                status: cols[1].to_string(),
                kind: GuestKind::Container,
                memory: None,
                disk: None,
                lock: lock.filter(|l| *l != "-").map(str::to_string),
            })
        })
        .collect()
}

/// `Name Type Status Total Used Available %`, sizes in KiB.
fn parse_pvesm_status(output: &str) -> Vec<HypervisorStorage> {
    lines(output)
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 6 {
                return None;
            }
            Some(HypervisorStorage {
                name: cols[0].to_string(),
                storage_type: cols[1].to_string(),
                status: cols[2].to_string(),
                total: kib_to_gb(cols[3]),
                used: kib_to_gb(cols[4]),
                available: kib_to_gb(cols[5]),
                usage_percent: cols.get(6).map(|p| p.to_string()).unwrap_or_else(|| "Unknown".into()),
            })
        })
        .collect()
}

fn kib_to_gb(value: &str) -> String {
    match value.parse::<f64>() {
        Ok(kib) => format!("{:.1}GB", kib / 1024.0 / 1024.0),
        Err(_) => value.to_string(),
    }
}

fn is_problematic(guest: &GuestInfo) -> bool {
    !matches!(guest.status.as_str(), "running" | "stopped") || guest.lock.is_some()
}
