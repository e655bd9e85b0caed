//! NAS appliances: vendor detection, model, volumes, shares, pools and disks.

use anyhow::Result;

use super::{lines, output, run, CollectContext};
use crate::clients::RemoteSession;
use crate::domain::host_record::{
    DiskHealth, NasInfo, NasInterface, NasModel, NasShare, NasStatus, NasVolume, StoragePool,
};
use crate::domain::types::PlatformType;

const MAX_DISKS: usize = 8;
const MAX_PACKAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NasKind {
    Synology,
    Qnap,
    Asustor,
    Buffalo,
    Netgear,
    TrueNas,
    FreeBsdNas,
    GenericNas,
}

impl NasKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NasKind::Synology => "synology",
            NasKind::Qnap => "qnap",
            NasKind::Asustor => "asustor",
            NasKind::Buffalo => "buffalo",
            NasKind::Netgear => "netgear",
            NasKind::TrueNas => "truenas",
            NasKind::FreeBsdNas => "freebsd_nas",
            NasKind::GenericNas => "generic_nas",
        }
    }
}

const VENDOR_MARKERS: [(NasKind, &str); 8] = [
    (NasKind::Synology, "test -f /etc/synoinfo.conf && echo yes"),
    (NasKind::Qnap, "test -f /etc/config/uLinux.conf && echo yes"),
    (NasKind::Asustor, "test -d /usr/builtin/etc && echo yes"),
    (NasKind::Buffalo, "test -f /etc/nas_feature && echo yes"),
    (NasKind::Netgear, "test -f /etc/raidiator_version && echo yes"),
    (NasKind::TrueNas, "grep -qi truenas /etc/version 2>/dev/null && echo yes"),
    (NasKind::TrueNas, "test -f /data/freenas-v1.db && echo yes"),
    (NasKind::TrueNas, "test -d /usr/local/www/freenasUI && echo yes"),
];

/// Appliance marker files, first match wins.
pub async fn detect_vendor(session: &dyn RemoteSession) -> Result<Option<NasKind>> {
    for (kind, probe) in VENDOR_MARKERS {
        if run(session, probe).await?.is_some() {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}

/// Vendor markers, then a FreeBSD kernel, then Synology-style `/volume*` mounts.
pub async fn detect(session: &dyn RemoteSession) -> Result<Option<NasKind>> {
    if let Some(kind) = detect_vendor(session).await? {
        return Ok(Some(kind));
    }
    if run(session, "uname -s").await?.as_deref() == Some("FreeBSD") {
        let truenas = run(session, "ps ax | grep -i [t]ruenas").await?.is_some();
        return Ok(Some(if truenas { NasKind::TrueNas } else { NasKind::FreeBsdNas }));
    }
    if run(session, "ls -d /volume* 2>/dev/null | head -1").await?.is_some() {
        return Ok(Some(NasKind::GenericNas));
    }
    Ok(None)
}

pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<NasInfo>> {
    let session = ctx.session;
    let Some(kind) = detect(session).await? else {
        return Ok(None);
    };
    let bsd = ctx.platform == PlatformType::FreeBsd;

    Ok(Some(NasInfo {
        nas_type: kind.as_str().to_string(),
        model: model(session, kind).await?,
        volumes: volumes(session, kind).await?,
        shares: shares(session, kind).await?,
        storage_pools: storage_pools(session, kind, bsd).await?,
        disk_health: disk_health(session, bsd).await?,
        interfaces: interfaces(session, bsd).await?,
        installed_packages: packages(session, kind).await?,
        status: status(session, bsd).await?,
    }))
}

// ── Model ──────────────────────────────────────────────────

async fn model(session: &dyn RemoteSession, kind: NasKind) -> Result<NasModel> {
    let mut model = NasModel::default();
    match kind {
        NasKind::Synology => {
            model.model = run(session, "cat /proc/sys/kernel/syno_hw_version 2>/dev/null").await?;
            if let Some(version) = run(session, "cat /etc.defaults/VERSION 2>/dev/null").await? {
                model.firmware_version = shell_var(&version, "productversion");
                model.build_number = shell_var(&version, "buildnumber");
            }
        }
        NasKind::Qnap => {
            model.model = run(session, "cat /etc/platform.conf 2>/dev/null")
                .await?
                .and_then(|conf| shell_var(&conf, "PLATFORM"));
            model.firmware_version = run(session, "cat /etc/version 2>/dev/null").await?;
        }
        NasKind::TrueNas | NasKind::FreeBsdNas => {
            model.firmware_version = run(session, "cat /etc/version 2>/dev/null").await?;
            let kernel = run(session, "uname -s").await?;
            let release = run(session, "uname -r").await?;
            model.base_os = kernel.zip(release).map(|(k, r)| format!("{k} {r}"));
        }
        NasKind::Asustor | NasKind::Buffalo | NasKind::Netgear | NasKind::GenericNas => {}
    }
    if model.model.is_none() {
        model.model = run(session, "dmidecode -s system-product-name 2>/dev/null")
            .await?
            .filter(|m| !matches!(m.as_str(), "Unknown" | "To be filled by O.E.M."));
    }
    Ok(model)
}

/// `key="value"` from a shell-style config file.
fn shell_var(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key)
            .then(|| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

// ── Volumes ────────────────────────────────────────────────

async fn volumes(session: &dyn RemoteSession, kind: NasKind) -> Result<Vec<NasVolume>> {
    let df = output(session, "df -h").await?.unwrap_or_default();
    let mounts = parse_df(&df);
    let mut volumes = if matches!(kind, NasKind::TrueNas | NasKind::FreeBsdNas) {
        let zfs = output(session, "zfs list -H -o name,used,avail,refer,mountpoint 2>/dev/null")
            .await?
            .unwrap_or_default();
        parse_zfs_list(&zfs)
    } else {
        Vec::new()
    };
    volumes.extend(match kind {
        NasKind::Synology => keep_mounts(mounts, |m| m.starts_with("/volume"), "synology_volume"),
        NasKind::Qnap => keep_mounts(
            mounts,
            |m| m.starts_with("/share") || m.starts_with("/mnt"),
            "qnap_volume",
        ),
        NasKind::TrueNas | NasKind::FreeBsdNas => {
            keep_mounts(mounts, |m| m.starts_with("/mnt") || m.starts_with("/tank"), "filesystem")
        }
        _ => keep_mounts(mounts, is_data_mount, "filesystem"),
    });
    Ok(volumes)
}

/// Rows of `df -h`: (device, size, used, avail, pct, mount).
fn parse_df(output: &str) -> Vec<[String; 6]> {
    lines(output)
        .filter(|l| !l.starts_with("Filesystem"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 6 {
                return None;
            }
            Some([
                cols[0].to_string(),
                cols[1].to_string(),
                cols[2].to_string(),
                cols[3].to_string(),
                cols[4].to_string(),
                cols[5..].join(" "),
            ])
        })
        .collect()
}

fn keep_mounts(
    rows: Vec<[String; 6]>,
    wanted: impl Fn(&str) -> bool,
    volume_type: &str,
) -> Vec<NasVolume> {
    rows.into_iter()
        .filter(|row| wanted(&row[5]))
        .map(|[device, size, used, available, usage_percent, mount_point]| NasVolume {
            device,
            mount_point,
            size,
            used,
            available,
            usage_percent,
            volume_type: volume_type.to_string(),
        })
        .collect()
}

fn is_data_mount(mount: &str) -> bool {
    const PSEUDO: [&str; 5] = ["/proc", "/sys", "/dev", "/run", "/boot"];
    mount != "/" && !PSEUDO.iter().any(|p| mount.starts_with(p))
}

/// Pools and first-level datasets; deeper children are left out.
fn parse_zfs_list(output: &str) -> Vec<NasVolume> {
    lines(output)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 5 || cols[0].matches('/').count() > 1 {
                return None;
            }
            let name = cols[0];
            Some(NasVolume {
                device: name.to_string(),
                mount_point: match cols[4] {
                    "-" | "none" => format!("/mnt/{name}"),
                    mount => mount.to_string(),
                },
                size: "Unknown".into(),
                used: cols[1].to_string(),
                available: cols[2].to_string(),
                usage_percent: "Unknown".into(),
                volume_type: "zfs_dataset".into(),
            })
        })
        .collect()
}

// ── Shares ─────────────────────────────────────────────────

async fn shares(session: &dyn RemoteSession, kind: NasKind) -> Result<Vec<NasShare>> {
    let mut smb: Vec<String> = output(session, "testparm -s 2>/dev/null")
        .await?
        .map(|out| parse_smb_sections(&out))
        .unwrap_or_default();
    if smb.is_empty() && kind == NasKind::TrueNas {
        smb = output(session, "midclt call sharing.smb.query 2>/dev/null")
            .await?
            .map(|out| parse_midclt_names(&out))
            .unwrap_or_default();
    }
    let nfs = output(session, "cat /etc/exports 2>/dev/null")
        .await?
        .map(|out| parse_exports(&out))
        .unwrap_or_default();

    let share = |name: String, share_type: &str, protocol: &str| NasShare {
        name,
        share_type: share_type.to_string(),
        protocol: protocol.to_string(),
    };
    Ok(smb
        .into_iter()
        .map(|name| share(name, "SMB", "CIFS/SMB"))
        .chain(nfs.into_iter().map(|name| share(name, "NFS", "NFS")))
        .collect())
}

fn parse_smb_sections(output: &str) -> Vec<String> {
    lines(output)
        .filter_map(|line| {
            let name = line.trim().strip_prefix('[')?.strip_suffix(']')?;
            (!matches!(name, "global" | "printers" | "print$")).then(|| name.to_string())
        })
        .collect()
}

fn parse_midclt_names(output: &str) -> Vec<String> {
    serde_json::from_str::<serde_json::Value>(output)
        .ok()
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|share| share.get("name")?.as_str().map(str::to_string))
        .collect()
}

fn parse_exports(output: &str) -> Vec<String> {
    lines(output)
        .filter(|l| !l.trim_start().starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

// ── Pools ──────────────────────────────────────────────────

async fn storage_pools(
    session: &dyn RemoteSession,
    kind: NasKind,
    bsd: bool,
) -> Result<Vec<StoragePool>> {
    let mut pools = Vec::new();
    if bsd || kind == NasKind::TrueNas {
        if let Some(out) = output(session, "zpool list -H -o name,health 2>/dev/null").await? {
            pools.extend(lines(&out).filter_map(|line| {
                let (name, health) = line.split_once('\t')?;
                Some(StoragePool {
                    name: name.to_string(),
                    pool_type: "zfs_pool".into(),
                    state: health.trim().to_string(),
                    level: None,
                })
            }));
        }
    }
    if !bsd {
        if let Some(out) = output(session, "cat /proc/mdstat 2>/dev/null").await? {
            pools.extend(parse_mdstat(&out));
        }
        if let Some(out) = output(session, "vgs --noheadings -o vg_name 2>/dev/null").await? {
            pools.extend(lines(&out).map(|name| StoragePool {
                name: name.trim().to_string(),
                pool_type: "lvm_volume_group".into(),
                state: "active".into(),
                level: None,
            }));
        }
    }
    Ok(pools)
}

/// `md2 : active raid5 sdd3[3] sdc3[2] sdb3[1] sda3[0]`
fn parse_mdstat(output: &str) -> Vec<StoragePool> {
    lines(output)
        .filter(|l| l.starts_with("md"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            Some(StoragePool {
                name: cols[0].to_string(),
                pool_type: "mdadm_raid".into(),
                state: if cols[2] == "active" { "active" } else { "unknown" }.into(),
                level: Some(cols[3].to_string()),
            })
        })
        .collect()
}

// ── Disks ──────────────────────────────────────────────────

async fn disk_health(session: &dyn RemoteSession, bsd: bool) -> Result<Vec<DiskHealth>> {
    let disks: Vec<(String, String, String)> = if bsd {
        run(session, "sysctl -n kern.disks")
            .await?
            .map(|out| {
                out.split_whitespace()
                    .map(|d| (d.to_string(), "Unknown".to_string(), "Unknown".to_string()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        output(session, "lsblk -d -n -o NAME,SIZE,MODEL 2>/dev/null")
            .await?
            .map(|out| parse_lsblk(&out))
            .unwrap_or_default()
    };

    let mut health = Vec::new();
    for (device, size, model) in disks.into_iter().filter(|(d, _, _)| is_device_name(d)).take(MAX_DISKS) {
        let smart = run(session, &format!("smartctl -H /dev/{device} 2>/dev/null")).await?;
        health.push(DiskHealth {
            device,
            size,
            model,
            health: smart.as_deref().map(smart_verdict).unwrap_or("Unknown").to_string(),
        });
    }
    Ok(health)
}

fn parse_lsblk(output: &str) -> Vec<(String, String, String)> {
    lines(output)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            if ["loop", "ram", "zram", "sr"].iter().any(|p| name.starts_with(p)) {
                return None;
            }
            let size = cols.next().unwrap_or("Unknown").to_string();
            let model = cols.collect::<Vec<_>>().join(" ");
            Some((
                name.to_string(),
                size,
                if model.is_empty() { "Unknown".into() } else { model },
            ))
        })
        .collect()
}

/// Names interpolated into a remote command line must be plain identifiers.
fn is_device_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn smart_verdict(output: &str) -> &'static str {
    if output.contains("PASSED") || output.contains("Health Status: OK") {
        "PASSED"
    } else if output.contains("FAILED") {
        "FAILED"
    } else {
        "Unknown"
    }
}

// ── Interfaces, packages, status ───────────────────────────

async fn interfaces(session: &dyn RemoteSession, bsd: bool) -> Result<Vec<NasInterface>> {
    if bsd {
        return Ok(output(session, "ifconfig")
            .await?
            .map(|out| parse_ifconfig(&out))
            .unwrap_or_default());
    }
    Ok(output(session, "ip -o -4 addr show")
        .await?
        .map(|out| parse_ip_oneline(&out))
        .unwrap_or_default())
}

/// `2: eth0    inet 10.0.0.21/24 brd 10.0.0.255 scope global eth0\ ...`
fn parse_ip_oneline(output: &str) -> Vec<NasInterface> {
    lines(output)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 || cols[1] == "lo" || cols[2] != "inet" {
                return None;
            }
            Some(NasInterface {
                name: cols[1].to_string(),
                state: "UP".into(),
                ip_address: cols[3].to_string(),
            })
        })
        .collect()
}

fn parse_ifconfig(output: &str) -> Vec<NasInterface> {
    let mut interfaces: Vec<NasInterface> = Vec::new();
    // Address lines belong to the header above them; loopback blocks are skipped.
    let mut in_kept_block = false;
    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            in_kept_block = false;
            let Some((name, flags)) = line.split_once(": ") else {
                continue;
            };
            if name.starts_with("lo") {
                continue;
            }
            let up = flags.contains("<UP") || flags.contains(",UP");
            interfaces.push(NasInterface {
                name: name.to_string(),
                state: if up { "UP" } else { "DOWN" }.into(),
                ip_address: "No IP".into(),
            });
            in_kept_block = true;
        } else if let Some(rest) = line.trim().strip_prefix("inet ") {
            match interfaces.last_mut() {
                Some(current) if in_kept_block && current.ip_address == "No IP" => {
                    current.ip_address = rest.split_whitespace().next().unwrap_or_default().to_string();
                }
                _ => {}
            }
        }
    }
    interfaces
}

async fn packages(session: &dyn RemoteSession, kind: NasKind) -> Result<Vec<String>> {
    let names: Vec<String> = match kind {
        NasKind::Synology => output(session, "synopkg list 2>/dev/null")
            .await?
            .map(|out| {
                lines(&out)
                    .filter_map(|l| l.split(':').next())
                    .map(|l| l.trim().to_string())
                    .collect()
            })
            .unwrap_or_default(),
        NasKind::Qnap => first_column(output(session, "ls /share/CACHEDEV*_DATA/.qpkg/ 2>/dev/null").await?),
        NasKind::TrueNas | NasKind::FreeBsdNas => {
            let jails = first_column(output(session, "jls name 2>/dev/null").await?)
                .into_iter()
                .map(|jail| format!("Jail: {jail}"));
            let pkgs = first_column(output(session, "pkg info 2>/dev/null").await?);
            jails.chain(pkgs).collect()
        }
        _ => first_column(
            output(session, "dpkg-query -W -f='${Package}\\n' 2>/dev/null || rpm -qa 2>/dev/null")
                .await?,
        ),
    };
    Ok(names.into_iter().filter(|n| !n.is_empty()).take(MAX_PACKAGES).collect())
}

fn first_column(out: Option<String>) -> Vec<String> {
    out.map(|out| {
        lines(&out)
            .filter_map(|l| l.split_whitespace().next())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

async fn status(session: &dyn RemoteSession, bsd: bool) -> Result<NasStatus> {
    let temperature = if bsd {
        run(session, "sysctl -n dev.cpu.0.temperature 2>/dev/null").await?
    } else {
        run(session, "cat /sys/class/thermal/thermal_zone0/temp 2>/dev/null")
            .await?
            .and_then(|milli| milli.parse::<f64>().ok())
            .map(|milli| format!("{:.1}°C", milli / 1000.0))
    };
    Ok(NasStatus {
        uptime: run(session, "uptime -p 2>/dev/null || uptime").await?,
        load_average: run(session, r#"uptime | awk -F"load average" '{print $2}' | tr -d ':s'"#)
            .await?
            .map(|l| l.trim().to_string()),
        temperature,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::clients::scripted::ScriptedSession;
    use crate::domain::types::Protocol;
    use crate::enrichment::ServiceStore;

    const SYNO_DF: &str = "\
Filesystem         Size  Used Avail Use% Mounted on
/dev/md0           2.3G  1.4G  817M  64% /
/dev/mapper/cachedev_0  7.0T  3.1T  3.9T  45% /volume1
tmpfs              1.9G  4.0K  1.9G   1% /dev/shm
";

    #[test]
    fn synology_version_file() {
        let version = "majorversion=\"7\"\nproductversion=\"7.2.1\"\nbuildnumber=\"69057\"\n";
        assert_eq!(shell_var(version, "productversion").as_deref(), Some("7.2.1"));
        assert_eq!(shell_var(version, "buildnumber").as_deref(), Some("69057"));
        assert_eq!(shell_var(version, "smallfixnumber"), None);
    }

    #[test]
    fn df_filters_by_vendor_layout() {
        let synology = keep_mounts(parse_df(SYNO_DF), |m| m.starts_with("/volume"), "synology_volume");
        assert_eq!(synology.len(), 1);
        assert_eq!(synology[0].device, "/dev/mapper/cachedev_0");
        assert_eq!(synology[0].usage_percent, "45%");

        let generic = keep_mounts(parse_df(SYNO_DF), is_data_mount, "filesystem");
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].mount_point, "/volume1");
    }

    #[test]
    fn zfs_datasets_one_level_deep() {
        let zfs = "tank\t1.2T\t2.3T\t96K\t/mnt/tank\n\
                   tank/media\t900G\t2.3T\t900G\t/mnt/tank/media\n\
                   tank/media/photos\t100G\t2.3T\t100G\t/mnt/tank/media/photos\n\
                   boot-pool\t3.1G\t200G\t96K\tnone\n";
        let volumes = parse_zfs_list(zfs);
        let devices: Vec<&str> = volumes.iter().map(|v| v.device.as_str()).collect();
        assert_eq!(devices, vec!["tank", "tank/media", "boot-pool"]);
        assert_eq!(volumes[2].mount_point, "/mnt/boot-pool");
    }

    #[test]
    fn shares_and_pools() {
        assert_eq!(
            parse_smb_sections("[global]\n\tworkgroup = LAB\n[media]\n\tpath = /volume1/media\n[backup]\n"),
            vec!["media", "backup"]
        );
        assert_eq!(
            parse_exports("# comment\n/volume1/nfs 10.0.0.0/24(rw,sync)\n"),
            vec!["/volume1/nfs"]
        );
        assert_eq!(
            parse_midclt_names(r#"[{"id": 1, "name": "media"}, {"id": 2, "name": "home"}]"#),
            vec!["media", "home"]
        );
        let pools = parse_mdstat("Personalities : [raid1]\nmd2 : active raid5 sdd3[3] sdc3[2]\nmd0 : active raid1 sda1[0]\n");
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].level.as_deref(), Some("raid5"));
    }

    #[test]
    fn interface_listings() {
        let linux = parse_ip_oneline(
            "1: lo    inet 127.0.0.1/8 scope host lo\n2: eth0    inet 10.0.0.21/24 brd 10.0.0.255 scope global eth0\n",
        );
        assert_eq!(linux.len(), 1);
        assert_eq!(linux[0].ip_address, "10.0.0.21/24");

        let bsd = parse_ifconfig(
            "em0: flags=8843<UP,BROADCAST,RUNNING,SIMPLEX,MULTICAST> metric 0 mtu 1500\n\
             \tinet 10.0.0.20 netmask 0xffffff00 broadcast 10.0.0.255\n\
             lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> metric 0 mtu 16384\n\
             \tinet 127.0.0.1 netmask 0xff000000\n",
        );
        assert_eq!(bsd.len(), 1);
        assert_eq!(bsd[0].name, "em0");
        assert_eq!(bsd[0].ip_address, "10.0.0.20");
    }

    #[test]
    fn disk_names_and_smart() {
        let disks = parse_lsblk("sda 3.6T WDC WD40EFRX-68N32N0\nloop0 55M\nsdb 3.6T\n");
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].2, "WDC WD40EFRX-68N32N0");
        assert_eq!(disks[1].2, "Unknown");
        assert!(is_device_name("nvme0n1"));
        assert!(!is_device_name("sda;reboot"));
        assert_eq!(smart_verdict("SMART overall-health self-assessment test result: PASSED"), "PASSED");
    }

    #[tokio::test]
    async fn synology_appliance() {
        let session = ScriptedSession::new("10.0.0.21", Protocol::NasSsh)
            .ok("synoinfo.conf", "yes")
            .ok("syno_hw_version", "DS920+")
            .ok("/etc.defaults/VERSION", "productversion=\"7.2.1\"\nbuildnumber=\"69057\"\n")
            .ok("df -h", SYNO_DF)
            .ok("lsblk", "sata1 3.6T WDC WD40EFRX\nsata2 3.6T WDC WD40EFRX\n")
            .ok("smartctl -H /dev/sata1", "SMART overall-health self-assessment test result: PASSED")
            .ok("synopkg list", "ContainerManager-20.10.23: Container Manager\nHyperBackup-4.1.0: Hyper Backup\n");
        let store = ServiceStore::with_entries(Path::new("unused.json"), Default::default());
        let ctx = CollectContext {
            session: &session,
            platform: PlatformType::Nas,
            services: &store,
        };

        let nas = collect(&ctx).await.unwrap().unwrap();
        assert_eq!(nas.nas_type, "synology");
        assert_eq!(nas.model.model.as_deref(), Some("DS920+"));
        assert_eq!(nas.model.firmware_version.as_deref(), Some("7.2.1"));
        assert_eq!(nas.model.build_number.as_deref(), Some("69057"));
        assert_eq!(nas.volumes.len(), 1);
        assert_eq!(nas.disk_health.len(), 2);
        assert_eq!(nas.disk_health[0].health, "PASSED");
        assert_eq!(nas.disk_health[1].health, "Unknown");
        assert_eq!(nas.installed_packages, vec!["ContainerManager-20.10.23", "HyperBackup-4.1.0"]);
        assert!(nas.storage_pools.is_empty());

        // Marker probing stops at the first vendor hit.
        assert!(!session.commands().iter().any(|c| c.contains("uLinux.conf")));
    }

    #[tokio::test]
    async fn freebsd_without_truenas_processes() {
        let session = ScriptedSession::new("10.0.0.22", Protocol::NasSsh)
            .ok("uname -s", "FreeBSD")
            .ok("uname -r", "14.0-RELEASE")
            .ok("zpool list", "tank\tONLINE\nbackup\tDEGRADED\n")
            .ok("kern.disks", "ada1 ada0");
        let store = ServiceStore::with_entries(Path::new("unused.json"), Default::default());
        let ctx = CollectContext {
            session: &session,
            platform: PlatformType::FreeBsd,
            services: &store,
        };

        let nas = collect(&ctx).await.unwrap().unwrap();
        assert_eq!(nas.nas_type, "freebsd_nas");
        assert_eq!(nas.model.base_os.as_deref(), Some("FreeBSD 14.0-RELEASE"));
        assert_eq!(nas.storage_pools.len(), 2);
        assert_eq!(nas.storage_pools[1].state, "DEGRADED");
        assert_eq!(nas.disk_health.len(), 2);
    }

    #[tokio::test]
    async fn plain_linux_is_not_a_nas() {
        let session = ScriptedSession::new("10.0.0.5", Protocol::LinuxSsh).ok("uname -s", "Linux");
        assert_eq!(detect(&session).await.unwrap(), None);
    }
}
