//! MAC address of a neighbour from the local ARP/neighbour table.

use std::net::IpAddr;

use tokio::process::Command;

const PROC_NET_ARP: &str = "/proc/net/arp";
/// ATF_COM: the kernel holds a completed entry.
const ARP_FLAG_COMPLETE: u32 = 0x2;

/// `/proc/net/arp` first, then `ip neigh` for tables that only iproute2 shows.
pub async fn mac_for(ip: IpAddr) -> Option<String> {
    if let Ok(table) = tokio::fs::read_to_string(PROC_NET_ARP).await {
        if let Some(mac) = parse_proc_arp(&table, ip) {
            return Some(mac);
        }
    }

    let output = Command::new("ip")
        .args(["neigh", "show", &ip.to_string()])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_ip_neigh(&String::from_utf8_lossy(&output.stdout))
}

/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
/// ```
pub fn parse_proc_arp(table: &str, ip: IpAddr) -> Option<String> {
    let wanted = ip.to_string();
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] != wanted {
            return None;
        }
        let flags = u32::from_str_radix(cols[2].trim_start_matches("0x"), 16).unwrap_or(0);
        if flags & ARP_FLAG_COMPLETE == 0 {
            return None;
        }
        normalize(cols[3])
    })
}

/// `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
pub fn parse_ip_neigh(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.find(|w| *w == "lladdr")?;
        normalize(words.next()?)
    })
}

fn normalize(mac: &str) -> Option<String> {
    let mac = mac.replace('-', ":").to_lowercase();
    let valid = mac.len() == 17
        && mac.split(':').count() == 6
        && mac.split(':').all(|b| b.len() == 2 && u8::from_str_radix(b, 16).is_ok());
    (valid && mac != "00:00:00:00:00:00").then_some(mac)
}
