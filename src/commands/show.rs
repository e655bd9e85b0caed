//! `host-inventory show`: print the last inventory document from disk.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config;
use crate::domain::host_record::HostRecord;
use crate::domain::inventory_store::InventoryStore;

pub fn run(config_path: Option<&Path>, format: &str) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_async(config_path, format).await })
}

async fn run_async(config_path: Option<&Path>, format: &str) -> Result<()> {
    let cfg = config::load(config_path)?;
    super::init_tracing(&cfg);
    let store = InventoryStore::new(cfg.output.inventory_path.clone());
    let document = store.read().await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&document)?),
        _ => {
            print_hosts(&document.hosts);
            println!();
            print!("{}", document.summary);
            let integrity = if document.verify() {
                "ok".green()
            } else {
                "MISMATCH".red()
            };
            println!(
                "  {} {}  {} {}  {} {}",
                "Collected:".dimmed(),
                document.collected_at.to_rfc3339(),
                "Checksum:".dimmed(),
                &document.checksum[..std::cmp::min(document.checksum.len(), 24)],
                "Integrity:".dimmed(),
                integrity
            );
        }
    }
    Ok(())
}

pub fn print_hosts(hosts: &BTreeMap<String, HostRecord>) {
    println!("{}", "═══ Host Inventory ═══".cyan().bold());
    println!(
        "  {:<22} {:<8} {:<9} {:<10} DETAIL",
        "HOST", "STATUS", "PLATFORM", "VIA"
    );
    for (address, host) in hosts {
        let status = if host.reachable {
            format!("{:<8}", "ok").green()
        } else {
            format!("{:<8}", "failed").red()
        };
        let via = host
            .protocol
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let detail = match &host.failure {
            Some(failure) => format!("{}: {}", failure.category, failure.message),
            None => {
                let name = host.hostname.as_deref().unwrap_or("");
                format!("{name} [{}]", host.fact_blocks().join(", "))
            }
        };
        println!(
            "  {:<22} {} {:<9} {:<10} {}",
            address,
            status,
            host.platform.to_string(),
            via,
            detail.trim()
        );
    }
}
