//! `host-inventory collect`: one full pass over the candidate hosts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::{info, warn};

use crate::cascade::Cascade;
use crate::config::{self, CollectorConfig, HostTarget};
use crate::domain::inventory_store::{InventoryDocument, InventoryStore};
use crate::enrichment::mac_vendor::MacVendorsApi;
use crate::enrichment::{Enrichment, LocalNetwork, MacVendorStore, ServiceStore, VendorLookup};
use crate::orchestrator::Orchestrator;

pub struct CollectArgs {
    pub config: Option<PathBuf>,
    pub hosts: Vec<String>,
    pub hosts_file: Option<PathBuf>,
    pub workers: Option<usize>,
    pub output: Option<PathBuf>,
    pub format: String,
}

pub fn run(args: CollectArgs) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_async(args).await })
}

async fn run_async(args: CollectArgs) -> Result<()> {
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(output) = &args.output {
        cfg.output.inventory_path = output.clone();
    }
    cfg.validate()?;
    super::init_tracing(&cfg);

    let targets = resolve_targets(&args, &cfg)?;
    if targets.is_empty() {
        bail!("no hosts to collect: pass --hosts, --hosts-file or set `hosts` in the config");
    }

    let enrichment = open_enrichment(&cfg).await;
    let cascade = Cascade::from_config(&cfg);
    info!(
        protocols = ?cascade.active_protocols(),
        services = enrichment.services.len().await,
        vendors = enrichment.vendors.len().await,
        "collector ready"
    );

    let orchestrator = Orchestrator::new(cascade, enrichment.clone(), cfg.workers);
    let result = orchestrator.run(targets).await;

    let store = InventoryStore::new(cfg.output.inventory_path.clone());
    let document = InventoryDocument::new(result.hosts, result.summary.clone());
    store.write(&document).await?;

    // Learned entries are worth keeping even if one store cannot be written.
    enrichment.flush().await.unwrap_or_else(|e| {
        warn!(error = %e, "failed to persist enrichment stores");
    });

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result.summary)?),
        _ => {
            super::show::print_hosts(&document.hosts);
            println!();
            print!("{}", result.summary);
            println!(
                "  {} {}",
                "Inventory:".dimmed(),
                store.path().display()
            );
        }
    }
    Ok(())
}

async fn open_enrichment(cfg: &CollectorConfig) -> Enrichment {
    let api: Option<Arc<dyn VendorLookup>> = if cfg.vendor_api.enabled {
        match MacVendorsApi::new(&cfg.vendor_api) {
            Ok(api) => Some(Arc::new(api)),
            Err(e) => {
                warn!(error = %e, "MAC vendor API unavailable, using the local store only");
                None
            }
        }
    } else {
        None
    };

    Enrichment {
        services: Arc::new(ServiceStore::load(&cfg.stores.services_path).await),
        vendors: Arc::new(MacVendorStore::load(&cfg.stores.mac_vendors_path, api).await),
        network: Arc::new(LocalNetwork::default()),
    }
}

/// Command-line hosts replace the configured list; otherwise the config's.
fn resolve_targets(args: &CollectArgs, cfg: &CollectorConfig) -> Result<Vec<HostTarget>> {
    let mut targets = Vec::new();
    for entry in args.hosts.iter().filter(|h| !h.trim().is_empty()) {
        targets.push(HostTarget::parse(entry)?);
    }
    if let Some(path) = &args.hosts_file {
        targets.extend(read_hosts_file(path)?);
    }
    if targets.is_empty() {
        targets = cfg.hosts.clone();
    }
    Ok(targets)
}

fn read_hosts_file(path: &Path) -> Result<Vec<HostTarget>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading hosts file {}", path.display()))?;
    parse_hosts(&text).with_context(|| format!("parsing hosts file {}", path.display()))
}

fn parse_hosts(text: &str) -> Result<Vec<HostTarget>> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(HostTarget::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PlatformType;

    fn args(hosts: &[&str], hosts_file: Option<PathBuf>) -> CollectArgs {
        CollectArgs {
            config: None,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            hosts_file,
            workers: None,
            output: None,
            format: "table".into(),
        }
    }

    #[test]
    fn hosts_file_skips_comments_and_blanks() {
        let targets = parse_hosts(
            "# lab rack\n10.0.0.5\n\n10.0.0.20=windows   # domain controller\n  nas01.lan=nas\n",
        )
        .unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[1].address, "10.0.0.20");
        assert_eq!(targets[1].platform, Some(PlatformType::Windows));
        assert_eq!(targets[2].address, "nas01.lan");
    }

    #[test]
    fn bad_hint_in_hosts_file_fails() {
        assert!(parse_hosts("10.0.0.5=plan9\n").is_err());
    }

    #[test]
    fn command_line_replaces_configured_hosts() {
        let mut cfg = CollectorConfig::default();
        cfg.hosts = vec![HostTarget::new("10.0.9.9")];

        let targets = resolve_targets(&args(&["10.0.0.5", "10.0.0.6=linux"], None), &cfg).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].platform, Some(PlatformType::Linux));

        let targets = resolve_targets(&args(&[], None), &cfg).unwrap();
        assert_eq!(targets, vec![HostTarget::new("10.0.9.9")]);
    }

    #[test]
    fn hosts_file_adds_to_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.txt");
        std::fs::write(&path, "10.0.0.7\n10.0.0.8\n").unwrap();

        let targets = resolve_targets(&args(&["10.0.0.5"], Some(path)), &CollectorConfig::default()).unwrap();
        let addresses: Vec<&str> = targets.iter().map(|t| t.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.5", "10.0.0.7", "10.0.0.8"]);
    }
}
