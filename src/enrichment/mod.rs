//! Enrichment: auto-learning service and MAC vendor stores, plus what the
//! local network can say about a host we never connected to.

pub mod arp;
pub mod mac_vendor;
mod persist;
pub mod rdns;
pub mod services;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use mac_vendor::{MacVendorStore, VendorLookup};
pub use services::{ServiceDescriptor, ServiceStore};

/// Local lookups used to annotate failed hosts.
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    async fn reverse_dns(&self, address: &str) -> Option<String>;

    async fn mac_address(&self, address: &str) -> Option<String>;
}

/// Resolver plus the kernel neighbour table of the collecting machine.
pub struct LocalNetwork {
    pub rdns_timeout: Duration,
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self {
            rdns_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl NetworkLookup for LocalNetwork {
    async fn reverse_dns(&self, address: &str) -> Option<String> {
        rdns::reverse_dns(address.parse().ok()?, self.rdns_timeout).await
    }

    async fn mac_address(&self, address: &str) -> Option<String> {
        let ip: IpAddr = address.parse().ok()?;
        arp::mac_for(ip).await
    }
}

/// The shared handles every worker enriches through.
#[derive(Clone)]
pub struct Enrichment {
    pub services: Arc<ServiceStore>,
    pub vendors: Arc<MacVendorStore>,
    pub network: Arc<dyn NetworkLookup>,
}

impl Enrichment {
    /// Flush both stores, reporting the first error after attempting both.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let services = self.services.flush().await;
        let vendors = self.vendors.flush().await;
        services?;
        vendors?;
        Ok(())
    }
}
