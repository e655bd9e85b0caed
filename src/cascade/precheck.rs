//! TCP pre-check: resolve the host and see which management ports answer
//! before any protocol pays its own timeout.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use crate::domain::host_record::HostFailure;
use crate::domain::types::FailureCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    /// Actively refused (RST).
    Closed,
    /// No answer within the timeout, or the route is gone.
    Filtered,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecheckReport {
    pub ports: BTreeMap<u16, PortState>,
}

impl PrecheckReport {
    pub fn state(&self, port: u16) -> Option<PortState> {
        self.ports.get(&port).copied()
    }

    pub fn any_open(&self) -> bool {
        self.ports.values().any(|s| *s == PortState::Open)
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|(_, s)| **s == PortState::Open)
            .map(|(p, _)| *p)
            .collect()
    }
}

#[async_trait]
pub trait Reachability: Send + Sync {
    /// Probe `ports` on `address`. `Err` means the host cannot be attempted
    /// at all (name does not resolve, or nothing answers).
    async fn probe(&self, address: &str, ports: &[u16]) -> Result<PrecheckReport, HostFailure>;
}

pub struct TcpPrecheck {
    pub timeout: Duration,
}

impl TcpPrecheck {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr, HostFailure> {
        if let Ok(ip) = address.trim_matches(['[', ']']).parse::<IpAddr>() {
            return Ok(ip);
        }
        let lookup = tokio::net::lookup_host((address, 0));
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().map(|a| a.ip()).ok_or_else(|| HostFailure {
                category: FailureCategory::DnsFailed,
                message: format!("{address} resolved to no addresses"),
            }),
            Ok(Err(e)) => Err(HostFailure {
                category: FailureCategory::DnsFailed,
                message: format!("cannot resolve {address}: {e}"),
            }),
            Err(_) => Err(HostFailure {
                category: FailureCategory::DnsFailed,
                message: format!("resolving {address} timed out after {:?}", self.timeout),
            }),
        }
    }
}

#[async_trait]
impl Reachability for TcpPrecheck {
    async fn probe(&self, address: &str, ports: &[u16]) -> Result<PrecheckReport, HostFailure> {
        let ip = self.resolve(address).await?;

        let mut probes = JoinSet::new();
        for &port in ports {
            let timeout = self.timeout;
            probes.spawn(async move { (port, probe_port(SocketAddr::new(ip, port), timeout).await) });
        }

        let mut report = PrecheckReport::default();
        while let Some(joined) = probes.join_next().await {
            // A probe task only panics if the runtime is shutting down.
            if let Ok((port, state)) = joined {
                report.ports.insert(port, state);
            }
        }

        if report.any_open() {
            return Ok(report);
        }
        let summary = report
            .ports
            .iter()
            .map(|(port, state)| format!("{port} {}", if *state == PortState::Closed { "closed" } else { "filtered" }))
            .collect::<Vec<_>>()
            .join(", ");
        Err(HostFailure {
            category: FailureCategory::Unreachable,
            message: format!("no management port open on {ip} ({summary})"),
        })
    }
}

async fn probe_port(addr: SocketAddr, timeout: Duration) -> PortState {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => PortState::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortState::Closed,
        Ok(Err(_)) | Err(_) => PortState::Filtered,
    }
}
