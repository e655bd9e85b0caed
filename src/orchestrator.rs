//! One bounded concurrent pass over the candidate hosts.
//!
//! Each host runs its whole pipeline (pre-check, cascade, refinement,
//! collectors) inside its own task. Nothing a host does, including a panic,
//! reaches another host or the run itself.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cascade::Cascade;
use crate::collectors::{collect_all, CollectContext};
use crate::config::HostTarget;
use crate::domain::failure::{FailureRecord, FailureSummary};
use crate::domain::host_record::{HostFailure, HostRecord};
use crate::domain::types::{FailureCategory, PlatformType};
use crate::enrichment::Enrichment;
use crate::host_log::HostLog;

#[derive(Debug, Clone)]
pub struct RunResult {
    /// One record per attempted host, reachable or not.
    pub hosts: BTreeMap<String, HostRecord>,
    pub failures: Vec<FailureRecord>,
    pub summary: FailureSummary,
}

pub struct Orchestrator {
    cascade: Arc<Cascade>,
    enrichment: Enrichment,
    workers: usize,
}

impl Orchestrator {
    pub fn new(cascade: Cascade, enrichment: Enrichment, workers: usize) -> Self {
        Self {
            cascade: Arc::new(cascade),
            enrichment,
            workers: workers.max(1),
        }
    }

    pub async fn run(&self, targets: Vec<HostTarget>) -> RunResult {
        let targets = dedup(targets);
        info!(hosts = targets.len(), workers = self.workers, "starting collection");

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for target in targets {
            let permits = permits.clone();
            let cascade = self.cascade.clone();
            let enrichment = self.enrichment.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = permits.acquire_owned().await.ok();
                let address = target.address.clone();
                let hint = target.platform;
                // Inner task so a panic surfaces as a JoinError we can attribute.
                let pipeline = tokio::spawn(process_host(target, cascade, enrichment));
                match pipeline.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let message = if e.is_panic() {
                            "host pipeline panicked".to_string()
                        } else {
                            format!("host pipeline aborted: {e}")
                        };
                        warn!(host = %address, "{message}");
                        failed(&address, hint, FailureCategory::Other, message)
                    }
                }
            });
        }

        let mut hosts = BTreeMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((record, failure)) => {
                    failures.extend(failure);
                    hosts.insert(record.address.clone(), record);
                }
                // The outer wrapper never panics; only runtime shutdown gets here.
                Err(e) => warn!(error = %e, "worker task lost"),
            }
        }
        failures.sort_by(|a, b| a.address.cmp(&b.address));

        let summary = FailureSummary::build(hosts.len(), &failures);
        info!(
            total = summary.total_hosts,
            succeeded = summary.successful,
            failed = summary.failed,
            "collection finished"
        );
        RunResult {
            hosts,
            failures,
            summary,
        }
    }
}

/// Exact duplicate addresses are dropped; the first hint wins.
fn dedup(targets: Vec<HostTarget>) -> Vec<HostTarget> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| seen.insert(t.address.clone()))
        .collect()
}

async fn process_host(
    target: HostTarget,
    cascade: Arc<Cascade>,
    enrichment: Enrichment,
) -> (HostRecord, Option<FailureRecord>) {
    let address = target.address.as_str();
    let mut log = HostLog::new(address);

    let outcome = match cascade.connect(address, target.platform, &mut log).await {
        Ok(connected) => {
            let mut record = HostRecord::connected(address, connected.platform, connected.protocol);
            let ctx = CollectContext {
                session: connected.session.as_ref(),
                platform: connected.platform,
                services: &enrichment.services,
            };
            collect_all(&ctx, &mut record, &mut log).await;
            connected.session.close().await;
            log.info(format!(
                "collected via {} as {} [{}]",
                connected.protocol,
                connected.platform,
                record.fact_blocks().join(", ")
            ));
            (record, None)
        }
        Err(failure) => {
            log.warn(format!("{}: {}", failure.category, failure.message));
            let annotated = annotate(address, &failure, &enrichment).await;
            let record = HostRecord::unreachable(
                address,
                target.platform.unwrap_or(PlatformType::Unknown),
                failure,
            );
            (record, Some(annotated))
        }
    };

    log.flush();
    outcome
}

/// What the local network knows about a host we could not get into.
async fn annotate(address: &str, failure: &HostFailure, enrichment: &Enrichment) -> FailureRecord {
    let mut record = FailureRecord::new(address, failure.category, failure.message.clone());
    record.reverse_dns = enrichment.network.reverse_dns(address).await;
    if let Some(mac) = enrichment.network.mac_address(address).await {
        record.mac_vendor = Some(enrichment.vendors.lookup(&mac).await);
        record.mac_address = Some(mac);
    }
    record
}

fn failed(
    address: &str,
    hint: Option<PlatformType>,
    category: FailureCategory,
    message: String,
) -> (HostRecord, Option<FailureRecord>) {
    let failure = FailureRecord::new(address, category, message.clone());
    let record = HostRecord::unreachable(
        address,
        hint.unwrap_or(PlatformType::Unknown),
        HostFailure { category, message },
    );
    (record, Some(failure))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cascade::doubles::{ScriptedConnector, ScriptedReachability};
    use crate::clients::scripted::ScriptedSession;
    use crate::clients::{
        ClientError, CommandOutput, ConnectionAttempt, Connector, RemoteSession,
    };
    use crate::domain::types::Protocol;
    use crate::enrichment::mac_vendor::VendorSource;
    use crate::enrichment::{MacVendorStore, NetworkLookup, ServiceStore};

    struct FixedNetwork;

    #[async_trait]
    impl NetworkLookup for FixedNetwork {
        async fn reverse_dns(&self, address: &str) -> Option<String> {
            (address == "10.0.0.7").then(|| "printer.lab.local".to_string())
        }

        async fn mac_address(&self, address: &str) -> Option<String> {
            (address == "10.0.0.7").then(|| "00:11:32:aa:bb:cc".to_string())
        }
    }

    async fn enrichment() -> Enrichment {
        let vendors = MacVendorStore::with_entries(Path::new("unused.json"), BTreeMap::new(), None);
        vendors.insert("001132", "Synology Incorporated", VendorSource::Seed).await;
        Enrichment {
            services: Arc::new(ServiceStore::with_entries(Path::new("unused.json"), BTreeMap::new())),
            vendors: Arc::new(vendors),
            network: Arc::new(FixedNetwork),
        }
    }

    fn linux_for(good: &'static [&'static str]) -> ScriptedConnector {
        ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::AuthFailed).with_sessions(
            Arc::new(move |address: &str| -> Option<ScriptedSession> {
                good.iter().any(|g| *g == address).then(|| {
                    ScriptedSession::new(address, Protocol::LinuxSsh)
                        .ok("uname -s", "Linux")
                        .ok("uname -r", "6.1.0")
                })
            }),
        )
    }

    fn cascade_of(connector: impl Connector + 'static, reach: ScriptedReachability) -> Cascade {
        let connectors: Vec<Box<dyn Connector>> = vec![Box::new(connector)];
        Cascade::new(connectors, Arc::new(reach))
    }

    fn targets(addresses: &[&str]) -> Vec<HostTarget> {
        addresses.iter().map(|a| HostTarget::new(a)).collect()
    }

    #[tokio::test]
    async fn every_candidate_gets_a_record() {
        let reach = ScriptedReachability::default()
            .down("10.0.0.6", FailureCategory::Unreachable)
            .down("nas.invalid", FailureCategory::DnsFailed);
        let cascade = cascade_of(linux_for(&["10.0.0.5"]), reach);
        let orchestrator = Orchestrator::new(cascade, enrichment().await, 2);

        let result = orchestrator
            .run(targets(&["10.0.0.5", "10.0.0.6", "10.0.0.7", "nas.invalid"]))
            .await;

        assert_eq!(result.hosts.len(), 4);
        assert_eq!(result.failures.len(), 3);
        assert_eq!(result.summary.successful, 1);
        assert_eq!(result.summary.hosts(FailureCategory::AuthFailed), vec!["10.0.0.7"]);
        assert_eq!(result.summary.hosts(FailureCategory::DnsFailed), vec!["nas.invalid"]);
        assert!(result.hosts["10.0.0.5"].reachable);
        assert!(!result.hosts["10.0.0.6"].has_facts());

        let printer = result.failures.iter().find(|f| f.address == "10.0.0.7").unwrap();
        assert_eq!(printer.reverse_dns.as_deref(), Some("printer.lab.local"));
        assert_eq!(printer.mac_vendor.as_deref(), Some("Synology Incorporated"));
    }

    #[tokio::test]
    async fn refined_platform_picks_the_collectors() {
        let connector = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::AuthFailed)
            .with_sessions(Arc::new(|address: &str| -> Option<ScriptedSession> {
                Some(
                    ScriptedSession::new(address, Protocol::LinuxSsh)
                        .ok("uname -s", "FreeBSD")
                        .ok("service -e", "/etc/rc.d/sshd\n/usr/local/etc/rc.d/nginx\n")
                        .ok("systemctl", "should-not-run.service loaded active running x\n"),
                )
            }));
        let orchestrator = Orchestrator::new(
            cascade_of(connector, ScriptedReachability::default()),
            enrichment().await,
            1,
        );

        let mut target = HostTarget::new("10.0.0.30");
        target.platform = Some(PlatformType::Linux);
        let result = orchestrator.run(vec![target]).await;

        let host = &result.hosts["10.0.0.30"];
        assert_eq!(host.platform, PlatformType::FreeBsd);
        let services: Vec<&str> = host
            .services
            .as_ref()
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(services, vec!["sshd", "nginx"]);
        assert!(host.containers.is_none());
    }

    #[tokio::test]
    async fn duplicates_are_attempted_once() {
        let connector = linux_for(&["10.0.0.5"]);
        let calls = connector.calls.clone();
        let cascade = cascade_of(connector, ScriptedReachability::default());
        let orchestrator = Orchestrator::new(cascade, enrichment().await, 4);

        let result = orchestrator.run(targets(&["10.0.0.5", "10.0.0.5", "10.0.0.5"])).await;
        assert_eq!(result.hosts.len(), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    struct PanickingSession;

    #[async_trait]
    impl RemoteSession for PanickingSession {
        fn protocol(&self) -> Protocol {
            Protocol::LinuxSsh
        }

        fn address(&self) -> &str {
            "10.0.0.66"
        }

        async fn exec(&self, _command: &str) -> Result<CommandOutput, ClientError> {
            panic!("collector blew up");
        }
    }

    /// Connects everything; 10.0.0.66 gets a session that panics on use.
    struct MixedConnector;

    #[async_trait]
    impl Connector for MixedConnector {
        fn protocol(&self) -> Protocol {
            Protocol::LinuxSsh
        }

        fn port(&self) -> u16 {
            22
        }

        fn has_credentials(&self) -> bool {
            true
        }

        async fn connect(&self, address: &str) -> ConnectionAttempt {
            let session: Box<dyn RemoteSession> = if address == "10.0.0.66" {
                Box::new(PanickingSession)
            } else {
                Box::new(ScriptedSession::new(address, Protocol::LinuxSsh).ok("uname -s", "Linux"))
            };
            ConnectionAttempt::Success {
                session,
                protocol: Protocol::LinuxSsh,
            }
        }
    }

    #[tokio::test]
    async fn a_panicking_host_does_not_take_the_run_down() {
        let cascade = cascade_of(MixedConnector, ScriptedReachability::default());
        let orchestrator = Orchestrator::new(cascade, enrichment().await, 2);

        let result = orchestrator
            .run(targets(&["10.0.0.5", "10.0.0.66", "10.0.0.8"]))
            .await;

        assert_eq!(result.hosts.len(), 3);
        assert!(result.hosts["10.0.0.5"].reachable);
        assert!(result.hosts["10.0.0.8"].reachable);
        let crashed = &result.hosts["10.0.0.66"];
        assert!(!crashed.reachable);
        assert_eq!(crashed.failure.as_ref().unwrap().category, FailureCategory::Other);
        assert_eq!(result.summary.count(FailureCategory::Other), 1);
    }

    /// Tracks how many connects are in flight at once.
    struct SlowConnector {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        fn protocol(&self) -> Protocol {
            Protocol::LinuxSsh
        }

        fn port(&self) -> u16 {
            22
        }

        fn has_credentials(&self) -> bool {
            true
        }

        async fn connect(&self, _address: &str) -> ConnectionAttempt {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ConnectionAttempt::Failure(crate::clients::AttemptFailure::new(
                Protocol::LinuxSsh,
                FailureCategory::Timeout,
                "slow",
            ))
        }
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency() {
        let peak = Arc::new(AtomicUsize::new(0));
        let connector = SlowConnector {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let cascade = cascade_of(connector, ScriptedReachability::default());
        let orchestrator = Orchestrator::new(cascade, enrichment().await, 3);

        let addresses: Vec<String> = (1..=12).map(|i| format!("10.0.1.{i}")).collect();
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        let result = orchestrator.run(targets(&refs)).await;

        assert_eq!(result.failures.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }
}
