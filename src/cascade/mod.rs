//! Connection cascade: pre-check, then each configured protocol in fixed
//! priority order until one connects, then platform refinement.

pub mod precheck;
pub mod refine;

use std::sync::Arc;
use std::time::Duration;

pub use precheck::{PortState, PrecheckReport, Reachability, TcpPrecheck};

use crate::clients::linux::LinuxShellClient;
use crate::clients::nas::NasShellClient;
use crate::clients::winrm::WindowsManagementClient;
use crate::clients::{AttemptFailure, ConnectionAttempt, Connector, RemoteSession};
use crate::config::CollectorConfig;
use crate::domain::host_record::HostFailure;
use crate::domain::types::{FailureCategory, PlatformType, Protocol};
use crate::host_log::HostLog;

/// A host the cascade got into, with its refined platform.
pub struct Connected {
    pub session: Box<dyn RemoteSession>,
    pub protocol: Protocol,
    pub platform: PlatformType,
}

pub struct Cascade {
    connectors: Vec<Box<dyn Connector>>,
    reachability: Arc<dyn Reachability>,
}

impl Cascade {
    /// `connectors` are tried in the order given.
    pub fn new(connectors: Vec<Box<dyn Connector>>, reachability: Arc<dyn Reachability>) -> Self {
        Self {
            connectors,
            reachability,
        }
    }

    /// WinRM, then NAS password shell, then Linux key shell.
    pub fn from_config(config: &CollectorConfig) -> Self {
        let mut connectors: Vec<Box<dyn Connector>> = Vec::new();
        if let Some(windows) = &config.windows {
            connectors.push(Box::new(WindowsManagementClient::new(windows)));
        }
        if let Some(nas) = &config.nas {
            connectors.push(Box::new(NasShellClient::new(nas)));
        }
        connectors.push(Box::new(LinuxShellClient::new(&config.ssh)));

        let precheck = TcpPrecheck::new(Duration::from_secs(config.precheck_timeout_secs));
        Self::new(connectors, Arc::new(precheck))
    }

    /// Protocols that will actually be attempted.
    pub fn active_protocols(&self) -> Vec<Protocol> {
        self.active().map(|c| c.protocol()).collect()
    }

    fn active(&self) -> impl Iterator<Item = &dyn Connector> {
        self.connectors
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| c.has_credentials())
    }

    /// Connect to `address`. On exhaustion the most specific failure wins;
    /// equally specific failures keep the earlier entry's.
    pub async fn connect(
        &self,
        address: &str,
        hint: Option<PlatformType>,
        log: &mut HostLog,
    ) -> Result<Connected, HostFailure> {
        let active: Vec<&dyn Connector> = self.active().collect();
        if active.is_empty() {
            return Err(HostFailure {
                category: FailureCategory::Other,
                message: "no credentials configured for any protocol".into(),
            });
        }

        let mut ports: Vec<u16> = active.iter().map(|c| c.port()).collect();
        ports.sort_unstable();
        ports.dedup();
        let report = match self.reachability.probe(address, &ports).await {
            Ok(report) => report,
            Err(failure) => {
                log.debug(format!("pre-check: {} ({})", failure.category, failure.message));
                return Err(failure);
            }
        };
        log.debug(format!("pre-check: open ports {:?}", report.open_ports()));

        let mut best: Option<AttemptFailure> = None;
        for connector in active {
            let protocol = connector.protocol();
            let port = connector.port();
            let attempt = match report.state(port) {
                Some(PortState::Closed) => ConnectionAttempt::Failure(AttemptFailure::new(
                    protocol,
                    FailureCategory::Refused,
                    format!("port {port} refused at pre-check"),
                )),
                Some(PortState::Filtered) => ConnectionAttempt::Failure(AttemptFailure::new(
                    protocol,
                    FailureCategory::Timeout,
                    format!("port {port} did not answer at pre-check"),
                )),
                Some(PortState::Open) | None => connector.connect(address).await,
            };

            match attempt {
                ConnectionAttempt::Success { session, protocol } => {
                    log.debug(format!("{protocol}: connected"));
                    let coarse = hint.unwrap_or_else(|| protocol.default_platform());
                    let platform = refine::refine(session.as_ref(), coarse, log).await;
                    return Ok(Connected {
                        session,
                        protocol,
                        platform,
                    });
                }
                ConnectionAttempt::Failure(failure) => {
                    log.debug(format!("{}: {} ({})", failure.protocol, failure.category, failure.message));
                    let more_specific = best
                        .as_ref()
                        .map_or(true, |b| failure.category.specificity() > b.category.specificity());
                    if more_specific {
                        best = Some(failure);
                    }
                }
            }
        }

        Err(best
            .map(|f| HostFailure {
                category: f.category,
                message: format!("{}: {}", f.protocol, f.message),
            })
            .unwrap_or_else(|| HostFailure {
                category: FailureCategory::Other,
                message: "no protocol attempted".into(),
            }))
    }
}

#[cfg(test)]
pub(crate) mod doubles {
    //! Scripted connectors and reachability for cascade and orchestrator tests.

    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::clients::scripted::ScriptedSession;

    pub type SessionFactory = Arc<dyn Fn(&str) -> Option<ScriptedSession> + Send + Sync>;

    /// Connects to the addresses `factory` answers for; fails everything
    /// else with `failure`.
    pub struct ScriptedConnector {
        pub protocol: Protocol,
        pub port: u16,
        pub credentials: bool,
        pub failure: FailureCategory,
        pub factory: SessionFactory,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        pub fn failing(protocol: Protocol, port: u16, failure: FailureCategory) -> Self {
            Self {
                protocol,
                port,
                credentials: true,
                failure,
                factory: Arc::new(|_: &str| -> Option<ScriptedSession> { None }),
                calls: Arc::default(),
            }
        }

        pub fn with_sessions(mut self, factory: SessionFactory) -> Self {
            self.factory = factory;
            self
        }

        pub fn without_credentials(mut self) -> Self {
            self.credentials = false;
            self
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn protocol(&self) -> Protocol {
            self.protocol
        }

        fn port(&self) -> u16 {
            self.port
        }

        fn has_credentials(&self) -> bool {
            self.credentials
        }

        async fn connect(&self, address: &str) -> ConnectionAttempt {
            self.calls.lock().unwrap().push(address.to_string());
            match (self.factory)(address) {
                Some(session) => ConnectionAttempt::Success {
                    session: Box::new(session),
                    protocol: self.protocol,
                },
                None => ConnectionAttempt::Failure(AttemptFailure::new(
                    self.protocol,
                    self.failure,
                    format!("scripted {}", self.failure),
                )),
            }
        }
    }

    /// Per-address port tables; unknown addresses have every port open.
    #[derive(Default)]
    pub struct ScriptedReachability {
        pub hosts: BTreeMap<String, Result<BTreeMap<u16, PortState>, HostFailure>>,
    }

    impl ScriptedReachability {
        pub fn host(mut self, address: &str, ports: &[(u16, PortState)]) -> Self {
            self.hosts
                .insert(address.to_string(), Ok(ports.iter().copied().collect()));
            self
        }

        pub fn down(mut self, address: &str, category: FailureCategory) -> Self {
            self.hosts.insert(
                address.to_string(),
                Err(HostFailure {
                    category,
                    message: format!("scripted {category}"),
                }),
            );
            self
        }
    }

    #[async_trait]
    impl Reachability for ScriptedReachability {
        async fn probe(&self, address: &str, ports: &[u16]) -> Result<PrecheckReport, HostFailure> {
            match self.hosts.get(address) {
                Some(Ok(table)) => Ok(PrecheckReport { ports: table.clone() }),
                Some(Err(failure)) => Err(failure.clone()),
                None => Ok(PrecheckReport {
                    ports: ports.iter().map(|p| (*p, PortState::Open)).collect(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::doubles::*;
    use super::*;
    use crate::clients::scripted::ScriptedSession;

    fn cascade(connectors: Vec<ScriptedConnector>, reach: ScriptedReachability) -> Cascade {
        Cascade::new(
            connectors
                .into_iter()
                .map(|c| Box::new(c) as Box<dyn Connector>)
                .collect(),
            Arc::new(reach),
        )
    }

    fn linux_session(address: &str) -> Option<ScriptedSession> {
        Some(ScriptedSession::new(address, Protocol::LinuxSsh).ok("uname -s", "Linux"))
    }

    #[tokio::test]
    async fn tries_in_priority_order_and_stops_at_first_success() {
        let winrm = ScriptedConnector::failing(Protocol::Winrm, 5985, FailureCategory::Refused);
        let nas = ScriptedConnector::failing(Protocol::NasSsh, 22, FailureCategory::AuthFailed);
        let linux = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::AuthFailed)
            .with_sessions(Arc::new(linux_session));
        let extra = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::Other);
        let calls = [
            winrm.calls.clone(),
            nas.calls.clone(),
            linux.calls.clone(),
            extra.calls.clone(),
        ];

        let cascade = cascade(vec![winrm, nas, linux, extra], ScriptedReachability::default());
        let mut log = HostLog::new("10.0.0.5");
        let connected = cascade.connect("10.0.0.5", None, &mut log).await.unwrap();

        assert_eq!(connected.protocol, Protocol::LinuxSsh);
        assert_eq!(connected.platform, PlatformType::Linux);
        let counts: Vec<usize> = calls.iter().map(|c| c.lock().unwrap().len()).collect();
        assert_eq!(counts, vec![1, 1, 1, 0]);
    }

    #[tokio::test]
    async fn connectors_without_credentials_are_skipped() {
        let winrm = ScriptedConnector::failing(Protocol::Winrm, 5985, FailureCategory::AuthFailed)
            .without_credentials();
        let winrm_calls = winrm.calls.clone();
        let linux = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::Refused);

        let cascade = cascade(vec![winrm, linux], ScriptedReachability::default());
        assert_eq!(cascade.active_protocols(), vec![Protocol::LinuxSsh]);

        let mut log = HostLog::new("10.0.0.8");
        let failure = cascade.connect("10.0.0.8", None, &mut log).await.err().unwrap();
        assert_eq!(failure.category, FailureCategory::Refused);
        assert!(winrm_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_ports_fail_without_connecting() {
        let winrm = ScriptedConnector::failing(Protocol::Winrm, 5985, FailureCategory::AuthFailed);
        let winrm_calls = winrm.calls.clone();
        let linux = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::AuthFailed)
            .with_sessions(Arc::new(linux_session));
        let reach = ScriptedReachability::default()
            .host("10.0.0.5", &[(5985, PortState::Closed), (22, PortState::Open)]);

        let cascade = cascade(vec![winrm, linux], reach);
        let mut log = HostLog::new("10.0.0.5");
        let connected = cascade.connect("10.0.0.5", None, &mut log).await.unwrap();
        assert_eq!(connected.protocol, Protocol::LinuxSsh);
        assert!(winrm_calls.lock().unwrap().is_empty());
        assert!(log
            .entries()
            .iter()
            .any(|(_, line)| line.contains("port 5985 refused at pre-check")));
    }

    #[tokio::test]
    async fn most_specific_failure_wins() {
        let winrm = ScriptedConnector::failing(Protocol::Winrm, 5985, FailureCategory::Timeout);
        let nas = ScriptedConnector::failing(Protocol::NasSsh, 22, FailureCategory::AuthFailed);
        let linux = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::AuthFailed);
        let cascade = cascade(vec![winrm, nas, linux], ScriptedReachability::default());

        let mut log = HostLog::new("10.0.0.7");
        let failure = cascade.connect("10.0.0.7", None, &mut log).await.err().unwrap();
        assert_eq!(failure.category, FailureCategory::AuthFailed);
        // Ties go to the earlier cascade entry.
        assert!(failure.message.starts_with("nas_ssh:"), "{}", failure.message);
        assert_eq!(log.entries().len(), 4);
    }

    #[tokio::test]
    async fn precheck_failure_short_circuits() {
        let linux = ScriptedConnector::failing(Protocol::LinuxSsh, 22, FailureCategory::AuthFailed);
        let calls = linux.calls.clone();
        let reach = ScriptedReachability::default().down("10.0.0.6", FailureCategory::Unreachable);
        let cascade = cascade(vec![linux], reach);

        let mut log = HostLog::new("10.0.0.6");
        let failure = cascade.connect("10.0.0.6", None, &mut log).await.err().unwrap();
        assert_eq!(failure.category, FailureCategory::Unreachable);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refinement_overrides_the_connecting_protocol() {
        let nas = ScriptedConnector::failing(Protocol::NasSsh, 22, FailureCategory::AuthFailed)
            .with_sessions(Arc::new(|address: &str| {
                Some(ScriptedSession::new(address, Protocol::NasSsh).ok("uname -s", "FreeBSD"))
            }));
        let reach = ScriptedReachability::default();
        let cascade = cascade(vec![nas], reach);

        let mut log = HostLog::new("10.0.0.20");
        let connected = cascade
            .connect("10.0.0.20", Some(PlatformType::Linux), &mut log)
            .await
            .unwrap();
        assert_eq!(connected.protocol, Protocol::NasSsh);
        assert_eq!(connected.platform, PlatformType::FreeBsd);
    }

    #[tokio::test]
    async fn real_precheck_against_closed_local_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let linux = ScriptedConnector::failing(Protocol::LinuxSsh, port, FailureCategory::AuthFailed);
        let cascade = Cascade::new(
            vec![Box::new(linux)],
            Arc::new(TcpPrecheck::new(Duration::from_secs(2))),
        );
        let started = std::time::Instant::now();
        let mut log = HostLog::new("127.0.0.1");
        let failure = cascade.connect("127.0.0.1", None, &mut log).await.err().unwrap();
        assert_eq!(failure.category, FailureCategory::Unreachable);
        assert!(started.elapsed() <= Duration::from_secs(3));
    }
}
