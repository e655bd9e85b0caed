//! Key-authenticated remote shell for Linux (and FreeBSD) servers.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::ssh::{SshAuth, SshOptions, SshSession};
use super::{AttemptFailure, ConnectionAttempt, Connector};
use crate::config::SshConfig;
use crate::domain::types::{FailureCategory, Protocol};

pub struct LinuxShellClient {
    user: String,
    key_path: Option<PathBuf>,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl LinuxShellClient {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            key_path: config.key_path.clone(),
            port: config.port,
            connect_timeout: Duration::from_secs(config.timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl Connector for LinuxShellClient {
    fn protocol(&self) -> Protocol {
        Protocol::LinuxSsh
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn has_credentials(&self) -> bool {
        !self.user.is_empty() && self.key_path.is_some()
    }

    async fn connect(&self, address: &str) -> ConnectionAttempt {
        let Some(key_path) = self.key_path.clone() else {
            return ConnectionAttempt::Failure(AttemptFailure::new(
                Protocol::LinuxSsh,
                FailureCategory::AuthFailed,
                "no SSH key configured",
            ));
        };
        if !key_path.exists() {
            return ConnectionAttempt::Failure(AttemptFailure::new(
                Protocol::LinuxSsh,
                FailureCategory::Other,
                format!("SSH key {} does not exist", key_path.display()),
            ));
        }

        let options = SshOptions {
            user: self.user.clone(),
            port: self.port,
            auth: SshAuth::Key(key_path),
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
        };
        match SshSession::open(address, Protocol::LinuxSsh, options).await {
            Ok(session) => ConnectionAttempt::Success {
                session: Box::new(session),
                protocol: Protocol::LinuxSsh,
            },
            Err(e) => ConnectionAttempt::Failure(AttemptFailure::from_error(Protocol::LinuxSsh, &e)),
        }
    }
}
