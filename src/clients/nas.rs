//! Password-authenticated remote shell for NAS appliances, which rarely
//! carry an operator key.

use std::time::Duration;

use async_trait::async_trait;

use super::ssh::{SshAuth, SshOptions, SshSession};
use super::{AttemptFailure, ConnectionAttempt, Connector};
use crate::config::NasConfig;
use crate::domain::types::Protocol;

pub struct NasShellClient {
    user: String,
    password: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl NasShellClient {
    pub fn new(config: &NasConfig) -> Self {
        Self {
            user: config.user.clone(),
            password: config.password.clone(),
            port: config.port,
            connect_timeout: Duration::from_secs(config.timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl Connector for NasShellClient {
    fn protocol(&self) -> Protocol {
        Protocol::NasSsh
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }

    async fn connect(&self, address: &str) -> ConnectionAttempt {
        let options = SshOptions {
            user: self.user.clone(),
            port: self.port,
            auth: SshAuth::Password(self.password.clone()),
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
        };
        match SshSession::open(address, Protocol::NasSsh, options).await {
            Ok(session) => ConnectionAttempt::Success {
                session: Box::new(session),
                protocol: Protocol::NasSsh,
            },
            Err(e) => ConnectionAttempt::Failure(AttemptFailure::from_error(Protocol::NasSsh, &e)),
        }
    }
}
