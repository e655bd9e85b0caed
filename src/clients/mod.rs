//! Remote-execution clients and the connector seam the cascade drives.
//!
//! Every transport exposes the same `RemoteSession` surface so collectors
//! never care whether a command went over SSH or WinRM.

pub mod linux;
pub mod nas;
pub mod ntlm;
pub mod ssh;
pub mod winrm;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::{FailureCategory, Protocol};

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("name resolution failed: {0}")]
    DnsFailed(String),
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("protocol unavailable: {0}")]
    ProtocolUnavailable(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ClientError::Timeout(_) => FailureCategory::Timeout,
            ClientError::Refused(_) => FailureCategory::Refused,
            ClientError::AuthFailed(_) => FailureCategory::AuthFailed,
            ClientError::DnsFailed(_) => FailureCategory::DnsFailed,
            ClientError::Unreachable(_) => FailureCategory::Unreachable,
            ClientError::ProtocolUnavailable(_) => FailureCategory::ProtocolUnavailable,
            ClientError::Spawn { .. } | ClientError::Other(_) => FailureCategory::Other,
        }
    }
}

/// Map an OpenSSH client's stderr onto the failure taxonomy.
pub fn classify_ssh_stderr(stderr: &str) -> ClientError {
    let text = stderr.trim();
    let lower = text.to_lowercase();
    let message = if text.is_empty() {
        "ssh exited without output".to_string()
    } else {
        text.lines().last().unwrap_or(text).to_string()
    };

    if lower.contains("permission denied") || lower.contains("authentication failed") {
        ClientError::AuthFailed(message)
    } else if lower.contains("could not resolve hostname")
        || lower.contains("name or service not known")
    {
        ClientError::DnsFailed(message)
    } else if lower.contains("connection refused") {
        ClientError::Refused(message)
    } else if lower.contains("timed out") {
        ClientError::Timeout(message)
    } else if lower.contains("no route to host") || lower.contains("network is unreachable") {
        ClientError::Unreachable(message)
    } else if lower.contains("connection closed")
        || lower.contains("connection reset")
        || lower.contains("kex_exchange_identification")
        || lower.contains("no matching")
    {
        ClientError::ProtocolUnavailable(message)
    } else {
        ClientError::Other(message)
    }
}

/// An established connection to one host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn address(&self) -> &str;

    /// Run one command. A non-zero exit is an `Ok` with the exit code set;
    /// only transport problems are errors.
    async fn exec(&self, command: &str) -> Result<CommandOutput, ClientError>;

    /// Release any server-side resources held by the session.
    async fn close(&self) {}
}

/// Why one cascade entry failed.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub protocol: Protocol,
    pub category: FailureCategory,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(protocol: Protocol, category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            protocol,
            category,
            message: message.into(),
        }
    }

    pub fn from_error(protocol: Protocol, error: &ClientError) -> Self {
        Self::new(protocol, error.category(), error.to_string())
    }
}

pub enum ConnectionAttempt {
    Success {
        session: Box<dyn RemoteSession>,
        protocol: Protocol,
    },
    Failure(AttemptFailure),
}

/// One entry of the connection cascade.
#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// TCP port the protocol listens on; used to consult the pre-check.
    fn port(&self) -> u16;

    /// Entries without credentials are skipped entirely.
    fn has_credentials(&self) -> bool;

    async fn connect(&self, address: &str) -> ConnectionAttempt;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory session that answers commands from a script.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedSession {
        pub address: String,
        pub protocol: Option<Protocol>,
        responses: HashMap<String, Result<CommandOutput, String>>,
        pub log: Mutex<Vec<String>>,
    }

    impl ScriptedSession {
        pub fn new(address: &str, protocol: Protocol) -> Self {
            Self {
                address: address.to_string(),
                protocol: Some(protocol),
                ..Default::default()
            }
        }

        /// Commands matching `needle` (substring) print `stdout` and exit 0.
        pub fn ok(mut self, needle: &str, stdout: &str) -> Self {
            self.responses.insert(
                needle.to_string(),
                Ok(CommandOutput {
                    stdout: stdout.to_string(),
                    ..Default::default()
                }),
            );
            self
        }

        pub fn fail(mut self, needle: &str, exit_code: i32) -> Self {
            self.responses.insert(
                needle.to_string(),
                Ok(CommandOutput {
                    exit_code,
                    ..Default::default()
                }),
            );
            self
        }

        pub fn transport_error(mut self, needle: &str, message: &str) -> Self {
            self.responses
                .insert(needle.to_string(), Err(message.to_string()));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteSession for ScriptedSession {
        fn protocol(&self) -> Protocol {
            self.protocol.unwrap_or(Protocol::LinuxSsh)
        }

        fn address(&self) -> &str {
            &self.address
        }

        async fn exec(&self, command: &str) -> Result<CommandOutput, ClientError> {
            self.log.lock().unwrap().push(command.to_string());
            // Longest matching needle wins so specific entries shadow generic ones.
            let hit = self
                .responses
                .iter()
                .filter(|(needle, _)| command.contains(needle.as_str()))
                .max_by_key(|(needle, _)| needle.len());
            match hit {
                Some((_, Ok(output))) => Ok(output.clone()),
                Some((_, Err(message))) => Err(ClientError::Other(message.clone())),
                None => Ok(CommandOutput {
                    exit_code: 127,
                    stderr: "command not found".into(),
                    ..Default::default()
                }),
            }
        }
    }
}
