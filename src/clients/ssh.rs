//! OpenSSH-backed session shared by the key and password connectors.
//!
//! Each `exec` spawns one `ssh` process (wrapped in `sshpass -e` for password
//! auth) bounded by `ConnectTimeout` for the handshake and an outer tokio
//! timeout for the whole command.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{classify_ssh_stderr, ClientError, CommandOutput, RemoteSession};
use crate::domain::types::Protocol;

/// ssh reserves 255 for its own failures.
const SSH_ERROR_EXIT: i32 = 255;
/// sshpass: the password was rejected.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// sshpass: the host key is unknown and could not be accepted.
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

#[derive(Clone)]
pub enum SshAuth {
    Key(PathBuf),
    Password(String),
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Key(path) => f.debug_tuple("Key").field(path).finish(),
            SshAuth::Password(_) => f.write_str("Password(***)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub user: String,
    pub port: u16,
    pub auth: SshAuth,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

pub struct SshSession {
    address: String,
    protocol: Protocol,
    options: SshOptions,
}

impl SshSession {
    /// Open a session by running a trivial command; the first transport
    /// error is returned classified.
    pub async fn open(
        address: &str,
        protocol: Protocol,
        options: SshOptions,
    ) -> Result<Self, ClientError> {
        let session = Self {
            address: address.to_string(),
            protocol,
            options,
        };
        let output = session.exec("echo ok").await?;
        if !output.success() || output.stdout.trim() != "ok" {
            return Err(ClientError::ProtocolUnavailable(format!(
                "remote shell did not run commands (exit {})",
                output.exit_code
            )));
        }
        Ok(session)
    }

    /// Arguments passed to `ssh`, excluding the remote command.
    pub fn ssh_args(&self) -> Vec<String> {
        let opts = &self.options;
        let mut args = vec![
            "-p".to_string(),
            opts.port.to_string(),
            "-o".into(),
            format!("ConnectTimeout={}", opts.connect_timeout.as_secs().max(1)),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
        ];

        match &opts.auth {
            SshAuth::Key(path) => {
                args.extend([
                    "-i".to_string(),
                    path.display().to_string(),
                    "-o".into(),
                    "BatchMode=yes".into(),
                    "-o".into(),
                    "IdentitiesOnly=yes".into(),
                    "-o".into(),
                    "PasswordAuthentication=no".into(),
                ]);
            }
            SshAuth::Password(_) => {
                args.extend([
                    "-o".to_string(),
                    "PubkeyAuthentication=no".into(),
                    "-o".into(),
                    "PreferredAuthentications=password,keyboard-interactive".into(),
                    "-o".into(),
                    "NumberOfPasswordPrompts=1".into(),
                ]);
            }
        }

        args.push(format!("{}@{}", opts.user, self.address));
        args
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = match &self.options.auth {
            SshAuth::Key(_) => Command::new("ssh"),
            SshAuth::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
        };
        cmd.args(self.ssh_args())
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn program(&self) -> &'static str {
        match self.options.auth {
            SshAuth::Key(_) => "ssh",
            SshAuth::Password(_) => "sshpass",
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ClientError> {
        debug!(host = %self.address, protocol = %self.protocol, command, "exec");

        let child = self.command(command).output();
        let output = tokio::time::timeout(self.options.command_timeout, child)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "command did not finish within {}s",
                    self.options.command_timeout.as_secs()
                ))
            })?
            .map_err(|source| ClientError::Spawn {
                program: self.program().to_string(),
                source,
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if let SshAuth::Password(_) = self.options.auth {
            match exit_code {
                SSHPASS_BAD_PASSWORD => {
                    return Err(ClientError::AuthFailed("password rejected".into()))
                }
                SSHPASS_HOST_KEY_UNKNOWN => {
                    return Err(ClientError::Other("host key could not be accepted".into()))
                }
                _ => {}
            }
        }
        if exit_code == SSH_ERROR_EXIT {
            return Err(classify_ssh_stderr(&stderr));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code,
        })
    }
}
