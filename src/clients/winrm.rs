//! WindowsManagementClient: WS-Management (WinRM) remote shell over HTTP(S).
//!
//! One session maps to one remote `cmd` shell; every `exec` runs a PowerShell
//! script through it as Command → Receive… → Signal, and `close` deletes the
//! shell. Authentication schemes are tried in configured order (NTLM before
//! Basic by default).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::ntlm::{self, Challenge, NtlmCredentials};
use super::{AttemptFailure, ClientError, CommandOutput, ConnectionAttempt, Connector, RemoteSession};
use crate::config::WindowsConfig;
use crate::domain::types::Protocol;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
const RESOURCE_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const STATE_DONE: &str = "CommandState/Done";
/// WS-Man fault raised when a Receive saw no output within the operation timeout.
const FAULT_OPERATION_TIMEOUT: &str = "2150858793";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    Ntlm,
    Basic,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::Ntlm => write!(f, "ntlm"),
            AuthScheme::Basic => write!(f, "basic"),
        }
    }
}

pub struct WindowsManagementClient {
    username: String,
    password: String,
    port: u16,
    use_https: bool,
    verify_tls: bool,
    auth_schemes: Vec<AuthScheme>,
    timeout: Duration,
    command_timeout: Duration,
}

impl WindowsManagementClient {
    pub fn new(config: &WindowsConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            port: if config.use_https {
                config.https_port
            } else {
                config.port
            },
            use_https: config.use_https,
            verify_tls: config.verify_tls,
            auth_schemes: config.auth_schemes.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    fn endpoint(&self, address: &str) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        let host = if address.contains(':') && !address.starts_with('[') {
            format!("[{address}]")
        } else {
            address.to_string()
        };
        format!("{scheme}://{host}:{}/wsman", self.port)
    }

    fn transport(&self, address: &str, scheme: AuthScheme) -> Result<Transport, ClientError> {
        let http = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .pool_max_idle_per_host(1)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| ClientError::Other(format!("building HTTP client: {e}")))?;

        let auth = match scheme {
            AuthScheme::Basic => TransportAuth::Basic(format!(
                "Basic {}",
                BASE64.encode(format!("{}:{}", self.username, self.password))
            )),
            AuthScheme::Ntlm => TransportAuth::Ntlm {
                credentials: NtlmCredentials::parse(&self.username, &self.password),
                authenticated: Mutex::new(false),
            },
        };

        Ok(Transport {
            http,
            endpoint: self.endpoint(address),
            auth,
            operation_timeout: self.timeout,
        })
    }
}

#[async_trait]
impl Connector for WindowsManagementClient {
    fn protocol(&self) -> Protocol {
        Protocol::Winrm
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    async fn connect(&self, address: &str) -> ConnectionAttempt {
        let mut last: Option<ClientError> = None;

        for scheme in &self.auth_schemes {
            let transport = match self.transport(address, *scheme) {
                Ok(t) => t,
                Err(e) => return ConnectionAttempt::Failure(AttemptFailure::from_error(Protocol::Winrm, &e)),
            };
            match transport.create_shell().await {
                Ok(shell_id) => {
                    debug!(host = %address, scheme = %scheme, "winrm shell opened");
                    return ConnectionAttempt::Success {
                        session: Box::new(WinRmSession {
                            address: address.to_string(),
                            transport,
                            shell_id,
                            command_timeout: self.command_timeout,
                        }),
                        protocol: Protocol::Winrm,
                    };
                }
                Err(e @ ClientError::AuthFailed(_)) | Err(e @ ClientError::ProtocolUnavailable(_)) => {
                    // Another scheme may still be accepted.
                    debug!(host = %address, scheme = %scheme, error = %e, "winrm auth attempt failed");
                    last = Some(match last {
                        Some(prev) if prev.category().specificity() > e.category().specificity() => prev,
                        _ => e,
                    });
                }
                Err(e) => {
                    // Transport-level failure; no scheme will fare better.
                    return ConnectionAttempt::Failure(AttemptFailure::from_error(Protocol::Winrm, &e));
                }
            }
        }

        let error = last.unwrap_or_else(|| ClientError::Other("no WinRM auth scheme configured".into()));
        ConnectionAttempt::Failure(AttemptFailure::from_error(Protocol::Winrm, &error))
    }
}

// ── Transport ──────────────────────────────────────────────

enum TransportAuth {
    Basic(String),
    Ntlm {
        credentials: NtlmCredentials,
        /// Whether the pooled connection has completed the handshake.
        authenticated: Mutex<bool>,
    },
}

struct Transport {
    http: Client,
    endpoint: String,
    auth: TransportAuth,
    operation_timeout: Duration,
}

impl Transport {
    async fn send(&self, envelope: String) -> Result<String, ClientError> {
        match &self.auth {
            TransportAuth::Basic(header) => {
                let response = self.post(envelope, Some(header.clone())).await?;
                self.read_response(response).await
            }
            TransportAuth::Ntlm {
                credentials,
                authenticated,
            } => {
                // Held across the exchange: NTLM authenticates the connection, not the request.
                let mut ready = authenticated.lock().await;
                if *ready {
                    let response = self.post(envelope.clone(), None).await?;
                    if response.status() != StatusCode::UNAUTHORIZED {
                        return self.read_response(response).await;
                    }
                    *ready = false;
                }
                let response = self.ntlm_handshake(credentials, envelope).await?;
                let body = self.read_response(response).await?;
                *ready = true;
                Ok(body)
            }
        }
    }

    async fn ntlm_handshake(
        &self,
        credentials: &NtlmCredentials,
        envelope: String,
    ) -> Result<reqwest::Response, ClientError> {
        let negotiate = format!("Negotiate {}", BASE64.encode(ntlm::negotiate_message()));
        let response = self.post(String::new(), Some(negotiate)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Err(ClientError::ProtocolUnavailable(format!(
                "unexpected HTTP {} to NTLM negotiate",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| {
                let (scheme, token) = v.split_once(' ')?;
                (scheme.eq_ignore_ascii_case("negotiate") || scheme.eq_ignore_ascii_case("ntlm"))
                    .then(|| token.trim().to_string())
            })
            .ok_or_else(|| {
                ClientError::ProtocolUnavailable("listener does not offer NTLM".into())
            })?;
        // Drain so the connection goes back to the pool for the next leg.
        let _ = response.bytes().await;

        let raw = BASE64
            .decode(token)
            .map_err(|e| ClientError::Other(format!("malformed NTLM challenge: {e}")))?;
        let challenge =
            Challenge::parse(&raw).map_err(|e| ClientError::Other(format!("{e:#}")))?;
        let authenticate = ntlm::authenticate_message(
            credentials,
            &challenge,
            rand::random::<[u8; 8]>(),
            ntlm::filetime_now(),
        )
        .map_err(|e| ClientError::Other(format!("{e:#}")))?;

        self.post(
            envelope,
            Some(format!("Negotiate {}", BASE64.encode(authenticate))),
        )
        .await
    }

    async fn post(
        &self,
        body: String,
        authorization: Option<String>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(body);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        request.send().await.map_err(map_http_error)
    }

    async fn read_response(&self, response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Other(format!("reading WinRM response: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(ClientError::AuthFailed(format!(
                "WinRM rejected credentials (HTTP {status})"
            ))),
            StatusCode::NOT_FOUND => Err(ClientError::ProtocolUnavailable(
                "no WS-Management listener at /wsman".into(),
            )),
            _ => {
                let message = xml::fault_message(&body)
                    .unwrap_or_else(|| format!("HTTP {status}"));
                let lower = message.to_lowercase();
                if lower.contains("access is denied") {
                    Err(ClientError::AuthFailed(message))
                } else if lower.contains("unencrypted") || status.is_client_error() {
                    Err(ClientError::ProtocolUnavailable(message))
                } else {
                    Err(ClientError::Other(message))
                }
            }
        }
    }

    async fn create_shell(&self) -> Result<String, ClientError> {
        let options = "<wsman:OptionSet>\
            <wsman:Option Name=\"WINRS_NOPROFILE\">TRUE</wsman:Option>\
            <wsman:Option Name=\"WINRS_CODEPAGE\">65001</wsman:Option>\
            </wsman:OptionSet>";
        let body = "<rsp:Shell>\
            <rsp:InputStreams>stdin</rsp:InputStreams>\
            <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>\
            </rsp:Shell>";
        let response = self
            .send(xml::envelope(
                &self.endpoint,
                ACTION_CREATE,
                None,
                options,
                body,
                self.operation_timeout,
            ))
            .await?;
        xml::shell_id(&response)
            .ok_or_else(|| ClientError::ProtocolUnavailable("no ShellId in Create response".into()))
    }

    async fn delete_shell(&self, shell_id: &str) -> Result<(), ClientError> {
        self.send(xml::envelope(
            &self.endpoint,
            ACTION_DELETE,
            Some(shell_id),
            "",
            "",
            self.operation_timeout,
        ))
        .await
        .map(|_| ())
    }

    async fn run(&self, shell_id: &str, script: &str) -> Result<CommandOutput, ClientError> {
        let encoded = encode_powershell(script);
        let options = "<wsman:OptionSet>\
            <wsman:Option Name=\"WINRS_CONSOLEMODE_STDIN\">TRUE</wsman:Option>\
            <wsman:Option Name=\"WINRS_SKIP_CMD_SHELL\">FALSE</wsman:Option>\
            </wsman:OptionSet>";
        let body = format!(
            "<rsp:CommandLine><rsp:Command>powershell</rsp:Command>\
             <rsp:Arguments>-NoProfile -NonInteractive -EncodedCommand {encoded}</rsp:Arguments>\
             </rsp:CommandLine>"
        );
        let response = self
            .send(xml::envelope(
                &self.endpoint,
                ACTION_COMMAND,
                Some(shell_id),
                options,
                &body,
                self.operation_timeout,
            ))
            .await?;
        let command_id = xml::text_of(&response, "CommandId").ok_or_else(|| {
            ClientError::ProtocolUnavailable("no CommandId in Command response".into())
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_code = loop {
            let body = format!(
                "<rsp:Receive><rsp:DesiredStream CommandId=\"{command_id}\">stdout stderr</rsp:DesiredStream></rsp:Receive>"
            );
            let response = match self
                .send(xml::envelope(
                    &self.endpoint,
                    ACTION_RECEIVE,
                    Some(shell_id),
                    "",
                    &body,
                    self.operation_timeout,
                ))
                .await
            {
                Ok(r) => r,
                // No output yet; poll again.
                Err(ClientError::Other(msg)) if msg.contains(FAULT_OPERATION_TIMEOUT) => continue,
                Err(e) => return Err(e),
            };

            for (name, chunk) in xml::streams(&response) {
                let bytes = BASE64.decode(chunk.trim()).unwrap_or_default();
                match name.as_str() {
                    "stdout" => stdout.extend_from_slice(&bytes),
                    "stderr" => stderr.extend_from_slice(&bytes),
                    _ => {}
                }
            }
            if let Some(state) = xml::command_state(&response) {
                if state.ends_with(STATE_DONE) {
                    break xml::text_of(&response, "ExitCode")
                        .and_then(|c| c.trim().parse().ok())
                        .unwrap_or(0);
                }
            }
        };

        let signal = format!(
            "<rsp:Signal CommandId=\"{command_id}\"><rsp:Code>{SIGNAL_TERMINATE}</rsp:Code></rsp:Signal>"
        );
        if let Err(e) = self
            .send(xml::envelope(
                &self.endpoint,
                ACTION_SIGNAL,
                Some(shell_id),
                "",
                &signal,
                self.operation_timeout,
            ))
            .await
        {
            debug!(error = %e, "winrm terminate signal failed");
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: clean_clixml(&String::from_utf8_lossy(&stderr)),
            exit_code,
        })
    }
}

fn map_http_error(e: reqwest::Error) -> ClientError {
    let detail = format!("{e:#}");
    let mut source: Option<&dyn std::error::Error> = std::error::Error::source(&e);
    let mut chain = detail.clone();
    while let Some(s) = source {
        chain.push_str(": ");
        chain.push_str(&s.to_string());
        source = s.source();
    }
    let lower = chain.to_lowercase();

    if e.is_timeout() || lower.contains("timed out") {
        ClientError::Timeout(chain)
    } else if lower.contains("refused") {
        ClientError::Refused(chain)
    } else if lower.contains("dns") || lower.contains("failed to lookup") {
        ClientError::DnsFailed(chain)
    } else if e.is_connect() {
        ClientError::Unreachable(chain)
    } else {
        ClientError::Other(chain)
    }
}

/// `-EncodedCommand` takes base64 of the UTF-16LE script.
fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    BASE64.encode(utf16)
}

/// PowerShell reports errors on stderr as CLIXML; keep only the messages.
fn clean_clixml(stderr: &str) -> String {
    if !stderr.contains("#< CLIXML") {
        return stderr.to_string();
    }
    xml::elements(stderr, "S")
        .into_iter()
        .filter(|(attrs, _)| attrs.contains("S=\"Error\""))
        .map(|(_, text)| xml::unescape(&text).replace("_x000D__x000A_", "\n"))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

// ── Session ────────────────────────────────────────────────

struct WinRmSession {
    address: String,
    transport: Transport,
    shell_id: String,
    command_timeout: Duration,
}

#[async_trait]
impl RemoteSession for WinRmSession {
    fn protocol(&self) -> Protocol {
        Protocol::Winrm
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ClientError> {
        debug!(host = %self.address, protocol = "winrm", command, "exec");
        tokio::time::timeout(self.command_timeout, self.transport.run(&self.shell_id, command))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "command did not finish within {}s",
                    self.command_timeout.as_secs()
                ))
            })?
    }

    async fn close(&self) {
        if let Err(e) = self.transport.delete_shell(&self.shell_id).await {
            debug!(host = %self.address, error = %e, "winrm shell delete failed");
        }
    }
}

// ── XML ────────────────────────────────────────────────────

/// String-level SOAP handling. WS-Man responses are small and flat, so a
/// tag scanner covers everything the shell protocol needs.
mod xml {
    use std::time::Duration;

    use uuid::Uuid;

    pub fn escape(s: &str) -> String {
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&apos;")
    }

    pub fn unescape(s: &str) -> String {
        s.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    }

    pub fn envelope(
        endpoint: &str,
        action: &str,
        shell_id: Option<&str>,
        options: &str,
        body: &str,
        operation_timeout: Duration,
    ) -> String {
        let selector = shell_id
            .map(|id| {
                format!(
                    "<wsman:SelectorSet><wsman:Selector Name=\"ShellId\">{}</wsman:Selector></wsman:SelectorSet>",
                    escape(id)
                )
            })
            .unwrap_or_default();
        format!(
            "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" \
             xmlns:wsa=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" \
             xmlns:wsman=\"http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd\" \
             xmlns:rsp=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell\">\
             <s:Header>\
             <wsa:To>{to}</wsa:To>\
             <wsa:ReplyTo><wsa:Address s:mustUnderstand=\"true\">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</wsa:Address></wsa:ReplyTo>\
             <wsman:ResourceURI s:mustUnderstand=\"true\">{resource}</wsman:ResourceURI>\
             <wsa:Action s:mustUnderstand=\"true\">{action}</wsa:Action>\
             <wsman:MaxEnvelopeSize s:mustUnderstand=\"true\">153600</wsman:MaxEnvelopeSize>\
             <wsa:MessageID>uuid:{id}</wsa:MessageID>\
             <wsman:Locale xml:lang=\"en-US\" s:mustUnderstand=\"false\"/>\
             <wsman:OperationTimeout>PT{timeout}S</wsman:OperationTimeout>\
             {selector}{options}\
             </s:Header>\
             <s:Body>{body}</s:Body>\
             </s:Envelope>",
            to = escape(endpoint),
            resource = super::RESOURCE_CMD,
            id = Uuid::new_v4(),
            timeout = operation_timeout.as_secs().max(1),
        )
    }

    /// Every `<prefix:local ...>content</prefix:local>` (or self-closing
    /// `<prefix:local .../>`) as `(attributes, content)`.
    pub fn elements(doc: &str, local: &str) -> Vec<(String, String)> {
        let mut found = Vec::new();
        let mut rest = doc;
        while let Some(start) = rest.find('<') {
            rest = &rest[start + 1..];
            let Some(end) = rest.find('>') else { break };
            let tag = &rest[..end];
            if tag.starts_with('/') || tag.starts_with('?') || tag.starts_with('!') {
                rest = &rest[end + 1..];
                continue;
            }
            let name_end = tag
                .find(|c: char| c.is_whitespace() || c == '/')
                .unwrap_or(tag.len());
            let name = &tag[..name_end];
            let local_name = name.rsplit(':').next().unwrap_or(name);
            rest = &rest[end + 1..];
            if local_name != local {
                continue;
            }

            let attrs = tag[name_end..].trim_end_matches('/').trim().to_string();
            if tag.ends_with('/') {
                found.push((attrs, String::new()));
                continue;
            }
            let close = format!("</{name}>");
            match rest.find(&close) {
                Some(pos) => {
                    found.push((attrs, rest[..pos].to_string()));
                    rest = &rest[pos + close.len()..];
                }
                None => found.push((attrs, String::new())),
            }
        }
        found
    }

    pub fn attribute(attrs: &str, key: &str) -> Option<String> {
        let needle = format!("{key}=\"");
        let start = attrs.find(&needle)? + needle.len();
        let end = attrs[start..].find('"')?;
        Some(attrs[start..start + end].to_string())
    }

    pub fn text_of(doc: &str, local: &str) -> Option<String> {
        elements(doc, local)
            .into_iter()
            .map(|(_, text)| unescape(text.trim()))
            .find(|t| !t.is_empty())
    }

    pub fn shell_id(doc: &str) -> Option<String> {
        elements(doc, "Selector")
            .into_iter()
            .find(|(attrs, _)| attribute(attrs, "Name").as_deref() == Some("ShellId"))
            .map(|(_, text)| text.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| text_of(doc, "ShellId"))
    }

    /// `(stream name, base64 chunk)` pairs from a Receive response.
    pub fn streams(doc: &str) -> Vec<(String, String)> {
        elements(doc, "Stream")
            .into_iter()
            .filter_map(|(attrs, text)| Some((attribute(&attrs, "Name")?, text)))
            .collect()
    }

    pub fn command_state(doc: &str) -> Option<String> {
        elements(doc, "CommandState")
            .into_iter()
            .find_map(|(attrs, _)| attribute(&attrs, "State"))
    }

    pub fn fault_message(doc: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(code) = elements(doc, "WSManFault")
            .into_iter()
            .find_map(|(attrs, _)| attribute(&attrs, "Code"))
        {
            parts.push(code);
        }
        if let Some(text) = text_of(doc, "Message").or_else(|| text_of(doc, "Text")) {
            parts.push(strip_tags(&text));
        }
        (!parts.is_empty()).then(|| parts.join(": "))
    }

    fn strip_tags(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut in_tag = false;
        for c in s.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => out.push(c),
                _ => {}
            }
        }
        out.trim().to_string()
    }
}
