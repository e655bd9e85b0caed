use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform family of a host. Starts as a guess and is narrowed once a
/// session reports what it actually is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Linux,
    Windows,
    Nas,
    FreeBsd,
    Unknown,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Linux => "linux",
            PlatformType::Windows => "windows",
            PlatformType::Nas => "nas",
            PlatformType::FreeBsd => "freebsd",
            PlatformType::Unknown => "unknown",
        }
    }
}

impl FromStr for PlatformType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linux" => Ok(PlatformType::Linux),
            "windows" => Ok(PlatformType::Windows),
            "nas" => Ok(PlatformType::Nas),
            "freebsd" => Ok(PlatformType::FreeBsd),
            "unknown" | "" => Ok(PlatformType::Unknown),
            other => bail!(
                "unknown platform '{}' (expected linux, windows, nas, freebsd or unknown)",
                other
            ),
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote-execution protocol a session was established with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// WS-Management (WinRM) with Windows credentials.
    Winrm,
    /// SSH with password auth (NAS appliances).
    NasSsh,
    /// SSH with key auth (Linux servers).
    LinuxSsh,
}

impl Protocol {
    /// Platform assumed for a host that accepted this protocol, before refinement.
    pub fn default_platform(&self) -> PlatformType {
        match self {
            Protocol::Winrm => PlatformType::Windows,
            Protocol::NasSsh => PlatformType::Nas,
            Protocol::LinuxSsh => PlatformType::Linux,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Winrm => write!(f, "winrm"),
            Protocol::NasSsh => write!(f, "nas_ssh"),
            Protocol::LinuxSsh => write!(f, "linux_ssh"),
        }
    }
}

/// Fixed taxonomy every connection failure is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Unreachable,
    Timeout,
    Refused,
    AuthFailed,
    DnsFailed,
    ProtocolUnavailable,
    Other,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 7] = [
        FailureCategory::Unreachable,
        FailureCategory::Timeout,
        FailureCategory::Refused,
        FailureCategory::AuthFailed,
        FailureCategory::DnsFailed,
        FailureCategory::ProtocolUnavailable,
        FailureCategory::Other,
    ];

    /// Rank used to pick the most informative reason across cascade attempts.
    /// Higher means the transport got further before failing.
    pub fn specificity(&self) -> u8 {
        match self {
            FailureCategory::AuthFailed => 6,
            FailureCategory::ProtocolUnavailable => 5,
            FailureCategory::Timeout => 4,
            FailureCategory::Refused => 3,
            FailureCategory::DnsFailed => 2,
            FailureCategory::Unreachable => 1,
            FailureCategory::Other => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Unreachable => "unreachable",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Refused => "refused",
            FailureCategory::AuthFailed => "auth_failed",
            FailureCategory::DnsFailed => "dns_failed",
            FailureCategory::ProtocolUnavailable => "protocol_unavailable",
            FailureCategory::Other => "other",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureCategory::Unreachable => "No management port reachable",
            FailureCategory::Timeout => "Connection timed out",
            FailureCategory::Refused => "Connection refused",
            FailureCategory::AuthFailed => "Authentication failed",
            FailureCategory::DnsFailed => "DNS resolution failed",
            FailureCategory::ProtocolUnavailable => "Management service disabled or misconfigured",
            FailureCategory::Other => "Unclassified error",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("Linux".parse::<PlatformType>().unwrap(), PlatformType::Linux);
        assert_eq!(" freebsd ".parse::<PlatformType>().unwrap(), PlatformType::FreeBsd);
        assert!("beos".parse::<PlatformType>().is_err());
    }

    #[test]
    fn auth_failure_outranks_transport_failures() {
        let mut categories = FailureCategory::ALL.to_vec();
        categories.sort_by_key(|c| std::cmp::Reverse(c.specificity()));
        assert_eq!(categories[0], FailureCategory::AuthFailed);
        assert_eq!(*categories.last().unwrap(), FailureCategory::Other);
    }

    #[test]
    fn categories_serialize_snake_case() {
        let json = serde_json::to_string(&FailureCategory::ProtocolUnavailable).unwrap();
        assert_eq!(json, "\"protocol_unavailable\"");
        let json = serde_json::to_string(&PlatformType::FreeBsd).unwrap();
        assert_eq!(json, "\"freebsd\"");
    }
}
