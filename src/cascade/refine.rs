//! Post-connection platform refinement. The protocol that connected only
//! gives a coarse guess; the kernel and appliance markers decide.

use anyhow::Result;

use crate::clients::RemoteSession;
use crate::collectors::{nas, run};
use crate::domain::types::{PlatformType, Protocol};
use crate::host_log::HostLog;

/// Refined platform for a connected session. Probe errors keep the coarse
/// guess so collection can still proceed.
pub async fn refine(session: &dyn RemoteSession, coarse: PlatformType, log: &mut HostLog) -> PlatformType {
    if session.protocol() == Protocol::Winrm {
        return PlatformType::Windows;
    }
    match probe(session).await {
        Ok(Some(platform)) => {
            if platform != coarse {
                log.debug(format!("platform refined {coarse} -> {platform}"));
            }
            platform
        }
        Ok(None) => coarse,
        Err(e) => {
            log.warn(format!("platform refinement failed, keeping {coarse}: {e:#}"));
            coarse
        }
    }
}

async fn probe(session: &dyn RemoteSession) -> Result<Option<PlatformType>> {
    let Some(kernel) = run(session, "uname -s").await? else {
        return Ok(None);
    };
    let platform = match kernel.as_str() {
        "FreeBSD" => PlatformType::FreeBsd,
        "Linux" => match nas::detect(session).await? {
            Some(_) => PlatformType::Nas,
            None => PlatformType::Linux,
        },
        _ => PlatformType::Unknown,
    };
    Ok(Some(platform))
}
