//! Running services, each one looked up in (and if new, added to) the
//! service store.

use anyhow::Result;

use super::{lines, output, CollectContext};
use crate::domain::host_record::ServiceEntry;
use crate::domain::types::PlatformType;
use crate::enrichment::ServiceStore;

const MAX_SERVICES: usize = 50;

const SYSTEMCTL_RUNNING: &str =
    "systemctl list-units --type=service --state=running --no-pager --no-legend --plain";

pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<Vec<ServiceEntry>>> {
    let units = match ctx.platform {
        PlatformType::FreeBsd => output(ctx.session, "service -e")
            .await?
            .map(|out| parse_rc_enabled(&out)),
        _ => output(ctx.session, SYSTEMCTL_RUNNING)
            .await?
            .map(|out| parse_systemctl_units(&out)),
    };
    let Some(units) = units else {
        return Ok(None);
    };
    Ok(Some(enrich(units, ctx.services).await))
}

/// (name, status) pairs; the `.service` suffix is dropped.
fn parse_systemctl_units(output: &str) -> Vec<(String, String)> {
    lines(output)
        .filter_map(|line| {
            let mut cols = line
                .split_whitespace()
                .skip_while(|c| *c == "●" || *c == "*");
            let unit = cols.next()?;
            let _load = cols.next()?;
            let _active = cols.next()?;
            let sub = cols.next().unwrap_or("running");
            Some((unit.trim_end_matches(".service").to_string(), sub.to_string()))
        })
        .take(MAX_SERVICES)
        .collect()
}

/// `service -e` prints the rc script path of every enabled service.
fn parse_rc_enabled(output: &str) -> Vec<(String, String)> {
    lines(output)
        .filter_map(|line| line.trim().rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(|name| (name.to_string(), "enabled".to_string()))
        .take(MAX_SERVICES)
        .collect()
}

async fn enrich(units: Vec<(String, String)>, store: &ServiceStore) -> Vec<ServiceEntry> {
    let mut entries = Vec::with_capacity(units.len());
    for (name, status) in units {
        let descriptor = store.get_or_create(&name).await;
        entries.push(ServiceEntry {
            name,
            status,
            display_name: descriptor.display_name,
            category: descriptor.category,
            description: descriptor.description,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::clients::scripted::ScriptedSession;
    use crate::domain::types::Protocol;

    #[test]
    fn systemctl_lines() {
        let units = parse_systemctl_units(
            "ssh.service      loaded active running OpenBSD Secure Shell server\n\
             ● docker.service loaded active running Docker Application Container Engine\n",
        );
        assert_eq!(
            units,
            vec![
                ("ssh".to_string(), "running".to_string()),
                ("docker".to_string(), "running".to_string())
            ]
        );
    }

    #[test]
    fn rc_scripts() {
        let units = parse_rc_enabled("/etc/rc.d/sshd\n/usr/local/etc/rc.d/smbd\n");
        assert_eq!(units[0].0, "sshd");
        assert_eq!(units[1], ("smbd".to_string(), "enabled".to_string()));
    }

    #[tokio::test]
    async fn services_are_capped_and_learned() {
        let listing: String = (0..60)
            .map(|i| format!("svc{i}.service loaded active running Service {i}\n"))
            .collect();
        let session =
            ScriptedSession::new("10.0.0.5", Protocol::LinuxSsh).ok("systemctl list-units", &listing);
        let store = ServiceStore::with_entries(Path::new("unused.json"), Default::default());
        let ctx = CollectContext {
            session: &session,
            platform: PlatformType::Linux,
            services: &store,
        };

        let services = collect(&ctx).await.unwrap().unwrap();
        assert_eq!(services.len(), MAX_SERVICES);
        assert_eq!(services[0].display_name, "Svc0");
        assert!(services[0].description.starts_with("Unknown service - discovered on"));
        assert_eq!(store.len().await, MAX_SERVICES);
    }

    #[tokio::test]
    async fn missing_systemctl_is_absent() {
        let session = ScriptedSession::new("10.0.0.5", Protocol::LinuxSsh);
        let store = ServiceStore::with_entries(Path::new("unused.json"), Default::default());
        let ctx = CollectContext {
            session: &session,
            platform: PlatformType::Nas,
            services: &store,
        };
        assert!(collect(&ctx).await.unwrap().is_none());
    }
}
