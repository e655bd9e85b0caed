//! Fact collectors. Each one probes a connected session for one block of
//! the host record; a tool that is not installed leaves its block absent.

pub mod containers;
pub mod hypervisor;
pub mod nas;
pub mod orchestration;
pub mod services;
pub mod system;
pub mod windows;

use anyhow::{Context, Result};

use crate::clients::RemoteSession;
use crate::domain::host_record::HostRecord;
use crate::domain::types::PlatformType;
use crate::enrichment::ServiceStore;
use crate::host_log::HostLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collector {
    System,
    Services,
    Containers,
    Orchestration,
    Hypervisor,
    Nas,
    Windows,
}

impl Collector {
    pub fn name(self) -> &'static str {
        match self {
            Collector::System => "system",
            Collector::Services => "services",
            Collector::Containers => "containers",
            Collector::Orchestration => "orchestration",
            Collector::Hypervisor => "hypervisor",
            Collector::Nas => "nas",
            Collector::Windows => "windows",
        }
    }
}

/// Collectors to run for a refined platform, in order.
pub fn collectors_for(platform: PlatformType) -> &'static [Collector] {
    use Collector::*;
    match platform {
        PlatformType::Linux => &[System, Services, Containers, Orchestration, Hypervisor],
        PlatformType::Nas => &[System, Services, Containers, Nas],
        PlatformType::FreeBsd => &[System, Services, Nas],
        PlatformType::Windows => &[Windows],
        PlatformType::Unknown => &[System],
    }
}

/// What every collector gets to work with.
pub struct CollectContext<'a> {
    pub session: &'a dyn RemoteSession,
    pub platform: PlatformType,
    pub services: &'a ServiceStore,
}

/// Run the platform's collectors one after another on the session. A
/// failing collector is logged and its block left absent; the rest still run.
pub async fn collect_all(ctx: &CollectContext<'_>, record: &mut HostRecord, log: &mut HostLog) {
    for &collector in collectors_for(ctx.platform) {
        match run_collector(collector, ctx, record).await {
            Ok(true) => log.debug(format!("{}: collected", collector.name())),
            Ok(false) => log.debug(format!("{}: not available", collector.name())),
            Err(e) => log.warn(format!("{} collector failed: {e:#}", collector.name())),
        }
    }
}

async fn run_collector(
    collector: Collector,
    ctx: &CollectContext<'_>,
    record: &mut HostRecord,
) -> Result<bool> {
    match collector {
        Collector::System => {
            let Some(facts) = system::collect(ctx).await? else {
                return Ok(false);
            };
            if facts.hostname.is_some() {
                record.hostname = facts.hostname;
            }
            record.system = Some(facts.system);
            record.resources = Some(facts.resources);
            record.network = Some(facts.network);
            Ok(true)
        }
        Collector::Services => Ok(fill(&mut record.services, services::collect(ctx).await?)),
        Collector::Containers => Ok(fill(&mut record.containers, containers::collect(ctx).await?)),
        Collector::Orchestration => Ok(fill(
            &mut record.orchestration,
            orchestration::collect(ctx).await?,
        )),
        Collector::Hypervisor => Ok(fill(&mut record.hypervisor, hypervisor::collect(ctx).await?)),
        Collector::Nas => Ok(fill(&mut record.nas, nas::collect(ctx).await?)),
        Collector::Windows => Ok(fill(&mut record.windows, windows::collect(ctx).await?)),
    }
}

fn fill<T>(slot: &mut Option<T>, block: Option<T>) -> bool {
    let found = block.is_some();
    *slot = block;
    found
}

// ── Command helpers ────────────────────────────────────────

/// Stdout of a command that exited 0, possibly empty. Transport errors
/// propagate; a failing command is `None`.
pub(crate) async fn output(session: &dyn RemoteSession, command: &str) -> Result<Option<String>> {
    let output = session
        .exec(command)
        .await
        .with_context(|| format!("running `{command}`"))?;
    Ok(output.success().then_some(output.stdout))
}

/// Trimmed stdout of a successful command; `None` when it failed or printed nothing.
pub(crate) async fn run(session: &dyn RemoteSession, command: &str) -> Result<Option<String>> {
    Ok(output(session, command)
        .await?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Non-blank lines of command output.
pub(crate) fn lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim_end).filter(|l| !l.trim().is_empty())
}

/// `bytes` as a short binary-unit string, e.g. "15.6G".
pub(crate) fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
