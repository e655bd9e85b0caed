use anyhow::Result;

use super::{lines, output, run, CollectContext};
use crate::domain::host_record::ContainerInfo;

const DOCKER_PS: &str = r#"docker ps --format "{{.Names}}\t{{.Image}}\t{{.Status}}""#;

/// Running docker containers. Absent when docker is not installed or the
/// daemon does not answer; an idle daemon gives an empty list.
pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<Vec<ContainerInfo>>> {
    if run(ctx.session, "command -v docker").await?.is_none() {
        return Ok(None);
    }
    Ok(output(ctx.session, DOCKER_PS)
        .await?
        .map(|out| parse_docker_ps(&out)))
}

fn parse_docker_ps(output: &str) -> Vec<ContainerInfo> {
    lines(output)
        .filter_map(|line| {
            let mut cols = line.split('\t');
            Some(ContainerInfo {
                name: cols.next()?.trim().to_string(),
                image: cols.next()?.trim().to_string(),
                status: cols.next().unwrap_or("unknown").trim().to_string(),
            })
        })
        .collect()
}
