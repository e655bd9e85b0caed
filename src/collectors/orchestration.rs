//! Kubernetes cluster state as seen by the host's kubectl.

use anyhow::Result;

use super::{lines, output, run, CollectContext};
use crate::domain::host_record::{
    ClusterHealth, ClusterInfo, K8sDeployment, K8sNode, K8sPod, K8sService,
};

const RESTART_THRESHOLD: u32 = 5;

pub async fn collect(ctx: &CollectContext<'_>) -> Result<Option<ClusterInfo>> {
    let session = ctx.session;
    let Some(version) = run(session, "kubectl version --client 2>/dev/null").await? else {
        return Ok(None);
    };
    // A client without a reachable cluster has nothing to report.
    let Some(nodes) = output(session, "kubectl get nodes --no-headers -o wide 2>/dev/null").await?
    else {
        return Ok(None);
    };

    let cluster_info = run(session, "kubectl cluster-info 2>/dev/null | head -3").await?;
    let namespaces = output(session, "kubectl get namespaces --no-headers 2>/dev/null")
        .await?
        .unwrap_or_default();
    let pods = output(session, "kubectl get pods --all-namespaces --no-headers -o wide 2>/dev/null")
        .await?
        .unwrap_or_default();
    let services = output(session, "kubectl get services --all-namespaces --no-headers 2>/dev/null")
        .await?
        .unwrap_or_default();
    let deployments =
        output(session, "kubectl get deployments --all-namespaces --no-headers 2>/dev/null")
            .await?
            .unwrap_or_default();

    let nodes = parse_nodes(&nodes);
    let pods = parse_pods(&pods);
    let problematic_pods: Vec<K8sPod> = pods.iter().filter(|p| is_problematic(p)).cloned().collect();
    let health = ClusterHealth {
        total_nodes: nodes.len() as u32,
        ready_nodes: nodes.iter().filter(|n| n.status == "Ready").count() as u32,
        total_pods: pods.len() as u32,
        running_pods: pods.iter().filter(|p| p.status == "Running").count() as u32,
        problematic_pods: problematic_pods.len() as u32,
    };

    Ok(Some(ClusterInfo {
        kubectl_version: version.lines().next().unwrap_or_default().trim().to_string(),
        cluster_info: cluster_info.map(|c| strip_ansi(&c)),
        nodes,
        namespaces: lines(&namespaces)
            .filter_map(|l| l.split_whitespace().next())
            .map(str::to_string)
            .collect(),
        pods,
        problematic_pods,
        services: parse_services(&services),
        deployments: parse_deployments(&deployments),
        health,
    }))
}

/// `NAME STATUS ROLES AGE VERSION INTERNAL-IP EXTERNAL-IP OS-IMAGE KERNEL RUNTIME`;
/// the OS image may contain spaces.
fn parse_nodes(output: &str) -> Vec<K8sNode> {
    lines(output)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            let os_image = (cols.len() >= 10).then(|| cols[7..cols.len() - 2].join(" "));
            Some(K8sNode {
                name: cols[0].to_string(),
                status: cols[1].to_string(),
                roles: cols[2].to_string(),
                age: cols[3].to_string(),
                version: cols[4].to_string(),
                internal_ip: cols.get(5).map(|s| s.to_string()),
                os_image,
            })
        })
        .collect()
}

/// `NAMESPACE NAME READY STATUS RESTARTS AGE IP NODE ...`, where RESTARTS may
/// carry a trailing `(5m ago)`.
fn parse_pods(output: &str) -> Vec<K8sPod> {
    lines(output)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let namespace = cols.next()?.to_string();
            let name = cols.next()?.to_string();
            let ready = cols.next()?.to_string();
            let status = cols.next()?.to_string();
            let restarts = cols.next()?.parse().unwrap_or(0);
            let mut age = cols.next()?;
            if age.starts_with('(') {
                while !age.ends_with(')') {
                    age = cols.next()?;
                }
                age = cols.next()?;
            }
            let _ip = cols.next();
            let node = cols.next().filter(|n| *n != "<none>").map(str::to_string);
            Some(K8sPod {
                namespace,
                name,
                ready,
                status,
                restarts,
                age: age.to_string(),
                node,
            })
        })
        .collect()
}

fn is_problematic(pod: &K8sPod) -> bool {
    let settled = matches!(pod.status.as_str(), "Running" | "Completed" | "Succeeded");
    let not_ready = pod.status == "Running"
        && pod
            .ready
            .split_once('/')
            .is_some_and(|(ready, total)| ready != total);
    !settled || not_ready || pod.restarts > RESTART_THRESHOLD
}

/// `NAMESPACE NAME TYPE CLUSTER-IP EXTERNAL-IP PORT(S) AGE`
fn parse_services(output: &str) -> Vec<K8sService> {
    lines(output)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 6 {
                return None;
            }
            Some(K8sService {
                namespace: cols[0].to_string(),
                name: cols[1].to_string(),
                service_type: cols[2].to_string(),
                cluster_ip: cols[3].to_string(),
                external_ip: (cols[4] != "<none>").then(|| cols[4].to_string()),
                ports: cols[5].to_string(),
            })
        })
        .collect()
}

/// `NAMESPACE NAME READY UP-TO-DATE AVAILABLE AGE`
fn parse_deployments(output: &str) -> Vec<K8sDeployment> {
    lines(output)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 6 {
                return None;
            }
            Some(K8sDeployment {
                namespace: cols[0].to_string(),
                name: cols[1].to_string(),
                ready: cols[2].to_string(),
                up_to_date: cols[3].to_string(),
                available: cols[4].to_string(),
                age: cols[5].to_string(),
            })
        })
        .collect()
}

/// kubectl colours cluster-info even when piped.
fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
