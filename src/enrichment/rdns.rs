use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

/// PTR name for `ip`, bounded by `timeout`. The resolver call runs on the
/// blocking pool; a lookup that outlives the timeout is abandoned there.
pub async fn reverse_dns(ip: IpAddr, timeout: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Ok(name))) => {
            let name = name.trim_end_matches('.').to_string();
            // getnameinfo echoes the numeric address when there is no PTR record.
            (name != ip.to_string() && !name.is_empty()).then_some(name)
        }
        Ok(Ok(Err(e))) => {
            debug!(%ip, error = %e, "reverse lookup failed");
            None
        }
        Ok(Err(e)) => {
            debug!(%ip, error = %e, "reverse lookup task failed");
            None
        }
        Err(_) => {
            debug!(%ip, "reverse lookup timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_lookup_is_bounded() {
        let started = std::time::Instant::now();
        let _ = reverse_dns("127.0.0.1".parse().unwrap(), Duration::from_millis(500)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
