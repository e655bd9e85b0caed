//! Failure records and the categorized end-of-run summary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::FailureCategory;

/// One host the cascade could not connect to, with whatever the local network
/// could still tell us about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub address: String,
    pub category: FailureCategory,
    /// Raw diagnostic from the attempt that produced `category`.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_vendor: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(address: &str, category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            address: address.to_string(),
            category,
            message: message.into(),
            reverse_dns: None,
            mac_address: None,
            mac_vendor: None,
            timestamp: Utc::now(),
        }
    }
}

/// Counts and host lists per failure category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub total_hosts: usize,
    pub successful: usize,
    pub failed: usize,
    pub by_category: BTreeMap<FailureCategory, Vec<FailureRecord>>,
}

impl FailureSummary {
    pub fn build(total_hosts: usize, failures: &[FailureRecord]) -> Self {
        let mut by_category: BTreeMap<FailureCategory, Vec<FailureRecord>> = BTreeMap::new();
        for failure in failures {
            by_category
                .entry(failure.category)
                .or_default()
                .push(failure.clone());
        }
        for records in by_category.values_mut() {
            records.sort_by(|a, b| a.address.cmp(&b.address));
        }

        Self {
            total_hosts,
            successful: total_hosts.saturating_sub(failures.len()),
            failed: failures.len(),
            by_category,
        }
    }

    pub fn count(&self, category: FailureCategory) -> usize {
        self.by_category.get(&category).map_or(0, Vec::len)
    }

    /// Addresses that failed with `category`, sorted.
    pub fn hosts(&self, category: FailureCategory) -> Vec<&str> {
        self.by_category
            .get(&category)
            .map(|records| records.iter().map(|r| r.address.as_str()).collect())
            .unwrap_or_default()
    }

    /// Categories ordered with the most specific first.
    pub fn categories(&self) -> Vec<FailureCategory> {
        let mut categories: Vec<FailureCategory> = self.by_category.keys().copied().collect();
        categories.sort_by_key(|c| std::cmp::Reverse(c.specificity()));
        categories
    }
}

impl fmt::Display for FailureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} hosts: {} succeeded, {} failed",
            self.total_hosts, self.successful, self.failed
        )?;

        for category in self.categories() {
            let records = &self.by_category[&category];
            writeln!(
                f,
                "  {} ({}): {}",
                category,
                records.len(),
                category.description()
            )?;
            for record in records {
                write!(f, "    {}", record.address)?;
                if let Some(name) = &record.reverse_dns {
                    write!(f, " ({})", name)?;
                }
                if let Some(mac) = &record.mac_address {
                    write!(f, " [{}", mac)?;
                    if let Some(vendor) = &record.mac_vendor {
                        write!(f, " {}", vendor)?;
                    }
                    write!(f, "]")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_groups_by_category() {
        let failures = vec![
            FailureRecord::new("10.0.0.7", FailureCategory::AuthFailed, "Permission denied"),
            FailureRecord::new("10.0.0.6", FailureCategory::Unreachable, "no port open"),
            FailureRecord::new("10.0.0.9", FailureCategory::Unreachable, "no port open"),
        ];
        let summary = FailureSummary::build(4, &failures);

        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.count(FailureCategory::Unreachable), 2);
        assert_eq!(summary.hosts(FailureCategory::Unreachable), vec!["10.0.0.6", "10.0.0.9"]);
        assert_eq!(summary.count(FailureCategory::Timeout), 0);
        assert_eq!(summary.categories()[0], FailureCategory::AuthFailed);
    }

    #[test]
    fn display_lists_hosts_with_enrichment() {
        let mut failure = FailureRecord::new("10.0.0.6", FailureCategory::Unreachable, "no port open");
        failure.reverse_dns = Some("printer.lan".into());
        failure.mac_address = Some("00:11:32:aa:bb:cc".into());
        failure.mac_vendor = Some("Synology Incorporated".into());
        let summary = FailureSummary::build(2, &[failure]);

        let text = summary.to_string();
        assert!(text.starts_with("2 hosts: 1 succeeded, 1 failed"));
        assert!(text.contains("unreachable (1)"));
        assert!(text.contains("10.0.0.6 (printer.lan) [00:11:32:aa:bb:cc Synology Incorporated]"));
    }
}
