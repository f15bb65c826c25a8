//! Monitoring report parsing

use std::collections::BTreeMap;

use crate::error::CoreError;

/// Upper-cased key to raw value
pub type PollReport = BTreeMap<String, String>;

const GUEST_IPS: &str = "GUEST_IP_ADDRESSES";
const PUBLIC_IP: &str = "AWS_PUBLIC_IP_ADDRESS";

/// Parse whitespace separated `KEY=value` tokens
///
/// # Errors
/// Returns the offending token when it has no `=`.
pub fn parse_poll_report(output: &str) -> Result<PollReport, String> {
    output
        .split_whitespace()
        .map(|token| {
            token
                .split_once('=')
                .map(|(k, v)| (k.to_uppercase(), v.to_string()))
                .ok_or_else(|| format!("malformed monitoring token '{token}'"))
        })
        .collect()
}

/// Externally reachable name of a freshly provisioned host
///
/// # Errors
/// `CoreError::ProvisionNameUnavailable` if neither address field yields a value.
pub fn provision_name(report: &PollReport) -> Result<String, CoreError> {
    let guest = report.get(GUEST_IPS).and_then(|ips| {
        ips.split(',')
            .map(trim_markers)
            .find(|ip| !ip.is_empty())
    });

    let public = || {
        report
            .get(PUBLIC_IP)
            .map(|ip| trim_markers(ip))
            .filter(|ip| !ip.is_empty())
    };

    guest
        .or_else(public)
        .map(str::to_string)
        .ok_or(CoreError::ProvisionNameUnavailable)
}

fn trim_markers(value: &str) -> &str {
    value.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '(' | ')' | '[' | ']' | '\\' | ',')
    })
}
