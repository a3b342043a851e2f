//! Access predicates evaluated by the request gate.

use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Exact membership of `required` in `granted`.
pub fn has_scope(granted: &[String], required: &str) -> bool {
    granted.iter().any(|s| s == required)
}

/// True if `granted` holds at least one of `required`.
pub fn has_any_scope(granted: &[String], required: &[&str]) -> bool {
    required.iter().any(|r| has_scope(granted, r))
}

/// Empty allowlist permits every address; otherwise an entry must match
/// exactly or contain `ip` as a CIDR block.
pub fn is_ip_allowed(allowlist: &[String], ip: IpAddr) -> bool {
    if allowlist.is_empty() {
        return true;
    }

    let ip = ip.to_canonical();
    allowlist.iter().any(|entry| {
        let entry = entry.trim();
        if let Ok(exact) = entry.parse::<IpAddr>() {
            return exact.to_canonical() == ip;
        }
        entry
            .parse::<IpNetwork>()
            .map(|network| network.contains(ip))
            .unwrap_or(false)
    })
}
