//! Common validation utilities.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use validator::{ValidateUrl, ValidationError};

/// Maximum accepted length of a webhook target URL.
pub const MAX_URL_LENGTH: usize = 2048;

/// Validates that a URL is absolute and uses the `https` scheme.
pub fn validate_https_url(url: &str) -> Result<(), ValidationError> {
    if url.len() > MAX_URL_LENGTH {
        let mut err = ValidationError::new("url_length");
        err.message = Some("URL must be at most 2048 characters".into());
        return Err(err);
    }

    if !url.validate_url() {
        let mut err = ValidationError::new("url_invalid");
        err.message = Some("URL must be a valid absolute URL".into());
        return Err(err);
    }

    let is_https = url
        .get(..8)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"));
    if !is_https {
        let mut err = ValidationError::new("url_scheme");
        err.message = Some("URL must use HTTPS".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a single IP allowlist entry: an exact address or a CIDR block.
pub fn validate_network_entry(entry: &str) -> Result<(), ValidationError> {
    let entry = entry.trim();
    if entry.parse::<IpAddr>().is_ok() || entry.parse::<IpNetwork>().is_ok() {
        Ok(())
    } else {
        let mut err = ValidationError::new("ip_allowlist_entry");
        err.message = Some(format!("'{}' is not an IP address or CIDR block", entry).into());
        Err(err)
    }
}

/// Validates every IP allowlist entry.
pub fn validate_ip_allowlist(entries: &[String]) -> Result<(), ValidationError> {
    entries
        .iter()
        .try_for_each(|entry| validate_network_entry(entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_https_url() {
        assert!(validate_https_url("https://hooks.example.com/ehs").is_ok());
        assert!(validate_https_url("HTTPS://hooks.example.com").is_ok());
        assert!(validate_https_url("https://hooks.example.com:8443/a?b=c").is_ok());
    }

    #[test]
    fn test_validate_https_url_rejects_http() {
        let err = validate_https_url("http://hooks.example.com").unwrap_err();
        assert_eq!(err.code, "url_scheme");
    }

    #[test]
    fn test_validate_https_url_rejects_garbage() {
        assert_eq!(validate_https_url("not a url").unwrap_err().code, "url_invalid");
        assert_eq!(validate_https_url("https://").unwrap_err().code, "url_invalid");
        assert_eq!(validate_https_url("").unwrap_err().code, "url_invalid");
    }

    #[test]
    fn test_validate_https_url_rejects_long() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(validate_https_url(&url).unwrap_err().code, "url_length");
    }

    #[test]
    fn test_validate_network_entry() {
        assert!(validate_network_entry("203.0.113.7").is_ok());
        assert!(validate_network_entry("10.0.0.0/8").is_ok());
        assert!(validate_network_entry("2001:db8::/32").is_ok());
        assert!(validate_network_entry("::1").is_ok());
        assert!(validate_network_entry(" 192.168.1.1 ").is_ok());
    }

    #[test]
    fn test_validate_network_entry_rejects() {
        assert!(validate_network_entry("").is_err());
        assert!(validate_network_entry("localhost").is_err());
        assert!(validate_network_entry("10.0.0.0/33").is_err());
        assert!(validate_network_entry("300.1.1.1").is_err());
    }

    #[test]
    fn test_validate_ip_allowlist() {
        assert!(validate_ip_allowlist(&[]).is_ok());
        assert!(validate_ip_allowlist(&["10.0.0.0/8".into(), "1.2.3.4".into()]).is_ok());
        assert!(validate_ip_allowlist(&["10.0.0.0/8".into(), "nope".into()]).is_err());
    }
}
