use std::net::SocketAddr;

use crate::config::AccessConfig;

/// Display name for clients without an entry in `user_names`.
pub const GUEST: &str = "Guest";

/// Resolve the client's address
///
/// With `trust_proxy_headers` set, the first `X-Forwarded-For` entry is the
/// real client, then `X-Real-IP`. Otherwise only the socket peer counts.
/// `"unknown"` when no address is known.
pub fn client_ip(
    access: &AccessConfig,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<SocketAddr>,
) -> String {
    let (forwarded_for, real_ip) = if access.trust_proxy_headers {
        (forwarded_for, real_ip)
    } else {
        (None, None)
    };

    if let Some(first) = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    if let Some(ip) = real_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// An empty whitelist admits everyone.
pub fn is_allowed(access: &AccessConfig, ip: &str) -> bool {
    access.allowed_ips.is_empty() || access.allowed_ips.iter().any(|allowed| allowed == ip)
}

pub fn display_name<'a>(access: &'a AccessConfig, ip: &str) -> &'a str {
    access
        .user_names
        .get(ip)
        .map(String::as_str)
        .unwrap_or(GUEST)
}
