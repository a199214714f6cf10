//! Utility functions for metakv

/// Format an `(ip, port)` pair as the canonical `"ip:port"` endpoint string.
pub fn format_endpoint(ip: &str, port: i32) -> String {
    format!("{}:{}", ip, port)
}

/// Parse a canonical `"ip:port"` endpoint string.
///
/// The port is the last colon-separated component, so bare IPv6 addresses
/// with no port are rejected rather than misparsed.
pub fn parse_endpoint(endpoint: &str) -> crate::Result<(String, i32)> {
    let (ip, port_str) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| crate::Error::Corruption(format!("bad endpoint: {}", endpoint)))?;
    if ip.is_empty() {
        return Err(crate::Error::Corruption(format!("bad endpoint: {}", endpoint)));
    }
    let port: i32 = port_str
        .parse()
        .map_err(|_| crate::Error::Corruption(format!("bad endpoint port: {}", endpoint)))?;
    Ok((ip.to_string(), port))
}
