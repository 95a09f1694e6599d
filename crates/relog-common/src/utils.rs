//! Address helpers for Relog
//!
//! Members advertise plain `host:port` strings; tonic needs a URI with a scheme.

use crate::error::RelogError;

/// Split a `host:port` address into its parts.
///
/// The split happens at the last colon so bracketed IPv6 hosts keep their
/// inner colons.
///
/// # Examples
///
/// ```
/// use relog_common::split_host_port;
///
/// let (host, port) = split_host_port("127.0.0.1:8400").unwrap();
/// assert_eq!(host, "127.0.0.1");
/// assert_eq!(port, 8400);
/// ```
pub fn split_host_port(address: &str) -> Result<(String, u16), RelogError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| RelogError::InvalidAddress(address.to_string()))?;
    if host.is_empty() {
        return Err(RelogError::InvalidAddress(address.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| RelogError::InvalidPort(address.to_string()))?;
    Ok((host.to_string(), port))
}

/// Build the RPC address of a node from the host of its bind address and
/// the RPC port.
pub fn rpc_addr(bind_addr: &str, rpc_port: u16) -> Result<String, RelogError> {
    let (host, _) = split_host_port(bind_addr)?;
    Ok(format!("{}:{}", host, rpc_port))
}

/// Turn a `host:port` address into a gRPC endpoint URI.
pub fn grpc_endpoint(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
