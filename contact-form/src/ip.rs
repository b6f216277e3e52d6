use thiserror::Error;
use tracing::debug;

pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpResolutionError {
    #[error("peer address {0:?} is not host:port")]
    NotHostPort(String),
}

/// Returns the address of the client which originated the request.
///
/// A non-empty forwarded-for value set by a reverse proxy wins over the peer address and is
/// returned verbatim. The peer address must still be well formed, even when it is not used.
pub fn resolve_client_ip(
    peer_addr: &str,
    forwarded_for: Option<&str>,
) -> Result<String, IpResolutionError> {
    let host = split_host(peer_addr)?;
    debug!("Peer host: {host}, forwarded for: {forwarded_for:?}");
    match forwarded_for {
        Some(forwarded) if !forwarded.is_empty() => Ok(forwarded.into()),
        _ => Ok(host.into()),
    }
}

fn split_host(peer_addr: &str) -> Result<&str, IpResolutionError> {
    let not_host_port = || IpResolutionError::NotHostPort(peer_addr.into());
    if let Some(bracketed) = peer_addr.strip_prefix('[') {
        let (host, port) = bracketed.split_once("]:").ok_or_else(not_host_port)?;
        if port.contains(is_address_delimiter) {
            return Err(not_host_port());
        }
        return Ok(host);
    }
    let (host, _) = peer_addr.rsplit_once(':').ok_or_else(not_host_port)?;
    // Unbracketed IPv6 literals are ambiguous.
    if host.contains(is_address_delimiter) {
        return Err(not_host_port());
    }
    Ok(host)
}

fn is_address_delimiter(c: char) -> bool {
    matches!(c, ':' | '[' | ']')
}
