//! Outbound datagram validation and transmission.
//!
//! Used by [`super::DatagramRelay::send`] and by the one-shot `send` command,
//! so both reject the same inputs before anything touches the network.

use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;

use regex::Regex;
use tokio::net::UdpSocket;

use crate::error::RelayError;

/// RFC 1123 host name: dot-separated labels of letters, digits and inner
/// hyphens, at most 63 characters each, optional trailing dot.
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*\.?$")
        .expect("hostname pattern compiles")
});

const MAX_HOSTNAME_LEN: usize = 253;

/// A validated `(host, port)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

/// Check send parameters without touching the network.
pub fn validate(message: &str, host: &str, port: i64) -> Result<Target, RelayError> {
    if message.is_empty() {
        return Err(RelayError::EmptyMessage);
    }

    let host = host.trim();
    let valid_host = host.parse::<IpAddr>().is_ok()
        || (host.len() <= MAX_HOSTNAME_LEN && HOSTNAME.is_match(host));
    if !valid_host {
        return Err(RelayError::InvalidHost(host.to_string()));
    }

    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(RelayError::InvalidPort(port))?;

    Ok(Target {
        host: host.to_string(),
        port,
    })
}

/// Resolve a target, preferring an address of the sending socket's family.
pub async fn resolve(target: &Target, prefer_ipv4: bool) -> Result<SocketAddr, RelayError> {
    if let Ok(ip) = target.host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, target.port));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| RelayError::Resolve {
            host: target.host.clone(),
            message: e.to_string(),
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4() == prefer_ipv4)
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| RelayError::Resolve {
            host: target.host.clone(),
            message: "no addresses found".to_string(),
        })
}

/// Validate, resolve and send `message` as one datagram from `socket`.
///
/// Returns the address the datagram was handed to. Only local failures are
/// reported; delivery is not confirmed.
pub async fn transmit(
    socket: &UdpSocket,
    message: &str,
    host: &str,
    port: i64,
) -> Result<SocketAddr, RelayError> {
    let target = validate(message, host, port)?;
    let prefer_ipv4 = socket.local_addr().map(|a| a.is_ipv4()).unwrap_or(true);
    let addr = resolve(&target, prefer_ipv4).await?;

    socket
        .send_to(message.as_bytes(), addr)
        .await
        .map_err(|source| RelayError::Send {
            target: addr,
            source,
        })?;

    tracing::debug!(target_addr = %addr, bytes = message.len(), "Sent UDP datagram");
    Ok(addr)
}
