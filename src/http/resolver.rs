use crate::error::{Error, Result};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves `host` with the system resolver, logging every address it returns.
pub async fn resolve_host(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let name = host.to_string();
    debug!("Resolving DNS for: {}", host);

    let addrs_iter = tokio::task::spawn_blocking(move || (name.as_str(), port).to_socket_addrs())
        .await
        .map_err(|e| Error::transport(format!("dns lookup for {} was cancelled", host), e))?
        .map_err(|e| Error::transport(format!("dns lookup for {} failed", host), e))?;
    let addresses: Vec<_> = addrs_iter.collect();

    if addresses.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(Error::transport(
            format!("dns lookup for {} failed", host),
            io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        ));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    Ok(addresses)
}
