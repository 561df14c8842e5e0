//! Raw upstream connections for upgrade tunnels
//!
//! Plain TCP, or TLS (rustls + webpki roots) when the service is
//! configured with SSL.

use super::upgrade::BoxedSocket;
use crate::service::Origin;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Open a socket to `origin`, bounded by `connect_timeout` when set
pub async fn connect(origin: &Origin, connect_timeout: Option<Duration>) -> io::Result<BoxedSocket> {
    let address = (origin.host.as_str(), origin.port);
    let tcp = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, TcpStream::connect(address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream connect timed out"))??,
        None => TcpStream::connect(address).await?,
    };
    let _ = tcp.set_nodelay(true);

    if !origin.tls {
        return Ok(Box::new(tcp));
    }

    let server_name = ServerName::try_from(origin.host.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let tls = tls_connector()?.connect(server_name, tcp).await?;
    Ok(Box::new(tls))
}

fn tls_connector() -> io::Result<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
