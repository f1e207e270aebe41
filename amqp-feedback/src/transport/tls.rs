//! TLS establishment for the receiver transport.
//!
//! The connector always verifies the peer certificate against the bundled
//! webpki roots; there is no switch to accept unverified certificates.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use super::NegotiationError;

fn default_connector() -> TlsConnector {
    let mut root_cert_store = RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Wraps the stream in a verifying TLS session for `domain`
pub(crate) async fn connect<Io>(domain: &str, stream: Io) -> Result<TlsStream<Io>, NegotiationError>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let domain =
        ServerName::try_from(domain.to_string()).map_err(|_| NegotiationError::InvalidDomain)?;
    let connector = default_connector();
    let tls_stream = connector.connect(domain, stream).await?;
    Ok(tls_stream)
}
