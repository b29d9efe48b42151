//! TLS client configuration shared by the blocking and async streams.

use crate::config::SslSettings;
use crate::error::TransportError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Builds the rustls client configuration described by `settings`.
pub fn client_config(settings: &SslSettings) -> Result<Arc<rustls::ClientConfig>, TransportError> {
    let root_store = if let Some(ref ca_path) = settings.ca_cert_path {
        let mut store = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            store
                .add(cert)
                .map_err(|e| TransportError::TlsConfig(format!("invalid CA cert: {}", e)))?;
        }
        store
    } else {
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        store
    };

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    let config = match (&settings.client_cert_path, &settings.client_key_path) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)
            .map_err(|e| TransportError::TlsConfig(format!("invalid client cert/key: {}", e)))?,
        _ => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Resolves the SNI name, falling back to the address host.
pub fn server_name(
    settings: &SslSettings,
    host: &str,
) -> Result<ServerName<'static>, TransportError> {
    let name = settings.server_name.as_deref().unwrap_or(host);
    ServerName::try_from(name.to_string())
        .map_err(|_| TransportError::TlsConfig(format!("invalid server name: {}", name)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::TlsConfig(format!("cannot open key file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        .ok_or_else(|| TransportError::TlsConfig(format!("no private key found in {:?}", path)))
}
