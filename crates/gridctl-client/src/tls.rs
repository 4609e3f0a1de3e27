//! TLS client setup.
//!
//! Controllers present certificates signed by a cluster CA. The client
//! trusts exactly that CA.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::info;

use crate::error::{ClientError, ClientResult};

/// Build a root store from PEM-encoded CA certificates.
pub fn root_store(ca_pem: &[u8]) -> ClientResult<RootCertStore> {
    let mut reader = BufReader::new(ca_pem);
    let mut roots = RootCertStore::empty();

    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| ClientError::Tls(format!("read CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("add CA certificate: {e}")))?;
    }

    if roots.is_empty() {
        return Err(ClientError::Tls("no CA certificates found".to_string()));
    }
    Ok(roots)
}

/// A TLS connector trusting the CA certificates in `ca_pem`.
pub fn connector(ca_pem: &[u8]) -> ClientResult<TlsConnector> {
    let roots = root_store(ca_pem)?;
    let anchors = roots.len();
    let config = ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(format!("tls protocol version error: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    info!(anchors, "TLS client configured");
    Ok(TlsConnector::from(Arc::new(config)))
}

/// A TLS connector trusting the CA file at `path`.
pub fn connector_from_file(path: &Path) -> ClientResult<TlsConnector> {
    let pem = std::fs::read(path)
        .map_err(|e| ClientError::Tls(format!("read {}: {e}", path.display())))?;
    connector(&pem)
}

/// Parse a DNS name or IP address for certificate verification.
pub fn server_name(name: &str) -> ClientResult<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|e| ClientError::Tls(format!("invalid server name {name:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    fn ca_pem() -> String {
        let mut params = CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "gridctl test CA");
        params.distinguished_name = dn;

        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn loads_generated_ca() {
        let pem = ca_pem();
        let roots = root_store(pem.as_bytes()).unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn loads_bundle_with_several_cas() {
        let bundle = format!("{}{}", ca_pem(), ca_pem());
        let roots = root_store(bundle.as_bytes()).unwrap();
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn rejects_pem_without_certificates() {
        let err = root_store(b"not a certificate").unwrap_err();
        assert!(matches!(err, ClientError::Tls(_)));
    }

    #[test]
    fn connector_from_missing_file_fails() {
        let Err(err) = connector_from_file(Path::new("/nonexistent/ca.pem")) else {
            panic!("expected missing CA file to fail");
        };
        assert!(matches!(err, ClientError::Tls(_)));
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn server_names() {
        assert!(matches!(server_name("10.0.0.1").unwrap(), ServerName::IpAddress(_)));
        assert!(matches!(server_name("controller.local").unwrap(), ServerName::DnsName(_)));
        assert!(server_name("not a host!").is_err());
    }

    #[test]
    fn connector_from_generated_ca() {
        let pem = ca_pem();
        assert!(connector(pem.as_bytes()).is_ok());
    }

    #[test]
    fn connector_from_ca_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), ca_pem()).unwrap();
        assert!(connector_from_file(file.path()).is_ok());
    }

    #[test]
    fn connector_rejects_empty_ca_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let Err(err) = connector_from_file(file.path()) else {
            panic!("expected empty CA file to fail");
        };
        assert!(err.to_string().contains("no CA certificates"));
    }
}
