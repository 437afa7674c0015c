//! Client-side TLS for the upstream connection.
//!
//! Without an explicit configuration the gateway skips certificate
//! verification. Supplying a CA bundle switches to full verification.

use natsgw_core::{GatewayError, GwResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// TLS configuration that accepts any server certificate.
pub fn insecure_client_config() -> GwResult<Arc<ClientConfig>> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::Tls(format!("TLS config error: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Verifying TLS configuration trusting the certificates in a PEM bundle.
pub fn client_config_from_ca(ca_path: &Path) -> GwResult<Arc<ClientConfig>> {
    let pem = std::fs::read(ca_path).map_err(|e| {
        GatewayError::Config(format!("cannot read CA bundle {}: {e}", ca_path.display()))
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Config(format!("invalid CA bundle {}: {e}", ca_path.display())))?;
    if certs.is_empty() {
        return Err(GatewayError::Config(format!(
            "no certificates found in {}",
            ca_path.display()
        )));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| GatewayError::Config(format!("rejected CA certificate: {e}")))?;
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::Tls(format!("TLS config error: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Host part of a `host:port` address, without IPv6 brackets.
pub fn server_name_of(addr: &str) -> GwResult<ServerName<'static>> {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => addr,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|e| GatewayError::Tls(format!("invalid server name '{host}': {e}")))
}

/// Run the TLS client handshake over an already-connected stream.
pub async fn upgrade(
    stream: TcpStream,
    addr: &str,
    config: Arc<ClientConfig>,
) -> GwResult<TlsStream<TcpStream>> {
    let server_name = server_name_of(addr)?;
    debug!(addr = %addr, "starting upstream TLS handshake");
    TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(|e| GatewayError::Tls(format!("TLS handshake with {addr} failed: {e}")))
}

/// Certificate verifier that accepts any server certificate.
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn server_name_strips_port_and_brackets() {
        assert_eq!(
            server_name_of("nats.example.com:4222").unwrap(),
            ServerName::try_from("nats.example.com").unwrap()
        );
        assert!(matches!(
            server_name_of("127.0.0.1:4222").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name_of("[::1]:4222").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(server_name_of("bad host:4222").is_err());
    }

    #[test]
    fn insecure_config_builds() {
        assert!(insecure_client_config().is_ok());
    }

    #[test]
    fn missing_ca_bundle_is_a_config_error() {
        let err = client_config_from_ca(Path::new("/nonexistent/ca.pem")).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn empty_ca_bundle_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let err = client_config_from_ca(file.path()).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
