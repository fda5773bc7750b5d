//! TLS connector for the WAN control channel and the SmartLink broker.
//!
//! FlexRadio's WAN infrastructure predates hostname-strict certificate
//! verification: radios present certs for their serial, and the broker's
//! cert does not chain to a name we can pin. Both endpoints therefore use
//! an explicit accept-all verifier. The permissiveness is scoped to the
//! connector built here; nothing else in the crate touches TLS.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Verifier that accepts any server certificate.
///
/// Signature verification still runs (the session is encrypted and the
/// peer must hold the key for the cert it presented); only the trust-chain
/// and hostname checks are skipped.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds the accept-all TLS connector shared by the WAN control channel
/// and the broker client.
#[must_use]
pub fn permissive_connector() -> TlsConnector {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .expect("ring provider supports default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Opens a TCP connection to `host:port` and completes a TLS handshake
/// with the permissive verifier.
pub async fn connect_tls(host: &str, port: u16) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true).ok();

    // IP literals (WAN radios are dialed by public IP) and hostnames both
    // parse into a ServerName; verification ignores it either way.
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    permissive_connector().connect(server_name, tcp).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_builds() {
        let _connector = permissive_connector();
    }

    #[test]
    fn server_name_accepts_ip_literals_and_hostnames() {
        assert!(ServerName::try_from("203.0.113.7".to_string()).is_ok());
        assert!(ServerName::try_from("smartlink.flexradio.com".to_string()).is_ok());
    }
}
