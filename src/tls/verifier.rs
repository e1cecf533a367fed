use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{VerifierBuilderError, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use std::sync::Arc;

/// WebPKI chain verification that can be downgraded to a log line.
///
/// The chain is always checked, so an untrusted certificate costs the same handshake
/// time whether or not it is accepted. Handshake signatures are never skipped.
#[derive(Debug)]
pub struct ProbeCertVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    enforce: bool,
}

impl ProbeCertVerifier {
    pub fn new(
        enforce: bool,
        provider: Arc<CryptoProvider>,
        root_store: &RootCertStore,
    ) -> Result<Self, VerifierBuilderError> {
        let roots = Arc::new(root_store.clone());
        let webpki = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()?;
        Ok(Self { webpki, enforce })
    }
}

impl ServerCertVerifier for ProbeCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let verdict = self
            .webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now);
        match verdict {
            Err(e) if !self.enforce => {
                debug!("Accepting untrusted certificate for {:?}: {}", server_name, e);
                Ok(ServerCertVerified::assertion())
            }
            verdict => verdict,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}
