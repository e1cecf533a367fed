use crate::error::{ConstructionError, Result};
use crate::http::transport::Transport;
use crate::tls::verifier::ProbeCertVerifier;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;

fn tls_error(e: impl std::fmt::Display) -> ConstructionError {
    ConstructionError::Tls(e.to_string())
}

fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = ca_file {
        let f = std::fs::File::open(file_path)
            .map_err(|e| tls_error(format!("cannot open {}: {}", file_path.display(), e)))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert.map_err(tls_error)?).map_err(tls_error)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };
    Ok(root_store)
}

/// Client configuration for one probe: verification policy, trust roots and ALPN.
pub fn client_config(
    verify: bool,
    ca_file: Option<&Path>,
    transport: Transport,
) -> Result<Arc<ClientConfig>> {
    let root_store = root_store(ca_file)?;
    let provider = Arc::new(rustls::crypto::CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let verifier = ProbeCertVerifier::new(verify, provider.clone(), &root_store)
        .map_err(tls_error)?;

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)
        .map_err(tls_error)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    tls_config.alpn_protocols = transport.alpn_protocols();

    Ok(Arc::new(tls_config))
}
