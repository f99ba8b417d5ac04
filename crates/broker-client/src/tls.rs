//! CA loading for TLS broker connections.

use std::path::Path;
use std::sync::Arc;

use rumqttc::{TlsConfiguration, Transport};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::{BrokerError, Result};

/// Validated CA bundle used to verify the broker's certificate.
#[derive(Clone, Debug)]
pub struct TlsSettings {
    ca_pem: Arc<Vec<u8>>,
    num_certs: usize,
}

impl TlsSettings {
    pub fn from_ca_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path).map_err(|e| {
            BrokerError::Tls(format!("cannot read CA file {}: {e}", path.display()))
        })?;
        Self::from_ca_pem(pem)
    }

    /// Parse every certificate in `pem` into a root store so that a malformed
    /// bundle is rejected up front rather than on the first handshake.
    pub fn from_ca_pem(pem: Vec<u8>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_slice_iter(&pem) {
            let cert = cert
                .map_err(|e| BrokerError::Tls(format!("cannot parse CA certificate: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| BrokerError::Tls(format!("cannot add CA to root store: {e}")))?;
        }
        if roots.is_empty() {
            return Err(BrokerError::Tls(
                "CA file contains no certificates".to_string(),
            ));
        }
        Ok(Self {
            num_certs: roots.len(),
            ca_pem: Arc::new(pem),
        })
    }

    pub fn num_certs(&self) -> usize {
        self.num_certs
    }

    pub(crate) fn transport(&self) -> Transport {
        Transport::Tls(TlsConfiguration::Simple {
            ca: self.ca_pem.as_ref().clone(),
            alpn: None,
            client_auth: None,
        })
    }
}
