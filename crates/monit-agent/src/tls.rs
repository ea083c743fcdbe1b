// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS trust configuration for the upstream connection.

use std::path::Path;
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName};

use crate::errors::TlsError;

/// Client-side TLS settings: the trust roots and the name to verify.
#[derive(Clone)]
pub struct TlsSettings {
    pub client_config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsSettings {
    pub fn new(client_config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        TlsSettings {
            client_config,
            server_name,
        }
    }

    /// Builds settings trusting only the certificates of a PEM bundle.
    pub fn from_pem(pem: &[u8], server_name: &str) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_slice_iter(pem) {
            let cert = cert.map_err(|e| TlsError::Pem(e.to_string()))?;
            roots.add(cert)?;
        }
        if roots.is_empty() {
            return Err(TlsError::EmptyBundle);
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::ServerName(server_name.to_string()))?;

        Ok(TlsSettings::new(Arc::new(client_config), server_name))
    }

    pub fn from_pem_file(path: &Path, server_name: &str) -> Result<Self, TlsError> {
        let pem = std::fs::read(path).map_err(|source| TlsError::ReadBundle {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&pem, server_name)
    }
}
