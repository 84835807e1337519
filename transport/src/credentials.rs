//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Loading TLS certificates and keys into rustls configurations

use crate::{TransportError, TransportResult};
use rustls::crypto::ring::default_provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Certificate chain and private key files for a TLS listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsCredentials {
    /// PEM file holding the certificate chain, leaf first
    pub certificate_path: PathBuf,
    /// PEM file holding the private key
    pub key_path: PathBuf,
}

impl TlsCredentials {
    /// Create credentials from a certificate chain file and a key file
    pub fn new(certificate_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Build a server configuration from these files
    pub fn server_config(&self) -> TransportResult<Arc<ServerConfig>> {
        let certs = load_certificates(&self.certificate_path)?;
        let key = load_private_key(&self.key_path)?;
        server_config_from_parts(certs, key)
    }
}

fn read_file(path: &Path) -> TransportResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| TransportError::Credentials {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn parse_certificates(path: &Path, pem: &[u8]) -> TransportResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TransportError::Credentials {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TransportError::Credentials {
            path: path.to_path_buf(),
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

fn parse_private_key(path: &Path, pem: &[u8]) -> TransportResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|err| TransportError::Credentials {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?
        .ok_or_else(|| TransportError::Credentials {
            path: path.to_path_buf(),
            reason: "no private key found".to_string(),
        })
}

/// Read every certificate in a PEM file
pub fn load_certificates(path: &Path) -> TransportResult<Vec<CertificateDer<'static>>> {
    let pem = read_file(path)?;
    let certs = parse_certificates(path, &pem)?;
    debug!(path = %path.display(), count = certs.len(), "Loaded certificates");
    Ok(certs)
}

/// Read the first private key in a PEM file
pub fn load_private_key(path: &Path) -> TransportResult<PrivateKeyDer<'static>> {
    let pem = read_file(path)?;
    parse_private_key(path, &pem)
}

/// Build a server configuration from in-memory PEM data
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> TransportResult<Arc<ServerConfig>> {
    let source = Path::new("<memory>");
    let certs = parse_certificates(source, cert_pem)?;
    let key = parse_private_key(source, key_pem)?;
    server_config_from_parts(certs, key)
}

fn server_config_from_parts(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> TransportResult<Arc<ServerConfig>> {
    let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Build a client configuration.
///
/// Peers are verified against the certificates in `ca_path` when given, otherwise
/// against the bundled web PKI roots.
pub fn client_config(ca_path: Option<&Path>) -> TransportResult<Arc<ClientConfig>> {
    match ca_path {
        Some(path) => {
            let pem = read_file(path)?;
            client_config_from_pem(path, &pem)
        }
        None => {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            client_config_with_roots(roots)
        }
    }
}

/// Build a client configuration trusting only the certificates in `ca_pem`
pub fn client_config_from_ca_pem(ca_pem: &[u8]) -> TransportResult<Arc<ClientConfig>> {
    client_config_from_pem(Path::new("<memory>"), ca_pem)
}

fn client_config_from_pem(path: &Path, pem: &[u8]) -> TransportResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(path, pem)? {
        roots.add(cert)?;
    }
    client_config_with_roots(roots)
}

fn client_config_with_roots(roots: RootCertStore) -> TransportResult<Arc<ClientConfig>> {
    let config = ClientConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
