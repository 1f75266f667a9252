//! TLS material for the stream transport.

use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use rustls_pemfile::Item;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where PEM data comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PemSource {
    File(PathBuf),
    Inline(String),
}

impl PemSource {
    fn read(&self) -> Result<Vec<u8>> {
        match self {
            PemSource::File(path) => std::fs::read(path)
                .map_err(|e| Error::TlsConfig(format!("cannot read {}: {}", path.display(), e))),
            PemSource::Inline(pem) => Ok(pem.as_bytes().to_vec()),
        }
    }

    fn items(&self) -> Result<Vec<Item>> {
        let data = self.read()?;
        rustls_pemfile::read_all(&mut BufReader::new(data.as_slice()))
            .map_err(|e| Error::TlsConfig(format!("invalid PEM: {}", e)))
    }
}

/// Certificates and trust roots for TLS connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Our certificate chain, leaf first
    pub certificate_chain: PemSource,
    /// Private key for the leaf certificate (PKCS#8, RSA or SEC1)
    pub private_key: PemSource,
    /// CA certificates accepted when connecting out
    pub trust_roots: Vec<PemSource>,
    /// Name checked against the peer certificate instead of the peer IP
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new(certificate_chain: PemSource, private_key: PemSource) -> Self {
        Self {
            certificate_chain,
            private_key,
            trust_roots: Vec::new(),
            server_name: None,
        }
    }

    pub fn with_trust_root(mut self, root: PemSource) -> Self {
        self.trust_roots.push(root);
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    fn load_certs(source: &PemSource) -> Result<Vec<Certificate>> {
        let certs: Vec<Certificate> = source
            .items()?
            .into_iter()
            .filter_map(|item| match item {
                Item::X509Certificate(der) => Some(Certificate(der)),
                _ => None,
            })
            .collect();
        if certs.is_empty() {
            return Err(Error::TlsConfig("no certificates found".to_string()));
        }
        Ok(certs)
    }

    fn load_private_key(&self) -> Result<PrivateKey> {
        self.private_key
            .items()?
            .into_iter()
            .find_map(|item| match item {
                Item::PKCS8Key(der) | Item::RSAKey(der) | Item::ECKey(der) => Some(PrivateKey(der)),
                _ => None,
            })
            .ok_or_else(|| Error::TlsConfig("no private key found".to_string()))
    }

    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let certs = Self::load_certs(&self.certificate_chain)?;
        let key = self.load_private_key()?;
        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsConfig(e.to_string()))?;
        Ok(Arc::new(config))
    }

    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let mut roots = RootCertStore::empty();
        for source in &self.trust_roots {
            for cert in Self::load_certs(source)? {
                roots
                    .add(&cert)
                    .map_err(|e| Error::TlsConfig(e.to_string()))?;
            }
        }
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }

    pub(crate) fn server_name_for(&self, peer: SocketAddr) -> Result<ServerName> {
        match &self.server_name {
            Some(name) => ServerName::try_from(name.as_str())
                .map_err(|e| Error::TlsConfig(format!("invalid server name '{}': {}", name, e))),
            None => Ok(ServerName::IpAddress(peer.ip())),
        }
    }
}
