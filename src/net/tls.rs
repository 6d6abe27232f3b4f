use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use tracing::info;
use wtransport::Identity;

const DEV_CERT_DIR: &str = "certs";
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

// Browsers only pin certificates via serverCertificateHashes up to 14 days
const DEV_CERT_VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// TLS configuration for WebTransport server
pub struct TlsConfig {
    /// The wtransport Identity containing certificate and key
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (for browser flag)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load TLS configuration
    ///
    /// Production: explicit certificate and key paths
    /// Development: `certs/`, generated on first start if missing
    pub async fn load(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        if let (Some(cert_path), Some(key_path)) = (cert_path, key_path) {
            info!("Loading TLS certificate from {}", cert_path);
            return Self::load_from_paths(cert_path, key_path).await;
        }

        let cert_file = Path::new(DEV_CERT_FILE);
        let key_file = Path::new(DEV_KEY_FILE);
        if !(cert_file.exists() && key_file.exists()) {
            info!("No certificate found, generating a dev certificate in {}/", DEV_CERT_DIR);
            generate_dev_cert(cert_file, key_file)?;
        } else {
            info!("Loading dev certificate from {}/", DEV_CERT_DIR);
        }
        Self::load_from_paths(DEV_CERT_FILE, DEV_KEY_FILE).await
    }

    /// Load certificate from PEM file paths
    async fn load_from_paths(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;

        let cert_hash = compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);

        Ok(Self {
            identity,
            cert_hash,
        })
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

/// Write a short-lived self-signed localhost certificate and its key as PEM
pub fn generate_dev_cert(cert_file: &Path, key_file: &Path) -> Result<()> {
    for file in [cert_file, key_file] {
        if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .context("Invalid certificate subject names")?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Cat Arena Dev");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + DEV_CERT_VALIDITY).into();

    let key_pair = KeyPair::generate().context("Failed to generate key pair")?;
    let cert = params
        .self_signed(&key_pair)
        .context("Failed to self-sign certificate")?;

    std::fs::write(cert_file, cert.pem())
        .with_context(|| format!("Failed to write {}", cert_file.display()))?;
    std::fs::write(key_file, key_pair.serialize_pem())
        .with_context(|| format!("Failed to write {}", key_file.display()))?;
    Ok(())
}

fn compute_cert_hash(identity: &Identity) -> String {
    identity
        .certificate_chain()
        .as_slice()
        .first()
        .map(|cert| STANDARD.encode(digest(&SHA256, cert.der()).as_ref()))
        .unwrap_or_default()
}
