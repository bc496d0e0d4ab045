//! TLS identity bootstrap.
//!
//! # Responsibilities
//! - Detect an existing server certificate/key pair
//! - Otherwise generate a CA and a server certificate signed by it
//! - Write the four PEM files consumed by every TLS listener
//!
//! # Design Decisions
//! - Presence of the server cert and key files is the only check; contents
//!   and expiry are never inspected
//! - The four writes are not atomic as a set. A crash in between leaves a
//!   partial set which the next run will not repair if both server files
//!   made it to disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose,
};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::Paths;

/// Validity window of generated certificates.
pub const VALIDITY: time::Duration = time::Duration::days(10 * 365);

/// Error type for certificate bootstrap.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("generating certificate: {0}")]
    Crypto(#[from] rcgen::Error),
}

/// Target files of a generated certificate chain.
#[derive(Debug, Clone)]
pub struct CertificateFiles {
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

impl CertificateFiles {
    pub fn from_paths(paths: &Paths) -> Self {
        Self {
            ca_cert: paths.ca_cert(),
            ca_key: paths.ca_key(),
            server_cert: paths.server_cert(),
            server_key: paths.server_key(),
        }
    }

    /// Whether a server certificate and key are already on disk.
    pub fn server_pair_exists(&self) -> bool {
        self.server_cert.exists() && self.server_key.exists()
    }
}

/// Generates a CA and a server certificate for a set of host names.
#[derive(Debug, Clone)]
pub struct CertGenerator {
    pub hosts: Vec<String>,
    pub organization: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub files: CertificateFiles,
}

impl CertGenerator {
    /// Generator for `host_name`, valid for [`VALIDITY`] starting now.
    pub fn new(host_name: &str, organization: &str, files: CertificateFiles) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            hosts: vec![host_name.to_string()],
            organization: organization.to_string(),
            not_before: now,
            not_after: now + VALIDITY,
            files,
        }
    }

    /// Generate the chain and write all four files. Existing files are
    /// never overwritten.
    pub fn generate(&self) -> Result<(), CertificateError> {
        if self.files.server_pair_exists() {
            return Ok(());
        }

        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = self.name(&format!("{} CA", self.organization));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.not_before = self.not_before;
        ca_params.not_after = self.not_after;
        ca_params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        let ca = Certificate::from_params(ca_params)?;

        let mut params = CertificateParams::new(self.hosts.clone());
        let common_name = self.hosts.first().cloned().unwrap_or_default();
        params.distinguished_name = self.name(&common_name);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = self.not_before;
        params.not_after = self.not_after;
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        let server = Certificate::from_params(params)?;

        write_pem(&self.files.ca_cert, &ca.serialize_pem()?)?;
        write_pem(&self.files.ca_key, &ca.serialize_private_key_pem())?;
        write_pem(&self.files.server_cert, &server.serialize_pem_with_signer(&ca)?)?;
        write_pem(&self.files.server_key, &server.serialize_private_key_pem())?;

        tracing::debug!(
            ca_cert = %self.files.ca_cert.display(),
            ca_key = %self.files.ca_key.display(),
            server_cert = %self.files.server_cert.display(),
            server_key = %self.files.server_key.display(),
            "Created certificate files"
        );
        Ok(())
    }

    fn name(&self, common_name: &str) -> DistinguishedName {
        let mut name = DistinguishedName::new();
        name.push(DnType::OrganizationName, self.organization.as_str());
        name.push(DnType::CommonName, common_name);
        name
    }
}

fn write_pem(path: &Path, pem: &str) -> Result<(), CertificateError> {
    fs::write(path, pem).map_err(|source| CertificateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(dir: &Path) -> CertGenerator {
        CertGenerator::new("gateway.local", "Home Gateway", CertificateFiles::from_paths(&Paths::new(dir)))
    }

    #[test]
    fn generates_four_files() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        gen.generate().unwrap();

        for path in [&gen.files.ca_cert, &gen.files.ca_key, &gen.files.server_cert, &gen.files.server_key] {
            assert!(path.exists(), "{} missing", path.display());
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 4);

        let pem = fs::read(&gen.files.server_cert).unwrap();
        let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(certs.len(), 1);

        let key = fs::read(&gen.files.server_key).unwrap();
        assert!(rustls_pemfile::private_key(&mut key.as_slice()).unwrap().is_some());
    }

    #[test]
    fn second_run_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        gen.generate().unwrap();
        let first = fs::read(&gen.files.server_cert).unwrap();
        let first_ca = fs::read(&gen.files.ca_key).unwrap();

        gen.generate().unwrap();
        assert_eq!(fs::read(&gen.files.server_cert).unwrap(), first);
        assert_eq!(fs::read(&gen.files.ca_key).unwrap(), first_ca);
    }

    #[test]
    fn existing_pair_skips_ca_generation() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        fs::write(&gen.files.server_cert, "cert").unwrap();
        fs::write(&gen.files.server_key, "key").unwrap();

        gen.generate().unwrap();
        assert!(!gen.files.ca_cert.exists());
        assert_eq!(fs::read_to_string(&gen.files.server_cert).unwrap(), "cert");
    }
}
