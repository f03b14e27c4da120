//! Trust anchors for federation list signer certificates.
//!
//! A [`TrustAnchorSet`] is built once during start-up and then shared read-only
//! (typically behind an `Arc`) by every verification. It is never re-read from
//! disk while the process runs.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use crate::prelude::info;
use openssl::pkcs12::Pkcs12;
use std::path::{Path, PathBuf};

/// An immutable collection of trusted root certificates.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrustAnchorSet {
    anchors: Vec<Certificate>,
}

/// An error that can arise loading a [`TrustAnchorSet`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TrustStoreError {
    /// The trust store file could not be read.
    #[error("cannot read trust store {path}")]
    Io {
        /// Path of the trust store.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The PKCS#12 container could not be decoded or the password is wrong.
    #[error("cannot open PKCS#12 trust store")]
    Pkcs12(#[source] openssl::error::ErrorStack),

    /// A certificate in the store could not be parsed.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The store does not contain any certificate.
    #[error("trust store contains no certificates")]
    Empty,
}

impl TrustAnchorSet {
    /// Creates a set from already parsed certificates.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::Empty`] if `anchors` is empty.
    pub fn new(anchors: Vec<Certificate>) -> Result<Self, TrustStoreError> {
        if anchors.is_empty() {
            return Err(TrustStoreError::Empty);
        }
        Ok(Self { anchors })
    }

    /// Creates a set from a list of DER-encoded X.509 authorities.
    ///
    /// # Errors
    ///
    /// If the function cannot parse the inputs, a [`TrustStoreError`] variant will be returned.
    pub fn from_x509_authorities(authorities: &[&[u8]]) -> Result<Self, TrustStoreError> {
        let anchors = authorities
            .iter()
            .map(|b| Certificate::try_from(*b))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(anchors)
    }

    /// Loads the trust store at `path`.
    ///
    /// PEM files (`-----BEGIN`) and concatenated DER certificates are read as
    /// plain bundles; anything else is opened as PKCS#12 with `password`.
    ///
    /// # Errors
    ///
    /// Returns a [`TrustStoreError`] if the file cannot be read or decoded, or
    /// contains no certificates.
    pub fn load(path: impl AsRef<Path>, password: Option<&str>) -> Result<Self, TrustStoreError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| TrustStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let set = if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            Self::new(Certificate::from_pem_bundle(&bytes)?)?
        } else if let Ok(anchors) = Certificate::from_der_bundle(&bytes) {
            Self::new(anchors)?
        } else {
            Self::from_pkcs12(&bytes, password.unwrap_or_default())?
        };

        info!(
            "Loaded trust store: path={}, anchors={}",
            path.display(),
            set.len()
        );
        Ok(set)
    }

    /// Reads every certificate of a PKCS#12 container.
    ///
    /// Trusted-certificate entries and an optional key entry's certificate are
    /// all treated as anchors.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::Pkcs12`] if the container cannot be opened.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self, TrustStoreError> {
        let parsed = Pkcs12::from_der(der)
            .and_then(|p12| p12.parse2(password))
            .map_err(TrustStoreError::Pkcs12)?;

        let mut anchors = Vec::new();
        for cert in parsed.cert.into_iter().chain(parsed.ca.into_iter().flatten()) {
            let der = cert.to_der().map_err(TrustStoreError::Pkcs12)?;
            anchors.push(Certificate::try_from(der)?);
        }
        Self::new(anchors)
    }

    /// Returns the trusted certificates.
    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    /// Returns the number of anchors.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Returns `true` if the set holds no anchors. Never true for a set built
    /// through the public constructors.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Returns `true` if `cert` is byte-for-byte one of the anchors.
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.anchors.iter().any(|a| a == cert)
    }

    /// Returns the first anchor that issued `cert`.
    pub(crate) fn issuer_of(&self, cert: &Certificate) -> Option<&Certificate> {
        self.anchors.iter().find(|anchor| cert.is_issued_by(anchor))
    }
}
