//! Certificate path construction and validation.
//!
//! Paths are built from the leaf towards a trust anchor. The order of the
//! intermediates supplied by the signer is not trusted: each step picks a
//! trust anchor that issued the current certificate, or failing that an
//! unused CA certificate from the supplied chain.

use crate::cert::error::CertificateError;
use crate::cert::{CertIdentifier, CertInfo, Certificate};
use crate::ocsp::{OcspRevocationChecker, RevocationStatus};
use crate::prelude::{debug, warn};
use crate::trust::TrustAnchorSet;
use crate::verification::InvalidReason;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;

/// Maximum number of certificates in a path, anchor included.
pub const MAX_PATH_DEPTH: usize = 8;

/// A validated path from a leaf to a trust anchor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertPath {
    certificates: Vec<Certificate>,
    anchor: Certificate,
}

impl CertPath {
    /// The non-anchor certificates, leaf first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> &Certificate {
        // A path always holds at least the leaf.
        &self.certificates[0]
    }

    /// The trust anchor the path ends in.
    pub const fn anchor(&self) -> &Certificate {
        &self.anchor
    }

    /// The issuer of the certificate at `index`.
    fn issuer_of(&self, index: usize) -> &Certificate {
        self.certificates.get(index + 1).unwrap_or(&self.anchor)
    }
}

/// Why a certificate path was rejected.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum PathFailure {
    /// No path from the leaf to a trust anchor.
    #[error("no trust path")]
    NoTrustPath,
    /// The certificate is outside its validity window.
    #[error("certificate not valid at verification time: {0}")]
    Expired(CertIdentifier),
    /// The certificate is revoked.
    #[error("certificate revoked: {0}")]
    Revoked(CertIdentifier),
    /// The revocation status of the certificate is unknown.
    #[error("revocation status unknown: {0}")]
    RevocationCheckFailed(CertIdentifier),
}

impl From<PathFailure> for InvalidReason {
    fn from(failure: PathFailure) -> Self {
        match failure {
            PathFailure::NoTrustPath => Self::NoTrustPath,
            PathFailure::Expired(_) => Self::Expired,
            PathFailure::Revoked(id) => Self::Revoked(id),
            PathFailure::RevocationCheckFailed(_) => Self::RevocationCheckFailed,
        }
    }
}

impl From<CertificateError> for PathFailure {
    fn from(_: CertificateError) -> Self {
        Self::NoTrustPath
    }
}

/// Outcome of [`CertPathValidator::validate`].
#[derive(Debug, Clone, Eq, PartialEq)]
#[must_use]
pub enum CertPathValidationResult {
    /// The chain leads to a trust anchor and every check passed.
    Valid(CertPath),
    /// The chain was rejected.
    Invalid(PathFailure),
}

impl CertPathValidationResult {
    /// Returns `true` for [`CertPathValidationResult::Valid`].
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Converts into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the [`PathFailure`] of a rejected chain.
    pub fn into_result(self) -> Result<CertPath, PathFailure> {
        match self {
            Self::Valid(path) => Ok(path),
            Self::Invalid(failure) => Err(failure),
        }
    }
}

/// Builds and validates signer certificate paths.
#[derive(Clone)]
pub struct CertPathValidator {
    checker: OcspRevocationChecker,
    responder_uri: Option<String>,
}

impl fmt::Debug for CertPathValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertPathValidator")
            .field("checker", &self.checker)
            .field("responder_uri", &self.responder_uri)
            .finish()
    }
}

impl CertPathValidator {
    /// Creates a validator using `checker` for revocation checks.
    pub fn new(checker: OcspRevocationChecker) -> Self {
        Self {
            checker,
            responder_uri: None,
        }
    }

    /// Sends every OCSP request to `uri` instead of the certificates' AIA URL.
    #[must_use]
    pub fn with_responder_uri(mut self, uri: impl Into<String>) -> Self {
        self.responder_uri = Some(uri.into());
        self
    }

    /// Validates the leaf-first `chain` against `anchors` at the current time.
    pub async fn validate(
        &self,
        chain: &[Certificate],
        anchors: &TrustAnchorSet,
        check_revocation: bool,
    ) -> CertPathValidationResult {
        self.validate_at(chain, anchors, check_revocation, OffsetDateTime::now_utc())
            .await
    }

    /// Validates the leaf-first `chain` against `anchors` at time `at`.
    ///
    /// `at` is also the reference time for OCSP response freshness.
    pub async fn validate_at(
        &self,
        chain: &[Certificate],
        anchors: &TrustAnchorSet,
        check_revocation: bool,
        at: OffsetDateTime,
    ) -> CertPathValidationResult {
        match self.validate_inner(chain, anchors, check_revocation, at).await {
            Ok(path) => CertPathValidationResult::Valid(path),
            Err(failure) => {
                warn!("Certificate path rejected: {failure}");
                CertPathValidationResult::Invalid(failure)
            }
        }
    }

    async fn validate_inner(
        &self,
        chain: &[Certificate],
        anchors: &TrustAnchorSet,
        check_revocation: bool,
        at: OffsetDateTime,
    ) -> Result<CertPath, PathFailure> {
        let (path, infos) = build_path(chain, anchors)?;

        for info in &infos {
            if !info.is_valid_at(at) {
                return Err(PathFailure::Expired(info.identifier.clone()));
            }
        }

        if check_revocation {
            for (index, (cert, info)) in path.certificates.iter().zip(&infos).enumerate() {
                let status = self
                    .checker
                    .check_at(
                        cert,
                        path.issuer_of(index),
                        self.responder_uri.as_deref(),
                        at,
                    )
                    .await;
                match status {
                    RevocationStatus::Good => {
                        debug!("Certificate not revoked: {}", info.identifier);
                    }
                    RevocationStatus::Revoked(reason) => {
                        warn!(
                            "Certificate revoked: {}, reason={reason}",
                            info.identifier
                        );
                        return Err(PathFailure::Revoked(info.identifier.clone()));
                    }
                    RevocationStatus::Unknown => {
                        return Err(PathFailure::RevocationCheckFailed(
                            info.identifier.clone(),
                        ));
                    }
                }
            }
        }

        Ok(path)
    }
}

/// Builds the path and returns it with the parsed fields of its non-anchor
/// certificates.
fn build_path(
    chain: &[Certificate],
    anchors: &TrustAnchorSet,
) -> Result<(CertPath, Vec<CertInfo>), PathFailure> {
    if chain.is_empty() {
        return Err(PathFailure::NoTrustPath);
    }
    let infos = chain
        .iter()
        .map(Certificate::info)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(oid) = &infos[0].unknown_critical_extension {
        debug!("Leaf carries unsupported critical extension: oid={oid}");
        return Err(PathFailure::NoTrustPath);
    }

    let mut search = PathSearch {
        chain,
        infos: &infos,
        anchors,
        used: vec![false; chain.len()],
        indices: vec![0],
    };
    search.used[0] = true;
    let anchor = search.extend(0).ok_or(PathFailure::NoTrustPath)?;

    let indices = search.indices;
    Ok((
        CertPath {
            certificates: indices.iter().map(|&i| chain[i].clone()).collect(),
            anchor,
        },
        indices.iter().map(|&i| infos[i].clone()).collect(),
    ))
}

/// Depth-first search over the supplied certificates. A dead end (no issuer,
/// depth or pathLenConstraint exceeded) backtracks to the next candidate.
struct PathSearch<'a> {
    chain: &'a [Certificate],
    infos: &'a [CertInfo],
    anchors: &'a TrustAnchorSet,
    used: Vec<bool>,
    indices: Vec<usize>,
}

impl PathSearch<'_> {
    fn extend(&mut self, current: usize) -> Option<Certificate> {
        if let Some(anchor) = self.anchors.issuer_of(&self.chain[current]) {
            if self.path_len_ok(anchor) {
                return Some(anchor.clone());
            }
        }
        // Room must remain for the anchor.
        if self.indices.len() + 1 >= MAX_PATH_DEPTH {
            return None;
        }

        for next in 0..self.chain.len() {
            if self.used[next]
                || !self.infos[next].can_issue()
                || !self.chain[current].is_issued_by(&self.chain[next])
            {
                continue;
            }
            self.used[next] = true;
            self.indices.push(next);
            if let Some(anchor) = self.extend(next) {
                return Some(anchor);
            }
            self.indices.pop();
            self.used[next] = false;
        }
        None
    }

    fn path_len_ok(&self, anchor: &Certificate) -> bool {
        let Ok(anchor) = anchor.info() else {
            return false;
        };
        let infos: Vec<&CertInfo> = self.indices.iter().map(|&i| &self.infos[i]).collect();
        check_path_len(&infos, &anchor)
    }
}

/// Each CA may be followed by at most `pathLenConstraint` intermediates.
fn check_path_len(infos: &[&CertInfo], anchor: &CertInfo) -> bool {
    let intermediates = infos.len().saturating_sub(1);
    let limits = infos
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, info)| (info.path_len, i - 1))
        .chain([(anchor.path_len, intermediates)]);

    for (path_len, below) in limits {
        if path_len.is_some_and(|max| below > max as usize) {
            debug!("pathLenConstraint exceeded: allowed={path_len:?}, intermediates={below}");
            return false;
        }
    }
    true
}
