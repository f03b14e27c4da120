//! The federation list and its end-to-end verification.

use crate::jws::{JwsEnvelope, JwsVerifier};
use crate::path::{CertPathValidationResult, CertPathValidator};
use crate::prelude::debug;
use crate::trust::TrustAnchorSet;
use crate::verification::{InvalidReason, VerificationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

/// One trusted messenger domain.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DomainEntry {
    domain: String,
    #[serde(rename = "isInsurance")]
    is_insurance: bool,
    #[serde(rename = "telematikID", alias = "telematikId", default)]
    telematik_id: String,
}

impl DomainEntry {
    /// Creates an entry.
    pub fn new(
        domain: impl Into<String>,
        is_insurance: bool,
        telematik_id: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            is_insurance,
            telematik_id: telematik_id.into(),
        }
    }

    /// The domain name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether the domain belongs to a health insurance.
    pub const fn is_insurance(&self) -> bool {
        self.is_insurance
    }

    /// The Telematik-ID of the operator, possibly empty.
    pub fn telematik_id(&self) -> &str {
        &self.telematik_id
    }

    fn matches(&self, domain: &str) -> bool {
        normalize(&self.domain).eq_ignore_ascii_case(normalize(domain))
    }
}

fn normalize(domain: &str) -> &str {
    let domain = domain.trim();
    domain.strip_suffix('.').unwrap_or(domain)
}

/// A versioned list of trusted domains.
///
/// The list is replaced as a unit; domains are kept in received order and are
/// not required to be unique.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FederationList {
    version: i64,
    #[serde(rename = "domainList")]
    domains: Vec<DomainEntry>,
}

impl FederationList {
    /// Creates a list.
    pub fn new(version: i64, domains: Vec<DomainEntry>) -> Self {
        Self { version, domains }
    }

    /// The list version. Higher versions supersede lower ones.
    pub const fn version(&self) -> i64 {
        self.version
    }

    /// The domains in received order.
    pub fn domains(&self) -> &[DomainEntry] {
        &self.domains
    }

    /// Finds the first entry for `domain`.
    ///
    /// Comparison is ASCII case-insensitive and ignores a trailing dot.
    pub fn find(&self, domain: &str) -> Option<&DomainEntry> {
        self.domains.iter().find(|entry| entry.matches(domain))
    }

    /// Returns `true` if `domain` is part of the federation.
    pub fn contains_domain(&self, domain: &str) -> bool {
        self.find(domain).is_some()
    }
}

impl fmt::Display for FederationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version={} domains={}",
            self.version,
            self.domains.len()
        )
    }
}

/// Verifies signed federation lists: JWS signature with the `x5c` leaf key,
/// then the `x5c` chain against the trust anchors.
#[derive(Debug, Clone)]
pub struct FederationListVerifier {
    anchors: Arc<TrustAnchorSet>,
    path_validator: CertPathValidator,
    check_revocation_status: bool,
}

impl FederationListVerifier {
    /// Creates a verifier.
    pub fn new(
        anchors: Arc<TrustAnchorSet>,
        path_validator: CertPathValidator,
        check_revocation_status: bool,
    ) -> Self {
        Self {
            anchors,
            path_validator,
            check_revocation_status,
        }
    }

    /// Whether signer certificates are checked over OCSP.
    pub const fn check_revocation_status(&self) -> bool {
        self.check_revocation_status
    }

    /// Verifies a compact JWS response body.
    pub async fn verify(&self, raw_body: &[u8]) -> VerificationResult<FederationList> {
        self.verify_at(raw_body, OffsetDateTime::now_utc()).await
    }

    /// Verifies a compact JWS response body at time `at`.
    pub async fn verify_at(
        &self,
        raw_body: &[u8],
        at: OffsetDateTime,
    ) -> VerificationResult<FederationList> {
        self.verify_inner(raw_body, at).await.into()
    }

    async fn verify_inner(
        &self,
        raw_body: &[u8],
        at: OffsetDateTime,
    ) -> Result<FederationList, InvalidReason> {
        let raw = std::str::from_utf8(raw_body).map_err(|_| InvalidReason::MalformedEnvelope)?;
        let envelope = JwsEnvelope::parse(raw)?;
        let chain = envelope.header().certificate_chain()?;

        let leaf_key = chain[0]
            .public_key()
            .map_err(|_| InvalidReason::MissingCertificateChain)?;
        let list: FederationList = JwsVerifier::verify_envelope(&envelope, &leaf_key).into_result()?;
        debug!("Federation list signature verified: {list}");

        match self
            .path_validator
            .validate_at(&chain, &self.anchors, self.check_revocation_status, at)
            .await
        {
            CertPathValidationResult::Valid(_) => Ok(list),
            CertPathValidationResult::Invalid(failure) => Err(failure.into()),
        }
    }
}
