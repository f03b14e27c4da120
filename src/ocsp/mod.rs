//! OCSP revocation checking (RFC 6960).
//!
//! [`OcspRevocationChecker`] asks a responder about one certificate and turns
//! every failure (transport, decoding, signature, freshness) into
//! [`RevocationStatus::Unknown`]. Callers treat `Unknown` as a failure.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use crate::prelude::{debug, warn};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Public};
use openssl::sign::Verifier;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

mod cert_id;
mod http;
mod request;
mod response;
#[cfg(test)]
pub(crate) mod testing;

pub use cert_id::CertIdHash;
pub use http::{HttpOcspResponder, OcspMethod};

use cert_id::CertId;
use response::{BasicResponse, CertStatus};

/// Tolerated clock difference between this host and the responder.
const DEFAULT_MAX_CLOCK_SKEW: Duration = Duration::minutes(5);

/// Revocation status of a certificate.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RevocationStatus {
    /// The responder vouches that the certificate is not revoked.
    Good,
    /// The certificate is revoked.
    Revoked(RevocationReason),
    /// The status could not be established.
    Unknown,
}

/// `CRLReason` of a revoked certificate.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RevocationReason {
    /// `unspecified (0)`, also used when the response carries no reason.
    Unspecified,
    /// `keyCompromise (1)`
    KeyCompromise,
    /// `cACompromise (2)`
    CaCompromise,
    /// `affiliationChanged (3)`
    AffiliationChanged,
    /// `superseded (4)`
    Superseded,
    /// `cessationOfOperation (5)`
    CessationOfOperation,
    /// `certificateHold (6)`
    CertificateHold,
    /// `removeFromCRL (8)`
    RemoveFromCrl,
    /// `privilegeWithdrawn (9)`
    PrivilegeWithdrawn,
    /// `aACompromise (10)`
    AaCompromise,
}

impl RevocationReason {
    pub(crate) const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::KeyCompromise,
            2 => Self::CaCompromise,
            3 => Self::AffiliationChanged,
            4 => Self::Superseded,
            5 => Self::CessationOfOperation,
            6 => Self::CertificateHold,
            8 => Self::RemoveFromCrl,
            9 => Self::PrivilegeWithdrawn,
            10 => Self::AaCompromise,
            _ => Self::Unspecified,
        }
    }

    /// Returns the RFC 5280 name of the reason.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CaCompromise => "cACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCrl => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AaCompromise => "aACompromise",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while obtaining or checking an OCSP response.
///
/// These never leave [`OcspRevocationChecker::check`], which reports them as
/// [`RevocationStatus::Unknown`]; they are public for [`OcspResponder`]
/// implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OcspError {
    /// Neither a responder URI was given nor does the certificate name one.
    #[error("no OCSP responder URI available")]
    NoResponderUri,

    /// The responder could not be reached or timed out.
    #[error("OCSP transport error: {0}")]
    Transport(String),

    /// The responder answered with a non-success HTTP status.
    #[error("OCSP responder returned HTTP status {0}")]
    HttpStatus(u16),

    /// The response body exceeded the given number of bytes.
    #[error("OCSP response exceeds {0} bytes")]
    ResponseTooLarge(usize),

    /// The response is not valid DER or misses a required element.
    #[error("malformed OCSP response: {0}")]
    MalformedResponse(&'static str),

    /// `responseStatus` is not `successful`.
    #[error("OCSP response status {0}")]
    Unsuccessful(u8),

    /// `responseType` is not `id-pkix-ocsp-basic`.
    #[error("unsupported OCSP response type")]
    UnsupportedResponseType,

    /// The response signature algorithm is not supported.
    #[error("unsupported OCSP signature algorithm")]
    UnsupportedSignatureAlgorithm,

    /// Neither the issuer nor an authorized delegate signed the response.
    #[error("OCSP response not signed by the issuer or an authorized responder")]
    UntrustedSigner,

    /// No single response matches the requested certificate.
    #[error("OCSP response does not cover the requested certificate")]
    NoMatchingResponse,

    /// `thisUpdate` is in the future or `nextUpdate` in the past.
    #[error("OCSP response is not fresh")]
    Stale,

    /// The request could not be encoded.
    #[error("cannot encode OCSP request")]
    Encode(#[from] asn1::ASN1EncodeErr),

    /// A certificate could not be parsed.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The crypto provider failed.
    #[error("crypto provider error")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Boxed future returned by [`OcspResponder::send`].
pub type ResponderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, OcspError>> + Send + 'a>>;

/// Transport for OCSP requests.
///
/// The default implementation is [`HttpOcspResponder`]; tests inject their own.
pub trait OcspResponder: Send + Sync + 'static {
    /// Sends the DER `request` to `uri` and returns the DER response body.
    fn send<'a>(&'a self, uri: &'a str, request: &'a [u8]) -> ResponderFuture<'a>;
}

/// Checks the revocation status of single certificates.
#[derive(Clone)]
pub struct OcspRevocationChecker {
    responder: Arc<dyn OcspResponder>,
    hash: CertIdHash,
    max_clock_skew: Duration,
}

impl fmt::Debug for OcspRevocationChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcspRevocationChecker")
            .field("responder", &"<responder>")
            .field("hash", &self.hash)
            .field("max_clock_skew", &self.max_clock_skew)
            .finish()
    }
}

impl OcspRevocationChecker {
    /// Creates a checker sending requests through `responder`.
    pub fn new(responder: Arc<dyn OcspResponder>) -> Self {
        Self {
            responder,
            hash: CertIdHash::default(),
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }

    /// Selects the hash algorithm of request `CertID`s.
    #[must_use]
    pub fn with_cert_id_hash(mut self, hash: CertIdHash) -> Self {
        self.hash = hash;
        self
    }

    /// Sets the tolerated clock skew for `thisUpdate` / `nextUpdate`.
    #[must_use]
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Asks the responder about `subject`, issued by `issuer`.
    ///
    /// The request goes to `responder_uri` if given, else to the OCSP URL of
    /// the certificate's Authority Information Access extension.
    pub async fn check(
        &self,
        subject: &Certificate,
        issuer: &Certificate,
        responder_uri: Option<&str>,
    ) -> RevocationStatus {
        self.check_at(subject, issuer, responder_uri, OffsetDateTime::now_utc())
            .await
    }

    pub(crate) async fn check_at(
        &self,
        subject: &Certificate,
        issuer: &Certificate,
        responder_uri: Option<&str>,
        now: OffsetDateTime,
    ) -> RevocationStatus {
        match self.try_check(subject, issuer, responder_uri, now).await {
            Ok(status) => status,
            Err(e) => {
                let id = subject
                    .identifier()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                warn!("OCSP check failed, status unknown: {id}, error={e}");
                RevocationStatus::Unknown
            }
        }
    }

    async fn try_check(
        &self,
        subject: &Certificate,
        issuer: &Certificate,
        responder_uri: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<RevocationStatus, OcspError> {
        let subject_info = subject.info()?;
        let issuer_info = issuer.info()?;

        let uri = responder_uri
            .map(str::to_owned)
            .or(subject_info.ocsp_url.clone())
            .ok_or(OcspError::NoResponderUri)?;

        let cert_id = CertId::new(self.hash, &subject_info, &issuer_info)?;
        let request = request::encode_request(&cert_id)?;

        debug!(
            "Sending OCSP request: uri={uri}, {}",
            subject_info.identifier
        );
        let body = self.responder.send(&uri, &request).await?;

        let response = response::parse_response(&body)?;
        verify_signer(&response, issuer, now)?;

        let single = response
            .responses
            .iter()
            .find(|r| r.cert_id.matches(&cert_id))
            .ok_or(OcspError::NoMatchingResponse)?;

        if single.this_update > now + self.max_clock_skew {
            return Err(OcspError::Stale);
        }
        if single
            .next_update
            .is_some_and(|next| next < now - self.max_clock_skew)
        {
            return Err(OcspError::Stale);
        }

        Ok(match single.status {
            CertStatus::Good => RevocationStatus::Good,
            CertStatus::Revoked(reason) => RevocationStatus::Revoked(reason),
            CertStatus::Unknown => RevocationStatus::Unknown,
        })
    }
}

/// Accepts a response signed by the issuer itself or by a certificate from
/// the response that the issuer issued for OCSP signing.
fn verify_signer(
    response: &BasicResponse,
    issuer: &Certificate,
    now: OffsetDateTime,
) -> Result<(), OcspError> {
    let md = response.digest()?;
    if signature_valid(&*issuer.public_key()?, md, response) {
        return Ok(());
    }

    for cert in &response.certs {
        if !cert.is_issued_by(issuer) {
            continue;
        }
        let info = cert.info()?;
        if !info.ocsp_signing || !info.is_valid_at(now) {
            debug!("Ignoring unauthorized OCSP signer: {}", info.identifier);
            continue;
        }
        if signature_valid(&*cert.public_key()?, md, response) {
            return Ok(());
        }
    }

    Err(OcspError::UntrustedSigner)
}

fn signature_valid(key: &PKeyRef<Public>, md: MessageDigest, response: &BasicResponse) -> bool {
    Verifier::new(md, key)
        .and_then(|mut v| {
            v.update(&response.tbs_der)?;
            v.verify(&response.signature)
        })
        .unwrap_or(false)
}
