//! Verification outcomes shared by the JWS, certificate path and federation
//! list verifiers.

use crate::cert::CertIdentifier;
use thiserror::Error;

/// Outcome of verifying untrusted input.
///
/// A rejection is a regular value, not an error: the caller decides whether to
/// log it, count it, or retry with the next delivery.
#[derive(Debug, Clone, Eq, PartialEq)]
#[must_use]
pub enum VerificationResult<T> {
    /// The input is authentic and well formed.
    Valid(T),
    /// The input was rejected.
    Invalid(InvalidReason),
}

impl<T> VerificationResult<T> {
    /// Returns `true` for [`VerificationResult::Valid`].
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Returns the rejection reason, if any.
    pub const fn reason(&self) -> Option<&InvalidReason> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid(reason) => Some(reason),
        }
    }

    /// Converts into a `Result`, for use with `?`.
    ///
    /// # Errors
    ///
    /// Returns the [`InvalidReason`] of a rejected input.
    pub fn into_result(self) -> Result<T, InvalidReason> {
        match self {
            Self::Valid(value) => Ok(value),
            Self::Invalid(reason) => Err(reason),
        }
    }
}

impl<T> From<Result<T, InvalidReason>> for VerificationResult<T> {
    fn from(result: Result<T, InvalidReason>) -> Self {
        match result {
            Ok(value) => Self::Valid(value),
            Err(reason) => Self::Invalid(reason),
        }
    }
}

/// Why an input was rejected.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidReason {
    /// Not a compact JWS, or the header is not valid base64url JSON.
    #[error("malformed JWS envelope")]
    MalformedEnvelope,

    /// The `alg` header names an algorithm that is not accepted.
    #[error("unsupported JWS algorithm")]
    UnsupportedAlgorithm,

    /// The signature does not verify with the signer key.
    #[error("JWS signature mismatch")]
    SignatureMismatch,

    /// The signed payload is not a valid document.
    #[error("malformed JWS payload")]
    MalformedPayload,

    /// The `x5c` header is missing, empty or cannot be decoded.
    #[error("missing or undecodable signer certificate chain")]
    MissingCertificateChain,

    /// No path from the signer certificate to a trust anchor.
    #[error("no trust path to a configured anchor")]
    NoTrustPath,

    /// A certificate of the path is outside its validity window.
    #[error("certificate expired or not yet valid")]
    Expired,

    /// A certificate of the path has been revoked.
    #[error("certificate revoked: {0}")]
    Revoked(CertIdentifier),

    /// The revocation status of a certificate could not be established.
    #[error("revocation status could not be determined")]
    RevocationCheckFailed,
}

impl InvalidReason {
    /// Returns a stable, low-cardinality label for the reason.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "malformed_envelope",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::SignatureMismatch => "signature_mismatch",
            Self::MalformedPayload => "malformed_payload",
            Self::MissingCertificateChain => "missing_certificate_chain",
            Self::NoTrustPath => "no_trust_path",
            Self::Expired => "expired",
            Self::Revoked(_) => "revoked",
            Self::RevocationCheckFailed => "revocation_check_failed",
        }
    }
}
