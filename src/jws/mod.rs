//! Compact JWS parsing, ECDSA signature verification and signing.
//!
//! Accepted algorithms are the NIST ECDSA family (`ES256`, `ES384`, `ES512`)
//! and the Brainpool family (`BP256R1`, `BP384R1`, `BP512R1`). Signatures use
//! the JOSE raw `r || s` encoding. Curve lookups go through the process-wide
//! registry in [`curves`].

use crate::cert::parsing::certificates_from_x5c;
use crate::cert::Certificate;
use crate::verification::{InvalidReason, VerificationResult};
use base64ct::{Base64, Base64UrlUnpadded, Encoding as _};
use openssl::bn::BigNum;
use openssl::ec::EcKeyRef;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKeyRef, Private};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod curves;

pub use curves::{register_curves, CurveRegistryError};

/// Maximum size of the protected header after base64url decoding.
///
/// Large enough for an `x5c` chain of several certificates.
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Maximum size of the payload after base64url decoding.
const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// JWS signature algorithms accepted for federation list signatures.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum JwsAlgorithm {
    /// ECDSA using P-256 and SHA-256
    ES256,
    /// ECDSA using P-384 and SHA-384
    ES384,
    /// ECDSA using P-521 and SHA-512
    ES512,
    /// ECDSA using brainpoolP256r1 and SHA-256
    BP256R1,
    /// ECDSA using brainpoolP384r1 and SHA-384
    BP384R1,
    /// ECDSA using brainpoolP512r1 and SHA-512
    BP512R1,
}

impl JwsAlgorithm {
    /// Every accepted algorithm.
    pub const ALL: [Self; 6] = [
        Self::ES256,
        Self::ES384,
        Self::ES512,
        Self::BP256R1,
        Self::BP384R1,
        Self::BP512R1,
    ];

    /// Parses the `alg` header value.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ES256" => Self::ES256,
            "ES384" => Self::ES384,
            "ES512" => Self::ES512,
            "BP256R1" => Self::BP256R1,
            "BP384R1" => Self::BP384R1,
            "BP512R1" => Self::BP512R1,
            _ => return None,
        })
    }

    /// Returns the `alg` header value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::BP256R1 => "BP256R1",
            Self::BP384R1 => "BP384R1",
            Self::BP512R1 => "BP512R1",
        }
    }

    pub(crate) const fn curve_nid(self) -> Nid {
        match self {
            Self::ES256 => Nid::X9_62_PRIME256V1,
            Self::ES384 => Nid::SECP384R1,
            Self::ES512 => Nid::SECP521R1,
            Self::BP256R1 => Nid::BRAINPOOL_P256R1,
            Self::BP384R1 => Nid::BRAINPOOL_P384R1,
            Self::BP512R1 => Nid::BRAINPOOL_P512R1,
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            Self::ES256 | Self::BP256R1 => MessageDigest::sha256(),
            Self::ES384 | Self::BP384R1 => MessageDigest::sha384(),
            Self::ES512 | Self::BP512R1 => MessageDigest::sha512(),
        }
    }

    /// Length of each of `r` and `s` in the raw signature.
    const fn coordinate_len(self) -> usize {
        match self {
            Self::ES256 | Self::BP256R1 => 32,
            Self::ES384 | Self::BP384R1 => 48,
            Self::ES512 => 66,
            Self::BP512R1 => 64,
        }
    }
}

impl fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JwsAlgorithm {
    type Err = InvalidReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(InvalidReason::UnsupportedAlgorithm)
    }
}

/// The protected header of a JWS.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct JwsHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x5c: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsHeader {
    /// Creates a header for `alg` with no other members.
    pub fn new(alg: JwsAlgorithm) -> Self {
        Self {
            alg: alg.as_str().to_owned(),
            x5c: None,
            typ: None,
            kid: None,
        }
    }

    /// Sets the `x5c` member from a leaf-first certificate chain.
    #[must_use]
    pub fn with_x5c(mut self, chain: &[Certificate]) -> Self {
        self.x5c = Some(
            chain
                .iter()
                .map(|c| Base64::encode_string(c.as_bytes()))
                .collect(),
        );
        self
    }

    /// Sets the `typ` member.
    #[must_use]
    pub fn with_typ(mut self, typ: impl Into<String>) -> Self {
        self.typ = Some(typ.into());
        self
    }

    /// Sets the `kid` member.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// The raw `alg` value.
    pub fn alg(&self) -> &str {
        &self.alg
    }

    /// The raw `x5c` entries (standard base64 DER, leaf first).
    pub fn x5c(&self) -> Option<&[String]> {
        self.x5c.as_deref()
    }

    /// The `typ` value.
    pub fn typ(&self) -> Option<&str> {
        self.typ.as_deref()
    }

    /// The `kid` value.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Resolves `alg` against the accepted algorithms.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidReason::UnsupportedAlgorithm`] for any other value.
    pub fn algorithm(&self) -> Result<JwsAlgorithm, InvalidReason> {
        self.alg.parse()
    }

    /// Decodes the `x5c` chain.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidReason::MissingCertificateChain`] if the member is
    /// missing, empty, too long or holds an undecodable certificate.
    pub fn certificate_chain(&self) -> Result<Vec<Certificate>, InvalidReason> {
        match self.x5c.as_deref() {
            Some(x5c) if !x5c.is_empty() => {
                certificates_from_x5c(x5c).map_err(|_| InvalidReason::MissingCertificateChain)
            }
            _ => Err(InvalidReason::MissingCertificateChain),
        }
    }
}

/// A parsed, not yet verified, compact JWS.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JwsEnvelope {
    protected_header_b64: String,
    payload_b64: String,
    signature_b64: String,
    header: JwsHeader,
}

impl JwsEnvelope {
    /// Splits a compact JWS and decodes its protected header.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidReason::MalformedEnvelope`] unless the input has exactly
    /// three dot-separated segments and a base64url JSON header.
    pub fn parse(raw: &str) -> Result<Self, InvalidReason> {
        let mut parts = raw.trim().split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(InvalidReason::MalformedEnvelope);
        };

        let header_json = decode_b64url_to_vec(header_b64, MAX_HEADER_SIZE)
            .ok_or(InvalidReason::MalformedEnvelope)?;
        let header: JwsHeader =
            serde_json::from_slice(&header_json).map_err(|_| InvalidReason::MalformedEnvelope)?;

        Ok(Self {
            protected_header_b64: header_b64.to_owned(),
            payload_b64: payload_b64.to_owned(),
            signature_b64: signature_b64.to_owned(),
            header,
        })
    }

    /// The decoded protected header.
    pub const fn header(&self) -> &JwsHeader {
        &self.header
    }

    /// The base64url protected header segment.
    pub fn protected_header_b64(&self) -> &str {
        &self.protected_header_b64
    }

    /// The base64url payload segment.
    pub fn payload_b64(&self) -> &str {
        &self.payload_b64
    }

    /// The base64url signature segment.
    pub fn signature_b64(&self) -> &str {
        &self.signature_b64
    }

    fn signing_input(&self) -> String {
        format!("{}.{}", self.protected_header_b64, self.payload_b64)
    }
}

/// Verifies compact JWS signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwsVerifier;

impl JwsVerifier {
    /// Parses `raw`, verifies it with `key` and deserializes the payload.
    pub fn parse_and_verify<T, K>(raw: &str, key: &PKeyRef<K>) -> VerificationResult<T>
    where
        T: DeserializeOwned,
        K: HasPublic,
    {
        match JwsEnvelope::parse(raw) {
            Ok(envelope) => Self::verify_envelope(&envelope, key),
            Err(reason) => VerificationResult::Invalid(reason),
        }
    }

    /// Verifies an already parsed envelope with `key` and deserializes the payload.
    pub fn verify_envelope<T, K>(envelope: &JwsEnvelope, key: &PKeyRef<K>) -> VerificationResult<T>
    where
        T: DeserializeOwned,
        K: HasPublic,
    {
        Self::verify_inner(envelope, key).into()
    }

    fn verify_inner<T, K>(envelope: &JwsEnvelope, key: &PKeyRef<K>) -> Result<T, InvalidReason>
    where
        T: DeserializeOwned,
        K: HasPublic,
    {
        let alg = envelope.header.algorithm()?;
        let curve = curves::curve_for(alg).ok_or(InvalidReason::UnsupportedAlgorithm)?;

        let signature = decode_b64url_to_vec(&envelope.signature_b64, MAX_HEADER_SIZE)
            .ok_or(InvalidReason::SignatureMismatch)?;
        let ec_key = key.ec_key().map_err(|_| InvalidReason::SignatureMismatch)?;

        if !verify_raw_signature(
            alg,
            curve,
            envelope.signing_input().as_bytes(),
            &signature,
            &ec_key,
        ) {
            return Err(InvalidReason::SignatureMismatch);
        }

        let payload = decode_b64url_to_vec(&envelope.payload_b64, MAX_PAYLOAD_SIZE)
            .ok_or(InvalidReason::MalformedPayload)?;
        serde_json::from_slice(&payload).map_err(|_| InvalidReason::MalformedPayload)
    }
}

fn verify_raw_signature<K: HasPublic>(
    alg: JwsAlgorithm,
    curve: Nid,
    signing_input: &[u8],
    signature: &[u8],
    key: &EcKeyRef<K>,
) -> bool {
    if key.group().curve_name() != Some(curve) {
        return false;
    }
    let n = alg.coordinate_len();
    if signature.len() != 2 * n {
        return false;
    }

    let (r, s) = signature.split_at(n);
    let Ok(sig) = BigNum::from_slice(r)
        .and_then(|r| BigNum::from_slice(s).map(|s| (r, s)))
        .and_then(|(r, s)| EcdsaSig::from_private_components(r, s))
    else {
        return false;
    };
    let Ok(digest) = hash(alg.digest(), signing_input) else {
        return false;
    };
    sig.verify(&digest, key).unwrap_or(false)
}

/// Errors that can arise producing a JWS with [`sign_compact`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JwsSignError {
    /// The header names an algorithm that is not supported.
    #[error("unsupported JWS algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The private key is not an EC key on the algorithm's curve.
    #[error("signing key does not match algorithm {0}")]
    KeyMismatch(JwsAlgorithm),

    /// The header could not be serialized.
    #[error("cannot serialize JWS header")]
    Header(#[from] serde_json::Error),

    /// The crypto provider failed.
    #[error("crypto provider error")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Produces a compact JWS over `payload` with the algorithm named in `header`.
///
/// # Errors
///
/// Returns a [`JwsSignError`] if the algorithm is unsupported, the key is on
/// another curve, or the crypto provider fails.
pub fn sign_compact(
    header: &JwsHeader,
    payload: &[u8],
    key: &PKeyRef<Private>,
) -> Result<String, JwsSignError> {
    let alg = JwsAlgorithm::parse(header.alg())
        .ok_or_else(|| JwsSignError::UnsupportedAlgorithm(header.alg().to_owned()))?;

    let ec_key = key.ec_key()?;
    if ec_key.group().curve_name() != Some(alg.curve_nid()) {
        return Err(JwsSignError::KeyMismatch(alg));
    }

    let header_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(header)?);
    let payload_b64 = Base64UrlUnpadded::encode_string(payload);
    let signing_input = format!("{header_b64}.{payload_b64}");

    let digest = hash(alg.digest(), signing_input.as_bytes())?;
    let sig = EcdsaSig::sign(&digest, &ec_key)?;
    let n = i32::try_from(alg.coordinate_len()).map_err(|_| JwsSignError::KeyMismatch(alg))?;
    let mut raw = sig.r().to_vec_padded(n)?;
    raw.extend(sig.s().to_vec_padded(n)?);

    Ok(format!(
        "{signing_input}.{}",
        Base64UrlUnpadded::encode_string(&raw)
    ))
}

/// Decodes base64url (no padding), rejecting segments whose decoded size
/// would exceed `max`.
fn decode_b64url_to_vec(input: &str, max: usize) -> Option<Vec<u8>> {
    // Base64url encoding expands data by ~33%, so the encoded size gives an upper bound.
    if input.len() > max / 3 * 4 + 4 {
        return None;
    }
    let decoded = Base64UrlUnpadded::decode_vec(input).ok()?;
    (decoded.len() <= max).then_some(decoded)
}
