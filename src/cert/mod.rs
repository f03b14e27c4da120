//! `Certificate` type and helpers.
//!
//! [`Certificate`] wraps DER bytes and validates them at construction time. The
//! verification pipeline reads the handful of fields it needs through
//! [`CertInfo`], which is extracted once per certificate and validation run.

use crate::cert::error::CertificateError;
use crate::cert::parsing::{
    certificates_from_concatenated_der, parse_der_encoded_bytes_as_x509_certificate,
};
use openssl::pkey::{PKey, Public};
use openssl::x509::{X509VerifyResult, X509};
use std::fmt;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::asn1_rs::Oid;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::{
    OID_PKIX_AUTHORITY_INFO_ACCESS, OID_X509_EXT_AUTHORITY_KEY_IDENTIFIER,
    OID_X509_EXT_BASIC_CONSTRAINTS, OID_X509_EXT_CERTIFICATE_POLICIES,
    OID_X509_EXT_EXTENDED_KEY_USAGE, OID_X509_EXT_KEY_USAGE, OID_X509_EXT_SUBJECT_ALT_NAME,
    OID_X509_EXT_SUBJECT_KEY_IDENTIFIER,
};

pub mod error;
pub(crate) mod parsing;

const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// Extensions whose meaning path validation either checks or can ignore
/// safely when marked critical.
const KNOWN_CRITICAL_EXTENSIONS: [Oid<'static>; 8] = [
    OID_X509_EXT_BASIC_CONSTRAINTS,
    OID_X509_EXT_KEY_USAGE,
    OID_X509_EXT_EXTENDED_KEY_USAGE,
    OID_X509_EXT_SUBJECT_ALT_NAME,
    OID_X509_EXT_SUBJECT_KEY_IDENTIFIER,
    OID_X509_EXT_AUTHORITY_KEY_IDENTIFIER,
    OID_X509_EXT_CERTIFICATE_POLICIES,
    OID_PKIX_AUTHORITY_INFO_ACCESS,
];

/// A single DER-encoded X.509 certificate.
///
/// Invariant: instances are always validated as parseable DER-encoded X.509.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    /// Returns the certificate bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses every certificate of a PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns a [`CertificateError`] if the bundle is not PEM or a certificate
    /// inside it cannot be parsed.
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Vec<Self>, CertificateError> {
        X509::stack_from_pem(pem)?
            .iter()
            .map(|cert| Self::try_from(cert.to_der()?))
            .collect()
    }

    /// Parses a concatenation of DER-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns a [`CertificateError`] if any certificate cannot be parsed.
    pub fn from_der_bundle(der: &[u8]) -> Result<Vec<Self>, CertificateError> {
        certificates_from_concatenated_der(der)
    }

    /// Returns the subject public key of the certificate.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::Crypto`] if the key cannot be loaded by the crypto provider.
    pub fn public_key(&self) -> Result<PKey<Public>, CertificateError> {
        Ok(self.to_openssl()?.public_key()?)
    }

    /// Returns a stable identifier (subject and serial) for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns a [`CertificateError`] for parsing errors.
    pub fn identifier(&self) -> Result<CertIdentifier, CertificateError> {
        let x509 = parse_der_encoded_bytes_as_x509_certificate(self.as_bytes())?;
        Ok(identifier_of(&x509))
    }

    /// Returns `true` if `issuer` names this certificate's issuer and its key
    /// verifies this certificate's signature.
    ///
    /// Any provider error counts as "not issued by".
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        let (Ok(subject), Ok(issuer)) = (self.to_openssl(), issuer.to_openssl()) else {
            return false;
        };
        if issuer.issued(&subject) != X509VerifyResult::OK {
            return false;
        }
        issuer
            .public_key()
            .and_then(|key| subject.verify(&key))
            .unwrap_or(false)
    }

    pub(crate) fn to_openssl(&self) -> Result<X509, CertificateError> {
        Ok(X509::from_der(&self.0)?)
    }

    /// Extracts the fields used by path validation and revocation checking.
    pub(crate) fn info(&self) -> Result<CertInfo, CertificateError> {
        let x509 = parse_der_encoded_bytes_as_x509_certificate(self.as_bytes())?;

        let validity = x509.validity();
        let not_before = validity.not_before.to_datetime();
        let not_after = validity.not_after.to_datetime();

        let (is_ca, path_len) = match x509.basic_constraints() {
            Ok(Some(bc)) => (bc.value.ca, bc.value.path_len_constraint),
            Ok(None) => (false, None),
            Err(_) => {
                return Err(CertificateError::UnparseableExtension {
                    extension: "BasicConstraints",
                })
            }
        };

        // Without a keyUsage extension every usage is permitted.
        let key_cert_sign = match x509.key_usage() {
            Ok(Some(ku)) => ku.value.key_cert_sign(),
            Ok(None) => true,
            Err(_) => {
                return Err(CertificateError::UnparseableExtension {
                    extension: "KeyUsage",
                })
            }
        };

        let unknown_critical_extension = x509
            .extensions()
            .iter()
            .find(|ext| ext.critical && !KNOWN_CRITICAL_EXTENSIONS.iter().any(|known| *known == ext.oid))
            .map(|ext| ext.oid.to_id_string());

        let ocsp_signing = match x509.extended_key_usage() {
            Ok(Some(eku)) => eku.value.ocsp_signing,
            Ok(None) => false,
            Err(_) => {
                return Err(CertificateError::UnparseableExtension {
                    extension: "ExtendedKeyUsage",
                })
            }
        };

        Ok(CertInfo {
            identifier: identifier_of(&x509),
            subject_der: x509.subject().as_raw().to_vec(),
            subject_public_key: x509.public_key().subject_public_key.data.to_vec(),
            serial: x509.raw_serial().to_vec(),
            not_before,
            not_after,
            is_ca,
            path_len,
            key_cert_sign,
            ocsp_signing,
            unknown_critical_extension,
            ocsp_url: ocsp_url_of(&x509),
        })
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: &[u8]) -> Result<Self, Self::Error> {
        parse_der_encoded_bytes_as_x509_certificate(der_bytes)?;
        Ok(Self(Vec::from(der_bytes)))
    }
}

impl TryFrom<Vec<u8>> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: Vec<u8>) -> Result<Self, Self::Error> {
        parse_der_encoded_bytes_as_x509_certificate(&der_bytes)?;
        Ok(Self(der_bytes))
    }
}

/// Identifies a certificate in diagnostics and revocation failures.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CertIdentifier {
    subject: String,
    serial: String,
}

impl CertIdentifier {
    /// Returns the subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the serial number as colon separated hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl fmt::Display for CertIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject=\"{}\" serial={}", self.subject, self.serial)
    }
}

/// Fields of a certificate needed by path validation and OCSP.
#[derive(Debug, Clone)]
pub(crate) struct CertInfo {
    pub(crate) identifier: CertIdentifier,
    pub(crate) subject_der: Vec<u8>,
    // Contents of the subjectPublicKey BIT STRING (no tag, length or unused-bits byte).
    pub(crate) subject_public_key: Vec<u8>,
    pub(crate) serial: Vec<u8>,
    pub(crate) not_before: OffsetDateTime,
    pub(crate) not_after: OffsetDateTime,
    pub(crate) is_ca: bool,
    pub(crate) path_len: Option<u32>,
    pub(crate) key_cert_sign: bool,
    pub(crate) ocsp_signing: bool,
    // OID of the first critical extension not in `KNOWN_CRITICAL_EXTENSIONS`.
    pub(crate) unknown_critical_extension: Option<String>,
    pub(crate) ocsp_url: Option<String>,
}

impl CertInfo {
    pub(crate) fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Whether the certificate may issue other certificates on a path.
    pub(crate) fn can_issue(&self) -> bool {
        self.is_ca && self.key_cert_sign && self.unknown_critical_extension.is_none()
    }
}

fn identifier_of(x509: &X509Certificate<'_>) -> CertIdentifier {
    CertIdentifier {
        subject: x509.subject().to_string(),
        serial: x509.raw_serial_as_string(),
    }
}

fn ocsp_url_of(x509: &X509Certificate<'_>) -> Option<String> {
    x509.extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::AuthorityInfoAccess(aia) => {
                aia.accessdescs.iter().find_map(|desc| {
                    match (&desc.access_location, desc.access_method.to_id_string()) {
                        (GeneralName::URI(uri), method) if method == OID_AD_OCSP => {
                            Some((*uri).to_owned())
                        }
                        _ => None,
                    }
                })
            }
            _ => None,
        })
}

#[cfg(test)]
pub(crate) mod testing;
