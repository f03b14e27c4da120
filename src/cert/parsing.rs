//! Internal parsing helpers.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use base64ct::{Base64, Encoding as _};
use x509_parser::certificate::X509Certificate;
use x509_parser::error::X509Error;
use x509_parser::nom::Err;

/// Maximum number of certificates accepted in an `x5c` header.
///
/// A federation list signer chain is leaf + one or two CA certificates. The bound
/// keeps adversarial headers from forcing unbounded decoding work before the
/// signature has been checked.
pub(crate) const MAX_CERT_CHAIN_LENGTH: usize = 8;

/// Decodes the `x5c` member of a JOSE header (standard base64 DER, leaf first).
pub(crate) fn certificates_from_x5c<S: AsRef<str>>(
    x5c: &[S],
) -> Result<Vec<Certificate>, CertificateError> {
    if x5c.len() > MAX_CERT_CHAIN_LENGTH {
        return Err(CertificateError::TooManyCertificates {
            max: MAX_CERT_CHAIN_LENGTH,
        });
    }

    x5c.iter()
        .map(|entry| {
            let der = Base64::decode_vec(entry.as_ref().trim())
                .map_err(|_| CertificateError::InvalidBase64)?;
            Certificate::try_from(der)
        })
        .collect()
}

/// Splits a concatenated list of DER-encoded certificates.
///
/// Intentionally unbounded: used for trust store files, which are operator
/// supplied and may legitimately contain many anchors.
pub(crate) fn certificates_from_concatenated_der(
    der: &[u8],
) -> Result<Vec<Certificate>, CertificateError> {
    let mut rest = der;
    let mut certs = Vec::new();

    while !rest.is_empty() {
        let (new_rest, _cert) = x509_parser::parse_x509_certificate(rest).map_err(|e| match e {
            Err::Incomplete(_) => {
                CertificateError::ParseX509Certificate(X509Error::InvalidCertificate)
            }
            Err::Error(err) | Err::Failure(err) => CertificateError::ParseX509Certificate(err),
        })?;

        let cert_len = rest.len() - new_rest.len();
        certs.push(Certificate::try_from(&rest[..cert_len])?);

        rest = new_rest;
    }

    Ok(certs)
}

/// Parses the given DER-encoded bytes as an X.509 certificate.
pub(crate) fn parse_der_encoded_bytes_as_x509_certificate(
    der_bytes: &[u8],
) -> Result<X509Certificate<'_>, CertificateError> {
    match x509_parser::parse_x509_certificate(der_bytes) {
        Ok((_, cert)) => Ok(cert),
        Err(Err::Incomplete(_)) => Err(CertificateError::ParseX509Certificate(
            X509Error::InvalidCertificate,
        )),
        Err(Err::Error(e) | Err::Failure(e)) => Err(CertificateError::ParseX509Certificate(e)),
    }
}
