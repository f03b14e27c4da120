//! Error types for certificate decoding and inspection.

use x509_parser::error::X509Error;

/// An error that may arise decoding or inspecting X.509 certificates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CertificateError {
    /// Error returned by the X.509 parsing library.
    #[error("failed parsing X.509 certificate")]
    ParseX509Certificate(#[from] X509Error),

    /// An `x5c` entry or PEM body was not valid base64.
    #[error("certificate is not valid base64")]
    InvalidBase64,

    /// The certificate chain is longer than this crate is willing to process.
    #[error("certificate chain has too many entries (max {max})")]
    TooManyCertificates {
        /// Maximum number of certificates accepted in one chain.
        max: usize,
    },

    /// An extension is present but its content could not be parsed.
    #[error("certificate extension {extension} could not be parsed")]
    UnparseableExtension {
        /// Name of the offending extension.
        extension: &'static str,
    },

    /// The crypto provider rejected the certificate or its public key.
    #[error("crypto provider error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}
