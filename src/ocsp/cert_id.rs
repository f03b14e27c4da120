//! The OCSP `CertID` structure.

use super::OcspError;
use crate::cert::CertInfo;
use asn1::{ASN1Block, OID};
use num_bigint::BigInt;
use openssl::hash::{hash, MessageDigest};

/// Hash algorithm used to build the `CertID` of a request.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum CertIdHash {
    /// SHA-1, understood by every responder.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
}

impl CertIdHash {
    fn oid(self) -> OID {
        match self {
            Self::Sha1 => asn1::oid!(1, 3, 14, 3, 2, 26),
            Self::Sha256 => asn1::oid!(2, 16, 840, 1, 101, 3, 4, 2, 1),
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Sha256 => MessageDigest::sha256(),
        }
    }
}

/// `parameters` of an `AlgorithmIdentifier`.
#[derive(Debug, Clone, Eq, PartialEq)]
enum AlgorithmParams {
    Absent,
    Null,
    Other(Vec<u8>),
}

impl AlgorithmParams {
    /// Absent parameters and an explicit NULL are interchangeable encodings.
    fn equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Absent | Self::Null, Self::Absent | Self::Null) => true,
            (Self::Other(a), Self::Other(b)) => a == b,
            _ => false,
        }
    }
}

/// Identifies a certificate towards an OCSP responder.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CertId {
    hash_algorithm: OID,
    params: AlgorithmParams,
    issuer_name_hash: Vec<u8>,
    issuer_key_hash: Vec<u8>,
    serial: BigInt,
}

impl CertId {
    /// Builds the `CertID` of `subject`, issued by `issuer`.
    pub(crate) fn new(
        alg: CertIdHash,
        subject: &CertInfo,
        issuer: &CertInfo,
    ) -> Result<Self, OcspError> {
        let md = alg.digest();
        Ok(Self {
            hash_algorithm: alg.oid(),
            params: AlgorithmParams::Null,
            issuer_name_hash: hash(md, &issuer.subject_der)?.to_vec(),
            issuer_key_hash: hash(md, &issuer.subject_public_key)?.to_vec(),
            serial: BigInt::from_signed_bytes_be(&subject.serial),
        })
    }

    /// Returns `true` if both identify the same certificate with the same hash algorithm.
    pub(crate) fn matches(&self, other: &Self) -> bool {
        self.hash_algorithm == other.hash_algorithm
            && self.params.equivalent(&other.params)
            && self.issuer_name_hash == other.issuer_name_hash
            && self.issuer_key_hash == other.issuer_key_hash
            && self.serial == other.serial
    }

    pub(crate) fn to_block(&self) -> ASN1Block {
        let mut alg = vec![ASN1Block::ObjectIdentifier(0, self.hash_algorithm.clone())];
        match &self.params {
            AlgorithmParams::Absent => {}
            AlgorithmParams::Null => alg.push(ASN1Block::Null(0)),
            AlgorithmParams::Other(der) => {
                if let Ok(mut blocks) = asn1::from_der(der) {
                    alg.append(&mut blocks);
                }
            }
        }

        ASN1Block::Sequence(
            0,
            vec![
                ASN1Block::Sequence(0, alg),
                ASN1Block::OctetString(0, self.issuer_name_hash.clone()),
                ASN1Block::OctetString(0, self.issuer_key_hash.clone()),
                ASN1Block::Integer(0, self.serial.clone()),
            ],
        )
    }

    pub(crate) fn from_block(block: &ASN1Block) -> Option<Self> {
        let ASN1Block::Sequence(_, fields) = block else {
            return None;
        };
        let [ASN1Block::Sequence(_, alg), ASN1Block::OctetString(_, name_hash), ASN1Block::OctetString(_, key_hash), ASN1Block::Integer(_, serial)] =
            fields.as_slice()
        else {
            return None;
        };

        let (hash_algorithm, params) = match alg.as_slice() {
            [ASN1Block::ObjectIdentifier(_, oid)] => (oid.clone(), AlgorithmParams::Absent),
            [ASN1Block::ObjectIdentifier(_, oid), ASN1Block::Null(_)] => {
                (oid.clone(), AlgorithmParams::Null)
            }
            [ASN1Block::ObjectIdentifier(_, oid), other] => (
                oid.clone(),
                AlgorithmParams::Other(asn1::to_der(other).ok()?),
            ),
            _ => return None,
        };

        Some(Self {
            hash_algorithm,
            params,
            issuer_name_hash: name_hash.clone(),
            issuer_key_hash: key_hash.clone(),
            serial: serial.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn without_params(mut self) -> Self {
        self.params = AlgorithmParams::Absent;
        self
    }

    #[cfg(test)]
    pub(crate) fn serial_bytes(&self) -> Vec<u8> {
        self.serial.to_signed_bytes_be()
    }

    #[cfg(test)]
    pub(crate) fn with_serial(mut self, serial: i64) -> Self {
        self.serial = BigInt::from(serial);
        self
    }
}
