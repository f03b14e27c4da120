//! OCSP response decoding.

use super::{cert_id::CertId, OcspError, RevocationReason};
use crate::cert::Certificate;
use asn1::{ASN1Block, ASN1Class, OID};
use num_bigint::BigUint;
use openssl::hash::MessageDigest;
use time::OffsetDateTime;
use x509_parser::asn1_rs::{Any, Class, FromDer, Tag};

fn id_pkix_ocsp_basic() -> OID {
    asn1::oid!(1, 3, 6, 1, 5, 5, 7, 48, 1, 1)
}

/// Status of one certificate as reported by the responder.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum CertStatus {
    Good,
    Revoked(RevocationReason),
    Unknown,
}

#[derive(Debug, Clone)]
pub(crate) struct SingleResponse {
    pub(crate) cert_id: CertId,
    pub(crate) status: CertStatus,
    pub(crate) this_update: OffsetDateTime,
    pub(crate) next_update: Option<OffsetDateTime>,
}

/// A decoded `BasicOCSPResponse`.
#[derive(Debug, Clone)]
pub(crate) struct BasicResponse {
    /// Exact DER of `tbsResponseData`, the signed bytes.
    pub(crate) tbs_der: Vec<u8>,
    pub(crate) signature_algorithm: OID,
    pub(crate) signature: Vec<u8>,
    pub(crate) certs: Vec<Certificate>,
    pub(crate) responses: Vec<SingleResponse>,
}

impl BasicResponse {
    /// Digest of the response signature algorithm.
    pub(crate) fn digest(&self) -> Result<MessageDigest, OcspError> {
        signature_digest(&self.signature_algorithm).ok_or(OcspError::UnsupportedSignatureAlgorithm)
    }
}

fn signature_digest(oid: &OID) -> Option<MessageDigest> {
    let table = [
        (asn1::oid!(1, 2, 840, 10045, 4, 1), MessageDigest::sha1()),
        (asn1::oid!(1, 2, 840, 10045, 4, 3, 2), MessageDigest::sha256()),
        (asn1::oid!(1, 2, 840, 10045, 4, 3, 3), MessageDigest::sha384()),
        (asn1::oid!(1, 2, 840, 10045, 4, 3, 4), MessageDigest::sha512()),
        (asn1::oid!(1, 2, 840, 113549, 1, 1, 5), MessageDigest::sha1()),
        (asn1::oid!(1, 2, 840, 113549, 1, 1, 11), MessageDigest::sha256()),
        (asn1::oid!(1, 2, 840, 113549, 1, 1, 12), MessageDigest::sha384()),
        (asn1::oid!(1, 2, 840, 113549, 1, 1, 13), MessageDigest::sha512()),
    ];
    table
        .into_iter()
        .find_map(|(known, md)| (known == *oid).then_some(md))
}

fn malformed(what: &'static str) -> OcspError {
    OcspError::MalformedResponse(what)
}

/// A DER element together with its complete encoding.
///
/// Signature checks need the exact bytes of `tbsResponseData` and of embedded
/// certificates, which a decode/re-encode cycle would not guarantee.
struct Element<'a> {
    any: Any<'a>,
    raw: &'a [u8],
}

impl<'a> Element<'a> {
    fn is(&self, tag: Tag) -> bool {
        self.any.class() == Class::Universal && self.any.tag() == tag
    }

    fn is_context(&self, tag: u32) -> bool {
        self.any.class() == Class::ContextSpecific && self.any.tag() == Tag(tag)
    }

    fn contents(&self) -> &'a [u8] {
        self.any.data
    }
}

fn read_element(input: &[u8]) -> Option<(Element<'_>, &[u8])> {
    let (rest, any) = Any::from_der(input).ok()?;
    let raw = &input[..input.len() - rest.len()];
    Some((Element { any, raw }, rest))
}

/// Reads a SEQUENCE spanning all of `input` and splits it into its elements.
fn read_sequence(input: &[u8]) -> Option<Vec<Element<'_>>> {
    let (seq, rest) = read_element(input)?;
    if !rest.is_empty() || !seq.is(Tag::Sequence) {
        return None;
    }
    let mut contents = seq.contents();
    let mut out = Vec::new();
    while !contents.is_empty() {
        let (element, next) = read_element(contents)?;
        out.push(element);
        contents = next;
    }
    Some(out)
}

/// Decodes an `OCSPResponse`, requiring a successful basic response.
pub(crate) fn parse_response(der: &[u8]) -> Result<BasicResponse, OcspError> {
    let fields = read_sequence(der).ok_or_else(|| malformed("OCSPResponse"))?;

    let status = match fields.first() {
        Some(e) if e.is(Tag::Enumerated) && e.contents().len() == 1 => e.contents()[0],
        _ => return Err(malformed("responseStatus")),
    };
    if status != 0 {
        return Err(OcspError::Unsuccessful(status));
    }

    let response_bytes = match fields.get(1) {
        Some(e) if e.is_context(0) => e.contents(),
        _ => return Err(malformed("responseBytes")),
    };
    let basic_der = match asn1::from_der(response_bytes)
        .map_err(|_| malformed("responseBytes"))?
        .as_slice()
    {
        [ASN1Block::Sequence(_, rb)] => match rb.as_slice() {
            [ASN1Block::ObjectIdentifier(_, oid), ASN1Block::OctetString(_, bytes)] => {
                if *oid != id_pkix_ocsp_basic() {
                    return Err(OcspError::UnsupportedResponseType);
                }
                bytes.clone()
            }
            _ => return Err(malformed("responseBytes")),
        },
        _ => return Err(malformed("responseBytes")),
    };

    parse_basic(&basic_der)
}

fn parse_basic(der: &[u8]) -> Result<BasicResponse, OcspError> {
    let parts = read_sequence(der).ok_or_else(|| malformed("BasicOCSPResponse"))?;
    let [tbs, sig_alg, sig, rest @ ..] = parts.as_slice() else {
        return Err(malformed("BasicOCSPResponse"));
    };

    let signature_algorithm = match asn1::from_der(sig_alg.raw)
        .map_err(|_| malformed("signatureAlgorithm"))?
        .as_slice()
    {
        [ASN1Block::Sequence(_, alg)] => match alg.first() {
            Some(ASN1Block::ObjectIdentifier(_, oid)) => oid.clone(),
            _ => return Err(malformed("signatureAlgorithm")),
        },
        _ => return Err(malformed("signatureAlgorithm")),
    };

    // BIT STRING: leading unused-bits count, zero for signatures.
    let signature = match sig.contents().split_first() {
        Some((0, bits)) if sig.is(Tag::BitString) => bits.to_vec(),
        _ => return Err(malformed("signature")),
    };

    let certs = match rest.first() {
        Some(e) if e.is_context(0) => parse_certs(e.contents())?,
        _ => Vec::new(),
    };

    Ok(BasicResponse {
        tbs_der: tbs.raw.to_vec(),
        signature_algorithm,
        signature,
        certs,
        responses: parse_tbs(tbs.raw)?,
    })
}

fn parse_certs(contents: &[u8]) -> Result<Vec<Certificate>, OcspError> {
    read_sequence(contents)
        .ok_or_else(|| malformed("certs"))?
        .iter()
        .map(|c| Certificate::try_from(c.raw).map_err(OcspError::from))
        .collect()
}

fn parse_tbs(der: &[u8]) -> Result<Vec<SingleResponse>, OcspError> {
    let blocks = asn1::from_der(der).map_err(|_| malformed("tbsResponseData"))?;
    let [ASN1Block::Sequence(_, items)] = blocks.as_slice() else {
        return Err(malformed("tbsResponseData"));
    };

    // version [0] and responderID [1]/[2] precede producedAt.
    let mut items = items
        .iter()
        .skip_while(|b| context_tag(b).is_some());
    match items.next() {
        Some(ASN1Block::GeneralizedTime(..)) => {}
        _ => return Err(malformed("producedAt")),
    }
    let Some(ASN1Block::Sequence(_, responses)) = items.next() else {
        return Err(malformed("responses"));
    };

    responses.iter().map(parse_single).collect()
}

fn parse_single(block: &ASN1Block) -> Result<SingleResponse, OcspError> {
    let ASN1Block::Sequence(_, fields) = block else {
        return Err(malformed("SingleResponse"));
    };
    let [cert_id, status, ASN1Block::GeneralizedTime(_, this_update), rest @ ..] =
        fields.as_slice()
    else {
        return Err(malformed("SingleResponse"));
    };

    let cert_id = CertId::from_block(cert_id).ok_or_else(|| malformed("certID"))?;
    let status = parse_cert_status(status)?;

    let mut next_update = None;
    for field in rest {
        if let Some((0, inner)) = context_fields(field) {
            match inner.as_slice() {
                [ASN1Block::GeneralizedTime(_, t)] => next_update = Some(t.assume_utc()),
                _ => return Err(malformed("nextUpdate")),
            }
        }
    }

    Ok(SingleResponse {
        cert_id,
        status,
        this_update: this_update.assume_utc(),
        next_update,
    })
}

fn parse_cert_status(block: &ASN1Block) -> Result<CertStatus, OcspError> {
    match context_fields(block) {
        Some((0, _)) => Ok(CertStatus::Good),
        Some((1, revoked_info)) => {
            let reason = revoked_info
                .iter()
                .find_map(|f| match context_fields(f) {
                    Some((0, inner)) => match inner.as_slice() {
                        [ASN1Block::Unknown(ASN1Class::Universal, false, _, tag, code)]
                            if *tag == BigUint::from(Tag::Enumerated.0) && code.len() == 1 =>
                        {
                            Some(RevocationReason::from_code(code[0]))
                        }
                        _ => None,
                    },
                    _ => None,
                })
                .unwrap_or(RevocationReason::Unspecified);
            Ok(CertStatus::Revoked(reason))
        }
        Some((2, _)) => Ok(CertStatus::Unknown),
        _ => Err(malformed("certStatus")),
    }
}

fn context_tag(block: &ASN1Block) -> Option<u64> {
    match block {
        ASN1Block::Explicit(ASN1Class::ContextSpecific, _, tag, _)
        | ASN1Block::Unknown(ASN1Class::ContextSpecific, _, _, tag, _) => {
            tag.to_u64_digits().first().copied().or(Some(0))
        }
        _ => None,
    }
}

/// Returns the tag number and inner elements of a context-specific element.
///
/// The decoder yields a single-child constructed element as `Explicit` and
/// everything else as raw `Unknown` contents, so both are normalised here.
/// Primitive elements have no inner elements.
fn context_fields(block: &ASN1Block) -> Option<(u64, Vec<ASN1Block>)> {
    let tag = context_tag(block)?;
    match block {
        ASN1Block::Explicit(_, _, _, inner) => Some((tag, vec![(**inner).clone()])),
        ASN1Block::Unknown(_, true, _, _, body) => Some((tag, asn1::from_der(body).ok()?)),
        ASN1Block::Unknown(_, false, _, _, _) => Some((tag, Vec::new())),
        _ => None,
    }
}
