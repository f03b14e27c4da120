//! OCSP request encoding.

use super::cert_id::CertId;
use super::OcspError;
use asn1::ASN1Block;

/// Encodes an unsigned `OCSPRequest` for a single certificate.
///
/// No nonce extension is added; responders commonly serve pre-produced
/// responses which would not echo it.
pub(crate) fn encode_request(cert_id: &CertId) -> Result<Vec<u8>, OcspError> {
    let request = ASN1Block::Sequence(0, vec![cert_id.to_block()]);
    let request_list = ASN1Block::Sequence(0, vec![request]);
    let tbs_request = ASN1Block::Sequence(0, vec![request_list]);
    let ocsp_request = ASN1Block::Sequence(0, vec![tbs_request]);
    Ok(asn1::to_der(&ocsp_request)?)
}

/// Extracts the `CertID`s of an encoded request.
#[cfg(test)]
pub(crate) fn decode_request(der: &[u8]) -> Option<Vec<CertId>> {
    let blocks = asn1::from_der(der).ok()?;
    let [ASN1Block::Sequence(_, ocsp_request)] = blocks.as_slice() else {
        return None;
    };
    let Some(ASN1Block::Sequence(_, tbs)) = ocsp_request.first() else {
        return None;
    };
    let Some(ASN1Block::Sequence(_, list)) = tbs.iter().find(|b| matches!(b, ASN1Block::Sequence(..)))
    else {
        return None;
    };
    list.iter()
        .map(|request| match request {
            ASN1Block::Sequence(_, fields) => fields.first().and_then(CertId::from_block),
            _ => None,
        })
        .collect()
}
