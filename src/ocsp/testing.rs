//! OCSP fixtures for unit tests: a small PKI, a response builder and an
//! in-memory responder.

use super::cert_id::{CertId, CertIdHash};
use super::{OcspError, OcspResponder, ResponderFuture};
use crate::cert::testing::{ec_key, CertBuilder};
use crate::cert::Certificate;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

pub(crate) const OCSP_URL: &str = "http://ocsp.test/ocsp";

pub(crate) struct TestPki {
    pub(crate) root: Certificate,
    pub(crate) root_key: PKey<Private>,
    pub(crate) leaf: Certificate,
    pub(crate) leaf_key: PKey<Private>,
    pub(crate) delegate: Certificate,
    pub(crate) delegate_key: PKey<Private>,
}

impl TestPki {
    pub(crate) fn new() -> Self {
        let root_key = ec_key(Nid::BRAINPOOL_P256R1);
        let root = CertBuilder::new("Test Root", 1).ca(None).self_signed(&root_key);

        let leaf_key = ec_key(Nid::BRAINPOOL_P256R1);
        let leaf = CertBuilder::new("Test Leaf", 0x1001)
            .ocsp_url(OCSP_URL)
            .issued_by(&leaf_key, &root, &root_key);

        let delegate_key = ec_key(Nid::X9_62_PRIME256V1);
        let delegate = CertBuilder::new("Test OCSP Responder", 0x2001)
            .ocsp_signing()
            .issued_by(&delegate_key, &root, &root_key);

        Self {
            root,
            root_key,
            leaf,
            leaf_key,
            delegate,
            delegate_key,
        }
    }

    pub(crate) fn leaf_cert_id(&self, hash: CertIdHash) -> CertId {
        cert_id_of(&self.leaf, &self.root, hash)
    }

    pub(crate) fn response(&self, template: ResponseTemplate) -> Vec<u8> {
        let (key, certs) = match template.signer {
            SignerChoice::Issuer => (&self.root_key, Vec::new()),
            SignerChoice::Delegate => (&self.delegate_key, vec![self.delegate.clone()]),
            SignerChoice::Key(ref key, ref certs) => (key, certs.clone()),
        };
        build_response(&template, key, &certs)
    }
}

/// Builds a response signed by `key` without embedded certificates.
pub(crate) fn response_signed_by(template: &ResponseTemplate, key: &PKey<Private>) -> Vec<u8> {
    build_response(template, key, &[])
}

pub(crate) fn cert_id_of(subject: &Certificate, issuer: &Certificate, hash: CertIdHash) -> CertId {
    CertId::new(hash, &subject.info().unwrap(), &issuer.info().unwrap()).unwrap()
}

#[derive(Clone, Copy)]
pub(crate) enum TestStatus {
    Good,
    Revoked(Option<u8>),
    Unknown,
}

pub(crate) enum SignerChoice {
    Issuer,
    Delegate,
    Key(PKey<Private>, Vec<Certificate>),
}

pub(crate) struct ResponseTemplate {
    cert_id: CertId,
    status: TestStatus,
    this_update: OffsetDateTime,
    next_update: Option<OffsetDateTime>,
    signer: SignerChoice,
}

impl ResponseTemplate {
    pub(crate) fn new(cert_id: CertId, status: TestStatus) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            cert_id,
            status,
            this_update: now - Duration::hours(1),
            next_update: Some(now + Duration::days(1)),
            signer: SignerChoice::Issuer,
        }
    }

    pub(crate) fn good(cert_id: CertId) -> Self {
        Self::new(cert_id, TestStatus::Good)
    }

    pub(crate) fn revoked(cert_id: CertId, reason: Option<u8>) -> Self {
        Self::new(cert_id, TestStatus::Revoked(reason))
    }

    pub(crate) fn unknown(cert_id: CertId) -> Self {
        Self::new(cert_id, TestStatus::Unknown)
    }

    pub(crate) fn signed_by_delegate(mut self) -> Self {
        self.signer = SignerChoice::Delegate;
        self
    }

    pub(crate) fn signed_by(mut self, key: PKey<Private>, certs: Vec<Certificate>) -> Self {
        self.signer = SignerChoice::Key(key, certs);
        self
    }

    pub(crate) fn updates(
        mut self,
        this_update: OffsetDateTime,
        next_update: Option<OffsetDateTime>,
    ) -> Self {
        self.this_update = this_update;
        self.next_update = next_update;
        self
    }
}

fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = contents.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend(bytes);
    }
    out.extend_from_slice(contents);
    out
}

fn generalized_time(t: OffsetDateTime) -> Vec<u8> {
    let s = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    );
    tlv(0x18, s.as_bytes())
}

fn build_response(template: &ResponseTemplate, key: &PKey<Private>, certs: &[Certificate]) -> Vec<u8> {
    let status = match template.status {
        TestStatus::Good => tlv(0x80, &[]),
        TestStatus::Revoked(reason) => {
            let mut info = generalized_time(template.this_update - Duration::days(2));
            if let Some(code) = reason {
                info.extend(tlv(0xa0, &tlv(0x0a, &[code])));
            }
            tlv(0xa1, &info)
        }
        TestStatus::Unknown => tlv(0x82, &[]),
    };

    let mut single = asn1::to_der(&template.cert_id.to_block()).unwrap();
    single.extend(status);
    single.extend(generalized_time(template.this_update));
    if let Some(next) = template.next_update {
        single.extend(tlv(0xa0, &generalized_time(next)));
    }
    let single = tlv(0x30, &single);

    // responderID byKey [2] EXPLICIT OCTET STRING
    let mut tbs = tlv(0xa2, &tlv(0x04, &[0u8; 20]));
    tbs.extend(generalized_time(OffsetDateTime::now_utc()));
    tbs.extend(tlv(0x30, &single));
    let tbs = tlv(0x30, &tbs);

    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.update(&tbs).unwrap();
    let signature = signer.sign_to_vec().unwrap();

    // ecdsa-with-SHA256
    let sig_alg = tlv(
        0x30,
        &tlv(0x06, &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02]),
    );
    let mut bits = vec![0u8];
    bits.extend(signature);

    let mut basic = tbs;
    basic.extend(sig_alg);
    basic.extend(tlv(0x03, &bits));
    if !certs.is_empty() {
        let list: Vec<u8> = certs.iter().flat_map(|c| c.as_bytes().to_vec()).collect();
        basic.extend(tlv(0xa0, &tlv(0x30, &list)));
    }
    let basic = tlv(0x30, &basic);

    // id-pkix-ocsp-basic
    let mut response_bytes = tlv(0x06, &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01]);
    response_bytes.extend(tlv(0x04, &basic));

    let mut response = tlv(0x0a, &[0]);
    response.extend(tlv(0xa0, &tlv(0x30, &response_bytes)));
    tlv(0x30, &response)
}

/// Serves canned responses keyed by certificate serial, recording requests.
#[derive(Default)]
pub(crate) struct MockResponder {
    responses: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    requests: AtomicUsize,
    uris: Mutex<Vec<String>>,
}

impl MockResponder {
    /// Serves `response` for requests about `subject`.
    pub(crate) fn serve(&self, subject: &Certificate, response: Vec<u8>) {
        let serial = subject.info().unwrap().serial;
        self.responses.lock().unwrap().insert(serial, response);
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }
}

impl OcspResponder for MockResponder {
    fn send<'a>(&'a self, uri: &'a str, request: &'a [u8]) -> ResponderFuture<'a> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.uris.lock().unwrap().push(uri.to_owned());

            let ids = super::request::decode_request(request)
                .ok_or(OcspError::MalformedResponse("request"))?;
            let responses = self.responses.lock().unwrap();
            responses
                .iter()
                .find(|(serial, _)| ids.iter().any(|id| id.serial_bytes() == **serial))
                .map(|(_, der)| der.clone())
                .ok_or_else(|| OcspError::Transport("no canned response".into()))
        })
    }
}
