//! Certificate factory for unit tests.

use super::Certificate;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509};
use time::OffsetDateTime;

const DAY: i64 = 24 * 60 * 60;

pub(crate) fn ec_key(curve: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(curve).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub(crate) struct CertBuilder {
    cn: String,
    serial: u32,
    ca: Option<Option<u32>>,
    valid_from_days: i64,
    valid_to_days: i64,
    ocsp_url: Option<String>,
    ocsp_signing: bool,
    key_cert_sign: bool,
    critical_oid: Option<String>,
}

impl CertBuilder {
    pub(crate) fn new(cn: &str, serial: u32) -> Self {
        Self {
            cn: cn.to_owned(),
            serial,
            ca: None,
            valid_from_days: -1,
            valid_to_days: 365,
            ocsp_url: None,
            ocsp_signing: false,
            key_cert_sign: true,
            critical_oid: None,
        }
    }

    pub(crate) fn ca(mut self, path_len: Option<u32>) -> Self {
        self.ca = Some(path_len);
        self
    }

    pub(crate) fn validity_days(mut self, from: i64, to: i64) -> Self {
        self.valid_from_days = from;
        self.valid_to_days = to;
        self
    }

    pub(crate) fn ocsp_url(mut self, url: &str) -> Self {
        self.ocsp_url = Some(url.to_owned());
        self
    }

    pub(crate) fn ocsp_signing(mut self) -> Self {
        self.ocsp_signing = true;
        self
    }

    /// A CA whose keyUsage lacks keyCertSign.
    pub(crate) fn without_cert_sign(mut self) -> Self {
        self.key_cert_sign = false;
        self
    }

    /// Adds a critical extension with the given OID and a NULL value.
    pub(crate) fn critical_extension(mut self, oid: &str) -> Self {
        self.critical_oid = Some(oid.to_owned());
        self
    }

    pub(crate) fn self_signed(self, key: &PKey<Private>) -> Certificate {
        self.build(key, None, key)
    }

    pub(crate) fn issued_by(
        self,
        key: &PKey<Private>,
        issuer: &Certificate,
        issuer_key: &PKey<Private>,
    ) -> Certificate {
        let issuer = issuer.to_openssl().unwrap();
        self.build(key, Some(&issuer), issuer_key)
    }

    #[allow(deprecated)]
    fn build(
        self,
        key: &PKey<Private>,
        issuer: Option<&X509>,
        signing_key: &PKey<Private>,
    ) -> Certificate {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", &self.cn).unwrap();
        name.append_entry_by_text("O", "federation-sync tests")
            .unwrap();
        let name = name.build();

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut b = X509Builder::new().unwrap();
        b.set_version(2).unwrap();
        let serial = BigNum::from_u32(self.serial).unwrap().to_asn1_integer().unwrap();
        b.set_serial_number(&serial).unwrap();
        b.set_subject_name(&name).unwrap();
        match issuer {
            Some(issuer) => b.set_issuer_name(issuer.subject_name()).unwrap(),
            None => b.set_issuer_name(&name).unwrap(),
        }
        b.set_pubkey(key).unwrap();
        b.set_not_before(&Asn1Time::from_unix(now + self.valid_from_days * DAY).unwrap())
            .unwrap();
        b.set_not_after(&Asn1Time::from_unix(now + self.valid_to_days * DAY).unwrap())
            .unwrap();

        match self.ca {
            Some(path_len) => {
                let mut bc = BasicConstraints::new();
                bc.critical().ca();
                if let Some(n) = path_len {
                    bc.pathlen(n);
                }
                b.append_extension(bc.build().unwrap()).unwrap();
                let mut ku = KeyUsage::new();
                ku.critical().crl_sign();
                if self.key_cert_sign {
                    ku.key_cert_sign();
                } else {
                    ku.digital_signature();
                }
                b.append_extension(ku.build().unwrap()).unwrap();
            }
            None => {
                b.append_extension(
                    KeyUsage::new()
                        .critical()
                        .digital_signature()
                        .build()
                        .unwrap(),
                )
                .unwrap();
            }
        }
        if self.ocsp_signing {
            b.append_extension(ExtendedKeyUsage::new().other("OCSPSigning").build().unwrap())
                .unwrap();
        }
        if let Some(url) = &self.ocsp_url {
            let aia =
                X509Extension::new_nid(None, None, Nid::INFO_ACCESS, &format!("OCSP;URI:{url}"))
                    .unwrap();
            b.append_extension(aia).unwrap();
        }

        if let Some(oid) = &self.critical_oid {
            let ext = X509Extension::new(None, None, oid, "critical,DER:05:00").unwrap();
            b.append_extension(ext).unwrap();
        }

        b.sign(signing_key, MessageDigest::sha256()).unwrap();
        Certificate::try_from(b.build().to_der().unwrap()).unwrap()
    }
}
