//! Shared fixtures: a signing PKI generated at start-up and an in-process
//! registry speaking the token, provider-authentication and list endpoints.
#![allow(dead_code)]

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use federation_sync::jws::sign_compact;
use federation_sync::ocsp::{HttpOcspResponder, OcspMethod, OcspRevocationChecker};
use federation_sync::{
    CertPathValidator, Certificate, FederationListVerifier, JwsAlgorithm, JwsHeader,
    RegistryClient, RegistryConfig, Secret, TrustAnchorSet,
};
use once_cell::sync::Lazy;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509Ref, X509};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const CLIENT_ID: &str = "fedlist-sync";
pub const CLIENT_SECRET: &str = "s3cr3t";
pub const STAGE_ONE_TOKEN: &str = "stage-one";
pub const STAGE_TWO_TOKEN: &str = "stage-two";

/// Root CA and federation list signer.
pub struct Pki {
    pub root: Certificate,
    pub signer: Certificate,
    signer_key: PKey<Private>,
}

/// The PKI trusted by [`verifier`].
pub static PKI: Lazy<Pki> = Lazy::new(Pki::generate);

impl Pki {
    pub fn generate() -> Self {
        let root_key = ec_key();
        let root = build_cert("Federation Root CA", 1, &root_key, None, &root_key, true);
        let signer_key = ec_key();
        let signer = build_cert(
            "Federation List Signer",
            2,
            &signer_key,
            Some(&*root),
            &root_key,
            false,
        );
        Self {
            root: Certificate::try_from(root.to_der().unwrap()).unwrap(),
            signer: Certificate::try_from(signer.to_der().unwrap()).unwrap(),
            signer_key,
        }
    }

    pub fn anchors(&self) -> Arc<TrustAnchorSet> {
        Arc::new(TrustAnchorSet::new(vec![self.root.clone()]).unwrap())
    }

    /// Signs a list with the given version and `(domain, isInsurance, telematikID)` entries.
    pub fn sign_list(&self, version: i64, domains: &[(&str, bool, &str)]) -> String {
        let payload = json!({
            "version": version,
            "domainList": domains
                .iter()
                .map(|(domain, is_insurance, telematik_id)| json!({
                    "domain": domain,
                    "isInsurance": is_insurance,
                    "telematikID": telematik_id,
                }))
                .collect::<Vec<_>>(),
        });
        let header = JwsHeader::new(JwsAlgorithm::BP256R1)
            .with_x5c(&[self.signer.clone(), self.root.clone()])
            .with_typ("JWT");
        sign_compact(&header, &serde_json::to_vec(&payload).unwrap(), &self.signer_key).unwrap()
    }
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::BRAINPOOL_P256R1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn build_cert(
    cn: &str,
    serial: u32,
    key: &PKey<Private>,
    issuer: Option<&X509Ref>,
    issuer_key: &PKey<Private>,
    ca: bool,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder
        .set_issuer_name(issuer.map_or(&*name, |i| i.subject_name()))
        .unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
    } else {
        builder
            .append_extension(KeyUsage::new().digital_signature().build().unwrap())
            .unwrap();
    }
    builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Verifier trusting [`PKI`], with revocation checking disabled.
pub fn verifier() -> FederationListVerifier {
    let responder =
        HttpOcspResponder::new(OcspMethod::Auto, Duration::from_secs(1), Duration::from_secs(1))
            .unwrap();
    let validator = CertPathValidator::new(OcspRevocationChecker::new(Arc::new(responder)));
    FederationListVerifier::new(PKI.anchors(), validator, false)
}

/// Knobs and recordings of a [`MockRegistry`].
pub struct RegistryState {
    pub token_status: AtomicU16,
    pub token_body: Mutex<Option<String>>,
    pub auth_status: AtomicU16,
    pub list_status: AtomicU16,
    pub list: Mutex<Option<(i64, String)>>,
    /// Serve the list even if the caller already has its version.
    pub ignore_version: AtomicBool,
    pub list_delay: Mutex<Duration>,
    pub add_status: AtomicU16,
    pub delete_status: AtomicU16,
    /// `version` query parameter of every list request.
    pub fetches: Mutex<Vec<Option<String>>>,
    pub added: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<String>>,
    /// OCSP requests received; every one is answered with 503.
    pub ocsp_requests: AtomicUsize,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            token_status: AtomicU16::new(200),
            token_body: Mutex::new(None),
            auth_status: AtomicU16::new(200),
            list_status: AtomicU16::new(200),
            list: Mutex::new(None),
            ignore_version: AtomicBool::new(false),
            list_delay: Mutex::new(Duration::ZERO),
            add_status: AtomicU16::new(201),
            delete_status: AtomicU16::new(204),
            fetches: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            ocsp_requests: AtomicUsize::new(0),
        }
    }
}

/// In-process registry and token endpoint on `127.0.0.1`.
pub struct MockRegistry {
    pub state: Arc<RegistryState>,
    pub service_url: Url,
    pub token_url: Url,
}

impl MockRegistry {
    pub async fn start() -> Self {
        let state = Arc::new(RegistryState::default());
        let app = Router::new()
            .route("/oauth/token", post(token))
            .route("/ti-provider-authenticate", get(provider_authenticate))
            .route("/federation-list", get(federation_list))
            .route("/add-domain", post(add_domain))
            .route("/delete-domain/:domain", delete(delete_domain))
            .route("/ocsp", post(ocsp))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            service_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            token_url: Url::parse(&format!("http://{addr}/oauth/token")).unwrap(),
        }
    }

    pub fn config(&self) -> RegistryConfig {
        RegistryConfig::new(
            self.service_url.clone(),
            self.token_url.clone(),
            CLIENT_ID,
            Secret::new(CLIENT_SECRET),
        )
        .with_auth_timeout(Duration::from_secs(5))
        .with_fetch_timeout(Duration::from_secs(5))
    }

    pub fn client(&self) -> RegistryClient {
        RegistryClient::new(self.config()).unwrap()
    }

    pub fn publish(&self, version: i64, jws: String) {
        *self.state.list.lock().unwrap() = Some((version, jws));
    }

    pub fn fetches(&self) -> Vec<Option<String>> {
        self.state.fetches.lock().unwrap().clone()
    }

    /// Verifier trusting [`PKI`] that checks revocation at this server's
    /// unavailable OCSP endpoint.
    pub fn revocation_checking_verifier(&self) -> FederationListVerifier {
        let responder = HttpOcspResponder::new(
            OcspMethod::Post,
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .unwrap();
        let validator = CertPathValidator::new(OcspRevocationChecker::new(Arc::new(responder)))
            .with_responder_uri(self.service_url.join("ocsp").unwrap().to_string());
        FederationListVerifier::new(PKI.anchors(), validator, true)
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn status(code: &AtomicU16) -> StatusCode {
    StatusCode::from_u16(code.load(Ordering::SeqCst)).unwrap()
}

async fn token(
    State(state): State<Arc<RegistryState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let code = status(&state.token_status);
    if code != StatusCode::OK {
        return code.into_response();
    }
    let field = |name: &str| form.get(name).map(String::as_str);
    if field("grant_type") != Some("client_credentials")
        || field("client_id") != Some(CLIENT_ID)
        || field("client_secret") != Some(CLIENT_SECRET)
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(body) = state.token_body.lock().unwrap().clone() {
        return body.into_response();
    }
    Json(json!({
        "access_token": STAGE_ONE_TOKEN,
        "token_type": "Bearer",
        "expires_in": 300,
    }))
    .into_response()
}

async fn provider_authenticate(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
) -> Response {
    if bearer(&headers) != Some(STAGE_ONE_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let code = status(&state.auth_status);
    if code != StatusCode::OK {
        return code.into_response();
    }
    STAGE_TWO_TOKEN.into_response()
}

async fn federation_list(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if bearer(&headers) != Some(STAGE_TWO_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let requested = query.get("version").cloned();
    state.fetches.lock().unwrap().push(requested.clone());

    let delay = *state.list_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let code = status(&state.list_status);
    if code != StatusCode::OK {
        return code.into_response();
    }

    let known = requested.and_then(|v| v.parse::<i64>().ok());
    let ignore_version = state.ignore_version.load(Ordering::SeqCst);
    let list = state.list.lock().unwrap().clone();
    match list {
        Some((version, body)) if ignore_version || known.map_or(true, |k| version > k) => {
            body.into_response()
        }
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn add_domain(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Json(entry): Json<Value>,
) -> StatusCode {
    if bearer(&headers) != Some(STAGE_TWO_TOKEN) {
        return StatusCode::UNAUTHORIZED;
    }
    state.added.lock().unwrap().push(entry);
    status(&state.add_status)
}

async fn delete_domain(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> StatusCode {
    if bearer(&headers) != Some(STAGE_TWO_TOKEN) {
        return StatusCode::UNAUTHORIZED;
    }
    state.deleted.lock().unwrap().push(domain);
    status(&state.delete_status)
}

async fn ocsp(State(state): State<Arc<RegistryState>>) -> StatusCode {
    state.ocsp_requests.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}
