//! Client for the remote domain registry.
//!
//! Every operation authenticates first, in two steps: an OAuth 2.0 client
//! credentials grant at the token endpoint, then a provider authentication call
//! at the registry that exchanges the first token for the one accepted by the
//! registry endpoints. Tokens are not reused across operations.

use crate::body::{read_limited, BodyError};
use crate::config::Secret;
use crate::federation::DomainEntry;
use crate::prelude::{debug, error};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

mod token;

pub use token::BearerToken;
use token::TokenResponse;

/// Default path of the provider authentication call.
pub const DEFAULT_AUTH_PATH: &str = "/ti-provider-authenticate";
/// Default path of the federation list.
pub const DEFAULT_FEDERATION_LIST_PATH: &str = "/federation-list";
/// Default path for adding a domain.
pub const DEFAULT_ADD_DOMAIN_PATH: &str = "/add-domain";
/// Default path prefix for deleting a domain.
pub const DEFAULT_DELETE_DOMAIN_PATH: &str = "/delete-domain";
/// Default upper bound of a federation list response body.
pub const DEFAULT_MAX_LIST_SIZE: usize = 32 * 1024 * 1024;

const MAX_TOKEN_RESPONSE_SIZE: usize = 64 * 1024;

/// Registry HTTP timeouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Timeout of each authentication request.
    pub auth: Duration,
    /// Timeout of list downloads and domain updates.
    pub fetch: Duration,
}

impl Default for RegistryTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            auth: Duration::from_secs(10),
            // Lists with many thousand entries take a while to render server side.
            fetch: Duration::from_secs(120),
        }
    }
}

/// Registry endpoints and credentials.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Base URL of the registry.
    pub service_url: Url,
    /// OAuth 2.0 token endpoint.
    pub token_url: Url,
    /// Provider authentication path, relative to `service_url`.
    pub auth_path: String,
    /// Federation list path, relative to `service_url`.
    pub federation_list_path: String,
    /// Add-domain path, relative to `service_url`.
    pub add_domain_path: String,
    /// Delete-domain path prefix, relative to `service_url`.
    pub delete_domain_path: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: Secret,
    /// HTTP timeouts.
    pub timeouts: RegistryTimeouts,
    /// Largest accepted federation list body, in bytes.
    pub max_list_size: usize,
}

impl RegistryConfig {
    /// Creates a configuration with the default paths and timeouts.
    pub fn new(
        service_url: Url,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: Secret,
    ) -> Self {
        Self {
            service_url,
            token_url,
            auth_path: DEFAULT_AUTH_PATH.to_owned(),
            federation_list_path: DEFAULT_FEDERATION_LIST_PATH.to_owned(),
            add_domain_path: DEFAULT_ADD_DOMAIN_PATH.to_owned(),
            delete_domain_path: DEFAULT_DELETE_DOMAIN_PATH.to_owned(),
            client_id: client_id.into(),
            client_secret,
            timeouts: RegistryTimeouts::default(),
            max_list_size: DEFAULT_MAX_LIST_SIZE,
        }
    }

    /// Sets the provider authentication path.
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    /// Sets the federation list path.
    #[must_use]
    pub fn with_federation_list_path(mut self, path: impl Into<String>) -> Self {
        self.federation_list_path = path.into();
        self
    }

    /// Sets the add-domain path.
    #[must_use]
    pub fn with_add_domain_path(mut self, path: impl Into<String>) -> Self {
        self.add_domain_path = path.into();
        self
    }

    /// Sets the delete-domain path prefix.
    #[must_use]
    pub fn with_delete_domain_path(mut self, path: impl Into<String>) -> Self {
        self.delete_domain_path = path.into();
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// Sets the timeout of each authentication request.
    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth = timeout;
        self
    }

    /// Sets the timeout of list downloads and domain updates.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.fetch = timeout;
        self
    }

    /// Sets the largest accepted federation list body.
    #[must_use]
    pub fn with_max_list_size(mut self, bytes: usize) -> Self {
        self.max_list_size = bytes;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        let base = self.service_url.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&joined).map_err(|e| RegistryError::InvalidUrl(format!("{joined}: {e}")))
    }
}

/// Authentication step that failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AuthStage {
    /// Client credentials grant at the token endpoint.
    Token,
    /// Provider authentication at the registry.
    ProviderAuthentication,
}

impl AuthStage {
    /// Returns a stable name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::ProviderAuthentication => "provider_authentication",
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`RegistryClient`].
#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum RegistryError {
    /// One of the two authentication steps was refused or returned no token.
    #[error("authentication failed at {stage}: {reason}")]
    Authentication {
        /// The failed step.
        stage: AuthStage,
        /// Status or description of the failure.
        reason: String,
    },

    /// Connection, timeout or body read failure.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The registry answered the list request with a status other than 200 or 204.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// A configured endpoint does not form a valid URL.
    #[error("invalid registry URL: {0}")]
    InvalidUrl(String),

    /// A response body exceeded the given number of bytes.
    #[error("response body exceeds {0} bytes")]
    ResponseTooLarge(usize),
}

/// Result of a federation list download.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FetchedList {
    /// A newer list; the raw compact JWS body.
    Modified(Vec<u8>),
    /// The registry has nothing newer than the requested version.
    NotModified,
}

/// Outcome of a domain add or delete.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DomainOutcome {
    /// The domain was added.
    Created,
    /// The domain was removed.
    Deleted,
    /// The registry rejected the request as malformed.
    BadRequest,
    /// The resource token was not accepted.
    Unauthorized,
    /// The client may not change this domain.
    Forbidden,
    /// The domain does not exist.
    NotFound,
    /// The domain already exists.
    Conflict,
    /// The registry failed with a 5xx status.
    ServerError,
    /// Any other status.
    Unknown,
}

impl DomainOutcome {
    /// Returns `true` if the registry is in the requested state afterwards.
    ///
    /// `NotFound` counts as success: deleting a missing domain is idempotent.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Deleted | Self::NotFound)
    }

    /// Returns a stable name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }

    fn from_add_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200 | 201 => Self::Created,
            // The add endpoint has no resource that could be missing.
            404 => Self::Unknown,
            _ => Self::from_common_status(status),
        }
    }

    fn from_delete_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200 | 204 => Self::Deleted,
            404 => Self::NotFound,
            _ => Self::from_common_status(status),
        }
    }

    fn from_common_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            409 => Self::Conflict,
            _ if status.is_server_error() => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DomainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP client for the registry.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: Arc<RegistryConfig>,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TransientNetwork`] if the HTTP client cannot be
    /// built, or [`RegistryError::InvalidUrl`] if a configured path does not
    /// form a URL.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        for path in [
            &config.auth_path,
            &config.federation_list_path,
            &config.add_domain_path,
            &config.delete_domain_path,
        ] {
            config.endpoint(path)?;
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect)
            .build()
            .map_err(|e| RegistryError::TransientNetwork(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Downloads the federation list if it is newer than `since_version`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if authentication fails, the registry is
    /// unreachable or it answers with a status other than 200 or 204.
    pub async fn fetch_list(&self, since_version: Option<i64>) -> Result<FetchedList, RegistryError> {
        let token = self.authenticate().await?;

        let mut url = self.config.endpoint(&self.config.federation_list_path)?;
        if let Some(version) = since_version {
            url.query_pairs_mut()
                .append_pair("version", &version.to_string());
        }
        debug!("Fetching federation list: url={url}");

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.authorization())
            .timeout(self.config.timeouts.fetch)
            .send()
            .await
            .map_err(network)?;

        match response.status() {
            StatusCode::OK => {
                let body = read_limited(response, self.config.max_list_size)
                    .await
                    .map_err(body_error)?;
                Ok(FetchedList::Modified(body))
            }
            StatusCode::NO_CONTENT => Ok(FetchedList::NotModified),
            other => Err(RegistryError::UnexpectedStatus(other.as_u16())),
        }
    }

    /// Adds `entry` to the registry.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if authentication fails or the registry is
    /// unreachable. Every HTTP answer maps to a [`DomainOutcome`].
    pub async fn add_domain(&self, entry: &DomainEntry) -> Result<DomainOutcome, RegistryError> {
        let token = self.authenticate().await?;
        let url = self.config.endpoint(&self.config.add_domain_path)?;

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, token.authorization())
            .timeout(self.config.timeouts.fetch)
            .json(entry)
            .send()
            .await
            .map_err(network)?;

        Ok(DomainOutcome::from_add_status(response.status()))
    }

    /// Removes `domain` from the registry.
    ///
    /// # Errors
    ///
    /// See [`RegistryClient::add_domain`].
    pub async fn delete_domain(&self, domain: &str) -> Result<DomainOutcome, RegistryError> {
        let token = self.authenticate().await?;
        let url = self.delete_url(domain)?;

        let response = self
            .http
            .delete(url)
            .header(AUTHORIZATION, token.authorization())
            .timeout(self.config.timeouts.fetch)
            .send()
            .await
            .map_err(network)?;

        Ok(DomainOutcome::from_delete_status(response.status()))
    }

    fn delete_url(&self, domain: &str) -> Result<Url, RegistryError> {
        let mut url = self.config.endpoint(&self.config.delete_domain_path)?;
        url.path_segments_mut()
            .map_err(|()| RegistryError::InvalidUrl(self.config.service_url.to_string()))?
            .pop_if_empty()
            .push(domain);
        Ok(url)
    }

    /// Runs both authentication steps and returns the resource token.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Authentication`] naming the refused step, or
    /// [`RegistryError::TransientNetwork`] if an endpoint is unreachable.
    pub async fn authenticate(&self) -> Result<BearerToken, RegistryError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose()),
            ("grant_type", "client_credentials"),
        ];
        let response = self
            .http
            .post(self.config.token_url.clone())
            .timeout(self.config.timeouts.auth)
            .form(&form)
            .send()
            .await
            .map_err(network)?;
        let access = read_token(AuthStage::Token, response).await?;

        let url = self.config.endpoint(&self.config.auth_path)?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, access.authorization())
            .timeout(self.config.timeouts.auth)
            .send()
            .await
            .map_err(network)?;
        read_token(AuthStage::ProviderAuthentication, response).await
    }
}

async fn read_token(
    stage: AuthStage,
    response: reqwest::Response,
) -> Result<BearerToken, RegistryError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(auth_failure(stage, format!("HTTP status {}", status.as_u16())));
    }

    let body = match read_limited(response, MAX_TOKEN_RESPONSE_SIZE).await {
        Ok(body) => body,
        Err(BodyError::TooLarge(limit)) => {
            return Err(auth_failure(stage, format!("response exceeds {limit} bytes")))
        }
        Err(BodyError::Transport(e)) => return Err(network(e)),
    };
    TokenResponse::parse(&String::from_utf8_lossy(&body))
        .into_token()
        .map_err(|reason| auth_failure(stage, reason.to_owned()))
}

fn auth_failure(stage: AuthStage, reason: String) -> RegistryError {
    error!("Registry authentication failed: stage={stage}, reason={reason}");
    RegistryError::Authentication { stage, reason }
}

fn network(e: reqwest::Error) -> RegistryError {
    RegistryError::TransientNetwork(e.to_string())
}

fn body_error(e: BodyError) -> RegistryError {
    match e {
        BodyError::TooLarge(limit) => RegistryError::ResponseTooLarge(limit),
        BodyError::Transport(e) => network(e),
    }
}
