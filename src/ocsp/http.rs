use super::{OcspError, OcspResponder, ResponderFuture};
use crate::body::{read_limited, BodyError};
use base64ct::{Base64, Encoding as _};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Encoded GET requests must stay below this length, else POST is used.
const MAX_GET_REQUEST_LEN: usize = 255;

/// Responses for a single certificate are a few kilobytes at most.
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";
const OCSP_RESPONSE_CONTENT_TYPE: &str = "application/ocsp-response";

/// HTTP method used to reach the OCSP responder.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum OcspMethod {
    /// Always `GET` with the request in the URL path.
    Get,
    /// Always `POST` with the DER request as body.
    Post,
    /// `GET` for short requests, `POST` otherwise.
    #[default]
    Auto,
}

impl OcspMethod {
    /// Returns the configuration name of the method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for OcspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcspMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown OCSP method '{other}'")),
        }
    }
}

/// [`OcspResponder`] over HTTP (RFC 6960 appendix A).
#[derive(Debug, Clone)]
pub struct HttpOcspResponder {
    client: reqwest::Client,
    method: OcspMethod,
}

impl HttpOcspResponder {
    /// Creates a responder with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`OcspError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        method: OcspMethod,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, OcspError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| OcspError::Transport(e.to_string()))?;
        Ok(Self { client, method })
    }

    /// Creates a responder on a caller-provided HTTP client.
    pub fn with_client(client: reqwest::Client, method: OcspMethod) -> Self {
        Self { client, method }
    }

    async fn send_inner(&self, uri: &str, request: &[u8]) -> Result<Vec<u8>, OcspError> {
        let encoded = url::form_urlencoded::byte_serialize(Base64::encode_string(request).as_bytes())
            .collect::<String>();
        let use_get = match self.method {
            OcspMethod::Get => true,
            OcspMethod::Post => false,
            OcspMethod::Auto => encoded.len() < MAX_GET_REQUEST_LEN,
        };

        let builder = if use_get {
            let url = format!("{}/{encoded}", uri.trim_end_matches('/'));
            self.client.get(url)
        } else {
            self.client
                .post(uri)
                .header(reqwest::header::CONTENT_TYPE, OCSP_REQUEST_CONTENT_TYPE)
                .body(request.to_vec())
        };

        let response = builder
            .header(reqwest::header::ACCEPT, OCSP_RESPONSE_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| OcspError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcspError::HttpStatus(status.as_u16()));
        }

        read_limited(response, MAX_RESPONSE_SIZE)
            .await
            .map_err(|e| match e {
                BodyError::TooLarge(limit) => OcspError::ResponseTooLarge(limit),
                BodyError::Transport(e) => OcspError::Transport(e.to_string()),
            })
    }
}

impl OcspResponder for HttpOcspResponder {
    fn send<'a>(&'a self, uri: &'a str, request: &'a [u8]) -> ResponderFuture<'a> {
        Box::pin(self.send_inner(uri, request))
    }
}
