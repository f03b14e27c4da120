use serde::Deserialize;
use std::fmt;
use time::{Duration, OffsetDateTime};
use zeroize::Zeroize;

/// Token used to call the registry.
///
/// The access token is zeroized on drop and never printed.
#[derive(Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct BearerToken {
    access_token: String,
    #[zeroize(skip)]
    token_type: String,
    #[zeroize(skip)]
    expires_at: OffsetDateTime,
}

impl BearerToken {
    /// Returns `None` if `expires_in` seconds from now is not a representable time.
    pub(crate) fn new(access_token: String, token_type: String, expires_in: i64) -> Option<Self> {
        let expires_at =
            OffsetDateTime::now_utc().checked_add(Duration::seconds(expires_in.max(0)))?;
        Some(Self {
            access_token,
            token_type,
            expires_at,
        })
    }

    /// The token type, e.g. `Bearer`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// When the token stops being accepted.
    pub const fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// `Authorization` header value.
    pub(crate) fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth 2.0 token endpoint response.
#[derive(Deserialize, Zeroize)]
#[zeroize(drop)]
pub(super) struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Parses a token endpoint body. A body that is not JSON is taken as a
    /// bare token.
    pub(super) fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            access_token: body.trim().to_owned(),
            token_type: None,
            expires_in: None,
        })
    }

    /// Returns the reason if the response carries no usable token.
    pub(super) fn into_token(mut self) -> Result<BearerToken, &'static str> {
        if self.access_token.trim().is_empty() {
            return Err("empty token");
        }
        let token_type = self
            .token_type
            .take()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Bearer".to_owned());
        BearerToken::new(
            std::mem::take(&mut self.access_token),
            token_type,
            self.expires_in.unwrap_or(0),
        )
        .ok_or("expires_in out of range")
    }
}
