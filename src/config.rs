//! Runtime configuration.
//!
//! [`SyncConfig`] gathers everything the synchronizer needs: where the registry
//! lives, how to authenticate, which trust store to load and whether to ask an
//! OCSP responder. It is normally read from `VZD_*` environment variables with
//! [`SyncConfig::from_env`].

use crate::ocsp::OcspMethod;
use crate::registry::RegistryConfig;
use crate::sync::PollSchedule;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use zeroize::Zeroize;

/// A credential that is zeroized on drop and redacted in `Debug` output.
#[derive(Clone, Default, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the credential.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Errors produced while reading configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required variable is not set (or is blank).
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A variable is set to a value that cannot be used.
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// The variable name.
        var: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Where the trust anchors come from.
#[derive(Clone, Debug)]
pub struct TrustStoreConfig {
    /// Trust store file (PKCS#12, PEM or concatenated DER).
    pub path: PathBuf,
    /// PKCS#12 password. Ignored for PEM and DER.
    pub password: Secret,
}

/// OCSP settings used during certificate path validation.
#[derive(Clone, Debug)]
pub struct RevocationConfig {
    /// Whether certificates are checked against an OCSP responder.
    pub enabled: bool,
    /// Responder to ask instead of the one named by each certificate.
    pub responder_uri: Option<String>,
    /// HTTP method used for OCSP requests.
    pub method: OcspMethod,
    /// Connect timeout for the responder.
    pub connect_timeout: Duration,
    /// Overall timeout of an OCSP exchange.
    pub timeout: Duration,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            responder_uri: None,
            method: OcspMethod::Auto,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Complete configuration of a synchronizer.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Registry endpoints, credentials and timeouts.
    pub registry: RegistryConfig,
    /// Trust anchors for the federation list signer.
    pub trust_store: TrustStoreConfig,
    /// Revocation checking.
    pub revocation: RevocationConfig,
    /// When to poll the registry.
    pub schedule: PollSchedule,
}

impl SyncConfig {
    /// Reads the configuration from `VZD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// See [`SyncConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let service_url = vars.url("VZD_SERVICE_URL")?;
        let token_url = vars.url("VZD_TOKEN_URL")?;
        let client_id = vars.required("VZD_CLIENT_ID")?;
        let client_secret = Secret::new(vars.required("VZD_CLIENT_SECRET")?);

        let mut registry = RegistryConfig::new(service_url, token_url, client_id, client_secret);
        if let Some(path) = vars.optional("VZD_AUTH_PATH") {
            registry = registry.with_auth_path(path);
        }
        if let Some(path) = vars.optional("VZD_FEDERATION_LIST_PATH") {
            registry = registry.with_federation_list_path(path);
        }
        if let Some(path) = vars.optional("VZD_ADD_DOMAIN_PATH") {
            registry = registry.with_add_domain_path(path);
        }
        if let Some(path) = vars.optional("VZD_DELETE_DOMAIN_PATH") {
            registry = registry.with_delete_domain_path(path);
        }
        let connect_timeout = vars.secs("VZD_CONNECT_TIMEOUT_SECS", 5)?;
        registry = registry
            .with_connect_timeout(connect_timeout)
            .with_auth_timeout(vars.secs("VZD_AUTH_TIMEOUT_SECS", 10)?)
            .with_fetch_timeout(vars.secs("VZD_FETCH_TIMEOUT_SECS", 120)?);

        let trust_store = TrustStoreConfig {
            path: PathBuf::from(vars.required("VZD_TRUST_STORE_PATH")?),
            password: Secret::new(vars.optional("VZD_TRUST_STORE_PASSWORD").unwrap_or_default()),
        };

        let revocation = RevocationConfig {
            enabled: vars.flag("VZD_CHECK_REVOCATION_STATUS", true)?,
            responder_uri: vars.optional("VZD_OCSP_RESPONDER_URI"),
            method: match vars.optional("VZD_OCSP_METHOD") {
                Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                    var: "VZD_OCSP_METHOD",
                    reason,
                })?,
                None => OcspMethod::Auto,
            },
            connect_timeout,
            timeout: vars.secs("VZD_OCSP_TIMEOUT_SECS", 10)?,
        };

        let schedule = match vars.optional("VZD_POLL_CRON") {
            Some(expr) => PollSchedule::cron(&expr).map_err(|e| ConfigError::Invalid {
                var: "VZD_POLL_CRON",
                reason: e.to_string(),
            })?,
            None => PollSchedule::Interval(vars.secs("VZD_POLL_INTERVAL_SECS", 300)?),
        };

        Ok(Self {
            registry,
            trust_store,
            revocation,
            schedule,
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn url(&self, name: &'static str) -> Result<Url, ConfigError> {
        let raw = self.required(name)?;
        Url::parse(&raw).map_err(|e| ConfigError::Invalid {
            var: name,
            reason: e.to_string(),
        })
    }

    fn secs(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let Some(raw) = self.optional(name) else {
            return Ok(Duration::from_secs(default));
        };
        match raw.parse::<u64>() {
            Ok(0) => Err(ConfigError::Invalid {
                var: name,
                reason: "must be greater than zero".to_owned(),
            }),
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(e) => Err(ConfigError::Invalid {
                var: name,
                reason: e.to_string(),
            }),
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.optional(name) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var: name,
                reason: format!("expected a boolean, got {raw:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("VZD_SERVICE_URL", "https://vzd.example/"),
        ("VZD_TOKEN_URL", "https://idp.example/token"),
        ("VZD_CLIENT_ID", "sync"),
        ("VZD_CLIENT_SECRET", "hunter2"),
        ("VZD_TRUST_STORE_PATH", "/etc/fedlist/truststore.p12"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(extra);
        pairs
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::from_lookup(lookup(REQUIRED)).unwrap();

        assert_eq!(config.registry.service_url.as_str(), "https://vzd.example/");
        assert_eq!(config.registry.auth_path, "/ti-provider-authenticate");
        assert_eq!(config.registry.federation_list_path, "/federation-list");
        assert_eq!(config.registry.add_domain_path, "/add-domain");
        assert_eq!(config.registry.delete_domain_path, "/delete-domain");
        assert_eq!(config.registry.client_secret.expose(), "hunter2");
        assert_eq!(config.registry.timeouts.fetch, Duration::from_secs(120));
        assert_eq!(config.registry.timeouts.auth, Duration::from_secs(10));
        assert_eq!(config.registry.timeouts.connect, Duration::from_secs(5));
        assert!(config.trust_store.password.is_empty());
        assert!(config.revocation.enabled);
        assert_eq!(config.revocation.method, OcspMethod::Auto);
        assert_eq!(config.revocation.responder_uri, None);
        assert_eq!(config.revocation.timeout, Duration::from_secs(10));
        assert_eq!(
            config.schedule,
            PollSchedule::Interval(Duration::from_secs(300))
        );
    }

    #[test]
    fn overrides() {
        let config = SyncConfig::from_lookup(lookup(&with(&[
            ("VZD_FEDERATION_LIST_PATH", "/v2/list"),
            ("VZD_CHECK_REVOCATION_STATUS", "false"),
            ("VZD_OCSP_RESPONDER_URI", "http://ocsp.example"),
            ("VZD_OCSP_METHOD", "post"),
            ("VZD_POLL_CRON", "0 */10 * * * *"),
            ("VZD_FETCH_TIMEOUT_SECS", "30"),
            ("VZD_TRUST_STORE_PASSWORD", "changeit"),
        ])))
        .unwrap();

        assert_eq!(config.registry.federation_list_path, "/v2/list");
        assert_eq!(config.registry.timeouts.fetch, Duration::from_secs(30));
        assert!(!config.revocation.enabled);
        assert_eq!(
            config.revocation.responder_uri.as_deref(),
            Some("http://ocsp.example")
        );
        assert_eq!(config.revocation.method, OcspMethod::Post);
        assert!(matches!(config.schedule, PollSchedule::Cron(_)));
        assert_eq!(config.trust_store.password.expose(), "changeit");
    }

    #[test]
    fn missing_required_variable() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "VZD_CLIENT_SECRET")
            .collect();
        let err = SyncConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Missing("VZD_CLIENT_SECRET"));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let err = SyncConfig::from_lookup(lookup(&with(&[("VZD_TOKEN_URL", "  ")]))).unwrap_err();
        assert_eq!(err, ConfigError::Missing("VZD_TOKEN_URL"));
    }

    #[test]
    fn invalid_values() {
        let cases: &[(&'static str, &'static str)] = &[
            ("VZD_SERVICE_URL", "not a url"),
            ("VZD_POLL_INTERVAL_SECS", "soon"),
            ("VZD_POLL_INTERVAL_SECS", "0"),
            ("VZD_CHECK_REVOCATION_STATUS", "maybe"),
            ("VZD_OCSP_METHOD", "put"),
            ("VZD_POLL_CRON", "every minute"),
        ];
        for &(var, value) in cases {
            let err = SyncConfig::from_lookup(lookup(&with(&[(var, value)]))).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value}: {err:?}"
            );
        }
    }

    #[test]
    fn secrets_are_redacted() {
        let config = SyncConfig::from_lookup(lookup(REQUIRED)).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
