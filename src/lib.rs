#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Verification and synchronization of a signed federation list.
//!
//! A registry publishes the list of trusted messenger domains as a compact JWS
//! signed with a Brainpool (or NIST) ECDSA key. The signer certificate chain
//! travels in the `x5c` header and must lead to a configured trust anchor; each
//! certificate on the path can be checked over OCSP. Verified lists replace the
//! local copy only if their version is strictly higher.
//!
//! The primary entry point is [`SyncOrchestrator`], which polls the registry on a
//! schedule and commits verified lists to a [`LocalListStore`].
//!
//! ```no_run
//! use federation_sync::{InMemoryListStore, SyncConfig, SyncOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::from_env()?;
//! let store = Arc::new(InMemoryListStore::new());
//! let orchestrator = SyncOrchestrator::from_config(&config, store.clone())?;
//!
//! // Run one cycle right away, then keep polling in the background.
//! let outcome = orchestrator.refresh_now().await;
//! let handle = orchestrator.spawn();
//!
//! if let Some(list) = orchestrator.current() {
//!     println!("trusted: {}", list.contains_domain("a.example"));
//! }
//!
//! handle.shutdown_configured().await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```
//!
//! The verifiers can also be used on their own:
//!
//! ```no_run
//! use federation_sync::ocsp::{HttpOcspResponder, OcspMethod, OcspRevocationChecker};
//! use federation_sync::{CertPathValidator, FederationListVerifier, TrustAnchorSet};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(body: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let anchors = Arc::new(TrustAnchorSet::load("truststore.pem", None)?);
//! let responder = HttpOcspResponder::new(
//!     OcspMethod::Auto,
//!     Duration::from_secs(5),
//!     Duration::from_secs(10),
//! )?;
//! let validator = CertPathValidator::new(OcspRevocationChecker::new(Arc::new(responder)));
//! let verifier = FederationListVerifier::new(anchors, validator, true);
//!
//! let list = verifier.verify(body).await.into_result()?;
//! println!("{list}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): diagnostics through the `log` facade.
//! - **`tracing`**: diagnostics through `tracing` instead.
//! - **`vendored-openssl`** (default): builds OpenSSL with the Brainpool curves.
//! - **`cli`**: the `fedlist-sync` binary.

#[macro_use]
mod observability;
mod body;
mod prelude;

pub mod cert;
pub mod config;
pub mod federation;
pub mod jws;
pub mod ocsp;
pub mod path;
pub mod registry;
pub mod store;
pub mod sync;
pub mod trust;
pub mod verification;

// -----------------------
// Re-exports
// -----------------------

pub use crate::{
    cert::{error::CertificateError, CertIdentifier, Certificate},
    config::{ConfigError, Secret, SyncConfig},
    federation::{DomainEntry, FederationList, FederationListVerifier},
    jws::{JwsAlgorithm, JwsEnvelope, JwsHeader, JwsVerifier},
    path::{CertPath, CertPathValidationResult, CertPathValidator, PathFailure},
    registry::{
        AuthStage, BearerToken, DomainOutcome, FetchedList, RegistryClient, RegistryConfig,
        RegistryError,
    },
    store::{query_current, InMemoryListStore, ListQuery, LocalListStore},
    sync::{CycleOutcome, PollSchedule, SyncError, SyncHandle, SyncOrchestrator, SyncState},
    trust::{TrustAnchorSet, TrustStoreError},
    verification::{InvalidReason, VerificationResult},
};
