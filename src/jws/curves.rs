//! Process-wide registry of the elliptic curves used by JWS verification.
//!
//! The registry is filled once, either explicitly through [`register_curves`]
//! at start-up or lazily by the first verification. A curve the crypto provider
//! cannot resolve stays absent, and every token using it is rejected as
//! unsupported.

use super::JwsAlgorithm;
use crate::prelude::{debug, warn};
use openssl::ec::EcGroup;
use openssl::nid::Nid;
use std::sync::OnceLock;

static REGISTRY: OnceLock<CurveRegistry> = OnceLock::new();

/// Error returned when some curves cannot be resolved by the crypto provider.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("crypto provider lacks curves for {missing:?}")]
pub struct CurveRegistryError {
    missing: Vec<JwsAlgorithm>,
}

impl CurveRegistryError {
    /// Algorithms whose curve is unavailable.
    pub fn missing(&self) -> &[JwsAlgorithm] {
        &self.missing
    }
}

struct CurveRegistry {
    groups: Vec<(JwsAlgorithm, EcGroup)>,
    missing: Vec<JwsAlgorithm>,
}

impl CurveRegistry {
    fn load() -> Self {
        let mut groups = Vec::with_capacity(JwsAlgorithm::ALL.len());
        let mut missing = Vec::new();

        for alg in JwsAlgorithm::ALL {
            match EcGroup::from_curve_name(alg.curve_nid()) {
                Ok(group) => groups.push((alg, group)),
                Err(e) => {
                    warn!("Curve unavailable in crypto provider: alg={alg}, error={e}");
                    missing.push(alg);
                }
            }
        }

        debug!("Curve registry populated: curves={}", groups.len());
        Self { groups, missing }
    }
}

/// Populates the curve registry.
///
/// Safe to call any number of times; only the first call touches the crypto
/// provider.
///
/// # Errors
///
/// Returns [`CurveRegistryError`] if one or more curves are unavailable. The
/// remaining curves are still registered and usable.
pub fn register_curves() -> Result<(), CurveRegistryError> {
    let registry = REGISTRY.get_or_init(CurveRegistry::load);
    if registry.missing.is_empty() {
        Ok(())
    } else {
        Err(CurveRegistryError {
            missing: registry.missing.clone(),
        })
    }
}

/// Returns the curve name registered for `alg`.
pub(crate) fn curve_for(alg: JwsAlgorithm) -> Option<Nid> {
    REGISTRY
        .get_or_init(CurveRegistry::load)
        .groups
        .iter()
        .find(|(a, _)| *a == alg)
        .and_then(|(_, group)| group.curve_name())
}
