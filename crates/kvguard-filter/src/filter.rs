// Store-backed membership filter
// One bit-string value per filter, sized once from the expected load

use std::sync::Arc;

use kvguard_common::{DEFAULT_FILTER_ERROR_RATE, KvGuardError, Result};
use kvguard_store::{KeyValueStore, NodeConnection};
use metrics::{counter, describe_counter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sizing::{bit_offsets, optimal_bit_array_size, optimal_hash_iterations};

pub const FILTER_OPS_TOTAL: &str = "kvguard_filter_ops_total";

pub fn describe_metrics() {
    describe_counter!(FILTER_OPS_TOTAL, "Total number of membership filter operations");
}

/// Parameters of a membership filter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Store key holding the bit array
    pub name: String,
    pub expected_insertions: u64,
    /// Target false-positive rate (default: 0.03)
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    /// Expiration applied once when the bit array is first created; zero
    /// means none
    #[serde(default)]
    pub expiration_ms: Option<u64>,
}

fn default_error_rate() -> f64 {
    DEFAULT_FILTER_ERROR_RATE
}

impl FilterConfig {
    pub fn new(name: impl Into<String>, expected_insertions: u64) -> Self {
        Self {
            name: name.into(),
            expected_insertions,
            error_rate: DEFAULT_FILTER_ERROR_RATE,
            expiration_ms: None,
        }
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    pub fn with_expiration(mut self, expiration_ms: u64) -> Self {
        self.expiration_ms = Some(expiration_ms);
        self
    }
}

/// Derived parameters of a filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipFilterState {
    pub name: String,
    pub bit_array_size: u64,
    pub hash_iterations: u32,
    pub error_rate: f64,
    pub expected_insertions: u64,
    pub expiration_ms: Option<u64>,
}

impl MembershipFilterState {
    /// Validate `config` and size the bit array, without touching the store
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(KvGuardError::configuration("filter name must not be empty"));
        }
        let bit_array_size = optimal_bit_array_size(config.expected_insertions, config.error_rate)?;
        Ok(Self {
            name: config.name.clone(),
            bit_array_size,
            hash_iterations: optimal_hash_iterations(config.expected_insertions, bit_array_size),
            error_rate: config.error_rate,
            expected_insertions: config.expected_insertions,
            expiration_ms: config.expiration_ms,
        })
    }
}

/// Approximate set membership with a bounded false-positive rate
///
/// Elements are never reported absent once added, as long as the backing key
/// has not expired. The raw bits carry no sizing information, so the key must
/// only be accessed through filters built with the same configuration.
pub struct MembershipFilter {
    store: Arc<dyn KeyValueStore>,
    state: MembershipFilterState,
}

impl MembershipFilter {
    /// Size the filter and create its bit array unless the key already exists
    ///
    /// Invalid configuration is rejected before any store access. An existing
    /// key is adopted as-is: neither its size nor its expiration is touched.
    pub async fn create(store: Arc<dyn KeyValueStore>, config: FilterConfig) -> Result<Self> {
        let state = MembershipFilterState::from_config(&config)?;

        let mut conn = store.connection_for(&state.name).await?;
        if !conn.exists(&state.name).await? {
            conn.set_bit(&state.name, state.bit_array_size - 1, false)
                .await?;
            if let Some(expiration_ms) = state.expiration_ms.filter(|&ms| ms > 0) {
                conn.pexpire(&state.name, expiration_ms).await?;
            }
            info!(
                filter = %state.name,
                bits = state.bit_array_size,
                hash_iterations = state.hash_iterations,
                "Membership filter created"
            );
        } else {
            debug!(filter = %state.name, "Membership filter already exists");
        }
        counter!(FILTER_OPS_TOTAL, "op" => "create").increment(1);

        Ok(Self { store, state })
    }

    pub fn state(&self) -> &MembershipFilterState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Set every bit of `element`; idempotent
    pub async fn add(&self, element: &str) -> Result<()> {
        let mut conn = self.store.connection_for(&self.state.name).await?;
        for offset in self.offsets(element) {
            conn.set_bit(&self.state.name, offset, true).await?;
        }
        counter!(FILTER_OPS_TOTAL, "op" => "add").increment(1);
        Ok(())
    }

    /// Whether `element` may have been added
    ///
    /// Stops at the first unset bit.
    pub async fn test(&self, element: &str) -> Result<bool> {
        counter!(FILTER_OPS_TOTAL, "op" => "test").increment(1);
        let mut conn = self.store.connection_for(&self.state.name).await?;
        for offset in self.offsets(element) {
            if !conn.get_bit(&self.state.name, offset).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn offsets(&self, element: &str) -> Vec<u64> {
        bit_offsets(
            element,
            self.state.hash_iterations,
            self.state.bit_array_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_config() {
        let state = MembershipFilterState::from_config(&FilterConfig::new("users", 100)).unwrap();
        assert_eq!(state.bit_array_size, 730);
        assert_eq!(state.hash_iterations, 5);
        assert_eq!(state.error_rate, 0.03);
        assert_eq!(state.expiration_ms, None);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = MembershipFilterState::from_config(&FilterConfig::new("", 100)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"name":"users","expected_insertions":1000}"#).unwrap();
        assert_eq!(config.error_rate, 0.03);
        assert_eq!(config.expiration_ms, None);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = MembershipFilterState::from_config(
            &FilterConfig::new("users", 100).with_expiration(60_000),
        )
        .unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["bitArraySize"], 730);
        assert_eq!(json["hashIterations"], 5);
        assert_eq!(json["expirationMs"], 60_000);
    }
}
