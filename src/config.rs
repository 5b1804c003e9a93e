// Engine, supplier and breaker configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::proxy::{ProxyConfig, ProxyError};
use crate::types::SupplierId;

/// Credentials for one supplier account. `end_user_ip` is required by
/// suppliers that record the originating customer IP on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierCredentials {
    pub client_id: String,
    pub user_name: String,
    pub password: String,
    pub end_user_ip: String,
}

/// Per-operation endpoint URLs. Suppliers split their API across hosts
/// (auth vs booking vs static data), so each operation gets its own URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierEndpoints {
    pub auth_url: String,
    pub search_url: String,
    pub room_url: String,
    pub block_url: String,
    pub book_url: String,
    pub voucher_url: String,
}

impl SupplierEndpoints {
    /// All operations under one base URL; the common case for test rigs.
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{base}/Authenticate"),
            search_url: format!("{base}/GetHotelResult"),
            room_url: format!("{base}/GetHotelRoom"),
            block_url: format!("{base}/BlockRoom"),
            book_url: format!("{base}/Book"),
            voucher_url: format!("{base}/GenerateVoucher"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierConfig {
    pub id: SupplierId,
    pub enabled: bool,
    pub credentials: SupplierCredentials,
    pub endpoints: SupplierEndpoints,
    /// Timeout for search and room-details calls.
    pub search_timeout: Duration,
    /// Timeout for block and book calls; longer because they may involve
    /// upstream inventory locking.
    pub book_timeout: Duration,
}

impl SupplierConfig {
    pub fn new(id: impl Into<SupplierId>, credentials: SupplierCredentials, endpoints: SupplierEndpoints) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            credentials,
            endpoints,
            search_timeout: Duration::from_secs(30),
            book_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker thresholds, shared by every supplier's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip CLOSED -> OPEN.
    pub failure_threshold: u32,
    /// Probe successes required to close again from HALF_OPEN.
    pub success_threshold: u32,
    /// How long an OPEN breaker waits before admitting a probe.
    pub cooldown: Duration,
    /// Number of recent outcomes kept for health snapshots.
    pub window: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            cooldown: Duration::from_secs(30),
            window: 32,
        }
    }
}

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub suppliers: Vec<SupplierConfig>,
    pub breaker: BreakerConfig,
    pub proxy: Option<ProxyConfig>,
}

impl EngineConfig {
    /// Apply environment overrides: `HOTEL_SUPPLIERS` is a comma-separated
    /// allowlist of supplier ids (others are disabled), `OUTBOUND_PROXY_URL`
    /// enables the egress proxy.
    pub fn with_env_overrides(mut self) -> Result<Self, ProxyError> {
        if let Ok(list) = env::var("HOTEL_SUPPLIERS") {
            let enabled: Vec<SupplierId> = list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .map(SupplierId::new)
                .collect();
            if !enabled.is_empty() {
                for supplier in &mut self.suppliers {
                    supplier.enabled = enabled.contains(&supplier.id);
                }
            }
        }
        if let Ok(url) = env::var("OUTBOUND_PROXY_URL") {
            if !url.trim().is_empty() {
                self.proxy = Some(ProxyConfig::parse(&url)?);
            }
        }
        Ok(self)
    }

    pub fn enabled_suppliers(&self) -> impl Iterator<Item = &SupplierConfig> {
        self.suppliers.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
pub(crate) fn test_supplier_config(id: &str) -> SupplierConfig {
    SupplierConfig::new(
        id,
        SupplierCredentials {
            client_id: "client".into(),
            user_name: "agency".into(),
            password: "secret".into(),
            end_user_ip: "203.0.113.10".into(),
        },
        SupplierEndpoints::single_host("http://localhost:9/api"),
    )
}
