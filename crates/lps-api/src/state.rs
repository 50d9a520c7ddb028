//! Shared runtime state for lps-api.

use std::sync::Arc;

use sqlx::PgPool;

use lps_cache::Cache;
use lps_config::Settings;
use lps_countries::StrategyRegistry;
use lps_pii::PiiCodec;
use lps_realtime::LoanHub;
use lps_service::LoanService;

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub pool: PgPool,
    pub settings: Settings,
    pub service: LoanService,
    pub hub: LoanHub,
    pub cache: Cache,
}

impl AppState {
    /// Wire the full state from settings plus an established pool.
    pub fn new(pool: PgPool, settings: Settings, cache: Cache) -> Arc<Self> {
        let registry = Arc::new(StrategyRegistry::with_defaults());
        let codec = PiiCodec::new(&settings.jwt_secret);
        let service = LoanService::new(pool.clone(), registry, codec, cache.clone());

        Arc::new(Self {
            pool,
            settings,
            service,
            hub: LoanHub::default(),
            cache,
        })
    }
}
