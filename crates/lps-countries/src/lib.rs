//! Country-pluggable validation, business rules, risk scoring, and banking
//! provider lookup.
//!
//! One [`CountryStrategy`] per supported country (ES, MX, CO, BR), registered
//! once at process start in an immutable [`StrategyRegistry`]. Document and
//! business validation are pure; only the provider lookup is async.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use lps_schemas::{BankingInfo, DocumentType, ValidationResult};

mod brazil;
mod colombia;
mod mexico;
mod provider;
mod spain;

pub use brazil::BrazilStrategy;
pub use colombia::ColombiaStrategy;
pub use mexico::MexicoStrategy;
pub use spain::SpainStrategy;

/// Per-country bundle of document validation, business rules, provider
/// lookup, and risk scoring.
#[async_trait]
pub trait CountryStrategy: Send + Sync {
    /// ISO 3166-1 alpha-2 code.
    fn country_code(&self) -> &'static str;
    fn country_name(&self) -> &'static str;
    /// ISO 4217 currency code applications in this country are denominated in.
    fn currency(&self) -> &'static str;
    fn supported_document_types(&self) -> &'static [DocumentType];

    /// Syntactic + checksum validation of an identity document.
    fn validate_document(&self, document_type: &str, document_number: &str) -> ValidationResult;

    /// Country business rules over amount, income, and the banking snapshot.
    /// A zero income is always a hard error.
    fn validate_business_rules(
        &self,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> ValidationResult;

    /// Deterministic risk score in 0..=1000 (lower is better) given the same
    /// inputs.
    fn calculate_risk_score(
        &self,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> i32;

    /// Query the country's banking provider. The bundled implementations
    /// simulate the provider deterministically from the document number; real
    /// deployments replace this with an HTTP call behind the same signature.
    async fn fetch_banking_info(
        &self,
        document_type: &str,
        document_number: &str,
        full_name: &str,
    ) -> Result<BankingInfo>;

    /// Document validation merged with business rules.
    fn validate_all(
        &self,
        document_type: &str,
        document_number: &str,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> ValidationResult {
        let doc = self.validate_document(document_type, document_number);
        let rules = self.validate_business_rules(amount_requested, monthly_income, banking_info);
        doc.merge(rules)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One-time-initialised lookup of country strategies. Immutable after
/// construction; share it behind an `Arc`.
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn CountryStrategy>>,
}

impl StrategyRegistry {
    /// Registry with all four bundled countries.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(SpainStrategy));
        registry.register(Arc::new(MexicoStrategy));
        registry.register(Arc::new(ColombiaStrategy));
        registry.register(Arc::new(BrazilStrategy));
        registry
    }

    fn register(&mut self, strategy: Arc<dyn CountryStrategy>) {
        self.strategies.insert(strategy.country_code(), strategy);
    }

    /// Look up by country code (case-insensitive).
    pub fn get(&self, country_code: &str) -> Option<&Arc<dyn CountryStrategy>> {
        self.strategies
            .get(country_code.to_uppercase().as_str())
    }

    pub fn is_supported(&self, country_code: &str) -> bool {
        self.get(country_code).is_some()
    }

    pub fn country_codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<_> = self.strategies.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_four_countries() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.country_codes(), vec!["BR", "CO", "ES", "MX"]);
        assert!(registry.is_supported("es"));
        assert!(!registry.is_supported("US"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.get("mx").unwrap().currency(), "MXN");
        assert_eq!(registry.get("MX").unwrap().currency(), "MXN");
    }
}
