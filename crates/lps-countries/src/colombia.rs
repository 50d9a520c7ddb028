//! Colombia (CO): CC/CE validation, DataCrédito-style rules and scoring.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map};

use lps_schemas::{BankingInfo, DocumentType, ValidationResult};

use crate::provider::{clamp_score, dec, ratio_f64, scaled_trunc, stable_seed};
use crate::CountryStrategy;

const REVIEW_THRESHOLD_COP: Decimal = Decimal::from_parts(50_000_000, 0, 0, false, 0);
/// 50% maximum total (existing + new) debt-to-income.
const MAX_TOTAL_DEBT_TO_INCOME: f64 = 0.50;
const MIN_CREDIT_SCORE: i32 = 500;
/// Typical repayment term used for the new-payment approximation.
const TERM_MONTHS: u64 = 48;
/// Existing debt above this multiple of annual income is flagged.
const ANNUAL_DEBT_WARNING_RATIO: f64 = 2.0;

pub struct ColombiaStrategy;

#[async_trait]
impl CountryStrategy for ColombiaStrategy {
    fn country_code(&self) -> &'static str {
        "CO"
    }

    fn country_name(&self) -> &'static str {
        "Colombia"
    }

    fn currency(&self) -> &'static str {
        "COP"
    }

    fn supported_document_types(&self) -> &'static [DocumentType] {
        &[DocumentType::CC, DocumentType::CE]
    }

    fn validate_document(&self, document_type: &str, document_number: &str) -> ValidationResult {
        let doc: String = document_number.replace([' ', '-', '.'], "");
        match document_type.to_uppercase().as_str() {
            "CC" => validate_cc(&doc),
            "CE" => validate_ce(&doc),
            other => {
                let mut result = ValidationResult::valid();
                result.add_error(format!(
                    "Unsupported document type '{other}' for Colombia. Expected CC or CE."
                ));
                result
            }
        }
    }

    fn validate_business_rules(
        &self,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> ValidationResult {
        let mut result = ValidationResult::valid();

        if monthly_income.is_zero() {
            result.add_error("Monthly income must be greater than zero.");
            return result;
        }

        if amount_requested > REVIEW_THRESHOLD_COP {
            result.requires_review = true;
            result.add_warning(format!(
                "Amount COP ${amount_requested} exceeds review threshold of \
                 COP ${REVIEW_THRESHOLD_COP}. Manual review required."
            ));
            result.add_risk_factor("high_amount", true);
        }

        if let Some(banking) = banking_info {
            let existing = banking.monthly_obligations.unwrap_or(Decimal::ZERO);
            let estimated_new_payment = amount_requested / dec(TERM_MONTHS);
            let debt_ratio = (existing + estimated_new_payment) / monthly_income;

            result.add_risk_factor("total_debt_to_income_ratio", ratio_f64(debt_ratio));
            result.add_risk_factor("existing_monthly_debt", ratio_f64(existing));
            result.add_risk_factor("estimated_new_payment", ratio_f64(estimated_new_payment));

            if ratio_f64(debt_ratio) > MAX_TOTAL_DEBT_TO_INCOME {
                result.add_error(format!(
                    "Total debt-to-income ratio {:.1}% exceeds maximum allowed {:.0}%.",
                    ratio_f64(debt_ratio) * 100.0,
                    MAX_TOTAL_DEBT_TO_INCOME * 100.0
                ));
            }

            if let Some(total_debt) = banking.total_debt {
                let annual_ratio = total_debt / (monthly_income * dec(12));
                result.add_risk_factor("annual_debt_ratio", ratio_f64(annual_ratio));
                if ratio_f64(annual_ratio) > ANNUAL_DEBT_WARNING_RATIO {
                    result.add_warning(format!(
                        "Existing debt is {:.1}x annual income. Higher risk applicant.",
                        ratio_f64(annual_ratio)
                    ));
                }
            }

            if let Some(credit) = banking.credit_score {
                result.add_risk_factor("credit_score", credit);
                if credit < MIN_CREDIT_SCORE {
                    result.add_error(format!(
                        "DataCrédito score {credit} is below minimum required {MIN_CREDIT_SCORE}."
                    ));
                }

                if banking.has_defaults {
                    result.requires_review = true;
                    result.add_warning(format!(
                        "Applicant reported in centrales de riesgo with {} negative records.",
                        banking.default_count
                    ));
                    result.add_risk_factor("has_defaults", true);
                }
            }
        }

        result
    }

    fn calculate_risk_score(
        &self,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> i32 {
        // Weights: debt/income 35%, credit score 35%, negative records 30%.
        let mut score = 350;

        if let Some(banking) = banking_info {
            if let (false, Some(obligations)) =
                (monthly_income.is_zero(), banking.monthly_obligations)
            {
                let ratio = (obligations + amount_requested / dec(TERM_MONTHS)) / monthly_income;
                score += scaled_trunc(ratio, 700.0).min(350);
            }

            if let Some(credit) = banking.credit_score {
                // 300-800 maps to 350-0 risk.
                let credit_factor = (350 - ((credit - 300) as f64 * 0.7) as i32).max(0);
                score = score - 175 + credit_factor;
            }

            if banking.has_defaults {
                score += 150 + banking.default_count * 75;
            }
        }

        clamp_score(score)
    }

    async fn fetch_banking_info(
        &self,
        _document_type: &str,
        document_number: &str,
        _full_name: &str,
    ) -> Result<BankingInfo> {
        let seed = stable_seed(document_number);

        let mut raw = Map::new();
        raw.insert("provider".into(), json!("DataCrédito TransUnion"));
        raw.insert("query_date".into(), json!(Utc::now().to_rfc3339()));
        raw.insert("report_number".into(), json!(format!("DC-CO-{seed:08}")));
        raw.insert("score_type".into(), json!("Score de Crédito"));

        Ok(BankingInfo {
            provider_name: "DATACREDITO_CO".to_string(),
            credit_score: Some(300 + (seed % 500) as i32),
            total_debt: Some(dec(seed * 50_000)),
            payment_history_score: Some(40 + (seed % 60) as i32),
            account_age_months: Some(3 + (seed % 120) as i32),
            has_defaults: seed < 200,
            default_count: if seed < 150 {
                1
            } else if seed < 200 {
                2
            } else {
                0
            },
            monthly_obligations: Some(dec(200_000 + (seed % 3_000_000))),
            available_credit: Some(dec(1_000_000 + (seed % 20_000_000))),
            employment_verified: seed % 10 > 4,
            income_verified: seed % 10 > 5,
            raw_data: raw,
        })
    }
}

fn validate_cc(cc: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if !cc.chars().all(|c| c.is_ascii_digit()) || cc.is_empty() {
        result.add_error("Cédula de Ciudadanía must contain only digits.");
        return result;
    }

    if cc.len() < 6 || cc.len() > 10 {
        result.add_error(format!(
            "Cédula de Ciudadanía must be 6-10 digits. Got {}.",
            cc.len()
        ));
        return result;
    }

    if cc.starts_with('0') {
        result.add_error("Cédula de Ciudadanía cannot start with 0.");
    }

    result
}

fn validate_ce(ce: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if !ce.chars().all(|c| c.is_ascii_digit()) || ce.is_empty() {
        result.add_error("Cédula de Extranjería must contain only digits.");
        return result;
    }

    if ce.len() < 6 || ce.len() > 7 {
        result.add_error(format!(
            "Cédula de Extranjería must be 6-7 digits. Got {}.",
            ce.len()
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cc_valid() {
        let result = ColombiaStrategy.validate_document("CC", "1234567890");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn cc_rejects_leading_zero() {
        let result = ColombiaStrategy.validate_document("CC", "0123456789");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("start with 0")));
    }

    #[test]
    fn cc_rejects_bad_length() {
        let result = ColombiaStrategy.validate_document("CC", "12345");
        assert!(!result.is_valid);
    }

    #[test]
    fn cc_strips_separators() {
        let result = ColombiaStrategy.validate_document("CC", "1.234.567-890");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn ce_valid_and_length_bounded() {
        assert!(ColombiaStrategy.validate_document("CE", "1234567").is_valid);
        assert!(!ColombiaStrategy.validate_document("CE", "12345678").is_valid);
    }

    #[test]
    fn zero_income_is_a_hard_error() {
        let result =
            ColombiaStrategy.validate_business_rules(Decimal::from(1_000_000), Decimal::ZERO, None);
        assert!(!result.is_valid);
    }

    #[test]
    fn high_debt_ratio_rejects() {
        let banking = BankingInfo {
            provider_name: "DATACREDITO_CO".into(),
            credit_score: Some(600),
            monthly_obligations: Some(Decimal::from(2_000_000)),
            ..Default::default()
        };
        // 2M existing + 48M/48 = 3M against 3M income -> 100%.
        let result = ColombiaStrategy.validate_business_rules(
            Decimal::from(48_000_000),
            Decimal::from(3_000_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("debt-to-income")));
    }

    #[test]
    fn heavy_existing_debt_warns_with_annual_ratio_factor() {
        let banking = BankingInfo {
            provider_name: "DATACREDITO_CO".into(),
            credit_score: Some(700),
            total_debt: Some(Decimal::from(100_000_000)),
            monthly_obligations: Some(Decimal::from(100_000)),
            ..Default::default()
        };
        // 100M debt vs 3M*12=36M annual income -> 2.8x.
        let result = ColombiaStrategy.validate_business_rules(
            Decimal::from(10_000_000),
            Decimal::from(3_000_000),
            Some(&banking),
        );
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.contains("annual income")));
        assert!(result.risk_factors.contains_key("annual_debt_ratio"));
    }

    #[test]
    fn low_credit_score_rejects() {
        let banking = BankingInfo {
            provider_name: "DATACREDITO_CO".into(),
            credit_score: Some(450),
            monthly_obligations: Some(Decimal::from(100_000)),
            ..Default::default()
        };
        let result = ColombiaStrategy.validate_business_rules(
            Decimal::from(5_000_000),
            Decimal::from(4_000_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
    }

    #[test]
    fn risk_score_clamped_with_pathological_inputs() {
        let banking = BankingInfo {
            provider_name: "DATACREDITO_CO".into(),
            credit_score: Some(300),
            monthly_obligations: Some(Decimal::from(50_000_000)),
            has_defaults: true,
            default_count: 5,
            ..Default::default()
        };
        let score = ColombiaStrategy.calculate_risk_score(
            Decimal::from(50_000_000),
            Decimal::from(1_000_000),
            Some(&banking),
        );
        assert_eq!(score, 1000);
    }
}
