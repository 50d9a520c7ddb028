//! Mexico (MX): CURP validation, Buró de Crédito-style rules and scoring.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Map};

use lps_schemas::{BankingInfo, DocumentType, ValidationResult};

use crate::provider::{clamp_score, dec, ratio_f64, scaled_trunc, stable_seed};
use crate::CountryStrategy;

const REVIEW_THRESHOLD_MXN: Decimal = Decimal::from_parts(300_000, 0, 0, false, 0);
/// Requested amount may not exceed this multiple of monthly income.
const MAX_AMOUNT_TO_INCOME: f64 = 6.0;
const MIN_CREDIT_SCORE: i32 = 550;
const MIN_AGE_YEARS: f64 = 18.0;

/// State-of-birth codes embedded in the CURP. `NE` marks foreign-born.
const VALID_STATES: [&str; 33] = [
    "AS", "BC", "BS", "CC", "CL", "CM", "CS", "CH", "DF", "DG", "GT", "GR", "HG", "JC", "MC",
    "MN", "MS", "NT", "NL", "OC", "PL", "QT", "QR", "SP", "SL", "SR", "TC", "TS", "TL", "VZ",
    "YN", "ZS", "NE",
];

pub struct MexicoStrategy;

#[async_trait]
impl CountryStrategy for MexicoStrategy {
    fn country_code(&self) -> &'static str {
        "MX"
    }

    fn country_name(&self) -> &'static str {
        "México"
    }

    fn currency(&self) -> &'static str {
        "MXN"
    }

    fn supported_document_types(&self) -> &'static [DocumentType] {
        &[DocumentType::CURP]
    }

    fn validate_document(&self, document_type: &str, document_number: &str) -> ValidationResult {
        let mut result = ValidationResult::valid();

        if document_type.to_uppercase() != "CURP" {
            result.add_error(format!(
                "Unsupported document type '{document_type}' for Mexico. Expected CURP."
            ));
            return result;
        }

        let curp: String = document_number
            .to_uppercase()
            .replace([' ', '-'], "");

        if curp.chars().count() != 18 {
            result.add_error(format!("CURP must be 18 characters. Got {}.", curp.chars().count()));
            return result;
        }

        if !curp_shape_ok(&curp) {
            result.add_error(
                "CURP format is invalid. Expected: 4 letters + 6 digits + gender (H/M) + \
                 2 letters state + 3 letters + 2 chars homoclave.",
            );
            return result;
        }

        validate_birth_date(&curp[4..10], &mut result);

        let state_code = &curp[11..13];
        if !VALID_STATES.contains(&state_code) {
            result.add_error(format!(
                "Invalid state code '{state_code}' in CURP. Must be a valid Mexican state."
            ));
        }

        result
    }

    fn validate_business_rules(
        &self,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> ValidationResult {
        let mut result = ValidationResult::valid();

        if amount_requested > REVIEW_THRESHOLD_MXN {
            result.requires_review = true;
            result.add_warning(format!(
                "Amount MXN ${amount_requested} exceeds review threshold of \
                 MXN ${REVIEW_THRESHOLD_MXN}. Manual review required."
            ));
            result.add_risk_factor("high_amount", true);
        }

        if monthly_income.is_zero() {
            result.add_error("Monthly income must be greater than zero.");
        } else {
            let ratio = amount_requested / monthly_income;
            result.add_risk_factor("amount_to_income_ratio", ratio_f64(ratio));
            if ratio_f64(ratio) > MAX_AMOUNT_TO_INCOME {
                result.add_error(format!(
                    "Requested amount is {:.1}x monthly income. Maximum allowed is {}x.",
                    ratio_f64(ratio),
                    MAX_AMOUNT_TO_INCOME as i32
                ));
            }
        }

        if let Some(banking) = banking_info {
            if let Some(credit) = banking.credit_score {
                result.add_risk_factor("credit_score", credit);
                if credit < MIN_CREDIT_SCORE {
                    result.add_error(format!(
                        "Buró de Crédito score {credit} is below minimum required \
                         {MIN_CREDIT_SCORE}."
                    ));
                }

                if banking.has_defaults {
                    result.requires_review = true;
                    result.add_warning(format!(
                        "Applicant has {} defaults in Buró de Crédito. Manual review required.",
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
        // Weights: amount/income 40%, Buró score 40%, defaults 20%.
        let mut score = 400;

        if !monthly_income.is_zero() {
            let ratio = amount_requested / monthly_income;
            score += scaled_trunc(ratio, 67.0).min(400);
        }

        if let Some(banking) = banking_info {
            if let Some(credit) = banking.credit_score {
                // 450-850 maps to 400-0 risk.
                let credit_factor = (400 - (credit - 450)).max(0);
                score = score - 200 + credit_factor;
            }

            if banking.has_defaults {
                score += 100 + banking.default_count * 50;
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
        raw.insert("provider".into(), json!("Buró de Crédito"));
        raw.insert("query_date".into(), json!(Utc::now().to_rfc3339()));
        raw.insert("folio".into(), json!(format!("BC-MX-{seed:08}")));
        raw.insert("score_type".into(), json!("BC Score"));

        Ok(BankingInfo {
            provider_name: "BURO_CREDITO_MX".to_string(),
            credit_score: Some(450 + (seed % 400) as i32),
            total_debt: Some(dec(seed * 500)),
            payment_history_score: Some(50 + (seed % 50) as i32),
            account_age_months: Some(6 + (seed % 180) as i32),
            has_defaults: seed < 150,
            default_count: if seed < 100 {
                1
            } else if seed < 150 {
                2
            } else {
                0
            },
            monthly_obligations: Some(dec(1000 + (seed % 15_000))),
            available_credit: Some(dec(10_000 + (seed % 100_000))),
            employment_verified: seed % 10 > 3,
            income_verified: seed % 10 > 4,
            raw_data: raw,
        })
    }
}

/// `^[A-Z]{4}\d{6}[HM][A-Z]{5}[A-Z0-9]\d$` without a regex engine.
fn curp_shape_ok(curp: &str) -> bool {
    let b = curp.as_bytes();
    b.len() == 18
        && b[..4].iter().all(u8::is_ascii_uppercase)
        && b[4..10].iter().all(u8::is_ascii_digit)
        && matches!(b[10], b'H' | b'M')
        && b[11..16].iter().all(u8::is_ascii_uppercase)
        && (b[16].is_ascii_uppercase() || b[16].is_ascii_digit())
        && b[17].is_ascii_digit()
}

/// Parse the embedded YYMMDD birth date, reject future dates and minors.
/// Two-digit years 00-30 are read as 2000s, 31-99 as 1900s.
fn validate_birth_date(date_str: &str, result: &mut ValidationResult) {
    let year: i32 = date_str[0..2].parse().unwrap_or(-1);
    let month: u32 = date_str[2..4].parse().unwrap_or(0);
    let day: u32 = date_str[4..6].parse().unwrap_or(0);

    let full_year = if (0..=30).contains(&year) {
        2000 + year
    } else {
        1900 + year
    };

    let Some(birth_date) = NaiveDate::from_ymd_opt(full_year, month, day) else {
        result.add_error(format!(
            "Invalid birth date in CURP: {date_str}. Expected valid YYMMDD format."
        ));
        return;
    };

    let today = Utc::now().date_naive();
    if birth_date > today {
        result.add_error("Birth date in CURP cannot be in the future.");
    }

    let age_years = (today - birth_date).num_days() as f64 / 365.25;
    if age_years < MIN_AGE_YEARS {
        result.add_error(format!(
            "Applicant must be at least 18 years old. CURP indicates age of {} years.",
            age_years.max(0.0) as i64
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curp_valid() {
        let result = MexicoStrategy.validate_document("CURP", "KYBB010115HDFDFCX0");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn curp_rejects_bad_length() {
        let result = MexicoStrategy.validate_document("CURP", "KYBB010115HDF");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("18 characters")));
    }

    #[test]
    fn curp_rejects_bad_shape() {
        let result = MexicoStrategy.validate_document("CURP", "123456789012345678");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.to_lowercase().contains("format")));
    }

    #[test]
    fn curp_rejects_underage_applicant() {
        // Birth date 2020-01-01 — well under 18 for years to come.
        let result = MexicoStrategy.validate_document("CURP", "KYBB200101HDFDFCX0");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("18 years")), "{:?}", result.errors);
    }

    #[test]
    fn curp_rejects_invalid_state_code() {
        // Positions 11-13 'XX' is not a Mexican state.
        let result = MexicoStrategy.validate_document("CURP", "KYBB010115HXXDFCX0");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("state")));
    }

    #[test]
    fn curp_accepts_foreign_born_marker() {
        let result = MexicoStrategy.validate_document("CURP", "KYBB010115HNEDFCX0");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn curp_rejects_impossible_date() {
        // Month 13.
        let result = MexicoStrategy.validate_document("CURP", "KYBB011340HDFDFCX0");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("birth date") || e.contains("YYMMDD")));
    }

    #[test]
    fn wrong_document_type_is_rejected() {
        let result = MexicoStrategy.validate_document("DNI", "KYBB010115HDFDFCX0");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("CURP")));
    }

    #[test]
    fn high_amount_flags_review() {
        let banking = BankingInfo {
            provider_name: "BURO_CREDITO_MX".into(),
            credit_score: Some(600),
            ..Default::default()
        };
        let result = MexicoStrategy.validate_business_rules(
            Decimal::from(350_000),
            Decimal::from(50_000),
            Some(&banking),
        );
        assert!(result.requires_review);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.to_lowercase().contains("review threshold")));
    }

    #[test]
    fn low_credit_score_rejects() {
        let banking = BankingInfo {
            provider_name: "BURO_CREDITO_MX".into(),
            credit_score: Some(474),
            ..Default::default()
        };
        let result = MexicoStrategy.validate_business_rules(
            Decimal::from(10_000),
            Decimal::from(50_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.to_lowercase().contains("below minimum")));
    }

    #[test]
    fn excessive_ratio_rejects() {
        let banking = BankingInfo {
            provider_name: "BURO_CREDITO_MX".into(),
            credit_score: Some(600),
            ..Default::default()
        };
        let result = MexicoStrategy.validate_business_rules(
            Decimal::from(500_000),
            Decimal::from(50_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("6x")));
    }

    #[test]
    fn defaults_flag_review() {
        let banking = BankingInfo {
            provider_name: "BURO_CREDITO_MX".into(),
            credit_score: Some(600),
            has_defaults: true,
            default_count: 2,
            ..Default::default()
        };
        let result = MexicoStrategy.validate_business_rules(
            Decimal::from(10_000),
            Decimal::from(50_000),
            Some(&banking),
        );
        assert!(result.requires_review);
        assert!(result.warnings.iter().any(|w| w.to_lowercase().contains("defaults")));
    }

    #[tokio::test]
    async fn simulated_credit_score_stays_in_range() {
        let info = MexicoStrategy
            .fetch_banking_info("CURP", "KYBB010115HDFDFCX0", "K B")
            .await
            .unwrap();
        let score = info.credit_score.unwrap();
        assert!((450..850).contains(&score));
    }
}
