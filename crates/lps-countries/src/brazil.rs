//! Brazil (BR): CPF validation, Serasa-style rules and scoring.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map};

use lps_schemas::{BankingInfo, DocumentType, ValidationResult};

use crate::provider::{clamp_score, dec, ratio_f64, scaled_trunc, stable_seed};
use crate::CountryStrategy;

const REVIEW_THRESHOLD_BRL: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);
const MIN_SERASA_SCORE: i32 = 500;
/// 35% maximum of income committed to debt service.
const MAX_COMMITMENT_RATIO: f64 = 0.35;
/// Typical repayment term in Brazil.
const TERM_MONTHS: u64 = 36;

pub struct BrazilStrategy;

#[async_trait]
impl CountryStrategy for BrazilStrategy {
    fn country_code(&self) -> &'static str {
        "BR"
    }

    fn country_name(&self) -> &'static str {
        "Brasil"
    }

    fn currency(&self) -> &'static str {
        "BRL"
    }

    fn supported_document_types(&self) -> &'static [DocumentType] {
        &[DocumentType::CPF]
    }

    fn validate_document(&self, document_type: &str, document_number: &str) -> ValidationResult {
        let mut result = ValidationResult::valid();

        if document_type.to_uppercase() != "CPF" {
            result.add_error(format!(
                "Unsupported document type '{document_type}' for Brazil. Expected CPF."
            ));
            return result;
        }

        let cpf: String = document_number.replace(['.', '-', ' '], "");

        if cpf.chars().count() != 11 {
            result.add_error(format!("CPF must be 11 digits. Got {}.", cpf.chars().count()));
            return result;
        }

        if !cpf.chars().all(|c| c.is_ascii_digit()) {
            result.add_error("CPF must contain only digits.");
            return result;
        }

        let first = cpf.chars().next().unwrap_or('0');
        if cpf.chars().all(|c| c == first) {
            result.add_error("Invalid CPF: all digits are the same.");
            return result;
        }

        if !cpf_check_digits_ok(&cpf) {
            result.add_error("Invalid CPF: check digits do not match.");
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

        if amount_requested > REVIEW_THRESHOLD_BRL {
            result.requires_review = true;
            result.add_warning(format!(
                "Amount R$ {amount_requested} exceeds review threshold of \
                 R$ {REVIEW_THRESHOLD_BRL}. Manual review required."
            ));
            result.add_risk_factor("high_amount", true);
        }

        if let Some(banking) = banking_info {
            if let Some(credit) = banking.credit_score {
                result.add_risk_factor("serasa_score", credit);
                if credit < MIN_SERASA_SCORE {
                    result.add_error(format!(
                        "Serasa score {credit} is below minimum required {MIN_SERASA_SCORE}."
                    ));
                }

                if banking.has_defaults {
                    result.requires_review = true;
                    result.add_warning(format!(
                        "Applicant has {} negative records in Serasa/SPC. \
                         Manual review required.",
                        banking.default_count
                    ));
                    result.add_risk_factor("negativado", true);
                }
            }
        }

        if monthly_income.is_zero() {
            result.add_error("Monthly income must be greater than zero.");
        } else {
            let estimated_payment = amount_requested / dec(TERM_MONTHS);
            let existing = banking_info
                .and_then(|b| b.monthly_obligations)
                .unwrap_or(Decimal::ZERO);
            let commitment_ratio = (existing + estimated_payment) / monthly_income;

            result.add_risk_factor("commitment_ratio", ratio_f64(commitment_ratio));
            result.add_risk_factor("estimated_payment", ratio_f64(estimated_payment));

            if ratio_f64(commitment_ratio) > MAX_COMMITMENT_RATIO {
                result.add_error(format!(
                    "Monthly commitment ratio {:.1}% exceeds maximum allowed {:.0}%.",
                    ratio_f64(commitment_ratio) * 100.0,
                    MAX_COMMITMENT_RATIO * 100.0
                ));
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
        // Weights: Serasa score 40%, commitment ratio 30%, negatives 30%.
        let mut score = 400;

        if !monthly_income.is_zero() {
            let estimated_payment = amount_requested / dec(TERM_MONTHS);
            let existing = banking_info
                .and_then(|b| b.monthly_obligations)
                .unwrap_or(Decimal::ZERO);
            let commitment_ratio = (existing + estimated_payment) / monthly_income;
            score += scaled_trunc(commitment_ratio, 857.0).min(300);
        }

        if let Some(banking) = banking_info {
            if let Some(credit) = banking.credit_score {
                // 300-900 maps to 400-0 risk.
                let serasa_factor = (400 - ((credit - 300) as f64 * 0.67) as i32).max(0);
                score = score - 200 + serasa_factor;
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
        raw.insert("provider".into(), json!("Serasa Experian"));
        raw.insert("query_date".into(), json!(Utc::now().to_rfc3339()));
        raw.insert("protocol".into(), json!(format!("SERASA-{seed:010}")));
        raw.insert("score_type".into(), json!("Serasa Score"));
        raw.insert("negativado".into(), json!(seed < 180));

        Ok(BankingInfo {
            provider_name: "SERASA_BR".to_string(),
            credit_score: Some(300 + (seed % 600) as i32),
            total_debt: Some(dec(seed * 200)),
            payment_history_score: Some(45 + (seed % 55) as i32),
            account_age_months: Some(6 + (seed % 150) as i32),
            has_defaults: seed < 180,
            default_count: if seed < 120 {
                1
            } else if seed < 180 {
                2
            } else {
                0
            },
            monthly_obligations: Some(dec(500 + (seed % 5_000))),
            available_credit: Some(dec(2_000 + (seed % 30_000))),
            employment_verified: seed % 10 > 3,
            income_verified: seed % 10 > 4,
            raw_data: raw,
        })
    }
}

/// Double weighted mod-11 verification: the first check digit runs over
/// digits 1-9 with weights 10..2, the second over digits 1-10 with weights
/// 11..2; each check digit is `0` when the remainder is below 2, else
/// `11 - remainder`.
fn cpf_check_digits_ok(cpf: &str) -> bool {
    let digits: Vec<u32> = cpf.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }

    let check = |upto: usize, start_weight: u32| -> u32 {
        let total: u32 = digits[..upto]
            .iter()
            .enumerate()
            .map(|(i, d)| d * (start_weight - i as u32))
            .sum();
        let remainder = total % 11;
        if remainder < 2 {
            0
        } else {
            11 - remainder
        }
    };

    digits[9] == check(9, 10) && digits[10] == check(10, 11)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpf_valid_with_correct_check_digits() {
        // 529.982.247-25 is a classic valid CPF.
        let result = BrazilStrategy.validate_document("CPF", "52998224725");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn cpf_accepts_punctuated_form() {
        let result = BrazilStrategy.validate_document("CPF", "529.982.247-25");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn cpf_rejects_all_same_digits() {
        let result = BrazilStrategy.validate_document("CPF", "11111111111");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("all digits")));
    }

    #[test]
    fn cpf_rejects_wrong_check_digits() {
        let result = BrazilStrategy.validate_document("CPF", "52998224724");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("check digits")));
    }

    #[test]
    fn cpf_rejects_bad_length() {
        let result = BrazilStrategy.validate_document("CPF", "123456789");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("11 digits")));
    }

    #[test]
    fn low_serasa_score_rejects() {
        let banking = BankingInfo {
            provider_name: "SERASA_BR".into(),
            credit_score: Some(450),
            ..Default::default()
        };
        let result = BrazilStrategy.validate_business_rules(
            Decimal::from(10_000),
            Decimal::from(5_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.to_lowercase().contains("below minimum")));
    }

    #[test]
    fn negativado_flags_review() {
        let banking = BankingInfo {
            provider_name: "SERASA_BR".into(),
            credit_score: Some(700),
            has_defaults: true,
            default_count: 1,
            ..Default::default()
        };
        let result = BrazilStrategy.validate_business_rules(
            Decimal::from(10_000),
            Decimal::from(5_000),
            Some(&banking),
        );
        assert!(result.requires_review);
        assert_eq!(result.risk_factors["negativado"], serde_json::Value::Bool(true));
    }

    #[test]
    fn commitment_ratio_over_35_percent_rejects() {
        let banking = BankingInfo {
            provider_name: "SERASA_BR".into(),
            credit_score: Some(700),
            monthly_obligations: Some(Decimal::from(1_500)),
            ..Default::default()
        };
        // 1500 + 18000/36 = 2000 against income 5000 -> 40%.
        let result = BrazilStrategy.validate_business_rules(
            Decimal::from(18_000),
            Decimal::from(5_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("commitment ratio")));
    }

    #[test]
    fn risk_score_deterministic() {
        let banking = BankingInfo {
            provider_name: "SERASA_BR".into(),
            credit_score: Some(650),
            monthly_obligations: Some(Decimal::from(800)),
            has_defaults: false,
            ..Default::default()
        };
        let a = BrazilStrategy.calculate_risk_score(
            Decimal::from(30_000),
            Decimal::from(6_000),
            Some(&banking),
        );
        let b = BrazilStrategy.calculate_risk_score(
            Decimal::from(30_000),
            Decimal::from(6_000),
            Some(&banking),
        );
        assert_eq!(a, b);
        assert!((0..=1000).contains(&a));
    }
}
