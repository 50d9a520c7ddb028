//! Spain (ES): DNI/NIE validation, CIRBE-style business rules and scoring.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map};

use lps_schemas::{BankingInfo, DocumentType, ValidationResult};

use crate::provider::{clamp_score, dec, ratio_f64, scaled_trunc, stable_seed};
use crate::CountryStrategy;

/// Checksum alphabet: the control letter is indexed by `number mod 23`.
const DNI_LETTERS: &[u8] = b"TRWAGMYFPDXBNJZSQVHLCKE";

const REVIEW_THRESHOLD_EUR: Decimal = Decimal::from_parts(15_000, 0, 0, false, 0);
/// 60% maximum debt-to-income.
const MAX_DEBT_TO_INCOME: f64 = 0.60;
const MIN_PAYMENT_HISTORY_SCORE: i32 = 50;
const MIN_ACCOUNT_AGE_MONTHS: i32 = 6;
/// Estimated repayment term used for the monthly-payment approximation.
const TERM_MONTHS: u64 = 36;

pub struct SpainStrategy;

#[async_trait]
impl CountryStrategy for SpainStrategy {
    fn country_code(&self) -> &'static str {
        "ES"
    }

    fn country_name(&self) -> &'static str {
        "España"
    }

    fn currency(&self) -> &'static str {
        "EUR"
    }

    fn supported_document_types(&self) -> &'static [DocumentType] {
        &[DocumentType::DNI, DocumentType::NIE]
    }

    fn validate_document(&self, document_type: &str, document_number: &str) -> ValidationResult {
        let doc = normalize(document_number);
        match document_type.to_uppercase().as_str() {
            "DNI" => validate_dni(&doc),
            "NIE" => validate_nie(&doc),
            other => {
                let mut result = ValidationResult::valid();
                result.add_error(format!(
                    "Unsupported document type '{other}' for Spain. Expected DNI or NIE."
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

        if amount_requested > REVIEW_THRESHOLD_EUR {
            result.requires_review = true;
            result.add_warning(format!(
                "Amount €{amount_requested} exceeds review threshold of €{REVIEW_THRESHOLD_EUR}. \
                 Manual review required."
            ));
            result.add_risk_factor("high_amount", true);
        }

        let Some(banking) = banking_info else {
            return result;
        };

        // Debt-to-income with the new loan's estimated monthly payment.
        if let Some(obligations) = banking.monthly_obligations {
            let estimated_payment = amount_requested / dec(TERM_MONTHS);
            let new_ratio = (obligations + estimated_payment) / monthly_income;
            result.add_risk_factor("debt_to_income_ratio", ratio_f64(new_ratio));

            if ratio_f64(new_ratio) > MAX_DEBT_TO_INCOME {
                result.add_error(format!(
                    "Debt-to-income ratio {:.1}% exceeds maximum allowed {:.0}%.",
                    ratio_f64(new_ratio) * 100.0,
                    MAX_DEBT_TO_INCOME * 100.0
                ));
            }
        }

        if let Some(history) = banking.payment_history_score {
            result.add_risk_factor("payment_history_score", history);
            if history < MIN_PAYMENT_HISTORY_SCORE {
                result.add_error(format!(
                    "Payment history score {history} is below minimum required \
                     {MIN_PAYMENT_HISTORY_SCORE}."
                ));
            }
        }

        if let Some(age) = banking.account_age_months {
            result.add_risk_factor("account_age_months", age);
            if age < MIN_ACCOUNT_AGE_MONTHS {
                result.add_warning(format!(
                    "Account age {age} months is below recommended {MIN_ACCOUNT_AGE_MONTHS} months."
                ));
            }
        }

        if banking.has_defaults {
            result.requires_review = true;
            result.add_warning(format!(
                "Applicant has {} previous defaults. Manual review required.",
                banking.default_count
            ));
            result.add_risk_factor("has_defaults", true);
            result.add_risk_factor("default_count", banking.default_count);
        }

        result
    }

    fn calculate_risk_score(
        &self,
        amount_requested: Decimal,
        monthly_income: Decimal,
        banking_info: Option<&BankingInfo>,
    ) -> i32 {
        // Weights: amount/income 30%, credit score 30%, payment history 20%,
        // defaults 20%.
        let mut score = 500;

        if !monthly_income.is_zero() {
            let ratio = amount_requested / monthly_income;
            score += scaled_trunc(ratio, 50.0).min(300);
        }

        if let Some(banking) = banking_info {
            if let Some(credit) = banking.credit_score {
                // 600-900 maps to 300-0 risk.
                let credit_factor = (300 - (credit - 600)).max(0);
                score = score - 150 + credit_factor;
            }

            if let Some(history) = banking.payment_history_score {
                // 0-100 maps to 200-0 risk.
                score += 200 - history * 2;
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
        // Simulated CIRBE report, reproducible per document.
        let seed = stable_seed(document_number);

        let mut raw = Map::new();
        raw.insert("provider".into(), json!("CIRBE"));
        raw.insert("query_date".into(), json!(Utc::now().to_rfc3339()));
        raw.insert("report_id".into(), json!(format!("CIRBE-{seed:06}")));

        Ok(BankingInfo {
            provider_name: "CIRBE_ES".to_string(),
            credit_score: Some(600 + (seed % 300) as i32),
            total_debt: Some(dec(seed * 100)),
            payment_history_score: Some(60 + (seed % 40) as i32),
            account_age_months: Some(12 + (seed % 120) as i32),
            has_defaults: seed < 100,
            default_count: if seed < 100 { 1 } else { 0 },
            monthly_obligations: Some(dec(200 + (seed % 800))),
            available_credit: Some(dec(5000 + (seed % 20_000))),
            employment_verified: seed % 10 > 2,
            income_verified: seed % 10 > 3,
            raw_data: raw,
        })
    }
}

fn normalize(document_number: &str) -> String {
    document_number
        .to_uppercase()
        .replace([' ', '-'], "")
}

fn checksum_letter(number: u32) -> char {
    DNI_LETTERS[(number % 23) as usize] as char
}

fn validate_dni(dni: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    let chars: Vec<char> = dni.chars().collect();
    if chars.len() != 9 {
        result.add_error(format!(
            "DNI must be 9 characters (8 digits + 1 letter). Got {}.",
            chars.len()
        ));
        return result;
    }

    let number_part: String = chars[..8].iter().collect();
    let Ok(number) = number_part.parse::<u32>() else {
        result.add_error("DNI must start with 8 digits.");
        return result;
    };
    let letter = chars[8];
    if !letter.is_ascii_alphabetic() {
        result.add_error("DNI must end with a letter.");
        return result;
    }

    let expected = checksum_letter(number);
    if letter != expected {
        result.add_error(format!("Invalid DNI checksum. Expected letter '{expected}'."));
    }

    result
}

fn validate_nie(nie: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    let chars: Vec<char> = nie.chars().collect();
    if chars.len() != 9 {
        result.add_error(format!("NIE must be 9 characters. Got {}.", chars.len()));
        return result;
    }

    let prefix_digit = match chars[0] {
        'X' => '0',
        'Y' => '1',
        'Z' => '2',
        _ => {
            result.add_error("NIE must start with X, Y, or Z.");
            return result;
        }
    };

    let middle: String = chars[1..8].iter().collect();
    if !middle.chars().all(|c| c.is_ascii_digit()) {
        result.add_error("NIE must have 7 digits after the prefix.");
        return result;
    }

    // Checksum runs over the prefix mapped to a digit plus the 7 digits.
    let number: u32 = format!("{prefix_digit}{middle}")
        .parse()
        .unwrap_or_default();
    let expected = checksum_letter(number);
    if chars[8] != expected {
        result.add_error(format!("Invalid NIE checksum. Expected letter '{expected}'."));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn dni_valid_checksum() {
        // 12345678 % 23 == 14 -> 'Z'
        let result = SpainStrategy.validate_document("DNI", "12345678Z");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn dni_rejects_bad_checksum_and_names_expected_letter() {
        let result = SpainStrategy.validate_document("DNI", "12345678A");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains('Z')), "{:?}", result.errors);
    }

    #[test]
    fn dni_rejects_bad_length() {
        let result = SpainStrategy.validate_document("DNI", "1234567");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("9 characters")));
    }

    #[test]
    fn dni_normalizes_spaces_dashes_and_case() {
        let result = SpainStrategy.validate_document("DNI", " 12345678-z ");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn nie_valid_checksum() {
        // X1234567 -> 01234567 % 23 == 19 -> 'L'
        let result = SpainStrategy.validate_document("NIE", "X1234567L");
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn nie_rejects_bad_prefix() {
        let result = SpainStrategy.validate_document("NIE", "A1234567M");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("X, Y, or Z")));
    }

    #[test]
    fn unsupported_document_type_is_rejected() {
        let result = SpainStrategy.validate_document("CURP", "12345678Z");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("DNI or NIE")));
    }

    #[test]
    fn high_amount_flags_review() {
        let result = SpainStrategy.validate_business_rules(
            Decimal::from(20_000),
            Decimal::from(3_000),
            None,
        );
        assert!(result.is_valid);
        assert!(result.requires_review);
        assert_eq!(result.risk_factors["high_amount"], Value::Bool(true));
    }

    #[test]
    fn zero_income_is_a_hard_error() {
        let result =
            SpainStrategy.validate_business_rules(Decimal::from(5_000), Decimal::ZERO, None);
        assert!(!result.is_valid);
    }

    #[test]
    fn excessive_debt_ratio_rejects() {
        let banking = BankingInfo {
            provider_name: "CIRBE_ES".into(),
            monthly_obligations: Some(Decimal::from(2_500)),
            ..Default::default()
        };
        // obligations 2500 + 10000/36 ≈ 2778 against income 3000 -> ~92%.
        let result = SpainStrategy.validate_business_rules(
            Decimal::from(10_000),
            Decimal::from(3_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("Debt-to-income")));
    }

    #[test]
    fn low_payment_history_rejects() {
        let banking = BankingInfo {
            provider_name: "CIRBE_ES".into(),
            payment_history_score: Some(40),
            ..Default::default()
        };
        let result = SpainStrategy.validate_business_rules(
            Decimal::from(5_000),
            Decimal::from(3_000),
            Some(&banking),
        );
        assert!(!result.is_valid);
    }

    #[test]
    fn young_account_only_warns() {
        let banking = BankingInfo {
            provider_name: "CIRBE_ES".into(),
            account_age_months: Some(3),
            ..Default::default()
        };
        let result = SpainStrategy.validate_business_rules(
            Decimal::from(5_000),
            Decimal::from(3_000),
            Some(&banking),
        );
        assert!(result.is_valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn risk_score_is_deterministic_and_clamped() {
        let banking = BankingInfo {
            provider_name: "CIRBE_ES".into(),
            credit_score: Some(650),
            payment_history_score: Some(80),
            has_defaults: true,
            default_count: 2,
            ..Default::default()
        };
        let a = SpainStrategy.calculate_risk_score(
            Decimal::from(10_000),
            Decimal::from(3_000),
            Some(&banking),
        );
        let b = SpainStrategy.calculate_risk_score(
            Decimal::from(10_000),
            Decimal::from(3_000),
            Some(&banking),
        );
        assert_eq!(a, b);
        assert!((0..=1000).contains(&a));
    }

    #[tokio::test]
    async fn simulated_provider_is_reproducible() {
        let first = SpainStrategy
            .fetch_banking_info("DNI", "12345678Z", "A B")
            .await
            .unwrap();
        let second = SpainStrategy
            .fetch_banking_info("DNI", "12345678Z", "A B")
            .await
            .unwrap();
        assert_eq!(first.credit_score, second.credit_score);
        assert_eq!(first.monthly_obligations, second.monthly_obligations);
        assert_eq!(first.has_defaults, second.has_defaults);
        let score = first.credit_score.unwrap();
        assert!((600..900).contains(&score));
    }
}
