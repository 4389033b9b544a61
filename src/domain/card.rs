//! Card-data validation: Luhn check, brand detection, CVV and expiry rules.
//!
//! Everything here is a pure function of its inputs (the caller supplies
//! `today`), and nothing here logs or stores card data. [`CardDetails`] is
//! wiped from memory on drop; only a masked last-4 ever leaves this module.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// How many years in the future an expiry date may reasonably be.
const MAX_EXPIRY_YEARS_AHEAD: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardBrand {
    Visa,
    Mastercard,
    AmericanExpress,
    Discover,
    DinersClub,
    Jcb,
    Unknown,
}

impl CardBrand {
    /// American Express cards carry a 4-digit CID; everyone else uses 3.
    pub fn cvv_length(self) -> usize {
        match self {
            Self::AmericanExpress => 4,
            _ => 3,
        }
    }
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Visa => "Visa",
            Self::Mastercard => "Mastercard",
            Self::AmericanExpress => "American Express",
            Self::Discover => "Discover",
            Self::DinersClub => "Diners Club",
            Self::Jcb => "JCB",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Transient card data captured for a single request.
///
/// Never serialized back out, never persisted, never printed in full: the
/// `Debug` impl masks everything but the last four digits, and the buffers
/// are zeroized when the value drops.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CardDetails {
    pub number: String,
    pub cvv: String,
    #[serde(default)]
    pub expiry_month: Option<u8>,
    #[serde(default)]
    pub expiry_year: Option<u16>,
    #[serde(default)]
    pub card_holder_name: Option<String>,
}

impl CardDetails {
    /// Masked form suitable for metadata and audit payloads.
    pub fn masked_last4(&self) -> String {
        let digits: String = self.number.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 4 {
            format!("****{}", &digits[digits.len() - 4..])
        } else {
            "****".to_string()
        }
    }

    pub fn validate(&self, today: NaiveDate) -> CardReport {
        validate(
            &self.number,
            &self.cvv,
            self.expiry_month.map(u32::from),
            self.expiry_year.map(i32::from),
            today,
        )
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &self.masked_last4())
            .finish_non_exhaustive()
    }
}

/// Outcome of card validation. Valid iff no field errors accumulated.
#[derive(Debug, Clone, PartialEq)]
pub struct CardReport {
    pub brand: CardBrand,
    pub last4: Option<String>,
    pub errors: BTreeMap<String, String>,
}

impl CardReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Luhn checksum over an already-stripped digit string.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for c in digits.chars().rev() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

/// Brand detection by numeric prefix. An unrecognized prefix is `Unknown`,
/// which by itself does not invalidate the card.
pub fn detect_brand(digits: &str) -> CardBrand {
    let prefix = |n: usize| -> Option<u32> { digits.get(..n).and_then(|p| p.parse().ok()) };

    if let Some(p2) = prefix(2) {
        match p2 {
            34 | 37 => return CardBrand::AmericanExpress,
            36 | 38 => return CardBrand::DinersClub,
            35 => return CardBrand::Jcb,
            51..=55 => return CardBrand::Mastercard,
            65 => return CardBrand::Discover,
            _ => {}
        }
    }
    if let Some(p4) = prefix(4)
        && ((2221..=2720).contains(&p4) || p4 == 6011)
    {
        return if p4 == 6011 {
            CardBrand::Discover
        } else {
            CardBrand::Mastercard
        };
    }
    if let Some(p6) = prefix(6)
        && (622126..=622925).contains(&p6)
    {
        return CardBrand::Discover;
    }
    if let Some(p3) = prefix(3)
        && (644..=649).contains(&p3)
    {
        return CardBrand::Discover;
    }
    if digits.starts_with('4') {
        return CardBrand::Visa;
    }
    CardBrand::Unknown
}

/// Validates a card. Field-level problems accumulate into the report's
/// error map keyed by field name; the card is valid iff the map is empty.
pub fn validate(
    number: &str,
    cvv: &str,
    expiry_month: Option<u32>,
    expiry_year: Option<i32>,
    today: NaiveDate,
) -> CardReport {
    let mut errors = BTreeMap::new();

    if number
        .chars()
        .any(|c| !c.is_ascii_digit() && c != ' ' && c != '-')
    {
        errors.insert(
            "number".to_string(),
            "card number may only contain digits, spaces and hyphens".to_string(),
        );
    }
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();

    if !(13..=19).contains(&digits.len()) {
        errors.insert(
            "number".to_string(),
            "card number must be 13 to 19 digits".to_string(),
        );
    } else if !luhn_valid(&digits) {
        errors.insert(
            "number".to_string(),
            "card number failed checksum validation".to_string(),
        );
    }

    // Luhn has already run; brand only refines CVV expectations and reporting.
    let brand = detect_brand(&digits);
    let last4 = if digits.len() >= 4 {
        Some(digits[digits.len() - 4..].to_string())
    } else {
        None
    };

    if cvv.is_empty() || !cvv.chars().all(|c| c.is_ascii_digit()) {
        errors.insert("cvv".to_string(), "cvv must be numeric".to_string());
    } else if cvv.len() != brand.cvv_length() {
        errors.insert(
            "cvv".to_string(),
            format!("cvv must be {} digits for {}", brand.cvv_length(), brand),
        );
    }

    match (expiry_month, expiry_year) {
        (Some(month), Some(year)) => {
            if !(1..=12).contains(&month) {
                errors.insert(
                    "expiry_month".to_string(),
                    "expiry month must be between 1 and 12".to_string(),
                );
            } else if (year, month) < (today.year(), today.month()) {
                errors.insert("expiry".to_string(), "card is expired".to_string());
            } else if year > today.year() + MAX_EXPIRY_YEARS_AHEAD {
                errors.insert(
                    "expiry".to_string(),
                    "expiry year is too far in the future".to_string(),
                );
            }
        }
        _ => {
            errors.insert(
                "expiry".to_string(),
                "expiry month and year are required".to_string(),
            );
        }
    }

    CardReport {
        brand,
        last4,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    #[test]
    fn test_luhn_known_vectors() {
        assert!(luhn_valid("4532015112830366"));
        assert!(!luhn_valid("4532015112830367"));
        assert!(luhn_valid("4111111111111111"));
        assert!(!luhn_valid(""));
        assert!(!luhn_valid("4111x11111111111"));
    }

    #[test]
    fn test_brand_detection() {
        assert_eq!(detect_brand("4111111111111111"), CardBrand::Visa);
        assert_eq!(detect_brand("5555555555554444"), CardBrand::Mastercard);
        assert_eq!(detect_brand("2223003122003222"), CardBrand::Mastercard);
        assert_eq!(detect_brand("371449635398431"), CardBrand::AmericanExpress);
        assert_eq!(detect_brand("341111111111111"), CardBrand::AmericanExpress);
        assert_eq!(detect_brand("6011111111111117"), CardBrand::Discover);
        assert_eq!(detect_brand("6221261111111111"), CardBrand::Discover);
        assert_eq!(detect_brand("6441111111111111"), CardBrand::Discover);
        assert_eq!(detect_brand("6511111111111111"), CardBrand::Discover);
        assert_eq!(detect_brand("36700102000000"), CardBrand::DinersClub);
        assert_eq!(detect_brand("3530111333300000"), CardBrand::Jcb);
        assert_eq!(detect_brand("9999999999999999"), CardBrand::Unknown);
    }

    #[test]
    fn test_valid_visa() {
        let report = validate("4111111111111111", "123", Some(12), Some(2027), today());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert_eq!(report.brand, CardBrand::Visa);
        assert_eq!(report.last4.as_deref(), Some("1111"));
    }

    #[test]
    fn test_number_with_separators_is_accepted() {
        let report = validate("4111-1111 1111-1111", "123", Some(12), Some(2027), today());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_amex_requires_four_digit_cvv() {
        let report = validate("371449635398431", "123", Some(12), Some(2027), today());
        assert!(!report.is_valid());
        assert!(report.errors.contains_key("cvv"));

        let report = validate("371449635398431", "1234", Some(12), Some(2027), today());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert_eq!(report.brand, CardBrand::AmericanExpress);
    }

    #[test]
    fn test_checksum_failure_reported_on_number() {
        let report = validate("4532015112830367", "123", Some(12), Some(2027), today());
        assert!(!report.is_valid());
        assert_eq!(
            report.errors.get("number").map(String::as_str),
            Some("card number failed checksum validation")
        );
    }

    #[test]
    fn test_unknown_brand_is_not_an_error() {
        // Luhn-valid 16 digits with an unrecognized prefix.
        let report = validate("9999999999999995", "123", Some(12), Some(2027), today());
        assert_eq!(report.brand, CardBrand::Unknown);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_expiry_boundaries() {
        // Exactly the current month is accepted.
        let report = validate("4111111111111111", "123", Some(8), Some(2026), today());
        assert!(report.is_valid(), "errors: {:?}", report.errors);

        // The month before is rejected.
        let report = validate("4111111111111111", "123", Some(7), Some(2026), today());
        assert!(report.errors.contains_key("expiry"));

        // Too far in the future.
        let report = validate("4111111111111111", "123", Some(1), Some(2047), today());
        assert!(report.errors.contains_key("expiry"));
        let report = validate("4111111111111111", "123", Some(1), Some(2046), today());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_missing_expiry_is_an_error() {
        let report = validate("4111111111111111", "123", None, None, today());
        assert!(report.errors.contains_key("expiry"));

        let report = validate("4111111111111111", "123", Some(12), None, today());
        assert!(report.errors.contains_key("expiry"));
    }

    #[test]
    fn test_invalid_month() {
        let report = validate("4111111111111111", "123", Some(13), Some(2027), today());
        assert!(report.errors.contains_key("expiry_month"));
        let report = validate("4111111111111111", "123", Some(0), Some(2027), today());
        assert!(report.errors.contains_key("expiry_month"));
    }

    #[test]
    fn test_errors_accumulate() {
        let report = validate("1234", "x", None, None, today());
        assert!(report.errors.contains_key("number"));
        assert!(report.errors.contains_key("cvv"));
        assert!(report.errors.contains_key("expiry"));
    }

    #[test]
    fn test_debug_masks_card_number() {
        let card = CardDetails {
            number: "4111111111111111".to_string(),
            cvv: "123".to_string(),
            expiry_month: Some(12),
            expiry_year: Some(2027),
            card_holder_name: None,
        };
        let rendered = format!("{card:?}");
        assert!(rendered.contains("****1111"));
        assert!(!rendered.contains("4111111111111111"));
        assert!(!rendered.contains("123"));
    }
}
