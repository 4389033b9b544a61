use crate::domain::payment::Amount;
use crate::error::{PaymentError, ProviderError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217 currencies with no minor unit (exponent zero). For these the
/// canonical integer amount and the major-unit amount are the same number.
const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// An ISO 4217 currency code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::invalid_field(
                "currency",
                "currency must be a three-letter ISO code",
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn is_zero_decimal(&self) -> bool {
        ZERO_DECIMAL.contains(&self.0.as_str())
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn clp() -> Self {
        Self("CLP".to_string())
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a provider expects amounts on the wire.
///
/// Declared once per provider by its factory; nothing else in the system is
/// allowed to make this decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountStyle {
    /// Integer minor units, zero-decimal currencies included (Stripe style).
    MinorUnits,
    /// Decimal strings: `"7.93"` for USD, `"793"` for CLP (PayPal style).
    DecimalString,
}

/// A provider-wire amount. Produced only by [`to_provider_units`] and parsed
/// back only by [`from_provider_units`]; adapters pass it through untouched,
/// which is what rules out a second conversion on either side of the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireAmount {
    Minor(i64),
    Text(String),
}

impl fmt::Display for WireAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minor(n) => n.fmt(f),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Converts a canonical minor-unit amount into the provider's wire shape.
pub fn to_provider_units(amount: Amount, currency: &Currency, style: AmountStyle) -> WireAmount {
    match style {
        AmountStyle::MinorUnits => WireAmount::Minor(amount.minor_units()),
        AmountStyle::DecimalString => {
            if currency.is_zero_decimal() {
                WireAmount::Text(amount.minor_units().to_string())
            } else {
                WireAmount::Text(Decimal::new(amount.minor_units(), 2).to_string())
            }
        }
    }
}

/// Parses a provider-reported amount back into canonical minor units,
/// rounding half-up when the wire value carries fractional digits.
pub fn from_provider_units(
    wire: &WireAmount,
    currency: &Currency,
    style: AmountStyle,
) -> Result<Amount> {
    let minor = match (style, wire) {
        (AmountStyle::MinorUnits, WireAmount::Minor(n)) => *n,
        (AmountStyle::DecimalString, WireAmount::Text(raw)) => {
            let parsed: Decimal = raw.parse().map_err(|_| {
                PaymentError::Provider(ProviderError::InvalidPayload(format!(
                    "unparseable amount for {currency}"
                )))
            })?;
            let scaled = if currency.is_zero_decimal() {
                parsed
            } else {
                parsed * Decimal::from(100)
            };
            scaled
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .ok_or_else(|| {
                    PaymentError::Provider(ProviderError::InvalidPayload(format!(
                        "amount out of range for {currency}"
                    )))
                })?
        }
        _ => {
            return Err(PaymentError::Provider(ProviderError::InvalidPayload(
                "wire amount shape does not match the provider's declared style".to_string(),
            )));
        }
    };
    Amount::new(minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(n: i64) -> Amount {
        Amount::new(n).unwrap()
    }

    #[test]
    fn test_currency_normalizes_case() {
        let currency = Currency::new("usd").unwrap();
        assert_eq!(currency.code(), "USD");
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("us$").is_err());
    }

    #[test]
    fn test_minor_units_style_passes_through() {
        let wire = to_provider_units(amount(793), &Currency::usd(), AmountStyle::MinorUnits);
        assert_eq!(wire, WireAmount::Minor(793));
        // Zero-decimal currencies are already whole units.
        let wire = to_provider_units(amount(793), &Currency::clp(), AmountStyle::MinorUnits);
        assert_eq!(wire, WireAmount::Minor(793));
    }

    #[test]
    fn test_decimal_string_style() {
        let wire = to_provider_units(amount(793), &Currency::usd(), AmountStyle::DecimalString);
        assert_eq!(wire, WireAmount::Text("7.93".to_string()));
        let wire = to_provider_units(amount(793), &Currency::clp(), AmountStyle::DecimalString);
        assert_eq!(wire, WireAmount::Text("793".to_string()));
    }

    #[test]
    fn test_round_trip_usd() {
        for n in [1, 99, 100, 793, 10_000, 123_456_789] {
            let wire = to_provider_units(amount(n), &Currency::usd(), AmountStyle::DecimalString);
            let back =
                from_provider_units(&wire, &Currency::usd(), AmountStyle::DecimalString).unwrap();
            assert_eq!(back.minor_units(), n);
        }
    }

    #[test]
    fn test_clp_never_gains_decimals() {
        let wire = to_provider_units(amount(793), &Currency::clp(), AmountStyle::DecimalString);
        assert_eq!(wire.to_string(), "793");
        let back =
            from_provider_units(&wire, &Currency::clp(), AmountStyle::DecimalString).unwrap();
        assert_eq!(back.minor_units(), 793);
    }

    #[test]
    fn test_round_half_up_from_provider() {
        let back = from_provider_units(
            &WireAmount::Text("7.935".to_string()),
            &Currency::usd(),
            AmountStyle::DecimalString,
        )
        .unwrap();
        assert_eq!(back.minor_units(), 794);

        let back = from_provider_units(
            &WireAmount::Text("7.934".to_string()),
            &Currency::usd(),
            AmountStyle::DecimalString,
        )
        .unwrap();
        assert_eq!(back.minor_units(), 793);
    }

    #[test]
    fn test_mismatched_shape_is_rejected() {
        let result = from_provider_units(
            &WireAmount::Minor(793),
            &Currency::usd(),
            AmountStyle::DecimalString,
        );
        assert!(matches!(
            result,
            Err(PaymentError::Provider(ProviderError::InvalidPayload(_)))
        ));
    }
}
