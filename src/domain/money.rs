use crate::error::GatewayError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency label shown on handset screens.
pub const CURRENCY: &str = "NGN";

/// Largest amount accepted from a keypad: twelve integer digits.
pub const MAX_AMOUNT: Decimal = dec!(999999999999);

/// A positive monetary amount entered by a subscriber.
///
/// Amounts carry at most two decimal places (kobo). Anything else typed on the
/// keypad is rejected before it reaches the fee calculator or the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, GatewayError> {
        if value <= Decimal::ZERO {
            return Err(GatewayError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        if value > MAX_AMOUNT {
            return Err(GatewayError::ValidationError(format!(
                "Amount exceeds {MAX_AMOUNT}"
            )));
        }
        if value.normalize().scale() > 2 {
            return Err(GatewayError::ValidationError(
                "Amount has more than two decimal places".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Parses a keypad token such as `3000` or `250.50`.
    pub fn parse(token: &str) -> Result<Self, GatewayError> {
        let token = token.trim();
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(GatewayError::ValidationError(format!(
                "Not an amount: {token:?}"
            )));
        }
        let value = Decimal::from_str(token)
            .map_err(|e| GatewayError::ValidationError(format!("Not an amount: {e}")))?;
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = GatewayError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display(self.0))
    }
}

/// Renders a decimal the way handset screens expect: no trailing zeros,
/// so `3000.00` is `3000` and `0.750` is `0.75`.
pub fn display(value: Decimal) -> String {
    value.normalize().to_string()
}
