//! Money value object: integer minor units plus an ISO 4217 currency code.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ValidationError;

/// An amount in minor units (cents) with its currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount_cents: i64,
    currency: String,
}

impl Money {
    /// Creates a new amount. Negative amounts and malformed currency
    /// codes are rejected; the code is normalized to upper case.
    pub fn new(amount_cents: i64, currency: impl Into<String>) -> Result<Self, ValidationError> {
        if amount_cents < 0 {
            return Err(ValidationError::out_of_range(
                "amount",
                0,
                i64::MAX,
                amount_cents,
            ));
        }
        let currency = currency.into().trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                "must be a three-letter ISO 4217 code",
            ));
        }
        Ok(Self {
            amount_cents,
            currency,
        })
    }

    pub fn amount_cents(&self) -> i64 {
        self.amount_cents
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount_cents / 100,
            self.amount_cents % 100,
            self.currency
        )
    }
}
