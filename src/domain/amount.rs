use crate::error::MarketError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fractional digits used by the demo payment program.
pub const PAYMENT_DECIMALS: u32 = 18;

/// An unsigned token amount in the smallest denomination.
///
/// Ledger balances routinely exceed `u64` at 18 fractional digits, so the
/// representation is `u128`, serialized as a decimal string. All arithmetic
/// is checked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    pub const ZERO: Self = Self(0);

    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, quantity: Quantity) -> Option<Self> {
        self.0.checked_mul(u128::from(quantity.get())).map(Self)
    }

    /// Converts a human-readable value ("1000", "0.5") into the smallest denomination.
    pub fn parse_units(value: Decimal, decimals: u32) -> Result<Self, MarketError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MarketError::ValidationError(
                "Amount must not be negative".to_string(),
            ));
        }
        let mut scaled = value.normalize();
        if scaled.scale() > decimals {
            return Err(MarketError::ValidationError(format!(
                "{value} has more than {decimals} fractional digits"
            )));
        }
        scaled.rescale(decimals);
        if scaled.scale() != decimals {
            return Err(MarketError::ValidationError(format!(
                "{value} is too large to express with {decimals} fractional digits"
            )));
        }
        u128::try_from(scaled.mantissa())
            .map(Self)
            .map_err(|_| MarketError::ValidationError(format!("{value} is out of range")))
    }

    /// Renders the amount as a human-readable decimal string.
    pub fn format_units(&self, decimals: u32) -> Result<String, MarketError> {
        let mantissa = i128::try_from(self.0)
            .map_err(|_| MarketError::ValidationError("amount out of range".to_string()))?;
        let value = Decimal::try_from_i128_with_scale(mantissa, decimals)
            .map_err(|e| MarketError::ValidationError(format!("cannot format {}: {e}", self.0)))?;
        Ok(value.normalize().to_string())
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for TokenAmount {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse()
            .map(Self)
            .map_err(|e| MarketError::ValidationError(format!("invalid amount '{value}': {e}")))
    }
}

impl From<TokenAmount> for String {
    fn from(amount: TokenAmount) -> Self {
        amount.0.to_string()
    }
}

/// A strictly positive number of asset units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Quantity(u64);

impl Quantity {
    pub const ONE: Self = Self(1);

    pub fn new(value: u64) -> Result<Self, MarketError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(MarketError::ValidationError(
                "Quantity must be positive".to_string(),
            ))
        }
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Quantity {
    type Error = MarketError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for u64 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
