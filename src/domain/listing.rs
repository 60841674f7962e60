use super::address::Address;
use super::amount::{PAYMENT_DECIMALS, Quantity, TokenAmount};
use crate::error::{MarketError, Result};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingId(pub u32);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A tokenized asset offered at a fixed unit price.
///
/// The listing binds the asset program that sells the units to the payment
/// program it debits, which is the pair produced by deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetListing {
    pub id: ListingId,
    pub asset_program: Address,
    pub payment_program: Address,
    pub unit_price: TokenAmount,
}

impl AssetListing {
    pub fn new(
        id: ListingId,
        asset_program: Address,
        payment_program: Address,
        unit_price: TokenAmount,
    ) -> Self {
        Self {
            id,
            asset_program,
            payment_program,
            unit_price,
        }
    }

    /// Demo listing priced at 1000 payment units with 18 fractional digits.
    pub fn demo(asset_program: Address, payment_program: Address) -> Result<Self> {
        let unit_price = TokenAmount::parse_units(dec!(1000), PAYMENT_DECIMALS)?;
        Ok(Self::new(
            ListingId(1),
            asset_program,
            payment_program,
            unit_price,
        ))
    }

    /// Allowance required to buy `quantity` units.
    pub fn total_price(&self, quantity: Quantity) -> Result<TokenAmount> {
        self.unit_price.checked_mul(quantity).ok_or_else(|| {
            MarketError::ValidationError(format!(
                "price of {quantity} units overflows at unit price {}",
                self.unit_price
            ))
        })
    }
}
