use crate::error::MarketError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 20-byte ledger address, rendered as `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Deterministic address for tests and fixtures: the last byte is `n`.
    pub const fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        let be = n.to_be_bytes();
        let mut i = 0;
        while i < 8 {
            bytes[12 + i] = be[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Address of a program published by `deployer` at sequence `nonce`.
    pub fn derive(deployer: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(deployer.0);
        hasher.update(nonce.to_be_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let decoded = hex::decode(digits)
            .map_err(|e| MarketError::ValidationError(format!("invalid address '{s}': {e}")))?;
        let bytes: [u8; 20] = decoded.try_into().map_err(|v: Vec<u8>| {
            MarketError::ValidationError(format!(
                "address must be 20 bytes, got {} bytes",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Handle the ledger assigns to an admitted operation (its transaction hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn compute(sender: &Address, nonce: u64, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sender.as_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.update(payload);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for TxHash {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let digits = value.strip_prefix("0x").unwrap_or(&value);
        let decoded = hex::decode(digits)
            .map_err(|e| MarketError::ValidationError(format!("invalid tx hash: {e}")))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| MarketError::ValidationError("tx hash must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let address = Address::from_low_u64(0xbeef);
        let text = address.to_string();
        assert_eq!(text, "0x000000000000000000000000000000000000beef");
        assert_eq!(text.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!(matches!(
            "0xdeadbeef".parse::<Address>(),
            Err(MarketError::ValidationError(_))
        ));
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_derived_addresses_depend_on_nonce() {
        let deployer = Address::from_low_u64(1);
        assert_ne!(Address::derive(&deployer, 0), Address::derive(&deployer, 1));
        assert_eq!(Address::derive(&deployer, 0), Address::derive(&deployer, 0));
    }

    #[test]
    fn test_address_serde_as_hex_string() {
        let address = Address::from_low_u64(7);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0x0000000000000000000000000000000000000007\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
