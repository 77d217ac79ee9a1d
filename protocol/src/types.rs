//! Primitive identifiers shared by every Crossvault component.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chain identifier as used by the messaging layer.
pub type ChainId = u16;

/// Holding (share NFT) identifier within one parent vault.
pub type TokenId = u64;

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

/// Assets are identified by their token contract address.
pub type AssetId = Address;

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derives an address from arbitrary seed bytes (first 20 bytes of
    /// SHA-256). Used for deterministic vault and transport addresses.
    pub fn derive(seed: &[u8]) -> Self {
        let digest = Sha256::digest(seed);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        Address(out)
    }

    /// Convenience for tests and scenario files: derive from a label.
    pub fn from_label(label: &str) -> Self {
        Self::derive(label.as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses a `0x`-prefixed (or bare) 40-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps logs readable.
        write!(f, "0x{}…", hex::encode(&self.0[..4]))
    }
}

/// A vault identified by the chain it lives on and its address there.
///
/// Every cross-chain message carries these explicitly instead of relying
/// on the transport to route implicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultRef {
    pub chain_id: ChainId,
    pub vault: Address,
}

impl VaultRef {
    pub fn new(chain_id: ChainId, vault: Address) -> Self {
        Self { chain_id, vault }
    }
}

impl fmt::Display for VaultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.vault, self.chain_id)
    }
}

/// Risk profile chosen at vault creation. Selects the CPIT cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskProfile {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskProfile::Low => write!(f, "Low"),
            RiskProfile::Medium => write!(f, "Medium"),
            RiskProfile::High => write!(f, "High"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let a = Address::from_label("alice");
        assert_eq!(Address::from_hex(&a.to_hex()), Some(a));
    }

    #[test]
    fn bad_hex_rejected() {
        assert_eq!(Address::from_hex("0x1234"), None);
        assert_eq!(Address::from_hex("zz"), None);
    }

    #[test]
    fn derived_addresses_differ() {
        assert_ne!(Address::from_label("a"), Address::from_label("b"));
        assert!(!Address::from_label("a").is_zero());
        assert!(Address::ZERO.is_zero());
    }
}
