//! Common value types shared across the crate.
use primitive_types::{H160, U256};
use serde::{Deserialize, Serialize};

/// Contract / account address.
pub type Address = H160;
/// 256-bit EVM machine word.
pub type Word = U256;
/// 4-byte ABI function selector.
pub type Selector = [u8; 4];

/// Fork level. Determines which opcodes/gas rules are honoured by the
/// interpreter (per spec: Homestead, Byzantium, Petersburg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fork {
    Homestead,
    Byzantium,
    Petersburg,
}

impl Fork {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "homestead" => Some(Fork::Homestead),
            "byzantium" => Some(Fork::Byzantium),
            "petersburg" => Some(Fork::Petersburg),
            _ => None,
        }
    }

    /// EIP-145/EIP-1052 etc landed at Byzantium or later.
    pub fn has_shift_ops(&self) -> bool {
        matches!(self, Fork::Petersburg)
    }

    pub fn has_returndatacopy(&self) -> bool {
        !matches!(self, Fork::Homestead)
    }

    pub fn has_extcodehash(&self) -> bool {
        matches!(self, Fork::Petersburg)
    }
}

/// Generate a random address from a `rand::Rng`.
pub fn random_address<R: rand::Rng + ?Sized>(rng: &mut R) -> Address {
    let mut bytes = [0u8; 20];
    rng.fill(&mut bytes);
    Address::from(bytes)
}

/// Keccak-256, matching the teacher's use of `rust-crypto`'s `Sha3::keccak256`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use crypto::digest::Digest;
    use crypto::sha3::Sha3;
    let mut hasher = Sha3::keccak256();
    hasher.input(data);
    let mut out = [0u8; 32];
    hasher.result(&mut out);
    out
}

/// First 4 bytes of keccak256(signature), e.g. `transfer(address,uint256)`.
pub fn function_selector(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Deterministic CREATE address: keccak256(rlp(sender, nonce))[12..].
/// We use the simplified (non-RLP) derivation the teacher's own
/// `contract_utils.rs` relies on for deployment within the fuzzer's
/// sandboxed world state: keccak256(sender ++ nonce_be_bytes)[12..].
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut buf = Vec::with_capacity(20 + 8);
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    let hash = keccak256(&buf);
    Address::from_slice(&hash[12..32])
}

/// Convert a `Word` into a `u128` saturating at `u128::MAX`, used by
/// heuristics that only care about "is this number absurdly large".
pub fn word_to_u128_saturating(v: Word) -> u128 {
    if v > Word::from(u128::MAX) {
        u128::MAX
    } else {
        v.as_u128()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_known_value() {
        // transfer(address,uint256) -> 0xa9059cbb
        let sel = function_selector("transfer(address,uint256)");
        assert_eq!(hex::encode(sel), "a9059cbb");
    }

    #[test]
    fn create_address_is_deterministic() {
        let sender = Address::repeat_byte(0xaa);
        let a1 = create_address(sender, 0);
        let a2 = create_address(sender, 0);
        let a3 = create_address(sender, 1);
        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
    }
}
