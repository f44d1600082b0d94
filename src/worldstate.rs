//! In-memory world-state store (C3). Grounded on spec.md 4.3 and the
//! source's `evm/storage_emulation.py`. Supports snapshot/restore and an
//! optional lazily-consulted remote oracle.
use crate::types::{keccak256, Address, Word};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: Word,
    pub code_hash: [u8; 32],
}

/// Abstracts the remote full-node used when `--remote-fuzzing` is set.
/// Kept as a trait (spec.md Non-goals: "the fetcher is an interface") so
/// unit tests run with `NullOracle` and never touch the network.
pub trait RemoteOracle: std::fmt::Debug {
    fn get_code(&self, addr: Address) -> Option<Vec<u8>>;
    fn get_storage_at(&self, addr: Address, slot: Word) -> Option<Word>;
    fn get_balance(&self, addr: Address) -> Option<Word>;
    fn get_transaction_count(&self, addr: Address) -> Option<u64>;
}

#[derive(Debug, Default)]
pub struct NullOracle;
impl RemoteOracle for NullOracle {
    fn get_code(&self, _addr: Address) -> Option<Vec<u8>> {
        None
    }
    fn get_storage_at(&self, _addr: Address, _slot: Word) -> Option<Word> {
        None
    }
    fn get_balance(&self, _addr: Address) -> Option<Word> {
        None
    }
    fn get_transaction_count(&self, _addr: Address) -> Option<u64> {
        None
    }
}

/// Persists values already fetched from a `JsonRpcOracle` to disk, keyed by
/// block tag, so repeated campaigns against the same fork don't re-fetch the
/// same accounts over the network. Only compiled in with `onchain_cache`.
#[cfg(feature = "onchain_cache")]
#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockCache {
    code: HashMap<String, String>,
    storage: HashMap<String, String>,
    balance: HashMap<String, String>,
    tx_count: HashMap<String, u64>,
}

#[cfg(feature = "onchain_cache")]
impl BlockCache {
    fn path(endpoint: &str, block: Option<u64>) -> std::path::PathBuf {
        let tag = block.map(|b| b.to_string()).unwrap_or_else(|| "latest".to_string());
        let digest = keccak256(endpoint.as_bytes());
        std::path::PathBuf::from(format!(".evm-ga-fuzz-cache-{}-{}.json", hex::encode(&digest[..8]), tag))
    }

    fn load(endpoint: &str, block: Option<u64>) -> Self {
        std::fs::read_to_string(Self::path(endpoint, block))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, endpoint: &str, block: Option<u64>) {
        if let Ok(s) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(Self::path(endpoint, block), s);
        }
    }
}

/// JSON-RPC backed oracle (`eth_getCode`, `eth_getStorageAt`,
/// `eth_getBalance`, `eth_getTransactionCount`) used for onchain fuzzing.
/// Network calls are retried with the `retry` crate to tolerate transient
/// RPC hiccups, per SPEC_FULL.md's ambient stack. With the `onchain_cache`
/// feature, results are also persisted to an on-disk `BlockCache` so a
/// second campaign against the same block doesn't repeat the RPC round trip.
#[derive(Debug)]
pub struct JsonRpcOracle {
    pub endpoint: String,
    pub block: Option<u64>,
    #[cfg(feature = "onchain_cache")]
    cache: std::sync::Mutex<BlockCache>,
}

impl JsonRpcOracle {
    pub fn new(endpoint: impl Into<String>, block: Option<u64>) -> Self {
        let endpoint = endpoint.into();
        #[cfg(feature = "onchain_cache")]
        let cache = std::sync::Mutex::new(BlockCache::load(&endpoint, block));
        Self {
            #[cfg(feature = "onchain_cache")]
            cache,
            endpoint,
            block,
        }
    }

    fn call(&self, method: &str, params: serde_json::Value) -> Option<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let endpoint = self.endpoint.clone();
        let body_clone = body.clone();
        let resp = retry::retry(retry::delay::Fixed::from_millis(200).take(3), move || {
            reqwest::blocking::Client::new()
                .post(&endpoint)
                .json(&body_clone)
                .send()
                .and_then(|r| r.json::<serde_json::Value>())
                .map_err(|e| e.to_string())
        })
        .ok()?;
        resp.get("result").cloned()
    }

    fn block_tag(&self) -> serde_json::Value {
        match self.block {
            Some(n) => serde_json::Value::String(format!("0x{:x}", n)),
            None => serde_json::Value::String("latest".to_string()),
        }
    }
}

impl RemoteOracle for JsonRpcOracle {
    fn get_code(&self, addr: Address) -> Option<Vec<u8>> {
        #[cfg(feature = "onchain_cache")]
        {
            let key = format!("{:?}", addr);
            if let Some(hexed) = self.cache.lock().unwrap().code.get(&key) {
                return hex::decode(hexed).ok();
            }
        }
        let v = self.call(
            "eth_getCode",
            serde_json::json!([format!("{:?}", addr), self.block_tag()]),
        )?;
        let s = v.as_str()?;
        let code = hex::decode(s.trim_start_matches("0x")).ok()?;
        #[cfg(feature = "onchain_cache")]
        {
            let mut cache = self.cache.lock().unwrap();
            cache.code.insert(format!("{:?}", addr), hex::encode(&code));
            cache.save(&self.endpoint, self.block);
        }
        Some(code)
    }

    fn get_storage_at(&self, addr: Address, slot: Word) -> Option<Word> {
        #[cfg(feature = "onchain_cache")]
        {
            let key = format!("{:?}:{:x}", addr, slot);
            if let Some(hexed) = self.cache.lock().unwrap().storage.get(&key) {
                return Word::from_str_radix(hexed, 16).ok();
            }
        }
        let v = self.call(
            "eth_getStorageAt",
            serde_json::json!([format!("{:?}", addr), format!("0x{:x}", slot), self.block_tag()]),
        )?;
        let s = v.as_str()?;
        let value = Word::from_str_radix(s.trim_start_matches("0x"), 16).ok()?;
        #[cfg(feature = "onchain_cache")]
        {
            let mut cache = self.cache.lock().unwrap();
            cache.storage.insert(format!("{:?}:{:x}", addr, slot), format!("{:x}", value));
            cache.save(&self.endpoint, self.block);
        }
        Some(value)
    }

    fn get_balance(&self, addr: Address) -> Option<Word> {
        #[cfg(feature = "onchain_cache")]
        {
            let key = format!("{:?}", addr);
            if let Some(hexed) = self.cache.lock().unwrap().balance.get(&key) {
                return Word::from_str_radix(hexed, 16).ok();
            }
        }
        let v = self.call(
            "eth_getBalance",
            serde_json::json!([format!("{:?}", addr), self.block_tag()]),
        )?;
        let s = v.as_str()?;
        let value = Word::from_str_radix(s.trim_start_matches("0x"), 16).ok()?;
        #[cfg(feature = "onchain_cache")]
        {
            let mut cache = self.cache.lock().unwrap();
            cache.balance.insert(format!("{:?}", addr), format!("{:x}", value));
            cache.save(&self.endpoint, self.block);
        }
        Some(value)
    }

    fn get_transaction_count(&self, addr: Address) -> Option<u64> {
        #[cfg(feature = "onchain_cache")]
        {
            let key = format!("{:?}", addr);
            if let Some(n) = self.cache.lock().unwrap().tx_count.get(&key) {
                return Some(*n);
            }
        }
        let v = self.call(
            "eth_getTransactionCount",
            serde_json::json!([format!("{:?}", addr), self.block_tag()]),
        )?;
        let s = v.as_str()?;
        let n = u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()?;
        #[cfg(feature = "onchain_cache")]
        {
            let mut cache = self.cache.lock().unwrap();
            cache.tx_count.insert(format!("{:?}", addr), n);
            cache.save(&self.endpoint, self.block);
        }
        Some(n)
    }
}

/// A deep-cloned copy of the three live maps, used to roll back after
/// every individual's execution.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    accounts: HashMap<Address, Account>,
    storage: HashMap<Address, HashMap<Word, Word>>,
    code: HashMap<[u8; 32], Vec<u8>>,
}

pub struct WorldState {
    accounts: HashMap<Address, Account>,
    storage: HashMap<Address, HashMap<Word, Word>>,
    code: HashMap<[u8; 32], Vec<u8>>,
    oracle: Box<dyn RemoteOracle>,
}

impl std::fmt::Debug for WorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldState")
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

impl WorldState {
    pub fn new(oracle: Box<dyn RemoteOracle>) -> Self {
        Self {
            accounts: HashMap::new(),
            storage: HashMap::new(),
            code: HashMap::new(),
            oracle,
        }
    }

    pub fn local() -> Self {
        Self::new(Box::new(NullOracle))
    }

    pub fn account(&self, addr: Address) -> Account {
        self.accounts.get(&addr).cloned().unwrap_or_default()
    }

    pub fn set_balance(&mut self, addr: Address, balance: Word) {
        self.accounts.entry(addr).or_default().balance = balance;
    }

    pub fn balance(&mut self, addr: Address) -> Word {
        if let Some(acct) = self.accounts.get(&addr) {
            if acct.balance != Word::zero() || acct.nonce != 0 || acct.code_hash != [0u8; 32] {
                return acct.balance;
            }
        }
        if let Some(b) = self.oracle.get_balance(addr) {
            self.accounts.entry(addr).or_default().balance = b;
            return b;
        }
        Word::zero()
    }

    /// `get_storage(addr, slot)`: 0 if missing and no remote oracle is
    /// configured; otherwise pull-through-cache from the oracle,
    /// per spec.md 4.3.
    pub fn get_storage(&mut self, addr: Address, slot: Word) -> Word {
        if let Some(v) = self.storage.get(&addr).and_then(|m| m.get(&slot)) {
            return *v;
        }
        if let Some(v) = self.oracle.get_storage_at(addr, slot) {
            self.storage.entry(addr).or_default().insert(slot, v);
            return v;
        }
        Word::zero()
    }

    pub fn set_storage(&mut self, addr: Address, slot: Word, value: Word) {
        self.storage.entry(addr).or_default().insert(slot, value);
    }

    pub fn code(&mut self, addr: Address) -> Vec<u8> {
        let hash = self.accounts.get(&addr).map(|a| a.code_hash);
        if let Some(hash) = hash {
            if let Some(code) = self.code.get(&hash) {
                return code.clone();
            }
        }
        if let Some(code) = self.oracle.get_code(addr) {
            self.deploy(addr, &code);
            return code;
        }
        vec![]
    }

    /// Places `code` at `addr`, incrementing its nonce (CREATE semantics).
    pub fn deploy(&mut self, addr: Address, code: &[u8]) {
        let hash = keccak256(code);
        self.code.insert(hash, code.to_vec());
        let acct = self.accounts.entry(addr).or_default();
        acct.nonce += 1;
        acct.code_hash = hash;
    }

    pub fn nonce(&mut self, addr: Address) -> u64 {
        if let Some(acct) = self.accounts.get(&addr) {
            return acct.nonce;
        }
        if let Some(n) = self.oracle.get_transaction_count(addr) {
            self.accounts.entry(addr).or_default().nonce = n;
            return n;
        }
        0
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            accounts: self.accounts.clone(),
            storage: self.storage.clone(),
            code: self.code.clone(),
        }
    }

    pub fn restore(&mut self, snap: Snapshot) {
        self.accounts = snap.accounts;
        self.storage = snap.storage;
        self.code = snap.code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_storage_is_zero_without_oracle() {
        let mut ws = WorldState::local();
        let addr = Address::repeat_byte(1);
        assert_eq!(ws.get_storage(addr, Word::from(5)), Word::zero());
    }

    #[test]
    fn snapshot_restore_is_idempotent() {
        let mut ws = WorldState::local();
        let addr = Address::repeat_byte(1);
        let snap = ws.snapshot();
        ws.set_storage(addr, Word::from(1), Word::from(42));
        ws.set_balance(addr, Word::from(100));
        assert_eq!(ws.get_storage(addr, Word::from(1)), Word::from(42));
        ws.restore(snap);
        assert_eq!(ws.get_storage(addr, Word::from(1)), Word::zero());
    }

    #[test]
    fn deploy_increments_nonce_and_sets_code() {
        let mut ws = WorldState::local();
        let addr = Address::repeat_byte(2);
        assert_eq!(ws.nonce(addr), 0);
        ws.deploy(addr, &[0x60, 0x00]);
        assert_eq!(ws.nonce(addr), 1);
        assert_eq!(ws.code(addr), vec![0x60, 0x00]);
    }
}
