//! In-memory ledger implementation.
//!
//! [`InMemoryLedger`] implements [`LedgerClient`] over a shared map. Clones
//! share the same storage, so several clients can be pointed at one "chain".
//! Switches simulate an unavailable contract, failing reads, user-rejected
//! transactions and network latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::ledger::{LedgerClient, TransactionInfo};
use crate::types::{DaoCommsError, Result};

const DEFAULT_CONTRACT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// In-memory implementation of LedgerClient (for testing and demos).
#[derive(Clone)]
pub struct InMemoryLedger {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    block: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    reject_writes: Arc<AtomicBool>,
    latency: Duration,
    address: String,
}

impl InMemoryLedger {
    /// Creates an empty, available ledger.
    pub fn new() -> Self {
        Self::with_address(DEFAULT_CONTRACT_ADDRESS)
    }

    /// Creates an empty ledger reporting the given contract address.
    pub fn with_address(address: &str) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            block: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            reject_writes: Arc::new(AtomicBool::new(false)),
            latency: Duration::ZERO,
            address: address.to_string(),
        }
    }

    /// Returns a handle on the same storage that delays every call.
    pub fn with_latency(&self, latency: Duration) -> Self {
        Self {
            latency,
            ..self.clone()
        }
    }

    /// Toggles the contract's availability flag.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes every `get_data` call fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every `set_data` call fail as a user rejection.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Stores a value directly, bypassing transactions.
    pub async fn insert_raw(&self, key: &str, value: &[u8]) {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_vec());
    }

    /// Reads a value directly, ignoring all switches.
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let data = self.data.read().await;
        data.get(key).cloned()
    }

    /// Number of confirmed writes.
    pub fn block_height(&self) -> u64 {
        self.block.load(Ordering::SeqCst)
    }

    /// Number of `LedgerClient` calls received, across all clones.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_data(&self, key: &str) -> Result<Vec<u8>> {
        self.begin_call().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DaoCommsError::Ledger("connection reset".to_string()));
        }
        let data = self.data.read().await;
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn set_data(&self, key: &str, value: &[u8]) -> Result<TransactionInfo> {
        self.begin_call().await;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(DaoCommsError::from_ledger_message(
                "user rejected transaction",
            ));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(DaoCommsError::LedgerUnavailable);
        }

        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_vec());
        let block_number = self.block.fetch_add(1, Ordering::SeqCst) + 1;

        let mut hasher = Sha256::new();
        hasher.update(block_number.to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(value);
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        Ok(TransactionInfo {
            tx_hash,
            block_number: Some(block_number),
        })
    }

    async fn is_available(&self) -> Result<bool> {
        self.begin_call().await;
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn address(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(DaoCommsError::LedgerUnavailable);
        }
        Ok(self.address.clone())
    }
}
