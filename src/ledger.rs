//! Ledger interfaces for the contract key-value store.
//!
//! The messaging contract exposes a generic namespaced key-value surface
//! (`getData` / `setData`). [`LedgerClient`] abstracts it so any chain SDK can
//! back it; [`ContractGateway`] wraps a client with the degraded failure
//! handling the rest of the crate relies on.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::types::{DaoCommsError, Result};

/// Configuration for the ledger connection.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// RPC endpoint URL.
    pub rpc_url: String,
    /// Messaging contract address, if known up front.
    pub contract_address: Option<String>,
    /// Chain id of the network.
    pub chain_id: u64,
    /// Upper bound on a single ledger call. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl LedgerConfig {
    /// Creates a new configuration for the given endpoint.
    pub fn new(rpc_url: &str, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            contract_address: None,
            chain_id,
            call_timeout: None,
        }
    }

    /// Sets the contract address.
    pub fn with_contract(mut self, address: &str) -> Self {
        self.contract_address = Some(address.to_string());
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Creates configuration for a local development node.
    pub fn localhost() -> Self {
        Self::new("http://localhost:8545", 31337)
    }

    /// Creates configuration for the Sepolia test network.
    pub fn sepolia() -> Self {
        Self::new("https://rpc.sepolia.org", 11_155_111).with_timeout(Duration::from_secs(30))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::localhost()
    }
}

/// Transaction information returned after a confirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Transaction hash.
    pub tx_hash: String,
    /// Block in which the transaction was confirmed (if known).
    pub block_number: Option<u64>,
}

/// Trait for the contract's key-value surface.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read the raw value stored under `key`. Absent keys yield empty bytes.
    async fn get_data(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `value` under `key` and wait for confirmation.
    ///
    /// Requires a signed, fee-bearing transaction.
    async fn set_data(&self, key: &str, value: &[u8]) -> Result<TransactionInfo>;

    /// Whether the key-value feature is live.
    async fn is_available(&self) -> Result<bool>;

    /// Address of the contract.
    async fn address(&self) -> Result<String>;
}

/// Degrading wrapper around a [`LedgerClient`].
///
/// Reads never fail: any error is logged and reported as "no data". Writes
/// surface their errors so the session can show them.
pub struct ContractGateway<L: LedgerClient> {
    client: L,
    call_timeout: Option<Duration>,
}

impl<L: LedgerClient> ContractGateway<L> {
    /// Creates a gateway without a call timeout.
    pub fn new(client: L) -> Self {
        Self {
            client,
            call_timeout: None,
        }
    }

    /// Creates a gateway using the timeout from `config`.
    pub fn with_config(client: L, config: &LedgerConfig) -> Self {
        Self {
            client,
            call_timeout: config.call_timeout,
        }
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &L {
        &self.client
    }

    /// Liveness probe. Errors count as unavailable.
    pub async fn is_available(&self) -> bool {
        match self.bounded(self.client.is_available()).await {
            Ok(available) => available,
            Err(e) => {
                warn!(error = %e, "Ledger availability check failed");
                false
            }
        }
    }

    /// Reads `name`, returning empty bytes when absent, unavailable or failing.
    pub async fn read_key(&self, name: &str) -> Vec<u8> {
        match self.try_read_key(name).await {
            Ok(bytes) => bytes,
            Err(DaoCommsError::LedgerUnavailable) => {
                debug!(key = %name, "Ledger unavailable, treating as empty");
                Vec::new()
            }
            Err(e) => {
                warn!(key = %name, error = %e, "Ledger read failed, treating as empty");
                Vec::new()
            }
        }
    }

    /// Reads `name`, reporting transport failures to the caller.
    ///
    /// An unavailable ledger is reported as [`DaoCommsError::LedgerUnavailable`].
    pub async fn try_read_key(&self, name: &str) -> Result<Vec<u8>> {
        if !self.bounded(self.client.is_available()).await? {
            return Err(DaoCommsError::LedgerUnavailable);
        }
        self.bounded(self.client.get_data(name)).await
    }

    /// Reads `name` without the availability check.
    ///
    /// For callers that already checked [`is_available`](Self::is_available)
    /// before a batch of reads. Failures read as empty.
    pub async fn read_key_unchecked(&self, name: &str) -> Vec<u8> {
        match self.bounded(self.client.get_data(name)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %name, error = %e, "Ledger read failed, treating as empty");
                Vec::new()
            }
        }
    }

    /// Writes `value` under `name`. Succeeds only on ledger confirmation.
    pub async fn write_key(&self, name: &str, value: &[u8]) -> Result<TransactionInfo> {
        let result = self.bounded(self.client.set_data(name, value)).await;
        match &result {
            Ok(info) => debug!(
                key = %name,
                tx = %info.tx_hash,
                bytes = value.len(),
                "Ledger write confirmed"
            ),
            Err(e) if e.is_user_rejection() => debug!(key = %name, "Ledger write rejected by user"),
            Err(e) => warn!(key = %name, error = %e, "Ledger write failed"),
        }
        result
    }

    /// Contract address, if the ledger reports one.
    pub async fn contract_address(&self) -> Option<String> {
        match self.bounded(self.client.address()).await {
            Ok(address) => Some(address),
            Err(e) => {
                warn!(error = %e, "Could not read contract address");
                None
            }
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| DaoCommsError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryLedger;

    #[test]
    fn test_config_localhost() {
        let config = LedgerConfig::localhost();
        assert!(config.rpc_url.contains("localhost"));
        assert_eq!(config.chain_id, 31337);
        assert!(config.call_timeout.is_none());
    }

    #[test]
    fn test_config_sepolia() {
        let config = LedgerConfig::sepolia().with_contract("0xabc");
        assert_eq!(config.chain_id, 11_155_111);
        assert_eq!(config.contract_address.as_deref(), Some("0xabc"));
        assert!(config.call_timeout.is_some());
    }

    #[tokio::test]
    async fn test_read_missing_key_is_empty() {
        let gateway = ContractGateway::new(InMemoryLedger::new());
        assert!(gateway.read_key("nothing").await.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let gateway = ContractGateway::new(InMemoryLedger::new());
        let info = gateway.write_key("k", b"value").await.unwrap();
        assert!(info.tx_hash.starts_with("0x"));
        assert_eq!(gateway.read_key("k").await, b"value");
    }

    #[tokio::test]
    async fn test_unavailable_reads_as_empty() {
        let ledger = InMemoryLedger::new();
        ledger.insert_raw("k", b"value").await;
        ledger.set_available(false);

        let gateway = ContractGateway::new(ledger);
        assert!(!gateway.is_available().await);
        assert!(gateway.read_key("k").await.is_empty());
        assert!(matches!(
            gateway.try_read_key("k").await,
            Err(DaoCommsError::LedgerUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_failing_reads_degrade() {
        let ledger = InMemoryLedger::new();
        ledger.insert_raw("k", b"value").await;
        ledger.set_fail_reads(true);

        let gateway = ContractGateway::new(ledger);
        assert!(gateway.read_key("k").await.is_empty());
        assert!(matches!(
            gateway.try_read_key("k").await,
            Err(DaoCommsError::Ledger(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_write_is_surfaced() {
        let ledger = InMemoryLedger::new();
        ledger.set_reject_writes(true);

        let gateway = ContractGateway::new(ledger);
        let err = gateway.write_key("k", b"value").await.unwrap_err();
        assert!(err.is_user_rejection());
        assert!(gateway.read_key("k").await.is_empty());
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let ledger = InMemoryLedger::new().with_latency(Duration::from_millis(200));
        let config = LedgerConfig::localhost().with_timeout(Duration::from_millis(20));
        let gateway = ContractGateway::with_config(ledger, &config);

        assert!(matches!(
            gateway.write_key("k", b"v").await,
            Err(DaoCommsError::Timeout(20))
        ));
        assert!(gateway.read_key("k").await.is_empty());
    }

    #[tokio::test]
    async fn test_unchecked_read_skips_availability() {
        let ledger = InMemoryLedger::new();
        ledger.insert_raw("k", b"value").await;
        let gateway = ContractGateway::new(ledger.clone());

        let before = ledger.call_count();
        assert_eq!(gateway.read_key_unchecked("k").await, b"value");
        assert_eq!(ledger.call_count() - before, 1);

        let before = ledger.call_count();
        assert_eq!(gateway.read_key("k").await, b"value");
        assert_eq!(ledger.call_count() - before, 2);

        ledger.set_fail_reads(true);
        assert!(gateway.read_key_unchecked("k").await.is_empty());
    }

    #[tokio::test]
    async fn test_contract_address() {
        let gateway = ContractGateway::new(InMemoryLedger::with_address("0xfeed"));
        assert_eq!(gateway.contract_address().await.as_deref(), Some("0xfeed"));
    }
}
