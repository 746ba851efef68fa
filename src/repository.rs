//! Message repository over the contract key-value store.
//!
//! Messages live under `message_<id>` and are reachable through a single JSON
//! key index (`message_keys`). The index is append-only and is the only
//! shared mutable entry: all of its read-modify-write cycles go through
//! [`MessageRepository::append`].
//!
//! # Concurrent writers
//!
//! The ledger offers no conditional write, so two clients appending at the
//! same time can both read the old index and one of them overwrites the
//! other's id (a lost update). Inside one repository appends are serialized
//! by a mutex. Across clients the repository re-reads the index after writing
//! it and merges its id back when it went missing, which narrows the window
//! but cannot close it: a third writer can still interleave.

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::{ContractGateway, LedgerClient};
use crate::models::{Message, MessageRecord};
use crate::types::{
    unix_now_millis, DaoCommsError, Result, MESSAGE_ID_SUFFIX_LEN, MESSAGE_INDEX_KEY,
    MESSAGE_KEY_PREFIX,
};

/// Configuration for the message repository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Ledger key of the id index.
    pub index_key: String,
    /// Prefix of message body keys.
    pub message_key_prefix: String,
    /// Re-read the index after each append and merge the id back if lost.
    pub verify_index_writes: bool,
    /// How many times a lost id is merged back before giving up.
    pub max_index_merge_attempts: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            index_key: MESSAGE_INDEX_KEY.to_string(),
            message_key_prefix: MESSAGE_KEY_PREFIX.to_string(),
            verify_index_writes: true,
            max_index_merge_attempts: 3,
        }
    }
}

/// Reads and appends messages through a [`ContractGateway`].
pub struct MessageRepository<L: LedgerClient> {
    gateway: ContractGateway<L>,
    config: RepositoryConfig,
    index_lock: Mutex<()>,
}

impl<L: LedgerClient> MessageRepository<L> {
    /// Creates a repository with default configuration.
    pub fn new(gateway: ContractGateway<L>) -> Self {
        Self::with_config(gateway, RepositoryConfig::default())
    }

    /// Creates a repository with the given configuration.
    pub fn with_config(gateway: ContractGateway<L>, config: RepositoryConfig) -> Self {
        Self {
            gateway,
            config,
            index_lock: Mutex::new(()),
        }
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &ContractGateway<L> {
        &self.gateway
    }

    /// Ledger key of a message body.
    pub fn message_key(&self, id: &str) -> String {
        format!("{}{}", self.config.message_key_prefix, id)
    }

    /// Lists indexed message ids in index order.
    ///
    /// Empty, absent or unparseable indexes yield an empty list.
    pub async fn list_ids(&self) -> Vec<String> {
        let bytes = self.gateway.read_key(&self.config.index_key).await;
        parse_index(&bytes)
    }

    /// Fetches one message. Missing or malformed records yield `None`.
    pub async fn fetch(&self, id: &str) -> Option<Message> {
        let bytes = self.gateway.read_key(&self.message_key(id)).await;
        decode_record(id, &bytes)
    }

    /// Loads every readable message, newest first.
    ///
    /// Equal timestamps keep index order. Unreadable records are skipped.
    /// Availability is checked once; the index and records are then read
    /// directly.
    pub async fn refresh_all(&self) -> Vec<Message> {
        if !self.gateway.is_available().await {
            debug!("Ledger unavailable, no messages yet");
            return Vec::new();
        }

        let index = self.gateway.read_key_unchecked(&self.config.index_key).await;
        let ids = parse_index(&index);
        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let bytes = self.gateway.read_key_unchecked(&self.message_key(id)).await;
            if let Some(message) = decode_record(id, &bytes) {
                messages.push(message);
            }
        }

        // Stable sort keeps index order for equal timestamps.
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        debug!(indexed = ids.len(), loaded = messages.len(), "Refreshed messages");
        messages
    }

    /// Stores a message and indexes it under a fresh id.
    ///
    /// The `id` field of `message` is ignored. Returns the assigned id.
    pub async fn append(&self, message: &Message) -> Result<String> {
        let _guard = self.index_lock.lock().await;

        let existing = self.load_index().await?;
        let id = loop {
            let candidate = generate_message_id();
            if !existing.contains(&candidate) {
                break candidate;
            }
        };

        let body = serde_json::to_vec(&message.to_record())?;
        self.gateway.write_key(&self.message_key(&id), &body).await?;

        let mut ids = self.load_index().await?;
        ids.push(id.clone());
        self.store_index(&ids).await?;

        if self.config.verify_index_writes {
            self.ensure_indexed(&id).await?;
        }

        info!(id = %id, dao = %message.dao_name, "Message appended");
        Ok(id)
    }

    async fn ensure_indexed(&self, id: &str) -> Result<()> {
        for attempt in 0..=self.config.max_index_merge_attempts {
            let mut ids = self.load_index().await?;
            if ids.iter().any(|existing| existing == id) {
                return Ok(());
            }
            if attempt == self.config.max_index_merge_attempts {
                break;
            }

            warn!(id = %id, attempt = attempt + 1, "Message id lost from index, merging back");
            ids.push(id.to_string());
            self.store_index(&ids).await?;
        }

        warn!(id = %id, "Giving up on re-indexing message");
        Err(DaoCommsError::IndexConflict(id.to_string()))
    }

    /// Strict index read for read-modify-write.
    ///
    /// Transport failures and an unavailable ledger abort, so a transient
    /// error never replaces the index with an empty one. Corrupt contents
    /// are replaced.
    async fn load_index(&self) -> Result<Vec<String>> {
        let bytes = self.gateway.try_read_key(&self.config.index_key).await?;
        Ok(parse_index(&bytes))
    }

    async fn store_index(&self, ids: &[String]) -> Result<()> {
        let bytes = serde_json::to_vec(ids)?;
        self.gateway
            .write_key(&self.config.index_key, &bytes)
            .await?;
        Ok(())
    }
}

fn decode_record(id: &str, bytes: &[u8]) -> Option<Message> {
    if bytes.is_empty() {
        debug!(id = %id, "Indexed message has no record");
        return None;
    }

    match serde_json::from_slice::<MessageRecord>(bytes) {
        Ok(record) => Some(Message::from_record(id, record)),
        Err(e) => {
            warn!(id = %id, error = %e, "Skipping malformed message record");
            None
        }
    }
}

fn parse_index(bytes: &[u8]) -> Vec<String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }
    match serde_json::from_slice::<Vec<String>>(bytes) {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "Message index is not a JSON string array");
            Vec::new()
        }
    }
}

/// Generates `<unix millis>-<random base36 suffix>`.
pub fn generate_message_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..MESSAGE_ID_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", unix_now_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryLedger;
    use std::time::Duration;

    fn repository(ledger: &InMemoryLedger) -> MessageRepository<InMemoryLedger> {
        MessageRepository::new(ContractGateway::new(ledger.clone()))
    }

    async fn seed(ledger: &InMemoryLedger, id: &str, timestamp: u64, dao: &str) {
        let record = Message::new(id, "FHE-aGk=", timestamp, "0xsender", dao).to_record();
        ledger
            .insert_raw(
                &format!("message_{}", id),
                &serde_json::to_vec(&record).unwrap(),
            )
            .await;
    }

    async fn seed_index(ledger: &InMemoryLedger, ids: &[&str]) {
        ledger
            .insert_raw("message_keys", &serde_json::to_vec(ids).unwrap())
            .await;
    }

    #[test]
    fn test_message_id_format() {
        let id = generate_message_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(suffix.len(), MESSAGE_ID_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_message_id(), generate_message_id());
    }

    #[test]
    fn test_parse_index() {
        assert!(parse_index(b"").is_empty());
        assert!(parse_index(b"   ").is_empty());
        assert!(parse_index(b"not json").is_empty());
        assert!(parse_index(br#"{"a":1}"#).is_empty());
        assert!(parse_index(&[0xff, 0xfe]).is_empty());
        assert_eq!(parse_index(br#"["a","b"]"#), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_ledger() {
        let ledger = InMemoryLedger::new();
        let repo = repository(&ledger);
        assert!(repo.list_ids().await.is_empty());
        assert!(repo.refresh_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_index() {
        let ledger = InMemoryLedger::new();
        ledger.insert_raw("message_keys", b"[broken").await;
        let repo = repository(&ledger);
        assert!(repo.list_ids().await.is_empty());
        assert!(repo.refresh_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_sorted_newest_first_with_stable_ties() {
        let ledger = InMemoryLedger::new();
        seed(&ledger, "a", 100, "Alpha").await;
        seed(&ledger, "b", 300, "Beta").await;
        seed(&ledger, "c", 200, "Gamma").await;
        seed(&ledger, "d", 200, "Delta").await;
        seed_index(&ledger, &["a", "b", "c", "d"]).await;

        let ids: Vec<String> = repository(&ledger)
            .refresh_all()
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "d", "a"]);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let ledger = InMemoryLedger::new();
        seed(&ledger, "good", 100, "Alpha").await;
        ledger.insert_raw("message_bad", b"{not json").await;
        ledger
            .insert_raw("message_partial", br#"{"content":"x"}"#)
            .await;
        seed_index(&ledger, &["bad", "good", "missing", "partial"]).await;

        let repo = repository(&ledger);
        assert!(repo.fetch("bad").await.is_none());
        assert!(repo.fetch("missing").await.is_none());

        let messages = repo.refresh_all().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "good");
    }

    #[tokio::test]
    async fn test_unavailable_ledger_reads_empty() {
        let ledger = InMemoryLedger::new();
        seed(&ledger, "a", 1, "Alpha").await;
        seed_index(&ledger, &["a"]).await;
        ledger.set_available(false);

        assert!(repository(&ledger).refresh_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_append_then_refresh() {
        let ledger = InMemoryLedger::new();
        let repo = repository(&ledger);

        let message = Message::new("ignored", "FHE-aGk=", 10, "0xme", "Alpha");
        let id = repo.append(&message).await.unwrap();

        assert_ne!(id, "ignored");
        assert_eq!(repo.list_ids().await, vec![id.clone()]);
        assert!(ledger.get_raw(&format!("message_{}", id)).await.is_some());

        let messages = repo.refresh_all().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].dao_name, "Alpha");
    }

    #[tokio::test]
    async fn test_append_keeps_existing_ids() {
        let ledger = InMemoryLedger::new();
        seed(&ledger, "old", 1, "Alpha").await;
        seed_index(&ledger, &["old"]).await;

        let repo = repository(&ledger);
        let id = repo
            .append(&Message::new("", "x", 2, "s", "Beta"))
            .await
            .unwrap();
        assert_eq!(repo.list_ids().await, vec!["old".to_string(), id]);
    }

    #[tokio::test]
    async fn test_append_rejected_leaves_index() {
        let ledger = InMemoryLedger::new();
        seed_index(&ledger, &["old"]).await;
        ledger.set_reject_writes(true);

        let repo = repository(&ledger);
        let err = repo
            .append(&Message::new("", "x", 2, "s", "Beta"))
            .await
            .unwrap_err();
        assert!(err.is_user_rejection());
        assert_eq!(repo.list_ids().await, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_append_aborts_on_read_failure() {
        let ledger = InMemoryLedger::new();
        seed_index(&ledger, &["old"]).await;
        ledger.set_fail_reads(true);

        let repo = repository(&ledger);
        assert!(repo
            .append(&Message::new("", "x", 2, "s", "Beta"))
            .await
            .is_err());

        ledger.set_fail_reads(false);
        assert_eq!(repo.list_ids().await, vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_appends_within_one_repository_are_serialized() {
        let ledger = InMemoryLedger::new();
        let repo = MessageRepository::with_config(
            ContractGateway::new(ledger.with_latency(Duration::from_millis(2))),
            RepositoryConfig {
                verify_index_writes: false,
                ..Default::default()
            },
        );

        let a = Message::new("", "a", 1, "s", "Alpha");
        let b = Message::new("", "b", 2, "s", "Beta");
        let (ra, rb) = tokio::join!(repo.append(&a), repo.append(&b));

        let ids = repo.list_ids().await;
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&ra.unwrap()));
        assert!(ids.contains(&rb.unwrap()));
    }

    fn contended(
        ledger: &InMemoryLedger,
        config: RepositoryConfig,
    ) -> (MessageRepository<InMemoryLedger>, MessageRepository<InMemoryLedger>) {
        let slow = ledger.with_latency(Duration::from_millis(5));
        (
            MessageRepository::with_config(ContractGateway::new(slow.clone()), config.clone()),
            MessageRepository::with_config(ContractGateway::new(slow), config),
        )
    }

    #[tokio::test]
    async fn test_separate_clients_merge_lost_ids() {
        let ledger = InMemoryLedger::new();
        let (first, second) = contended(&ledger, RepositoryConfig::default());

        let a = Message::new("", "a", 1, "s", "Alpha");
        let b = Message::new("", "b", 2, "s", "Beta");
        let (ra, rb) = tokio::join!(first.append(&a), second.append(&b));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        let ids = repository(&ledger).list_ids().await;
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&ra));
        assert!(ids.contains(&rb));
        assert_eq!(repository(&ledger).refresh_all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unverified_clients_lose_an_id() {
        let ledger = InMemoryLedger::new();
        let config = RepositoryConfig {
            verify_index_writes: false,
            ..Default::default()
        };
        let (first, second) = contended(&ledger, config);

        let a = Message::new("", "a", 1, "s", "Alpha");
        let b = Message::new("", "b", 2, "s", "Beta");
        let (ra, rb) = tokio::join!(first.append(&a), second.append(&b));
        assert!(ra.is_ok() && rb.is_ok());

        let ids = repository(&ledger).list_ids().await;
        assert_eq!(ids.len(), 1);
        assert_eq!(repository(&ledger).refresh_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_budget_exhausted_is_index_conflict() {
        let ledger = InMemoryLedger::new();
        let config = RepositoryConfig {
            max_index_merge_attempts: 0,
            ..Default::default()
        };
        let (first, second) = contended(&ledger, config);

        let a = Message::new("", "a", 1, "s", "Alpha");
        let b = Message::new("", "b", 2, "s", "Beta");
        let (ra, rb) = tokio::join!(first.append(&a), second.append(&b));

        let results = [ra, rb];
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DaoCommsError::IndexConflict(_))))
            .count();
        assert_eq!(conflicts, 1);

        let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
        assert_eq!(repository(&ledger).list_ids().await, vec![winner.clone()]);
    }

    #[tokio::test]
    async fn test_refresh_checks_availability_once() {
        let ledger = InMemoryLedger::new();
        for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            seed(&ledger, id, ts, "Alpha").await;
        }
        seed_index(&ledger, &["a", "b", "c"]).await;

        let repo = repository(&ledger);
        let before = ledger.call_count();
        assert_eq!(repo.refresh_all().await.len(), 3);
        // Availability, the index, three records.
        assert_eq!(ledger.call_count() - before, 5);
    }
}
