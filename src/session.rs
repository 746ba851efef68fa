//! Session view-model for DAO Comms.
//!
//! [`Session`] owns everything the client shows: the loaded messages, the
//! filter, the selected message and its reveal state, the compose draft and
//! the transaction status banner. State only changes through the transition
//! methods below; views are recomputed from it on demand.
//!
//! Revealing a message is a small state machine:
//!
//! ```text
//! Hidden --begin_reveal--> AwaitingSignature --complete_reveal--> Revealed
//!    ^                            |                                  |
//!    +------- signature failed ---+------------- toggle -------------+
//! ```
//!
//! Closing the selection while a signature is pending turns the pending
//! ticket stale; its result is dropped when it arrives. The signature request
//! itself is not revoked.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{Base64Codec, Codec};
use crate::ledger::{ContractGateway, LedgerClient, LedgerConfig};
use crate::models::{ComposeDraft, EncryptionPreview, Message};
use crate::repository::{MessageRepository, RepositoryConfig};
use crate::types::{unix_now, DaoCommsError, Result, DEFAULT_SIGNATURE_DURATION_DAYS};
use crate::views::{self, DaoActivity, MessageStats};
use crate::wallet::{fingerprint, SignatureParams, Wallet};

/// Configuration for the session view-model.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pause between a successful signature and showing the content.
    pub reveal_delay: Duration,
    /// Validity window of the reveal signature.
    pub signature_duration_days: u32,
    /// Number of DAOs in the "most active" ranking.
    pub top_dao_count: usize,
    /// How long a success banner stays visible.
    pub success_status_ttl: Duration,
    /// How long an error banner stays visible.
    pub error_status_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reveal_delay: Duration::from_millis(1500),
            signature_duration_days: DEFAULT_SIGNATURE_DURATION_DAYS,
            top_dao_count: 3,
            success_status_ttl: Duration::from_secs(2),
            error_status_ttl: Duration::from_secs(3),
        }
    }
}

/// Configuration for a complete client.
#[derive(Debug, Clone, Default)]
pub struct DaoCommsConfig {
    /// Ledger connection settings.
    pub ledger: LedgerConfig,
    /// Repository settings.
    pub repository: RepositoryConfig,
    /// View-model settings.
    pub session: SessionConfig,
}

impl DaoCommsConfig {
    /// Creates a configuration with the given ledger settings.
    pub fn new(ledger: LedgerConfig) -> Self {
        Self {
            ledger,
            repository: RepositoryConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Creates a configuration for a local development node.
    pub fn localhost() -> Self {
        Self::new(LedgerConfig::localhost())
    }

    /// Creates a configuration for Sepolia.
    pub fn sepolia() -> Self {
        Self::new(LedgerConfig::sepolia())
    }
}

/// Whether the first load has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Initial load in progress.
    Loading,
    /// Initial load done.
    Ready,
}

/// Reveal state of the selected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealState {
    /// Content is shown encoded.
    Hidden,
    /// Waiting for the wallet to sign the given ticket.
    AwaitingSignature {
        /// Ticket number.
        ticket: u64,
    },
    /// Content is shown decoded.
    Revealed(String),
}

/// A pending reveal, handed to whoever obtains the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealTicket {
    /// Ticket number.
    pub ticket: u64,
    /// Message being revealed.
    pub message_id: String,
    /// Text to sign.
    pub payload: String,
    /// Short fingerprint of the payload, for display next to the request.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
struct Selection {
    message: Message,
    reveal: RevealState,
}

/// Kind of transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Transaction in flight.
    Pending,
    /// Transaction confirmed.
    Success,
    /// Transaction failed or was rejected.
    Error,
}

/// User-visible transaction status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBanner {
    /// Status kind.
    pub kind: StatusKind,
    /// Text to show.
    pub text: String,
    raised_at: Instant,
    ttl: Option<Duration>,
}

impl StatusBanner {
    fn new(kind: StatusKind, text: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            kind,
            text: text.into(),
            raised_at: Instant::now(),
            ttl,
        }
    }

    /// Whether the banner is still shown at `now`.
    pub fn is_visible_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.raised_at) < ttl,
            None => true,
        }
    }

    /// Text shown when sending fails.
    pub fn send_error_text(error: &DaoCommsError) -> String {
        if error.is_user_rejection() {
            "Transaction rejected by user".to_string()
        } else {
            format!("Sending failed: {}", error)
        }
    }

    /// Text shown when a reveal fails.
    pub fn reveal_error_text(error: &DaoCommsError) -> String {
        if error.is_user_rejection() {
            "Signature rejected by user".to_string()
        } else {
            format!("Decryption failed: {}", error)
        }
    }
}

/// The client view-model.
pub struct Session<L, W, C = Base64Codec>
where
    L: LedgerClient,
    W: Wallet,
    C: Codec,
{
    repository: MessageRepository<L>,
    wallet: W,
    codec: C,
    config: SessionConfig,
    ledger: Option<LedgerConfig>,
    phase: LoadPhase,
    refreshing: bool,
    messages: Vec<Message>,
    filter: String,
    selection: Option<Selection>,
    next_ticket: u64,
    draft: ComposeDraft,
    sending: bool,
    status: Option<StatusBanner>,
    signature: Option<SignatureParams>,
}

impl<L, W> Session<L, W, Base64Codec>
where
    L: LedgerClient,
    W: Wallet,
{
    /// Builds a session over `ledger` using the base64 codec.
    pub fn connect(ledger: L, wallet: W, config: DaoCommsConfig) -> Self {
        debug!(
            rpc = %config.ledger.rpc_url,
            chain_id = config.ledger.chain_id,
            "Connecting session"
        );
        let gateway = ContractGateway::with_config(ledger, &config.ledger);
        let repository = MessageRepository::with_config(gateway, config.repository);
        Self::new(repository, wallet, Base64Codec::new(), config.session)
            .with_ledger_config(config.ledger)
    }
}

impl<L, W, C> Session<L, W, C>
where
    L: LedgerClient,
    W: Wallet,
    C: Codec,
{
    /// Creates a session in the loading phase.
    pub fn new(
        repository: MessageRepository<L>,
        wallet: W,
        codec: C,
        config: SessionConfig,
    ) -> Self {
        Self {
            repository,
            wallet,
            codec,
            config,
            ledger: None,
            phase: LoadPhase::Loading,
            refreshing: false,
            messages: Vec::new(),
            filter: String::new(),
            selection: None,
            next_ticket: 0,
            draft: ComposeDraft::default(),
            sending: false,
            status: None,
            signature: None,
        }
    }

    /// Sets the ledger settings used when the ledger or wallet cannot report
    /// the contract address or chain id.
    pub fn with_ledger_config(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Loads messages and gathers the reveal signature parameters.
    pub async fn initialize(&mut self) {
        self.refresh().await;
        self.init_signature_params().await;
        self.phase = LoadPhase::Ready;
    }

    async fn init_signature_params(&mut self) {
        let configured = self.ledger.as_ref();
        let contract_address = match self.repository.gateway().contract_address().await {
            Some(address) => address,
            None => configured
                .and_then(|l| l.contract_address.clone())
                .unwrap_or_default(),
        };
        let chain_id = match self.wallet.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                let fallback = configured.map(|l| l.chain_id).unwrap_or(0);
                warn!(error = %e, fallback, "Could not read chain id");
                fallback
            }
        };
        let params = SignatureParams::new(contract_address, chain_id)
            .with_duration_days(self.config.signature_duration_days);
        self.signature = Some(params);
    }

    /// Reloads all messages from the ledger.
    pub async fn refresh(&mut self) {
        self.refreshing = true;
        self.messages = self.repository.refresh_all().await;
        self.refreshing = false;
        self.phase = LoadPhase::Ready;
    }

    /// Returns the repository.
    pub fn repository(&self) -> &MessageRepository<L> {
        &self.repository
    }

    /// Returns the wallet.
    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Returns the codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Whether the first load is still running.
    pub fn is_loading(&self) -> bool {
        self.phase == LoadPhase::Loading
    }

    /// Whether a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    /// All loaded messages, newest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Reveal signature parameters, once initialized.
    pub fn signature_params(&self) -> Option<&SignatureParams> {
        self.signature.as_ref()
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Current filter text.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Sets the DAO/sender filter.
    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
    }

    /// Messages matching the filter.
    pub fn filtered_messages(&self) -> Vec<&Message> {
        views::filter_messages(&self.messages, &self.filter)
    }

    /// Per-DAO activity.
    pub fn dao_activity(&self) -> Vec<DaoActivity> {
        views::dao_activity(&self.messages)
    }

    /// Most active DAOs.
    pub fn top_daos(&self) -> Vec<DaoActivity> {
        views::top_daos(&self.messages, self.config.top_dao_count)
    }

    /// Summary counters.
    pub fn stats(&self) -> MessageStats {
        views::message_stats(&self.messages)
    }

    // ------------------------------------------------------------------
    // Selection and reveal
    // ------------------------------------------------------------------

    /// Selects a loaded message, hiding any revealed content.
    pub fn select(&mut self, id: &str) -> Result<&Message> {
        let message = self
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| DaoCommsError::MessageNotFound(id.to_string()))?;

        let selection = self.selection.insert(Selection {
            message,
            reveal: RevealState::Hidden,
        });
        Ok(&selection.message)
    }

    /// Clears the selection. A pending reveal becomes stale.
    pub fn close_selection(&mut self) {
        self.selection = None;
    }

    /// The selected message.
    pub fn selected(&self) -> Option<&Message> {
        self.selection.as_ref().map(|s| &s.message)
    }

    /// Reveal state of the selected message.
    pub fn reveal_state(&self) -> Option<&RevealState> {
        self.selection.as_ref().map(|s| &s.reveal)
    }

    /// Decoded content of the selected message, when revealed.
    pub fn revealed_content(&self) -> Option<&str> {
        match self.reveal_state() {
            Some(RevealState::Revealed(text)) => Some(text),
            _ => None,
        }
    }

    /// `Hidden -> AwaitingSignature`. Returns the payload to sign.
    pub async fn begin_reveal(&mut self) -> Result<RevealTicket> {
        if self.wallet.address().is_none() {
            return Err(DaoCommsError::WalletNotConnected);
        }
        match self.reveal_state().cloned() {
            None => return Err(DaoCommsError::NoSelection),
            Some(RevealState::Hidden) => {}
            Some(other) => {
                return Err(DaoCommsError::InvalidState(format!(
                    "Cannot start a reveal while {:?}",
                    other
                )))
            }
        }

        let now = unix_now();
        if !self.signature.as_ref().is_some_and(|p| p.is_valid_at(now)) {
            if self.signature.is_some() {
                info!("Reveal signature window expired, starting a new one");
            }
            self.init_signature_params().await;
        }
        let payload = self
            .signature
            .as_ref()
            .map(SignatureParams::message)
            .unwrap_or_default();

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let selection = self.selection.as_mut().ok_or(DaoCommsError::NoSelection)?;
        selection.reveal = RevealState::AwaitingSignature { ticket };

        let fingerprint = fingerprint(payload.as_bytes());
        debug!(
            id = %selection.message.id,
            ticket,
            fingerprint = %fingerprint,
            "Awaiting reveal signature"
        );
        Ok(RevealTicket {
            ticket,
            message_id: selection.message.id.clone(),
            payload,
            fingerprint,
        })
    }

    /// `AwaitingSignature -> Revealed` on success, back to `Hidden` on failure.
    ///
    /// Returns `Ok(None)` when the ticket is stale and the result was dropped.
    /// Failures raise an error banner. An empty signature counts as a failed
    /// signing.
    pub fn complete_reveal(
        &mut self,
        ticket: &RevealTicket,
        signature: Result<Vec<u8>>,
    ) -> Result<Option<String>> {
        let Some(selection) = self.selection.as_mut().filter(|s| {
            s.message.id == ticket.message_id
                && s.reveal == RevealState::AwaitingSignature { ticket: ticket.ticket }
        }) else {
            debug!(ticket = ticket.ticket, "Dropping stale reveal result");
            return Ok(None);
        };

        let decoded = match signature {
            Ok(bytes) if bytes.is_empty() => Err(DaoCommsError::SigningFailed(
                "wallet returned an empty signature".to_string(),
            )),
            Ok(_) => self.codec.decode(&selection.message.encrypted_content),
            Err(e) => Err(e),
        };

        match decoded {
            Ok(text) => {
                selection.reveal = RevealState::Revealed(text.clone());
                Ok(Some(text))
            }
            Err(e) => {
                selection.reveal = RevealState::Hidden;
                if e.is_user_rejection() {
                    info!(id = %ticket.message_id, "Reveal signature rejected by user");
                } else {
                    warn!(id = %ticket.message_id, error = %e, "Reveal failed");
                }
                self.status = Some(StatusBanner::new(
                    StatusKind::Error,
                    StatusBanner::reveal_error_text(&e),
                    Some(self.config.error_status_ttl),
                ));
                Err(e)
            }
        }
    }

    /// Runs a full reveal: sign, wait, decode.
    pub async fn reveal(&mut self) -> Result<Option<String>> {
        let ticket = self.begin_reveal().await?;
        let signature = self.wallet.sign_message(&ticket.payload).await;
        if signature.is_ok() && !self.config.reveal_delay.is_zero() {
            tokio::time::sleep(self.config.reveal_delay).await;
        }
        self.complete_reveal(&ticket, signature)
    }

    /// Reveals hidden content, or hides revealed content.
    pub async fn toggle_reveal(&mut self) -> Result<Option<String>> {
        match self.reveal_state().cloned() {
            None => Err(DaoCommsError::NoSelection),
            Some(RevealState::Hidden) => self.reveal().await,
            Some(RevealState::AwaitingSignature { .. }) => Ok(None),
            Some(RevealState::Revealed(_)) => {
                if let Some(selection) = self.selection.as_mut() {
                    selection.reveal = RevealState::Hidden;
                }
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Compose
    // ------------------------------------------------------------------

    /// The compose draft.
    pub fn draft(&self) -> &ComposeDraft {
        &self.draft
    }

    /// Mutable access to the compose draft.
    pub fn draft_mut(&mut self) -> &mut ComposeDraft {
        &mut self.draft
    }

    /// Discards the compose draft.
    pub fn reset_draft(&mut self) {
        self.draft = ComposeDraft::default();
    }

    /// Whether a send is in flight.
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Whether the draft can be submitted now.
    pub fn can_submit(&self) -> bool {
        !self.sending && self.draft.validate().is_ok()
    }

    /// Plaintext next to its encoded form, for the compose form.
    pub fn encryption_preview(&self) -> Option<EncryptionPreview> {
        self.draft.preview(&self.codec)
    }

    /// Encodes and sends the draft, then reloads messages.
    ///
    /// Validation failures and a missing wallet are reported without any
    /// ledger call. Returns the new message id.
    pub async fn submit(&mut self) -> Result<String> {
        let sender = self.wallet.address().ok_or(DaoCommsError::WalletNotConnected)?;
        self.draft.validate()?;
        if self.sending {
            return Err(DaoCommsError::InvalidState(
                "A message is already being sent".to_string(),
            ));
        }

        self.sending = true;
        self.status = Some(StatusBanner::new(
            StatusKind::Pending,
            "Encrypting message...",
            None,
        ));

        let message = self.draft.to_message(&self.codec, &sender, unix_now());
        let result = self.repository.append(&message).await;
        self.sending = false;

        match result {
            Ok(id) => {
                info!(id = %id, dao = %message.dao_name, "Message sent");
                self.status = Some(StatusBanner::new(
                    StatusKind::Success,
                    "Message encrypted and sent securely!",
                    Some(self.config.success_status_ttl),
                ));
                self.refresh().await;
                self.reset_draft();
                Ok(id)
            }
            Err(e) => {
                self.status = Some(StatusBanner::new(
                    StatusKind::Error,
                    StatusBanner::send_error_text(&e),
                    Some(self.config.error_status_ttl),
                ));
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// The status banner, if still visible.
    pub fn status(&self) -> Option<&StatusBanner> {
        self.status_at(Instant::now())
    }

    /// The status banner, if visible at `now`.
    pub fn status_at(&self, now: Instant) -> Option<&StatusBanner> {
        self.status.as_ref().filter(|s| s.is_visible_at(now))
    }

    /// Drops the banner once it has expired at `now`.
    pub fn expire_status(&mut self, now: Instant) {
        if self.status.as_ref().is_some_and(|s| !s.is_visible_at(now)) {
            self.status = None;
        }
    }

    /// Hides the banner.
    pub fn dismiss_status(&mut self) {
        self.status = None;
    }
}
