//! Error type and storage constants for DAO Comms.

use thiserror::Error;

/// Prefix marking a codec token as "encrypted".
pub const CODEC_PREFIX: &str = "FHE-";

/// Ledger key holding the JSON array of message ids.
pub const MESSAGE_INDEX_KEY: &str = "message_keys";

/// Prefix of the ledger key holding a single message body.
pub const MESSAGE_KEY_PREFIX: &str = "message_";

/// Length of the random suffix appended to generated message ids.
pub const MESSAGE_ID_SUFFIX_LEN: usize = 7;

/// Number of hex digits in a session public key.
pub const SESSION_PUBLIC_KEY_DIGITS: usize = 2000;

/// Default validity window of a reveal signature, in days.
pub const DEFAULT_SIGNATURE_DURATION_DAYS: u32 = 30;

/// Errors that can occur during DAO Comms operations.
#[derive(Error, Debug)]
pub enum DaoCommsError {
    // Ledger Errors
    /// The ledger reports its key-value surface as unavailable.
    #[error("Ledger unavailable")]
    LedgerUnavailable,

    /// A ledger call failed.
    #[error("Ledger call failed: {0}")]
    Ledger(String),

    /// A ledger call did not finish within the configured timeout.
    #[error("Ledger call timed out after {0} ms")]
    Timeout(u64),

    /// The user declined to sign a transaction or message.
    #[error("Rejected by user: {0}")]
    UserRejected(String),

    // Wallet Errors
    /// No wallet account is connected.
    #[error("Wallet not connected")]
    WalletNotConnected,

    /// The wallet could not produce a signature.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Signature bytes are malformed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Public key bytes are malformed.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    // Message Errors
    /// The compose draft is incomplete.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// A codec token could not be decoded.
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// JSON (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message id was overwritten in the key index by a concurrent writer.
    #[error("Message {0} was dropped from the key index by a concurrent write")]
    IndexConflict(String),

    // Session Errors
    /// No message is selected.
    #[error("No message selected")]
    NoSelection,

    /// Message not found.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The action is not allowed in the current view state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DaoCommsError {
    /// Builds an error from a ledger or wallet failure message, recognising
    /// user rejections.
    pub fn from_ledger_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_ascii_lowercase().contains("user rejected") {
            DaoCommsError::UserRejected(message)
        } else {
            DaoCommsError::Ledger(message)
        }
    }

    /// Whether the user declined the action.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, DaoCommsError::UserRejected(_))
    }
}

pub type Result<T> = std::result::Result<T, DaoCommsError>;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current Unix time in milliseconds.
pub fn unix_now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_rejection_detection() {
        let err = DaoCommsError::from_ledger_message("user rejected transaction");
        assert!(err.is_user_rejection());

        let err = DaoCommsError::from_ledger_message("User Rejected the request.");
        assert!(err.is_user_rejection());

        let err = DaoCommsError::from_ledger_message("nonce too low");
        assert!(matches!(err, DaoCommsError::Ledger(_)));
        assert!(!err.is_user_rejection());
    }

    #[test]
    fn test_clock_is_after_epoch() {
        assert!(unix_now() > 1_600_000_000);
        assert!(unix_now_millis() > 1_600_000_000_000);
    }
}
