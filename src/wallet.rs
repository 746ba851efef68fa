//! Wallet signing for reveal authorization.
//!
//! Revealing a message requires the user to sign a text payload describing
//! the session: a public key, the contract address, the chain id and a
//! validity window. The signature proves the revealing party holds the
//! wallet; it is NOT bound to any decryption key, so it authorizes the reveal
//! without protecting the content.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::types::{
    unix_now, DaoCommsError, Result, DEFAULT_SIGNATURE_DURATION_DAYS, SESSION_PUBLIC_KEY_DIGITS,
};

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Trait for the user's wallet provider.
#[async_trait::async_trait]
pub trait Wallet: Send + Sync {
    /// Connected account address, or `None` when disconnected.
    fn address(&self) -> Option<String>;

    /// Chain id the wallet is connected to.
    async fn chain_id(&self) -> Result<u64>;

    /// Sign a literal text payload.
    async fn sign_message(&self, message: &str) -> Result<Vec<u8>>;
}

/// Parameters of the reveal signature, fixed at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    /// Session public key (`0x` + hex digits).
    pub public_key: String,
    /// Messaging contract address.
    pub contract_address: String,
    /// Chain id.
    pub chain_id: u64,
    /// Start of the validity window (Unix seconds).
    pub start_timestamp: u64,
    /// Length of the validity window.
    pub duration_days: u32,
}

impl SignatureParams {
    /// Creates parameters with a fresh session key starting now.
    pub fn new(contract_address: impl Into<String>, chain_id: u64) -> Self {
        Self {
            public_key: generate_session_public_key(),
            contract_address: contract_address.into(),
            chain_id,
            start_timestamp: unix_now(),
            duration_days: DEFAULT_SIGNATURE_DURATION_DAYS,
        }
    }

    /// Sets the validity window length.
    pub fn with_duration_days(mut self, days: u32) -> Self {
        self.duration_days = days;
        self
    }

    /// The exact text the wallet is asked to sign.
    pub fn message(&self) -> String {
        [
            format!("publickey:{}", self.public_key),
            format!("contractAddresses:{}", self.contract_address),
            format!("contractsChainId:{}", self.chain_id),
            format!("startTimestamp:{}", self.start_timestamp),
            format!("durationDays:{}", self.duration_days),
        ]
        .join("\n")
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: u64) -> bool {
        let end = self
            .start_timestamp
            .saturating_add(u64::from(self.duration_days) * 86_400);
        now >= self.start_timestamp && now < end
    }
}

/// Generates a random session public key: `0x` followed by 2000 hex digits.
pub fn generate_session_public_key() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..SESSION_PUBLIC_KEY_DIGITS)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("0x{}", digits)
}

/// An Ed25519 wallet held in memory.
pub struct LocalWallet {
    signing_key: SigningKey,
    chain_id: u64,
    address: String,
}

impl LocalWallet {
    /// Creates a wallet with a random key.
    pub fn generate(chain_id: u64) -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng), chain_id)
    }

    /// Creates a wallet from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32], chain_id: u64) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed), chain_id)
    }

    fn from_signing_key(signing_key: SigningKey, chain_id: u64) -> Self {
        let address = derive_address(&signing_key.verifying_key());
        Self {
            signing_key,
            chain_id,
            address,
        }
    }

    /// Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

#[async_trait::async_trait]
impl Wallet for LocalWallet {
    fn address(&self) -> Option<String> {
        Some(self.address.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn sign_message(&self, message: &str) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(message.as_bytes()).to_bytes().to_vec())
    }
}

/// Account address for a public key: `0x` + first 20 bytes of its SHA-256.
pub fn derive_address(verifying_key: &VerifyingKey) -> String {
    let hash = Sha256::digest(verifying_key.as_bytes());
    format!("0x{}", hex::encode(&hash[..20]))
}

/// Verifies a signature over a text payload.
///
/// # Arguments
/// * `message` - The signed text
/// * `public_key` - The Ed25519 public key (32 bytes)
/// * `signature` - The Ed25519 signature (64 bytes)
pub fn verify_message_signature(
    message: &str,
    public_key: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let key_bytes: [u8; 32] = public_key.try_into().map_err(|_| {
        DaoCommsError::InvalidPublicKey(format!(
            "Public key must be 32 bytes, got {}",
            public_key.len()
        ))
    })?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| {
        DaoCommsError::InvalidPublicKey(format!("Invalid Ed25519 public key: {}", e))
    })?;

    let signature_bytes: [u8; SIGNATURE_SIZE] = signature.try_into().map_err(|_| {
        DaoCommsError::InvalidSignature(format!(
            "Signature must be {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.len()
        ))
    })?;

    let signature = Signature::from_bytes(&signature_bytes);
    Ok(verifying_key.verify(message.as_bytes(), &signature).is_ok())
}

/// Fingerprint of a signing payload: the first 8 bytes of its SHA-256 as
/// upper-case hex in groups of four, e.g. `"A7B3 C9D1 E5F2 8A4B"`.
pub fn fingerprint(payload: &[u8]) -> String {
    let digest = hex::encode_upper(&Sha256::digest(payload)[..8]);
    let groups: Vec<&str> = (0..digest.len()).step_by(4).map(|i| &digest[i..i + 4]).collect();
    groups.join(" ")
}
