//! DAO Comms - messaging for DAOs over a contract key-value store
//!
//! Messages are stored as JSON records under `message_<id>` and listed through
//! a `message_keys` index. Content is encoded with a pluggable [`Codec`]; the
//! default [`Base64Codec`] is a placeholder for homomorphic encryption and
//! does not keep content confidential.

mod types;
mod codec;
mod ledger;
mod storage;
mod models;
mod repository;
mod views;
mod wallet;
mod session;

pub use types::*;
pub use codec::*;
pub use ledger::*;
pub use storage::*;
pub use models::*;
pub use repository::*;
pub use views::*;
pub use wallet::*;
pub use session::*;
