//! # TSS Core
//!
//! In-process threshold ECDSA wallets over secp256k1.
//!
//! Every participant of a session is simulated as its own task inside this
//! process. The orchestrator starts all of them, routes their messages and
//! aggregates their outputs once every party has completed:
//! - Distributed Key Generation (Feldman VSS)
//! - Distributed Signature Generation (all `n` parties, any `0 < t < n`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{KeygenConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::default();
//! let wallet = orchestrator.run_keygen(KeygenConfig { parties: 3, threshold: 1 }).await?;
//! let signature = orchestrator.sign(&wallet.address, "0x74657374").await?;
//! ```

pub mod aggregate;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod oblivious;
pub mod orchestrator;
pub mod sign;
pub mod types;
pub mod vss;
pub mod wallet;

pub use error::{Error, Result};
pub use orchestrator::{KeygenConfig, KeygenResult, Orchestrator, OrchestratorConfig, WalletSummary};
pub use types::{
    validate_threshold, Destination, Message, PartyId, SessionConfig, SessionKind, Signature,
    SortedPartyIds,
};
pub use wallet::{Wallet, WalletStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-party setup
pub const DEFAULT_THRESHOLD: usize = 1;

/// Default number of parties
pub const DEFAULT_PARTIES: usize = 3;
