//! Oblivious Transfer (OT) primitives
//!
//! This module provides the two-party multiplication used by signing:
//! - Base OT over secp256k1 (one choice bit per transfer)
//! - Multiplicative-to-additive conversion (MtA) built on a batch of base OTs

pub mod base_ot;
pub mod mta;

pub use base_ot::{OtReceiver, OtSender};
