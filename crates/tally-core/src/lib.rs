//! # tally-core
//!
//! Shared domain primitives for the tally ledger platform.
//!
//! This crate provides the foundational types used across all tally components:
//!
//! - **Channels**: Normalized publisher channel identifiers
//! - **Identifiers**: Deterministic UUIDv5 derivation for ledger rows
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `tally-core` is the only crate allowed to define shared primitives.
//! Everything the ingestion pipeline and the ledger schema agree on, such
//! as how a channel string is canonicalized or how a transaction id is
//! derived from its natural key, lives here.
//!
//! ## Example
//!
//! ```rust
//! use tally_core::prelude::*;
//!
//! let channel = Channel::from("youtube#channel:UC1234");
//! assert_eq!(channel.props().map(|p| p.provider_name), Some("youtube".to_string()));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod channel;
pub mod error;
pub mod ids;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tally_core::prelude::*;
///
/// let channel = Channel::from("brave.com");
/// assert!(channel.props().is_none());
/// ```
pub mod prelude {
    pub use crate::channel::{Channel, ChannelProps};
    pub use crate::error::{Error, Result};
    pub use crate::ids::derive_transaction_id;
}
