//! Adaptive retrieval engine for space-data products.
//!
//! Product bytes are served either synchronously from redundant network
//! mirrors ([`source`] + [`transfer`]) or asynchronously from archive-backed
//! stores that stage a product before it can be served ([`store`]). The
//! engine picks mirrors by measured throughput, fails over mid-transfer
//! without losing byte offset or running checksum, and caps concurrent
//! outstanding archive fetches per user.

pub mod checksum;
pub mod error;
pub mod product;
pub mod rules;
pub mod source;
pub mod store;
pub mod transfer;

pub use error::{FetchError, TransferError};
pub use product::{ProductChecksum, ProductInfo};
pub use rules::TransferRules;
