//! Veritas Chain — single-node ledger for an authenticity-voting photo network.
//!
//! Users spend credits to post images and to vote on whether a post is real.
//! Every action is a hash-chained block; user and content views are projected
//! from the chain, and expired posts are settled by a background scheduler
//! that pays the prize pool to the winning side.

pub mod analyzer;
pub mod block;
pub mod config;
pub mod economy;
pub mod error;
pub mod ledger;
pub mod node;
pub mod scheduler;
pub mod settlement;
pub mod state;
pub mod store;
pub mod transaction;
pub mod types;

pub use error::{ChainError, Result};
pub use node::{LedgerSnapshot, Node};
pub use transaction::{Transaction, VoteChoice};
