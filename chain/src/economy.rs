//! Token economy parameters for the Veritas ledger.
//!
//! These are protocol constants rather than configuration: the reducer reads
//! them while replaying the chain, so changing any of them would change the
//! state derived from an existing ledger.

/// Sender id used by system-originated transactions (genesis, settlement).
pub const SYSTEM_SENDER: &str = "SYSTEM";

/// Credits granted to every newly registered account.
pub const INITIAL_CREDITS: u64 = 20;

/// Credits staked by the author when posting an image. Seeds the prize pool.
pub const POST_COST: u64 = 5;

/// Credits staked by each vote. Added to the prize pool.
pub const VOTE_COST: u64 = 5;

/// Default voting window before a post is settled (24 hours).
pub const DEFAULT_VOTING_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Default interval between expiry sweeps.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Bio assigned to new accounts.
pub const DEFAULT_BIO: &str = "New user.";
