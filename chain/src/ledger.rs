//! The hash-chained block sequence and the state derived from it.
//!
//! `Ledger` has no locking of its own; `Node` serializes access to it.

use serde::Serialize;
use tracing::debug;

use crate::analyzer::{AdmissionGate, ImageMetrics};
use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::settlement::Settlement;
use crate::state::LedgerState;
use crate::transaction::Transaction;
use crate::types::Hash;

/// Append-only block sequence plus its projected state.
#[derive(Clone, Debug, Serialize)]
pub struct Ledger {
    blocks: Vec<Block>,
    state: LedgerState,
}

impl Ledger {
    /// A fresh ledger holding only a genesis block.
    pub fn new(genesis_timestamp: i64) -> Self {
        Self {
            blocks: vec![Block::genesis(genesis_timestamp)],
            state: LedgerState::new(),
        }
    }

    /// Rebuild a ledger from a stored block sequence, verifying every hash and
    /// link and re-deriving the state from genesis.
    pub fn replay(blocks: Vec<Block>) -> Result<Self> {
        let mut iter = blocks.into_iter();
        let genesis = iter.next().ok_or(ChainError::InvalidGenesis)?;
        if !genesis.is_genesis() || !genesis.verify_hash() {
            return Err(ChainError::InvalidGenesis);
        }

        let mut ledger = Self {
            blocks: vec![genesis],
            state: LedgerState::new(),
        };
        for block in iter {
            ledger.push(block)?;
        }
        debug!(blocks = ledger.blocks.len(), "ledger replayed");
        Ok(ledger)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Hash of the most recent block.
    pub fn tip(&self) -> Hash {
        // `new` and `replay` both guarantee a genesis block.
        self.blocks.last().map(|b| b.hash).unwrap_or_else(|| Hash::from_bytes([0u8; 32]))
    }

    /// Validate `tx`, run the admission gate for image posts and build the
    /// next block. The ledger is not modified.
    pub fn prepare(&self, tx: Transaction, timestamp: i64, gate: &AdmissionGate) -> Result<Block> {
        self.state.validate(&tx)?;

        let metrics = match &tx {
            Transaction::PostImage { image, .. } => gate.admit(image)?,
            _ => ImageMetrics::default(),
        };

        Ok(Block::new(Some(self.tip()), tx, timestamp, metrics))
    }

    /// Append a block built on the current tip and apply it to the state.
    pub fn push(&mut self, block: Block) -> Result<Option<Settlement>> {
        let index = self.blocks.len();
        if block.prev_hash != Some(self.tip()) {
            return Err(ChainError::BrokenChain { index });
        }
        if !block.verify_hash() {
            return Err(ChainError::HashMismatch { index });
        }
        if matches!(block.transaction, Transaction::Genesis) {
            return Err(ChainError::InvalidGenesis);
        }

        let outcome = self.state.apply(&block);
        self.blocks.push(block);
        Ok(outcome)
    }

    /// `prepare` followed by `push`; all or nothing.
    pub fn append(&mut self, tx: Transaction, timestamp: i64, gate: &AdmissionGate) -> Result<Block> {
        let block = self.prepare(tx, timestamp, gate)?;
        self.push(block.clone())?;
        Ok(block)
    }

    /// Check hash integrity and linkage of the whole sequence.
    pub fn verify_chain(&self) -> Result<()> {
        let Some(genesis) = self.blocks.first() else {
            return Err(ChainError::InvalidGenesis);
        };
        if !genesis.is_genesis() || !genesis.verify_hash() {
            return Err(ChainError::InvalidGenesis);
        }
        for (index, pair) in self.blocks.windows(2).enumerate() {
            let (prev, block) = (&pair[0], &pair[1]);
            if block.prev_hash != Some(prev.hash) {
                return Err(ChainError::BrokenChain { index: index + 1 });
            }
            if !block.verify_hash() {
                return Err(ChainError::HashMismatch { index: index + 1 });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
