//! Thread-safe front door to the ledger.
//!
//! Every mutation goes through [`Node::commit`], which holds a single writer
//! lock across the whole sequence: validate, admission gate, build block,
//! journal the block, apply it, publish. Readers get an immutable
//! [`LedgerSnapshot`] that is rebuilt at most once per commit and never
//! observes a partially applied block.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analyzer::{AdmissionGate, ByteStatistics};
use crate::block::Block;
use crate::config::NodeConfig;
use crate::error::{ChainError, Result};
use crate::ledger::Ledger;
use crate::state::{ContentRecord, LedgerState, StateSummary, UserAccount};
use crate::store::{FileStore, SnapshotStore};
use crate::transaction::Transaction;
use crate::types::{current_timestamp, ContentId, Username};

/// Point-in-time export of the full ledger.
#[derive(Clone, Debug, Serialize)]
pub struct LedgerSnapshot {
    pub blocks: Vec<Block>,
    pub users: BTreeMap<Username, UserAccount>,
    pub content: BTreeMap<ContentId, ContentRecord>,
}

impl LedgerSnapshot {
    fn of(ledger: &Ledger) -> Self {
        let state = ledger.state();
        Self {
            blocks: ledger.blocks().to_vec(),
            users: state.users.clone(),
            content: state.content.clone(),
        }
    }

    pub fn height(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    /// Reassemble the state views.
    pub fn state(&self) -> LedgerState {
        LedgerState {
            users: self.users.clone(),
            content: self.content.clone(),
        }
    }
}

struct Writer {
    ledger: Ledger,
    since_checkpoint: u64,
}

pub struct Node {
    writer: Mutex<Writer>,
    /// Cleared by every commit; rebuilt lazily under the writer lock.
    published: RwLock<Option<Arc<LedgerSnapshot>>>,
    store: Arc<dyn SnapshotStore>,
    gate: AdmissionGate,
    checkpoint_interval: u64,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("store", &self.store)
            .field("analyzer", &self.gate.analyzer_name())
            .field("checkpoint_interval", &self.checkpoint_interval)
            .finish()
    }
}

impl Node {
    /// Open the file-backed node described by `config`.
    pub fn open(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(FileStore::new(&config.data_dir)?);
        let gate = AdmissionGate::new(Arc::new(ByteStatistics), config.admission);
        Self::with_store(store, gate, config.checkpoint_interval)
    }

    /// Load the ledger from `store`, or initialize a fresh one with a genesis
    /// block if the store is empty. The loaded chain is fully verified and
    /// compacted into a new checkpoint.
    pub fn with_store(
        store: Arc<dyn SnapshotStore>,
        gate: AdmissionGate,
        checkpoint_interval: u64,
    ) -> Result<Self> {
        let ledger = match store.load()? {
            Some(blocks) => {
                let ledger = Ledger::replay(blocks)?;
                info!(blocks = ledger.len(), tip = %ledger.tip(), "ledger loaded");
                ledger
            }
            None => {
                let ledger = Ledger::new(current_timestamp());
                info!(genesis = %ledger.tip(), "initialized fresh ledger");
                ledger
            }
        };
        store.checkpoint(ledger.blocks())?;

        Ok(Self {
            writer: Mutex::new(Writer {
                ledger,
                since_checkpoint: 0,
            }),
            published: RwLock::new(None),
            store,
            gate,
            checkpoint_interval: checkpoint_interval.max(1),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Writer>> {
        self.writer.lock().map_err(|_| ChainError::LockPoisoned)
    }

    /// Commit a transaction stamped with the current time. Returns the new
    /// block's hash as hex.
    pub fn commit(&self, tx: Transaction) -> Result<String> {
        self.commit_at(tx, current_timestamp())
    }

    /// Commit a transaction with an explicit timestamp.
    pub fn commit_at(&self, tx: Transaction, timestamp: i64) -> Result<String> {
        let mut writer = self.lock()?;
        let action = tx.action_kind();
        let sender = tx.sender().to_string();

        let block = match writer.ledger.prepare(tx, timestamp, &self.gate) {
            Ok(block) => block,
            Err(e) => {
                warn!(%sender, action, error = %e, "transaction rejected");
                return Err(e);
            }
        };

        // Journal first: a failed write leaves memory and disk untouched.
        if let Err(e) = self.store.append(&block) {
            warn!(%sender, action, error = %e, "journal append failed");
            self.recover_journal(&mut writer);
            return Err(e);
        }
        let hash = block.hash.to_hex();
        let settlement = writer.ledger.push(block)?;

        writer.since_checkpoint += 1;
        if writer.since_checkpoint >= self.checkpoint_interval {
            match self.store.checkpoint(writer.ledger.blocks()) {
                Ok(()) => writer.since_checkpoint = 0,
                Err(e) => warn!(error = %e, "checkpoint failed, journal retained"),
            }
        }

        if let Ok(mut published) = self.published.write() {
            *published = None;
        }

        match settlement {
            Some(s) => info!(
                content = %s.content,
                verdict = %s.verdict,
                reward = s.reward,
                winners = s.winners.len(),
                %hash,
                "block committed: settlement"
            ),
            None => info!(%sender, action, %hash, "block committed"),
        }
        Ok(hash)
    }

    /// Rewrite the checkpoint from memory so no trace of a failed append can
    /// survive on disk.
    fn recover_journal(&self, writer: &mut Writer) {
        match self.store.checkpoint(writer.ledger.blocks()) {
            Ok(()) => writer.since_checkpoint = 0,
            Err(e) => warn!(error = %e, "recovery checkpoint failed"),
        }
    }

    /// Unresolved content whose voting window has elapsed at `now`. Reads the
    /// live state under the writer lock without building a snapshot.
    pub fn expired_content(&self, now: i64, window_secs: u64) -> Result<Vec<ContentId>> {
        Ok(self.lock()?.ledger.state().expired_content(now, window_secs))
    }

    /// Consistent read-only export of blocks, users and content.
    pub fn snapshot(&self) -> Result<Arc<LedgerSnapshot>> {
        if let Ok(published) = self.published.read() {
            if let Some(snapshot) = published.as_ref() {
                return Ok(Arc::clone(snapshot));
            }
        }

        let writer = self.lock()?;
        let snapshot = Arc::new(LedgerSnapshot::of(&writer.ledger));
        if let Ok(mut published) = self.published.write() {
            *published = Some(Arc::clone(&snapshot));
        }
        debug!(height = snapshot.height(), "snapshot published");
        Ok(snapshot)
    }

    /// Replay the chain from genesis and confirm it reproduces the live state.
    pub fn verify(&self) -> Result<()> {
        let writer = self.lock()?;
        writer.ledger.verify_chain()?;
        let replayed = Ledger::replay(writer.ledger.blocks().to_vec())?;
        if replayed.state() != writer.ledger.state() {
            return Err(ChainError::InvalidTransaction(
                "replayed state diverges from live state".into(),
            ));
        }
        Ok(())
    }

    pub fn summary(&self) -> Result<StateSummary> {
        Ok(self.lock()?.ledger.state().summary())
    }

    pub fn height(&self) -> Result<usize> {
        Ok(self.lock()?.ledger.len().saturating_sub(1))
    }

    /// Force a checkpoint of the full chain.
    pub fn checkpoint(&self) -> Result<()> {
        let mut writer = self.lock()?;
        self.store.checkpoint(writer.ledger.blocks())?;
        writer.since_checkpoint = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
