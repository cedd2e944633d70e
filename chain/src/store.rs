//! Ledger persistence.
//!
//! `FileStore` keeps two files in its data directory:
//! - `chain.json`: a checkpoint of the full block sequence, replaced
//!   atomically (temp file + rename)
//! - `journal.jsonl`: one JSON block per line for every commit since the
//!   last checkpoint, appended and synced before the commit is applied
//!
//! Only blocks are stored. User and content views are always re-derived by
//! replaying the chain on load.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::types::Hash;

/// Storage backend for committed blocks.
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Load every persisted block in commit order, or `None` if nothing has
    /// been stored yet.
    fn load(&self) -> Result<Option<Vec<Block>>>;

    /// Durably record one newly committed block.
    fn append(&self, block: &Block) -> Result<()>;

    /// Replace the stored sequence with `blocks` and drop the journal.
    fn checkpoint(&self, blocks: &[Block]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct PersistedChain {
    height: u64,
    tip_hash: Hash,
    blocks: Vec<Block>,
}

#[derive(Debug)]
pub struct FileStore {
    checkpoint_path: PathBuf,
    journal_path: PathBuf,
    /// Set when a failed append could not be rolled back. Appends are refused
    /// until a checkpoint rewrites the journal.
    needs_checkpoint: AtomicBool,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            checkpoint_path: data_dir.as_ref().join("chain.json"),
            journal_path: data_dir.as_ref().join("journal.jsonl"),
            needs_checkpoint: AtomicBool::new(false),
        })
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    fn read_journal(&self) -> Result<Vec<Block>> {
        if !self.journal_path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.journal_path)?);
        let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        let last = lines.len().saturating_sub(1);

        let mut blocks = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Block>(line) {
                Ok(block) => blocks.push(block),
                // A torn final line means the process died mid-append, before
                // the commit was applied. Anything earlier is corruption.
                Err(e) if i == last => {
                    warn!(error = %e, "discarding torn journal tail");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(blocks)
    }

    /// Length of the journal up to and including its last newline. Any bytes
    /// after it are a partial line from an interrupted write and are cut off.
    fn complete_length(file: &mut File) -> Result<u64> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(0);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(len);
        }

        let mut contents = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)?;
        let keep = contents
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i as u64 + 1);
        warn!(dropped = len - keep, "truncating partial journal line");
        file.set_len(keep)?;
        file.sync_data()?;
        Ok(keep)
    }

    /// Cut the journal back to `len` after a failed append.
    fn roll_back(&self, file: &File, len: u64) {
        if let Err(e) = file.set_len(len).and_then(|()| file.sync_data()) {
            warn!(error = %e, "journal rollback failed, appends disabled until checkpoint");
            self.needs_checkpoint.store(true, Ordering::SeqCst);
        }
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        let mut blocks = if self.checkpoint_path.exists() {
            let data = fs::read(&self.checkpoint_path)?;
            serde_json::from_slice::<PersistedChain>(&data)?.blocks
        } else {
            Vec::new()
        };

        // Journal entries already folded into the checkpoint are skipped; this
        // covers a crash between writing a checkpoint and truncating the journal.
        let known: HashSet<Hash> = blocks.iter().map(|b| b.hash).collect();
        let journal = self.read_journal()?;
        let replayed = journal.len();
        blocks.extend(journal.into_iter().filter(|b| !known.contains(&b.hash)));

        if blocks.is_empty() {
            return Ok(None);
        }
        debug!(blocks = blocks.len(), journal = replayed, "snapshot loaded");
        Ok(Some(blocks))
    }

    fn append(&self, block: &Block) -> Result<()> {
        if self.needs_checkpoint.load(Ordering::SeqCst) {
            return Err(ChainError::Persistence(
                "journal is inconsistent, a checkpoint is required".into(),
            ));
        }
        let mut line = serde_json::to_vec(block)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.journal_path)?;
        let start = Self::complete_length(&mut file)?;

        if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
            self.roll_back(&file, start);
            return Err(e.into());
        }
        Ok(())
    }

    fn checkpoint(&self, blocks: &[Block]) -> Result<()> {
        let persisted = PersistedChain {
            height: blocks.len().saturating_sub(1) as u64,
            tip_hash: blocks.last().map(|b| b.hash).ok_or(ChainError::InvalidGenesis)?,
            blocks: blocks.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&persisted)?;
        let tmp_path = self.checkpoint_path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&data)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.checkpoint_path)?;
        File::create(&self.journal_path)?.sync_all()?;
        self.needs_checkpoint.store(false, Ordering::SeqCst);
        debug!(height = persisted.height, "checkpoint written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store for tests and demos. Can be told to fail writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: Mutex<Vec<Block>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a persistence error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChainError::Persistence("store is read-only".into()));
        }
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Vec<Block>>> {
        self.blocks
            .lock()
            .map_err(|_| ChainError::Persistence("memory store poisoned".into()))
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        let blocks = self.guard()?;
        Ok((!blocks.is_empty()).then(|| blocks.clone()))
    }

    fn append(&self, block: &Block) -> Result<()> {
        self.check_writable()?;
        self.guard()?.push(block.clone());
        Ok(())
    }

    fn checkpoint(&self, blocks: &[Block]) -> Result<()> {
        self.check_writable()?;
        *self.guard()? = blocks.to_vec();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ImageMetrics;
    use crate::transaction::Transaction;

    fn chain(len: usize) -> Vec<Block> {
        let mut blocks = vec![Block::genesis(1_700_000_000)];
        for i in 1..len {
            let prev = blocks[i - 1].hash;
            blocks.push(Block::new(
                Some(prev),
                Transaction::RegisterUser {
                    sender: format!("user{i}"),
                    public_key: vec![],
                },
                1_700_000_000 + i as i64,
                ImageMetrics::default(),
            ));
        }
        blocks
    }

    #[test]
    fn test_empty_dir_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_then_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(5);

        store.checkpoint(&blocks[..3]).unwrap();
        store.append(&blocks[3]).unwrap();
        store.append(&blocks[4]).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, blocks);
    }

    #[test]
    fn test_checkpoint_truncates_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(3);
        for b in &blocks {
            store.append(b).unwrap();
        }
        store.checkpoint(&blocks).unwrap();

        assert_eq!(fs::metadata(store.journal_path()).unwrap().len(), 0);
        assert_eq!(store.load().unwrap().unwrap(), blocks);
    }

    #[test]
    fn test_overlapping_journal_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(4);
        for b in &blocks {
            store.append(b).unwrap();
        }
        // Checkpoint written without the journal having been truncated.
        let persisted = PersistedChain {
            height: 2,
            tip_hash: blocks[2].hash,
            blocks: blocks[..3].to_vec(),
        };
        fs::write(store.checkpoint_path(), serde_json::to_vec(&persisted).unwrap()).unwrap();

        assert_eq!(store.load().unwrap().unwrap(), blocks);
    }

    #[test]
    fn test_torn_journal_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(2);
        for b in &blocks {
            store.append(b).unwrap();
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.journal_path())
            .unwrap();
        file.write_all(b"{\"timestamp\":17").unwrap();

        assert_eq!(store.load().unwrap().unwrap(), blocks);
    }

    #[test]
    fn test_append_after_partial_write_keeps_new_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(3);
        store.checkpoint(&blocks[..1]).unwrap();
        store.append(&blocks[1]).unwrap();

        // Fragment left behind by an interrupted write.
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.journal_path())
            .unwrap();
        file.write_all(b"{\"timestamp\":17").unwrap();
        drop(file);

        store.append(&blocks[2]).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), blocks);
    }

    #[test]
    fn test_roll_back_restores_journal_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(3);
        store.checkpoint(&blocks[..1]).unwrap();
        store.append(&blocks[1]).unwrap();
        let before = fs::metadata(store.journal_path()).unwrap().len();

        // A block written out whose sync then failed.
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.journal_path())
            .unwrap();
        let mut line = serde_json::to_vec(&blocks[2]).unwrap();
        line.push(b'\n');
        file.write_all(&line).unwrap();
        store.roll_back(&file, before);
        drop(file);

        assert_eq!(fs::metadata(store.journal_path()).unwrap().len(), before);
        assert_eq!(store.load().unwrap().unwrap(), blocks[..2].to_vec());
        assert!(!store.needs_checkpoint.load(Ordering::SeqCst));
    }

    #[test]
    fn test_appends_refused_until_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let blocks = chain(2);
        store.checkpoint(&blocks[..1]).unwrap();
        store.needs_checkpoint.store(true, Ordering::SeqCst);

        assert!(matches!(
            store.append(&blocks[1]),
            Err(ChainError::Persistence(_))
        ));
        store.checkpoint(&blocks[..1]).unwrap();
        store.append(&blocks[1]).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), blocks);
    }

    #[test]
    fn test_memory_store_failure_switch() {
        let store = MemoryStore::new();
        let blocks = chain(2);
        store.append(&blocks[0]).unwrap();
        store.set_fail_writes(true);
        assert!(matches!(
            store.append(&blocks[1]),
            Err(ChainError::Persistence(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
