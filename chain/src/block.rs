//! Block structure for the Veritas ledger.
//!
//! A block wraps exactly one transaction. Its hash commits to the previous
//! block's hash, the transaction's sender, kind, target content and image
//! payload, the admission metrics and the timestamp.

use serde::{Deserialize, Serialize};

use crate::analyzer::ImageMetrics;
use crate::transaction::Transaction;
use crate::types::{ContentId, Hash};

/// A single committed ledger entry. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Hash of the previous block (`None` for genesis).
    pub prev_hash: Option<Hash>,
    pub hash: Hash,
    pub transaction: Transaction,
    /// Admission metrics; zero unless the transaction posts an image.
    #[serde(default)]
    pub entropy_score: f64,
    #[serde(default)]
    pub std_dev_score: f64,
}

impl Block {
    /// Build and hash a new block on top of `prev_hash`.
    pub fn new(
        prev_hash: Option<Hash>,
        transaction: Transaction,
        timestamp: i64,
        metrics: ImageMetrics,
    ) -> Self {
        let mut block = Self {
            timestamp,
            prev_hash,
            hash: Hash::from_bytes([0u8; 32]),
            transaction,
            entropy_score: metrics.entropy,
            std_dev_score: metrics.std_dev,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Create the genesis block.
    pub fn genesis(timestamp: i64) -> Self {
        Self::new(None, Transaction::Genesis, timestamp, ImageMetrics::default())
    }

    /// Canonical bytes committed to by the block hash.
    pub fn hash_material(&self) -> Vec<u8> {
        let tx = &self.transaction;
        let target = tx.target_content().map(ContentId::as_str).unwrap_or("");
        let image = tx.image_payload();

        let mut bytes = Vec::with_capacity(128 + image.len());
        if let Some(prev) = &self.prev_hash {
            bytes.extend_from_slice(prev.as_bytes());
        }
        bytes.extend_from_slice(tx.sender().as_bytes());
        bytes.extend_from_slice(tx.action_kind().as_bytes());
        bytes.extend_from_slice(target.as_bytes());
        bytes.extend_from_slice(image);
        bytes.extend_from_slice(
            format!("{:.4}|{:.4}", self.entropy_score, self.std_dev_score).as_bytes(),
        );
        bytes.extend_from_slice(self.timestamp.to_string().as_bytes());
        bytes
    }

    /// Recompute the hash from the block contents.
    pub fn compute_hash(&self) -> Hash {
        Hash::compute(&self.hash_material())
    }

    /// True when the stored hash matches the contents.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// True when this block is a well-formed genesis block.
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none() && matches!(self.transaction, Transaction::Genesis)
    }

    /// Content id minted by this block when it posts an image.
    pub fn content_id(&self) -> ContentId {
        ContentId::from(self.hash)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::VoteChoice;

    fn now() -> i64 {
        1_700_000_000
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(now());
        assert!(genesis.is_genesis());
        assert!(genesis.prev_hash.is_none());
        assert!(genesis.verify_hash());
        assert_eq!(genesis.entropy_score, 0.0);
    }

    #[test]
    fn test_hash_matches_documented_layout() {
        let genesis = Block::genesis(now());
        let post = Block::new(
            Some(genesis.hash),
            Transaction::PostImage {
                sender: "alice".into(),
                image: vec![1, 2, 3],
            },
            now() + 1,
            ImageMetrics {
                entropy: 7.5,
                std_dev: 60.0,
            },
        );

        let mut expected = Vec::new();
        expected.extend_from_slice(genesis.hash.as_bytes());
        expected.extend_from_slice(b"alicePOST_IMAGE");
        expected.extend_from_slice(&[1, 2, 3]);
        expected.extend_from_slice(b"7.5000|60.0000");
        expected.extend_from_slice(b"1700000001");
        assert_eq!(post.hash, Hash::compute(&expected));
    }

    #[test]
    fn test_genesis_hash_has_no_prev_bytes() {
        let genesis = Block::genesis(now());
        let expected = Hash::compute(b"SYSTEMGENESIS0.0000|0.00001700000000");
        assert_eq!(genesis.hash, expected);
    }

    #[test]
    fn test_tampering_breaks_hash() {
        let genesis = Block::genesis(now());
        let mut vote = Block::new(
            Some(genesis.hash),
            Transaction::Vote {
                sender: "bob".into(),
                target: ContentId::from("aa"),
                choice: VoteChoice::Believe,
            },
            now(),
            ImageMetrics::default(),
        );
        assert!(vote.verify_hash());

        vote.timestamp += 1;
        assert!(!vote.verify_hash());
    }

    #[test]
    fn test_block_serialization_roundtrip() {
        let block = Block::genesis(now());
        let json = serde_json::to_string(&block).expect("serialize");
        let back: Block = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, block);
        assert!(back.verify_hash());
    }
}
