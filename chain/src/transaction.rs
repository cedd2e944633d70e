//! Transaction types for the Veritas ledger.
//!
//! Every user action is one variant of [`Transaction`], carrying exactly the
//! fields it needs. Genesis and settlement transactions are system-originated
//! and have no user sender.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::economy::SYSTEM_SENDER;
use crate::types::{hex_bytes, ContentId, Username};

/// A vote on the authenticity of a content item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    Believe,
    Fake,
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteChoice::Believe => write!(f, "BELIEVE"),
            VoteChoice::Fake => write!(f, "FAKE"),
        }
    }
}

impl std::str::FromStr for VoteChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BELIEVE" | "REAL" => Ok(VoteChoice::Believe),
            "FAKE" => Ok(VoteChoice::Fake),
            other => Err(format!("unknown vote choice: {other}")),
        }
    }
}

/// A ledger transaction. Serialized with an `action` tag naming the kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transaction {
    Genesis,
    RegisterUser {
        sender: Username,
        #[serde(with = "hex_bytes")]
        public_key: Vec<u8>,
    },
    PostImage {
        sender: Username,
        #[serde(with = "hex_bytes")]
        image: Vec<u8>,
    },
    Vote {
        sender: Username,
        target: ContentId,
        choice: VoteChoice,
    },
    Follow {
        sender: Username,
        target_user: Username,
    },
    Unfollow {
        sender: Username,
        target_user: Username,
    },
    SavePost {
        sender: Username,
        target: ContentId,
    },
    Repost {
        sender: Username,
        target: ContentId,
    },
    Unrepost {
        sender: Username,
        target: ContentId,
    },
    SetProfile {
        sender: Username,
        content: String,
    },
    Comment {
        sender: Username,
        target: ContentId,
        content: String,
    },
    PrivateMessage {
        sender: Username,
        target_user: Username,
        content: String,
    },
    #[serde(rename = "RESOLVE_POST")]
    Resolve { target: ContentId },
}

impl Transaction {
    /// Build the system settlement transaction for a content item.
    pub fn resolve(target: ContentId) -> Self {
        Transaction::Resolve { target }
    }

    /// Wire name of the transaction kind. Part of the block hash.
    pub fn action_kind(&self) -> &'static str {
        match self {
            Transaction::Genesis => "GENESIS",
            Transaction::RegisterUser { .. } => "REGISTER_USER",
            Transaction::PostImage { .. } => "POST_IMAGE",
            Transaction::Vote { .. } => "VOTE",
            Transaction::Follow { .. } => "FOLLOW",
            Transaction::Unfollow { .. } => "UNFOLLOW",
            Transaction::SavePost { .. } => "SAVE_POST",
            Transaction::Repost { .. } => "REPOST",
            Transaction::Unrepost { .. } => "UNREPOST",
            Transaction::SetProfile { .. } => "SET_PROFILE",
            Transaction::Comment { .. } => "COMMENT",
            Transaction::PrivateMessage { .. } => "PRIVATE_MSG",
            Transaction::Resolve { .. } => "RESOLVE_POST",
        }
    }

    /// The originating user, or the system id for genesis and settlement.
    pub fn sender(&self) -> &str {
        match self {
            Transaction::Genesis | Transaction::Resolve { .. } => SYSTEM_SENDER,
            Transaction::RegisterUser { sender, .. }
            | Transaction::PostImage { sender, .. }
            | Transaction::Vote { sender, .. }
            | Transaction::Follow { sender, .. }
            | Transaction::Unfollow { sender, .. }
            | Transaction::SavePost { sender, .. }
            | Transaction::Repost { sender, .. }
            | Transaction::Unrepost { sender, .. }
            | Transaction::SetProfile { sender, .. }
            | Transaction::Comment { sender, .. }
            | Transaction::PrivateMessage { sender, .. } => sender,
        }
    }

    /// The content item this transaction targets, if any.
    pub fn target_content(&self) -> Option<&ContentId> {
        match self {
            Transaction::Vote { target, .. }
            | Transaction::SavePost { target, .. }
            | Transaction::Repost { target, .. }
            | Transaction::Unrepost { target, .. }
            | Transaction::Comment { target, .. }
            | Transaction::Resolve { target } => Some(target),
            _ => None,
        }
    }

    /// Raw image bytes for posts; empty for everything else.
    pub fn image_payload(&self) -> &[u8] {
        match self {
            Transaction::PostImage { image, .. } => image,
            _ => &[],
        }
    }

    /// True for transactions that no user signs for.
    pub fn is_system(&self) -> bool {
        matches!(self, Transaction::Genesis | Transaction::Resolve { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
