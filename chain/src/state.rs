//! State projection for the Veritas ledger.
//!
//! Two materialized views, user accounts and content records, are derived by
//! applying each block's transaction in commit order. Replaying the same
//! block sequence always reproduces the same state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::Block;
use crate::economy::{DEFAULT_BIO, INITIAL_CREDITS, POST_COST, SYSTEM_SENDER, VOTE_COST};
use crate::error::{ChainError, Result};
use crate::settlement::{self, Settlement};
use crate::transaction::{Transaction, VoteChoice};
use crate::types::{ContentId, Username};

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Authenticity verdict of a content item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Window open, accepting votes.
    VotingOpen,
    /// Believers outnumbered fakes at settlement.
    ConfirmedReal,
    /// Fakes matched or outnumbered believers.
    BannedFake,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::VotingOpen => write!(f, "VOTING_OPEN"),
            Verdict::ConfirmedReal => write!(f, "CONFIRMED_REAL"),
            Verdict::BannedFake => write!(f, "BANNED_FAKE"),
        }
    }
}

// ---------------------------------------------------------------------------
// UserAccount
// ---------------------------------------------------------------------------

/// A private message delivered to a user's inbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub from: Username,
    pub content: String,
    pub timestamp: i64,
}

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: Username,
    #[serde(with = "crate::types::hex_bytes")]
    pub public_key: Vec<u8>,
    pub registered_at: i64,
    pub bio: String,
    pub avatar: String,
    pub following: BTreeSet<Username>,
    pub followers: BTreeSet<Username>,
    pub saved_posts: BTreeSet<ContentId>,
    pub reposted: BTreeSet<ContentId>,
    pub inbox: Vec<InboxMessage>,
    pub balance: u64,
}

impl UserAccount {
    /// Create an account with the initial credit grant.
    pub fn new(username: Username, public_key: Vec<u8>, registered_at: i64) -> Self {
        Self {
            username,
            public_key,
            registered_at,
            bio: DEFAULT_BIO.to_string(),
            avatar: String::new(),
            following: BTreeSet::new(),
            followers: BTreeSet::new(),
            saved_posts: BTreeSet::new(),
            reposted: BTreeSet::new(),
            inbox: Vec::new(),
            balance: INITIAL_CREDITS,
        }
    }
}

// ---------------------------------------------------------------------------
// ContentRecord
// ---------------------------------------------------------------------------

/// A comment left on a content item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub user: Username,
    pub content: String,
    pub timestamp: i64,
}

/// Reputation and economic state of a posted image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub author: Username,
    pub creation_time: i64,
    pub likes: u64,
    pub fakes: u64,
    pub comments: Vec<Comment>,
    pub repost_count: u64,
    pub prize_pool: u64,
    pub voters: BTreeMap<Username, VoteChoice>,
    pub resolved: bool,
    pub verdict: Verdict,
}

impl ContentRecord {
    pub fn new(author: Username, creation_time: i64, prize_pool: u64) -> Self {
        Self {
            author,
            creation_time,
            likes: 0,
            fakes: 0,
            comments: Vec::new(),
            repost_count: 0,
            prize_pool,
            voters: BTreeMap::new(),
            resolved: false,
            verdict: Verdict::VotingOpen,
        }
    }

    /// True when the voting window has elapsed at `now` and it is unsettled.
    pub fn is_expired(&self, now: i64, window_secs: u64) -> bool {
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        !self.resolved && now.saturating_sub(self.creation_time) > window
    }
}

// ---------------------------------------------------------------------------
// LedgerState
// ---------------------------------------------------------------------------

/// Materialized views derived from the block sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub users: BTreeMap<Username, UserAccount>,
    pub content: BTreeMap<ContentId, ContentRecord>,
}

/// Optional profile fields carried by a SetProfile payload.
#[derive(Deserialize)]
struct ProfileUpdate {
    bio: Option<String>,
    avatar: Option<String>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, username: &str) -> Option<&UserAccount> {
        self.users.get(username)
    }

    pub fn content(&self, id: &ContentId) -> Option<&ContentRecord> {
        self.content.get(id)
    }

    /// Balance of a user (0 if the account doesn't exist).
    pub fn balance(&self, username: &str) -> u64 {
        self.users.get(username).map_or(0, |u| u.balance)
    }

    // -----------------------------------------------------------------------
    // Pre-commit validation
    // -----------------------------------------------------------------------

    /// Check `tx` against the current state. Nothing is mutated.
    pub fn validate(&self, tx: &Transaction) -> Result<()> {
        match tx {
            Transaction::Genesis => Err(ChainError::InvalidTransaction(
                "genesis cannot be committed".into(),
            )),
            Transaction::Resolve { .. } => Ok(()),
            Transaction::RegisterUser { sender, .. } => {
                if sender.trim().is_empty() || sender == SYSTEM_SENDER {
                    return Err(ChainError::InvalidTransaction(format!(
                        "reserved or empty username: {sender:?}"
                    )));
                }
                if self.users.contains_key(sender) {
                    return Err(ChainError::DuplicateRegistration(sender.clone()));
                }
                Ok(())
            }
            _ => {
                let sender = tx.sender();
                let account = self
                    .users
                    .get(sender)
                    .ok_or_else(|| ChainError::UnregisteredSender(sender.to_string()))?;

                match tx {
                    Transaction::PostImage { .. } => require_funds(account, POST_COST),
                    Transaction::Vote { target, .. } => {
                        require_funds(account, VOTE_COST)?;
                        let record = self
                            .content
                            .get(target)
                            .ok_or_else(|| ChainError::UnknownTarget(target.to_string()))?;
                        if record.resolved {
                            return Err(ChainError::VotingClosed(target.to_string()));
                        }
                        if record.voters.contains_key(sender) {
                            return Err(ChainError::AlreadyVoted {
                                user: sender.to_string(),
                                content: target.to_string(),
                            });
                        }
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reducer
    // -----------------------------------------------------------------------

    /// Apply one committed block. Returns the settlement if the block
    /// resolved a content item.
    pub fn apply(&mut self, block: &Block) -> Option<Settlement> {
        let ts = block.timestamp;
        match &block.transaction {
            Transaction::Genesis => {}

            Transaction::RegisterUser { sender, public_key } => {
                self.users
                    .entry(sender.clone())
                    .or_insert_with(|| UserAccount::new(sender.clone(), public_key.clone(), ts));
            }

            Transaction::PostImage { sender, .. } => {
                if let Some(u) = self.users.get_mut(sender) {
                    u.balance = u.balance.saturating_sub(POST_COST);
                }
                self.content.insert(
                    block.content_id(),
                    ContentRecord::new(sender.clone(), ts, POST_COST),
                );
            }

            Transaction::Vote {
                sender,
                target,
                choice,
            } => {
                let Some(entry) = self.content.get_mut(target) else {
                    return None;
                };
                if entry.resolved || entry.voters.contains_key(sender) {
                    return None;
                }
                if let Some(u) = self.users.get_mut(sender) {
                    u.balance = u.balance.saturating_sub(VOTE_COST);
                }
                match choice {
                    VoteChoice::Believe => entry.likes += 1,
                    VoteChoice::Fake => entry.fakes += 1,
                }
                entry.prize_pool += VOTE_COST;
                entry.voters.insert(sender.clone(), *choice);
            }

            Transaction::Resolve { target } => {
                let entry = self.content.get_mut(target)?;
                let outcome = settlement::settle(target, entry, &mut self.users)?;
                debug!(
                    content = %outcome.content,
                    verdict = %outcome.verdict,
                    reward = outcome.reward,
                    winners = outcome.winners.len(),
                    forfeited = outcome.forfeited,
                    "content settled"
                );
                return Some(outcome);
            }

            Transaction::SetProfile { sender, content } => {
                if let Some(u) = self.users.get_mut(sender) {
                    match serde_json::from_str::<ProfileUpdate>(content) {
                        Ok(update) => {
                            if let Some(bio) = update.bio {
                                u.bio = bio;
                            }
                            if let Some(avatar) = update.avatar {
                                u.avatar = avatar;
                            }
                        }
                        Err(_) => u.bio = content.clone(),
                    }
                }
            }

            Transaction::Comment {
                sender,
                target,
                content,
            } => {
                if let Some(entry) = self.content.get_mut(target) {
                    entry.comments.push(Comment {
                        user: sender.clone(),
                        content: content.clone(),
                        timestamp: ts,
                    });
                }
            }

            Transaction::PrivateMessage {
                sender,
                target_user,
                content,
            } => {
                if let Some(recipient) = self.users.get_mut(target_user) {
                    recipient.inbox.push(InboxMessage {
                        from: sender.clone(),
                        content: content.clone(),
                        timestamp: ts,
                    });
                }
            }

            Transaction::Follow {
                sender,
                target_user,
            } => {
                let both_exist =
                    self.users.contains_key(sender) && self.users.contains_key(target_user);
                if !both_exist || sender == target_user {
                    return None;
                }
                let newly_following = self
                    .users
                    .get_mut(sender)
                    .map_or(false, |u| u.following.insert(target_user.clone()));
                if newly_following {
                    if let Some(target) = self.users.get_mut(target_user) {
                        target.followers.insert(sender.clone());
                    }
                }
            }

            Transaction::Unfollow {
                sender,
                target_user,
            } => {
                if let Some(u) = self.users.get_mut(sender) {
                    u.following.remove(target_user);
                }
                if let Some(target) = self.users.get_mut(target_user) {
                    target.followers.remove(sender);
                }
            }

            Transaction::SavePost { sender, target } => {
                if let Some(u) = self.users.get_mut(sender) {
                    u.saved_posts.insert(target.clone());
                }
            }

            Transaction::Repost { sender, target } => {
                if let Some(u) = self.users.get_mut(sender) {
                    u.reposted.insert(target.clone());
                }
                if let Some(entry) = self.content.get_mut(target) {
                    entry.repost_count += 1;
                }
            }

            Transaction::Unrepost { sender, target } => {
                if let Some(u) = self.users.get_mut(sender) {
                    u.reposted.remove(target);
                }
                if let Some(entry) = self.content.get_mut(target) {
                    entry.repost_count = entry.repost_count.saturating_sub(1);
                }
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Unresolved content whose voting window has elapsed at `now`.
    pub fn expired_content(&self, now: i64, window_secs: u64) -> Vec<ContentId> {
        self.content
            .iter()
            .filter(|(_, rec)| rec.is_expired(now, window_secs))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Return a summary of the state for display.
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            total_users: self.users.len(),
            total_content: self.content.len(),
            open_content: self
                .content
                .values()
                .filter(|c| c.verdict == Verdict::VotingOpen)
                .count(),
            confirmed_real: self
                .content
                .values()
                .filter(|c| c.verdict == Verdict::ConfirmedReal)
                .count(),
            banned_fake: self
                .content
                .values()
                .filter(|c| c.verdict == Verdict::BannedFake)
                .count(),
            circulating_credits: self.users.values().map(|u| u.balance).sum(),
            staked_credits: self
                .content
                .values()
                .filter(|c| !c.resolved)
                .map(|c| c.prize_pool)
                .sum(),
        }
    }
}

fn require_funds(account: &UserAccount, required: u64) -> Result<()> {
    if account.balance < required {
        return Err(ChainError::InsufficientFunds {
            balance: account.balance,
            required,
        });
    }
    Ok(())
}

/// Summary of ledger state for CLI display.
#[derive(Debug, Serialize)]
pub struct StateSummary {
    pub total_users: usize,
    pub total_content: usize,
    pub open_content: usize,
    pub confirmed_real: usize,
    pub banned_fake: usize,
    pub circulating_credits: u64,
    pub staked_credits: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ImageMetrics;
    use crate::types::Hash;

    fn now() -> i64 {
        1_700_000_000
    }

    /// Build a block and apply it; returns the block for content ids.
    fn apply(state: &mut LedgerState, tx: Transaction) -> Block {
        let block = Block::new(Some(Hash::compute(b"prev")), tx, now(), ImageMetrics::default());
        state.apply(&block);
        block
    }

    fn register(state: &mut LedgerState, name: &str) {
        apply(
            state,
            Transaction::RegisterUser {
                sender: name.into(),
                public_key: vec![1, 2, 3],
            },
        );
    }

    fn post(state: &mut LedgerState, name: &str) -> ContentId {
        apply(
            state,
            Transaction::PostImage {
                sender: name.into(),
                image: name.as_bytes().to_vec(),
            },
        )
        .content_id()
    }

    #[test]
    fn test_register_grants_initial_credits() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");

        let alice = state.user("alice").unwrap();
        assert_eq!(alice.balance, INITIAL_CREDITS);
        assert_eq!(alice.bio, DEFAULT_BIO);
        assert_eq!(alice.public_key, vec![1, 2, 3]);
        assert_eq!(alice.registered_at, now());
    }

    #[test]
    fn test_validate_registration() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");

        let dup = Transaction::RegisterUser {
            sender: "alice".into(),
            public_key: vec![],
        };
        assert!(matches!(
            state.validate(&dup),
            Err(ChainError::DuplicateRegistration(u)) if u == "alice"
        ));

        let reserved = Transaction::RegisterUser {
            sender: SYSTEM_SENDER.into(),
            public_key: vec![],
        };
        assert!(matches!(
            state.validate(&reserved),
            Err(ChainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_validate_requires_registered_sender() {
        let state = LedgerState::new();
        let tx = Transaction::SetProfile {
            sender: "nobody".into(),
            content: "hi".into(),
        };
        assert!(matches!(
            state.validate(&tx),
            Err(ChainError::UnregisteredSender(_))
        ));
        assert!(state
            .validate(&Transaction::resolve(ContentId::from("x")))
            .is_ok());
        assert!(state.validate(&Transaction::Genesis).is_err());
    }

    #[test]
    fn test_post_debits_and_opens_pool() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        let id = post(&mut state, "alice");

        assert_eq!(state.balance("alice"), 15);
        let rec = state.content(&id).unwrap();
        assert_eq!(rec.prize_pool, POST_COST);
        assert_eq!(rec.verdict, Verdict::VotingOpen);
        assert_eq!(rec.author, "alice");
        assert!(!rec.resolved);
    }

    #[test]
    fn test_post_requires_funds() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        state.users.get_mut("alice").unwrap().balance = 3;

        let tx = Transaction::PostImage {
            sender: "alice".into(),
            image: vec![1],
        };
        assert!(matches!(
            state.validate(&tx),
            Err(ChainError::InsufficientFunds {
                balance: 3,
                required: 5
            })
        ));
    }

    #[test]
    fn test_vote_accumulates_pool() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        register(&mut state, "bob");
        let id = post(&mut state, "alice");

        apply(
            &mut state,
            Transaction::Vote {
                sender: "bob".into(),
                target: id.clone(),
                choice: VoteChoice::Believe,
            },
        );
        let rec = state.content(&id).unwrap();
        assert_eq!(rec.likes, 1);
        assert_eq!(rec.prize_pool, 10);
        assert_eq!(rec.voters.get("bob"), Some(&VoteChoice::Believe));
        assert_eq!(state.balance("bob"), 15);
    }

    #[test]
    fn test_second_vote_rejected_and_ignored() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        register(&mut state, "bob");
        let id = post(&mut state, "alice");
        let vote = |choice| Transaction::Vote {
            sender: "bob".into(),
            target: id.clone(),
            choice,
        };

        apply(&mut state, vote(VoteChoice::Believe));
        assert!(matches!(
            state.validate(&vote(VoteChoice::Fake)),
            Err(ChainError::AlreadyVoted { .. })
        ));

        apply(&mut state, vote(VoteChoice::Fake));
        let rec = state.content(&id).unwrap();
        assert_eq!((rec.likes, rec.fakes), (1, 0));
        assert_eq!(rec.prize_pool, 10);
        assert_eq!(state.balance("bob"), 15);
    }

    #[test]
    fn test_vote_on_unknown_or_closed_content() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        register(&mut state, "bob");
        let unknown = Transaction::Vote {
            sender: "bob".into(),
            target: ContentId::from("missing"),
            choice: VoteChoice::Fake,
        };
        assert!(matches!(
            state.validate(&unknown),
            Err(ChainError::UnknownTarget(_))
        ));

        let id = post(&mut state, "alice");
        apply(&mut state, Transaction::resolve(id.clone()));
        let late = Transaction::Vote {
            sender: "bob".into(),
            target: id,
            choice: VoteChoice::Fake,
        };
        assert!(matches!(
            state.validate(&late),
            Err(ChainError::VotingClosed(_))
        ));
    }

    #[test]
    fn test_set_profile_json_and_plain_text() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");

        apply(
            &mut state,
            Transaction::SetProfile {
                sender: "alice".into(),
                content: r#"{"avatar":"cat.png"}"#.into(),
            },
        );
        let alice = state.user("alice").unwrap();
        assert_eq!(alice.avatar, "cat.png");
        assert_eq!(alice.bio, DEFAULT_BIO);

        apply(
            &mut state,
            Transaction::SetProfile {
                sender: "alice".into(),
                content: "just a photographer".into(),
            },
        );
        let alice = state.user("alice").unwrap();
        assert_eq!(alice.bio, "just a photographer");
        assert_eq!(alice.avatar, "cat.png");
    }

    #[test]
    fn test_comment_and_message_drop_unknown_targets() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        register(&mut state, "bob");
        let id = post(&mut state, "alice");

        apply(
            &mut state,
            Transaction::Comment {
                sender: "bob".into(),
                target: id.clone(),
                content: "nice".into(),
            },
        );
        apply(
            &mut state,
            Transaction::Comment {
                sender: "bob".into(),
                target: ContentId::from("missing"),
                content: "lost".into(),
            },
        );
        assert_eq!(state.content(&id).unwrap().comments.len(), 1);
        assert_eq!(state.content.len(), 1);

        apply(
            &mut state,
            Transaction::PrivateMessage {
                sender: "bob".into(),
                target_user: "alice".into(),
                content: "hello".into(),
            },
        );
        apply(
            &mut state,
            Transaction::PrivateMessage {
                sender: "bob".into(),
                target_user: "carol".into(),
                content: "hello?".into(),
            },
        );
        let inbox = &state.user("alice").unwrap().inbox;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].from, "bob");
        assert!(state.user("carol").is_none());
    }

    #[test]
    fn test_follow_graph_is_symmetric() {
        let mut state = LedgerState::new();
        register(&mut state, "a");
        register(&mut state, "b");
        let follow = Transaction::Follow {
            sender: "a".into(),
            target_user: "b".into(),
        };
        let unfollow = Transaction::Unfollow {
            sender: "a".into(),
            target_user: "b".into(),
        };

        apply(&mut state, follow.clone());
        apply(&mut state, follow);
        assert!(state.user("a").unwrap().following.contains("b"));
        assert!(state.user("b").unwrap().followers.contains("a"));
        assert_eq!(state.user("b").unwrap().followers.len(), 1);

        apply(&mut state, unfollow.clone());
        apply(&mut state, unfollow);
        assert!(state.user("a").unwrap().following.is_empty());
        assert!(state.user("b").unwrap().followers.is_empty());
    }

    #[test]
    fn test_self_follow_is_noop() {
        let mut state = LedgerState::new();
        register(&mut state, "a");
        apply(
            &mut state,
            Transaction::Follow {
                sender: "a".into(),
                target_user: "a".into(),
            },
        );
        assert!(state.user("a").unwrap().following.is_empty());
    }

    #[test]
    fn test_repost_counter_floors_at_zero() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        let id = post(&mut state, "alice");
        let unrepost = Transaction::Unrepost {
            sender: "alice".into(),
            target: id.clone(),
        };

        apply(
            &mut state,
            Transaction::Repost {
                sender: "alice".into(),
                target: id.clone(),
            },
        );
        assert_eq!(state.content(&id).unwrap().repost_count, 1);
        assert!(state.user("alice").unwrap().reposted.contains(&id));

        apply(&mut state, unrepost.clone());
        apply(&mut state, unrepost);
        assert_eq!(state.content(&id).unwrap().repost_count, 0);
        assert!(state.user("alice").unwrap().reposted.is_empty());
    }

    #[test]
    fn test_save_post() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        let id = post(&mut state, "alice");
        apply(
            &mut state,
            Transaction::SavePost {
                sender: "alice".into(),
                target: id.clone(),
            },
        );
        assert!(state.user("alice").unwrap().saved_posts.contains(&id));
    }

    #[test]
    fn test_expired_content() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        let id = post(&mut state, "alice");

        assert!(state.expired_content(now() + 100, 100).is_empty());
        assert_eq!(state.expired_content(now() + 101, 100), vec![id.clone()]);

        apply(&mut state, Transaction::resolve(id));
        assert!(state.expired_content(now() + 1_000, 100).is_empty());
    }

    #[test]
    fn test_huge_window_never_expires() {
        let record = ContentRecord::new("alice".into(), 1_700_000_000, 5);
        assert!(!record.is_expired(1_700_000_001, u64::MAX));
        assert!(!record.is_expired(i64::MAX, i64::MAX as u64 + 1));
        assert!(record.is_expired(1_700_000_002, 1));
    }

    #[test]
    fn test_summary_counts() {
        let mut state = LedgerState::new();
        register(&mut state, "alice");
        post(&mut state, "alice");

        let summary = state.summary();
        assert_eq!(summary.total_users, 1);
        assert_eq!(summary.open_content, 1);
        assert_eq!(summary.circulating_credits, 15);
        assert_eq!(summary.staked_credits, 5);
    }
}
