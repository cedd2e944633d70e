//! Pari-mutuel settlement of a content item's prize pool.
//!
//! When the voting window closes the pool is split evenly among the winning
//! side. A real verdict pays the author and every BELIEVE voter, each once;
//! a fake verdict pays only FAKE voters. Integer division remainders are
//! never paid out, so the total credited never exceeds the pool.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::{ContentRecord, UserAccount, Verdict};
use crate::transaction::VoteChoice;
use crate::types::{ContentId, Username};

/// Outcome of settling one content item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub content: ContentId,
    pub verdict: Verdict,
    pub pool: u64,
    /// Credits paid to each winner.
    pub reward: u64,
    /// Winners that still had an account and were credited.
    pub winners: Vec<Username>,
    /// Total credits actually paid out.
    pub distributed: u64,
    /// Credits that left circulation for good.
    pub forfeited: u64,
}

/// Settle `record` against `users`. Returns `None` if already resolved.
pub fn settle(
    content: &ContentId,
    record: &mut ContentRecord,
    users: &mut BTreeMap<Username, UserAccount>,
) -> Option<Settlement> {
    if record.resolved {
        return None;
    }
    record.resolved = true;
    let pool = record.prize_pool;

    let (verdict, side) = if record.likes > record.fakes {
        (Verdict::ConfirmedReal, VoteChoice::Believe)
    } else {
        (Verdict::BannedFake, VoteChoice::Fake)
    };
    record.verdict = verdict;

    // Winner set: the author (on a real verdict) united with the winning
    // voters. An author who voted for their own post is counted once.
    let mut eligible: Vec<&Username> = Vec::new();
    if verdict == Verdict::ConfirmedReal {
        eligible.push(&record.author);
    }
    eligible.extend(
        record
            .voters
            .iter()
            .filter(|(voter, choice)| **choice == side && **voter != record.author)
            .map(|(voter, _)| voter),
    );

    let reward = match eligible.len() as u64 {
        0 => 0,
        winner_count => pool / winner_count,
    };

    let mut winners = Vec::new();
    if reward > 0 {
        for name in eligible {
            if let Some(account) = users.get_mut(name) {
                account.balance += reward;
                winners.push(name.clone());
            }
        }
    }

    let distributed = reward * winners.len() as u64;
    Some(Settlement {
        content: content.clone(),
        verdict,
        pool,
        reward,
        winners,
        distributed,
        forfeited: pool - distributed,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn users(names: &[(&str, u64)]) -> BTreeMap<Username, UserAccount> {
        names
            .iter()
            .map(|(n, b)| {
                let mut acct = UserAccount::new(n.to_string(), Vec::new(), 0);
                acct.balance = *b;
                (n.to_string(), acct)
            })
            .collect()
    }

    fn record(author: &str, pool: u64, votes: &[(&str, VoteChoice)]) -> ContentRecord {
        let mut rec = ContentRecord::new(author.to_string(), 0, pool);
        for (voter, choice) in votes {
            match choice {
                VoteChoice::Believe => rec.likes += 1,
                VoteChoice::Fake => rec.fakes += 1,
            }
            rec.voters.insert(voter.to_string(), *choice);
        }
        rec
    }

    fn id() -> ContentId {
        ContentId::from("c0ffee")
    }

    #[test]
    fn test_real_wins_pays_author_and_believers() {
        let mut u = users(&[("alice", 15), ("bob", 15)]);
        let mut rec = record("alice", 10, &[("bob", VoteChoice::Believe)]);

        let s = settle(&id(), &mut rec, &mut u).expect("settled");
        assert_eq!(s.verdict, Verdict::ConfirmedReal);
        assert_eq!(s.reward, 5);
        assert_eq!(s.distributed, 10);
        assert_eq!(u["alice"].balance, 20);
        assert_eq!(u["bob"].balance, 20);
        assert!(rec.resolved);
    }

    #[test]
    fn test_fake_wins_excludes_author() {
        let mut u = users(&[("alice", 15), ("bob", 15)]);
        let mut rec = record("alice", 10, &[("bob", VoteChoice::Fake)]);

        let s = settle(&id(), &mut rec, &mut u).expect("settled");
        assert_eq!(s.verdict, Verdict::BannedFake);
        assert_eq!(s.reward, 10);
        assert_eq!(u["alice"].balance, 15);
        assert_eq!(u["bob"].balance, 25);
    }

    #[test]
    fn test_tie_bans_and_pays_fake_side() {
        let mut u = users(&[("a", 0), ("b", 0), ("c", 0)]);
        let mut rec = record(
            "a",
            15,
            &[("b", VoteChoice::Believe), ("c", VoteChoice::Fake)],
        );

        let s = settle(&id(), &mut rec, &mut u).unwrap();
        assert_eq!(s.verdict, Verdict::BannedFake);
        assert_eq!(u["c"].balance, 15);
        assert_eq!(u["b"].balance, 0);
        assert_eq!(u["a"].balance, 0);
    }

    #[test]
    fn test_no_votes_forfeits_pool() {
        let mut u = users(&[("alice", 15)]);
        let mut rec = record("alice", 5, &[]);

        let s = settle(&id(), &mut rec, &mut u).unwrap();
        assert_eq!(s.verdict, Verdict::BannedFake);
        assert!(s.winners.is_empty());
        assert_eq!(s.forfeited, 5);
        assert_eq!(u["alice"].balance, 15);
    }

    #[test]
    fn test_dust_is_forfeited() {
        let mut u = users(&[("a", 0), ("b", 0), ("c", 0)]);
        let mut rec = record(
            "a",
            11,
            &[("b", VoteChoice::Believe), ("c", VoteChoice::Believe)],
        );

        let s = settle(&id(), &mut rec, &mut u).unwrap();
        assert_eq!(s.reward, 3);
        assert_eq!(s.distributed, 9);
        assert_eq!(s.forfeited, 2);
        let total: u64 = u.values().map(|a| a.balance).sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_second_settlement_is_noop() {
        let mut u = users(&[("alice", 15), ("bob", 15)]);
        let mut rec = record("alice", 10, &[("bob", VoteChoice::Believe)]);
        settle(&id(), &mut rec, &mut u).unwrap();

        assert!(settle(&id(), &mut rec, &mut u).is_none());
        assert_eq!(u["alice"].balance, 20);
        assert_eq!(rec.verdict, Verdict::ConfirmedReal);
    }

    #[test]
    fn test_author_self_vote_paid_once() {
        let mut u = users(&[("alice", 0), ("bob", 0)]);
        let mut rec = record(
            "alice",
            15,
            &[("alice", VoteChoice::Believe), ("bob", VoteChoice::Believe)],
        );

        let s = settle(&id(), &mut rec, &mut u).unwrap();
        assert_eq!(s.verdict, Verdict::ConfirmedReal);
        assert_eq!(s.winners, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(s.reward, 7);
        assert_eq!(s.forfeited, 1);
        assert_eq!(u["alice"].balance, 7);
        assert_eq!(u["bob"].balance, 7);
    }

    #[test]
    fn test_missing_winner_account_is_skipped() {
        let mut u = users(&[("bob", 0)]);
        let mut rec = record("ghost", 10, &[("bob", VoteChoice::Believe)]);

        let s = settle(&id(), &mut rec, &mut u).unwrap();
        assert_eq!(s.winners, vec!["bob".to_string()]);
        assert_eq!(u["bob"].balance, 5);
        assert_eq!(s.forfeited, 5);
    }
}
