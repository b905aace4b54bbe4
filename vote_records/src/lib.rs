mod model;
pub mod builder;
pub mod dates;
pub mod party;

use log::{debug, info, warn};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

pub use crate::dates::{resolve_issue_heading, DateStrategy, IssueHeading};
pub use crate::model::*;
pub use crate::party::{derive_party, extract_party, PartyCanon, PartyDerivation, UNKNOWN_PARTY};

// ********* Work planning ***********

/// The units of work that are known upstream but not persisted yet.
///
/// Returns an empty set when everything is already on disk.
pub fn remaining_work<T: Ord + Clone>(known: &[T], persisted: &BTreeSet<T>) -> BTreeSet<T> {
    known
        .iter()
        .filter(|k| !persisted.contains(k))
        .cloned()
        .collect()
}

/// Decides if a stage producing `target` should run for a unit currently at `current`.
///
/// Completed stages are skipped unless forced.
pub fn needs_run(current: Stage, target: Stage, force: bool) -> bool {
    force || current < target
}

/// The result of a deduplication.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Deduplicated<T> {
    pub kept: Vec<T>,
    pub dropped: Vec<T>,
}

/// Removes the records sharing a key, keeping one per key according to the policy.
///
/// The kept records stay in arrival order.
pub fn dedup_by_key<T, K, F>(items: Vec<T>, key: F, policy: DedupPolicy) -> Deduplicated<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut winners: HashMap<K, usize> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        let k = key(item);
        match policy {
            DedupPolicy::KeepFirstByArrival => {
                winners.entry(k).or_insert(idx);
            }
            DedupPolicy::KeepLastByArrival => {
                winners.insert(k, idx);
            }
        }
    }
    let winning: HashSet<usize> = winners.into_values().collect();
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for (idx, item) in items.into_iter().enumerate() {
        if winning.contains(&idx) {
            kept.push(item);
        } else {
            dropped.push(item);
        }
    }
    Deduplicated { kept, dropped }
}

// ********* Sheet reshaping ***********

/// Checks that every row carries exactly one outcome flag, each being 0 or 1.
pub fn check_outcome_flags(rows: &[SheetVoteRow]) -> Result<(), RecordErrors> {
    for (row, r) in rows.iter().enumerate() {
        let sum = r.flags.sum();
        if sum != 1 {
            return Err(RecordErrors::OutcomeFlagSum { row, sum });
        }
    }
    Ok(())
}

/// Converts wide rows (one flag per outcome) to long rows (one outcome).
///
/// The flags are stacked, and only the set ones are kept: each row gives
/// exactly one long row, in the same order.
pub fn melt(rows: &[SheetVoteRow]) -> Result<Vec<SheetVote>, RecordErrors> {
    check_outcome_flags(rows)?;
    let stacked: Vec<(usize, SheetOutcome)> = rows
        .iter()
        .enumerate()
        .flat_map(|(idx, row)| {
            SheetOutcome::ALL
                .into_iter()
                .map(move |outcome| (idx, outcome, row.flags.get(outcome)))
        })
        .filter(|(_, _, flag)| *flag == 1)
        .map(|(idx, outcome, _)| (idx, outcome))
        .collect();
    debug!("melt: {} rows -> {} votes", rows.len(), stacked.len());
    Ok(stacked
        .into_iter()
        .map(|(idx, vote)| {
            let row = &rows[idx];
            SheetVote {
                member: row.member.clone(),
                vote,
                date: row.date,
                title: row.title.clone(),
                sheet_name: row.sheet_name.clone(),
            }
        })
        .collect())
}

/// The inverse of [`melt`].
pub fn unmelt(votes: &[SheetVote]) -> Vec<SheetVoteRow> {
    votes
        .iter()
        .map(|v| SheetVoteRow {
            member: v.member.clone(),
            flags: OutcomeFlags::one_hot(v.vote),
            date: v.date,
            title: v.title.clone(),
            sheet_name: v.sheet_name.clone(),
        })
        .collect()
}

/// Final check on long rows before they are written.
pub fn check_sheet_votes(votes: &[SheetVote]) -> Result<(), RecordErrors> {
    for (row, v) in votes.iter().enumerate() {
        if v.member.display_name.trim().is_empty() {
            return Err(RecordErrors::MissingValue {
                row,
                column: "Bezeichnung",
            });
        }
        if v.member.faction.trim().is_empty() {
            return Err(RecordErrors::MissingValue {
                row,
                column: "Fraktion/Gruppe",
            });
        }
    }
    Ok(())
}

// ********* Normalization ***********

/// Builds the issue identifier of a sheet: its date (or `unknown`) and its title.
pub fn sheet_issue_id(date: Option<chrono::NaiveDate>, title: &str) -> String {
    match date {
        Some(d) => format!("{} {}", d.format("%Y-%m-%d"), title),
        None => format!("unknown {}", title),
    }
}

/// Derives the politician name from a mandate label such as
/// `Jane Doe (Bundestag 2017 - 2021)`: the last four words describe the mandate.
pub fn politician_name_from_label(label: &str) -> String {
    let words: Vec<&str> = label.split_whitespace().collect();
    if words.len() <= 4 {
        return label.trim().to_string();
    }
    words[..words.len() - 4].join(" ")
}

pub fn normalize_sheet_votes(votes: &[SheetVote], canon: &PartyCanon) -> Vec<NormalizedVoteRecord> {
    votes
        .iter()
        .map(|v| NormalizedVoteRecord {
            member_or_mandate_id: v.member.display_name.clone(),
            issue_id: sheet_issue_id(v.date, &v.title),
            date: v.date,
            title: v.title.clone(),
            party: canon.canonicalize(&v.member.faction),
            vote: v.vote.into(),
            source: Source::Sheet,
        })
        .collect()
}

/// Joins votes with their poll and mandate.
///
/// A vote whose mandate is unknown gets the party [`UNKNOWN_PARTY`].
pub fn normalize_api_votes(
    polls: &[Poll],
    mandates: &[Mandate],
    votes: &[Vote],
    canon: &PartyCanon,
) -> Vec<NormalizedVoteRecord> {
    let polls_by_id: HashMap<u64, &Poll> = polls.iter().map(|p| (p.poll_id, p)).collect();
    let mandates_by_id: HashMap<u64, &Mandate> =
        mandates.iter().map(|m| (m.mandate_id, m)).collect();
    let mut missing_mandates = 0;
    let mut missing_polls = 0;
    let records: Vec<NormalizedVoteRecord> = votes
        .iter()
        .map(|v| {
            let poll = polls_by_id.get(&v.poll_id);
            if poll.is_none() {
                missing_polls += 1;
            }
            let party = match mandates_by_id.get(&v.mandate_id) {
                Some(m) => canon.canonicalize(&m.party),
                None => {
                    missing_mandates += 1;
                    UNKNOWN_PARTY.to_string()
                }
            };
            NormalizedVoteRecord {
                member_or_mandate_id: v.mandate_id.to_string(),
                issue_id: v.poll_id.to_string(),
                date: poll.and_then(|p| p.date),
                title: poll.map(|p| p.title.clone()).unwrap_or_default(),
                party,
                vote: v.vote.into(),
                source: Source::Api,
            }
        })
        .collect();
    if missing_mandates > 0 || missing_polls > 0 {
        warn!(
            "normalize_api_votes: {} votes without a known mandate, {} without a known poll",
            missing_mandates, missing_polls
        );
    }
    info!("normalize_api_votes: {} votes normalized", votes.len());
    records
}
