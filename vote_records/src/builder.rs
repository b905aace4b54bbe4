use log::warn;

pub use crate::model::*;
use crate::party::PartyCanon;
use crate::{dedup_by_key, normalize_api_votes, normalize_sheet_votes};

/// A builder for assembling normalized vote records from both sources.
///
/// Records sharing a member and an issue are collapsed according to the
/// deduplication policy (by default, the first one added wins).
///
/// ```
/// pub use vote_records::builder::Builder;
/// pub use vote_records::{NormalizedVoteRecord, PartyCanon, Source, VoteOutcome};
/// # use vote_records::RecordErrors;
///
/// let mut builder = Builder::new(&PartyCanon::default())?;
///
/// let record = NormalizedVoteRecord {
///     member_or_mandate_id: "Doe, Jane".to_string(),
///     issue_id: "2020-09-10 Example".to_string(),
///     date: None,
///     title: "Example".to_string(),
///     party: "DIE LINKE".to_string(),
///     vote: VoteOutcome::Yes,
///     source: Source::Sheet,
/// };
/// builder.add_record(record.clone())?;
/// builder.add_record(NormalizedVoteRecord { vote: VoteOutcome::No, ..record })?;
///
/// let records = builder.build();
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].party, "DIE LINKE.");
/// # Ok::<(), RecordErrors>(())
/// ```
pub struct Builder {
    pub(crate) _canon: PartyCanon,
    pub(crate) _policy: DedupPolicy,
    pub(crate) _records: Vec<NormalizedVoteRecord>,
}

impl Builder {
    pub fn new(canon: &PartyCanon) -> Result<Builder, RecordErrors> {
        Ok(Builder {
            _canon: canon.clone(),
            _policy: DedupPolicy::KeepFirstByArrival,
            _records: Vec::new(),
        })
    }

    pub fn policy(self, policy: DedupPolicy) -> Builder {
        Builder {
            _policy: policy,
            ..self
        }
    }

    /// Adds the long rows of one or more sheets.
    pub fn add_sheet_votes(&mut self, votes: &[SheetVote]) -> Result<(), RecordErrors> {
        crate::check_sheet_votes(votes)?;
        let records = normalize_sheet_votes(votes, &self._canon);
        self._records.extend(records);
        Ok(())
    }

    /// Adds the votes of a legislature, joined with its polls and mandates.
    pub fn add_api_votes(
        &mut self,
        polls: &[Poll],
        mandates: &[Mandate],
        votes: &[Vote],
    ) -> Result<(), RecordErrors> {
        let records = normalize_api_votes(polls, mandates, votes, &self._canon);
        self._records.extend(records);
        Ok(())
    }

    /// Adds a single record. The party is canonicalized.
    pub fn add_record(&mut self, record: NormalizedVoteRecord) -> Result<(), RecordErrors> {
        let party = self._canon.canonicalize(&record.party);
        self._records.push(NormalizedVoteRecord { party, ..record });
        Ok(())
    }

    /// The records, deduplicated on (member, issue) and sorted.
    pub fn build(self) -> Vec<NormalizedVoteRecord> {
        let deduplicated = dedup_by_key(
            self._records,
            |r| (r.member_or_mandate_id.clone(), r.issue_id.clone()),
            self._policy,
        );
        if !deduplicated.dropped.is_empty() {
            warn!(
                "build: dropped {} records duplicating a (member, issue) pair",
                deduplicated.dropped.len()
            );
        }
        let mut records = deduplicated.kept;
        records.sort_by(|a, b| {
            (a.source, &a.issue_id, &a.member_or_mandate_id).cmp(&(
                b.source,
                &b.issue_id,
                &b.member_or_mandate_id,
            ))
        });
        records
    }
}
