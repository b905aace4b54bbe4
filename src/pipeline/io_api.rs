use crate::pipeline::io_html::strip_html;
use crate::pipeline::store::{read_json, ArtifactStore, Listing};
use crate::pipeline::*;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vote_records::{
    dedup_by_key, derive_party, politician_name_from_label, ApiOutcome, DedupPolicy,
    FractionMembership, Mandate, Poll, Vote, UNKNOWN_PARTY,
};

// ********* Wire format ***********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResultMeta {
    pub count: u64,
    pub total: u64,
    pub range_start: u64,
    pub range_end: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ListingMeta {
    pub result: ResultMeta,
}

/// One page of a paginated listing.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ListingPage<T> {
    pub meta: ListingMeta,
    pub data: Vec<T>,
}

/// Only the paging information of a listing page.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PageHeader {
    pub meta: ListingMeta,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    pub id: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawLabelled {
    pub id: u64,
    pub label: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawPoll {
    pub id: u64,
    pub label: String,
    pub field_legislature: RawLabelled,
    pub field_committees: Option<Vec<RawLabelled>>,
    pub field_intro: String,
    pub field_poll_date: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawPolitician {
    pub id: u64,
    pub label: String,
    pub abgeordnetenwatch_url: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawElectoralData {
    pub constituency: Option<RawLabelled>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawFractionMembership {
    pub id: u64,
    pub label: String,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawMandate {
    pub id: u64,
    pub label: String,
    pub parliament_period: RawLabelled,
    pub politician: RawPolitician,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub electoral_data: Option<RawElectoralData>,
    pub fraction_membership: Option<Vec<RawFractionMembership>>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawFraction {
    pub id: Option<u64>,
    pub label: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawVote {
    pub id: Option<u64>,
    pub mandate: RawLabelled,
    pub poll: RawEntity,
    pub vote: String,
    pub reason_no_show: Option<String>,
    pub reason_no_show_other: Option<String>,
    /// An object or null. An empty list is rejected: see the fix command.
    pub fraction: Option<RawFraction>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawRelatedVotes {
    pub votes: Vec<RawVote>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawPollVotes {
    pub id: u64,
    pub label: String,
    pub field_legislature: Option<RawLabelled>,
    pub related_data: RawRelatedVotes,
}

// ********* Conversions ***********

fn parse_api_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

pub fn poll_from_raw(raw: &RawPoll) -> Poll {
    let date = parse_api_date(&raw.field_poll_date);
    if date.is_none() {
        warn!(
            "poll_from_raw: poll {} has an unreadable date {:?}",
            raw.id, raw.field_poll_date
        );
    }
    Poll {
        poll_id: raw.id,
        title: raw.label.clone(),
        description: strip_html(&raw.field_intro),
        first_committee: raw
            .field_committees
            .as_ref()
            .and_then(|c| c.first())
            .map(|c| c.label.clone()),
        legislature_id: raw.field_legislature.id,
        legislature_period: raw.field_legislature.label.clone(),
        date,
    }
}

pub fn mandate_from_raw(raw: &RawMandate) -> Mandate {
    let memberships: Vec<FractionMembership> = raw
        .fraction_membership
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|m| FractionMembership {
            label: m.label.clone(),
            valid_from: m.valid_from.clone(),
            valid_until: m.valid_until.clone(),
        })
        .collect();
    let derivation = derive_party(&memberships);
    if derivation.ambiguous {
        debug!(
            "mandate_from_raw: ambiguous party history for mandate {}: {:?}",
            raw.id, derivation.all_parties
        );
    }
    let constituency = raw.electoral_data.as_ref().and_then(|e| e.constituency.as_ref());
    Mandate {
        mandate_id: raw.id,
        mandate_label: raw.label.clone(),
        politician_id: raw.politician.id,
        politician_name: politician_name_from_label(&raw.label),
        politician_url: raw.politician.abgeordnetenwatch_url.clone(),
        legislature_id: raw.parliament_period.id,
        legislature_period: raw.parliament_period.label.clone(),
        start_date: raw.start_date.clone(),
        end_date: raw.end_date.clone(),
        constituency_id: constituency.map(|c| c.id),
        constituency_name: constituency.map(|c| c.label.clone()),
        memberships,
        party: derivation.party,
        all_parties: derivation.all_parties,
        party_ambiguous: derivation.ambiguous,
    }
}

// ********* Readers ***********

/// Reads every stored page of a listing. Entities repeated across pages
/// are kept once.
fn read_listing<T, F>(
    store: &ArtifactStore,
    listing: Listing,
    legislature_id: u64,
    id_of: F,
) -> PipelineResult<Vec<T>>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&T) -> u64,
{
    let mut items: Vec<T> = Vec::new();
    let pages = store.listing_pages(listing, legislature_id)?;
    if pages.is_empty() {
        whatever!(
            "no {} pages stored for legislature {}; run the download first",
            listing.name(),
            legislature_id
        );
    }
    for path in pages.iter() {
        let page: ListingPage<T> = read_json(path)?;
        items.extend(page.data);
    }
    let deduplicated = dedup_by_key(items, id_of, DedupPolicy::KeepFirstByArrival);
    if !deduplicated.dropped.is_empty() {
        warn!(
            "read_listing: {} {} repeated across pages",
            deduplicated.dropped.len(),
            listing.name()
        );
    }
    Ok(deduplicated.kept)
}

pub fn load_polls(store: &ArtifactStore, legislature_id: u64) -> PipelineResult<Vec<Poll>> {
    let raw: Vec<RawPoll> = read_listing(store, Listing::Polls, legislature_id, |p: &RawPoll| p.id)?;
    let polls: Vec<Poll> = raw.iter().map(poll_from_raw).collect();
    info!("load_polls: {} polls for legislature {}", polls.len(), legislature_id);
    Ok(polls)
}

/// The poll ids listed in the stored poll pages, in page order.
pub fn known_poll_ids(store: &ArtifactStore, legislature_id: u64) -> PipelineResult<Vec<u64>> {
    let mut ids = Vec::new();
    for path in store.listing_pages(Listing::Polls, legislature_id)?.iter() {
        let page: ListingPage<RawEntity> = read_json(path)?;
        ids.extend(page.data.iter().map(|p| p.id));
    }
    Ok(ids)
}

pub fn load_mandates(store: &ArtifactStore, legislature_id: u64) -> PipelineResult<Vec<Mandate>> {
    let raw: Vec<RawMandate> =
        read_listing(store, Listing::Mandates, legislature_id, |m: &RawMandate| m.id)?;
    let mandates: Vec<Mandate> = raw.iter().map(mandate_from_raw).collect();
    let unknown = mandates.iter().filter(|m| m.party == UNKNOWN_PARTY).count();
    let ambiguous = mandates.iter().filter(|m| m.party_ambiguous).count();
    info!(
        "load_mandates: {} mandates for legislature {} ({} without party, {} ambiguous)",
        mandates.len(),
        legislature_id,
        unknown,
        ambiguous
    );
    if !mandates.is_empty() && unknown * 2 > mandates.len() {
        warn!(
            "load_mandates: most mandates of legislature {} have no faction membership; \
             the raw data may be damaged (see `rollcall fix {}`)",
            legislature_id, legislature_id
        );
    }
    Ok(mandates)
}

/// Reads the votes of one poll.
///
/// Votes without an id are dropped. Duplicated mandates are resolved by
/// the policy.
pub fn load_poll_votes(path: &Path, policy: DedupPolicy) -> PipelineResult<Vec<Vote>> {
    let p = path.display().to_string();
    let envelope: Envelope<RawPollVotes> = read_json(path)?;
    let poll_id = envelope.data.id;
    let mut votes: Vec<Vote> = Vec::new();
    let mut without_id = 0;
    for raw in envelope.data.related_data.votes.iter() {
        let vote_id = match raw.id {
            Some(id) => id,
            None => {
                without_id += 1;
                continue;
            }
        };
        let outcome = ApiOutcome::parse(&raw.vote).context(UnknownVoteSnafu {
            path: p.clone(),
            value: raw.vote.clone(),
        })?;
        if raw.poll.id != poll_id {
            warn!(
                "load_poll_votes: vote {} in {} belongs to poll {}",
                vote_id, p, raw.poll.id
            );
        }
        votes.push(Vote {
            vote_id,
            mandate_id: raw.mandate.id,
            mandate_label: raw.mandate.label.clone(),
            poll_id,
            vote: outcome,
            reason_no_show: raw.reason_no_show.clone(),
            reason_no_show_other: raw.reason_no_show_other.clone(),
        });
    }
    if without_id > 0 {
        warn!("load_poll_votes: dropped {} votes without id in {}", without_id, p);
    }
    let deduplicated = dedup_by_key(votes, |v| v.mandate_id, policy);
    if !deduplicated.dropped.is_empty() {
        warn!(
            "load_poll_votes: dropped {} duplicated mandates in {}: {:?}",
            deduplicated.dropped.len(),
            p,
            deduplicated
                .dropped
                .iter()
                .map(|v| v.mandate_id)
                .collect::<Vec<_>>()
        );
    }
    Ok(deduplicated.kept)
}

/// The votes of a legislature, with the polls they were read from.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct CompiledVotes {
    pub votes: Vec<Vote>,
    /// The polls whose vote file was read successfully.
    pub polls: BTreeSet<u64>,
    pub report: BatchReport,
}

/// Reads the votes of every stored poll. A poll that cannot be read is
/// reported and the others are still read.
pub fn compile_votes(
    store: &ArtifactStore,
    legislature_id: u64,
    policy: DedupPolicy,
) -> PipelineResult<CompiledVotes> {
    let mut report = BatchReport::default();
    let mut all_votes: Vec<Vote> = Vec::new();
    let mut polls = BTreeSet::new();
    for poll_id in store.persisted_poll_ids(legislature_id)? {
        let path = store.votes_file(legislature_id, poll_id);
        match load_poll_votes(&path, policy) {
            Ok(votes) => {
                all_votes.extend(votes);
                polls.insert(poll_id);
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("compile_votes: skipping poll {}: {}", poll_id, e);
                report.fail(format!("poll {}: {}", poll_id, e));
            }
        }
    }
    info!(
        "compile_votes: {} votes from {} polls of legislature {}",
        all_votes.len(),
        report.succeeded,
        legislature_id
    );
    Ok(CompiledVotes {
        votes: all_votes,
        polls,
        report,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::store::write_atomic;
    use crate::pipeline::test_support::store_in;
    use serde_json::json;

    pub(crate) fn poll_page(ids: &[u64], total: u64, start: u64) -> serde_json::Value {
        let data: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "entity_type": "node",
                    "label": format!("Poll {}", id),
                    "field_legislature": {"id": 111, "label": "Bundestag 2017 - 2021"},
                    "field_committees": [{"id": 3, "label": "Ausschuss für Arbeit"}],
                    "field_intro": "<p>Der Bundestag <b>stimmt</b> ab.</p>",
                    "field_poll_date": "2019-03-01"
                })
            })
            .collect();
        json!({
            "meta": {"result": {"count": ids.len(), "total": total,
                                "range_start": start, "range_end": start + ids.len() as u64}},
            "data": data
        })
    }

    pub(crate) fn votes_file(poll_id: u64, votes: serde_json::Value) -> serde_json::Value {
        json!({
            "meta": {"status": "ok"},
            "data": {
                "id": poll_id,
                "label": "Poll",
                "field_legislature": {"id": 111, "label": "Bundestag 2017 - 2021"},
                "related_data": {"votes": votes}
            }
        })
    }

    pub(crate) fn vote(id: Option<u64>, mandate_id: u64, poll_id: u64, vote: &str) -> serde_json::Value {
        json!({
            "id": id,
            "mandate": {"id": mandate_id, "label": format!("Jane Doe {} (Bundestag 2017 - 2021)", mandate_id)},
            "poll": {"id": poll_id},
            "vote": vote,
            "reason_no_show": null,
            "reason_no_show_other": null,
            "fraction": {"id": 9, "label": "SPD"}
        })
    }

    fn write_json(path: &Path, value: &serde_json::Value) {
        write_atomic(path, serde_json::to_string(value).unwrap().as_bytes()).unwrap();
    }

    #[test]
    fn duplicated_mandates_keep_the_first_vote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poll_1_votes.json");
        let votes = json!([
            vote(Some(1), 42, 1, "yes"),
            vote(Some(2), 42, 1, "no"),
            vote(Some(3), 43, 1, "no_show"),
            vote(None, 44, 1, "abstain"),
        ]);
        write_json(&path, &votes_file(1, votes));

        let loaded = load_poll_votes(&path, DedupPolicy::KeepFirstByArrival).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].mandate_id, 42);
        assert_eq!(loaded[0].vote, ApiOutcome::Yes);
        assert_eq!(loaded[1].vote, ApiOutcome::NoShow);

        let loaded = load_poll_votes(&path, DedupPolicy::KeepLastByArrival).unwrap();
        assert_eq!(loaded[0].vote, ApiOutcome::No);
    }

    #[test]
    fn empty_fraction_lists_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poll_1_votes.json");
        let mut bad = vote(Some(1), 42, 1, "yes");
        bad["fraction"] = json!([]);
        write_json(&path, &votes_file(1, json!([bad])));
        assert!(matches!(
            load_poll_votes(&path, DedupPolicy::KeepFirstByArrival),
            Err(PipelineError::ParsingJson { .. })
        ));

        let mut null_fraction = vote(Some(1), 42, 1, "yes");
        null_fraction["fraction"] = serde_json::Value::Null;
        write_json(&path, &votes_file(1, json!([null_fraction])));
        assert_eq!(
            load_poll_votes(&path, DedupPolicy::KeepFirstByArrival)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn partial_fractions_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poll_1_votes.json");
        let mut partial = vote(Some(1), 42, 1, "yes");
        partial["fraction"] = json!({"id": null, "label": "SPD"});
        let mut unlabelled = vote(Some(2), 43, 1, "no");
        unlabelled["fraction"] = json!({"id": 9});
        write_json(
            &path,
            &votes_file(1, json!([partial, unlabelled, vote(Some(3), 44, 1, "abstain")])),
        );
        let loaded = load_poll_votes(&path, DedupPolicy::KeepFirstByArrival).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].mandate_id, 42);
    }

    #[test]
    fn polls_and_mandates_from_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_json(
            &store.listing_page_file(Listing::Polls, 111, 0),
            &poll_page(&[1, 2], 3, 0),
        );
        write_json(
            &store.listing_page_file(Listing::Polls, 111, 1),
            &poll_page(&[2, 3], 3, 2),
        );
        let polls = load_polls(&store, 111).unwrap();
        assert_eq!(polls.iter().map(|p| p.poll_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(polls[0].description, "Der Bundestag stimmt ab.");
        assert_eq!(polls[0].first_committee.as_deref(), Some("Ausschuss für Arbeit"));
        assert_eq!(polls[0].date, NaiveDate::from_ymd_opt(2019, 3, 1));
        assert_eq!(known_poll_ids(&store, 111).unwrap(), vec![1, 2, 2, 3]);

        let mandates = json!({
            "meta": {"result": {"count": 2, "total": 2, "range_start": 0, "range_end": 2}},
            "data": [
                {
                    "id": 5, "label": "Jane Doe (Bundestag 2017 - 2021)",
                    "parliament_period": {"id": 111, "label": "Bundestag 2017 - 2021"},
                    "politician": {"id": 50, "label": "Jane Doe", "abgeordnetenwatch_url": null},
                    "start_date": null, "end_date": null,
                    "electoral_data": {"constituency": {"id": 7, "label": "Berlin-Mitte"}},
                    "fraction_membership": [
                        {"id": 1, "label": "SPD seit 24.10.2017", "valid_from": "2017-10-24", "valid_until": null}
                    ]
                },
                {
                    "id": 6, "label": "John Roe (Bundestag 2017 - 2021)",
                    "parliament_period": {"id": 111, "label": "Bundestag 2017 - 2021"},
                    "politician": {"id": 60, "label": "John Roe", "abgeordnetenwatch_url": null},
                    "start_date": null, "end_date": null,
                    "electoral_data": null,
                    "fraction_membership": []
                }
            ]
        });
        write_json(&store.listing_page_file(Listing::Mandates, 111, 0), &mandates);
        let mandates = load_mandates(&store, 111).unwrap();
        assert_eq!(mandates[0].party, "SPD");
        assert_eq!(mandates[0].politician_name, "Jane Doe");
        assert_eq!(mandates[0].constituency_name.as_deref(), Some("Berlin-Mitte"));
        assert_eq!(mandates[1].party, UNKNOWN_PARTY);

        assert!(load_polls(&store, 222).is_err());
    }

    #[test]
    fn compile_isolates_unreadable_polls() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        write_json(
            &store.votes_file(111, 1),
            &votes_file(1, json!([vote(Some(1), 42, 1, "yes")])),
        );
        write_json(
            &store.votes_file(111, 2),
            &votes_file(2, json!([vote(Some(2), 42, 2, "maybe")])),
        );
        let compiled = compile_votes(&store, 111, DedupPolicy::KeepFirstByArrival).unwrap();
        assert_eq!(compiled.votes.len(), 1);
        assert_eq!(compiled.report.succeeded, 1);
        assert_eq!(compiled.report.failures.len(), 1);
        assert_eq!(compiled.polls.len(), 1);
    }
}
