use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{FractionMembership, RecordErrors};

/// The party reported when a mandate has no usable membership history.
pub const UNKNOWN_PARTY: &str = "unknown";

static RE_SINCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.+)\sseit").unwrap());

const DEFAULT_ALIASES: [(&str, &str); 6] = [
    ("BÜNDNIS`90/DIE GRÜNEN", "BÜ90/GR"),
    ("BÜNDNIS 90/DIE GRÜNEN", "BÜ90/GR"),
    ("Bündnis 90/Die Grünen", "BÜ90/GR"),
    ("DIE LINKE", "DIE LINKE."),
    ("fraktionslos", "Fraktionslos"),
    ("fraktionslose", "Fraktionslos"),
];

/// Maps the many spellings of a party or faction to one canonical label.
///
/// Aliases never point to another alias, so applying the map twice gives
/// the same result as applying it once.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PartyCanon {
    aliases: BTreeMap<String, String>,
}

impl Default for PartyCanon {
    fn default() -> Self {
        PartyCanon {
            aliases: DEFAULT_ALIASES
                .iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
                .collect(),
        }
    }
}

impl PartyCanon {
    /// The default aliases, extended (or overridden) by the given ones.
    pub fn with_aliases(extra: &BTreeMap<String, String>) -> Result<PartyCanon, RecordErrors> {
        let mut aliases = PartyCanon::default().aliases;
        for (alias, canonical) in extra.iter() {
            aliases.insert(alias.clone(), canonical.clone());
        }
        // An alias mapping to itself is harmless.
        aliases.retain(|alias, canonical| alias != canonical);
        for (alias, canonical) in aliases.iter() {
            if aliases.contains_key(canonical) {
                return Err(RecordErrors::ChainedPartyAlias {
                    alias: alias.clone(),
                    target: canonical.clone(),
                });
            }
        }
        debug!("with_aliases: {} aliases", aliases.len());
        Ok(PartyCanon { aliases })
    }

    /// The canonical label. Unknown labels pass through unchanged.
    pub fn canonicalize(&self, label: &str) -> String {
        match self.aliases.get(label) {
            Some(canonical) => canonical.clone(),
            None => label.to_string(),
        }
    }
}

/// Extracts the party from a membership label such as `SPD seit 24.10.2017`.
///
/// Labels without the `seit` suffix are returned trimmed. Returns `None` when
/// the suffix is there but nothing precedes it.
pub fn extract_party(label: &str) -> Option<String> {
    if !label.contains("seit") {
        let trimmed = label.trim();
        return if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
    RE_SINCE
        .captures(label)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_membership_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// The party derived from a membership history.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PartyDerivation {
    pub party: String,
    /// Every party in the history, in published order.
    pub all_parties: Vec<String>,
    /// Set when the history does not single out one party with certainty.
    pub ambiguous: bool,
}

struct DatedMembership {
    party: String,
    from: Option<NaiveDate>,
    until: Option<NaiveDate>,
    dates_ok: bool,
}

/// Picks the party from a membership history.
///
/// The membership with the latest start date wins. Memberships without a
/// start date rank below any dated one, and ties go to the later entry in
/// the list. An empty history gives [`UNKNOWN_PARTY`].
pub fn derive_party(memberships: &[FractionMembership]) -> PartyDerivation {
    if memberships.is_empty() {
        return PartyDerivation {
            party: UNKNOWN_PARTY.to_string(),
            all_parties: Vec::new(),
            ambiguous: false,
        };
    }

    let mut ambiguous = false;
    let mut dated: Vec<DatedMembership> = Vec::new();
    for membership in memberships.iter() {
        let party = match extract_party(&membership.label) {
            Some(p) => p,
            None => {
                warn!(
                    "derive_party: could not extract a party from label {:?}",
                    membership.label
                );
                ambiguous = true;
                membership.label.trim().to_string()
            }
        };
        let from = membership
            .valid_from
            .as_deref()
            .and_then(parse_membership_date);
        let until = membership
            .valid_until
            .as_deref()
            .and_then(parse_membership_date);
        let dates_ok = from.is_some()
            && (membership.valid_until.is_none() || until.is_some());
        dated.push(DatedMembership {
            party,
            from,
            until,
            dates_ok,
        });
    }

    if dated.len() > 1 {
        if dated.iter().any(|m| !m.dates_ok) {
            ambiguous = true;
        }
        if has_overlap(&dated) {
            ambiguous = true;
        }
    }

    // (start date, position): None sorts first and the later position wins ties.
    let chosen = dated
        .iter()
        .enumerate()
        .max_by_key(|(idx, m)| (m.from, *idx))
        .map(|(_, m)| m.party.clone())
        .unwrap_or_else(|| UNKNOWN_PARTY.to_string());

    PartyDerivation {
        party: chosen,
        all_parties: dated.into_iter().map(|m| m.party).collect(),
        ambiguous,
    }
}

fn has_overlap(memberships: &[DatedMembership]) -> bool {
    let mut intervals: Vec<(NaiveDate, Option<NaiveDate>)> = memberships
        .iter()
        .filter_map(|m| m.from.map(|from| (from, m.until)))
        .collect();
    intervals.sort();
    intervals.windows(2).any(|pair| match pair[0].1 {
        None => true,
        Some(until) => until > pair[1].0,
    })
}
