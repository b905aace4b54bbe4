// ********* Outcome enumerations ***********

use std::error::Error;
use std::fmt::Display;

use chrono::NaiveDate;

/// The five outcome columns of a roll-call spreadsheet.
///
/// Exactly one of them is set for every member in a well-formed sheet.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum SheetOutcome {
    Yes,
    No,
    Abstain,
    Invalid,
    Absent,
}

impl SheetOutcome {
    /// All the outcomes, in the column order of the published sheets.
    pub const ALL: [SheetOutcome; 5] = [
        SheetOutcome::Yes,
        SheetOutcome::No,
        SheetOutcome::Abstain,
        SheetOutcome::Invalid,
        SheetOutcome::Absent,
    ];

    /// The header of the column carrying this outcome.
    pub fn column(&self) -> &'static str {
        match self {
            SheetOutcome::Yes => "ja",
            SheetOutcome::No => "nein",
            SheetOutcome::Abstain => "Enthaltung",
            SheetOutcome::Invalid => "ungültig",
            SheetOutcome::Absent => "nichtabgegeben",
        }
    }

    pub fn from_column(name: &str) -> Option<SheetOutcome> {
        SheetOutcome::ALL.into_iter().find(|o| o.column() == name)
    }
}

/// The outcome of one vote, as reported by the API.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum ApiOutcome {
    Yes,
    No,
    Abstain,
    NoShow,
}

impl ApiOutcome {
    pub fn parse(value: &str) -> Option<ApiOutcome> {
        match value {
            "yes" => Some(ApiOutcome::Yes),
            "no" => Some(ApiOutcome::No),
            "abstain" => Some(ApiOutcome::Abstain),
            "no_show" => Some(ApiOutcome::NoShow),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApiOutcome::Yes => "yes",
            ApiOutcome::No => "no",
            ApiOutcome::Abstain => "abstain",
            ApiOutcome::NoShow => "no_show",
        }
    }
}

/// The outcome vocabulary shared by both sources after normalization.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum VoteOutcome {
    Yes,
    No,
    Abstain,
    Invalid,
    Absent,
}

impl VoteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            VoteOutcome::Yes => "yes",
            VoteOutcome::No => "no",
            VoteOutcome::Abstain => "abstain",
            VoteOutcome::Invalid => "invalid",
            VoteOutcome::Absent => "absent",
        }
    }
}

impl From<SheetOutcome> for VoteOutcome {
    fn from(outcome: SheetOutcome) -> Self {
        match outcome {
            SheetOutcome::Yes => VoteOutcome::Yes,
            SheetOutcome::No => VoteOutcome::No,
            SheetOutcome::Abstain => VoteOutcome::Abstain,
            SheetOutcome::Invalid => VoteOutcome::Invalid,
            SheetOutcome::Absent => VoteOutcome::Absent,
        }
    }
}

impl From<ApiOutcome> for VoteOutcome {
    fn from(outcome: ApiOutcome) -> Self {
        match outcome {
            ApiOutcome::Yes => VoteOutcome::Yes,
            ApiOutcome::No => VoteOutcome::No,
            ApiOutcome::Abstain => VoteOutcome::Abstain,
            ApiOutcome::NoShow => VoteOutcome::Absent,
        }
    }
}

// ********* Spreadsheet track ***********

/// The outcome flags of one sheet row, as integers read from the cells.
///
/// Empty cells are read as 0.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct OutcomeFlags {
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub invalid: u32,
    pub absent: u32,
}

impl OutcomeFlags {
    pub fn one_hot(outcome: SheetOutcome) -> OutcomeFlags {
        let mut flags = OutcomeFlags::default();
        flags.set(outcome, 1);
        flags
    }

    pub fn get(&self, outcome: SheetOutcome) -> u32 {
        match outcome {
            SheetOutcome::Yes => self.yes,
            SheetOutcome::No => self.no,
            SheetOutcome::Abstain => self.abstain,
            SheetOutcome::Invalid => self.invalid,
            SheetOutcome::Absent => self.absent,
        }
    }

    pub fn set(&mut self, outcome: SheetOutcome, value: u32) {
        match outcome {
            SheetOutcome::Yes => self.yes = value,
            SheetOutcome::No => self.no = value,
            SheetOutcome::Abstain => self.abstain = value,
            SheetOutcome::Invalid => self.invalid = value,
            SheetOutcome::Absent => self.absent = value,
        }
    }

    pub fn sum(&self) -> u32 {
        SheetOutcome::ALL.iter().map(|o| self.get(*o)).sum()
    }
}

/// The member columns of a sheet row.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SheetMember {
    pub legislative_period: u32,
    pub session: u32,
    pub ballot: u32,
    pub faction: String,
    pub surname: String,
    pub first_name: String,
    /// Academic title, usually empty.
    pub honorific: String,
    pub display_name: String,
    pub remark: Option<String>,
}

/// One member in one sheet, in the wide layout: one flag per outcome.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SheetVoteRow {
    pub member: SheetMember,
    pub flags: OutcomeFlags,
    pub date: Option<NaiveDate>,
    pub title: String,
    pub sheet_name: String,
}

/// One member in one sheet, in the long layout: a single outcome.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SheetVote {
    pub member: SheetMember,
    pub vote: SheetOutcome,
    pub date: Option<NaiveDate>,
    pub title: String,
    pub sheet_name: String,
}

// ********* API track ***********

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Poll {
    pub poll_id: u64,
    pub title: String,
    /// Plain text, markup removed.
    pub description: String,
    pub first_committee: Option<String>,
    pub legislature_id: u64,
    pub legislature_period: String,
    pub date: Option<NaiveDate>,
}

/// One entry of the faction membership history of a mandate.
///
/// The dates are kept as published; they are parsed when the party is derived.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FractionMembership {
    pub label: String,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Mandate {
    pub mandate_id: u64,
    pub mandate_label: String,
    pub politician_id: u64,
    pub politician_name: String,
    pub politician_url: Option<String>,
    pub legislature_id: u64,
    pub legislature_period: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub constituency_id: Option<u64>,
    pub constituency_name: Option<String>,
    pub memberships: Vec<FractionMembership>,
    /// The party derived from the membership history.
    pub party: String,
    pub all_parties: Vec<String>,
    pub party_ambiguous: bool,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Vote {
    pub vote_id: u64,
    pub mandate_id: u64,
    pub mandate_label: String,
    pub poll_id: u64,
    pub vote: ApiOutcome,
    pub reason_no_show: Option<String>,
    pub reason_no_show_other: Option<String>,
}

// ******** Normalized output *********

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Source {
    Sheet,
    Api,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::Sheet => "sheet",
            Source::Api => "api",
        }
    }
}

/// One vote by one member on one issue, independent of where it came from.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NormalizedVoteRecord {
    /// The display name for sheet records, the mandate id for API records.
    pub member_or_mandate_id: String,
    /// The sheet date and title, or the poll id.
    pub issue_id: String,
    pub date: Option<NaiveDate>,
    pub title: String,
    pub party: String,
    pub vote: VoteOutcome,
    pub source: Source,
}

// ********* Pipeline stages **********

/// How far a unit of work has progressed. Stages only move forward.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum Stage {
    NotFetched,
    RawOnDisk,
    Parsed,
    Normalized,
}

/// Which occurrence survives when records share a key.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum DedupPolicy {
    KeepFirstByArrival,
    KeepLastByArrival,
}

/// Errors raised by the record rules.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RecordErrors {
    /// A sheet row does not have exactly one outcome flag set.
    OutcomeFlagSum { row: usize, sum: u32 },
    /// A party alias points to a name that is itself an alias.
    ChainedPartyAlias { alias: String, target: String },
    /// A record is missing a value that every record must carry.
    MissingValue { row: usize, column: &'static str },
}

impl Error for RecordErrors {}

impl Display for RecordErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordErrors::OutcomeFlagSum { row, sum } => write!(
                f,
                "row {}: expected exactly one outcome flag, found a sum of {}",
                row, sum
            ),
            RecordErrors::ChainedPartyAlias { alias, target } => write!(
                f,
                "party alias {:?} maps to {:?}, which is itself an alias",
                alias, target
            ),
            RecordErrors::MissingValue { row, column } => {
                write!(f, "row {}: missing value in column {}", row, column)
            }
        }
    }
}
