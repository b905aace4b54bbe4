use chrono::NaiveDate;
use log::debug;

// Two-digit years first: %Y would also accept "20" as the year 20.
const TITLE_DATE_FORMATS: [&str; 5] = ["%d.%m.%y", "%d.%m.%Y", "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"];
const FILE_DATE_FORMATS: [&str; 2] = ["%Y%m%d", "%Y-%m-%d"];

/// The date and title of the issue a sheet votes on.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct IssueHeading {
    pub date: Option<NaiveDate>,
    pub title: String,
}

/// The ways a date can be recovered for a sheet, tried in order.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum DateStrategy {
    /// `10.09.2020: Some title`: a day-first date before the first colon.
    TitlePrefix,
    /// `20201126_3_xls-data.xlsx`: a compact date before the first underscore.
    FileNamePrefix,
}

impl DateStrategy {
    pub const ORDERED: [DateStrategy; 2] = [DateStrategy::TitlePrefix, DateStrategy::FileNamePrefix];

    pub fn attempt(&self, full_title: &str, file_name: &str) -> Option<IssueHeading> {
        match self {
            DateStrategy::TitlePrefix => {
                let (prefix, rest) = full_title.split_once(':')?;
                let date = parse_with(prefix, &TITLE_DATE_FORMATS)?;
                Some(IssueHeading {
                    date: Some(date),
                    title: rest.to_string(),
                })
            }
            DateStrategy::FileNamePrefix => {
                let prefix = file_name.split('_').next()?;
                let date = parse_with(prefix, &FILE_DATE_FORMATS)?;
                Some(IssueHeading {
                    date: Some(date),
                    title: full_title.to_string(),
                })
            }
        }
    }
}

fn parse_with(value: &str, formats: &[&str]) -> Option<NaiveDate> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Resolves the date and title of a sheet from its link title and file name.
///
/// When no strategy finds a date, the date is unknown and the title is kept whole.
pub fn resolve_issue_heading(full_title: &str, file_name: &str) -> IssueHeading {
    for strategy in DateStrategy::ORDERED.iter() {
        if let Some(heading) = strategy.attempt(full_title, file_name) {
            return heading;
        }
        debug!(
            "resolve_issue_heading: strategy {:?} found no date in {:?} / {:?}",
            strategy, full_title, file_name
        );
    }
    IssueHeading {
        date: None,
        title: full_title.to_string(),
    }
}
