use crate::pipeline::*;

use calamine::{open_workbook, DataType, Range, Reader, Xls, Xlsx};
use std::collections::{BTreeMap, HashMap};
use vote_records::{
    check_outcome_flags, check_sheet_votes, melt, resolve_issue_heading, IssueHeading,
    OutcomeFlags, PartyCanon, SheetMember, SheetOutcome, SheetVote, SheetVoteRow,
};

/// The first worksheet of a workbook, with the names of all its worksheets.
#[derive(PartialEq, Debug, Clone)]
pub struct SheetGrid {
    pub sheet_names: Vec<String>,
    pub rows: Vec<Vec<DataType>>,
}

/// Reads workbooks from disk.
pub trait WorkbookLoader {
    fn load(&self, path: &Path) -> PipelineResult<SheetGrid>;
}

/// Reads `.xlsx` files, and `.xls` files in the legacy format.
pub struct CalamineLoader;

fn grid_from(sheet_names: Vec<String>, range: &Range<DataType>) -> SheetGrid {
    SheetGrid {
        sheet_names,
        rows: range.rows().map(|r| r.to_vec()).collect(),
    }
}

impl WorkbookLoader for CalamineLoader {
    fn load(&self, path: &Path) -> PipelineResult<SheetGrid> {
        let p = path.display().to_string();
        let legacy = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("xls"))
            .unwrap_or(false);
        if legacy {
            let mut workbook: Xls<_> =
                open_workbook(path).context(OpeningXlsSnafu { path: p.clone() })?;
            let sheet_names = workbook.sheet_names().to_vec();
            let range = workbook
                .worksheet_range_at(0)
                .context(EmptyExcelSnafu { path: p.clone() })?
                .context(OpeningXlsSnafu { path: p.clone() })?;
            Ok(grid_from(sheet_names, &range))
        } else {
            let mut workbook: Xlsx<_> =
                open_workbook(path).context(OpeningExcelSnafu { path: p.clone() })?;
            let sheet_names = workbook.sheet_names().to_vec();
            let range = workbook
                .worksheet_range_at(0)
                .context(EmptyExcelSnafu { path: p.clone() })?
                .context(OpeningExcelSnafu { path: p.clone() })?;
            Ok(grid_from(sheet_names, &range))
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub enum SheetParse {
    /// The file is empty (a failed download); nothing to read.
    Skipped,
    Parsed(Vec<SheetVote>),
}

const REQUIRED_COLUMNS: [&str; 7] = [
    "Wahlperiode",
    "Sitzungnr",
    "Abstimmnr",
    "Fraktion/Gruppe",
    "Name",
    "Vorname",
    "Bezeichnung",
];

pub fn get_col_index_mapping(
    req_col_names: &[String],
    header: &[Option<String>],
    path: &str,
) -> PipelineResult<Vec<(usize, String)>> {
    let col_names: HashMap<String, usize> = header
        .iter()
        .enumerate()
        .filter_map(|(idx, x)| x.as_ref().map(|s| (s.clone(), idx)))
        .collect();

    debug!("get_col_index_mapping: col_names: {:?}", col_names);

    let mut col_indexes: Vec<(usize, String)> = Vec::new();
    for cname in req_col_names {
        let idx = col_names.get(cname).context(MissingColumnSnafu {
            path,
            column: cname,
        })?;
        col_indexes.push((*idx, cname.clone()));
    }
    Ok(col_indexes)
}

struct Columns {
    period: usize,
    session: usize,
    ballot: usize,
    faction: usize,
    surname: usize,
    first_name: usize,
    display_name: usize,
    honorific: Option<usize>,
    remark: Option<usize>,
    outcomes: Vec<(usize, SheetOutcome)>,
}

impl Columns {
    fn from_header(header: &[DataType], path: &str) -> PipelineResult<Columns> {
        let names: Vec<Option<String>> = header
            .iter()
            .map(|dt| match dt {
                DataType::String(s) => Some(s.trim().to_string()),
                _ => None,
            })
            .collect();
        let mut required: Vec<String> = REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect();
        required.extend(SheetOutcome::ALL.iter().map(|o| o.column().to_string()));
        let mapping: HashMap<String, usize> = get_col_index_mapping(&required, &names, path)?
            .into_iter()
            .map(|(idx, name)| (name, idx))
            .collect();
        let optional = |name: &str| names.iter().position(|n| n.as_deref() == Some(name));
        let col = |name: &str| -> PipelineResult<usize> {
            mapping
                .get(name)
                .cloned()
                .context(MissingColumnSnafu { path, column: name })
        };
        let mut outcomes = Vec::new();
        for outcome in SheetOutcome::ALL {
            outcomes.push((col(outcome.column())?, outcome));
        }
        Ok(Columns {
            period: col("Wahlperiode")?,
            session: col("Sitzungnr")?,
            ballot: col("Abstimmnr")?,
            faction: col("Fraktion/Gruppe")?,
            surname: col("Name")?,
            first_name: col("Vorname")?,
            display_name: col("Bezeichnung")?,
            honorific: optional("Titel"),
            remark: optional("Bemerkung"),
            outcomes,
        })
    }
}

fn wrong_cell(path: &str, lineno: u64, column: &str, cell: &DataType) -> PipelineError {
    PipelineError::WrongCellType {
        path: path.to_string(),
        lineno,
        column: column.to_string(),
        content: format!("{:?}", cell),
    }
}

fn cell_number(cell: &DataType) -> Option<f64> {
    match cell {
        DataType::Int(i) => Some(*i as f64),
        DataType::Float(f) => Some(*f),
        DataType::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn cell_u32(cell: &DataType, path: &str, lineno: u64, column: &str) -> PipelineResult<u32> {
    match cell_number(cell) {
        Some(x) if x >= 0.0 && x.fract() == 0.0 && x <= u32::MAX as f64 => Ok(x as u32),
        _ => Err(wrong_cell(path, lineno, column, cell)),
    }
}

// Empty flag cells count as 0.
fn cell_flag(cell: &DataType, path: &str, lineno: u64, column: &str) -> PipelineResult<u32> {
    match cell {
        DataType::Empty => Ok(0),
        DataType::String(s) if s.trim().is_empty() => Ok(0),
        _ => cell_u32(cell, path, lineno, column),
    }
}

fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        DataType::Float(f) => f.to_string(),
        DataType::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

static EMPTY_CELL: DataType = DataType::Empty;

fn cell_at(row: &[DataType], idx: usize) -> &DataType {
    row.get(idx).unwrap_or(&EMPTY_CELL)
}

/// Reads the wide rows of a sheet, coercing every cell to its declared type.
pub fn read_sheet_rows(
    grid: &SheetGrid,
    heading: &IssueHeading,
    canon: &PartyCanon,
    path: &str,
) -> PipelineResult<Vec<SheetVoteRow>> {
    let mut iter = grid.rows.iter();
    let header = iter.next().context(EmptyExcelSnafu { path })?;
    let cols = Columns::from_header(header, path)?;
    let sheet_name = grid.sheet_names.first().cloned().unwrap_or_default();

    let mut res: Vec<SheetVoteRow> = Vec::new();
    for (idx, row) in iter.enumerate() {
        let lineno = (idx + 2) as u64;
        if row.iter().all(|c| matches!(c, DataType::Empty)) {
            debug!("read_sheet_rows: {}: blank line {}", path, lineno);
            continue;
        }
        let mut flags = OutcomeFlags::default();
        for (col_idx, outcome) in cols.outcomes.iter() {
            let value = cell_flag(cell_at(row, *col_idx), path, lineno, outcome.column())?;
            flags.set(*outcome, value);
        }
        let remark = cols
            .remark
            .map(|i| cell_text(cell_at(row, i)))
            .filter(|s| !s.is_empty());
        let member = SheetMember {
            legislative_period: cell_u32(cell_at(row, cols.period), path, lineno, "Wahlperiode")?,
            session: cell_u32(cell_at(row, cols.session), path, lineno, "Sitzungnr")?,
            ballot: cell_u32(cell_at(row, cols.ballot), path, lineno, "Abstimmnr")?,
            faction: canon.canonicalize(&cell_text(cell_at(row, cols.faction))),
            surname: cell_text(cell_at(row, cols.surname)),
            first_name: cell_text(cell_at(row, cols.first_name)),
            honorific: cols
                .honorific
                .map(|i| cell_text(cell_at(row, i)))
                .unwrap_or_default(),
            display_name: cell_text(cell_at(row, cols.display_name)),
            remark,
        };
        res.push(SheetVoteRow {
            member,
            flags,
            date: heading.date,
            title: heading.title.clone(),
            sheet_name: sheet_name.clone(),
        });
    }
    Ok(res)
}

/// Reads one downloaded sheet into long rows.
///
/// `file_titles` maps the sheet file names to the titles of their links,
/// which carry the date and title of the vote.
pub fn parse_sheet_file(
    path: &Path,
    file_titles: &BTreeMap<String, String>,
    canon: &PartyCanon,
    loader: &dyn WorkbookLoader,
) -> PipelineResult<SheetParse> {
    let p = path.display().to_string();
    if store::is_zero_sized(path)? {
        warn!("parse_sheet_file: {} is empty, skipping", p);
        return Ok(SheetParse::Skipped);
    }
    let file_name = simplify_file_name(path)?;
    let grid = loader.load(path)?;
    ensure!(
        grid.sheet_names.len() == 1,
        MultipleSheetsSnafu {
            path: p.clone(),
            count: grid.sheet_names.len()
        }
    );
    let full_title = file_titles
        .get(&file_name)
        .context(MissingTitleSnafu { path: p.clone() })?;
    let heading = resolve_issue_heading(full_title, &file_name);
    if heading.date.is_none() {
        warn!("parse_sheet_file: no date found for {}", file_name);
    }

    let rows = read_sheet_rows(&grid, &heading, canon, &p)?;
    check_outcome_flags(&rows).context(InvalidRecordsSnafu { path: p.clone() })?;
    let votes = melt(&rows).context(InvalidRecordsSnafu { path: p.clone() })?;
    check_sheet_votes(&votes).context(InvalidRecordsSnafu { path: p.clone() })?;
    debug!("parse_sheet_file: {} votes in {}", votes.len(), file_name);
    Ok(SheetParse::Parsed(votes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{sheet_grid, InMemoryLoader};
    use chrono::NaiveDate;
    use vote_records::RecordErrors;

    const FILE: &str = "20200910_1_xls-data.xlsx";

    fn titles() -> BTreeMap<String, String> {
        let mut titles = BTreeMap::new();
        titles.insert(FILE.to_string(), "10.09.2020: Example Vote".to_string());
        titles
    }

    fn on_disk(dir: &Path, content: &[u8]) -> PathBuf {
        let path = dir.join(FILE);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parse_three_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = on_disk(dir.path(), b"placeholder");
        let loader = InMemoryLoader::default().with(
            FILE,
            sheet_grid(&[
                ("A", "SPD", "ja"),
                ("B", "DIE LINKE", "nichtabgegeben"),
                ("C", "BÜNDNIS`90/DIE GRÜNEN", "Enthaltung"),
            ]),
        );
        let parsed = parse_sheet_file(&path, &titles(), &PartyCanon::default(), &loader).unwrap();
        let votes = match parsed {
            SheetParse::Parsed(v) => v,
            SheetParse::Skipped => panic!("not skipped"),
        };
        assert_eq!(votes.len(), 3);
        assert!(votes
            .iter()
            .all(|v| v.date == NaiveDate::from_ymd_opt(2020, 9, 10) && v.title == " Example Vote"));
        let outcomes: Vec<SheetOutcome> = votes.iter().map(|v| v.vote).collect();
        assert_eq!(
            outcomes,
            vec![SheetOutcome::Yes, SheetOutcome::Absent, SheetOutcome::Abstain]
        );
        assert_eq!(votes[1].member.faction, "DIE LINKE.");
        assert_eq!(votes[2].member.faction, "BÜ90/GR");
        assert_eq!(votes[0].member.legislative_period, 19);
        assert_eq!(votes[0].member.display_name, "A, Jo");
        assert_eq!(votes[0].sheet_name, "Tabelle1");
    }

    #[test]
    fn zero_byte_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = on_disk(dir.path(), b"");
        // The loader would fail: it must not be called.
        let loader = InMemoryLoader::default();
        let parsed = parse_sheet_file(&path, &titles(), &PartyCanon::default(), &loader).unwrap();
        assert_eq!(parsed, SheetParse::Skipped);
    }

    #[test]
    fn structural_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = on_disk(dir.path(), b"placeholder");

        let mut two_sheets = sheet_grid(&[("A", "SPD", "ja")]);
        two_sheets.sheet_names.push("Tabelle2".to_string());
        let loader = InMemoryLoader::default().with(FILE, two_sheets);
        let err = parse_sheet_file(&path, &titles(), &PartyCanon::default(), &loader).unwrap_err();
        assert!(matches!(err, PipelineError::MultipleSheets { count: 2, .. }));

        let mut double = sheet_grid(&[("A", "SPD", "ja")]);
        double.rows[1][8] = DataType::Float(1.0);
        let loader = InMemoryLoader::default().with(FILE, double);
        let err = parse_sheet_file(&path, &titles(), &PartyCanon::default(), &loader).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidRecords {
                source: RecordErrors::OutcomeFlagSum { row: 0, sum: 2 },
                ..
            }
        ));

        let mut missing = sheet_grid(&[("A", "SPD", "ja")]);
        missing.rows[0][0] = DataType::String("Periode".to_string());
        let loader = InMemoryLoader::default().with(FILE, missing);
        let err = parse_sheet_file(&path, &titles(), &PartyCanon::default(), &loader).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));

        let loader = InMemoryLoader::default().with(FILE, sheet_grid(&[("A", "SPD", "ja")]));
        let err = parse_sheet_file(&path, &BTreeMap::new(), &PartyCanon::default(), &loader)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingTitle { .. }));
    }

    #[test]
    fn cells_are_coerced() {
        let mut grid = sheet_grid(&[("A", "SPD", "ja")]);
        grid.rows[1][0] = DataType::String("19".to_string());
        grid.rows[1][8] = DataType::Empty;
        let heading = IssueHeading {
            date: None,
            title: "t".to_string(),
        };
        let rows = read_sheet_rows(&grid, &heading, &PartyCanon::default(), "x.xlsx").unwrap();
        assert_eq!(rows[0].member.legislative_period, 19);
        assert_eq!(rows[0].flags.no, 0);

        grid.rows[1][1] = DataType::String("n/a".to_string());
        let err = read_sheet_rows(&grid, &heading, &PartyCanon::default(), "x.xlsx").unwrap_err();
        assert!(matches!(err, PipelineError::WrongCellType { lineno: 2, .. }));
    }
}
