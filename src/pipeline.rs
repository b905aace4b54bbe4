use log::{debug, error, info, warn};

use snafu::{prelude::*, Snafu};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use vote_records::builder::Builder;
use vote_records::{needs_run, remaining_work, DedupPolicy, RecordErrors, SheetVote, Stage};

use crate::args::{Args, Command, EntityArg, SourceArg};
use crate::pipeline::api_fetch::{ApiSettings, Paginator};
use crate::pipeline::config_reader::{read_config, validate_config, Overrides, Settings};
use crate::pipeline::io_common::*;
use crate::pipeline::io_http::{HttpTransport, Pacer, Transport};
use crate::pipeline::io_sheets::{CalamineLoader, SheetParse, WorkbookLoader};
use crate::pipeline::store::{
    read_json, read_manifest, write_atomic, write_json, ArtifactStore, Listing,
};

pub mod api_fetch;
pub mod config_reader;
pub mod fix;
pub mod io_api;
pub mod io_common;
pub mod io_html;
pub mod io_http;
pub mod io_parquet;
pub mod io_sheets;
pub mod sheet_download;
pub mod store;
#[cfg(test)]
pub mod test_support;

#[derive(Debug, Snafu)]
pub enum PipelineError {
    #[snafu(display("Error reading {path}"))]
    ReadingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Path {path} has no file name"))]
    MissingFileName { path: String },
    #[snafu(display("Error opening workbook {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Error opening legacy workbook {path}"))]
    OpeningXls {
        source: calamine::XlsError,
        path: String,
    },
    #[snafu(display("Workbook {path} has no worksheet"))]
    EmptyExcel { path: String },
    #[snafu(display("Workbook {path} has {count} worksheets, expected exactly one"))]
    MultipleSheets { path: String, count: usize },
    #[snafu(display("{path}: cannot find column {column} in the header"))]
    MissingColumn { path: String, column: String },
    #[snafu(display("{path}, line {lineno}: unexpected content {content} in column {column}"))]
    WrongCellType {
        path: String,
        lineno: u64,
        column: String,
        content: String,
    },
    #[snafu(display("{path}: no link title is known for this sheet"))]
    MissingTitle { path: String },
    #[snafu(display("{path}: {source}"))]
    InvalidRecords {
        source: RecordErrors,
        path: String,
    },
    #[snafu(display("Invalid party aliases: {source}"))]
    PartyAliases { source: RecordErrors },
    #[snafu(display("Error parsing JSON from {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing JSON"))]
    WritingJson { source: serde_json::Error },
    #[snafu(display("{path}: unknown vote value {value:?}"))]
    UnknownVote { path: String, value: String },
    #[snafu(display("Invalid URL {url}"))]
    InvalidUrl {
        source: url::ParseError,
        url: String,
    },
    #[snafu(display("Request to {url} failed"))]
    Http {
        source: reqwest::Error,
        url: String,
    },
    #[snafu(display("Request to {url} returned status {status}"))]
    HttpStatus { url: String, status: u16 },
    #[snafu(display("Invalid selector {selector}"))]
    Selector { selector: String },
    #[snafu(display("Error building the table for {path}"))]
    Arrow {
        source: arrow::error::ArrowError,
        path: String,
    },
    #[snafu(display("Error writing parquet file {path}"))]
    Parquet {
        source: parquet::errors::ParquetError,
        path: String,
    },
    #[snafu(display("Error writing csv file {path}"))]
    Csv { source: csv::Error, path: String },
    #[snafu(display(
        "{count} vote files of legislature {legislature_id} contain empty fraction lists; \
         run `fix {legislature_id}` first"
    ))]
    CorruptedFractions { legislature_id: u64, count: usize },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// The outcome of a batch: one unit failing does not stop the others.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl BatchReport {
    pub fn fail(&mut self, reason: String) {
        self.failures.push(reason);
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} done, {} skipped, {} failed",
            self.succeeded,
            self.skipped,
            self.failures.len()
        )
    }
}

/// Sheet file name to the legislative periods it holds.
type SheetManifest = BTreeMap<String, BTreeSet<u32>>;

/// Runs the stages of both tracks against one store.
pub struct Pipeline<'a> {
    settings: Settings,
    store: ArtifactStore,
    transport: &'a dyn Transport,
    loader: &'a dyn WorkbookLoader,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: Settings,
        transport: &'a dyn Transport,
        loader: &'a dyn WorkbookLoader,
    ) -> Pipeline<'a> {
        let store = ArtifactStore::new(&settings);
        Pipeline {
            settings,
            store,
            transport,
            loader,
        }
    }

    // ********* Spreadsheet track ***********

    /// The sheet links, harvested again when listing pages are present.
    fn sheet_links(&self, persist: bool) -> PipelineResult<BTreeMap<String, String>> {
        let pages = matching_files(&self.store.listing_dir(), &RE_HTM)?;
        let links_file = self.store.sheet_links_file();
        if pages.is_empty() {
            if links_file.exists() {
                debug!("sheet_links: no listing pages, reading {}", links_file.display());
                return read_json(&links_file);
            }
            warn!(
                "sheet_links: no listing pages in {}",
                self.store.listing_dir().display()
            );
            return Ok(BTreeMap::new());
        }
        let report = io_html::harvest_listing_pages(&pages)?;
        for e in report.entry_errors.iter() {
            warn!("sheet_links: {}", e);
        }
        if persist {
            write_json(&links_file, &report.links)?;
        }
        Ok(report.links)
    }

    /// The persisted links, or a fresh harvest when none were persisted yet.
    fn stored_sheet_links(&self) -> PipelineResult<BTreeMap<String, String>> {
        let links_file = self.store.sheet_links_file();
        if links_file.exists() {
            read_json(&links_file)
        } else {
            self.sheet_links(false)
        }
    }

    pub fn download_sheets(&self, dry_run: bool, force: bool) -> PipelineResult<BatchReport> {
        let links = self.sheet_links(!dry_run)?;
        info!("download_sheets: {} sheet links", links.len());
        let settings = sheet_download::SheetDownloadSettings {
            base_url: self.settings.sheet_base_url.clone(),
            max_downloads: self.settings.max_downloads,
            force,
            dry_run,
        };
        let mut pacer = Pacer::new(self.settings.sheet_delay, self.settings.jitter);
        sheet_download::download_sheets(
            &links,
            &self.store.sheet_dir(),
            &settings,
            self.transport,
            &mut pacer,
        )
    }

    /// Parses the downloaded sheets and writes one set of tables per
    /// legislative period (or only the requested one).
    ///
    /// A period is written again when the sheets it is made of changed: a
    /// sheet that failed, or was downloaded after the last run, is picked up
    /// by the next run.
    pub fn transform_sheets(&self, period: Option<u32>, force: bool) -> PipelineResult<BatchReport> {
        let links = self.stored_sheet_links()?;
        let titles = sheet_download::file_titles(&links);
        let files = matching_files(&self.store.sheet_dir(), &RE_SHEET_FILE)?;
        let names = files
            .iter()
            .map(|p| simplify_file_name(p))
            .collect::<PipelineResult<Vec<String>>>()?;
        info!("transform_sheets: {} sheet files", files.len());

        let manifest_file = self.store.sheet_manifest_file();
        let mut manifest: SheetManifest = read_manifest(&manifest_file)?;
        manifest.retain(|name, _| names.contains(name));
        let recorded: BTreeSet<String> = manifest.keys().cloned().collect();
        let pending = remaining_work(&names, &recorded);
        let outputs_present = manifest
            .values()
            .flatten()
            .filter(|p| period.map(|w| w == **p).unwrap_or(true))
            .all(|p| self.store.sheet_normalized_file(*p).exists());
        if pending.is_empty() && outputs_present && !force {
            info!("transform_sheets: no new or failed sheets, nothing to do");
            return Ok(BatchReport {
                skipped: names.len(),
                ..BatchReport::default()
            });
        }
        debug!("transform_sheets: {} sheets not transformed yet", pending.len());

        let mut report = BatchReport::default();
        let mut by_period: BTreeMap<u32, Vec<SheetVote>> = BTreeMap::new();
        let mut parsed: SheetManifest = BTreeMap::new();
        for (path, name) in files.iter().zip(names.iter()) {
            match io_sheets::parse_sheet_file(path, &titles, &self.settings.party_canon, self.loader) {
                Ok(SheetParse::Skipped) => {
                    report.skipped += 1;
                    parsed.insert(name.clone(), BTreeSet::new());
                }
                Ok(SheetParse::Parsed(votes)) => {
                    let periods = parsed.entry(name.clone()).or_default();
                    for v in votes {
                        periods.insert(v.member.legislative_period);
                        by_period
                            .entry(v.member.legislative_period)
                            .or_default()
                            .push(v);
                    }
                }
                Err(e) => {
                    error!("transform_sheets: {}", e);
                    report.fail(e.to_string());
                }
            }
        }
        if let Some(p) = period {
            by_period.retain(|k, _| *k == p);
            if by_period.is_empty() {
                warn!("transform_sheets: no votes found for period {}", p);
            }
        }

        let mut finished: BTreeSet<u32> = BTreeSet::new();
        for (p, votes) in by_period.iter() {
            let out = self.store.sheet_normalized_file(*p);
            let sources = |m: &SheetManifest| -> BTreeSet<String> {
                m.iter()
                    .filter(|(_, periods)| periods.contains(p))
                    .map(|(name, _)| name.clone())
                    .collect()
            };
            let current = if out.exists() && sources(&manifest) == sources(&parsed) {
                Stage::Normalized
            } else {
                Stage::RawOnDisk
            };
            finished.insert(*p);
            if !needs_run(current, Stage::Normalized, force) {
                info!("transform_sheets: period {} already normalized", p);
                report.skipped += 1;
                continue;
            }
            io_parquet::write_sheet_votes(&self.store.sheet_votes_file(*p), votes)?;
            let out_name = out.display().to_string();
            let mut builder = Builder::new(&self.settings.party_canon)
                .context(InvalidRecordsSnafu { path: out_name.clone() })?;
            builder
                .add_sheet_votes(votes)
                .context(InvalidRecordsSnafu { path: out_name })?;
            let records = builder.build();
            io_parquet::write_normalized(&out, &records)?;
            report.succeeded += 1;
        }

        // Only the sheets whose periods were all written count as done.
        manifest.retain(|name, _| parsed.contains_key(name));
        for (name, periods) in parsed {
            if periods.iter().all(|p| finished.contains(p)) {
                manifest.insert(name, periods);
            }
        }
        write_json(&manifest_file, &manifest)?;
        Ok(report)
    }

    // ********* API track ***********

    fn paginator(&self, dry_run: bool, force: bool) -> Paginator<'_> {
        let settings = ApiSettings {
            base_url: self.settings.api_base_url.clone(),
            page_size: self.settings.page_size,
            max_polls: self.settings.max_polls,
            max_mandates: self.settings.max_mandates,
            max_votes_per_poll: self.settings.max_votes_per_poll,
            dry_run,
            force,
        };
        let pacer = Pacer::new(self.settings.request_delay, self.settings.jitter);
        Paginator::new(self.transport, &self.store, settings, pacer)
    }

    pub fn download_api(
        &self,
        legislature_id: u64,
        entity: EntityArg,
        dry_run: bool,
        force: bool,
    ) -> PipelineResult<BatchReport> {
        let mut paginator = self.paginator(dry_run, force);
        let mut report = BatchReport::default();
        if matches!(entity, EntityArg::Polls | EntityArg::All) {
            report.merge(paginator.fetch_listing(Listing::Polls, legislature_id)?);
        }
        if matches!(entity, EntityArg::Mandates | EntityArg::All) {
            report.merge(paginator.fetch_listing(Listing::Mandates, legislature_id)?);
        }
        if matches!(entity, EntityArg::Votes | EntityArg::All) {
            report.merge(paginator.fetch_missing_votes(legislature_id)?);
        }
        if dry_run {
            for url in paginator.planned() {
                println!("{}", url);
            }
        }
        Ok(report)
    }

    /// Parses the raw API files of a legislature into tables.
    ///
    /// Runs again when the stored vote files differ from the polls read by
    /// the last run. Refuses to run while vote files carry empty fraction lists.
    pub fn transform_api(&self, legislature_id: u64, force: bool) -> PipelineResult<BatchReport> {
        let out = self.store.api_normalized_file(legislature_id);
        let manifest_file = self.store.api_manifest_file(legislature_id);
        let persisted = self.store.persisted_poll_ids(legislature_id)?;
        let recorded: BTreeSet<u64> = read_manifest(&manifest_file)?;
        let current = if out.exists() && recorded == persisted {
            Stage::Normalized
        } else {
            Stage::RawOnDisk
        };
        if !needs_run(current, Stage::Normalized, force) {
            info!(
                "transform_api: legislature {} already normalized",
                legislature_id
            );
            return Ok(BatchReport {
                skipped: 1,
                ..BatchReport::default()
            });
        }
        let corrupted = fix::detect_corrupted_fractions(&self.store, legislature_id)?;
        for path in corrupted.iter() {
            error!("transform_api: empty fraction lists in {}", path.display());
        }
        ensure!(
            corrupted.is_empty(),
            CorruptedFractionsSnafu {
                legislature_id,
                count: corrupted.len()
            }
        );

        let mut polls = io_api::load_polls(&self.store, legislature_id)?;
        polls.sort_by_key(|p| p.poll_id);
        io_parquet::write_polls(&self.store.polls_table_file(legislature_id), &polls)?;

        let mut mandates = io_api::load_mandates(&self.store, legislature_id)?;
        mandates.sort_by_key(|m| m.mandate_id);
        io_parquet::write_mandates(&self.store.mandates_table_file(legislature_id), &mandates)?;

        let mut compiled =
            io_api::compile_votes(&self.store, legislature_id, DedupPolicy::KeepFirstByArrival)?;
        compiled.votes.sort_by_key(|v| (v.poll_id, v.mandate_id));
        let votes = &compiled.votes;
        io_parquet::write_votes(&self.store.votes_table_file(legislature_id), votes)?;
        io_parquet::write_compiled_csv(&self.store.compiled_votes_file(legislature_id), votes)?;

        let out_name = out.display().to_string();
        let mut builder = Builder::new(&self.settings.party_canon)
            .context(InvalidRecordsSnafu { path: out_name.clone() })?;
        builder
            .add_api_votes(&polls, &mandates, votes)
            .context(InvalidRecordsSnafu { path: out_name })?;
        let records = builder.build();
        io_parquet::write_normalized(&out, &records)?;
        write_json(&manifest_file, &compiled.polls)?;
        info!(
            "transform_api: {} normalized votes for legislature {}",
            records.len(),
            legislature_id
        );
        Ok(compiled.report)
    }

    pub fn fix(&self, legislature_id: u64, dry_run: bool) -> PipelineResult<BatchReport> {
        fix::fix_fractions(&self.store, legislature_id, dry_run)
    }
}

fn required_legislature(legislature_id: Option<u64>) -> PipelineResult<u64> {
    match legislature_id {
        Some(id) => Ok(id),
        None => whatever!("a legislature id is required for the api source"),
    }
}

/// Runs the command given on the command line.
pub fn run(args: &Args) -> PipelineResult<BatchReport> {
    let config = read_config(args.config.as_deref())?;
    let mut overrides = Overrides {
        data_dir: args.data_dir.clone(),
        ..Overrides::default()
    };
    if let Command::Download {
        max_downloads,
        max_polls,
        max_mandates,
        ..
    } = &args.command
    {
        overrides.max_downloads = *max_downloads;
        overrides.max_polls = *max_polls;
        overrides.max_mandates = *max_mandates;
    }
    let settings = validate_config(&config, &overrides)?;
    debug!("run: settings: {:?}", settings);
    let transport = HttpTransport::new(settings.timeout)?;
    let loader = CalamineLoader;
    let pipeline = Pipeline::new(settings, &transport, &loader);

    match &args.command {
        Command::Download {
            source,
            legislature_id,
            entity,
            dry_run,
            force,
            ..
        } => match source {
            SourceArg::Sheets => pipeline.download_sheets(*dry_run, *force),
            SourceArg::Api => {
                let id = required_legislature(*legislature_id)?;
                pipeline.download_api(id, *entity, *dry_run, *force)
            }
        },
        Command::Transform { source, id, force } => match source {
            SourceArg::Sheets => {
                let period = match id {
                    Some(p) => Some(u32::try_from(*p).ok().whatever_context("period out of range")?),
                    None => None,
                };
                pipeline.transform_sheets(period, *force)
            }
            SourceArg::Api => pipeline.transform_api(required_legislature(*id)?, *force),
        },
        Command::Fix {
            legislature_id,
            dry_run,
        } => pipeline.fix(*legislature_id, *dry_run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::io_api::tests::{poll_page, vote, votes_file};
    use crate::pipeline::test_support::{settings_in, sheet_grid, InMemoryLoader, StubTransport};
    use chrono::NaiveDate;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use serde_json::json;

    fn parquet_rows(path: &Path) -> i64 {
        let reader = SerializedFileReader::new(fs::File::open(path).unwrap()).unwrap();
        reader.metadata().file_metadata().num_rows()
    }

    const LISTING: &str = r#"<html><body><table><tr>
<td data-th="Dokument"><div><p><strong>10.09.2020: Example Vote</strong></p></div>
<a href="/resource/blob/1/20200910_1_xls-data.xlsx" title="XLSX | 51 KB">XLSX</a></td>
</tr><tr>
<td data-th="Dokument"><div><p><strong>Failed download</strong></p></div>
<a href="/resource/blob/2/20201126_3_xls-data.xlsx" title="XLSX | 12 KB">XLSX</a></td>
</tr></table></body></html>"#;

    const NO_SHEETS: &str = r#"<html><body><table><tr>
<td data-th="Dokument"><div><p><strong>11.09.2020: Minutes</strong></p></div>
<a href="/resource/blob/3/minutes.pdf" title="PDF | 80 KB">PDF</a></td>
</tr></table></body></html>"#;

    const LATE_LISTING: &str = r#"<html><body><table><tr>
<td data-th="Dokument"><div><p><strong>03.12.2020: Late Vote</strong></p></div>
<a href="/resource/blob/4/20201203_1_xls-data.xlsx" title="XLSX | 40 KB">XLSX</a></td>
</tr></table></body></html>"#;

    #[test]
    fn sheet_track_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = ArtifactStore::new(&settings);
        write_atomic(&store.listing_dir().join("page_1.html"), LISTING.as_bytes()).unwrap();
        write_atomic(&store.listing_dir().join("page_2.htm"), NO_SHEETS.as_bytes()).unwrap();

        // The second sheet comes back empty, as an interrupted download would.
        let transport = StubTransport::new(|url| {
            if url.path().ends_with("20200910_1_xls-data.xlsx") {
                Some(b"workbook".to_vec())
            } else {
                Some(Vec::new())
            }
        });
        let loader = InMemoryLoader::default().with(
            "20200910_1_xls-data.xlsx",
            sheet_grid(&[
                ("A", "SPD", "ja"),
                ("B", "DIE LINKE", "nichtabgegeben"),
                ("C", "CDU/CSU", "Enthaltung"),
            ]),
        );
        let pipeline = Pipeline::new(settings, &transport, &loader);

        let report = pipeline.download_sheets(false, false).unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(store.sheet_links_file().exists());

        let report = pipeline.transform_sheets(None, false).unwrap();
        assert!(report.is_success());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(parquet_rows(&store.sheet_votes_file(19)), 3);
        assert_eq!(parquet_rows(&store.sheet_normalized_file(19)), 3);

        // A second run finds everything done.
        let before = fs::read(store.sheet_normalized_file(19)).unwrap();
        let report = pipeline.transform_sheets(Some(19), false).unwrap();
        assert_eq!(report.succeeded, 0);
        let report = pipeline.transform_sheets(Some(19), true).unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(fs::read(store.sheet_normalized_file(19)).unwrap(), before);

        assert_eq!(transport.calls().len(), 2);
        let report = pipeline.download_sheets(false, false).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn failed_and_late_sheets_are_transformed_later() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = ArtifactStore::new(&settings);
        write_atomic(&store.listing_dir().join("page_1.html"), LISTING.as_bytes()).unwrap();
        write_atomic(&store.sheet_dir().join("20200910_1_xls-data.xlsx"), b"workbook").unwrap();
        write_atomic(&store.sheet_dir().join("20201126_3_xls-data.xlsx"), b"workbook").unwrap();
        let transport = StubTransport::new(|_| None);

        // The second workbook cannot be read in the first run.
        let first = InMemoryLoader::default().with(
            "20200910_1_xls-data.xlsx",
            sheet_grid(&[("A", "SPD", "ja")]),
        );
        let report = Pipeline::new(settings.clone(), &transport, &first)
            .transform_sheets(None, false)
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("20201126_3_xls-data.xlsx"));
        assert_eq!(report.succeeded, 1);
        assert_eq!(parquet_rows(&store.sheet_votes_file(19)), 1);

        let both = first.with(
            "20201126_3_xls-data.xlsx",
            sheet_grid(&[("D", "SPD", "nein")]),
        );
        let pipeline = Pipeline::new(settings.clone(), &transport, &both);
        let report = pipeline.transform_sheets(None, false).unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded, 1);
        assert_eq!(parquet_rows(&store.sheet_votes_file(19)), 2);
        assert_eq!(parquet_rows(&store.sheet_normalized_file(19)), 2);

        let report = pipeline.transform_sheets(None, false).unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.skipped, 2);

        // A sheet downloaded after the last run joins its period.
        write_atomic(&store.listing_dir().join("page_2.html"), LATE_LISTING.as_bytes()).unwrap();
        write_atomic(&store.sheet_dir().join("20201203_1_xls-data.xlsx"), b"workbook").unwrap();
        let all = both.with(
            "20201203_1_xls-data.xlsx",
            sheet_grid(&[("E", "CDU/CSU", "Enthaltung")]),
        );
        let report = Pipeline::new(settings, &transport, &all)
            .transform_sheets(None, false)
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded, 1);
        assert_eq!(parquet_rows(&store.sheet_normalized_file(19)), 3);
    }

    #[test]
    fn sheet_records_carry_the_link_date() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let canon = settings.party_canon.clone();
        let store = ArtifactStore::new(&settings);
        write_atomic(&store.listing_dir().join("page_1.html"), LISTING.as_bytes()).unwrap();
        let path = store.sheet_dir().join("20200910_1_xls-data.xlsx");
        write_atomic(&path, b"workbook").unwrap();
        let loader = InMemoryLoader::default().with(
            "20200910_1_xls-data.xlsx",
            sheet_grid(&[("A", "DIE LINKE", "ja")]),
        );
        let transport = StubTransport::new(|_| None);
        let pipeline = Pipeline::new(settings, &transport, &loader);
        let titles = sheet_download::file_titles(&pipeline.sheet_links(false).unwrap());
        let votes = match io_sheets::parse_sheet_file(&path, &titles, &canon, &loader).unwrap() {
            SheetParse::Parsed(v) => v,
            SheetParse::Skipped => panic!("not skipped"),
        };
        let mut builder = Builder::new(&canon).unwrap();
        builder.add_sheet_votes(&votes).unwrap();
        let records = builder.build();
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2020, 9, 10));
        assert_eq!(records[0].title, " Example Vote");
        assert_eq!(records[0].party, "DIE LINKE.");
    }

    fn api_stub() -> StubTransport {
        StubTransport::new(|url| {
            let path = url.path();
            if path.ends_with("/polls") {
                Some(poll_page(&[1, 2], 2, 0).to_string().into_bytes())
            } else if path.ends_with("/candidacies-mandates") {
                let page = json!({
                    "meta": {"result": {"count": 1, "total": 1, "range_start": 0, "range_end": 1}},
                    "data": [{
                        "id": 42, "label": "Jane Doe (Bundestag 2017 - 2021)",
                        "parliament_period": {"id": 111, "label": "Bundestag 2017 - 2021"},
                        "politician": {"id": 50, "label": "Jane Doe", "abgeordnetenwatch_url": null},
                        "start_date": null, "end_date": null, "electoral_data": null,
                        "fraction_membership": [{"id": 1, "label": "DIE LINKE seit 2017",
                                                 "valid_from": "2017-10-24", "valid_until": null}]
                    }]
                });
                Some(page.to_string().into_bytes())
            } else {
                let poll_id: u64 = path.rsplit('/').next()?.parse().ok()?;
                let mut first = vote(Some(poll_id * 10), 42, poll_id, "no_show");
                if poll_id == 2 {
                    first["fraction"] = json!([]);
                }
                let votes = json!([first, vote(Some(poll_id * 10 + 1), 42, poll_id, "yes")]);
                Some(votes_file(poll_id, votes).to_string().into_bytes())
            }
        })
    }

    #[test]
    fn api_track_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = ArtifactStore::new(&settings);
        let transport = api_stub();
        let loader = InMemoryLoader::default();
        let pipeline = Pipeline::new(settings, &transport, &loader);

        let report = pipeline.download_api(111, EntityArg::All, false, false).unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded, 4);

        // Poll 2 carries an empty fraction list.
        let err = pipeline.transform_api(111, false).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CorruptedFractions {
                legislature_id: 111,
                count: 1
            }
        ));
        assert!(!store.api_normalized_file(111).exists());

        pipeline.fix(111, false).unwrap();
        let report = pipeline.transform_api(111, false).unwrap();
        assert!(report.is_success());
        assert_eq!(parquet_rows(&store.polls_table_file(111)), 2);
        assert_eq!(parquet_rows(&store.mandates_table_file(111)), 1);
        // One vote per (mandate, poll): the duplicates are dropped.
        assert_eq!(parquet_rows(&store.votes_table_file(111)), 2);
        assert_eq!(parquet_rows(&store.api_normalized_file(111)), 2);
        let csv = fs::read_to_string(store.compiled_votes_file(111)).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains("no_show"));

        let calls = transport.calls().len();
        pipeline.download_api(111, EntityArg::All, false, false).unwrap();
        assert_eq!(transport.calls().len(), calls);
    }

    #[test]
    fn api_transform_follows_the_vote_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let store = ArtifactStore::new(&settings);
        let transport = api_stub();
        let loader = InMemoryLoader::default();
        let pipeline = Pipeline::new(settings, &transport, &loader);
        pipeline.download_api(111, EntityArg::All, false, false).unwrap();
        pipeline.fix(111, false).unwrap();
        assert!(pipeline.transform_api(111, false).unwrap().is_success());
        assert_eq!(pipeline.transform_api(111, false).unwrap().skipped, 1);

        // An unreadable vote file fails on every run until it is replaced.
        let path = store.votes_file(111, 3);
        write_atomic(&path, b"<html>").unwrap();
        for _ in 0..2 {
            let report = pipeline.transform_api(111, false).unwrap();
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.succeeded, 2);
            assert_eq!(parquet_rows(&store.votes_table_file(111)), 2);
        }

        let votes = votes_file(3, json!([vote(Some(30), 42, 3, "yes")]));
        write_atomic(&path, votes.to_string().as_bytes()).unwrap();
        let report = pipeline.transform_api(111, false).unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded, 3);
        assert_eq!(parquet_rows(&store.votes_table_file(111)), 3);
        assert_eq!(parquet_rows(&store.api_normalized_file(111)), 3);
        assert_eq!(pipeline.transform_api(111, false).unwrap().skipped, 1);
    }

    #[test]
    fn missing_legislature_is_an_error() {
        assert!(required_legislature(None).is_err());
        assert_eq!(required_legislature(Some(111)).unwrap(), 111);
    }
}
