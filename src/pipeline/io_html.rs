use crate::pipeline::*;

use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

static RE_SHEET_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"XLSX?").unwrap());

const ENTRY_SELECTOR: &str = r#"td[data-th="Dokument"]"#;
const TITLE_SELECTOR: &str = "div p strong";
const LINK_SELECTOR: &str = "a[href]";

/// The sheet links found in the listing pages.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct HarvestReport {
    /// Title of the vote to the sheet URI. Titles are unique: a later
    /// entry with the same title replaces the earlier one.
    pub links: BTreeMap<String, String>,
    pub pages: usize,
    /// Entries that could not be read, with the reason.
    pub entry_errors: Vec<String>,
}

fn selector(s: &str) -> PipelineResult<Selector> {
    Selector::parse(s).ok().context(SelectorSnafu { selector: s })
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join("").trim().to_string()
}

/// Reads the saved listing pages, in file name order.
///
/// When two entries carry the same title, the one read last wins.
pub fn harvest_listing_pages(paths: &[PathBuf]) -> PipelineResult<HarvestReport> {
    let mut report = HarvestReport::default();
    for path in paths.iter() {
        let html = fs::read_to_string(path).context(ReadingFileSnafu {
            path: path.display().to_string(),
        })?;
        let found = harvest_page(&html, &simplify_file_name(path)?, &mut report)?;
        debug!(
            "harvest_listing_pages: {} sheet links in {}",
            found,
            path.display()
        );
        report.pages += 1;
    }
    info!(
        "harvest_listing_pages: {} sheet links from {} pages ({} unreadable entries)",
        report.links.len(),
        report.pages,
        report.entry_errors.len()
    );
    Ok(report)
}

/// Extracts the sheet links of one page into the report. Returns how many were found.
pub fn harvest_page(html: &str, page_name: &str, report: &mut HarvestReport) -> PipelineResult<usize> {
    let entries = selector(ENTRY_SELECTOR)?;
    let titles = selector(TITLE_SELECTOR)?;
    let anchors = selector(LINK_SELECTOR)?;

    let document = Html::parse_document(html);
    let mut found = 0;
    for (idx, entry) in document.select(&entries).enumerate() {
        let sheet_link = entry
            .select(&anchors)
            .filter(|a| {
                a.value()
                    .attr("title")
                    .map(|t| RE_SHEET_TITLE.is_match(t))
                    .unwrap_or(false)
            })
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| {
                let lower = href.to_lowercase();
                lower.ends_with(".xlsx") || lower.ends_with(".xls")
            })
            .map(|href| href.trim().to_string())
            .next();
        let uri = match sheet_link {
            Some(uri) => uri,
            None => continue,
        };
        let title = match entry.select(&titles).next() {
            Some(strong) => element_text(&strong),
            None => {
                warn!(
                    "harvest_page: {} entry {}: sheet link without a title, skipped",
                    page_name, idx
                );
                report.entry_errors.push(format!(
                    "{}: entry {} has no title element",
                    page_name, idx
                ));
                continue;
            }
        };
        if title.is_empty() {
            report
                .entry_errors
                .push(format!("{}: entry {} has an empty title", page_name, idx));
            continue;
        }
        if let Some(previous) = report.links.insert(title.clone(), uri.clone()) {
            if previous != uri {
                debug!(
                    "harvest_page: {:?} linked {}, now {}",
                    title, previous, uri
                );
            }
        }
        found += 1;
    }
    Ok(found)
}

/// The text content of an HTML fragment, whitespace collapsed.
pub fn strip_html(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    let text = parsed.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
