use crate::pipeline::io_api::{known_poll_ids, PageHeader};
use crate::pipeline::io_http::{Pacer, Transport};
use crate::pipeline::store::{read_json, write_atomic, ArtifactStore, Listing};
use crate::pipeline::*;

use std::collections::BTreeSet;
use url::Url;
use vote_records::remaining_work;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub page_size: u32,
    pub max_polls: u32,
    pub max_mandates: u32,
    pub max_votes_per_poll: u32,
    pub dry_run: bool,
    pub force: bool,
}

/// Fetches the listings and the per-poll votes of a legislature.
///
/// Every response is stored as is before anything reads it. Pages and
/// vote files already on disk are not fetched again.
pub struct Paginator<'a> {
    transport: &'a dyn Transport,
    store: &'a ArtifactStore,
    settings: ApiSettings,
    pacer: Pacer,
    planned: Vec<Url>,
}

impl<'a> Paginator<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        store: &'a ArtifactStore,
        settings: ApiSettings,
        pacer: Pacer,
    ) -> Paginator<'a> {
        Paginator {
            transport,
            store,
            settings,
            pacer,
            planned: Vec::new(),
        }
    }

    /// The URLs requested so far, or only planned in a dry run.
    pub fn planned(&self) -> &[Url] {
        &self.planned
    }

    fn endpoint(&self, path: &str) -> PipelineResult<Url> {
        self.settings
            .base_url
            .join(path)
            .context(InvalidUrlSnafu { url: path })
    }

    pub fn listing_url(
        &self,
        listing: Listing,
        legislature_id: u64,
        range_start: u64,
        range_end: u64,
    ) -> PipelineResult<Url> {
        let (path, filter) = match listing {
            Listing::Polls => ("polls", "field_legislature"),
            Listing::Mandates => ("candidacies-mandates", "parliament_period"),
        };
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair(filter, &legislature_id.to_string())
            .append_pair("range_start", &range_start.to_string())
            .append_pair("range_end", &range_end.to_string());
        Ok(url)
    }

    pub fn poll_votes_url(&self, poll_id: u64) -> PipelineResult<Url> {
        let mut url = self.endpoint(&format!("polls/{}", poll_id))?;
        url.query_pairs_mut()
            .append_pair("related_data", "votes")
            .append_pair("range_end", &self.settings.max_votes_per_poll.to_string());
        Ok(url)
    }

    fn fetch(&mut self, url: &Url) -> PipelineResult<Vec<u8>> {
        self.pacer.wait();
        self.transport.get(url)
    }

    /// Fetches the pages of a listing until the requested maximum, the
    /// total reported by the API, or an empty page.
    pub fn fetch_listing(&mut self, listing: Listing, legislature_id: u64) -> PipelineResult<BatchReport> {
        let ceiling = match listing {
            Listing::Polls => self.settings.max_polls,
            Listing::Mandates => self.settings.max_mandates,
        } as u64;
        let page_size = self.settings.page_size as u64;
        let mut report = BatchReport::default();
        let mut reported_total: Option<u64> = None;
        let mut start: u64 = 0;
        let mut page: u32 = 0;
        loop {
            let target = reported_total.map(|t| t.min(ceiling)).unwrap_or(ceiling);
            if start >= target {
                break;
            }
            let len = page_size.min(target - start);
            let file = self.store.listing_page_file(listing, legislature_id, page);
            let header: PageHeader = if file.exists() && !self.settings.force {
                debug!("fetch_listing: {} already on disk", file.display());
                report.skipped += 1;
                read_json(&file)?
            } else {
                let url = self.listing_url(listing, legislature_id, start, start + len)?;
                self.planned.push(url.clone());
                if self.settings.dry_run {
                    info!("fetch_listing: would fetch {}", url);
                    report.skipped += 1;
                    start += len;
                    page += 1;
                    continue;
                }
                let bytes = match self.fetch(&url) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("fetch_listing: {} failed: {}", url, e);
                        report.fail(format!("{}: {}", url, e));
                        break;
                    }
                };
                let header: PageHeader = match serde_json::from_slice(&bytes).context(ParsingJsonSnafu {
                    path: url.as_str(),
                }) {
                    Ok(h) => h,
                    Err(e) => {
                        warn!("fetch_listing: {} is not a listing page: {}", url, e);
                        report.fail(format!("{}: {}", url, e));
                        break;
                    }
                };
                write_atomic(&file, &bytes)?;
                report.succeeded += 1;
                header
            };
            let result = header.meta.result;
            debug!(
                "fetch_listing: {} page {}: {} of {}",
                listing.name(),
                page,
                result.count,
                result.total
            );
            if result.count == 0 {
                break;
            }
            reported_total = Some(result.total);
            start += result.count;
            page += 1;
        }
        info!(
            "fetch_listing: {} for legislature {}: {}",
            listing.name(),
            legislature_id,
            report
        );
        Ok(report)
    }

    /// Fetches the votes of every known poll that has no vote file yet.
    ///
    /// A failed poll is reported and the others are still fetched.
    pub fn fetch_missing_votes(&mut self, legislature_id: u64) -> PipelineResult<BatchReport> {
        let known = known_poll_ids(self.store, legislature_id)?;
        if known.is_empty() {
            warn!(
                "fetch_missing_votes: no polls stored for legislature {}; fetch the polls first",
                legislature_id
            );
        }
        let persisted = if self.settings.force {
            BTreeSet::new()
        } else {
            self.store.persisted_poll_ids(legislature_id)?
        };
        let missing = remaining_work(&known, &persisted);
        let mut report = BatchReport {
            skipped: persisted.len(),
            ..BatchReport::default()
        };
        info!(
            "fetch_missing_votes: {} polls known, {} missing",
            known.len(),
            missing.len()
        );
        for poll_id in missing {
            let url = self.poll_votes_url(poll_id)?;
            self.planned.push(url.clone());
            if self.settings.dry_run {
                info!("fetch_missing_votes: would fetch {}", url);
                continue;
            }
            let res = self
                .fetch(&url)
                .and_then(|bytes| check_poll_votes(&bytes, poll_id, url.as_str()).map(|_| bytes))
                .and_then(|bytes| write_atomic(&self.store.votes_file(legislature_id, poll_id), &bytes));
            match res {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("fetch_missing_votes: poll {} failed: {}", poll_id, e);
                    report.fail(format!("poll {}: {}", poll_id, e));
                }
            }
        }
        Ok(report)
    }
}

// The body is stored verbatim, so only its identity is checked here.
fn check_poll_votes(bytes: &[u8], poll_id: u64, url: &str) -> PipelineResult<()> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).context(ParsingJsonSnafu { path: url })?;
    let id = value["data"]["id"].as_u64();
    if id != Some(poll_id) {
        whatever!("{}: expected poll {}, found {:?}", url, poll_id, id);
    }
    Ok(())
}
