use crate::pipeline::io_http::{Pacer, Transport};
use crate::pipeline::*;

use std::collections::BTreeMap;
use url::Url;

#[derive(Debug, Clone)]
pub struct SheetDownloadSettings {
    pub base_url: Url,
    /// Caps the number of new downloads in one run.
    pub max_downloads: Option<usize>,
    pub force: bool,
    pub dry_run: bool,
}

/// Downloads every linked sheet that is not on disk yet.
///
/// A failed download is reported and the batch continues. Returns the
/// report of the batch.
pub fn download_sheets(
    links: &BTreeMap<String, String>,
    sheet_dir: &Path,
    settings: &SheetDownloadSettings,
    transport: &dyn Transport,
    pacer: &mut Pacer,
) -> PipelineResult<BatchReport> {
    let mut report = BatchReport::default();
    let mut downloads = 0;
    for uri in links.values() {
        let file_name = match sheet_file_name(uri) {
            Some(n) => n,
            None => {
                warn!("download_sheets: no file name in link {:?}", uri);
                report.fail(format!("{}: no file name in link", uri));
                continue;
            }
        };
        let target = sheet_dir.join(&file_name);
        if target.exists() && !settings.force {
            debug!("download_sheets: {} already on disk", file_name);
            report.skipped += 1;
            continue;
        }
        if let Some(max) = settings.max_downloads {
            if downloads >= max {
                info!(
                    "download_sheets: reached the maximum of {} downloads, stopping",
                    max
                );
                break;
            }
        }
        let url = match settings.base_url.join(uri) {
            Ok(u) => u,
            Err(e) => {
                report.fail(format!("{}: invalid link: {}", uri, e));
                continue;
            }
        };
        downloads += 1;
        if settings.dry_run {
            info!("download_sheets: would download {} to {}", url, target.display());
            report.skipped += 1;
            continue;
        }
        pacer.wait();
        match transport
            .get(&url)
            .and_then(|bytes| write_atomic(&target, &bytes))
        {
            Ok(()) => {
                info!("download_sheets: downloaded {}", file_name);
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("download_sheets: failed to download {}: {}", url, e);
                report.fail(format!("{}: {}", url, e));
            }
        }
    }
    Ok(report)
}

/// Inverts the harvested links: each sheet file name to the title of its link.
pub fn file_titles(links: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    links
        .iter()
        .filter_map(|(title, uri)| sheet_file_name(uri).map(|name| (name, title.clone())))
        .collect()
}
