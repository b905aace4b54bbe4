use crate::pipeline::config_reader::Settings;
use crate::pipeline::*;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;

static RE_VOTES_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^poll_(\d+)_votes\.json$").unwrap());
static RE_PAGE_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_(\d+)\.json$").unwrap());

/// The listings fetched page by page from the API.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Listing {
    Polls,
    Mandates,
}

impl Listing {
    pub fn name(&self) -> &'static str {
        match self {
            Listing::Polls => "polls",
            Listing::Mandates => "mandates",
        }
    }
}

/// Where every artifact of the pipeline lives.
///
/// The layout is `<data>/<raw|preprocessed>/<source>/...`. All paths are
/// derived from the settings; nothing else in the pipeline builds paths.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ArtifactStore {
    raw_sheets: PathBuf,
    raw_api: PathBuf,
    out_sheets: PathBuf,
    out_api: PathBuf,
}

impl ArtifactStore {
    pub fn new(settings: &Settings) -> ArtifactStore {
        let raw = settings.data_dir.join(&settings.raw_dir);
        let out = settings.data_dir.join(&settings.preprocessed_dir);
        ArtifactStore {
            raw_sheets: raw.join(&settings.sheets_source),
            raw_api: raw.join(&settings.api_source),
            out_sheets: out.join(&settings.sheets_source),
            out_api: out.join(&settings.api_source),
        }
    }

    // ******** Spreadsheet track ********

    /// The saved listing pages (html) the sheet links are harvested from.
    pub fn listing_dir(&self) -> PathBuf {
        self.raw_sheets.join("htm_files")
    }

    pub fn sheet_links_file(&self) -> PathBuf {
        self.raw_sheets.join("sheet_links.json")
    }

    pub fn sheet_dir(&self) -> PathBuf {
        self.raw_sheets.join("sheets")
    }

    pub fn sheet_votes_file(&self, period: u32) -> PathBuf {
        self.out_sheets.join(format!("sheet_votes_{}.parquet", period))
    }

    pub fn sheet_normalized_file(&self, period: u32) -> PathBuf {
        self.out_sheets
            .join(format!("normalized_votes_{}.parquet", period))
    }

    // ******** API track ********

    pub fn listing_page_dir(&self, listing: Listing, legislature_id: u64) -> PathBuf {
        self.raw_api
            .join(format!("{}_legislature_{}", listing.name(), legislature_id))
    }

    pub fn listing_page_file(&self, listing: Listing, legislature_id: u64, page: u32) -> PathBuf {
        self.listing_page_dir(listing, legislature_id)
            .join(format!("page_{}.json", page))
    }

    pub fn votes_dir(&self, legislature_id: u64) -> PathBuf {
        self.raw_api
            .join(format!("votes_legislature_{}", legislature_id))
    }

    pub fn votes_file(&self, legislature_id: u64, poll_id: u64) -> PathBuf {
        self.votes_dir(legislature_id)
            .join(format!("poll_{}_votes.json", poll_id))
    }

    pub fn polls_table_file(&self, legislature_id: u64) -> PathBuf {
        self.out_api.join(format!("polls_{}.parquet", legislature_id))
    }

    pub fn mandates_table_file(&self, legislature_id: u64) -> PathBuf {
        self.out_api
            .join(format!("mandates_{}.parquet", legislature_id))
    }

    pub fn votes_table_file(&self, legislature_id: u64) -> PathBuf {
        self.out_api.join(format!("votes_{}.parquet", legislature_id))
    }

    pub fn compiled_votes_file(&self, legislature_id: u64) -> PathBuf {
        self.out_api
            .join(format!("compiled_votes_legislature_{}.csv", legislature_id))
    }

    pub fn api_normalized_file(&self, legislature_id: u64) -> PathBuf {
        self.out_api
            .join(format!("normalized_votes_{}.parquet", legislature_id))
    }

    // ******** Manifests ********

    /// The sheet files consumed by the finished transforms, with the periods they hold.
    pub fn sheet_manifest_file(&self) -> PathBuf {
        self.out_sheets.join("transformed_sheets.json")
    }

    /// The polls whose votes went into the normalized table of a legislature.
    pub fn api_manifest_file(&self, legislature_id: u64) -> PathBuf {
        self.out_api
            .join(format!("normalized_polls_{}.json", legislature_id))
    }

    /// The poll ids whose votes are already on disk.
    pub fn persisted_poll_ids(&self, legislature_id: u64) -> PipelineResult<BTreeSet<u64>> {
        let mut ids = BTreeSet::new();
        for path in list_files(&self.votes_dir(legislature_id))? {
            let name = simplify_file_name(&path)?;
            if let Some(id) = RE_VOTES_FILE
                .captures(&name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                ids.insert(id);
            }
        }
        debug!(
            "persisted_poll_ids: {} vote files for legislature {}",
            ids.len(),
            legislature_id
        );
        Ok(ids)
    }

    /// The stored pages of a listing, in page order.
    pub fn listing_pages(&self, listing: Listing, legislature_id: u64) -> PipelineResult<Vec<PathBuf>> {
        let mut pages: Vec<(u32, PathBuf)> = Vec::new();
        for path in list_files(&self.listing_page_dir(listing, legislature_id))? {
            let name = simplify_file_name(&path)?;
            if let Some(page) = RE_PAGE_FILE
                .captures(&name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            {
                pages.push((page, path));
            }
        }
        pages.sort();
        Ok(pages.into_iter().map(|(_, p)| p).collect())
    }
}

/// The files of a directory, sorted by name. A missing directory has no files.
pub fn list_files(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = Vec::new();
    let entries = fs::read_dir(dir).context(ReadingFileSnafu {
        path: dir.display().to_string(),
    })?;
    for entry in entries {
        let entry = entry.context(ReadingFileSnafu {
            path: dir.display().to_string(),
        })?;
        let path = entry.path();
        if path.is_file() && !is_temporary(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn is_temporary(path: &Path) -> bool {
    path.extension().map(|e| e == "tmp").unwrap_or(false)
}

fn ensure_parent(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context(WritingFileSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Writes a file through a temporary sibling, so that a reader never sees
/// a partial artifact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    write_with(path, |file| {
        let mut file = file;
        file.write_all(bytes).context(WritingFileSnafu {
            path: path.display().to_string(),
        })
    })
}

/// Like [`write_atomic`], for writers that need the file handle.
pub fn write_with<F>(path: &Path, write: F) -> PipelineResult<()>
where
    F: FnOnce(File) -> PipelineResult<()>,
{
    ensure_parent(path)?;
    let tmp = temporary_path(path);
    let file = File::create(&tmp).context(WritingFileSnafu {
        path: tmp.display().to_string(),
    })?;
    if let Err(e) = write(file) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).context(WritingFileSnafu {
        path: path.display().to_string(),
    })?;
    debug!("write_with: wrote {}", path.display());
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let contents = fs::read(path).context(ReadingFileSnafu {
        path: path.display().to_string(),
    })?;
    serde_json::from_slice(&contents).context(ParsingJsonSnafu {
        path: path.display().to_string(),
    })
}

/// Reads a manifest, or its default when it was never written.
pub fn read_manifest<T: DeserializeOwned + Default>(path: &Path) -> PipelineResult<T> {
    if path.exists() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let bytes = serde_json::to_vec_pretty(value).context(WritingJsonSnafu {})?;
    write_atomic(path, &bytes)
}

pub fn is_zero_sized(path: &Path) -> PipelineResult<bool> {
    let meta = fs::metadata(path).context(ReadingFileSnafu {
        path: path.display().to_string(),
    })?;
    Ok(meta.len() == 0)
}
