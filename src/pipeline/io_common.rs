use crate::pipeline::*;

/// Saved listing pages.
pub static RE_HTM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.html?$").unwrap());
/// Spreadsheet files, both the current and the legacy format.
pub static RE_SHEET_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.xlsx?$").unwrap());

pub fn simplify_file_name(path: &Path) -> PipelineResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .with_context(|| MissingFileNameSnafu {
            path: path.display().to_string(),
        })
}

/// The local file name of a sheet: the last segment of its link.
pub fn sheet_file_name(uri: &str) -> Option<String> {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    without_query
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// The files of a directory whose name matches the pattern, sorted by name.
pub fn matching_files(dir: &Path, re: &Regex) -> PipelineResult<Vec<PathBuf>> {
    let mut res = Vec::new();
    for path in store::list_files(dir)? {
        if re.is_match(&simplify_file_name(&path)?) {
            res.push(path);
        }
    }
    Ok(res)
}
