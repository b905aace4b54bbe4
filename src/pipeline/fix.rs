use crate::pipeline::store::{read_json, write_atomic, ArtifactStore};
use crate::pipeline::*;

use serde_json::Value as JSValue;
use text_diff::print_diff;

fn votes_of(value: &JSValue) -> Option<&Vec<JSValue>> {
    value
        .get("data")?
        .get("related_data")?
        .get("votes")?
        .as_array()
}

fn is_empty_list(value: Option<&JSValue>) -> bool {
    matches!(value, Some(JSValue::Array(items)) if items.is_empty())
}

/// Counts the votes whose fraction is an empty list instead of an object or null.
pub fn count_empty_fractions(value: &JSValue) -> usize {
    votes_of(value)
        .map(|votes| {
            votes
                .iter()
                .filter(|v| is_empty_list(v.get("fraction")))
                .count()
        })
        .unwrap_or(0)
}

/// Replaces the empty fraction lists by null. Returns how many were replaced.
pub fn repair_empty_fractions(value: &mut JSValue) -> usize {
    let votes = match value
        .get_mut("data")
        .and_then(|d| d.get_mut("related_data"))
        .and_then(|r| r.get_mut("votes"))
        .and_then(|v| v.as_array_mut())
    {
        Some(v) => v,
        None => return 0,
    };
    let mut repaired = 0;
    for vote in votes.iter_mut() {
        if is_empty_list(vote.get("fraction")) {
            vote["fraction"] = JSValue::Null;
            repaired += 1;
        }
    }
    repaired
}

/// The vote files of a legislature that contain empty fraction lists.
pub fn detect_corrupted_fractions(store: &ArtifactStore, legislature_id: u64) -> PipelineResult<Vec<PathBuf>> {
    let mut corrupted = Vec::new();
    for poll_id in store.persisted_poll_ids(legislature_id)? {
        let path = store.votes_file(legislature_id, poll_id);
        // Unreadable files fail again in the transform.
        let value: JSValue = match read_json(&path) {
            Ok(v) => v,
            Err(e) => {
                warn!("detect_corrupted_fractions: skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if count_empty_fractions(&value) > 0 {
            corrupted.push(path);
        }
    }
    Ok(corrupted)
}

/// Rewrites the damaged vote files of a legislature. A dry run shows the
/// changes and writes nothing. Running it twice changes nothing the second time.
pub fn fix_fractions(store: &ArtifactStore, legislature_id: u64, dry_run: bool) -> PipelineResult<BatchReport> {
    let mut report = BatchReport::default();
    for path in detect_corrupted_fractions(store, legislature_id)? {
        let mut value: JSValue = read_json(&path)?;
        let before = serde_json::to_string_pretty(&value).context(WritingJsonSnafu {})?;
        let repaired = repair_empty_fractions(&mut value);
        let after = serde_json::to_string_pretty(&value).context(WritingJsonSnafu {})?;
        if dry_run {
            info!(
                "fix_fractions: would repair {} votes in {}",
                repaired,
                path.display()
            );
            print_diff(before.as_str(), after.as_str(), "\n");
            report.skipped += 1;
            continue;
        }
        let bytes = serde_json::to_vec(&value).context(WritingJsonSnafu {})?;
        write_atomic(&path, &bytes)?;
        info!("fix_fractions: repaired {} votes in {}", repaired, path.display());
        report.succeeded += 1;
    }
    Ok(report)
}
