use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Lazily walks `root` for per-contract JSON files, skipping `excluded`.
///
/// Entries are visited sorted by file name at every level, so the order does
/// not depend on the platform. The iterator is consumed once.
pub(super) fn contract_artifact_candidates(
    root: &Path,
    excluded: &Path,
) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> {
    let excluded = excluded.to_path_buf();
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| entry.path() != excluded)
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let is_json = entry
                    .path()
                    .extension()
                    .map_or(false, |extension| extension == "json");
                (entry.file_type().is_file() && is_json).then(|| Ok(entry.into_path()))
            }
            Err(err) => Some(Err(err)),
        })
}
