use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::build_info::is_output_piece;
use crate::core::resources::{SelectionError, SelectionResolver};
use crate::error::{Classify, ErrorClass};

/// Directories searched for build infos, relative to a project directory.
const BUILD_INFO_DIRS: [&str; 3] = ["build-info", "artifacts/build-info", "out/build-info"];

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("The path {0} does not exist")]
    PathNotFound(PathBuf),
    #[error("No build info file found in {0}. Compile the project first, or pass the path of a build info file")]
    NoCandidate(PathBuf),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("No build info file was selected within {} seconds", .0.as_secs())]
    TimedOut(Duration),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Classify for LocateError {
    fn class(&self) -> ErrorClass {
        match self {
            LocateError::Io { .. } => ErrorClass::Internal,
            _ => ErrorClass::UserActionable,
        }
    }
}

/// Resolves `path` to a single build info file.
///
/// A file is used as is. For a directory, the candidates are looked up and,
/// when there are several, `resolver` picks one within `timeout`.
pub(crate) async fn locate_build_info<S: SelectionResolver + ?Sized>(
    path: &Path,
    resolver: &S,
    timeout: Duration,
) -> Result<PathBuf, LocateError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(LocateError::PathNotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(LocateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.is_dir() {
        return Ok(path.to_path_buf());
    }

    let mut candidates = find_candidates(path).await?;
    let selected = match candidates.len() {
        0 => return Err(LocateError::NoCandidate(path.to_path_buf())),
        1 => candidates.remove(0),
        _ => {
            let selected = tokio::time::timeout(timeout, resolver.select(&candidates))
                .await
                .map_err(|_| LocateError::TimedOut(timeout))??;
            if !candidates.contains(&selected) {
                return Err(SelectionError::Invalid { path: selected }.into());
            }
            selected
        }
    };
    log::debug!("Located build info {}", selected.display());
    Ok(selected)
}

/// Returns the build info candidates of the first location holding any.
async fn find_candidates(dir: &Path) -> Result<Vec<PathBuf>, LocateError> {
    let locations = BUILD_INFO_DIRS
        .iter()
        .map(|location| dir.join(location))
        .chain(std::iter::once(dir.to_path_buf()));
    for location in locations {
        let candidates = json_files(&location).await?;
        if !candidates.is_empty() {
            return Ok(candidates);
        }
    }
    Ok(Vec::new())
}

/// Lists the JSON files directly in `dir`, sorted, skipping output pieces.
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, LocateError> {
    let io = |source| LocateError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io(err)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io)? {
        let path = entry.path();
        let is_json = path.extension().map_or(false, |extension| extension == "json");
        if is_json && !is_output_piece(&path) && entry.file_type().await.map_err(io)?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
