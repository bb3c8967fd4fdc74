use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{Classify, ErrorClass};

/// Chooses one build info when a path holds several candidates.
///
/// Interactive implementations prompt the user; batch implementations fail.
/// The push and diff actions bound the time spent in [`select`](Self::select).
#[async_trait]
pub trait SelectionResolver: Send + Sync {
    async fn select(&self, candidates: &[PathBuf]) -> Result<PathBuf, SelectionError>;
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Found {} build info files, unable to choose one in non-interactive mode. Pass the path of the build info file to use:{}", .candidates.len(), list_candidates(.candidates))]
    Ambiguous { candidates: Vec<PathBuf> },
    #[error("No build info file was selected")]
    Cancelled,
    #[error("The selected file {path} is not one of the candidates")]
    Invalid { path: PathBuf },
}

fn list_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|candidate| format!("\n  - {}", candidate.display()))
        .collect()
}

impl Classify for SelectionError {
    fn class(&self) -> ErrorClass {
        ErrorClass::UserActionable
    }
}
