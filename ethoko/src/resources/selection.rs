use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::resources::{SelectionError, SelectionResolver};

/// A [`SelectionResolver`] for batch and CI use: a single candidate is
/// selected, several candidates are an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonInteractiveSelection;

#[async_trait]
impl SelectionResolver for NonInteractiveSelection {
    async fn select(&self, candidates: &[PathBuf]) -> Result<PathBuf, SelectionError> {
        match candidates {
            [] => Err(SelectionError::Cancelled),
            [candidate] => Ok(candidate.clone()),
            _ => Err(SelectionError::Ambiguous {
                candidates: candidates.to_vec(),
            }),
        }
    }
}
