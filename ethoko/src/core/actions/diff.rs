use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::locate::{locate_build_info, LocateError};
use super::push::DEFAULT_SELECTION_TIMEOUT;
use crate::core::artifact::{Artifact, CompiledContract};
use crate::core::build_info::{normalize_in_background, NormalizeError};
use crate::core::resources::SelectionResolver;
use crate::error::{log_error_chain, surface, Classify, ErrorClass};
use crate::resources::{LocalStorage, LocalStorageError};

#[derive(Clone, Debug)]
pub struct DiffOptions {
    /// Log the full cause of a failure
    pub debug: bool,
    /// Ignore the raw metadata string when comparing contracts
    pub ignore_metadata: bool,
    /// Bound on the time spent choosing between several build infos
    pub selection_timeout: Duration,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            debug: false,
            ignore_metadata: false,
            selection_timeout: DEFAULT_SELECTION_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DifferenceKind {
    /// Only in the candidate
    Added,
    /// Only in the reference
    Removed,
    /// In both, with different content
    Changed,
}

/// A compilation target that differs between two artifacts.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    pub source_path: String,
    pub contract_name: String,
    pub kind: DifferenceKind,
}

/// Compares a local build info with an artifact of the local cache.
///
/// The build info is normalized like for a push, but nothing is uploaded.
pub struct Diff<'a, S: SelectionResolver + ?Sized> {
    /// A build info file, or a project directory
    pub path: PathBuf,
    pub project: String,
    /// Tag or id of the cached artifact to compare against
    pub reference: String,
    pub local: &'a LocalStorage,
    pub selection: &'a S,
    pub options: DiffOptions,
}

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("No tag or id `{reference}` found locally in project `{project}`. Pull it first")]
    ReferenceNotFound { project: String, reference: String },
    #[error("{}", surface(.0, "reading the local artifact"))]
    LocalStorage(#[source] LocalStorageError),
    #[error("{}", surface(.0, "locating the build info"))]
    Locate(#[source] LocateError),
    #[error("{}", surface(.0, "normalizing the build info"))]
    Normalize(#[source] NormalizeError),
}

impl Classify for DiffError {
    fn class(&self) -> ErrorClass {
        match self {
            DiffError::ReferenceNotFound { .. } => ErrorClass::UserActionable,
            DiffError::LocalStorage(err) => err.class(),
            DiffError::Locate(err) => err.class(),
            DiffError::Normalize(err) => err.class(),
        }
    }
}

impl<'a, S: SelectionResolver + ?Sized> Diff<'a, S> {
    pub fn new(
        path: impl Into<PathBuf>,
        project: impl Into<String>,
        reference: impl Into<String>,
        local: &'a LocalStorage,
        selection: &'a S,
        options: DiffOptions,
    ) -> Self {
        Self {
            path: path.into(),
            project: project.into(),
            reference: reference.into(),
            local,
            selection,
            options,
        }
    }

    /// Returns the differences, sorted by source path and contract name.
    pub async fn run(&self) -> Result<Vec<Difference>, DiffError> {
        let result = self.diff().await;
        if let Err(err) = &result {
            if self.options.debug {
                log_error_chain(err);
            }
        }
        result
    }

    async fn diff(&self) -> Result<Vec<Difference>, DiffError> {
        // Get the reference artifact
        let key = self
            .local
            .resolve_reference(&self.project, &self.reference)
            .await
            .map_err(DiffError::LocalStorage)?
            .ok_or_else(|| DiffError::ReferenceNotFound {
                project: self.project.clone(),
                reference: self.reference.clone(),
            })?;
        let reference = self
            .local
            .retrieve_artifact(&self.project, &key)
            .await
            .map_err(DiffError::LocalStorage)?;

        // Normalize the candidate
        let candidate =
            locate_build_info(&self.path, self.selection, self.options.selection_timeout)
                .await
                .map_err(DiffError::Locate)?;
        let candidate = normalize_in_background(candidate)
            .await
            .map_err(DiffError::Normalize)?;

        Ok(compare_artifacts(
            &candidate.artifact,
            &reference,
            self.options.ignore_metadata,
        ))
    }
}

/// Compares the compiled contracts of two artifacts, target by target.
pub fn compare_artifacts(
    candidate: &Artifact,
    reference: &Artifact,
    ignore_metadata: bool,
) -> Vec<Difference> {
    let difference = |source_path: &str, contract_name: &str, kind| Difference {
        source_path: source_path.to_owned(),
        contract_name: contract_name.to_owned(),
        kind,
    };

    let mut differences = Vec::new();
    for (source_path, contract_name, contract) in candidate.contracts() {
        let counterpart = reference
            .output
            .contracts
            .get(source_path)
            .and_then(|contracts| contracts.get(contract_name));
        match counterpart {
            None => {
                differences.push(difference(source_path, contract_name, DifferenceKind::Added))
            }
            Some(counterpart) if !same_contract(contract, counterpart, ignore_metadata) => {
                differences.push(difference(source_path, contract_name, DifferenceKind::Changed))
            }
            Some(_) => {}
        }
    }
    for (source_path, contract_name, _) in reference.contracts() {
        let in_candidate = candidate
            .output
            .contracts
            .get(source_path)
            .map_or(false, |contracts| contracts.contains_key(contract_name));
        if !in_candidate {
            differences.push(difference(source_path, contract_name, DifferenceKind::Removed));
        }
    }
    differences.sort();
    differences
}

fn same_contract(a: &CompiledContract, b: &CompiledContract, ignore_metadata: bool) -> bool {
    if ignore_metadata && a.metadata != b.metadata {
        let strip = |contract: &CompiledContract| CompiledContract {
            metadata: None,
            ..contract.clone()
        };
        strip(a) == strip(b)
    } else {
        a == b
    }
}
