use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::locate::{locate_build_info, LocateError};
use crate::core::build_info::{normalize_in_background, NormalizeError};
use crate::core::resources::{SelectionResolver, StorageError, StorageProvider};
use crate::error::{log_error_chain, surface, Classify, ErrorClass};

/// How long an ambiguous selection may stay unanswered by default.
pub const DEFAULT_SELECTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct PushOptions {
    /// Overwrite the tag if it already exists
    pub force: bool,
    /// Log the full cause of a failure
    pub debug: bool,
    /// Bound on the time spent choosing between several build infos
    pub selection_timeout: Duration,
}

impl Default for PushOptions {
    fn default() -> Self {
        PushOptions {
            force: false,
            debug: false,
            selection_timeout: DEFAULT_SELECTION_TIMEOUT,
        }
    }
}

/// Normalizes a build info and uploads the resulting artifact.
///
/// The push goes through four steps, each of which aborts it on failure:
/// locate the build info, normalize it, check the tag and upload. An
/// existing tag is only overwritten with `force`.
pub struct Push<'a, P: StorageProvider + ?Sized, S: SelectionResolver + ?Sized> {
    /// A build info file, or a project directory
    pub path: PathBuf,
    pub project: String,
    pub tag: Option<String>,
    pub provider: &'a P,
    pub selection: &'a S,
    pub options: PushOptions,
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("{}", surface(.0, "locating the build info"))]
    Locate(#[source] LocateError),
    #[error("{}", surface(.0, "normalizing the build info"))]
    Normalize(#[source] NormalizeError),
    #[error("The tag `{tag}` already exists in project `{project}`. Push again with force to overwrite it")]
    TagAlreadyExists { project: String, tag: String },
    #[error("{}", surface(.0, "uploading the artifact"))]
    Storage(#[source] StorageError),
}

impl Classify for PushError {
    fn class(&self) -> ErrorClass {
        match self {
            PushError::Locate(err) => err.class(),
            PushError::Normalize(err) => err.class(),
            PushError::TagAlreadyExists { .. } => ErrorClass::UserActionable,
            PushError::Storage(err) => err.class(),
        }
    }
}

impl<'a, P: StorageProvider + ?Sized, S: SelectionResolver + ?Sized> Push<'a, P, S> {
    pub fn new(
        path: impl Into<PathBuf>,
        project: impl Into<String>,
        tag: Option<String>,
        provider: &'a P,
        selection: &'a S,
        options: PushOptions,
    ) -> Self {
        Self {
            path: path.into(),
            project: project.into(),
            tag,
            provider,
            selection,
            options,
        }
    }

    /// Pushes the artifact and returns its id.
    pub async fn run(&self) -> Result<String, PushError> {
        let result = self.push().await;
        if let Err(err) = &result {
            if self.options.debug {
                log_error_chain(err);
            }
        }
        result
    }

    async fn push(&self) -> Result<String, PushError> {
        // Locate the build info
        let candidate =
            locate_build_info(&self.path, self.selection, self.options.selection_timeout)
                .await
                .map_err(PushError::Locate)?;

        // Normalize it, nothing is uploaded unless this fully succeeds
        let normalized = normalize_in_background(candidate)
            .await
            .map_err(PushError::Normalize)?;
        let artifact = &normalized.artifact;

        // Check the tag
        if let Some(tag) = &self.tag {
            let exists = self
                .provider
                .has_artifact_by_tag(&self.project, tag)
                .await
                .map_err(PushError::Storage)?;
            if exists {
                if !self.options.force {
                    return Err(PushError::TagAlreadyExists {
                        project: self.project.clone(),
                        tag: tag.clone(),
                    });
                }
                log::debug!("Tag {} already exists, overwriting it", tag);
            }
        }

        // Upload the artifact
        self.provider
            .upload_artifact(
                &self.project,
                artifact,
                self.tag.as_deref(),
                &normalized.original_content,
            )
            .await
            .map_err(PushError::Storage)?;

        log::info!(
            "Pushed artifact {} to project {}",
            artifact.id,
            self.project
        );
        Ok(artifact.id.clone())
    }
}
