use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use super::layout;
use crate::core::artifact::{Artifact, ArtifactKey};
use crate::core::build_info::OriginalContent;
use crate::error::{Classify, ErrorClass};

/// The bytes of a canonical artifact JSON document.
pub type ArtifactStream = Pin<Box<dyn AsyncRead + Send>>;

/// Defines the interface for interacting with an artifact store.
///
/// Artifacts are stored per project, under their immutable id and optionally
/// under a mutable tag. The store may be a local directory or an object
/// storage bucket; both use the keys of [`layout`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Lists the tags of a project. The order is unspecified.
    async fn list_tags(&self, project: &str) -> Result<Vec<String>, StorageError>;

    /// Lists the ids of a project. The order is unspecified.
    async fn list_ids(&self, project: &str) -> Result<Vec<String>, StorageError>;

    async fn has_artifact_by_tag(&self, project: &str, tag: &str) -> Result<bool, StorageError>;

    async fn has_artifact_by_id(&self, project: &str, id: &str) -> Result<bool, StorageError>;

    /// Stores an artifact under its id and archives its original content.
    ///
    /// Storing an id that already exists leaves it untouched. When a tag is
    /// given, it is created or overwritten to resolve to the artifact.
    async fn upload_artifact(
        &self,
        project: &str,
        artifact: &Artifact,
        tag: Option<&str>,
        original_content: &[OriginalContent],
    ) -> Result<(), StorageError>;

    async fn download_artifact_by_id(
        &self,
        project: &str,
        id: &str,
    ) -> Result<ArtifactStream, StorageError>;

    async fn download_artifact_by_tag(
        &self,
        project: &str,
        tag: &str,
    ) -> Result<ArtifactStream, StorageError>;
}

#[async_trait]
impl<P: StorageProvider + ?Sized> StorageProvider for Box<P> {
    async fn list_tags(&self, project: &str) -> Result<Vec<String>, StorageError> {
        (**self).list_tags(project).await
    }

    async fn list_ids(&self, project: &str) -> Result<Vec<String>, StorageError> {
        (**self).list_ids(project).await
    }

    async fn has_artifact_by_tag(&self, project: &str, tag: &str) -> Result<bool, StorageError> {
        (**self).has_artifact_by_tag(project, tag).await
    }

    async fn has_artifact_by_id(&self, project: &str, id: &str) -> Result<bool, StorageError> {
        (**self).has_artifact_by_id(project, id).await
    }

    async fn upload_artifact(
        &self,
        project: &str,
        artifact: &Artifact,
        tag: Option<&str>,
        original_content: &[OriginalContent],
    ) -> Result<(), StorageError> {
        (**self)
            .upload_artifact(project, artifact, tag, original_content)
            .await
    }

    async fn download_artifact_by_id(
        &self,
        project: &str,
        id: &str,
    ) -> Result<ArtifactStream, StorageError> {
        (**self).download_artifact_by_id(project, id).await
    }

    async fn download_artifact_by_tag(
        &self,
        project: &str,
        tag: &str,
    ) -> Result<ArtifactStream, StorageError> {
        (**self).download_artifact_by_tag(project, tag).await
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid {kind} `{value}`: expected a name without leading dot nor path separator")]
    InvalidKey { kind: &'static str, value: String },
    #[error("No artifact found for {key} in project `{project}`")]
    NotFound { project: String, key: ArtifactKey },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize the artifact: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Object storage request `{operation}` failed for `{key}`: {source}")]
    ObjectStorage {
        operation: &'static str,
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Failed to resolve object storage credentials: {0}")]
    Credentials(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn object_storage(
        operation: &'static str,
        key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StorageError::ObjectStorage {
            operation,
            key: key.into(),
            source: Box::new(source),
        }
    }
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            StorageError::InvalidKey { .. } | StorageError::NotFound { .. } => {
                ErrorClass::UserActionable
            }
            _ => ErrorClass::Internal,
        }
    }
}

/// Rejects project names, tags and ids that cannot be used as key segments.
pub fn validate_segment(kind: &'static str, value: &str) -> Result<(), StorageError> {
    if layout::is_valid_segment(value) {
        Ok(())
    } else {
        Err(StorageError::InvalidKey {
            kind,
            value: value.to_owned(),
        })
    }
}

/// Validates both the project and the key of an artifact lookup.
pub fn validate_key(project: &str, key: &ArtifactKey) -> Result<(), StorageError> {
    validate_segment("project", project)?;
    validate_segment(key.kind(), key.value())
}
