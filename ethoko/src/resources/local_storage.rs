use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;

use super::atomic::stage_stream;
use crate::core::artifact::{Artifact, ArtifactKey, ArtifactValidationError};
use crate::core::resources::layout;
use crate::error::{Classify, ErrorClass};

/// The on-disk cache of pulled artifacts.
///
/// Uses the same tag and id addressing as the storage providers, under its
/// own root. Every read validates the stored document.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

/// A cached tag or id with the last modification time of its entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum LocalStorageError {
    #[error("Invalid {kind} `{value}`: expected a name without leading dot nor path separator")]
    InvalidKey { kind: &'static str, value: String },
    #[error("No artifact found locally for {key} in project `{project}`. Pull it first")]
    NotFound { project: String, key: ArtifactKey },
    #[error("The local artifact at {path} is invalid, pull it again with force to refresh it: {source}")]
    Invalid {
        path: PathBuf,
        source: ArtifactValidationError,
    },
    #[error("The artifact downloaded for id `{expected}` has id `{found}`")]
    UnexpectedId { expected: String, found: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl LocalStorageError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LocalStorageError::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for LocalStorageError {
    fn class(&self) -> ErrorClass {
        match self {
            LocalStorageError::InvalidKey { .. }
            | LocalStorageError::NotFound { .. }
            | LocalStorageError::Invalid { .. } => ErrorClass::UserActionable,
            LocalStorageError::UnexpectedId { .. } | LocalStorageError::Io { .. } => {
                ErrorClass::Internal
            }
        }
    }
}

fn validate_segment(kind: &'static str, value: &str) -> Result<(), LocalStorageError> {
    if layout::is_valid_segment(value) {
        Ok(())
    } else {
        Err(LocalStorageError::InvalidKey {
            kind,
            value: value.to_owned(),
        })
    }
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStorage { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn entry_path(&self, project: &str, key: &ArtifactKey) -> Result<PathBuf, LocalStorageError> {
        validate_segment("project", project)?;
        validate_segment(key.kind(), key.value())?;
        Ok(self.path(&layout::artifact_key(project, key)))
    }

    /// Creates the directories of a project. Calling it again is a no-op.
    pub async fn ensure_project_setup(&self, project: &str) -> Result<(), LocalStorageError> {
        validate_segment("project", project)?;
        for prefix in [layout::ids_prefix(project), layout::tags_prefix(project)] {
            let dir = self.path(&prefix);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|err| LocalStorageError::io(dir, err))?;
        }
        Ok(())
    }

    pub async fn has_id(&self, project: &str, id: &str) -> Result<bool, LocalStorageError> {
        self.has(project, &ArtifactKey::Id(id.to_owned())).await
    }

    pub async fn has_tag(&self, project: &str, tag: &str) -> Result<bool, LocalStorageError> {
        self.has(project, &ArtifactKey::Tag(tag.to_owned())).await
    }

    pub async fn has(&self, project: &str, key: &ArtifactKey) -> Result<bool, LocalStorageError> {
        let path = self.entry_path(project, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(LocalStorageError::io(path, err)),
        }
    }

    pub async fn retrieve_artifact_by_id(
        &self,
        project: &str,
        id: &str,
    ) -> Result<Artifact, LocalStorageError> {
        self.retrieve_artifact(project, &ArtifactKey::Id(id.to_owned()))
            .await
    }

    pub async fn retrieve_artifact_by_tag(
        &self,
        project: &str,
        tag: &str,
    ) -> Result<Artifact, LocalStorageError> {
        self.retrieve_artifact(project, &ArtifactKey::Tag(tag.to_owned()))
            .await
    }

    /// Reads and validates a cached artifact.
    pub async fn retrieve_artifact(
        &self,
        project: &str,
        key: &ArtifactKey,
    ) -> Result<Artifact, LocalStorageError> {
        let path = self.entry_path(project, key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(LocalStorageError::NotFound {
                    project: project.to_owned(),
                    key: key.clone(),
                })
            }
            Err(err) => return Err(LocalStorageError::io(path, err)),
        };
        Artifact::from_slice(&bytes).map_err(|source| LocalStorageError::Invalid { path, source })
    }

    pub async fn create_artifact_by_id<R: AsyncRead + Unpin + ?Sized>(
        &self,
        project: &str,
        id: &str,
        stream: &mut R,
    ) -> Result<Artifact, LocalStorageError> {
        self.create_artifact(project, &ArtifactKey::Id(id.to_owned()), stream)
            .await
    }

    pub async fn create_artifact_by_tag<R: AsyncRead + Unpin + ?Sized>(
        &self,
        project: &str,
        tag: &str,
        stream: &mut R,
    ) -> Result<Artifact, LocalStorageError> {
        self.create_artifact(project, &ArtifactKey::Tag(tag.to_owned()), stream)
            .await
    }

    /// Stores the bytes of `stream` verbatim under `key`, replacing any
    /// previous entry.
    ///
    /// The bytes are staged next to the entry and only moved in place once
    /// they are a valid artifact, so a failed download never leaves a broken
    /// entry behind.
    pub async fn create_artifact<R: AsyncRead + Unpin + ?Sized>(
        &self,
        project: &str,
        key: &ArtifactKey,
        stream: &mut R,
    ) -> Result<Artifact, LocalStorageError> {
        let path = self.entry_path(project, key)?;
        let staged = stage_stream(&path, stream)
            .await
            .map_err(|err| LocalStorageError::io(&path, err))?;

        let bytes = tokio::fs::read(&staged)
            .await
            .map_err(|err| LocalStorageError::io(staged.to_path_buf(), err))?;
        let artifact = Artifact::from_slice(&bytes).map_err(|source| LocalStorageError::Invalid {
            path: path.clone(),
            source,
        })?;
        if let ArtifactKey::Id(id) = key {
            if &artifact.id != id {
                return Err(LocalStorageError::UnexpectedId {
                    expected: id.clone(),
                    found: artifact.id,
                });
            }
        }

        staged
            .persist(&path)
            .map_err(|err| LocalStorageError::io(&path, err.error))?;
        Ok(artifact)
    }

    pub async fn list_tags(&self, project: &str) -> Result<Vec<LocalEntry>, LocalStorageError> {
        validate_segment("project", project)?;
        self.list_entries(&layout::tags_prefix(project)).await
    }

    pub async fn list_ids(&self, project: &str) -> Result<Vec<LocalEntry>, LocalStorageError> {
        validate_segment("project", project)?;
        self.list_entries(&layout::ids_prefix(project)).await
    }

    /// Lists the entries of a directory, sorted by key.
    async fn list_entries(&self, prefix: &str) -> Result<Vec<LocalEntry>, LocalStorageError> {
        let dir = self.path(prefix);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LocalStorageError::io(dir, err)),
        };

        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| LocalStorageError::io(&dir, err))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|err| LocalStorageError::io(entry.path(), err))?;
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(layout::key_from_entry_name) else {
                continue;
            };
            let key = key.to_owned();
            let modified = metadata
                .modified()
                .map_err(|err| LocalStorageError::io(entry.path(), err))?;
            listed.push(LocalEntry {
                key,
                last_modified: DateTime::<Utc>::from(modified),
            });
        }
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    /// Resolves a user reference to a cached artifact, as a tag first and
    /// then as an id.
    pub async fn resolve_reference(
        &self,
        project: &str,
        reference: &str,
    ) -> Result<Option<ArtifactKey>, LocalStorageError> {
        let tag = ArtifactKey::Tag(reference.to_owned());
        if self.has(project, &tag).await? {
            return Ok(Some(tag));
        }
        let id = ArtifactKey::Id(reference.to_owned());
        if self.has(project, &id).await? {
            return Ok(Some(id));
        }
        Ok(None)
    }
}
