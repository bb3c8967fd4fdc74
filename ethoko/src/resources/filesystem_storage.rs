use std::path::PathBuf;

use async_trait::async_trait;

use super::atomic::write_atomically;
use crate::core::artifact::{Artifact, ArtifactKey};
use crate::core::build_info::OriginalContent;
use crate::core::resources::layout;
use crate::core::resources::storage::{validate_key, validate_segment};
use crate::core::resources::{ArtifactStream, StorageError, StorageProvider};

/// A [`StorageProvider`] backed by a directory on the local filesystem.
///
/// Mostly used for testing and for sharing artifacts through a network mount.
#[derive(Clone, Debug)]
pub struct FilesystemStorageProvider {
    root: PathBuf,
}

impl FilesystemStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStorageProvider { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    async fn list_entries(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.path(prefix);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(dir, err)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StorageError::io(&dir, err))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| StorageError::io(entry.path(), err))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(layout::key_from_entry_name) {
                keys.push(key.to_owned());
            }
        }
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path(key);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::io(path, err)),
        }
    }

    async fn open(&self, project: &str, key: ArtifactKey) -> Result<ArtifactStream, StorageError> {
        validate_key(project, &key)?;
        let path = self.path(&layout::artifact_key(project, &key));
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                project: project.to_owned(),
                key,
            }),
            Err(err) => Err(StorageError::io(path, err)),
        }
    }
}

#[async_trait]
impl StorageProvider for FilesystemStorageProvider {
    async fn list_tags(&self, project: &str) -> Result<Vec<String>, StorageError> {
        validate_segment("project", project)?;
        self.list_entries(&layout::tags_prefix(project)).await
    }

    async fn list_ids(&self, project: &str) -> Result<Vec<String>, StorageError> {
        validate_segment("project", project)?;
        self.list_entries(&layout::ids_prefix(project)).await
    }

    async fn has_artifact_by_tag(&self, project: &str, tag: &str) -> Result<bool, StorageError> {
        validate_key(project, &ArtifactKey::Tag(tag.to_owned()))?;
        self.exists(&layout::tag_key(project, tag)).await
    }

    async fn has_artifact_by_id(&self, project: &str, id: &str) -> Result<bool, StorageError> {
        validate_key(project, &ArtifactKey::Id(id.to_owned()))?;
        self.exists(&layout::id_key(project, id)).await
    }

    async fn upload_artifact(
        &self,
        project: &str,
        artifact: &Artifact,
        tag: Option<&str>,
        original_content: &[OriginalContent],
    ) -> Result<(), StorageError> {
        validate_key(project, &ArtifactKey::Id(artifact.id.clone()))?;
        if let Some(tag) = tag {
            validate_segment("tag", tag)?;
        }
        let bytes = artifact.to_json_vec()?;

        let id_key = layout::id_key(project, &artifact.id);
        if self.exists(&id_key).await? {
            log::debug!("Artifact {} is already stored, skipping its upload", artifact.id);
        } else {
            // Archive the original content first, the id entry marks a complete upload
            for content in original_content {
                let destination = self.path(&layout::original_content_key(
                    project,
                    &artifact.id,
                    &content.relative_path,
                ));
                if let Some(dir) = destination.parent() {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .map_err(|err| StorageError::io(dir, err))?;
                }
                tokio::fs::copy(&content.path, &destination)
                    .await
                    .map_err(|err| StorageError::io(&content.path, err))?;
            }

            let path = self.path(&id_key);
            write_atomically(&path, &bytes)
                .await
                .map_err(|err| StorageError::io(path, err))?;
        }

        if let Some(tag) = tag {
            let path = self.path(&layout::tag_key(project, tag));
            write_atomically(&path, &bytes)
                .await
                .map_err(|err| StorageError::io(path, err))?;
        }
        Ok(())
    }

    async fn download_artifact_by_id(
        &self,
        project: &str,
        id: &str,
    ) -> Result<ArtifactStream, StorageError> {
        self.open(project, ArtifactKey::Id(id.to_owned())).await
    }

    async fn download_artifact_by_tag(
        &self,
        project: &str,
        tag: &str,
    ) -> Result<ArtifactStream, StorageError> {
        self.open(project, ArtifactKey::Tag(tag.to_owned())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::tests::sample_artifact;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut stream: ArtifactStream) -> Vec<u8> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn can_upload_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemStorageProvider::new(dir.path().join("store"));
        let artifact = sample_artifact("6080604052", 200);

        let original = dir.path().join("build-info.json");
        std::fs::write(&original, "{}").unwrap();
        let content = OriginalContent {
            path: original,
            relative_path: "build-info/build-info.json".to_owned(),
        };

        provider
            .upload_artifact("doubtful", &artifact, Some("v1"), &[content])
            .await
            .unwrap();

        assert!(provider.has_artifact_by_tag("doubtful", "v1").await.unwrap());
        assert!(provider.has_artifact_by_id("doubtful", &artifact.id).await.unwrap());
        assert!(!provider.has_artifact_by_tag("doubtful", "v2").await.unwrap());
        assert_eq!(provider.list_tags("doubtful").await.unwrap(), vec!["v1"]);
        assert_eq!(provider.list_ids("doubtful").await.unwrap(), vec![artifact.id.clone()]);

        let archived = dir.path().join(format!(
            "store/projects/doubtful/ids/{}/original-content/build-info/build-info.json",
            artifact.id
        ));
        assert!(archived.is_file());

        let by_tag = read_all(provider.download_artifact_by_tag("doubtful", "v1").await.unwrap()).await;
        let by_id = read_all(
            provider
                .download_artifact_by_id("doubtful", &artifact.id)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(by_tag, by_id);
        assert_eq!(Artifact::from_slice(&by_tag).unwrap(), artifact);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_project_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemStorageProvider::new(dir.path());
        assert!(provider.list_tags("missing").await.unwrap().is_empty());
        assert!(provider.list_ids("missing").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemStorageProvider::new(dir.path());
        let err = match provider.download_artifact_by_tag("doubtful", "v1").await {
            Err(err) => err,
            Ok(_) => panic!("expected the download to fail"),
        };
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_invalid_segments() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemStorageProvider::new(dir.path());
        let err = provider.has_artifact_by_tag("doubtful", "../v1").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { kind: "tag", .. }));
        let err = provider.list_ids("").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { kind: "project", .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn existing_id_is_kept_and_tag_is_moved() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FilesystemStorageProvider::new(dir.path());
        let first = sample_artifact("6080604052", 200);
        let second = sample_artifact("6080604053", 200);

        provider.upload_artifact("doubtful", &first, Some("latest"), &[]).await.unwrap();
        let id_entry = dir.path().join(format!("projects/doubtful/ids/{}.json", first.id));
        let stored = std::fs::read(&id_entry).unwrap();

        provider.upload_artifact("doubtful", &first, None, &[]).await.unwrap();
        assert_eq!(std::fs::read(&id_entry).unwrap(), stored);

        provider.upload_artifact("doubtful", &second, Some("latest"), &[]).await.unwrap();
        let by_tag = read_all(provider.download_artifact_by_tag("doubtful", "latest").await.unwrap()).await;
        assert_eq!(Artifact::from_slice(&by_tag).unwrap().id, second.id);
        assert_eq!(provider.list_ids("doubtful").await.unwrap().len(), 2);
    }
}
