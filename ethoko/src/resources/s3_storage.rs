use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::credentials::{RoleConfig, RoleCredentialsCache};
use crate::core::artifact::{Artifact, ArtifactKey};
use crate::core::build_info::OriginalContent;
use crate::core::resources::layout;
use crate::core::resources::storage::{validate_key, validate_segment};
use crate::core::resources::{ArtifactStream, StorageError, StorageProvider};

/// Connection settings of an S3 compatible bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Prepended to every key, without trailing slash.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub role: Option<RoleConfig>,
}

/// A [`StorageProvider`] backed by an S3 compatible bucket.
///
/// The client is created on first use. When a [`RoleCredentialsCache`] is
/// given, requests are signed with the credentials of the assumed role.
#[derive(Debug)]
pub struct S3StorageProvider {
    config: S3StorageConfig,
    role_credentials: Option<Arc<RoleCredentialsCache>>,
    client: OnceCell<Client>,
}

impl S3StorageProvider {
    pub fn new(config: S3StorageConfig) -> Self {
        S3StorageProvider {
            config,
            role_credentials: None,
            client: OnceCell::new(),
        }
    }

    pub fn with_role_credentials(mut self, cache: Arc<RoleCredentialsCache>) -> Self {
        self.role_credentials = Some(cache);
        self
    }

    async fn client(&self) -> Result<&Client, StorageError> {
        self.client
            .get_or_try_init(|| async {
                let mut loader = aws_config::defaults(BehaviorVersion::latest());
                if let Some(region) = &self.config.region {
                    loader = loader.region(Region::new(region.clone()));
                }
                if let (Some(access_key_id), Some(secret_access_key)) =
                    (&self.config.access_key_id, &self.config.secret_access_key)
                {
                    loader = loader.credentials_provider(Credentials::new(
                        access_key_id,
                        secret_access_key,
                        self.config.session_token.clone(),
                        None,
                        "ethoko",
                    ));
                }
                let sdk_config = loader.load().await;

                let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .force_path_style(self.config.force_path_style);
                if let Some(endpoint_url) = &self.config.endpoint_url {
                    builder = builder.endpoint_url(endpoint_url);
                }
                if let Some(cache) = &self.role_credentials {
                    builder = builder.credentials_provider(cache.credentials(&sdk_config).await?);
                }
                Ok(Client::from_conf(builder.build()))
            })
            .await
    }

    /// Returns the object key of a layout key.
    fn object_key(&self, key: &str) -> String {
        match self.config.prefix.as_deref().map(|prefix| prefix.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
            _ => key.to_owned(),
        }
    }

    /// Lists the entries directly under a layout prefix.
    async fn list_entries(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let client = self.client().await?;
        let prefix = format!("{}/", self.object_key(prefix));

        let mut keys = Vec::new();
        let mut pages = client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(&prefix)
            .delimiter("/")
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|err| StorageError::object_storage("ListObjectsV2", &prefix, err))?;
            for object in page.contents() {
                let name = object.key().and_then(|key| key.strip_prefix(&prefix));
                if let Some(key) = name.and_then(layout::key_from_entry_name) {
                    keys.push(key.to_owned());
                }
            }
        }
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let client = self.client().await?;
        let key = self.object_key(key);
        match client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map_or(false, |err| err.is_not_found()) {
                    Ok(false)
                } else {
                    Err(StorageError::object_storage("HeadObject", key, err))
                }
            }
        }
    }

    async fn put(&self, key: &str, body: ByteStream) -> Result<(), StorageError> {
        let client = self.client().await?;
        let key = self.object_key(key);
        client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|err| StorageError::object_storage("PutObject", key, err))?;
        Ok(())
    }

    async fn get(&self, project: &str, key: ArtifactKey) -> Result<ArtifactStream, StorageError> {
        validate_key(project, &key)?;
        let client = self.client().await?;
        let object_key = self.object_key(&layout::artifact_key(project, &key));
        match client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(err) => {
                if err.as_service_error().map_or(false, |err| err.is_no_such_key()) {
                    Err(StorageError::NotFound {
                        project: project.to_owned(),
                        key,
                    })
                } else {
                    Err(StorageError::object_storage("GetObject", object_key, err))
                }
            }
        }
    }
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
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
                let body = ByteStream::from_path(&content.path)
                    .await
                    .map_err(|err| {
                        StorageError::object_storage(
                            "ReadOriginalContent",
                            content.path.display().to_string(),
                            err,
                        )
                    })?;
                let key =
                    layout::original_content_key(project, &artifact.id, &content.relative_path);
                self.put(&key, body).await?;
            }
            self.put(&id_key, ByteStream::from(bytes.clone())).await?;
        }

        if let Some(tag) = tag {
            self.put(&layout::tag_key(project, tag), ByteStream::from(bytes))
                .await?;
        }
        Ok(())
    }

    async fn download_artifact_by_id(
        &self,
        project: &str,
        id: &str,
    ) -> Result<ArtifactStream, StorageError> {
        self.get(project, ArtifactKey::Id(id.to_owned())).await
    }

    async fn download_artifact_by_tag(
        &self,
        project: &str,
        tag: &str,
    ) -> Result<ArtifactStream, StorageError> {
        self.get(project, ArtifactKey::Tag(tag.to_owned())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(prefix: Option<&str>) -> S3StorageProvider {
        S3StorageProvider::new(S3StorageConfig {
            bucket: "artifacts".to_owned(),
            prefix: prefix.map(str::to_owned),
            ..Default::default()
        })
    }

    #[test]
    fn can_prefix_object_keys() {
        let key = layout::tag_key("doubtful", "v1");
        assert_eq!(provider(None).object_key(&key), "projects/doubtful/tags/v1.json");
        assert_eq!(provider(Some("")).object_key(&key), "projects/doubtful/tags/v1.json");
        assert_eq!(
            provider(Some("team/")).object_key(&key),
            "team/projects/doubtful/tags/v1.json"
        );
    }

    #[test]
    fn can_deserialize_config() {
        let config: S3StorageConfig = serde_json::from_str(
            r#"{
                "bucket": "artifacts",
                "region": "eu-west-3",
                "endpoint_url": "http://localhost:9000",
                "force_path_style": true,
                "role": {"role_arn": "arn:aws:iam::123456789012:role/artifacts", "duration_seconds": 900}
            }"#,
        )
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-3"));
        assert!(config.force_path_style);
        assert_eq!(config.role.unwrap().duration_seconds, Some(900));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_invalid_keys_before_any_request() {
        let err = provider(None)
            .has_artifact_by_tag("doubtful", "a/b")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { kind: "tag", .. }));
    }
}
