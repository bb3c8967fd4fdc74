use std::collections::BTreeSet;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::core::artifact::ArtifactKey;
use crate::core::resources::{StorageError, StorageProvider};
use crate::error::{log_error_chain, surface, Classify, ErrorClass};
use crate::resources::{LocalStorage, LocalStorageError};

#[derive(Clone, Debug, Default)]
pub struct PullOptions {
    /// Download targets that are already cached
    pub force: bool,
    /// Log the full cause of a failure
    pub debug: bool,
}

/// The outcome of a pull.
///
/// Pulled and failed sets are disjoint. The remote listing is reported in
/// full so that callers can tell an up to date cache from an empty project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    pub pulled_tags: BTreeSet<String>,
    pub pulled_ids: BTreeSet<String>,
    pub failed_tags: BTreeSet<String>,
    pub failed_ids: BTreeSet<String>,
    pub remote_tags: BTreeSet<String>,
    pub remote_ids: BTreeSet<String>,
}

impl PullResult {
    /// True when nothing was pulled nor failed.
    pub fn is_up_to_date(&self) -> bool {
        self.pulled_tags.is_empty()
            && self.pulled_ids.is_empty()
            && self.failed_tags.is_empty()
            && self.failed_ids.is_empty()
    }

    fn record(&mut self, key: &ArtifactKey, pulled: bool) {
        let set = match (key, pulled) {
            (ArtifactKey::Tag(_), true) => &mut self.pulled_tags,
            (ArtifactKey::Id(_), true) => &mut self.pulled_ids,
            (ArtifactKey::Tag(_), false) => &mut self.failed_tags,
            (ArtifactKey::Id(_), false) => &mut self.failed_ids,
        };
        set.insert(key.value().to_owned());
    }
}

/// Downloads artifacts of a project into the local cache.
///
/// The target is a single tag, a single id, or every tag and id of the
/// project. Targets are downloaded concurrently and independently: a failed
/// download is reported in the result and does not affect the others.
pub struct Pull<'a, P: StorageProvider + ?Sized> {
    pub project: String,
    /// Pull everything when `None`
    pub target: Option<ArtifactKey>,
    pub provider: &'a P,
    pub local: &'a LocalStorage,
    pub options: PullOptions,
}

#[derive(Error, Debug)]
pub enum PullError {
    #[error("The {target} does not exist in project `{project}`. Pull without target to fetch every available tag and id")]
    TargetNotFound { project: String, target: ArtifactKey },
    #[error("{}", surface(.0, "listing the remote artifacts"))]
    Storage(#[source] StorageError),
    #[error("{}", surface(.0, "preparing the local cache"))]
    LocalStorage(#[source] LocalStorageError),
}

impl Classify for PullError {
    fn class(&self) -> ErrorClass {
        match self {
            PullError::TargetNotFound { .. } => ErrorClass::UserActionable,
            PullError::Storage(err) => err.class(),
            PullError::LocalStorage(err) => err.class(),
        }
    }
}

/// Why a single target failed to be pulled.
#[derive(Error, Debug)]
enum PullItemError {
    #[error(transparent)]
    Download(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] LocalStorageError),
}

impl<'a, P: StorageProvider + ?Sized> Pull<'a, P> {
    pub fn new(
        project: impl Into<String>,
        target: Option<ArtifactKey>,
        provider: &'a P,
        local: &'a LocalStorage,
        options: PullOptions,
    ) -> Self {
        Self {
            project: project.into(),
            target,
            provider,
            local,
            options,
        }
    }

    pub async fn run(&self) -> Result<PullResult, PullError> {
        let result = self.pull().await;
        if let Err(err) = &result {
            if self.options.debug {
                log_error_chain(err);
            }
        }
        result
    }

    async fn pull(&self) -> Result<PullResult, PullError> {
        // List the remote artifacts
        let (remote_tags, remote_ids) = futures::try_join!(
            self.provider.list_tags(&self.project),
            self.provider.list_ids(&self.project)
        )
        .map_err(PullError::Storage)?;
        let mut result = PullResult {
            remote_tags: remote_tags.into_iter().collect(),
            remote_ids: remote_ids.into_iter().collect(),
            ..Default::default()
        };

        // Resolve the targets, before anything is downloaded
        let targets: Vec<ArtifactKey> = match &self.target {
            Some(target) => {
                let known = match target {
                    ArtifactKey::Tag(tag) => result.remote_tags.contains(tag),
                    ArtifactKey::Id(id) => result.remote_ids.contains(id),
                };
                if !known {
                    return Err(PullError::TargetNotFound {
                        project: self.project.clone(),
                        target: target.clone(),
                    });
                }
                vec![target.clone()]
            }
            None => result
                .remote_tags
                .iter()
                .cloned()
                .map(ArtifactKey::Tag)
                .chain(result.remote_ids.iter().cloned().map(ArtifactKey::Id))
                .collect(),
        };

        // Skip what is already cached
        let mut missing = Vec::with_capacity(targets.len());
        for target in targets {
            let cached = self
                .local
                .has(&self.project, &target)
                .await
                .map_err(PullError::LocalStorage)?;
            if self.options.force || !cached {
                missing.push(target);
            }
        }
        if missing.is_empty() {
            log::debug!("Project {} is up to date", self.project);
            return Ok(result);
        }

        self.local
            .ensure_project_setup(&self.project)
            .await
            .map_err(PullError::LocalStorage)?;

        // Download every target, waiting for all of them to settle
        let outcomes = join_all(
            missing
                .iter()
                .map(|target| async move { (target, self.pull_one(target).await) }),
        )
        .await;
        for (target, outcome) in outcomes {
            if let Err(err) = &outcome {
                log::warn!("Failed to pull {}: {}", target, err);
                if self.options.debug {
                    log_error_chain(err);
                }
            }
            result.record(target, outcome.is_ok());
        }

        log::info!(
            "Pulled {} tags and {} ids of project {}",
            result.pulled_tags.len(),
            result.pulled_ids.len(),
            self.project
        );
        Ok(result)
    }

    async fn pull_one(&self, target: &ArtifactKey) -> Result<(), PullItemError> {
        let mut stream = match target {
            ArtifactKey::Tag(tag) => {
                self.provider
                    .download_artifact_by_tag(&self.project, tag)
                    .await?
            }
            ArtifactKey::Id(id) => {
                self.provider
                    .download_artifact_by_id(&self.project, id)
                    .await?
            }
        };
        self.local
            .create_artifact(&self.project, target, &mut stream)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::tests::sample_artifact;
    use crate::resources::FilesystemStorageProvider;

    async fn remote_with_two_tags(root: &std::path::Path) -> (FilesystemStorageProvider, String) {
        let provider = FilesystemStorageProvider::new(root);
        let first = sample_artifact("6080604052", 200);
        let second = sample_artifact("6080604053", 200);
        provider.upload_artifact("doubtful", &first, Some("v1"), &[]).await.unwrap();
        provider.upload_artifact("doubtful", &second, Some("v2"), &[]).await.unwrap();
        (provider, first.id)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn can_pull_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, _) = remote_with_two_tags(&dir.path().join("remote")).await;
        let local = LocalStorage::new(dir.path().join("local"));

        let result = Pull::new("doubtful", None, &provider, &local, PullOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(result.pulled_tags, BTreeSet::from(["v1".to_owned(), "v2".to_owned()]));
        assert_eq!(result.pulled_ids.len(), 2);
        assert!(result.failed_tags.is_empty() && result.failed_ids.is_empty());
        assert_eq!(result.remote_tags, result.pulled_tags);
        local.retrieve_artifact_by_tag("doubtful", "v1").await.unwrap();
        local.retrieve_artifact_by_tag("doubtful", "v2").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cached_targets_need_force() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, id) = remote_with_two_tags(&dir.path().join("remote")).await;
        let local = LocalStorage::new(dir.path().join("local"));
        let target = Some(ArtifactKey::Id(id.clone()));

        let mut pull = Pull::new("doubtful", target, &provider, &local, PullOptions::default());
        assert_eq!(pull.run().await.unwrap().pulled_ids, BTreeSet::from([id.clone()]));

        let again = pull.run().await.unwrap();
        assert!(again.is_up_to_date());
        assert_eq!(again.remote_ids.len(), 2);

        pull.options.force = true;
        assert_eq!(pull.run().await.unwrap().pulled_ids, BTreeSet::from([id]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_target_fails_before_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, _) = remote_with_two_tags(&dir.path().join("remote")).await;
        let local = LocalStorage::new(dir.path().join("local"));

        let err = Pull::new(
            "doubtful",
            Some(ArtifactKey::Tag("v3".to_owned())),
            &provider,
            &local,
            PullOptions::default(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, PullError::TargetNotFound { .. }));
        assert!(err.is_user_actionable());
        assert!(!dir.path().join("local").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_download_does_not_abort_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote");
        let (provider, _) = remote_with_two_tags(&remote).await;
        std::fs::write(remote.join("projects/doubtful/tags/v2.json"), "corrupted").unwrap();
        let local = LocalStorage::new(dir.path().join("local"));

        let result = Pull::new("doubtful", None, &provider, &local, PullOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(result.pulled_tags, BTreeSet::from(["v1".to_owned()]));
        assert_eq!(result.failed_tags, BTreeSet::from(["v2".to_owned()]));
        assert_eq!(result.pulled_ids.len(), 2);
        assert!(!local.has_tag("doubtful", "v2").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dot_prefixed_tag_is_never_stored() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, _) = remote_with_two_tags(&dir.path().join("remote")).await;
        let local = LocalStorage::new(dir.path().join("local"));
        let artifact = sample_artifact("6080604054", 200);

        let err = provider
            .upload_artifact("doubtful", &artifact, Some(".rc"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { kind: "tag", .. }));
        assert!(!provider.has_artifact_by_id("doubtful", &artifact.id).await.unwrap());

        let err = Pull::new(
            "doubtful",
            Some(ArtifactKey::Tag(".rc".to_owned())),
            &provider,
            &local,
            PullOptions::default(),
        )
        .run()
        .await
        .unwrap_err();
        assert!(matches!(err, PullError::TargetNotFound { .. }));
        assert!(!dir.path().join("local").exists());
    }
}
