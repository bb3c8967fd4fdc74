use std::path::{Path, PathBuf};

use ethoko::core::resources::layout;
use ethoko::resources::LocalStorage;
use ethoko::{
    ArtifactKey, Classify, Diff, DiffOptions, FilesystemStorageProvider,
    NonInteractiveSelection, Pull, PullOptions, Push, PushOptions, StorageConfig, StorageProvider,
    ID_LENGTH,
};

const PROJECT: &str = "doubtful-counter";

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("src/core/build_info/fixtures")
        .join(name)
}

/// Copies a fixture project into `destination` and returns its path.
fn copy_fixture(name: &str, destination: &Path) -> PathBuf {
    let source = fixture(name);
    for entry in walkdir::WalkDir::new(&source) {
        let entry = entry.unwrap();
        let target = destination.join(entry.path().strip_prefix(&source).unwrap());
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).unwrap();
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
    destination.to_path_buf()
}

async fn push(
    path: &Path,
    tag: Option<&str>,
    provider: &dyn StorageProvider,
    force: bool,
) -> Result<String, ethoko::core::actions::PushError> {
    Push::new(
        path,
        PROJECT,
        tag.map(str::to_owned),
        provider,
        &NonInteractiveSelection,
        PushOptions {
            force,
            ..Default::default()
        },
    )
    .run()
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn push_then_pull_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let project = copy_fixture("hardhat-v2", &dir.path().join("project"));
    let provider = FilesystemStorageProvider::new(dir.path().join("remote"));
    let local = LocalStorage::new(dir.path().join("local"));

    let id = push(&project, None, &provider, false).await.unwrap();
    assert_eq!(id.len(), ID_LENGTH);
    assert!(provider.has_artifact_by_id(PROJECT, &id).await.unwrap());

    let result = Pull::new(
        PROJECT,
        Some(ArtifactKey::Id(id.clone())),
        &provider,
        &local,
        PullOptions::default(),
    )
    .run()
    .await
    .unwrap();
    assert!(result.pulled_ids.contains(&id));
    assert!(local.has_id(PROJECT, &id).await.unwrap());

    let cached = local.retrieve_artifact_by_id(PROJECT, &id).await.unwrap();
    assert_eq!(cached.origin.id, "5b3e4f0c2a1d9e8f7a6b5c4d3e2f1a0b");
    assert!(cached.output.contracts["contracts/Counter.sol"].contains_key("Counter"));
}

#[tokio::test(flavor = "multi_thread")]
async fn tag_is_protected_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    let project = copy_fixture("forge-build-info", &dir.path().join("project"));
    let remote = dir.path().join("remote");
    let provider = FilesystemStorageProvider::new(&remote);

    let id = push(&project, Some("v1.0.0"), &provider, false).await.unwrap();
    let tag_entry = remote.join(layout::tag_key(PROJECT, "v1.0.0"));
    let stored = std::fs::read(&tag_entry).unwrap();

    let err = push(&project, Some("v1.0.0"), &provider, false).await.unwrap_err();
    assert!(err.is_user_actionable());
    assert!(err.to_string().contains("already exists"));
    assert_eq!(std::fs::read(&tag_entry).unwrap(), stored);
    assert_eq!(provider.list_ids(PROJECT).await.unwrap(), vec![id.clone()]);

    let forced = push(&project, Some("v1.0.0"), &provider, true).await.unwrap();
    assert_eq!(forced, id);
    assert_eq!(std::fs::read(&tag_entry).unwrap(), stored);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_without_target_fetches_every_tag() {
    let dir = tempfile::tempdir().unwrap();
    let hardhat = copy_fixture("hardhat-v3", &dir.path().join("hardhat"));
    let forge = copy_fixture("forge-default", &dir.path().join("forge"));
    let provider = StorageConfig::Local {
        root: dir.path().join("remote"),
    }
    .into_provider();
    let local = LocalStorage::new(dir.path().join("local"));

    push(&hardhat, Some("v1"), provider.as_ref(), false).await.unwrap();
    push(&forge, Some("v2"), provider.as_ref(), false).await.unwrap();

    let pull = Pull::new(PROJECT, None, provider.as_ref(), &local, PullOptions::default());
    let result = pull.run().await.unwrap();
    assert_eq!(
        result.pulled_tags.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["v1", "v2"]
    );
    assert_eq!(result.pulled_ids.len(), 2);
    for tag in ["v1", "v2"] {
        local.retrieve_artifact_by_tag(PROJECT, tag).await.unwrap();
    }

    // Everything is cached now
    let again = pull.run().await.unwrap();
    assert!(again.is_up_to_date());
    assert_eq!(again.remote_tags, result.remote_tags);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_of_unknown_target_downloads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let project = copy_fixture("hardhat-v2", &dir.path().join("project"));
    let provider = FilesystemStorageProvider::new(dir.path().join("remote"));
    let local = LocalStorage::new(dir.path().join("local"));
    push(&project, Some("v1"), &provider, false).await.unwrap();

    let err = Pull::new(
        PROJECT,
        Some(ArtifactKey::Id("000000000000".to_owned())),
        &provider,
        &local,
        PullOptions::default(),
    )
    .run()
    .await
    .unwrap_err();
    assert!(err.is_user_actionable());
    assert!(local.list_tags(PROJECT).await.unwrap().is_empty());
    assert!(local.list_ids(PROJECT).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn pushed_artifact_has_no_difference_with_its_build_info() {
    let dir = tempfile::tempdir().unwrap();
    let project = copy_fixture("forge-default", &dir.path().join("project"));
    let provider = FilesystemStorageProvider::new(dir.path().join("remote"));
    let local = LocalStorage::new(dir.path().join("local"));

    let id = push(&project, Some("latest"), &provider, false).await.unwrap();
    Pull::new(PROJECT, None, &provider, &local, PullOptions::default())
        .run()
        .await
        .unwrap();

    for reference in ["latest", id.as_str()] {
        let differences = Diff::new(
            &project,
            PROJECT,
            reference,
            &local,
            &NonInteractiveSelection,
            DiffOptions::default(),
        )
        .run()
        .await
        .unwrap();
        assert!(differences.is_empty());
    }
}
