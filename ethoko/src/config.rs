//! Selection of the storage backend artifacts are pushed to and pulled from.
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::resources::StorageProvider;
use crate::resources::{
    FilesystemStorageProvider, RoleCredentialsCache, S3StorageConfig, S3StorageProvider,
};

/// The storage backend of a project, as found in a configuration file.
///
/// ```json
/// {"type": "local", "root": "/mnt/artifacts"}
/// {"type": "aws", "bucket": "artifacts", "region": "eu-west-3"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { root: PathBuf },
    Aws(S3StorageConfig),
}

impl StorageConfig {
    /// Builds the provider for this backend.
    ///
    /// Role credentials, if configured, are assumed at most once for the
    /// returned provider.
    pub fn into_provider(self) -> Box<dyn StorageProvider> {
        match self {
            StorageConfig::Local { root } => Box::new(FilesystemStorageProvider::new(root)),
            StorageConfig::Aws(config) => {
                let role = config.role.clone();
                let provider = S3StorageProvider::new(config);
                match role {
                    Some(role) => Box::new(
                        provider.with_role_credentials(Arc::new(RoleCredentialsCache::new(role))),
                    ),
                    None => Box::new(provider),
                }
            }
        }
    }
}
