use std::time::Duration;

use aws_config::sts::AssumeRoleProvider;
use aws_config::SdkConfig;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::core::resources::StorageError;

fn default_session_name() -> String {
    "ethoko".to_owned()
}

/// The role assumed before talking to the object storage.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RoleConfig {
    pub role_arn: String,
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

/// Temporary credentials obtained by assuming a role.
///
/// The role is assumed on first use and the credentials are reused for the
/// lifetime of this value. They are never renewed, so a value should be
/// scoped to a single command invocation.
#[derive(Debug)]
pub struct RoleCredentialsCache {
    role: RoleConfig,
    credentials: OnceCell<Credentials>,
}

impl RoleCredentialsCache {
    pub fn new(role: RoleConfig) -> Self {
        RoleCredentialsCache {
            role,
            credentials: OnceCell::new(),
        }
    }

    pub fn role(&self) -> &RoleConfig {
        &self.role
    }

    /// Returns the cached credentials, assuming the role with the base
    /// credentials of `sdk_config` if needed.
    pub async fn credentials(&self, sdk_config: &SdkConfig) -> Result<Credentials, StorageError> {
        let credentials = self
            .credentials
            .get_or_try_init(|| async {
                log::debug!("Assuming role {}", self.role.role_arn);
                let mut builder = AssumeRoleProvider::builder(&self.role.role_arn)
                    .session_name(&self.role.session_name)
                    .configure(sdk_config);
                if let Some(external_id) = &self.role.external_id {
                    builder = builder.external_id(external_id);
                }
                if let Some(seconds) = self.role.duration_seconds {
                    builder = builder.session_length(Duration::from_secs(seconds));
                }
                let provider = builder.build().await;
                provider
                    .provide_credentials()
                    .await
                    .map_err(|err| StorageError::Credentials(err.to_string()))
            })
            .await?;
        Ok(credentials.clone())
    }
}
