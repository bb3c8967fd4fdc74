//! Implementations of the capability traits defined in [`crate::core::resources`].
mod atomic;
pub mod credentials;
pub mod filesystem_storage;
pub mod local_storage;
pub mod s3_storage;
pub mod selection;

pub use credentials::{RoleConfig, RoleCredentialsCache};
pub use filesystem_storage::FilesystemStorageProvider;
pub use local_storage::{LocalEntry, LocalStorage, LocalStorageError};
pub use s3_storage::{S3StorageConfig, S3StorageProvider};
pub use selection::NonInteractiveSelection;
