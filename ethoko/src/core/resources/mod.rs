pub mod layout;
pub mod selection;
pub mod storage;

pub use selection::{SelectionError, SelectionResolver};
pub use storage::{ArtifactStream, StorageError, StorageProvider};
