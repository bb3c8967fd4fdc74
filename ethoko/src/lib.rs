//! Versioned storage for compiled smart-contract artifacts.
//!
//! Build outputs of Hardhat (v2 and v3) and Foundry are normalized into a
//! single canonical [`Artifact`], identified by a content id derived from
//! its compiled output, and stored through a [`StorageProvider`] under an
//! immutable id and optionally a mutable tag. The [`Push`], [`Pull`] and
//! [`Diff`] actions orchestrate the three main workflows, while [`List`],
//! [`Inspect`] and [`Export`] query the [`LocalStorage`] cache.
#[cfg(test)]
#[macro_use]
mod macros;

pub mod config;
pub mod core;
pub mod error;
pub mod resources;

pub use crate::config::StorageConfig;
pub use crate::core::actions::{
    Diff, DiffOptions, Difference, DifferenceKind, Export, Inspect, List, Pull, PullOptions,
    PullResult, Push, PushOptions,
};
pub use crate::core::artifact::{Artifact, ArtifactKey, CompiledContract, Origin};
pub use crate::core::build_info::{normalize, BuildInfoFormat, NormalizedArtifact};
pub use crate::core::id::{derive_id, ID_LENGTH};
pub use crate::core::resources::{SelectionResolver, StorageProvider};
pub use crate::error::{Classify, ErrorClass};
pub use crate::resources::{
    FilesystemStorageProvider, LocalStorage, NonInteractiveSelection, RoleCredentialsCache,
    S3StorageProvider,
};
