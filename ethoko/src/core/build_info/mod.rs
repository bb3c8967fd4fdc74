//! Detection and normalization of build-tool outputs.
//!
//! Four families of build info are supported, see [`BuildInfoFormat`]. Each
//! has its own normalizer producing the pieces of a canonical [`Artifact`];
//! the content id is derived here once the pieces are assembled, so that a
//! partially normalized artifact is never handed out.
mod forge;
mod forge_default;
mod hardhat_v2;
mod hardhat_v3;
mod walk;

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::artifact::{Artifact, CompilerInput, CompilerOutput, Origin};
use crate::core::id::{derive_id, IdError};
use crate::error::{Classify, ErrorClass};

pub use forge_default::MissingSource;
pub(crate) use hardhat_v3::is_output_piece;

/// The closed set of supported build-info families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildInfoFormat {
    /// Hardhat v2: one file holding compiler input and output
    HardhatV2,
    /// Hardhat v3: an input piece and an output piece sharing one id
    HardhatV3,
    /// Foundry with `--build-info`: one consolidated file
    ForgeWithBuildInfo,
    /// Foundry default: a manifest plus one JSON file per contract
    ForgeDefault,
}

impl BuildInfoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildInfoFormat::HardhatV2 => "hardhat-v2",
            BuildInfoFormat::HardhatV3 => "hardhat-v3",
            BuildInfoFormat::ForgeWithBuildInfo => "forge-with-build-info",
            BuildInfoFormat::ForgeDefault => "forge-default",
        }
    }

    /// Sniffs the format of a parsed build-info document.
    pub fn detect(raw: &Value) -> Option<Self> {
        match raw.get("_format").and_then(Value::as_str) {
            Some(hardhat_v2::FORMAT) => return Some(BuildInfoFormat::HardhatV2),
            Some(hardhat_v3::INPUT_FORMAT) | Some(hardhat_v3::OUTPUT_FORMAT) => {
                return Some(BuildInfoFormat::HardhatV3)
            }
            Some(forge::ETHERS_FORMAT) => return Some(BuildInfoFormat::ForgeWithBuildInfo),
            _ => {}
        }
        if raw.get("source_id_to_path").is_some() {
            if raw.get("output").is_some() {
                return Some(BuildInfoFormat::ForgeWithBuildInfo);
            }
            return Some(BuildInfoFormat::ForgeDefault);
        }
        None
    }
}

impl fmt::Display for BuildInfoFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw file consumed to build an artifact, archived verbatim next to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginalContent {
    /// Where the file was read from
    pub path: PathBuf,
    /// Sanitized path under which the file is archived
    pub relative_path: String,
}

impl OriginalContent {
    /// Builds an entry whose archive path is `path` relative to `root`.
    pub fn new(root: &Path, path: &Path) -> Self {
        let relative = path.strip_prefix(root).unwrap_or(path);
        OriginalContent {
            path: path.to_path_buf(),
            relative_path: sanitize_relative_path(relative),
        }
    }
}

/// Keeps the normal components of a path only, joined with `/`.
pub fn sanitize_relative_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A fully normalized artifact and the files it was built from.
#[derive(Clone, Debug)]
pub struct NormalizedArtifact {
    pub artifact: Artifact,
    pub original_content: Vec<OriginalContent>,
}

/// What a format normalizer produces, before the id is derived.
pub(crate) struct NormalizedParts {
    pub origin: Origin,
    pub solc_long_version: String,
    pub input: CompilerInput,
    pub output: CompilerOutput,
    pub original_content: Vec<OriginalContent>,
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not a valid JSON file: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path} is not a supported build info file. Expected a Hardhat v2, Hardhat v3 or Foundry build info file.")]
    UnknownFormat { path: PathBuf },
    #[error("{path} does not match the expected {format} build info format: {source}")]
    Validation {
        format: BuildInfoFormat,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("The Hardhat v3 build info {candidate} has no {piece} piece, expected it at {expected}")]
    MissingPiece {
        piece: &'static str,
        candidate: PathBuf,
        expected: PathBuf,
    },
    #[error("The Hardhat v3 build info pieces do not belong together: input piece has id `{input_id}`, output piece has id `{output_id}`")]
    MismatchedPieces { input_id: String, output_id: String },
    #[error("Could not determine the compiler version of {path}")]
    MissingCompilerVersion { path: PathBuf },
    #[error("The Foundry build info {}", describe_missing(.manifest, .missing))]
    IncompleteReconstruction {
        manifest: PathBuf,
        missing: Vec<MissingSource>,
    },
    #[error("Failed to walk the Foundry output directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("Normalization was interrupted: {0}")]
    Interrupted(String),
}

fn describe_missing(manifest: &Path, missing: &[MissingSource]) -> String {
    let mut message = format!(
        "{} references sources whose compiled contracts were not found, make sure the project has been compiled without `--build-info` and the output directory is complete. Missing:",
        manifest.display()
    );
    for source in missing {
        message.push_str(&format!("\n  - {} (source id {})", source.path, source.id));
    }
    message
}

impl Classify for NormalizeError {
    fn class(&self) -> ErrorClass {
        match self {
            NormalizeError::Io { .. }
            | NormalizeError::Walk(_)
            | NormalizeError::Id(_)
            | NormalizeError::Interrupted(_) => ErrorClass::Internal,
            _ => ErrorClass::UserActionable,
        }
    }
}

/// Normalizes the build info at `candidate` into a canonical artifact.
pub fn normalize(candidate: &Path) -> Result<NormalizedArtifact, NormalizeError> {
    let raw: Value = read_json(candidate)?;
    let format =
        BuildInfoFormat::detect(&raw).ok_or_else(|| NormalizeError::UnknownFormat {
            path: candidate.to_path_buf(),
        })?;
    log::debug!("Detected {} build info at {}", format, candidate.display());

    let mut parts = match format {
        BuildInfoFormat::HardhatV2 => hardhat_v2::normalize(candidate, raw)?,
        BuildInfoFormat::HardhatV3 => hardhat_v3::normalize(candidate, raw)?,
        BuildInfoFormat::ForgeWithBuildInfo => forge::normalize(candidate, raw)?,
        BuildInfoFormat::ForgeDefault => forge_default::normalize(candidate, raw)?,
    };

    for contracts in parts.output.contracts.values_mut() {
        for contract in contracts.values_mut() {
            contract.normalize_bytecode();
        }
    }

    let id = derive_id(&parts.output)?;
    log::debug!("Derived artifact id {}", id);

    Ok(NormalizedArtifact {
        artifact: Artifact {
            id,
            origin: parts.origin,
            solc_long_version: parts.solc_long_version,
            input: parts.input,
            output: parts.output,
        },
        original_content: parts.original_content,
    })
}

/// Runs [`normalize`] on the blocking thread pool.
pub async fn normalize_in_background(
    candidate: PathBuf,
) -> Result<NormalizedArtifact, NormalizeError> {
    tokio::task::spawn_blocking(move || normalize(&candidate))
        .await
        .map_err(|e| NormalizeError::Interrupted(e.to_string()))?
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, NormalizeError> {
    let contents = fs::read(path).map_err(|source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&contents).map_err(|source| NormalizeError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn validate<T: DeserializeOwned>(
    format: BuildInfoFormat,
    path: &Path,
    raw: Value,
) -> Result<T, NormalizeError> {
    serde_json::from_value(raw).map_err(|source| NormalizeError::Validation {
        format,
        path: path.to_path_buf(),
        source,
    })
}

/// The directory original content is archived relative to: the parent of
/// the `build-info` directory when there is one, else the file's directory.
pub(crate) fn archive_root(candidate: &Path) -> PathBuf {
    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));
    match (parent.file_name(), parent.parent()) {
        (Some(name), Some(grand_parent)) if name == "build-info" => grand_parent.to_path_buf(),
        _ => parent.to_path_buf(),
    }
}

/// Reads the compiler version out of an embedded metadata JSON string.
pub(crate) fn compiler_version_from_metadata(metadata: &str) -> Option<String> {
    let metadata: Value = serde_json::from_str(metadata).ok()?;
    metadata
        .get("compiler")?
        .get("version")?
        .as_str()
        .map(str::to_owned)
}
