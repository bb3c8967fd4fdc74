use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    archive_root, compiler_version_from_metadata, validate, BuildInfoFormat, NormalizeError,
    NormalizedParts, OriginalContent,
};
use crate::core::artifact::{CompilerInput, CompilerOutput, Origin};

/// Format declared by build infos written by older Foundry versions.
pub(super) const ETHERS_FORMAT: &str = "ethers-rs-sol-build-info-1";

/// A Foundry build info written with `--build-info`.
#[derive(Deserialize)]
struct ForgeBuildInfo {
    #[serde(rename = "_format", default)]
    format: Option<String>,
    id: String,
    #[serde(rename = "solcLongVersion", default)]
    solc_long_version: Option<String>,
    input: ForgeInput,
    output: CompilerOutput,
}

#[derive(Deserialize)]
struct ForgeInput {
    #[serde(default)]
    version: Option<String>,
    language: String,
    #[serde(default)]
    sources: BTreeMap<String, Value>,
    #[serde(default)]
    settings: Map<String, Value>,
}

pub(super) fn normalize(candidate: &Path, raw: Value) -> Result<NormalizedParts, NormalizeError> {
    let build_info: ForgeBuildInfo =
        validate(BuildInfoFormat::ForgeWithBuildInfo, candidate, raw)?;

    // Prefer the declared long version, then the one embedded in the metadata
    let solc_long_version = build_info
        .solc_long_version
        .clone()
        .or_else(|| {
            build_info
                .output
                .contracts
                .values()
                .flat_map(|contracts| contracts.values())
                .find_map(|contract| {
                    contract
                        .metadata
                        .as_deref()
                        .and_then(compiler_version_from_metadata)
                })
        })
        .or_else(|| build_info.input.version.clone())
        .ok_or_else(|| NormalizeError::MissingCompilerVersion {
            path: candidate.to_path_buf(),
        })?;

    Ok(NormalizedParts {
        origin: Origin {
            id: build_info.id,
            format: build_info
                .format
                .unwrap_or_else(|| BuildInfoFormat::ForgeWithBuildInfo.to_string()),
            output_format: None,
        },
        solc_long_version,
        input: CompilerInput {
            language: build_info.input.language,
            sources: build_info.input.sources,
            settings: build_info.input.settings,
        },
        output: build_info.output,
        original_content: vec![OriginalContent::new(&archive_root(candidate), candidate)],
    })
}
