use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::{
    archive_root, validate, BuildInfoFormat, NormalizeError, NormalizedParts, OriginalContent,
};
use crate::core::artifact::{CompilerInput, CompilerOutput, Origin};

pub(super) const FORMAT: &str = "hh-sol-build-info-1";

/// A Hardhat v2 build info, holding both the compiler input and output.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatV2BuildInfo {
    #[serde(rename = "_format")]
    format: String,
    id: String,
    solc_long_version: String,
    input: CompilerInput,
    output: CompilerOutput,
}

pub(super) fn normalize(candidate: &Path, raw: Value) -> Result<NormalizedParts, NormalizeError> {
    let build_info: HardhatV2BuildInfo = validate(BuildInfoFormat::HardhatV2, candidate, raw)?;

    Ok(NormalizedParts {
        origin: Origin {
            id: build_info.id,
            format: build_info.format,
            output_format: None,
        },
        solc_long_version: build_info.solc_long_version,
        input: build_info.input,
        output: build_info.output,
        original_content: vec![OriginalContent::new(&archive_root(candidate), candidate)],
    })
}
