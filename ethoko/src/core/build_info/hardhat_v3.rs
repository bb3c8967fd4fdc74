use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::{
    archive_root, read_json, validate, BuildInfoFormat, NormalizeError, NormalizedParts,
    OriginalContent,
};
use crate::core::artifact::{CompilerInput, CompilerOutput, Origin};

pub(super) const INPUT_FORMAT: &str = "hh3-sol-build-info-1";
pub(super) const OUTPUT_FORMAT: &str = "hh3-sol-build-info-output-1";

const OUTPUT_SUFFIX: &str = ".output.json";

/// The input piece of a Hardhat v3 build info.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputPiece {
    #[serde(rename = "_format")]
    format: String,
    id: String,
    solc_long_version: String,
    input: CompilerInput,
}

/// The output piece of a Hardhat v3 build info.
#[derive(Deserialize)]
struct OutputPiece {
    #[serde(rename = "_format")]
    format: String,
    id: String,
    output: CompilerOutput,
}

/// Returns the paths of the input and output pieces for either piece.
fn piece_paths(candidate: &Path) -> (PathBuf, PathBuf) {
    let file_name = candidate
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file_name.strip_suffix(OUTPUT_SUFFIX) {
        Some(stem) => (candidate.with_file_name(format!("{stem}.json")), candidate.to_path_buf()),
        None => {
            let stem = file_name.strip_suffix(".json").unwrap_or(&file_name);
            (
                candidate.to_path_buf(),
                candidate.with_file_name(format!("{stem}{OUTPUT_SUFFIX}")),
            )
        }
    }
}

/// Returns true for files that are Hardhat v3 output pieces.
pub(crate) fn is_output_piece(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(OUTPUT_SUFFIX))
        .unwrap_or(false)
}

pub(super) fn normalize(candidate: &Path, raw: Value) -> Result<NormalizedParts, NormalizeError> {
    let (input_path, output_path) = piece_paths(candidate);

    // Parse the candidate piece, then load its counterpart
    let (input_raw, output_raw) = if candidate == output_path {
        if !input_path.is_file() {
            return Err(NormalizeError::MissingPiece {
                piece: "input",
                candidate: candidate.to_path_buf(),
                expected: input_path,
            });
        }
        (read_json(&input_path)?, raw)
    } else {
        if !output_path.is_file() {
            return Err(NormalizeError::MissingPiece {
                piece: "output",
                candidate: candidate.to_path_buf(),
                expected: output_path,
            });
        }
        (raw, read_json(&output_path)?)
    };
    let input: InputPiece = validate(BuildInfoFormat::HardhatV3, &input_path, input_raw)?;
    let output: OutputPiece = validate(BuildInfoFormat::HardhatV3, &output_path, output_raw)?;

    if input.format != INPUT_FORMAT || output.format != OUTPUT_FORMAT {
        return Err(NormalizeError::UnknownFormat { path: candidate.to_path_buf() });
    }

    // The pieces are matched by their ids, never by their file names alone
    if input.id != output.id {
        return Err(NormalizeError::MismatchedPieces {
            input_id: input.id,
            output_id: output.id,
        });
    }

    let root = archive_root(&input_path);
    Ok(NormalizedParts {
        origin: Origin {
            id: input.id,
            format: input.format,
            output_format: Some(output.format),
        },
        solc_long_version: input.solc_long_version,
        input: input.input,
        output: output.output,
        original_content: vec![
            OriginalContent::new(&root, &input_path),
            OriginalContent::new(&root, &output_path),
        ],
    })
}
