//! Reconstruction of a Foundry build compiled without `--build-info`.
//!
//! The build info only maps the internal source ids of the compilation to
//! source paths. The compiled output is scattered in one JSON file per
//! contract across the output directory, and each of these files carries its
//! own copy of the compiler settings in its embedded metadata. The files are
//! gathered back into a single compiler input and output; a reconstruction
//! missing any source of the manifest is rejected.
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::walk::contract_artifact_candidates;
use super::{validate, BuildInfoFormat, NormalizeError, NormalizedParts, OriginalContent};
use crate::core::artifact::{
    Bytecode, CompiledContract, CompilerInput, CompilerOutput, Evm, Origin,
};

/// The build info written by Foundry by default.
#[derive(Deserialize)]
struct ForgeManifest {
    id: String,
    source_id_to_path: BTreeMap<String, String>,
    #[serde(default)]
    language: Option<String>,
}

/// A per-contract output file, e.g. `out/Counter.sol/Counter.json`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractArtifact {
    #[serde(default)]
    abi: Vec<Value>,
    #[serde(default)]
    bytecode: Option<Bytecode>,
    #[serde(default)]
    deployed_bytecode: Option<Bytecode>,
    #[serde(default)]
    method_identifiers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    raw_metadata: Option<String>,
    #[serde(default)]
    storage_layout: Option<Value>,
    metadata: ContractMetadata,
    /// Internal source id of the compilation this file belongs to
    id: u64,
}

#[derive(Deserialize)]
struct ContractMetadata {
    compiler: MetadataCompiler,
    language: String,
    #[serde(default)]
    output: MetadataOutput,
    settings: MetadataSettings,
    #[serde(default)]
    sources: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct MetadataCompiler {
    version: String,
}

#[derive(Default, Deserialize)]
struct MetadataOutput {
    #[serde(default)]
    userdoc: Option<Value>,
    #[serde(default)]
    devdoc: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataSettings {
    #[serde(default)]
    compilation_target: BTreeMap<String, String>,
    #[serde(default)]
    evm_version: Option<Value>,
    #[serde(default)]
    libraries: BTreeMap<String, String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    optimizer: Option<Value>,
    #[serde(default)]
    remappings: Option<Value>,
    #[serde(rename = "viaIR", default)]
    via_ir: Option<Value>,
}

/// A source of the manifest without any compiled contract on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingSource {
    pub path: String,
    pub id: String,
}

/// State accumulated while walking the per-contract files.
#[derive(Default)]
struct Reconstruction {
    solc_long_version: Option<String>,
    language: Option<String>,
    optimizer: Option<Value>,
    evm_version: Option<Value>,
    via_ir: Option<Value>,
    remappings: Option<Value>,
    metadata: Option<Value>,
    sources: BTreeMap<String, Value>,
    /// file => library name => address
    libraries: BTreeMap<String, BTreeMap<String, String>>,
    contracts: BTreeMap<String, BTreeMap<String, CompiledContract>>,
    /// (source id, source path) pairs of the manifest seen so far
    visited: BTreeSet<(String, String)>,
    original_content: Vec<OriginalContent>,
}

impl Reconstruction {
    /// Merges one per-contract file, first write wins for scalar settings.
    fn merge(
        &mut self,
        source_id: String,
        source_path: String,
        contract_name: String,
        artifact: ContractArtifact,
    ) {
        let ContractArtifact {
            abi,
            bytecode,
            deployed_bytecode,
            method_identifiers,
            raw_metadata,
            storage_layout,
            metadata,
            ..
        } = artifact;
        let settings = metadata.settings;

        self.solc_long_version.get_or_insert(metadata.compiler.version);
        self.language.get_or_insert(metadata.language);
        first_write_wins(&mut self.optimizer, settings.optimizer);
        first_write_wins(&mut self.evm_version, settings.evm_version);
        first_write_wins(&mut self.via_ir, settings.via_ir);
        first_write_wins(&mut self.remappings, settings.remappings);
        first_write_wins(&mut self.metadata, settings.metadata);

        for (path, source) in metadata.sources {
            self.sources.entry(path).or_insert(source);
        }

        // Library tables are keyed `file:libraryName`
        for (key, address) in settings.libraries {
            if let Some((file, library)) = key.rsplit_once(':') {
                self.libraries
                    .entry(file.to_owned())
                    .or_default()
                    .entry(library.to_owned())
                    .or_insert(address);
            }
        }

        let mut contract = CompiledContract {
            abi,
            metadata: raw_metadata,
            userdoc: metadata.output.userdoc,
            devdoc: metadata.output.devdoc,
            evm: Some(Evm {
                bytecode,
                deployed_bytecode,
                method_identifiers,
                other: BTreeMap::new(),
            }),
            storage_layout,
            other: BTreeMap::new(),
        };
        contract.normalize_bytecode();

        self.contracts
            .entry(source_path.clone())
            .or_default()
            .insert(contract_name, contract);
        self.visited.insert((source_id, source_path));
    }

    fn has_contract(&self, source_path: &str, contract_name: &str) -> bool {
        self.contracts
            .get(source_path)
            .map_or(false, |contracts| contracts.contains_key(contract_name))
    }

    fn settings(&self) -> Map<String, Value> {
        let mut settings = Map::new();
        let scalars = [
            ("optimizer", &self.optimizer),
            ("evmVersion", &self.evm_version),
            ("viaIR", &self.via_ir),
            ("remappings", &self.remappings),
            ("metadata", &self.metadata),
        ];
        for (key, value) in scalars {
            if let Some(value) = value {
                settings.insert(key.to_owned(), value.clone());
            }
        }
        if !self.libraries.is_empty() {
            let libraries = self
                .libraries
                .iter()
                .map(|(file, libraries)| {
                    let libraries = libraries
                        .iter()
                        .map(|(name, address)| (name.clone(), Value::String(address.clone())))
                        .collect();
                    (file.clone(), Value::Object(libraries))
                })
                .collect();
            settings.insert("libraries".to_owned(), Value::Object(libraries));
        }
        settings
    }
}

fn first_write_wins(slot: &mut Option<Value>, value: Option<Value>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Reads a candidate file, returning `None` for files that are not
/// per-contract outputs.
fn read_contract_artifact(path: &Path) -> Result<Option<ContractArtifact>, NormalizeError> {
    let contents = fs::read(path).map_err(|source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_slice(&contents) {
        Ok(artifact) => Ok(Some(artifact)),
        Err(err) => {
            log::debug!("Skipping {}, not a contract output: {}", path.display(), err);
            Ok(None)
        }
    }
}

pub(super) fn normalize(candidate: &Path, raw: Value) -> Result<NormalizedParts, NormalizeError> {
    let manifest: ForgeManifest = validate(BuildInfoFormat::ForgeDefault, candidate, raw)?;

    // The build info lives in `<out>/<dir>`, the contract files in `<out>`
    let build_info_dir = candidate
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let output_dir = build_info_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| build_info_dir.clone());

    let expected: BTreeSet<(String, String)> = manifest
        .source_id_to_path
        .iter()
        .map(|(id, path)| (id.clone(), path.clone()))
        .collect();

    let mut reconstruction = Reconstruction::default();
    reconstruction
        .original_content
        .push(OriginalContent::new(&output_dir, candidate));

    for entry in contract_artifact_candidates(&output_dir, &build_info_dir) {
        let path = entry?;
        let Some(artifact) = read_contract_artifact(&path)? else {
            continue;
        };

        // A contract file has exactly one compilation target
        let mut targets = artifact.metadata.settings.compilation_target.iter();
        let (source_path, contract_name) = match (targets.next(), targets.next()) {
            (Some((source_path, contract_name)), None) => {
                (source_path.clone(), contract_name.clone())
            }
            _ => {
                log::debug!(
                    "Skipping {}, expected exactly one compilation target",
                    path.display()
                );
                continue;
            }
        };

        // Files of other compilations share the output directory
        let source_id = artifact.id.to_string();
        if !expected.contains(&(source_id.clone(), source_path.clone())) {
            log::debug!(
                "Skipping {}, {} (source id {}) is not part of build {}",
                path.display(),
                source_path,
                source_id,
                manifest.id
            );
            continue;
        }

        if reconstruction.has_contract(&source_path, &contract_name) {
            log::warn!(
                "Ignoring {}, {}:{} was already read from an earlier file",
                path.display(),
                source_path,
                contract_name
            );
            continue;
        }

        reconstruction
            .original_content
            .push(OriginalContent::new(&output_dir, &path));
        reconstruction.merge(source_id, source_path, contract_name, artifact);
    }

    if reconstruction.visited.len() != expected.len() {
        let missing = expected
            .difference(&reconstruction.visited)
            .map(|(id, path)| MissingSource {
                path: path.clone(),
                id: id.clone(),
            })
            .collect();
        return Err(NormalizeError::IncompleteReconstruction {
            manifest: candidate.to_path_buf(),
            missing,
        });
    }

    let settings = reconstruction.settings();
    let solc_long_version = reconstruction.solc_long_version.ok_or_else(|| {
        NormalizeError::MissingCompilerVersion {
            path: candidate.to_path_buf(),
        }
    })?;
    let language = reconstruction
        .language
        .or(manifest.language)
        .unwrap_or_else(|| "Solidity".to_owned());

    Ok(NormalizedParts {
        origin: Origin {
            id: manifest.id,
            format: BuildInfoFormat::ForgeDefault.to_string(),
            output_format: None,
        },
        solc_long_version,
        input: CompilerInput {
            language,
            sources: reconstruction.sources,
            settings,
        },
        output: CompilerOutput {
            contracts: reconstruction.contracts,
        },
        original_content: reconstruction.original_content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::build_info::normalize;
    use crate::core::build_info::tests::copy_fixture;
    use serde_json::json;

    const MANIFEST: &str = "out/build-info/7c1d2e3f4a5b6c7d.json";

    #[test]
    fn can_reconstruct_forge_default_build() {
        let path = PathBuf::from(test_fixture!(
            "core/build_info",
            format!("forge-default/{MANIFEST}")
        ));
        let normalized = normalize(&path).unwrap();
        let artifact = &normalized.artifact;

        assert_eq!(artifact.origin.id, "7c1d2e3f4a5b6c7d");
        assert_eq!(artifact.origin.format, "forge-default");
        assert_eq!(artifact.solc_long_version, "0.8.28+commit.7893614a");
        assert_eq!(artifact.input.language, "Solidity");

        // Both sources of the manifest, nothing from the other compilation
        let paths: Vec<_> = artifact.output.contracts.keys().cloned().collect();
        assert_eq!(paths, vec!["src/Counter.sol", "src/Math.sol"]);

        let counter = &artifact.output.contracts["src/Counter.sol"]["Counter"];
        assert_eq!(counter.bytecode().unwrap().object, "6080604052348015600e575f80fd5b50");
        assert_eq!(counter.deployed_bytecode().unwrap().object, "6080604052348015600e575f80fd");
        assert!(counter.metadata.as_deref().unwrap().contains("0.8.28+commit.7893614a"));
        assert_eq!(counter.devdoc.as_ref().unwrap()["kind"], "dev");

        // Scalar settings come from the first file visited
        let settings = &artifact.input.settings;
        assert_eq!(settings["optimizer"], json!({"enabled": true, "runs": 200}));
        assert_eq!(settings["evmVersion"], "cancun");
        assert_eq!(settings["remappings"], json!(["forge-std/=lib/forge-std/src/"]));
        assert_eq!(
            settings["libraries"],
            json!({"src/Math.sol": {"Math": "0x00000000000000000000000000000000000000aa"}})
        );
        assert!(artifact.input.sources.contains_key("src/Counter.sol"));
        assert!(artifact.input.sources.contains_key("src/Math.sol"));

        let archived: Vec<_> = normalized
            .original_content
            .iter()
            .map(|content| content.relative_path.as_str())
            .collect();
        assert_eq!(
            archived,
            vec![
                "build-info/7c1d2e3f4a5b6c7d.json",
                "Counter.sol/Counter.json",
                "Math.sol/Math.json"
            ]
        );
    }

    #[test]
    fn rejects_incomplete_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        copy_fixture("forge-default", dir.path());
        fs::remove_file(dir.path().join("out/Math.sol/Math.json")).unwrap();

        let err = normalize(&dir.path().join(MANIFEST)).unwrap_err();
        match &err {
            NormalizeError::IncompleteReconstruction { missing, .. } => {
                assert_eq!(
                    missing,
                    &vec![MissingSource {
                        path: "src/Math.sol".to_owned(),
                        id: "1".to_owned()
                    }]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("src/Math.sol (source id 1)"));
    }

    #[test]
    fn first_visited_duplicate_wins() {
        let dir = tempfile::tempdir().unwrap();
        copy_fixture("forge-default", dir.path());

        // Same contract claimed again by a file visited later in sorted order
        let original = fs::read_to_string(dir.path().join("out/Counter.sol/Counter.json")).unwrap();
        let duplicate = original.replace(
            "0x6080604052348015600e575f80fd5b50",
            "0xdeadbeef",
        );
        fs::create_dir_all(dir.path().join("out/zz")).unwrap();
        fs::write(dir.path().join("out/zz/Counter.json"), duplicate).unwrap();

        let normalized = normalize(&dir.path().join(MANIFEST)).unwrap();
        let counter = &normalized.artifact.output.contracts["src/Counter.sol"]["Counter"];
        assert_eq!(counter.bytecode().unwrap().object, "6080604052348015600e575f80fd5b50");
        assert_eq!(normalized.original_content.len(), 3);
    }

    #[test]
    fn skips_files_with_several_compilation_targets() {
        let dir = tempfile::tempdir().unwrap();
        copy_fixture("forge-default", dir.path());

        let mut value: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("out/Math.sol/Math.json")).unwrap(),
        )
        .unwrap();
        value["metadata"]["settings"]["compilationTarget"]["src/Counter.sol"] = json!("Counter");
        fs::write(
            dir.path().join("out/Math.sol/Math.json"),
            serde_json::to_vec(&value).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            normalize(&dir.path().join(MANIFEST)),
            Err(NormalizeError::IncompleteReconstruction { .. })
        ));
    }

    #[test]
    fn can_reconstruct_from_renamed_build_info_dir() {
        let dir = tempfile::tempdir().unwrap();
        copy_fixture("forge-default", dir.path());
        fs::rename(dir.path().join("out/build-info"), dir.path().join("out/bi")).unwrap();

        let normalized = normalize(&dir.path().join("out/bi/7c1d2e3f4a5b6c7d.json")).unwrap();
        let artifact = &normalized.artifact;

        assert_eq!(artifact.origin.id, "7c1d2e3f4a5b6c7d");
        let paths: Vec<_> = artifact.output.contracts.keys().cloned().collect();
        assert_eq!(paths, vec!["src/Counter.sol", "src/Math.sol"]);
        assert_eq!(normalized.original_content[0].relative_path, "bi/7c1d2e3f4a5b6c7d.json");
        assert_eq!(normalized.original_content.len(), 3);
    }
}
