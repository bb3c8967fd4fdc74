use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::id::{derive_id, IdError};

/// The canonical record of one compiled-contract set.
///
/// An artifact is created once by a push and never mutated afterwards.
/// Its `id` only depends on `output`, see [`derive_id`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Artifact {
    /// Content id derived from `output.contracts`
    pub id: String,
    /// Pointer to the build-tool record the artifact was built from
    pub origin: Origin,
    /// Full compiler version, e.g. `0.8.28+commit.7893614a`
    pub solc_long_version: String,
    /// The compiler input
    pub input: CompilerInput,
    /// The compiler output
    pub output: CompilerOutput,
}

/// Provenance of an artifact. Never used for identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Origin {
    /// The internal id of the build-tool record
    pub id: String,
    /// The format declared by the build-tool record
    pub format: String,
    /// The format of the separate output piece, if the build tool splits them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerInput {
    pub language: String,
    #[serde(default)]
    pub sources: BTreeMap<String, Value>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerOutput {
    /// Source path => contract name => compiled contract
    #[serde(default)]
    pub contracts: BTreeMap<String, BTreeMap<String, CompiledContract>>,
}

/// The compiled output of a single contract.
///
/// Which fields are present depends on the build tool. Fields this crate does
/// not model are kept as is in `other`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledContract {
    #[serde(default)]
    pub abi: Vec<Value>,
    /// The raw metadata JSON string emitted by the compiler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdoc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devdoc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm: Option<Evm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_layout: Option<Value>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode: Option<Bytecode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_bytecode: Option<Bytecode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_identifiers: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bytecode {
    /// Bare hex, without `0x` prefix. May contain link placeholders.
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_references: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl Bytecode {
    /// Removes a leading `0x` from the bytecode object.
    pub fn strip_hex_prefix(&mut self) {
        if let Some(stripped) = self.object.strip_prefix("0x") {
            self.object = stripped.to_owned();
        }
    }

    /// Size of the bytecode in bytes.
    pub fn size(&self) -> usize {
        self.object.len() / 2
    }
}

impl CompiledContract {
    /// Removes the `0x` prefix of both bytecodes, if any.
    pub fn normalize_bytecode(&mut self) {
        if let Some(evm) = self.evm.as_mut() {
            if let Some(bytecode) = evm.bytecode.as_mut() {
                bytecode.strip_hex_prefix();
            }
            if let Some(bytecode) = evm.deployed_bytecode.as_mut() {
                bytecode.strip_hex_prefix();
            }
        }
    }

    pub fn bytecode(&self) -> Option<&Bytecode> {
        self.evm.as_ref().and_then(|evm| evm.bytecode.as_ref())
    }

    pub fn deployed_bytecode(&self) -> Option<&Bytecode> {
        self.evm.as_ref().and_then(|evm| evm.deployed_bytecode.as_ref())
    }
}

#[derive(Error, Debug)]
pub enum ArtifactValidationError {
    #[error("The artifact does not match the expected schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("The artifact id could not be derived: {0}")]
    Id(#[from] IdError),
    #[error("The artifact declares id `{declared}` but its content hashes to `{derived}`, it may have been modified")]
    IdMismatch { declared: String, derived: String },
}

impl Artifact {
    /// Parses and validates a canonical artifact document.
    ///
    /// The declared id must match the id derived from the compiled output.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ArtifactValidationError> {
        let artifact: Artifact = serde_json::from_slice(bytes)?;
        let derived = derive_id(&artifact.output)?;
        if derived != artifact.id {
            return Err(ArtifactValidationError::IdMismatch {
                declared: artifact.id,
                derived,
            });
        }
        Ok(artifact)
    }

    /// Serializes the artifact to its canonical JSON document.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Iterates over every compiled contract with its source path and name.
    pub fn contracts(&self) -> impl Iterator<Item = (&str, &str, &CompiledContract)> {
        self.output.contracts.iter().flat_map(|(source_path, contracts)| {
            contracts
                .iter()
                .map(move |(name, contract)| (source_path.as_str(), name.as_str(), contract))
        })
    }
}

/// A key under which an artifact is stored in a project.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    /// A mutable label
    Tag(String),
    /// An immutable content id
    Id(String),
}

impl ArtifactKey {
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactKey::Tag(_) => "tag",
            ArtifactKey::Id(_) => "id",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ArtifactKey::Tag(value) | ArtifactKey::Id(value) => value,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} `{}`", self.kind(), self.value())
    }
}

/// A `sourcePath:contractName` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullyQualifiedName {
    pub source_path: Option<String>,
    pub contract_name: String,
}

impl FullyQualifiedName {
    /// Parses a contract reference.
    ///
    /// Can either be in the form `ContractName`, or `path/to/File.sol:ContractName`.
    pub fn parse(contract: &str) -> Self {
        match contract.rsplit_once(':') {
            Some((source_path, contract_name)) => FullyQualifiedName {
                source_path: Some(source_path.to_owned()),
                contract_name: contract_name.to_owned(),
            },
            None => FullyQualifiedName {
                source_path: None,
                contract_name: contract.to_owned(),
            },
        }
    }

    pub fn matches(&self, source_path: &str, contract_name: &str) -> bool {
        self.contract_name == contract_name
            && self
                .source_path
                .as_deref()
                .map_or(true, |path| path == source_path)
    }
}

impl fmt::Display for FullyQualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source_path {
            Some(path) => write!(f, "{}:{}", path, self.contract_name),
            None => write!(f, "{}", self.contract_name),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn counter_contract(bytecode: &str) -> CompiledContract {
        serde_json::from_value(json!({
            "abi": [
                {"inputs": [], "name": "increment", "outputs": [], "stateMutability": "nonpayable", "type": "function"},
                {"inputs": [], "name": "number", "outputs": [{"internalType": "uint256", "name": "", "type": "uint256"}], "stateMutability": "view", "type": "function"}
            ],
            "metadata": "{\"compiler\":{\"version\":\"0.8.28+commit.7893614a\"}}",
            "evm": {
                "bytecode": {"object": bytecode, "linkReferences": {}, "opcodes": "PUSH1 0x80"},
                "deployedBytecode": {"object": "6080604052", "immutableReferences": {}},
                "methodIdentifiers": {"increment()": "d09de08a", "number()": "8381f58a"}
            }
        }))
        .unwrap()
    }

    pub(crate) fn sample_artifact(bytecode: &str, optimizer_runs: u64) -> Artifact {
        let mut output = CompilerOutput::default();
        output
            .contracts
            .entry("contracts/Counter.sol".to_owned())
            .or_default()
            .insert("Counter".to_owned(), counter_contract(bytecode));
        let settings = json!({"optimizer": {"enabled": true, "runs": optimizer_runs}});
        Artifact {
            id: derive_id(&output).unwrap(),
            origin: Origin {
                id: "5b3e4f0c2a1d9e8f7a6b5c4d3e2f1a0b".to_owned(),
                format: "hh-sol-build-info-1".to_owned(),
                output_format: None,
            },
            solc_long_version: "0.8.28+commit.7893614a".to_owned(),
            input: CompilerInput {
                language: "Solidity".to_owned(),
                sources: BTreeMap::new(),
                settings: settings.as_object().unwrap().clone(),
            },
            output,
        }
    }

    #[test]
    fn can_strip_hex_prefix() {
        let mut contract = counter_contract("0x6080604052");
        contract.normalize_bytecode();
        assert_eq!(contract.bytecode().unwrap().object, "6080604052");
        assert_eq!(contract.bytecode().unwrap().size(), 5);

        // Already bare bytecode is left untouched
        contract.normalize_bytecode();
        assert_eq!(contract.bytecode().unwrap().object, "6080604052");
    }

    #[test]
    fn keeps_unmodelled_fields() {
        let contract = counter_contract("6080");
        let value = serde_json::to_value(&contract).unwrap();
        assert_eq!(value["evm"]["bytecode"]["opcodes"], json!("PUSH1 0x80"));
        assert_eq!(
            value["evm"]["deployedBytecode"]["immutableReferences"],
            json!({})
        );
    }

    #[test]
    fn can_parse_valid_artifact() {
        let artifact = sample_artifact("6080604052", 200);
        let bytes = artifact.to_json_vec().unwrap();
        let parsed = Artifact::from_slice(&bytes).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn rejects_edited_artifact() {
        let artifact = sample_artifact("6080604052", 200);
        let mut value = serde_json::to_value(&artifact).unwrap();
        value["output"]["contracts"]["contracts/Counter.sol"]["Counter"]["evm"]["bytecode"]
            ["object"] = json!("deadbeef");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            Artifact::from_slice(&bytes),
            Err(ArtifactValidationError::IdMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let artifact = sample_artifact("6080604052", 200);
        let mut value = serde_json::to_value(&artifact).unwrap();
        value["extra"] = json!(true);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            Artifact::from_slice(&bytes),
            Err(ArtifactValidationError::Schema(_))
        ));
    }

    #[test]
    fn can_parse_contract_string() {
        let name = FullyQualifiedName::parse("contracts/Counter.sol:Counter");
        assert_eq!(name.source_path.as_deref(), Some("contracts/Counter.sol"));
        assert_eq!(name.contract_name, "Counter");
        assert!(name.matches("contracts/Counter.sol", "Counter"));
        assert!(!name.matches("src/Counter.sol", "Counter"));

        let name = FullyQualifiedName::parse("Counter");
        assert_eq!(name.source_path, None);
        assert!(name.matches("src/Counter.sol", "Counter"));
        assert_eq!(name.to_string(), "Counter");
    }
}
