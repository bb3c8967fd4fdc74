//! Read-only queries over the local cache.
use alloy_json_abi::JsonAbi;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::artifact::{Artifact, ArtifactKey, CompiledContract, FullyQualifiedName, Origin};
use crate::error::{surface, Classify, ErrorClass};
use crate::resources::{LocalEntry, LocalStorage, LocalStorageError};

/// Format of the contract artifacts written by Hardhat.
pub const HARDHAT_ARTIFACT_FORMAT: &str = "hh-sol-artifact-1";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No tag or id `{reference}` found locally in project `{project}`. Pull it first")]
    ReferenceNotFound { project: String, reference: String },
    #[error("No contract `{contract}` in the artifact of {key}")]
    ContractNotFound { contract: String, key: ArtifactKey },
    #[error("Several contracts are named `{contract}` in the artifact of {key}, use one of their fully qualified names: {}", .candidates.join(", "))]
    AmbiguousContract {
        contract: String,
        key: ArtifactKey,
        candidates: Vec<String>,
    },
    #[error("{}", surface(.0, "reading the local cache"))]
    LocalStorage(#[from] LocalStorageError),
}

impl Classify for QueryError {
    fn class(&self) -> ErrorClass {
        match self {
            QueryError::LocalStorage(err) => err.class(),
            _ => ErrorClass::UserActionable,
        }
    }
}

/// Resolves `reference` as a tag, then as an id, and reads the artifact.
async fn resolve(
    local: &LocalStorage,
    project: &str,
    reference: &str,
) -> Result<(ArtifactKey, Artifact), QueryError> {
    let key = local
        .resolve_reference(project, reference)
        .await?
        .ok_or_else(|| QueryError::ReferenceNotFound {
            project: project.to_owned(),
            reference: reference.to_owned(),
        })?;
    let artifact = local.retrieve_artifact(project, &key).await?;
    Ok((key, artifact))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub tags: Vec<LocalEntry>,
    pub ids: Vec<LocalEntry>,
}

/// Lists the tags and ids of a project available in the local cache.
pub struct List<'a> {
    pub project: String,
    pub local: &'a LocalStorage,
}

impl<'a> List<'a> {
    pub fn new(project: impl Into<String>, local: &'a LocalStorage) -> Self {
        Self {
            project: project.into(),
            local,
        }
    }

    pub async fn run(&self) -> Result<Listing, QueryError> {
        Ok(Listing {
            tags: self.local.list_tags(&self.project).await?,
            ids: self.local.list_ids(&self.project).await?,
        })
    }
}

/// What an ABI declares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AbiSummary {
    Parsed {
        functions: usize,
        events: usize,
        errors: usize,
    },
    Unparsable,
}

impl AbiSummary {
    fn of(abi: &[Value]) -> Self {
        match serde_json::from_value::<JsonAbi>(Value::Array(abi.to_vec())) {
            Ok(abi) => AbiSummary::Parsed {
                functions: abi.functions().count(),
                events: abi.events().count(),
                errors: abi.errors().count(),
            },
            Err(err) => {
                log::debug!("Unparsable ABI: {}", err);
                AbiSummary::Unparsable
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSummary {
    pub source_path: String,
    pub contract_name: String,
    pub abi: AbiSummary,
    /// Sizes in bytes, when the contract has bytecode
    pub bytecode_size: Option<usize>,
    pub deployed_bytecode_size: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: String,
    pub origin: Origin,
    pub solc_long_version: String,
    pub language: String,
    pub contracts: Vec<ContractSummary>,
}

/// Summarizes a cached artifact.
pub struct Inspect<'a> {
    pub project: String,
    /// Tag or id of the artifact
    pub reference: String,
    pub local: &'a LocalStorage,
}

impl<'a> Inspect<'a> {
    pub fn new(
        project: impl Into<String>,
        reference: impl Into<String>,
        local: &'a LocalStorage,
    ) -> Self {
        Self {
            project: project.into(),
            reference: reference.into(),
            local,
        }
    }

    pub async fn run(&self) -> Result<Inspection, QueryError> {
        let (_, artifact) = resolve(self.local, &self.project, &self.reference).await?;
        let contracts = artifact
            .contracts()
            .map(|(source_path, contract_name, contract)| ContractSummary {
                source_path: source_path.to_owned(),
                contract_name: contract_name.to_owned(),
                abi: AbiSummary::of(&contract.abi),
                bytecode_size: contract.bytecode().map(|bytecode| bytecode.size()),
                deployed_bytecode_size: contract.deployed_bytecode().map(|bytecode| bytecode.size()),
            })
            .collect();
        Ok(Inspection {
            id: artifact.id,
            origin: artifact.origin,
            solc_long_version: artifact.solc_long_version,
            language: artifact.input.language,
            contracts,
        })
    }
}

/// A contract artifact in the format written by Hardhat.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardhatArtifact {
    #[serde(rename = "_format")]
    pub format: String,
    pub contract_name: String,
    pub source_name: String,
    pub abi: Vec<Value>,
    pub bytecode: String,
    pub deployed_bytecode: String,
    pub link_references: Value,
    pub deployed_link_references: Value,
}

impl HardhatArtifact {
    fn new(source_path: &str, contract_name: &str, contract: &CompiledContract) -> Self {
        let prefixed = |object: Option<&str>| format!("0x{}", object.unwrap_or_default());
        let links = |value: Option<&Value>| {
            value
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()))
        };
        let bytecode = contract.bytecode();
        let deployed = contract.deployed_bytecode();
        HardhatArtifact {
            format: HARDHAT_ARTIFACT_FORMAT.to_owned(),
            contract_name: contract_name.to_owned(),
            source_name: source_path.to_owned(),
            abi: contract.abi.clone(),
            bytecode: prefixed(bytecode.map(|bytecode| bytecode.object.as_str())),
            deployed_bytecode: prefixed(deployed.map(|bytecode| bytecode.object.as_str())),
            link_references: links(bytecode.and_then(|bytecode| bytecode.link_references.as_ref())),
            deployed_link_references: links(
                deployed.and_then(|bytecode| bytecode.link_references.as_ref()),
            ),
        }
    }
}

/// Renders one contract of a cached artifact as a Hardhat artifact.
pub struct Export<'a> {
    pub project: String,
    /// Tag or id of the artifact
    pub reference: String,
    /// `Name` or `path/to/File.sol:Name`
    pub contract: String,
    pub local: &'a LocalStorage,
}

impl<'a> Export<'a> {
    pub fn new(
        project: impl Into<String>,
        reference: impl Into<String>,
        contract: impl Into<String>,
        local: &'a LocalStorage,
    ) -> Self {
        Self {
            project: project.into(),
            reference: reference.into(),
            contract: contract.into(),
            local,
        }
    }

    pub async fn run(&self) -> Result<HardhatArtifact, QueryError> {
        let (key, artifact) = resolve(self.local, &self.project, &self.reference).await?;

        // Find the contract
        let name = FullyQualifiedName::parse(&self.contract);
        let matches: Vec<_> = artifact
            .contracts()
            .filter(|(source_path, contract_name, _)| name.matches(source_path, contract_name))
            .collect();
        match matches.as_slice() {
            [] => Err(QueryError::ContractNotFound {
                contract: self.contract.clone(),
                key,
            }),
            [(source_path, contract_name, contract)] => {
                Ok(HardhatArtifact::new(source_path, contract_name, contract))
            }
            _ => Err(QueryError::AmbiguousContract {
                contract: self.contract.clone(),
                key,
                candidates: matches
                    .iter()
                    .map(|(source_path, contract_name, _)| format!("{source_path}:{contract_name}"))
                    .collect(),
            }),
        }
    }
}
