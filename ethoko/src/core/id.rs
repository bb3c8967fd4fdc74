use alloy_primitives::keccak256;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::artifact::CompilerOutput;

/// Number of hex characters of a content id.
pub const ID_LENGTH: usize = 12;

#[derive(Error, Debug)]
pub enum IdError {
    #[error("Failed to serialize the compiled output for hashing: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Derives the content id of an artifact.
///
/// The id only depends on `output.contracts`: two artifacts compiled with
/// different settings but producing the same contracts share their id.
/// The contracts are hashed in a canonical form (object keys sorted at every
/// level, no whitespace), so the id does not depend on key insertion order.
pub fn derive_id(output: &CompilerOutput) -> Result<String, IdError> {
    let canonical = canonical_bytes(&output.contracts)?;
    let mut id = hex::encode(keccak256(&canonical));
    id.truncate(ID_LENGTH);
    Ok(id)
}

fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, IdError> {
    let mut value = serde_json::to_value(value)?;
    sort_json_value(&mut value);
    Ok(serde_json::to_vec(&value)?)
}

fn sort_json_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, v) in entries.iter_mut() {
                sort_json_value(v);
            }
            map.extend(entries);
        }
        Value::Array(items) => {
            for item in items {
                sort_json_value(item);
            }
        }
        _ => {}
    }
}
