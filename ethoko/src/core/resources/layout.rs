//! Key layout shared by every storage backend and the local cache.
//!
//! ```text
//! projects/<project>/ids/<id>.json
//! projects/<project>/ids/<id>/original-content/<relative path>
//! projects/<project>/tags/<tag>.json
//! ```
use crate::core::artifact::ArtifactKey;

pub const PROJECTS_DIR: &str = "projects";
pub const IDS_DIR: &str = "ids";
pub const TAGS_DIR: &str = "tags";
pub const ORIGINAL_CONTENT_DIR: &str = "original-content";
pub const ENTRY_EXTENSION: &str = "json";

/// Returns true when `segment` can be used as a single key component.
///
/// A leading `.` is rejected: listings skip such entries, so a key starting with one could be
/// written but never listed.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && !segment.contains(|c: char| c == '/' || c == '\\')
        && !segment.chars().any(char::is_control)
}

pub fn project_prefix(project: &str) -> String {
    format!("{PROJECTS_DIR}/{project}")
}

pub fn ids_prefix(project: &str) -> String {
    format!("{}/{IDS_DIR}", project_prefix(project))
}

pub fn tags_prefix(project: &str) -> String {
    format!("{}/{TAGS_DIR}", project_prefix(project))
}

pub fn id_key(project: &str, id: &str) -> String {
    format!("{}/{id}.{ENTRY_EXTENSION}", ids_prefix(project))
}

pub fn tag_key(project: &str, tag: &str) -> String {
    format!("{}/{tag}.{ENTRY_EXTENSION}", tags_prefix(project))
}

pub fn artifact_key(project: &str, key: &ArtifactKey) -> String {
    match key {
        ArtifactKey::Tag(tag) => tag_key(project, tag),
        ArtifactKey::Id(id) => id_key(project, id),
    }
}

pub fn original_content_key(project: &str, id: &str, relative_path: &str) -> String {
    format!(
        "{}/{id}/{ORIGINAL_CONTENT_DIR}/{relative_path}",
        ids_prefix(project)
    )
}

/// Extracts the key from an entry file name, e.g. `v1.0.0.json` => `v1.0.0`.
pub fn key_from_entry_name(name: &str) -> Option<&str> {
    name.strip_suffix(".json").filter(|key| is_valid_segment(key))
}
