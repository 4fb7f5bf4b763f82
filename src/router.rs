use serde_json::{Map, Value};

/// Tag given to jobs that carry no usable type signal.
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// Keys that may carry the job type, in resolution order.
const TYPE_KEYS: &[&str] = &["job_type", "task", "type", "action", "kind"];

/// Historical spellings mapped to canonical tags. Keys are already normalized.
const ALIASES: &[(&str, &str)] = &[
    ("ROI_SCAN", "ROI_SCAN"),
    ("ROI", "ROI_SCAN"),
    ("ROISCAN", "ROI_SCAN"),
    ("ROI_PLAN", "ROI_SCAN"),
    ("GENERAL_INSIGHT", "GENERAL_INSIGHT"),
    ("INSIGHT", "GENERAL_INSIGHT"),
    ("ANALYSIS", "GENERAL_INSIGHT"),
    ("WRITE_RESULT", "WRITE_RESULT"),
    ("WRITERESULT", "WRITE_RESULT"),
    ("REPO_WRITE", "REPO_WRITE"),
    ("GITHUB_WRITE_FILE", "REPO_WRITE"),
    ("GITHUB_WRITE", "REPO_WRITE"),
    ("REPO_READ", "REPO_READ"),
    ("GITHUB_READ_FILE", "REPO_READ"),
    ("GITHUB_READ", "REPO_READ"),
];

/// Payload shapes that identify a type when no key or file name does.
/// Checked in order; every listed key must be present.
const SHAPES: &[(&[&str], &str)] = &[
    (&["repo", "path", "content"], "REPO_WRITE"),
    (&["repo", "path"], "REPO_READ"),
    (&["out_path", "out_content"], "WRITE_RESULT"),
    (&["goal"], "ROI_SCAN"),
    (&["instructions"], "GENERAL_INSIGHT"),
];

/// Where a resolved tag came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSource {
    Field(&'static str),
    FileName,
    PayloadShape,
    Default,
}

/// Resolves a canonical type tag from a job document.
pub struct TypeNormalizer;

impl TypeNormalizer {
    /// Canonical type for a job document and its file stem, with the signal
    /// that produced it. Never fails: absence of any signal yields
    /// [`UNKNOWN_TYPE`].
    pub fn resolve(doc: &Map<String, Value>, file_stem: &str) -> (String, TypeSource) {
        for &key in TYPE_KEYS {
            if let Some(raw) = doc.get(key).and_then(Value::as_str) {
                let tag = Self::normalize(raw);
                if !tag.is_empty() {
                    return (tag, TypeSource::Field(key));
                }
            }
        }

        if let Some(tag) = Self::from_file_name(file_stem) {
            return (tag.to_string(), TypeSource::FileName);
        }

        if let Some(tag) = Self::from_shape(doc) {
            return (tag.to_string(), TypeSource::PayloadShape);
        }

        (UNKNOWN_TYPE.to_string(), TypeSource::Default)
    }

    /// Uppercases, maps `-` and spaces to `_`, then applies the alias table.
    pub fn normalize(raw: &str) -> String {
        let mut tag = String::with_capacity(raw.len());
        for c in raw.trim().chars() {
            let c = match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            };
            if c == '_' && tag.ends_with('_') {
                continue;
            }
            tag.push(c);
        }
        let tag = tag.trim_matches('_').to_string();

        ALIASES
            .iter()
            .find(|(alias, _)| *alias == tag)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or(tag)
    }

    /// Longest alias that appears as a whole `_`-delimited run in the stem.
    fn from_file_name(file_stem: &str) -> Option<&'static str> {
        let wrapped = format!("_{}_", Self::normalize_bare(file_stem));
        ALIASES
            .iter()
            .filter(|(alias, _)| wrapped.contains(&format!("_{alias}_")))
            .max_by_key(|(alias, _)| alias.len())
            .map(|(_, canonical)| *canonical)
    }

    fn from_shape(doc: &Map<String, Value>) -> Option<&'static str> {
        SHAPES
            .iter()
            .find(|(keys, _)| keys.iter().all(|k| doc.contains_key(*k)))
            .map(|(_, tag)| *tag)
    }

    // Normalization without alias substitution, for substring matching.
    fn normalize_bare(raw: &str) -> String {
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }

    /// Canonical tags known to the alias table, sorted.
    #[cfg(test)]
    pub fn known_tags() -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = ALIASES.iter().map(|(_, c)| *c).collect();
        tags.sort_unstable();
        tags.dedup();
        tags
    }
}
