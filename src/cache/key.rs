//! Cache keys
//!
//! A key is a `/`-separated path whose segments go from the widest scope to the
//! narrowest:
//!
//! ```text
//! {dataset}/{preparation | "dataset"}/{step | "root"}/{kind}/{filter hash | "all"}/{sample | "full"}/{format}
//! ```
//!
//! so "this preparation, any step" and "this dataset, any preparation" are plain
//! key prefixes. Ids are percent-encoded into their segment, so two distinct ids
//! never render the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::FilterExpr;

/// What a cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Full transformation output: records and metadata
    Content,
    /// Metadata (row schema) only
    Metadata,
}

impl CacheKind {
    pub fn name(&self) -> &'static str {
        match self {
            CacheKind::Content => "content",
            CacheKind::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Deterministic key of one cached transformation result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub dataset_id: String,
    pub preparation_id: Option<String>,
    pub step_id: Option<String>,
    pub kind: CacheKind,
    pub filter_hash: Option<String>,
    pub sample_size: Option<u64>,
    pub format: String,
}

impl CacheKey {
    /// Key of the raw dataset content, unfiltered, in JSON
    pub fn new(dataset_id: impl Into<String>, kind: CacheKind) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            preparation_id: None,
            step_id: None,
            kind,
            filter_hash: None,
            sample_size: None,
            format: "json".to_string(),
        }
    }

    pub fn with_preparation(mut self, preparation_id: impl Into<String>) -> Self {
        self.preparation_id = Some(preparation_id.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_filter(mut self, filter: Option<&FilterExpr>) -> Self {
        self.filter_hash = filter.map(filter_hash);
        self
    }

    pub fn with_sample(mut self, sample_size: Option<u64>) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Rendered key
    pub fn key(&self) -> String {
        let sample = self
            .sample_size
            .map_or_else(|| "full".to_string(), |n| n.to_string());
        [
            segment(&self.dataset_id),
            segment(self.preparation_id.as_deref().unwrap_or("dataset")),
            segment(self.step_id.as_deref().unwrap_or("root")),
            self.kind.name().to_string(),
            segment(self.filter_hash.as_deref().unwrap_or("all")),
            sample,
            segment(&self.format),
        ]
        .join("/")
    }

    /// Prefix of every key of `dataset_id`, any preparation
    pub fn dataset_prefix(dataset_id: &str) -> String {
        format!("{}/", segment(dataset_id))
    }

    /// Prefix of every key of `preparation_id`, any step
    pub fn preparation_prefix(dataset_id: &str, preparation_id: &str) -> String {
        format!("{}/{}/", segment(dataset_id), segment(preparation_id))
    }

    /// Prefix of every key of one step of a preparation
    pub fn step_prefix(dataset_id: &str, preparation_id: &str, step_id: &str) -> String {
        format!(
            "{}/{}/{}/",
            segment(dataset_id),
            segment(preparation_id),
            segment(step_id)
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Short, stable hash of a filter's canonical JSON
pub fn filter_hash(filter: &FilterExpr) -> String {
    let digest = Sha256::digest(filter.to_json().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = CacheKey::new("ds1", CacheKind::Content)
            .with_preparation("prep1")
            .with_step("abc")
            .with_sample(Some(100));
        assert_eq!(key.key(), "ds1/prep1/abc/content/all/100/json");

        let key = CacheKey::new("ds1", CacheKind::Metadata);
        assert_eq!(key.key(), "ds1/dataset/root/metadata/all/full/json");
    }

    #[test]
    fn test_prefixes_match_keys() {
        let key = CacheKey::new("ds1", CacheKind::Content)
            .with_preparation("prep1")
            .with_step("abc");
        assert!(key.key().starts_with(&CacheKey::dataset_prefix("ds1")));
        assert!(key.key().starts_with(&CacheKey::preparation_prefix("ds1", "prep1")));
        assert!(key.key().starts_with(&CacheKey::step_prefix("ds1", "prep1", "abc")));
        assert!(!key.key().starts_with(&CacheKey::preparation_prefix("ds1", "prep")));
    }

    #[test]
    fn test_filter_hash_is_deterministic() {
        let a = FilterExpr::parse(r#"{"eq": {"field": "0000", "value": "x"}}"#).unwrap();
        let b = FilterExpr::parse(r#"{"eq": {"value": "x", "field": "0000"}}"#).unwrap();
        assert_eq!(filter_hash(&a), filter_hash(&b));
        assert_eq!(filter_hash(&a).len(), 16);

        let key = CacheKey::new("ds", CacheKind::Content).with_filter(Some(&a));
        assert_ne!(key, CacheKey::new("ds", CacheKind::Content));
    }

    #[test]
    fn test_separators_escaped() {
        let key = CacheKey::new("a/b", CacheKind::Content);
        assert!(key.key().starts_with("a%2Fb/"));
        assert_eq!(key.key().split('/').count(), 7);
    }

    #[test]
    fn test_distinct_ids_render_distinct_keys() {
        let ids = ["a/b", "a_b", "a%2Fb", "a\\b", "a%5Cb"];
        let keys: Vec<String> = ids
            .iter()
            .map(|id| CacheKey::new(*id, CacheKind::Content).key())
            .collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_ne!(CacheKey::dataset_prefix("a/b"), CacheKey::dataset_prefix("a_b"));
        assert_eq!(segment("7f3a-prep_1.v2"), "7f3a-prep_1.v2");
    }
}
