//! Content cache backend tests

use dataprep_core::cache::{
    CacheKey, CacheKind, ContentCache, FileContentCache, InMemoryContentCache, TimeToLive,
    ZipContentCache, read_or_miss, write_or_skip,
};
use dataprep_core::models::FilterExpr;
use tempfile::TempDir;

fn key(dataset: &str, prep: &str, step: &str) -> CacheKey {
    CacheKey::new(dataset, CacheKind::Content)
        .with_preparation(prep)
        .with_step(step)
}

/// Three preparations of three steps each, plus a metadata entry per step
fn populate(cache: &dyn ContentCache) {
    for prep in ["p1", "p2", "p3"] {
        for step in ["s1", "s2", "s3"] {
            let content = key("ds", prep, step);
            let metadata = CacheKey::new("ds", CacheKind::Metadata)
                .with_preparation(prep)
                .with_step(step);
            assert!(write_or_skip(cache, &content, TimeToLive::Default, b"rows"));
            assert!(write_or_skip(cache, &metadata, TimeToLive::Default, b"{}"));
        }
    }
}

fn check_prefix_eviction(cache: &dyn ContentCache) {
    populate(cache);

    let removed = cache.evict_prefix(&CacheKey::step_prefix("ds", "p1", "s2")).unwrap();
    assert_eq!(removed, 2);
    assert!(!cache.has(&key("ds", "p1", "s2")).unwrap());
    assert!(cache.has(&key("ds", "p1", "s1")).unwrap());
    assert!(cache.has(&key("ds", "p2", "s2")).unwrap());

    let removed = cache.evict_prefix(&CacheKey::preparation_prefix("ds", "p2")).unwrap();
    assert_eq!(removed, 6);
    for step in ["s1", "s2", "s3"] {
        assert!(!cache.has(&key("ds", "p2", step)).unwrap());
        assert!(cache.has(&key("ds", "p3", step)).unwrap());
    }

    let removed = cache.evict_prefix(&CacheKey::dataset_prefix("ds")).unwrap();
    assert_eq!(removed, 10);
    assert!(!cache.has(&key("ds", "p3", "s3")).unwrap());
}

mod eviction_tests {
    use super::*;

    #[test]
    fn test_memory_prefix_eviction() {
        let cache = InMemoryContentCache::default();
        check_prefix_eviction(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_prefix_eviction() {
        let dir = TempDir::new().unwrap();
        let cache = FileContentCache::new(dir.path()).unwrap();
        check_prefix_eviction(&cache);
    }

    #[test]
    fn test_dataset_prefix_does_not_match_longer_ids() {
        let cache = InMemoryContentCache::default();
        assert!(write_or_skip(&cache, &key("ds", "p", "s"), TimeToLive::Default, b"a"));
        assert!(write_or_skip(&cache, &key("ds2", "p", "s"), TimeToLive::Default, b"b"));

        assert_eq!(cache.evict_prefix(&CacheKey::dataset_prefix("ds")).unwrap(), 1);
        assert!(cache.has(&key("ds2", "p", "s")).unwrap());
    }

    #[test]
    fn test_separator_in_id_does_not_alias_another_dataset() {
        let dir = TempDir::new().unwrap();
        let caches: Vec<Box<dyn ContentCache>> = vec![
            Box::new(InMemoryContentCache::default()),
            Box::new(FileContentCache::new(dir.path()).unwrap()),
        ];
        for cache in &caches {
            let slashed = key("a/b", "p", "s");
            let underscored = key("a_b", "p", "s");
            assert!(write_or_skip(cache.as_ref(), &slashed, TimeToLive::Default, b"slash"));
            assert!(write_or_skip(cache.as_ref(), &underscored, TimeToLive::Default, b"underscore"));
            assert_eq!(read_or_miss(cache.as_ref(), &slashed), Some(b"slash".to_vec()));

            assert_eq!(cache.evict_prefix(&CacheKey::dataset_prefix("a_b")).unwrap(), 1);
            assert!(cache.has(&slashed).unwrap());
            assert!(!cache.has(&underscored).unwrap());
        }
    }

    #[test]
    fn test_raw_dataset_entries_share_the_dataset_prefix() {
        let cache = InMemoryContentCache::default();
        let raw = CacheKey::new("ds", CacheKind::Content);
        assert!(write_or_skip(&cache, &raw, TimeToLive::Default, b"raw"));
        assert_eq!(raw.key(), "ds/dataset/root/content/all/full/json");

        assert_eq!(cache.evict_prefix(&CacheKey::dataset_prefix("ds")).unwrap(), 1);
        assert!(read_or_miss(&cache, &raw).is_none());
    }
}

mod key_tests {
    use super::*;

    #[test]
    fn test_variants_do_not_collide() {
        let filter = FilterExpr::parse(r#"{"eq": {"field": "0000", "value": "a"}}"#).unwrap();
        let base = key("ds", "p", "s");
        let variants = [
            base.clone(),
            base.clone().with_filter(Some(&filter)),
            base.clone().with_sample(Some(10)),
            base.clone().with_format("csv"),
            CacheKey::new("ds", CacheKind::Metadata)
                .with_preparation("p")
                .with_step("s"),
        ];
        let cache = InMemoryContentCache::default();
        for (i, variant) in variants.iter().enumerate() {
            assert!(write_or_skip(&cache, variant, TimeToLive::Default, i.to_string().as_bytes()));
        }
        for (i, variant) in variants.iter().enumerate() {
            assert_eq!(read_or_miss(&cache, variant), Some(i.to_string().into_bytes()));
        }
    }
}

mod compression_tests {
    use super::*;

    #[test]
    fn test_compressed_file_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = ZipContentCache::new(FileContentCache::new(dir.path()).unwrap());
        let content = br#"{"records":[{"0000":"a"}]}"#.repeat(50);

        let key = key("ds", "p", "s");
        assert!(write_or_skip(&cache, &key, TimeToLive::Permanent, &content));
        assert_eq!(read_or_miss(&cache, &key), Some(content.clone()));

        let stored = read_or_miss(cache.inner(), &key).unwrap();
        assert!(stored.starts_with(b"PK"));
        assert!(stored.len() < content.len());
    }

    #[test]
    fn test_eviction_reaches_inner_cache() {
        let cache = ZipContentCache::new(InMemoryContentCache::default());
        populate(&cache);
        assert_eq!(cache.evict_prefix(&CacheKey::preparation_prefix("ds", "p1")).unwrap(), 6);
        assert_eq!(cache.inner().len(), 12);
    }
}
