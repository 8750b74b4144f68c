//! Two-tier cache behavior over real persistent backends

mod common;

use common::{sectioned_document, test_config, ScriptedAnalyst};
use meridian::analysis::AnalysisMode;
use meridian::cache::{FileTier, PersistentTier, SqliteTier, TwoTierCache, PUBLISH_PAYLOAD_FIELD};
use meridian::config::{CacheBackend, CacheSettings};
use meridian::pipeline::{AnalysisPipeline, AnalysisRequest};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn file_cache(dir: &TempDir) -> TwoTierCache {
    let tier = FileTier::open(dir.path().join("results")).await.unwrap();
    TwoTierCache::open("results", Some(Arc::new(tier) as Arc<dyn PersistentTier>))
        .await
        .unwrap()
}

async fn sqlite_cache(path: &Path) -> TwoTierCache {
    let tier = SqliteTier::open(path, "results").unwrap();
    TwoTierCache::open("results", Some(Arc::new(tier) as Arc<dyn PersistentTier>))
        .await
        .unwrap()
}

#[tokio::test]
async fn file_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let cache = file_cache(&dir).await;
    cache.set("run:1", json!({"status": "complete"})).await;
    cache.close().await.unwrap();

    let reopened = file_cache(&dir).await;
    assert!(!reopened.contains_in_memory("run:1"));
    assert_eq!(reopened.get("run:1").await, Some(json!({"status": "complete"})));
    assert!(reopened.contains_in_memory("run:1"));

    reopened.get("run:1").await;
    let stats = reopened.stats();
    assert_eq!(stats.persistent_hits, 1);
    assert_eq!(stats.memory_hits, 1);
}

#[tokio::test]
async fn sqlite_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");

    let cache = sqlite_cache(&path).await;
    cache.set("run:1", json!({"mappings": [1, 2, 3]})).await;
    cache.close().await.unwrap();

    let reopened = sqlite_cache(&path).await;
    assert_eq!(reopened.get("run:1").await, Some(json!({"mappings": [1, 2, 3]})));
    assert_eq!(reopened.stats().persistent_hits, 1);
    assert_eq!(reopened.get("missing").await, None);
    assert_eq!(reopened.stats().misses, 1);
}

#[tokio::test]
async fn partial_update_reaches_the_persistent_tier() {
    let dir = TempDir::new().unwrap();
    let cache = file_cache(&dir).await;
    cache
        .set("doc:1", json!({"title": "Sonata", "analysis": {"status": "new", "score": 1}}))
        .await;
    let merged = cache
        .update("doc:1", &json!({"analysis.status": "complete"}))
        .await
        .unwrap();
    assert_eq!(merged["analysis"], json!({"status": "complete", "score": 1}));
    cache.close().await.unwrap();

    let reopened = file_cache(&dir).await;
    let stored = reopened.get("doc:1").await.unwrap();
    assert_eq!(stored["title"], json!("Sonata"));
    assert_eq!(stored["analysis"]["status"], json!("complete"));
    assert_eq!(stored["analysis"]["score"], json!(1));
}

#[tokio::test]
async fn update_of_unknown_key_is_none() {
    let dir = TempDir::new().unwrap();
    let cache = file_cache(&dir).await;
    assert!(cache.update("nope", &json!({"a": 1})).await.is_none());
}

#[tokio::test]
async fn nested_publish_payload_is_stored_at_top_level() {
    let dir = TempDir::new().unwrap();
    let cache = file_cache(&dir).await;
    cache
        .set(
            "run:1",
            json!({"result": {"publishPayload": {"content": "hello"}}, "runKey": "r"}),
        )
        .await;
    cache.close().await.unwrap();

    let stored = file_cache(&dir).await.get("run:1").await.unwrap();
    assert_eq!(stored[PUBLISH_PAYLOAD_FIELD], json!({"content": "hello"}));
    assert!(stored["result"].get(PUBLISH_PAYLOAD_FIELD).is_none());
}

#[tokio::test]
async fn configured_file_caches_resume_a_pipeline_run() {
    let dir = TempDir::new().unwrap();
    let settings = CacheSettings {
        backend: CacheBackend::File,
        dir: Some(dir.path().to_path_buf()),
    };
    let request = || AnalysisRequest::for_content(sectioned_document());

    let caches = settings.open_caches().await.unwrap();
    let first = AnalysisPipeline::new(Arc::new(ScriptedAnalyst::new()), caches.clone())
        .with_config(test_config(AnalysisMode::PerChunk))
        .run_analysis(request())
        .await
        .unwrap();
    caches.close().await.unwrap();

    let caches = settings.open_caches().await.unwrap();
    let offline = Arc::new(ScriptedAnalyst::unavailable());
    let cached = AnalysisPipeline::new(offline.clone(), caches)
        .with_config(test_config(AnalysisMode::PerChunk))
        .run_analysis(request().reuse_cached(true))
        .await
        .unwrap();

    assert!(cached.from_cache);
    assert_eq!(offline.call_count(), 0);
    assert_eq!(cached.run_key, first.run_key);
    assert_eq!(cached.synthesis, first.synthesis);
}
