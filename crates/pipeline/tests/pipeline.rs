//! Integration tests for `SegmentationPipeline` with a scripted segmenter
//! and in-memory storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use instafit_cloud::memory::MemoryStorage;
use instafit_core::types::Metadata;
use instafit_core::wardrobe::SegmentedImage;
use instafit_pipeline::config::{FailurePolicy, PipelineConfig, ResponseContract};
use instafit_pipeline::pipeline::{PipelineError, SegmentationPipeline, UnitErrorKind};
use instafit_pipeline::segmenter::{SegmentationError, Segmenter};

/// Segmenter driven by the file contents:
///
/// - `name:ok:N` -> N garments `name-0..name-N`
/// - `name:sleep:MS:N` -> sleep, then N garments
/// - `name:empty` -> no garments
/// - `name:fail` -> service error
/// - `name:sleepfail:MS` -> sleep, then service error
/// - `name:panic` -> panics
#[derive(Default)]
struct ScriptedSegmenter {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

fn garments(name: &str, count: usize) -> Vec<SegmentedImage> {
    (0..count)
        .map(|i| {
            let mut metadata = Metadata::new();
            metadata.insert("source".into(), name.into());
            SegmentedImage {
                id: format!("{name}-{i}"),
                image: Bytes::from(format!("{name}-{i}-pixels")),
                metadata,
            }
        })
        .collect()
}

#[async_trait]
impl Segmenter for ScriptedSegmenter {
    async fn segment(&self, image: Bytes) -> Result<Vec<SegmentedImage>, SegmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let spec = String::from_utf8_lossy(&image).to_string();
        let parts: Vec<&str> = spec.split(':').collect();
        let result = match parts.as_slice() {
            [name, "ok", n] => Ok(garments(name, n.parse().unwrap())),
            [name, "sleep", ms, n] => {
                tokio::time::sleep(Duration::from_millis(ms.parse().unwrap())).await;
                Ok(garments(name, n.parse().unwrap()))
            }
            [_, "empty"] => Ok(Vec::new()),
            [name, "fail"] => Err(SegmentationError::Service(format!("{name}: no person found"))),
            [name, "sleepfail", ms] => {
                tokio::time::sleep(Duration::from_millis(ms.parse().unwrap())).await;
                Err(SegmentationError::Service(format!("{name}: no person found")))
            }
            [name, "panic"] => panic!("segmenter crashed on {name}"),
            other => panic!("bad test spec {other:?}"),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct Harness {
    pipeline: SegmentationPipeline,
    segmenter: Arc<ScriptedSegmenter>,
    storage: Arc<MemoryStorage>,
}

fn harness(config: PipelineConfig) -> Harness {
    let segmenter = Arc::new(ScriptedSegmenter::default());
    let storage = Arc::new(MemoryStorage::new("https://cdn.test"));
    let pipeline = SegmentationPipeline::new(segmenter.clone(), storage.clone(), config);
    Harness {
        pipeline,
        segmenter,
        storage,
    }
}

fn files(specs: &[&str]) -> Vec<Bytes> {
    specs.iter().map(|s| Bytes::from(s.to_string())).collect()
}

// ---------------------------------------------------------------------------
// Test: result count is the sum over files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn result_count_is_sum_of_garments() {
    let h = harness(PipelineConfig::default());

    let outcome = h
        .pipeline
        .process("user-1", files(&["a:ok:2", "b:ok:3", "c:ok:1"]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.count(), 6);

    let keys = h.storage.keys();
    assert_eq!(keys.len(), 6);
    assert!(keys.contains(&"wardrobe/user-1/b-2.jpg".to_string()));

    let stored = h.storage.get("wardrobe/user-1/a-0.jpg").unwrap();
    assert_eq!(stored.content_type, "image/jpeg");
    assert_eq!(stored.data, Bytes::from_static(b"a-0-pixels"));

    let item = outcome
        .results
        .iter()
        .find(|r| r.clothing_id == "c-0")
        .unwrap();
    assert_eq!(item.image_url, "https://cdn.test/wardrobe/user-1/c-0.jpg");
    assert_eq!(item.metadata["source"], "c");
}

// ---------------------------------------------------------------------------
// Test: one good file, one failing file, under both contracts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mixed_outcome_under_both_contracts() {
    let h = harness(PipelineConfig::default());
    let cancel = CancellationToken::new();

    let outcome = h
        .pipeline
        .process("user-1", files(&["a:ok:2", "b:fail"]), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.count(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.first_error().unwrap().file_index, 1);

    assert_matches!(
        outcome.resolve(ResponseContract::AllOrNothing),
        Err(PipelineError::Unit(e)) if e.file_index == 1 && e.to_string().contains("no person found")
    );

    let outcome = h
        .pipeline
        .process("user-1", files(&["a:ok:2", "b:fail"]), &cancel)
        .await
        .unwrap();
    let batch = outcome.resolve(ResponseContract::PartialSuccess).unwrap();
    assert_eq!(batch.items.len(), 2);
    assert_eq!(batch.warnings.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: the reported error is the first to complete, not the first submitted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_error_follows_completion_order() {
    let h = harness(PipelineConfig::default());

    let outcome = h
        .pipeline
        .process(
            "user-1",
            files(&["a:sleepfail:300", "b:ok:1", "c:sleepfail:20"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.count(), 1);
    let order: Vec<usize> = outcome.failures.iter().map(|e| e.file_index).collect();
    assert_eq!(order, vec![2, 0]);
    assert_eq!(outcome.first_error().unwrap().file_index, 2);

    assert_matches!(
        outcome.resolve(ResponseContract::AllOrNothing),
        Err(PipelineError::Unit(e)) if e.file_index == 2 && e.to_string().contains("c: no person found")
    );
}

// ---------------------------------------------------------------------------
// Test: empty segmentation is a failure for that file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_segmentation_is_failure() {
    let h = harness(PipelineConfig::default());

    let outcome = h
        .pipeline
        .process("user-1", files(&["a:empty"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.count(), 0);
    assert_matches!(
        &outcome.failures[0].kind,
        UnitErrorKind::Segmentation(SegmentationError::Empty)
    );
}

// ---------------------------------------------------------------------------
// Test: upload failure keeps earlier uploads of the same file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_failure_is_reported_with_earlier_results() {
    let h = harness(PipelineConfig::default());
    h.storage.fail_on("wardrobe/user-1/a-1.jpg");

    let outcome = h
        .pipeline
        .process("user-1", files(&["a:ok:3"]), &CancellationToken::new())
        .await
        .unwrap();

    // a-0 was stored before a-1 failed; a-2 never ran.
    assert_eq!(outcome.count(), 1);
    assert_eq!(outcome.results[0].clothing_id, "a-0");
    assert_matches!(&outcome.failures[0].kind, UnitErrorKind::Upload(_));
    assert_eq!(h.storage.keys(), vec!["wardrobe/user-1/a-0.jpg".to_string()]);
}

// ---------------------------------------------------------------------------
// Test: concurrency never exceeds the configured bound
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn active_units_respect_concurrency_bound() {
    let h = harness(PipelineConfig {
        max_concurrency: 3,
        ..PipelineConfig::default()
    });
    let specs: Vec<String> = (0..10).map(|i| format!("f{i}:sleep:100:1")).collect();
    let specs: Vec<&str> = specs.iter().map(String::as_str).collect();

    let outcome = h
        .pipeline
        .process("user-1", files(&specs), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.count(), 10);
    assert_eq!(h.segmenter.max_active.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Test: request-level validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejects_empty_and_oversized_requests() {
    let h = harness(PipelineConfig {
        max_files: 2,
        ..PipelineConfig::default()
    });
    let cancel = CancellationToken::new();

    assert_matches!(
        h.pipeline.process("user-1", Vec::new(), &cancel).await,
        Err(PipelineError::NoFiles)
    );
    assert_matches!(
        h.pipeline
            .process("user-1", files(&["a:ok:1", "b:ok:1", "c:ok:1"]), &cancel)
            .await,
        Err(PipelineError::TooManyFiles { count: 3, max: 2 })
    );
    assert_matches!(
        h.pipeline.process("../evil", files(&["a:ok:1"]), &cancel).await,
        Err(PipelineError::InvalidUser(_))
    );
    assert_eq!(h.segmenter.calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Test: run-to-completion lets siblings finish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_to_completion_finishes_siblings() {
    let h = harness(PipelineConfig::default());

    let outcome = h
        .pipeline
        .process(
            "user-1",
            files(&["a:fail", "b:sleep:150:1", "c:sleep:150:2"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.count(), 3);
    assert_eq!(outcome.failures.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: fail-fast stops siblings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fail_fast_cancels_siblings() {
    let h = harness(PipelineConfig {
        failure_policy: FailurePolicy::FailFast,
        ..PipelineConfig::default()
    });

    let started = Instant::now();
    let outcome = h
        .pipeline
        .process(
            "user-1",
            files(&["a:fail", "b:sleep:5000:1", "c:sleep:5000:1"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.count(), 0);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].file_index, 0);
    assert!(h.storage.keys().is_empty());
}

// ---------------------------------------------------------------------------
// Test: caller cancellation aborts in-flight work
// ---------------------------------------------------------------------------

#[tokio::test]
async fn caller_cancellation_aborts_promptly() {
    let h = harness(PipelineConfig::default());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = h
        .pipeline
        .process("user-1", files(&["a:sleep:5000:1", "b:sleep:5000:1"]), &cancel)
        .await;

    assert_matches!(result, Err(PipelineError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(h.storage.keys().is_empty());
}

// ---------------------------------------------------------------------------
// Test: a panicking unit is captured
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_unit_is_captured_as_failure() {
    let h = harness(PipelineConfig::default());

    let outcome = h
        .pipeline
        .process("user-1", files(&["a:panic", "b:ok:2"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.count(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_matches!(
        &outcome.failures[0].kind,
        UnitErrorKind::Panicked(msg) if msg.contains("segmenter crashed on a")
    );
}
