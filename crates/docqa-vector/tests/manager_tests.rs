use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use docqa_core::config::{EngineKind, IndexSettings};
use docqa_core::{Chunk, Embedder, Error, Result};
use docqa_embed::HashEmbedder;
use docqa_vector::{IndexManager, LoadOutcome};

const DIM: usize = 64;

fn settings(dir: &Path, engine: EngineKind) -> IndexSettings {
    IndexSettings {
        vector_path: dir.join("index/vectors.bin"),
        meta_path: dir.join("index/chunks_meta.json"),
        engine,
        rebuild_batch_size: 2,
    }
}

fn doc_chunks(source: &str, n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|i| Chunk::new(source, format!("{source} passage {i} token{i}x{}", source.len())).with_page(i as u32 + 1))
        .collect()
}

/// Every chunk finds itself at distance zero: vector i embeds chunk i.
fn assert_aligned(manager: &IndexManager, embedder: &dyn Embedder) {
    let stats = manager.stats();
    assert!(stats.is_aligned(), "vectors={} chunks={}", stats.vectors, stats.chunks);
    assert_eq!(manager.count(), stats.chunks);
    for chunk in manager.chunks() {
        let v = embedder.embed_query(&chunk.text).unwrap();
        let hits = manager.search_vector(&v, 1, None).unwrap();
        assert_eq!(hits[0].chunk, chunk);
        assert!(hits[0].distance < 1e-6);
    }
}

/// Hash embedder that can be switched into failure.
struct FlakyEmbedder {
    inner: HashEmbedder,
    failing: AtomicBool,
}

impl Embedder for FlakyEmbedder {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable("model offline".into()));
        }
        self.inner.embed_batch(texts)
    }
}

/// Fixed vectors per text.
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
}

impl Embedder for TableEmbedder {
    fn dim(&self) -> usize {
        2
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| self.table.get(t).cloned().ok_or_else(|| Error::ProviderUnavailable(t.clone())))
            .collect()
    }
}

#[test]
fn end_to_end_delete_scenario_both_engines() {
    for engine in [EngineKind::Flat, EngineKind::Compacting] {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let manager = IndexManager::new(&settings(tmp.path(), engine), embedder.clone());

        manager.index_chunks(doc_chunks("A.pdf", 5)).unwrap();
        manager.index_chunks(doc_chunks("B.pdf", 3)).unwrap();
        assert_eq!(manager.count(), 8);

        assert_eq!(manager.delete_by_source("A.pdf").unwrap(), 5, "{engine:?}");
        assert_eq!(manager.count(), 3);

        let results = manager.retrieve("anything at all", 10).unwrap();
        assert!(results.len() <= 3);
        assert!(results.iter().all(|c| c.source == "B.pdf"));
        assert_aligned(&manager, embedder.as_ref());
    }
}

#[test]
fn delete_keeps_relative_order_of_survivors() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Flat), embedder.clone());
    let mut interleaved = Vec::new();
    for (a, b) in doc_chunks("A.pdf", 4).into_iter().zip(doc_chunks("B.pdf", 4)) {
        interleaved.push(a);
        interleaved.push(b);
    }
    manager.index_chunks(interleaved.clone()).unwrap();

    manager.delete_by_source("A.pdf").unwrap();

    let expected: Vec<Chunk> = interleaved.into_iter().filter(|c| c.source == "B.pdf").collect();
    assert_eq!(manager.chunks(), expected);
    assert_aligned(&manager, embedder.as_ref());
}

#[test]
fn delete_of_absent_source_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Flat);
    let manager = IndexManager::new(&settings, Arc::new(HashEmbedder::new(DIM)));
    manager.index_chunks(doc_chunks("A.pdf", 3)).unwrap();
    manager.save().unwrap();
    let vectors_before = std::fs::read(&settings.vector_path).unwrap();
    let meta_before = std::fs::read(&settings.meta_path).unwrap();

    assert_eq!(manager.delete_by_source("nonexistent").unwrap(), 0);
    manager.save().unwrap();

    assert_eq!(std::fs::read(&settings.vector_path).unwrap(), vectors_before);
    assert_eq!(std::fs::read(&settings.meta_path).unwrap(), meta_before);
}

#[test]
fn retrieve_ranks_nearest_first() {
    let tmp = TempDir::new().unwrap();
    let table: HashMap<String, Vec<f32>> = [
        ("far", vec![3.0, 0.0]),
        ("near", vec![1.0, 0.0]),
        ("mid", vec![0.0, 2.0]),
        ("query", vec![0.0, 0.0]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Flat), Arc::new(TableEmbedder { table }));
    manager.index_chunks(vec![Chunk::new("d", "far"), Chunk::new("d", "near"), Chunk::new("d", "mid")]).unwrap();

    let texts: Vec<String> = manager.retrieve("query", 2).unwrap().into_iter().map(|c| c.text).collect();

    assert_eq!(texts, ["near", "mid"]);
}

#[test]
fn retrieve_on_empty_index_is_empty_not_error() {
    let tmp = TempDir::new().unwrap();
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Flat), Arc::new(HashEmbedder::new(DIM)));
    assert!(manager.retrieve("hello", 5).unwrap().is_empty());
    assert!(matches!(manager.retrieve("hello", 0), Err(Error::InvalidArgument(_))));
}

#[test]
fn retrieve_from_filters_without_touching_metadata() {
    let tmp = TempDir::new().unwrap();
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Flat), Arc::new(HashEmbedder::new(DIM)));
    manager.index_chunks(doc_chunks("A.pdf", 4)).unwrap();
    manager.index_chunks(doc_chunks("B.pdf", 4)).unwrap();
    let before = manager.chunks();

    let only_b = manager.retrieve_from("A.pdf passage 1", 3, Some("B.pdf")).unwrap();

    assert_eq!(only_b.len(), 3);
    assert!(only_b.iter().all(|c| c.source == "B.pdf"));
    assert_eq!(manager.chunks(), before);
    assert!(manager.retrieve_from("x", 3, Some("C.pdf")).unwrap().is_empty());
}

#[test]
fn add_rejects_wrong_width_and_leaves_count() {
    let tmp = TempDir::new().unwrap();
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Flat), Arc::new(HashEmbedder::new(DIM)));
    manager.add(vec![vec![0.5; DIM]], vec![Chunk::new("A.pdf", "ok")]).unwrap();

    let err = manager
        .add(vec![vec![0.5; DIM], vec![0.5; DIM + 1]], vec![Chunk::new("A.pdf", "x"), Chunk::new("A.pdf", "y")])
        .unwrap_err();

    assert!(matches!(err, Error::DimensionMismatch { expected: DIM, actual } if actual == DIM + 1));
    assert_eq!(manager.count(), 1);
    assert!(manager.stats().is_aligned());

    let err = manager.add(vec![vec![0.5; DIM]], vec![]).unwrap_err();
    assert!(matches!(err, Error::LengthMismatch { vectors: 1, chunks: 0 }));
}

#[test]
fn failed_rebuild_preserves_previous_state() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(FlakyEmbedder { inner: HashEmbedder::new(DIM), failing: AtomicBool::new(false) });
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Flat), embedder.clone());
    manager.index_chunks(doc_chunks("A.pdf", 3)).unwrap();
    manager.index_chunks(doc_chunks("B.pdf", 3)).unwrap();
    let before = manager.chunks();

    embedder.failing.store(true, Ordering::SeqCst);
    let err = manager.delete_by_source("A.pdf").unwrap_err();
    assert!(matches!(err, Error::RebuildFailure(_)), "got {err:?}");
    assert_eq!(manager.chunks(), before);
    assert_eq!(manager.count(), 6);

    // the delete can simply be retried once the provider is back
    embedder.failing.store(false, Ordering::SeqCst);
    assert_eq!(manager.delete_by_source("A.pdf").unwrap(), 3);
    assert_aligned(&manager, &embedder.inner);
}

#[test]
fn native_removal_does_not_call_the_provider() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(FlakyEmbedder { inner: HashEmbedder::new(DIM), failing: AtomicBool::new(false) });
    let manager = IndexManager::new(&settings(tmp.path(), EngineKind::Compacting), embedder.clone());
    manager.index_chunks(doc_chunks("A.pdf", 2)).unwrap();
    manager.index_chunks(doc_chunks("B.pdf", 2)).unwrap();

    embedder.failing.store(true, Ordering::SeqCst);
    assert_eq!(manager.delete_by_source("B.pdf").unwrap(), 2);
    embedder.failing.store(false, Ordering::SeqCst);

    assert_aligned(&manager, &embedder.inner);
}

#[test]
fn save_then_open_restores_everything() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Flat);
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let manager = IndexManager::new(&settings, embedder.clone());
    let mut chunks = doc_chunks("A.pdf", 3);
    chunks.push(Chunk::new("ünïcode.pdf", "texte accentué, 漢字 and \"quotes\""));
    manager.index_chunks(chunks).unwrap();
    manager.save().unwrap();

    let restored = IndexManager::new(&settings, embedder.clone());
    let report = restored.load();

    assert_eq!(report.vectors, LoadOutcome::Loaded(4));
    assert_eq!(report.chunks, LoadOutcome::Loaded(4));
    assert_eq!(restored.chunks(), manager.chunks());
    assert_eq!(restored.documents(), manager.documents());
    assert_aligned(&restored, embedder.as_ref());
}

#[test]
fn open_without_files_is_empty() {
    let tmp = TempDir::new().unwrap();
    let manager = IndexManager::open(&settings(tmp.path(), EngineKind::Flat), Arc::new(HashEmbedder::new(DIM)));
    assert!(manager.is_empty());
    assert_eq!(manager.load().vectors, LoadOutcome::Missing);
}

#[test]
fn corrupt_vector_file_falls_back_and_delete_repairs() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Compacting);
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let manager = IndexManager::new(&settings, embedder.clone());
    manager.index_chunks(doc_chunks("A.pdf", 2)).unwrap();
    manager.index_chunks(doc_chunks("B.pdf", 2)).unwrap();
    manager.save().unwrap();
    std::fs::write(&settings.vector_path, b"garbage").unwrap();

    let reloaded = IndexManager::new(&settings, embedder.clone());
    let report = reloaded.load();

    assert!(matches!(report.vectors, LoadOutcome::Corrupt(_)));
    assert_eq!(report.chunks, LoadOutcome::Loaded(4));
    assert!(!report.is_clean());
    assert!(!reloaded.stats().is_aligned());

    // a misaligned aggregate always rebuilds, even with native removal
    assert_eq!(reloaded.delete_by_source("A.pdf").unwrap(), 2);
    assert_aligned(&reloaded, embedder.as_ref());
}

#[test]
fn corrupt_metadata_falls_back_to_empty_store() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Flat);
    let manager = IndexManager::new(&settings, Arc::new(HashEmbedder::new(DIM)));
    manager.index_chunks(doc_chunks("A.pdf", 2)).unwrap();
    manager.save().unwrap();
    std::fs::write(&settings.meta_path, "{ not json").unwrap();

    let report = manager.load();

    assert_eq!(report.vectors, LoadOutcome::Loaded(2));
    assert!(matches!(report.chunks, LoadOutcome::Corrupt(_)));
    assert_eq!(manager.count(), 0);
    assert!(manager.retrieve("A.pdf", 3).unwrap().is_empty());
}

#[test]
fn add_after_corrupt_metadata_realigns_before_appending() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Flat);
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let manager = IndexManager::new(&settings, embedder.clone());
    manager.index_chunks(doc_chunks("A.pdf", 2)).unwrap();
    manager.save().unwrap();
    std::fs::write(&settings.meta_path, "{ not json").unwrap();
    manager.load();
    assert!(!manager.stats().is_aligned());

    let b = Chunk::new("B.pdf", "bbbbbbbbbb");
    assert_eq!(manager.index_chunks(vec![b.clone()]).unwrap(), 1);

    assert_eq!(manager.stats().vectors, 1);
    assert_aligned(&manager, embedder.as_ref());
    let hits = manager.retrieve("bbbbbbbbbb", 3).unwrap();
    assert_eq!(hits, [b]);

    // what gets saved now is aligned too
    manager.save().unwrap();
    let reopened = IndexManager::open(&settings, embedder.clone());
    assert_aligned(&reopened, embedder.as_ref());
}

#[test]
fn add_after_corrupt_vector_file_realigns_before_appending() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Compacting);
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let manager = IndexManager::new(&settings, embedder.clone());
    manager.index_chunks(doc_chunks("A.pdf", 3)).unwrap();
    manager.save().unwrap();
    std::fs::write(&settings.vector_path, b"garbage").unwrap();
    manager.load();
    assert!(!manager.stats().is_aligned());

    let b = Chunk::new("B.pdf", "bbbbbbbbbb");
    let v = embedder.embed_query(&b.text).unwrap();
    assert_eq!(manager.add(vec![v], vec![b.clone()]).unwrap(), 4);

    assert_eq!(manager.stats().vectors, 4);
    assert_aligned(&manager, embedder.as_ref());
    assert_eq!(manager.chunks().last(), Some(&b));
}

#[test]
fn failed_realignment_leaves_state_and_rejects_the_add() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Flat);
    let embedder = Arc::new(FlakyEmbedder { inner: HashEmbedder::new(DIM), failing: AtomicBool::new(false) });
    let manager = IndexManager::new(&settings, embedder.clone());
    manager.index_chunks(doc_chunks("A.pdf", 2)).unwrap();
    manager.save().unwrap();
    std::fs::write(&settings.vector_path, b"garbage").unwrap();
    manager.load();
    let before = (manager.stats(), manager.chunks());

    embedder.failing.store(true, Ordering::SeqCst);
    let err = manager.add(vec![vec![0.5; DIM]], vec![Chunk::new("B.pdf", "b")]).unwrap_err();

    assert!(matches!(err, Error::RebuildFailure(_)), "got {err:?}");
    assert_eq!((manager.stats(), manager.chunks()), before);
}

#[test]
fn reset_is_idempotent_and_removes_files() {
    let tmp = TempDir::new().unwrap();
    let settings = settings(tmp.path(), EngineKind::Flat);
    let manager = IndexManager::new(&settings, Arc::new(HashEmbedder::new(DIM)));
    manager.index_chunks(doc_chunks("A.pdf", 3)).unwrap();
    manager.save().unwrap();

    manager.reset().unwrap();
    let once = (manager.stats(), manager.chunks());
    manager.reset().unwrap();

    assert_eq!((manager.stats(), manager.chunks()), once);
    assert_eq!(manager.count(), 0);
    assert!(!settings.vector_path.exists());
    assert!(!settings.meta_path.exists());
}

#[test]
fn alignment_holds_across_mixed_operation_sequences() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(HashEmbedder::new(DIM));
    for engine in [EngineKind::Flat, EngineKind::Compacting] {
        let manager = IndexManager::new(&settings(tmp.path(), engine), embedder.clone());
        manager.index_chunks(doc_chunks("A.pdf", 3)).unwrap();
        assert_aligned(&manager, embedder.as_ref());
        manager.index_chunks(doc_chunks("B.pdf", 4)).unwrap();
        manager.delete_by_source("A.pdf").unwrap();
        assert_aligned(&manager, embedder.as_ref());
        manager.index_chunks(doc_chunks("C.pdf", 2)).unwrap();
        manager.index_chunks(doc_chunks("A.pdf", 1)).unwrap();
        manager.delete_by_source("B.pdf").unwrap();
        assert_aligned(&manager, embedder.as_ref());
        manager.reset().unwrap();
        assert_aligned(&manager, embedder.as_ref());
        manager.index_chunks(doc_chunks("D.pdf", 2)).unwrap();
        assert_aligned(&manager, embedder.as_ref());
    }
}

#[test]
fn concurrent_writers_and_readers_keep_alignment() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let manager = Arc::new(IndexManager::new(&settings(tmp.path(), EngineKind::Flat), embedder.clone()));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager.index_chunks(doc_chunks(&format!("doc{t}.pdf"), 6)).unwrap();
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..10 {
                    let hits = manager.retrieve("passage token", 4).unwrap();
                    assert!(hits.len() <= 4);
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    let deleters: Vec<_> = ["doc0.pdf", "doc2.pdf"]
        .into_iter()
        .map(|source| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.delete_by_source(source).unwrap())
        })
        .collect();
    let removed: usize = deleters.into_iter().map(|h| h.join().unwrap()).sum();
    for handle in readers {
        handle.join().unwrap();
    }

    assert_eq!(removed, 12);
    assert_eq!(manager.count(), 12);
    assert_aligned(&manager, embedder.as_ref());
}
