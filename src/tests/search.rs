//! Hybrid query behavior against a live app: ranking, fallbacks, debounce.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::app::EnrichOpts;
use crate::notes::NoteCreate;
use crate::tests::support::{build_app, HashEmbedder, MockClassifier, NullEmbedder};

fn create(content: &str) -> NoteCreate {
    NoteCreate {
        content: content.to_string(),
        rag_enabled: false,
    }
}

#[test]
fn test_empty_query_returns_natural_order() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(&dir, MockClassifier::new(), Arc::new(HashEmbedder));

    let older = app.create(create("older note"), EnrichOpts::default()).unwrap();
    let newer = app.create(create("newer note"), EnrichOpts::default()).unwrap();

    let all = app.search("");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, newer.id);
    assert_eq!(all[1].id, older.id);

    let all = app.search("   ");
    assert_eq!(all.len(), 2);
}

#[test]
fn test_keyword_search_finds_enriched_note() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(&dir, MockClassifier::new(), Arc::new(HashEmbedder));

    app.create(create("calibrating the quantum relay"), EnrichOpts::default()).unwrap();
    app.create(create("watering the garden"), EnrichOpts::default()).unwrap();

    let hits = app.search("quantum relay");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "calibrating the quantum relay");
}

#[test]
fn test_exact_content_query_ranks_note_first() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(&dir, MockClassifier::new(), Arc::new(HashEmbedder));

    // both mention "relay"; the query is the exact content of one of them,
    // so its embedding matches at similarity 1.0 and wins the fusion
    app.create(create("relay manual chapter twelve"), EnrichOpts::default()).unwrap();
    let target = app
        .create(create("relay calibration procedure"), EnrichOpts::default())
        .unwrap();

    let hits = app.search("relay calibration procedure");
    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, target.id);
}

#[test]
fn test_lexical_fallback_when_embedder_dead() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = NullEmbedder::new();
    let app = build_app(&dir, MockClassifier::new(), embedder.clone());

    app.create(create("substrate analysis results"), EnrichOpts::default()).unwrap();

    // no note has an embedding and the query can't be embedded either;
    // hybrid search still answers from keywords alone
    let hits = app.search("substrate");
    assert_eq!(hits.len(), 1);
    assert!(embedder.calls() > 0);
}

#[test]
fn test_deleted_note_vanishes_from_results() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(&dir, MockClassifier::new(), Arc::new(HashEmbedder));

    let note = app
        .create(create("unrepeatable marzipan experiment"), EnrichOpts::default())
        .unwrap();
    assert_eq!(app.search("marzipan").len(), 1);

    app.delete(&note.id).unwrap();
    assert!(app.search("marzipan").is_empty());
}

#[test]
fn test_upsert_twice_yields_single_hit() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(&dir, MockClassifier::new(), Arc::new(HashEmbedder));

    let note = app
        .create(create("solitary keelhaul reference"), EnrichOpts::default())
        .unwrap();

    // force duplicate sync passes over the same snapshot
    let deps = app.pipeline_deps();
    deps.synchronizer.sync_all(&app.snapshot());
    deps.synchronizer.sync_all(&app.snapshot());

    let hits = app.search("keelhaul");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, note.id);
}

#[test]
fn test_result_cap() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(&dir, MockClassifier::new(), Arc::new(HashEmbedder));

    for i in 0..25 {
        app.create(create(&format!("shared keyword entry {i}")), EnrichOpts::default())
            .unwrap();
    }

    // capped at the configured limit of 20
    let hits = app.search("keyword");
    assert_eq!(hits.len(), 20);
}

#[test]
fn test_debounced_keystrokes_run_once() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = NullEmbedder::new();
    let app = build_app(&dir, MockClassifier::new(), embedder.clone());

    app.create(create("apple orchard inventory"), EnrichOpts::default()).unwrap();
    let baseline = embedder.calls();

    let (tx, rx) = mpsc::channel();
    app.search_debounced("a".to_string(), tx.clone());
    std::thread::sleep(Duration::from_millis(20));
    app.search_debounced("ap".to_string(), tx.clone());
    std::thread::sleep(Duration::from_millis(20));
    app.search_debounced("apple".to_string(), tx.clone());

    let response = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("no debounced result arrived");
    assert_eq!(response.query, "apple");

    let notes = app.resolve_outcome(&response.query, response.outcome);
    assert_eq!(notes.len(), 1);

    // superseded keystrokes never executed
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    assert_eq!(embedder.calls() - baseline, 1);
}
