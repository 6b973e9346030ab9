use std::sync::Arc;
use vecsearch_core::{Document, GlobalConfig, IndexParams, Metric};
use vecsearch_index::collection::{SNAPSHOT_FILE, WAL_FILE};
use vecsearch_index::Collection;
use vecsearch_store::wal::WalSyncMode;

fn params() -> IndexParams {
    IndexParams::new(3, Metric::Cosine).with_m(8)
}

fn open(dir: &std::path::Path) -> Collection {
    Collection::open(dir, params(), Arc::new(GlobalConfig::new()), WalSyncMode::Strict)
        .expect("open collection")
}

fn doc(i: usize) -> Document {
    let x = i as f64;
    Document::new(i.to_string(), vec![x.sin(), x.cos(), (x * 0.3).sin()])
        .with_text(format!("document number {i} about banks"))
        .with_attribute("parity", if i % 2 == 0 { "even" } else { "odd" })
}

fn queries() -> Vec<Vec<f64>> {
    (0..10).map(|i| doc(i * 7 + 3).vector).collect()
}

fn answers(c: &Collection) -> Vec<Vec<(String, f64)>> {
    queries()
        .iter()
        .map(|q| {
            c.index()
                .search(q, 5, 32)
                .unwrap()
                .into_iter()
                .map(|h| (h.id, h.score))
                .collect()
        })
        .collect()
}

#[test]
fn test_wal_replay_rebuilds_identical_index() {
    let dir = tempfile::tempdir().unwrap();
    let before = {
        let c = open(dir.path());
        for i in 0..150 {
            c.insert(doc(i)).unwrap();
        }
        assert!(c.delete("10").unwrap());
        c.insert(doc(20).with_text("replaced")).unwrap();
        answers(&c)
    };
    assert!(dir.path().join(WAL_FILE).exists());

    let reopened = open(dir.path());
    assert_eq!(reopened.len(), 149);
    assert!(reopened.get("10").is_none());
    assert_eq!(reopened.get("20").unwrap().text, "replaced");
    assert_eq!(answers(&reopened), before);
}

#[test]
fn test_checkpoint_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    let before = {
        let c = open(dir.path());
        for i in 0..100 {
            c.insert(doc(i)).unwrap();
        }
        c.checkpoint().unwrap();
        assert_eq!(std::fs::metadata(dir.path().join(WAL_FILE)).unwrap().len(), 0);

        // Writes after the checkpoint land in the fresh log
        for i in 100..120 {
            c.insert(doc(i)).unwrap();
        }
        c.delete("5").unwrap();
        answers(&c)
    };
    assert!(dir.path().join(SNAPSHOT_FILE).exists());

    let reopened = open(dir.path());
    assert_eq!(reopened.len(), 119);
    assert_eq!(answers(&reopened), before);
    assert_eq!(reopened.get("7").unwrap().attributes["parity"], "odd");

    let lexical = reopened.lexical_search("banks", 200);
    assert_eq!(lexical.len(), 119);
    assert!(lexical.iter().all(|h| h.id != "5"));
}

#[test]
fn test_inserts_after_reload_continue_deterministically() {
    let straight = tempfile::tempdir().unwrap();
    let interrupted = tempfile::tempdir().unwrap();

    let a = open(straight.path());
    for i in 0..80 {
        a.insert(doc(i)).unwrap();
    }

    {
        let b = open(interrupted.path());
        for i in 0..40 {
            b.insert(doc(i)).unwrap();
        }
        b.checkpoint().unwrap();
        for i in 40..60 {
            b.insert(doc(i)).unwrap();
        }
    }
    let b = open(interrupted.path());
    for i in 60..80 {
        b.insert(doc(i)).unwrap();
    }

    assert_eq!(answers(&a), answers(&b));
    assert_eq!(a.index().max_layer(), b.index().max_layer());
}

#[test]
fn test_torn_wal_tail_loses_only_last_record() {
    let dir = tempfile::tempdir().unwrap();
    {
        let c = open(dir.path());
        for i in 0..10 {
            c.insert(doc(i)).unwrap();
        }
    }
    let wal = dir.path().join(WAL_FILE);
    let len = std::fs::metadata(&wal).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&wal).unwrap();
    file.set_len(len - 5).unwrap();
    drop(file);

    let c = open(dir.path());
    assert_eq!(c.len(), 9);
    assert!(c.get("9").is_none());

    // The log is usable again
    c.insert(doc(9)).unwrap();
    drop(c);
    assert_eq!(open(dir.path()).len(), 10);
}

#[test]
fn test_dimension_conflict_with_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    {
        let c = open(dir.path());
        c.insert(doc(1)).unwrap();
        c.checkpoint().unwrap();
    }
    let err = Collection::open(
        dir.path(),
        IndexParams::new(4, Metric::Cosine),
        Arc::new(GlobalConfig::new()),
        WalSyncMode::Async,
    )
    .unwrap_err();
    assert!(matches!(err, vecsearch_core::IndexError::InvalidParams(_)));
}

#[test]
fn test_in_memory_checkpoint_is_rejected() {
    let c = Collection::in_memory(params(), Arc::new(GlobalConfig::new())).unwrap();
    c.insert(doc(1)).unwrap();
    assert!(c.checkpoint().is_err());
    assert!(c.dir().is_none());
}
