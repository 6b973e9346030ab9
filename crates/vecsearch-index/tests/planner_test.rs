use std::sync::Arc;
use vecsearch_core::{Completeness, Document, FilterExpr, GlobalConfig, IndexParams, Metric, SearchHit};
use vecsearch_index::{
    CandidateSource, Collection, Fusion, HybridWeights, PlanKind, QueryRequest, RerankMode,
};

fn collection(n: usize) -> Collection {
    let c = Collection::in_memory(IndexParams::new(2, Metric::L2), Arc::new(GlobalConfig::new()))
        .unwrap();
    for i in 0..n {
        let x = i as f64;
        let topic = if i % 10 == 0 { "finance" } else { "travel" };
        c.insert(
            Document::new(format!("d{i:03}"), vec![x, 0.0])
                .with_text(format!("{topic} story"))
                .with_attribute("topic", topic)
                .with_attribute("rank", i.to_string()),
        )
        .unwrap();
    }
    c
}

fn ids(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.id.as_str()).collect()
}

#[test]
fn test_knn_request() {
    let c = collection(50);
    let resp = c
        .planner()
        .execute(&QueryRequest::Knn {
            vector: vec![10.2, 0.0],
            k: 3,
            ef: None,
        })
        .unwrap();
    assert_eq!(resp.plan, PlanKind::Knn);
    assert_eq!(ids(&resp.hits), vec!["d010", "d011", "d009"]);
    assert!(resp.completeness.is_complete());
}

#[test]
fn test_filtered_knn_reports_shortfall() {
    let c = collection(20);
    // Matches d000 and d010 only
    let resp = c
        .planner()
        .execute(&QueryRequest::FilteredKnn {
            vector: vec![3.0, 0.0],
            k: 5,
            ef: Some(4),
            filter: FilterExpr::matches("topic", "finance"),
        })
        .unwrap();
    assert_eq!(ids(&resp.hits), vec!["d000", "d010"]);
    assert_eq!(
        resp.completeness,
        Completeness::InsufficientCandidates {
            requested: 5,
            found: 2
        }
    );
}

#[test]
fn test_selective_filter_uses_exact_scan() {
    let c = collection(200);
    let resp = c
        .planner()
        .execute(&QueryRequest::FilteredKnn {
            vector: vec![0.0, 0.0],
            k: 3,
            ef: None,
            filter: FilterExpr::ids(["d150", "d020", "d199", "missing"]),
        })
        .unwrap();
    assert_eq!(resp.plan, PlanKind::PreFilter);
    assert_eq!(ids(&resp.hits), vec!["d020", "d150", "d199"]);
}

#[test]
fn test_broad_filter_post_filters() {
    let c = collection(200);
    let resp = c
        .planner()
        .execute(&QueryRequest::FilteredKnn {
            vector: vec![100.0, 0.0],
            k: 4,
            ef: Some(8),
            filter: FilterExpr::matches("topic", "travel")
                .and(FilterExpr::range("rank", Some(98), None)),
        })
        .unwrap();
    assert!(matches!(resp.plan, PlanKind::PostFilter { .. }));
    assert_eq!(ids(&resp.hits), vec!["d099", "d101", "d098", "d102"]);
}

#[test]
fn test_filter_excludes_deleted() {
    let c = collection(20);
    c.delete("d010").unwrap();
    let resp = c
        .planner()
        .execute(&QueryRequest::FilteredKnn {
            vector: vec![10.0, 0.0],
            k: 2,
            ef: None,
            filter: FilterExpr::matches("topic", "finance"),
        })
        .unwrap();
    assert_eq!(ids(&resp.hits), vec!["d000"]);
}

#[test]
fn test_hybrid_with_empty_lexical_side() {
    let c = collection(30);
    let resp = c
        .planner()
        .execute(&QueryRequest::Hybrid {
            vector: vec![5.0, 0.0],
            k: 3,
            ef: None,
            lexical: CandidateSource::ids(Vec::<String>::new()),
            weights: HybridWeights {
                lexical: 0.5,
                vector: 0.5,
            },
            fusion: Fusion::MinMax,
        })
        .unwrap();
    assert_eq!(ids(&resp.hits), vec!["d005", "d004", "d006"]);
    assert!((resp.hits[0].score - 0.5).abs() < 1e-12);
}

#[test]
fn test_hybrid_text_boosts_lexical_matches() {
    let c = collection(30);
    let resp = c
        .planner()
        .execute(&QueryRequest::Hybrid {
            vector: vec![12.0, 0.0],
            k: 3,
            ef: Some(30),
            lexical: CandidateSource::text("finance"),
            weights: HybridWeights {
                lexical: 0.8,
                vector: 0.2,
            },
            fusion: Fusion::MinMax,
        })
        .unwrap();
    assert_eq!(resp.plan, PlanKind::Hybrid);
    assert_eq!(resp.hits[0].id, "d010");
    assert!(ids(&resp.hits).contains(&"d000") || ids(&resp.hits).contains(&"d020"));
}

#[test]
fn test_rerank_replace_window() {
    let c = collection(10);
    let resp = c
        .planner()
        .execute(&QueryRequest::Rerank {
            vector: vec![0.0, 0.0],
            k: 4,
            candidates: CandidateSource::ids(["d009", "d005", "d001", "ghost", "d007", "d002"]),
            rerank_docs: Some(3),
            mode: RerankMode::Replace,
        })
        .unwrap();
    // Window of three re-ranked by distance, the rest in first-pass order
    assert_eq!(ids(&resp.hits), vec!["d001", "d005", "d009", "d007"]);
    // Tail keeps its first-pass score, not an exact one
    assert!(resp.hits[3].distance.is_none());
    assert_eq!(resp.hits[3].score, 1.0);
}

#[test]
fn test_rerank_add_mode_keeps_first_pass_weight() {
    let c = collection(10);
    let first_pass = vec![SearchHit::new("d008", 10.0), SearchHit::new("d001", 0.0)];
    let resp = c
        .planner()
        .execute(&QueryRequest::Rerank {
            vector: vec![0.0, 0.0],
            k: 2,
            candidates: CandidateSource::Hits { hits: first_pass },
            rerank_docs: None,
            mode: RerankMode::Add { weight: 1.0 },
        })
        .unwrap();
    assert_eq!(ids(&resp.hits), vec!["d008", "d001"]);
}

#[test]
fn test_rerank_shortfall() {
    let c = collection(5);
    let resp = c
        .planner()
        .execute(&QueryRequest::Rerank {
            vector: vec![0.0, 0.0],
            k: 3,
            candidates: CandidateSource::ids(["d001", "nope"]),
            rerank_docs: None,
            mode: RerankMode::default(),
        })
        .unwrap();
    assert_eq!(resp.hits.len(), 1);
    assert!(!resp.completeness.is_complete());
}

#[test]
fn test_request_from_json() {
    let raw = r#"{
        "kind": "filtered_knn",
        "vector": [1.0, 0.0],
        "k": 2,
        "filter": {"op": "range", "key": "rank", "gte": 3, "lte": 4}
    }"#;
    let request: QueryRequest = serde_json::from_str(raw).unwrap();
    let resp = collection(10).planner().execute(&request).unwrap();
    assert_eq!(ids(&resp.hits), vec!["d003", "d004"]);
}

#[test]
fn test_huge_k_and_ef_from_json_do_not_overflow() {
    let c = collection(10);
    let knn = format!(r#"{{"kind": "knn", "vector": [0.0, 0.0], "k": 1, "ef": {}}}"#, usize::MAX);
    let request: QueryRequest = serde_json::from_str(&knn).unwrap();
    let resp = c.planner().execute(&request).unwrap();
    assert_eq!(ids(&resp.hits), vec!["d000"]);

    let request = QueryRequest::Hybrid {
        vector: vec![0.0, 0.0],
        k: usize::MAX,
        ef: Some(usize::MAX),
        lexical: CandidateSource::text("finance"),
        weights: HybridWeights::default(),
        fusion: Fusion::MinMax,
    };
    let resp = c.planner().execute(&request).unwrap();
    assert_eq!(resp.hits.len(), 10);
    assert!(!resp.completeness.is_complete());

    let request = QueryRequest::FilteredKnn {
        vector: vec![0.0, 0.0],
        k: usize::MAX,
        ef: Some(usize::MAX),
        filter: FilterExpr::matches("topic", "travel"),
    };
    assert_eq!(c.planner().execute(&request).unwrap().hits.len(), 9);
}
