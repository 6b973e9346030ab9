use super::*;
use crate::metric::{cosine_distance, l2_squared};

#[test]
fn test_euclidean_distance() {
    let a = [1.0, 2.0, 3.0];
    let b = [4.0, 5.0, 6.0];
    // diffs: -3, -3, -3. sq: 9, 9, 9. sum: 27.
    let dist = Metric::L2.distance(&a, &b);
    assert!((dist - 27.0).abs() < f64::EPSILON);
    assert!((l2_squared(&a, &a)).abs() < f64::EPSILON);
}

#[test]
fn test_cosine_distance() {
    // Orthogonal: 1 - 0 = 1.
    let a = [1.0, 0.0];
    let b = [0.0, 1.0];
    assert!((Metric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-12);

    // Same direction, different length: still 0. No implicit normalisation
    // needed for cosine.
    let a2 = [3.0, 0.0];
    assert!(Metric::Cosine.distance(&a, &a2).abs() < 1e-12);

    // Opposite: 1 - (-1) = 2.
    let c = [-1.0, 0.0];
    assert!((Metric::Cosine.distance(&a, &c) - 2.0).abs() < 1e-12);
}

#[test]
fn test_cosine_zero_vector() {
    let zero = [0.0, 0.0, 0.0];
    let a = [1.0, 2.0, 3.0];
    assert!((cosine_distance(&zero, &a) - 1.0).abs() < f64::EPSILON);
    assert!((cosine_distance(&zero, &zero) - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_scores_are_monotone() {
    for metric in [Metric::Cosine, Metric::L2] {
        let near = metric.score(0.1);
        let far = metric.score(0.9);
        assert!(near > far, "{metric}: score must fall as distance grows");
    }
    assert!((Metric::Cosine.score(0.0) - 1.0).abs() < f64::EPSILON);
    assert!(Metric::Cosine.score(2.0).abs() < f64::EPSILON);
    assert!((Metric::L2.score(0.0) - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_metric_from_str() {
    assert_eq!("COSINE".parse::<Metric>().unwrap(), Metric::Cosine);
    assert_eq!("euclidean".parse::<Metric>().unwrap(), Metric::L2);
    assert!("poincare".parse::<Metric>().is_err());
}

#[test]
fn test_params_validation() {
    assert!(IndexParams::new(4, Metric::Cosine).validate().is_ok());
    assert!(IndexParams::new(0, Metric::Cosine).validate().is_err());
    assert!(IndexParams::new(4, Metric::L2).with_m(1).validate().is_err());
    assert!(IndexParams::new(4, Metric::L2)
        .with_ef_construction(0)
        .validate()
        .is_err());
}

#[test]
fn test_hit_ordering_breaks_ties_by_id() {
    let mut hits = vec![
        SearchHit::new("b", 0.5),
        SearchHit::new("c", 0.9),
        SearchHit::new("a", 0.5),
    ];
    types::sort_hits(&mut hits);
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[test]
fn test_completeness_check() {
    assert_eq!(Completeness::check(5, 5), Completeness::Complete);
    assert_eq!(
        Completeness::check(5, 2),
        Completeness::InsufficientCandidates {
            requested: 5,
            found: 2
        }
    );
}

#[test]
fn test_global_config_fraction_roundtrip() {
    let config = GlobalConfig::new();
    config.set_prefilter_fraction(0.25);
    assert!((config.get_prefilter_fraction() - 0.25).abs() < 1e-9);
    config.set_prefilter_fraction(7.0);
    assert!((config.get_prefilter_fraction() - 1.0).abs() < 1e-9);
}
