use hdidx_eval::stats::{rank_of, RECALL_THRESHOLDS};
use hdidx_eval::{compute_stats, StatsError};
use hdidx_types::Matrix;
use proptest::prelude::*;
use proptest::test_runner::Config;

// Retrieved lists where query `i` finds its neighbor (id 0) at `positions[i]`,
// or not at all when the position is `None`.
fn retrieval(positions: &[Option<usize>], k: usize) -> (Matrix<u32>, Matrix<u32>) {
    let mut retrieved = Vec::with_capacity(positions.len() * k);
    for position in positions {
        let mut row: Vec<u32> = (1..=k as u32).collect();
        if let Some(position) = position {
            row[*position] = 0;
        }
        retrieved.extend(row);
    }
    let groundtruth = Matrix::new(positions.len(), 1, vec![0; positions.len()]).unwrap();
    (
        groundtruth,
        Matrix::new(positions.len(), k, retrieved).unwrap(),
    )
}

fn positions_strategy() -> impl Strategy<Value = (usize, Vec<Option<usize>>)> {
    (1..300usize).prop_flat_map(|k| {
        (
            Just(k),
            prop::collection::vec(prop::option::of(0..k), 1..40),
        )
    })
}

proptest! {
    #![proptest_config(Config::with_cases(200))]

    #[test]
    fn test_rank_is_position_or_sentinel((k, positions) in positions_strategy()) {
        let (groundtruth, retrieved) = retrieval(&positions, k);
        for (query, position) in positions.iter().enumerate() {
            let rank = rank_of(retrieved.row(query), groundtruth.row(query), k);
            prop_assert_eq!(rank, position.unwrap_or(k));
        }
    }

    #[test]
    fn test_recall_is_monotonic_and_bounded((k, positions) in positions_strategy()) {
        let (groundtruth, retrieved) = retrieval(&positions, k);
        let curve = compute_stats(positions.len(), &groundtruth, &retrieved, k).unwrap();
        let mut previous = 0.0;
        for point in curve.iter() {
            prop_assert!((0.0..=1.0).contains(&point.recall));
            prop_assert!(point.recall >= previous);
            previous = point.recall;
        }
    }

    #[test]
    fn test_ladder_stops_at_k((k, positions) in positions_strategy()) {
        let (groundtruth, retrieved) = retrieval(&positions, k);
        let curve = compute_stats(positions.len(), &groundtruth, &retrieved, k).unwrap();
        let expected: Vec<usize> = RECALL_THRESHOLDS.iter().copied().filter(|t| *t <= k).collect();
        let emitted: Vec<usize> = curve.iter().map(|point| point.threshold).collect();
        prop_assert_eq!(emitted, expected);
    }

    #[test]
    fn test_recall_counts_ranks_below_threshold((k, positions) in positions_strategy()) {
        let (groundtruth, retrieved) = retrieval(&positions, k);
        let curve = compute_stats(positions.len(), &groundtruth, &retrieved, k).unwrap();
        for point in curve.iter() {
            let hits = positions
                .iter()
                .filter(|position| matches!(position, Some(p) if *p < point.threshold))
                .count();
            prop_assert_eq!(point.recall, hits as f64 / positions.len() as f64);
        }
    }
}

#[test]
fn test_scenario_three_queries() {
    let (groundtruth, retrieved) = retrieval(&[Some(0), Some(5), None], 100);
    let curve = compute_stats(3, &groundtruth, &retrieved, 100).unwrap();
    let lines: Vec<String> = curve
        .iter()
        .map(|point| format!("{}={:.4}", point.threshold, point.recall))
        .collect();
    assert_eq!(
        lines,
        vec![
            "1=0.3333", "2=0.3333", "5=0.3333", "10=0.6667", "20=0.6667", "50=0.6667",
            "100=0.6667"
        ]
    );
}

#[test]
fn test_no_queries_is_an_error() {
    let (groundtruth, retrieved) = retrieval(&[], 10);
    assert_eq!(
        compute_stats(0, &groundtruth, &retrieved, 10),
        Err(StatsError::NoQueries)
    );
}
