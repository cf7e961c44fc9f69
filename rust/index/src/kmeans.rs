use hdidx_error::{ErrorCodes, HdidxError};
use rand::{rngs::StdRng, SeedableRng};
use thiserror::Error;

use crate::distance::squared_euclidean;

const MAX_DISTANCE: f32 = f32::MAX / 10.0;
const NUM_ITERS_FOR_MAIN_LOOP: usize = 25;
const NUM_ITERS_NO_IMPROVEMENT: usize = 3;
const CONVERGENCE_THRESHOLD: f32 = 1e-6;

/// The input for kmeans algorithm.
/// - embeddings: The points to cluster, flattened so that point `i` lives at
///   `i*embedding_dimension..(i+1)*embedding_dimension`.
/// - embedding_dimension: The dimension of the points.
/// - k: The number of clusters.
/// - seed: Seeds the choice of initial centers, so that training the same
///   points twice yields the same centers.
pub struct KMeansAlgorithmInput<'referred_data> {
    embeddings: &'referred_data [f32],
    embedding_dimension: usize,
    k: usize,
    seed: u64,
}

impl<'referred_data> KMeansAlgorithmInput<'referred_data> {
    pub fn new(
        embeddings: &'referred_data [f32],
        embedding_dimension: usize,
        k: usize,
        seed: u64,
    ) -> Self {
        KMeansAlgorithmInput {
            embeddings,
            embedding_dimension,
            k,
            seed,
        }
    }

    fn num_points(&self) -> usize {
        self.embeddings
            .len()
            .checked_div(self.embedding_dimension)
            .unwrap_or(0)
    }

    fn point(&self, idx: usize) -> &[f32] {
        &self.embeddings[idx * self.embedding_dimension..(idx + 1) * self.embedding_dimension]
    }
}

/// The output from kmeans.
/// - cluster_centers: The flattened centers, `k * embedding_dimension` values.
/// - cluster_counts: The number of points assigned to each center in the final pass.
/// - total_distance: Sum of squared distances from each point to its center.
#[derive(Debug)]
pub struct KMeansAlgorithmOutput {
    pub cluster_centers: Vec<f32>,
    pub cluster_counts: Vec<usize>,
    pub total_distance: f32,
}

#[derive(Debug)]
struct KMeansAssignOutput {
    cluster_counts: Vec<usize>,
    cluster_farthest_point_idx: Vec<i64>,
    cluster_farthest_distance: Vec<f32>,
    cluster_new_centers: Vec<f32>,
    total_distance: f32,
}

#[derive(Error, Debug)]
pub enum KMeansError {
    #[error("There should be at least one cluster")]
    ZeroClusters,
    #[error("Cannot form {k} clusters from {num_points} points")]
    NotEnoughPoints { k: usize, num_points: usize },
    #[error("Could not assign a point to a center")]
    PointAssignmentFailed,
}

impl HdidxError for KMeansError {
    fn code(&self) -> ErrorCodes {
        match self {
            Self::ZeroClusters => ErrorCodes::InvalidArgument,
            Self::NotEnoughPoints { .. } => ErrorCodes::InvalidArgument,
            Self::PointAssignmentFailed => ErrorCodes::Internal,
        }
    }
}

/// Index and distance of the center nearest to `point`. `centers` is
/// flattened with `dim` values per center.
pub fn nearest_center(centers: &[f32], dim: usize, point: &[f32]) -> Option<(usize, f32)> {
    let mut min_distance = MAX_DISTANCE;
    let mut min_center = None;
    for (center_idx, center) in centers.chunks_exact(dim).enumerate() {
        let distance = squared_euclidean(point, center);
        if distance < min_distance {
            min_distance = distance;
            min_center = Some(center_idx);
        }
    }
    min_center.map(|center_idx| (center_idx, min_distance))
}

// Assigns every point to its nearest center and accumulates the sums needed
// to compute the next centers.
fn kmeansassign(
    input: &KMeansAlgorithmInput,
    centers: &[f32],
) -> Result<KMeansAssignOutput, KMeansError> {
    let dim = input.embedding_dimension;
    let mut cluster_counts = vec![0; input.k];
    let mut cluster_farthest_point_idx: Vec<i64> = vec![-1; input.k];
    let mut cluster_farthest_distance = vec![-MAX_DISTANCE; input.k];
    let mut cluster_new_centers = vec![0.0; input.k * dim];
    let mut total_distance = 0.0;
    for idx in 0..input.num_points() {
        let point = input.point(idx);
        let (min_center, min_distance) =
            nearest_center(centers, dim, point).ok_or(KMeansError::PointAssignmentFailed)?;
        total_distance += min_distance;
        cluster_counts[min_center] += 1;
        if min_distance > cluster_farthest_distance[min_center] {
            cluster_farthest_point_idx[min_center] = idx as i64;
            cluster_farthest_distance[min_center] = min_distance;
        }
        cluster_new_centers[min_center * dim..(min_center + 1) * dim]
            .iter_mut()
            .zip(point)
            .for_each(|(sum, value)| *sum += *value);
    }
    Ok(KMeansAssignOutput {
        cluster_counts,
        cluster_farthest_point_idx,
        cluster_farthest_distance,
        cluster_new_centers,
        total_distance,
    })
}

// Turns the accumulated sums into means. An empty cluster takes over the
// farthest point of the most populated cluster, which splits that cluster on
// the next iteration. Returns how far the centers moved in total.
fn refine_centers(
    input: &KMeansAlgorithmInput,
    kmeansassign_output: &mut KMeansAssignOutput,
    previous_centers: &[f32],
) -> f32 {
    let dim = input.embedding_dimension;
    let mut max_count = 0;
    let mut max_cluster_idx = None;
    for (cluster_idx, count) in kmeansassign_output.cluster_counts.iter().enumerate() {
        if *count > 1 && *count > max_count {
            max_count = *count;
            max_cluster_idx = Some(cluster_idx);
        }
    }

    let mut diff = 0.0;
    for cluster_idx in 0..input.k {
        let range = cluster_idx * dim..(cluster_idx + 1) * dim;
        let count = kmeansassign_output.cluster_counts[cluster_idx];
        if count > 0 {
            kmeansassign_output.cluster_new_centers[range.clone()]
                .iter_mut()
                .for_each(|x| *x /= count as f32);
        } else {
            let donor = max_cluster_idx
                .map(|max_idx| kmeansassign_output.cluster_farthest_point_idx[max_idx])
                .filter(|point_idx| *point_idx >= 0);
            match donor {
                Some(point_idx) => {
                    kmeansassign_output.cluster_new_centers[range.clone()]
                        .copy_from_slice(input.point(point_idx as usize));
                    // The donated point can only seed one empty cluster.
                    if let Some(max_idx) = max_cluster_idx {
                        kmeansassign_output.cluster_farthest_point_idx[max_idx] = -1;
                    }
                }
                None => kmeansassign_output.cluster_new_centers[range.clone()]
                    .copy_from_slice(&previous_centers[range.clone()]),
            }
        }
        diff += squared_euclidean(
            &previous_centers[range.clone()],
            &kmeansassign_output.cluster_new_centers[range],
        );
    }
    diff
}

// Picks k distinct points as the initial centers.
fn init_centers(input: &KMeansAlgorithmInput) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(input.seed);
    let mut centers = Vec::with_capacity(input.k * input.embedding_dimension);
    for point_idx in rand::seq::index::sample(&mut rng, input.num_points(), input.k).iter() {
        centers.extend_from_slice(input.point(point_idx));
    }
    centers
}

pub fn cluster(input: &KMeansAlgorithmInput) -> Result<KMeansAlgorithmOutput, KMeansError> {
    if input.k == 0 || input.embedding_dimension == 0 {
        return Err(KMeansError::ZeroClusters);
    }
    let num_points = input.num_points();
    if num_points < input.k {
        return Err(KMeansError::NotEnoughPoints {
            k: input.k,
            num_points,
        });
    }
    let mut current_centers = init_centers(input);
    let mut min_dist = MAX_DISTANCE;
    let mut no_improvement = 0;
    for _ in 0..NUM_ITERS_FOR_MAIN_LOOP {
        let mut kmeans_assign = kmeansassign(input, &current_centers)?;
        if kmeans_assign.total_distance < min_dist {
            min_dist = kmeans_assign.total_distance;
            no_improvement = 0;
        } else {
            no_improvement += 1;
        }
        let curr_diff = refine_centers(input, &mut kmeans_assign, &current_centers);
        current_centers = kmeans_assign.cluster_new_centers;
        if curr_diff < CONVERGENCE_THRESHOLD || no_improvement >= NUM_ITERS_NO_IMPROVEMENT {
            break;
        }
    }
    // Assign points to the refined centers one last time.
    let kmeans_assign = kmeansassign(input, &current_centers)?;
    Ok(KMeansAlgorithmOutput {
        cluster_centers: current_centers,
        cluster_counts: kmeans_assign.cluster_counts,
        total_distance: kmeans_assign.total_distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<f32> {
        let mut points = Vec::new();
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            points.extend_from_slice(&[jitter, jitter]);
            points.extend_from_slice(&[10.0 + jitter, 10.0 - jitter]);
        }
        points
    }

    #[test]
    fn test_separates_two_blobs() {
        let points = two_blobs();
        let input = KMeansAlgorithmInput::new(&points, 2, 2, 7);
        let output = cluster(&input).expect("Clustering should succeed");
        assert_eq!(output.cluster_counts, vec![10, 10]);
        let (near_origin, _) = nearest_center(&output.cluster_centers, 2, &[0.0, 0.0]).unwrap();
        let (near_ten, _) = nearest_center(&output.cluster_centers, 2, &[10.0, 10.0]).unwrap();
        assert_ne!(near_origin, near_ten);
        assert!(output.total_distance < 1.0);
    }

    #[test]
    fn test_same_seed_same_centers() {
        let points = two_blobs();
        let first = cluster(&KMeansAlgorithmInput::new(&points, 2, 4, 3)).unwrap();
        let second = cluster(&KMeansAlgorithmInput::new(&points, 2, 4, 3)).unwrap();
        assert_eq!(first.cluster_centers, second.cluster_centers);
    }

    #[test]
    fn test_rejects_too_few_points() {
        let points = vec![0.0f32; 6];
        let err = cluster(&KMeansAlgorithmInput::new(&points, 2, 4, 0)).unwrap_err();
        assert!(matches!(
            err,
            KMeansError::NotEnoughPoints {
                k: 4,
                num_points: 3
            }
        ));
        assert!(matches!(
            cluster(&KMeansAlgorithmInput::new(&points, 2, 0, 0)),
            Err(KMeansError::ZeroClusters)
        ));
    }

    #[test]
    fn test_duplicate_points_fill_every_cluster_slot() {
        let points = vec![1.0f32; 8];
        let output = cluster(&KMeansAlgorithmInput::new(&points, 2, 4, 0)).unwrap();
        assert_eq!(output.cluster_centers.len(), 8);
        assert_eq!(output.cluster_counts.iter().sum::<usize>(), 4);
    }
}
