//! Cluster geometry: centroid seeding, selection, and re-clustering

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::core::cache::cosine_similarity;
use crate::core::types::Cluster;

/// Deterministic initial centroids spread over the unit sphere
///
/// Each centroid draws its components from a normal distribution seeded
/// by its index and normalizes, which spreads `count` directions evenly
/// in expectation and reproduces exactly across restarts.
pub fn initial_centroids(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|index| {
            let mut rng = StdRng::seed_from_u64(0x5eed ^ index as u64);
            let mut centroid: Vec<f32> = (0..dimension)
                .map(|_| StandardNormal.sample(&mut rng))
                .collect();
            normalize(&mut centroid);
            centroid
        })
        .collect()
}

/// Cluster with maximum cosine similarity; ties break to the lowest
/// `total_steps`
pub fn nearest_cluster<'a>(clusters: &'a [Cluster], embedding: &[f32]) -> Option<&'a Cluster> {
    clusters
        .iter()
        .map(|cluster| (cluster, cosine_similarity(&cluster.centroid, embedding)))
        .max_by(|(a, sim_a), (b, sim_b)| {
            sim_a
                .partial_cmp(sim_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Reversed steps comparison: fewer steps wins the tie
                .then_with(|| b.total_steps.cmp(&a.total_steps))
        })
        .map(|(cluster, _)| cluster)
}

/// One streaming k-means step over recent embeddings
///
/// Assigns each embedding to its nearest centroid, recomputes means, and
/// renormalizes. Centroids with no assigned embeddings keep their
/// position. Returns the updated centroids in input order.
pub fn kmeans_step(centroids: &[Vec<f32>], embeddings: &[Vec<f32>]) -> Vec<Vec<f32>> {
    if centroids.is_empty() {
        return Vec::new();
    }
    let dimension = centroids[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for embedding in embeddings {
        if embedding.len() != dimension {
            continue;
        }
        let nearest = centroids
            .iter()
            .enumerate()
            .map(|(index, centroid)| (index, cosine_similarity(centroid, embedding)))
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(index, _)| index);
        if let Some(index) = nearest {
            for (slot, value) in sums[index].iter_mut().zip(embedding.iter()) {
                *slot += value;
            }
            counts[index] += 1;
        }
    }

    centroids
        .iter()
        .enumerate()
        .map(|(index, old)| {
            if counts[index] == 0 {
                return old.clone();
            }
            let mut updated: Vec<f32> = sums[index]
                .iter()
                .map(|sum| sum / counts[index] as f32)
                .collect();
            normalize(&mut updated);
            updated
        })
        .collect()
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
