//! Density-based clustering over thought embeddings.
//!
//! Plain DBSCAN with an epsilon picked from the k-distance heuristic. The
//! populations here are small enough that quadratic region queries are fine.

use std::collections::VecDeque;

use crate::embeddings::euclidean_distance;

/// Epsilon floor, guards against degenerate all-identical inputs
const MIN_EPS: f32 = 1e-3;

/// Pick epsilon as the 90th percentile of each point's distance to its k-th
/// nearest neighbour (self excluded).
pub(crate) fn k_distance_eps(points: &[&[f32]], k: usize) -> f32 {
    if points.len() <= k {
        return MIN_EPS;
    }

    let mut k_dists: Vec<f32> = Vec::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        let mut dists: Vec<f32> = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| euclidean_distance(point, other))
            .collect();
        dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        k_dists.push(dists[k - 1]);
    }

    k_dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((k_dists.len() - 1) as f64 * 0.9) as usize;
    k_dists[idx].max(MIN_EPS)
}

/// DBSCAN cluster assignment; `None` marks noise.
pub(crate) fn dbscan(points: &[&[f32]], eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster = 0_usize;

    let region = |p: usize| -> Vec<usize> {
        (0..n)
            .filter(|&q| euclidean_distance(points[p], points[q]) <= eps)
            .collect()
    };

    for p in 0..n {
        if visited[p] {
            continue;
        }
        visited[p] = true;

        let neighbors = region(p);
        if neighbors.len() < min_samples {
            continue; // noise, may still be claimed as a border point later
        }

        labels[p] = Some(cluster);
        let mut queue: VecDeque<usize> = neighbors.into_iter().filter(|&q| q != p).collect();
        while let Some(q) = queue.pop_front() {
            if labels[q].is_none() {
                labels[q] = Some(cluster);
            }
            if !visited[q] {
                visited[q] = true;
                let q_neighbors = region(q);
                if q_neighbors.len() >= min_samples {
                    queue.extend(q_neighbors);
                }
            }
        }
        cluster += 1;
    }

    labels
}
