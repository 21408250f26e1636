//! Spectral clustering.
//!
//! 1. Locally scaled Gaussian affinity: `exp(-d(i,j)² / (σ_i σ_j))` where
//!    `d = 1 - similarity` and `σ_i` is the distance from `i` to its
//!    `neighbor_rank`-th nearest neighbor. Seeded pairs are overridden with
//!    1.0 (compatible labels) or `seed_repulsion` (conflicting labels).
//! 2. Symmetric normalization by the degree vector.
//! 3. Top-k eigenvectors by power iteration with deflation.
//! 4. Row-normalized eigenvector rows are clustered by repeated k-means,
//!    alternating orthogonal and random seeding, keeping the run with the
//!    lowest distortion.
//!
//! The affinity matrix is O(n²); inputs beyond `max_matrix_size` are
//! truncated with a warning.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{try_alloc, ClusterResult};
use crate::vector::TermVector;

use super::params::{ClusteringParams, SpectralParams};
use super::record::ClusterRecord;
use super::registry::ClusterRegistry;
use super::sampling::{rng_from_seed, sample_without_replacement};

/// Smallest local scale; keeps identical vectors from dividing by zero.
const MIN_SCALE: f64 = 1e-9;

/// Dense row-major square matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SquareMatrix {
    /// Zero matrix of order `n`.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::OutOfMemory` if `n * n` cells cannot be
    /// allocated.
    pub fn zeros(n: usize) -> ClusterResult<Self> {
        let cells = n.checked_mul(n).unwrap_or(usize::MAX);
        Ok(Self {
            n,
            data: try_alloc("spectral matrix", cells, 0.0)?,
        })
    }

    /// Order of the matrix.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    /// Row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// True if `|a(i,j) - a(j,i)| <= tolerance` everywhere.
    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        (0..self.n).all(|i| (i + 1..self.n).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tolerance))
    }

    fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.row(i).iter().zip(x).map(|(a, b)| a * b).sum();
        }
    }
}

/// Summary of a spectral run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralOutcome {
    /// Clusters written.
    pub clusters: usize,
    /// Cluster count after clamping to half the input.
    pub k: usize,
    /// Vectors dropped by the matrix cap.
    pub truncated: usize,
    /// Total squared distortion of the chosen embedding partition.
    pub distortion: f64,
    /// True if the chosen k-means run settled below tolerance.
    pub converged: bool,
}

/// Cluster `indices` spectrally into `registry`.
///
/// # Errors
///
/// Returns `ClusterError::OutOfMemory` if the affinity matrix or embedding
/// cannot be allocated. Nothing is written to the registry in that case.
pub fn spectral_cluster(
    vectors: &[&TermVector],
    indices: &[usize],
    params: &ClusteringParams,
    registry: &mut ClusterRegistry,
) -> ClusterResult<SpectralOutcome> {
    let cap = params.max_matrix_size;
    let truncated = indices.len().saturating_sub(cap);
    if truncated > 0 {
        warn!(input = indices.len(), cap, truncated, "spectral input exceeds matrix cap; truncating");
    }
    let base: Vec<usize> = indices.iter().copied().take(cap).collect();
    let n = base.len();
    if n == 0 {
        return Ok(SpectralOutcome {
            clusters: 0,
            k: 0,
            truncated,
            distortion: 0.0,
            converged: true,
        });
    }
    let subset: Vec<&TermVector> = base.iter().map(|&i| vectors[i]).collect();
    let k = params.desired_clusters.min(n / 2).max(1);
    let mut rng = rng_from_seed(params.seed);

    let mut matrix = affinity_matrix(&subset, params)?;
    normalize_symmetric(&mut matrix);
    let mut embedding = top_eigenvectors(&mut matrix, k, &params.spectral, &mut rng)?;
    normalize_rows(&mut embedding, k);

    let best = embedded_kmeans(&embedding, n, k, params, &mut rng);

    let mut clusters = 0;
    for c in 0..k {
        let members: Vec<usize> = best
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == c)
            .map(|(i, _)| base[i])
            .collect();
        if members.is_empty() {
            continue;
        }
        let name = members
            .iter()
            .filter_map(|&m| vectors[m].seed())
            .find(|s| !registry.contains(s))
            .map(str::to_string)
            .unwrap_or_else(|| registry.generate_name());
        let record = ClusterRecord::from_members(&name, members, vectors, params);
        registry.add(name, record)?;
        clusters += 1;
    }

    info!(
        n,
        k,
        clusters,
        distortion = best.distortion,
        converged = best.converged,
        "spectral clustering finished"
    );
    Ok(SpectralOutcome {
        clusters,
        k,
        truncated,
        distortion: best.distortion,
        converged: best.converged,
    })
}

/// Locally scaled affinity matrix over `vectors`, diagonal 1.
///
/// The upper triangle is computed and mirrored, so the result is exactly
/// symmetric even for an asymmetric custom similarity.
pub fn affinity_matrix(vectors: &[&TermVector], params: &ClusteringParams) -> ClusterResult<SquareMatrix> {
    let n = vectors.len();
    let mut dist = SquareMatrix::zeros(n)?;
    for i in 0..n {
        for j in (i + 1)..n {
            let d = params.similarity.distance(vectors[i], vectors[j]);
            dist.set(i, j, d);
            dist.set(j, i, d);
        }
    }

    let rank = params.spectral.neighbor_rank.min(n / 2).max(1);
    let scales: Vec<f64> = (0..n)
        .map(|i| {
            let mut row: Vec<f64> = (0..n).filter(|&j| j != i).map(|j| dist.get(i, j)).collect();
            if row.is_empty() {
                return 1.0;
            }
            row.sort_by(f64::total_cmp);
            row[(rank - 1).min(row.len() - 1)].max(MIN_SCALE)
        })
        .collect();

    let mut affinity = dist;
    for i in 0..n {
        affinity.set(i, i, 1.0);
        for j in (i + 1)..n {
            let d = affinity.get(i, j);
            let value = match (vectors[i].seed(), vectors[j].seed()) {
                (Some(a), Some(b)) if params.seeds_conflict(a, b) => params.spectral.seed_repulsion,
                (Some(_), Some(_)) => 1.0,
                _ => (-(d * d) / (scales[i] * scales[j])).exp(),
            };
            affinity.set(i, j, value);
            affinity.set(j, i, value);
        }
    }
    Ok(affinity)
}

/// `a(i,j) /= sqrt(deg_i · deg_j)`; zero-degree rows are left untouched.
pub fn normalize_symmetric(matrix: &mut SquareMatrix) {
    let n = matrix.n();
    let inv: Vec<f64> = (0..n)
        .map(|i| {
            let degree: f64 = matrix.row(i).iter().sum();
            if degree > 0.0 {
                1.0 / degree.sqrt()
            } else {
                0.0
            }
        })
        .collect();
    for i in 0..n {
        for j in i..n {
            if inv[i] == 0.0 || inv[j] == 0.0 {
                continue;
            }
            let value = matrix.get(i, j) * inv[i] * inv[j];
            matrix.set(i, j, value);
            matrix.set(j, i, value);
        }
    }
}

/// Top `k` eigenvectors by power iteration with deflation.
///
/// Returns an `n × k` row-major matrix whose column `e` is the `e`-th
/// eigenvector. `matrix` is deflated in place.
pub(crate) fn top_eigenvectors<R: Rng + ?Sized>(
    matrix: &mut SquareMatrix,
    k: usize,
    spectral: &SpectralParams,
    rng: &mut R,
) -> ClusterResult<Vec<f64>> {
    let n = matrix.n();
    let mut out = try_alloc("spectral embedding", n * k, 0.0)?;
    let mut x = vec![0.0; n];
    let mut y = vec![0.0; n];

    for e in 0..k {
        for v in x.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
        if !normalize(&mut x) {
            continue;
        }

        let mut iterations = 0;
        while iterations < spectral.power_iterations {
            iterations += 1;
            matrix.mul_vec(&x, &mut y);
            if !normalize(&mut y) {
                break;
            }
            // Negative eigenvalues flip the sign every step.
            let same: f64 = x.iter().zip(&y).map(|(a, b)| (a - b) * (a - b)).sum();
            let flipped: f64 = x.iter().zip(&y).map(|(a, b)| (a + b) * (a + b)).sum();
            std::mem::swap(&mut x, &mut y);
            if same.min(flipped).sqrt() < spectral.power_tolerance {
                break;
            }
        }

        matrix.mul_vec(&x, &mut y);
        let lambda: f64 = x.iter().zip(&y).map(|(a, b)| a * b).sum();
        debug!(eigen = e, lambda, iterations, "power iteration converged");

        for i in 0..n {
            out[i * k + e] = x[i];
            for j in 0..n {
                let value = matrix.get(i, j) - lambda * x[i] * x[j];
                matrix.set(i, j, value);
            }
        }
    }
    Ok(out)
}

/// Scale `v` to unit length; false if it is zero.
fn normalize(v: &mut [f64]) -> bool {
    let norm = v.iter().map(|a| a * a).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for a in v.iter_mut() {
        *a /= norm;
    }
    true
}

/// Unit-normalize each row of an `n × dim` matrix, skipping zero rows.
fn normalize_rows(points: &mut [f64], dim: usize) {
    for row in points.chunks_mut(dim) {
        normalize(row);
    }
}

#[derive(Debug, Clone)]
struct Partition {
    labels: Vec<usize>,
    distortion: f64,
    converged: bool,
}

fn embedded_kmeans<R: Rng + ?Sized>(
    points: &[f64],
    n: usize,
    k: usize,
    params: &ClusteringParams,
    rng: &mut R,
) -> Partition {
    let mut best: Option<Partition> = None;
    for restart in 0..params.max_iterations {
        let seeds = if restart % 2 == 0 {
            orthogonal_seeds(points, n, k, (restart / 2) % n)
        } else {
            sample_without_replacement(n, k, rng)
        };
        let run = lloyd(points, n, k, &seeds, &params.spectral);
        if best.as_ref().map_or(true, |b| run.distortion < b.distortion) {
            best = Some(run);
        }
    }
    best.unwrap_or_else(|| lloyd(points, n, k, &orthogonal_seeds(points, n, k, 0), &params.spectral))
}

/// Furthest-point seeding by angle: each new seed is the row whose largest
/// absolute dot product with the chosen rows is smallest.
fn orthogonal_seeds(points: &[f64], n: usize, dim: usize, first: usize) -> Vec<usize> {
    let row = |i: usize| &points[i * dim..(i + 1) * dim];
    let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();
    let mut chosen = vec![first];
    while chosen.len() < dim.min(n) {
        let next = (0..n)
            .filter(|i| !chosen.contains(i))
            .map(|i| {
                let worst = chosen
                    .iter()
                    .map(|&c| dot(row(i), row(c)).abs())
                    .fold(0.0, f64::max);
                (i, worst)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        match next {
            Some(i) => chosen.push(i),
            None => break,
        }
    }
    chosen
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn assign(points: &[f64], n: usize, dim: usize, centroids: &[f64], labels: &mut [usize]) -> f64 {
    let k = centroids.len() / dim;
    let mut distortion = 0.0;
    for i in 0..n {
        let p = &points[i * dim..(i + 1) * dim];
        let mut best = (0, f64::INFINITY);
        for c in 0..k {
            let d = squared_distance(p, &centroids[c * dim..(c + 1) * dim]);
            if d < best.1 {
                best = (c, d);
            }
        }
        labels[i] = best.0;
        distortion += best.1;
    }
    distortion
}

/// Lloyd iterations in the embedding, `dim == k`.
fn lloyd(points: &[f64], n: usize, dim: usize, seeds: &[usize], spectral: &SpectralParams) -> Partition {
    let mut centroids: Vec<f64> = seeds
        .iter()
        .flat_map(|&s| points[s * dim..(s + 1) * dim].iter().copied())
        .collect();
    let k = seeds.len();
    let mut labels = vec![0; n];
    let mut converged = false;

    for _ in 0..spectral.kmeans_iterations {
        assign(points, n, dim, &centroids, &mut labels);
        let mut sums = vec![0.0; k * dim];
        let mut sizes = vec![0usize; k];
        for i in 0..n {
            let c = labels[i];
            sizes[c] += 1;
            for d in 0..dim {
                sums[c * dim + d] += points[i * dim + d];
            }
        }
        let mut movement = 0.0;
        for c in 0..k {
            if sizes[c] == 0 {
                continue;
            }
            for d in 0..dim {
                let updated = sums[c * dim + d] / sizes[c] as f64;
                let old = centroids[c * dim + d];
                movement += (updated - old) * (updated - old);
                centroids[c * dim + d] = updated;
            }
        }
        if movement < spectral.kmeans_tolerance {
            converged = true;
            break;
        }
    }

    let distortion = assign(points, n, dim, &centroids, &mut labels);
    Partition {
        labels,
        distortion,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Similarity;

    fn blobs() -> Vec<TermVector> {
        vec![
            TermVector::from_pairs("a1", 1.0, vec![(0, 1.0), (1, 0.2)]),
            TermVector::from_pairs("a2", 1.0, vec![(0, 1.0), (2, 0.3)]),
            TermVector::from_pairs("a3", 1.0, vec![(0, 0.9), (1, 0.1)]),
            TermVector::from_pairs("b1", 1.0, vec![(5, 1.0), (6, 0.2)]),
            TermVector::from_pairs("b2", 1.0, vec![(5, 1.0), (7, 0.3)]),
            TermVector::from_pairs("b3", 1.0, vec![(5, 0.9), (6, 0.1)]),
        ]
    }

    #[test]
    fn test_affinity_symmetric_with_unit_diagonal() {
        let mut owned = blobs();
        owned[0] = owned[0].clone().with_seed("X");
        owned[4] = owned[4].clone().with_seed("X");
        owned[5] = owned[5].clone().with_seed("Y");
        let vectors: Vec<&TermVector> = owned.iter().collect();
        // Asymmetric on purpose.
        let params = ClusteringParams::default().with_similarity(Similarity::custom(|a, b| {
            let base = a.weights().dot(b.weights());
            if a.key() < b.key() {
                base
            } else {
                base * 0.5
            }
        }));

        let m = affinity_matrix(&vectors, &params).unwrap();

        assert!(m.is_symmetric(0.0));
        for i in 0..m.n() {
            assert_eq!(m.get(i, i), 1.0);
        }
        assert_eq!(m.get(0, 4), 1.0);
        assert_eq!(m.get(0, 5), params.spectral.seed_repulsion);
        println!("[PASS] test_affinity_symmetric_with_unit_diagonal - n={}", m.n());
    }

    #[test]
    fn test_power_iteration_on_diagonal() {
        let mut m = SquareMatrix::zeros(3).unwrap();
        m.set(0, 0, 3.0);
        m.set(1, 1, 1.0);
        m.set(2, 2, 0.25);
        let mut rng = rng_from_seed(5);
        let v = top_eigenvectors(&mut m, 2, &SpectralParams::default(), &mut rng).unwrap();

        // Column 0 is ±e0, column 1 is ±e1.
        assert!(v[0].abs() > 0.999, "first eigenvector {:?}", v);
        assert!(v[2 * 2].abs() < 0.05);
        assert!(v[2 + 1].abs() > 0.99, "second eigenvector {:?}", v);
    }

    #[test]
    fn test_normalize_symmetric_degrees() {
        let mut m = SquareMatrix::zeros(2).unwrap();
        m.set(0, 0, 1.0);
        m.set(0, 1, 1.0);
        m.set(1, 0, 1.0);
        m.set(1, 1, 1.0);
        normalize_symmetric(&mut m);
        for i in 0..2 {
            for j in 0..2 {
                assert!((m.get(i, j) - 0.5).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_two_blobs() {
        let owned = blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let params = ClusteringParams::default().with_desired_clusters(2);
        let mut registry = ClusterRegistry::new();

        let outcome = spectral_cluster(&vectors, &[0, 1, 2, 3, 4, 5], &params, &mut registry).unwrap();

        assert_eq!(outcome.k, 2);
        assert_eq!(registry.len(), 2);
        for (_, record) in registry.iter() {
            let mut members = record.members().to_vec();
            members.sort_unstable();
            assert!(members == vec![0, 1, 2] || members == vec![3, 4, 5], "mixed cluster {:?}", members);
        }
        println!("[PASS] test_two_blobs - distortion={:.4}", outcome.distortion);
    }

    #[test]
    fn test_k_clamped_to_half() {
        let owned = blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let mut registry = ClusterRegistry::new();
        let outcome = spectral_cluster(&vectors, &[0, 1, 2], &ClusteringParams::default(), &mut registry).unwrap();
        assert_eq!(outcome.k, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.iter().next().map(|(_, r)| r.len()), Some(3));
    }

    #[test]
    fn test_matrix_cap_truncates_input() {
        let mut owned = blobs();
        for i in 0..4 {
            owned.push(TermVector::from_pairs(format!("c{}", i), 1.0, vec![(9, 1.0), (10 + i, 0.2)]));
        }
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let indices: Vec<usize> = (0..owned.len()).collect();
        let params = ClusteringParams::default().with_desired_clusters(2).with_max_matrix_size(4);
        let mut registry = ClusterRegistry::new();

        let outcome = spectral_cluster(&vectors, &indices, &params, &mut registry).unwrap();

        assert_eq!(outcome.truncated, 6);
        let mut members: Vec<usize> = registry.iter().flat_map(|(_, r)| r.members().to_vec()).collect();
        members.sort_unstable();
        assert_eq!(members, vec![0, 1, 2, 3]);
        println!("[PASS] test_matrix_cap_truncates_input - truncated={}", outcome.truncated);
    }

    #[test]
    fn test_normalize_rows_leaves_zero_row() {
        let mut points = vec![3.0, 4.0, 0.0, 0.0, 0.0, 2.0];
        normalize_rows(&mut points, 2);
        assert_eq!(points, vec![0.6, 0.8, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zero_vector_still_clustered() {
        let mut owned = blobs();
        owned.push(TermVector::from_pairs("empty", 1.0, vec![]));
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let indices: Vec<usize> = (0..owned.len()).collect();
        let params = ClusteringParams::default().with_desired_clusters(2);
        let mut registry = ClusterRegistry::new();

        let outcome = spectral_cluster(&vectors, &indices, &params, &mut registry).unwrap();

        assert!(outcome.distortion.is_finite());
        let mut members: Vec<usize> = registry.iter().flat_map(|(_, r)| r.members().to_vec()).collect();
        members.sort_unstable();
        assert_eq!(members, indices);
        println!("[PASS] test_zero_vector_still_clustered - clusters={}", outcome.clusters);
    }

    #[test]
    fn test_orthogonal_seeds_pick_distinct_directions() {
        let points = vec![1.0, 0.0, 0.9, 0.1, 0.0, 1.0];
        assert_eq!(orthogonal_seeds(&points, 3, 2, 0), vec![0, 2]);
    }
}
