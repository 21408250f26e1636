//! Tight clustering by resampling and co-membership voting.
//!
//! For each candidate `k` (starting at `desired_clusters + k_offset` and
//! decreasing) the working pool is resampled `trials` times. Each trial runs
//! k-means on the sample, assigns the out-of-sample vectors to their nearest
//! resulting centroid, and increments the co-membership count of every pair
//! that shares a cluster. Pairs whose count reaches
//! `trials * (1 - alpha * (1 - sample_ratio))` are linked; linked cliques
//! become candidate groups and the `top_q` largest are kept.
//!
//! A candidate is committed once it matches a candidate from the previous
//! pass with Jaccard similarity above `beta`. Its members leave the pool and
//! `k` drops by one. After `stall_limit` passes without a commit, alpha is
//! relaxed by `alpha_step`, capped at 1.0.
//!
//! Vectors that never land in a committed group stay unclustered.

use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{try_alloc, ClusterResult};
use crate::vector::TermVector;

use super::cancel::CancellationToken;
use super::kmeans::{kmeans, nearest_centroid, KMeansInit};
use super::params::ClusteringParams;
use super::record::ClusterRecord;
use super::registry::ClusterRegistry;
use super::sampling::{rng_from_seed, sample_size, sample_without_replacement};

/// Smallest `k` a pass runs with.
const MIN_K: usize = 2;

/// Summary of a tight clustering run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TightOutcome {
    /// Clusters committed to the registry.
    pub committed: usize,
    /// Passes over `k` performed.
    pub passes: usize,
    /// True when the run stopped because it had enough clusters or ran out
    /// of vectors, rather than hitting the pass cap.
    pub converged: bool,
    /// True when the cancellation token stopped the run.
    pub cancelled: bool,
    /// Vectors dropped by the matrix cap.
    pub truncated: usize,
    /// Alpha in effect when the run stopped.
    pub final_alpha: f64,
}

/// Find up to `desired_clusters` tight clusters among `indices`.
///
/// # Errors
///
/// Returns `ClusterError::OutOfMemory` when the co-membership matrix cannot
/// be allocated. Clusters committed before a failure stay in `registry`.
pub fn tight_cluster(
    vectors: &[&TermVector],
    indices: &[usize],
    params: &ClusteringParams,
    cancel: &CancellationToken,
    registry: &mut ClusterRegistry,
) -> ClusterResult<TightOutcome> {
    let tight = &params.tight;
    let cap = params.max_matrix_size;
    let truncated = indices.len().saturating_sub(cap);
    if truncated > 0 {
        warn!(
            input = indices.len(),
            cap, truncated, "tight clustering input exceeds matrix cap; truncating"
        );
    }
    let base: Vec<usize> = indices.iter().copied().take(cap).collect();
    let n = base.len();
    let mut counts: Vec<u16> = try_alloc("co-membership matrix", n * n, 0u16)?;

    let mut rng = rng_from_seed(params.seed);
    let mut pool: Vec<usize> = (0..n).collect();
    let mut previous: Vec<Vec<usize>> = Vec::new();
    let mut k = params.desired_clusters + tight.k_offset;
    let mut alpha = params.alpha;
    let mut stall = 0;
    let mut passes = 0;
    let mut committed = 0;
    let mut cancelled = false;

    while committed < params.desired_clusters && pool.len() >= tight.min_cluster_size && passes < tight.max_passes {
        if cancel.is_cancelled() {
            warn!(committed, passes, "tight clustering cancelled");
            cancelled = true;
            break;
        }
        passes += 1;

        counts.fill(0);
        for _ in 0..tight.trials {
            run_trial(vectors, &base, &pool, k, params, &mut rng, &mut counts)?;
        }

        let floor = tight.trials as f64 * (1.0 - alpha * (1.0 - tight.sample_ratio));
        let groups = candidate_groups(&pool, &counts, n, floor, tight.min_cluster_size, tight.top_q);

        match converged_group(&groups, &previous, params.beta) {
            Some(g) => {
                let members: Vec<usize> = groups[g].iter().map(|&p| base[p]).collect();
                let seeds: Vec<&str> = members.iter().filter_map(|&m| vectors[m].seed()).collect();
                let name = match seeds.iter().find(|s| !registry.contains(s)) {
                    Some(s) => s.to_string(),
                    None => registry.generate_name(),
                };
                info!(cluster = %name, size = members.len(), k, passes, alpha, "committed tight cluster");
                let record = ClusterRecord::from_members(&name, members, vectors, params);
                registry.add(name, record)?;
                committed += 1;

                let taken = &groups[g];
                pool.retain(|p| !taken.contains(p));
                previous = groups
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != g)
                    .map(|(_, group)| group.iter().copied().filter(|p| !taken.contains(p)).collect::<Vec<_>>())
                    .filter(|group| group.len() >= tight.min_cluster_size)
                    .collect();
                stall = 0;
            }
            None => {
                previous = groups;
                stall += 1;
                if stall >= tight.stall_limit {
                    alpha = (alpha + tight.alpha_step).min(1.0);
                    stall = 0;
                    debug!(alpha, k, "no convergence, relaxing alpha");
                }
            }
        }
        k = k.saturating_sub(1).max(MIN_K);
    }

    let converged = committed >= params.desired_clusters || pool.len() < tight.min_cluster_size;
    info!(committed, passes, converged, cancelled, remaining = pool.len(), "tight clustering finished");
    Ok(TightOutcome {
        committed,
        passes,
        converged,
        cancelled,
        truncated,
        final_alpha: alpha,
    })
}

/// One resampling trial over `pool`, accumulating into `counts`.
fn run_trial<R: Rng + ?Sized>(
    vectors: &[&TermVector],
    base: &[usize],
    pool: &[usize],
    k: usize,
    params: &ClusteringParams,
    rng: &mut R,
    counts: &mut [u16],
) -> ClusterResult<()> {
    let n = base.len();
    let size = sample_size(pool.len(), params.tight.sample_ratio);
    let sample: Vec<usize> = sample_without_replacement(pool.len(), size, rng)
        .into_iter()
        .map(|slot| base[pool[slot]])
        .collect();

    let mut scratch = ClusterRegistry::new();
    kmeans(vectors, &sample, k.min(sample.len()), params, KMeansInit::Random, rng, &mut scratch)?;

    let slot_of: HashMap<usize, usize> = pool.iter().enumerate().map(|(slot, &p)| (base[p], slot)).collect();
    let mut labels: Vec<Option<usize>> = vec![None; pool.len()];
    let mut centroids: Vec<TermVector> = Vec::with_capacity(scratch.len());
    for (c, (_, record)) in scratch.iter().enumerate() {
        for m in record.members() {
            if let Some(&slot) = slot_of.get(m) {
                labels[slot] = Some(c);
            }
        }
        centroids.push(record.centroid().clone());
    }
    for (slot, &p) in pool.iter().enumerate() {
        if labels[slot].is_none() {
            labels[slot] = nearest_centroid(vectors[base[p]], &centroids, params);
        }
    }

    for a in 0..pool.len() {
        let Some(la) = labels[a] else { continue };
        for b in (a + 1)..pool.len() {
            if labels[b] == Some(la) {
                let (lo, hi) = if pool[a] < pool[b] { (pool[a], pool[b]) } else { (pool[b], pool[a]) };
                let cell = &mut counts[lo * n + hi];
                *cell = cell.saturating_add(1);
            }
        }
    }
    Ok(())
}

#[inline]
fn count(counts: &[u16], n: usize, a: usize, b: usize) -> u16 {
    if a < b {
        counts[a * n + b]
    } else {
        counts[b * n + a]
    }
}

/// Greedy cliques of linked positions, largest first, at most `top_q`.
fn candidate_groups(
    pool: &[usize],
    counts: &[u16],
    n: usize,
    floor: f64,
    min_size: usize,
    top_q: usize,
) -> Vec<Vec<usize>> {
    let linked = |a: usize, b: usize| f64::from(count(counts, n, a, b)) >= floor - 1e-9;
    let mut used = vec![false; pool.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for i in 0..pool.len() {
        if used[i] {
            continue;
        }
        let mut group = vec![pool[i]];
        used[i] = true;
        for j in (i + 1)..pool.len() {
            if !used[j] && group.iter().all(|&g| linked(g, pool[j])) {
                group.push(pool[j]);
                used[j] = true;
            }
        }
        if group.len() >= min_size {
            group.sort_unstable();
            groups.push(group);
        }
    }
    groups.sort_by(|a, b| b.len().cmp(&a.len()));
    groups.truncate(top_q);
    groups
}

/// Jaccard similarity of two ascending id lists.
pub(crate) fn jaccard(a: &[usize], b: &[usize]) -> f64 {
    let (mut i, mut j, mut shared) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    let union = a.len() + b.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f64 / union as f64
    }
}

/// Index of the first current group matching a previous one above `beta`.
fn converged_group(current: &[Vec<usize>], previous: &[Vec<usize>], beta: f64) -> Option<usize> {
    current
        .iter()
        .position(|g| previous.iter().any(|h| jaccard(g, h) > beta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::params::TightParams;

    fn twin_blobs() -> Vec<TermVector> {
        vec![
            TermVector::from_pairs("a1", 1.0, vec![(0, 1.0)]),
            TermVector::from_pairs("a2", 1.0, vec![(0, 1.0)]),
            TermVector::from_pairs("b1", 1.0, vec![(7, 1.0)]),
            TermVector::from_pairs("b2", 1.0, vec![(7, 1.0)]),
        ]
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&[1, 2, 3], &[1, 2, 3]), 1.0);
        assert_eq!(jaccard(&[1, 2], &[3, 4]), 0.0);
        assert!((jaccard(&[1, 2, 3], &[2, 3, 4]) - 0.5).abs() < 1e-12);
        assert_eq!(jaccard(&[], &[]), 0.0);
    }

    #[test]
    fn test_always_together_pairs_commit() {
        let owned = twin_blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let params = ClusteringParams::default()
            .with_desired_clusters(2)
            .with_alpha_beta(0.0, 0.7)
            .with_tight(TightParams {
                trials: 10,
                ..TightParams::default()
            });
        let mut registry = ClusterRegistry::new();

        let outcome = tight_cluster(&vectors, &[0, 1, 2, 3], &params, &CancellationToken::new(), &mut registry)
            .unwrap();

        assert_eq!(outcome.committed, 2);
        assert!(outcome.converged);
        let mut groups: Vec<Vec<usize>> = registry
            .iter()
            .map(|(_, r)| {
                let mut m = r.members().to_vec();
                m.sort_unstable();
                m
            })
            .collect();
        groups.sort();
        assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
        println!("[PASS] test_always_together_pairs_commit - passes={}", outcome.passes);
    }

    #[test]
    fn test_cancelled_before_first_pass() {
        let owned = twin_blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let token = CancellationToken::new();
        token.cancel();
        let mut registry = ClusterRegistry::new();

        let outcome =
            tight_cluster(&vectors, &[0, 1, 2, 3], &ClusteringParams::default(), &token, &mut registry).unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.passes, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_matrix_cap_truncates() {
        let owned = twin_blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let params = ClusteringParams::default()
            .with_desired_clusters(1)
            .with_max_matrix_size(2);
        let mut registry = ClusterRegistry::new();

        let outcome =
            tight_cluster(&vectors, &[0, 1, 2, 3], &params, &CancellationToken::new(), &mut registry).unwrap();

        assert_eq!(outcome.truncated, 2);
        for (_, record) in registry.iter() {
            assert!(record.members().iter().all(|&m| m < 2));
        }
    }

    #[test]
    fn test_candidate_groups_ranked_by_size() {
        // Positions 0..5; {0,1,2} fully linked, {3,4} linked.
        let n = 5;
        let mut counts = vec![0u16; n * n];
        for (a, b) in [(0, 1), (0, 2), (1, 2), (3, 4)] {
            counts[a * n + b] = 10;
        }
        let pool: Vec<usize> = (0..n).collect();
        let groups = candidate_groups(&pool, &counts, n, 10.0, 2, 1);
        assert_eq!(groups, vec![vec![0, 1, 2]]);
    }
}
