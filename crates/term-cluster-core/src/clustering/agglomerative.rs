//! Bottom-up agglomerative merging.
//!
//! Working clusters live in an index arena of [`Node`]s. Each node keeps a
//! pointer to its most similar live, non-conflicting peer and, when
//! `cache_size > 0`, a bounded list of the next best candidates. Pointers are
//! recomputed lazily: a merge only invalidates the nodes that pointed at one
//! of the two merged clusters.
//!
//! # Cache validity
//!
//! A full scan keeps the top `cache_size` candidates and records the score of
//! the last kept one as `cache_floor`. Every node outside the cache scores at
//! most `cache_floor`, so a cached candidate is trustworthy as long as its
//! score is at least the floor. Once the front of the cache falls below it
//! the node rescans.

use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::vector::TermVector;

use super::params::ClusteringParams;
use super::record::ClusterRecord;
use super::registry::ClusterRegistry;
use super::threshold::Backoff;

/// Summary of an agglomerative run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgglomerativeOutcome {
    /// Vectors promoted to working clusters during seeding.
    pub promoted: usize,
    /// Merges performed.
    pub merges: usize,
    /// True when the cluster count reached `desired_clusters`.
    pub converged: bool,
    /// Backoff scale when merging stopped; negative when exhausted.
    pub final_scale: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    node: usize,
    version: u32,
    score: f64,
}

#[derive(Debug)]
struct Node {
    record: Option<ClusterRecord>,
    seeds: Vec<String>,
    version: u32,
    neighbor: Option<Candidate>,
    cache: Vec<Candidate>,
    cache_floor: f64,
}

impl Node {
    fn new(index: usize, vector: &TermVector) -> Self {
        Self {
            record: Some(ClusterRecord::singleton("", index, vector)),
            seeds: vector.seed().map(str::to_string).into_iter().collect(),
            version: 0,
            neighbor: None,
            cache: Vec::new(),
            cache_floor: f64::NEG_INFINITY,
        }
    }

    fn is_live(&self) -> bool {
        self.record.is_some()
    }

    fn frequency(&self) -> f64 {
        self.record.as_ref().map_or(0.0, ClusterRecord::frequency)
    }
}

/// Cluster `indices` bottom-up into `registry`.
///
/// Vectors without a neighbor above the nominal threshold are not merged;
/// they are registered as singleton clusters after merging stops.
pub fn agglomerate(
    vectors: &[&TermVector],
    indices: &[usize],
    params: &ClusteringParams,
    registry: &mut ClusterRegistry,
) -> ClusterResult<AgglomerativeOutcome> {
    let (promoted, rest) = seed_pairs(vectors, indices, params);

    let mut nodes: Vec<Node> = Vec::new();
    nodes
        .try_reserve_exact(promoted.len())
        .map_err(|_| ClusterError::out_of_memory("agglomerative nodes", promoted.len()))?;
    nodes.extend(promoted.iter().map(|&i| Node::new(i, vectors[i])));

    let mut live = nodes.len();
    let mut merges = 0;
    let mut backoff = Backoff::new(params.backoff_step);
    while live > params.desired_clusters {
        match best_pair(&mut nodes, params, backoff.scale()) {
            Some((a, b)) => {
                merge_nodes(&mut nodes, a, b, vectors, params);
                live -= 1;
                merges += 1;
            }
            None => {
                if !backoff.relax() {
                    warn!(
                        clusters = live,
                        desired = params.desired_clusters,
                        "threshold backoff exhausted before reaching desired cluster count"
                    );
                    break;
                }
                debug!(scale = backoff.scale(), clusters = live, "no pair over threshold, relaxing");
            }
        }
    }
    let converged = live <= params.desired_clusters;

    for node in nodes {
        if let Some(mut record) = node.record {
            let name = cluster_name(&node.seeds, registry);
            record.rekey(&name);
            registry.add(name, record)?;
        }
    }
    for &i in &rest {
        let seeds: Vec<String> = vectors[i].seed().map(str::to_string).into_iter().collect();
        let name = cluster_name(&seeds, registry);
        registry.add(name.clone(), ClusterRecord::singleton(&name, i, vectors[i]))?;
    }

    info!(
        promoted = promoted.len(),
        merges,
        clusters = registry.len(),
        converged,
        scale = backoff.scale(),
        "agglomerative clustering finished"
    );
    Ok(AgglomerativeOutcome {
        promoted: promoted.len(),
        merges,
        converged,
        final_scale: backoff.scale(),
    })
}

/// Split `indices` into vectors with a nominal-threshold neighbor (and those
/// neighbors) and the rest.
fn seed_pairs(vectors: &[&TermVector], indices: &[usize], params: &ClusteringParams) -> (Vec<usize>, Vec<usize>) {
    let mut promoted = vec![false; indices.len()];
    for (a, &i) in indices.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (b, &j) in indices.iter().enumerate() {
            if a == b || vectors_conflict(vectors[i], vectors[j], params) {
                continue;
            }
            let score = params.similarity.score(vectors[i], vectors[j]);
            let floor = params
                .thresholds
                .threshold(vectors[i].frequency(), vectors[j].frequency(), 1.0);
            if score >= floor && best.map_or(true, |(_, s)| score > s) {
                best = Some((b, score));
            }
        }
        if let Some((b, _)) = best {
            promoted[a] = true;
            promoted[b] = true;
        }
    }
    let (yes, no): (Vec<(usize, &usize)>, Vec<(usize, &usize)>) =
        indices.iter().enumerate().partition(|(slot, _)| promoted[*slot]);
    (
        yes.into_iter().map(|(_, &i)| i).collect(),
        no.into_iter().map(|(_, &i)| i).collect(),
    )
}

fn vectors_conflict(a: &TermVector, b: &TermVector, params: &ClusteringParams) -> bool {
    match (a.seed(), b.seed()) {
        (Some(x), Some(y)) => params.seeds_conflict(x, y),
        _ => false,
    }
}

fn labels_conflict(a: &[String], b: &[String], params: &ClusteringParams) -> bool {
    a.iter().any(|x| b.iter().any(|y| params.seeds_conflict(x, y)))
}

fn is_current(nodes: &[Node], candidate: &Candidate) -> bool {
    let node = &nodes[candidate.node];
    node.is_live() && node.version == candidate.version
}

/// Globally best pair over threshold at `scale`.
///
/// Only each node's single best neighbor is tested against the floor. With a
/// constant threshold list this finds the best qualifying pair. With a
/// frequency-stepped list, a node whose best neighbor misses its floor can
/// hide a lower-scoring pair that would pass; that pair is found only once
/// backoff lowers the floors.
fn best_pair(nodes: &mut [Node], params: &ClusteringParams, scale: f64) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for a in 0..nodes.len() {
        if !nodes[a].is_live() {
            continue;
        }
        let current = nodes[a].neighbor.is_some_and(|n| is_current(nodes, &n));
        if !current {
            refresh_neighbor(nodes, a, params);
        }
        let Some(neighbor) = nodes[a].neighbor else {
            continue;
        };
        let floor = params
            .thresholds
            .threshold(nodes[a].frequency(), nodes[neighbor.node].frequency(), scale);
        if neighbor.score < floor {
            continue;
        }
        if best.map_or(true, |(_, _, s)| neighbor.score > s) {
            best = Some((a, neighbor.node, neighbor.score));
        }
    }
    best.map(|(a, b, _)| (a, b))
}

/// Recompute the neighbor of `a`, consuming the cache before rescanning.
fn refresh_neighbor(nodes: &mut [Node], a: usize, params: &ClusteringParams) {
    if params.cache_size > 0 {
        let cache = std::mem::take(&mut nodes[a].cache);
        let cache: Vec<Candidate> = cache.into_iter().filter(|c| is_current(nodes, c)).collect();
        if let Some(front) = cache.first().copied() {
            if front.score >= nodes[a].cache_floor {
                nodes[a].neighbor = Some(front);
                nodes[a].cache = cache;
                return;
            }
        }
    }
    full_scan(nodes, a, params);
}

fn full_scan(nodes: &mut [Node], a: usize, params: &ClusteringParams) {
    let Some(record) = nodes[a].record.as_ref() else {
        return;
    };
    let mut candidates: Vec<Candidate> = Vec::new();
    for (b, other) in nodes.iter().enumerate() {
        if b == a {
            continue;
        }
        let Some(peer) = other.record.as_ref() else {
            continue;
        };
        if labels_conflict(&nodes[a].seeds, &other.seeds, params) {
            continue;
        }
        candidates.push(Candidate {
            node: b,
            version: other.version,
            score: params.similarity.score(record.centroid(), peer.centroid()),
        });
    }
    candidates.sort_by(|x, y| y.score.total_cmp(&x.score).then(x.node.cmp(&y.node)));

    let neighbor = candidates.first().copied();
    let mut floor = f64::NEG_INFINITY;
    if params.cache_size == 0 {
        candidates.clear();
    } else if candidates.len() > params.cache_size {
        floor = candidates[params.cache_size - 1].score;
        candidates.truncate(params.cache_size);
    }

    let node = &mut nodes[a];
    node.neighbor = neighbor;
    node.cache = candidates;
    node.cache_floor = floor;
}

fn insert_candidate(node: &mut Node, candidate: Candidate, cache_size: usize) {
    let at = node
        .cache
        .iter()
        .position(|c| candidate.score > c.score)
        .unwrap_or(node.cache.len());
    node.cache.insert(at, candidate);
    if node.cache.len() > cache_size {
        if let Some(dropped) = node.cache.pop() {
            node.cache_floor = node.cache_floor.max(dropped.score);
        }
    }
}

/// Merge `b` into `a` and update the neighbor pointers of every other node.
fn merge_nodes(nodes: &mut [Node], a: usize, b: usize, vectors: &[&TermVector], params: &ClusteringParams) {
    let Some(absorbed) = nodes[b].record.take() else {
        return;
    };
    let absorbed_seeds = std::mem::take(&mut nodes[b].seeds);
    nodes[b].neighbor = None;
    nodes[b].cache.clear();

    let node = &mut nodes[a];
    if let Some(record) = node.record.as_mut() {
        record.merge(absorbed, vectors, params);
    }
    for seed in absorbed_seeds {
        if !node.seeds.contains(&seed) {
            node.seeds.push(seed);
        }
    }
    node.version += 1;
    node.neighbor = None;
    node.cache.clear();
    node.cache_floor = f64::NEG_INFINITY;
    let version = node.version;

    for c in 0..nodes.len() {
        if c == a || !nodes[c].is_live() {
            continue;
        }
        let pointed = nodes[c].neighbor.is_some_and(|n| n.node == a || n.node == b);
        let score = if labels_conflict(&nodes[c].seeds, &nodes[a].seeds, params) {
            None
        } else {
            match (nodes[c].record.as_ref(), nodes[a].record.as_ref()) {
                (Some(x), Some(y)) => Some(params.similarity.score(x.centroid(), y.centroid())),
                _ => None,
            }
        };

        let node = &mut nodes[c];
        if let Some(score) = score {
            let candidate = Candidate { node: a, version, score };
            if params.cache_size > 0 {
                insert_candidate(node, candidate, params.cache_size);
            }
            if !pointed && node.neighbor.is_some_and(|n| score > n.score) {
                node.neighbor = Some(candidate);
            }
        }
        if pointed {
            node.neighbor = None;
        }
    }
}

/// First free seed label, else a generated name.
fn cluster_name(seeds: &[String], registry: &mut ClusterRegistry) -> String {
    seeds
        .iter()
        .find(|s| !registry.contains(s))
        .cloned()
        .unwrap_or_else(|| registry.generate_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::threshold::ThresholdList;

    fn pairs_and_loners() -> Vec<TermVector> {
        vec![
            TermVector::from_pairs("p1", 1.0, vec![(0, 1.0)]),
            TermVector::from_pairs("q1", 1.0, vec![(5, 1.0)]),
            TermVector::from_pairs("s1", 1.0, vec![(10, 1.0)]),
            TermVector::from_pairs("p2", 1.0, vec![(0, 1.0), (1, 0.1)]),
            TermVector::from_pairs("q2", 1.0, vec![(5, 1.0), (6, 0.15)]),
            TermVector::from_pairs("s2", 1.0, vec![(20, 1.0)]),
        ]
    }

    fn partition(registry: &ClusterRegistry, owned: &[TermVector]) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = registry
            .iter()
            .map(|(_, r)| {
                let mut keys: Vec<String> = r.members().iter().map(|&m| owned[m].key().to_string()).collect();
                keys.sort();
                keys
            })
            .collect();
        groups.sort();
        groups
    }

    #[test]
    fn test_two_pairs_two_loners() {
        let owned = pairs_and_loners();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let indices: Vec<usize> = (0..vectors.len()).collect();
        let params = ClusteringParams::default().with_desired_clusters(2);
        let mut registry = ClusterRegistry::new();

        let outcome = agglomerate(&vectors, &indices, &params, &mut registry).unwrap();

        assert_eq!(outcome.promoted, 4);
        assert_eq!(outcome.merges, 2);
        assert!(outcome.converged);
        let groups = partition(&registry, &owned);
        assert!(groups.contains(&vec!["p1".to_string(), "p2".to_string()]));
        assert!(groups.contains(&vec!["q1".to_string(), "q2".to_string()]));
        assert_eq!(groups.len(), 4);
        println!("[PASS] test_two_pairs_two_loners - groups={:?}", groups);
    }

    #[test]
    fn test_backoff_exhaustion_is_soft() {
        let owned = pairs_and_loners();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let params = ClusteringParams::default().with_desired_clusters(1).with_backoff_step(0.5);
        let mut registry = ClusterRegistry::new();

        let outcome = agglomerate(&vectors, &[0, 1, 3, 4], &params, &mut registry).unwrap();

        assert!(!outcome.converged);
        assert!(outcome.final_scale < 0.0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_conflicting_seeds_never_merge() {
        let owned = vec![
            TermVector::from_pairs("a", 1.0, vec![(0, 1.0)]).with_seed("A"),
            TermVector::from_pairs("b", 1.0, vec![(0, 1.0), (1, 0.1)]).with_seed("B"),
            TermVector::from_pairs("c", 1.0, vec![(0, 1.0), (1, 0.2)]),
        ];
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let params = ClusteringParams::default()
            .with_desired_clusters(1)
            .with_backoff_step(0.5)
            .with_thresholds(ThresholdList::constant(0.1));
        let mut registry = ClusterRegistry::new();

        agglomerate(&vectors, &[0, 1, 2], &params, &mut registry).unwrap();

        for (_, record) in registry.iter() {
            let seeds = record.seeds(&vectors);
            assert!(seeds.len() <= 1, "conflicting seeds merged: {:?}", seeds);
        }
        assert!(registry.contains("A"));
        assert!(registry.contains("B"));
    }

    #[test]
    fn test_cache_matches_full_rescan() {
        let owned: Vec<TermVector> = (0..12u32)
            .map(|i| {
                let base = (i % 3) * 10;
                TermVector::from_pairs(
                    format!("v{}", i),
                    1.0 + i as f64,
                    vec![(base, 1.0), (base + 1, 0.05 * (i + 1) as f32), (40 + i, 0.3)],
                )
            })
            .collect();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let indices: Vec<usize> = (0..vectors.len()).collect();

        let plain = ClusteringParams::default().with_desired_clusters(3);
        let cached = plain.clone().with_cache_size(2);
        let mut r1 = ClusterRegistry::new();
        let mut r2 = ClusterRegistry::new();
        agglomerate(&vectors, &indices, &plain, &mut r1).unwrap();
        agglomerate(&vectors, &indices, &cached, &mut r2).unwrap();

        assert_eq!(partition(&r1, &owned), partition(&r2, &owned));
        assert_eq!(r1.len(), 3);
        println!("[PASS] test_cache_matches_full_rescan");
    }

    /// x and y share high frequency; z and w are low-frequency near
    /// duplicates of x and y.
    fn hidden_pair_vectors() -> Vec<TermVector> {
        vec![
            TermVector::from_pairs("x", 100.0, vec![(0, 1.0), (1, 0.8)]),
            TermVector::from_pairs("y", 100.0, vec![(1, 0.8), (2, 1.0)]),
            TermVector::from_pairs("z", 1.0, vec![(0, 1.0), (1, 0.8), (3, 0.8)]),
            TermVector::from_pairs("w", 1.0, vec![(1, 0.8), (2, 1.0), (4, 0.8)]),
        ]
    }

    fn brute_force_best(owned: &[TermVector], params: &ClusteringParams, scale: f64) -> Option<f64> {
        let mut best: Option<f64> = None;
        for (i, a) in owned.iter().enumerate() {
            for b in &owned[i + 1..] {
                let score = params.similarity.score(a, b);
                let floor = params.thresholds.threshold(a.frequency(), b.frequency(), scale);
                if score >= floor && best.map_or(true, |s| score > s) {
                    best = Some(score);
                }
            }
        }
        best
    }

    #[test]
    fn test_best_pair_exact_for_constant_schedule() {
        let owned = hidden_pair_vectors();
        let params = ClusteringParams::default().with_thresholds(ThresholdList::constant(0.3));
        let mut nodes: Vec<Node> = owned.iter().enumerate().map(|(i, v)| Node::new(i, v)).collect();

        let (a, b) = best_pair(&mut nodes, &params, 1.0).unwrap();
        let score = params.similarity.score(&owned[a], &owned[b]);

        assert_eq!(Some(score), brute_force_best(&owned, &params, 1.0));
        println!("[PASS] test_best_pair_exact_for_constant_schedule - pair=({}, {}) score={:.3}", a, b, score);
    }

    #[test]
    fn test_stepped_schedule_hides_pair_until_backoff() {
        let owned = hidden_pair_vectors();
        let thresholds = ThresholdList::from_entries(vec![(0.0, 0.9), (50.0, 0.3)]).unwrap();
        let params = ClusteringParams::default().with_thresholds(thresholds);
        let mut nodes: Vec<Node> = owned.iter().enumerate().map(|(i, v)| Node::new(i, v)).collect();

        // x-y passes its floor but neither x nor y points at the other.
        let xy = params.similarity.score(&owned[0], &owned[1]);
        assert!(xy >= params.thresholds.threshold(100.0, 100.0, 1.0));
        assert!(params.similarity.score(&owned[0], &owned[2]) > xy);
        assert!(params.similarity.score(&owned[0], &owned[2]) < 0.9);
        assert_eq!(brute_force_best(&owned, &params, 1.0), Some(xy));

        println!("STATE BEFORE: nominal scale, x-y score={:.3}", xy);
        assert_eq!(best_pair(&mut nodes, &params, 1.0), None);

        let relaxed = best_pair(&mut nodes, &params, 0.5);
        println!("STATE AFTER: scale 0.5, pair={:?}", relaxed);
        assert!(relaxed.is_some());
        println!("[PASS] test_stepped_schedule_hides_pair_until_backoff");
    }

    #[test]
    fn test_insert_candidate_raises_floor() {
        let mut node = Node::new(0, &TermVector::from_pairs("x", 1.0, vec![(0, 1.0)]));
        for (i, s) in [0.9, 0.5, 0.7].into_iter().enumerate() {
            insert_candidate(&mut node, Candidate { node: i, version: 0, score: s }, 2);
        }
        let scores: Vec<f64> = node.cache.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert_eq!(node.cache_floor, 0.5);
    }
}
