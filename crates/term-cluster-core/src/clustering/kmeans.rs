//! k-means over term vectors.
//!
//! Seeded vectors are pinned: every group of mutually non-conflicting seed
//! labels becomes one cluster, named after its first label, and its members
//! never move. Remaining centroids are picked by furthest point or at random,
//! then Lloyd iterations reassign the unseeded vectors until assignments stop
//! changing or `max_iterations` is hit.

use rand::Rng;
use tracing::debug;

use crate::error::ClusterResult;
use crate::vector::TermVector;

use super::params::ClusteringParams;
use super::record::{build_centroid, ClusterRecord};
use super::registry::ClusterRegistry;
use super::sampling::sample_without_replacement;

/// How free centroids are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KMeansInit {
    /// Each new centroid is the vector least similar to all chosen ones.
    #[default]
    FurthestPoint,
    /// Centroids are a random sample of the unseeded vectors.
    Random,
}

/// Summary of one k-means run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansOutcome {
    /// Clusters written to the registry.
    pub clusters: usize,
    /// Lloyd iterations performed.
    pub iterations: usize,
    /// True if assignments stopped changing before the cap.
    pub converged: bool,
}

struct Group {
    label: Option<String>,
    pinned: Vec<usize>,
}

/// Partition `subset` into at most `max(k, seed groups)` clusters and write
/// them into `registry`.
///
/// A group whose name already exists in the registry is merged into the
/// existing record.
pub fn kmeans<R: Rng + ?Sized>(
    vectors: &[&TermVector],
    subset: &[usize],
    k: usize,
    params: &ClusteringParams,
    init: KMeansInit,
    rng: &mut R,
    registry: &mut ClusterRegistry,
) -> ClusterResult<KMeansOutcome> {
    if subset.is_empty() {
        return Ok(KMeansOutcome {
            clusters: 0,
            iterations: 0,
            converged: true,
        });
    }

    // Pinned groups from seed labels.
    let mut groups: Vec<Group> = Vec::new();
    let mut free: Vec<usize> = Vec::new();
    for &i in subset {
        match vectors[i].seed() {
            Some(seed) => {
                let slot = groups.iter().position(|g| {
                    g.label
                        .as_deref()
                        .is_some_and(|label| !params.seeds_conflict(label, seed))
                });
                match slot {
                    Some(g) => groups[g].pinned.push(i),
                    None => groups.push(Group {
                        label: Some(seed.to_string()),
                        pinned: vec![i],
                    }),
                }
            }
            None => free.push(i),
        }
    }

    let mut centroids: Vec<TermVector> = groups
        .iter()
        .map(|g| build_centroid("", &g.pinned, vectors, params).0)
        .collect();

    // Free centroids.
    let wanted = k.max(groups.len()).min(groups.len() + free.len());
    let extra = wanted - groups.len();
    if extra > 0 {
        let picks = match init {
            KMeansInit::Random => sample_without_replacement(free.len(), extra, rng)
                .into_iter()
                .map(|p| free[p])
                .collect(),
            KMeansInit::FurthestPoint => furthest_points(vectors, &free, &centroids, extra, params, rng),
        };
        for i in picks {
            centroids.push(vectors[i].to_centroid(""));
            groups.push(Group {
                label: None,
                pinned: Vec::new(),
            });
        }
    }

    let mut assignment: Vec<Option<usize>> = vec![None; free.len()];
    let mut iterations = 0;
    let mut converged = false;
    while iterations < params.max_iterations {
        iterations += 1;
        let mut changed = false;
        for (slot, &i) in free.iter().enumerate() {
            let best = nearest_centroid(vectors[i], &centroids, params);
            if assignment[slot] != best {
                assignment[slot] = best;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members = group_members(&groups[c], c, &free, &assignment);
            if !members.is_empty() {
                *centroid = build_centroid("", &members, vectors, params).0;
            }
        }
    }

    let mut written = 0;
    for (c, group) in groups.iter().enumerate() {
        let members = group_members(group, c, &free, &assignment);
        if members.is_empty() {
            continue;
        }
        let name = match &group.label {
            Some(label) => label.clone(),
            None => registry.generate_name(),
        };
        match registry.lookup_mut(&name) {
            Some(existing) => {
                let mut all = existing.members().to_vec();
                all.extend(members);
                existing.set_members(all, vectors, params);
            }
            None => {
                let record = ClusterRecord::from_members(&name, members, vectors, params);
                registry.add(name, record)?;
            }
        }
        written += 1;
    }

    debug!(
        subset = subset.len(),
        k,
        clusters = written,
        iterations,
        converged,
        "k-means finished"
    );

    Ok(KMeansOutcome {
        clusters: written,
        iterations,
        converged,
    })
}

/// Index of the most similar centroid; ties go to the lower index.
pub(crate) fn nearest_centroid(
    vector: &TermVector,
    centroids: &[TermVector],
    params: &ClusteringParams,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (c, centroid) in centroids.iter().enumerate() {
        let s = params.similarity.score(vector, centroid);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((c, s));
        }
    }
    best.map(|(c, _)| c)
}

fn group_members(group: &Group, c: usize, free: &[usize], assignment: &[Option<usize>]) -> Vec<usize> {
    let mut members = group.pinned.clone();
    members.extend(
        free.iter()
            .zip(assignment)
            .filter(|(_, a)| **a == Some(c))
            .map(|(&i, _)| i),
    );
    members
}

fn furthest_points<R: Rng + ?Sized>(
    vectors: &[&TermVector],
    free: &[usize],
    existing: &[TermVector],
    count: usize,
    params: &ClusteringParams,
    rng: &mut R,
) -> Vec<usize> {
    let mut chosen: Vec<usize> = Vec::with_capacity(count);
    // Highest similarity of each free vector to any chosen centroid.
    let mut closeness: Vec<f64> = free
        .iter()
        .map(|&i| {
            existing
                .iter()
                .map(|c| params.similarity.score(vectors[i], c))
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .collect();

    if existing.is_empty() && count > 0 {
        let first = rng.gen_range(0..free.len());
        chosen.push(free[first]);
        for (slot, &i) in free.iter().enumerate() {
            closeness[slot] = params.similarity.score(vectors[i], vectors[free[first]]);
        }
    }

    while chosen.len() < count {
        let pick = closeness
            .iter()
            .enumerate()
            .filter(|(slot, _)| !chosen.contains(&free[*slot]))
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(slot, _)| slot);
        let Some(slot) = pick else { break };
        let picked = free[slot];
        chosen.push(picked);
        for (s, &i) in free.iter().enumerate() {
            let sim = params.similarity.score(vectors[i], vectors[picked]);
            if sim > closeness[s] {
                closeness[s] = sim;
            }
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::sampling::rng_from_seed;

    fn two_blobs() -> Vec<TermVector> {
        vec![
            TermVector::from_pairs("a1", 1.0, vec![(0, 1.0), (1, 0.1)]),
            TermVector::from_pairs("a2", 1.0, vec![(0, 0.9), (1, 0.2)]),
            TermVector::from_pairs("a3", 1.0, vec![(0, 1.0)]),
            TermVector::from_pairs("b1", 1.0, vec![(5, 1.0), (6, 0.1)]),
            TermVector::from_pairs("b2", 1.0, vec![(5, 0.8), (6, 0.3)]),
            TermVector::from_pairs("b3", 1.0, vec![(6, 1.0), (5, 0.7)]),
        ]
    }

    #[test]
    fn test_two_blobs_split() {
        let owned = two_blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let subset: Vec<usize> = (0..vectors.len()).collect();
        let params = ClusteringParams::default();
        let mut registry = ClusterRegistry::new();
        let mut rng = rng_from_seed(3);

        let outcome = kmeans(&vectors, &subset, 2, &params, KMeansInit::FurthestPoint, &mut rng, &mut registry)
            .expect("kmeans");

        assert_eq!(outcome.clusters, 2);
        assert!(outcome.converged);
        for (_, record) in registry.iter() {
            let firsts: Vec<char> = record
                .members()
                .iter()
                .map(|&m| owned[m].key().chars().next().unwrap())
                .collect();
            assert!(firsts.windows(2).all(|w| w[0] == w[1]), "mixed cluster {:?}", firsts);
        }
        println!("[PASS] test_two_blobs_split - iterations={}", outcome.iterations);
    }

    #[test]
    fn test_seeds_are_pinned_and_named() {
        let mut owned = two_blobs();
        // Seed a vector from blob b into the same group as blob a.
        owned[0] = owned[0].clone().with_seed("X");
        owned[3] = owned[3].clone().with_seed("X");
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let subset: Vec<usize> = (0..vectors.len()).collect();
        let params = ClusteringParams::default();
        let mut registry = ClusterRegistry::new();
        let mut rng = rng_from_seed(3);

        kmeans(&vectors, &subset, 2, &params, KMeansInit::Random, &mut rng, &mut registry).unwrap();

        let x = registry.lookup("X").expect("seed-named cluster");
        assert!(x.members().contains(&0));
        assert!(x.members().contains(&3));
    }

    #[test]
    fn test_only_seeded_subset_groups_by_label() {
        let owned = vec![
            TermVector::from_pairs("a", 1.0, vec![(0, 1.0)]).with_seed("A"),
            TermVector::from_pairs("b", 1.0, vec![(9, 1.0)]).with_seed("A"),
            TermVector::from_pairs("c", 1.0, vec![(0, 1.0)]).with_seed("B"),
        ];
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let params = ClusteringParams::default();
        let mut registry = ClusterRegistry::new();

        let outcome = kmeans(&vectors, &[0, 1, 2], 0, &params, KMeansInit::FurthestPoint, &mut rng_from_seed(1), &mut registry)
            .unwrap();
        assert_eq!(outcome.clusters, 2);
        assert_eq!(registry.lookup("A").unwrap().members(), &[0, 1]);
        assert_eq!(registry.lookup("B").unwrap().members(), &[2]);
    }

    #[test]
    fn test_k_larger_than_input_is_clamped() {
        let owned = two_blobs();
        let vectors: Vec<&TermVector> = owned.iter().collect();
        let mut registry = ClusterRegistry::new();
        let outcome = kmeans(
            &vectors,
            &[0, 1, 2],
            10,
            &ClusteringParams::default(),
            KMeansInit::FurthestPoint,
            &mut rng_from_seed(1),
            &mut registry,
        )
        .unwrap();
        assert!(outcome.clusters <= 3);
        let total: usize = registry.iter().map(|(_, r)| r.len()).sum();
        assert_eq!(total, 3);
    }
}
