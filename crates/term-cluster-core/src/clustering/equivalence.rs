//! Post-processing: equivalence merging and trimming.

use std::ops::ControlFlow;

use tracing::debug;

use crate::vector::TermVector;

use super::params::ClusteringParams;
use super::record::ClusterRecord;
use super::registry::ClusterRegistry;

/// Merge clusters that carry non-conflicting seed labels until none remain.
///
/// When two clusters are linked, the one whose name is a linking label
/// survives; otherwise the first in name order does. Each merge removes one
/// registry entry, so the loop terminates. Returns the number of merges.
pub fn merge_equivalent(registry: &mut ClusterRegistry, vectors: &[&TermVector], params: &ClusteringParams) -> usize {
    let mut merges = 0;
    while let Some((target, source)) = find_link(registry, vectors, params) {
        let Some(absorbed) = registry.remove(&source) else {
            break;
        };
        match registry.lookup_mut(&target) {
            Some(record) => record.merge(absorbed, vectors, params),
            None => break,
        }
        debug!(target = %target, source = %source, "merged equivalent clusters");
        merges += 1;
    }
    merges
}

/// First linked pair as `(survivor, absorbed)`.
fn find_link(
    registry: &ClusterRegistry,
    vectors: &[&TermVector],
    params: &ClusteringParams,
) -> Option<(String, String)> {
    let labeled: Vec<(&str, Vec<&str>)> = registry
        .iter()
        .map(|(name, record)| (name, record.seeds(vectors)))
        .filter(|(_, seeds)| !seeds.is_empty())
        .collect();

    for (i, (a, seeds_a)) in labeled.iter().enumerate() {
        for (b, seeds_b) in &labeled[i + 1..] {
            let link = seeds_a
                .iter()
                .flat_map(|x| seeds_b.iter().map(move |y| (*x, *y)))
                .find(|(x, y)| !params.seeds_conflict(x, y));
            let Some((la, lb)) = link else {
                continue;
            };
            let b_is_named = *b == la || *b == lb;
            let a_is_named = *a == la || *a == lb;
            return Some(if b_is_named && !a_is_named {
                (b.to_string(), a.to_string())
            } else {
                (a.to_string(), b.to_string())
            });
        }
    }
    None
}

/// Shrink every cluster through `reducer`, then recompute centroids.
///
/// The reducer receives each record and `desired` and returns the members to
/// keep. Indices that were not members are ignored. Clusters reduced to
/// nothing are removed. Returns the number of clusters that lost members.
pub fn trim<F>(
    registry: &mut ClusterRegistry,
    vectors: &[&TermVector],
    desired: usize,
    params: &ClusteringParams,
    mut reducer: F,
) -> usize
where
    F: FnMut(&ClusterRecord, usize) -> Vec<usize>,
{
    let mut trimmed = 0;
    let mut emptied: Vec<String> = Vec::new();
    registry.for_each_mut(|name, record| {
        let kept: Vec<usize> = reducer(record, desired)
            .into_iter()
            .filter(|m| record.members().contains(m))
            .collect();
        if kept.len() < record.len() {
            trimmed += 1;
            if kept.is_empty() {
                emptied.push(name.to_string());
            } else {
                record.set_members(kept, vectors, params);
            }
        }
        ControlFlow::<()>::Continue(())
    });
    for name in emptied {
        registry.remove(&name);
    }
    debug!(desired, trimmed, "trimmed clusters");
    trimmed
}

/// Reducer keeping the `desired` members most similar to the centroid, in
/// their original order.
pub fn keep_most_central(
    record: &ClusterRecord,
    desired: usize,
    vectors: &[&TermVector],
    params: &ClusteringParams,
) -> Vec<usize> {
    if record.len() <= desired {
        return record.members().to_vec();
    }
    let mut scored: Vec<(usize, f64)> = record
        .members()
        .iter()
        .map(|&m| (m, params.similarity.score(vectors[m], record.centroid())))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(desired);
    let keep: Vec<usize> = scored.into_iter().map(|(m, _)| m).collect();
    record
        .members()
        .iter()
        .copied()
        .filter(|m| keep.contains(m))
        .collect()
}
