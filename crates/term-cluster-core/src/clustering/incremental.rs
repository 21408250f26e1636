//! Incremental and group-average assignment.
//!
//! Labeled vectors are first grouped by the k-means collaborator. Every other
//! vector is then placed in one pass: it joins the best-scoring cluster that
//! clears the threshold, or opens a new singleton cluster.
//!
//! Once the registry holds `desired_clusters` clusters the acceptance rule
//! degrades from "best over threshold" to "first over threshold" in registry
//! order. This trades determinism of the choice for speed on large
//! registries and is relied upon by existing callers.

use std::ops::ControlFlow;

use tracing::debug;

use crate::error::ClusterResult;
use crate::vector::TermVector;

use super::kmeans::{kmeans, KMeansInit};
use super::params::{ClusterMethod, ClusteringParams};
use super::record::ClusterRecord;
use super::registry::ClusterRegistry;
use super::sampling::rng_from_seed;

/// Result of an assignment pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssignOutcome {
    /// Vectors that joined an existing cluster.
    pub joined: usize,
    /// Vectors that opened a new cluster.
    pub opened: usize,
    /// Vectors placed by seed label.
    pub seeded: usize,
}

/// Assign `indices` to clusters in `registry`.
pub fn assign(
    vectors: &[&TermVector],
    indices: &[usize],
    params: &ClusteringParams,
    registry: &mut ClusterRegistry,
) -> ClusterResult<AssignOutcome> {
    let mut outcome = AssignOutcome::default();

    let (labeled, unlabeled): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| vectors[i].seed().is_some());
    if !labeled.is_empty() {
        let mut rng = rng_from_seed(params.seed);
        kmeans(vectors, &labeled, 0, params, KMeansInit::FurthestPoint, &mut rng, registry)?;
        outcome.seeded = labeled.len();
    }

    let group_average = params.method == ClusterMethod::GroupAverage;
    for &i in &unlabeled {
        let vector = vectors[i];
        let ceiling_reached = registry.len() >= params.desired_clusters;
        let mut best: Option<(String, f64)> = None;

        registry.for_each_mut(|name, record| {
            let score = if group_average {
                group_average_score(vector, record, vectors, params)
            } else {
                params.similarity.score(vector, record.centroid())
            };
            let floor = params
                .thresholds
                .threshold(vector.frequency(), record.frequency(), 1.0);
            if score < floor {
                return ControlFlow::Continue(());
            }
            if ceiling_reached {
                best = Some((name.to_string(), score));
                return ControlFlow::Break(());
            }
            if best.as_ref().map_or(true, |(_, b)| score > *b) {
                best = Some((name.to_string(), score));
            }
            ControlFlow::Continue(())
        });

        match best {
            Some((name, _)) => {
                if let Some(record) = registry.lookup_mut(&name) {
                    record.add_member(i, vectors, params);
                }
                outcome.joined += 1;
            }
            None => {
                let name = registry.generate_name();
                registry.add(name.clone(), ClusterRecord::singleton(&name, i, vector))?;
                outcome.opened += 1;
            }
        }
    }

    debug!(
        joined = outcome.joined,
        opened = outcome.opened,
        seeded = outcome.seeded,
        clusters = registry.len(),
        "assignment pass finished"
    );
    Ok(outcome)
}

/// Mean similarity of `vector` to the members of `record`.
fn group_average_score(
    vector: &TermVector,
    record: &ClusterRecord,
    vectors: &[&TermVector],
    params: &ClusteringParams,
) -> f64 {
    if record.is_empty() {
        return 0.0;
    }
    let total: f64 = record
        .members()
        .iter()
        .map(|&m| params.similarity.score(vector, vectors[m]))
        .sum();
    total / record.len() as f64
}
