//! Clustering entry points.
//!
//! [`ClusteringSession`] owns the registry and an arena of borrowed vectors,
//! so several batches can be clustered incrementally against the same
//! clusters. [`cluster`] is the one-shot form: one batch, then drain.
//!
//! Strategy failures from allocator exhaustion are absorbed into the
//! [`RunReport`]; whatever clusters exist at that point are kept. Only
//! invalid configuration surfaces as an `Err`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ClusterResult;
use crate::vector::TermVector;

use super::agglomerative::agglomerate;
use super::cancel::CancellationToken;
use super::equivalence::{keep_most_central, merge_equivalent, trim};
use super::incremental::assign;
use super::kmeans::{kmeans, KMeansInit};
use super::params::{ClusterMethod, ClusteringParams};
use super::record::ClusterRecord;
use super::registry::ClusterRegistry;
use super::sampling::rng_from_seed;
use super::spectral::spectral_cluster;
use super::tight::tight_cluster;

/// Output shaping for [`cluster`] and [`ClusteringSession::finish`].
#[derive(Debug, Clone, Default)]
pub struct ClusterOptions {
    /// Drop clusters with a single member.
    pub exclude_singletons: bool,
    /// Attach deep copies of member vectors, labeled with the cluster name.
    pub copy_output: bool,
    /// Token polled by interruptible strategies.
    pub cancel: Option<CancellationToken>,
}

/// One output cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCluster {
    pub name: String,
    /// Arena indices; for [`cluster`] these index the input slice.
    pub members: Vec<usize>,
    /// Member keys, parallel to `members`.
    pub keys: Vec<String>,
    /// Merged frequency.
    pub frequency: f64,
    /// Mean member-to-centroid similarity.
    pub cohesion: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copies: Option<Vec<TermVector>>,
}

/// What a clustering call did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub method: ClusterMethod,
    /// Clusters in the result.
    pub clusters: usize,
    /// Vectors in no output cluster.
    pub unclustered: usize,
    /// False on soft failure: backoff exhausted, pass cap hit, or aborted.
    pub converged: bool,
    pub cancelled: bool,
    /// A strategy aborted on allocation failure; the result is partial.
    pub out_of_memory: bool,
    /// Vectors dropped by the matrix cap.
    pub truncated: usize,
    /// Final backoff scale (agglomerative only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_scale: Option<f64>,
}

impl RunReport {
    fn new(method: ClusterMethod) -> Self {
        Self {
            method,
            clusters: 0,
            unclustered: 0,
            converged: true,
            cancelled: false,
            out_of_memory: false,
            truncated: 0,
            final_scale: None,
        }
    }
}

/// Clusters plus the report of the call that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutput {
    pub clusters: Vec<OutputCluster>,
    pub report: RunReport,
}

/// Cluster `vectors` once and drain the result.
///
/// # Errors
///
/// Returns `ClusterError::InvalidParameter` if `params` fail validation.
///
/// # Example
///
/// ```
/// use term_cluster_core::clustering::{cluster, ClusterMethod, ClusterOptions, ClusteringParams};
/// use term_cluster_core::vector::TermVector;
///
/// let vectors = vec![
///     TermVector::from_pairs("cat", 3.0, vec![(0, 1.0), (1, 0.2)]),
///     TermVector::from_pairs("kitten", 1.0, vec![(0, 1.0), (1, 0.3)]),
///     TermVector::from_pairs("car", 2.0, vec![(7, 1.0)]),
/// ];
/// let params = ClusteringParams::default()
///     .with_method(ClusterMethod::Incremental)
///     .with_desired_clusters(2);
///
/// let output = cluster(&vectors, &params, &ClusterOptions::default()).unwrap();
/// assert_eq!(output.clusters.len(), 2);
/// assert_eq!(output.report.unclustered, 0);
/// ```
pub fn cluster(
    vectors: &[TermVector],
    params: &ClusteringParams,
    options: &ClusterOptions,
) -> ClusterResult<ClusterOutput> {
    let mut session = ClusteringSession::new(params.clone())?;
    if let Some(token) = &options.cancel {
        session = session.with_cancellation(token.clone());
    }
    let mut report = session.cluster(vectors)?;
    let clusters = session.finish(options);
    report.clusters = clusters.len();
    report.unclustered = vectors.len() - clusters.iter().map(|c| c.members.len()).sum::<usize>();
    Ok(ClusterOutput { clusters, report })
}

/// Write each output cluster's name onto its members' cluster label.
///
/// Vectors in no cluster get their label cleared. Out-of-range member
/// indices are ignored.
pub fn assign_labels(vectors: &mut [TermVector], clusters: &[OutputCluster]) {
    for v in vectors.iter_mut() {
        v.set_cluster_label(None);
    }
    for c in clusters {
        for &m in &c.members {
            if let Some(v) = vectors.get_mut(m) {
                v.set_cluster_label(Some(c.name.clone()));
            }
        }
    }
}

/// Clustering state carried across calls.
///
/// Vectors are borrowed for `'v` and addressed by their position in the
/// session arena, in the order batches were supplied.
#[derive(Debug)]
pub struct ClusteringSession<'v> {
    params: ClusteringParams,
    vectors: Vec<&'v TermVector>,
    registry: ClusterRegistry,
    cancel: CancellationToken,
}

impl<'v> ClusteringSession<'v> {
    /// New session with validated parameters.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` if `params` fail validation.
    pub fn new(params: ClusteringParams) -> ClusterResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            vectors: Vec::new(),
            registry: ClusterRegistry::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Poll `token` in interruptible strategies.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn params(&self) -> &ClusteringParams {
        &self.params
    }

    /// Every vector supplied so far.
    pub fn vectors(&self) -> &[&'v TermVector] {
        &self.vectors
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cluster `batch` against the current registry, then merge equivalent
    /// clusters.
    ///
    /// # Errors
    ///
    /// Only non-recoverable registry errors propagate; allocation failure is
    /// reported through [`RunReport::out_of_memory`].
    pub fn cluster(&mut self, batch: &'v [TermVector]) -> ClusterResult<RunReport> {
        let mut report = RunReport::new(self.params.method);
        let start = self.vectors.len();
        if self.vectors.try_reserve(batch.len()).is_err() {
            warn!(batch = batch.len(), "vector arena allocation failed");
            report.out_of_memory = true;
            report.converged = false;
            return Ok(report);
        }
        self.vectors.extend(batch.iter());
        let indices: Vec<usize> = (start..self.vectors.len()).collect();

        let outcome = self.dispatch(&indices, &mut report);
        self.settle(outcome, report, batch.len())
    }

    /// Fold a strategy result into `report`, merge equivalent clusters and
    /// fill in the counts. Clusters registered before a recoverable failure
    /// are kept.
    fn settle(
        &mut self,
        outcome: ClusterResult<()>,
        mut report: RunReport,
        batch: usize,
    ) -> ClusterResult<RunReport> {
        match outcome {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "strategy aborted; keeping partial clusters");
                report.out_of_memory = true;
                report.converged = false;
            }
            Err(err) => return Err(err),
        }

        let merged = merge_equivalent(&mut self.registry, &self.vectors, &self.params);
        report.clusters = self.registry.len();
        report.unclustered = self.unclustered();
        info!(
            method = %self.params.method,
            batch,
            clusters = report.clusters,
            unclustered = report.unclustered,
            merged,
            converged = report.converged,
            "clustering call finished"
        );
        Ok(report)
    }

    fn dispatch(&mut self, indices: &[usize], report: &mut RunReport) -> ClusterResult<()> {
        let vectors = &self.vectors;
        let params = &self.params;
        let registry = &mut self.registry;
        match params.method {
            ClusterMethod::Incremental | ClusterMethod::GroupAverage => {
                assign(vectors, indices, params, registry)?;
            }
            ClusterMethod::KMeans => {
                let mut rng = rng_from_seed(params.seed);
                let outcome = kmeans(
                    vectors,
                    indices,
                    params.desired_clusters,
                    params,
                    KMeansInit::FurthestPoint,
                    &mut rng,
                    registry,
                )?;
                report.converged = outcome.converged;
            }
            ClusterMethod::Agglomerative => {
                let outcome = agglomerate(vectors, indices, params, registry)?;
                report.converged = outcome.converged;
                report.final_scale = Some(outcome.final_scale);
            }
            ClusterMethod::Tight => {
                let outcome = tight_cluster(vectors, indices, params, &self.cancel, registry)?;
                report.converged = outcome.converged && !outcome.cancelled;
                report.cancelled = outcome.cancelled;
                report.truncated = outcome.truncated;
            }
            ClusterMethod::Spectral => {
                let outcome = spectral_cluster(vectors, indices, params, registry)?;
                report.converged = outcome.converged;
                report.truncated = outcome.truncated;
            }
        }
        Ok(())
    }

    fn unclustered(&self) -> usize {
        let clustered: usize = self.registry.iter().map(|(_, r)| r.len()).sum();
        self.vectors.len().saturating_sub(clustered)
    }

    /// Merge clusters linked by compatible seed labels. Returns merges made.
    pub fn merge_equivalent(&mut self) -> usize {
        merge_equivalent(&mut self.registry, &self.vectors, &self.params)
    }

    /// Shrink clusters through `reducer`. Returns clusters that lost members.
    pub fn trim<F>(&mut self, desired: usize, reducer: F) -> usize
    where
        F: FnMut(&ClusterRecord, usize) -> Vec<usize>,
    {
        trim(&mut self.registry, &self.vectors, desired, &self.params, reducer)
    }

    /// Trim every cluster to its `desired` most central members.
    pub fn trim_to_central(&mut self, desired: usize) -> usize {
        let vectors = &self.vectors;
        let params = &self.params;
        trim(&mut self.registry, vectors, desired, params, |record, d| {
            keep_most_central(record, d, vectors, params)
        })
    }

    /// Current clusters without consuming the session.
    pub fn snapshot(&self, options: &ClusterOptions) -> Vec<OutputCluster> {
        self.registry
            .iter()
            .filter(|(_, r)| !(options.exclude_singletons && r.len() == 1))
            .map(|(name, r)| self.output(name, r, options.copy_output))
            .collect()
    }

    /// Drain the registry into output clusters.
    pub fn finish(mut self, options: &ClusterOptions) -> Vec<OutputCluster> {
        let drained = self.registry.drain();
        drained
            .iter()
            .filter(|(_, r)| !(options.exclude_singletons && r.len() == 1))
            .map(|(name, r)| self.output(name, r, options.copy_output))
            .collect()
    }

    fn output(&self, name: &str, record: &ClusterRecord, copy: bool) -> OutputCluster {
        let members = record.members().to_vec();
        let keys = members.iter().map(|&m| self.vectors[m].key().to_string()).collect();
        let copies = copy.then(|| {
            members
                .iter()
                .map(|&m| {
                    let mut v = self.vectors[m].clone();
                    v.set_cluster_label(Some(name.to_string()));
                    v
                })
                .collect()
        });
        OutputCluster {
            name: name.to_string(),
            members,
            keys,
            frequency: record.frequency(),
            cohesion: record.cohesion(&self.vectors, &self.params),
            copies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;

    fn corpus() -> Vec<TermVector> {
        vec![
            TermVector::from_pairs("bank", 4.0, vec![(0, 1.0), (1, 0.5)]),
            TermVector::from_pairs("lender", 2.0, vec![(0, 0.9), (1, 0.6)]),
            TermVector::from_pairs("river", 3.0, vec![(4, 1.0), (5, 0.4)]),
            TermVector::from_pairs("stream", 1.0, vec![(4, 0.8), (5, 0.5)]),
            TermVector::from_pairs("zebra", 1.0, vec![(9, 1.0)]),
        ]
    }

    #[test]
    fn test_every_method_partitions_input() {
        let vectors = corpus();
        for method in ClusterMethod::all() {
            if method == ClusterMethod::Tight {
                continue;
            }
            let params = ClusteringParams::default().with_method(method).with_desired_clusters(2);
            let output = cluster(&vectors, &params, &ClusterOptions::default()).unwrap();
            let mut seen: Vec<usize> = output.clusters.iter().flat_map(|c| c.members.clone()).collect();
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 3, 4], "{} lost or duplicated vectors", method);
            assert_eq!(output.report.unclustered, 0);
            println!("[PASS] {} - clusters={}", method, output.clusters.len());
        }
    }

    #[test]
    fn test_exclude_singletons_and_copies() {
        let vectors = corpus();
        let params = ClusteringParams::default().with_desired_clusters(2);
        let options = ClusterOptions {
            exclude_singletons: true,
            copy_output: true,
            cancel: None,
        };
        let output = cluster(&vectors, &params, &options).unwrap();
        assert!(output.clusters.iter().all(|c| c.members.len() > 1));
        assert_eq!(output.report.unclustered, 1);
        for c in &output.clusters {
            let copies = c.copies.as_ref().expect("copies requested");
            assert_eq!(copies.len(), c.members.len());
            assert!(copies.iter().all(|v| v.cluster_label() == Some(c.name.as_str())));
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = ClusteringParams::default().with_desired_clusters(0);
        assert!(matches!(
            cluster(&corpus(), &params, &ClusterOptions::default()),
            Err(ClusterError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_session_accumulates_batches() {
        let first = corpus();
        let second = vec![TermVector::from_pairs("creek", 1.0, vec![(4, 1.0), (5, 0.3)])];
        let params = ClusteringParams::default().with_method(ClusterMethod::Incremental);
        let mut session = ClusteringSession::new(params).unwrap();

        session.cluster(&first).unwrap();
        let before = session.registry().len();
        let report = session.cluster(&second).unwrap();

        assert_eq!(report.clusters, before);
        assert_eq!(session.vectors().len(), 6);
        let snapshot = session.snapshot(&ClusterOptions::default());
        let river = snapshot.iter().find(|c| c.keys.contains(&"river".to_string())).unwrap();
        assert!(river.keys.contains(&"creek".to_string()));

        let trimmed = session.trim_to_central(2);
        assert_eq!(trimmed, 1);
        let out = session.finish(&ClusterOptions::default());
        assert!(out.iter().all(|c| c.members.len() <= 2));
    }

    #[test]
    fn test_allocation_failure_keeps_partial_clusters() {
        let vectors = corpus();
        let params = ClusteringParams::default().with_method(ClusterMethod::Incremental);
        let mut session = ClusteringSession::new(params).unwrap();
        session.cluster(&vectors).unwrap();
        let names_before = session.registry().names();
        assert!(!names_before.is_empty());

        let report = RunReport::new(ClusterMethod::Incremental);
        let failed = Err(ClusterError::out_of_memory("co-membership matrix", usize::MAX));
        let report = session.settle(failed, report, 0).unwrap();

        assert!(report.out_of_memory);
        assert!(!report.converged);
        assert_eq!(report.clusters, names_before.len());
        assert_eq!(report.unclustered, 0);
        assert_eq!(session.registry().names(), names_before);
        println!("[PASS] test_allocation_failure_keeps_partial_clusters - clusters={}", report.clusters);
    }

    #[test]
    fn test_unrecoverable_strategy_error_propagates() {
        let mut session = ClusteringSession::new(ClusteringParams::default()).unwrap();
        let report = RunReport::new(ClusterMethod::Agglomerative);
        let result = session.settle(Err(ClusterError::DuplicateCluster { name: "C1".into() }), report, 0);
        assert!(matches!(result, Err(ClusterError::DuplicateCluster { .. })));
    }

    #[test]
    fn test_assign_labels() {
        let mut vectors = corpus();
        let params = ClusteringParams::default().with_desired_clusters(2);
        let output = cluster(&vectors, &params, &ClusterOptions::default()).unwrap();
        assign_labels(&mut vectors, &output.clusters);
        for c in &output.clusters {
            for &m in &c.members {
                assert_eq!(vectors[m].cluster_label(), Some(c.name.as_str()));
            }
        }
    }
}
