//! Name-keyed cluster registry.
//!
//! Every strategy populates a [`ClusterRegistry`]. Entries are created on
//! first assignment to a name, removed when merged away, and dropped when the
//! registry is drained or destroyed. An optional hook observes every entry
//! leaving the registry.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;

use crate::error::ClusterError;

use super::record::ClusterRecord;

/// Prefix of generated cluster names.
pub const GENERATED_PREFIX: &str = "C";

/// Hook called with each entry as it leaves the registry.
pub type DestroyHook = Box<dyn FnMut(&str, &ClusterRecord) + Send>;

/// Map from cluster name to [`ClusterRecord`].
///
/// Iteration order is by name, which keeps every strategy deterministic for
/// a fixed seed.
///
/// # Example
///
/// ```
/// use std::ops::ControlFlow;
/// use term_cluster_core::clustering::{ClusterRecord, ClusterRegistry};
/// use term_cluster_core::vector::TermVector;
///
/// let v = TermVector::from_pairs("a", 1.0, vec![(0, 1.0)]);
/// let mut registry = ClusterRegistry::new();
/// let name = registry.generate_name();
/// registry.add(name.clone(), ClusterRecord::singleton(&name, 0, &v)).unwrap();
///
/// let mut seen = 0;
/// registry.for_each_mut(|_, _| {
///     seen += 1;
///     ControlFlow::<()>::Continue(())
/// });
/// assert_eq!(seen, 1);
/// ```
#[derive(Default)]
pub struct ClusterRegistry {
    clusters: BTreeMap<String, ClusterRecord>,
    next_id: u64,
    on_destroy: Option<DestroyHook>,
}

impl ClusterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook observing every entry that leaves the registry.
    pub fn set_on_destroy<F>(&mut self, hook: F)
    where
        F: FnMut(&str, &ClusterRecord) + Send + 'static,
    {
        self.on_destroy = Some(Box::new(hook));
    }

    /// Number of clusters.
    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// True when no clusters exist.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// True if `name` is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    /// Next unused generated name (`C1`, `C2`, ...).
    pub fn generate_name(&mut self) -> String {
        loop {
            self.next_id += 1;
            let name = format!("{}{}", GENERATED_PREFIX, self.next_id);
            if !self.clusters.contains_key(&name) {
                return name;
            }
        }
    }

    /// Register a new cluster.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::DuplicateCluster` if the name is taken.
    pub fn add(&mut self, name: String, record: ClusterRecord) -> Result<(), ClusterError> {
        if self.clusters.contains_key(&name) {
            return Err(ClusterError::DuplicateCluster { name });
        }
        self.clusters.insert(name, record);
        Ok(())
    }

    /// Look up a cluster.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&ClusterRecord> {
        self.clusters.get(name)
    }

    /// Look up a cluster mutably.
    #[inline]
    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut ClusterRecord> {
        self.clusters.get_mut(name)
    }

    /// Remove a cluster, returning its record. The destroy hook fires first.
    pub fn remove(&mut self, name: &str) -> Option<ClusterRecord> {
        let record = self.clusters.remove(name)?;
        if let Some(hook) = self.on_destroy.as_mut() {
            hook(name, &record);
        }
        Some(record)
    }

    /// Visit every cluster in name order; the visitor may stop early by
    /// returning `ControlFlow::Break`.
    pub fn for_each_mut<B, F>(&mut self, mut visit: F) -> Option<B>
    where
        F: FnMut(&str, &mut ClusterRecord) -> ControlFlow<B>,
    {
        for (name, record) in self.clusters.iter_mut() {
            if let ControlFlow::Break(b) = visit(name, record) {
                return Some(b);
            }
        }
        None
    }

    /// Iterate clusters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClusterRecord)> {
        self.clusters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Cluster names in order.
    pub fn names(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    /// Remove every cluster, returning them in name order. The destroy hook
    /// fires for each.
    pub fn drain(&mut self) -> Vec<(String, ClusterRecord)> {
        let clusters = std::mem::take(&mut self.clusters);
        let mut out = Vec::with_capacity(clusters.len());
        for (name, record) in clusters {
            if let Some(hook) = self.on_destroy.as_mut() {
                hook(&name, &record);
            }
            out.push((name, record));
        }
        out
    }

    /// Drop every cluster.
    pub fn clear(&mut self) {
        self.drain();
    }
}

impl Drop for ClusterRegistry {
    fn drop(&mut self) {
        if self.on_destroy.is_some() {
            self.clear();
        }
    }
}

impl fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRegistry")
            .field("clusters", &self.clusters)
            .field("next_id", &self.next_id)
            .field("on_destroy", &self.on_destroy.as_ref().map(|_| ".."))
            .finish()
    }
}
