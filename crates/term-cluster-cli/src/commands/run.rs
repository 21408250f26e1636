//! `run` command: cluster vectors from a JSON file.
//!
//! # Input format
//!
//! ```json
//! [
//!   { "key": "bank", "frequency": 12, "seed": "FIN", "features": { "money": 1.0, "loan": 0.4 } },
//!   { "key": "shore", "features": { "water": 1.0 } }
//! ]
//! ```
//!
//! `frequency` defaults to 1. Feature names are interned to ids in order of
//! first appearance.
//!
//! Ctrl-C trips the cancellation token; tight clustering stops after its
//! current pass and the clusters committed so far are printed.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use tokio::signal;
use tracing::{error, info, warn};

use term_cluster_core::{
    CancellationToken, ClusterError, ClusterMethod, ClusterOptions, ClusterOutput, ClusterResult, ClusteringParams,
    ClusteringSession, Config, Representative, TermVector,
};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// JSON file with the term vectors
    #[arg(short, long)]
    pub input: PathBuf,

    /// Clustering method (incremental, group-average, agglomerative, kmeans, tight, spectral)
    #[arg(short, long)]
    pub method: Option<ClusterMethod>,

    /// Desired number of clusters
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Representative mode (centroid, nearest, average, rms, furthest)
    #[arg(short, long)]
    pub representative: Option<Representative>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Drop single-member clusters from the output
    #[arg(long)]
    pub exclude_singletons: bool,

    /// Include labeled copies of the member vectors
    #[arg(long)]
    pub copy: bool,

    /// Trim every cluster to its N most central members
    #[arg(long, value_name = "N")]
    pub trim: Option<usize>,

    /// Output as JSON instead of human-readable
    #[arg(long)]
    pub json: bool,
}

/// One vector as it appears in the input file.
#[derive(Debug, Deserialize)]
struct InputVector {
    key: String,
    #[serde(default = "default_frequency")]
    frequency: f64,
    #[serde(default)]
    seed: Option<String>,
    #[serde(default)]
    features: BTreeMap<String, f32>,
}

fn default_frequency() -> f64 {
    1.0
}

/// Maps feature names to dense ids.
#[derive(Debug, Default)]
struct FeatureInterner {
    ids: HashMap<String, u32>,
}

impl FeatureInterner {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.ids.len() as u32;
        self.ids.insert(name.to_string(), id);
        id
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Handle the run command. Returns the process exit code.
pub async fn handle_run(args: RunArgs, config: Config) -> i32 {
    let (vectors, params) = match prepare(&args, &config) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("Failed to prepare clustering run: {:#}", e);
            eprintln!("Error: {:#}", e);
            return 1;
        }
    };

    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current pass");
                token.cancel();
            }
        })
    };

    let options = ClusterOptions {
        exclude_singletons: args.exclude_singletons,
        copy_output: args.copy,
        cancel: Some(token),
    };
    let trim = args.trim;
    let job = tokio::task::spawn_blocking(move || execute(&vectors, params, &options, trim));
    let result = job.await;
    watcher.abort();

    match result {
        Ok(Ok(output)) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            } else {
                print!("{}", format_output(&output));
            }
            info!(clusters = output.report.clusters, "Clustering completed");
            0
        }
        Ok(Err(e)) => {
            error!("Clustering failed: {}", e);
            eprintln!("Error: {}", e);
            1
        }
        Err(e) => {
            error!("Clustering task failed: {}", e);
            eprintln!("Error: clustering task failed: {}", e);
            1
        }
    }
}

/// Read the input file and build parameters with CLI overrides applied.
fn prepare(args: &RunArgs, config: &Config) -> anyhow::Result<(Vec<TermVector>, ClusteringParams)> {
    let vectors = load_vectors(&args.input)?;
    if vectors.is_empty() {
        return Err(ClusterError::insufficient_data(1, 0).into());
    }
    let params = build_params(args, config)?;
    Ok((vectors, params))
}

fn build_params(args: &RunArgs, config: &Config) -> ClusterResult<ClusteringParams> {
    let mut params = config.clustering.to_params()?;
    if let Some(method) = args.method {
        info!("CLI override: method = {}", method);
        params = params.with_method(method);
    }
    if let Some(k) = args.clusters {
        info!("CLI override: desired_clusters = {}", k);
        params = params.with_desired_clusters(k);
    }
    if let Some(representative) = args.representative {
        params = params.with_representative(representative);
    }
    if let Some(seed) = args.seed {
        params = params.with_seed(seed);
    }
    params.validate()?;
    Ok(params)
}

fn load_vectors(path: &Path) -> anyhow::Result<Vec<TermVector>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_vectors(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_vectors(text: &str) -> ClusterResult<Vec<TermVector>> {
    let inputs: Vec<InputVector> = serde_json::from_str(text)?;
    let mut interner = FeatureInterner::default();
    let vectors: Vec<TermVector> = inputs
        .into_iter()
        .map(|input| {
            let pairs = input
                .features
                .iter()
                .map(|(name, &weight)| (interner.intern(name), weight))
                .collect();
            let vector = TermVector::from_pairs(input.key, input.frequency, pairs);
            match input.seed {
                Some(seed) => vector.with_seed(seed),
                None => vector,
            }
        })
        .collect();
    info!(vectors = vectors.len(), features = interner.len(), "Loaded term vectors");
    Ok(vectors)
}

/// Cluster `vectors`, optionally trimming before the registry is drained.
fn execute(
    vectors: &[TermVector],
    params: ClusteringParams,
    options: &ClusterOptions,
    trim: Option<usize>,
) -> ClusterResult<ClusterOutput> {
    let mut session = ClusteringSession::new(params)?;
    if let Some(token) = &options.cancel {
        session = session.with_cancellation(token.clone());
    }
    let mut report = session.cluster(vectors)?;
    if let Some(desired) = trim {
        let trimmed = session.trim_to_central(desired);
        info!(desired, trimmed, "Trimmed clusters");
    }
    let clusters = session.finish(options);
    report.clusters = clusters.len();
    report.unclustered = vectors.len() - clusters.iter().map(|c| c.members.len()).sum::<usize>();
    Ok(ClusterOutput { clusters, report })
}

/// Format a result as human-readable text.
fn format_output(output: &ClusterOutput) -> String {
    let mut out = String::new();
    let title = format!("Clusters ({})", output.report.method);
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}\n", "=".repeat(title.len()));

    if output.clusters.is_empty() {
        let _ = writeln!(out, "No clusters formed.");
    }
    for c in &output.clusters {
        let _ = writeln!(
            out,
            "{} [{} members, frequency {:.1}, cohesion {:.3}]",
            c.name,
            c.members.len(),
            c.frequency,
            c.cohesion
        );
        let _ = writeln!(out, "  {}", c.keys.join(", "));
    }

    let report = &output.report;
    let _ = writeln!(
        out,
        "\nSummary: {} clusters, {} unclustered, {}",
        report.clusters,
        report.unclustered,
        if report.converged { "converged" } else { "not converged" }
    );
    if report.cancelled {
        let _ = writeln!(out, "Note: run was interrupted; result is partial");
    }
    if report.out_of_memory {
        let _ = writeln!(out, "Note: allocation failed; result is partial");
    }
    if report.truncated > 0 {
        let _ = writeln!(out, "Note: {} vectors beyond the matrix cap were skipped", report.truncated);
    }
    out
}
