//! Index parameter resolution for the CLI.
//!
//! Precedence, lowest first:
//! 1. built-in defaults (or `params.json` of an existing data directory)
//! 2. `VS_*` environment variables (a `.env` file is loaded first)
//! 3. command-line flags
//!
//! Once a data directory has `params.json` its graph parameters are fixed:
//! a different dimension is an error, other differences are ignored with a
//! warning. `--ef-search` is a runtime setting and always applies.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vecsearch_core::{GlobalConfig, IndexParams, Metric};
use vecsearch_index::Collection;
use vecsearch_store::wal::WalSyncMode;

/// Parameters persisted next to the index so later invocations need no flags.
pub const PARAMS_FILE: &str = "params.json";

#[derive(Debug, Clone, Args)]
pub struct IndexFlags {
    /// Vector dimension (inferred from the vectors file on first `index`)
    #[arg(long, global = true)]
    pub dimension: Option<usize>,

    /// Distance metric: cosine or l2
    #[arg(long, global = true)]
    pub metric: Option<Metric>,

    /// Max neighbours per node on upper layers (layer 0 keeps twice as many)
    #[arg(long = "hnsw-m", global = true)]
    pub m: Option<usize>,

    /// Beam width used while building the graph
    #[arg(long, global = true)]
    pub ef_construction: Option<usize>,

    /// Seed of the level generator
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Default beam width for searches
    #[arg(long, global = true)]
    pub ef_search: Option<usize>,

    /// fsync the write-ahead log after every record
    #[arg(long, global = true)]
    pub strict_sync: bool,
}

impl IndexFlags {
    /// Resolves parameters for `dir`. `inferred_dimension` is used only when
    /// nothing else names one.
    pub fn resolve(&self, dir: &Path, inferred_dimension: Option<usize>) -> Result<IndexParams> {
        let persisted = load_params(dir)?;
        let mut params = match persisted {
            Some(p) => p,
            None => IndexParams::new(inferred_dimension.unwrap_or(0), Metric::default()).overlay_env(),
        };

        if let Some(d) = self.dimension {
            if persisted.is_some_and(|p| p.dimension != d) {
                bail!(
                    "{} holds {}-dimensional vectors, --dimension {d} given",
                    dir.display(),
                    params.dimension
                );
            }
            params.dimension = d;
        }

        let mut requested = params;
        if let Some(metric) = self.metric {
            requested.metric = metric;
        }
        if let Some(m) = self.m {
            requested.m = m;
        }
        if let Some(ef) = self.ef_construction {
            requested.ef_construction = ef;
        }
        if let Some(seed) = self.seed {
            requested.seed = seed;
        }
        // The log was planned under the persisted graph parameters
        if persisted.is_some() && requested != params {
            tracing::warn!(
                persisted = ?params,
                requested = ?requested,
                "graph parameters of an existing index cannot change, keeping persisted ones"
            );
        } else {
            params = requested;
        }

        if params.dimension == 0 {
            bail!(
                "no index in {} yet: pass --dimension, set VS_DIMENSION or run `index` first",
                dir.display()
            );
        }
        params.validate()?;
        Ok(params)
    }

    pub fn runtime(&self) -> Arc<GlobalConfig> {
        let config = GlobalConfig::from_env();
        if let Some(ef) = self.ef_search {
            config.set_ef_search(ef);
        }
        Arc::new(config)
    }

    pub fn sync_mode(&self) -> WalSyncMode {
        if self.strict_sync {
            WalSyncMode::Strict
        } else {
            WalSyncMode::Async
        }
    }

    /// Opens the collection in `dir`, recording its parameters on first use.
    pub fn open(&self, dir: &Path, inferred_dimension: Option<usize>) -> Result<Collection> {
        let params = self.resolve(dir, inferred_dimension)?;
        let collection = Collection::open(dir, params, self.runtime(), self.sync_mode())
            .with_context(|| format!("failed to open collection in {}", dir.display()))?;
        save_params(dir, collection.index().params())?;
        Ok(collection)
    }
}

fn params_path(dir: &Path) -> PathBuf {
    dir.join(PARAMS_FILE)
}

pub fn load_params(dir: &Path) -> Result<Option<IndexParams>> {
    let path = params_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let params = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(params))
}

pub fn save_params(dir: &Path, params: &IndexParams) -> Result<()> {
    let path = params_path(dir);
    let raw = serde_json::to_string_pretty(params)?;
    std::fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))
}
