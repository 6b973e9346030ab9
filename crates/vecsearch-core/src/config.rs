use crate::error::{IndexError, Result};
use crate::metric::Metric;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 100;
pub const DEFAULT_EF_SEARCH: usize = 100;
pub const DEFAULT_SEED: u64 = 42;

/// Construction parameters of one index. Fixed for the lifetime of the index
/// and persisted alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    pub dimension: usize,
    pub metric: Metric,
    /// Max neighbours per node on layers >= 1. Layer 0 keeps `2 * m`.
    pub m: usize,
    pub ef_construction: usize,
    /// Seed of the per-index level generator.
    pub seed: u64,
}

impl IndexParams {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            seed: DEFAULT_SEED,
        }
    }

    #[must_use]
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    #[must_use]
    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Applies `VS_DIMENSION`, `VS_METRIC`, `VS_HNSW_M`, `VS_HNSW_EF_CONSTRUCT`
    /// and `VS_HNSW_SEED` on top of `self`. Unparseable values are ignored with
    /// a warning.
    #[must_use]
    pub fn overlay_env(mut self) -> Self {
        if let Some(d) = env_parse::<usize>("VS_DIMENSION") {
            self.dimension = d;
        }
        if let Some(m) = env_parse::<Metric>("VS_METRIC") {
            self.metric = m;
        }
        if let Some(m) = env_parse::<usize>("VS_HNSW_M") {
            self.m = m;
        }
        if let Some(ef) = env_parse::<usize>("VS_HNSW_EF_CONSTRUCT") {
            self.ef_construction = ef;
        }
        if let Some(seed) = env_parse::<u64>("VS_HNSW_SEED") {
            self.seed = seed;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(IndexError::InvalidParams("dimension must be > 0".into()));
        }
        if self.m < 2 {
            return Err(IndexError::InvalidParams(format!(
                "m must be >= 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(IndexError::InvalidParams(
                "ef_construction must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Normalisation factor of the level distribution, `1 / ln(M)`.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// Runtime knobs shared by every reader of an index.
/// Thread-safe via atomics, can be changed on-the-fly.
#[derive(Debug)]
pub struct GlobalConfig {
    /// Default beam width for searches that do not pass one.
    pub ef_search: AtomicUsize,

    /// Planner switches to pre-filtering when the allowed set is smaller than
    /// this share of the live corpus. Stored as parts per million.
    pub prefilter_ppm: AtomicU64,

    /// Ceiling for the post-filter `ef` escalation.
    pub max_ef: AtomicUsize,

    /// Searches served since start, for `stats`.
    pub searches: AtomicU64,
}

impl GlobalConfig {
    pub fn new() -> Self {
        Self {
            ef_search: AtomicUsize::new(DEFAULT_EF_SEARCH),
            prefilter_ppm: AtomicU64::new(100_000),
            max_ef: AtomicUsize::new(4096),
            searches: AtomicU64::new(0),
        }
    }

    /// Reads `VS_HNSW_EF_SEARCH`, `VS_PREFILTER_FRACTION` and `VS_MAX_EF`.
    pub fn from_env() -> Self {
        let config = Self::new();
        if let Some(ef) = env_parse::<usize>("VS_HNSW_EF_SEARCH") {
            config.set_ef_search(ef);
        }
        if let Some(fraction) = env_parse::<f64>("VS_PREFILTER_FRACTION") {
            config.set_prefilter_fraction(fraction);
        }
        if let Some(max_ef) = env_parse::<usize>("VS_MAX_EF") {
            config.set_max_ef(max_ef);
        }
        config
    }

    pub fn get_ef_search(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    pub fn set_ef_search(&self, val: usize) {
        self.ef_search.store(val.max(1), Ordering::Relaxed);
    }

    pub fn get_prefilter_fraction(&self) -> f64 {
        self.prefilter_ppm.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn set_prefilter_fraction(&self, fraction: f64) {
        let ppm = (fraction.clamp(0.0, 1.0) * 1_000_000.0).round() as u64;
        self.prefilter_ppm.store(ppm, Ordering::Relaxed);
    }

    pub fn get_max_ef(&self) -> usize {
        self.max_ef.load(Ordering::Relaxed)
    }

    pub fn set_max_ef(&self, val: usize) {
        self.max_ef.store(val.max(1), Ordering::Relaxed);
    }

    pub fn inc_searches(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_searches(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::new()
    }
}
