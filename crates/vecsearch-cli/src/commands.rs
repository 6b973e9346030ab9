//! Subcommands. Each opens the collection in the data directory, does one
//! thing and returns.

use crate::config::IndexFlags;
use crate::loader::{self, PairedReader};
use crate::output::{self, Rendered};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use vecsearch_core::{Completeness, Document, FilterExpr, VecFloat};
use vecsearch_index::{
    CandidateSource, Collection, Fusion, HybridWeights, QueryRequest, RerankMode,
};

/// Documents inserted between progress lines.
pub const BATCH_SIZE: usize = 100;

const DEFAULT_IDS: [&str; 5] = ["0", "1", "2", "3", "4"];
const DEFAULT_LIKE: &str = "0";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index a documents file and a line-aligned vectors file
    Index {
        documents: PathBuf,
        vectors: PathBuf,
        /// Write a snapshot and truncate the log afterwards
        #[arg(long)]
        checkpoint: bool,
    },
    /// Plain nearest-neighbour search
    Knn(QueryArgs),
    /// Nearest neighbours restricted by ids and/or attributes
    Filter {
        #[command(flatten)]
        query: QueryArgs,
        /// Allowed document ids (defaults to 0-4 when no --attr is given)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        /// Required attribute, as key=value. Repeatable.
        #[arg(long)]
        attr: Vec<String>,
    },
    /// BM25 keyword search only
    Lexical {
        #[arg(long, default_value = "bank")]
        text: String,
        #[arg(short = 'k', long, default_value_t = 3)]
        top_k: usize,
    },
    /// Keyword and vector search fused into one ranking
    Hybrid {
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, default_value = "bank")]
        text: String,
        #[arg(long, default_value_t = 0.5)]
        lexical_weight: VecFloat,
        #[arg(long, default_value_t = 0.5)]
        vector_weight: VecFloat,
        /// Reciprocal rank fusion instead of min-max
        #[arg(long)]
        rrf: bool,
    },
    /// Re-score a first-pass list by exact vector similarity
    Rerank {
        #[command(flatten)]
        query: QueryArgs,
        /// First-pass ids in rank order (defaults to 0-4)
        #[arg(long, value_delimiter = ',', conflicts_with = "text")]
        ids: Vec<String>,
        /// Take the first pass from a keyword query instead
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 4)]
        rerank_docs: usize,
        /// Weight of the vector score added to the first-pass score
        #[arg(long, default_value_t = 1.0)]
        weight: VecFloat,
        /// Rank the window by vector score alone
        #[arg(long)]
        replace: bool,
    },
    /// Run every query kind with default arguments
    All(QueryArgs),
    /// Print collection statistics
    Stats,
    /// Snapshot the collection and truncate the log
    Checkpoint,
    /// Delete a document by id
    Delete { id: String },
    /// Execute a JSON query request, inline or `@path`
    Query { request: String },
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Query vector as comma-separated floats
    #[arg(long, conflicts_with = "like")]
    pub vector: Option<String>,
    /// Use the stored vector of this document as the query (default: 0)
    #[arg(long)]
    pub like: Option<String>,
    #[arg(short = 'k', long, default_value_t = 3)]
    pub top_k: usize,
    /// Beam width for this query
    #[arg(long)]
    pub ef: Option<usize>,
}

impl QueryArgs {
    fn resolve_vector(&self, collection: &Collection) -> Result<Vec<VecFloat>> {
        if let Some(raw) = &self.vector {
            return loader::parse_vector(raw).context("invalid --vector");
        }
        let id = self.like.as_deref().unwrap_or(DEFAULT_LIKE);
        collection
            .get(id)
            .map(|d| d.vector)
            .with_context(|| format!("document {id} not found; pass --vector or --like"))
    }
}

pub fn run(command: Command, dir: &Path, flags: &IndexFlags, json: bool) -> Result<()> {
    if let Command::Index {
        documents,
        vectors,
        checkpoint,
    } = &command
    {
        return index(dir, flags, documents, vectors, *checkpoint);
    }

    let collection = flags.open(dir, None)?;
    match command {
        Command::Index { .. } => bail!("index does not run on an open collection"),
        Command::Knn(query) => {
            let request = knn_request(&collection, &query)?;
            show("Basic Search", &collection, &request, json)
        }
        Command::Filter { query, ids, attr } => {
            let request = filter_request(&collection, &query, ids, &attr)?;
            show("Filtered Search", &collection, &request, json)
        }
        Command::Lexical { text, top_k } => {
            let hits = collection.lexical_search(&text, top_k);
            let completeness = Completeness::check(top_k, hits.len());
            let rendered = Rendered::from_hits("Lexical Search", &hits, completeness, &collection);
            output::print(&rendered, json)
        }
        Command::Hybrid {
            query,
            text,
            lexical_weight,
            vector_weight,
            rrf,
        } => {
            let weights = HybridWeights {
                lexical: lexical_weight,
                vector: vector_weight,
            };
            let fusion = if rrf { Fusion::rrf() } else { Fusion::MinMax };
            let request = hybrid_request(&collection, &query, text, weights, fusion)?;
            show("Hybrid Search", &collection, &request, json)
        }
        Command::Rerank {
            query,
            ids,
            text,
            rerank_docs,
            weight,
            replace,
        } => {
            let candidates = match text {
                Some(t) => CandidateSource::text(t),
                None => first_pass_ids(ids),
            };
            let mode = if replace {
                RerankMode::Replace
            } else {
                RerankMode::Add { weight }
            };
            let request = rerank_request(&collection, &query, candidates, rerank_docs, mode)?;
            show("Rerank Search", &collection, &request, json)
        }
        Command::All(query) => run_all(&collection, &query, json),
        Command::Stats => {
            let stats = collection.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{stats:#?}");
            }
            Ok(())
        }
        Command::Checkpoint => {
            collection.checkpoint()?;
            println!("checkpoint written to {}", dir.display());
            Ok(())
        }
        Command::Delete { id } => {
            if collection.delete(&id)? {
                collection.sync()?;
                println!("deleted {id}");
            } else {
                println!("{id} not found");
            }
            Ok(())
        }
        Command::Query { request } => {
            let raw = match request.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {path}"))?,
                None => request,
            };
            let request: QueryRequest =
                serde_json::from_str(&raw).context("invalid query request")?;
            show("Query", &collection, &request, json)
        }
    }
}

fn index(dir: &Path, flags: &IndexFlags, documents: &Path, vectors: &Path, checkpoint: bool) -> Result<()> {
    let inferred = loader::first_dimension(vectors)?;
    let collection = flags.open(dir, inferred)?;
    let mut batch: Vec<Document> = Vec::with_capacity(BATCH_SIZE);
    let mut indexed = 0usize;
    let mut skipped = 0usize;

    for item in PairedReader::open(documents, vectors)? {
        let (line, parsed) = item?;
        let doc = match parsed {
            Ok(doc) => doc,
            Err(reason) => {
                tracing::warn!(line, %reason, "skipping line with unparsable vector");
                skipped += 1;
                continue;
            }
        };
        if let Err(e) = collection.index().validate_vector(&doc.vector) {
            tracing::warn!(line, error = %e, "skipping invalid vector");
            skipped += 1;
            continue;
        }
        batch.push(doc);
        if batch.len() == BATCH_SIZE {
            indexed += collection.insert_batch(std::mem::take(&mut batch))?;
            tracing::info!(indexed, "==== Indexed {indexed} documents ====");
        }
    }
    if !batch.is_empty() {
        indexed += collection.insert_batch(batch)?;
    }
    collection.sync()?;
    if checkpoint {
        collection.checkpoint()?;
    }

    println!(
        "indexed {indexed} documents into {} ({skipped} skipped, {} live)",
        dir.display(),
        collection.len()
    );
    Ok(())
}

fn first_pass_ids(ids: Vec<String>) -> CandidateSource {
    if ids.is_empty() {
        CandidateSource::ids(DEFAULT_IDS)
    } else {
        CandidateSource::ids(ids)
    }
}

fn parse_attr(raw: &str) -> Result<FilterExpr> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("attribute filter {raw:?} is not key=value");
    };
    Ok(FilterExpr::matches(key.trim(), value.trim()))
}

fn knn_request(collection: &Collection, query: &QueryArgs) -> Result<QueryRequest> {
    Ok(QueryRequest::Knn {
        vector: query.resolve_vector(collection)?,
        k: query.top_k,
        ef: query.ef,
    })
}

fn filter_request(
    collection: &Collection,
    query: &QueryArgs,
    ids: Vec<String>,
    attrs: &[String],
) -> Result<QueryRequest> {
    let mut filter: Option<FilterExpr> = None;
    for raw in attrs {
        let expr = parse_attr(raw)?;
        filter = Some(match filter {
            Some(f) => f.and(expr),
            None => expr,
        });
    }
    let ids = if ids.is_empty() && filter.is_none() {
        DEFAULT_IDS.iter().map(ToString::to_string).collect()
    } else {
        ids
    };
    if !ids.is_empty() {
        let expr = FilterExpr::ids(ids);
        filter = Some(match filter {
            Some(f) => f.and(expr),
            None => expr,
        });
    }
    let Some(filter) = filter else {
        bail!("no filter given");
    };

    Ok(QueryRequest::FilteredKnn {
        vector: query.resolve_vector(collection)?,
        k: query.top_k,
        ef: query.ef,
        filter,
    })
}

fn hybrid_request(
    collection: &Collection,
    query: &QueryArgs,
    text: String,
    weights: HybridWeights,
    fusion: Fusion,
) -> Result<QueryRequest> {
    Ok(QueryRequest::Hybrid {
        vector: query.resolve_vector(collection)?,
        k: query.top_k,
        ef: query.ef,
        lexical: CandidateSource::text(text),
        weights,
        fusion,
    })
}

fn rerank_request(
    collection: &Collection,
    query: &QueryArgs,
    candidates: CandidateSource,
    rerank_docs: usize,
    mode: RerankMode,
) -> Result<QueryRequest> {
    Ok(QueryRequest::Rerank {
        vector: query.resolve_vector(collection)?,
        k: query.top_k,
        candidates,
        rerank_docs: Some(rerank_docs),
        mode,
    })
}

fn show(title: &str, collection: &Collection, request: &QueryRequest, json: bool) -> Result<()> {
    let response = collection.planner().execute(request)?;
    tracing::debug!(plan = ?response.plan, hits = response.hits.len(), "query done");
    output::print(&Rendered::new(title, &response, collection), json)
}

/// Every query kind with the default arguments, one after another.
fn run_all(collection: &Collection, query: &QueryArgs, json: bool) -> Result<()> {
    let stats = collection.stats();
    tracing::info!(documents = stats.documents, dimension = stats.dimension, "collection ready");
    if stats.documents == 0 {
        bail!("collection is empty; run `index` first");
    }

    let requests = [
        ("Basic Search", knn_request(collection, query)?),
        ("Filtered Search", filter_request(collection, query, Vec::new(), &[])?),
        (
            "Hybrid Search",
            hybrid_request(collection, query, "bank".into(), HybridWeights::default(), Fusion::MinMax)?,
        ),
        (
            "Rerank Search",
            rerank_request(
                collection,
                query,
                first_pass_ids(Vec::new()),
                4,
                RerankMode::Add { weight: 1.0 },
            )?,
        ),
    ];
    for (title, request) in &requests {
        show(title, collection, request, json)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn flags() -> IndexFlags {
        IndexFlags {
            dimension: None,
            metric: None,
            m: None,
            ef_construction: None,
            seed: None,
            ef_search: None,
            strict_sync: false,
        }
    }

    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let docs = dir.join("docs.tsv");
        let vecs = dir.join("vecs.tsv");
        let mut d = std::fs::File::create(&docs).unwrap();
        let mut v = std::fs::File::create(&vecs).unwrap();
        for i in 0..250 {
            writeln!(d, "document number {i} about the bank").unwrap();
            let angle = f64::from(i) * 0.01;
            writeln!(v, "{},{}", angle.cos(), angle.sin()).unwrap();
        }
        writeln!(d, "broken row").unwrap();
        writeln!(v, "1.0,oops").unwrap();
        (docs, vecs)
    }

    #[test]
    fn test_index_then_query() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let (docs, vecs) = fixture(tmp.path());
        index(&data, &flags(), &docs, &vecs, false).unwrap();

        let collection = flags().open(&data, None).unwrap();
        assert_eq!(collection.len(), 250);

        let query = QueryArgs {
            vector: None,
            like: Some("10".into()),
            top_k: 3,
            ef: None,
        };
        let request = knn_request(&collection, &query).unwrap();
        let response = collection.planner().execute(&request).unwrap();
        assert_eq!(response.hits[0].id, "10");

        let request = filter_request(&collection, &query, Vec::new(), &[]).unwrap();
        let response = collection.planner().execute(&request).unwrap();
        assert_eq!(response.hits.len(), 3);
        assert!(response.hits.iter().all(|h| DEFAULT_IDS.contains(&h.id.as_str())));
    }

    #[test]
    fn test_index_with_checkpoint_leaves_empty_log() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        let (docs, vecs) = fixture(tmp.path());
        index(&data, &flags(), &docs, &vecs, true).unwrap();
        assert!(data.join(vecsearch_index::collection::SNAPSHOT_FILE).exists());
        let log = std::fs::metadata(data.join(vecsearch_index::collection::WAL_FILE)).unwrap();
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_parse_attr() {
        assert_eq!(
            parse_attr("lang = en").unwrap(),
            FilterExpr::matches("lang", "en")
        );
        assert!(parse_attr("lang").is_err());
    }

    #[test]
    fn test_explicit_vector_dimension_checked_by_planner() {
        let tmp = tempfile::tempdir().unwrap();
        let mut f = flags();
        f.dimension = Some(2);
        let collection = f.open(tmp.path(), None).unwrap();
        let query = QueryArgs {
            vector: Some("1,2,3".into()),
            like: None,
            top_k: 3,
            ef: None,
        };
        let request = knn_request(&collection, &query).unwrap();
        assert!(collection.planner().execute(&request).is_err());
    }
}
