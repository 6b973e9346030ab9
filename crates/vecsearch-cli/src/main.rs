//! `vecsearch`: build and query a vector search collection on disk.

mod commands;
mod config;
mod loader;
mod output;

use anyhow::Result;
use clap::{ArgAction, Parser};
use commands::Command;
use config::IndexFlags;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "vecsearch", version, about = "HNSW vector search with filters, hybrid and re-rank queries")]
struct Cli {
    /// Directory holding the snapshot, write-ahead log and params.json
    #[arg(long, env = "VS_DATA_DIR", default_value = "vecsearch-data", global = true)]
    data_dir: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    index: IndexFlags,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    commands::run(cli.command, &cli.data_dir, &cli.index, cli.json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rerank_defaults() {
        let cli = Cli::try_parse_from(["vecsearch", "rerank", "--like", "3"]).unwrap();
        let Command::Rerank {
            ids,
            rerank_docs,
            weight,
            replace,
            ..
        } = cli.command
        else {
            panic!("expected rerank");
        };
        assert!(ids.is_empty());
        assert_eq!(rerank_docs, 4);
        assert!((weight - 1.0).abs() < f64::EPSILON);
        assert!(!replace);
    }

    #[test]
    fn test_global_index_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["vecsearch", "knn", "--vector", "1,0", "--metric", "l2", "--ef-search", "64"])
            .unwrap();
        assert_eq!(cli.index.metric, Some(vecsearch_core::Metric::L2));
        assert_eq!(cli.index.ef_search, Some(64));
    }
}
