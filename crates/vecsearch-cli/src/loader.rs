//! Readers for the two line-aligned input files of `index`.
//!
//! Line `i` of the documents file is the text of document `i`, line `i` of the
//! vectors file its embedding as comma-separated floats.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use vecsearch_core::{Document, VecFloat};

pub fn parse_vector(raw: &str) -> Result<Vec<VecFloat>, std::num::ParseFloatError> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|w| w.trim().parse::<VecFloat>())
        .collect()
}

/// One line pair: a document, or the reason its vector did not parse.
pub type Item = (usize, Result<Document, String>);

/// Zips the documents and vectors files; stops at the shorter one.
pub struct PairedReader {
    documents: Lines<BufReader<File>>,
    vectors: Lines<BufReader<File>>,
    line: usize,
}

impl PairedReader {
    pub fn open(documents: &Path, vectors: &Path) -> Result<Self> {
        let open = |p: &Path| {
            File::open(p)
                .map(|f| BufReader::new(f).lines())
                .with_context(|| format!("cannot open {}", p.display()))
        };
        Ok(Self {
            documents: open(documents)?,
            vectors: open(vectors)?,
            line: 0,
        })
    }
}

impl Iterator for PairedReader {
    type Item = std::io::Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = match self.documents.next()? {
            Ok(t) => t,
            Err(e) => return Some(Err(e)),
        };
        let raw = match self.vectors.next()? {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let line = self.line;
        self.line += 1;

        let doc = parse_vector(&raw)
            .map(|vector| Document::new(line.to_string(), vector).with_text(text.trim()))
            .map_err(|e| e.to_string());
        Some(Ok((line, doc)))
    }
}

/// Length of the first vector that parses, for dimension inference.
pub fn first_dimension(vectors: &Path) -> Result<Option<usize>> {
    let file = File::open(vectors).with_context(|| format!("cannot open {}", vectors.display()))?;
    for line in BufReader::new(file).lines() {
        if let Ok(v) = parse_vector(&line?) {
            return Ok(Some(v.len()));
        }
    }
    Ok(None)
}
