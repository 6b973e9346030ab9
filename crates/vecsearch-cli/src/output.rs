//! Human and JSON renderings of query results.

use serde::Serialize;
use vecsearch_core::{Completeness, SearchHit};
use vecsearch_index::{Collection, PlanKind, QueryResponse};

const SNIPPET_CHARS: usize = 100;

#[derive(Debug, Serialize)]
pub struct RenderedHit {
    pub rank: usize,
    pub id: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Rendered {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanKind>,
    pub completeness: Completeness,
    pub hits: Vec<RenderedHit>,
}

impl Rendered {
    pub fn new(title: impl Into<String>, response: &QueryResponse, collection: &Collection) -> Self {
        let mut rendered = Self::from_hits(title, &response.hits, response.completeness, collection);
        rendered.plan = Some(response.plan);
        rendered
    }

    pub fn from_hits(
        title: impl Into<String>,
        hits: &[SearchHit],
        completeness: Completeness,
        collection: &Collection,
    ) -> Self {
        Self {
            title: title.into(),
            plan: None,
            completeness,
            hits: hits
                .iter()
                .enumerate()
                .map(|(i, hit)| render_hit(i + 1, hit, collection))
                .collect(),
        }
    }
}

fn render_hit(rank: usize, hit: &SearchHit, collection: &Collection) -> RenderedHit {
    let text = collection.get(&hit.id).map(|d| d.text).unwrap_or_default();
    RenderedHit {
        rank,
        id: hit.id.clone(),
        score: hit.score,
        distance: hit.distance,
        text,
    }
}

/// Truncates at a char boundary, marking the cut with "...".
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn format_human(result: &Rendered) -> String {
    let mut out = format!("=== {} ===\n", result.title);
    if result.hits.is_empty() {
        out.push_str("No results found.\n");
    }
    for hit in &result.hits {
        out.push_str(&format!("{}. ID: {} (Score: {:.4})\n", hit.rank, hit.id, hit.score));
        if !hit.text.is_empty() {
            out.push_str(&format!("   {}\n", snippet(&hit.text, SNIPPET_CHARS)));
        }
    }
    if let Completeness::InsufficientCandidates { requested, found } = result.completeness {
        out.push_str(&format!("(only {found} of {requested} requested results)\n"));
    }
    out
}

pub fn print(result: &Rendered, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", format_human(result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("short", 100), "short");
        assert_eq!(snippet("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_human_format() {
        let rendered = Rendered {
            title: "Basic Search".into(),
            plan: Some(PlanKind::Knn),
            completeness: Completeness::check(3, 1),
            hits: vec![RenderedHit {
                rank: 1,
                id: "7".into(),
                score: 0.912_34,
                distance: Some(0.175),
                text: "What is a bank transit number".into(),
            }],
        };
        let text = format_human(&rendered);
        assert!(text.starts_with("=== Basic Search ===\n"));
        assert!(text.contains("1. ID: 7 (Score: 0.9123)\n"));
        assert!(text.contains("   What is a bank transit number\n"));
        assert!(text.contains("only 1 of 3"));
    }
}
