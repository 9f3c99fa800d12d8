//! Deterministic ranking used to answer `search_tool_docs`.
//!
//! Not specified by wire shape alone in the base design: this is the
//! lightweight discovery helper the in-container runtime's convenience
//! library would otherwise have shipped, reimplemented here as a pure,
//! testable scoring function over each allowed server's cached tool list.

use std::collections::HashSet;

use crate::tool_server::{ServerMetadata, ToolSpec};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub server: String,
    pub tool: String,
    pub alias: String,
    pub description: String,
    pub score: f64,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn score_tool(query: &str, query_tokens: &HashSet<String>, tool: &ToolSpec) -> f64 {
    let haystack = format!("{} {}", tool.name, tool.description);
    let substring_bonus = if haystack.to_lowercase().contains(&query.to_lowercase()) {
        0.5
    } else {
        0.0
    };
    let token_score = jaccard(query_tokens, &tokenize(&haystack));
    substring_bonus + token_score
}

/// Rank every tool across `servers` against `query`, returning the top
/// `limit` hits with score > 0, highest first. Ties break by server name
/// then tool name for determinism.
pub fn search_tool_docs(query: &str, servers: &[ServerMetadata], limit: usize) -> Vec<SearchHit> {
    let query_tokens = tokenize(query);
    let mut hits: Vec<SearchHit> = servers
        .iter()
        .flat_map(|server| {
            server.tools.iter().map(move |tool| SearchHit {
                server: server.name.clone(),
                tool: tool.name.clone(),
                alias: tool.alias.clone(),
                description: tool.description.clone(),
                score: score_tool(query, &query_tokens, tool),
            })
        })
        .filter(|hit| hit.score > 0.0)
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.server.cmp(&b.server))
            .then_with(|| a.tool.cmp(&b.tool))
    });
    hits.truncate(limit);
    hits
}
