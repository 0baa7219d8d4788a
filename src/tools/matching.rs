//! Relevance matching — score tools against a free-text query.
//!
//! Scoring (cumulative):
//! - exact tool name appearing in the query: +100
//! - each tool-name fragment found in the query: +30
//! - each description keyword (stop-words removed) found in the query: +20
//! - each matched domain pattern (file/network/search/data intent): +40
//!
//! The top 5 tools are returned in descending score order; ties keep
//! catalog order.

use std::collections::HashSet;

use super::types::ToolDescriptor;

// ─── Stop Words and Domain Patterns ─────────────────────────────────────────

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "its", "of", "on", "or", "that", "the", "their", "this", "to", "with",
];

/// Intent keywords in the query paired with tool-name keywords they imply.
struct DomainPattern {
    query_terms: &'static [&'static str],
    tool_terms: &'static [&'static str],
}

const DOMAIN_PATTERNS: &[DomainPattern] = &[
    // File intents
    DomainPattern {
        query_terms: &["file", "folder", "directory", "path", "save", "open"],
        tool_terms: &["file", "dir", "folder", "path", "fs"],
    },
    // Network intents
    DomainPattern {
        query_terms: &["url", "http", "website", "download", "fetch", "request"],
        tool_terms: &["http", "fetch", "url", "web", "request", "download"],
    },
    // Search intents
    DomainPattern {
        query_terms: &["search", "find", "look", "query", "locate"],
        tool_terms: &["search", "find", "query", "grep"],
    },
    // Data intents
    DomainPattern {
        query_terms: &["data", "csv", "table", "database", "sql", "json"],
        tool_terms: &["data", "csv", "table", "sql", "query", "json"],
    },
];

// ─── Scoring ─────────────────────────────────────────────────────────────────

/// Score one tool against a lowercased query and its word set.
fn score_tool(query: &str, query_words: &HashSet<&str>, tool: &ToolDescriptor) -> i64 {
    let mut score = 0i64;
    let name = tool.name.to_lowercase();

    // Exact name in query.
    if query.contains(&name) {
        score += 100;
    }

    // Name fragments ("read_file" → "read", "file").
    for fragment in name.split(['_', '.', '-']) {
        if fragment.len() > 2 && query.contains(fragment) {
            score += 30;
        }
    }

    // Description keyword overlap after stop-word filtering.
    let description = tool.description.to_lowercase();
    let mut seen: HashSet<&str> = HashSet::new();
    for word in description.split(|c: char| !c.is_alphanumeric()) {
        if word.len() > 2 && !STOP_WORDS.contains(&word) && seen.insert(word) {
            if query_words.contains(word) {
                score += 20;
            }
        }
    }

    // Domain-pattern bonuses.
    for pattern in DOMAIN_PATTERNS {
        let query_hit = pattern.query_terms.iter().any(|t| query.contains(t));
        let tool_hit = pattern.tool_terms.iter().any(|t| name.contains(t));
        if query_hit && tool_hit {
            score += 40;
        }
    }

    score
}

/// Return the top 5 tools by relevance to `query`, descending; ties keep
/// catalog order. Tools scoring zero are excluded.
pub fn match_relevant_tools(query: &str, tools: &[ToolDescriptor]) -> Vec<ToolDescriptor> {
    let query = query.to_lowercase();
    let query_words: HashSet<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .collect();

    let mut scored: Vec<(i64, &ToolDescriptor)> = tools
        .iter()
        .map(|tool| (score_tool(&query, &query_words, tool), tool))
        .filter(|(score, _)| *score > 0)
        .collect();

    // Stable sort: equal scores keep catalog order.
    scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
    scored.truncate(5);
    scored.into_iter().map(|(_, tool)| tool.clone()).collect()
}

// ─── Name Similarity ─────────────────────────────────────────────────────────

/// Levenshtein edit distance, single-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let m = a_bytes.len();
    let n = b_bytes.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a_bytes[i - 1] != b_bytes[j - 1]);
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity: 0.0 = completely different, 1.0 = identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

/// Up to `max_results` candidate names most similar to `name`, above a 0.3
/// similarity floor, best first. Used to suggest corrections for
/// hallucinated tool names.
pub fn find_similar<'a, I>(name: &str, candidates: I, max_results: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .map(|c| (c.to_string(), similarity(name, c)))
        .filter(|(_, score)| *score > 0.3)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_results);
    scored.into_iter().map(|(name, _)| name).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: Default::default(),
            server: "test".to_string(),
        }
    }

    fn sample_catalog() -> Vec<ToolDescriptor> {
        vec![
            tool("read_file", "Read the contents of a file from disk"),
            tool("write_file", "Write text content to a file on disk"),
            tool("http_request", "Perform an HTTP request against a URL"),
            tool("search_documents", "Search indexed documents for a phrase"),
            tool("query_table", "Run a SQL query against a data table"),
            tool("take_screenshot", "Capture the current screen"),
        ]
    }

    #[test]
    fn test_exact_name_in_query_ranks_first() {
        let catalog = sample_catalog();
        let matched = match_relevant_tools("please use read_file on /tmp/a", &catalog);
        assert!(!matched.is_empty());
        assert_eq!(matched[0].name, "read_file");
    }

    #[test]
    fn test_returns_at_most_five() {
        let catalog: Vec<ToolDescriptor> = (0..10)
            .map(|i| tool(&format!("file_tool_{i}"), "Works with a file"))
            .collect();
        let matched = match_relevant_tools("do something with this file", &catalog);
        assert_eq!(matched.len(), 5);
    }

    #[test]
    fn test_ties_keep_catalog_order() {
        let catalog = vec![
            tool("alpha_file", "first"),
            tool("beta_file", "second"),
        ];
        let matched = match_relevant_tools("file", &catalog);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].name, "alpha_file");
        assert_eq!(matched[1].name, "beta_file");
    }

    #[test]
    fn test_irrelevant_tools_excluded() {
        let catalog = sample_catalog();
        let matched = match_relevant_tools("capture the screen for me", &catalog);
        assert!(matched.iter().any(|t| t.name == "take_screenshot"));
        assert!(matched.iter().all(|t| t.name != "http_request"));
    }

    #[test]
    fn test_domain_pattern_bonus_applies() {
        let catalog = vec![
            tool("fetch_url", "Retrieve remote content"),
            tool("rename_thing", "Rename an item"),
        ];
        // "download" is a network intent; fetch_url carries network terms.
        let matched = match_relevant_tools("download the report", &catalog);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "fetch_url");
    }

    #[test]
    fn test_description_keywords_filtered_by_stop_words() {
        let catalog = vec![tool("summarize", "the of and to in on")];
        // Query consisting only of stop words scores nothing.
        let matched = match_relevant_tools("the of and", &catalog);
        assert!(matched.is_empty());
    }

    // ─── Similarity ──────────────────────────────────────────────────

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similarity_range() {
        assert!((similarity("move_file", "move_file") - 1.0).abs() < f64::EPSILON);
        assert!(similarity("abc", "xyz") < 0.5);
        assert!((similarity("", "") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_find_similar_orders_and_floors() {
        let candidates = ["read_file", "write_file", "move_file", "query_table"];
        let similar = find_similar("reed_file", candidates, 3);
        assert_eq!(similar.first().map(String::as_str), Some("read_file"));
        assert!(similar.len() <= 3);
        assert!(!similar.contains(&"query_table".to_string()));
    }
}
