//! Size-budgeted context block handed to the downstream generator.

use crate::RankedSource;

pub const MAX_CONTEXT_SOURCES: usize = 28;
pub const PRIMARY_SOURCE_COUNT: usize = 10;
pub const PRIMARY_CHAR_BUDGET: usize = 1200;
pub const SECONDARY_CHAR_BUDGET: usize = 800;
/// More snippet-only sources than this triggers the depth disclaimer.
pub const SNIPPET_ONLY_DISCLAIMER_THRESHOLD: usize = 8;

pub const SNIPPET_ONLY_TAG: &str = "[snippet only]";

pub const CITATION_INSTRUCTION: &str = "Answer using numbered citations like [1] that refer to the sources above. Do not fabricate facts, quotes, or figures beyond what these sources supply.";

pub fn budget_for_index(display_index: usize) -> usize {
    if display_index <= PRIMARY_SOURCE_COUNT {
        PRIMARY_CHAR_BUDGET
    } else {
        SECONDARY_CHAR_BUDGET
    }
}

/// Truncates to at most `max_chars` characters (never splits a code point).
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

pub fn disclaimer_line(snippet_only: usize, included: usize) -> String {
    format!(
        "Note: {snippet_only} of {included} sources could only be read as search snippets, so information depth is reduced. Say so where it matters."
    )
}

/// Renders ranked sources into the context block.
///
/// Returns an empty string when there is nothing to cite.
pub fn format_context(query: &str, sources: &[RankedSource]) -> String {
    let included = &sources[..sources.len().min(MAX_CONTEXT_SOURCES)];
    if included.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("Web research results for: \"{}\"\n\n", query.trim()));

    let mut snippet_only = 0usize;
    for s in included {
        let header = format!("[Source {}] {} ({})", s.display_index, s.title(), s.url());
        out.push_str(&header);
        if s.source.is_snippet_only() {
            snippet_only += 1;
            out.push(' ');
            out.push_str(SNIPPET_ONLY_TAG);
        }
        out.push('\n');
        let budget = budget_for_index(s.display_index);
        out.push_str(truncate_chars(s.source.full_content.trim(), budget));
        out.push_str("\n\n");
    }

    if snippet_only > SNIPPET_ONLY_DISCLAIMER_THRESHOLD {
        out.push_str(&disclaimer_line(snippet_only, included.len()));
        out.push('\n');
    }
    out.push_str(CITATION_INSTRUCTION);
    out.push('\n');
    out
}
