//! Inline citation resolution.
//!
//! Generated answers cite retrieved documents with bracketed numerals in a
//! small family of decorated forms: `[3]`, `[^3]`, `[${3}]`. The numeral is
//! the document's position in the *pre-deduplication* source list, so
//! resolution goes through the dedup remap — markers that referenced a
//! duplicate collapse onto the canonical source and share one display
//! number.
//!
//! Markers that cannot be resolved to a filtered source are left in the
//! text as literal content. Resolution runs one regex sweep over the full
//! concatenated text, so markers split across stream chunks resolve as soon
//! as the chunks have been joined.

use std::sync::LazyLock;

use regex::Regex;

use crate::chat::dedup::SourceDedup;
use crate::chat::message::Source;

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\^?\$?\{?(\d+)\}?\^?\]").expect("citation marker pattern"));

/// A presentation token: a run of sanitized markup, or an inline citation
/// carrying its canonical source and 1-based display number.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderToken {
    Text(String),
    Citation { source: Source, number: usize },
}

/// Resolve citation markers in sanitized answer markup against the
/// deduplicated source list.
///
/// The marker numeral is the 0-based pre-dedup position, looked up directly
/// in `dedup.index_map`; the display number is the filtered index plus one.
/// A citation that closes out a list item forces sentence punctuation onto
/// the text run before it.
pub fn resolve_citations(content: &str, dedup: &SourceDedup) -> Vec<RenderToken> {
    let mut tokens = Vec::new();
    let mut prev = 0usize;

    for captures in CITATION_MARKER.captures_iter(content) {
        let marker = captures.get(0).expect("whole match");
        let Ok(original) = captures[1].parse::<usize>() else {
            continue;
        };
        // Unresolvable numeral: not an error, the marker stays literal text
        // by not consuming the match.
        let Some(&resolved) = dedup.index_map.get(&original) else {
            continue;
        };
        if resolved >= dedup.filtered.len() {
            continue;
        }

        let run = &content[prev..marker.start()];
        let run = if closes_list_item(content, marker.end()) {
            punctuate(run)
        } else {
            run.to_string()
        };
        tokens.push(RenderToken::Text(run));
        tokens.push(RenderToken::Citation {
            source: dedup.filtered[resolved].clone(),
            number: resolved + 1,
        });
        prev = marker.end();
    }

    if prev < content.len() {
        tokens.push(RenderToken::Text(content[prev..].to_string()));
    }
    tokens
}

/// Whether the next markup after a marker closes a list item, i.e. the
/// citation is the last content of that item.
fn closes_list_item(content: &str, from: usize) -> bool {
    content[from..].trim_start().starts_with("</li>")
}

/// Terminate a text run with sentence punctuation before an item-final
/// citation. Runs ending in a tag have no text to punctuate.
fn punctuate(run: &str) -> String {
    let trimmed = run.trim_end();
    match trimmed.chars().last() {
        None | Some('>') => run.to_string(),
        Some('.') | Some('!') | Some('?') => trimmed.to_string(),
        Some(_) => format!("{trimmed}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::dedup::dedupe_sources;

    fn source(url: &str) -> Source {
        Source::new(url, format!("Docs | {url}"))
    }

    fn text(token: &RenderToken) -> &str {
        match token {
            RenderToken::Text(run) => run,
            other => panic!("expected text token, got {other:?}"),
        }
    }

    fn citation(token: &RenderToken) -> (&Source, usize) {
        match token {
            RenderToken::Citation { source, number } => (source, *number),
            other => panic!("expected citation token, got {other:?}"),
        }
    }

    // Marker numerals are 0-based pre-dedup positions, looked up directly in
    // the index map. The tests below fix that convention.

    #[test]
    fn test_two_markers_resolve_in_order() {
        let sources = vec![source("a"), source("b")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("See [0] and [1].", &dedup);

        assert_eq!(tokens.len(), 5);
        assert_eq!(text(&tokens[0]), "See ");
        assert_eq!(citation(&tokens[1]), (&sources[0], 1));
        assert_eq!(text(&tokens[2]), " and ");
        assert_eq!(citation(&tokens[3]), (&sources[1], 2));
        assert_eq!(text(&tokens[4]), ".");
    }

    #[test]
    fn test_markers_bind_by_numeral_not_position() {
        let sources = vec![source("a"), source("b")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("See [1] and [0].", &dedup);

        assert_eq!(citation(&tokens[1]), (&sources[1], 2));
        assert_eq!(citation(&tokens[3]), (&sources[0], 1));
    }

    #[test]
    fn test_decorated_marker_forms() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);

        for content in ["x [0] y", "x [^0] y", "x [${0}] y", "x [{0}] y"] {
            let tokens = resolve_citations(content, &dedup);
            assert_eq!(tokens.len(), 3, "content: {content}");
            assert_eq!(citation(&tokens[1]), (&sources[0], 1));
        }
    }

    #[test]
    fn test_duplicate_sources_share_display_number() {
        // a at positions 0 and 2, b at 1
        let sources = vec![source("a"), source("b"), source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("First [0], second [1], repeat [2].", &dedup);

        let (first, n_first) = citation(&tokens[1]);
        let (second, n_second) = citation(&tokens[3]);
        let (repeat, n_repeat) = citation(&tokens[5]);

        assert_eq!(first.url, "a");
        assert_eq!(n_first, 1);
        assert_eq!(second.url, "b");
        assert_eq!(n_second, 2);
        // Marker [2] referenced the duplicate of a and collapses onto it
        assert_eq!(repeat.url, "a");
        assert_eq!(n_repeat, 1);
    }

    #[test]
    fn test_out_of_range_marker_stays_literal() {
        let sources = vec![source("a"), source("b"), source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("Known [0], unknown [3].", &dedup);

        assert_eq!(tokens.len(), 3);
        assert_eq!(text(&tokens[0]), "Known ");
        assert_eq!(citation(&tokens[1]).1, 1);
        assert_eq!(text(&tokens[2]), ", unknown [3].");
    }

    #[test]
    fn test_no_sources_leaves_everything_literal() {
        let dedup = dedupe_sources(&[]);
        let tokens = resolve_citations("Text with [0] marker.", &dedup);

        assert_eq!(tokens, vec![RenderToken::Text("Text with [0] marker.".to_string())]);
    }

    #[test]
    fn test_empty_content_yields_no_tokens() {
        let dedup = dedupe_sources(&[source("a")]);
        assert!(resolve_citations("", &dedup).is_empty());
    }

    #[test]
    fn test_trailing_text_after_last_marker() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("[0] leads", &dedup);

        assert_eq!(text(&tokens[0]), "");
        assert_eq!(citation(&tokens[1]).1, 1);
        assert_eq!(text(&tokens[2]), " leads");
    }

    // ========================================================================
    // LIST-CITATION PUNCTUATION
    // ========================================================================

    #[test]
    fn test_item_final_citation_gets_punctuation() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("<ul>\n<li>Install the SDK [0]</li>\n</ul>", &dedup);

        assert_eq!(text(&tokens[0]), "<ul>\n<li>Install the SDK.");
        assert_eq!(citation(&tokens[1]).1, 1);
        assert_eq!(text(&tokens[2]), "</li>\n</ul>");
    }

    #[test]
    fn test_existing_punctuation_is_kept() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);

        for terminal in [".", "!", "?"] {
            let content = format!("<ul>\n<li>Done{terminal} [0]</li>\n</ul>");
            let tokens = resolve_citations(&content, &dedup);
            assert_eq!(
                text(&tokens[0]),
                format!("<ul>\n<li>Done{terminal}"),
                "terminal: {terminal}"
            );
        }
    }

    #[test]
    fn test_mid_item_citation_is_not_punctuated() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("<ul>\n<li>See [0] for details</li>\n</ul>", &dedup);

        assert_eq!(text(&tokens[0]), "<ul>\n<li>See ");
        assert_eq!(text(&tokens[2]), " for details</li>\n</ul>");
    }

    #[test]
    fn test_item_final_citation_after_tag_is_untouched() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("<ul>\n<li><code>cmd</code> [0]</li>\n</ul>", &dedup);

        // Run ends with a tag boundary, not text: nothing to punctuate.
        assert_eq!(text(&tokens[0]), "<ul>\n<li><code>cmd</code> ");
    }

    #[test]
    fn test_plain_text_final_citation_is_not_punctuated() {
        let sources = vec![source("a")];
        let dedup = dedupe_sources(&sources);
        let tokens = resolve_citations("Outside a list [0]", &dedup);

        assert_eq!(text(&tokens[0]), "Outside a list ");
    }
}
