//! Markdown rendering and sanitization for generated answers.
//!
//! Answer text originates from a third-party generation service and is
//! rendered as rich content, so every markdown pass is followed by an
//! allow-list HTML sanitizer before the result is treated as renderable
//! markup. Structural tags (lists, paragraphs, emphasis, code) survive;
//! script-bearing markup does not.

use pulldown_cmark::{Options, Parser, html};

/// Render markdown to HTML. Footnotes stay disabled so `[^3]`-style
/// citation markers pass through as literal text.
fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Render untrusted markdown into sanitized HTML.
pub fn to_safe_html(text: &str) -> String {
    ammonia::clean(&render_markdown(text)).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paragraph() {
        assert_eq!(to_safe_html("Hello world"), "<p>Hello world</p>");
    }

    #[test]
    fn test_lists_survive() {
        let html = to_safe_html("- one\n- two");
        assert!(html.contains("<ul>"));
        assert!(html.contains("<li>one</li>"));
        assert!(html.contains("<li>two</li>"));
    }

    #[test]
    fn test_script_is_stripped() {
        let html = to_safe_html("Hi <script>alert('x')</script> there");
        assert!(!html.contains("<script"));
        assert!(!html.contains("alert"));
    }

    #[test]
    fn test_event_handlers_are_stripped() {
        let html = to_safe_html(r#"<p onclick="steal()">text</p>"#);
        assert!(!html.contains("onclick"));
        assert!(html.contains("text"));
    }

    #[test]
    fn test_citation_markers_pass_through() {
        let html = to_safe_html("Install the SDK [0]. Configure it [^1].");
        assert!(html.contains("[0]"));
        assert!(html.contains("[^1]"));
    }

    #[test]
    fn test_result_is_trimmed() {
        let html = to_safe_html("text\n");
        assert_eq!(html, html.trim());
    }
}
