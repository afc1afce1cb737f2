//! Terminal presentation of resolved answer tokens.
//!
//! The engine hands the presenter sanitized HTML runs interleaved with
//! citation tokens; this module flattens them into ANSI text. It is
//! deliberately small: block tags become line breaks, list items become
//! bullets, emphasis becomes ANSI styles, everything else is dropped.

use std::io::Write;

use crate::chat::citations::RenderToken;
use crate::chat::message::Source;
use crate::chat::session::TurnUpdate;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const ITALIC: &str = "\x1b[3m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Flatten resolved tokens into styled terminal text.
pub fn render_tokens(tokens: &[RenderToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            RenderToken::Text(run) => out.push_str(&html_to_ansi(run)),
            RenderToken::Citation { number, .. } => {
                out.push_str(&format!("{CYAN}[{number}]{RESET}"));
            }
        }
    }
    out
}

/// One numbered source line, split the way the source panel displays it:
/// the first breadcrumb as a kicker, the rest as the title, the URL below.
pub fn render_source(index: usize, source: &Source) -> String {
    let mut crumbs = source.title.split(" | ");
    let kicker = crumbs.next().unwrap_or_default();
    let rest: Vec<&str> = crumbs.collect();
    let title = if rest.is_empty() {
        kicker.to_string()
    } else {
        rest.join(" | ")
    };

    let mut line = format!("{CYAN}[{}]{RESET} {BOLD}{title}{RESET}", index + 1);
    if !rest.is_empty() {
        line.push_str(&format!(" {DIM}({kicker}){RESET}"));
    }
    if let Some(fragment) = source.url.split('#').nth(1) {
        line.push_str(&format!(" {DIM}#{fragment}{RESET}"));
    }
    line.push_str(&format!("\n    {DIM}{}{RESET}", source.url));
    line
}

/// Strip sanitized HTML down to ANSI terminal text.
fn html_to_ansi(html: &str) -> String {
    let mut out = String::new();
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&unescape(&rest[..open]));
        let Some(close) = rest[open..].find('>') else {
            // Unterminated tag: sanitized input should not produce this,
            // keep the remainder as text.
            out.push_str(&unescape(&rest[open..]));
            return out;
        };
        let tag = rest[open + 1..open + close].trim();
        rest = &rest[open + close + 1..];

        let name = tag
            .trim_start_matches('/')
            .split([' ', '\t', '\n'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let closing = tag.starts_with('/');

        match (name.as_str(), closing) {
            ("li", false) => out.push_str("  \u{2022} "),
            ("li", true) | ("br", false) => out.push('\n'),
            ("p" | "ul" | "ol" | "pre" | "blockquote", true) => out.push_str("\n\n"),
            ("h1" | "h2" | "h3" | "h4" | "h5" | "h6", false) => out.push_str(BOLD),
            ("h1" | "h2" | "h3" | "h4" | "h5" | "h6", true) => {
                out.push_str(RESET);
                out.push_str("\n\n");
            }
            ("strong" | "b", false) => out.push_str(BOLD),
            ("em" | "i", false) => out.push_str(ITALIC),
            ("code", false) => out.push_str(DIM),
            ("strong" | "b" | "em" | "i" | "code", true) => out.push_str(RESET),
            _ => {}
        }
    }
    out.push_str(&unescape(rest));
    out
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Incremental printer for one streaming turn.
///
/// The rendered text grows monotonically almost always, so the printer
/// emits only the new suffix; when a late batch rewrites earlier output
/// (e.g. a marker resolving once sources arrive) it reprints in full.
#[derive(Default)]
pub struct StreamPrinter {
    printed: String,
    sources: Vec<Source>,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&mut self, update: &TurnUpdate<'_>) {
        let rendered = render_tokens(update.tokens);
        self.sources = update.sources.to_vec();

        let mut stdout = std::io::stdout();
        if let Some(suffix) = rendered.strip_prefix(self.printed.as_str()) {
            let _ = stdout.write_all(suffix.as_bytes());
        } else {
            let _ = stdout.write_all(b"\n");
            let _ = stdout.write_all(rendered.as_bytes());
        }
        let _ = stdout.flush();
        self.printed = rendered;
    }

    /// Close the turn: end the answer block and list the sources.
    pub fn finish(self) -> Vec<Source> {
        println!();
        if !self.sources.is_empty() {
            println!("{BOLD}Sources{RESET}");
            for (index, source) in self.sources.iter().enumerate() {
                println!("{}", render_source(index, source));
            }
        }
        self.sources
    }
}
