//! Assembly: page descriptions → one Markdown document.
//!
//! Each page's content is cleaned by [`clean_markdown`] and followed by a
//! footer (`---` rule and an italic `_Page N_` marker). Pages are emitted in
//! the order given, which the converter guarantees is page order.
//!
//! Cleaning is deliberately conservative. Models like to wrap their whole
//! answer in a ```` ```markdown ```` block; that wrapper is removed so the
//! document does not render as one giant code block. Everything else the
//! model wrote, including its leading HTML comment, is kept.

use crate::output::PageResult;
use once_cell::sync::Lazy;
use regex::Regex;

/// Opening fence of a wrapped answer, tagged `markdown`/`md` or bare.
static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```(markdown|md)?[ \t]*(\r?\n|$)").unwrap());

/// Clean one page description for inclusion in the document.
pub fn clean_markdown(content: &str) -> String {
    let s = strip_markdown_fences(content);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    trim_trailing_whitespace(&s).trim().to_string()
}

/// Remove a fence that wraps the whole answer.
///
/// A tagged opening fence (```` ```markdown ````, ```` ```md ````) is cut
/// together with everything from the last ```` ``` ```` on. A bare opening
/// fence is only treated as a wrapper when its closing fence is the last
/// line and no other fence line sits in between; otherwise the page starts
/// with a real code block and stays as written.
pub fn strip_markdown_fences(content: &str) -> String {
    let trimmed = content.trim();
    let Some(caps) = RE_OPENING_FENCE.captures(trimmed) else {
        return content.to_string();
    };

    let body = &trimmed[caps[0].len()..];
    let tagged = caps.get(1).is_some();
    if !tagged {
        return match bare_wrapper_body(body) {
            Some(inner) => inner.trim().to_string(),
            None => content.to_string(),
        };
    }

    let body = match body.rfind("```") {
        Some(idx) => &body[..idx],
        None => body,
    };
    body.trim().to_string()
}

/// Body of a bare-fenced answer: everything before a closing ```` ``` ````
/// on the final line, provided no other line opens or closes a fence.
fn bare_wrapper_body(body: &str) -> Option<&str> {
    let (inner, last) = match body.rfind('\n') {
        Some(idx) => (&body[..idx], &body[idx + 1..]),
        None => ("", body),
    };
    if last.trim() != "```" {
        return None;
    }
    if inner.lines().any(|line| line.trim_start().starts_with("```")) {
        return None;
    }
    Some(inner)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Footer appended after every page.
pub fn page_footer(page: usize) -> String {
    format!("\n\n---\n_Page {page}_\n")
}

/// One page as it appears in the document: cleaned content plus footer.
pub fn format_page(page: &PageResult) -> String {
    let mut out = clean_markdown(&page.content);
    out.push_str(&page_footer(page.page));
    out
}

/// Concatenate formatted pages.
pub fn assemble(pages: &[PageResult]) -> String {
    pages.iter().map(format_page).collect()
}
