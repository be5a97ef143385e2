//! Plain-text extraction from corpus files.

use std::fs;
use std::path::Path;

use pulldown_cmark::{Event, Options, Parser, TagEnd};
use regex::Regex;

/// File extensions the ingester accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "html", "txt"];

/// Read a corpus file and extract its plain text based on extension.
/// Anything that is not Markdown or HTML is treated as plain text.
pub fn extract_text(path: &Path) -> std::io::Result<String> {
    let raw = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    Ok(match ext.as_deref() {
        Some("md") => markdown_to_text(&raw),
        Some("html") => html_to_text(&raw),
        _ => raw,
    })
}

/// Render Markdown to plain text by walking the event stream.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    let parser = Parser::new_ext(markdown, options);

    let mut text = String::new();
    for event in parser {
        match event {
            Event::Text(t) => text.push_str(&t),
            Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::TableCell) => text.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote
                | TagEnd::TableRow
                | TagEnd::Table,
            ) => text.push('\n'),
            _ => {}
        }
    }

    normalize_whitespace(&text)
}

/// Extract plain text from HTML.
///
/// Strips `<script>` and `<style>` blocks and comments, breaks on block
/// elements, removes the remaining tags, decodes entities, and
/// normalizes whitespace.
pub fn html_to_text(html: &str) -> String {
    let script_re = Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap();
    let mut text = script_re.replace_all(html, "").to_string();

    let style_re = Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap();
    text = style_re.replace_all(&text, "").to_string();

    let comment_re = Regex::new(r"(?s)<!--.*?-->").unwrap();
    text = comment_re.replace_all(&text, "").to_string();

    // Convert block elements to newlines for readable text
    let block_re = Regex::new(
        r"(?i)</?(div|p|br|h[1-6]|li|tr|blockquote|section|article|header|footer|main|aside|table|ul|ol)[^>]*>",
    )
    .unwrap();
    text = block_re.replace_all(&text, "\n").to_string();

    let tag_re = Regex::new(r"<[^>]+>").unwrap();
    text = tag_re.replace_all(&text, "").to_string();

    let decoded = html_escape::decode_html_entities(&text);
    normalize_whitespace(&decoded)
}

/// Collapse runs of spaces and blank lines, trim the ends.
fn normalize_whitespace(text: &str) -> String {
    let space_re = Regex::new(r"[ \t]+").unwrap();
    let text = space_re.replace_all(text, " ");

    let newline_re = Regex::new(r" ?\n ?").unwrap();
    let text = newline_re.replace_all(&text, "\n");

    let blank_re = Regex::new(r"\n{3,}").unwrap();
    let text = blank_re.replace_all(&text, "\n\n");

    text.trim().to_string()
}
