//! Conversion between legacy plain-text story bodies and rich markup.
//!
//! The stored form is never tagged: a body is rich when its first
//! non-whitespace characters open a markup element, and legacy otherwise.

use html2text::render::text_renderer::TrivialDecorator;
use serde::Serialize;

/// Wide enough that html2text never wraps a paragraph.
const UNWRAPPED_WIDTH: usize = 4096;

/// Block produced for read-only display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum DisplayBlock {
    Paragraph(String),
    /// A blank line in legacy content.
    Spacer,
    /// Rich content, handed to the consumer untouched.
    Markup(String),
}

pub fn is_rich_format(content: &str) -> bool {
    let mut chars = content.trim_start().chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('<'), Some(c)) if c.is_ascii_alphabetic() || c == '!' || c == '/'
    )
}

/// Produces content the rich editor can load without collapsing paragraph
/// breaks. Rich content is returned unchanged, which makes this idempotent.
pub fn to_editable_rich_form(content: &str) -> String {
    if is_rich_format(content) {
        return content.to_string();
    }
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect()
}

pub fn to_display_paragraphs(content: &str) -> Vec<DisplayBlock> {
    if is_rich_format(content) {
        return vec![DisplayBlock::Markup(content.to_string())];
    }
    content
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                DisplayBlock::Spacer
            } else {
                DisplayBlock::Paragraph(line.trim_end().to_string())
            }
        })
        .collect()
}

/// One paragraph-sized slice of a story body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment<'a> {
    /// Line text for legacy content, inner markup of a `<p>` otherwise.
    pub raw: &'a str,
    /// Text offset, in characters, just past the segment. Tags do not count,
    /// so this is comparable with editor insertion positions.
    pub text_end: usize,
    pub kind: SegmentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    Line,
    Paragraph,
    /// Markup between paragraphs (headings, lists, ...).
    Fragment,
}

pub(crate) fn segments(content: &str) -> Vec<Segment<'_>> {
    if is_rich_format(content) {
        markup_segments(content)
    } else {
        line_segments(content)
    }
}

fn line_segments(content: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut offset = 0;
    for piece in content.split_inclusive('\n') {
        let raw = piece.trim_end_matches(['\n', '\r']);
        let line_chars = raw.chars().count();
        out.push(Segment {
            raw,
            text_end: offset + line_chars,
            kind: SegmentKind::Line,
        });
        offset += piece.chars().count();
    }
    out
}

fn markup_segments(content: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut offset = 0;
    let mut cursor = 0;
    while let Some(open) = find_paragraph_open(content, cursor) {
        push_fragment(&mut out, &mut offset, &content[cursor..open]);
        let Some(tag_end) = content[open..].find('>').map(|i| open + i + 1) else {
            break;
        };
        let (inner_end, close_end) = match content[tag_end..].find("</p>") {
            Some(i) => (tag_end + i, tag_end + i + "</p>".len()),
            None => (content.len(), content.len()),
        };
        let raw = &content[tag_end..inner_end];
        offset += markup_text(raw).chars().count();
        out.push(Segment {
            raw,
            text_end: offset,
            kind: SegmentKind::Paragraph,
        });
        cursor = close_end;
    }
    push_fragment(&mut out, &mut offset, &content[cursor..]);
    out
}

fn find_paragraph_open(content: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(i) = content[search..].find("<p") {
        let at = search + i;
        match content[at + 2..].chars().next() {
            Some('>') => return Some(at),
            Some(c) if c.is_whitespace() => return Some(at),
            _ => search = at + 2,
        }
    }
    None
}

fn push_fragment<'a>(out: &mut Vec<Segment<'a>>, offset: &mut usize, between: &'a str) {
    let raw = between.trim();
    if !raw.is_empty() {
        *offset += markup_text(raw).chars().count();
        out.push(Segment {
            raw,
            text_end: *offset,
            kind: SegmentKind::Fragment,
        });
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Visible text of a markup fragment on a single line, with every HTML
/// entity decoded.
pub fn markup_text(markup: &str) -> String {
    let text =
        html2text::from_read_with_decorator(markup.as_bytes(), UNWRAPPED_WIDTH, TrivialDecorator::new());
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
