//! Line and offset helpers shared by the parser and the extractor.

use crate::model::LineRange;

/// Leading whitespace of the line holding `byte_idx`.
pub fn line_indent_at_byte(source_text: &str, byte_idx: usize) -> String {
    let bytes = source_text.as_bytes();
    let mut i = byte_idx.min(bytes.len());
    while i > 0 {
        if bytes[i - 1] == b'\n' {
            break;
        }
        i -= 1;
    }

    let mut j = i;
    while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
        j += 1;
    }

    source_text[i..j].to_string()
}

pub fn line_indent(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Comment-only line as seen by the JSDoc scan: `//`, `/*`, `*`, `*/`.
pub fn is_comment_line(line: &str) -> bool {
    let t = line.trim();
    t.starts_with("//") || t.starts_with('*') || t.starts_with("/*")
}

/// Contiguous run of comment-only lines right above `start_line`.
pub fn js_doc_before(content: &str, start_line: usize) -> Option<(String, LineRange)> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut first = start_line;
    while first > 0 {
        let Some(line) = lines.get(first - 1) else { break };
        if !is_comment_line(line) {
            break;
        }
        first -= 1;
    }
    if first == start_line {
        return None;
    }
    let doc = lines[first..start_line].join("\n");
    Some((doc, LineRange { start: first, end: start_line - 1 }))
}

/// Lines `start..=end`, clamped to the text.
pub fn slice_lines(text: &str, start: usize, end: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let end = end.min(lines.len().saturating_sub(1));
    if start > end {
        return String::new();
    }
    lines[start..=end].join("\n")
}

pub fn replace_lines(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    let end = end.min(lines.len().saturating_sub(1));
    if start > end {
        return text.to_string();
    }
    lines.splice(start..=end, [replacement]);
    lines.join("\n")
}

/// Insert `insert` as new line(s) before `line`; with `copy_indent` every
/// inserted line not already carrying the target line's indent gets it.
pub fn insert_before_line(text: &str, line: usize, insert: &str, copy_indent: bool) -> String {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let at = line.min(lines.len());
    let block = if copy_indent {
        let indent = lines.get(at).map(|l| line_indent(l).to_string()).unwrap_or_default();
        insert
            .split('\n')
            .map(|l| if l.starts_with(&indent) { l.to_string() } else { format!("{indent}{l}") })
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        insert.to_string()
    };
    lines.insert(at, block);
    lines.join("\n")
}
