/// Link reference definitions: label normalization, definition extraction
/// from paragraph content, and the resolution table built ahead of the
/// inline phase so forward references work.
use std::collections::HashMap;

use unicode_casefold::UnicodeCaseFold;

use super::util::{encode_destination, is_ascii_punctuation, process_backslash_escapes, process_entities};
use crate::ast::Node;

/// Normalized label -> (url, title). First definition for a label wins.
pub(crate) type ReferenceTable = HashMap<String, (String, Option<String>)>;

/// Case-fold the label and collapse internal whitespace; the result is the
/// key used for both definitions and reference lookups.
pub(crate) fn normalize_label(label: &str) -> String {
    label
        .chars()
        .case_fold()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// A parsed link reference definition before normalization.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RefDef {
    pub label: String,
    pub url: String,
    pub title: Option<String>,
}

impl RefDef {
    pub fn into_node(self) -> Node {
        Node::Reference {
            identifier: normalize_label(&self.label),
            url: self.url,
            title: self.title,
        }
    }
}

/// Walk the finished block tree and build the resolution table. The walk
/// runs before any inline parsing, which is what makes forward references
/// (use before definition) resolve.
pub(crate) fn collect_references(root: &Node) -> ReferenceTable {
    let mut table = ReferenceTable::new();
    collect_into(root, &mut table);
    table
}

fn collect_into(node: &Node, table: &mut ReferenceTable) {
    if let Node::Reference {
        identifier,
        url,
        title,
    } = node
    {
        // First definition wins; later duplicates stay visible in the tree
        // but are not consulted.
        table
            .entry(identifier.clone())
            .or_insert_with(|| (url.clone(), title.clone()));
    }
    if let Some(children) = node.children() {
        for child in children {
            collect_into(child, table);
        }
    }
}

/// Strip as many link reference definitions as possible from the start of a
/// closed paragraph's content. Returns the definitions and the remaining
/// paragraph text (which may be empty).
pub(crate) fn extract_reference_definitions(content: &str) -> (Vec<RefDef>, String) {
    let chars: Vec<char> = content.chars().collect();
    let mut defs = Vec::new();
    let mut pos = 0;

    loop {
        let mut i = pos;
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t' || chars[i] == '\n') {
            i += 1;
        }
        match parse_definition(&chars, i) {
            Some((def, consumed)) => {
                defs.push(def);
                pos = consumed;
            }
            None => break,
        }
    }

    let remaining: String = chars[pos..].iter().collect();
    (defs, remaining.trim().to_string())
}

/// Parse one definition starting at `chars[start]`. Returns the definition
/// and the index just past it (including its trailing line ending).
fn parse_definition(chars: &[char], start: usize) -> Option<(RefDef, usize)> {
    let mut i = start;
    if i >= chars.len() || chars[i] != '[' {
        return None;
    }
    i += 1;

    // Label: up to 999 characters, no unescaped brackets, at least one
    // non-whitespace character.
    let label_start = i;
    let mut label = String::new();
    loop {
        if i >= chars.len() || i - label_start > 999 {
            return None;
        }
        match chars[i] {
            ']' => break,
            '[' => return None,
            '\\' if i + 1 < chars.len() => {
                label.push(chars[i]);
                label.push(chars[i + 1]);
                i += 2;
            }
            ch => {
                label.push(ch);
                i += 1;
            }
        }
    }
    if label.trim().is_empty() {
        return None;
    }
    i += 1; // ']'

    if i >= chars.len() || chars[i] != ':' {
        return None;
    }
    i += 1;

    // Optional whitespace with at most one line ending before the
    // destination.
    let mut newlines = 0;
    while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t' || chars[i] == '\n') {
        if chars[i] == '\n' {
            newlines += 1;
            if newlines > 1 {
                return None;
            }
        }
        i += 1;
    }

    let (url, after_dest) = parse_destination(chars, i)?;
    i = after_dest;

    // Whitespace between destination and a potential title. The title must
    // be separated from the destination, either by spaces or a line ending.
    let mut saw_whitespace = false;
    let mut j = i;
    while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
        saw_whitespace = true;
        j += 1;
    }
    if j < chars.len() && chars[j] == '\n' {
        saw_whitespace = true;
        j += 1;
        while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
            j += 1;
        }
    }

    let dest_line_ends_clean = rest_of_line_blank(chars, i);

    if saw_whitespace
        && j < chars.len()
        && matches!(chars[j], '"' | '\'' | '(')
        && let Some((title, after_title)) = parse_title(chars, j)
        && rest_of_line_blank(chars, after_title)
    {
        let end = skip_past_line_end(chars, after_title);
        return Some((
            RefDef {
                label,
                url,
                title: Some(title),
            },
            end,
        ));
    }

    // No valid title. The definition still stands when the destination ends
    // its line cleanly; a failed same-line title invalidates the whole
    // definition and the content reverts to a paragraph.
    if dest_line_ends_clean {
        let end = skip_past_line_end(chars, i);
        return Some((
            RefDef {
                label,
                url,
                title: None,
            },
            end,
        ));
    }
    None
}

/// Parse a link destination (shared with inline links): either `<...>` with
/// no line endings, or a bare run with balanced parentheses.
pub(crate) fn parse_destination(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    if i >= chars.len() {
        return None;
    }

    if chars[i] == '<' {
        i += 1;
        let mut dest = String::new();
        while i < chars.len() {
            match chars[i] {
                '>' => {
                    let decoded = process_entities(&dest);
                    return Some((encode_destination(&decoded), i + 1));
                }
                '<' | '\n' => return None,
                '\\' if i + 1 < chars.len() && is_ascii_punctuation(chars[i + 1]) => {
                    dest.push(chars[i + 1]);
                    i += 2;
                }
                ch => {
                    dest.push(ch);
                    i += 1;
                }
            }
        }
        return None;
    }

    let mut dest = String::new();
    let mut paren_depth = 0;
    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' => break,
            '\\' if i + 1 < chars.len() && is_ascii_punctuation(chars[i + 1]) => {
                dest.push(chars[i + 1]);
                i += 2;
            }
            '(' => {
                paren_depth += 1;
                dest.push('(');
                i += 1;
            }
            ')' => {
                if paren_depth == 0 {
                    break;
                }
                paren_depth -= 1;
                dest.push(')');
                i += 1;
            }
            ch if ch.is_ascii_control() => return None,
            ch => {
                dest.push(ch);
                i += 1;
            }
        }
    }

    if dest.is_empty() {
        None
    } else {
        let decoded = process_entities(&dest);
        Some((encode_destination(&decoded), i))
    }
}

/// Parse a link title delimited by `"`, `'`, or parentheses. Titles may span
/// line endings but not blank lines.
pub(crate) fn parse_title(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    let closer = match chars.get(i)? {
        '"' => '"',
        '\'' => '\'',
        '(' => ')',
        _ => return None,
    };
    i += 1;

    let mut title = String::new();
    while i < chars.len() {
        let ch = chars[i];
        if ch == closer {
            let escaped = process_backslash_escapes(&title);
            return Some((process_entities(&escaped), i + 1));
        }
        if ch == '\n' {
            // A blank line ends the title attempt.
            let mut j = i + 1;
            while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
                j += 1;
            }
            if j >= chars.len() || chars[j] == '\n' {
                return None;
            }
            title.push('\n');
            i += 1;
            continue;
        }
        if ch == '\\' && i + 1 < chars.len() {
            title.push(ch);
            title.push(chars[i + 1]);
            i += 2;
            continue;
        }
        title.push(ch);
        i += 1;
    }
    None
}

fn rest_of_line_blank(chars: &[char], start: usize) -> bool {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\n' => return true,
            ' ' | '\t' => i += 1,
            _ => return false,
        }
    }
    true
}

fn skip_past_line_end(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    if i < chars.len() { i + 1 } else { i }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_case_fold_and_collapse_whitespace() {
        assert_eq!(normalize_label("Foo   Bar"), "foo bar");
        assert_eq!(normalize_label("  ТоЛпой\n  "), normalize_label("толпой"));
        assert_eq!(normalize_label("ẞ"), normalize_label("ss"));
    }

    #[test]
    fn simple_definition_extracts() {
        let (defs, rest) = extract_reference_definitions("[foo]: /url \"title\"");
        assert_eq!(
            defs,
            vec![RefDef {
                label: "foo".to_string(),
                url: "/url".to_string(),
                title: Some("title".to_string()),
            }]
        );
        assert_eq!(rest, "");
    }

    #[test]
    fn definition_without_title_keeps_following_text() {
        let (defs, rest) = extract_reference_definitions("[foo]: /url\nremaining text");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].title, None);
        assert_eq!(rest, "remaining text");
    }

    #[test]
    fn title_over_multiple_lines() {
        let (defs, rest) = extract_reference_definitions("[foo]: /url \"first\nsecond\"");
        assert_eq!(defs[0].title.as_deref(), Some("first\nsecond"));
        assert_eq!(rest, "");
    }

    #[test]
    fn failed_same_line_title_rejects_the_definition() {
        let (defs, rest) = extract_reference_definitions("[foo]: /url \"unclosed");
        assert!(defs.is_empty());
        assert_eq!(rest, "[foo]: /url \"unclosed");
    }

    #[test]
    fn failed_next_line_title_keeps_the_definition() {
        let (defs, rest) = extract_reference_definitions("[foo]: /url\n\"not a title");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].title, None);
        assert_eq!(rest, "\"not a title");
    }

    #[test]
    fn destination_in_angle_brackets_may_hold_spaces() {
        let (defs, _) = extract_reference_definitions("[foo]: </my url>");
        assert_eq!(defs[0].url, "/my%20url");
    }

    #[test]
    fn first_definition_wins_in_the_table() {
        let root = Node::Document(vec![
            Node::Reference {
                identifier: "foo".to_string(),
                url: "/first".to_string(),
                title: None,
            },
            Node::Reference {
                identifier: "foo".to_string(),
                url: "/second".to_string(),
                title: None,
            },
        ]);
        let table = collect_references(&root);
        assert_eq!(table["foo"].0, "/first");
    }
}
