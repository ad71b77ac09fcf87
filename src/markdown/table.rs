/// GFM tables. A table opens only when a single-line paragraph is followed
/// by a delimiter row with a matching cell count; after that, body rows are
/// padded or truncated to the header width, never rejected.
use crate::ast::Alignment;

/// Parse a delimiter row such as `| :--- | :-: | ---: |`. Every cell must
/// match `:?-+:?`; the alignments are recorded per column.
pub(crate) fn parse_table_separator(line: &str) -> Option<Vec<Alignment>> {
    let trimmed = line.trim();
    // Without a pipe the line is a setext underline or thematic break, not
    // a table delimiter.
    if trimmed.is_empty() || !trimmed.contains('-') || !trimmed.contains('|') {
        return None;
    }
    // A separator contains only pipes, colons, dashes, and spaces.
    if !trimmed
        .chars()
        .all(|ch| matches!(ch, '|' | ':' | '-' | ' ' | '\t'))
    {
        return None;
    }

    let cells = split_row(trimmed);
    if cells.is_empty() {
        return None;
    }

    let mut alignments = Vec::with_capacity(cells.len());
    for cell in cells {
        let cell = cell.trim();
        if cell.is_empty() {
            return None;
        }
        let leading = cell.starts_with(':');
        let trailing = cell.ends_with(':');
        let dashes = &cell[leading as usize..cell.len() - trailing as usize];
        if dashes.is_empty() || !dashes.chars().all(|ch| ch == '-') {
            return None;
        }
        alignments.push(match (leading, trailing) {
            (true, true) => Alignment::Center,
            (true, false) => Alignment::Left,
            (false, true) => Alignment::Right,
            (false, false) => Alignment::None,
        });
    }
    Some(alignments)
}

/// Split a table line into raw cell texts. Leading/trailing pipes are
/// optional and `\|` does not split.
pub(crate) fn split_row(line: &str) -> Vec<String> {
    let mut trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix('|') {
        trimmed = rest;
    }
    // A trailing unescaped pipe is decoration, not an empty cell.
    if trimmed.ends_with('|') && !trimmed.ends_with("\\|") {
        trimmed = &trimmed[..trimmed.len() - 1];
    }

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'|') => {
                // Keep the escape so inline parsing sees a literal pipe.
                current.push('\\');
                current.push('|');
                chars.next();
            }
            '|' => {
                cells.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Body rows conform to the header width: short rows gain empty cells, long
/// rows lose the excess.
pub(crate) fn conform_row(mut cells: Vec<String>, width: usize) -> Vec<String> {
    cells.truncate(width);
    while cells.len() < width {
        cells.push(String::new());
    }
    cells
}
