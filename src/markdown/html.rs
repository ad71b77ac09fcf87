/// Raw HTML recognition: the seven block-level start/end conditions and the
/// inline tag/comment/PI/declaration/CDATA grammar. Failure to match is
/// always "this is plain text", never an error.

/// End condition for an open HTML block, derived from which of the seven
/// start conditions matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HtmlBlockEnd {
    /// Type 1: ends on a line containing a closing pre/script/style/textarea tag.
    ContainerTag,
    /// Type 2: ends on a line containing `-->`.
    Comment,
    /// Type 3: ends on a line containing `?>`.
    ProcessingInstruction,
    /// Type 4: ends on a line containing `>`.
    Declaration,
    /// Type 5: ends on a line containing `]]>`.
    Cdata,
    /// Types 6 and 7: end at the next blank line.
    BlankLine,
}

const TYPE1_TAGS: [&str; 4] = ["pre", "script", "style", "textarea"];

const BLOCK_TAGS: [&str; 62] = [
    "address", "article", "aside", "base", "basefont", "blockquote", "body", "caption", "center",
    "col", "colgroup", "dd", "details", "dialog", "dir", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "frame", "frameset", "h1", "h2", "h3", "h4", "h5",
    "h6", "head", "header", "hr", "html", "iframe", "legend", "li", "link", "main", "menu",
    "menuitem", "nav", "noframes", "ol", "optgroup", "option", "p", "param", "search", "section",
    "summary", "table", "tbody", "td", "tfoot", "th", "thead", "title", "tr", "track", "ul",
];

/// Test whether `rest` (the line after container prefixes, at most 3 columns
/// of indentation already verified by the caller) starts an HTML block.
/// Type 7 cannot interrupt a paragraph.
pub(crate) fn html_block_start(rest: &str, interrupting_paragraph: bool) -> Option<HtmlBlockEnd> {
    let trimmed = rest.trim_start();
    if !trimmed.starts_with('<') {
        return None;
    }

    // Type 1: <pre, <script, <style, <textarea
    for tag in TYPE1_TAGS {
        let pattern = format!("<{}", tag);
        if starts_with_ignore_case(trimmed, &pattern) {
            let after = &trimmed[pattern.len()..];
            if after.is_empty()
                || after.starts_with('>')
                || after.starts_with(' ')
                || after.starts_with('\t')
            {
                return Some(HtmlBlockEnd::ContainerTag);
            }
        }
    }

    // Type 2: comment
    if trimmed.starts_with("<!--") {
        return Some(HtmlBlockEnd::Comment);
    }
    // Type 3: processing instruction
    if trimmed.starts_with("<?") {
        return Some(HtmlBlockEnd::ProcessingInstruction);
    }
    // Type 5 before type 4: CDATA also starts with <!
    if trimmed.starts_with("<![CDATA[") {
        return Some(HtmlBlockEnd::Cdata);
    }
    // Type 4: declaration
    if trimmed.starts_with("<!")
        && trimmed
            .chars()
            .nth(2)
            .is_some_and(|ch| ch.is_ascii_uppercase())
    {
        return Some(HtmlBlockEnd::Declaration);
    }

    // Type 6: known block-level tag, opening or closing
    for tag in BLOCK_TAGS {
        for pattern in [format!("<{}", tag), format!("</{}", tag)] {
            if starts_with_ignore_case(trimmed, &pattern) {
                let after = &trimmed[pattern.len()..];
                if after.is_empty()
                    || after.starts_with('>')
                    || after.starts_with("/>")
                    || after.starts_with(' ')
                    || after.starts_with('\t')
                {
                    return Some(HtmlBlockEnd::BlankLine);
                }
            }
        }
    }

    // Type 7: a single complete tag alone on its line
    if !interrupting_paragraph && is_complete_tag_line(trimmed) {
        return Some(HtmlBlockEnd::BlankLine);
    }

    None
}

/// Byte-wise ASCII-case-insensitive prefix test; the pattern is ASCII, so a
/// match also guarantees a character boundary at its length.
fn starts_with_ignore_case(s: &str, pattern: &str) -> bool {
    s.len() >= pattern.len()
        && s.as_bytes()[..pattern.len()].eq_ignore_ascii_case(pattern.as_bytes())
}

/// Does the line satisfy an open HTML block's end condition? Blank-line
/// termination (types 6/7) is handled by the block machine itself.
pub(crate) fn html_block_ends(end: HtmlBlockEnd, line: &str) -> bool {
    match end {
        HtmlBlockEnd::ContainerTag => {
            let lower = line.to_lowercase();
            TYPE1_TAGS
                .iter()
                .any(|tag| lower.contains(&format!("</{}>", tag)))
        }
        HtmlBlockEnd::Comment => line.contains("-->"),
        HtmlBlockEnd::ProcessingInstruction => line.contains("?>"),
        HtmlBlockEnd::Declaration => line.contains('>'),
        HtmlBlockEnd::Cdata => line.contains("]]>"),
        HtmlBlockEnd::BlankLine => false,
    }
}

/// A type-7 start: one complete open or close tag followed only by
/// whitespace.
fn is_complete_tag_line(line: &str) -> bool {
    let trimmed = line.trim_end();
    let chars: Vec<char> = trimmed.chars().collect();
    // Only real open/close tags qualify, not comments or declarations.
    if !chars
        .get(1)
        .is_some_and(|ch| *ch == '/' || ch.is_ascii_alphabetic())
    {
        return false;
    }
    match scan_inline_html(&chars, 0) {
        Some(end) => end == chars.len(),
        None => false,
    }
}

/// Scan one inline HTML construct starting at `chars[start]` (which must be
/// `<`). Returns the index just past it. The attribute grammar is validated;
/// anything invalid means the `<` is plain text.
pub(crate) fn scan_inline_html(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start) != Some(&'<') {
        return None;
    }
    let i = start + 1;

    // Comment: <!--...--> (not starting with > or ->, not containing --,
    // per the HTML comment grammar)
    if chars[i..].starts_with(&['!', '-', '-']) {
        let mut j = i + 3;
        if chars.get(j) == Some(&'>') {
            return None;
        }
        if chars.get(j) == Some(&'-') && chars.get(j + 1) == Some(&'>') {
            return None;
        }
        let body_start = j;
        while j + 2 < chars.len() {
            if chars[j] == '-' && chars[j + 1] == '-' {
                return if chars[j + 2] == '>' && j >= body_start {
                    Some(j + 3)
                } else {
                    // `--` inside a comment body is invalid.
                    None
                };
            }
            j += 1;
        }
        return None;
    }

    // Processing instruction: <?...?>
    if chars.get(i) == Some(&'?') {
        let mut j = i + 1;
        while j + 1 < chars.len() {
            if chars[j] == '?' && chars[j + 1] == '>' {
                return Some(j + 2);
            }
            j += 1;
        }
        return None;
    }

    // CDATA: <![CDATA[...]]>
    if chars[i..].starts_with(&['!', '[', 'C', 'D', 'A', 'T', 'A', '[']) {
        let mut j = i + 8;
        while j + 2 < chars.len() {
            if chars[j] == ']' && chars[j + 1] == ']' && chars[j + 2] == '>' {
                return Some(j + 3);
            }
            j += 1;
        }
        return None;
    }

    // Declaration: <!LETTER ... >
    if chars.get(i) == Some(&'!') {
        if !chars.get(i + 1).is_some_and(|ch| ch.is_ascii_alphabetic()) {
            return None;
        }
        let mut j = i + 2;
        while j < chars.len() {
            if chars[j] == '>' {
                return Some(j + 1);
            }
            j += 1;
        }
        return None;
    }

    // Closing tag: </name whitespace* >
    if chars.get(i) == Some(&'/') {
        let mut j = i + 1;
        if !chars.get(j).is_some_and(|ch| ch.is_ascii_alphabetic()) {
            return None;
        }
        j += 1;
        while chars
            .get(j)
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        {
            j += 1;
        }
        while matches!(chars.get(j), Some(' ' | '\t' | '\n')) {
            j += 1;
        }
        return if chars.get(j) == Some(&'>') {
            Some(j + 1)
        } else {
            None
        };
    }

    // Open tag: <name (attribute)* whitespace* /? >
    let mut j = i;
    if !chars.get(j).is_some_and(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    j += 1;
    while chars
        .get(j)
        .is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
    {
        j += 1;
    }

    loop {
        let before_ws = j;
        while matches!(chars.get(j), Some(' ' | '\t' | '\n')) {
            j += 1;
        }
        match chars.get(j) {
            Some('>') => return Some(j + 1),
            Some('/') if chars.get(j + 1) == Some(&'>') => return Some(j + 2),
            Some(ch) if (ch.is_ascii_alphabetic() || *ch == '_' || *ch == ':') && j > before_ws => {
                // Attribute name
                j += 1;
                while chars.get(j).is_some_and(|ch| {
                    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | ':' | '-')
                }) {
                    j += 1;
                }
                // Optional value
                let mut k = j;
                while matches!(chars.get(k), Some(' ' | '\t' | '\n')) {
                    k += 1;
                }
                if chars.get(k) == Some(&'=') {
                    k += 1;
                    while matches!(chars.get(k), Some(' ' | '\t' | '\n')) {
                        k += 1;
                    }
                    match chars.get(k) {
                        Some('"') => {
                            k += 1;
                            while k < chars.len() && chars[k] != '"' {
                                k += 1;
                            }
                            if k >= chars.len() {
                                return None;
                            }
                            j = k + 1;
                        }
                        Some('\'') => {
                            k += 1;
                            while k < chars.len() && chars[k] != '\'' {
                                k += 1;
                            }
                            if k >= chars.len() {
                                return None;
                            }
                            j = k + 1;
                        }
                        Some(ch)
                            if !matches!(
                                ch,
                                ' ' | '\t' | '\n' | '"' | '\'' | '=' | '<' | '>' | '`'
                            ) =>
                        {
                            k += 1;
                            while chars.get(k).is_some_and(|ch| {
                                !matches!(
                                    ch,
                                    ' ' | '\t' | '\n' | '"' | '\'' | '=' | '<' | '>' | '`'
                                )
                            }) {
                                k += 1;
                            }
                            j = k;
                        }
                        _ => return None,
                    }
                }
            }
            _ => return None,
        }
    }
}
