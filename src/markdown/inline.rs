/// The inline phase: per leaf block, re-tokenize the raw text at the inline
/// grain and run the delimiter-stack algorithm.
///
/// Emitted inline nodes live in an index-addressed vector; delimiter runs
/// are tracked in a parallel list linked by prev/next indices so removal and
/// splicing stay O(1) even on adversarial runs of delimiters. Every
/// construct that fails its grammar degrades to literal text.
use crate::ast::{BreakKind, Node};

use super::autolink;
use super::entities;
use super::html;
use super::refs::{self, ReferenceTable};
use super::util::is_ascii_punctuation;
use super::util::is_unicode_punctuation;

/// Parse one leaf block's raw text into inline nodes.
pub(crate) fn parse_inline(raw: &str, refs: &ReferenceTable) -> Vec<Node> {
    let mut parser = InlineParser::new(raw, refs);
    parser.scan();
    parser.process_emphasis(0);
    cleanup(parser.nodes)
}

/// One delimiter run. `prev`/`next` link active entries; `orig` keeps the
/// original run length for the multiple-of-3 rule after partial use.
#[derive(Debug)]
struct Delim {
    node: usize,
    marker: char,
    count: usize,
    orig: usize,
    can_open: bool,
    can_close: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Bracket {
    node: usize,
    image: bool,
    active: bool,
    /// Delimiter-list length when the bracket opened; emphasis inside the
    /// bracket is processed against this stack bottom.
    delim_bottom: usize,
    /// Character index where the raw label text starts.
    text_start: usize,
}

struct InlineParser<'a> {
    chars: Vec<char>,
    refs: &'a ReferenceTable,
    nodes: Vec<Node>,
    delims: Vec<Delim>,
    head: Option<usize>,
    tail: Option<usize>,
    brackets: Vec<Bracket>,
}

impl<'a> InlineParser<'a> {
    fn new(raw: &str, refs: &'a ReferenceTable) -> Self {
        InlineParser {
            chars: raw.chars().collect(),
            refs,
            nodes: Vec::new(),
            delims: Vec::new(),
            head: None,
            tail: None,
            brackets: Vec::new(),
        }
    }

    fn flush_text(&mut self, start: usize, end: usize) {
        if start < end {
            let text: String = self.chars[start..end].iter().collect();
            self.nodes.push(Node::Text(text));
        }
    }

    fn scan(&mut self) {
        let len = self.chars.len();
        let mut i = 0;
        let mut text_start = 0;

        while i < len {
            match self.chars[i] {
                '\\' => {
                    if i + 1 < len && self.chars[i + 1] == '\n' {
                        self.flush_text(text_start, i);
                        self.nodes.push(Node::LineBreak(BreakKind::Hard));
                        i += 2;
                        text_start = i;
                    } else if i + 1 < len && is_ascii_punctuation(self.chars[i + 1]) {
                        self.flush_text(text_start, i);
                        self.nodes.push(Node::Text(self.chars[i + 1].to_string()));
                        i += 2;
                        text_start = i;
                    } else {
                        i += 1;
                    }
                }
                '`' => {
                    self.flush_text(text_start, i);
                    i = self.scan_code_span(i);
                    text_start = i;
                }
                '<' => {
                    if let Some((node, next)) =
                        autolink::try_parse_angle_autolink(&self.chars, i)
                    {
                        self.flush_text(text_start, i);
                        self.nodes.push(node);
                        i = next;
                        text_start = i;
                    } else if let Some(end) = html::scan_inline_html(&self.chars, i) {
                        self.flush_text(text_start, i);
                        let raw: String = self.chars[i..end].iter().collect();
                        self.nodes.push(Node::HtmlInline(raw));
                        i = end;
                        text_start = i;
                    } else {
                        i += 1;
                    }
                }
                '&' => {
                    if let Some((decoded, next)) = entities::try_parse_entity(&self.chars, i) {
                        self.flush_text(text_start, i);
                        self.nodes.push(Node::Text(decoded));
                        i = next;
                        text_start = i;
                    } else {
                        i += 1;
                    }
                }
                '\n' => {
                    // Two or more trailing spaces make the break hard; the
                    // spaces themselves are discarded either way.
                    let mut text_end = i;
                    while text_end > text_start && self.chars[text_end - 1] == ' ' {
                        text_end -= 1;
                    }
                    let hard = i - text_end >= 2;
                    self.flush_text(text_start, text_end);
                    self.nodes.push(Node::LineBreak(if hard {
                        BreakKind::Hard
                    } else {
                        BreakKind::Soft
                    }));
                    i += 1;
                    text_start = i;
                }
                '!' if i + 1 < len && self.chars[i + 1] == '[' => {
                    self.flush_text(text_start, i);
                    let node = self.nodes.len();
                    self.nodes.push(Node::Text("![".to_string()));
                    self.brackets.push(Bracket {
                        node,
                        image: true,
                        active: true,
                        delim_bottom: self.delims.len(),
                        text_start: i + 2,
                    });
                    i += 2;
                    text_start = i;
                }
                '[' => {
                    self.flush_text(text_start, i);
                    let node = self.nodes.len();
                    self.nodes.push(Node::Text("[".to_string()));
                    self.brackets.push(Bracket {
                        node,
                        image: false,
                        active: true,
                        delim_bottom: self.delims.len(),
                        text_start: i + 1,
                    });
                    i += 1;
                    text_start = i;
                }
                ']' => {
                    self.flush_text(text_start, i);
                    i = self.close_bracket(i);
                    text_start = i;
                }
                '*' | '_' => {
                    self.flush_text(text_start, i);
                    i = self.scan_delimiter_run(i);
                    text_start = i;
                }
                '~' => {
                    let mut run_end = i;
                    while run_end < len && self.chars[run_end] == '~' {
                        run_end += 1;
                    }
                    // Only a pair of tildes joins the delimiter alphabet.
                    if run_end - i == 2 {
                        self.flush_text(text_start, i);
                        self.scan_tilde_pair(i);
                        text_start = run_end;
                    }
                    i = run_end;
                }
                ch => {
                    if let Some(next) = self.try_extended_autolink(i, text_start, ch) {
                        i = next;
                        text_start = i;
                    } else {
                        i += 1;
                    }
                }
            }
        }
        self.flush_text(text_start, len);
    }

    /// GFM extended autolinks start at a word boundary.
    fn try_extended_autolink(&mut self, i: usize, text_start: usize, ch: char) -> Option<usize> {
        let at_boundary = i == 0
            || matches!(self.chars[i - 1], '*' | '_' | '~' | '(')
            || self.chars[i - 1].is_whitespace();
        if !at_boundary {
            return None;
        }
        let looks_like_url = matches!(ch, 'w' | 'h' | 'f');
        let may_be_email = ch.is_ascii_alphanumeric() && {
            let mut j = i;
            let mut seen_at = false;
            while j < self.chars.len() && !self.chars[j].is_whitespace() {
                if self.chars[j] == '@' {
                    seen_at = true;
                    break;
                }
                j += 1;
            }
            seen_at
        };
        if !looks_like_url && !may_be_email {
            return None;
        }

        let parsed = if looks_like_url {
            autolink::try_parse_bare_url(&self.chars, i)
                .or_else(|| autolink::try_parse_bare_email(&self.chars, i))
        } else {
            autolink::try_parse_bare_email(&self.chars, i)
        }?;

        self.flush_text(text_start, i);
        self.nodes.push(parsed.0);
        Some(parsed.1)
    }

    /// Code spans: a backtick run closed by an equal-length run. Internal
    /// line endings collapse to spaces; one leading-and-trailing space pair
    /// is stripped unless the content is all spaces.
    fn scan_code_span(&mut self, start: usize) -> usize {
        let len = self.chars.len();
        let mut i = start;
        let mut open_len = 0;
        while i < len && self.chars[i] == '`' {
            open_len += 1;
            i += 1;
        }
        let content_start = i;

        let mut j = i;
        while j < len {
            if self.chars[j] == '`' {
                let close_start = j;
                let mut close_len = 0;
                while j < len && self.chars[j] == '`' {
                    close_len += 1;
                    j += 1;
                }
                if close_len == open_len {
                    let mut content: String =
                        self.chars[content_start..close_start].iter().collect();
                    content = content.replace('\n', " ");
                    if content.len() >= 2
                        && content.starts_with(' ')
                        && content.ends_with(' ')
                        && !content.chars().all(|ch| ch == ' ')
                    {
                        content = content[1..content.len() - 1].to_string();
                    }
                    self.nodes.push(Node::CodeSpan(content));
                    return j;
                }
            } else {
                j += 1;
            }
        }

        // No matching closer: the opening run is literal text.
        self.nodes.push(Node::Text("`".repeat(open_len)));
        content_start
    }

    /// Star and underscore runs: classify flanking, emit the run as a text
    /// node, and register it on the delimiter list.
    fn scan_delimiter_run(&mut self, start: usize) -> usize {
        let len = self.chars.len();
        let marker = self.chars[start];
        let mut i = start;
        while i < len && self.chars[i] == marker {
            i += 1;
        }
        let count = i - start;

        let before = if start == 0 { ' ' } else { self.chars[start - 1] };
        let after = if i >= len { ' ' } else { self.chars[i] };
        let (left_flanking, right_flanking) = flanking(before, after);

        // Underscore may not open or close intraword.
        let (can_open, can_close) = if marker == '*' {
            (left_flanking, right_flanking)
        } else {
            (
                left_flanking && (!right_flanking || is_unicode_punctuation(before)),
                right_flanking && (!left_flanking || is_unicode_punctuation(after)),
            )
        };

        let node = self.nodes.len();
        self.nodes.push(Node::Text(marker.to_string().repeat(count)));
        if can_open || can_close {
            self.push_delim(Delim {
                node,
                marker,
                count,
                orig: count,
                can_open,
                can_close,
                prev: None,
                next: None,
            });
        }
        i
    }

    /// A `~~` pair follows the underscore flanking rules.
    fn scan_tilde_pair(&mut self, start: usize) {
        let before = if start == 0 { ' ' } else { self.chars[start - 1] };
        let after = if start + 2 >= self.chars.len() {
            ' '
        } else {
            self.chars[start + 2]
        };
        let (left_flanking, right_flanking) = flanking(before, after);
        let can_open = left_flanking && (!right_flanking || is_unicode_punctuation(before));
        let can_close = right_flanking && (!left_flanking || is_unicode_punctuation(after));

        let node = self.nodes.len();
        self.nodes.push(Node::Text("~~".to_string()));
        if can_open || can_close {
            self.push_delim(Delim {
                node,
                marker: '~',
                count: 2,
                orig: 2,
                can_open,
                can_close,
                prev: None,
                next: None,
            });
        }
    }

    // Delimiter-list plumbing: append, unlink, and drop-suffix, all O(1)
    // per entry via the prev/next indices.

    fn push_delim(&mut self, mut delim: Delim) {
        let idx = self.delims.len();
        delim.prev = self.tail;
        delim.next = None;
        if let Some(tail) = self.tail {
            self.delims[tail].next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.delims.push(delim);
    }

    fn remove_delim(&mut self, idx: usize) {
        let (prev, next) = (self.delims[idx].prev, self.delims[idx].next);
        match prev {
            Some(p) => self.delims[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.delims[n].prev = prev,
            None => self.tail = prev,
        }
        self.delims[idx].prev = None;
        self.delims[idx].next = None;
        self.delims[idx].count = 0;
    }

    /// Drop every delimiter registered at or after `bottom` (the entries
    /// inside a just-closed link's text).
    fn truncate_delims(&mut self, bottom: usize) {
        while let Some(tail) = self.tail {
            if tail < bottom {
                break;
            }
            self.remove_delim(tail);
        }
    }

    /// Close bracket handling. `i` is the index just past the `]`. Returns
    /// the index scanning resumes at.
    fn close_bracket(&mut self, close_idx: usize) -> usize {
        let i = close_idx + 1;
        let Some(bracket_pos) = self.brackets.len().checked_sub(1) else {
            self.nodes.push(Node::Text("]".to_string()));
            return i;
        };

        if !self.brackets[bracket_pos].active {
            self.brackets.pop();
            self.nodes.push(Node::Text("]".to_string()));
            return i;
        }

        let label_start = self.brackets[bracket_pos].text_start;
        let label_text: String = self.chars[label_start..close_idx].iter().collect();

        // Inline form first, then full/collapsed reference, then shortcut.
        // A well-formed `[label]` suffix whose lookup fails kills the whole
        // bracket; the shortcut form is only tried when no label follows.
        let resolved = if let Some(resolved) = self.try_inline_suffix(i) {
            Some(resolved)
        } else if let Some(label_end) = self.scan_suffix_label(i) {
            let label2: String = self.chars[i + 1..label_end].iter().collect();
            let lookup = if label2.trim().is_empty() {
                label_text.as_str()
            } else {
                label2.as_str()
            };
            self.refs
                .get(&refs::normalize_label(lookup))
                .map(|(url, title)| (url.clone(), title.clone(), label_end + 1))
        } else {
            self.try_shortcut(i, &label_text)
        };

        let Some((url, title, consumed)) = resolved else {
            self.brackets.pop();
            self.nodes.push(Node::Text("]".to_string()));
            return i;
        };

        let bracket = self.brackets.pop().expect("bracket checked above");
        self.process_emphasis(bracket.delim_bottom);
        let children: Vec<Node> = self.nodes.split_off(bracket.node + 1);
        if bracket.image {
            let mut alt = String::new();
            flatten_text(&children, &mut alt);
            self.nodes[bracket.node] = Node::Image { url, alt, title };
        } else {
            self.nodes[bracket.node] = Node::Link {
                url,
                title,
                children,
            };
            // Links cannot nest: any enclosing link bracket goes inert.
            for earlier in &mut self.brackets {
                if !earlier.image {
                    earlier.active = false;
                }
            }
        }
        self.truncate_delims(bracket.delim_bottom);
        consumed
    }

    /// `(destination "title")` directly after the `]`.
    fn try_inline_suffix(&self, i: usize) -> Option<(String, Option<String>, usize)> {
        if self.chars.get(i) != Some(&'(') {
            return None;
        }
        let mut j = i + 1;
        while matches!(self.chars.get(j), Some(' ' | '\t' | '\n')) {
            j += 1;
        }

        let (url, mut j) = if self.chars.get(j) == Some(&')') {
            (String::new(), j)
        } else {
            refs::parse_destination(&self.chars, j)?
        };

        let mut saw_whitespace = false;
        while matches!(self.chars.get(j), Some(' ' | '\t' | '\n')) {
            saw_whitespace = true;
            j += 1;
        }

        let title = if saw_whitespace && matches!(self.chars.get(j), Some('"' | '\'' | '(')) {
            let (title, after) = refs::parse_title(&self.chars, j)?;
            j = after;
            while matches!(self.chars.get(j), Some(' ' | '\t' | '\n')) {
                j += 1;
            }
            Some(title)
        } else {
            None
        };

        if self.chars.get(j) == Some(&')') {
            Some((url, title, j + 1))
        } else {
            None
        }
    }

    /// If a well-formed `[label]` suffix starts at `i`, return the index of
    /// its closing bracket. Labels may not contain unescaped brackets.
    fn scan_suffix_label(&self, i: usize) -> Option<usize> {
        if self.chars.get(i) != Some(&'[') {
            return None;
        }
        let mut j = i + 1;
        while j < self.chars.len() && j - i <= 999 {
            match self.chars[j] {
                ']' => return Some(j),
                '[' => return None,
                '\\' if j + 1 < self.chars.len() => j += 2,
                _ => j += 1,
            }
        }
        None
    }

    /// Bare `[label]` with no suffix.
    fn try_shortcut(&self, i: usize, label_text: &str) -> Option<(String, Option<String>, usize)> {
        if label_text.trim().is_empty() {
            return None;
        }
        let key = refs::normalize_label(label_text);
        let (url, title) = self.refs.get(&key)?;
        Some((url.clone(), title.clone(), i))
    }

    /// The delimiter-matching pass. Scans closers left to right from the
    /// given stack bottom; for each, the nearest compatible opener wins,
    /// pairs are consumed greedily as strong before single emphasis, and
    /// anything left over stays literal text.
    fn process_emphasis(&mut self, bottom: usize) {
        let mut closer = self.head;
        while let Some(c) = closer {
            if c < bottom {
                closer = self.delims[c].next;
                continue;
            }
            if !self.delims[c].can_close || self.delims[c].count == 0 {
                closer = self.delims[c].next;
                continue;
            }

            // Walk backward for the nearest still-open compatible opener.
            let mut found = None;
            let mut opener = self.delims[c].prev;
            while let Some(o) = opener {
                if o < bottom {
                    break;
                }
                let od = &self.delims[o];
                if od.marker == self.delims[c].marker && od.can_open && od.count > 0 {
                    let blocked = self.delims[c].marker != '~'
                        && (od.can_close || self.delims[c].can_open)
                        && (od.orig + self.delims[c].orig) % 3 == 0
                        && !(od.orig % 3 == 0 && self.delims[c].orig % 3 == 0);
                    if !blocked {
                        found = Some(o);
                        break;
                    }
                }
                opener = od.prev;
            }

            match found {
                Some(o) => {
                    let next_after_close = self.delims[c].next;
                    let closer_emptied = self.match_delimiters(o, c);
                    if closer_emptied {
                        closer = next_after_close;
                    }
                    // Otherwise stay on the same closer; it may pair again.
                }
                None => {
                    let next = self.delims[c].next;
                    if !self.delims[c].can_open {
                        // Can never participate again; drop it so later
                        // closers skip past in O(1).
                        self.remove_delim(c);
                    }
                    closer = next;
                }
            }
        }
    }

    /// Pair an opener and closer: wrap the nodes between them, consume the
    /// used delimiter characters, and unlink everything in between. Returns
    /// true when the closer was fully consumed.
    fn match_delimiters(&mut self, o: usize, c: usize) -> bool {
        let marker = self.delims[c].marker;
        let use_count = if marker == '~' {
            2
        } else if self.delims[o].count >= 2 && self.delims[c].count >= 2 {
            2
        } else {
            1
        };

        let o_node = self.delims[o].node;
        let c_node = self.delims[c].node;
        let content: Vec<Node> = self.nodes.drain(o_node + 1..c_node).collect();
        let removed = content.len();
        let wrapper = match (marker, use_count) {
            ('~', _) => Node::Strike(content),
            (_, 2) => Node::Strong(content),
            _ => Node::Emphasis(content),
        };
        self.nodes.insert(o_node + 1, wrapper);
        let shift = 1isize - removed as isize;

        // Unlink delimiters between the pair; they are inert now.
        let mut cur = self.delims[o].next;
        while let Some(idx) = cur {
            if idx == c {
                break;
            }
            let next = self.delims[idx].next;
            self.remove_delim(idx);
            cur = next;
        }

        // Re-anchor node indices at and after the closer.
        let mut cur = Some(c);
        while let Some(idx) = cur {
            self.delims[idx].node = (self.delims[idx].node as isize + shift) as usize;
            cur = self.delims[idx].next;
        }
        for bracket in &mut self.brackets {
            if bracket.node >= c_node {
                bracket.node = (bracket.node as isize + shift) as usize;
            }
        }

        self.delims[o].count -= use_count;
        self.delims[c].count -= use_count;
        let o_count = self.delims[o].count;
        let c_count = self.delims[c].count;
        self.nodes[o_node] = Node::Text(marker.to_string().repeat(o_count));
        let c_node_now = self.delims[c].node;
        self.nodes[c_node_now] = Node::Text(marker.to_string().repeat(c_count));

        if o_count == 0 {
            self.remove_delim(o);
        }
        if c_count == 0 {
            self.remove_delim(c);
            true
        } else {
            false
        }
    }
}

/// Left/right flanking classification from the characters adjacent to a run.
fn flanking(before: char, after: char) -> (bool, bool) {
    let left = !after.is_whitespace()
        && (!is_unicode_punctuation(after)
            || before.is_whitespace()
            || is_unicode_punctuation(before));
    let right = !before.is_whitespace()
        && (!is_unicode_punctuation(before)
            || after.is_whitespace()
            || is_unicode_punctuation(after));
    (left, right)
}

/// Flatten inline content to the plain text used for image alt text.
pub(crate) fn flatten_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::CodeSpan(code) => out.push_str(code),
            Node::Autolink { text, .. } => out.push_str(text),
            Node::Image { alt, .. } => out.push_str(alt),
            Node::LineBreak(_) => out.push(' '),
            other => {
                if let Some(children) = other.children() {
                    flatten_text(children, out);
                }
            }
        }
    }
}

/// Merge adjacent text nodes and drop empty ones, recursively. Delimiter
/// processing leaves both behind by design.
fn cleanup(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        if let Some(children) = node.children_mut() {
            let cleaned = cleanup(std::mem::take(children));
            *children = cleaned;
        }
        match node {
            Node::Text(text) if text.is_empty() => {}
            Node::Text(text) => {
                if let Some(Node::Text(last)) = out.last_mut() {
                    last.push_str(&text);
                } else {
                    out.push(Node::Text(text));
                }
            }
            other => out.push(other),
        }
    }
    out
}
