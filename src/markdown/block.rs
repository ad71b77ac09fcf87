/// The block phase: a per-line state machine over a stack of open
/// containers. Each line first re-matches the open containers top-down,
/// then either extends the open leaf, lazily continues a paragraph, or
/// closes unmatched blocks and opens new ones in CommonMark precedence
/// order. Leaf blocks keep their raw inline text (as a single `Text`
/// child) for the inline phase to rewrite.
use crate::ast::{Alignment, Node};

use super::html::{self, HtmlBlockEnd};
use super::refs;
use super::table;
use super::util::resolve_escapes_and_entities;

/// A source line with tab-aware column tracking. Consuming part of a tab
/// leaves the remaining columns in `partial`, which later reads expand to
/// spaces.
#[derive(Clone, Debug)]
struct Line<'a> {
    raw: &'a str,
    byte: usize,
    col: usize,
    partial: usize,
}

impl<'a> Line<'a> {
    fn new(raw: &'a str) -> Self {
        Line {
            raw,
            byte: 0,
            col: 0,
            partial: 0,
        }
    }

    fn remainder(&self) -> &'a str {
        &self.raw[self.byte.min(self.raw.len())..]
    }

    /// Remainder with any pending partial-tab columns expanded to spaces.
    fn remainder_with_partial(&self) -> String {
        let mut out = String::with_capacity(self.partial + self.remainder().len());
        for _ in 0..self.partial {
            out.push(' ');
        }
        out.push_str(self.remainder());
        out
    }

    /// Column and byte offset of the first non-space character, plus the
    /// character itself (None on a blank rest).
    fn peek_nonspace(&self) -> (usize, usize, Option<u8>) {
        let bytes = self.raw.as_bytes();
        let mut col = self.col + self.partial;
        let mut off = self.byte;
        while off < bytes.len() {
            match bytes[off] {
                b' ' => {
                    col += 1;
                    off += 1;
                }
                b'\t' => {
                    col += 4 - (col % 4);
                    off += 1;
                }
                b => return (col, off, Some(b)),
            }
        }
        (col, off, None)
    }

    fn indent(&self) -> usize {
        let (col, _, _) = self.peek_nonspace();
        col - self.col
    }

    fn is_blank(&self) -> bool {
        let (_, _, byte) = self.peek_nonspace();
        byte.is_none()
    }

    /// The line content from the first non-space character on.
    fn rest(&self) -> &'a str {
        let (_, off, _) = self.peek_nonspace();
        &self.raw[off..]
    }

    fn advance_to_nonspace(&mut self) {
        self.partial = 0;
        let (col, off, _) = self.peek_nonspace();
        self.col = col;
        self.byte = off;
    }

    /// Consume up to `max` columns of indentation, splitting tabs as
    /// needed. Returns the columns consumed.
    fn skip_indent(&mut self, max: usize) -> usize {
        let bytes = self.raw.as_bytes();
        let mut taken = 0;
        if self.partial > 0 {
            let consume = self.partial.min(max);
            self.partial -= consume;
            self.col += consume;
            taken += consume;
        }
        while taken < max && self.byte < bytes.len() {
            match bytes[self.byte] {
                b' ' => {
                    self.byte += 1;
                    self.col += 1;
                    taken += 1;
                }
                b'\t' => {
                    let width = 4 - (self.col % 4);
                    self.byte += 1;
                    if taken + width > max {
                        let consume = max - taken;
                        self.partial = width - consume;
                        self.col += consume;
                        taken = max;
                    } else {
                        self.col += width;
                        taken += width;
                    }
                }
                _ => break,
            }
        }
        taken
    }

    /// Consume `n` columns of anything (used to step over list markers).
    fn advance_columns(&mut self, n: usize) {
        let bytes = self.raw.as_bytes();
        let mut taken = 0;
        while taken < n && self.byte < bytes.len() {
            match bytes[self.byte] {
                b'\t' => {
                    let width = 4 - (self.col % 4);
                    self.byte += 1;
                    self.col += width;
                    taken += width;
                }
                _ => {
                    self.byte += 1;
                    self.col += 1;
                    taken += 1;
                }
            }
        }
    }

    /// Consume a `>` blockquote marker plus at most one following space
    /// column. The caller has verified the marker is present.
    fn consume_blockquote_marker(&mut self) {
        self.advance_to_nonspace();
        self.byte += 1;
        self.col += 1;
        let bytes = self.raw.as_bytes();
        if self.byte < bytes.len() {
            match bytes[self.byte] {
                b' ' => {
                    self.byte += 1;
                    self.col += 1;
                }
                b'\t' => {
                    let width = 4 - (self.col % 4);
                    self.byte += 1;
                    self.col += 1;
                    if width > 1 {
                        self.partial = width - 1;
                    }
                }
                _ => {}
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ListKind {
    Bullet(char),
    Ordered(char),
}

#[derive(Clone, Debug)]
pub(crate) struct ListMarker {
    pub kind: ListKind,
    pub start: u32,
    pub width: usize,
}

#[derive(Clone, Debug)]
enum OpenKind {
    Document,
    BlockQuote,
    ListItem {
        content_col: usize,
        started_blank: bool,
    },
    FencedCode {
        fence_char: char,
        fence_len: usize,
        fence_indent: usize,
        language: Option<String>,
    },
    IndentedCode,
    HtmlBlock {
        end: HtmlBlockEnd,
    },
    Paragraph,
    Table {
        alignments: Vec<Alignment>,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

struct OpenBlock {
    kind: OpenKind,
    content: String,
    children: Vec<Node>,
    had_blank_in_item: bool,
    list_has_blank_between: bool,
    list_kind: Option<ListKind>,
    list_start: u32,
}

impl OpenBlock {
    fn new(kind: OpenKind) -> Self {
        OpenBlock {
            kind,
            content: String::new(),
            children: Vec::new(),
            had_blank_in_item: false,
            list_has_blank_between: false,
            list_kind: None,
            list_start: 1,
        }
    }
}

/// The container-stack machine. Fed one line at a time; `finish` closes
/// everything still open and yields the document's children.
pub(crate) struct BlockParser {
    open: Vec<OpenBlock>,
}

impl Default for BlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockParser {
    pub fn new() -> Self {
        BlockParser {
            open: vec![OpenBlock::new(OpenKind::Document)],
        }
    }

    pub fn finish(&mut self) -> Vec<Node> {
        while self.open.len() > 1 {
            self.close_top_block();
        }
        let document = self.open.pop().expect("document block");
        self.open.push(OpenBlock::new(OpenKind::Document));
        document.children
    }

    pub fn process_line(&mut self, raw: &str) {
        log::trace!("block line {:?}", raw);
        let mut line = Line::new(raw);
        let num_open = self.open.len();

        // Phase 1: re-match open containers top-down, consuming their
        // prefixes. Stop at the first failure.
        let mut matched = 1;
        let mut all_matched = true;
        for i in 1..num_open {
            match self.open[i].kind {
                OpenKind::BlockQuote => {
                    let (ns_col, _, ns_byte) = line.peek_nonspace();
                    if ns_col - line.col <= 3 && ns_byte == Some(b'>') {
                        line.consume_blockquote_marker();
                        matched = i + 1;
                    } else {
                        all_matched = false;
                        break;
                    }
                }
                OpenKind::ListItem {
                    content_col,
                    started_blank,
                } => {
                    let (ns_col, _, ns_byte) = line.peek_nonspace();
                    let indent = ns_col - line.col;
                    if ns_byte.is_none() {
                        // An item that began with a blank line tolerates no
                        // second blank before any content arrives.
                        if started_blank
                            && self.open[i].children.is_empty()
                            && self.open[i].content.is_empty()
                            && !self.has_open_leaf_after(i)
                        {
                            all_matched = false;
                            break;
                        }
                        line.skip_indent(content_col);
                        matched = i + 1;
                    } else if indent >= content_col {
                        line.skip_indent(content_col);
                        matched = i + 1;
                    } else {
                        all_matched = false;
                        break;
                    }
                }
                OpenKind::Document => {
                    matched = i + 1;
                }
                _ => {
                    // Open leaf at the tip; its continuation is handled
                    // below.
                    all_matched = false;
                    break;
                }
            }
        }
        if all_matched {
            matched = num_open;
        }

        let tip = num_open - 1;
        let tip_is_leaf = matches!(
            self.open[tip].kind,
            OpenKind::FencedCode { .. }
                | OpenKind::IndentedCode
                | OpenKind::HtmlBlock { .. }
                | OpenKind::Paragraph
                | OpenKind::Table { .. }
        );

        // Phase 2: the open leaf accepts or rejects the line.
        if tip_is_leaf && matched >= num_open - 1 {
            match self.open[tip].kind {
                OpenKind::FencedCode {
                    fence_char,
                    fence_len,
                    fence_indent,
                    ..
                } => {
                    if is_closing_fence(line.rest(), fence_char, fence_len)
                        && line.indent() <= 3
                    {
                        self.close_top_block();
                        return;
                    }
                    line.skip_indent(fence_indent);
                    let content = line.remainder_with_partial();
                    self.open[tip].content.push_str(&content);
                    self.open[tip].content.push('\n');
                    return;
                }
                OpenKind::IndentedCode => {
                    if line.is_blank() {
                        line.skip_indent(4);
                        self.open[tip].content.push_str(&line.remainder_with_partial());
                        self.open[tip].content.push('\n');
                        self.mark_blank_on_list_items();
                        return;
                    }
                    if line.indent() >= 4 {
                        line.skip_indent(4);
                        self.open[tip].content.push_str(&line.remainder_with_partial());
                        self.open[tip].content.push('\n');
                        return;
                    }
                    self.close_top_block();
                    self.open_new_blocks(line);
                    return;
                }
                OpenKind::HtmlBlock { end } => {
                    if end == HtmlBlockEnd::BlankLine && line.is_blank() {
                        self.close_top_block();
                        self.mark_blank_on_list_items();
                        return;
                    }
                    let rest = line.remainder();
                    if !self.open[tip].content.is_empty() {
                        self.open[tip].content.push('\n');
                    }
                    self.open[tip].content.push_str(rest);
                    if html::html_block_ends(end, rest) {
                        self.close_top_block();
                    }
                    return;
                }
                OpenKind::Table { .. } => {
                    if line.is_blank() {
                        self.close_top_block();
                        self.mark_blank_on_list_items();
                        return;
                    }
                    let rest = line.rest();
                    if line.indent() <= 3 && starts_new_block(rest) {
                        self.close_top_block();
                        self.open_new_blocks(line);
                        return;
                    }
                    if let OpenKind::Table {
                        ref alignments,
                        ref mut rows,
                        ..
                    } = self.open[tip].kind
                    {
                        let width = alignments.len();
                        rows.push(table::conform_row(table::split_row(rest), width));
                    }
                    return;
                }
                OpenKind::Paragraph => {
                    if self.continue_paragraph(&mut line, tip) {
                        return;
                    }
                    // The line closed the paragraph and was not consumed.
                    while self.open.len() > matched.min(self.open.len() - 1) {
                        self.close_top_block();
                    }
                    self.open_new_blocks(line);
                    return;
                }
                _ => {}
            }
        }

        // Lazy continuation: a line that failed a container prefix can
        // still extend an open paragraph, as long as it could not start a
        // block of its own.
        if !all_matched
            && !line.is_blank()
            && matches!(self.open[self.open.len() - 1].kind, OpenKind::Paragraph)
        {
            let rest = line.rest();
            let indent = line.indent();
            // A list marker ends laziness when an unmatched list item is on
            // the stack (it starts a sibling item), or when it could
            // interrupt a paragraph outright.
            let marker_blocks = indent <= 3
                && parse_list_marker(rest).is_some_and(|m| {
                    let unmatched_item = self.open[matched..]
                        .iter()
                        .any(|block| matches!(block.kind, OpenKind::ListItem { .. }));
                    unmatched_item || marker_can_interrupt_paragraph(&m, rest)
                });
            let starts_block = marker_blocks
                || (indent <= 3
                    && (rest.starts_with('>')
                        || is_thematic_break(rest)
                        || parse_atx_heading(rest).is_some()
                        || parse_fence_start(rest).is_some()
                        || html::html_block_start(rest, true).is_some()));
            if !starts_block {
                let tip = self.open.len() - 1;
                line.advance_to_nonspace();
                self.open[tip].content.push('\n');
                self.open[tip].content.push_str(line.remainder());
                return;
            }
        }

        // Phase 3: close what failed to match, then open new blocks.
        while self.open.len() > matched {
            self.close_top_block();
        }
        self.open_new_blocks(line);
    }

    /// Paragraph continuation: setext underlines, interrupting blocks, and
    /// the table separator are all decided against the open paragraph.
    /// Returns true when the line was consumed.
    fn continue_paragraph(&mut self, line: &mut Line<'_>, tip: usize) -> bool {
        if line.is_blank() {
            self.close_top_block();
            self.mark_blank_on_list_items();
            return true;
        }

        let indent = line.indent();
        let rest = line.rest();

        // GFM table: a one-line paragraph followed by a matching delimiter
        // row becomes a table header.
        if !self.open[tip].content.contains('\n')
            && let Some(alignments) = table::parse_table_separator(rest)
        {
            let header = table::split_row(&self.open[tip].content);
            if header.len() == alignments.len() {
                self.open.pop();
                self.open.push(OpenBlock::new(OpenKind::Table {
                    alignments,
                    header,
                    rows: Vec::new(),
                }));
                return true;
            }
        }

        if indent <= 3 {
            // Setext heading underline.
            if let Some(level) = parse_setext_underline(rest) {
                let paragraph = self.open.pop().expect("open paragraph");
                let (defs, remaining) = refs::extract_reference_definitions(&paragraph.content);
                let parent = self.open.last_mut().expect("parent block");
                for def in defs {
                    parent.children.push(def.into_node());
                }
                if remaining.is_empty() {
                    // Nothing left to head; reprocess the underline as a
                    // fresh line (it may be a thematic break or paragraph).
                    self.open_new_blocks(line.clone());
                    return true;
                }
                parent.children.push(Node::Heading {
                    level,
                    children: vec![Node::Text(remaining)],
                });
                return true;
            }

            if is_thematic_break(rest)
                || parse_atx_heading(rest).is_some()
                || parse_fence_start(rest).is_some()
                || html::html_block_start(rest, true).is_some()
                || rest.starts_with('>')
                || parse_list_marker(rest)
                    .is_some_and(|m| marker_can_interrupt_paragraph(&m, rest))
            {
                return false;
            }
        } else {
            // Indented lines never interrupt a paragraph.
        }

        line.advance_to_nonspace();
        let tip = self.open.len() - 1;
        self.open[tip].content.push('\n');
        self.open[tip].content.push_str(line.remainder());
        true
    }

    /// Phase 3: open as many new containers as the line starts, ending with
    /// at most one new leaf.
    fn open_new_blocks(&mut self, mut line: Line<'_>) {
        loop {
            let (ns_col, _, ns_byte) = line.peek_nonspace();
            let indent = ns_col - line.col;

            let Some(first) = ns_byte else {
                // Blank line: record it for tight/loose decisions.
                self.mark_blank_on_list_items_or_between();
                return;
            };

            if indent <= 3 && first == b'>' {
                line.consume_blockquote_marker();
                self.open.push(OpenBlock::new(OpenKind::BlockQuote));
                continue;
            }

            if indent <= 3 {
                let rest = line.rest();

                if let Some((level, text)) = parse_atx_heading(rest) {
                    let parent = self.open.last_mut().expect("open block");
                    parent.children.push(Node::Heading {
                        level,
                        children: vec![Node::Text(text)],
                    });
                    return;
                }

                if let Some((fence_char, fence_len, language)) = parse_fence_start(rest) {
                    self.open.push(OpenBlock::new(OpenKind::FencedCode {
                        fence_char,
                        fence_len,
                        fence_indent: indent,
                        language,
                    }));
                    return;
                }

                if let Some(end) = html::html_block_start(rest, false) {
                    let mut block = OpenBlock::new(OpenKind::HtmlBlock { end });
                    line.advance_to_nonspace();
                    block.content.push_str(line.remainder());
                    if html::html_block_ends(end, line.remainder()) {
                        let content = block.content;
                        let parent = self.open.last_mut().expect("open block");
                        parent.children.push(Node::HtmlBlock(content + "\n"));
                    } else {
                        self.open.push(block);
                    }
                    return;
                }

                if is_thematic_break(rest) {
                    let parent = self.open.last_mut().expect("open block");
                    parent.children.push(Node::ThematicBreak);
                    return;
                }

                if let Some(marker) = parse_list_marker(rest) {
                    line.advance_to_nonspace();
                    if self.start_list_item(&mut line, marker, indent) {
                        return;
                    }
                    continue;
                }
            } else {
                // Four or more columns: indented code, unless a paragraph
                // is open (indented code cannot interrupt one; that case
                // was consumed as a continuation line before we got here).
                line.skip_indent(4);
                let mut block = OpenBlock::new(OpenKind::IndentedCode);
                block.content.push_str(&line.remainder_with_partial());
                block.content.push('\n');
                self.open.push(block);
                return;
            }

            line.advance_to_nonspace();
            let mut block = OpenBlock::new(OpenKind::Paragraph);
            block.content.push_str(line.remainder());
            self.open.push(block);
            return;
        }
    }

    /// Open a list item container. Returns true when the rest of the line
    /// is blank (nothing further to open).
    fn start_list_item(&mut self, line: &mut Line<'_>, marker: ListMarker, marker_indent: usize) -> bool {
        line.advance_columns(marker.width);
        let (ns_col, _, ns_byte) = line.peek_nonspace();
        let rest_blank = ns_byte.is_none();

        // Spacing after the marker: one column when the rest is blank or
        // the gap is five or more (the excess becomes literal indentation
        // inside the item), otherwise the actual gap.
        let gap = ns_col - line.col;
        let spacing = if rest_blank || gap == 0 || gap >= 5 { 1 } else { gap };
        let content_col = marker_indent + marker.width + spacing;
        if !rest_blank {
            line.skip_indent(spacing);
        }

        let mut item = OpenBlock::new(OpenKind::ListItem {
            content_col,
            started_blank: rest_blank,
        });
        item.list_kind = Some(marker.kind);
        item.list_start = marker.start;
        self.open.push(item);
        rest_blank
    }

    fn has_open_leaf_after(&self, i: usize) -> bool {
        self.open[i + 1..].iter().any(|block| {
            matches!(
                block.kind,
                OpenKind::Paragraph
                    | OpenKind::FencedCode { .. }
                    | OpenKind::IndentedCode
                    | OpenKind::HtmlBlock { .. }
                    | OpenKind::Table { .. }
            )
        })
    }

    /// A blank line inside an item marks it for the loose-list decision.
    fn mark_blank_on_list_items(&mut self) {
        for i in (1..self.open.len()).rev() {
            match self.open[i].kind {
                OpenKind::ListItem { .. } => {
                    self.open[i].had_blank_in_item = true;
                    return;
                }
                OpenKind::BlockQuote => return,
                _ => {}
            }
        }
    }

    /// Blank line with no open item: if the parent's last child is a list,
    /// a following compatible item makes that list loose.
    fn mark_blank_on_list_items_or_between(&mut self) {
        for i in (1..self.open.len()).rev() {
            match self.open[i].kind {
                OpenKind::ListItem { .. } => {
                    self.open[i].had_blank_in_item = true;
                    return;
                }
                OpenKind::BlockQuote => return,
                _ => {}
            }
        }
        let parent = self.open.last_mut().expect("open block");
        if matches!(parent.children.last(), Some(Node::List { .. })) {
            parent.list_has_blank_between = true;
        }
    }

    /// Pop the top block, finalize it, and attach the result to its parent.
    fn close_top_block(&mut self) {
        let block = self.open.pop().expect("non-document block");
        match block.kind {
            OpenKind::Document => unreachable!("document is never closed here"),
            OpenKind::BlockQuote => {
                let node = Node::BlockQuote(block.children);
                self.push_to_parent(node);
            }
            OpenKind::ListItem { .. } => {
                self.attach_list_item(block);
            }
            OpenKind::FencedCode { language, .. } => {
                let node = Node::CodeBlock {
                    language,
                    literal: block.content,
                };
                self.push_to_parent(node);
            }
            OpenKind::IndentedCode => {
                // Trailing blank lines do not belong to the block.
                let mut lines: Vec<&str> = block.content.split('\n').collect();
                if lines.last() == Some(&"") {
                    lines.pop();
                }
                while lines.last().is_some_and(|line| line.trim().is_empty()) {
                    lines.pop();
                }
                let node = Node::CodeBlock {
                    language: None,
                    literal: lines.join("\n") + "\n",
                };
                self.push_to_parent(node);
            }
            OpenKind::HtmlBlock { .. } => {
                let node = Node::HtmlBlock(block.content + "\n");
                self.push_to_parent(node);
            }
            OpenKind::Table {
                alignments,
                header,
                rows,
            } => {
                let node = build_table(alignments, header, rows);
                self.push_to_parent(node);
            }
            OpenKind::Paragraph => {
                let (defs, remaining) = refs::extract_reference_definitions(&block.content);
                for def in defs {
                    self.push_to_parent(def.into_node());
                }
                if !remaining.is_empty() {
                    self.push_to_parent(Node::Paragraph(vec![Node::Text(remaining)]));
                }
            }
        }
    }

    fn push_to_parent(&mut self, node: Node) {
        let parent = self.open.last_mut().expect("open block");
        parent.children.push(node);
    }

    /// List items merge into a trailing compatible list on the parent; the
    /// tight/loose decision happens as items arrive.
    fn attach_list_item(&mut self, block: OpenBlock) {
        let kind = block.list_kind.clone().expect("list item kind");
        let had_blank = block.had_blank_in_item;
        let item_children = block.children.len();
        let blank_between_children = had_blank && item_children >= 2;
        let item = Node::ListItem(block.children);

        let parent = self.open.last_mut().expect("open block");

        // A trailing blank inside this item that was not between its own
        // children belongs to the enclosing list.
        if had_blank
            && !blank_between_children
            && matches!(parent.kind, OpenKind::ListItem { .. })
        {
            parent.had_blank_in_item = true;
        }

        if let Some(Node::List {
            ordered: _,
            start: _,
            tight,
            children: items,
        }) = parent.children.last_mut()
            && parent
                .list_kind
                .as_ref()
                .is_some_and(|existing| *existing == kind)
        {
            if parent.list_has_blank_between || blank_between_children {
                *tight = false;
            }
            items.push(item);
            if had_blank {
                parent.list_has_blank_between = true;
            }
            return;
        }

        // A new list starts here.
        parent.list_has_blank_between = had_blank;
        parent.list_kind = Some(kind.clone());
        parent.children.push(Node::List {
            ordered: matches!(kind, ListKind::Ordered(_)),
            start: block.list_start,
            tight: !blank_between_children,
            children: vec![item],
        });
    }
}

fn build_table(alignments: Vec<Alignment>, header: Vec<String>, rows: Vec<Vec<String>>) -> Node {
    let header_cells: Vec<Node> = header
        .into_iter()
        .zip(alignments.iter())
        .map(|(raw, alignment)| Node::TableCell {
            alignment: *alignment,
            children: vec![Node::Text(raw)],
        })
        .collect();
    let body_rows: Vec<Node> = rows
        .into_iter()
        .map(|row| {
            Node::TableRow(
                row.into_iter()
                    .zip(alignments.iter())
                    .map(|(raw, alignment)| Node::TableCell {
                        alignment: *alignment,
                        children: vec![Node::Text(raw)],
                    })
                    .collect(),
            )
        })
        .collect();
    Node::Table(vec![
        Node::TableHeader(vec![Node::TableRow(header_cells)]),
        Node::TableContent(body_rows),
    ])
}

/// Does this line (at most 3 columns of indentation) open a block that can
/// break a table?
fn starts_new_block(rest: &str) -> bool {
    rest.starts_with('>')
        || is_thematic_break(rest)
        || parse_atx_heading(rest).is_some()
        || parse_fence_start(rest).is_some()
        || html::html_block_start(rest, true).is_some()
        || parse_list_marker(rest).is_some_and(|m| !rest[m.width..].trim().is_empty())
}

/// ATX heading: 1-6 `#` followed by space, tab, or end of line; an optional
/// closing hash run is stripped when preceded by whitespace.
pub(crate) fn parse_atx_heading(rest: &str) -> Option<(u8, String)> {
    let hashes = rest.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let after = &rest[hashes..];
    if !after.is_empty() && !after.starts_with(' ') && !after.starts_with('\t') {
        return None;
    }

    let mut text = after.trim();
    if let Some(pos) = text.rfind(|c: char| c != '#' && c != ' ' && c != '\t') {
        let split = pos
            + text[pos..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
        let trailing = &text[split..];
        let trimmed = trailing.trim_start();
        if trimmed.chars().all(|c| c == '#')
            && trimmed.contains('#')
            && trailing.starts_with([' ', '\t'])
        {
            text = text[..split].trim_end();
        }
    } else {
        // Only hashes and whitespace.
        text = "";
    }
    Some((hashes as u8, text.to_string()))
}

/// Thematic break: three or more matching `-`, `_`, or `*` with optional
/// interior spaces.
pub(crate) fn is_thematic_break(rest: &str) -> bool {
    let mut marker = None;
    let mut count = 0;
    for ch in rest.chars() {
        match ch {
            ' ' | '\t' => {}
            '-' | '_' | '*' => {
                if marker.is_none() {
                    marker = Some(ch);
                }
                if marker != Some(ch) {
                    return false;
                }
                count += 1;
            }
            _ => return false,
        }
    }
    count >= 3
}

/// Fence opener: three or more backticks or tildes. The info string may not
/// contain backticks when the fence is backticks; its first word, after
/// escape and entity resolution, is the language.
pub(crate) fn parse_fence_start(rest: &str) -> Option<(char, usize, Option<String>)> {
    let fence_char = rest.chars().next()?;
    if fence_char != '`' && fence_char != '~' {
        return None;
    }
    let fence_len = rest.chars().take_while(|&c| c == fence_char).count();
    if fence_len < 3 {
        return None;
    }
    let info = rest[fence_len..].trim();
    if fence_char == '`' && info.contains('`') {
        return None;
    }
    let language = info
        .split_whitespace()
        .next()
        .map(resolve_escapes_and_entities);
    Some((fence_char, fence_len, language))
}

/// Closing fence: same character, at least the opener's length, nothing but
/// whitespace after.
pub(crate) fn is_closing_fence(rest: &str, fence_char: char, min_len: usize) -> bool {
    let len = rest.chars().take_while(|&c| c == fence_char).count();
    len >= min_len && rest[len..].trim().is_empty()
}

/// Setext underline: a run of `=` (level 1) or `-` (level 2) and nothing
/// else.
pub(crate) fn parse_setext_underline(rest: &str) -> Option<u8> {
    let trimmed = rest.trim_end();
    let first = trimmed.chars().next()?;
    let level = match first {
        '=' => 1,
        '-' => 2,
        _ => return None,
    };
    if trimmed.chars().all(|c| c == first) {
        Some(level)
    } else {
        None
    }
}

/// List marker: `-`, `+`, `*`, or up to nine digits followed by `.` or `)`;
/// the marker must be followed by whitespace or end of line.
pub(crate) fn parse_list_marker(rest: &str) -> Option<ListMarker> {
    let first = rest.chars().next()?;
    if matches!(first, '-' | '+' | '*') {
        let after = rest[1..].chars().next();
        if after.is_none() || matches!(after, Some(' ' | '\t')) {
            return Some(ListMarker {
                kind: ListKind::Bullet(first),
                start: 1,
                width: 1,
            });
        }
        return None;
    }

    if !first.is_ascii_digit() {
        return None;
    }
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 9 {
        return None;
    }
    let delim = rest[digits..].chars().next()?;
    if delim != '.' && delim != ')' {
        return None;
    }
    let after = rest[digits + 1..].chars().next();
    if after.is_some() && !matches!(after, Some(' ' | '\t')) {
        return None;
    }
    let start: u32 = rest[..digits].parse().ok()?;
    Some(ListMarker {
        kind: ListKind::Ordered(delim),
        start,
        width: digits + 1,
    })
}

/// Empty items never interrupt a paragraph; ordered items only when they
/// start at 1.
fn marker_can_interrupt_paragraph(marker: &ListMarker, rest: &str) -> bool {
    if rest[marker.width..].trim().is_empty() {
        return false;
    }
    match marker.kind {
        ListKind::Bullet(_) => true,
        ListKind::Ordered(_) => marker.start == 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_blocks(input: &str) -> Vec<Node> {
        let mut parser = BlockParser::new();
        for line in input.split('\n') {
            parser.process_line(line);
        }
        parser.finish()
    }

    fn raw_paragraph(text: &str) -> Node {
        Node::Paragraph(vec![Node::Text(text.to_string())])
    }

    #[test]
    fn empty_input_is_an_empty_document() {
        assert_eq!(parse_blocks(""), Vec::<Node>::new());
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        assert_eq!(
            parse_blocks("one\ntwo\n\nthree"),
            vec![raw_paragraph("one\ntwo"), raw_paragraph("three")]
        );
    }

    #[test]
    fn atx_headings() {
        assert_eq!(
            parse_blocks("# foo\n## foo ##\n#notaheading"),
            vec![
                Node::Heading {
                    level: 1,
                    children: vec![Node::Text("foo".to_string())],
                },
                Node::Heading {
                    level: 2,
                    children: vec![Node::Text("foo".to_string())],
                },
                raw_paragraph("#notaheading"),
            ]
        );
    }

    #[test]
    fn setext_heading_follows_a_paragraph() {
        assert_eq!(
            parse_blocks("foo\n==="),
            vec![Node::Heading {
                level: 1,
                children: vec![Node::Text("foo".to_string())],
            }]
        );
        assert_eq!(
            parse_blocks("foo\n---"),
            vec![Node::Heading {
                level: 2,
                children: vec![Node::Text("foo".to_string())],
            }]
        );
    }

    #[test]
    fn dashes_without_a_paragraph_are_a_thematic_break() {
        assert_eq!(parse_blocks("---"), vec![Node::ThematicBreak]);
        assert_eq!(parse_blocks("* * *"), vec![Node::ThematicBreak]);
    }

    #[test]
    fn indented_code_needs_no_open_paragraph() {
        assert_eq!(
            parse_blocks("    code line"),
            vec![Node::CodeBlock {
                language: None,
                literal: "code line\n".to_string(),
            }]
        );
        // The same indentation after paragraph text lazily continues it.
        assert_eq!(
            parse_blocks("text\n    more"),
            vec![raw_paragraph("text\nmore")]
        );
    }

    #[test]
    fn tabs_expand_to_column_stops_for_indentation() {
        assert_eq!(
            parse_blocks("\tcode"),
            vec![Node::CodeBlock {
                language: None,
                literal: "code\n".to_string(),
            }]
        );
        // A tab after two spaces still reaches column 4; the excess stays.
        assert_eq!(
            parse_blocks("  \t  code"),
            vec![Node::CodeBlock {
                language: None,
                literal: "  code\n".to_string(),
            }]
        );
    }

    #[test]
    fn fenced_code_with_info_string() {
        assert_eq!(
            parse_blocks("```rust ignore\nfn x() {}\n```"),
            vec![Node::CodeBlock {
                language: Some("rust".to_string()),
                literal: "fn x() {}\n".to_string(),
            }]
        );
    }

    #[test]
    fn unclosed_fence_runs_to_the_end() {
        assert_eq!(
            parse_blocks("```\ncontent"),
            vec![Node::CodeBlock {
                language: None,
                literal: "content\n".to_string(),
            }]
        );
    }

    #[test]
    fn shorter_closing_fence_does_not_close() {
        assert_eq!(
            parse_blocks("````\n```\n````"),
            vec![Node::CodeBlock {
                language: None,
                literal: "```\n".to_string(),
            }]
        );
    }

    #[test]
    fn blockquotes_nest_and_continue() {
        assert_eq!(
            parse_blocks("> foo\n> bar"),
            vec![Node::BlockQuote(vec![raw_paragraph("foo\nbar")])]
        );
        // The second line omits the inner marker; the inner paragraph
        // continues lazily.
        assert_eq!(
            parse_blocks("> > inner\n> outer"),
            vec![Node::BlockQuote(vec![Node::BlockQuote(vec![
                raw_paragraph("inner\nouter"),
            ])])]
        );
        assert_eq!(
            parse_blocks("> > inner\n>\n> outer"),
            vec![Node::BlockQuote(vec![
                Node::BlockQuote(vec![raw_paragraph("inner")]),
                raw_paragraph("outer"),
            ])]
        );
    }

    #[test]
    fn lazy_continuation_inside_a_blockquote() {
        assert_eq!(
            parse_blocks("> foo\nbar"),
            vec![Node::BlockQuote(vec![raw_paragraph("foo\nbar")])]
        );
        // A thematic break cannot be lazy; it closes the quote.
        assert_eq!(
            parse_blocks("> foo\n---"),
            vec![
                Node::BlockQuote(vec![raw_paragraph("foo")]),
                Node::ThematicBreak,
            ]
        );
    }

    #[test]
    fn setext_underline_cannot_be_lazy() {
        assert_eq!(
            parse_blocks("> foo\n==="),
            vec![Node::BlockQuote(vec![raw_paragraph("foo\n===")])]
        );
    }

    #[test]
    fn blank_line_separates_blockquotes() {
        assert_eq!(
            parse_blocks("> a\n\n> b"),
            vec![
                Node::BlockQuote(vec![raw_paragraph("a")]),
                Node::BlockQuote(vec![raw_paragraph("b")]),
            ]
        );
    }

    #[test]
    fn tight_bullet_list() {
        assert_eq!(
            parse_blocks("- a\n- b"),
            vec![Node::List {
                ordered: false,
                start: 1,
                tight: true,
                children: vec![
                    Node::ListItem(vec![raw_paragraph("a")]),
                    Node::ListItem(vec![raw_paragraph("b")]),
                ],
            }]
        );
    }

    #[test]
    fn blank_line_between_items_makes_the_list_loose() {
        assert_eq!(
            parse_blocks("- a\n\n- b"),
            vec![Node::List {
                ordered: false,
                start: 1,
                tight: false,
                children: vec![
                    Node::ListItem(vec![raw_paragraph("a")]),
                    Node::ListItem(vec![raw_paragraph("b")]),
                ],
            }]
        );
    }

    #[test]
    fn ordered_list_keeps_its_start() {
        assert_eq!(
            parse_blocks("3. a\n4. b"),
            vec![Node::List {
                ordered: true,
                start: 3,
                tight: true,
                children: vec![
                    Node::ListItem(vec![raw_paragraph("a")]),
                    Node::ListItem(vec![raw_paragraph("b")]),
                ],
            }]
        );
    }

    #[test]
    fn ten_digit_ordered_start_is_not_a_list() {
        assert_eq!(
            parse_blocks("1234567890. a"),
            vec![raw_paragraph("1234567890. a")]
        );
    }

    #[test]
    fn different_markers_start_a_new_list() {
        assert_eq!(
            parse_blocks("- a\n+ b"),
            vec![
                Node::List {
                    ordered: false,
                    start: 1,
                    tight: true,
                    children: vec![Node::ListItem(vec![raw_paragraph("a")])],
                },
                Node::List {
                    ordered: false,
                    start: 1,
                    tight: true,
                    children: vec![Node::ListItem(vec![raw_paragraph("b")])],
                },
            ]
        );
    }

    #[test]
    fn item_continuation_needs_the_content_column() {
        assert_eq!(
            parse_blocks("- a\n  b"),
            vec![Node::List {
                ordered: false,
                start: 1,
                tight: true,
                children: vec![Node::ListItem(vec![raw_paragraph("a\nb")])],
            }]
        );
    }

    #[test]
    fn nested_list_by_indentation() {
        assert_eq!(
            parse_blocks("- a\n  - b"),
            vec![Node::List {
                ordered: false,
                start: 1,
                tight: true,
                children: vec![Node::ListItem(vec![
                    raw_paragraph("a"),
                    Node::List {
                        ordered: false,
                        start: 1,
                        tight: true,
                        children: vec![Node::ListItem(vec![raw_paragraph("b")])],
                    },
                ])],
            }]
        );
    }

    #[test]
    fn wide_marker_gap_keeps_code_indentation() {
        // Five spaces after the marker: one is spacing, four are literal.
        assert_eq!(
            parse_blocks("-     code"),
            vec![Node::List {
                ordered: false,
                start: 1,
                tight: true,
                children: vec![Node::ListItem(vec![Node::CodeBlock {
                    language: None,
                    literal: "code\n".to_string(),
                }])],
            }]
        );
    }

    #[test]
    fn ordered_list_not_starting_at_one_cannot_interrupt() {
        assert_eq!(
            parse_blocks("text\n2. item"),
            vec![raw_paragraph("text\n2. item")]
        );
        assert_eq!(
            parse_blocks("text\n1. item"),
            vec![
                raw_paragraph("text"),
                Node::List {
                    ordered: true,
                    start: 1,
                    tight: true,
                    children: vec![Node::ListItem(vec![raw_paragraph("item")])],
                },
            ]
        );
    }

    #[test]
    fn html_block_type_six_ends_at_blank_line() {
        assert_eq!(
            parse_blocks("<div>\ncontent\n</div>\n\nafter"),
            vec![
                Node::HtmlBlock("<div>\ncontent\n</div>\n".to_string()),
                raw_paragraph("after"),
            ]
        );
    }

    #[test]
    fn html_comment_block_ends_on_its_terminator() {
        assert_eq!(
            parse_blocks("<!-- note\nstill note -->\nafter"),
            vec![
                Node::HtmlBlock("<!-- note\nstill note -->\n".to_string()),
                raw_paragraph("after"),
            ]
        );
    }

    #[test]
    fn reference_definitions_become_visible_nodes() {
        assert_eq!(
            parse_blocks("[foo]: /url \"title\"\n\ntext"),
            vec![
                Node::Reference {
                    identifier: "foo".to_string(),
                    url: "/url".to_string(),
                    title: Some("title".to_string()),
                },
                raw_paragraph("text"),
            ]
        );
    }

    #[test]
    fn definition_inside_a_blockquote() {
        assert_eq!(
            parse_blocks("> [foo]: /url"),
            vec![Node::BlockQuote(vec![Node::Reference {
                identifier: "foo".to_string(),
                url: "/url".to_string(),
                title: None,
            }])]
        );
    }

    #[test]
    fn duplicate_definitions_all_stay_in_the_tree() {
        let nodes = parse_blocks("[foo]: /first\n[foo]: /second");
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], Node::Reference { url, .. } if url == "/first"));
        assert!(matches!(&nodes[1], Node::Reference { url, .. } if url == "/second"));
    }

    #[test]
    fn table_needs_matching_separator() {
        let nodes = parse_blocks("| a | b |\n| --- | --- |\n| 1 | 2 |");
        match &nodes[0] {
            Node::Table(children) => {
                assert_eq!(children.len(), 2);
                match &children[1] {
                    Node::TableContent(rows) => assert_eq!(rows.len(), 1),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mismatched_separator_falls_back_to_a_paragraph() {
        assert_eq!(
            parse_blocks("| a | b |\n| --- |"),
            vec![raw_paragraph("| a | b |\n| --- |")]
        );
    }

    #[test]
    fn short_and_long_body_rows_conform_to_the_header() {
        let nodes = parse_blocks("| a | b |\n| --- | --- |\n| only |\n| 1 | 2 | 3 |");
        match &nodes[0] {
            Node::Table(children) => match &children[1] {
                Node::TableContent(rows) => {
                    for row in rows {
                        match row {
                            Node::TableRow(cells) => assert_eq!(cells.len(), 2),
                            other => panic!("unexpected {:?}", other),
                        }
                    }
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn table_alignments_apply_per_column() {
        let nodes = parse_blocks("| a | b |\n| :-- | --: |\n| 1 | 2 |");
        match &nodes[0] {
            Node::Table(children) => match &children[0] {
                Node::TableHeader(rows) => match &rows[0] {
                    Node::TableRow(cells) => {
                        assert!(matches!(
                            cells[0],
                            Node::TableCell {
                                alignment: Alignment::Left,
                                ..
                            }
                        ));
                        assert!(matches!(
                            cells[1],
                            Node::TableCell {
                                alignment: Alignment::Right,
                                ..
                            }
                        ));
                    }
                    other => panic!("unexpected {:?}", other),
                },
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
