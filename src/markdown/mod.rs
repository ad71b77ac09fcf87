/// The CommonMark + GFM grammar, plugged into the generic engine.
///
/// The block phase tokenizes the source at the line grain (blank lines are
/// their own kind; the builder order matters) and feeds the container-stack
/// machine one line per engine step. The grammar's finish hook closes any
/// still-open containers, builds the reference table from the finished
/// block tree, and then rewrites every leaf's raw text into inline nodes.
mod autolink;
mod block;
mod entities;
mod html;
mod inline;
mod refs;
mod table;
mod util;

use crate::ast::Node;
use crate::engine::{
    BuildOutcome, Grammar, GrammarBuilder, NodeBuilder, ParseError, SourceRange, Token,
    TokenBuilder, TokenStream,
};

use block::BlockParser;
use refs::ReferenceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Line,
    Unknown,
    Eof,
}

/// Matches a line holding only spaces and tabs, including its terminator.
/// Declared ahead of [`LineBuilder`]; the ordering is part of the grammar.
struct BlankLineBuilder;

impl TokenBuilder<LineKind> for BlankLineBuilder {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, LineKind>> {
        let rest = &source[pos..];
        let content_len = rest
            .find(|c: char| c != ' ' && c != '\t')
            .unwrap_or(rest.len());
        let terminated = rest[content_len..].starts_with('\n');
        if !terminated && content_len < rest.len() {
            return None;
        }
        let end = pos + content_len + usize::from(terminated);
        if end == pos {
            return None;
        }
        Some(Token {
            kind: LineKind::Blank,
            text: &rest[..content_len],
            range: SourceRange::new(pos, end),
        })
    }
}

/// Matches any line up to and including its terminator.
struct LineBuilder;

impl TokenBuilder<LineKind> for LineBuilder {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, LineKind>> {
        let rest = &source[pos..];
        if rest.is_empty() {
            return None;
        }
        let content_len = rest.find('\n').unwrap_or(rest.len());
        let end = pos + content_len + usize::from(content_len < rest.len());
        Some(Token {
            kind: LineKind::Line,
            text: &rest[..content_len],
            range: SourceRange::new(pos, end),
        })
    }
}

/// Threaded parser state: the open-container stack lives here between
/// engine steps.
#[derive(Default)]
pub struct MarkdownState {
    blocks: BlockParser,
}

/// The single markdown node builder: it consumes one line token per engine
/// step and never emits nodes directly; the finished tree is assembled by
/// the grammar's finish hook.
struct BlockStructureBuilder;

impl NodeBuilder<LineKind, MarkdownState> for BlockStructureBuilder {
    fn build(
        &self,
        stream: &mut TokenStream<'_, '_, LineKind>,
        state: &mut MarkdownState,
    ) -> BuildOutcome {
        match stream.peek() {
            Some(token) if token.kind != LineKind::Eof => {
                let text = token.text;
                state.blocks.process_line(text);
                stream.advance();
                BuildOutcome::Consumed
            }
            _ => BuildOutcome::NoMatch,
        }
    }
}

/// Build the Markdown grammar. The definition is immutable and may be
/// reused across any number of `parse` calls.
pub fn grammar() -> Grammar<LineKind, MarkdownState> {
    GrammarBuilder::new()
        .token_builder(BlankLineBuilder)
        .token_builder(LineBuilder)
        .node_builder(BlockStructureBuilder)
        .root(|| Node::Document(Vec::new()))
        .eof(|_| LineKind::Eof)
        .fallback(|| LineKind::Unknown)
        .finish(|state: &mut MarkdownState, root, _errors| {
            let children = state.blocks.finish();
            *root = Node::Document(children);
            let table = refs::collect_references(root);
            rewrite_inlines(root, &table, false);
        })
        .build()
        .expect("the markdown grammar definition is complete")
}

/// Parse Markdown source into `(document, errors)`. The errors list is
/// empty for every Markdown input; malformed constructs degrade to text.
pub fn parse(source: &str) -> (Node, Vec<ParseError>) {
    grammar().parse(source)
}

/// Second phase: replace each leaf's raw text with its inline subtree.
/// `first_in_item` marks the first block of a list item, where a task-list
/// checkbox may open the text.
fn rewrite_inlines(node: &mut Node, table: &ReferenceTable, first_in_item: bool) {
    match node {
        Node::Paragraph(children) => {
            if let Some(raw) = take_raw_text(children) {
                let task = if first_in_item {
                    split_task_marker(&raw).map(|(checked, rest)| (checked, rest.to_string()))
                } else {
                    None
                };
                *children = match task {
                    Some((checked, rest)) => vec![Node::TaskListItem {
                        checked,
                        children: inline::parse_inline(&rest, table),
                    }],
                    None => inline::parse_inline(&raw, table),
                };
            }
        }
        Node::Heading { children, .. } | Node::TableCell { children, .. } => {
            if let Some(raw) = take_raw_text(children) {
                *children = inline::parse_inline(&raw, table);
            }
        }
        Node::ListItem(children) => {
            for (index, child) in children.iter_mut().enumerate() {
                rewrite_inlines(child, table, index == 0);
            }
        }
        _ => {
            if let Some(children) = node.children_mut() {
                for child in children {
                    rewrite_inlines(child, table, false);
                }
            }
        }
    }
}

/// A leaf's children are exactly one raw `Text` node between the phases.
fn take_raw_text(children: &mut Vec<Node>) -> Option<String> {
    if children.len() == 1
        && let Node::Text(raw) = &mut children[0]
    {
        Some(std::mem::take(raw))
    } else {
        None
    }
}

/// `[ ]`, `[x]`, or `[X]` followed by whitespace opens a task list item.
fn split_task_marker(raw: &str) -> Option<(bool, &str)> {
    let checked = match raw.get(..3) {
        Some("[ ]") => false,
        Some("[x]") | Some("[X]") => true,
        _ => return None,
    };
    let rest = &raw[3..];
    if rest.is_empty() {
        return Some((checked, ""));
    }
    if rest.starts_with(' ') || rest.starts_with('\t') || rest.starts_with('\n') {
        return Some((checked, rest[1..].trim_start_matches([' ', '\t'])));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Alignment, BreakKind};

    fn parse_doc(source: &str) -> Node {
        let (root, errors) = parse(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        root
    }

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    #[test]
    fn empty_source_is_an_empty_document() {
        assert_eq!(parse_doc(""), Node::Document(Vec::new()));
    }

    #[test]
    fn headings_get_inline_content() {
        assert_eq!(
            parse_doc("# foo\n## foo"),
            Node::Document(vec![
                Node::Heading {
                    level: 1,
                    children: vec![text("foo")],
                },
                Node::Heading {
                    level: 2,
                    children: vec![text("foo")],
                },
            ])
        );
    }

    #[test]
    fn paragraph_emphasis_nesting() {
        assert_eq!(
            parse_doc("***foo***"),
            Node::Document(vec![Node::Paragraph(vec![Node::Emphasis(vec![
                Node::Strong(vec![text("foo")]),
            ])])])
        );
    }

    #[test]
    fn forward_reference_resolves() {
        assert_eq!(
            parse_doc("[foo]\n\n[foo]: /url \"title\""),
            Node::Document(vec![
                Node::Paragraph(vec![Node::Link {
                    url: "/url".to_string(),
                    title: Some("title".to_string()),
                    children: vec![text("foo")],
                }]),
                Node::Reference {
                    identifier: "foo".to_string(),
                    url: "/url".to_string(),
                    title: Some("title".to_string()),
                },
            ])
        );
    }

    #[test]
    fn reference_lookup_case_folds() {
        let root = parse_doc("[Foo][]\n\n[foo]: /url");
        match &root {
            Node::Document(children) => match &children[0] {
                Node::Paragraph(inlines) => {
                    assert!(matches!(&inlines[0], Node::Link { url, .. } if url == "/url"));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn duplicate_definition_is_visible_but_unused() {
        let root = parse_doc("[foo]: /first\n[foo]: /second\n\n[foo]");
        match &root {
            Node::Document(children) => {
                assert_eq!(children.len(), 3);
                assert!(matches!(&children[1], Node::Reference { url, .. } if url == "/second"));
                match &children[2] {
                    Node::Paragraph(inlines) => {
                        assert!(
                            matches!(&inlines[0], Node::Link { url, .. } if url == "/first")
                        );
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn task_list_items_rewrite_only_the_first_block() {
        let root = parse_doc("- [x] done\n- [ ] todo");
        let Node::Document(children) = &root else {
            panic!("expected document");
        };
        let Node::List { children: items, .. } = &children[0] else {
            panic!("expected list, got {:?}", children[0]);
        };
        let Node::ListItem(first) = &items[0] else {
            panic!("expected item");
        };
        assert_eq!(
            first[0],
            Node::Paragraph(vec![Node::TaskListItem {
                checked: true,
                children: vec![text("done")],
            }])
        );
        let Node::ListItem(second) = &items[1] else {
            panic!("expected item");
        };
        assert_eq!(
            second[0],
            Node::Paragraph(vec![Node::TaskListItem {
                checked: false,
                children: vec![text("todo")],
            }])
        );
    }

    #[test]
    fn checkbox_outside_a_list_is_plain_text() {
        assert_eq!(
            parse_doc("[x] not a task"),
            Node::Document(vec![Node::Paragraph(vec![text("[x] not a task")])])
        );
    }

    #[test]
    fn table_cells_hold_inline_content() {
        let root = parse_doc("| **b** | i |\n| :-- | --: |\n| `c` | [l](/u) |");
        let Node::Document(children) = &root else {
            panic!("expected document");
        };
        let Node::Table(parts) = &children[0] else {
            panic!("expected table, got {:?}", children[0]);
        };
        let Node::TableHeader(head_rows) = &parts[0] else {
            panic!("expected header");
        };
        let Node::TableRow(cells) = &head_rows[0] else {
            panic!("expected row");
        };
        assert_eq!(
            cells[0],
            Node::TableCell {
                alignment: Alignment::Left,
                children: vec![Node::Strong(vec![text("b")])],
            }
        );
        let Node::TableContent(body) = &parts[1] else {
            panic!("expected content");
        };
        let Node::TableRow(cells) = &body[0] else {
            panic!("expected row");
        };
        assert_eq!(cells[0], Node::TableCell {
            alignment: Alignment::Left,
            children: vec![Node::CodeSpan("c".to_string())],
        });
        assert_eq!(cells[1], Node::TableCell {
            alignment: Alignment::Right,
            children: vec![Node::Link {
                url: "/u".to_string(),
                title: None,
                children: vec![text("l")],
            }],
        });
    }

    #[test]
    fn soft_break_between_paragraph_lines() {
        assert_eq!(
            parse_doc("a\nb"),
            Node::Document(vec![Node::Paragraph(vec![
                text("a"),
                Node::LineBreak(BreakKind::Soft),
                text("b"),
            ])])
        );
    }

    #[test]
    fn crlf_input_normalizes() {
        assert_eq!(parse_doc("# a\r\nb\r\n"), parse_doc("# a\nb\n"));
    }

    #[test]
    fn parse_is_deterministic() {
        let source = "# h\n\n- [x] a\n- b *c* `d`\n\n> quote\n\n| x |\n| - |\n| y |\n";
        assert_eq!(parse_doc(source), parse_doc(source));
    }

    #[test]
    fn grammar_reuse_is_stateless() {
        let grammar = grammar();
        let (first, _) = grammar.parse("[a]\n\n[a]: /one");
        let (second, _) = grammar.parse("plain");
        assert_eq!(grammar.parse("[a]\n\n[a]: /one").0, first);
        assert_eq!(second, Node::Document(vec![Node::Paragraph(vec![text("plain")])]));
    }
}
