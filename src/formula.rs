/// A small LaTeX-like formula grammar, here mostly to show that a language
/// plugs into the engine as plain data: its own token alphabet, builder
/// ordering, root factory, and node builders, with nothing markdown-shaped
/// anywhere in the engine.
///
/// The language is `\command` sequences taking zero or more `{...}`
/// argument groups, plus literal text. Unbalanced braces degrade to
/// literal text the same way malformed markdown constructs do.
use crate::ast::Node;
use crate::engine::{
    BuildOutcome, Grammar, GrammarBuilder, NodeBuilder, ParseError, SourceRange, Token,
    TokenBuilder, TokenStream,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaTokenKind {
    Command,
    LeftBrace,
    RightBrace,
    Whitespace,
    Text,
    Unknown,
    Eof,
}

/// `\name` with an alphabetic name.
struct CommandTokenBuilder;

impl TokenBuilder<FormulaTokenKind> for CommandTokenBuilder {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, FormulaTokenKind>> {
        let rest = &source[pos..];
        if !rest.starts_with('\\') {
            return None;
        }
        let name_len = rest[1..]
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len() - 1);
        if name_len == 0 {
            return None;
        }
        let len = 1 + name_len;
        Some(Token {
            kind: FormulaTokenKind::Command,
            text: &rest[..len],
            range: SourceRange::new(pos, pos + len),
        })
    }
}

struct BraceTokenBuilder;

impl TokenBuilder<FormulaTokenKind> for BraceTokenBuilder {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, FormulaTokenKind>> {
        let kind = match source[pos..].chars().next()? {
            '{' => FormulaTokenKind::LeftBrace,
            '}' => FormulaTokenKind::RightBrace,
            _ => return None,
        };
        Some(Token {
            kind,
            text: &source[pos..pos + 1],
            range: SourceRange::new(pos, pos + 1),
        })
    }
}

/// Declared ahead of the text builder; whitespace-before-text ordering is
/// part of the grammar definition.
struct WhitespaceTokenBuilder;

impl TokenBuilder<FormulaTokenKind> for WhitespaceTokenBuilder {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, FormulaTokenKind>> {
        let rest = &source[pos..];
        let len = rest
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        Some(Token {
            kind: FormulaTokenKind::Whitespace,
            text: &rest[..len],
            range: SourceRange::new(pos, pos + len),
        })
    }
}

struct TextTokenBuilder;

impl TokenBuilder<FormulaTokenKind> for TextTokenBuilder {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, FormulaTokenKind>> {
        let rest = &source[pos..];
        let len = rest
            .find(|c: char| c == '\\' || c == '{' || c == '}' || c.is_whitespace())
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        Some(Token {
            kind: FormulaTokenKind::Text,
            text: &rest[..len],
            range: SourceRange::new(pos, pos + len),
        })
    }
}

/// `\command{arg}{arg}` → `Formula([Text(command), arg groups...])`.
struct CommandNodeBuilder;

impl NodeBuilder<FormulaTokenKind, ()> for CommandNodeBuilder {
    fn build(
        &self,
        stream: &mut TokenStream<'_, '_, FormulaTokenKind>,
        _state: &mut (),
    ) -> BuildOutcome {
        match stream.peek() {
            Some(token) if token.kind == FormulaTokenKind::Command => {
                BuildOutcome::Node(parse_command(stream))
            }
            _ => BuildOutcome::NoMatch,
        }
    }
}

/// A bare balanced group at the top level.
struct GroupNodeBuilder;

impl NodeBuilder<FormulaTokenKind, ()> for GroupNodeBuilder {
    fn build(
        &self,
        stream: &mut TokenStream<'_, '_, FormulaTokenKind>,
        _state: &mut (),
    ) -> BuildOutcome {
        match stream.peek() {
            Some(token) if token.kind == FormulaTokenKind::LeftBrace => {
                match parse_group(stream) {
                    Some(node) => BuildOutcome::Node(node),
                    None => BuildOutcome::NoMatch,
                }
            }
            _ => BuildOutcome::NoMatch,
        }
    }
}

/// Catch-all: literal text, whitespace, and stray braces. Guarantees the
/// node-builder list is total over the token alphabet.
struct LiteralNodeBuilder;

impl NodeBuilder<FormulaTokenKind, ()> for LiteralNodeBuilder {
    fn build(
        &self,
        stream: &mut TokenStream<'_, '_, FormulaTokenKind>,
        _state: &mut (),
    ) -> BuildOutcome {
        match stream.peek() {
            Some(token) if token.kind != FormulaTokenKind::Eof => {
                let text = token.text.to_string();
                stream.advance();
                BuildOutcome::Node(Node::Text(text))
            }
            _ => BuildOutcome::NoMatch,
        }
    }
}

fn parse_command(stream: &mut TokenStream<'_, '_, FormulaTokenKind>) -> Node {
    let name = stream
        .advance()
        .map(|token| token.text.to_string())
        .unwrap_or_default();
    let mut children = vec![Node::Text(name)];
    while stream
        .peek()
        .is_some_and(|token| token.kind == FormulaTokenKind::LeftBrace)
    {
        match parse_group(stream) {
            Some(group) => children.push(group),
            None => break,
        }
    }
    Node::Formula(children)
}

/// Balanced `{...}`; rewinds and returns None when the close brace never
/// arrives, letting the brace degrade to literal text.
fn parse_group(stream: &mut TokenStream<'_, '_, FormulaTokenKind>) -> Option<Node> {
    let start = stream.pos();
    stream.advance();
    let mut children = Vec::new();
    loop {
        let Some(token) = stream.peek() else {
            stream.seek(start);
            return None;
        };
        match token.kind {
            FormulaTokenKind::RightBrace => {
                stream.advance();
                return Some(Node::Formula(children));
            }
            FormulaTokenKind::Eof => {
                stream.seek(start);
                return None;
            }
            FormulaTokenKind::Command => children.push(parse_command(stream)),
            FormulaTokenKind::LeftBrace => match parse_group(stream) {
                Some(group) => children.push(group),
                None => {
                    // Unbalanced inner brace: literal.
                    stream.advance();
                    children.push(Node::Text("{".to_string()));
                }
            },
            _ => {
                let text = token.text.to_string();
                stream.advance();
                children.push(Node::Text(text));
            }
        }
    }
}

/// Build the Formula grammar.
pub fn grammar() -> Grammar<FormulaTokenKind, ()> {
    GrammarBuilder::new()
        .token_builder(CommandTokenBuilder)
        .token_builder(BraceTokenBuilder)
        .token_builder(WhitespaceTokenBuilder)
        .token_builder(TextTokenBuilder)
        .node_builder(CommandNodeBuilder)
        .node_builder(GroupNodeBuilder)
        .node_builder(LiteralNodeBuilder)
        .root(|| Node::Formula(Vec::new()))
        .eof(|_| FormulaTokenKind::Eof)
        .fallback(|| FormulaTokenKind::Unknown)
        .build()
        .expect("the formula grammar definition is complete")
}

/// Parse a formula into `(root, errors)`.
pub fn parse(source: &str) -> (Node, Vec<ParseError>) {
    grammar().parse(source)
}
