/// Generic tokenizer / node-builder framework.
///
/// A language plugs in as a [`Grammar`]: an ordered list of token builders,
/// an ordered list of node builders, a root node factory, an EOF token
/// factory, a fallback token kind, and an optional threaded state. The
/// engine owns input normalization, the tokenize loop, the node-builder
/// loop, and the forward-progress guarantees; everything language-specific
/// lives in the builders.
use crate::ast::Node;
use std::borrow::Cow;
use thiserror::Error;

/// Half-open byte range into the normalized source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        SourceRange { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A token produced by the tokenizer. The text borrows from the source
/// buffer; tokens are created once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'src, K> {
    pub kind: K,
    pub text: &'src str,
    pub range: SourceRange,
}

/// One entry in a grammar's ordered token-builder list.
///
/// At each position the builders are tried in declaration order and the
/// first match wins, so the order is part of the grammar's contract (e.g. a
/// whitespace builder ahead of a delimiter builder). A successful build must
/// cover a non-empty prefix of `source[pos..]` and may not look behind
/// `pos`.
pub trait TokenBuilder<K> {
    fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, K>>;
}

/// Outcome of offering the token stream to a node builder.
pub enum BuildOutcome {
    /// A completed node to append to the root.
    Node(Node),
    /// Tokens were consumed and state updated, but no node completed yet.
    Consumed,
    /// The builder does not apply at this position.
    NoMatch,
}

/// One entry in a grammar's ordered node-builder list. Builders that return
/// [`BuildOutcome::NoMatch`] are rewound by the engine, so they may consume
/// from the stream while probing.
pub trait NodeBuilder<K, S> {
    fn build(&self, stream: &mut TokenStream<'_, '_, K>, state: &mut S) -> BuildOutcome;
}

/// Cursor over the token list produced by the tokenizer. The final token is
/// always the grammar's EOF token; `at_end` reports when only that token
/// remains.
pub struct TokenStream<'t, 'src, K> {
    tokens: &'t [Token<'src, K>],
    pos: usize,
}

impl<'t, 'src, K> TokenStream<'t, 'src, K> {
    pub fn new(tokens: &'t [Token<'src, K>]) -> Self {
        TokenStream { tokens, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn at_end(&self) -> bool {
        self.pos + 1 >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&Token<'src, K>> {
        self.tokens.get(self.pos)
    }

    pub fn peek_at(&self, offset: usize) -> Option<&Token<'src, K>> {
        self.tokens.get(self.pos + offset)
    }

    pub fn advance(&mut self) -> Option<&Token<'src, K>> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }
}

/// Engine-level diagnostic. Malformed input in a well-formed grammar never
/// produces one of these; the channel exists for grammar-level gaps the
/// engine papers over at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub range: SourceRange,
}

/// Misconfigured grammar definitions are rejected when the grammar is
/// built, never mid-parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("grammar has no token builders")]
    NoTokenBuilders,
    #[error("grammar has no node builders")]
    NoNodeBuilders,
    #[error("grammar is missing its EOF token factory")]
    MissingEofFactory,
    #[error("grammar is missing its fallback token kind")]
    MissingFallbackKind,
    #[error("grammar is missing its root node factory")]
    MissingRootFactory,
}

type EofFactory<K> = Box<dyn Fn(usize) -> K>;
type FinishHook<S> = Box<dyn Fn(&mut S, &mut Node, &mut Vec<ParseError>)>;

/// An immutable language definition. Safe to reuse across any number of
/// `parse` calls; no state survives between calls.
pub struct Grammar<K, S> {
    token_builders: Vec<Box<dyn TokenBuilder<K>>>,
    node_builders: Vec<Box<dyn NodeBuilder<K, S>>>,
    root_factory: Box<dyn Fn() -> Node>,
    eof_factory: EofFactory<K>,
    fallback_kind: Box<dyn Fn() -> K>,
    state_factory: Box<dyn Fn() -> S>,
    finish: Option<FinishHook<S>>,
}

pub struct GrammarBuilder<K, S> {
    token_builders: Vec<Box<dyn TokenBuilder<K>>>,
    node_builders: Vec<Box<dyn NodeBuilder<K, S>>>,
    root_factory: Option<Box<dyn Fn() -> Node>>,
    eof_factory: Option<EofFactory<K>>,
    fallback_kind: Option<Box<dyn Fn() -> K>>,
    state_factory: Option<Box<dyn Fn() -> S>>,
    finish: Option<FinishHook<S>>,
}

impl<K, S> Default for GrammarBuilder<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> GrammarBuilder<K, S> {
    pub fn new() -> Self {
        GrammarBuilder {
            token_builders: Vec::new(),
            node_builders: Vec::new(),
            root_factory: None,
            eof_factory: None,
            fallback_kind: None,
            state_factory: None,
            finish: None,
        }
    }

    pub fn token_builder(mut self, builder: impl TokenBuilder<K> + 'static) -> Self {
        self.token_builders.push(Box::new(builder));
        self
    }

    pub fn node_builder(mut self, builder: impl NodeBuilder<K, S> + 'static) -> Self {
        self.node_builders.push(Box::new(builder));
        self
    }

    pub fn root(mut self, factory: impl Fn() -> Node + 'static) -> Self {
        self.root_factory = Some(Box::new(factory));
        self
    }

    pub fn eof(mut self, factory: impl Fn(usize) -> K + 'static) -> Self {
        self.eof_factory = Some(Box::new(factory));
        self
    }

    pub fn fallback(mut self, kind: impl Fn() -> K + 'static) -> Self {
        self.fallback_kind = Some(Box::new(kind));
        self
    }

    pub fn state(mut self, factory: impl Fn() -> S + 'static) -> Self {
        self.state_factory = Some(Box::new(factory));
        self
    }

    /// Hook run after the node-builder loop reaches EOF. The markdown
    /// grammar closes its open containers and runs the inline phase here.
    pub fn finish(mut self, hook: impl Fn(&mut S, &mut Node, &mut Vec<ParseError>) + 'static) -> Self {
        self.finish = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<Grammar<K, S>, GrammarError>
    where
        S: Default + 'static,
    {
        if self.token_builders.is_empty() {
            return Err(GrammarError::NoTokenBuilders);
        }
        if self.node_builders.is_empty() {
            return Err(GrammarError::NoNodeBuilders);
        }
        let eof_factory = self.eof_factory.ok_or(GrammarError::MissingEofFactory)?;
        let fallback_kind = self.fallback_kind.ok_or(GrammarError::MissingFallbackKind)?;
        let root_factory = self.root_factory.ok_or(GrammarError::MissingRootFactory)?;
        Ok(Grammar {
            token_builders: self.token_builders,
            node_builders: self.node_builders,
            root_factory,
            eof_factory,
            fallback_kind,
            state_factory: self.state_factory.unwrap_or_else(|| Box::new(S::default)),
            finish: self.finish,
        })
    }
}

impl<K, S> Grammar<K, S> {
    /// Parse a source text into `(root, errors)`.
    ///
    /// Line endings are normalized (CRLF/CR become LF) before any grammar
    /// logic runs. The call is total: malformed input degrades inside the
    /// grammar, it never raises.
    pub fn parse(&self, source: &str) -> (Node, Vec<ParseError>) {
        let normalized = normalize_line_endings(source);
        let tokens = self.tokenize(&normalized);
        let mut state = (self.state_factory)();
        let mut root = (self.root_factory)();
        let mut errors = Vec::new();

        let mut stream = TokenStream::new(&tokens);
        while !stream.at_end() {
            let start = stream.pos();
            let mut handled = false;
            for builder in &self.node_builders {
                match builder.build(&mut stream, &mut state) {
                    BuildOutcome::Node(node) => {
                        if let Some(children) = root.children_mut() {
                            children.push(node);
                        }
                        handled = true;
                        break;
                    }
                    BuildOutcome::Consumed => {
                        handled = true;
                        break;
                    }
                    BuildOutcome::NoMatch => stream.seek(start),
                }
            }
            if !handled {
                // No builder claimed the token. Skip it so the parse stays
                // total, and surface the gap as an engine diagnostic.
                if let Some(token) = stream.advance() {
                    log::debug!("no node builder matched token at {:?}", token.range);
                    errors.push(ParseError {
                        message: "no node builder matched".to_string(),
                        range: token.range,
                    });
                }
            } else if stream.pos() == start {
                // A builder reported progress without consuming anything.
                log::debug!("node builder made no progress at token {}", start);
                stream.advance();
            }
        }

        if let Some(finish) = &self.finish {
            finish(&mut state, &mut root, &mut errors);
        }
        (root, errors)
    }

    /// Run the ordered token builders over the whole source, ending with the
    /// grammar's EOF token. Positions no builder claims advance by one
    /// character under the fallback kind, so tokenization always terminates.
    fn tokenize<'src>(&self, source: &'src str) -> Vec<Token<'src, K>> {
        let mut tokens = Vec::new();
        let mut pos = 0;
        while pos < source.len() {
            let built = self
                .token_builders
                .iter()
                .find_map(|builder| builder.build(source, pos));
            match built {
                Some(token) if token.range.end > pos => {
                    log::trace!("token {:?} {:?}", token.range, token.text);
                    pos = token.range.end;
                    tokens.push(token);
                }
                _ => {
                    let width = source[pos..]
                        .chars()
                        .next()
                        .map(char::len_utf8)
                        .unwrap_or(1);
                    tokens.push(Token {
                        kind: (self.fallback_kind)(),
                        text: &source[pos..pos + width],
                        range: SourceRange::new(pos, pos + width),
                    });
                    pos += width;
                }
            }
        }
        tokens.push(Token {
            kind: (self.eof_factory)(source.len()),
            text: "",
            range: SourceRange::new(source.len(), source.len()),
        });
        tokens
    }
}

/// CRLF and bare CR both become LF before any grammar logic runs.
pub fn normalize_line_endings(source: &str) -> Cow<'_, str> {
    if !source.contains('\r') {
        return Cow::Borrowed(source);
    }
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Word,
        Space,
        Unknown,
        Eof,
    }

    struct WordBuilder;

    impl TokenBuilder<Kind> for WordBuilder {
        fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, Kind>> {
            let rest = &source[pos..];
            let len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            if len == 0 {
                return None;
            }
            Some(Token {
                kind: Kind::Word,
                text: &rest[..len],
                range: SourceRange::new(pos, pos + len),
            })
        }
    }

    struct SpaceBuilder;

    impl TokenBuilder<Kind> for SpaceBuilder {
        fn build<'src>(&self, source: &'src str, pos: usize) -> Option<Token<'src, Kind>> {
            let rest = &source[pos..];
            let len = rest.find(|c: char| c != ' ').unwrap_or(rest.len());
            if len == 0 {
                return None;
            }
            Some(Token {
                kind: Kind::Space,
                text: &rest[..len],
                range: SourceRange::new(pos, pos + len),
            })
        }
    }

    struct WordNodeBuilder;

    impl NodeBuilder<Kind, ()> for WordNodeBuilder {
        fn build(&self, stream: &mut TokenStream<'_, '_, Kind>, _state: &mut ()) -> BuildOutcome {
            match stream.peek() {
                Some(token) if token.kind == Kind::Word => {
                    let text = token.text.to_string();
                    stream.advance();
                    BuildOutcome::Node(Node::Text(text))
                }
                Some(token) if token.kind == Kind::Space => {
                    stream.advance();
                    BuildOutcome::Consumed
                }
                _ => BuildOutcome::NoMatch,
            }
        }
    }

    fn word_grammar() -> Grammar<Kind, ()> {
        GrammarBuilder::new()
            .token_builder(SpaceBuilder)
            .token_builder(WordBuilder)
            .node_builder(WordNodeBuilder)
            .root(|| Node::Document(Vec::new()))
            .eof(|_| Kind::Eof)
            .fallback(|| Kind::Unknown)
            .build()
            .unwrap()
    }

    #[test]
    fn tokenizer_tries_builders_in_order() {
        let grammar = word_grammar();
        let tokens = grammar.tokenize("ab  cd");
        let kinds: Vec<Kind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![Kind::Word, Kind::Space, Kind::Word, Kind::Eof]
        );
        assert_eq!(tokens[1].text, "  ");
        assert_eq!(tokens[2].range, SourceRange::new(4, 6));
    }

    #[test]
    fn unclaimed_positions_fall_back_one_character_at_a_time() {
        let grammar = word_grammar();
        let tokens = grammar.tokenize("a!b");
        let kinds: Vec<Kind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![Kind::Word, Kind::Unknown, Kind::Word, Kind::Eof]);
    }

    #[test]
    fn parse_collects_nodes_under_the_root() {
        let grammar = word_grammar();
        let (root, errors) = grammar.parse("one two");
        assert!(errors.is_empty());
        assert_eq!(
            root,
            Node::Document(vec![
                Node::Text("one".to_string()),
                Node::Text("two".to_string()),
            ])
        );
    }

    #[test]
    fn unhandled_tokens_surface_as_engine_diagnostics() {
        let grammar = word_grammar();
        let (root, errors) = grammar.parse("one !");
        assert_eq!(root, Node::Document(vec![Node::Text("one".to_string())]));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].range, SourceRange::new(4, 5));
    }

    #[test]
    fn grammar_construction_rejects_missing_pieces() {
        let result: Result<Grammar<Kind, ()>, _> = GrammarBuilder::new()
            .token_builder(WordBuilder)
            .node_builder(WordNodeBuilder)
            .root(|| Node::Document(Vec::new()))
            .fallback(|| Kind::Unknown)
            .build();
        assert_eq!(result.err(), Some(GrammarError::MissingEofFactory));

        let result: Result<Grammar<Kind, ()>, _> = GrammarBuilder::new().build();
        assert_eq!(result.err(), Some(GrammarError::NoTokenBuilders));
    }

    #[test]
    fn line_endings_normalize_to_lf() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert!(matches!(normalize_line_endings("plain"), Cow::Borrowed(_)));
    }
}
