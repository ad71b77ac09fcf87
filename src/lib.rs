/// A text-to-tree parsing engine with a CommonMark + GFM grammar
///
/// The engine itself is grammar-agnostic: a language supplies ordered token
/// builders, ordered node builders, a root factory, and an EOF token
/// factory, and the engine runs the two-phase pipeline. The `markdown`
/// module is the main grammar (blocks, inlines, tables, task lists,
/// strikethrough, autolinks); `formula` is a small second grammar showing
/// the same extension surface.
pub mod ast;
pub mod engine;
pub mod formula;
pub mod markdown;

pub use ast::{Alignment, BreakKind, Node};
pub use engine::{Grammar, GrammarError, ParseError};

/// Parse Markdown source text into a document tree and an error list.
///
/// The call is total: any Unicode input yields a complete tree, and the
/// errors list stays empty for Markdown input (malformed constructs
/// degrade to literal text).
pub fn parse(source: &str) -> (Node, Vec<ParseError>) {
    markdown::parse(source)
}
