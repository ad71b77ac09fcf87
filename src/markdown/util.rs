/// Character classification and text transforms shared by the block and
/// inline phases.
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use unicode_categories::UnicodeCategories;

use super::entities;

/// The fixed set of ASCII punctuation characters that backslash can escape.
pub(crate) fn is_ascii_punctuation(ch: char) -> bool {
    matches!(
        ch,
        '!' | '"'
            | '#'
            | '$'
            | '%'
            | '&'
            | '\''
            | '('
            | ')'
            | '*'
            | '+'
            | ','
            | '-'
            | '.'
            | '/'
            | ':'
            | ';'
            | '<'
            | '='
            | '>'
            | '?'
            | '@'
            | '['
            | '\\'
            | ']'
            | '^'
            | '_'
            | '`'
            | '{'
            | '|'
            | '}'
            | '~'
    )
}

/// Unicode punctuation for the emphasis flanking rules: ASCII punctuation
/// plus the Unicode P and S general categories.
pub(crate) fn is_unicode_punctuation(ch: char) -> bool {
    is_ascii_punctuation(ch) || ch.is_punctuation() || ch.is_symbol()
}

/// Resolve `\x` escapes of ASCII punctuation; other backslashes stay
/// literal. Used for link destinations, titles, and info strings.
pub(crate) fn process_backslash_escapes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && is_ascii_punctuation(chars[i + 1]) {
            result.push(chars[i + 1]);
            i += 2;
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }
    result
}

/// Decode character references in a string, leaving malformed ones literal.
pub(crate) fn process_entities(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '&'
            && let Some((decoded, next)) = entities::try_parse_entity(&chars, i)
        {
            result.push_str(&decoded);
            i = next;
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }
    result
}

/// Resolve escapes first, then character references. The order matters:
/// `\&amp;` keeps the literal ampersand sequence.
pub(crate) fn resolve_escapes_and_entities(text: &str) -> String {
    process_entities(&process_backslash_escapes(text))
}

// ASCII characters that are percent-encoded in destinations. Alphanumerics
// and the URL-safe punctuation set pass through untouched.
const DESTINATION_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode a link/image destination for the `url` field.
pub(crate) fn encode_destination(text: &str) -> String {
    utf8_percent_encode(text, DESTINATION_ENCODE_SET).to_string()
}
