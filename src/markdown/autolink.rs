/// Autolinks: the CommonMark `<scheme:...>` / `<email>` forms plus the GFM
/// extended bare forms (`www.`, `http://`, `https://`, `ftp://`, and bare
/// email addresses) with trailing punctuation and parenthesis trimming.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::Node;

static ABSOLUTE_URI_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]{1,31}:[^\s<>]*$").unwrap());
static EMAIL_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$").unwrap()
});
static BARE_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:https?://|ftp://|www\.)[^\s<]+").unwrap());
static BARE_EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9.+_-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+").unwrap());

/// Try the `<...>` autolink forms starting at `chars[start]` (a `<`).
/// Returns the node and the index just past the closing `>`.
pub(crate) fn try_parse_angle_autolink(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let mut i = start + 1;
    let content_start = i;
    while i < chars.len() && !matches!(chars[i], '>' | '<' | '\n') {
        i += 1;
    }
    if i >= chars.len() || chars[i] != '>' {
        return None;
    }
    let content: String = chars[content_start..i].iter().collect();
    if content.is_empty() || content.contains(char::is_whitespace) {
        return None;
    }
    i += 1;

    if EMAIL_ADDRESS_REGEX.is_match(&content) {
        return Some((
            Node::Autolink {
                url: format!("mailto:{}", content),
                text: content,
            },
            i,
        ));
    }
    if ABSOLUTE_URI_REGEX.is_match(&content) {
        return Some((
            Node::Autolink {
                // Backslash escapes do not work inside autolinks.
                url: content.replace('\\', "%5C"),
                text: content,
            },
            i,
        ));
    }
    None
}

/// Try a GFM bare URL starting at `chars[start]`. Only called when the
/// preceding character makes this a word start.
pub(crate) fn try_parse_bare_url(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let rest: String = chars[start..].iter().collect();
    let matched = BARE_URL_REGEX.find(&rest)?;
    let candidate = trim_trailing(&rest[..matched.end()]);
    if candidate.is_empty() {
        return None;
    }

    // `www.x` needs at least one dot after the prefix's own domain label.
    let domain = candidate
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("ftp://");
    let domain = domain.split(['/', '?', '#']).next().unwrap_or("");
    if !domain.contains('.') {
        return None;
    }

    let url = if candidate.starts_with("www.") {
        format!("http://{}", candidate)
    } else {
        candidate.to_string()
    };
    let consumed = candidate.chars().count();
    Some((
        Node::Autolink {
            url,
            text: candidate.to_string(),
        },
        start + consumed,
    ))
}

/// Try a GFM bare email address starting at `chars[start]`.
pub(crate) fn try_parse_bare_email(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let rest: String = chars[start..].iter().collect();
    let matched = BARE_EMAIL_REGEX.find(&rest)?;
    let mut candidate = &rest[..matched.end()];
    // The last character may not be - or _.
    while candidate.ends_with(['-', '_']) {
        candidate = &candidate[..candidate.len() - 1];
    }
    if candidate.is_empty() || !candidate.contains('@') {
        return None;
    }
    let consumed = candidate.chars().count();
    Some((
        Node::Autolink {
            url: format!("mailto:{}", candidate),
            text: candidate.to_string(),
        },
        start + consumed,
    ))
}

/// GFM trailing trimming: strip trailing punctuation, and strip a trailing
/// `)` only when the parentheses inside the candidate are unbalanced.
fn trim_trailing(candidate: &str) -> &str {
    let mut s = candidate;
    loop {
        let Some(last) = s.chars().last() else {
            return s;
        };
        match last {
            '?' | '!' | '.' | ',' | ':' | ';' | '*' | '_' | '~' => {
                s = &s[..s.len() - 1];
            }
            ')' => {
                let opens = s.chars().filter(|&c| c == '(').count();
                let closes = s.chars().filter(|&c| c == ')').count();
                if closes > opens {
                    s = &s[..s.len() - 1];
                } else {
                    return s;
                }
            }
            _ => return s,
        }
    }
}
