use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Produce the canonical lookup key for a place name.
///
/// NFKD-decompose, drop combining marks, lowercase, fold every run of
/// whitespace and internal `- _ . ,` punctuation into a single space and
/// collapse curly apostrophes into `'`. Idempotent; both indexed names and
/// query tokens go through here, so only normalized strings are ever
/// compared.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;

    for c in s.nfkd() {
        if is_combining_mark(c) {
            continue;
        }
        let c = match c {
            '\u{2019}' | '\u{2018}' | '\u{02BC}' => '\'',
            c => c,
        };
        if c.is_whitespace() || matches!(c, '-' | '_' | '.' | ',') {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lower in c.to_lowercase() {
            out.push(lower);
        }
    }

    out
}

/// Strip leading and trailing non-alphabetic characters from a raw query
/// field. Parentheses survive so that bracketed suffixes can be picked
/// apart later.
pub fn clean_nonalpha(s: &str) -> &str {
    let keep = |c: char| c.is_alphabetic() || c == '(' || c == ')';
    let start = match s.find(keep) {
        Some(i) => i,
        None => return "",
    };
    let end = s
        .char_indices()
        .filter(|(_, c)| keep(*c))
        .map(|(i, c)| i + c.len_utf8())
        .next_back()
        .unwrap_or(s.len());
    &s[start..end]
}
