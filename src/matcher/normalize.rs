//! Text normalization for title and artist comparison

use unicode_normalization::UnicodeNormalization;

/// Sub-tokens longer than this are not treated as separate artist names
const MAX_SPACED_ARTIST_LEN: usize = 20;

/// Joins sorted artist tokens into a signature
const SIGNATURE_SEPARATOR: &str = "|";

/// Artist values the server writes when a file has no artist tag
const PLACEHOLDER_ARTISTS: &[&str] = &["未知艺术家", "未知歌手", "unknown artist", "unknown"];

/// Map full-width brackets to their ASCII counterparts
fn half_width_bracket(c: char) -> char {
    match c {
        '（' => '(',
        '）' => ')',
        '［' | '【' | '〔' | '〖' => '[',
        '］' | '】' | '〕' | '〗' => ']',
        '｛' => '{',
        '｝' => '}',
        '《' | '〈' | '＜' => '<',
        '》' | '〉' | '＞' => '>',
        _ => c,
    }
}

fn is_bracket_opener(c: char) -> bool {
    matches!(c, '(' | '[' | '{' | '<')
}

/// Normalize a title (or any free text) for equality comparison
///
/// Brackets are unified, case and Unicode compatibility forms are folded, and
/// every run of characters that are neither letters nor digits becomes a
/// single space. The result is idempotent.
///
/// ```ignore
/// assert_eq!(normalize_text("晴天（Live版）"), "晴天 live版");
/// ```
pub fn normalize_text(input: &str) -> String {
    let mut bracketed = String::with_capacity(input.len());
    for c in input.chars().map(half_width_bracket) {
        if is_bracket_opener(c) {
            while bracketed.ends_with(char::is_whitespace) {
                bracketed.pop();
            }
        }
        bracketed.push(c);
    }

    let folded: String = bracketed.to_lowercase().nfkc().collect::<String>().to_lowercase();

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for c in folded.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Compatibility-folded, lower-cased, trimmed text with punctuation kept
///
/// Used to compare titles that [`normalize_text`] reduces to nothing.
pub fn fold_text(input: &str) -> String {
    input.nfkc().collect::<String>().trim().to_lowercase()
}

fn is_artist_separator(c: char) -> bool {
    matches!(c, '/' | ',' | '，' | '、' | '&' | '_')
}

/// Whether an artist field carries no usable artist
pub fn is_blank_artist(artist: &str) -> bool {
    let trimmed = artist.trim();
    trimmed.is_empty()
        || PLACEHOLDER_ARTISTS
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Order-independent signature of a (possibly multi-artist) credit
///
/// "A / B", "B & A" and "A、B" all produce the same signature. A single credit
/// made of short space-separated words ("A B") is also read as a list, which
/// is how some catalogs write collaborations. Only real spaces split a credit;
/// punctuation inside a name ("Jay-Z") does not.
pub fn artist_signature(artist: &str) -> String {
    let folded: String = artist.to_lowercase().nfkc().collect();

    let mut raw: Vec<&str> = folded
        .split(is_artist_separator)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if raw.len() == 1 && raw[0].contains(char::is_whitespace) {
        let words: Vec<&str> = raw[0].split_whitespace().collect();
        if words
            .iter()
            .all(|w| w.chars().count() <= MAX_SPACED_ARTIST_LEN)
        {
            raw = words;
        }
    }

    let mut tokens: Vec<String> = raw
        .into_iter()
        .map(normalize_text)
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens.join(SIGNATURE_SEPARATOR)
}
