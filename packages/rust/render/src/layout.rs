//! Line wrapping and centering for fixed-width pages.

use std::sync::LazyLock;

use regex::Regex;

/// Break opportunities: whitespace runs, ASCII hyphens and en dashes.
static BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\s+|-|–)").expect("valid regex"));

/// One unbreakable piece of a line.
struct Piece<'a> {
    text: &'a str,
    /// Joined to the previous piece with a space rather than directly.
    spaced: bool,
}

/// Split `text` into break pieces. Hyphens stay on the piece before them;
/// whitespace is dropped and remembered as `spaced`.
fn pieces(text: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut last = 0;
    let mut spaced = false;

    for m in BREAK_RE.find_iter(text) {
        let is_space = m.as_str().trim().is_empty();
        let end = if is_space { m.start() } else { m.end() };
        let piece = &text[last..end];
        if !piece.is_empty() {
            out.push(Piece {
                text: piece,
                spaced,
            });
        }
        spaced = is_space;
        last = m.end();
    }

    let tail = &text[last..];
    if !tail.is_empty() {
        out.push(Piece { text: tail, spaced });
    }
    out
}

/// Greedily wrap `text` so no line exceeds `width` characters, breaking only
/// after a hyphen or at whitespace. A single piece wider than `width` gets a
/// line of its own.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for piece in pieces(text.trim()) {
        let joiner = if current.is_empty() || !piece.spaced { "" } else { " " };
        let candidate_len =
            current.chars().count() + joiner.len() + piece.text.chars().count();

        if candidate_len > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(piece.text);
        } else {
            current.push_str(joiner);
            current.push_str(piece.text);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Left-pad `line` so it sits centered in `width` columns.
pub fn center(line: &str, width: usize) -> String {
    let len = line.chars().count();
    if len >= width {
        return line.to_string();
    }
    format!("{}{line}", " ".repeat((width - len) / 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_line() {
        assert_eq!(wrap("Bachelor of Science", 40), vec!["Bachelor of Science"]);
    }

    #[test]
    fn wraps_at_whitespace() {
        assert_eq!(
            wrap("Master of Business Administration", 20),
            vec!["Master of Business", "Administration"]
        );
    }

    #[test]
    fn hyphen_stays_on_the_first_line() {
        assert_eq!(
            wrap("Electrical-Computer Engineering", 12),
            vec!["Electrical-", "Computer", "Engineering"]
        );
        assert_eq!(wrap("Arts–Humanities", 8), vec!["Arts–", "Humanities"]);
    }

    #[test]
    fn hyphenated_words_rejoin_when_they_fit() {
        assert_eq!(wrap("Non-Profit Management", 40), vec!["Non-Profit Management"]);
    }

    #[test]
    fn overlong_word_gets_its_own_line() {
        assert_eq!(
            wrap("a Pneumonoultramicroscopic b", 10),
            vec!["a", "Pneumonoultramicroscopic", "b"]
        );
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn centering_pads_left() {
        assert_eq!(center("abcd", 10), "   abcd");
        assert_eq!(center("abcdefghijk", 10), "abcdefghijk");
    }
}
