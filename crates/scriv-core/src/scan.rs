//! Low-level source text helpers shared by the parameter-spec parser and
//! the compilers.

/// Skip horizontal whitespace (space, tab, form feed, vertical tab).
/// Newlines are significant to the tag compiler and are not skipped.
pub fn trim_space(src: &str) -> &str {
    src.trim_start_matches([' ', '\t', '\x0c', '\x0b'])
}

/// Split a leading identifier word off `src`.
///
/// A word starts with a letter, `_`, or any non-ASCII character and may
/// continue with digits. Returns the word and the remaining text; the word
/// is empty when `src` does not start with a word character.
pub fn word(src: &str) -> (&str, &str) {
    let mut end = 0;
    for (idx, ch) in src.char_indices() {
        let head = ch.is_alphabetic() || ch == '_' || !ch.is_ascii();
        let tail = head || ch.is_ascii_digit();
        if if idx == 0 { head } else { tail } {
            end = idx + ch.len_utf8();
        } else {
            break;
        }
    }
    src.split_at(end)
}

/// Like [`word`], but skips leading horizontal whitespace first.
pub fn word_trimmed(src: &str) -> (&str, &str) {
    word(trim_space(src))
}

/// Advance to the end of the current line (the `\r` or `\n` itself).
pub fn line_end(src: &str) -> &str {
    match src.find(['\n', '\r']) {
        Some(pos) => &src[pos..],
        None => &src[src.len()..],
    }
}

/// Advance past the end of the current line.
pub fn next_line(src: &str) -> &str {
    let mut rest = line_end(src);
    if let Some(r) = rest.strip_prefix('\r') {
        rest = r;
    }
    if let Some(r) = rest.strip_prefix('\n') {
        rest = r;
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_splits_identifiers() {
        assert_eq!(word("foo bar"), ("foo", " bar"));
        assert_eq!(word("_x9]"), ("_x9", "]"));
        assert_eq!(word("9abc"), ("", "9abc"));
        assert_eq!(word(", rest"), ("", ", rest"));
    }

    #[test]
    fn trim_space_keeps_newlines() {
        assert_eq!(trim_space("  \t x"), "x");
        assert_eq!(trim_space("\nx"), "\nx");
    }

    #[test]
    fn next_line_handles_crlf() {
        assert_eq!(next_line("a\r\nb"), "b");
        assert_eq!(next_line("a\nb"), "b");
        assert_eq!(next_line("ab"), "");
    }
}
