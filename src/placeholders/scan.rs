/// Scanner state for one pass over the SQL bytes.
#[derive(Clone)]
pub(super) enum QuoteState {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

pub(super) fn scan_digits(bytes: &[u8], start: usize) -> Option<usize> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start { None } else { Some(idx) }
}

pub(super) fn line_comment_starts(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn block_comment_starts(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn block_comment_ends(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Try to read a dollar-quote opener at `idx` (which points at `$`).
///
/// Tags follow identifier rules: empty, or a leading alphabetic/underscore
/// byte followed by alphanumerics/underscores. A leading digit is never a
/// tag, so `$1` always scans as a placeholder. Returns the tag and the
/// index of the opener's closing `$`.
pub(super) fn dollar_quote_open(bytes: &[u8], idx: usize) -> Option<(String, usize)> {
    let mut end = idx + 1;
    if let Some(&first) = bytes.get(end)
        && first != b'$'
    {
        if !(first.is_ascii_alphabetic() || first == b'_') {
            return None;
        }
        end += 1;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
    }
    if bytes.get(end) == Some(&b'$') {
        let tag = String::from_utf8(bytes[idx + 1..end].to_vec()).ok()?;
        Some((tag, end))
    } else {
        None
    }
}

/// True when a full `$tag$` closer sits at `idx` (which points at `$`).
pub(super) fn dollar_quote_closes(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let tag_end = idx + 1 + tag.len();
    bytes.get(idx + 1..tag_end) == Some(tag.as_bytes()) && bytes.get(tag_end) == Some(&b'$')
}

/// A `?` marker is only legal after start-of-input, whitespace, or one of
/// the separator characters; a `?` embedded in an identifier is a
/// programmer error.
pub(super) fn question_position_ok(bytes: &[u8], idx: usize) -> bool {
    if idx == 0 {
        return true;
    }
    matches!(
        bytes[idx - 1],
        b' ' | b'\t' | b'\n' | b'\r' | b',' | b'(' | b'=' | b'<' | b'>' | b'!'
    )
}

/// A `?` marker must also end the token: `?1` or `?x` would splice into
/// the assigned `$n` and is rejected up front.
pub(super) fn question_followed_ok(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx + 1) {
        Some(&b) => !(b.is_ascii_alphanumeric() || b == b'_'),
        None => true,
    }
}
