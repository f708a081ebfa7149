use std::borrow::Cow;
use std::fmt::Write as _;

mod scan;

use scan::{
    QuoteState, block_comment_ends, block_comment_starts, dollar_quote_closes, dollar_quote_open,
    line_comment_starts, question_followed_ok, question_position_ok, scan_digits,
};

use crate::error::PgValetError;

/// Normalize placeholder markers to the native `$n` dialect.
///
/// Unnumbered `?` markers are assigned `$1`, `$2`, ... in left-to-right
/// scanning order; native `$n` markers pass through untouched. Markers
/// inside single-quoted literals, double-quoted identifiers (both with
/// doubled-quote escapes), comments, and dollar-quoted blocks are never
/// rewritten. Returns a borrowed `Cow` when the input needs no changes.
///
/// # Errors
/// Returns `PgValetError::BadPlaceholders` when the SQL mixes `$n` and `?`
/// outside literals, or when a `?` sits in an illegal position (not after
/// whitespace or a separator, or spliced into an identifier).
pub fn normalize_placeholders(sql: &str) -> Result<Cow<'_, str>, PgValetError> {
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    // start of the input span not yet copied into `out`
    let mut flushed = 0usize;
    let mut state = QuoteState::Normal;
    let mut assigned = 0u32;
    let mut saw_native = false;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            QuoteState::Normal => match b {
                b'\'' => state = QuoteState::SingleQuoted,
                b'"' => state = QuoteState::DoubleQuoted,
                _ if line_comment_starts(bytes, idx) => {
                    state = QuoteState::LineComment;
                    idx += 1;
                }
                _ if block_comment_starts(bytes, idx) => {
                    state = QuoteState::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, opener_end)) = dollar_quote_open(bytes, idx) {
                        state = QuoteState::DollarQuoted(tag);
                        idx = opener_end;
                    } else if scan_digits(bytes, idx + 1).is_some() {
                        if assigned > 0 {
                            return Err(mixed_dialects());
                        }
                        saw_native = true;
                    }
                }
                b'?' => {
                    if saw_native {
                        return Err(mixed_dialects());
                    }
                    if !question_position_ok(bytes, idx) {
                        return Err(PgValetError::BadPlaceholders(format!(
                            "? at byte {idx} must follow whitespace or one of , ( = < > !"
                        )));
                    }
                    if !question_followed_ok(bytes, idx) {
                        return Err(PgValetError::BadPlaceholders(format!(
                            "? at byte {idx} runs into an identifier character"
                        )));
                    }
                    assigned += 1;
                    let buf =
                        out.get_or_insert_with(|| String::with_capacity(sql.len() + 8));
                    buf.push_str(&sql[flushed..idx]);
                    let _ = write!(buf, "${assigned}");
                    flushed = idx + 1;
                }
                _ => {}
            },
            QuoteState::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // doubled-quote escape
                    } else {
                        state = QuoteState::Normal;
                    }
                }
            }
            QuoteState::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1; // doubled-quote escape
                    } else {
                        state = QuoteState::Normal;
                    }
                }
            }
            QuoteState::LineComment => {
                if b == b'\n' {
                    state = QuoteState::Normal;
                }
            }
            QuoteState::BlockComment(depth) => {
                if block_comment_starts(bytes, idx) {
                    state = QuoteState::BlockComment(depth + 1);
                    idx += 1;
                } else if block_comment_ends(bytes, idx) {
                    state = if depth == 1 {
                        QuoteState::Normal
                    } else {
                        QuoteState::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            QuoteState::DollarQuoted(ref tag) => {
                if b == b'$' && dollar_quote_closes(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = QuoteState::Normal;
                }
            }
        }
        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[flushed..]);
            Ok(Cow::Owned(buf))
        }
        None => Ok(Cow::Borrowed(sql)),
    }
}

fn mixed_dialects() -> PgValetError {
    PgValetError::BadPlaceholders(
        "statement mixes $n and ? placeholders outside string literals".to_string(),
    )
}
