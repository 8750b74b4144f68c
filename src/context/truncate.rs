//! Boundary-aware truncation for text placed in context windows
//!
//! Preference order: paragraph break, sentence end, word break, and only
//! then a hard character cut. Budgets are in characters, not bytes.

/// Cut `text` to at most `budget` characters on the best boundary.
pub fn truncate(text: &str, budget: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(budget) else {
        return text;
    };
    let window = &text[..cut];

    if let Some(p) = window.rfind("\n\n") {
        let para = window[..p].trim_end();
        if !para.is_empty() {
            return para;
        }
    }

    if let Some(end) = last_sentence_end(text, window) {
        return &window[..end];
    }

    if text[cut..].starts_with(char::is_whitespace) {
        return window.trim_end();
    }
    if let Some(p) = window.rfind(char::is_whitespace) {
        let words = window[..p].trim_end();
        if !words.is_empty() {
            return words;
        }
    }

    window
}

/// Like [`truncate`], appending an ellipsis when anything was cut.
pub fn preview(text: &str, budget: usize) -> String {
    let cut = truncate(text, budget);
    if cut.len() < text.trim_end().len() {
        format!("{} …", cut)
    } else {
        cut.to_string()
    }
}

/// Byte offset just past the last `.`/`!`/`?` in `window` that is
/// followed by whitespace (or the end of `text`).
fn last_sentence_end(text: &str, window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| {
            end > 0
                && text[end..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .last()
}
