//! Pull a single SQL statement out of free-form model output

/// First words that mark the start of a SQL statement. Write statements are
/// included so they reach the validator and get rejected there. Words that
/// commonly open a prose sentence (TABLE, SET, LOAD, REPLACE) are left out.
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE",
    "TRUNCATE", "MERGE", "COPY", "ATTACH", "DETACH", "INSTALL", "PRAGMA", "SHOW", "DESCRIBE",
    "EXPLAIN", "CALL", "EXPORT", "IMPORT", "GRANT", "REVOKE", "VACUUM", "CHECKPOINT",
];

/// Extract SQL from a model response.
///
/// Prefers the first fenced code block. Without a `response_prefix`, takes
/// everything from the first line that starts with a statement keyword.
///
/// With a `response_prefix` the model was primed mid-statement, so the body
/// is a continuation: it is kept whole and the prefix is put back in front
/// unless the body already starts with it (or with `WITH`). Later lines are
/// never searched, since a continuation often contains nested `SELECT`s.
///
/// Trailing semicolons are removed. Returns `None` when no SQL-like content
/// is present.
pub fn extract_sql(raw: &str, response_prefix: Option<&str>) -> Option<String> {
    let body = fenced_block(raw).unwrap_or(raw);

    let sql = match response_prefix {
        Some(prefix) => {
            let rest = body.trim();
            if rest.is_empty() {
                return None;
            }
            let prefix = prefix.trim();
            if starts_with_word(rest, prefix) || starts_with_word(rest, "WITH") {
                rest.to_string()
            } else {
                format!("{prefix} {rest}")
            }
        }
        None => body[statement_start(body)?..].to_string(),
    };

    let sql = sql
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string();

    if sql.is_empty() {
        None
    } else {
        Some(sql)
    }
}

/// Contents of the first ``` block, without its language tag
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    let content = match after_open.find("```") {
        Some(close) => &after_open[..close],
        None => after_open,
    };

    // Drop a language tag such as `sql` or `duckdb` on the opening line
    let content = match content.find('\n') {
        Some(newline) => {
            let tag = content[..newline].trim();
            let is_tag = !tag.is_empty()
                && !tag.contains(char::is_whitespace)
                && !is_statement_keyword(tag);
            if is_tag {
                &content[newline + 1..]
            } else {
                content
            }
        }
        None => content,
    };

    Some(content)
}

/// Byte offset of the first statement keyword that begins a line, optionally
/// after a short `label:` such as `SQL Query:`
fn statement_start(body: &str) -> Option<usize> {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let line_start = offset + (line.len() - trimmed.len());

        if starts_with_keyword(trimmed) {
            return Some(line_start);
        }

        if let Some((label, rest)) = trimmed.split_once(':') {
            let rest_trimmed = rest.trim_start();
            if label.split_whitespace().count() <= 3 && starts_with_keyword(rest_trimmed) {
                let rest_start = line_start + label.len() + 1 + (rest.len() - rest_trimmed.len());
                return Some(rest_start);
            }
        }

        offset += line.len();
    }
    None
}

fn first_word(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

fn starts_with_keyword(text: &str) -> bool {
    let word = first_word(text);
    !word.is_empty() && is_statement_keyword(word)
}

fn starts_with_word(text: &str, word: &str) -> bool {
    first_word(text).eq_ignore_ascii_case(word)
}

fn is_statement_keyword(word: &str) -> bool {
    STATEMENT_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(word))
}
