//! Static checks on migration SQL.
//!
//! A small scanner that understands string literals, quoted identifiers and
//! comments well enough to catch the mistakes that otherwise surface halfway
//! through a migration: unbalanced parentheses, unterminated quotes, and a
//! final statement missing its `;`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

/// Problems found in `sql`, as human-readable messages.
pub fn check_sql(sql: &str) -> Vec<String> {
    let mut problems = Vec::new();
    let mut state = State::Code;
    let mut depth: i64 = 0;
    let mut last_code_char: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        let was = state;
        match state {
            State::Code => match c {
                '\'' => state = State::SingleQuote,
                '"' => state = State::DoubleQuote,
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        problems.push("unbalanced ')'".to_string());
                        depth = 0;
                    }
                }
                _ => {}
            },
            State::SingleQuote => {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }

        // Quotes and their contents count as code; comments do not.
        let in_comment = |s: State| matches!(s, State::LineComment | State::BlockComment);
        if !in_comment(was) && !in_comment(state) && !c.is_whitespace() {
            last_code_char = Some(c);
        }
    }

    match state {
        State::SingleQuote => problems.push("unterminated string literal".to_string()),
        State::DoubleQuote => problems.push("unterminated quoted identifier".to_string()),
        State::BlockComment => problems.push("unterminated block comment".to_string()),
        State::Code | State::LineComment => {}
    }
    if depth > 0 {
        problems.push(format!("{depth} unclosed '('"));
    }
    if last_code_char.map_or(false, |c| c != ';') {
        problems.push("last statement is not terminated with ';'".to_string());
    }
    problems
}
