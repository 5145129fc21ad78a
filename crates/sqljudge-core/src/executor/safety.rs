//! Lexical statement-safety filter.
//!
//! This is not a SQL parser. It strips comments, masks literals, and then
//! looks at the remaining words. Anything it cannot classify with confidence is
//! rejected; the read-only connection is the second line of defence.

use crate::errors::{JudgeError, JudgeResult};

const DENIED: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "REPLACE", "MERGE", "UPSERT", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "ANALYZE",
    "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "SET", "LOCK", "UNLOCK",
    "CALL", "EXEC", "EXECUTE", "PREPARE", "DEALLOCATE", "DO", "HANDLER", "LOAD",
    "LOAD_EXTENSION", "INTO", "OUTFILE", "DUMPFILE", "RENAME", "COPY", "SHUTDOWN", "KILL",
    "FLUSH", "INSTALL", "UNINSTALL",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Punct(char),
    Literal,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn skip_quoted(chars: &[char], start: usize, quote: char) -> JudgeResult<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            // doubled quote is an escaped quote
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(JudgeError::forbidden("unterminated quoted literal"))
}

/// `[name]` identifiers have no escape: the first `]` closes them.
fn skip_bracketed(chars: &[char], start: usize) -> JudgeResult<usize> {
    chars[start + 1..]
        .iter()
        .position(|&c| c == ']')
        .map(|offset| start + offset + 2)
        .ok_or_else(|| JudgeError::forbidden("unterminated bracketed identifier"))
}

fn tokenize(sql: &str) -> JudgeResult<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-'
            && chars.get(i + 1) == Some(&'-')
            && chars.get(i + 2).map_or(true, |n| n.is_whitespace())
        {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            if matches!(chars.get(i + 2), Some('!') | Some('+')) {
                // Executable comment bodies are scanned as code.
                i += 3;
                continue;
            }
            let body = i + 2;
            let close = (body..chars.len().saturating_sub(1))
                .find(|&k| chars[k] == '*' && chars[k + 1] == '/')
                .ok_or_else(|| JudgeError::forbidden("unterminated block comment"))?;
            i = close + 2;
        } else if matches!(c, '\'' | '"' | '`') {
            i = skip_quoted(&chars, i, c)?;
            tokens.push(Token::Literal);
        } else if c == '[' {
            i = skip_bracketed(&chars, i)?;
            tokens.push(Token::Literal);
        } else if is_word_char(c) {
            let start = i;
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token::Word(word.to_uppercase()));
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    Ok(tokens)
}

/// Accepts a single read-only `SELECT` / `WITH` statement; rejects everything
/// else with `ForbiddenStatement`. Empty input is an `ExecutionError`.
pub fn check_statement(sql: &str) -> JudgeResult<()> {
    let tokens = tokenize(sql)?;
    if tokens.is_empty() {
        return Err(JudgeError::execution("empty SQL statement"));
    }

    for (idx, tok) in tokens.iter().enumerate() {
        if let Token::Word(word) = tok {
            if !DENIED.contains(&word.as_str()) {
                continue;
            }
            // replace(x, y, z) is a scalar function, REPLACE INTO is a write.
            if word == "REPLACE" && tokens.get(idx + 1) == Some(&Token::Punct('(')) {
                continue;
            }
            return Err(JudgeError::forbidden(format!("`{word}` is not allowed")));
        }
    }

    if let Some(semi) = tokens.iter().position(|t| *t == Token::Punct(';')) {
        if tokens[semi + 1..].iter().any(|t| *t != Token::Punct(';')) {
            return Err(JudgeError::forbidden("multiple statements are not allowed"));
        }
    }

    match tokens.iter().find(|t| **t != Token::Punct('(')) {
        Some(Token::Word(w)) if w == "SELECT" || w == "WITH" => Ok(()),
        Some(Token::Word(w)) => Err(JudgeError::forbidden(format!(
            "statement must start with SELECT or WITH, found `{w}`"
        ))),
        _ => Err(JudgeError::forbidden(
            "statement must start with SELECT or WITH",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn rejected(sql: &str) -> String {
        let err = check_statement(sql).expect_err(sql);
        assert_eq!(err.kind(), ErrorKind::ForbiddenStatement, "{sql}: {err}");
        err.to_string()
    }

    #[test]
    fn plain_queries_pass() {
        for sql in [
            "SELECT * FROM scores",
            "select student_id, avg(score) from scores group by student_id;",
            "WITH t AS (SELECT 1 AS x) SELECT x FROM t",
            "(SELECT 1) UNION ALL (SELECT 2)",
            "SELECT replace(name, 'a', 'b') FROM students",
            "SELECT 'drop table x; --' AS note",
            "SELECT \"update\" FROM t",
            "SELECT 1 -- delete everything\n",
            "SELECT /* insert */ 1",
            "SELECT 'it''s' AS s",
            "SELECT [delete] FROM [order details]",
        ] {
            assert!(check_statement(sql).is_ok(), "{sql}");
        }
    }

    #[test]
    fn writes_and_ddl_are_named() {
        assert!(rejected("DELETE FROM scores").contains("`DELETE`"));
        assert!(rejected("drop table scores").contains("`DROP`"));
        assert!(rejected("INSERT INTO t VALUES (1)").contains("`INSERT`"));
        assert!(rejected("REPLACE INTO t VALUES (1)").contains("`REPLACE`"));
        assert!(rejected("ATTACH DATABASE 'x.db' AS x").contains("`ATTACH`"));
        assert!(rejected("PRAGMA writable_schema = ON").contains("`PRAGMA`"));
        assert!(rejected("SELECT * INTO OUTFILE '/tmp/x' FROM t").contains("`INTO`"));
        assert!(rejected("SELECT load_extension('evil')").contains("`LOAD_EXTENSION`"));
    }

    #[test]
    fn stacked_statements_are_rejected() {
        assert!(rejected("SELECT 1; SELECT 2").contains("multiple statements"));
        assert!(rejected("SELECT 1;; SELECT 2").contains("multiple statements"));
        assert!(check_statement("SELECT 1;;").is_ok());
    }

    #[test]
    fn comments_cannot_hide_or_smuggle() {
        assert!(rejected("SELECT 1 /*! DROP TABLE t */").contains("`DROP`"));
        assert!(rejected("SELECT 1 # ; DELETE FROM t").contains("`DELETE`"));
        // `--x` is not a comment, so the tail is scanned.
        assert!(rejected("SELECT 1 --x\n; UPDATE t SET a = 1").contains("`UPDATE`"));
        assert!(rejected("SELECT 1 /* open").contains("unterminated"));
        // A quote inside a bracketed identifier does not open a string.
        assert!(
            rejected("SELECT 1 AS [a'] ; DELETE FROM scores -- '").contains("`DELETE`")
        );
    }

    #[test]
    fn unterminated_literal_is_rejected() {
        assert!(rejected("SELECT 'abc").contains("unterminated"));
        assert!(rejected("SELECT `abc").contains("unterminated"));
        assert!(rejected("SELECT [abc FROM t").contains("unterminated"));
    }

    #[test]
    fn statement_must_lead_with_select_or_with() {
        assert!(rejected("EXPLAIN SELECT 1").contains("`EXPLAIN`"));
        assert!(rejected("VALUES (1)").contains("`VALUES`"));
        rejected("'SELECT'");
    }

    #[test]
    fn empty_input_is_an_execution_error() {
        for sql in ["", "   ", "-- only a comment", "/* nothing */"] {
            let err = check_statement(sql).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExecutionError, "{sql:?}");
        }
    }
}
