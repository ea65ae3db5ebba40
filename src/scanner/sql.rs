//! SQL text helpers: statement splitting and query fingerprints.
//!
//! Both run on the `sqlparser` tokenizer with the MySQL dialect, so quoting
//! (`'..'`, `".."`, `` `..` ``, backslash escapes) and comments (`-- `, `#`,
//! `/* */`) follow MySQL rules and a `;` inside a string or a comment never
//! ends a statement.

use sqlparser::dialect::MySqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{
    Location, Span, Token, TokenWithSpan, Tokenizer, TokenizerError, Whitespace,
};

/// Split `text` into statements on `;` outside quotes and comments.
///
/// Statements are sliced from the original text and trimmed; empty ones are
/// dropped.
pub fn split_statements(text: &str) -> Result<Vec<String>, TokenizerError> {
    let tokens = tokenize(text)?;
    let lines = LineIndex::new(text);

    let mut statements = Vec::new();
    let mut start = 0;
    for token in tokens.iter().filter(|t| t.token == Token::SemiColon) {
        let end = lines.offset(token.span.start).max(start);
        push_statement(&mut statements, &text[start..end]);
        start = (end + 1).min(text.len());
    }
    push_statement(&mut statements, &text[start..]);

    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, statement: &str) {
    let statement = statement.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

/// Normalized form of a statement used to group equivalent queries.
///
/// Comments are dropped, literals (including a leading sign on a number)
/// become `?`, whitespace runs collapse to one space and everything except
/// quoted identifiers is lowercased. A statement holding only comments
/// yields an empty string.
pub fn fingerprint(statement: &str) -> Result<String, TokenizerError> {
    let tokens = tokenize(statement)?;

    let mut out = String::with_capacity(statement.len());
    let mut space = false;
    let mut previous: Option<&Token> = None;
    let mut sign: Option<(&Token, bool)> = None;

    for TokenWithSpan { token, .. } in &tokens {
        match token {
            Token::Whitespace(_) => {
                space = true;
                continue;
            }
            Token::EOF => continue,
            Token::Minus | Token::Plus if sign.is_none() && opens_operand(previous) => {
                sign = Some((token, space));
                space = false;
                previous = Some(token);
                continue;
            }
            _ => {}
        }

        if is_literal(token) {
            if let Some((_, sign_space)) = sign.take() {
                space = sign_space;
            }
            push_piece(&mut out, "?", space);
        } else {
            if let Some((sign_token, sign_space)) = sign.take() {
                push_piece(&mut out, &sign_token.to_string(), sign_space);
            }
            push_piece(&mut out, &render(token), space);
        }
        space = false;
        previous = Some(token);
    }
    if let Some((sign_token, sign_space)) = sign {
        push_piece(&mut out, &sign_token.to_string(), sign_space);
    }

    Ok(out)
}

fn push_piece(out: &mut String, piece: &str, space: bool) {
    if space && !out.is_empty() {
        out.push(' ');
    }
    out.push_str(piece);
}

fn render(token: &Token) -> String {
    match token {
        Token::Word(word) if word.quote_style.is_some() => token.to_string(),
        _ => token.to_string().to_lowercase(),
    }
}

fn is_literal(token: &Token) -> bool {
    match token {
        Token::Number(..)
        | Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::EscapedStringLiteral(_)
        | Token::HexStringLiteral(_) => true,
        // MySQL reads "..." as a string unless ANSI_QUOTES is set
        Token::Word(word) => word.quote_style == Some('"'),
        _ => false,
    }
}

/// Whether a `-` or `+` after `previous` is a sign rather than an operator.
fn opens_operand(previous: Option<&Token>) -> bool {
    match previous {
        None => true,
        Some(Token::Word(word)) if word.quote_style.is_none() => matches!(
            word.keyword,
            Keyword::SELECT
                | Keyword::WHERE
                | Keyword::AND
                | Keyword::OR
                | Keyword::NOT
                | Keyword::CASE
                | Keyword::WHEN
                | Keyword::THEN
                | Keyword::ELSE
                | Keyword::BETWEEN
                | Keyword::HAVING
                | Keyword::ON
                | Keyword::LIMIT
                | Keyword::OFFSET
                | Keyword::INTERVAL
                | Keyword::RETURN
        ),
        Some(token) => !is_literal(token) && !matches!(
            token,
            Token::Word(_) | Token::RParen | Token::RBracket | Token::Placeholder(_)
        ),
    }
}

fn tokenize(text: &str) -> Result<Vec<TokenWithSpan>, TokenizerError> {
    let dialect = MySqlDialect {};
    let tokens = Tokenizer::new(&dialect, text).tokenize_with_location()?;

    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.token {
            // MySQL only starts a `--` comment when whitespace follows it
            Token::Whitespace(Whitespace::SingleLineComment {
                ref comment,
                ref prefix,
            }) if prefix == "--"
                && !comment.is_empty()
                && !comment.starts_with(char::is_whitespace) =>
            {
                let base = token.span.start;
                for column in [1, 2] {
                    let at = shift(base, Location { line: 1, column }, 0);
                    out.push(TokenWithSpan {
                        token: Token::Minus,
                        span: Span { start: at, end: at },
                    });
                }
                for inner in tokenize(comment)? {
                    out.push(TokenWithSpan {
                        token: inner.token,
                        span: Span {
                            start: shift(base, inner.span.start, 2),
                            end: shift(base, inner.span.end, 2),
                        },
                    });
                }
            }
            _ => out.push(token),
        }
    }

    Ok(out)
}

/// Move a location inside a fragment that starts `skip` characters after
/// `base` back into the enclosing text.
fn shift(base: Location, inner: Location, skip: u64) -> Location {
    if inner.line <= 1 {
        Location {
            line: base.line,
            column: base.column + skip + inner.column.saturating_sub(1),
        }
    } else {
        Location {
            line: base.line + inner.line - 1,
            column: inner.column,
        }
    }
}

/// Maps tokenizer locations (1-based line and character column) to byte
/// offsets.
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, starts }
    }

    fn offset(&self, location: Location) -> usize {
        let line = (location.line as usize).saturating_sub(1);
        let Some(&start) = self.starts.get(line) else {
            return self.text.len();
        };
        let column = (location.column as usize).saturating_sub(1);
        self.text[start..]
            .char_indices()
            .nth(column)
            .map_or(self.text.len(), |(i, _)| start + i)
    }
}
