//! Tokenizer for Avro IDL

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier, keyword or (dotted) name. Backquoted identifiers are unquoted.
    Ident(String),
    /// String literal with escapes resolved
    Str(String),
    /// Numeric literal, kept as written
    Number(String),
    /// Annotation name following `@`
    Annotation(String),
    /// Single character punctuation
    Punct(char),
    Eof,
}

/// A token with its position and the doc comment immediately preceding it
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
    pub doc: Option<String>,
}

/// Position and message of a lexical error
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Split IDL source into tokens. The returned list always ends with `Token::Eof`.
pub fn tokenize(src: &str) -> Result<Vec<Spanned>, LexError> {
    let mut cursor = Cursor::new(src);
    let mut tokens = Vec::new();
    let mut pending_doc: Option<String> = None;

    loop {
        let Some(c) = cursor.peek() else { break };
        if c.is_whitespace() {
            cursor.bump();
            continue;
        }

        let (line, column) = (cursor.line, cursor.column);

        if c == '/' {
            cursor.bump();
            match cursor.peek() {
                Some('/') => {
                    while let Some(c) = cursor.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('*') => {
                    cursor.bump();
                    let body = block_comment(&mut cursor)?;
                    if let Some(doc) = body.strip_prefix('*') {
                        if !doc.is_empty() {
                            pending_doc = Some(clean_doc(doc));
                        }
                    }
                }
                _ => return Err(cursor.error("unexpected '/'")),
            }
            continue;
        }

        let token = if c == '"' {
            cursor.bump();
            Token::Str(string_literal(&mut cursor)?)
        } else if c == '`' {
            cursor.bump();
            let mut ident = String::new();
            loop {
                match cursor.bump() {
                    Some('`') => break,
                    Some(c) => ident.push(c),
                    None => return Err(cursor.error("unterminated quoted identifier")),
                }
            }
            Token::Ident(ident)
        } else if c == '@' {
            cursor.bump();
            let mut name = String::new();
            while let Some(c) = cursor.peek() {
                if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    name.push(c);
                    cursor.bump();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                return Err(cursor.error("annotation name expected after '@'"));
            }
            Token::Annotation(name)
        } else if c.is_ascii_digit() || c == '-' {
            Token::Number(number_literal(&mut cursor)?)
        } else if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(c) = cursor.peek() {
                if is_ident_part(c) {
                    ident.push(c);
                    cursor.bump();
                } else {
                    break;
                }
            }
            Token::Ident(ident)
        } else if "{}()[]<>;,=?:".contains(c) {
            cursor.bump();
            Token::Punct(c)
        } else {
            return Err(cursor.error(format!("unexpected character '{c}'")));
        };

        tokens.push(Spanned {
            token,
            line,
            column,
            doc: pending_doc.take(),
        });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line: cursor.line,
        column: cursor.column,
        doc: None,
    });
    Ok(tokens)
}

fn block_comment(cursor: &mut Cursor<'_>) -> Result<String, LexError> {
    let mut body = String::new();
    loop {
        match cursor.bump() {
            Some('*') if cursor.peek() == Some('/') => {
                cursor.bump();
                return Ok(body);
            }
            Some(c) => body.push(c),
            None => return Err(cursor.error("unterminated comment")),
        }
    }
}

/// Strip the leading `*` decoration of javadoc style comment lines
fn clean_doc(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let trimmed = line.trim();
            trimmed.strip_prefix('*').map(str::trim_start).unwrap_or(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn string_literal(cursor: &mut Cursor<'_>) -> Result<String, LexError> {
    let mut value = String::new();
    loop {
        match cursor.bump() {
            Some('"') => return Ok(value),
            Some('\\') => {
                let escaped = match cursor.bump() {
                    Some('"') => '"',
                    Some('\\') => '\\',
                    Some('/') => '/',
                    Some('b') => '\u{8}',
                    Some('f') => '\u{c}',
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('u') => {
                        let mut hex = String::with_capacity(4);
                        for _ in 0..4 {
                            match cursor.bump() {
                                Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                                _ => return Err(cursor.error("invalid unicode escape")),
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| cursor.error("invalid unicode escape"))?;
                        char::from_u32(code).ok_or_else(|| cursor.error("invalid unicode escape"))?
                    }
                    _ => return Err(cursor.error("invalid escape sequence")),
                };
                value.push(escaped);
            }
            Some('\n') | None => return Err(cursor.error("unterminated string literal")),
            Some(c) => value.push(c),
        }
    }
}

fn number_literal(cursor: &mut Cursor<'_>) -> Result<String, LexError> {
    let mut literal = String::new();
    if cursor.peek() == Some('-') {
        literal.push('-');
        cursor.bump();
    }
    while let Some(c) = cursor.peek() {
        let exponent_sign = (c == '-' || c == '+') && literal.ends_with(['e', 'E']);
        if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
            literal.push(c);
            cursor.bump();
        } else {
            break;
        }
    }
    if !literal.chars().any(|c| c.is_ascii_digit()) {
        return Err(cursor.error("number expected"));
    }
    Ok(literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_tokens_and_comments() {
        let tokens = kinds("// line\nrecord Foo { /* block */ int? a = -1; }");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("record".into()),
                Token::Ident("Foo".into()),
                Token::Punct('{'),
                Token::Ident("int".into()),
                Token::Punct('?'),
                Token::Ident("a".into()),
                Token::Punct('='),
                Token::Number("-1".into()),
                Token::Punct(';'),
                Token::Punct('}'),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_doc_comment_attaches_to_next_token() {
        let tokens = tokenize("/**\n * The zone.\n */\n@namespace(\"a.b\") record Zone {}").unwrap();
        assert_eq!(tokens[0].token, Token::Annotation("namespace".into()));
        assert_eq!(tokens[0].doc.as_deref(), Some("The zone."));
        assert_eq!(tokens[1].doc, None);
    }

    #[test]
    fn test_string_escapes_and_quoted_identifiers() {
        let tokens = kinds(r#""a\"bA" `error`"#);
        assert_eq!(tokens[0], Token::Str("a\"bA".into()));
        assert_eq!(tokens[1], Token::Ident("error".into()));
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = tokenize("record A {\n  string x = \"oops").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
