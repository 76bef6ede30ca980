//! Tokenizer for kernel sources
//!
//! Produces tokens tagged with their line:column position. Line (`//`) and
//! block (`/* */`) comments are skipped. Integer literals accept decimal and
//! hexadecimal forms with optional `u`/`l` suffixes.
//!
//! ```
//! use ndrange_runtime::compiler::lexer::{tokenize, Token};
//!
//! let tokens = tokenize("c[i] = a[i];").unwrap();
//! assert_eq!(tokens[0].token, Token::Ident("c".to_string()));
//! assert_eq!(tokens.last().map(|t| &t.token), Some(&Token::Eof));
//! ```

use super::CompileError;
use std::fmt;

/// Source position (1-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Integer literal suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSuffix {
    None,
    Unsigned,
    Long,
    UnsignedLong,
}

/// Token types in kernel sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    // Names and keywords
    Ident(String),

    // Literals
    Int { value: u64, suffix: IntSuffix },

    // Operators
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    Percent,     // %
    Assign,      // =
    PlusAssign,  // +=
    MinusAssign, // -=
    Pipe,        // |

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Semi,     // ;

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "'{}'", name),
            Token::Int { value, .. } => write!(f, "'{}'", value),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Percent => write!(f, "'%'"),
            Token::Assign => write!(f, "'='"),
            Token::PlusAssign => write!(f, "'+='"),
            Token::MinusAssign => write!(f, "'-='"),
            Token::Pipe => write!(f, "'|'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBrace => write!(f, "'{{'"),
            Token::RBrace => write!(f, "'}}'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
            Token::Semi => write!(f, "';'"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Token with its source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

/// Lexer state
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            line: 1,
            col: 1,
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    /// Peek at current character without consuming
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    /// Consume and return current character
    fn consume(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// Skip whitespace and comments
    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.consume();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.consume() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.span();
                    self.consume();
                    self.consume();
                    loop {
                        match (self.peek(), self.peek_second()) {
                            (Some('*'), Some('/')) => {
                                self.consume();
                                self.consume();
                                break;
                            }
                            (Some(_), _) => {
                                self.consume();
                            }
                            (None, _) => return Err(CompileError::UnterminatedComment { span: start }),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                result.push(ch);
                self.consume();
            } else {
                break;
            }
        }
        result
    }

    fn read_number(&mut self, span: Span) -> Result<Token, CompileError> {
        let radix = if self.peek() == Some('0') && matches!(self.peek_second(), Some('x' | 'X')) {
            self.consume();
            self.consume();
            16
        } else {
            10
        };

        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_digit(radix) {
                digits.push(ch);
                self.consume();
            } else {
                break;
            }
        }

        let mut unsigned = false;
        let mut long = false;
        while let Some(ch) = self.peek() {
            match ch {
                'u' | 'U' if !unsigned => unsigned = true,
                'l' | 'L' if !long => long = true,
                _ => break,
            }
            self.consume();
        }

        if self.peek().is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_') || digits.is_empty() {
            return Err(CompileError::InvalidLiteral { span });
        }

        let value = u64::from_str_radix(&digits, radix).map_err(|_| CompileError::InvalidLiteral { span })?;
        let suffix = match (unsigned, long) {
            (false, false) => IntSuffix::None,
            (true, false) => IntSuffix::Unsigned,
            (false, true) => IntSuffix::Long,
            (true, true) => IntSuffix::UnsignedLong,
        };
        Ok(Token::Int { value, suffix })
    }

    /// Get next token
    pub fn next_token(&mut self) -> Result<Spanned, CompileError> {
        self.skip_trivia()?;
        let span = self.span();

        let Some(ch) = self.peek() else {
            return Ok(Spanned { token: Token::Eof, span });
        };

        if ch.is_ascii_alphabetic() || ch == '_' {
            let name = self.read_identifier();
            return Ok(Spanned {
                token: Token::Ident(name),
                span,
            });
        }

        if ch.is_ascii_digit() {
            let token = self.read_number(span)?;
            return Ok(Spanned { token, span });
        }

        self.consume();
        let token = match ch {
            '+' if self.peek() == Some('=') => {
                self.consume();
                Token::PlusAssign
            }
            '-' if self.peek() == Some('=') => {
                self.consume();
                Token::MinusAssign
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => Token::Assign,
            '|' => Token::Pipe,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ';' => Token::Semi,
            other => return Err(CompileError::UnexpectedChar { ch: other, span }),
        };

        Ok(Spanned { token, span })
    }
}

/// Tokenize a kernel source, ending with [`Token::Eof`]
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_identifiers_and_punctuation() {
        assert_eq!(
            kinds("buffer[gid] += a;"),
            vec![
                Token::Ident("buffer".to_string()),
                Token::LBracket,
                Token::Ident("gid".to_string()),
                Token::RBracket,
                Token::PlusAssign,
                Token::Ident("a".to_string()),
                Token::Semi,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_literals() {
        assert_eq!(
            kinds("42 7u 0x10 3UL"),
            vec![
                Token::Int {
                    value: 42,
                    suffix: IntSuffix::None
                },
                Token::Int {
                    value: 7,
                    suffix: IntSuffix::Unsigned
                },
                Token::Int {
                    value: 16,
                    suffix: IntSuffix::None
                },
                Token::Int {
                    value: 3,
                    suffix: IntSuffix::UnsignedLong
                },
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = kinds("a // trailing\n/* block\n comment */ b");
        assert_eq!(
            tokens,
            vec![Token::Ident("a".to_string()), Token::Ident("b".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("int\n  x;").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[1].span, Span::new(2, 3));
        assert_eq!(tokens[2].span, Span::new(2, 4));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            tokenize("a # b"),
            Err(CompileError::UnexpectedChar {
                ch: '#',
                span: Span::new(1, 3)
            })
        );
        assert!(matches!(tokenize("12abc"), Err(CompileError::InvalidLiteral { .. })));
        assert!(matches!(tokenize("/* open"), Err(CompileError::UnterminatedComment { .. })));
    }
}
