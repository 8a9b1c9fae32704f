//! Tokenizer: raw text to a lazy stream of tokens.
//!
//! [`tokenize`] returns a [`Lexer`], a cloneable iterator producing one
//! [`Token`] per call. Lexing is a pure function of the input text - no
//! state is shared between lexers, so re-lexing the same text always yields
//! the same stream, and a lexer can be cloned mid-stream to look ahead.
//!
//! Whitespace and `;` line comments are trivia. An atom is a maximal run
//! of characters outside `(){}";'` and whitespace, classified after the
//! fact: `#t`/`#f` are booleans, an optional-sign digit run is an integer,
//! the same with exactly one decimal point is a float, and anything else
//! is a symbol. End of input is the end of the iterator.

use crate::LexError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, multispace1},
    combinator::value,
    multi::many0,
    sequence::preceded,
};

/// What a token is, with literal payloads already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    LeftParen,
    RightParen,
    /// The `'` quote shorthand.
    Quote,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// A string literal with escape sequences resolved.
    Str(String),
    /// A symbol, borrowing its name from the source text.
    Symbol(&'a str),
}

/// A token plus the byte offset where it starts, for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub position: usize,
}

/// Characters that terminate an atom. `{` and `}` are reserved and can
/// never start a token.
fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && !"(){}\";'".contains(c)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    preceded(char(';'), take_till(|c| c == '\n')).parse(input)
}

/// Consume any run of whitespace and line comments. Never fails.
fn trivia(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, line_comment)))).parse(input)
}

fn atom_chunk(input: &str) -> IResult<&str, &str> {
    take_while1(is_atom_char).parse(input)
}

/// True for a chunk (sign already stripped) shaped like a float literal:
/// exactly one decimal point, at least one digit, nothing else.
fn looks_like_float(body: &str) -> bool {
    let mut dots = 0;
    let mut digits = 0;
    for c in body.chars() {
        match c {
            '.' => dots += 1,
            d if d.is_ascii_digit() => digits += 1,
            _ => return false,
        }
    }
    dots == 1 && digits >= 1
}

fn classify_atom(chunk: &str, position: usize) -> Result<TokenKind<'_>, LexError> {
    match chunk {
        "#t" => return Ok(TokenKind::Boolean(true)),
        "#f" => return Ok(TokenKind::Boolean(false)),
        _ => {}
    }

    let body = chunk.strip_prefix(['+', '-']).unwrap_or(chunk);

    if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
        chunk
            .parse::<i64>()
            .map(TokenKind::Integer)
            .map_err(|_| LexError::InvalidNumber {
                literal: chunk.to_owned(),
                position,
            })
    } else if looks_like_float(body) {
        chunk
            .parse::<f64>()
            .map(TokenKind::Float)
            .map_err(|_| LexError::InvalidNumber {
                literal: chunk.to_owned(),
                position,
            })
    } else {
        Ok(TokenKind::Symbol(chunk))
    }
}

/// Tokenize `input`. The returned lexer is lazy; nothing is scanned until
/// the iterator is advanced.
pub fn tokenize(input: &str) -> Lexer<'_> {
    Lexer { input, rest: input }
}

/// A lazy token stream over borrowed source text.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    /// Byte offset of the next unconsumed character.
    fn offset(&self) -> usize {
        self.input.len() - self.rest.len()
    }

    /// Lex a string literal. `self.rest` starts at the opening quote;
    /// on return it sits after the closing quote (or at end of input on
    /// error).
    fn lex_string(&mut self, start: usize) -> Result<TokenKind<'a>, LexError> {
        let mut remaining = &self.rest[1..];
        let mut text = String::new();

        loop {
            let mut iter = remaining.chars();
            match iter.next() {
                Some('"') => {
                    self.rest = iter.as_str();
                    return Ok(TokenKind::Str(text));
                }
                Some('\\') => {
                    let escape_position = self.input.len() - remaining.len();
                    match iter.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        Some(other) => {
                            self.rest = iter.as_str();
                            return Err(LexError::InvalidEscape {
                                escape: other,
                                position: escape_position,
                            });
                        }
                        None => {
                            self.rest = "";
                            return Err(LexError::UnterminatedString { position: start });
                        }
                    }
                    remaining = iter.as_str();
                }
                Some(ch) => {
                    text.push(ch);
                    remaining = iter.as_str();
                }
                None => {
                    self.rest = "";
                    return Err(LexError::UnterminatedString { position: start });
                }
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Ok((rest, ())) = trivia(self.rest) {
            self.rest = rest;
        }

        let mut chars = self.rest.chars();
        let first = chars.next()?;
        let position = self.offset();

        let kind = match first {
            '(' => {
                self.rest = chars.as_str();
                Ok(TokenKind::LeftParen)
            }
            ')' => {
                self.rest = chars.as_str();
                Ok(TokenKind::RightParen)
            }
            '\'' => {
                self.rest = chars.as_str();
                Ok(TokenKind::Quote)
            }
            '"' => self.lex_string(position),
            _ => match atom_chunk(self.rest) {
                Ok((rest, chunk)) => {
                    self.rest = rest;
                    classify_atom(chunk, position)
                }
                Err(_) => {
                    self.rest = chars.as_str();
                    Err(LexError::UnexpectedChar {
                        found: first,
                        position,
                    })
                }
            },
        };

        Some(kind.map(|kind| Token { kind, position }))
    }
}
