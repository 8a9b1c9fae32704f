//! Reader: token stream to `Value` trees, one top-level form at a time.
//!
//! The grammar is the classic S-expression shape:
//!
//! ```text
//! form := atom | list | ' form
//! list := '(' form* ')'
//! atom := integer | float | symbol | string | boolean
//! ```
//!
//! [`Reader::read_form`] returns `Ok(None)` at end of input, which is how
//! the REPL distinguishes "nothing to evaluate" from a form that evaluated
//! to `()`. The `'x` shorthand reads as `(quote x)`.

use crate::lexer::{Lexer, Token, TokenKind, tokenize};
use crate::value::{Value, intern};
use crate::{Error, MAX_READ_DEPTH, ParseError};

/// Pulls forms out of a token stream.
pub struct Reader<'a> {
    tokens: Lexer<'a>,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Reader {
            tokens: tokenize(source),
        }
    }

    /// Read the next top-level form, or `Ok(None)` at end of input.
    pub fn read_form(&mut self) -> Result<Option<Value>, Error> {
        match self.next_token()? {
            None => Ok(None),
            Some(token) => self.read_value(token, 0).map(Some),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, Error> {
        match self.tokens.next() {
            None => Ok(None),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(token)) => Ok(Some(token)),
        }
    }

    fn read_value(&mut self, token: Token<'a>, depth: usize) -> Result<Value, Error> {
        if depth >= MAX_READ_DEPTH {
            return Err(ParseError::TooDeeplyNested {
                position: token.position,
            }
            .into());
        }

        match token.kind {
            TokenKind::Integer(n) => Ok(Value::Integer(n)),
            TokenKind::Float(x) => Ok(Value::Float(x)),
            TokenKind::Boolean(b) => Ok(Value::Bool(b)),
            TokenKind::Str(s) => Ok(Value::string(s)),
            TokenKind::Symbol(name) => Ok(Value::Symbol(intern(name))),
            TokenKind::Quote => {
                let next = self
                    .next_token()?
                    .ok_or(ParseError::UnexpectedEof)?;
                let quoted = self.read_value(next, depth + 1)?;
                Ok(Value::list(vec![Value::Symbol(intern("quote")), quoted]))
            }
            TokenKind::LeftParen => self.read_list(depth),
            TokenKind::RightParen => Err(ParseError::UnmatchedClose {
                position: token.position,
            }
            .into()),
        }
    }

    fn read_list(&mut self, depth: usize) -> Result<Value, Error> {
        let mut items = Vec::new();

        loop {
            let token = self
                .next_token()?
                .ok_or(ParseError::UnexpectedEof)?;

            match token.kind {
                TokenKind::RightParen => return Ok(Value::list(items)),
                _ => items.push(self.read_value(token, depth + 1)?),
            }
        }
    }
}

/// Read the first form of `source`. Convenience for tests and embedders
/// that evaluate one expression at a time.
pub fn read(source: &str) -> Result<Option<Value>, Error> {
    Reader::new(source).read_form()
}
