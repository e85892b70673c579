use std::{
    fmt,
    io::{BufRead, ErrorKind},
    vec,
};

use log::{error, trace};

pub const COMMENT_START: char = '#';

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Ident(ident) => write!(f, "identifier '{}'", ident),
            Token::Number(num) => write!(f, "number {}", num),
            Token::Char(c) => write!(f, "'{}'", c),
        }
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum LexError {
    #[error("invalid number literal {0}")]
    InvalidNumber(String),
}

/// Character scanner with a single character of lookahead.
///
/// `last_char` is `None` once the underlying source is exhausted. The lookahead
/// starts out as a space so the first call to `next_token` pulls from the source.
pub struct Lexer<I: Iterator<Item = char>> {
    chars: I,
    last_char: Option<char>,
}

impl<'a> Lexer<std::str::Chars<'a>> {
    pub fn from_source(input: &'a str) -> Self {
        Lexer::new(input.chars())
    }
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(chars: I) -> Self {
        Lexer {
            chars,
            last_char: Some(' '),
        }
    }

    fn advance(&mut self) {
        self.last_char = self.chars.next();
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        let token = self.scan()?;
        trace!("lexed {}", token);
        Ok(token)
    }

    fn scan(&mut self) -> Result<Token, LexError> {
        loop {
            while matches!(self.last_char, Some(c) if c.is_whitespace()) {
                self.advance();
            }

            let c = match self.last_char {
                Some(c) => c,
                None => return Ok(Token::Eof),
            };

            if c.is_alphabetic() {
                let mut ident = String::new();
                while let Some(c) = self.last_char.filter(|c| c.is_alphanumeric()) {
                    ident.push(c);
                    self.advance();
                }

                return Ok(match ident.as_str() {
                    "def" => Token::Def,
                    "extern" => Token::Extern,
                    _ => Token::Ident(ident),
                });
            }

            if c.is_ascii_digit() || c == '.' {
                let mut text = String::new();
                while let Some(c) = self.last_char.filter(|c| c.is_ascii_digit() || *c == '.') {
                    text.push(c);
                    self.advance();
                }

                return match text.parse() {
                    Ok(num) => Ok(Token::Number(num)),
                    Err(_) => Err(LexError::InvalidNumber(text)),
                };
            }

            if c == COMMENT_START {
                while !matches!(self.last_char, None | Some('\n') | Some('\r')) {
                    self.advance();
                }
                // eof inside a comment falls through to the eof check on the next pass
                continue;
            }

            self.advance();
            return Ok(Token::Char(c));
        }
    }
}

/// Lex a whole string up to and including the trailing `Token::Eof`.
pub fn lex_all(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::from_source(input);
    let mut res = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token == Token::Eof;
        res.push(token);
        if done {
            return Ok(res);
        }
    }
}

/// Streams characters out of a reader one line at a time, so an interactive
/// session never blocks on more input than the line being typed.
pub struct CharSource<R: BufRead> {
    reader: R,
    line: vec::IntoIter<char>,
}

impl<R: BufRead> CharSource<R> {
    pub fn new(reader: R) -> Self {
        CharSource {
            reader,
            line: Vec::new().into_iter(),
        }
    }
}

impl<R: BufRead> Iterator for CharSource<R> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.line.next() {
                return Some(c);
            }

            let mut buf = Vec::new();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                // bytes that are not utf-8 become U+FFFD and reach the parser as a token
                Ok(_) => {
                    self.line = String::from_utf8_lossy(&buf)
                        .chars()
                        .collect::<Vec<_>>()
                        .into_iter()
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("failed to read input: {}", err);
                    return None;
                }
            }
        }
    }
}
