use log::debug;

use crate::backend::Backend;
use crate::codegen::{Codegen, CodegenError};
use crate::lexer::Token;
use crate::parser::{ParseError, Parser};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// A successfully generated top-level form, carrying the backend's handle.
#[derive(Debug, PartialEq, Clone)]
pub enum Generated<F> {
    Definition(F),
    Extern(F),
    Expression(F),
}

impl<F> Generated<F> {
    pub fn function(&self) -> &F {
        match self {
            Generated::Definition(func) | Generated::Extern(func) | Generated::Expression(func) => {
                func
            }
        }
    }
}

pub type StepResult<F> = Result<Generated<F>, DriverError>;

/// Pulls top-level forms out of a parser and feeds them to a code generator.
pub struct Driver<I: Iterator<Item = char>, B: Backend> {
    parser: Parser<I>,
    codegen: Codegen<B>,
}

impl<I: Iterator<Item = char>, B: Backend> Driver<I, B> {
    pub fn new(parser: Parser<I>, codegen: Codegen<B>) -> Self {
        Driver { parser, codegen }
    }

    pub fn codegen(&self) -> &Codegen<B> {
        &self.codegen
    }

    pub fn codegen_mut(&mut self) -> &mut Codegen<B> {
        &mut self.codegen
    }

    pub fn parser_mut(&mut self) -> &mut Parser<I> {
        &mut self.parser
    }

    /// Handle the next top-level form. Returns `None` at end of input.
    ///
    /// A parse failure discards the partial form and skips exactly one token
    /// before reporting, so the next call resumes after it.
    pub fn step(&mut self) -> Option<StepResult<B::Function>> {
        loop {
            let token = match self.parser.current_token() {
                Ok(token) => token.clone(),
                Err(err) => return Some(Err(self.recover(err))),
            };

            let parsed = match token {
                Token::Eof => return None,
                Token::Char(';') => {
                    if let Err(err) = self.parser.next_token() {
                        return Some(Err(self.recover(err)));
                    }
                    continue;
                }
                Token::Def => self.parser.parse_definition(),
                Token::Extern => self.parser.parse_extern(),
                _ => self.parser.parse_top_level_expression(),
            };

            let item = match parsed {
                Ok(item) => item,
                Err(err) => return Some(Err(self.recover(err))),
            };

            let func = match self.codegen.generate(&item) {
                Ok(func) => func,
                Err(err) => return Some(Err(err.into())),
            };

            return Some(Ok(match token {
                Token::Def => Generated::Definition(func),
                Token::Extern => Generated::Extern(func),
                _ => Generated::Expression(func),
            }));
        }
    }

    fn recover(&mut self, err: ParseError) -> DriverError {
        debug!("recovering from parse error: {}", err);
        // each failed lex consumes its text, so this terminates
        while let Err(skip_err) = self.parser.next_token() {
            debug!("error while skipping token: {}", skip_err);
        }
        err.into()
    }

    /// Drive forms to end of input, handing each outcome to `on_step`.
    pub fn run<F>(&mut self, mut on_step: F)
    where
        F: FnMut(&mut Self, StepResult<B::Function>),
    {
        while let Some(res) = self.step() {
            on_step(self, res);
        }
    }
}
