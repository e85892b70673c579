//! Front end for the moffet expression language: a character lexer, an
//! operator precedence parser, and a code generator that lowers the tree onto
//! any [`backend::Backend`].

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod config;
pub mod driver;
pub mod lexer;
pub mod parser;

pub use codegen::{Codegen, CodegenError};
pub use driver::{Driver, DriverError, Generated};
pub use lexer::{LexError, Lexer, Token};
pub use parser::{ParseError, Parser};
