use std::collections::HashMap;

use lazy_static::lazy_static;
use log::debug;

use crate::ast::{Expression, Function, Prototype, TopLevel};
use crate::lexer::{LexError, Lexer, Token};

/// Deepest run of parentheses and call arguments accepted inside one expression.
pub const MAX_NESTING: usize = 256;

lazy_static! {
    /// Binary operators and their binding strength. Every entry must be positive.
    pub static ref DEFAULT_PRECEDENCE: HashMap<char, u32> = {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert('<', 10);
        operator_precedence.insert('>', 10);
        operator_precedence.insert('+', 20);
        operator_precedence.insert('-', 20);
        operator_precedence.insert('*', 40);
        operator_precedence.insert('/', 40);
        operator_precedence
    };
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unknown token {0} when expecting an expression")]
    ExpectedExpression(Token),
    #[error("expected ')' but found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected ')' or ',' in argument list but found {0}")]
    ExpectedArgumentSeparator(Token),
    #[error("expected function name in prototype but found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype but found {0}")]
    ExpectedPrototypeOpen(Token),
    #[error("expected ')' in prototype but found {0}")]
    ExpectedPrototypeClose(Token),
    #[error("expression nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

pub type PartialParseResult = Result<Expression, ParseError>;

/// Recursive descent parser with one token of lookahead.
///
/// The parser starts out with `Token::Eof` as its current token and pulls the
/// first real token lazily, so constructing one never blocks on the source.
pub struct Parser<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
    primed: bool,
    depth: usize,
    pub operator_precedence: HashMap<char, u32>,
}

impl<'a> Parser<std::str::Chars<'a>> {
    pub fn from_source(input: &'a str) -> Self {
        Parser::new(Lexer::from_source(input))
    }
}

impl<I: Iterator<Item = char>> Parser<I> {
    pub fn new(lexer: Lexer<I>) -> Self {
        Parser {
            lexer,
            current: Token::Eof,
            primed: false,
            depth: 0,
            operator_precedence: DEFAULT_PRECEDENCE.clone(),
        }
    }

    pub fn with_precedence(mut self, operator_precedence: HashMap<char, u32>) -> Self {
        self.operator_precedence = operator_precedence;
        self
    }

    pub fn set_precedence(&mut self, operator: char, precedence: u32) {
        self.operator_precedence.insert(operator, precedence);
    }

    /// The token under the cursor, reading the first one on demand.
    pub fn current_token(&mut self) -> Result<&Token, ParseError> {
        if !self.primed {
            self.next_token()?;
        }
        Ok(&self.current)
    }

    /// Advance the cursor by exactly one token.
    pub fn next_token(&mut self) -> Result<&Token, ParseError> {
        self.primed = true;
        // a lex failure still moves the cursor off the bad text
        self.current = Token::Eof;
        self.current = self.lexer.next_token()?;
        Ok(&self.current)
    }

    fn take_token(&mut self) -> Result<Token, ParseError> {
        self.current_token()?;
        let token = std::mem::replace(&mut self.current, Token::Eof);
        self.next_token()?;
        Ok(token)
    }

    fn token_precedence(&mut self) -> Result<Option<u32>, ParseError> {
        let operator = match self.current_token()? {
            Token::Char(c) => *c,
            _ => return Ok(None),
        };
        Ok(self.operator_precedence.get(&operator).copied())
    }

    fn parse_number(&mut self) -> PartialParseResult {
        match self.take_token()? {
            Token::Number(num) => Ok(Expression::Number(num)),
            tok => Err(ParseError::ExpectedExpression(tok)),
        }
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.next_token()?;
        let res = self.parse_expression()?;
        if self.current_token()? != &Token::Char(')') {
            return Err(ParseError::ExpectedCloseParen(self.current.clone()));
        }
        self.next_token()?;
        Ok(res)
    }

    fn parse_identifier(&mut self) -> PartialParseResult {
        let ident = match self.take_token()? {
            Token::Ident(ident) => ident,
            tok => return Err(ParseError::ExpectedExpression(tok)),
        };

        if self.current_token()? != &Token::Char('(') {
            return Ok(Expression::Variable(ident));
        }
        self.next_token()?;

        let mut args = Vec::new();
        if self.current_token()? != &Token::Char(')') {
            loop {
                args.push(self.parse_expression()?);

                match self.current_token()?.clone() {
                    Token::Char(')') => break,
                    Token::Char(',') => {
                        self.next_token()?;
                    }
                    tok => return Err(ParseError::ExpectedArgumentSeparator(tok)),
                }
            }
        }
        self.next_token()?;

        Ok(Expression::Call(ident, args))
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current_token()?.clone() {
            Token::Number(_) => self.parse_number(),
            Token::Ident(_) => self.parse_identifier(),
            Token::Char('(') => self.parse_nested(),
            tok => Err(ParseError::ExpectedExpression(tok)),
        }
    }

    /// Precedence climbing: folds `op primary` pairs onto `lhs` while the
    /// operator binds at least as tightly as `expr_precedence`.
    fn parse_rhs(&mut self, expr_precedence: u32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let precedence = match self.token_precedence()? {
                Some(pr) if pr >= expr_precedence => pr,
                _ => break,
            };
            let operator = match self.take_token()? {
                Token::Char(op) => op,
                tok => return Err(ParseError::ExpectedExpression(tok)),
            };

            let mut rhs = self.parse_primary()?;

            if let Some(next_precedence) = self.token_precedence()? {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            result = Expression::Binary(operator, Box::new(result), Box::new(rhs));
        }

        Ok(result)
    }

    pub fn parse_expression(&mut self) -> PartialParseResult {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::NestingTooDeep(MAX_NESTING));
        }

        self.depth += 1;
        let res = self.parse_primary().and_then(|lhs| self.parse_rhs(0, lhs));
        self.depth -= 1;
        res
    }

    pub fn parse_prototype(&mut self) -> Result<Prototype, ParseError> {
        let name = match self.current_token()? {
            Token::Ident(name) => name.clone(),
            tok => return Err(ParseError::ExpectedFunctionName(tok.clone())),
        };

        if self.next_token()? != &Token::Char('(') {
            return Err(ParseError::ExpectedPrototypeOpen(self.current.clone()));
        }

        let mut args = Vec::new();
        while let Token::Ident(arg) = self.next_token()? {
            args.push(arg.clone());
        }

        if self.current != Token::Char(')') {
            return Err(ParseError::ExpectedPrototypeClose(self.current.clone()));
        }
        self.next_token()?;

        Ok(Prototype { name, args })
    }

    /// `def` prototype expression
    pub fn parse_definition(&mut self) -> Result<TopLevel, ParseError> {
        self.take_token()?;
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        debug!("parsed definition of {}", prototype.name);
        Ok(TopLevel::Definition(Function { prototype, body }))
    }

    /// `extern` prototype
    pub fn parse_extern(&mut self) -> Result<TopLevel, ParseError> {
        self.take_token()?;
        let prototype = self.parse_prototype()?;
        debug!("parsed extern {}", prototype.name);
        Ok(TopLevel::Extern(prototype))
    }

    pub fn parse_top_level_expression(&mut self) -> Result<TopLevel, ParseError> {
        let body = self.parse_expression()?;
        debug!("parsed top-level expression");
        Ok(TopLevel::Expression(Function {
            prototype: Prototype::anonymous(),
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn num(value: f64) -> Box<Expression> {
        Box::new(Expression::Number(value))
    }

    fn var(name: &str) -> Box<Expression> {
        Box::new(Expression::Variable(name.to_string()))
    }

    fn parse_expr(input: &str) -> PartialParseResult {
        Parser::from_source(input).parse_expression()
    }

    #[test]
    fn parse_expr_works() {
        let target = Expression::Binary(
            '+',
            var("x"),
            Box::new(Expression::Binary(
                '*',
                num(1.0),
                Box::new(Expression::Binary('-', num(2.0), num(3.0))),
            )),
        );
        assert_eq!(parse_expr("x + 1 * (2 - 3)").unwrap(), target);
    }

    #[test]
    fn multiplication_binds_tighter() {
        assert_eq!(
            parse_expr("1 + 2 * 3").unwrap(),
            Expression::Binary('+', num(1.0), Box::new(Expression::Binary('*', num(2.0), num(3.0))))
        );
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        assert_eq!(
            parse_expr("1 - 2 - 3").unwrap(),
            Expression::Binary('-', Box::new(Expression::Binary('-', num(1.0), num(2.0))), num(3.0))
        );
    }

    #[test]
    fn mixed_precedence_chain() {
        // a < b + c * d - e  =>  a < ((b + (c * d)) - e)
        let product = Expression::Binary('*', var("c"), var("d"));
        let sum = Expression::Binary('+', var("b"), Box::new(product));
        let difference = Expression::Binary('-', Box::new(sum), var("e"));
        assert_eq!(
            parse_expr("a < b + c * d - e").unwrap(),
            Expression::Binary('<', var("a"), Box::new(difference))
        );
    }

    #[test]
    fn parentheses_are_transparent() {
        assert_eq!(parse_expr("(1 + 2)").unwrap(), parse_expr("1 + 2").unwrap());
        assert_eq!(parse_expr("((x))").unwrap(), *var("x"));
    }

    #[test]
    fn unknown_operator_ends_expression() {
        let mut parser = Parser::from_source("x % y");
        assert_eq!(parser.parse_expression().unwrap(), *var("x"));
        assert_eq!(parser.current_token().unwrap(), &Token::Char('%'));
    }

    #[test]
    fn custom_precedence() {
        let mut parser = Parser::from_source("a % b + c");
        parser.set_precedence('%', 50);
        assert_eq!(
            parser.parse_expression().unwrap(),
            Expression::Binary('+', Box::new(Expression::Binary('%', var("a"), var("b"))), var("c"))
        );
    }

    #[test]
    fn parse_call() {
        assert_eq!(
            parse_expr("foo(1, x + 2, bar())").unwrap(),
            Expression::Call(
                "foo".to_string(),
                vec![
                    Expression::Number(1.0),
                    Expression::Binary('+', var("x"), num(2.0)),
                    Expression::Call("bar".to_string(), vec![]),
                ]
            )
        );
    }

    #[test]
    fn call_requires_separator() {
        assert_eq!(
            parse_expr("foo(1 2)"),
            Err(ParseError::ExpectedArgumentSeparator(Token::Number(2.0)))
        );
    }

    #[test]
    fn missing_close_paren() {
        assert_eq!(parse_expr("(1 + 2"), Err(ParseError::ExpectedCloseParen(Token::Eof)));
    }

    #[test]
    fn missing_expression() {
        assert_eq!(parse_expr(")"), Err(ParseError::ExpectedExpression(Token::Char(')'))));
        assert_eq!(parse_expr("1 +"), Err(ParseError::ExpectedExpression(Token::Eof)));
    }

    #[test]
    fn parse_definition_works() {
        let mut parser = Parser::from_source("def add(x y) x + y");
        assert_eq!(
            parser.parse_definition().unwrap(),
            TopLevel::Definition(Function {
                prototype: Prototype {
                    name: "add".to_string(),
                    args: vec!["x".to_string(), "y".to_string()],
                },
                body: Expression::Binary('+', var("x"), var("y")),
            })
        );
    }

    #[test]
    fn parse_extern_works() {
        let mut parser = Parser::from_source("extern sin(a)");
        assert_eq!(
            parser.parse_extern().unwrap(),
            TopLevel::Extern(Prototype {
                name: "sin".to_string(),
                args: vec!["a".to_string()],
            })
        );
    }

    #[test]
    fn prototype_errors() {
        assert_eq!(
            Parser::from_source("def (").parse_definition(),
            Err(ParseError::ExpectedFunctionName(Token::Char('(')))
        );
        assert_eq!(
            Parser::from_source("extern foo x").parse_extern(),
            Err(ParseError::ExpectedPrototypeOpen(Token::Ident("x".to_string())))
        );
        // parameters are not comma separated
        assert_eq!(
            Parser::from_source("extern foo(a, b)").parse_extern(),
            Err(ParseError::ExpectedPrototypeClose(Token::Char(',')))
        );
    }

    #[test]
    fn top_level_expression_is_anonymous_function() {
        let mut parser = Parser::from_source("1 + 1;");
        let item = parser.parse_top_level_expression().unwrap();
        assert_eq!(item.prototype(), &Prototype::anonymous());
        assert_eq!(parser.current_token().unwrap(), &Token::Char(';'));
    }

    #[test]
    fn lex_errors_surface_as_parse_errors() {
        assert_eq!(
            parse_expr("1.2.3"),
            Err(ParseError::Lex(LexError::InvalidNumber("1.2.3".to_string())))
        );
    }

    #[test]
    fn long_chains_do_not_recurse() {
        let input = vec!["1"; 20_000].join("+");
        let mut parser = Parser::from_source(&input);
        assert!(matches!(parser.parse_expression(), Ok(Expression::Binary('+', _, _))));
    }

    #[test]
    fn nesting_is_limited() {
        let nested = |levels: usize| format!("{}1{}", "(".repeat(levels), ")".repeat(levels));

        assert_eq!(parse_expr(&nested(MAX_NESTING - 1)), Ok(Expression::Number(1.0)));
        assert_eq!(
            parse_expr(&nested(MAX_NESTING + 10)),
            Err(ParseError::NestingTooDeep(MAX_NESTING))
        );
        assert_eq!(
            parse_expr(&format!("f({}1{})", "g(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING))),
            Err(ParseError::NestingTooDeep(MAX_NESTING))
        );
    }
}
