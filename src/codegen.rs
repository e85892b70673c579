use std::collections::HashMap;

use log::debug;

use crate::ast::{Expression, Function, Prototype, TopLevel};
use crate::backend::{ArithOp, Backend, BackendError};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("invalid binary operator {0}")]
    InvalidOperator(char),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("invalid number of args in call {callee} expected {expected} found {found}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("parameter {1} appears more than once in {0}")]
    DuplicateParameter(String, String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

enum Work<'e, F> {
    Visit(&'e Expression),
    Binary(char),
    Call(F, usize),
}

/// Lowers top-level forms into backend operations.
///
/// Owns the signature registry (function name to arity) and the variable
/// scope of the definition currently being generated. Both persist across
/// forms until [`Codegen::reset`].
pub struct Codegen<B: Backend> {
    backend: B,
    functions: HashMap<String, usize>,
    named_values: HashMap<String, B::Value>,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Self {
        Codegen {
            backend,
            functions: HashMap::new(),
            named_values: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Registered arity of `name`, if any.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    /// Forget every registered signature and binding. Backend state is kept.
    pub fn reset(&mut self) {
        self.functions.clear();
        self.named_values.clear();
    }

    /// Lowers `expr` with an explicit work list, since operator chains nest
    /// one level per term. Operands are generated left to right and the first
    /// failure wins.
    fn codegen_expr(&mut self, expr: &Expression) -> Result<B::Value, CodegenError> {
        let mut work = vec![Work::Visit(expr)];
        let mut values: Vec<B::Value> = Vec::new();

        while let Some(item) = work.pop() {
            match item {
                Work::Visit(Expression::Number(value)) => {
                    values.push(self.backend.define_constant(*value)?);
                }
                Work::Visit(Expression::Variable(name)) => match self.named_values.get(name) {
                    Some(var) => values.push(var.clone()),
                    None => return Err(CodegenError::UnknownVariable(name.clone())),
                },
                Work::Visit(Expression::Binary(op, left, right)) => {
                    work.push(Work::Binary(*op));
                    work.push(Work::Visit(right));
                    work.push(Work::Visit(left));
                }
                Work::Visit(Expression::Call(callee, args)) => {
                    let expected = match self.functions.get(callee) {
                        Some(arity) => *arity,
                        None => return Err(CodegenError::UnknownFunction(callee.clone())),
                    };
                    if expected != args.len() {
                        return Err(CodegenError::ArityMismatch {
                            callee: callee.clone(),
                            expected,
                            found: args.len(),
                        });
                    }

                    let func = self
                        .backend
                        .lookup_function(callee)
                        .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                    work.push(Work::Call(func, args.len()));
                    work.extend(args.iter().rev().map(Work::Visit));
                }
                Work::Binary(op) => {
                    let (lhs, rhs) = match (values.pop(), values.pop()) {
                        (Some(rhs), Some(lhs)) => (lhs, rhs),
                        _ => return Err(CodegenError::Backend(BackendError::NoActiveFunction)),
                    };

                    if let Some(arith) = ArithOp::from_char(op) {
                        values.push(self.backend.binary_arithmetic(arith, lhs, rhs)?);
                        continue;
                    }
                    match op {
                        '<' => {
                            let cmp = self.backend.compare_less_than(lhs, rhs)?;
                            values.push(self.backend.widen_bool_to_float(cmp)?);
                        }
                        _ => return Err(CodegenError::InvalidOperator(op)),
                    }
                }
                Work::Call(func, argc) => {
                    let gened_args = values.split_off(values.len() - argc);
                    values.push(self.backend.call(&func, gened_args)?);
                }
            }
        }

        values
            .pop()
            .ok_or(CodegenError::Backend(BackendError::NoActiveFunction))
    }

    fn compile_proto(&mut self, proto: &Prototype) -> Result<B::Function, CodegenError> {
        let func = self.backend.declare_function(&proto.name, proto.args.len())?;
        self.functions.insert(proto.name.clone(), proto.args.len());
        Ok(func)
    }

    fn compile_fn(&mut self, function: &Function) -> Result<B::Function, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;

        for (i, arg) in proto.args.iter().enumerate() {
            if proto.args[..i].contains(arg) {
                return Err(CodegenError::DuplicateParameter(proto.name.clone(), arg.clone()));
            }
        }

        let func = self.compile_proto(proto)?;
        match self.compile_body(&func, proto, body) {
            Ok(func) => Ok(func),
            Err(err) => {
                debug!("discarding {} after failed codegen", proto.name);
                self.functions.remove(&proto.name);
                self.backend.discard_function(func);
                Err(err)
            }
        }
    }

    fn compile_body(
        &mut self,
        func: &B::Function,
        proto: &Prototype,
        body: &Expression,
    ) -> Result<B::Function, CodegenError> {
        let scope = self.backend.begin_function_body(func, &proto.args)?;

        self.named_values.clear();
        self.named_values.reserve(proto.args.len());
        for (i, arg) in proto.args.iter().enumerate() {
            let value = self.backend.parameter(&scope, i)?;
            self.named_values.insert(arg.clone(), value);
        }

        let body = self.codegen_expr(body);
        self.named_values.clear();

        Ok(self.backend.return_value(scope, body?)?)
    }

    pub fn generate(&mut self, item: &TopLevel) -> Result<B::Function, CodegenError> {
        let res = match item {
            TopLevel::Definition(func) | TopLevel::Expression(func) => self.compile_fn(func),
            TopLevel::Extern(proto) => self.compile_proto(proto),
        };
        if res.is_ok() {
            debug!("generated {}", item.prototype().name);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::ANONYMOUS_FUNCTION;
    use crate::backend::ir::IrBackend;
    use crate::lexer::Token;
    use crate::parser::Parser;

    fn generate_all(codegen: &mut Codegen<IrBackend>, input: &str) -> Result<(), CodegenError> {
        let mut parser = Parser::from_source(input);
        let item = match parser.current_token().unwrap().clone() {
            Token::Def => parser.parse_definition(),
            Token::Extern => parser.parse_extern(),
            _ => parser.parse_top_level_expression(),
        }
        .unwrap();
        codegen.generate(&item).map(|_| ())
    }

    fn eval(codegen: &Codegen<IrBackend>) -> f64 {
        codegen.backend().module().execute(ANONYMOUS_FUNCTION, &[]).unwrap()
    }

    #[test]
    fn codegen_works() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "extern sin(x)").unwrap();
        generate_all(&mut codegen, "def thing(x) sin(x) * x").unwrap();
        generate_all(&mut codegen, "thing(0) + 2 * 3").unwrap();

        assert_eq!(eval(&codegen), 6.0);
        assert_eq!(codegen.arity("thing"), Some(1));
    }

    #[test]
    fn call_arity_is_checked() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "extern foo(a b)").unwrap();

        assert_eq!(
            generate_all(&mut codegen, "foo(1)"),
            Err(CodegenError::ArityMismatch {
                callee: "foo".to_string(),
                expected: 2,
                found: 1,
            })
        );
        assert_eq!(generate_all(&mut codegen, "foo(1, 2)"), Ok(()));
    }

    #[test]
    fn unknown_names() {
        let mut codegen = Codegen::new(IrBackend::default());
        assert_eq!(
            generate_all(&mut codegen, "x"),
            Err(CodegenError::UnknownVariable("x".to_string()))
        );
        assert_eq!(
            generate_all(&mut codegen, "nope(1)"),
            Err(CodegenError::UnknownFunction("nope".to_string()))
        );
    }

    #[test]
    fn operators_without_lowering_are_rejected() {
        let mut codegen = Codegen::new(IrBackend::default());
        assert_eq!(
            generate_all(&mut codegen, "4 / 2"),
            Err(CodegenError::InvalidOperator('/'))
        );
        assert_eq!(
            generate_all(&mut codegen, "4 > 2"),
            Err(CodegenError::InvalidOperator('>'))
        );
    }

    #[test]
    fn comparison_widens_to_float() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "1 < 2").unwrap();
        assert_eq!(eval(&codegen), 1.0);
        generate_all(&mut codegen, "(3 < 2) + 5").unwrap();
        assert_eq!(eval(&codegen), 5.0);
    }

    #[test]
    fn scope_does_not_leak_between_functions() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "def id(x) x").unwrap();
        assert_eq!(
            generate_all(&mut codegen, "def other(y) x"),
            Err(CodegenError::UnknownVariable("x".to_string()))
        );
        assert_eq!(codegen.arity("other"), None);
        assert_eq!(codegen.backend().lookup_function("other"), None);
    }

    #[test]
    fn redefinition_overwrites() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "def f(x) x + 1").unwrap();
        generate_all(&mut codegen, "def f(x y) x * y").unwrap();
        assert_eq!(codegen.arity("f"), Some(2));

        generate_all(&mut codegen, "f(3, 4)").unwrap();
        assert_eq!(eval(&codegen), 12.0);
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        let mut codegen = Codegen::new(IrBackend::default());
        assert_eq!(
            generate_all(&mut codegen, "def f(x x) x"),
            Err(CodegenError::DuplicateParameter("f".to_string(), "x".to_string()))
        );
    }

    #[test]
    fn arguments_are_generated_left_to_right() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "def sub(a b) a - b").unwrap();
        generate_all(&mut codegen, "sub(10, 4)").unwrap();
        assert_eq!(eval(&codegen), 6.0);
    }

    #[test]
    fn reset_forgets_signatures() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "extern cos(x)").unwrap();
        codegen.reset();
        assert_eq!(
            generate_all(&mut codegen, "cos(0)"),
            Err(CodegenError::UnknownFunction("cos".to_string()))
        );
    }

    #[test]
    fn failing_operand_wins_over_operator() {
        let mut codegen = Codegen::new(IrBackend::default());
        assert_eq!(
            generate_all(&mut codegen, "x / 1"),
            Err(CodegenError::UnknownVariable("x".to_string()))
        );
        assert_eq!(
            generate_all(&mut codegen, "1 > y"),
            Err(CodegenError::UnknownVariable("y".to_string()))
        );
    }

    #[test]
    fn first_failing_argument_is_reported() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, "def f(a b) a").unwrap();
        assert_eq!(
            generate_all(&mut codegen, "f(p, q)"),
            Err(CodegenError::UnknownVariable("p".to_string()))
        );
        assert_eq!(
            generate_all(&mut codegen, "f(1, nope(2))"),
            Err(CodegenError::UnknownFunction("nope".to_string()))
        );
    }

    #[test]
    fn long_operator_chain() {
        let mut codegen = Codegen::new(IrBackend::default());
        generate_all(&mut codegen, &vec!["1"; 20_000].join("+")).unwrap();
        assert_eq!(eval(&codegen), 20_000.0);
    }
}
