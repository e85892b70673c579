//! Interpreter for the in-process IR, plus the natives externs resolve to.

use std::{
    collections::HashMap,
    io::{self, Write},
};

use lazy_static::lazy_static;
use log::trace;

use super::ir::{Instruction, Module, Reg};

/// Deepest call chain the interpreter will follow. The language has no
/// conditionals, so any recursion is unbounded and ends here.
pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("extern {0} has no native implementation")]
    UnresolvedExtern(String),
    #[error("invalid number of args in call {0} expected {1} found {2}")]
    ArityMismatch(String, usize, usize),
    #[error("call depth exceeded {0} while calling {1}")]
    StackOverflow(usize, String),
    #[error("register {0} holds the wrong kind of value in {1}")]
    InvalidOperand(Reg, String),
}

#[derive(Clone, Copy)]
pub enum Native {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
}

impl Native {
    pub fn arity(&self) -> usize {
        match self {
            Native::Unary(_) => 1,
            Native::Binary(_) => 2,
        }
    }

    fn invoke(&self, args: &[f64]) -> f64 {
        match (self, args) {
            (Native::Unary(func), [x]) => func(*x),
            (Native::Binary(func), [x, y]) => func(*x, *y),
            _ => f64::NAN,
        }
    }
}

fn putchard(x: f64) -> f64 {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = write!(handle, "{}", (x as u8) as char);
    let _ = handle.flush();
    0.0
}

fn printd(x: f64) -> f64 {
    println!("{}", x);
    0.0
}

lazy_static! {
    /// Host functions an `extern` declaration binds to by name.
    pub static ref NATIVES: HashMap<&'static str, Native> = {
        let mut natives = HashMap::new();
        natives.insert("sin", Native::Unary(f64::sin));
        natives.insert("cos", Native::Unary(f64::cos));
        natives.insert("tan", Native::Unary(f64::tan));
        natives.insert("atan", Native::Unary(f64::atan));
        natives.insert("sqrt", Native::Unary(f64::sqrt));
        natives.insert("exp", Native::Unary(f64::exp));
        natives.insert("log", Native::Unary(f64::ln));
        natives.insert("fabs", Native::Unary(f64::abs));
        natives.insert("floor", Native::Unary(f64::floor));
        natives.insert("ceil", Native::Unary(f64::ceil));
        natives.insert("atan2", Native::Binary(f64::atan2));
        natives.insert("pow", Native::Binary(f64::powf));
        natives.insert("fmod", Native::Binary(|x, y| x % y));
        natives.insert("putchard", Native::Unary(putchard));
        natives.insert("printd", Native::Unary(printd));
        natives
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Float(f64),
    Bool(bool),
}

impl Module {
    /// Run `name` with `args` and return its result.
    pub fn execute(&self, name: &str, args: &[f64]) -> Result<f64, ExecError> {
        self.execute_at(name, args, 0)
    }

    fn execute_at(&self, name: &str, args: &[f64], depth: usize) -> Result<f64, ExecError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(ExecError::StackOverflow(MAX_CALL_DEPTH, name.to_string()));
        }

        let func = self
            .function(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))?;
        if func.arity != args.len() {
            return Err(ExecError::ArityMismatch(name.to_string(), func.arity, args.len()));
        }

        let body = match &func.body {
            Some(body) => body,
            None => return self.call_native(name, args),
        };
        trace!("executing {} at depth {}", name, depth);

        let float = |slots: &[Slot], reg: Reg| match slots.get(reg.0 as usize) {
            Some(Slot::Float(value)) => Ok(*value),
            _ => Err(ExecError::InvalidOperand(reg, name.to_string())),
        };

        let mut slots = Vec::with_capacity(body.instructions.len());
        for inst in &body.instructions {
            let slot = match inst {
                Instruction::Const(value) => Slot::Float(*value),
                Instruction::Param(index) => match args.get(*index) {
                    Some(arg) => Slot::Float(*arg),
                    None => {
                        let reg = Reg(slots.len() as u32);
                        return Err(ExecError::InvalidOperand(reg, name.to_string()));
                    }
                },
                Instruction::Arith(op, lhs, rhs) => {
                    Slot::Float(op.apply(float(&slots, *lhs)?, float(&slots, *rhs)?))
                }
                Instruction::CmpUlt(lhs, rhs) => {
                    let (lhs, rhs) = (float(&slots, *lhs)?, float(&slots, *rhs)?);
                    Slot::Bool(!(lhs >= rhs))
                }
                Instruction::BoolToFloat(reg) => match slots.get(reg.0 as usize) {
                    Some(Slot::Bool(flag)) => Slot::Float(if *flag { 1.0 } else { 0.0 }),
                    _ => return Err(ExecError::InvalidOperand(*reg, name.to_string())),
                },
                Instruction::Call(callee, call_args) => {
                    let values = call_args
                        .iter()
                        .map(|reg| float(&slots, *reg))
                        .collect::<Result<Vec<f64>, ExecError>>()?;
                    Slot::Float(self.execute_at(callee, &values, depth + 1)?)
                }
            };
            slots.push(slot);
        }

        float(&slots, body.ret)
    }

    fn call_native(&self, name: &str, args: &[f64]) -> Result<f64, ExecError> {
        let native = NATIVES
            .get(name)
            .ok_or_else(|| ExecError::UnresolvedExtern(name.to_string()))?;
        if native.arity() != args.len() {
            return Err(ExecError::ArityMismatch(name.to_string(), native.arity(), args.len()));
        }
        Ok(native.invoke(args))
    }
}
