//! Backends realise the operations the code generator emits.
//!
//! The generator only ever talks to the [`Backend`] trait, so the same front end
//! drives the in-process [`ir`] module or, with the `llvm` feature, an LLVM
//! module built through inkwell.

use std::fmt;

pub mod eval;
pub mod ir;
#[cfg(feature = "llvm")]
pub mod llvm;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    pub fn from_char(op: char) -> Option<ArithOp> {
        match op {
            '+' => Some(ArithOp::Add),
            '-' => Some(ArithOp::Sub),
            '*' => Some(ArithOp::Mul),
            _ => None,
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ArithOp::Add => lhs + rhs,
            ArithOp::Sub => lhs - rhs,
            ArithOp::Mul => lhs * rhs,
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "fadd"),
            ArithOp::Sub => write!(f, "fsub"),
            ArithOp::Mul => write!(f, "fmul"),
        }
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("no function body is being built")]
    NoActiveFunction,
    #[error("function {0} is already being built")]
    AlreadyBuilding(String),
    #[error("parameter {index} out of range for {function}")]
    ParameterOutOfRange { function: String, index: usize },
    #[error("operand is not a {0}")]
    TypeMismatch(&'static str),
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
    #[error("{function} is still called with {old} args, cannot redeclare it with {new}")]
    ArityChanged {
        function: String,
        old: usize,
        new: usize,
    },
}

/// The capability set the code generator needs from an IR builder.
///
/// `Value` is an opaque handle to an emitted value, `Function` a handle to a
/// declared function and `Scope` the function body currently under
/// construction. At most one body is open at a time.
pub trait Backend {
    type Value: Clone;
    type Function: Clone;
    type Scope;

    fn define_constant(&mut self, value: f64) -> Result<Self::Value, BackendError>;

    fn binary_arithmetic(
        &mut self,
        op: ArithOp,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError>;

    /// Unordered less-than: true when either side is NaN.
    fn compare_less_than(
        &mut self,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError>;

    /// Turn a boolean produced by a comparison back into `0.0` or `1.0`.
    fn widen_bool_to_float(&mut self, value: Self::Value) -> Result<Self::Value, BackendError>;

    /// Declare `name` taking `arity` floats, replacing any previous declaration.
    /// A backend that binds calls eagerly may refuse to change the arity of a
    /// function that already has callers.
    fn declare_function(&mut self, name: &str, arity: usize)
        -> Result<Self::Function, BackendError>;

    fn lookup_function(&self, name: &str) -> Option<Self::Function>;

    fn call(
        &mut self,
        function: &Self::Function,
        args: Vec<Self::Value>,
    ) -> Result<Self::Value, BackendError>;

    fn begin_function_body(
        &mut self,
        function: &Self::Function,
        params: &[String],
    ) -> Result<Self::Scope, BackendError>;

    /// The input slot bound to parameter `index` of the open body.
    fn parameter(&mut self, scope: &Self::Scope, index: usize) -> Result<Self::Value, BackendError>;

    /// Close the open body by returning `value`.
    fn return_value(
        &mut self,
        scope: Self::Scope,
        value: Self::Value,
    ) -> Result<Self::Function, BackendError>;

    /// Drop a function whose body failed to generate.
    fn discard_function(&mut self, function: Self::Function);
}
