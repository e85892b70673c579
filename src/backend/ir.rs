//! In-process IR
//!
//! A register based IR where every instruction defines exactly one register,
//! numbered by its position in the function body. Calls are resolved by name
//! when the module is executed, so redefining a function affects every caller.

use std::fmt;

use super::{ArithOp, Backend, BackendError};

/// A virtual register, the result of the instruction at the same index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Const(f64),
    Param(usize),
    Arith(ArithOp, Reg, Reg),
    /// Unordered less-than, yields a boolean
    CmpUlt(Reg, Reg),
    BoolToFloat(Reg),
    Call(String, Vec<Reg>),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Const(value) => write!(f, "const {:?}", value),
            Instruction::Param(index) => write!(f, "param {}", index),
            Instruction::Arith(op, lhs, rhs) => write!(f, "{} {}, {}", op, lhs, rhs),
            Instruction::CmpUlt(lhs, rhs) => write!(f, "fcmp ult {}, {}", lhs, rhs),
            Instruction::BoolToFloat(reg) => write!(f, "uitofp {}", reg),
            Instruction::Call(callee, args) => {
                write!(f, "call {}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub params: Vec<String>,
    pub instructions: Vec<Instruction>,
    pub ret: Reg,
}

/// A declared function; externs never receive a body
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub arity: usize,
    pub body: Option<Body>,
}

impl fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            None => writeln!(f, "declare {}/{}", self.name, self.arity),
            Some(body) => {
                writeln!(f, "define {}({}) {{", self.name, body.params.join(" "))?;
                for (i, inst) in body.instructions.iter().enumerate() {
                    writeln!(f, "  {} = {}", Reg(i as u32), inst)?;
                }
                writeln!(f, "  ret {}", body.ret)?;
                writeln!(f, "}}")
            }
        }
    }
}

/// Functions in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub functions: Vec<FunctionDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|func| func.name == name)
    }

    fn function_mut(&mut self, name: &str) -> Option<&mut FunctionDecl> {
        self.functions.iter_mut().find(|func| func.name == name)
    }

    fn remove(&mut self, name: &str) {
        self.functions.retain(|func| func.name != name);
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for func in &self.functions {
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

/// Handle to a declared function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub name: String,
    pub arity: usize,
}

/// The body currently under construction
#[derive(Debug)]
pub struct BodyScope {
    function: FunctionRef,
}

struct OpenBody {
    function: FunctionRef,
    params: Vec<String>,
    instructions: Vec<Instruction>,
}

/// Builds a [`Module`] on behalf of the code generator
pub struct IrBackend {
    module: Module,
    current: Option<OpenBody>,
}

impl IrBackend {
    pub fn new(module_name: impl Into<String>) -> Self {
        IrBackend {
            module: Module::new(module_name),
            current: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    fn emit(&mut self, inst: Instruction) -> Result<Reg, BackendError> {
        let body = self.current.as_mut().ok_or(BackendError::NoActiveFunction)?;
        body.instructions.push(inst);
        Ok(Reg(body.instructions.len() as u32 - 1))
    }
}

impl Default for IrBackend {
    fn default() -> Self {
        IrBackend::new("moffet")
    }
}

impl Backend for IrBackend {
    type Value = Reg;
    type Function = FunctionRef;
    type Scope = BodyScope;

    fn define_constant(&mut self, value: f64) -> Result<Reg, BackendError> {
        self.emit(Instruction::Const(value))
    }

    fn binary_arithmetic(&mut self, op: ArithOp, lhs: Reg, rhs: Reg) -> Result<Reg, BackendError> {
        self.emit(Instruction::Arith(op, lhs, rhs))
    }

    fn compare_less_than(&mut self, lhs: Reg, rhs: Reg) -> Result<Reg, BackendError> {
        self.emit(Instruction::CmpUlt(lhs, rhs))
    }

    fn widen_bool_to_float(&mut self, value: Reg) -> Result<Reg, BackendError> {
        self.emit(Instruction::BoolToFloat(value))
    }

    fn declare_function(&mut self, name: &str, arity: usize) -> Result<FunctionRef, BackendError> {
        let decl = FunctionDecl {
            name: name.to_string(),
            arity,
            body: None,
        };
        match self.module.function_mut(name) {
            Some(existing) => *existing = decl,
            None => self.module.functions.push(decl),
        }

        Ok(FunctionRef {
            name: name.to_string(),
            arity,
        })
    }

    fn lookup_function(&self, name: &str) -> Option<FunctionRef> {
        self.module.function(name).map(|func| FunctionRef {
            name: func.name.clone(),
            arity: func.arity,
        })
    }

    fn call(&mut self, function: &FunctionRef, args: Vec<Reg>) -> Result<Reg, BackendError> {
        self.emit(Instruction::Call(function.name.clone(), args))
    }

    fn begin_function_body(
        &mut self,
        function: &FunctionRef,
        params: &[String],
    ) -> Result<BodyScope, BackendError> {
        if let Some(open) = &self.current {
            return Err(BackendError::AlreadyBuilding(open.function.name.clone()));
        }

        self.current = Some(OpenBody {
            function: function.clone(),
            params: params.to_vec(),
            instructions: Vec::new(),
        });
        Ok(BodyScope {
            function: function.clone(),
        })
    }

    fn parameter(&mut self, scope: &BodyScope, index: usize) -> Result<Reg, BackendError> {
        if index >= scope.function.arity {
            return Err(BackendError::ParameterOutOfRange {
                function: scope.function.name.clone(),
                index,
            });
        }
        self.emit(Instruction::Param(index))
    }

    fn return_value(&mut self, scope: BodyScope, value: Reg) -> Result<FunctionRef, BackendError> {
        let open = self.current.take().ok_or(BackendError::NoActiveFunction)?;
        let body = Body {
            params: open.params,
            instructions: open.instructions,
            ret: value,
        };

        match self.module.function_mut(&scope.function.name) {
            Some(decl) => decl.body = Some(body),
            None => return Err(BackendError::InvalidFunction(scope.function.name)),
        }
        Ok(scope.function)
    }

    fn discard_function(&mut self, function: FunctionRef) {
        if matches!(&self.current, Some(open) if open.function.name == function.name) {
            self.current = None;
        }
        self.module.remove(&function.name);
    }
}
