use std::collections::HashSet;

use inkwell::{
    builder::Builder,
    context::Context,
    module::Module,
    types::BasicTypeEnum,
    values::{BasicValue, BasicValueEnum, FunctionValue},
    FloatPredicate,
};

use super::{ArithOp, Backend, BackendError};

/// Emits LLVM IR through inkwell. Every value is an `f64` except the `i1`
/// produced by a comparison, which only lives until it is widened.
///
/// A function is only ever deleted while nothing has emitted a call to it;
/// `called` records every callee so that LLVM never frees a value with uses.
pub struct LlvmBackend<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    called: HashSet<String>,
}

impl<'a> LlvmBackend<'a> {
    pub fn new(context: &'a Context) -> LlvmBackend<'a> {
        let module = context.create_module("moffet");
        let builder = context.create_builder();

        LlvmBackend {
            context,
            module,
            builder,
            called: HashSet::new(),
        }
    }

    pub fn print_to_string(&self) -> String {
        self.module.print_to_string().to_string()
    }

    fn strip_body(function: FunctionValue<'a>) {
        for block in function.get_basic_blocks() {
            unsafe {
                let _ = block.delete();
            }
        }
    }

    fn float(value: BasicValueEnum<'a>) -> Result<inkwell::values::FloatValue<'a>, BackendError> {
        match value {
            BasicValueEnum::FloatValue(value) => Ok(value),
            _ => Err(BackendError::TypeMismatch("float")),
        }
    }
}

impl<'a> Backend for LlvmBackend<'a> {
    type Value = BasicValueEnum<'a>;
    type Function = FunctionValue<'a>;
    type Scope = FunctionValue<'a>;

    fn define_constant(&mut self, value: f64) -> Result<Self::Value, BackendError> {
        Ok(self.context.f64_type().const_float(value).into())
    }

    fn binary_arithmetic(
        &mut self,
        op: ArithOp,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError> {
        let (lhs, rhs) = (Self::float(lhs)?, Self::float(rhs)?);
        let value = match op {
            ArithOp::Add => self.builder.build_float_add(lhs, rhs, "addtmp"),
            ArithOp::Sub => self.builder.build_float_sub(lhs, rhs, "subtmp"),
            ArithOp::Mul => self.builder.build_float_mul(lhs, rhs, "multmp"),
        };
        Ok(value.into())
    }

    fn compare_less_than(
        &mut self,
        lhs: Self::Value,
        rhs: Self::Value,
    ) -> Result<Self::Value, BackendError> {
        let (lhs, rhs) = (Self::float(lhs)?, Self::float(rhs)?);
        Ok(self
            .builder
            .build_float_compare(FloatPredicate::ULT, lhs, rhs, "cmptmp")
            .into())
    }

    fn widen_bool_to_float(&mut self, value: Self::Value) -> Result<Self::Value, BackendError> {
        match value {
            BasicValueEnum::IntValue(flag) => Ok(self
                .builder
                .build_unsigned_int_to_float(flag, self.context.f64_type(), "booltmp")
                .into()),
            _ => Err(BackendError::TypeMismatch("boolean")),
        }
    }

    fn declare_function(
        &mut self,
        name: &str,
        arity: usize,
    ) -> Result<Self::Function, BackendError> {
        if let Some(existing) = self.module.get_function(name) {
            let old = existing.count_params() as usize;
            // last definition wins; keep the value so existing callers follow it
            if old == arity {
                Self::strip_body(existing);
                return Ok(existing);
            }
            if self.called.contains(name) {
                return Err(BackendError::ArityChanged {
                    function: name.to_string(),
                    old,
                    new: arity,
                });
            }
            unsafe {
                existing.delete();
            }
        }

        let args_types = std::iter::repeat(self.context.f64_type())
            .take(arity)
            .map(|f| f.into())
            .collect::<Vec<BasicTypeEnum>>();
        let fn_type = self.context.f64_type().fn_type(args_types.as_slice(), false);

        Ok(self.module.add_function(name, fn_type, None))
    }

    fn lookup_function(&self, name: &str) -> Option<Self::Function> {
        self.module.get_function(name)
    }

    fn call(
        &mut self,
        function: &Self::Function,
        args: Vec<Self::Value>,
    ) -> Result<Self::Value, BackendError> {
        let name = function.get_name().to_string_lossy().into_owned();
        self.called.insert(name.clone());
        self.builder
            .build_call(*function, args.as_slice(), "calltmp")
            .try_as_basic_value()
            .left()
            .ok_or(BackendError::InvalidFunction(name))
    }

    fn begin_function_body(
        &mut self,
        function: &Self::Function,
        params: &[String],
    ) -> Result<Self::Scope, BackendError> {
        for (arg, name) in function.get_param_iter().zip(params) {
            arg.into_float_value().set_name(name);
        }

        let entry = self.context.append_basic_block(*function, "entry");
        self.builder.position_at_end(entry);

        Ok(*function)
    }

    fn parameter(&mut self, scope: &Self::Scope, index: usize) -> Result<Self::Value, BackendError> {
        scope
            .get_nth_param(index as u32)
            .ok_or_else(|| BackendError::ParameterOutOfRange {
                function: scope.get_name().to_string_lossy().into_owned(),
                index,
            })
    }

    fn return_value(
        &mut self,
        scope: Self::Scope,
        value: Self::Value,
    ) -> Result<Self::Function, BackendError> {
        self.builder.build_return(Some(&value as &dyn BasicValue));

        if scope.verify(true) {
            Ok(scope)
        } else {
            Err(BackendError::InvalidFunction(
                scope.get_name().to_string_lossy().into_owned(),
            ))
        }
    }

    fn discard_function(&mut self, function: Self::Function) {
        Self::strip_body(function);
        // a called function stays behind as a bare declaration
        if !self.called.contains(function.get_name().to_string_lossy().as_ref()) {
            unsafe {
                function.delete();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;

    use pretty_assertions::assert_eq;

    use super::LlvmBackend;
    use crate::backend::BackendError;
    use crate::codegen::{Codegen, CodegenError};
    use crate::parser::Parser;

    #[test]
    fn codegen_works() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context));
        let mut parser = Parser::from_source("extern sin(x) def thing(x) sin(x) * x");

        let sin = parser.parse_extern().unwrap();
        let thing = parser.parse_definition().unwrap();
        codegen.generate(&sin).unwrap();
        codegen.generate(&thing).unwrap();

        let ir = codegen.backend().print_to_string();
        assert!(ir.contains("declare double @sin(double)"));
        assert!(ir.contains("define double @thing(double %x)"));
        assert!(ir.contains("fmul double"));
    }

    #[test]
    fn called_functions_are_never_deleted() {
        let context = Context::create();
        let mut codegen = Codegen::new(LlvmBackend::new(&context));
        let mut parser =
            Parser::from_source("def base() 1 def twice() base() * 2 def base(x) x def twice() y");

        let base = parser.parse_definition().unwrap();
        let twice = parser.parse_definition().unwrap();
        let base_again = parser.parse_definition().unwrap();
        let broken_twice = parser.parse_definition().unwrap();
        codegen.generate(&base).unwrap();
        codegen.generate(&twice).unwrap();

        assert_eq!(
            codegen.generate(&base_again),
            Err(CodegenError::Backend(BackendError::ArityChanged {
                function: "base".to_string(),
                old: 0,
                new: 1,
            }))
        );
        assert_eq!(codegen.arity("base"), Some(0));

        // twice is not called by anything, so a failed redefinition may drop it
        assert!(codegen.generate(&broken_twice).is_err());
        assert!(codegen.backend().module.get_function("twice").is_none());
        assert!(codegen.backend().module.get_function("base").is_some());
        assert!(codegen.backend().module.verify().is_ok());
    }
}
