/// Name given to the function wrapping a bare top-level expression. It cannot be
/// lexed as an identifier, so user code never calls it directly.
pub const ANONYMOUS_FUNCTION: &str = "__anon_expr";

#[derive(Debug, PartialEq, Clone)]
pub struct Prototype {
    pub name: String,
    pub args: Vec<String>,
}

impl Prototype {
    pub fn anonymous() -> Self {
        Prototype {
            name: ANONYMOUS_FUNCTION.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Number(f64),
    Variable(String),
    Binary(char, Box<Expression>, Box<Expression>),
    Call(String, Vec<Expression>),
}

impl Expression {
    fn has_children(&self) -> bool {
        match self {
            Expression::Binary(..) => true,
            Expression::Call(_, args) => !args.is_empty(),
            _ => false,
        }
    }

    /// Move out every child that has children of its own.
    fn detach_subtrees(&mut self, out: &mut Vec<Expression>) {
        match self {
            Expression::Binary(_, lhs, rhs) => {
                for side in [lhs, rhs].iter_mut() {
                    if side.has_children() {
                        out.push(std::mem::replace(&mut ***side, Expression::Number(0.0)));
                    }
                }
            }
            Expression::Call(_, args) => {
                out.extend(args.drain(..).filter(Expression::has_children));
            }
            _ => {}
        }
    }
}

// Long operator chains nest one level per term, so tear trees down with a
// work list instead of recursing.
impl Drop for Expression {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_subtrees(&mut pending);
        while let Some(mut expr) = pending.pop() {
            expr.detach_subtrees(&mut pending);
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expression,
}

/// One form accepted directly by the driver.
#[derive(Debug, PartialEq, Clone)]
pub enum TopLevel {
    Definition(Function),
    Extern(Prototype),
    /// A bare expression, wrapped in an anonymous nullary function.
    Expression(Function),
}

impl TopLevel {
    pub fn prototype(&self) -> &Prototype {
        match self {
            TopLevel::Definition(func) | TopLevel::Expression(func) => &func.prototype,
            TopLevel::Extern(proto) => proto,
        }
    }
}
