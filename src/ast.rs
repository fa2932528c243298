use std::rc::Rc;

/// Name given to the function wrapping a bare top-level expression.
pub(crate) const ANON_FN: &str = "__anon_expr";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Variable(String),
    Unary(char, Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    For {
        var: String,
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum OperatorKind {
    None,
    Unary(char),
    Binary(char),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prototype {
    pub(crate) name: String,
    pub(crate) args: Vec<String>,
    pub(crate) kind: OperatorKind,
    pub(crate) precedence: i32,
}

impl Prototype {
    pub(crate) fn new(name: &str, args: Vec<String>) -> Prototype {
        Prototype {
            name: name.to_owned(),
            args,
            kind: OperatorKind::None,
            precedence: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn unary(op: char, arg: String) -> Prototype {
        Prototype {
            name: format!("unary{}", op),
            args: vec![arg],
            kind: OperatorKind::Unary(op),
            precedence: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn binary(op: char, precedence: i32, lhs: String, rhs: String) -> Prototype {
        Prototype {
            name: format!("binary{}", op),
            args: vec![lhs, rhs],
            kind: OperatorKind::Binary(op),
            precedence,
        }
    }
}

/// A prototype with a body. The prototype is shared with the registry of known functions.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Function {
    pub(crate) proto: Rc<Prototype>,
    pub(crate) body: Expr,
}

impl Function {
    pub(crate) fn new(proto: Prototype, body: Expr) -> Function {
        Function {
            proto: Rc::new(proto),
            body,
        }
    }

    pub(crate) fn anonymous(body: Expr) -> Function {
        Function::new(Prototype::new(ANON_FN, vec![]), body)
    }
}
