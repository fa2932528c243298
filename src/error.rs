use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

#[derive(Debug)]
pub(crate) struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Debug, PartialEq, Fail)]
pub(crate) enum ErrorKind {
    #[fail(display = "lexical error: {}", _0)]
    Lex(String),
    #[fail(display = "{}", _0)]
    Syntax(&'static str),
    #[fail(display = "invalid precedence: must be 1..100")]
    InvalidPrecedence,
    #[fail(display = "invalid number of operands for operator")]
    InvalidOperands,
    #[fail(display = "unknown variable name: {}", _0)]
    UnknownVariable(String),
    #[fail(display = "unknown function referenced: {}", _0)]
    UnknownFunction(String),
    #[fail(
        display = "incorrect number of arguments passed: expected {}, found {}",
        expected, found
    )]
    ArgumentCount { expected: usize, found: usize },
    #[fail(display = "function cannot be redefined: {}", _0)]
    Redefinition(String),
    #[fail(display = "function redeclared with a different number of arguments: {}", _0)]
    SignatureMismatch(String),
    #[fail(display = "unknown unary operator: {}", _0)]
    UnknownUnaryOperator(char),
    #[fail(display = "unknown binary operator: {}", _0)]
    UnknownBinaryOperator(char),
    #[fail(display = "function failed verification: {}", _0)]
    Verify(String),
    #[fail(display = "runtime error: {}", _0)]
    Runtime(String),
    #[fail(display = "couldn't read file: {}", _0)]
    Io(String),
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)?;
        if let Some(cause) = self.inner.cause() {
            write!(f, " ({})", cause)?;
        }
        Ok(())
    }
}

impl Error {
    pub(crate) fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}
