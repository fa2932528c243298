#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Def,
    Extern,
    If,
    Then,
    Else,
    For,
    In,
    Unary,
    Binary,
    Ident(String),
    Number(f64),
    Kwd(char),
    Eof,
}

impl Token {
    /// The operator character this token stands for, if it is a bare symbol.
    pub(crate) fn op_char(&self) -> Option<char> {
        match self {
            Token::Kwd(c) => Some(*c),
            _ => None,
        }
    }
}
