use super::ast::{Expr, Function, OperatorKind, Prototype};
use super::error::{Error, ErrorKind};
use super::lexer::Lexer;
use super::operator::{OperatorTable, DEFAULT_PRECEDENCE, MAX_PRECEDENCE, MIN_PRECEDENCE};
use super::token::Token;
use std::io::BufRead;

fn syntax<T>(msg: &'static str) -> Result<T, Error> {
    Err(ErrorKind::Syntax(msg).into())
}

/// Recursive-descent parser with precedence climbing for binary operators.
///
/// The parser owns the operator table: declaring a `binary` operator makes it
/// available to everything parsed afterwards, including the body of its own
/// definition.
pub(crate) struct Parser {
    lexer: Lexer,
    ops: OperatorTable,
    cur: Option<Token>,
}

impl Parser {
    pub(crate) fn new(lexer: Lexer) -> Parser {
        Parser {
            lexer,
            ops: OperatorTable::default(),
            cur: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_str(s: &str) -> Parser {
        Parser::new(Lexer::from_str(s))
    }

    pub(crate) fn set_source(&mut self, source: Box<dyn BufRead>) {
        self.lexer.set_source(source);
        self.cur = None;
    }

    #[cfg(test)]
    pub(crate) fn operators(&self) -> &OperatorTable {
        &self.ops
    }

    /// The current token, read from the lexer only once something asks for it.
    pub(crate) fn peek(&mut self) -> Result<Token, Error> {
        let tok = match self.cur.take() {
            Some(tok) => tok,
            None => self.lexer.next_token()?,
        };
        Ok(self.cur.insert(tok).clone())
    }

    pub(crate) fn bump(&mut self) {
        self.cur = None;
    }

    fn eat(&mut self, tok: Token, msg: &'static str) -> Result<(), Error> {
        if self.peek()? != tok {
            return syntax(msg);
        }
        self.bump();
        Ok(())
    }

    fn expect(&mut self, c: char, msg: &'static str) -> Result<(), Error> {
        self.eat(Token::Kwd(c), msg)
    }

    fn current_binop(&mut self) -> Result<Option<(char, i32)>, Error> {
        Ok(self
            .peek()?
            .op_char()
            .and_then(|c| self.ops.precedence(c).map(|p| (c, p))))
    }

    fn parse_paren(&mut self) -> Result<Expr, Error> {
        self.bump(); // '('
        let e = self.parse_expression()?;
        self.expect(')', "expected ')'")?;
        Ok(e)
    }

    fn parse_identifier(&mut self, id: String) -> Result<Expr, Error> {
        self.bump();
        if self.peek()? != Token::Kwd('(') {
            return Ok(Expr::Variable(id));
        }
        self.bump();

        let mut args = Vec::new();
        if self.peek()? != Token::Kwd(')') {
            loop {
                args.push(self.parse_expression()?);
                match self.peek()? {
                    Token::Kwd(')') => break,
                    Token::Kwd(',') => self.bump(),
                    _ => return syntax("expected ')' or ',' in argument list"),
                }
            }
        }
        self.bump(); // ')'

        Ok(Expr::Call(id, args))
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        match self.peek()? {
            Token::Ident(id) => self.parse_identifier(id),
            Token::Number(n) => {
                self.bump();
                Ok(Expr::Number(n))
            }
            Token::Kwd('(') => self.parse_paren(),
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            _ => syntax("unknown token when expecting an expression"),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        match self.peek()? {
            Token::Kwd(c) if c.is_ascii() && c != '(' && c != '.' => {
                self.bump();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(c, Box::new(operand)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_bin_op_rhs(&mut self, expr_prec: i32, mut lhs: Expr) -> Result<Expr, Error> {
        loop {
            let (op, tok_prec) = match self.current_binop()? {
                Some((op, prec)) if prec >= expr_prec => (op, prec),
                _ => return Ok(lhs),
            };
            self.bump();

            let mut rhs = self.parse_unary()?;
            if let Some((_, next_prec)) = self.current_binop()? {
                if tok_prec < next_prec {
                    rhs = self.parse_bin_op_rhs(tok_prec + 1, rhs)?;
                }
            }

            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    pub(crate) fn parse_expression(&mut self) -> Result<Expr, Error> {
        let lhs = self.parse_unary()?;
        self.parse_bin_op_rhs(0, lhs)
    }

    fn parse_if(&mut self) -> Result<Expr, Error> {
        self.bump(); // if
        let cond = self.parse_expression()?;

        self.eat(Token::Then, "expected then")?;
        let then = self.parse_expression()?;

        self.eat(Token::Else, "expected else")?;
        let els = self.parse_expression()?;

        Ok(Expr::If(Box::new(cond), Box::new(then), Box::new(els)))
    }

    fn parse_for(&mut self) -> Result<Expr, Error> {
        self.bump(); // for

        let var = match self.peek()? {
            Token::Ident(id) => id,
            _ => return syntax("expected identifier after for"),
        };
        self.bump();

        self.expect('=', "expected '=' after for")?;
        let start = self.parse_expression()?;
        self.expect(',', "expected ',' after for start value")?;
        let end = self.parse_expression()?;

        let step = if self.peek()? == Token::Kwd(',') {
            self.bump();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        self.eat(Token::In, "expected 'in' after for")?;
        let body = self.parse_expression()?;

        Ok(Expr::For {
            var,
            start: Box::new(start),
            end: Box::new(end),
            step,
            body: Box::new(body),
        })
    }

    fn operator_char(&mut self, msg: &'static str) -> Result<char, Error> {
        match self.peek()? {
            Token::Kwd(c) if c.is_ascii() => {
                self.bump();
                Ok(c)
            }
            _ => syntax(msg),
        }
    }

    fn parse_prototype(&mut self) -> Result<Prototype, Error> {
        let (name, kind, precedence) = match self.peek()? {
            Token::Ident(id) => {
                self.bump();
                (id, OperatorKind::None, 0)
            }
            Token::Unary => {
                self.bump();
                let op = self.operator_char("expected unary operator")?;
                (format!("unary{}", op), OperatorKind::Unary(op), 0)
            }
            Token::Binary => {
                self.bump();
                let op = self.operator_char("expected binary operator")?;
                let mut precedence = DEFAULT_PRECEDENCE;
                if let Token::Number(n) = self.peek()? {
                    if n < f64::from(MIN_PRECEDENCE) || n > f64::from(MAX_PRECEDENCE) {
                        return Err(ErrorKind::InvalidPrecedence.into());
                    }
                    precedence = n as i32;
                    self.bump();
                }
                (format!("binary{}", op), OperatorKind::Binary(op), precedence)
            }
            _ => return syntax("expected function name in prototype"),
        };

        self.expect('(', "expected '(' in prototype")?;
        let mut args = Vec::new();
        while let Token::Ident(arg) = self.peek()? {
            args.push(arg);
            self.bump();
        }
        self.expect(')', "expected ')' in prototype")?;

        let operands = match kind {
            OperatorKind::None => args.len(),
            OperatorKind::Unary(_) => 1,
            OperatorKind::Binary(_) => 2,
        };
        if args.len() != operands {
            return Err(ErrorKind::InvalidOperands.into());
        }

        Ok(Prototype {
            name,
            args,
            kind,
            precedence,
        })
    }

    /// Makes a binary operator's precedence visible to the rest of the parse.
    fn install_operator(&mut self, proto: &Prototype) -> Result<Option<(char, Option<i32>)>, Error> {
        match proto.kind {
            OperatorKind::Binary(op) => Ok(Some((op, self.ops.install(op, proto.precedence)?))),
            _ => Ok(None),
        }
    }

    pub(crate) fn definition(&mut self) -> Result<Function, Error> {
        self.eat(Token::Def, "expected 'def'")?;
        let proto = self.parse_prototype()?;
        let installed = self.install_operator(&proto)?;

        match self.parse_expression() {
            Ok(body) => Ok(Function::new(proto, body)),
            Err(e) => {
                if let Some((op, previous)) = installed {
                    self.ops.restore(op, previous);
                }
                Err(e)
            }
        }
    }

    pub(crate) fn extern_parser(&mut self) -> Result<Prototype, Error> {
        self.eat(Token::Extern, "expected 'extern'")?;
        let proto = self.parse_prototype()?;
        self.install_operator(&proto)?;
        Ok(proto)
    }

    pub(crate) fn toplevel(&mut self) -> Result<Function, Error> {
        let e = self.parse_expression()?;
        Ok(Function::anonymous(e))
    }
}

#[cfg(test)]
mod test {
    use super::super::ast::ANON_FN;
    use super::*;

    fn num(n: f64) -> Expr {
        Expr::Number(n)
    }

    fn var(s: &str) -> Expr {
        Expr::Variable(s.to_owned())
    }

    fn bin(op: char, l: Expr, r: Expr) -> Expr {
        Expr::Binary(op, Box::new(l), Box::new(r))
    }

    fn expr(s: &str) -> Result<Expr, Error> {
        Parser::from_str(s).parse_expression()
    }

    fn syntax_message(e: Error) -> &'static str {
        match e.kind() {
            ErrorKind::Syntax(msg) => msg,
            k => panic!("not a syntax error: {:?}", k),
        }
    }

    #[test]
    fn test_primary() {
        assert_eq!(expr("1.0").unwrap(), num(1.0));
        assert_eq!(expr("y").unwrap(), var("y"));
        assert_eq!(expr("(y)").unwrap(), var("y"));
    }

    #[test]
    fn test_expr() {
        assert_eq!(expr("1+2").unwrap(), bin('+', num(1.0), num(2.0)));
        assert_eq!(
            expr("1+2*3").unwrap(),
            bin('+', num(1.0), bin('*', num(2.0), num(3.0)))
        );
        assert_eq!(
            expr("(1+2)*3").unwrap(),
            bin('*', bin('+', num(1.0), num(2.0)), num(3.0))
        );
        assert_eq!(
            expr("a < b + 1").unwrap(),
            bin('<', var("a"), bin('+', var("b"), num(1.0)))
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            expr("8-4-2").unwrap(),
            bin('-', bin('-', num(8.0), num(4.0)), num(2.0))
        );
        assert_eq!(
            expr("1*2+3*4-5").unwrap(),
            bin(
                '-',
                bin('+', bin('*', num(1.0), num(2.0)), bin('*', num(3.0), num(4.0))),
                num(5.0)
            )
        );
    }

    #[test]
    fn test_unknown_operator_ends_expression() {
        let mut p = Parser::from_str("1 % 2");
        assert_eq!(p.parse_expression().unwrap(), num(1.0));
        assert_eq!(p.peek().unwrap(), Token::Kwd('%'));
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            expr("!x").unwrap(),
            Expr::Unary('!', Box::new(var("x")))
        );
        assert_eq!(
            expr("-!1 + 2").unwrap(),
            bin(
                '+',
                Expr::Unary('-', Box::new(Expr::Unary('!', Box::new(num(1.0))))),
                num(2.0)
            )
        );
    }

    #[test]
    fn test_call() {
        assert_eq!(
            expr("foo(y, 4.0)").unwrap(),
            Expr::Call("foo".to_owned(), vec![var("y"), num(4.0)])
        );
        assert_eq!(expr("foo()").unwrap(), Expr::Call("foo".to_owned(), vec![]));
        assert_eq!(
            expr("foo(1+2)").unwrap(),
            Expr::Call("foo".to_owned(), vec![bin('+', num(1.0), num(2.0))])
        );
    }

    #[test]
    fn test_call_requires_separators() {
        assert_eq!(
            syntax_message(expr("foo(y 4)").unwrap_err()),
            "expected ')' or ',' in argument list"
        );
    }

    #[test]
    fn test_if() {
        assert_eq!(
            expr("if x < 3 then 1 else 2").unwrap(),
            Expr::If(
                Box::new(bin('<', var("x"), num(3.0))),
                Box::new(num(1.0)),
                Box::new(num(2.0))
            )
        );
        assert_eq!(syntax_message(expr("if x 1 else 2").unwrap_err()), "expected then");
        assert_eq!(syntax_message(expr("if x then 1").unwrap_err()), "expected else");
    }

    #[test]
    fn test_for() {
        assert_eq!(
            expr("for i=1, 3 in 3").unwrap(),
            Expr::For {
                var: "i".to_owned(),
                start: Box::new(num(1.0)),
                end: Box::new(num(3.0)),
                step: None,
                body: Box::new(num(3.0)),
            }
        );

        assert_eq!(
            expr("for i=1, 3,2 in 3").unwrap(),
            Expr::For {
                var: "i".to_owned(),
                start: Box::new(num(1.0)),
                end: Box::new(num(3.0)),
                step: Some(Box::new(num(2.0))),
                body: Box::new(num(3.0)),
            }
        );

        assert_eq!(
            syntax_message(expr("for 1 = 1, 2 in 3").unwrap_err()),
            "expected identifier after for"
        );
        assert_eq!(
            syntax_message(expr("for i = 1, 2 3").unwrap_err()),
            "expected 'in' after for"
        );
    }

    #[test]
    fn test_primary_error() {
        assert_eq!(
            syntax_message(expr(")").unwrap_err()),
            "unknown token when expecting an expression"
        );
        assert_eq!(syntax_message(expr("(1 + 2").unwrap_err()), "expected ')'");
    }

    #[test]
    fn test_prototype() {
        let mut p = Parser::from_str("f()");
        assert_eq!(p.parse_prototype().unwrap(), Prototype::new("f", vec![]));

        let mut p = Parser::from_str("f(a b)");
        assert_eq!(
            p.parse_prototype().unwrap(),
            Prototype::new("f", vec!["a".to_owned(), "b".to_owned()])
        );

        let mut p = Parser::from_str("unary!(v)");
        assert_eq!(
            p.parse_prototype().unwrap(),
            Prototype::unary('!', "v".to_owned())
        );

        let mut p = Parser::from_str("binary| 5 (l r)");
        assert_eq!(
            p.parse_prototype().unwrap(),
            Prototype::binary('|', 5, "l".to_owned(), "r".to_owned())
        );

        let mut p = Parser::from_str("binary : (l r)");
        assert_eq!(p.parse_prototype().unwrap().precedence, DEFAULT_PRECEDENCE);
    }

    #[test]
    fn test_prototype_errors() {
        let mut p = Parser::from_str("1(a)");
        assert_eq!(
            syntax_message(p.parse_prototype().unwrap_err()),
            "expected function name in prototype"
        );
        let mut p = Parser::from_str("f a");
        assert_eq!(
            syntax_message(p.parse_prototype().unwrap_err()),
            "expected '(' in prototype"
        );
        let mut p = Parser::from_str("f(a, b)");
        assert_eq!(
            syntax_message(p.parse_prototype().unwrap_err()),
            "expected ')' in prototype"
        );
    }

    #[test]
    fn test_invalid_precedence() {
        for src in &["binary% 0 (a b)", "binary% 101 (a b)"] {
            let mut p = Parser::from_str(src);
            assert_eq!(
                p.parse_prototype().unwrap_err().kind(),
                &ErrorKind::InvalidPrecedence
            );
        }
        let mut p = Parser::from_str("binary% 100 (a b)");
        assert_eq!(p.parse_prototype().unwrap().precedence, 100);
    }

    #[test]
    fn test_fractional_precedence_truncates() {
        let mut p = Parser::from_str("binary% 10.7 (a b)");
        assert_eq!(p.parse_prototype().unwrap().precedence, 10);
        let mut p = Parser::from_str("binary% 100.5 (a b)");
        assert_eq!(
            p.parse_prototype().unwrap_err().kind(),
            &ErrorKind::InvalidPrecedence
        );
    }

    #[test]
    fn test_invalid_operands() {
        for src in &["unary-(a b)", "binary%(a)", "binary%(a b c)", "unary!()"] {
            let mut p = Parser::from_str(src);
            assert_eq!(
                p.parse_prototype().unwrap_err().kind(),
                &ErrorKind::InvalidOperands
            );
        }
    }

    #[test]
    fn test_definition_installs_precedence() {
        let mut p = Parser::from_str("def binary% 10 (a b) a*b; 1+2%3");
        let f = p.definition().unwrap();
        assert_eq!(f.proto.name, "binary%");
        assert_eq!(p.operators().precedence('%'), Some(10));
        assert_eq!(p.peek().unwrap(), Token::Kwd(';'));
        p.bump();
        assert_eq!(
            p.parse_expression().unwrap(),
            bin('%', bin('+', num(1.0), num(2.0)), num(3.0))
        );

        let mut p = Parser::from_str("def binary% 50 (a b) a*b; 1+2%3");
        p.definition().unwrap();
        p.bump();
        assert_eq!(
            p.parse_expression().unwrap(),
            bin('+', num(1.0), bin('%', num(2.0), num(3.0)))
        );
    }

    #[test]
    fn test_operator_usable_in_own_body() {
        let mut p = Parser::from_str("def binary| 5 (a b) if a then 1 else a | b");
        let f = p.definition().unwrap();
        match f.body {
            Expr::If(_, _, els) => assert_eq!(*els, bin('|', var("a"), var("b"))),
            e => panic!("unexpected body {:?}", e),
        }
    }

    #[test]
    fn test_failed_definition_restores_table() {
        let mut p = Parser::from_str("def binary% 10 (a b) )");
        assert!(p.definition().is_err());
        assert_eq!(p.operators().precedence('%'), None);

        let mut p = Parser::from_str("def binary+ 70 (a b) )");
        assert!(p.definition().is_err());
        assert_eq!(p.operators().precedence('+'), Some(20));
    }

    #[test]
    fn test_extern() {
        let mut p = Parser::from_str("extern sin(x)");
        assert_eq!(
            p.extern_parser().unwrap(),
            Prototype::new("sin", vec!["x".to_owned()])
        );

        let mut p = Parser::from_str("extern binary^ 60 (a b)");
        p.extern_parser().unwrap();
        assert_eq!(p.operators().precedence('^'), Some(60));
    }

    #[test]
    fn test_toplevel() {
        let mut p = Parser::from_str("1 + x");
        let f = p.toplevel().unwrap();
        assert_eq!(f.proto.name, ANON_FN);
        assert!(f.proto.args.is_empty());
        assert_eq!(f.body, bin('+', num(1.0), var("x")));
    }
}
