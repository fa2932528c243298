use super::ast::ANON_FN;
use super::backend::Backend;
use super::codegen::CodeGen;
use super::error::{Error, ErrorKind};
use super::ir::IrBuilder;
use super::jit::{Engine, Jit};
use super::lexer::Lexer;
use super::parser::Parser;
use super::token::Token;
use failure::ResultExt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

#[cfg(feature = "llvm")]
use super::llvm::{Context, LlvmBackend, LlvmJit};

const MODULE_NAME: &str = "my cool jit";

/// What a single top-level form turned into.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Evaluated {
    Definition(String),
    Extern(String),
    Value(f64),
    Skipped,
}

/// Reads top-level forms, lowers them and runs the expressions.
pub(crate) struct Driver<B: Backend, J: Jit<Module = B::Module>> {
    parser: Parser,
    codegen: CodeGen<B>,
    jit: J,
}

impl Driver<IrBuilder, Engine> {
    pub(crate) fn new(lexer: Lexer) -> Self {
        Driver::with_backend(lexer, IrBuilder::new(MODULE_NAME), Engine::new())
    }
}

#[cfg(feature = "llvm")]
impl Driver<LlvmBackend, LlvmJit> {
    pub(crate) fn llvm(lexer: Lexer) -> Result<Self, Error> {
        let context = Context::new();
        let jit = LlvmJit::new(&context)?;
        let backend = LlvmBackend::new(&context, MODULE_NAME);
        Ok(Driver::with_backend(lexer, backend, jit))
    }
}

impl<B: Backend, J: Jit<Module = B::Module>> Driver<B, J> {
    pub(crate) fn with_backend(lexer: Lexer, backend: B, jit: J) -> Self {
        Driver {
            parser: Parser::new(lexer),
            codegen: CodeGen::new(backend),
            jit,
        }
    }

    /// Handles the next top-level form. `None` once the input is exhausted.
    pub(crate) fn step(&mut self) -> Option<Result<Evaluated, Error>> {
        let tok = match self.parser.peek() {
            Ok(tok) => tok,
            Err(e) => return Some(Err(e)),
        };
        let result = match tok {
            Token::Eof => return None,
            Token::Kwd(';') => {
                self.parser.bump();
                Ok(Evaluated::Skipped)
            }
            Token::Def => self.handle_definition(),
            Token::Extern => self.handle_extern(),
            _ => self.handle_toplevel(),
        };
        Some(result)
    }

    /// Runs a parser entry point; on failure the offending token is skipped.
    fn parse<T>(&mut self, entry: fn(&mut Parser) -> Result<T, Error>) -> Result<T, Error> {
        entry(&mut self.parser).map_err(|e| {
            self.parser.bump();
            e
        })
    }

    fn handle_definition(&mut self) -> Result<Evaluated, Error> {
        let func = self.parse(Parser::definition)?;
        let f = self.codegen.codegen_func(&func)?;
        eprintln!("Read function definition:");
        eprint!("{}", self.codegen.backend().print_function(f));

        let module = self.codegen.take_module();
        self.jit.add_module(module)?;
        Ok(Evaluated::Definition(func.proto.name.clone()))
    }

    fn handle_extern(&mut self) -> Result<Evaluated, Error> {
        let proto = self.parse(Parser::extern_parser)?;
        let name = proto.name.clone();
        let f = self.codegen.codegen_extern(proto)?;
        eprintln!("Read extern:");
        eprint!("{}", self.codegen.backend().print_function(f));
        Ok(Evaluated::Extern(name))
    }

    fn handle_toplevel(&mut self) -> Result<Evaluated, Error> {
        let func = self.parse(Parser::toplevel)?;
        let f = self.codegen.codegen_func(&func)?;
        eprintln!("Read top-level expression:");
        eprint!("{}", self.codegen.backend().print_function(f));

        let module = self.codegen.take_module();
        let result = self.jit.add_module(module).and_then(|key| {
            let value = self.jit.run_function(ANON_FN);
            self.jit.remove_module(key);
            value
        });
        self.codegen.forget(ANON_FN);

        let value = result?;
        eprintln!("Evaluated to {:.6}", value);
        Ok(Evaluated::Value(value))
    }

    /// Processes forms until the input runs out.
    pub(crate) fn main_loop(&mut self, interactive: bool) {
        loop {
            if interactive {
                eprint!("ready> ");
            }
            match self.step() {
                None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => eprintln!("Error: {}", e),
            }
        }
    }

    /// Runs every form in `path`, then goes back to reading stdin.
    pub(crate) fn include_file(&mut self, path: &Path) -> Result<(), Error> {
        let file = File::open(path).context(ErrorKind::Io(path.display().to_string()))?;
        self.parser.set_source(Box::new(BufReader::new(file)));
        self.main_loop(false);
        self.parser
            .set_source(Box::new(BufReader::new(io::stdin())));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn driver(src: &str) -> Driver<IrBuilder, Engine> {
        Driver::new(Lexer::from_str(src))
    }

    fn run(src: &str) -> Vec<Result<Evaluated, ErrorKind>> {
        let mut d = driver(src);
        let mut out = Vec::new();
        while let Some(r) = d.step() {
            match r {
                Ok(Evaluated::Skipped) => {}
                Ok(e) => out.push(Ok(e)),
                Err(e) => out.push(Err(e.kind().clone())),
            }
        }
        out
    }

    fn values(src: &str) -> Vec<f64> {
        run(src)
            .into_iter()
            .filter_map(|r| match r {
                Ok(Evaluated::Value(v)) => Some(v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(values("1+2*3;"), vec![7.0]);
        assert_eq!(values("8-4-2;"), vec![2.0]);
        assert_eq!(values("(1+2)*3; 2 < 3; 3 < 2;"), vec![9.0, 1.0, 0.0]);
    }

    #[test]
    fn test_definitions() {
        let out = run("def square(x) x*x; square(4); square(square(2));");
        assert_eq!(
            out,
            vec![
                Ok(Evaluated::Definition("square".to_owned())),
                Ok(Evaluated::Value(16.0)),
                Ok(Evaluated::Value(16.0)),
            ]
        );
    }

    #[test]
    fn test_anonymous_expressions_repeat() {
        assert_eq!(values("1; 2; 3"), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_user_operators() {
        assert_eq!(
            values(
                "def binary% 10 (a b) a - b * 0;
                 def unary-(v) 0 - v;
                 5 % 2 + 1;
                 -3 * 2;"
            ),
            vec![5.0, -6.0]
        );
        // binding tighter than `*` flips the grouping
        assert_eq!(
            values(
                "def binary% 50 (a b) a + b;
                 2 * 3 % 4;"
            ),
            vec![14.0]
        );
    }

    #[test]
    fn test_if_and_loop() {
        assert_eq!(
            values(
                "def fib(x) if x < 3 then 1 else fib(x-1) + fib(x-2);
                 fib(10);
                 for i = 1, i < 5 in 0;"
            ),
            vec![55.0, 0.0]
        );
    }

    #[test]
    fn test_loop_restores_shadowed_variable() {
        assert_eq!(
            values(
                "def f(i) (for i = 0, i < 3, 1 in i) + i;
                 f(42);"
            ),
            vec![42.0]
        );
    }

    #[test]
    fn test_extern_and_builtins() {
        let out = run("extern printd(x); printd(1.5) + 1;");
        assert_eq!(
            out,
            vec![
                Ok(Evaluated::Extern("printd".to_owned())),
                Ok(Evaluated::Value(1.0)),
            ]
        );
    }

    #[test]
    fn test_extern_then_define() {
        let out = run("extern f(x); def f(x) x + 1; f(1);");
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], Ok(Evaluated::Definition("f".to_owned())));
        assert_eq!(out[2], Ok(Evaluated::Value(2.0)));
    }

    #[test]
    fn test_redefinition() {
        let out = run("def f(x) x; def f(x) x + 1; f(3);");
        assert_eq!(out[1], Err(ErrorKind::Redefinition("f".to_owned())));
        assert_eq!(out[2], Ok(Evaluated::Value(3.0)));
    }

    #[test]
    fn test_rejected_redefinition_keeps_original() {
        let out = run("def foo(a) a; def foo(a b) a; foo(1);");
        assert_eq!(out[1], Err(ErrorKind::Redefinition("foo".to_owned())));
        assert_eq!(out[2], Ok(Evaluated::Value(1.0)));
    }

    #[test]
    fn test_mismatched_definition_keeps_extern() {
        let out = run("extern foo(a); def foo(a b) a; def one() 1; def bar(x) foo(x);");
        assert_eq!(out[1], Err(ErrorKind::SignatureMismatch("foo".to_owned())));
        assert_eq!(out[2], Ok(Evaluated::Definition("one".to_owned())));
        assert_eq!(out[3], Ok(Evaluated::Definition("bar".to_owned())));
    }

    #[test]
    fn test_unknown_variable_recovers() {
        let out = run("def f(x) y; def f(x) x * 2; f(4);");
        assert_eq!(out[0], Err(ErrorKind::UnknownVariable("y".to_owned())));
        assert_eq!(out[1], Ok(Evaluated::Definition("f".to_owned())));
        assert_eq!(out[2], Ok(Evaluated::Value(8.0)));
    }

    #[test]
    fn test_wrong_argument_count() {
        let out = run("def f(a b) a + b; f(1);");
        assert_eq!(
            out[1],
            Err(ErrorKind::ArgumentCount {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            run("nope(1);"),
            vec![Err(ErrorKind::UnknownFunction("nope".to_owned()))]
        );
    }

    #[test]
    fn test_parse_error_recovery() {
        let out = run("def 1; 4 + 5;");
        assert!(matches!(out[0], Err(ErrorKind::Syntax(_))));
        assert_eq!(out.last(), Some(&Ok(Evaluated::Value(9.0))));
    }

    #[test]
    fn test_trailing_comment() {
        assert_eq!(values("1 + 1; # done"), vec![2.0]);
        assert_eq!(values("# only a comment"), Vec::<f64>::new());
    }

    #[test]
    fn test_include_missing_file() {
        let mut d = driver("");
        let err = d
            .include_file(Path::new("/nonexistent/kscope/input.ks"))
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Io("/nonexistent/kscope/input.ks".to_owned())
        );
    }
}
