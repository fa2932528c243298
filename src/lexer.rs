use super::error::{Error, ErrorKind};
use super::token::Token;
use combine::error::{ParseError, StreamError};
use combine::parser::char::{digit, spaces};
use combine::parser::EasyParser;
use combine::stream::{Stream, StreamErrorFor};
use combine::{any, choice, eof, many, many1, parser, satisfy, skip_many, token, Parser};
use std::io::{self, BufRead};

fn number<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    many1(choice((digit(), token('.'))))
        .and_then(|ns: String| ns.parse::<f64>().map_err(StreamErrorFor::<Input>::other))
        .map(Token::Number)
}

fn ident<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        satisfy(|c: char| c.is_ascii_alphabetic()),
        many(satisfy(|c: char| c.is_ascii_alphanumeric())),
    )
        .map(|(first, rest): (char, String)| {
            let mut s = String::with_capacity(rest.len() + 1);
            s.push(first);
            s.push_str(&rest);
            match s.as_ref() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                "if" => Token::If,
                "then" => Token::Then,
                "else" => Token::Else,
                "for" => Token::For,
                "in" => Token::In,
                "unary" => Token::Unary,
                "binary" => Token::Binary,
                _ => Token::Ident(s),
            }
        })
}

fn comment<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (token('#'), skip_many(satisfy(|c: char| c != '\n'))).map(|_| ())
}

fn lex_<Input>() -> impl Parser<Input, Output = Option<Token>>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    spaces().with(choice((
        number().map(Some),
        ident().map(Some),
        comment().with(lex()),
        eof().map(|_| None),
        any().map(|c| Some(Token::Kwd(c))),
    )))
}

parser! {
    pub(crate) fn lex[Input]()(Input) -> Option<Token>
        where [Input: Stream<Token=char>]
    {
        lex_()
    }
}

/// Pulls tokens out of a line-buffered character source.
pub(crate) struct Lexer {
    source: Box<dyn BufRead>,
    buf: String,
    pos: usize,
}

impl Lexer {
    pub(crate) fn new(source: Box<dyn BufRead>) -> Lexer {
        Lexer {
            source,
            buf: String::new(),
            pos: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_str(s: &str) -> Lexer {
        Lexer::new(Box::new(io::Cursor::new(s.to_owned())))
    }

    pub(crate) fn stdin() -> Lexer {
        Lexer::new(Box::new(io::BufReader::new(io::stdin())))
    }

    /// Switches to another input source, dropping whatever was left of the current line.
    pub(crate) fn set_source(&mut self, source: Box<dyn BufRead>) {
        self.source = source;
        self.buf.clear();
        self.pos = 0;
    }

    fn fill_line(&mut self) -> Result<bool, Error> {
        self.buf.clear();
        self.pos = 0;
        let n = self
            .source
            .read_line(&mut self.buf)
            .map_err(|e| ErrorKind::Lex(e.to_string()))?;
        Ok(n > 0)
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, Error> {
        loop {
            let rest = &self.buf[self.pos..];
            if rest.trim_start().is_empty() {
                if self.fill_line()? {
                    continue;
                }
                return Ok(Token::Eof);
            }

            match lex().easy_parse(rest) {
                Ok((Some(tok), remaining)) => {
                    self.pos = self.buf.len() - remaining.len();
                    return Ok(tok);
                }
                // only a comment was left on this line
                Ok((None, _)) => self.pos = self.buf.len(),
                Err(e) => {
                    let msg = e.map_position(|p| p.translate_position(rest)).to_string();
                    self.pos = self.buf.len();
                    return Err(ErrorKind::Lex(msg.trim_end().to_owned()).into());
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::token::Token::*;
    use super::*;

    fn lex_all(s: &str) -> Vec<Token> {
        let mut lexer = Lexer::from_str(s);
        let mut tokens = Vec::new();
        loop {
            match lexer.next_token().unwrap() {
                Eof => break,
                t => tokens.push(t),
            }
        }
        tokens
    }

    #[test]
    fn test_number() {
        assert_eq!(number().easy_parse("1.0").map(|x| x.0), Ok(Number(1.0)));
        assert_eq!(number().easy_parse(".5").map(|x| x.0), Ok(Number(0.5)));
        assert!(number().easy_parse("1.2.3").is_err());
    }

    #[test]
    fn test_ident() {
        assert_eq!(
            ident().easy_parse("test").map(|x| x.0),
            Ok(Ident("test".to_owned()))
        );
        assert_eq!(
            ident().easy_parse("x1y2").map(|x| x.0),
            Ok(Ident("x1y2".to_owned()))
        );

        assert_eq!(ident().easy_parse("def").map(|x| x.0), Ok(Def));
        assert_eq!(ident().easy_parse("binary").map(|x| x.0), Ok(Binary));
        assert_eq!(ident().easy_parse("unary").map(|x| x.0), Ok(Unary));
        // not reserved: there are no `var` expressions
        assert_eq!(
            ident().easy_parse("var").map(|x| x.0),
            Ok(Ident("var".to_owned()))
        );
    }

    #[test]
    fn test_comment() {
        assert_eq!(comment().easy_parse("#hoge").map(|x| x.0), Ok(()));
    }

    #[test]
    fn test_lex() {
        assert_eq!(
            lex()
                .easy_parse(
                    r#"#comment
1.0
"#
                )
                .map(|x| x.0),
            Ok(Some(Number(1.0)))
        );
        assert_eq!(lex().easy_parse("   ").map(|x| x.0), Ok(None));
    }

    #[test]
    fn test_operators_and_keywords() {
        assert_eq!(
            lex_all("def binary| 5 (a b) if a then 1 else b;"),
            vec![
                Def,
                Binary,
                Kwd('|'),
                Number(5.0),
                Kwd('('),
                Ident("a".to_owned()),
                Ident("b".to_owned()),
                Kwd(')'),
                If,
                Ident("a".to_owned()),
                Then,
                Number(1.0),
                Else,
                Ident("b".to_owned()),
                Kwd(';'),
            ]
        );
        assert_eq!(
            lex_all("for i = 1, i < 3 in x"),
            vec![
                For,
                Ident("i".to_owned()),
                Kwd('='),
                Number(1.0),
                Kwd(','),
                Ident("i".to_owned()),
                Kwd('<'),
                Number(3.0),
                In,
                Ident("x".to_owned()),
            ]
        );
    }

    #[test]
    fn test_comment_lines() {
        assert_eq!(
            lex_all("# leading\n1 # trailing\n# last line without newline"),
            vec![Number(1.0)]
        );
        assert_eq!(lex_all("#only a comment"), vec![]);
    }

    #[test]
    fn test_tokens_across_lines() {
        assert_eq!(
            lex_all("foo(\n  x\n)"),
            vec![
                Ident("foo".to_owned()),
                Kwd('('),
                Ident("x".to_owned()),
                Kwd(')'),
            ]
        );
    }

    #[test]
    fn test_malformed_number() {
        let mut lexer = Lexer::from_str("1.2.3 + 4\n5");
        match lexer.next_token() {
            Err(e) => match e.kind() {
                ErrorKind::Lex(_) => {}
                k => panic!("unexpected error kind {:?}", k),
            },
            Ok(t) => panic!("unexpected token {:?}", t),
        }
        assert_eq!(lexer.next_token().unwrap(), Number(5.0));
    }

    #[test]
    fn test_set_source() {
        let mut lexer = Lexer::from_str("a b");
        assert_eq!(lexer.next_token().unwrap(), Ident("a".to_owned()));
        lexer.set_source(Box::new(io::Cursor::new("c".to_owned())));
        assert_eq!(lexer.next_token().unwrap(), Ident("c".to_owned()));
        assert_eq!(lexer.next_token().unwrap(), Eof);
        assert_eq!(lexer.next_token().unwrap(), Eof);
    }
}
