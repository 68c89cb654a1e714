//! Parser and interpreter for the script subset run by the in-memory engine.
//!
//! Supported forms: `return [expr]`, `nil`/`true`/`false`, integer and string
//! literals, unary minus, table constructors, `KEYS[n]`, `ARGV[n]`,
//! `redis.call(...)`, `redis.pcall(...)`, `error(msg)` and `tonumber(x)`.
//! Anything else is a compile error.

use scriptor_core::ReplyValue;

use super::lexer::{tokenize, Token};

/// Deepest expression or value nesting a script may use.
const MAX_DEPTH: usize = 200;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Table(Vec<Expr>),
    Keys(Box<Expr>),
    Argv(Box<Expr>),
    Call { protected: bool, args: Vec<Expr> },
    Error(Box<Expr>),
    ToNumber(Box<Expr>),
    Neg(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Return(Option<Expr>),
    Call(Expr),
}

/// A compiled script, ready to run any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    stmts: Vec<Stmt>,
}

/// Compile a script body. Errors carry the engine's compile-error prefix.
pub fn compile(body: &str) -> Result<Chunk, String> {
    let tokens = tokenize(body).map_err(|e| compile_error(&e.to_string()))?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .chunk()
        .map_err(|e| compile_error(&e))
}

fn compile_error(detail: &str) -> String {
    format!("ERR Error compiling script: {detail}")
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(format!("'{}' expected near {}", describe(&want), describe(&tok))),
            None => Err(format!("'{}' expected near <eof>", describe(&want))),
        }
    }

    fn skip_semicolons(&mut self) {
        while self.peek() == Some(&Token::Semicolon) {
            self.pos += 1;
        }
    }

    fn chunk(mut self) -> Result<Chunk, String> {
        let mut stmts = Vec::new();
        loop {
            self.skip_semicolons();
            let Some(tok) = self.peek() else { break };

            if *tok == Token::Ident("return".to_string()) {
                self.pos += 1;
                let value = match self.peek() {
                    None | Some(Token::Semicolon) => None,
                    Some(_) => Some(self.expr()?),
                };
                stmts.push(Stmt::Return(value));
                self.skip_semicolons();
                if let Some(tok) = self.peek() {
                    return Err(format!("'<eof>' expected near {}", describe(tok)));
                }
                break;
            }

            let expr = self.expr()?;
            match expr {
                Expr::Call { .. } | Expr::Error(_) => stmts.push(Stmt::Call(expr)),
                _ => return Err("syntax error: expression is not a statement".to_string()),
            }
        }
        Ok(Chunk { stmts })
    }

    fn expr(&mut self) -> Result<Expr, String> {
        if self.depth >= MAX_DEPTH {
            return Err("chunk has too many syntax levels".to_string());
        }
        self.depth += 1;
        let expr = self.operand();
        self.depth -= 1;
        expr
    }

    fn operand(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.expr()?))),
            Some(Token::LBrace) => self.table(),
            Some(Token::Ident(name)) => self.named(&name),
            Some(tok) => Err(format!("unexpected symbol near {}", describe(&tok))),
            None => Err("unexpected symbol near <eof>".to_string()),
        }
    }

    fn named(&mut self, name: &str) -> Result<Expr, String> {
        match name {
            "nil" => Ok(Expr::Nil),
            "true" => Ok(Expr::Bool(true)),
            "false" => Ok(Expr::Bool(false)),
            "KEYS" | "ARGV" => {
                self.expect(Token::LBracket)?;
                let index = Box::new(self.expr()?);
                self.expect(Token::RBracket)?;
                Ok(if name == "KEYS" {
                    Expr::Keys(index)
                } else {
                    Expr::Argv(index)
                })
            }
            "redis" => {
                self.expect(Token::Dot)?;
                let protected = match self.next() {
                    Some(Token::Ident(f)) if f == "call" => false,
                    Some(Token::Ident(f)) if f == "pcall" => true,
                    Some(tok) => {
                        return Err(format!("unsupported redis function near {}", describe(&tok)))
                    }
                    None => return Err("unexpected symbol near <eof>".to_string()),
                };
                let args = self.arguments()?;
                Ok(Expr::Call { protected, args })
            }
            "error" | "tonumber" => {
                let mut args = self.arguments()?;
                if args.len() != 1 {
                    return Err(format!("'{name}' takes exactly one argument"));
                }
                let arg = Box::new(args.remove(0));
                Ok(if name == "error" {
                    Expr::Error(arg)
                } else {
                    Expr::ToNumber(arg)
                })
            }
            other => Err(format!("unsupported identifier '{other}'")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(Token::LParen)?;
        self.list(Token::RParen)
    }

    fn table(&mut self) -> Result<Expr, String> {
        self.list(Token::RBrace).map(Expr::Table)
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn list(&mut self, close: Token) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(tok) if tok == close => return Ok(items),
                Some(tok) => {
                    return Err(format!("'{}' expected near {}", describe(&close), describe(&tok)))
                }
                None => return Err(format!("'{}' expected near <eof>", describe(&close))),
            }
        }
    }
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => format!("'{s}'"),
        Token::Int(n) => format!("'{n}'"),
        Token::Str(s) => format!("'{s}'"),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
        Token::LBracket => "[".to_string(),
        Token::RBracket => "]".to_string(),
        Token::LBrace => "{".to_string(),
        Token::RBrace => "}".to_string(),
        Token::Comma => ",".to_string(),
        Token::Dot => ".".to_string(),
        Token::Semicolon => ";".to_string(),
        Token::Minus => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Executes engine commands issued through `redis.call` / `redis.pcall`.
pub trait CommandRunner {
    fn run(&mut self, argv: &[String]) -> Result<ReplyValue, String>;
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Table(Vec<Value>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
        }
    }

    fn to_number(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Engine reply conversion: tables stop at the first nil.
    fn into_reply(self, depth: usize) -> Result<ReplyValue, String> {
        if depth >= MAX_DEPTH {
            return Err(STACK_LIMIT.to_string());
        }
        Ok(match self {
            Value::Nil | Value::Bool(false) => ReplyValue::Nil,
            Value::Bool(true) => ReplyValue::Integer(1),
            Value::Int(n) => ReplyValue::Integer(n),
            Value::Str(s) => ReplyValue::Text(s),
            Value::Table(items) => ReplyValue::Array(
                items
                    .into_iter()
                    .take_while(|v| *v != Value::Nil)
                    .map(|v| v.into_reply(depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Command reply conversion: a nil reply becomes `false`.
    fn from_reply(reply: ReplyValue, depth: usize) -> Result<Self, String> {
        if depth >= MAX_DEPTH {
            return Err(STACK_LIMIT.to_string());
        }
        Ok(match reply {
            ReplyValue::Nil => Value::Bool(false),
            ReplyValue::Integer(n) => Value::Int(n),
            ReplyValue::Text(s) => Value::Str(s),
            ReplyValue::Array(items) => Value::Table(
                items
                    .into_iter()
                    .map(|item| Value::from_reply(item, depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

const STACK_LIMIT: &str = "ERR reached lua stack limit";

struct Interpreter<'a> {
    runner: &'a mut dyn CommandRunner,
    keys: &'a [String],
    args: &'a [String],
}

/// Run a compiled chunk. Errors are returned as the engine's error text.
pub fn execute(
    chunk: &Chunk,
    runner: &mut dyn CommandRunner,
    keys: &[String],
    args: &[String],
) -> Result<ReplyValue, String> {
    let mut interp = Interpreter { runner, keys, args };
    for stmt in &chunk.stmts {
        match stmt {
            Stmt::Return(None) => return Ok(ReplyValue::Nil),
            Stmt::Return(Some(expr)) => return interp.eval(expr)?.into_reply(0),
            Stmt::Call(expr) => {
                interp.eval(expr)?;
            }
        }
    }
    Ok(ReplyValue::Nil)
}

impl Interpreter<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Table(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Table),
            Expr::Keys(index) => {
                let index = self.eval(index)?;
                Ok(lookup(self.keys, &index))
            }
            Expr::Argv(index) => {
                let index = self.eval(index)?;
                Ok(lookup(self.args, &index))
            }
            Expr::Neg(inner) => {
                let value = self.eval(inner)?;
                let n = value.to_number().ok_or_else(|| {
                    format!(
                        "ERR user_script: attempt to perform arithmetic on a {} value",
                        value.type_name()
                    )
                })?;
                n.checked_neg().map(Value::Int).ok_or_else(|| {
                    "ERR user_script: number has no integer representation".to_string()
                })
            }
            Expr::ToNumber(inner) => {
                let value = self.eval(inner)?;
                Ok(value.to_number().map(Value::Int).unwrap_or(Value::Nil))
            }
            Expr::Error(inner) => match self.eval(inner)? {
                Value::Str(msg) => Err(msg),
                Value::Int(n) => Err(n.to_string()),
                other => Err(format!("ERR user_script: error object is a {} value", other.type_name())),
            },
            Expr::Call { protected, args } => {
                let argv = self.command_args(args)?;
                match self.runner.run(&argv) {
                    Ok(reply) => Value::from_reply(reply, 0),
                    Err(_) if *protected => Ok(Value::Nil),
                    Err(msg) => Err(msg),
                }
            }
        }
    }

    fn command_args(&mut self, args: &[Expr]) -> Result<Vec<String>, String> {
        if args.is_empty() {
            return Err("ERR Please specify at least one argument for this redis lib call".to_string());
        }
        let mut argv = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg)? {
                Value::Str(s) => argv.push(s),
                Value::Int(n) => argv.push(n.to_string()),
                _ => {
                    return Err(
                        "ERR Lua redis lib command arguments must be strings or integers"
                            .to_string(),
                    )
                }
            }
        }
        Ok(argv)
    }
}

/// 1-based lookup into `KEYS` / `ARGV`; out-of-range yields nil.
fn lookup(values: &[String], index: &Value) -> Value {
    index
        .to_number()
        .and_then(|n| usize::try_from(n).ok())
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| values.get(i))
        .map(|s| Value::Str(s.clone()))
        .unwrap_or(Value::Nil)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every command and answers with canned replies.
    struct Recorder {
        calls: Vec<Vec<String>>,
    }

    impl CommandRunner for Recorder {
        fn run(&mut self, argv: &[String]) -> Result<ReplyValue, String> {
            self.calls.push(argv.to_vec());
            match argv[0].as_str() {
                "PING" => Ok(ReplyValue::from("PONG")),
                "GET" => Ok(ReplyValue::Nil),
                "NOPE" => Err("ERR unknown command 'NOPE'".to_string()),
                _ => Ok(ReplyValue::from("OK")),
            }
        }
    }

    fn run(body: &str, keys: &[&str], args: &[&str]) -> Result<ReplyValue, String> {
        let chunk = compile(body)?;
        let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut recorder = Recorder { calls: Vec::new() };
        execute(&chunk, &mut recorder, &keys, &args)
    }

    #[test]
    fn returns_literals() {
        assert_eq!(run("return 1", &[], &[]), Ok(ReplyValue::Integer(1)));
        assert_eq!(
            run("\n    return 'Hello, World!'\n    ", &[], &[]),
            Ok(ReplyValue::from("Hello, World!"))
        );
        assert_eq!(run("return -3", &[], &[]), Ok(ReplyValue::Integer(-3)));
        assert_eq!(run("return true", &[], &[]), Ok(ReplyValue::Integer(1)));
        assert_eq!(run("return false", &[], &[]), Ok(ReplyValue::Nil));
        assert_eq!(run("return", &[], &[]), Ok(ReplyValue::Nil));
        assert_eq!(run("", &[], &[]), Ok(ReplyValue::Nil));
    }

    #[test]
    fn tables_truncate_at_nil() {
        assert_eq!(
            run("return {1, 'two', {3}, nil, 5}", &[], &[]),
            Ok(ReplyValue::Array(vec![
                ReplyValue::Integer(1),
                ReplyValue::from("two"),
                ReplyValue::Array(vec![ReplyValue::Integer(3)]),
            ]))
        );
    }

    #[test]
    fn keys_and_argv_are_one_based() {
        assert_eq!(
            run("return {KEYS[1], ARGV[2], ARGV[9]}", &["k"], &["a", "b"]),
            Ok(ReplyValue::Array(vec![ReplyValue::from("k"), ReplyValue::from("b")]))
        );
    }

    #[test]
    fn tonumber_coerces_text() {
        assert_eq!(run("return tonumber(ARGV[1])", &[], &["42"]), Ok(ReplyValue::Integer(42)));
        assert_eq!(run("return tonumber('x')", &[], &[]), Ok(ReplyValue::Nil));
    }

    #[test]
    fn call_and_pcall() {
        assert_eq!(run("return redis.call('PING')", &[], &[]), Ok(ReplyValue::from("PONG")));
        assert_eq!(
            run("return redis.call('NOPE')", &[], &[]),
            Err("ERR unknown command 'NOPE'".to_string())
        );
        assert_eq!(run("redis.pcall('NOPE')\nreturn 7", &[], &[]), Ok(ReplyValue::Integer(7)));
        // nil command replies surface as false, which converts back to nil
        assert_eq!(run("return redis.call('GET', 'k')", &[], &[]), Ok(ReplyValue::Nil));
    }

    #[test]
    fn command_args_must_be_scalars() {
        let err = run("return redis.call('GET', {1})", &[], &[]).expect_err("table arg");
        assert!(err.contains("must be strings or integers"));
    }

    #[test]
    fn error_raises_message() {
        assert_eq!(run("error('boom')", &[], &[]), Err("boom".to_string()));
    }

    #[test]
    fn malformed_scripts_fail_to_compile() {
        for body in [
            "error return 'Hello, World!'",
            "return 1 return 2",
            "foo()",
            "return {1,",
            "1",
            "return @",
        ] {
            let err = compile(body).expect_err(body);
            assert!(
                err.starts_with("ERR Error compiling script"),
                "unexpected error for {body:?}: {err}"
            );
        }
    }

    #[test]
    fn negating_min_integer_is_an_error() {
        let err = run("return -tonumber(ARGV[1])", &[], &["-9223372036854775808"])
            .expect_err("overflow");
        assert_eq!(err, "ERR user_script: number has no integer representation");
        assert_eq!(
            run("return -tonumber(ARGV[1])", &[], &["-9223372036854775807"]),
            Ok(ReplyValue::Integer(i64::MAX))
        );
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("return {}1{}", "{".repeat(200_000), "}".repeat(200_000));
        let err = compile(&deep).expect_err("too deep");
        assert_eq!(err, "ERR Error compiling script: chunk has too many syntax levels");

        let negations = format!("return {}1", "- ".repeat(MAX_DEPTH + 1));
        assert!(compile(&negations).is_err());

        let shallow = format!("return {}1{}", "{".repeat(10), "}".repeat(10));
        assert!(run(&shallow, &[], &[]).is_ok());
    }

    #[test]
    fn deep_command_replies_hit_stack_limit() {
        struct Nested;
        impl CommandRunner for Nested {
            fn run(&mut self, _argv: &[String]) -> Result<ReplyValue, String> {
                let mut reply = ReplyValue::Integer(1);
                for _ in 0..MAX_DEPTH + 5 {
                    reply = ReplyValue::Array(vec![reply]);
                }
                Ok(reply)
            }
        }

        let chunk = compile("return redis.call('DEEP')").expect("compile");
        let err = execute(&chunk, &mut Nested, &[], &[]).expect_err("too deep");
        assert_eq!(err, STACK_LIMIT);
    }

    #[test]
    fn commands_receive_stringified_integers() {
        let chunk = compile("redis.call('SELECT', ARGV[1]); redis.call('HSET', KEYS[1], 2, 'v')")
            .expect("compile");
        let mut recorder = Recorder { calls: Vec::new() };
        let _ = execute(&chunk, &mut recorder, &["ns".to_string()], &["1".to_string()]);
        assert_eq!(recorder.calls[0], ["SELECT", "1"]);
        assert_eq!(recorder.calls[1], ["HSET", "ns", "2", "v"]);
    }
}
