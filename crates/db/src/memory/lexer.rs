//! Tokenizer for the script subset understood by [`MemoryStore`](super::MemoryStore).

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace1, not_line_ending},
    combinator::{map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair},
    IResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semicolon,
    Minus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("user_script:{line}: unexpected symbol near '{character}'")]
pub struct LexError {
    pub character: char,
    pub line: usize,
}

/// Split a script body into tokens, dropping whitespace and `--` comments.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut remaining = input;
    let mut line = 1;

    loop {
        let (rest, skipped) = trivia(remaining).unwrap_or((remaining, ""));
        line += skipped.matches('\n').count();
        remaining = rest;
        if remaining.is_empty() {
            break;
        }

        match token(remaining) {
            Ok((rest, tok)) => {
                tokens.push(tok);
                remaining = rest;
            }
            Err(_) => {
                return Err(LexError {
                    character: remaining.chars().next().unwrap_or('?'),
                    line,
                });
            }
        }
    }

    Ok(tokens)
}

fn trivia(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((
        multispace1,
        recognize(pair(tag("--"), not_line_ending)),
    ))))(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((number, single_quoted, double_quoted, identifier, punctuation))(input)
}

fn number(input: &str) -> IResult<&str, Token> {
    map(map_res(digit1, str::parse::<i64>), Token::Int)(input)
}

fn single_quoted(input: &str) -> IResult<&str, Token> {
    quoted(input, '\'', "\\'")
}

fn double_quoted(input: &str) -> IResult<&str, Token> {
    quoted(input, '"', "\\\"")
}

fn quoted<'a>(input: &'a str, quote: char, normal: &'static str) -> IResult<&'a str, Token> {
    map(
        delimited(
            char(quote),
            opt(escaped_transform(
                is_not(normal),
                '\\',
                alt((
                    value("\\", tag("\\")),
                    value("'", tag("'")),
                    value("\"", tag("\"")),
                    value("\n", tag("n")),
                    value("\t", tag("t")),
                )),
            )),
            char(quote),
        ),
        |s: Option<String>| Token::Str(s.unwrap_or_default()),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |s: &str| Token::Ident(s.to_string()),
    )(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::LBracket, char('[')),
        value(Token::RBracket, char(']')),
        value(Token::LBrace, char('{')),
        value(Token::RBrace, char('}')),
        value(Token::Comma, char(',')),
        value(Token::Dot, char('.')),
        value(Token::Semicolon, char(';')),
        value(Token::Minus, char('-')),
    ))(input)
}
