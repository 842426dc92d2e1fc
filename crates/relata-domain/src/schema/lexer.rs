//! DSL lexer.
//!
//! Turns schema source into a token stream, skipping whitespace and
//! `//` line comments. Each token carries the byte offset it starts at so
//! the parser can report precise positions.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::multispace1,
    combinator::value,
    multi::many0,
    sequence::pair,
    IResult,
};

use crate::error::{Error, Result};

/// A lexed token and the byte offset of its first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub offset: usize,
}

/// Token kinds of the schema DSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Ident(&'a str),
    Entity,
    Relation,
    Action,
    Or,
    And,
    Not,
    At,
    Hash,
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Equals,
    Eof,
}

impl TokenKind<'_> {
    /// Human-readable form used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Entity => "'entity'".to_string(),
            TokenKind::Relation => "'relation'".to_string(),
            TokenKind::Action => "'action'".to_string(),
            TokenKind::Or => "'or'".to_string(),
            TokenKind::And => "'and'".to_string(),
            TokenKind::Not => "'not'".to_string(),
            TokenKind::At => "'@'".to_string(),
            TokenKind::Hash => "'#'".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Equals => "'='".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// A `//` comment running to the end of the line.
fn comment(input: &str) -> IResult<&str, ()> {
    value((), pair(tag("//"), take_while(|c| c != '\n' && c != '\r')))(input)
}

/// Whitespace and comments.
fn trivia(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn keyword_or_ident(word: &str) -> TokenKind<'_> {
    match word {
        "entity" => TokenKind::Entity,
        "relation" => TokenKind::Relation,
        "action" => TokenKind::Action,
        "or" => TokenKind::Or,
        "and" => TokenKind::And,
        "not" => TokenKind::Not,
        _ => TokenKind::Ident(word),
    }
}

fn punct(input: &str) -> IResult<&str, TokenKind<'_>> {
    alt((
        value(TokenKind::At, tag("@")),
        value(TokenKind::Hash, tag("#")),
        value(TokenKind::Dot, tag(".")),
        value(TokenKind::LParen, tag("(")),
        value(TokenKind::RParen, tag(")")),
        value(TokenKind::LBrace, tag("{")),
        value(TokenKind::RBrace, tag("}")),
        value(TokenKind::Comma, tag(",")),
        value(TokenKind::Equals, tag("=")),
    ))(input)
}

/// Lexes `source` into tokens, ending with [`TokenKind::Eof`].
pub fn lex(source: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        rest = trivia(rest).map(|(r, _)| r).unwrap_or(rest);
        let offset = source.len() - rest.len();
        if rest.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                offset,
            });
            return Ok(tokens);
        }
        let (next, kind) = if let Ok((next, kind)) = punct(rest) {
            (next, kind)
        } else if let Ok((next, word)) = identifier(rest) {
            (next, keyword_or_ident(word))
        } else {
            let unexpected = rest.chars().next().expect("rest is non-empty");
            return Err(Error::SchemaParse {
                position: offset,
                message: format!("unexpected character {:?}", unexpected),
            });
        };
        tokens.push(Token { kind, offset });
        rest = next;
    }
}
