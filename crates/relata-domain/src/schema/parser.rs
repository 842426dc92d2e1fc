//! DSL parser.
//!
//! Recursive descent over the lexed token stream, producing the raw
//! schema AST. Name resolution and lowering happen in the compiler; the
//! parser only enforces shape, operator precedence (`and` binds tighter
//! than `or`), and the placement of `not`.
//!
//! `not` may only precede a single relation or action reference.
//! `not (...)` is rejected here rather than lowered; see the compiler
//! module docs for the exclusion placement rules.

use crate::error::{Error, Result};

use super::lexer::{lex, Token, TokenKind};

/// Raw parsed schema: one statement per entity, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaAst {
    pub entities: Vec<EntityAst>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAst {
    pub name: String,
    pub offset: usize,
    pub relations: Vec<RelationAst>,
    pub actions: Vec<ActionAst>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationAst {
    pub name: String,
    pub offset: usize,
    pub references: Vec<ReferenceAst>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAst {
    pub entity_type: String,
    pub relation: Option<String>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionAst {
    pub name: String,
    pub offset: usize,
    pub expr: ExprAst,
}

/// Raw action expression. References keep their dotted segments; the
/// compiler enforces the one-hop limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprAst {
    Reference {
        segments: Vec<String>,
        exclusion: bool,
        offset: usize,
    },
    Operation {
        operator: SetOperator,
        children: Vec<ExprAst>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Or,
    And,
}

/// Parses DSL source into the raw AST.
pub fn parse(source: &str) -> Result<SchemaAst> {
    let tokens = lex(source)?;
    Parser {
        tokens: &tokens,
        position: 0,
    }
    .parse_schema()
}

struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token<'a> {
        self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token<'a> {
        let token = self.peek();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.peek();
        Error::SchemaParse {
            position: token.offset,
            message: format!("expected {}, found {}", expected, token.kind.describe()),
        }
    }

    fn expect(&mut self, kind: TokenKind<'static>, expected: &str) -> Result<Token<'a>> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, usize)> {
        match self.peek().kind {
            TokenKind::Ident(name) => {
                let offset = self.advance().offset;
                Ok((name.to_string(), offset))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn parse_schema(&mut self) -> Result<SchemaAst> {
        let mut entities = Vec::new();
        while self.peek().kind != TokenKind::Eof {
            entities.push(self.parse_entity()?);
        }
        Ok(SchemaAst { entities })
    }

    fn parse_entity(&mut self) -> Result<EntityAst> {
        self.expect(TokenKind::Entity, "'entity'")?;
        let (name, offset) = self.expect_ident("entity name")?;
        self.expect(TokenKind::LBrace, "'{'")?;

        let mut relations = Vec::new();
        let mut actions = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Relation => relations.push(self.parse_relation()?),
                TokenKind::Action => actions.push(self.parse_action()?),
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected("'relation', 'action', or '}'")),
            }
        }

        Ok(EntityAst {
            name,
            offset,
            relations,
            actions,
        })
    }

    fn parse_relation(&mut self) -> Result<RelationAst> {
        self.expect(TokenKind::Relation, "'relation'")?;
        let (name, offset) = self.expect_ident("relation name")?;

        let mut references = Vec::new();
        self.expect(TokenKind::At, "'@'")?;
        references.push(self.parse_reference()?);
        loop {
            match self.peek().kind {
                TokenKind::At => {
                    self.advance();
                    references.push(self.parse_reference()?);
                }
                TokenKind::Comma => {
                    self.advance();
                    if self.peek().kind == TokenKind::At {
                        self.advance();
                    }
                    references.push(self.parse_reference()?);
                }
                _ => break,
            }
        }

        Ok(RelationAst {
            name,
            offset,
            references,
        })
    }

    fn parse_reference(&mut self) -> Result<ReferenceAst> {
        let (entity_type, offset) = self.expect_ident("referenced entity type")?;
        let relation = if self.peek().kind == TokenKind::Hash {
            self.advance();
            Some(self.expect_ident("referenced relation")?.0)
        } else {
            None
        };
        Ok(ReferenceAst {
            entity_type,
            relation,
            offset,
        })
    }

    fn parse_action(&mut self) -> Result<ActionAst> {
        self.expect(TokenKind::Action, "'action'")?;
        let (name, offset) = self.expect_ident("action name")?;
        self.expect(TokenKind::Equals, "'='")?;
        let expr = self.parse_or()?;
        Ok(ActionAst { name, offset, expr })
    }

    /// Lowest precedence: `or` chains flatten into one operation.
    fn parse_or(&mut self) -> Result<ExprAst> {
        let first = self.parse_and()?;
        let mut children = vec![first];
        while self.peek().kind == TokenKind::Or {
            self.advance();
            children.push(self.parse_and()?);
        }
        if children.len() == 1 {
            Ok(children.pop().expect("single child"))
        } else {
            Ok(ExprAst::Operation {
                operator: SetOperator::Or,
                children,
            })
        }
    }

    /// `and` binds tighter than `or`; chains flatten the same way.
    fn parse_and(&mut self) -> Result<ExprAst> {
        let first = self.parse_term()?;
        let mut children = vec![first];
        while self.peek().kind == TokenKind::And {
            self.advance();
            children.push(self.parse_term()?);
        }
        if children.len() == 1 {
            Ok(children.pop().expect("single child"))
        } else {
            Ok(ExprAst::Operation {
                operator: SetOperator::And,
                children,
            })
        }
    }

    fn parse_term(&mut self) -> Result<ExprAst> {
        match self.peek().kind {
            TokenKind::Not => {
                self.advance();
                if self.peek().kind == TokenKind::LParen {
                    let token = self.peek();
                    return Err(Error::SchemaParse {
                        position: token.offset,
                        message: "'not' may only precede a relation or action reference"
                            .to_string(),
                    });
                }
                self.parse_atom(true)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => self.parse_atom(false),
        }
    }

    fn parse_atom(&mut self, exclusion: bool) -> Result<ExprAst> {
        let (first, offset) = self.expect_ident("relation or action reference")?;
        let mut segments = vec![first];
        while self.peek().kind == TokenKind::Dot {
            self.advance();
            segments.push(self.expect_ident("relation reference after '.'")?.0);
        }
        Ok(ExprAst::Reference {
            segments,
            exclusion,
            offset,
        })
    }
}
