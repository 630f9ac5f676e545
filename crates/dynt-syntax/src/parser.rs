//! Recursive-descent parser producing the parse tree.
//!
//! The grammar is a small curly-brace language: top-level function and
//! variable declarations plus zero-argument global calls, block statements
//! (`if`/`while`/`return`/expression), short-circuit logic, comparison and
//! arithmetic operators, member/index access, calls, and `$intrinsic(...)`
//! calls. Assignment targets are detected by parse-and-rewind: an lvalue is
//! an `Index`, `Member` or `VarRef` expression.

use dynt_error::{Error, Result};
use tracing::trace;

use crate::ast::{Node, NodeKind};
use crate::token::{Token, TokenKind, Tokenizer};

/// Parse a whole source buffer into a `Top` node.
pub fn parse(source: &[u8]) -> Result<Node> {
    let mut parser = Parser::new(source);
    parser.parse_top()
}

struct Parser<'a> {
    tz: Tokenizer<'a>,
    look: Token,
}

/// Saved parser position for rewinding.
struct Mark {
    pos: usize,
    look: Token,
}

impl<'a> Parser<'a> {
    fn new(source: &'a [u8]) -> Self {
        let mut tz = Tokenizer::new(source);
        let look = tz.next_token();
        Self { tz, look }
    }

    fn peek(&self) -> Token {
        self.look
    }

    fn advance(&mut self) -> Token {
        let tok = self.look;
        self.look = self.tz.next_token();
        tok
    }

    fn mark(&self) -> Mark {
        Mark { pos: self.tz.pos(), look: self.look }
    }

    fn rewind(&mut self, mark: Mark) {
        self.tz.rewind(mark.pos);
        self.look = mark.look;
    }

    fn text_of(&self, tok: Token) -> Box<str> {
        tok.text(self.tz.source()).into()
    }

    fn error(&self, expected: &str) -> Error {
        let tok = self.look;
        Error::syntax_error(format!("expected {}, found {}", expected, tok.kind))
            .with_context("lexeme", tok.text(self.tz.source()))
            .with_context("offset", tok.start.to_string())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.look.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("{:?}", kind)))
        }
    }

    // Top := (FunDecl | VarDecl | GlobalCall)* EOF
    fn parse_top(&mut self) -> Result<Node> {
        let mut children = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::KwFunction => children.push(self.parse_fun_decl()?),
                TokenKind::KwVar => children.push(self.parse_var_decl()?),
                TokenKind::Id => children.push(self.parse_global_call()?),
                TokenKind::Eof => break,
                _ => return Err(self.error("declaration or global call").with_operation("parser::parse_top")),
            }
        }
        trace!(decls = children.len(), "parsed toplevel");
        Ok(Node::new(NodeKind::Top, None, children))
    }

    // GlobalCall := id '(' ')' ';'
    fn parse_global_call(&mut self) -> Result<Node> {
        let id = self.expect(TokenKind::Id)?;
        self.expect(TokenKind::LParen)?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Node::leaf(NodeKind::GlobalCall, Some(self.text_of(id))))
    }

    // FunDecl := 'function' id '(' Params ')' '{' VarDecls Statements '}'
    fn parse_fun_decl(&mut self) -> Result<Node> {
        self.expect(TokenKind::KwFunction)?;
        let id = self.expect(TokenKind::Id)?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;
        let var_decls = self.parse_var_decls()?;
        let statements = self.parse_statements()?;
        self.expect(TokenKind::RBrace)?;

        Ok(Node::new(
            NodeKind::FunDecl,
            Some(self.text_of(id)),
            vec![params, var_decls, statements],
        ))
    }

    // Params := [ id (',' id)* ]
    fn parse_params(&mut self) -> Result<Node> {
        let mut children = Vec::new();
        if self.peek().kind == TokenKind::Id {
            let id = self.advance();
            children.push(Node::leaf(NodeKind::Param, Some(self.text_of(id))));
            while self.peek().kind == TokenKind::Comma {
                self.advance();
                let id = self.expect(TokenKind::Id)?;
                children.push(Node::leaf(NodeKind::Param, Some(self.text_of(id))));
            }
        }
        Ok(Node::new(NodeKind::Params, None, children))
    }

    // VarDecls := VarDecl*
    fn parse_var_decls(&mut self) -> Result<Node> {
        let mut children = Vec::new();
        while self.peek().kind == TokenKind::KwVar {
            children.push(self.parse_var_decl()?);
        }
        Ok(Node::new(NodeKind::VarDecls, None, children))
    }

    // VarDecl := 'var' id ';'
    fn parse_var_decl(&mut self) -> Result<Node> {
        self.expect(TokenKind::KwVar)?;
        let id = self.expect(TokenKind::Id)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Node::leaf(NodeKind::VarDecl, Some(self.text_of(id))))
    }

    // Statements run until the closing '}'
    fn parse_statements(&mut self) -> Result<Node> {
        let mut children = Vec::new();
        while self.peek().kind != TokenKind::RBrace {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.error("statement or '}'"));
            }
            children.push(self.parse_statement()?);
        }
        Ok(Node::new(NodeKind::Statements, None, children))
    }

    fn parse_statement(&mut self) -> Result<Node> {
        match self.peek().kind {
            TokenKind::KwIf => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::LBrace)?;
                let then_body = self.parse_statements()?;
                self.expect(TokenKind::RBrace)?;

                let mut children = vec![cond, then_body];
                if self.peek().kind == TokenKind::KwElse {
                    self.advance();
                    self.expect(TokenKind::LBrace)?;
                    children.push(self.parse_statements()?);
                    self.expect(TokenKind::RBrace)?;
                }
                Ok(Node::new(NodeKind::If, None, children))
            }

            TokenKind::KwWhile => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::LBrace)?;
                let body = self.parse_statements()?;
                self.expect(TokenKind::RBrace)?;
                Ok(Node::new(NodeKind::While, None, vec![cond, body]))
            }

            TokenKind::KwReturn => {
                self.advance();
                let value = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::Return, None, vec![value]))
            }

            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(expr)
            }
        }
    }

    // Expr := LVal '=' Expr | OrExp
    fn parse_expression(&mut self) -> Result<Node> {
        if let Some(lval) = self.parse_lval_opt()? {
            if self.peek().kind == TokenKind::Assign {
                self.advance();
                let value = self.parse_expression()?;
                return Ok(Node::new(NodeKind::Assign, None, vec![lval, value]));
            }
            return Ok(lval);
        }
        self.parse_or_exp()
    }

    /// Grammatically an lvalue is just an OrExp that turned out to be an
    /// `Index`, `Member` or `VarRef`; anything else rewinds.
    fn parse_lval_opt(&mut self) -> Result<Option<Node>> {
        let mark = self.mark();
        let node = self.parse_or_exp()?;
        if matches!(node.kind, NodeKind::Index | NodeKind::Member | NodeKind::VarRef) {
            return Ok(Some(node));
        }
        self.rewind(mark);
        Ok(None)
    }

    fn parse_binary(
        &mut self,
        ops: &[(TokenKind, NodeKind)],
        sub: fn(&mut Self) -> Result<Node>,
    ) -> Result<Node> {
        let mut node = sub(self)?;
        loop {
            let look = self.peek().kind;
            let Some(&(_, kind)) = ops.iter().find(|(tok, _)| *tok == look) else {
                return Ok(node);
            };
            self.advance();
            let right = sub(self)?;
            node = Node::new(kind, None, vec![node, right]);
        }
    }

    fn parse_or_exp(&mut self) -> Result<Node> {
        self.parse_binary(&[(TokenKind::Or, NodeKind::Or)], Self::parse_and_exp)
    }

    fn parse_and_exp(&mut self) -> Result<Node> {
        self.parse_binary(&[(TokenKind::And, NodeKind::And)], Self::parse_eq_exp)
    }

    fn parse_eq_exp(&mut self) -> Result<Node> {
        self.parse_binary(
            &[(TokenKind::Eq, NodeKind::Eq), (TokenKind::Ne, NodeKind::Ne)],
            Self::parse_rel_exp,
        )
    }

    fn parse_rel_exp(&mut self) -> Result<Node> {
        self.parse_binary(
            &[
                (TokenKind::Lt, NodeKind::Lt),
                (TokenKind::Gt, NodeKind::Gt),
                (TokenKind::Le, NodeKind::Le),
                (TokenKind::Ge, NodeKind::Ge),
            ],
            Self::parse_add_exp,
        )
    }

    fn parse_add_exp(&mut self) -> Result<Node> {
        self.parse_binary(
            &[(TokenKind::Add, NodeKind::Add), (TokenKind::Sub, NodeKind::Sub)],
            Self::parse_mul_exp,
        )
    }

    fn parse_mul_exp(&mut self) -> Result<Node> {
        self.parse_binary(
            &[
                (TokenKind::Mul, NodeKind::Mul),
                (TokenKind::Mod, NodeKind::Mod),
                (TokenKind::Div, NodeKind::Div),
            ],
            Self::parse_prefix_exp,
        )
    }

    // PrefixExp := '!' PrefixExp | 'typeof' PrefixExp | PostfixExp
    fn parse_prefix_exp(&mut self) -> Result<Node> {
        match self.peek().kind {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_prefix_exp()?;
                Ok(Node::new(NodeKind::Not, None, vec![operand]))
            }
            TokenKind::KwTypeof => {
                self.advance();
                let operand = self.parse_prefix_exp()?;
                Ok(Node::new(NodeKind::Typeof, None, vec![operand]))
            }
            _ => self.parse_postfix_exp(),
        }
    }

    // PostfixExp := (intrinsic '(' Args ')' | Primary) ('(' Args ')' | '[' Expr ']' | '.' id)*
    fn parse_postfix_exp(&mut self) -> Result<Node> {
        let mut node = if self.peek().kind == TokenKind::Intrinsic {
            let id = self.advance();
            self.expect(TokenKind::LParen)?;
            let args = self.parse_args()?;
            self.expect(TokenKind::RParen)?;
            Node::new(NodeKind::IntrinsicCall, Some(self.text_of(id)), vec![args])
        } else {
            self.parse_primary()?
        };

        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_args()?;
                    self.expect(TokenKind::RParen)?;
                    node = Node::new(NodeKind::Call, None, vec![node, args]);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket)?;
                    node = Node::new(NodeKind::Index, None, vec![node, index]);
                }
                TokenKind::Dot => {
                    self.advance();
                    let id = self.expect(TokenKind::Id)?;
                    node = Node::new(NodeKind::Member, Some(self.text_of(id)), vec![node]);
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Node> {
        let mut children = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            children.push(self.parse_expression()?);
            while self.peek().kind == TokenKind::Comma {
                self.advance();
                children.push(self.parse_expression()?);
            }
        }
        Ok(Node::new(NodeKind::Args, None, children))
    }

    fn parse_primary(&mut self) -> Result<Node> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Id => Ok(Node::leaf(NodeKind::VarRef, Some(self.text_of(tok)))),
            TokenKind::Num => Ok(Node::leaf(NodeKind::Num, Some(self.text_of(tok)))),
            TokenKind::Str => Ok(Node::leaf(NodeKind::Str, Some(self.text_of(tok)))),
            TokenKind::KwFalse => Ok(Node::leaf(NodeKind::False, None)),
            TokenKind::KwTrue => Ok(Node::leaf(NodeKind::True, None)),
            TokenKind::LBrace => {
                self.expect(TokenKind::RBrace)?;
                Ok(Node::leaf(NodeKind::Obj, None))
            }
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(Error::syntax_error(format!("unexpected {} in expression", tok.kind))
                .with_operation("parser::parse_primary")
                .with_context("lexeme", tok.text(self.tz.source()))),
        }
    }
}
