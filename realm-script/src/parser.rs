//! Recursive-descent parser producing [`Program`]s.

use std::rc::Rc;

use crate::ast::*;
use crate::error::ScriptError;
use crate::lexer::{Keyword, Lexer, Punct, Token, TokenKind};

/// Deepest statement or expression nesting a unit may use.
pub const MAX_NESTING: usize = 128;

/// Parses one script unit. `label` names the unit in syntax errors.
pub fn parse(source: &str, label: &str) -> Result<Program, ScriptError> {
    let tokens = Lexer::new(source, label).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        label,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program {
        label: label.to_string(),
        body,
    })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    label: &'a str,
    depth: usize,
}

impl Parser<'_> {
    // ── Token helpers ────────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn is_punct(&self, punct: Punct) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == punct)
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> Result<(), ScriptError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    /// Property names after `.` or in object literals may be keywords.
    fn property_name(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            TokenKind::Ident(name) | TokenKind::String(name) => Ok(name),
            TokenKind::Keyword(keyword) => Ok(keyword.as_str().to_string()),
            TokenKind::Number(n) => Ok(crate::value::Value::Number(n).to_display_string()),
            _ => Err(self.error("expected property name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        let found = match &token.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Keyword(k) => format!("'{}'", k.as_str()),
            TokenKind::String(_) => "string".to_string(),
            TokenKind::Number(_) => "number".to_string(),
            TokenKind::Punct(p) => format!("{p:?}"),
        };
        ScriptError::Syntax {
            message: format!("{}, found {found}", message.into()),
            label: self.label.to_string(),
            line: token.line,
            column: token.column,
        }
    }

    /// Runs `f` one nesting level deeper, failing once the unit nests too deep.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nesting exceeds {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn end_statement(&mut self) {
        self.eat_punct(Punct::Semicolon);
    }

    // ── Statements ───────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::statement_kind)
    }

    fn statement_kind(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek() {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Var | Keyword::Let) => {
                self.advance();
                let stmt = self.var_declarations()?;
                self.end_statement();
                Ok(stmt)
            }
            TokenKind::Keyword(Keyword::Function)
                if matches!(self.peek_at(1), TokenKind::Ident(_)) =>
            {
                self.advance();
                Ok(Stmt::Function(self.function_rest(true)?))
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen, "'(' after while")?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            TokenKind::Keyword(Keyword::For) => self.for_statement(),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.is_punct(Punct::Semicolon)
                    || self.is_punct(Punct::RBrace)
                    || self.at_eof()
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value))
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Continue)
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.end_statement();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.is_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.error("expected '}'"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn var_declarations(&mut self) -> Result<Stmt, ScriptError> {
        let mut declarations = Vec::new();
        loop {
            let name = self.ident()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            declarations.push((name, init));
            if !self.eat_punct(Punct::Comma) {
                return Ok(Stmt::Var(declarations));
            }
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        self.expect_punct(Punct::LParen, "'(' after if")?;
        let test = self.expression()?;
        self.expect_punct(Punct::RParen, "')'")?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        self.expect_punct(Punct::LParen, "'(' after for")?;
        let init = if self.is_punct(Punct::Semicolon) {
            None
        } else if self.eat_keyword(Keyword::Var) || self.eat_keyword(Keyword::Let) {
            Some(Box::new(self.var_declarations()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(Punct::Semicolon, "';'")?;
        let test = if self.is_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semicolon, "';'")?;
        let update = if self.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen, "')'")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let block = self.block()?;
        if !self.eat_keyword(Keyword::Catch) {
            return Err(self.error("expected 'catch'"));
        }
        let param = if self.eat_punct(Punct::LParen) {
            let name = self.ident()?;
            self.expect_punct(Punct::RParen, "')'")?;
            Some(name)
        } else {
            None
        };
        let handler = self.block()?;
        Ok(Stmt::Try {
            block,
            param,
            handler,
        })
    }

    /// Parses after the `function` keyword.
    fn function_rest(&mut self, require_name: bool) -> Result<Rc<FunctionDef>, ScriptError> {
        let name = match self.peek() {
            TokenKind::Ident(_) => Some(self.ident()?),
            _ if require_name => return Err(self.error("expected function name")),
            _ => None,
        };
        self.expect_punct(Punct::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.eat_punct(Punct::RParen) {
            loop {
                params.push(self.ident()?);
                if self.eat_punct(Punct::RParen) {
                    break;
                }
                self.expect_punct(Punct::Comma, "',' or ')'")?;
            }
        }
        let body = self.block()?;
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: Rc::from(body),
        }))
    }

    // ── Expressions ──────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        let first = self.assignment()?;
        if !self.is_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            items.push(self.assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::assignment_expr)
    }

    fn assignment_expr(&mut self) -> Result<Expr, ScriptError> {
        let target = self.conditional()?;
        let op = match self.peek() {
            TokenKind::Punct(Punct::Assign) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::Add,
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::Sub,
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let test = self.logical_or()?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(Punct::Colon, "':'")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.logical_and()?;
        while self.eat_punct(Punct::OrOr) {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.equality()?;
        while self.eat_punct(Punct::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
        table: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, ScriptError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in table {
                if self.peek() == token {
                    self.advance();
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::relational,
            &[
                (TokenKind::Punct(Punct::StrictEq), BinaryOp::StrictEq),
                (TokenKind::Punct(Punct::StrictNotEq), BinaryOp::StrictNotEq),
                (TokenKind::Punct(Punct::Eq), BinaryOp::Eq),
                (TokenKind::Punct(Punct::NotEq), BinaryOp::NotEq),
            ],
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::additive,
            &[
                (TokenKind::Punct(Punct::Lt), BinaryOp::Lt),
                (TokenKind::Punct(Punct::LtEq), BinaryOp::LtEq),
                (TokenKind::Punct(Punct::Gt), BinaryOp::Gt),
                (TokenKind::Punct(Punct::GtEq), BinaryOp::GtEq),
                (TokenKind::Keyword(Keyword::In), BinaryOp::In),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::multiplicative,
            &[
                (TokenKind::Punct(Punct::Plus), BinaryOp::Add),
                (TokenKind::Punct(Punct::Minus), BinaryOp::Sub),
            ],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Punct(Punct::Star), BinaryOp::Mul),
                (TokenKind::Punct(Punct::Slash), BinaryOp::Div),
                (TokenKind::Punct(Punct::Percent), BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            TokenKind::Punct(Punct::Bang) => UnaryOp::Not,
            TokenKind::Punct(Punct::Minus) => UnaryOp::Neg,
            TokenKind::Punct(Punct::Plus) => UnaryOp::Plus,
            TokenKind::Keyword(Keyword::Typeof) => UnaryOp::TypeOf,
            TokenKind::Keyword(Keyword::Delete) => UnaryOp::Delete,
            TokenKind::Keyword(Keyword::Void) => UnaryOp::Void,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(Punct::Dot) {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    key: MemberKey::Static(name),
                };
            } else if self.eat_punct(Punct::LBracket) {
                let key = self.expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    key: MemberKey::Computed(Box::new(key)),
                };
            } else if self.eat_punct(Punct::LParen) {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.eat_punct(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat_punct(Punct::RParen) {
                return Ok(args);
            }
            self.expect_punct(Punct::Comma, "',' or ')'")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n)))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                Ok(Expr::This)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                Ok(Expr::Function(self.function_rest(false)?))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat_punct(Punct::RBracket) {
                    items.push(self.assignment()?);
                    if !self.is_punct(Punct::RBracket) {
                        self.expect_punct(Punct::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                let mut props = Vec::new();
                while !self.eat_punct(Punct::RBrace) {
                    let key = self.property_name()?;
                    self.expect_punct(Punct::Colon, "':'")?;
                    props.push((key, self.assignment()?));
                    if !self.is_punct(Punct::RBrace) {
                        self.expect_punct(Punct::Comma, "',' or '}'")?;
                    }
                }
                Ok(Expr::Object(props))
            }
            _ => Err(self.error("unexpected token")),
        }
    }
}
