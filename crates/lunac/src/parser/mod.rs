//! Recursive-descent parser with a precedence-climbing expression
//! sub-parser, per spec.md §4.2's table. One token of lookahead, plus a
//! second lookahead slot used only to disambiguate `for name = ...` from
//! `for name, ... in ...`.

pub mod ast;

use ast::*;

use crate::error::{ParseError, Position};
use crate::gc::Gc;
use crate::lexer::{ByteSource, Lexer, TokenDetail, TokenKind};

type PResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    gc: &'a mut Gc,
    module: String,
    cur: TokenDetail,
    ahead: Option<TokenDetail>,
    next_loop_id: LoopId,
}

impl<'a> Parser<'a> {
    pub fn new(module: impl Into<String>, source: &'a mut dyn ByteSource, gc: &'a mut Gc) -> PResult<Self> {
        let module = module.into();
        let mut lexer = Lexer::new(module.clone(), source);
        let cur = lexer.next_token(gc).map_err(lex_to_parse)?;
        Ok(Parser { lexer, gc, module, cur, ahead: None, next_loop_id: 1 })
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(
            Position::new(self.module.clone(), self.cur.line),
            format!("{} (near '{}')", message.into(), self.token_text()),
        )
    }

    fn token_text(&self) -> String {
        if !self.cur.text.is_empty() {
            self.cur.text.clone()
        } else {
            format!("{:?}", self.cur.kind)
        }
    }

    fn bump(&mut self) -> PResult<TokenDetail> {
        let next = match self.ahead.take() {
            Some(t) => t,
            None => self.lexer.next_token(self.gc).map_err(lex_to_parse)?,
        };
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn peek2(&mut self) -> PResult<&TokenDetail> {
        if self.ahead.is_none() {
            self.ahead = Some(self.lexer.next_token(self.gc).map_err(lex_to_parse)?);
        }
        Ok(self.ahead.as_ref().unwrap())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.cur.kind == kind
    }

    fn accept(&mut self, kind: TokenKind) -> PResult<bool> {
        if self.check(kind) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<TokenDetail> {
        if !self.check(kind) {
            return Err(self.err(format!("expected {:?}", kind)));
        }
        self.bump()
    }

    fn expect_name(&mut self) -> PResult<String> {
        if !self.check(TokenKind::Name) {
            return Err(self.err("expected a name"));
        }
        let tok = self.bump()?;
        Ok(tok.text)
    }

    fn new_loop_id(&mut self) -> LoopId {
        let id = self.next_loop_id;
        self.next_loop_id += 1;
        id
    }

    // ---- entry point ----

    pub fn parse_chunk(&mut self) -> PResult<Block> {
        let block = self.parse_block()?;
        self.expect(TokenKind::Eof)?;
        Ok(block)
    }

    fn block_end(&self) -> bool {
        matches!(
            self.cur.kind,
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
        )
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let mut stats = Vec::new();
        while !self.block_end() {
            if self.check(TokenKind::Return) {
                stats.push(self.parse_return()?);
                break;
            }
            if let Some(stat) = self.parse_statement()? {
                stats.push(stat);
            }
        }
        Ok(Block { stats })
    }

    fn parse_return(&mut self) -> PResult<Stat> {
        let line = self.cur.line;
        self.bump()?; // 'return'
        let exprs = if self.block_end() || self.check(TokenKind::Semicolon) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.accept(TokenKind::Semicolon)?;
        Ok(Stat::Return { exprs, line })
    }

    fn parse_statement(&mut self) -> PResult<Option<Stat>> {
        match self.cur.kind {
            TokenKind::Semicolon => {
                self.bump()?;
                Ok(None)
            }
            TokenKind::Break => {
                let line = self.cur.line;
                self.bump()?;
                Ok(Some(Stat::Break { target: std::cell::Cell::new(0), line }))
            }
            TokenKind::Do => {
                self.bump()?;
                let block = self.parse_block()?;
                self.expect(TokenKind::End)?;
                Ok(Some(Stat::Do(block)))
            }
            TokenKind::While => Ok(Some(self.parse_while()?)),
            TokenKind::Repeat => Ok(Some(self.parse_repeat()?)),
            TokenKind::If => Ok(Some(self.parse_if()?)),
            TokenKind::For => Ok(Some(self.parse_for()?)),
            TokenKind::Function => Ok(Some(self.parse_function_stat()?)),
            TokenKind::Local => Ok(Some(self.parse_local()?)),
            _ => Ok(Some(self.parse_expr_or_assign_stat()?)),
        }
    }

    fn parse_while(&mut self) -> PResult<Stat> {
        self.bump()?; // 'while'
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End)?;
        Ok(Stat::While(Box::new(WhileStat { id: self.new_loop_id(), cond, body })))
    }

    fn parse_repeat(&mut self) -> PResult<Stat> {
        self.bump()?; // 'repeat'
        let body = self.parse_block()?;
        self.expect(TokenKind::Until)?;
        let cond = self.parse_expr()?;
        Ok(Stat::Repeat(Box::new(RepeatStat { id: self.new_loop_id(), body, cond })))
    }

    fn parse_if(&mut self) -> PResult<Stat> {
        self.bump()?; // 'if'
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then)?;
        branches.push((cond, self.parse_block()?));
        while self.check(TokenKind::Elseif) {
            self.bump()?;
            let cond = self.parse_expr()?;
            self.expect(TokenKind::Then)?;
            branches.push((cond, self.parse_block()?));
        }
        let else_block = if self.accept(TokenKind::Else)? { Some(self.parse_block()?) } else { None };
        self.expect(TokenKind::End)?;
        Ok(Stat::If(Box::new(IfStat { branches, else_block })))
    }

    fn parse_for(&mut self) -> PResult<Stat> {
        let line = self.cur.line;
        self.bump()?; // 'for'
        let first_name = self.expect_name()?;
        if self.check(TokenKind::Assign) {
            self.bump()?;
            let start = self.parse_expr()?;
            self.expect(TokenKind::Comma)?;
            let stop = self.parse_expr()?;
            let step = if self.accept(TokenKind::Comma)? { Some(self.parse_expr()?) } else { None };
            self.expect(TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End)?;
            return Ok(Stat::NumericFor(Box::new(NumericForStat {
                id: self.new_loop_id(),
                var: first_name,
                start,
                stop,
                step,
                body,
                line,
            })));
        }
        let mut names = vec![first_name];
        while self.accept(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::In)?;
        let exprs = self.parse_expr_list()?;
        self.expect(TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End)?;
        Ok(Stat::GenericFor(Box::new(GenericForStat { id: self.new_loop_id(), names, exprs, body, line })))
    }

    /// `function a.b.c:m(...) ... end` desugars to an assignment of a
    /// function expression into the `a.b.c.m` var chain; `local function`
    /// is its own AST node (§SPEC_FULL 4.2 addition) since the name must be
    /// visible for recursive calls inside the body, unlike the plain-local
    /// desugaring.
    fn parse_function_stat(&mut self) -> PResult<Stat> {
        let line = self.cur.line;
        self.bump()?; // 'function'
        let first = self.expect_name()?;
        let mut target: Expr = Expr::Name(NameRef::new(first.clone(), line));
        let mut debug_name = first;
        let mut has_self = false;
        loop {
            if self.accept(TokenKind::Dot)? {
                let field = self.expect_name()?;
                debug_name = format!("{}.{}", debug_name, field);
                target = Expr::Index {
                    obj: Box::new(target),
                    key: Box::new(Expr::Str(field)),
                    sem_op: std::cell::Cell::new(SemOp::Write),
                };
            } else if self.accept(TokenKind::Colon)? {
                let field = self.expect_name()?;
                debug_name = format!("{}:{}", debug_name, field);
                target = Expr::Index {
                    obj: Box::new(target),
                    key: Box::new(Expr::Str(field)),
                    sem_op: std::cell::Cell::new(SemOp::Write),
                };
                has_self = true;
                break;
            } else {
                break;
            }
        }
        let body = self.parse_function_body(has_self, line, Some(debug_name))?;
        Ok(Stat::Assign { targets: vec![target], exprs: vec![Expr::Function(Box::new(body))], line })
    }

    fn parse_local(&mut self) -> PResult<Stat> {
        let line = self.cur.line;
        self.bump()?; // 'local'
        if self.accept(TokenKind::Function)? {
            let name = self.expect_name()?;
            let body = self.parse_function_body(false, line, Some(name.clone()))?;
            return Ok(Stat::LocalFunction { name, body: Box::new(body), line });
        }
        let mut names = vec![self.expect_name()?];
        while self.accept(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        let exprs = if self.accept(TokenKind::Assign)? { self.parse_expr_list()? } else { Vec::new() };
        Ok(Stat::Local { names, exprs, line })
    }

    fn parse_function_body(
        &mut self,
        has_self: bool,
        line_defined: u32,
        name_for_debug: Option<String>,
    ) -> PResult<FunctionBody> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if has_self {
            params.push("self".to_string());
        }
        let mut is_vararg = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.check(TokenKind::Ellipsis) {
                    self.bump()?;
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.accept(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End)?;
        Ok(FunctionBody {
            params,
            has_self,
            is_vararg: std::cell::Cell::new(is_vararg),
            body,
            line_defined,
            name_for_debug,
        })
    }

    /// A bare expression statement must be a function call; an assignment's
    /// left-hand side must be a chain of vars. Parses the shared prefix
    /// (a "suffixed expression") once and branches on what follows.
    fn parse_expr_or_assign_stat(&mut self) -> PResult<Stat> {
        let line = self.cur.line;
        let first = self.parse_suffixed_expr()?;
        if self.check(TokenKind::Assign) || self.check(TokenKind::Comma) {
            let mut targets = vec![first];
            while self.accept(TokenKind::Comma)? {
                targets.push(self.parse_suffixed_expr()?);
            }
            for t in &targets {
                if !t.is_var() {
                    return Err(self.err("cannot assign to a function call"));
                }
            }
            self.expect(TokenKind::Assign)?;
            let exprs = self.parse_expr_list()?;
            return Ok(Stat::Assign { targets, exprs, line });
        }
        if !matches!(first, Expr::Call { .. }) {
            return Err(self.err("syntax error: expression statement must be a function call"));
        }
        Ok(Stat::Expr(first))
    }

    fn parse_expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept(TokenKind::Comma)? {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_binary_expr(0)
    }

    fn bin_op(kind: TokenKind) -> Option<(BinOp, u8, u8)> {
        // (op, left binding power, right binding power); right < left means
        // right-associative.
        Some(match kind {
            TokenKind::Caret => (BinOp::Pow, 100, 99),
            TokenKind::Star => (BinOp::Mul, 80, 81),
            TokenKind::Slash => (BinOp::Div, 80, 81),
            TokenKind::Percent => (BinOp::Mod, 80, 81),
            TokenKind::Plus => (BinOp::Add, 70, 71),
            TokenKind::Minus => (BinOp::Sub, 70, 71),
            TokenKind::DotDot => (BinOp::Concat, 60, 61),
            TokenKind::Less => (BinOp::Lt, 50, 51),
            TokenKind::Greater => (BinOp::Gt, 50, 51),
            TokenKind::LessEq => (BinOp::Le, 50, 51),
            TokenKind::GreaterEq => (BinOp::Ge, 50, 51),
            TokenKind::NotEq => (BinOp::Ne, 50, 51),
            TokenKind::EqEq => (BinOp::Eq, 50, 51),
            TokenKind::And => (BinOp::And, 40, 41),
            TokenKind::Or => (BinOp::Or, 30, 31),
            _ => return None,
        })
    }

    fn parse_binary_expr(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary_expr()?;
        while let Some((op, left_bp, right_bp)) = Self::bin_op(self.cur.kind) {
            if left_bp < min_bp {
                break;
            }
            let line = self.cur.line;
            self.bump()?;
            let rhs = self.parse_binary_expr(right_bp)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                type_hint: std::cell::Cell::new(TypeHint::Unknown),
                line,
            };
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> PResult<Expr> {
        let op = match self.cur.kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Hash => Some(UnOp::Len),
            _ => None,
        };
        if let Some(op) = op {
            let line = self.cur.line;
            self.bump()?;
            // unary operators bind at precedence level 90; only `^`, at
            // 100, is tighter, and `^`'s sub-parse already starts below its
            // own level so `-x^2` parses as `-(x^2)`.
            let operand = self.parse_binary_expr(90)?;
            return Ok(Expr::Unary { op, operand: Box::new(operand), type_hint: std::cell::Cell::new(TypeHint::Unknown), line });
        }
        self.parse_simple_expr()
    }

    fn parse_simple_expr(&mut self) -> PResult<Expr> {
        match self.cur.kind {
            TokenKind::Nil => {
                self.bump()?;
                Ok(Expr::Nil)
            }
            TokenKind::True => {
                self.bump()?;
                Ok(Expr::True)
            }
            TokenKind::False => {
                self.bump()?;
                Ok(Expr::False)
            }
            TokenKind::Number => {
                let tok = self.bump()?;
                Ok(Expr::Number(tok.number.expect("lexer always fills Number tokens")))
            }
            TokenKind::String => {
                let tok = self.bump()?;
                Ok(Expr::Str(tok.text))
            }
            TokenKind::Ellipsis => {
                let line = self.cur.line;
                self.bump()?;
                Ok(Expr::VarArg { type_hint: std::cell::Cell::new(TypeHint::VarArg), line })
            }
            TokenKind::Function => {
                let line = self.cur.line;
                self.bump()?;
                let body = self.parse_function_body(false, line, None)?;
                Ok(Expr::Function(Box::new(body)))
            }
            TokenKind::LBrace => self.parse_table_constructor(),
            _ => self.parse_suffixed_expr(),
        }
    }

    fn parse_table_constructor(&mut self) -> PResult<Expr> {
        self.expect(TokenKind::LBrace)?;
        let mut ctor = TableConstructor::default();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::LBracket) {
                self.bump()?;
                let key = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                ctor.keyed_items.push((key, value));
            } else if self.check(TokenKind::Name) && matches!(self.peek2()?.kind, TokenKind::Assign) {
                let name = self.expect_name()?;
                self.bump()?; // '='
                let value = self.parse_expr()?;
                ctor.keyed_items.push((Expr::Str(name), value));
            } else {
                ctor.array_items.push(self.parse_expr()?);
            }
            if !self.accept(TokenKind::Comma)? && !self.accept(TokenKind::Semicolon)? {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Table(ctor))
    }

    /// A "prefix expression" (`name` or `(expr)`) followed by any chain of
    /// `.name`, `[expr]`, `:name(args)`, `(args)`, or a table/string call
    /// argument.
    fn parse_suffixed_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let line = self.cur.line;
            match self.cur.kind {
                TokenKind::Dot => {
                    self.bump()?;
                    let field = self.expect_name()?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(Expr::Str(field)),
                        sem_op: std::cell::Cell::new(SemOp::Read),
                    };
                }
                TokenKind::LBracket => {
                    self.bump()?;
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index { obj: Box::new(expr), key: Box::new(key), sem_op: std::cell::Cell::new(SemOp::Read) };
                }
                TokenKind::Colon => {
                    self.bump()?;
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::Call { callee: Box::new(expr), method_name: Some(method), args, line };
                }
                TokenKind::LParen | TokenKind::String | TokenKind::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call { callee: Box::new(expr), method_name: None, args, line };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Expr>> {
        match self.cur.kind {
            TokenKind::String => {
                let tok = self.bump()?;
                Ok(vec![Expr::Str(tok.text)])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table_constructor()?]),
            TokenKind::LParen => {
                self.bump()?;
                let args = if self.check(TokenKind::RParen) { Vec::new() } else { self.parse_expr_list()? };
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            _ => Err(self.err("expected function call arguments")),
        }
    }

    fn parse_primary_expr(&mut self) -> PResult<Expr> {
        match self.cur.kind {
            TokenKind::Name => {
                let tok = self.bump()?;
                Ok(Expr::Name(NameRef::new(tok.text, tok.line)))
            }
            TokenKind::LParen => {
                self.bump()?;
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            // A real base case: `parse_simple_expr`'s own `_` arm delegates
            // here for anything that isn't a literal/function/table, so
            // this must not delegate back — every other prefix-expression
            // start is a malformed expression, not a retry.
            _ => Err(self.err("unexpected symbol")),
        }
    }
}

fn lex_to_parse(e: crate::error::LexError) -> ParseError {
    ParseError::new(e.pos, e.message)
}
