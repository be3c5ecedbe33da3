//! Single-pass semantic analyzer: walks the AST produced by the parser and
//! mutates it in place (spec §4.3), resolving identifier scope, read/write
//! intent, `break` targets, variadic markers, and bottom-up type hints.
//!
//! Grounded on the teacher's scope-stack approach (`compiler/func_state.rs`'s
//! block/local bookkeeping), adapted here to classify rather than allocate:
//! this pass never assigns registers, it only decides *where* a name lives
//! (`Local`/`Upvalue`/`Global`) so the code generator can do its own
//! register-aware resolution afterward (§4.4 already tracks its own block
//! scopes for that purpose).

use crate::error::{Position, SemanticError};
use crate::parser::ast::*;

type SResult<T> = Result<T, SemanticError>;

struct BlockCtx {
    locals: Vec<String>,
}

struct FuncCtx {
    blocks: Vec<BlockCtx>,
    is_vararg: bool,
    loop_stack: Vec<LoopId>,
}

impl FuncCtx {
    fn declares(&self, name: &str) -> bool {
        self.blocks.iter().rev().any(|b| b.locals.iter().any(|l| l == name))
    }
}

pub struct Analyzer<'a> {
    module: &'a str,
    funcs: Vec<FuncCtx>,
}

impl<'a> Analyzer<'a> {
    pub fn new(module: &'a str) -> Self {
        Analyzer { module, funcs: Vec::new() }
    }

    fn err(&self, line: u32, message: impl Into<String>) -> SemanticError {
        SemanticError::new(Position::new(self.module.to_string(), line), message)
    }

    /// Entry point: analyzes the top-level chunk as an implicitly variadic
    /// function with no parameters (matching how a module is invoked).
    pub fn analyze_chunk(&mut self, block: &Block) -> SResult<()> {
        self.funcs.push(FuncCtx { blocks: vec![BlockCtx { locals: Vec::new() }], is_vararg: true, loop_stack: Vec::new() });
        self.analyze_block(block)?;
        self.funcs.pop();
        Ok(())
    }

    fn cur(&mut self) -> &mut FuncCtx {
        self.funcs.last_mut().expect("analyzer always has an active function context")
    }

    fn push_block(&mut self) {
        self.cur().blocks.push(BlockCtx { locals: Vec::new() });
    }

    fn pop_block(&mut self) {
        self.cur().blocks.pop();
    }

    fn declare_local(&mut self, name: &str) {
        self.cur().blocks.last_mut().expect("block pushed on entry").locals.push(name.to_string());
    }

    fn resolve(&self, name: &str) -> Scope {
        let cur = self.funcs.last().expect("active function context");
        if cur.declares(name) {
            return Scope::Local(0);
        }
        for outer in self.funcs[..self.funcs.len() - 1].iter().rev() {
            if outer.declares(name) {
                return Scope::Upvalue(0);
            }
        }
        Scope::Global
    }

    fn analyze_block(&mut self, block: &Block) -> SResult<()> {
        self.push_block();
        for stat in &block.stats {
            self.analyze_stat(stat)?;
        }
        self.pop_block();
        Ok(())
    }

    fn analyze_stat(&mut self, stat: &Stat) -> SResult<()> {
        match stat {
            Stat::Expr(e) => {
                self.analyze_expr(e)?;
            }
            Stat::Local { names, exprs, .. } => {
                for e in exprs {
                    self.analyze_expr(e)?;
                }
                for n in names {
                    self.declare_local(n);
                }
            }
            Stat::LocalFunction { name, body, .. } => {
                // declared before the body so the function can recurse by name
                self.declare_local(name);
                self.analyze_function(body)?;
            }
            Stat::Assign { targets, exprs, .. } => {
                for e in exprs {
                    self.analyze_expr(e)?;
                }
                for t in targets {
                    self.analyze_lvalue(t)?;
                }
            }
            Stat::Do(block) => self.analyze_block(block)?,
            Stat::While(w) => {
                self.analyze_expr(&w.cond)?;
                self.cur().loop_stack.push(w.id);
                self.analyze_block(&w.body)?;
                self.cur().loop_stack.pop();
            }
            Stat::Repeat(r) => {
                // `until` can see locals declared in the body, so the
                // condition is analyzed inside the same block scope.
                self.push_block();
                self.cur().loop_stack.push(r.id);
                for s in &r.body.stats {
                    self.analyze_stat(s)?;
                }
                self.analyze_expr(&r.cond)?;
                self.cur().loop_stack.pop();
                self.pop_block();
            }
            Stat::If(i) => {
                for (cond, block) in &i.branches {
                    self.analyze_expr(cond)?;
                    self.analyze_block(block)?;
                }
                if let Some(b) = &i.else_block {
                    self.analyze_block(b)?;
                }
            }
            Stat::NumericFor(f) => {
                self.analyze_expr(&f.start)?;
                self.analyze_expr(&f.stop)?;
                if let Some(step) = &f.step {
                    self.analyze_expr(step)?;
                }
                self.push_block();
                self.declare_local(&f.var);
                self.cur().loop_stack.push(f.id);
                self.analyze_block(&f.body)?;
                self.cur().loop_stack.pop();
                self.pop_block();
            }
            Stat::GenericFor(f) => {
                for e in &f.exprs {
                    self.analyze_expr(e)?;
                }
                self.push_block();
                for n in &f.names {
                    self.declare_local(n);
                }
                self.cur().loop_stack.push(f.id);
                self.analyze_block(&f.body)?;
                self.cur().loop_stack.pop();
                self.pop_block();
            }
            Stat::Return { exprs, .. } => {
                for e in exprs {
                    self.analyze_expr(e)?;
                }
            }
            Stat::Break { target, line } => {
                let Some(&id) = self.cur().loop_stack.last() else {
                    return Err(self.err(*line, "not in any loop"));
                };
                target.set(id);
            }
        }
        Ok(())
    }

    /// An lvalue occurrence: the outermost `Index`/`Name` is a Write, but
    /// any nested object/key sub-expressions are ordinary reads.
    fn analyze_lvalue(&mut self, expr: &Expr) -> SResult<()> {
        match expr {
            Expr::Name(n) => {
                n.sem_op.set(SemOp::Write);
                n.scope.set(self.resolve(&n.name));
            }
            Expr::Index { obj, key, sem_op } => {
                sem_op.set(SemOp::Write);
                self.analyze_expr(obj)?;
                self.analyze_expr(key)?;
            }
            _ => unreachable!("parser only accepts var chains as assignment targets"),
        }
        Ok(())
    }

    /// Infers and records the bottom-up type hint for `expr`, recursing into
    /// subexpressions and validating operator/operand compatibility per
    /// spec §4.3 point 4.
    fn analyze_expr(&mut self, expr: &Expr) -> SResult<TypeHint> {
        let hint = match expr {
            Expr::Nil => TypeHint::Nil,
            Expr::True | Expr::False => TypeHint::Bool,
            Expr::Number(_) => TypeHint::Number,
            Expr::Str(_) => TypeHint::String,
            Expr::VarArg { type_hint, line } => {
                if !self.cur().is_vararg {
                    return Err(self.err(*line, "function has no '...' param"));
                }
                type_hint.set(TypeHint::VarArg);
                TypeHint::VarArg
            }
            Expr::Name(n) => {
                n.sem_op.set(SemOp::Read);
                let scope = self.resolve(&n.name);
                n.scope.set(scope);
                TypeHint::Unknown
            }
            Expr::Index { obj, key, sem_op } => {
                sem_op.set(SemOp::Read);
                self.analyze_expr(obj)?;
                self.analyze_expr(key)?;
                TypeHint::Unknown
            }
            Expr::Call { callee, args, .. } => {
                self.analyze_expr(callee)?;
                for a in args {
                    self.analyze_expr(a)?;
                }
                TypeHint::Unknown
            }
            Expr::Function(body) => {
                self.analyze_function(body)?;
                TypeHint::Unknown
            }
            Expr::Table(ctor) => {
                for item in &ctor.array_items {
                    self.analyze_expr(item)?;
                }
                for (k, v) in &ctor.keyed_items {
                    self.analyze_expr(k)?;
                    self.analyze_expr(v)?;
                }
                TypeHint::Table
            }
            Expr::Paren(inner) => self.analyze_expr(inner)?,
            Expr::Unary { op, operand, type_hint, line } => {
                let operand_hint = self.analyze_expr(operand)?;
                let hint = self.check_unary(*op, operand_hint, *line)?;
                type_hint.set(hint);
                hint
            }
            Expr::Binary { op, lhs, rhs, type_hint, line } => {
                let l = self.analyze_expr(lhs)?;
                let r = self.analyze_expr(rhs)?;
                let hint = self.check_binary(*op, l, r, *line)?;
                type_hint.set(hint);
                hint
            }
        };
        Ok(hint)
    }

    fn analyze_function(&mut self, body: &FunctionBody) -> SResult<()> {
        self.funcs.push(FuncCtx {
            blocks: vec![BlockCtx { locals: body.params.clone() }],
            is_vararg: body.is_vararg.get(),
            loop_stack: Vec::new(),
        });
        self.analyze_block(&body.body)?;
        self.funcs.pop();
        Ok(())
    }

    fn check_unary(&self, op: UnOp, operand: TypeHint, line: u32) -> SResult<TypeHint> {
        match op {
            UnOp::Neg => match operand {
                TypeHint::Number | TypeHint::Unknown => Ok(TypeHint::Number),
                other => Err(self.err(line, format!("attempt to perform arithmetic on a {:?} value", other))),
            },
            UnOp::Not => Ok(TypeHint::Bool),
            UnOp::Len => match operand {
                TypeHint::Table | TypeHint::String | TypeHint::Unknown => Ok(TypeHint::Number),
                other => Err(self.err(line, format!("attempt to get length of a {:?} value", other))),
            },
        }
    }

    fn check_binary(&self, op: BinOp, l: TypeHint, r: TypeHint, line: u32) -> SResult<TypeHint> {
        use BinOp::*;
        let is_numberish = |h: TypeHint| matches!(h, TypeHint::Number | TypeHint::Unknown);
        let is_stringish = |h: TypeHint| matches!(h, TypeHint::Number | TypeHint::String | TypeHint::Unknown);
        match op {
            Add | Sub | Mul | Div | Mod | Pow => {
                if is_numberish(l) && is_numberish(r) {
                    Ok(TypeHint::Number)
                } else {
                    Err(self.err(line, "attempt to perform arithmetic on a non-number value"))
                }
            }
            Concat => {
                if is_stringish(l) && is_stringish(r) {
                    Ok(TypeHint::String)
                } else {
                    Err(self.err(line, "attempt to concatenate a non-string/non-number value"))
                }
            }
            Lt | Le | Gt | Ge => {
                let both_number = is_numberish(l) && is_numberish(r);
                let both_string = matches!(l, TypeHint::String | TypeHint::Unknown) && matches!(r, TypeHint::String | TypeHint::Unknown);
                if both_number || both_string {
                    Ok(TypeHint::Bool)
                } else {
                    Err(self.err(line, "attempt to compare incompatible values"))
                }
            }
            Eq | Ne | And | Or => Ok(TypeHint::Bool),
        }
    }
}
