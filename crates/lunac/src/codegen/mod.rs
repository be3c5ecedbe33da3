//! AST → function prototype code generator (spec §4.4).
//!
//! Bottom-up, target-register-driven traversal: every expression-compiling
//! method takes the destination register it must leave its single value in,
//! which avoids the teacher's separate `expdesc`/"discharge" abstraction
//! (`compiler/expdesc.rs`) at the cost of an occasional redundant `Move` —
//! an acceptable trade for a from-scratch register allocator. Holds a stack
//! of [`func_state::FuncState`] contexts, innermost last, so upvalue
//! resolution can walk outward through enclosing functions still being
//! compiled (§4.4 "Upvalue resolution").

mod func_state;

use func_state::FuncState;

use crate::error::{CodeGenerateError, Position};
use crate::gc::ids::ProtoId;
use crate::gc::Gc;
use crate::opcode::{self, encode_a, encode_abc, encode_abx, encode_asbx, OpCode};
use crate::parser::ast::*;
use crate::value::{LuaValue, Prototype, UpvalDesc};

type CgResult<T> = Result<T, CodeGenerateError>;

/// Whether a just-compiled expression list ends in a statically-known
/// number of values, or in a dynamic tail resolved at runtime via the
/// stack's top-of-frame marker (a trailing call or `...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprListResult {
    Fixed(u32),
    Any,
}

pub struct Codegen<'a> {
    gc: &'a mut Gc,
    module: String,
    funcs: Vec<FuncState>,
}

/// Compiles a full source chunk into a prototype, allocated in the GC heap.
/// The chunk is treated as an implicitly variadic, zero-parameter function
/// (spec §6.4's module-load convention).
pub fn compile_chunk(module: &str, block: &Block, gc: &mut Gc) -> CgResult<ProtoId> {
    let mut cg = Codegen { gc, module: module.to_string(), funcs: Vec::new() };
    let mut fs = FuncState::new(module.to_string(), 0);
    fs.is_vararg = true;
    cg.funcs.push(fs);
    cg.gen_block(block)?;
    cg.finish_implicit_return(block);
    let fs = cg.funcs.pop().expect("chunk function pushed above");
    let proto = build_prototype(fs);
    Ok(cg.gc.new_proto(proto))
}

fn build_prototype(mut fs: FuncState) -> Prototype {
    let end_pc = fs.pc() as u32;
    for l in fs.locals_debug.iter_mut() {
        if l.end_pc == u32::MAX {
            l.end_pc = end_pc;
        }
    }
    Prototype {
        instructions: fs.instructions,
        constants: fs.constants,
        nested: fs.nested,
        upvalues: fs.upvalues,
        upvalue_names: fs.upval_names,
        num_params: fs.num_params,
        is_vararg: fs.is_vararg,
        max_stack_size: fs.max_reg,
        source_name: fs.source_name,
        line_defined: fs.line_defined,
        lines: fs.lines,
        locals_debug: fs.locals_debug,
    }
}

/// Best-effort source line for an expression, used to attribute jump/test
/// instructions generated for it; literals with no line of their own fall
/// back to `0` (debug-only information, never semantically load-bearing).
fn line_of(e: &Expr) -> u32 {
    match e {
        Expr::Name(n) => n.line,
        Expr::Binary { line, .. } | Expr::Unary { line, .. } | Expr::Call { line, .. } | Expr::VarArg { line, .. } => *line,
        Expr::Index { obj, .. } => line_of(obj),
        Expr::Paren(inner) => line_of(inner),
        _ => 0,
    }
}

fn binop_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Sub,
        BinOp::Mul => OpCode::Mul,
        BinOp::Div => OpCode::Div,
        BinOp::Mod => OpCode::Mod,
        BinOp::Pow => OpCode::Pow,
        BinOp::Concat => OpCode::Concat,
        BinOp::Lt => OpCode::Lt,
        BinOp::Le => OpCode::Le,
        BinOp::Gt => OpCode::Gt,
        BinOp::Ge => OpCode::Ge,
        BinOp::Eq => OpCode::Eq,
        BinOp::Ne => OpCode::Ne,
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators are generated separately"),
    }
}

impl<'a> Codegen<'a> {
    fn cur(&self) -> &FuncState {
        self.funcs.last().expect("at least one function context is always active")
    }

    fn cur_mut(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("at least one function context is always active")
    }

    fn err(&self, line: u32, message: impl Into<String>) -> CodeGenerateError {
        CodeGenerateError::new(Position::new(self.module.clone(), line), message)
    }

    /// A block ending in an explicit `return` is always well-formed (the
    /// parser only accepts `return` as a block's final statement), so an
    /// implicit zero-value return is only needed when it's absent.
    fn finish_implicit_return(&mut self, block: &Block) {
        let has_return = matches!(block.stats.last(), Some(Stat::Return { .. }));
        if !has_return {
            let line = self.cur().line_defined;
            self.cur_mut().emit(encode_asbx(OpCode::Ret, 0, 0), line);
        }
    }

    // ---- upvalues ----

    /// Resolves `name` as an upvalue of `self.funcs[level]`, recursively
    /// capturing it from an enclosing function's local (or its own upvalue)
    /// if not already recorded, per §4.4's chain-walking algorithm.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> CgResult<u8> {
        if let Some(idx) = self.funcs[level].upval_names.iter().position(|n| n == name) {
            return Ok(idx as u8);
        }
        if level == 0 {
            let line = self.funcs[level].line_defined;
            return Err(self.err(line, format!("internal: cannot resolve upvalue '{}'", name)));
        }
        let parent = level - 1;
        if let Some(register) = self.funcs[parent].find_local(name) {
            self.funcs[level].upvalues.push(UpvalDesc::ParentLocal { register });
            self.funcs[level].upval_names.push(name.to_string());
            return Ok((self.funcs[level].upvalues.len() - 1) as u8);
        }
        let parent_index = self.resolve_upvalue(parent, name)?;
        self.funcs[level].upvalues.push(UpvalDesc::ParentUpvalue { index: parent_index });
        self.funcs[level].upval_names.push(name.to_string());
        Ok((self.funcs[level].upvalues.len() - 1) as u8)
    }

    // ---- statements ----

    fn gen_block(&mut self, block: &Block) -> CgResult<()> {
        for stat in &block.stats {
            self.gen_stat(stat)?;
        }
        Ok(())
    }

    fn gen_scoped_block(&mut self, block: &Block) -> CgResult<()> {
        self.cur_mut().push_block();
        self.gen_block(block)?;
        self.cur_mut().pop_block();
        Ok(())
    }

    fn gen_stat(&mut self, stat: &Stat) -> CgResult<()> {
        match stat {
            Stat::Expr(e) => {
                let save = self.cur().next_reg;
                let dst = self.cur_mut().reserve_one()?;
                self.gen_call(e, dst, Some(0))?;
                self.cur_mut().next_reg = save;
            }
            Stat::Local { names, exprs, line } => {
                let start = self.cur_mut().reserve(names.len() as u8)?;
                self.gen_expr_list_fixed(exprs, start, names.len() as u32, *line)?;
                for (i, name) in names.iter().enumerate() {
                    self.cur_mut().declare_local(name, start + i as u8);
                }
            }
            Stat::LocalFunction { name, body, .. } => {
                let reg = self.cur_mut().reserve_one()?;
                self.cur_mut().declare_local(name, reg);
                self.gen_closure(body, reg)?;
            }
            Stat::Assign { targets, exprs, line } => {
                let start = self.cur_mut().reserve(targets.len() as u8)?;
                self.gen_expr_list_fixed(exprs, start, targets.len() as u32, *line)?;
                for (i, target) in targets.iter().enumerate() {
                    self.gen_assign_target(target, start + i as u8, *line)?;
                }
                self.cur_mut().next_reg = start;
            }
            Stat::Do(block) => self.gen_scoped_block(block)?,
            Stat::While(w) => self.gen_while(w)?,
            Stat::Repeat(r) => self.gen_repeat(r)?,
            Stat::If(i) => self.gen_if(i)?,
            Stat::NumericFor(f) => self.gen_numeric_for(f)?,
            Stat::GenericFor(f) => self.gen_generic_for(f)?,
            Stat::Return { exprs, line } => self.gen_return(exprs, *line)?,
            Stat::Break { line, .. } => {
                let idx = self.cur_mut().emit_jump(OpCode::Jmp, 0, *line);
                self.cur_mut().record_break(idx);
            }
        }
        Ok(())
    }

    fn gen_while(&mut self, w: &WhileStat) -> CgResult<()> {
        let line = line_of(&w.cond);
        let head = self.cur().pc();
        let cond_reg = self.cur_mut().reserve_one()?;
        self.gen_expr_to(&w.cond, cond_reg)?;
        self.cur_mut().next_reg = cond_reg;
        let exit_jump = self.cur_mut().emit_jump(OpCode::JmpFalse, cond_reg, line);
        self.cur_mut().enter_loop();
        self.gen_scoped_block(&w.body)?;
        self.cur_mut().emit_jump_to(OpCode::Jmp, 0, head, line);
        self.cur_mut().exit_loop();
        let tail = self.cur().pc();
        self.cur_mut().patch_jump(exit_jump, tail);
        Ok(())
    }

    fn gen_repeat(&mut self, r: &RepeatStat) -> CgResult<()> {
        let head = self.cur().pc();
        self.cur_mut().enter_loop();
        self.cur_mut().push_block();
        self.gen_block(&r.body)?;
        let line = line_of(&r.cond);
        let cond_reg = self.cur_mut().reserve_one()?;
        self.gen_expr_to(&r.cond, cond_reg)?;
        self.cur_mut().next_reg = cond_reg;
        self.cur_mut().emit_jump_to(OpCode::JmpFalse, cond_reg, head, line);
        self.cur_mut().pop_block();
        self.cur_mut().exit_loop();
        Ok(())
    }

    fn gen_if(&mut self, i: &IfStat) -> CgResult<()> {
        let mut end_jumps = Vec::new();
        let mut prev_false: Option<usize> = None;
        let n = i.branches.len();
        for (idx, (cond, block)) in i.branches.iter().enumerate() {
            if let Some(pj) = prev_false.take() {
                let here = self.cur().pc();
                self.cur_mut().patch_jump(pj, here);
            }
            let line = line_of(cond);
            let cond_reg = self.cur_mut().reserve_one()?;
            self.gen_expr_to(cond, cond_reg)?;
            self.cur_mut().next_reg = cond_reg;
            let false_jump = self.cur_mut().emit_jump(OpCode::JmpFalse, cond_reg, line);
            self.gen_scoped_block(block)?;
            if idx + 1 < n || i.else_block.is_some() {
                end_jumps.push(self.cur_mut().emit_jump(OpCode::Jmp, 0, line));
            }
            prev_false = Some(false_jump);
        }
        if let Some(pj) = prev_false.take() {
            let here = self.cur().pc();
            self.cur_mut().patch_jump(pj, here);
        }
        if let Some(else_block) = &i.else_block {
            self.gen_scoped_block(else_block)?;
        }
        let end = self.cur().pc();
        for j in end_jumps {
            self.cur_mut().patch_jump(j, end);
        }
        Ok(())
    }

    /// `for v=a,b[,c] do B end`. Three hidden registers hold the running
    /// value, limit and step; `ForPrep` validates all three are numbers
    /// once, then `ForStep` — the loop head — tests termination against the
    /// step's sign and carries the pending exit jump. The user-visible `v`
    /// is a fresh copy of the running value made every iteration, so
    /// reassigning it inside the body can't corrupt the loop's own counter.
    fn gen_numeric_for(&mut self, f: &NumericForStat) -> CgResult<()> {
        let line = f.line;
        let base = self.cur_mut().reserve(3)?; // var, limit, step
        self.gen_expr_to(&f.start, base)?;
        self.gen_expr_to(&f.stop, base + 1)?;
        match &f.step {
            Some(e) => {
                self.gen_expr_to(e, base + 2)?;
            }
            None => {
                self.cur_mut().emit_load_int(base + 2, 1, line);
            }
        }
        self.cur_mut().emit(encode_a(OpCode::ForPrep, base), line);
        self.cur_mut().enter_loop();
        let head = self.cur().pc();
        let exit_jump = self.cur_mut().emit_jump(OpCode::ForStep, base, line);
        let v_reg = self.cur_mut().reserve_one()?;
        self.cur_mut().emit(encode_abc(OpCode::Move, v_reg, base, 0), line);
        self.cur_mut().push_block();
        self.cur_mut().declare_local(&f.var, v_reg);
        self.gen_block(&f.body)?;
        self.cur_mut().pop_block();
        self.cur_mut().next_reg = v_reg;
        self.cur_mut().emit(encode_abc(OpCode::Add, base, base, base + 2), line);
        self.cur_mut().emit_jump_to(OpCode::Jmp, 0, head, line);
        self.cur_mut().exit_loop();
        let tail = self.cur().pc();
        self.cur_mut().patch_jump(exit_jump, tail);
        self.cur_mut().next_reg = base;
        Ok(())
    }

    /// `for k1,...,kn in explist do B end`. The iterator triple is copied
    /// into a fresh call frame every iteration; the call's own result
    /// registers double as the user-visible loop names, so no extra copy is
    /// needed there. `JmpNil` on the first result ends the loop.
    fn gen_generic_for(&mut self, f: &GenericForStat) -> CgResult<()> {
        let line = f.line;
        let base = self.cur_mut().reserve(3)?; // iterator fn, state, control
        self.gen_expr_list_fixed(&f.exprs, base, 3, line)?;
        self.cur_mut().enter_loop();
        let head = self.cur().pc();
        let nres = f.names.len() as u8;
        let span = nres.max(3);
        let call_base = self.cur_mut().reserve(span)?;
        self.cur_mut().emit(encode_abc(OpCode::Move, call_base, base, 0), line);
        self.cur_mut().emit(encode_abc(OpCode::Move, call_base + 1, base + 1, 0), line);
        self.cur_mut().emit(encode_abc(OpCode::Move, call_base + 2, base + 2, 0), line);
        let b = opcode::pack_count(Some(2));
        let c = opcode::pack_count(Some(nres as u32));
        self.cur_mut().emit(encode_abc(OpCode::Call, call_base, b, c), line);
        let exit_jump = self.cur_mut().emit_jump(OpCode::JmpNil, call_base, line);
        self.cur_mut().push_block();
        for (i, name) in f.names.iter().enumerate() {
            self.cur_mut().declare_local(name, call_base + i as u8);
        }
        self.gen_block(&f.body)?;
        self.cur_mut().pop_block();
        self.cur_mut().emit(encode_abc(OpCode::Move, base + 2, call_base, 0), line);
        self.cur_mut().next_reg = call_base;
        self.cur_mut().emit_jump_to(OpCode::Jmp, 0, head, line);
        self.cur_mut().exit_loop();
        let tail = self.cur().pc();
        self.cur_mut().patch_jump(exit_jump, tail);
        self.cur_mut().next_reg = base;
        Ok(())
    }

    fn gen_return(&mut self, exprs: &[Expr], line: u32) -> CgResult<()> {
        if exprs.is_empty() {
            self.cur_mut().emit(encode_asbx(OpCode::Ret, 0, 0), line);
            return Ok(());
        }
        let start = self.cur().next_reg;
        let result = self.gen_expr_list(exprs, start)?;
        let sbx = match result {
            ExprListResult::Any => -1,
            ExprListResult::Fixed(n) => n as i16,
        };
        self.cur_mut().emit(encode_asbx(OpCode::Ret, start, sbx), line);
        self.cur_mut().next_reg = start;
        Ok(())
    }

    fn gen_assign_target(&mut self, target: &Expr, src_reg: u8, line: u32) -> CgResult<()> {
        match target {
            Expr::Name(n) => match n.scope.get() {
                Scope::Local(_) => {
                    let reg = self
                        .cur()
                        .find_local(&n.name)
                        .ok_or_else(|| self.err(line, format!("internal: unresolved local '{}'", n.name)))?;
                    if reg != src_reg {
                        self.cur_mut().emit(encode_abc(OpCode::Move, reg, src_reg, 0), line);
                    }
                }
                Scope::Upvalue(_) => {
                    let idx = self.resolve_upvalue(self.funcs.len() - 1, &n.name)?;
                    self.cur_mut().emit(encode_abc(OpCode::SetUpval, src_reg, idx, 0), line);
                }
                Scope::Global | Scope::Unresolved => {
                    let sid = self.gc.new_string(&n.name);
                    let kidx = self.cur_mut().const_index(LuaValue::String(sid))?;
                    self.cur_mut().emit(encode_abx(OpCode::SetGlobal, src_reg, kidx), line);
                }
            },
            Expr::Index { obj, key, .. } => {
                let obj_reg = self.gen_expr_any(obj)?;
                let key_reg = self.gen_expr_any(key)?;
                self.cur_mut().emit(encode_abc(OpCode::SetTable, obj_reg, key_reg, src_reg), line);
                self.cur_mut().next_reg = obj_reg;
            }
            _ => unreachable!("parser only accepts var chains as assignment targets"),
        }
        Ok(())
    }

    // ---- expressions ----

    fn gen_expr_any(&mut self, e: &Expr) -> CgResult<u8> {
        let r = self.cur_mut().reserve_one()?;
        self.gen_expr_to(e, r)?;
        Ok(r)
    }

    fn gen_expr_to(&mut self, e: &Expr, dst: u8) -> CgResult<()> {
        match e {
            Expr::Nil => {
                self.cur_mut().emit(encode_abc(OpCode::LoadNil, dst, 1, 0), 0);
            }
            Expr::True => {
                self.cur_mut().emit(encode_abc(OpCode::LoadBool, dst, 1, 0), 0);
            }
            Expr::False => {
                self.cur_mut().emit(encode_abc(OpCode::LoadBool, dst, 0, 0), 0);
            }
            Expr::Number(n) => self.gen_number(*n, dst),
            Expr::Str(s) => {
                let sid = self.gc.new_string(s);
                let kidx = self.cur_mut().const_index(LuaValue::String(sid))?;
                self.cur_mut().emit(encode_abx(OpCode::LoadConst, dst, kidx), 0);
            }
            Expr::VarArg { line, .. } => {
                self.cur_mut().emit(encode_asbx(OpCode::VarArg, dst, 1), *line);
            }
            Expr::Name(n) => self.gen_name_read(n, dst)?,
            Expr::Index { obj, key, .. } => {
                let obj_reg = self.gen_expr_any(obj)?;
                let key_reg = self.gen_expr_any(key)?;
                self.cur_mut().emit(encode_abc(OpCode::GetTable, dst, obj_reg, key_reg), line_of(obj));
                self.cur_mut().next_reg = obj_reg;
            }
            Expr::Call { .. } => self.gen_call(e, dst, Some(1))?,
            Expr::Function(body) => self.gen_closure(body, dst)?,
            Expr::Table(ctor) => self.gen_table(ctor, dst, 0)?,
            Expr::Paren(inner) => self.gen_expr_to(inner, dst)?,
            Expr::Unary { op, operand, line, .. } => {
                let opr = self.gen_expr_any(operand)?;
                let opcode = match op {
                    UnOp::Neg => OpCode::Neg,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                self.cur_mut().emit(encode_abc(opcode, dst, opr, 0), *line);
                self.cur_mut().next_reg = opr;
            }
            Expr::Binary { op, lhs, rhs, line, .. } => self.gen_binary(*op, lhs, rhs, dst, *line)?,
        }
        Ok(())
    }

    fn gen_number(&mut self, n: f64, dst: u8) {
        if n.fract() == 0.0 && n.abs() < i32::MAX as f64 {
            self.cur_mut().emit_load_int(dst, n as i32, 0);
        } else {
            let kidx = self.cur_mut().const_index(LuaValue::Number(n)).expect("constant pool fits a single literal");
            self.cur_mut().emit(encode_abx(OpCode::LoadConst, dst, kidx), 0);
        }
    }

    fn gen_name_read(&mut self, n: &NameRef, dst: u8) -> CgResult<()> {
        match n.scope.get() {
            Scope::Local(_) => {
                let reg = self.cur().find_local(&n.name).ok_or_else(|| self.err(n.line, format!("internal: unresolved local '{}'", n.name)))?;
                if reg != dst {
                    self.cur_mut().emit(encode_abc(OpCode::Move, dst, reg, 0), n.line);
                }
            }
            Scope::Upvalue(_) => {
                let idx = self.resolve_upvalue(self.funcs.len() - 1, &n.name)?;
                self.cur_mut().emit(encode_abc(OpCode::GetUpval, dst, idx, 0), n.line);
            }
            Scope::Global | Scope::Unresolved => {
                let sid = self.gc.new_string(&n.name);
                let kidx = self.cur_mut().const_index(LuaValue::String(sid))?;
                self.cur_mut().emit(encode_abx(OpCode::GetGlobal, dst, kidx), n.line);
            }
        }
        Ok(())
    }

    fn gen_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, dst: u8, line: u32) -> CgResult<()> {
        match op {
            BinOp::And => {
                self.gen_expr_to(lhs, dst)?;
                let skip = self.cur_mut().emit_jump(OpCode::JmpFalse, dst, line);
                self.gen_expr_to(rhs, dst)?;
                let here = self.cur().pc();
                self.cur_mut().patch_jump(skip, here);
            }
            BinOp::Or => {
                self.gen_expr_to(lhs, dst)?;
                let skip = self.cur_mut().emit_jump(OpCode::JmpTrue, dst, line);
                self.gen_expr_to(rhs, dst)?;
                let here = self.cur().pc();
                self.cur_mut().patch_jump(skip, here);
            }
            _ => {
                let l = self.gen_expr_any(lhs)?;
                let r = self.gen_expr_any(rhs)?;
                let opcode = binop_opcode(op);
                self.cur_mut().emit(encode_abc(opcode, dst, l, r), line);
                self.cur_mut().next_reg = l;
            }
        }
        Ok(())
    }

    /// Instantiates a nested function body as a child prototype of the
    /// enclosing function, then emits the `Closure` that captures it.
    fn gen_closure(&mut self, body: &FunctionBody, dst: u8) -> CgResult<()> {
        let proto_id = self.compile_function_body(body)?;
        let idx = {
            let fs = self.cur_mut();
            fs.nested.push(proto_id);
            (fs.nested.len() - 1) as u16
        };
        if idx > u16::MAX {
            return Err(self.err(body.line_defined, "too many nested functions"));
        }
        self.cur_mut().emit(encode_abx(OpCode::Closure, dst, idx), body.line_defined);
        Ok(())
    }

    fn compile_function_body(&mut self, body: &FunctionBody) -> CgResult<ProtoId> {
        let mut fs = FuncState::new(self.module.clone(), body.line_defined);
        fs.num_params = body.params.len() as u8;
        fs.is_vararg = body.is_vararg.get();
        self.funcs.push(fs);
        let nparams = self.cur().num_params;
        self.cur_mut().reserve(nparams)?;
        for (i, p) in body.params.iter().enumerate() {
            self.cur_mut().declare_local(p, i as u8);
        }
        self.gen_block(&body.body)?;
        self.finish_implicit_return(&body.body);
        let fs = self.funcs.pop().expect("pushed just above");
        let proto = build_prototype(fs);
        Ok(self.gc.new_proto(proto))
    }

    fn gen_table(&mut self, ctor: &TableConstructor, dst: u8, line: u32) -> CgResult<()> {
        self.cur_mut().ensure_past(dst)?;
        self.cur_mut().emit(encode_a(OpCode::NewTable, dst), line);
        let n = ctor.array_items.len();
        for (i, item) in ctor.array_items.iter().enumerate() {
            let is_last = i + 1 == n;
            if is_last && item.is_multi_result() {
                // The trailing array item expands to however many results it
                // has at runtime (spec §4.4's any-count convention): emit it
                // with `VarArg`/`Call`'s any-count encoding and let `SetTable`
                // drain `[val_reg, top)` into the array part in order, rather
                // than capturing a single value via `gen_expr_any`.
                let val_reg = self.cur_mut().reserve_one()?;
                self.gen_expr_multi(item, val_reg)?;
                self.cur_mut().emit(encode_abc(OpCode::SetTable, dst, opcode::SETTABLE_APPEND_MARKER, val_reg), line);
                self.cur_mut().next_reg = val_reg;
                continue;
            }
            let val_reg = self.gen_expr_any(item)?;
            let key_reg = self.cur_mut().reserve_one()?;
            self.cur_mut().emit_load_int(key_reg, (i + 1) as i32, line);
            self.cur_mut().emit(encode_abc(OpCode::SetTable, dst, key_reg, val_reg), line);
            self.cur_mut().next_reg = val_reg;
        }
        for (k, v) in &ctor.keyed_items {
            let key_reg = self.gen_expr_any(k)?;
            let val_reg = self.gen_expr_any(v)?;
            self.cur_mut().emit(encode_abc(OpCode::SetTable, dst, key_reg, val_reg), line);
            self.cur_mut().next_reg = key_reg;
        }
        Ok(())
    }

    /// Compiles a call or method call so its callee (and, for a method
    /// call, the implicit `self`) land at `dst`, with `want` expected
    /// results (`None` = any/dynamic count, resolved by the VM at runtime).
    fn gen_call(&mut self, e: &Expr, dst: u8, want: Option<u32>) -> CgResult<()> {
        let Expr::Call { callee, method_name, args, line } = e else {
            unreachable!("gen_call is only invoked on Expr::Call")
        };
        self.cur_mut().ensure_past(dst)?;
        let (arg_start, self_arg) = if let Some(method) = method_name {
            self.cur_mut().ensure_past(dst + 1)?;
            self.gen_expr_to(callee, dst + 1)?;
            let sid = self.gc.new_string(method);
            let kidx = self.cur_mut().const_index(LuaValue::String(sid))?;
            self.cur_mut().emit(encode_abx(OpCode::LoadConst, dst, kidx), *line);
            self.cur_mut().emit(encode_abc(OpCode::GetTable, dst, dst + 1, dst), *line);
            (dst + 2, true)
        } else {
            self.gen_expr_to(callee, dst)?;
            (dst + 1, false)
        };
        self.cur_mut().next_reg = arg_start;
        let result = if args.is_empty() { ExprListResult::Fixed(0) } else { self.gen_expr_list(args, arg_start)? };
        let b = match result {
            ExprListResult::Any => 0,
            ExprListResult::Fixed(n) => opcode::pack_count(Some(n + if self_arg { 1 } else { 0 })),
        };
        let c = opcode::pack_count(want);
        self.cur_mut().emit(encode_abc(OpCode::Call, dst, b, c), *line);
        let reserved = want.unwrap_or(1).max(1) as u8;
        self.cur_mut().next_reg = dst + reserved;
        Ok(())
    }

    /// Compiles `e` (a call or `...`) so it contributes every result it has
    /// to the stack starting at `dst`, leaving the dynamic count for the
    /// consumer (`Ret`/outer `Call`) to read off the stack top at runtime.
    fn gen_expr_multi(&mut self, e: &Expr, dst: u8) -> CgResult<()> {
        match e {
            Expr::Call { .. } => self.gen_call(e, dst, None),
            Expr::VarArg { line, .. } => {
                self.cur_mut().emit(encode_asbx(OpCode::VarArg, dst, -1), *line);
                self.cur_mut().next_reg = dst + 1;
                Ok(())
            }
            _ => unreachable!("only Call/VarArg are multi-result"),
        }
    }

    /// Compiles `e` (a call or `...`) asking for exactly `want` results,
    /// nil-filling any shortfall — used when a fixed-arity consumer's last
    /// slot is filled by a multi-result expression that doesn't get to
    /// claim "any count" (e.g. `local a, b = f()`).
    fn gen_expr_bounded(&mut self, e: &Expr, dst: u8, want: u32) -> CgResult<()> {
        match e {
            Expr::Call { .. } => self.gen_call(e, dst, Some(want)),
            Expr::VarArg { line, .. } => {
                self.cur_mut().emit(encode_asbx(OpCode::VarArg, dst, want as i16), *line);
                self.cur_mut().next_reg = dst + want as u8;
                Ok(())
            }
            _ => unreachable!("only Call/VarArg are multi-result"),
        }
    }

    /// Compiles an expression list where the consumer knows exactly how
    /// many values it needs (`local`/assignment RHS): extra expressions are
    /// still evaluated for their side effects, and a shortfall is nil-filled.
    fn gen_expr_list_fixed(&mut self, exprs: &[Expr], start: u8, want_n: u32, line: u32) -> CgResult<()> {
        let n = exprs.len() as u32;
        if n == 0 {
            if want_n > 0 {
                self.cur_mut().emit(encode_abc(OpCode::LoadNil, start, want_n as u8, 0), line);
            }
            self.cur_mut().next_reg = start + want_n as u8;
            return Ok(());
        }
        for (i, e) in exprs[..(n as usize - 1)].iter().enumerate() {
            let i = i as u32;
            if i < want_n {
                let reg = start + i as u8;
                self.cur_mut().ensure_past(reg)?;
                self.gen_expr_to(e, reg)?;
            } else {
                let tmp = self.gen_expr_any(e)?;
                self.cur_mut().next_reg = tmp;
            }
        }
        let last = &exprs[n as usize - 1];
        let last_idx = n - 1;
        if last_idx < want_n {
            let remaining = want_n - last_idx;
            let reg = start + last_idx as u8;
            self.cur_mut().ensure_past(reg)?;
            if last.is_multi_result() && remaining > 1 {
                self.gen_expr_bounded(last, reg, remaining)?;
            } else {
                self.gen_expr_to(last, reg)?;
                if remaining > 1 {
                    self.cur_mut().emit(encode_abc(OpCode::LoadNil, reg + 1, (remaining - 1) as u8, 0), line);
                }
            }
        } else {
            let tmp = self.gen_expr_any(last)?;
            self.cur_mut().next_reg = tmp;
        }
        if n < want_n {
            let fill_start = start + n as u8;
            self.cur_mut().emit(encode_abc(OpCode::LoadNil, fill_start, (want_n - n) as u8, 0), line);
        }
        self.cur_mut().next_reg = start + want_n as u8;
        Ok(())
    }

    /// Compiles an expression list whose final value count may be dynamic
    /// (call arguments, `return`): every expression but the last is
    /// truncated to one value; the last contributes "any count" if it is
    /// itself a call or `...`.
    fn gen_expr_list(&mut self, exprs: &[Expr], start: u8) -> CgResult<ExprListResult> {
        if exprs.is_empty() {
            return Ok(ExprListResult::Fixed(0));
        }
        let n = exprs.len();
        self.cur_mut().ensure_past(start + n as u8 - 1)?;
        for (i, e) in exprs[..n - 1].iter().enumerate() {
            self.gen_expr_to(e, start + i as u8)?;
        }
        let last_reg = start + (n - 1) as u8;
        let last = &exprs[n - 1];
        if last.is_multi_result() {
            self.gen_expr_multi(last, last_reg)?;
            Ok(ExprListResult::Any)
        } else {
            self.gen_expr_to(last, last_reg)?;
            Ok(ExprListResult::Fixed(n as u32))
        }
    }
}
