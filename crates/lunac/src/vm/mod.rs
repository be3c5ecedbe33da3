//! Fetch/decode/execute loop, call/return protocol, upvalue capture, and the
//! CFunction ABI bridge (spec §4.5–§4.6). `Vm` also serves as the state
//! façade of §6.4: it owns the GC, globals, module cache, and call chain
//! directly, following the teacher's `LuaVM` (`lua_vm/mod.rs`) rather than
//! splitting "VM" and "state" into separate owning types.
//!
//! One flat loop in [`Vm::run_until`] drives every Lua frame on the call
//! chain; a call into a CFunction is resolved inline without growing that
//! loop; native functions in this language level never suspend mid-call.

pub mod module;

use crate::error::{CFuncErrorKind, CallCFuncError, Position, RuntimeError};
use crate::gc::ids::{FunctionId, GcRef, ProtoId, TableId, UpvalueId, UserDataId};
use crate::gc::Gc;
use crate::opcode::{self, Instr, OpCode};
use crate::value::{Closure, LuaValue, UpvalDesc, UpvalueObj};

type VResult<T> = Result<T, RuntimeError>;

/// One active invocation on the call chain. `closure` is `None` only for the
/// transient frame pushed around a CFunction call, which never reaches
/// [`Vm::step`] — it exists solely so the CFunction ABI methods have
/// something to read argument/result bookkeeping from.
pub struct CallFrame {
    pub closure: Option<FunctionId>,
    pub register_base: usize,
    pub pc: usize,
    /// `None` means the caller wants every result ("any count").
    pub expected_results: Option<u32>,
    /// Absolute stack index this frame's results are copied back to.
    pub result_slot: usize,
    pub varargs: Vec<LuaValue>,
    pub source_name: String,
    /// Meaningful only for a CFunction frame: how many arguments were laid
    /// out starting at `register_base`.
    pub arg_count: usize,
}

pub struct Vm {
    pub gc: Gc,
    pub globals: TableId,
    pub meta_tables: TableId,
    pub modules: TableId,
    stack: Vec<LuaValue>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<UpvalueId>,
    /// Absolute stack index marking the end of the most recent "any count"
    /// producer's results (a trailing call or `...`); read by whatever
    /// "any count" consumer immediately follows it in the instruction stream.
    top: usize,
    native_results: Vec<LuaValue>,
}

impl Vm {
    /// Constructs a fresh state per §6.4: allocate the GC, create the global
    /// table, install `__metaTables`/`__modules` under it, done.
    pub fn new() -> Self {
        let mut gc = Gc::new();
        let globals = gc.new_table();
        let meta_tables = gc.new_table();
        let modules = gc.new_table();
        let meta_key = gc.new_string("__metaTables");
        let modules_key = gc.new_string("__modules");
        if let Some(g) = gc.tables.get_mut(globals.index()) {
            g.set(LuaValue::String(meta_key), LuaValue::Table(meta_tables));
            g.set(LuaValue::String(modules_key), LuaValue::Table(modules));
        }
        Vm { gc, globals, meta_tables, modules, stack: Vec::new(), frames: Vec::new(), open_upvalues: Vec::new(), top: 0, native_results: Vec::new() }
    }

    fn ensure_stack(&mut self, required: usize) {
        if self.stack.len() < required {
            self.stack.resize(required, LuaValue::Nil);
        }
    }

    fn get_reg(&self, base: usize, r: u8) -> LuaValue {
        self.stack[base + r as usize]
    }

    fn set_reg(&mut self, base: usize, r: u8, v: LuaValue) {
        self.stack[base + r as usize] = v;
    }

    fn gcref_of(v: LuaValue) -> Option<GcRef> {
        match v {
            LuaValue::String(id) => Some(GcRef::String(id)),
            LuaValue::Table(id) => Some(GcRef::Table(id)),
            LuaValue::Closure(id) => Some(GcRef::Closure(id)),
            LuaValue::Upvalue(id) => Some(GcRef::Upvalue(id)),
            LuaValue::UserData(id) => Some(GcRef::UserData(id)),
            _ => None,
        }
    }

    /// Records a value just stored into a possibly-old container as an
    /// extra minor-GC root, so a young value surviving only through that
    /// store isn't swept before the barrier's owner is re-traced.
    fn barrier(&mut self, v: LuaValue) {
        if let Some(r) = Self::gcref_of(v) {
            self.gc.write_barrier(r);
        }
    }

    fn collect_roots(&self) -> Vec<GcRef> {
        let mut roots = vec![GcRef::Table(self.globals), GcRef::Table(self.meta_tables), GcRef::Table(self.modules)];
        for &v in &self.stack {
            if let Some(r) = Self::gcref_of(v) {
                roots.push(r);
            }
        }
        for f in &self.frames {
            if let Some(id) = f.closure {
                roots.push(GcRef::Closure(id));
            }
            for &v in &f.varargs {
                if let Some(r) = Self::gcref_of(v) {
                    roots.push(r);
                }
            }
        }
        for &id in &self.open_upvalues {
            roots.push(GcRef::Upvalue(id));
        }
        roots
    }

    /// Runs a minor (or, if Gen1 is also over threshold, major) collection
    /// when Gen0 has grown past its adaptive threshold (§4.6).
    fn check_gc(&mut self) {
        if self.gc.should_run_minor() {
            let roots = self.collect_roots();
            if self.gc.should_run_major() {
                self.gc.major_collect(&roots);
            } else {
                self.gc.minor_collect(&roots);
            }
        }
    }

    // ---- calling into a closure from host code ----

    /// Invokes `closure` with `args`, running it to completion and returning
    /// every value it returned. This is the core's `Execute` entry point.
    pub fn call(&mut self, closure: FunctionId, args: &[LuaValue]) -> VResult<Vec<LuaValue>> {
        let base = self.stack.len();
        self.ensure_stack(base + args.len());
        for (i, v) in args.iter().enumerate() {
            self.stack[base + i] = *v;
        }
        let proto_id = self.gc.closures.get(closure.index()).expect("live closure").proto;
        let (num_params, max_stack, source_name) = {
            let p = self.gc.protos.get(proto_id.index()).expect("live proto");
            (p.num_params as usize, p.max_stack_size as usize, p.source_name.clone())
        };
        let varargs = if args.len() > num_params { args[num_params..].to_vec() } else { Vec::new() };
        self.ensure_stack(base + max_stack.max(args.len()));
        for i in args.len().min(num_params)..max_stack {
            self.stack[base + i] = LuaValue::Nil;
        }
        let depth = self.frames.len();
        self.frames.push(CallFrame {
            closure: Some(closure),
            register_base: base,
            pc: 0,
            expected_results: None,
            result_slot: base,
            varargs,
            source_name,
            arg_count: 0,
        });
        self.run_until(depth)
    }

    fn run_until(&mut self, stop_depth: usize) -> VResult<Vec<LuaValue>> {
        let result_slot = self.frames[stop_depth].register_base;
        loop {
            if self.frames.len() == stop_depth {
                let n = self.top.saturating_sub(result_slot);
                return Ok(self.stack[result_slot..result_slot + n].to_vec());
            }
            self.step()?;
        }
    }

    // ---- dispatch ----

    fn step(&mut self) -> VResult<()> {
        self.check_gc();
        let frame_i = self.frames.len() - 1;
        let closure_id = self.frames[frame_i].closure.expect("step() only ever runs a Lua frame");
        let proto_id = self.gc.closures.get(closure_id.index()).expect("live closure").proto;
        let base = self.frames[frame_i].register_base;
        let pc = self.frames[frame_i].pc;
        let (word, line) = {
            let proto = self.gc.protos.get(proto_id.index()).expect("live proto");
            (proto.instructions[pc], proto.lines.get(pc).copied().unwrap_or(proto.line_defined))
        };
        let instr = opcode::decode(word);
        let module = self.frames[frame_i].source_name.clone();
        self.frames[frame_i].pc = pc + 1;

        match instr.op {
            OpCode::LoadNil => {
                for i in 0..instr.b {
                    self.set_reg(base, instr.a + i, LuaValue::Nil);
                }
            }
            OpCode::LoadBool => self.set_reg(base, instr.a, LuaValue::Bool(instr.b != 0)),
            OpCode::LoadInt => {
                let payload = self.gc.protos.get(proto_id.index()).expect("live proto").instructions[pc + 1] as i32;
                self.set_reg(base, instr.a, LuaValue::Number(payload as f64));
                self.frames[frame_i].pc += 1;
            }
            OpCode::LoadConst => {
                let c = self.gc.protos.get(proto_id.index()).expect("live proto").constants[instr.bx as usize];
                self.set_reg(base, instr.a, c);
            }
            OpCode::Move => {
                let v = self.get_reg(base, instr.b);
                self.set_reg(base, instr.a, v);
            }
            OpCode::GetUpval => {
                let up_id = self.gc.closures.get(closure_id.index()).expect("live closure").upvalues[instr.b as usize];
                let v = self.read_upvalue(up_id);
                self.set_reg(base, instr.a, v);
            }
            OpCode::SetUpval => {
                let up_id = self.gc.closures.get(closure_id.index()).expect("live closure").upvalues[instr.a as usize];
                let v = self.get_reg(base, instr.b);
                self.write_upvalue(up_id, v);
            }
            OpCode::GetGlobal => {
                let key = self.gc.protos.get(proto_id.index()).expect("live proto").constants[instr.bx as usize];
                let v = self.gc.tables.get(self.globals.index()).expect("globals always live").get(&key);
                self.set_reg(base, instr.a, v);
            }
            OpCode::SetGlobal => {
                let key = self.gc.protos.get(proto_id.index()).expect("live proto").constants[instr.bx as usize];
                let v = self.get_reg(base, instr.a);
                self.gc.tables.get_mut(self.globals.index()).expect("globals always live").set(key, v);
                self.barrier(v);
            }
            OpCode::Closure => self.do_closure(frame_i, proto_id, instr),
            OpCode::Call => self.do_call(frame_i, base, instr, &module, line)?,
            OpCode::VarArg => self.do_vararg(frame_i, base, instr),
            OpCode::Ret => self.do_return(frame_i, base, instr),
            OpCode::JmpFalse => {
                if !self.get_reg(base, instr.a).is_truthy() {
                    self.jump(frame_i, instr);
                }
            }
            OpCode::JmpTrue => {
                if self.get_reg(base, instr.a).is_truthy() {
                    self.jump(frame_i, instr);
                }
            }
            OpCode::JmpNil => {
                if self.get_reg(base, instr.a).is_nil() {
                    self.jump(frame_i, instr);
                }
            }
            OpCode::Jmp => self.jump(frame_i, instr),
            OpCode::Neg => {
                let v = self.get_reg(base, instr.b);
                match v {
                    LuaValue::Number(n) => self.set_reg(base, instr.a, LuaValue::Number(-n)),
                    other => return Err(self.err(&module, line, format!("attempt to perform arithmetic on a {} value", other.type_name()))),
                }
            }
            OpCode::Not => {
                let v = self.get_reg(base, instr.b);
                self.set_reg(base, instr.a, LuaValue::Bool(!v.is_truthy()));
            }
            OpCode::Len => {
                let v = self.get_reg(base, instr.b);
                let result = match v {
                    LuaValue::Table(id) => LuaValue::Number(self.gc.tables.get(id.index()).map(|t| t.length()).unwrap_or(0) as f64),
                    LuaValue::String(id) => LuaValue::Number(self.gc.strings.get(id.index()).map(|s| s.bytes.len()).unwrap_or(0) as f64),
                    other => return Err(self.err(&module, line, format!("attempt to get length of a {} value", other.type_name()))),
                };
                self.set_reg(base, instr.a, result);
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => self.arith(base, instr, &module, line)?,
            OpCode::Concat => self.concat(base, instr, &module, line)?,
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => self.compare(base, instr, &module, line)?,
            OpCode::Eq => {
                let (l, r) = (self.get_reg(base, instr.b), self.get_reg(base, instr.c));
                self.set_reg(base, instr.a, LuaValue::Bool(l == r));
            }
            OpCode::Ne => {
                let (l, r) = (self.get_reg(base, instr.b), self.get_reg(base, instr.c));
                self.set_reg(base, instr.a, LuaValue::Bool(l != r));
            }
            OpCode::NewTable => {
                let t = self.gc.new_table();
                self.set_reg(base, instr.a, LuaValue::Table(t));
            }
            OpCode::GetTable => self.get_table(base, instr, &module, line)?,
            OpCode::SetTable => self.set_table(base, instr, &module, line)?,
            OpCode::ForPrep => self.for_prep(base, instr, &module, line)?,
            OpCode::ForStep => self.for_step(frame_i, base, instr),
        }
        Ok(())
    }

    fn err(&self, module: &str, line: u32, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(Position::new(module, line), message)
    }

    fn jump(&mut self, frame_i: usize, instr: Instr) {
        let pc = self.frames[frame_i].pc as i64 + instr.sbx as i64;
        self.frames[frame_i].pc = pc as usize;
    }

    // ---- arithmetic / comparison / concat ----

    fn arith_op_name(op: OpCode) -> &'static str {
        match op {
            OpCode::Add => "addition",
            OpCode::Sub => "subtraction",
            OpCode::Mul => "multiplication",
            OpCode::Div => "division",
            OpCode::Mod => "modulo",
            OpCode::Pow => "exponentiation",
            _ => "arithmetic",
        }
    }

    fn arith(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let l = self.get_reg(base, instr.b);
        let r = self.get_reg(base, instr.c);
        match (l, r) {
            (LuaValue::Number(x), LuaValue::Number(y)) => {
                let v = match instr.op {
                    OpCode::Add => x + y,
                    OpCode::Sub => x - y,
                    OpCode::Mul => x * y,
                    OpCode::Div => x / y,
                    OpCode::Mod => x - (x / y).floor() * y,
                    OpCode::Pow => x.powf(y),
                    _ => unreachable!(),
                };
                self.set_reg(base, instr.a, LuaValue::Number(v));
                Ok(())
            }
            _ => Err(self.err(
                module,
                line,
                format!("attempt to perform {} on a {} value and a {} value", Self::arith_op_name(instr.op), l.type_name(), r.type_name()),
            )),
        }
    }

    /// Formats a number the way `itoa` renders an integral value, falling
    /// back to the default float formatting otherwise.
    fn format_number(n: f64) -> String {
        if n.fract() == 0.0 && n.abs() < 1e15 {
            let mut buf = itoa::Buffer::new();
            buf.format(n as i64).to_string()
        } else {
            format!("{}", n)
        }
    }

    fn stringify(&self, v: LuaValue) -> Option<String> {
        match v {
            LuaValue::String(id) => self.gc.strings.get(id.index()).map(|s| s.bytes.clone()),
            LuaValue::Number(n) => Some(Self::format_number(n)),
            _ => None,
        }
    }

    fn concat(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let l = self.get_reg(base, instr.b);
        let r = self.get_reg(base, instr.c);
        match (self.stringify(l), self.stringify(r)) {
            (Some(ls), Some(rs)) => {
                let sid = self.gc.new_string(&(ls + &rs));
                self.set_reg(base, instr.a, LuaValue::String(sid));
                Ok(())
            }
            _ => Err(self.err(module, line, format!("attempt to concatenate a {} value and a {} value", l.type_name(), r.type_name()))),
        }
    }

    fn compare(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let l = self.get_reg(base, instr.b);
        let r = self.get_reg(base, instr.c);
        let result = match (l, r) {
            (LuaValue::Number(a), LuaValue::Number(b)) => Some(match instr.op {
                OpCode::Lt => a < b,
                OpCode::Le => a <= b,
                OpCode::Gt => a > b,
                OpCode::Ge => a >= b,
                _ => unreachable!(),
            }),
            (LuaValue::String(a), LuaValue::String(b)) => {
                let sa = self.gc.strings.get(a.index()).map(|s| s.bytes.clone());
                let sb = self.gc.strings.get(b.index()).map(|s| s.bytes.clone());
                match (sa, sb) {
                    (Some(sa), Some(sb)) => Some(match instr.op {
                        OpCode::Lt => sa < sb,
                        OpCode::Le => sa <= sb,
                        OpCode::Gt => sa > sb,
                        OpCode::Ge => sa >= sb,
                        _ => unreachable!(),
                    }),
                    _ => None,
                }
            }
            _ => None,
        };
        match result {
            Some(b) => {
                self.set_reg(base, instr.a, LuaValue::Bool(b));
                Ok(())
            }
            None => Err(self.err(module, line, format!("attempt to compare a {} value and a {} value", l.type_name(), r.type_name()))),
        }
    }

    // ---- tables ----

    fn get_table(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let t = self.get_reg(base, instr.b);
        let k = self.get_reg(base, instr.c);
        let v = match t {
            LuaValue::Table(id) => self.gc.tables.get(id.index()).map(|tbl| tbl.get(&k)).unwrap_or(LuaValue::Nil),
            LuaValue::UserData(id) => self.userdata_get(id, k),
            other => return Err(self.err(module, line, format!("attempt to index a {} value", other.type_name()))),
        };
        self.set_reg(base, instr.a, v);
        Ok(())
    }

    fn set_table(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        if instr.b == opcode::SETTABLE_APPEND_MARKER {
            return self.set_table_append_range(base, instr, module, line);
        }
        let t = self.get_reg(base, instr.a);
        let k = self.get_reg(base, instr.b);
        let v = self.get_reg(base, instr.c);
        match t {
            LuaValue::Table(id) => {
                if let Some(tbl) = self.gc.tables.get_mut(id.index()) {
                    tbl.set(k, v);
                }
                self.barrier(k);
                self.barrier(v);
                Ok(())
            }
            LuaValue::UserData(id) => self.userdata_set(id, k, v, module, line),
            other => Err(self.err(module, line, format!("attempt to index a {} value", other.type_name()))),
        }
    }

    /// A table constructor's trailing array item expanded to any-count
    /// (spec §4.4): `instr.c` is the first register of a contiguous run
    /// that ends at the current stack top. Drains it into the table's
    /// array part in order, appending rather than keying by index, since
    /// the caller's own `SetTable` calls already filled `1..=i` before
    /// this one runs.
    fn set_table_append_range(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let t = self.get_reg(base, instr.a);
        let val_start = base + instr.c as usize;
        let count = self.top.saturating_sub(val_start);
        match t {
            LuaValue::Table(id) => {
                for i in 0..count {
                    let v = self.stack[val_start + i];
                    if let Some(tbl) = self.gc.tables.get_mut(id.index()) {
                        tbl.append(v);
                    }
                    self.barrier(v);
                }
                Ok(())
            }
            other => Err(self.err(module, line, format!("attempt to index a {} value", other.type_name()))),
        }
    }

    fn metatable_for(&mut self, tag: &'static str) -> Option<TableId> {
        let key = self.gc.new_string(tag);
        match self.gc.tables.get(self.meta_tables.index())?.get(&LuaValue::String(key)) {
            LuaValue::Table(id) => Some(id),
            _ => None,
        }
    }

    fn userdata_get(&mut self, id: UserDataId, key: LuaValue) -> LuaValue {
        let tag = self.gc.userdata.get(id.index()).map(|u| u.tag).unwrap_or("");
        match self.metatable_for(tag) {
            Some(mt) => self.gc.tables.get(mt.index()).map(|t| t.get(&key)).unwrap_or(LuaValue::Nil),
            None => LuaValue::Nil,
        }
    }

    fn userdata_set(&mut self, id: UserDataId, key: LuaValue, value: LuaValue, module: &str, line: u32) -> VResult<()> {
        let tag = self.gc.userdata.get(id.index()).map(|u| u.tag).unwrap_or("");
        match self.metatable_for(tag) {
            Some(mt) => {
                if let Some(t) = self.gc.tables.get_mut(mt.index()) {
                    t.set(key, value);
                }
                self.barrier(key);
                self.barrier(value);
                Ok(())
            }
            None => Err(self.err(module, line, "attempt to index a userdata value with no registered metatable")),
        }
    }

    // ---- for loops ----

    fn for_prep(&mut self, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let ok = matches!(self.get_reg(base, instr.a), LuaValue::Number(_))
            && matches!(self.get_reg(base, instr.a + 1), LuaValue::Number(_))
            && matches!(self.get_reg(base, instr.a + 2), LuaValue::Number(_));
        if ok {
            Ok(())
        } else {
            Err(self.err(module, line, "'for' initial value, limit, and step must be numbers"))
        }
    }

    fn for_step(&mut self, frame_i: usize, base: usize, instr: Instr) {
        let (LuaValue::Number(v), LuaValue::Number(l), LuaValue::Number(s)) =
            (self.get_reg(base, instr.a), self.get_reg(base, instr.a + 1), self.get_reg(base, instr.a + 2))
        else {
            unreachable!("ForPrep already validated these registers are numbers")
        };
        let keep_going = if s >= 0.0 { v <= l } else { v >= l };
        if !keep_going {
            self.jump(frame_i, instr);
        }
    }

    // ---- calls and returns ----

    fn do_call(&mut self, frame_i: usize, base: usize, instr: Instr, module: &str, line: u32) -> VResult<()> {
        let callee_abs = base + instr.a as usize;
        let callee = self.stack[callee_abs];
        let arg_start_abs = callee_abs + 1;
        let argcount = if instr.b == 0 { self.top.saturating_sub(arg_start_abs) } else { opcode::unpack_count(instr.b) as usize };
        let expected = if instr.c == 0 { None } else { Some(opcode::unpack_count(instr.c) as u32) };

        match callee {
            LuaValue::Closure(fid) => {
                let proto_id = self.gc.closures.get(fid.index()).expect("live closure").proto;
                let (num_params, is_vararg, max_stack, source_name) = {
                    let p = self.gc.protos.get(proto_id.index()).expect("live proto");
                    (p.num_params as usize, p.is_vararg, p.max_stack_size as usize, p.source_name.clone())
                };
                let new_base = arg_start_abs;
                let varargs = if is_vararg && argcount > num_params { self.stack[new_base + num_params..new_base + argcount].to_vec() } else { Vec::new() };
                self.ensure_stack(new_base + max_stack.max(argcount));
                for i in argcount.min(num_params)..max_stack {
                    self.stack[new_base + i] = LuaValue::Nil;
                }
                self.frames.push(CallFrame {
                    closure: Some(fid),
                    register_base: new_base,
                    pc: 0,
                    expected_results: expected,
                    result_slot: callee_abs,
                    varargs,
                    source_name,
                    arg_count: 0,
                });
                let _ = frame_i;
                Ok(())
            }
            LuaValue::CFunction(f) => {
                self.frames.push(CallFrame {
                    closure: None,
                    register_base: arg_start_abs,
                    pc: 0,
                    expected_results: expected,
                    result_slot: callee_abs,
                    varargs: Vec::new(),
                    source_name: module.to_string(),
                    arg_count: argcount,
                });
                self.native_results.clear();
                let outcome = f(self);
                self.frames.pop();
                match outcome {
                    Ok(_) => {
                        let results = std::mem::take(&mut self.native_results);
                        self.land_results(callee_abs, &results, expected);
                        Ok(())
                    }
                    Err(e) => Err(self.err(module, line, e.message.clone())),
                }
            }
            other => Err(self.err(module, line, format!("attempt to call a {} value", other.type_name()))),
        }
    }

    fn land_results(&mut self, dst_abs: usize, results: &[LuaValue], expected: Option<u32>) {
        match expected {
            Some(n) => {
                let n = n as usize;
                self.ensure_stack(dst_abs + n);
                for i in 0..n {
                    self.stack[dst_abs + i] = results.get(i).copied().unwrap_or(LuaValue::Nil);
                }
            }
            None => {
                self.ensure_stack(dst_abs + results.len());
                for (i, v) in results.iter().enumerate() {
                    self.stack[dst_abs + i] = *v;
                }
                self.top = dst_abs + results.len();
            }
        }
    }

    fn do_return(&mut self, frame_i: usize, base: usize, instr: Instr) {
        let a = instr.a as usize;
        let count = if instr.sbx < 0 { self.top.saturating_sub(base + a) } else { instr.sbx as usize };
        let results: Vec<LuaValue> = (0..count).map(|i| self.stack[base + a + i]).collect();
        self.close_upvalues_from(base);
        let _ = frame_i;
        let frame = self.frames.pop().expect("do_return always has an active frame");
        self.land_results(frame.result_slot, &results, frame.expected_results);
    }

    fn do_vararg(&mut self, frame_i: usize, base: usize, instr: Instr) {
        let varargs = self.frames[frame_i].varargs.clone();
        let want = if instr.sbx < 0 { varargs.len() } else { instr.sbx as usize };
        let dst = base + instr.a as usize;
        self.ensure_stack(dst + want);
        for i in 0..want {
            self.stack[dst + i] = varargs.get(i).copied().unwrap_or(LuaValue::Nil);
        }
        if instr.sbx < 0 {
            self.top = dst + varargs.len();
        }
    }

    // ---- closures and upvalues ----

    fn do_closure(&mut self, frame_i: usize, proto_id: ProtoId, instr: Instr) {
        let base = self.frames[frame_i].register_base;
        let closure_id = self.frames[frame_i].closure.expect("do_closure only runs in a Lua frame");
        let child_proto = self.gc.protos.get(proto_id.index()).expect("live proto").nested[instr.bx as usize];
        let descs = self.gc.protos.get(child_proto.index()).expect("live proto").upvalues.clone();
        let mut upvalues = Vec::with_capacity(descs.len());
        for desc in &descs {
            let up_id = match *desc {
                UpvalDesc::ParentLocal { register } => self.find_or_open_upvalue(base + register as usize),
                UpvalDesc::ParentUpvalue { index } => self.gc.closures.get(closure_id.index()).expect("live closure").upvalues[index as usize],
            };
            self.gc.write_barrier(GcRef::Upvalue(up_id));
            upvalues.push(up_id);
        }
        let new_closure = self.gc.new_closure(Closure { proto: child_proto, upvalues });
        self.set_reg(base, instr.a, LuaValue::Closure(new_closure));
    }

    fn find_or_open_upvalue(&mut self, stack_index: usize) -> UpvalueId {
        for &id in &self.open_upvalues {
            if let Some(UpvalueObj::Open { stack_index: si }) = self.gc.upvalues.get(id.index()) {
                if *si == stack_index {
                    return id;
                }
            }
        }
        let id = self.gc.new_upvalue(UpvalueObj::Open { stack_index });
        self.open_upvalues.push(id);
        id
    }

    fn read_upvalue(&self, id: UpvalueId) -> LuaValue {
        match self.gc.upvalues.get(id.index()) {
            Some(UpvalueObj::Open { stack_index }) => self.stack[*stack_index],
            Some(UpvalueObj::Closed(v)) => *v,
            None => LuaValue::Nil,
        }
    }

    fn write_upvalue(&mut self, id: UpvalueId, v: LuaValue) {
        let open_at = match self.gc.upvalues.get(id.index()) {
            Some(UpvalueObj::Open { stack_index }) => Some(*stack_index),
            _ => None,
        };
        match open_at {
            Some(si) => self.stack[si] = v,
            None => {
                if let Some(cell) = self.gc.upvalues.get_mut(id.index()) {
                    *cell = UpvalueObj::Closed(v);
                }
            }
        }
        self.barrier(v);
    }

    /// Closes every open upvalue whose captured register is at or past
    /// `from_abs`, copying its live value out of the stack — called just
    /// before a frame's registers are abandoned on return.
    fn close_upvalues_from(&mut self, from_abs: usize) {
        let open = std::mem::take(&mut self.open_upvalues);
        for id in open {
            let stack_index = match self.gc.upvalues.get(id.index()) {
                Some(UpvalueObj::Open { stack_index }) => Some(*stack_index),
                _ => None,
            };
            match stack_index {
                Some(si) if si >= from_abs => {
                    let value = self.stack[si];
                    if let Some(cell) = self.gc.upvalues.get_mut(id.index()) {
                        *cell = UpvalueObj::Closed(value);
                    }
                    self.barrier(value);
                }
                _ => self.open_upvalues.push(id),
            }
        }
    }

    // ---- CFunction ABI (spec §6.3) ----

    /// Number of arguments laid out for the CFunction currently executing.
    pub fn arg_count(&self) -> usize {
        self.frames.last().expect("CFunction called outside a frame").arg_count
    }

    /// Zero-based argument read; out of range reads as `nil`.
    pub fn arg(&self, index: usize) -> LuaValue {
        let f = self.frames.last().expect("CFunction called outside a frame");
        if index < f.arg_count {
            self.stack[f.register_base + index]
        } else {
            LuaValue::Nil
        }
    }

    /// Negative-from-top argument read; `1` is the last argument.
    pub fn arg_from_top(&self, from_top: usize) -> LuaValue {
        let f = self.frames.last().expect("CFunction called outside a frame");
        if from_top >= 1 && from_top <= f.arg_count {
            self.stack[f.register_base + f.arg_count - from_top]
        } else {
            LuaValue::Nil
        }
    }

    /// Pushes one return value; the count of calls to this made during a
    /// CFunction invocation is the value it should return.
    pub fn push_result(&mut self, v: LuaValue) {
        self.native_results.push(v);
    }

    pub fn arg_count_error(&self, expect: u32) -> CallCFuncError {
        CallCFuncError {
            kind: CFuncErrorKind::ArgCount,
            expect_arg_count: Some(expect),
            arg_index: None,
            expect_type: None,
            message: format!("expected {} arguments, got {}", expect, self.arg_count()),
        }
    }

    pub fn arg_type_error(&self, index: u32, expect_type: impl Into<String>) -> CallCFuncError {
        let expect_type = expect_type.into();
        CallCFuncError {
            kind: CFuncErrorKind::ArgType,
            expect_arg_count: None,
            arg_index: Some(index),
            expect_type: Some(expect_type.clone()),
            message: format!("bad argument #{} (expected {})", index, expect_type),
        }
    }

    /// Interns a string through this state's GC — the entry point host
    /// (CFunction/stdlib) code uses to hand a byte sequence into Lua values.
    pub fn new_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.gc.new_string(s))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
