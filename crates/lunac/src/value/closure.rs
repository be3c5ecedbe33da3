//! Function prototypes, upvalue descriptors, and closures.
//!
//! Prototypes are pool-tracked GC objects (not merely `Rc`-owned) so the
//! const-folded constants they hold get genuinely exercised by generation
//! promotion: a prototype is almost always long-lived, so it settles into
//! `Gen2` quickly, which gives the write barrier real work protecting any
//! `Gen0` closure created later that still points back at it.

use super::LuaValue;
use crate::gc::ids::{GcRef, ProtoId, UpvalueId};
use crate::gc::object::Trace;

/// How a closure's upvalue is resolved when the closure is created: either
/// captured directly off the enclosing function's active register stack, or
/// forwarded from one of the enclosing function's own upvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalDesc {
    ParentLocal { register: u8 },
    ParentUpvalue { index: u8 },
}

/// A compiled function body, produced once by the code generator and shared
/// by every closure created from it.
pub struct Prototype {
    pub instructions: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub nested: Vec<ProtoId>,
    pub upvalues: Vec<UpvalDesc>,
    pub upvalue_names: Vec<String>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub source_name: String,
    pub line_defined: u32,
    /// Parallel to `instructions`: the source line each instruction was
    /// generated from, used to attribute runtime errors.
    pub lines: Vec<u32>,
    /// Debug records for every local variable's live range, per spec §3.
    pub locals_debug: Vec<LocalVarInfo>,
}

/// One local variable's debug record: the register it occupied and the
/// instruction range `[begin_pc, end_pc)` over which that binding was live.
#[derive(Debug, Clone)]
pub struct LocalVarInfo {
    pub name: String,
    pub register: u8,
    pub begin_pc: u32,
    pub end_pc: u32,
}

impl Trace for Prototype {
    fn trace(&self, out: &mut Vec<GcRef>) {
        for c in &self.constants {
            c.trace(out);
        }
        for &p in &self.nested {
            out.push(GcRef::Proto(p));
        }
    }
}

/// A stack slot not yet closed over still reads/writes the live register
/// stack directly; once its frame returns, the value is copied out and the
/// upvalue is "closed".
pub enum UpvalueObj {
    Open { stack_index: usize },
    Closed(LuaValue),
}

impl Trace for UpvalueObj {
    fn trace(&self, out: &mut Vec<GcRef>) {
        if let UpvalueObj::Closed(v) = self {
            v.trace(out);
        }
    }
}

/// A prototype paired with the upvalues it captured at creation time.
pub struct Closure {
    pub proto: ProtoId,
    pub upvalues: Vec<UpvalueId>,
}

impl Trace for Closure {
    fn trace(&self, out: &mut Vec<GcRef>) {
        out.push(GcRef::Proto(self.proto));
        for &u in &self.upvalues {
            out.push(GcRef::Upvalue(u));
        }
    }
}
