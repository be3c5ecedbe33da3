//! Module manager (spec §2, §6.4): orchestrates lex→parse→analyze→generate
//! for one source buffer, and caches the resulting module closure in the
//! state's `modules` table so a second `load_module` call for the same name
//! is a table lookup instead of a recompile.
//!
//! Grounded on the teacher's module-cache shape (`stdlib/package.rs`'s
//! `package.loaded`), simplified to the core's scope: this crate has no
//! `require`/search-path semantics (those are stdlib, out of scope per
//! spec §6.5) — only the cache-by-name contract spec §6.4 describes.

use super::Vm;
use crate::codegen;
use crate::error::{LunaError, LunaResult, Position, RuntimeError};
use crate::gc::ids::{FunctionId, GcRef, ProtoId};
use crate::gc::Gc;
use crate::lexer::ByteSource;
use crate::parser::Parser;
use crate::semantic::Analyzer;
use crate::value::{Closure, LuaValue};

/// Supplies the source bytes for a named module. The host owns how names
/// map to bytes (filesystem, embedded bundle, network); this crate only
/// asks for the whole buffer up front rather than streaming it, since every
/// realistic host already has the full source in memory by the time it
/// calls in.
pub trait ModuleLoader {
    fn load(&mut self, name: &str) -> Option<Vec<u8>>;
}

/// A `ModuleLoader` backed by a single in-memory buffer, named `name`. Used
/// by `Vm::do_string` and by tests that don't need a real loader.
pub struct SingleSource<'a> {
    name: &'a str,
    bytes: &'a [u8],
}

impl<'a> SingleSource<'a> {
    pub fn new(name: &'a str, bytes: &'a [u8]) -> Self {
        SingleSource { name, bytes }
    }
}

impl<'a> ModuleLoader for SingleSource<'a> {
    fn load(&mut self, name: &str) -> Option<Vec<u8>> {
        if name == self.name {
            Some(self.bytes.to_vec())
        } else {
            None
        }
    }
}

/// Runs the full pipeline — lex, parse, analyze, generate — over one source
/// buffer and returns the compiled chunk's prototype id.
fn compile_source(module: &str, bytes: &[u8], gc: &mut Gc) -> LunaResult<ProtoId> {
    let mut cursor = 0usize;
    let mut pull = move || {
        if cursor < bytes.len() {
            let b = bytes[cursor];
            cursor += 1;
            Some(b)
        } else {
            None
        }
    };
    let source: &mut dyn ByteSource = &mut pull;
    let mut parser = Parser::new(module, source, gc).map_err(LunaError::from)?;
    let block = parser.parse_chunk().map_err(LunaError::from)?;
    let mut analyzer = Analyzer::new(module);
    analyzer.analyze_chunk(&block).map_err(LunaError::from)?;
    codegen::compile_chunk(module, &block, gc).map_err(LunaError::from)
}

impl Vm {
    /// Compiles `source` as an anonymous, uncached chunk and runs it to
    /// completion, returning every value it returned. This is the entry
    /// point a REPL's `DoString` calls (spec §6.5).
    pub fn do_string(&mut self, module: &str, source: &str) -> LunaResult<Vec<LuaValue>> {
        let proto_id = compile_source(module, source.as_bytes(), &mut self.gc)?;
        let closure_id = self.gc.new_closure(Closure { proto: proto_id, upvalues: Vec::new() });
        self.call(closure_id, &[]).map_err(LunaError::from)
    }

    /// Loads and compiles a named module through `loader`, caching the
    /// resulting closure in the state's `modules` table. A second call with
    /// the same name returns the cached closure without recompiling (spec
    /// §6.4: "a second call with the same name pushes the cached closure").
    pub fn load_module(&mut self, name: &str, loader: &mut dyn ModuleLoader) -> LunaResult<crate::gc::ids::FunctionId> {
        let key = self.new_string(name);
        if let LuaValue::Closure(fid) =
            self.gc.tables.get(self.modules.index()).expect("modules table installed at construction").get(&key)
        {
            return Ok(fid);
        }
        let bytes = loader.load(name).ok_or_else(|| {
            LunaError::Runtime(RuntimeError::new(Position::new(name, 0), format!("module '{}' not found", name)))
        })?;
        let proto_id = compile_source(name, &bytes, &mut self.gc)?;
        let closure_id = self.gc.new_closure(Closure { proto: proto_id, upvalues: Vec::new() });
        if let Some(t) = self.gc.tables.get_mut(self.modules.index()) {
            t.set(key, LuaValue::Closure(closure_id));
        }
        self.gc.write_barrier(GcRef::Closure(closure_id));
        Ok(closure_id)
    }

    /// Loads (or fetches the cached) module and runs it to completion. This
    /// is the entry point a single-file runner's `DoModule(argv[1])` calls
    /// (spec §6.5).
    pub fn do_module(&mut self, name: &str, loader: &mut dyn ModuleLoader) -> LunaResult<Vec<LuaValue>> {
        let closure_id = self.load_module(name, loader)?;
        self.call(closure_id, &[]).map_err(LunaError::from)
    }
}
