//! Generational mark-sweep garbage collector.
//!
//! Three generations (`Gen0`/`Gen1`/`Gen2`), each an [`object::Pool`] per
//! object kind. A minor collection only traces and sweeps `Gen0`; survivors
//! promote to `Gen1`. A major collection walks every generation. Cross-
//! generation references from an old object into a younger one are recorded
//! by [`Gc::write_barrier`] and treated as extra roots during a minor
//! collection, so a minor cycle never has to trace the old generations to
//! stay correct.

pub mod ids;
pub mod object;
pub mod string_interner;

use ids::{FunctionId, GcRef, ProtoId, StringId, TableId, UpvalueId, UserDataId};
use object::{Generation, Pool, Trace};
use string_interner::StringInterner;

use crate::value::{Closure, LuaTable, Prototype, StringObj, UpvalueObj, UserData};

/// Adaptive thresholds the minor collector recomputes after every cycle,
/// clamped to keep a single Gen0 object from collapsing the threshold to
/// zero and a runaway root set from growing it unbounded.
const GEN0_INIT: usize = 512;
const GEN0_MAX: usize = 2048;
const GEN1_INIT: usize = 512;
const GEN1_MAX: usize = 102_400;

pub struct Gc {
    pub strings: Pool<StringObj>,
    pub tables: Pool<LuaTable>,
    pub closures: Pool<Closure>,
    pub upvalues: Pool<UpvalueObj>,
    pub userdata: Pool<UserData>,
    pub protos: Pool<Prototype>,

    pub interner: StringInterner,

    gen0_threshold: usize,
    gen1_threshold: usize,

    /// Extra roots recorded by the write barrier: an old (Gen1/Gen2) object
    /// that was just mutated to point at a young (Gen0) one. Drained and
    /// re-filled by every minor collection.
    remembered: Vec<GcRef>,
}

impl Gc {
    pub fn new() -> Self {
        Gc {
            strings: Pool::new(),
            tables: Pool::new(),
            closures: Pool::new(),
            upvalues: Pool::new(),
            userdata: Pool::new(),
            protos: Pool::new(),
            interner: StringInterner::new(),
            gen0_threshold: GEN0_INIT,
            gen1_threshold: GEN1_INIT,
            remembered: Vec::new(),
        }
    }

    pub fn should_run_minor(&self) -> bool {
        self.strings.count_in(Generation::Gen0)
            + self.tables.count_in(Generation::Gen0)
            + self.closures.count_in(Generation::Gen0)
            + self.upvalues.count_in(Generation::Gen0)
            + self.userdata.count_in(Generation::Gen0)
            + self.protos.count_in(Generation::Gen0)
            >= self.gen0_threshold
    }

    pub fn should_run_major(&self) -> bool {
        self.strings.count_in(Generation::Gen1)
            + self.tables.count_in(Generation::Gen1)
            + self.closures.count_in(Generation::Gen1)
            + self.upvalues.count_in(Generation::Gen1)
            + self.userdata.count_in(Generation::Gen1)
            + self.protos.count_in(Generation::Gen1)
            >= self.gen1_threshold
    }

    /// Intern or allocate a string, returning its id. Long strings (over
    /// [`string_interner::SHORT_STRING_LIMIT`]) bypass the intern table
    /// entirely and are allocated fresh every call.
    pub fn new_string(&mut self, s: &str) -> StringId {
        if s.len() > string_interner::SHORT_STRING_LIMIT {
            let hash = self.interner.hash_of(s);
            let id = self.strings.insert(StringObj { bytes: s.to_owned(), hash });
            return StringId(id);
        }
        let hash = self.interner.hash_of(s);
        if let Some(id) =
            self.interner.find(hash, s, |id| self.strings.get(id.0).map(|o| o.bytes.clone()))
        {
            return id;
        }
        let raw = self.strings.insert(StringObj { bytes: s.to_owned(), hash });
        let id = StringId(raw);
        self.interner.record(hash, id);
        id
    }

    pub fn new_table(&mut self) -> TableId {
        TableId(self.tables.insert(LuaTable::new()))
    }

    pub fn new_closure(&mut self, closure: Closure) -> FunctionId {
        FunctionId(self.closures.insert(closure))
    }

    pub fn new_upvalue(&mut self, upvalue: UpvalueObj) -> UpvalueId {
        UpvalueId(self.upvalues.insert(upvalue))
    }

    pub fn new_userdata(&mut self, userdata: UserData) -> UserDataId {
        UserDataId(self.userdata.insert(userdata))
    }

    /// Prototypes default to `Gen2`: they are immutable after code
    /// generation and almost always outlive every closure created from them,
    /// so there is no point cycling them through the young generations.
    pub fn new_proto(&mut self, proto: Prototype) -> ProtoId {
        let id = self.protos.insert(proto);
        self.protos.set_header(id, object::GcHeader { color: object::GcColor::White, generation: Generation::Gen2 });
        ProtoId(id)
    }

    /// Records that an object outside Gen0 was just made to point at a Gen0
    /// object, so the next minor collection treats the young object as
    /// reachable without having to trace the whole old generation to find it.
    /// Must be called at every store into a long-lived container (table set,
    /// upvalue close, closure upvalue fixup) whose owner may already be
    /// promoted past Gen0.
    pub fn write_barrier(&mut self, young: GcRef) {
        self.remembered.push(young);
    }

    /// Trace and sweep Gen0 only. `roots` are the VM's live register stack,
    /// globals table, and call-frame closures.
    pub fn minor_collect(&mut self, roots: &[GcRef]) {
        let mut worklist: Vec<GcRef> = roots.to_vec();
        worklist.append(&mut self.remembered);
        self.mark(worklist, Generation::Gen0);

        let promote = |g: Generation| match g {
            Generation::Gen0 => Generation::Gen1,
            other => other,
        };
        let interner = &mut self.interner;
        self.strings.sweep_with(Generation::Gen0, promote, |id, obj| interner.forget(obj.hash, StringId(id)));
        self.tables.sweep(Generation::Gen0, promote);
        self.closures.sweep(Generation::Gen0, promote);
        self.upvalues.sweep(Generation::Gen0, promote);
        self.userdata.sweep(Generation::Gen0, promote);
        self.protos.sweep(Generation::Gen0, promote);

        let alive = self.strings.count_in(Generation::Gen1)
            + self.tables.count_in(Generation::Gen1)
            + self.closures.count_in(Generation::Gen1)
            + self.upvalues.count_in(Generation::Gen1)
            + self.userdata.count_in(Generation::Gen1)
            + self.protos.count_in(Generation::Gen1);
        self.gen0_threshold = recompute_threshold(self.gen0_threshold, alive, GEN0_INIT, GEN0_MAX);
    }

    /// Trace and sweep every generation, promoting Gen1 survivors to Gen2.
    pub fn major_collect(&mut self, roots: &[GcRef]) {
        let mut worklist: Vec<GcRef> = roots.to_vec();
        worklist.append(&mut self.remembered);
        self.mark(worklist, Generation::Gen2);

        let promote = |g: Generation| match g {
            Generation::Gen0 => Generation::Gen1,
            Generation::Gen1 => Generation::Gen2,
            Generation::Gen2 => Generation::Gen2,
        };
        let interner = &mut self.interner;
        self.strings.sweep_with(Generation::Gen2, promote, |id, obj| interner.forget(obj.hash, StringId(id)));
        self.tables.sweep(Generation::Gen2, promote);
        self.closures.sweep(Generation::Gen2, promote);
        self.upvalues.sweep(Generation::Gen2, promote);
        self.userdata.sweep(Generation::Gen2, promote);
        self.protos.sweep(Generation::Gen2, promote);

        let gen0_alive = self.strings.count_in(Generation::Gen0)
            + self.tables.count_in(Generation::Gen0)
            + self.closures.count_in(Generation::Gen0)
            + self.upvalues.count_in(Generation::Gen0)
            + self.userdata.count_in(Generation::Gen0)
            + self.protos.count_in(Generation::Gen0);
        self.gen0_threshold = recompute_threshold(self.gen0_threshold, gen0_alive, GEN0_INIT, GEN0_MAX);

        let gen1_alive = self.strings.count_in(Generation::Gen1)
            + self.tables.count_in(Generation::Gen1)
            + self.closures.count_in(Generation::Gen1)
            + self.upvalues.count_in(Generation::Gen1)
            + self.userdata.count_in(Generation::Gen1)
            + self.protos.count_in(Generation::Gen1);
        // Past `GEN1_MAX` survivors, the normal doubling/halving formula
        // would clamp back down to a threshold already below `gen1_alive`,
        // triggering another major cycle on the very next allocation. Per
        // spec §4.6, pin the threshold above the current count instead.
        if gen1_alive > GEN1_MAX {
            self.gen1_threshold = gen1_alive + GEN1_MAX;
        } else {
            self.gen1_threshold = recompute_threshold(self.gen1_threshold, gen1_alive, GEN1_INIT, GEN1_MAX);
        }
    }

    /// Breadth-first mark from `worklist`, blackening every object reachable
    /// at generation `<= scope` (objects beyond `scope` are assumed already
    /// alive — a minor collection never needs to decide the liveness of
    /// Gen1/Gen2 objects it points through).
    fn mark(&mut self, mut worklist: Vec<GcRef>, scope: Generation) {
        use object::GcColor;

        while let Some(r) = worklist.pop() {
            let mut children = Vec::new();
            match r {
                GcRef::String(id) => {
                    blacken_leaf(&mut self.strings, id.0, scope);
                }
                GcRef::Table(id) => {
                    if let Some(header) = self.tables.header(id.0) {
                        if header.generation <= scope && header.color == GcColor::White {
                            self.tables.set_header(
                                id.0,
                                object::GcHeader { color: GcColor::Black, generation: header.generation },
                            );
                            if let Some(t) = self.tables.get(id.0) {
                                t.trace(&mut children);
                            }
                        }
                    }
                }
                GcRef::Closure(id) => {
                    if let Some(header) = self.closures.header(id.0) {
                        if header.generation <= scope && header.color == GcColor::White {
                            self.closures.set_header(
                                id.0,
                                object::GcHeader { color: GcColor::Black, generation: header.generation },
                            );
                            if let Some(c) = self.closures.get(id.0) {
                                c.trace(&mut children);
                            }
                        }
                    }
                }
                GcRef::Upvalue(id) => {
                    if let Some(header) = self.upvalues.header(id.0) {
                        if header.generation <= scope && header.color == GcColor::White {
                            self.upvalues.set_header(
                                id.0,
                                object::GcHeader { color: GcColor::Black, generation: header.generation },
                            );
                            if let Some(u) = self.upvalues.get(id.0) {
                                u.trace(&mut children);
                            }
                        }
                    }
                }
                GcRef::UserData(id) => {
                    blacken_leaf(&mut self.userdata, id.0, scope);
                }
                GcRef::Proto(id) => {
                    if let Some(header) = self.protos.header(id.0) {
                        if header.generation <= scope && header.color == GcColor::White {
                            self.protos.set_header(
                                id.0,
                                object::GcHeader { color: GcColor::Black, generation: header.generation },
                            );
                            if let Some(p) = self.protos.get(id.0) {
                                p.trace(&mut children);
                            }
                        }
                    }
                }
            }
            worklist.append(&mut children);
        }
    }

}

/// Spec §4.6's threshold update: while `threshold < 2*alive`, double it;
/// while `threshold >= 4*alive`, halve it; clamp to `[min, max]`.
fn recompute_threshold(mut threshold: usize, alive: usize, min: usize, max: usize) -> usize {
    while threshold < 2 * alive && threshold < max {
        threshold *= 2;
    }
    while threshold >= 4 * alive && threshold > min {
        threshold /= 2;
    }
    threshold.clamp(min, max)
}

/// Blackens a leaf object (no children of its own to push onto the worklist).
fn blacken_leaf<T: Trace>(pool: &mut Pool<T>, id: u32, scope: Generation) {
    use object::GcColor;
    if let Some(header) = pool.header(id) {
        if header.generation <= scope && header.color == GcColor::White {
            pool.set_header(id, object::GcHeader { color: GcColor::Black, generation: header.generation });
        }
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}
