use crate::gc::ids::GcRef;
use crate::gc::object::Generation;
use crate::gc::Gc;

#[test]
fn reachable_objects_survive_minor_and_major_collection() {
    let mut gc = Gc::new();
    let id = gc.new_table();
    let roots = vec![GcRef::Table(id)];
    gc.minor_collect(&roots);
    assert!(gc.tables.contains(id.index()));
    gc.major_collect(&roots);
    assert!(gc.tables.contains(id.index()));
}

#[test]
fn unreachable_objects_are_swept() {
    let mut gc = Gc::new();
    let id = gc.new_table();
    gc.minor_collect(&[]);
    assert!(!gc.tables.contains(id.index()));
}

#[test]
fn major_collection_promotes_every_gen0_survivor_to_gen1() {
    let mut gc = Gc::new();
    let id = gc.new_table();
    let roots = vec![GcRef::Table(id)];
    gc.major_collect(&roots);
    let header = gc.tables.header(id.index()).expect("survivor stays in the pool");
    assert_eq!(header.generation, Generation::Gen1);
}

#[test]
fn write_barrier_protects_a_young_child_of_an_old_object() {
    let mut gc = Gc::new();
    let parent = gc.new_table();
    // Promote the parent past Gen0 so a minor collection no longer traces it.
    gc.major_collect(&[GcRef::Table(parent)]);
    assert_eq!(gc.tables.header(parent.index()).unwrap().generation, Generation::Gen1);

    let child = gc.new_string("young");
    // Simulates the VM's write_barrier call after storing `child` into
    // `parent`'s hash part: the minor collection below never sees `parent`
    // or `child` in its explicit roots.
    gc.write_barrier(GcRef::String(child));
    gc.minor_collect(&[]);
    assert!(gc.strings.contains(child.index()), "write-barriered child must survive a minor collection");
}

#[test]
fn interning_after_a_sweep_recycles_ids_without_returning_stale_matches() {
    let mut gc = Gc::new();
    let first = gc.new_string("alpha");
    gc.minor_collect(&[]); // "alpha" is unreachable, gets swept, and its id may be recycled
    let second = gc.new_string("bravo");
    let third = gc.new_string("bravo");
    assert_eq!(second, third, "interning the same content must still return the same id");
    let fourth = gc.new_string("alpha");
    assert_eq!(
        gc.strings.get(fourth.index()).map(|s| s.bytes.as_str()),
        Some("alpha"),
        "re-interning content whose prior id was swept and recycled must not resolve to the wrong bytes"
    );
    let _ = first;
}
