use crate::value::{LuaTable, LuaValue};

#[test]
fn appending_past_the_border_grows_length_by_one() {
    let mut t = LuaTable::new();
    t.set(LuaValue::Number(1.0), LuaValue::Number(10.0));
    assert_eq!(t.length(), 1);
    let len = t.length();
    t.set(LuaValue::Number((len + 1) as f64), LuaValue::Number(20.0));
    assert_eq!(t.length(), 2);
    assert_eq!(t.get(&LuaValue::Number(t.length() as f64)), LuaValue::Number(20.0));
}

#[test]
fn assigning_nil_erases_the_key() {
    let mut t = LuaTable::new();
    t.set(LuaValue::Number(5.0), LuaValue::Bool(true));
    assert_eq!(t.get(&LuaValue::Number(5.0)), LuaValue::Bool(true));
    t.set(LuaValue::Number(5.0), LuaValue::Nil);
    assert_eq!(t.get(&LuaValue::Number(5.0)), LuaValue::Nil);
}

#[test]
fn sequential_assignment_from_empty_leaves_hash_part_empty() {
    let mut t = LuaTable::new();
    t.set(LuaValue::Number(1.0), LuaValue::Number(1.0));
    t.set(LuaValue::Number(2.0), LuaValue::Number(2.0));
    t.set(LuaValue::Number(3.0), LuaValue::Number(3.0));
    assert_eq!(t.length(), 3);
    assert_eq!(t.hash_len(), 0);
}

#[test]
fn out_of_order_assignment_merges_up_once_the_gap_closes() {
    let mut t = LuaTable::new();
    t.set(LuaValue::Number(2.0), LuaValue::Number(20.0));
    t.set(LuaValue::Number(3.0), LuaValue::Number(30.0));
    // both keys sit in the hash part until key 1 closes the array's border
    assert_eq!(t.length(), 0);
    assert_eq!(t.hash_len(), 2);
    t.set(LuaValue::Number(1.0), LuaValue::Number(10.0));
    assert_eq!(t.length(), 3);
    assert_eq!(t.hash_len(), 0);
}
