use crate::value::LuaValue;
use crate::vm::Vm;

fn run(src: &str) -> Vec<LuaValue> {
    let mut vm = Vm::new();
    vm.do_string("chunk", src).unwrap_or_else(|e| panic!("{}: {}", src, e))
}

fn number(v: &LuaValue) -> f64 {
    match v {
        LuaValue::Number(n) => *n,
        other => panic!("expected a number, got {:?}", other),
    }
}

#[test]
fn globals_and_arithmetic_round_trip() {
    let mut vm = Vm::new();
    let results = vm.do_string("chunk", "a = 1; b = 2; c = a + b; return c").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(number(&results[0]), 3.0);

    let key_a = vm.gc.new_string("a");
    let key_b = vm.gc.new_string("b");
    let key_c = vm.gc.new_string("c");
    let globals = vm.gc.tables.get(vm.globals.index()).unwrap();
    assert_eq!(number(&globals.get(&LuaValue::String(key_a))), 1.0);
    assert_eq!(number(&globals.get(&LuaValue::String(key_b))), 2.0);
    assert_eq!(number(&globals.get(&LuaValue::String(key_c))), 3.0);
}

#[test]
fn table_literal_length_and_index() {
    let results = run("local t = {10,20,30}; return #t, t[2]");
    assert_eq!(results.len(), 2);
    assert_eq!(number(&results[0]), 3.0);
    assert_eq!(number(&results[1]), 20.0);
}

#[test]
fn vararg_count_is_preserved_through_a_call() {
    let results = run(
        r#"
        local function f(x, y, ...)
            local t = {...}
            return #t
        end
        return f(1, 2, 3, 4, 5)
        "#,
    );
    assert_eq!(results.len(), 1);
    assert_eq!(number(&results[0]), 3.0);
}

#[test]
fn string_concat_in_a_loop_grows_as_expected() {
    let results = run(
        r#"
        local s = ""
        for i = 1, 100 do
            s = s .. "x"
        end
        return #s
        "#,
    );
    assert_eq!(results.len(), 1);
    assert_eq!(number(&results[0]), 100.0);
}

#[test]
fn closure_capture_is_independent_across_factory_calls() {
    let results = run(
        r#"
        local function mk()
            local i = 0
            return function()
                i = i + 1
                return i
            end
        end
        local c = mk()
        c()
        c()
        return c()
        "#,
    );
    assert_eq!(results.len(), 1);
    assert_eq!(number(&results[0]), 3.0);

    let results = run(
        r#"
        local function mk()
            local i = 0
            return function()
                i = i + 1
                return i
            end
        end
        local a = mk()
        local b = mk()
        a()
        a()
        a()
        return a(), b()
        "#,
    );
    assert_eq!(results.len(), 2);
    assert_eq!(number(&results[0]), 4.0);
    assert_eq!(number(&results[1]), 1.0);
}

#[test]
fn method_call_desugars_with_implicit_self() {
    let results = run(
        r#"
        local o = {n = 7}
        function o:get() return self.n end
        return o:get()
        "#,
    );
    assert_eq!(results.len(), 1);
    assert_eq!(number(&results[0]), 7.0);
}

#[test]
fn executing_the_same_program_twice_is_deterministic() {
    let src = "local t = {} for i=1,20 do t[i] = i*i end local s = 0 for i=1,20 do s = s + t[i] end return s";
    let first = run(src);
    let second = run(src);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(number(a), number(b));
    }
}
