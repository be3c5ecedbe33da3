use super::byte_source;
use crate::gc::Gc;
use crate::parser::ast::{Expr, Scope, SemOp, Stat};
use crate::parser::Parser;
use crate::semantic::Analyzer;

fn analyze(s: &'static str) -> crate::parser::ast::Block {
    let mut gc = Gc::new();
    let mut src = byte_source(s);
    let mut parser = Parser::new("chunk", &mut src, &mut gc).expect("lexes");
    let block = parser.parse_chunk().expect("parses");
    Analyzer::new("chunk").analyze_chunk(&block).expect("analyzes");
    block
}

#[test]
fn local_declare_then_self_assign_tags_write_and_read() {
    let block = analyze("local x; x = x");
    let Stat::Assign { targets, exprs, .. } = &block.stats[1] else { panic!("expected an assignment") };
    let Expr::Name(lhs) = &targets[0] else { panic!("expected a name target") };
    assert_eq!(lhs.scope.get(), Scope::Local(0));
    assert_eq!(lhs.sem_op.get(), SemOp::Write);
    let Expr::Name(rhs) = &exprs[0] else { panic!("expected a name expression") };
    assert_eq!(rhs.scope.get(), Scope::Local(0));
    assert_eq!(rhs.sem_op.get(), SemOp::Read);
}

#[test]
fn break_outside_any_loop_is_a_semantic_error() {
    let mut gc = Gc::new();
    let mut src = byte_source("break");
    let mut parser = Parser::new("chunk", &mut src, &mut gc).expect("lexes");
    let block = parser.parse_chunk().expect("parses");
    assert!(Analyzer::new("chunk").analyze_chunk(&block).is_err());
}

#[test]
fn vararg_outside_variadic_function_is_a_semantic_error() {
    let mut gc = Gc::new();
    let mut src = byte_source("function f() return ... end");
    let mut parser = Parser::new("chunk", &mut src, &mut gc).expect("lexes");
    let block = parser.parse_chunk().expect("parses");
    assert!(Analyzer::new("chunk").analyze_chunk(&block).is_err());
}
