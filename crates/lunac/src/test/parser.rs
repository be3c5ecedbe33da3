use super::byte_source;
use crate::gc::Gc;
use crate::parser::ast::{BinOp, Expr, Stat};
use crate::parser::Parser;

fn parse(s: &'static str) -> crate::parser::ast::Block {
    let mut gc = Gc::new();
    let mut src = byte_source(s);
    let mut parser = Parser::new("chunk", &mut src, &mut gc).expect("lexes");
    parser.parse_chunk().expect("parses")
}

fn single_stat(s: &'static str) -> crate::parser::ast::Block {
    parse(s)
}

#[test]
fn addition_is_left_associative() {
    let block = single_stat("a = 1 + 2 + 3");
    let Stat::Assign { exprs, .. } = &block.stats[0] else { panic!("expected an assignment") };
    assert_eq!(exprs.len(), 1);
    let Expr::Binary { op: BinOp::Add, lhs, rhs, .. } = &exprs[0] else { panic!("expected a binary +") };
    // Outer node is `(1+2) + 3`: rhs is the literal 3, lhs is the nested `1+2`.
    assert!(matches!(**rhs, Expr::Number(n) if n == 3.0));
    let Expr::Binary { op: BinOp::Add, lhs: inner_lhs, rhs: inner_rhs, .. } = &**lhs else {
        panic!("expected the left operand to itself be a binary +")
    };
    assert!(matches!(**inner_lhs, Expr::Number(n) if n == 1.0));
    assert!(matches!(**inner_rhs, Expr::Number(n) if n == 2.0));
}

#[test]
fn caret_is_right_associative() {
    let block = single_stat("a = b^c^d");
    let Stat::Assign { exprs, .. } = &block.stats[0] else { panic!("expected an assignment") };
    let Expr::Binary { op: BinOp::Pow, lhs, rhs, .. } = &exprs[0] else { panic!("expected a binary ^") };
    // `b^(c^d)`: lhs is the bare name `b`, rhs is the nested `c^d`.
    assert!(matches!(**lhs, Expr::Name(_)));
    assert!(matches!(**rhs, Expr::Binary { op: BinOp::Pow, .. }));
}

#[test]
fn assigning_to_a_call_result_is_a_parse_error() {
    let mut gc = Gc::new();
    let mut src = byte_source("f() = 1");
    let mut parser = Parser::new("chunk", &mut src, &mut gc).expect("lexes");
    assert!(parser.parse_chunk().is_err());
}
