//! Parsing tests for expression, metadata and type fragments

use parser::{
    parse, parse_complex_type, parse_expr, parse_metadata, Binop, ComplexType, Constant, ExprKind,
    Fragment, FunctionKind, GrammarEntry, ParseError, Position, StringQuotes, TypeParam,
};

fn pos() -> Position {
    Position::new(0, 0, 0)
}

#[test]
fn test_call_with_constant_arguments() {
    match parse_expr("Compiler.define('FOO')", pos()) {
        Ok(e) => match e.kind {
            ExprKind::Call(callee, args) => {
                assert_eq!(callee.to_string(), "Compiler.define");
                assert_eq!(args.len(), 1);
                assert_eq!(
                    args[0].kind,
                    ExprKind::Const(Constant::String("FOO".into(), StringQuotes::Single))
                );
            }
            other => panic!("Expected call, got {:?}", other),
        },
        Err(e) => panic!("Call should parse, got: {}", e),
    }
}

#[test]
fn test_binary_expression_roundtrips_through_printer() {
    let e = parse_expr("a + b * 2", pos()).expect("parse");
    assert_eq!(e.to_string(), "a + b * 2");
}

#[test]
fn test_ternary_and_null_coalescing() {
    let e = parse_expr("a ?? b ? 1 : 2", pos()).expect("parse");
    match e.kind {
        ExprKind::Ternary(cond, _, _) => {
            assert!(matches!(cond.kind, ExprKind::Binop(Binop::NullCoal, _, _)))
        }
        other => panic!("Expected ternary, got {:?}", other),
    }
}

#[test]
fn test_block_with_vars_and_loops() {
    let input = r#"{
        var total = 0;
        for (i in 0...10) total += i;
        while (total > 3) total--;
        return total;
    }"#;
    match parse_expr(input, pos()) {
        Ok(e) => match e.kind {
            ExprKind::Block(items) => {
                assert_eq!(items.len(), 4);
                assert!(matches!(items[0].kind, ExprKind::Vars(_)));
                assert!(matches!(items[1].kind, ExprKind::For(_, _)));
                assert!(matches!(items[2].kind, ExprKind::While(_, _, true)));
                assert!(matches!(items[3].kind, ExprKind::Return(Some(_))));
            }
            other => panic!("Expected block, got {:?}", other),
        },
        Err(e) => panic!("Block should parse, got: {}", e),
    }
}

#[test]
fn test_object_literal_and_empty_block() {
    let e = parse_expr("{ a: 1, \"b c\": 2 }", pos()).expect("parse");
    match e.kind {
        ExprKind::ObjectDecl(fields) => {
            assert_eq!(fields.len(), 2);
            assert!(!fields[0].quoted);
            assert!(fields[1].quoted);
            assert_eq!(fields[1].field, "b c");
        }
        other => panic!("Expected object, got {:?}", other),
    }
    let e = parse_expr("{}", pos()).expect("parse");
    assert_eq!(e.kind, ExprKind::Block(vec![]));
}

#[test]
fn test_function_literal() {
    let e = parse_expr("function(x:Int, ?y) return x + 1", pos()).expect("parse");
    match e.kind {
        ExprKind::Function(FunctionKind::Anonymous, f) => {
            assert_eq!(f.args.len(), 2);
            assert!(f.args[1].opt);
            assert!(f.expr.is_some());
        }
        other => panic!("Expected function, got {:?}", other),
    }
}

#[test]
fn test_new_and_cast() {
    let e = parse_expr("cast(new haxe.ds.StringMap<Int>(), Dynamic)", pos()).expect("parse");
    match e.kind {
        ExprKind::Cast(inner, Some(_)) => match inner.kind {
            ExprKind::New(path, args) => {
                assert_eq!(path.pack, vec!["haxe", "ds"]);
                assert_eq!(path.name, "StringMap");
                assert_eq!(path.params.len(), 1);
                assert!(args.is_empty());
            }
            other => panic!("Expected new, got {:?}", other),
        },
        other => panic!("Expected cast, got {:?}", other),
    }
}

#[test]
fn test_metadata_fragment() {
    let m = parse_metadata("@:native(\"foo.Bar\")", Position::new(1, 10, 30)).expect("parse");
    assert_eq!(m.name, ":native");
    assert_eq!(m.params.len(), 1);
    assert_eq!(m.pos.file_id, 1);
    assert_eq!(m.pos.min, 10);
}

#[test]
fn test_complex_types() {
    match parse_complex_type("Array<haxe.macro.Expr> -> Void", pos()) {
        Ok(ComplexType::Function(args, ret)) => {
            assert_eq!(args.len(), 1);
            match &args[0] {
                ComplexType::Path(p) => match &p.params[0] {
                    TypeParam::Type(ComplexType::Path(inner)) => {
                        assert_eq!(inner.pack, vec!["haxe", "macro"]);
                        assert_eq!(inner.name, "Expr");
                    }
                    other => panic!("Expected type param, got {:?}", other),
                },
                other => panic!("Expected path, got {:?}", other),
            }
            assert_eq!(ret.to_string(), "Void");
        }
        other => panic!("Expected function type, got {:?}", other),
    }

    let t = parse_complex_type("{ name : String, ?age : Int }", pos()).expect("parse");
    assert_eq!(t.to_string(), "{ name : String, ?age : Int }");

    let t = parse_complex_type("haxe.macro.Expr.ExprDef", pos()).expect("parse");
    match t {
        ComplexType::Path(p) => {
            assert_eq!(p.name, "Expr");
            assert_eq!(p.sub.as_deref(), Some("ExprDef"));
        }
        other => panic!("Expected path, got {:?}", other),
    }
}

#[test]
fn test_grammar_entry_dispatch() {
    assert!(matches!(
        parse(GrammarEntry::Expr, "x.y", pos()),
        Ok(Fragment::Expr(_))
    ));
    assert!(matches!(
        parse(GrammarEntry::ComplexType, "Int", pos()),
        Ok(Fragment::ComplexType(_))
    ));
}

#[test]
fn test_errors() {
    assert!(matches!(
        parse_expr("   ", pos()),
        Err(ParseError::Empty { .. })
    ));
    assert!(matches!(
        parse_expr("1 + 2 )", pos()),
        Err(ParseError::TrailingInput { .. })
    ));
    assert!(matches!(
        parse_expr("(1 + ", pos()),
        Err(ParseError::Unexpected { .. }) | Err(ParseError::TrailingInput { .. })
    ));
}

#[test]
fn test_positions_saturate_at_large_offsets() {
    let base = Position::new(3, u32::MAX - 2, u32::MAX - 2);
    let e = parse_expr("1 + 2", base).expect("parse");
    assert_eq!(e.pos.file_id, 3);
    assert!(e.pos.min >= u32::MAX - 2);
    assert_eq!(e.pos.max, u32::MAX);
    match e.kind {
        ExprKind::Binop(Binop::Add, left, right) => {
            assert_eq!(left.pos.min, u32::MAX - 2);
            assert_eq!(right.pos.max, u32::MAX);
        }
        other => panic!("Expected binop, got {:?}", other),
    }
}
