//! Call-site dispatch: expression, build, type and display macros.

mod common;

use common::*;
use parser::{Access, Binop, ComplexType, Expr, ExprKind, FieldKind, MetadataEntry, Position, TypePath};
use rayzor_macro::context::{MessageOrigin, Severity};
use rayzor_macro::macro_system::marshal::{
    decode_expr, encode_complex_type, encode_expr, encode_field, encode_type,
};
use rayzor_macro::macro_system::{NativeRegistry, RuntimeFailure, Value};
use rayzor_macro::types::{FunArg, Type};
use rayzor_macro::{CallMode, MacroError, MacroRef, MacroResult, TypingState};
use std::cell::RefCell;
use std::rc::Rc;

fn tools_module() -> rayzor_macro::types::ModuleDef {
    macro_module(
        "macros.Tools",
        &[
            ("sum", vec![], Type::macro_expr()),
            ("second", vec![FunArg::new("a", Type::macro_expr()), FunArg::new("b", Type::macro_expr())], Type::macro_expr()),
            ("count", vec![FunArg::new("first", Type::macro_expr()), FunArg::new("rest", Type::array(Type::macro_expr()))], Type::macro_expr()),
            ("scale", vec![FunArg::new("factor", Type::int())], Type::macro_expr()),
            ("build", vec![], Type::array(Type::macro_field())),
            ("keep", vec![], Type::array(Type::macro_field())),
            ("later", vec![], Type::macro_complex_type()),
            ("broken", vec![], Type::macro_expr()),
            ("fails", vec![], Type::macro_expr()),
            ("number", vec![], Type::int()),
            ("add", vec![FunArg::new("a", Type::macro_expr()), FunArg::new("b", Type::macro_expr())], Type::macro_expr()),
            ("identity", vec![], Type::array(Type::macro_field())),
            ("typed", vec![], Type::macro_type()),
            ("complex", vec![], Type::macro_complex_type()),
            ("apply", vec![FunArg::new("f", Type::Fun(vec![FunArg::new("x", Type::int())], Box::new(Type::int())))], Type::macro_expr()),
            ("warns", vec![], Type::macro_expr()),
        ],
    )
}

fn natives() -> NativeRegistry {
    let mut natives = NativeRegistry::new();
    natives.register("macros.Tools", "sum", |api, _args| {
        let expr = api
            .parse_expr("1 + 2", Position::null())
            .map_err(|e| RuntimeFailure::Fatal(e.to_string()))?;
        Ok(Some(encode_expr(&expr)))
    });
    natives.register("macros.Tools", "second", |_api, args| Ok(args.get(1).cloned()));
    natives.register("macros.Tools", "count", |api, args| {
        let rest = args[1].as_array().map(|a| a.len()).unwrap_or(0);
        let expr = api
            .parse_expr(&rest.to_string(), Position::null())
            .map_err(|e| RuntimeFailure::Fatal(e.to_string()))?;
        Ok(Some(encode_expr(&expr)))
    });
    natives.register("macros.Tools", "scale", |api, args| {
        let factor = args[0].as_int().unwrap_or(0);
        let expr = api
            .parse_expr(&format!("x * {}", factor), Position::null())
            .map_err(|e| RuntimeFailure::Fatal(e.to_string()))?;
        Ok(Some(encode_expr(&expr)))
    });
    natives.register("macros.Tools", "build", |api, _args| {
        let field = parser::Field {
            name: "generated".to_string(),
            doc: None,
            access: vec![parser::Access::Public],
            kind: FieldKind::Var(None, None),
            pos: api.current_pos(),
            meta: Vec::new(),
        };
        Ok(Some(Value::Array(vec![encode_field(&field)])))
    });
    natives.register("macros.Tools", "keep", |_api, _args| Ok(Some(Value::Null)));
    natives.register("macros.Tools", "later", |_api, _args| Ok(Some(Value::Null)));
    natives.register("macros.Tools", "broken", |_api, _args| {
        Ok(Some(Value::object([("expr", Value::Int(3))])))
    });
    natives.register("macros.Tools", "fails", |_api, _args| {
        Err(RuntimeFailure::Exception(Value::string("nope")))
    });
    natives.register("macros.Tools", "add", |_api, args| {
        let operand = |i: usize| {
            args.get(i)
                .and_then(|v| decode_expr(v).ok())
                .ok_or_else(|| RuntimeFailure::Exception(Value::string("expected an expression")))
        };
        let sum = Expr::new(
            ExprKind::Binop(Binop::Add, Box::new(operand(0)?), Box::new(operand(1)?)),
            Position::null(),
        );
        Ok(Some(encode_expr(&sum)))
    });
    natives.register("macros.Tools", "identity", |api, _args| {
        let fields = api
            .get_build_fields()
            .map_err(|e| RuntimeFailure::Exception(Value::string(e.to_string())))?;
        Ok(Some(Value::Array(fields.iter().map(encode_field).collect())))
    });
    natives.register("macros.Tools", "typed", |_api, _args| Ok(Some(encode_type(&Type::int()))));
    natives.register("macros.Tools", "complex", |_api, _args| {
        let ct = ComplexType::Path(TypePath::new(&[], "String"));
        Ok(Some(encode_complex_type(&ct)))
    });
    natives.register("macros.Tools", "apply", |api, args| match args.first() {
        Some(Value::Function(f)) => {
            let expr = api
                .parse_expr(&f.arity.to_string(), Position::null())
                .map_err(|e| RuntimeFailure::Fatal(e.to_string()))?;
            Ok(Some(encode_expr(&expr)))
        }
        other => Err(RuntimeFailure::Exception(Value::string(format!(
            "expected a function, got {:?}",
            other
        )))),
    });
    natives.register("macros.Tools", "warns", |api, _args| {
        let pos = api.current_pos();
        api.warning("generated code", pos);
        Ok(Some(encode_expr(&Expr::int(0, Position::null()))))
    });
    natives
}

fn setup(name: &str) -> (rayzor_macro::MacroEngine, rayzor_macro::CompilationContext, Rc<RefCell<Registry>>) {
    let registry = registry_with(vec![tools_module()]);
    let ctx = primary_context(&registry, scratch_dir(name));
    (engine(natives()), ctx, registry)
}

fn tools(method: &str) -> MacroRef {
    MacroRef::new(rayzor_macro::types::Path::parse("macros.Tools"), method)
}

#[test]
fn test_expression_macro_result_takes_call_position() {
    let (mut engine, mut ctx, _) = setup("sum");
    let result = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("sum"), &[], call_pos())
        .expect("macro call");
    let expr = match result {
        MacroResult::Expr(expr) => expr,
        other => panic!("unexpected result {:?}", other),
    };
    assert_eq!(expr.to_string(), "1 + 2");
    assert_eq!(expr.pos, call_pos());
    match &expr.kind {
        ExprKind::Binop(Binop::Add, left, right) => {
            assert_eq!(left.pos, call_pos());
            assert_eq!(right.pos, call_pos());
        }
        other => panic!("unexpected expression {:?}", other),
    }
}

#[test]
fn test_expression_arguments_arrive_as_fragments() {
    let (mut engine, mut ctx, _) = setup("second");
    let args = [expr("a + 1"), expr("b * 2")];
    let result = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("second"), &args, call_pos())
        .expect("macro call");
    match result {
        MacroResult::Expr(e) => {
            assert_eq!(e.to_string(), "b * 2");
            // Source positions of the fragment are kept
            assert_eq!(e.pos.file_id, 0);
            assert_ne!(e.pos, call_pos());
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_rest_arguments_collected() {
    let (mut engine, mut ctx, _) = setup("count");
    let args = [expr("1"), expr("2"), expr("3"), expr("4")];
    let result = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("count"), &args, call_pos())
        .expect("macro call");
    match result {
        MacroResult::Expr(e) => assert_eq!(e.to_string(), "3"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_other_arguments_are_evaluated() {
    let (mut engine, mut ctx, _) = setup("scale");
    let result = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("scale"), &[expr("2 * 3")], call_pos())
        .expect("macro call");
    match result {
        MacroResult::Expr(e) => assert_eq!(e.to_string(), "x * 6"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_build_macro_fields_and_null() {
    let (mut engine, mut ctx, _) = setup("build");
    match engine
        .invoke(&mut ctx, CallMode::Build, &tools("build"), &[], call_pos())
        .expect("build call")
    {
        MacroResult::Fields(fields) => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].name, "generated");
        }
        other => panic!("unexpected result {:?}", other),
    }
    let kept = engine
        .invoke(&mut ctx, CallMode::Build, &tools("keep"), &[], call_pos())
        .expect("build call");
    assert_eq!(kept, MacroResult::KeepFields);
}

#[test]
fn test_type_macro_null_is_monomorph() {
    let (mut engine, mut ctx, _) = setup("later");
    match engine
        .invoke(&mut ctx, CallMode::MacroType, &tools("later"), &[], call_pos())
        .expect("type call")
    {
        MacroResult::Type(Type::Mono(_)) => {}
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_return_contract_checked_per_mode() {
    let (mut engine, mut ctx, _) = setup("contract");
    let err = engine
        .invoke(&mut ctx, CallMode::Build, &tools("sum"), &[], call_pos())
        .expect_err("sum does not return fields");
    assert!(err.to_string().contains("should return Array<haxe.macro.Field>"));

    let err = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("number"), &[], call_pos())
        .expect_err("number does not return an expression");
    assert!(matches!(err, MacroError::Typing { .. }));
}

#[test]
fn test_display_call_loads_without_running() {
    let (mut engine, mut ctx, registry) = setup("display");
    let result = engine
        .invoke(&mut ctx, CallMode::Display, &tools("fails"), &[], call_pos())
        .expect("display call");
    assert_eq!(result, MacroResult::DisplayOnly);
    assert_eq!(engine.stats().calls, 0);
    // Display mode was switched on for the load and restored afterwards
    let switches = registry.borrow().display_switches.clone();
    assert_eq!(&switches[switches.len() - 2..], &[true, false]);
}

#[test]
fn test_macro_in_macro_is_not_executed() {
    let (mut engine, mut ctx, _) = setup("nested");
    engine.get_or_create_macro_context(&mut ctx).expect("macro context");
    let macro_ctx = ctx.macros.as_deref_mut().expect("macro context");
    let result = engine
        .invoke(macro_ctx, CallMode::Expr, &tools("sum"), &[], call_pos())
        .expect("nested call");
    assert_eq!(result, MacroResult::MacroInMacro);
}

#[test]
fn test_decode_failure_writes_report() {
    let (mut engine, mut ctx, _) = setup("broken");
    let err = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("broken"), &[], call_pos())
        .expect_err("invalid expression value");
    match err {
        MacroError::Decode {
            report_path: Some(path),
            pos,
            ..
        } => {
            assert_eq!(pos, call_pos());
            let content = std::fs::read_to_string(path).expect("report written");
            assert!(content.contains("Expected: Expr"));
            assert!(content.contains("expected ExprDef, found Int 3"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_uncaught_exception_is_reported_with_macro_name() {
    let (mut engine, mut ctx, _) = setup("fails");
    let err = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("fails"), &[], call_pos())
        .expect_err("macro throws");
    match &err {
        MacroError::RuntimeException {
            message, macro_name, ..
        } => {
            assert_eq!(message, "nope");
            assert_eq!(macro_name, "macros.Tools.fails");
        }
        other => panic!("unexpected error {:?}", other),
    }
    // The runtime survives an ordinary exception
    assert!(engine.has_live_runtime());
}

#[test]
fn test_missing_method_is_a_resolution_error() {
    let (mut engine, mut ctx, _) = setup("missing");
    let err = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("nothing"), &[], call_pos())
        .expect_err("no such method");
    assert_eq!(err.error_code(), "E0701");
    assert_eq!(err.to_string(), "Method nothing not found on class macros.Tools");
}

#[test]
fn test_expression_arguments_combined_by_macro() {
    let (mut engine, mut ctx, _) = setup("add");
    let args = [expr("1"), expr("2")];
    let result = engine
        .invoke(&mut ctx, CallMode::Expr, &tools("add"), &args, call_pos())
        .expect("macro call");
    let sum = match result {
        MacroResult::Expr(expr) => expr,
        other => panic!("unexpected result {:?}", other),
    };
    assert_eq!(sum.to_string(), "1 + 2");
    assert_eq!(sum.pos, call_pos());
    match &sum.kind {
        ExprKind::Binop(Binop::Add, left, right) => {
            // Operands keep the positions they had at the call site
            assert_eq!(left.pos, args[0].pos);
            assert_eq!(right.pos, args[1].pos);
        }
        other => panic!("unexpected expression {:?}", other),
    }
}

fn declared_fields() -> Vec<parser::Field> {
    vec![
        parser::Field {
            name: "count".to_string(),
            doc: Some("Number of items".to_string()),
            access: vec![Access::Public, Access::Static],
            kind: FieldKind::Var(Some(ComplexType::Path(TypePath::new(&[], "Int"))), Some(expr("0"))),
            pos: Position::new(0, 10, 30),
            meta: Vec::new(),
        },
        parser::Field {
            name: "label".to_string(),
            doc: None,
            access: vec![Access::Private],
            kind: FieldKind::Prop(
                "default".to_string(),
                "null".to_string(),
                Some(ComplexType::Path(TypePath::new(&[], "String"))),
                None,
            ),
            pos: Position::new(0, 31, 50),
            meta: vec![MetadataEntry {
                name: ":keep".to_string(),
                params: Vec::new(),
                pos: Position::new(0, 31, 36),
            }],
        },
    ]
}

#[test]
fn test_build_macro_returning_declared_fields_is_identity() {
    let (mut engine, mut ctx, _) = setup("identity");
    ctx.begin_typing(TypingState {
        module: rayzor_macro::types::Path::parse("Main"),
        build_fields: Some(declared_fields()),
        ..Default::default()
    });
    match engine
        .invoke(&mut ctx, CallMode::Build, &tools("identity"), &[], call_pos())
        .expect("build call")
    {
        MacroResult::Fields(fields) => assert_eq!(fields, declared_fields()),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_type_macro_results() {
    let (mut engine, mut ctx, registry) = setup("type-results");
    match engine
        .invoke(&mut ctx, CallMode::MacroType, &tools("complex"), &[], call_pos())
        .expect("complex type result")
    {
        MacroResult::Type(ty) => assert_eq!(ty, Type::string()),
        other => panic!("unexpected result {:?}", other),
    }
    // The Type contract is tried before the ComplexType one
    {
        let registry = registry.borrow();
        let type_check = registry.first_unification_with(&Type::macro_type()).expect("Type contract");
        let complex_check = registry
            .first_unification_with(&Type::macro_complex_type())
            .expect("ComplexType contract");
        assert!(type_check < complex_check);
    }

    match engine
        .invoke(&mut ctx, CallMode::MacroType, &tools("typed"), &[], call_pos())
        .expect("type descriptor result")
    {
        MacroResult::Type(ty) => assert_eq!(ty, Type::int()),
        other => panic!("unexpected result {:?}", other),
    }

    let err = engine
        .invoke(&mut ctx, CallMode::MacroType, &tools("number"), &[], call_pos())
        .expect_err("number returns neither contract");
    assert!(err
        .to_string()
        .contains("should return haxe.macro.Type or haxe.macro.ComplexType"));
}

#[test]
fn test_function_arguments_arrive_as_closures() {
    let (mut engine, mut ctx, _) = setup("apply");
    let result = engine
        .invoke(
            &mut ctx,
            CallMode::Expr,
            &tools("apply"),
            &[expr("function(x) { return x * 2; }")],
            call_pos(),
        )
        .expect("macro call");
    match result {
        MacroResult::Expr(e) => assert_eq!(e.to_string(), "1"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_messages_from_macros_are_tagged() {
    let (mut engine, mut ctx, _) = setup("warns");
    engine
        .invoke(&mut ctx, CallMode::Expr, &tools("warns"), &[], call_pos())
        .expect("macro call");
    ctx.report(Severity::Warning, "plain warning", call_pos());

    let shared = ctx.shared.borrow();
    let messages = shared.reporter.messages();
    let from_macro = messages
        .iter()
        .find(|m| m.text == "generated code")
        .expect("macro warning reported");
    assert_eq!(
        from_macro.origin,
        MessageOrigin::Macro {
            name: "macros.Tools.warns".to_string()
        }
    );
    assert_eq!(from_macro.pos, call_pos());
    let plain = messages
        .iter()
        .find(|m| m.text == "plain warning")
        .expect("user warning reported");
    assert_eq!(plain.origin, MessageOrigin::User);
}
