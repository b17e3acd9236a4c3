//! Flushing macro-produced modules through the filter pipeline.

mod common;

use common::*;
use rayzor_macro::macro_system::{restore_cached_module, NativeRegistry, Value};
use rayzor_macro::types::{ClassField, ClassType, ModuleDef, ModuleType, Path, Type, TypedExpr};
use rayzor_macro::MacroRef;

fn generator_module(with_conflict: bool) -> ModuleDef {
    let mut module = macro_module("macros.Gen", &[("make", vec![], Type::macro_expr())]);
    if let ModuleType::Class(class) = &mut module.types[0] {
        class
            .fields
            .push(ClassField::var("size", Type::int(), Some(TypedExpr::new(expr("10"), Type::int()))));
        class.fields.push(ClassField::method(
            "check",
            Type::Fun(vec![], Box::new(Type::void())),
            Some(TypedExpr::new(expr("{ static var calls = 0; calls++; throw 'bad'; }"), Type::void())),
        ));
        if with_conflict {
            class.statics.push(ClassField::var("check_calls", Type::int(), None));
        }
    }
    let mut native = ClassType::new(Path::parse("macros.Window"), Path::parse("macros.Gen"));
    native.is_extern = true;
    native.meta.push(parser::MetadataEntry {
        name: ":native".to_string(),
        params: vec![parser::Expr::string("js.html.Window", parser::Position::null())],
        pos: parser::Position::null(),
    });
    module.types.push(ModuleType::Class(native));
    module
}

fn natives() -> NativeRegistry {
    let mut natives = NativeRegistry::new();
    natives.register("macros.Gen", "make", |_api, _args| Ok(Some(Value::Null)));
    natives
}

fn make() -> MacroRef {
    MacroRef::parse("macros.Gen.make").expect("valid reference")
}

fn published_class(ctx: &rayzor_macro::CompilationContext, index: usize) -> ClassType {
    let shared = ctx.shared.borrow();
    let module = shared.modules.get(&Path::parse("macros.Gen")).expect("module published");
    let module = module.borrow();
    module.types[index].as_class().expect("class").clone()
}

#[test]
fn test_flush_filters_produced_classes() {
    let registry = registry_with(vec![generator_module(false)]);
    let mut ctx = primary_context(&registry, scratch_dir("flush"));
    let mut engine = engine(natives());
    engine.load_macro(&mut ctx, &make(), false, call_pos()).expect("resolves");

    let class = published_class(&ctx, 0);
    assert!(class.filters_applied);
    // Field initializer moved into a synthesized constructor
    assert!(class.find_field("size").expect("field").expr.is_none());
    let ctor = class.constructor.as_ref().expect("constructor");
    assert!(ctor.expr.as_ref().expect("body").expr.to_string().contains("this.size = 10"));
    // Local static hoisted, throw wrapped
    assert!(class.find_static("check_calls").is_some());
    let body = class.find_field("check").and_then(|f| f.expr.as_ref()).expect("body");
    assert!(body.expr.to_string().contains("throw haxe.Exception.thrown('bad')"));
    // Snapshot taken before any filter ran
    let snapshot = class.restore.as_ref().expect("snapshot recorded");
    assert!(snapshot.constructor.is_none());
    assert!(snapshot.fields[0].expr.is_some());

    let window = published_class(&ctx, 1);
    assert_eq!(window.path, Path::parse("js.html.Window"));
    assert_eq!(window.restore.as_ref().map(|s| s.path.clone()), Some(Path::parse("macros.Window")));
    assert!(!ctx.shared.borrow().flushing);
}

#[test]
fn test_restore_cached_module_rolls_back_filters() {
    let registry = registry_with(vec![generator_module(false)]);
    let mut ctx = primary_context(&registry, scratch_dir("restore"));
    let mut engine = engine(natives());
    engine.load_macro(&mut ctx, &make(), false, call_pos()).expect("resolves");

    let module = ctx
        .shared
        .borrow()
        .modules
        .get(&Path::parse("macros.Gen"))
        .cloned()
        .expect("module published");
    assert_eq!(restore_cached_module(&mut module.borrow_mut()), 2);

    let module = module.borrow();
    let class = module.types[0].as_class().expect("class");
    assert!(!class.filters_applied);
    assert!(class.constructor.is_none());
    assert!(class.find_static("check_calls").is_none());
    assert!(class.find_field("size").and_then(|f| f.expr.as_ref()).is_some());
    let window = module.types[1].as_class().expect("class");
    assert_eq!(window.path, Path::parse("macros.Window"));
}

#[test]
fn test_filter_error_is_fatal_and_invalidates() {
    let registry = registry_with(vec![generator_module(true)]);
    let mut ctx = primary_context(&registry, scratch_dir("filter-error"));
    let mut engine = engine(natives());

    let err = engine
        .load_macro(&mut ctx, &make(), false, call_pos())
        .expect_err("conflicting static");
    assert!(err.is_fatal());
    assert!(err.to_string().contains("local-static"));
    assert!(ctx.macros.is_none());
    assert!(!engine.has_live_runtime());
    // Nothing from the failed batch is published
    let shared = ctx.shared.borrow();
    assert!(!shared.modules.contains_key(&Path::parse("macros.Gen")));
    assert!(!shared.flushing);
}

#[test]
fn test_reentrant_flush_is_skipped() {
    let registry = registry_with(vec![generator_module(false)]);
    let mut ctx = primary_context(&registry, scratch_dir("reentrant"));
    let mut engine = engine(natives());
    engine.get_or_create_macro_context(&mut ctx).expect("macro context");

    ctx.shared.borrow_mut().flushing = true;
    assert_eq!(engine.flush(&mut ctx).expect("skipped"), 0);
    ctx.shared.borrow_mut().flushing = false;
    assert_eq!(engine.flush(&mut ctx).expect("nothing pending"), 0);
}

#[test]
fn test_flush_without_macro_context_is_a_no_op() {
    let registry = registry_with(vec![]);
    let mut ctx = primary_context(&registry, scratch_dir("no-context"));
    let mut engine = engine(NativeRegistry::new());
    assert_eq!(engine.flush(&mut ctx).expect("no-op"), 0);
    assert_eq!(registry.borrow().finalize_calls, 0);
}
