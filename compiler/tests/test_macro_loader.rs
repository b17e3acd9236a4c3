//! Macro resolution, the binding cache and the runtime lifecycle.

mod common;

use common::*;
use rayzor_macro::dependency_graph::DependencyReason;
use rayzor_macro::macro_system::{NativeRegistry, RuntimeFailure, RuntimeSelection, Value};
use rayzor_macro::types::{ClassField, FunArg, ModuleType, Path, Type};
use rayzor_macro::{CallMode, MacroError, MacroRef, MacroResult};

fn tools_module() -> rayzor_macro::types::ModuleDef {
    let mut module = macro_module(
        "macros.Tools",
        &[
            ("log", vec![FunArg::new("e", Type::macro_expr())], Type::macro_expr()),
            ("crash", vec![], Type::macro_expr()),
        ],
    );
    if let ModuleType::Class(class) = &mut module.types[0] {
        class.fields.push(ClassField::method(
            "instanceOnly",
            Type::Fun(vec![], Box::new(Type::macro_expr())),
            None,
        ));
        class.statics.push(ClassField::var("counter", Type::int(), None));
    }
    module
}

fn natives() -> NativeRegistry {
    let mut natives = NativeRegistry::new();
    natives.register("macros.Tools", "log", |_api, args| Ok(args.first().cloned()));
    natives.register("macros.Tools", "crash", |_api, _args| {
        Err(RuntimeFailure::Fatal("runtime stack corrupted".to_string()))
    });
    natives.register("macros.Helpers", "noop", |_api, _args| Ok(Some(Value::Null)));
    natives
}

fn reference(dotted: &str) -> MacroRef {
    MacroRef::parse(dotted).expect("valid reference")
}

#[test]
fn test_binding_resolved_once_and_cached() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("cache"));
    let mut engine = engine(natives());
    let log = reference("macros.Tools.log");

    let first = engine.load_macro(&mut ctx, &log, false, call_pos()).expect("resolves");
    let second = engine.load_macro(&mut ctx, &log, false, call_pos()).expect("resolves");
    assert_eq!(first, second);
    assert_eq!(first.params.len(), 1);
    assert_eq!(first.ret, Type::macro_expr());
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(engine.cache().hits(), 1);
    assert_eq!(registry.borrow().loads_of("macros.Tools"), 1);
    assert_eq!(registry.borrow().requests_of("macros.Tools"), 1);

    engine.reset_cache();
    assert!(engine.cache().is_empty());
    let third = engine.load_macro(&mut ctx, &log, false, call_pos()).expect("resolves again");
    assert_eq!(third, first);
    assert_eq!(engine.cache().len(), 1);
    assert_eq!(engine.cache().misses(), 2);
    // Resolved again through the macro typer instead of the cache
    assert_eq!(registry.borrow().requests_of("macros.Tools"), 2);
}

#[test]
fn test_resolution_errors() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("resolution"));
    let mut engine = engine(natives());

    let err = engine
        .load_macro(&mut ctx, &reference("macros.Tools.instanceOnly"), false, call_pos())
        .expect_err("instance method");
    assert_eq!(err.to_string(), "Method macros.Tools.instanceOnly is not static");

    let err = engine
        .load_macro(&mut ctx, &reference("macros.Tools.counter"), false, call_pos())
        .expect_err("variable");
    assert_eq!(err.to_string(), "macros.Tools.counter is not a method");

    let err = engine
        .load_macro(&mut ctx, &reference("macros.Missing.run"), false, call_pos())
        .expect_err("no module");
    assert!(matches!(err, MacroError::Resolution { .. }));
    assert_eq!(err.to_string(), "Module macros.Missing not found");

    let err = engine
        .load_macro(&mut ctx, &reference("macros.Tools.Helpers.noop"), false, call_pos())
        .expect_err("sub-type not declared");
    assert_eq!(err.to_string(), "Class not found : macros.Helpers");
}

#[test]
fn test_load_records_dependency_and_publishes_module() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("deps"));
    let mut engine = engine(natives());

    engine
        .load_macro(&mut ctx, &reference("macros.Tools.log"), false, call_pos())
        .expect("resolves");

    let shared = ctx.shared.borrow();
    assert_eq!(
        shared.graph.reason(&Path::parse("Main"), &Path::parse("macros.Tools")),
        Some(DependencyReason::MacroLoad)
    );
    assert!(shared.pending_edges.is_empty());
    assert!(shared.modules.contains_key(&Path::parse("macros.Tools")));
    assert!(shared.modules.contains_key(&Path::parse("haxe.macro.Expr")));
}

#[test]
fn test_macro_context_setup() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("setup"));
    ctx.define("debug", "1");
    let mut engine = engine(natives());

    assert_eq!(engine.selection(), RuntimeSelection::Primary);
    let macro_ctx = engine.get_or_create_macro_context(&mut ctx).expect("macro context");
    assert!(macro_ctx.is_macro_context());
    assert!(macro_ctx.is_signature_locked());
    assert!(macro_ctx.defined("macro"));
    assert!(macro_ctx.defined("debug"));
    assert!(macro_ctx.config.full_typing);
    assert!(!macro_ctx.config.display_mode);
    assert_eq!(macro_ctx.config.std_root, ctx_std_root());
    // Creating the context does not switch runtimes
    assert_eq!(engine.selection(), RuntimeSelection::Primary);
    assert!(ctx.shared.borrow().reporter.is_intercepting());

    let stats = engine.stats();
    assert_eq!(stats.contexts_created, 1);
    assert_eq!(stats.bootstraps, 1);
    assert_eq!(registry.borrow().loads_of("haxe.macro.Expr"), 1);
    assert_eq!(registry.borrow().loads_of("haxe.macro.Type"), 1);

    engine.get_or_create_macro_context(&mut ctx).expect("same context");
    assert_eq!(engine.stats().contexts_created, 1);
}

fn ctx_std_root() -> std::path::PathBuf {
    rayzor_macro::config::MacroSettings::default().std_root
}

#[test]
fn test_runtime_reused_across_compilations() {
    let registry = registry_with(vec![tools_module()]);
    let mut engine = engine(natives());
    let log = reference("macros.Tools.log");

    let mut first = primary_context(&registry, scratch_dir("reuse-1"));
    engine
        .invoke(&mut first, CallMode::Expr, &log, &[expr("x")], call_pos())
        .expect("first run");
    assert_eq!(engine.runtime_generation(), Some(1));

    let mut second = primary_context(&registry, scratch_dir("reuse-2"));
    let result = engine
        .invoke(&mut second, CallMode::Expr, &log, &[expr("y")], call_pos())
        .expect("second run");
    assert!(matches!(result, MacroResult::Expr(ref e) if e.to_string() == "y"));

    let stats = engine.stats();
    assert_eq!(stats.contexts_created, 2);
    assert_eq!(stats.runtimes_created, 1);
    assert_eq!(stats.bootstraps, 1);
    assert_eq!(stats.reuses, 1);
    assert_eq!(engine.runtime_generation(), Some(1));
}

#[test]
fn test_runtime_not_reused_when_disabled() {
    let registry = registry_with(vec![tools_module()]);
    let mut engine = engine(natives());

    let mut first = primary_context(&registry, scratch_dir("noreuse-1"));
    engine.get_or_create_macro_context(&mut first).expect("macro context");

    let mut second = primary_context(&registry, scratch_dir("noreuse-2"));
    second.config.macros.reuse_runtime = false;
    engine.get_or_create_macro_context(&mut second).expect("macro context");

    assert_eq!(engine.stats().runtimes_created, 2);
    assert_eq!(engine.stats().bootstraps, 2);
    assert_eq!(engine.runtime_generation(), Some(2));
}

#[test]
fn test_fatal_failure_invalidates_and_rebuilds() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("fatal"));
    let mut engine = engine(natives());

    let err = engine
        .invoke(&mut ctx, CallMode::Expr, &reference("macros.Tools.crash"), &[], call_pos())
        .expect_err("fatal failure");
    assert!(err.is_fatal());
    assert_eq!(err.error_code(), "E0706");
    assert!(ctx.macros.is_none());
    assert!(!engine.has_live_runtime());
    assert!(engine.cache().is_empty());
    assert_eq!(engine.selection(), RuntimeSelection::Primary);
    assert_eq!(engine.stats().invalidations, 1);

    let result = engine
        .invoke(&mut ctx, CallMode::Expr, &reference("macros.Tools.log"), &[expr("z")], call_pos())
        .expect("clean rebuild");
    assert!(matches!(result, MacroResult::Expr(_)));
    assert_eq!(engine.runtime_generation(), Some(2));
    assert_eq!(engine.stats().bootstraps, 2);
}

#[test]
fn test_invalidate_module_drops_dependents_and_bindings() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("invalidate"));
    let mut engine = engine(natives());
    engine
        .load_macro(&mut ctx, &reference("macros.Tools.log"), false, call_pos())
        .expect("resolves");
    assert_eq!(engine.cache().len(), 1);

    let removed = engine.invalidate_module(&mut ctx, &Path::parse("macros.Tools"));
    assert_eq!(removed, 2);
    assert!(engine.cache().is_empty());
    let shared = ctx.shared.borrow();
    assert!(!shared.modules.contains_key(&Path::parse("macros.Tools")));
    assert_eq!(shared.graph.reason(&Path::parse("Main"), &Path::parse("macros.Tools")), None);
}

#[test]
fn test_primary_selected_again_after_calls() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("selection"));
    let mut engine = engine(natives());
    let log = reference("macros.Tools.log");

    engine
        .invoke(&mut ctx, CallMode::Expr, &log, &[expr("x")], call_pos())
        .expect("macro call");
    assert_eq!(engine.selection(), RuntimeSelection::Primary);

    engine.load_macro(&mut ctx, &log, false, call_pos()).expect("cached");
    assert_eq!(engine.selection(), RuntimeSelection::Primary);

    // Failed calls switch back too
    engine
        .invoke(&mut ctx, CallMode::Expr, &reference("macros.Tools.missing"), &[], call_pos())
        .expect_err("no such method");
    assert_eq!(engine.selection(), RuntimeSelection::Primary);

    // A caller that already selected the macro runtime keeps it
    engine.select(RuntimeSelection::Macro);
    engine
        .invoke(&mut ctx, CallMode::Expr, &log, &[expr("y")], call_pos())
        .expect("macro call");
    assert_eq!(engine.selection(), RuntimeSelection::Macro);
}

#[test]
fn test_every_calling_module_depends_on_macro_module() {
    let registry = registry_with(vec![tools_module()]);
    let mut ctx = primary_context(&registry, scratch_dir("callers"));
    let mut engine = engine(natives());
    let log = reference("macros.Tools.log");
    let tools = Path::parse("macros.Tools");

    engine
        .invoke(&mut ctx, CallMode::Expr, &log, &[expr("a")], call_pos())
        .expect("first caller");
    ctx.current_module = Path::parse("app.Other");
    engine
        .invoke(&mut ctx, CallMode::Expr, &log, &[expr("b")], call_pos())
        .expect("second caller");
    assert_eq!(engine.cache().hits(), 1);

    // The cache hit queues its edge for the next flush
    assert_eq!(ctx.shared.borrow().pending_edges.len(), 1);
    engine.flush(&mut ctx).expect("flush");
    {
        let shared = ctx.shared.borrow();
        let dependents = shared.graph.dependents_of(&tools);
        assert!(dependents.contains(&Path::parse("Main")));
        assert!(dependents.contains(&Path::parse("app.Other")));
        assert_eq!(
            shared.graph.reason(&Path::parse("app.Other"), &tools),
            Some(DependencyReason::MacroLoad)
        );
    }

    assert_eq!(engine.invalidate_module(&mut ctx, &tools), 3);
    assert!(engine.cache().is_empty());
}
