//! Compiler services offered to macro code while it runs.
//!
//! A `MacroApi` borrows the primary compilation context for the duration of
//! one runtime call. Queries about the typing in progress fail with
//! `MacroError::Unsupported` when no typing is active.

use super::dependencies;
use super::dispatch::MacroResult;
use super::errors::MacroError;
use super::value::Value;
use crate::config::BinaryCacheConfig;
use crate::context::{CompilationContext, HookKind, MetadataDoc, Severity, TypingState};
use crate::dependency_graph::DependencyReason;
use crate::types::{ModuleRef, Path, Type};
use indexmap::IndexMap;
use log::debug;
use parser::{ComplexType, Expr, Field, MetadataEntry, Position, TypeDefinition};
use std::rc::Rc;

pub struct MacroApi<'a> {
    ctx: &'a mut CompilationContext,
    pos: Position,
    macro_name: String,
}

impl<'a> MacroApi<'a> {
    pub fn new(ctx: &'a mut CompilationContext, pos: Position, macro_name: impl Into<String>) -> Self {
        Self {
            ctx,
            pos,
            macro_name: macro_name.into(),
        }
    }

    pub fn current_pos(&self) -> Position {
        self.pos
    }

    pub fn macro_name(&self) -> &str {
        &self.macro_name
    }

    pub fn context(&mut self) -> &mut CompilationContext {
        self.ctx
    }

    fn typing(&self, operation: &str) -> Result<&TypingState, MacroError> {
        self.ctx
            .typing
            .as_ref()
            .ok_or_else(|| MacroError::unsupported(operation, self.pos))
    }

    // -- Parsing -----------------------------------------------------------

    pub fn parse_expr(&self, text: &str, pos: Position) -> Result<Expr, MacroError> {
        Ok(parser::parse_expr(text, pos)?)
    }

    pub fn parse_metadata(&self, text: &str, pos: Position) -> Result<MetadataEntry, MacroError> {
        Ok(parser::parse_metadata(text, pos)?)
    }

    pub fn parse_complex_type(&self, text: &str, pos: Position) -> Result<ComplexType, MacroError> {
        Ok(parser::parse_complex_type(text, pos)?)
    }

    // -- Types and modules -------------------------------------------------

    pub fn resolve_type(&mut self, ct: &ComplexType, pos: Position) -> Result<Type, MacroError> {
        Ok(self.ctx.typer.load_complex_type(ct, pos)?)
    }

    pub fn define_type(&mut self, def: TypeDefinition) -> Result<ModuleRef, MacroError> {
        let path = Path {
            pack: def.pack.clone(),
            name: def.name.clone(),
        };
        self.define_module(&path, vec![def])
    }

    pub fn define_module(&mut self, path: &Path, types: Vec<TypeDefinition>) -> Result<ModuleRef, MacroError> {
        if self.ctx.shared.borrow().modules.contains_key(path) {
            return Err(MacroError::Typing {
                message: format!("Module {} is already defined", path),
                pos: self.pos,
            });
        }
        let module = self.ctx.typer.define_module(path, &types, self.pos)?;
        debug!("macro {} defined module {}", self.macro_name, path);
        self.ctx
            .shared
            .borrow_mut()
            .modules
            .insert(path.clone(), Rc::clone(&module));
        dependencies::record(self.ctx, path, DependencyReason::MacroDefine);
        Ok(module)
    }

    /// Force a module into the compilation.
    pub fn include_module(&mut self, path: &Path) -> Result<(), MacroError> {
        let module = self.ctx.typer.load_module(path, self.pos)?;
        self.ctx
            .shared
            .borrow_mut()
            .modules
            .entry(path.clone())
            .or_insert(module);
        dependencies::record(self.ctx, path, DependencyReason::MacroInclude);
        Ok(())
    }

    // -- Registries and defines ----------------------------------------------

    pub fn register_metadata(&mut self, name: &str, doc: &str, targets: &[&str]) {
        self.ctx.shared.borrow_mut().metadata.insert(
            name.to_string(),
            MetadataDoc {
                doc: doc.to_string(),
                targets: targets.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    pub fn register_define(&mut self, name: &str, doc: &str) {
        self.ctx
            .shared
            .borrow_mut()
            .user_defines
            .insert(name.to_string(), doc.to_string());
    }

    pub fn define(&mut self, name: &str, value: Option<&str>) {
        self.ctx.define(name, value.unwrap_or("1"));
    }

    pub fn defined(&self, name: &str) -> bool {
        self.ctx.defined(name)
    }

    pub fn defined_value(&self, name: &str) -> Option<String> {
        self.ctx.defined_value(name).map(str::to_string)
    }

    // -- Generation hooks ----------------------------------------------------

    fn add_hook(&mut self, kind: HookKind, callback: Value) -> Result<(), MacroError> {
        if !matches!(callback, Value::Function(_)) {
            return Err(MacroError::ArgumentType {
                message: format!("Expected a function callback, found {}", callback.type_name()),
                pos: self.pos,
            });
        }
        self.ctx.shared.borrow_mut().hooks.add(kind, callback);
        Ok(())
    }

    pub fn on_after_init(&mut self, callback: Value) -> Result<(), MacroError> {
        self.add_hook(HookKind::AfterInit, callback)
    }

    pub fn on_after_typing(&mut self, callback: Value) -> Result<(), MacroError> {
        self.add_hook(HookKind::AfterTyping, callback)
    }

    pub fn on_generate(&mut self, callback: Value) -> Result<(), MacroError> {
        self.add_hook(HookKind::OnGenerate, callback)
    }

    pub fn on_after_generate(&mut self, callback: Value) -> Result<(), MacroError> {
        self.add_hook(HookKind::AfterGenerate, callback)
    }

    pub fn cache_writer_config(&self) -> BinaryCacheConfig {
        self.ctx.shared.borrow().cache_writer.clone()
    }

    pub fn set_cache_writer_config(&mut self, config: BinaryCacheConfig) {
        self.ctx.shared.borrow_mut().cache_writer = config;
    }

    // -- Typing state --------------------------------------------------------

    pub fn get_build_fields(&self) -> Result<Vec<Field>, MacroError> {
        self.typing("getBuildFields")?
            .build_fields
            .clone()
            .ok_or_else(|| MacroError::unsupported("getBuildFields", self.pos))
    }

    pub fn get_local_class(&self) -> Result<Option<Path>, MacroError> {
        Ok(self.typing("getLocalClass")?.class.clone())
    }

    pub fn get_local_module(&self) -> Result<Path, MacroError> {
        Ok(self.typing("getLocalModule")?.module.clone())
    }

    pub fn get_local_vars(&self) -> Result<IndexMap<String, Type>, MacroError> {
        Ok(self.typing("getLocalVars")?.locals.clone())
    }

    pub fn get_local_imports(&self) -> Result<Vec<Path>, MacroError> {
        Ok(self.typing("getLocalImports")?.imports.clone())
    }

    pub fn get_local_usings(&self) -> Result<Vec<Path>, MacroError> {
        Ok(self.typing("getLocalUsing")?.usings.clone())
    }

    pub fn get_expected_type(&self) -> Result<Option<Type>, MacroError> {
        Ok(self.typing("getExpectedType")?.expected.clone())
    }

    // -- Reporting -----------------------------------------------------------

    /// Report an error and return it so the macro can abort with it.
    pub fn error(&mut self, message: &str, pos: Position) -> MacroError {
        self.ctx.report(Severity::Error, message, pos);
        MacroError::Typing {
            message: message.to_string(),
            pos,
        }
    }

    pub fn warning(&mut self, message: &str, pos: Position) {
        self.ctx.report(Severity::Warning, message, pos);
    }

    pub fn info(&mut self, message: &str, pos: Position) {
        self.ctx.report(Severity::Info, message, pos);
    }

    /// Macro code cannot call another macro.
    pub fn invoke_macro(&mut self, _path: &str, _args: &[Expr]) -> MacroResult {
        MacroResult::MacroInMacro
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::macro_system::value::FunctionValue;
    use crate::types::{FunArg, IndexedArg, TypedExpr, TypingError, UnifiedArg, Typer};

    struct NullTyper;

    impl Typer for NullTyper {
        fn fork(&self) -> Box<dyn Typer> {
            Box::new(NullTyper)
        }
        fn load_module(&mut self, path: &Path, pos: Position) -> Result<ModuleRef, TypingError> {
            Err(TypingError::new(
                crate::types::TypingErrorKind::ModuleNotFound,
                format!("Module {} not found", path),
                pos,
            ))
        }
        fn load_instance(&mut self, _: &parser::TypePath, _: Position) -> Result<Type, TypingError> {
            Ok(Type::Dynamic)
        }
        fn load_complex_type(&mut self, _: &ComplexType, _: Position) -> Result<Type, TypingError> {
            Ok(Type::Dynamic)
        }
        fn unify(&mut self, _: &Type, _: &Type) -> Result<(), TypingError> {
            Ok(())
        }
        fn type_expr(&mut self, expr: &Expr, _: Option<&Type>) -> Result<TypedExpr, TypingError> {
            Ok(TypedExpr::new(expr.clone(), Type::Dynamic))
        }
        fn unify_call_args(
            &mut self,
            _: &[IndexedArg],
            _: &[FunArg],
            _: Position,
        ) -> Result<Vec<UnifiedArg>, TypingError> {
            Ok(Vec::new())
        }
        fn spawn_monomorph(&mut self) -> Type {
            Type::Mono(0)
        }
        fn define_module(
            &mut self,
            path: &Path,
            _: &[TypeDefinition],
            _: Position,
        ) -> Result<ModuleRef, TypingError> {
            Ok(Rc::new(std::cell::RefCell::new(crate::types::ModuleDef::new(path.clone()))))
        }
        fn finalize(&mut self) -> Result<(), TypingError> {
            Ok(())
        }
        fn take_produced(&mut self) -> Vec<ModuleRef> {
            Vec::new()
        }
        fn set_display_mode(&mut self, _: bool) {}
    }

    fn context() -> CompilationContext {
        let mut ctx = CompilationContext::new(CompilerConfig::default(), Box::new(NullTyper));
        ctx.current_module = Path::parse("Main");
        ctx
    }

    #[test]
    fn test_typing_queries_outside_typing() {
        let mut ctx = context();
        let api = MacroApi::new(&mut ctx, Position::null(), "Tools.build");
        match api.get_build_fields() {
            Err(MacroError::Unsupported { operation, .. }) => assert_eq!(operation, "getBuildFields"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(api.get_local_vars().is_err());
        assert!(api.get_expected_type().is_err());
    }

    #[test]
    fn test_defines_and_registries() {
        let mut ctx = context();
        let mut api = MacroApi::new(&mut ctx, Position::null(), "Tools.setup");
        api.define("FOO", None);
        api.define("LEVEL", Some("3"));
        api.register_metadata(":myMeta", "Marks things", &["Class"]);
        api.register_define("my_flag", "Enables things");
        assert!(api.defined("FOO"));
        assert_eq!(api.defined_value("LEVEL").as_deref(), Some("3"));
        let shared = ctx.shared.borrow();
        assert!(shared.metadata.contains_key(":myMeta"));
        assert!(shared.user_defines.contains_key("my_flag"));
    }

    #[test]
    fn test_define_module_records_dependency() {
        let mut ctx = context();
        let mut api = MacroApi::new(&mut ctx, Position::null(), "Tools.gen");
        let path = Path::parse("gen.Generated");
        api.define_module(&path, Vec::new()).expect("define");
        assert!(api.define_module(&path, Vec::new()).is_err());
        let shared = ctx.shared.borrow();
        assert!(shared.modules.contains_key(&path));
        assert_eq!(shared.pending_edges.len(), 1);
        assert_eq!(shared.pending_edges[0].reason, DependencyReason::MacroDefine);
    }

    #[test]
    fn test_hooks_require_functions() {
        let mut ctx = context();
        let mut api = MacroApi::new(&mut ctx, Position::null(), "Tools.hooks");
        assert!(api.on_generate(Value::Int(1)).is_err());
        let callback = Value::Function(FunctionValue {
            name: "Tools.onGenerate".to_string(),
            arity: 1,
        });
        api.on_generate(callback.clone()).expect("function accepted");
        assert_eq!(ctx.shared.borrow().hooks.get(HookKind::OnGenerate), &[callback]);
    }

    #[test]
    fn test_invoke_macro_is_rejected() {
        let mut ctx = context();
        let mut api = MacroApi::new(&mut ctx, Position::null(), "Tools.nested");
        assert_eq!(api.invoke_macro("Other.run", &[]), MacroResult::MacroInMacro);
    }
}
