//! In-memory typer and fixtures shared by the macro engine integration tests.

#![allow(dead_code)]

use parser::{ComplexType, Expr, Position, TypeDefKind, TypeDefinition, TypePath};
use rayzor_macro::config::CompilerConfig;
use rayzor_macro::context::CompilationContext;
use rayzor_macro::macro_system::NativeRegistry;
use rayzor_macro::types::{
    ClassField, ClassType, FunArg, IndexedArg, ModuleDef, ModuleRef, ModuleType, Path, Type,
    TypedExpr, Typer, TypingError, TypingErrorKind, UnifiedArg,
};
use rayzor_macro::MacroEngine;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Module sources and counters shared by a typer and all its forks.
#[derive(Default)]
pub struct Registry {
    pub templates: HashMap<Path, ModuleDef>,
    pub loads: HashMap<Path, u32>,
    /// Every `load_module` request, including ones served from a typer's cache
    pub requests: HashMap<Path, u32>,
    /// `(actual, expected)` pairs in the order they were unified
    pub unifications: Vec<(Type, Type)>,
    pub finalize_calls: u32,
    pub display_switches: Vec<bool>,
}

impl Registry {
    pub fn loads_of(&self, path: &str) -> u32 {
        self.loads.get(&Path::parse(path)).copied().unwrap_or(0)
    }

    pub fn requests_of(&self, path: &str) -> u32 {
        self.requests.get(&Path::parse(path)).copied().unwrap_or(0)
    }

    /// Index of the first unification against `expected`
    pub fn first_unification_with(&self, expected: &Type) -> Option<usize> {
        self.unifications.iter().position(|(_, e)| e == expected)
    }
}

pub struct MemoryTyper {
    pub registry: Rc<RefCell<Registry>>,
    loaded: HashMap<Path, ModuleRef>,
    produced: Vec<ModuleRef>,
    next_mono: u32,
}

impl MemoryTyper {
    pub fn new(registry: Rc<RefCell<Registry>>) -> Self {
        Self {
            registry,
            loaded: HashMap::new(),
            produced: Vec::new(),
            next_mono: 0,
        }
    }
}

fn builtin(name: &str) -> Option<Type> {
    match name {
        "Int" => Some(Type::int()),
        "Float" => Some(Type::float()),
        "Bool" => Some(Type::bool()),
        "Void" => Some(Type::void()),
        "String" => Some(Type::string()),
        "Dynamic" => Some(Type::Dynamic),
        _ => None,
    }
}

impl Typer for MemoryTyper {
    fn fork(&self) -> Box<dyn Typer> {
        Box::new(MemoryTyper::new(Rc::clone(&self.registry)))
    }

    fn load_module(&mut self, path: &Path, pos: Position) -> Result<ModuleRef, TypingError> {
        *self.registry.borrow_mut().requests.entry(path.clone()).or_insert(0) += 1;
        if let Some(module) = self.loaded.get(path) {
            return Ok(Rc::clone(module));
        }
        let template = self.registry.borrow().templates.get(path).cloned();
        let module = template.ok_or_else(|| {
            TypingError::new(TypingErrorKind::ModuleNotFound, format!("Module {} not found", path), pos)
        })?;
        *self.registry.borrow_mut().loads.entry(path.clone()).or_insert(0) += 1;
        let module = Rc::new(RefCell::new(module));
        self.loaded.insert(path.clone(), Rc::clone(&module));
        self.produced.push(Rc::clone(&module));
        Ok(module)
    }

    fn load_instance(&mut self, path: &TypePath, _pos: Position) -> Result<Type, TypingError> {
        Ok(builtin(&path.name).unwrap_or_else(|| {
            let pack: Vec<&str> = path.pack.iter().map(String::as_str).collect();
            Type::Inst(Path::new(&pack, &path.name), vec![])
        }))
    }

    fn load_complex_type(&mut self, ct: &ComplexType, pos: Position) -> Result<Type, TypingError> {
        match ct {
            ComplexType::Path(tp) => self.load_instance(tp, pos),
            _ => Ok(Type::Dynamic),
        }
    }

    fn unify(&mut self, actual: &Type, expected: &Type) -> Result<(), TypingError> {
        self.registry
            .borrow_mut()
            .unifications
            .push((actual.clone(), expected.clone()));
        let compatible = actual == expected
            || matches!(actual, Type::Dynamic | Type::Mono(_))
            || matches!(expected, Type::Dynamic | Type::Mono(_))
            || matches!((actual, expected), (Type::Fun(a, _), Type::Fun(b, _)) if a.len() == b.len());
        if compatible {
            Ok(())
        } else {
            Err(TypingError::new(
                TypingErrorKind::Unify,
                format!("{} should be {}", actual, expected),
                Position::null(),
            ))
        }
    }

    fn type_expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Result<TypedExpr, TypingError> {
        Ok(TypedExpr::new(expr.clone(), expected.cloned().unwrap_or(Type::Dynamic)))
    }

    fn unify_call_args(
        &mut self,
        args: &[IndexedArg],
        params: &[FunArg],
        pos: Position,
    ) -> Result<Vec<UnifiedArg>, TypingError> {
        if args.len() > params.len() {
            return Err(TypingError::new(TypingErrorKind::Arity, "Too many arguments", pos));
        }
        params
            .iter()
            .enumerate()
            .map(|(i, param)| match args.get(i) {
                Some(arg) => Ok(UnifiedArg::Supplied {
                    index: arg.index,
                    typed: TypedExpr::new(arg.expr.clone(), param.ty.clone()),
                }),
                None if param.opt => Ok(UnifiedArg::Omitted),
                None => Err(TypingError::new(
                    TypingErrorKind::Arity,
                    format!("Not enough arguments, expected {}", param.name),
                    pos,
                )),
            })
            .collect()
    }

    fn spawn_monomorph(&mut self) -> Type {
        self.next_mono += 1;
        Type::Mono(self.next_mono)
    }

    fn define_module(
        &mut self,
        path: &Path,
        types: &[TypeDefinition],
        _pos: Position,
    ) -> Result<ModuleRef, TypingError> {
        let mut module = ModuleDef::new(path.clone());
        for def in types {
            let pack: Vec<&str> = def.pack.iter().map(String::as_str).collect();
            let type_path = Path::new(&pack, &def.name);
            match def.kind {
                TypeDefKind::Class { .. } => {
                    let mut class = ClassType::new(type_path, path.clone());
                    class.meta = def.meta.clone();
                    module.types.push(ModuleType::Class(class));
                }
                _ => module.types.push(ModuleType::Abstract(type_path)),
            }
        }
        let module = Rc::new(RefCell::new(module));
        self.loaded.insert(path.clone(), Rc::clone(&module));
        self.produced.push(Rc::clone(&module));
        Ok(module)
    }

    fn finalize(&mut self) -> Result<(), TypingError> {
        self.registry.borrow_mut().finalize_calls += 1;
        Ok(())
    }

    fn take_produced(&mut self) -> Vec<ModuleRef> {
        std::mem::take(&mut self.produced)
    }

    fn set_display_mode(&mut self, display: bool) {
        self.registry.borrow_mut().display_switches.push(display);
    }
}

/// A module holding one class with the given static methods.
pub fn macro_module(class: &str, methods: &[(&str, Vec<FunArg>, Type)]) -> ModuleDef {
    let path = Path::parse(class);
    let mut class = ClassType::new(path.clone(), path.clone());
    for (name, params, ret) in methods {
        let ty = Type::Fun(params.clone(), Box::new(ret.clone()));
        class.statics.push(ClassField::method(name, ty, None));
    }
    let mut module = ModuleDef::new(path);
    module.types.push(ModuleType::Class(class));
    module
}

fn descriptor_module(name: &str, ty: Type) -> ModuleDef {
    let path = Path::new(&["haxe", "macro"], name);
    let mut module = ModuleDef::new(path.clone());
    module.types.push(ModuleType::Typedef(path, ty));
    module
}

/// Registry preloaded with the fragment descriptor modules.
pub fn registry_with(modules: Vec<ModuleDef>) -> Rc<RefCell<Registry>> {
    let mut registry = Registry::default();
    for module in [
        descriptor_module("Expr", Type::Anon(vec![])),
        descriptor_module("Type", Type::Dynamic),
    ]
    .into_iter()
    .chain(modules)
    {
        registry.templates.insert(module.path.clone(), module);
    }
    Rc::new(RefCell::new(registry))
}

pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rayzor-macro-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// A primary context compiling module `Main`.
pub fn primary_context(registry: &Rc<RefCell<Registry>>, dump_dir: PathBuf) -> CompilationContext {
    let mut config = CompilerConfig::default();
    config.macros.dump_dir = dump_dir;
    let mut ctx = CompilationContext::new(config, Box::new(MemoryTyper::new(Rc::clone(registry))));
    ctx.current_module = Path::parse("Main");
    ctx
}

pub fn engine(natives: NativeRegistry) -> MacroEngine {
    rayzor_macro::logging::init_test();
    MacroEngine::native(natives)
}

pub fn expr(text: &str) -> Expr {
    parser::parse_expr(text, Position::new(0, 100, 100 + text.len() as u32)).expect("valid expression")
}

pub fn call_pos() -> Position {
    Position::new(0, 40, 60)
}

pub fn class_def(name: &str) -> TypeDefinition {
    TypeDefinition {
        pack: vec!["gen".to_string()],
        name: name.to_string(),
        pos: Position::null(),
        meta: Vec::new(),
        params: Vec::new(),
        is_extern: false,
        kind: TypeDefKind::Class {
            super_class: None,
            interfaces: Vec::new(),
            is_interface: false,
        },
        fields: Vec::new(),
    }
}
