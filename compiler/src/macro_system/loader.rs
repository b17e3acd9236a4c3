//! Macro loader and binding cache.
//!
//! Resolving a macro reference loads its module into the macro context,
//! locates the static method and extracts its signature. The result is cached
//! per `(path, method)` until the cache is explicitly reset.

use super::dependencies;
use super::errors::MacroError;
use super::manager::MacroEngine;
use crate::context::CompilationContext;
use crate::dependency_graph::DependencyReason;
use crate::types::{ClassType, FunArg, ModuleDef, Path, Type};
use fxhash::FxHashMap;
use log::debug;
use parser::Position;
use std::fmt;
use std::rc::Rc;

/// `pack.Class.method`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacroRef {
    pub path: Path,
    pub method: String,
}

impl MacroRef {
    pub fn new(path: Path, method: &str) -> Self {
        Self {
            path,
            method: method.to_string(),
        }
    }

    /// Split `pack.Class.method`; `None` without at least a class and a method.
    pub fn parse(dotted: &str) -> Option<Self> {
        let (class, method) = dotted.rsplit_once('.')?;
        if class.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::new(Path::parse(class), method))
    }

    pub fn key(&self) -> MacroKey {
        (self.path.clone(), self.method.clone())
    }

    /// Module path and type path this reference designates.
    ///
    /// When the last package segment starts with an uppercase letter it names
    /// the module, and the reference's name is a sub-type of that module.
    pub fn normalize(&self) -> (Path, Path) {
        let is_module_segment = self
            .path
            .pack
            .last()
            .and_then(|s| s.chars().next())
            .is_some_and(char::is_uppercase);
        if is_module_segment {
            let mut pack = self.path.pack.clone();
            let module_name = pack.pop().unwrap_or_default();
            let module = Path {
                pack: pack.clone(),
                name: module_name,
            };
            let ty = Path {
                pack,
                name: self.path.name.clone(),
            };
            (module, ty)
        } else {
            (self.path.clone(), self.path.clone())
        }
    }
}

impl fmt::Display for MacroRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.path, self.method)
    }
}

pub type MacroKey = (Path, String);

/// Everything the dispatcher needs to call a resolved macro.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroBinding {
    pub params: Vec<FunArg>,
    pub ret: Type,
    pub class_path: Path,
    pub field: String,
    pub module: Path,
}

#[derive(Debug, Default)]
pub struct MacroCache {
    bindings: FxHashMap<MacroKey, Rc<MacroBinding>>,
    hits: u32,
    misses: u32,
}

impl MacroCache {
    pub fn get(&mut self, key: &MacroKey) -> Option<Rc<MacroBinding>> {
        match self.bindings.get(key) {
            Some(binding) => {
                self.hits += 1;
                Some(Rc::clone(binding))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, key: &MacroKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn insert(&mut self, key: MacroKey, binding: Rc<MacroBinding>) {
        self.bindings.insert(key, binding);
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Keep only the bindings whose defining module satisfies `keep`.
    pub fn retain_modules(&mut self, keep: impl Fn(&Path) -> bool) {
        self.bindings.retain(|_, binding| keep(&binding.module));
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }
}

fn find_class<'m>(module: &'m ModuleDef, path: &Path) -> Option<&'m ClassType> {
    if let Some(primary) = module.primary_type() {
        if primary.path() == path {
            return primary.as_class();
        }
    }
    module
        .types
        .iter()
        .find(|t| t.path() == path)
        .and_then(|t| t.as_class())
}

/// Check that `reference` names a static function; returns its signature.
fn static_method_signature(
    module: &ModuleDef,
    type_path: &Path,
    reference: &MacroRef,
    pos: Position,
) -> Result<(Vec<FunArg>, Type), MacroError> {
    let class = find_class(module, type_path)
        .ok_or_else(|| MacroError::resolution(format!("Class not found : {}", type_path), pos))?;
    let field = match class.find_static(&reference.method) {
        Some(field) => field,
        None if class.find_field(&reference.method).is_some() => {
            return Err(MacroError::resolution(
                format!("Method {} is not static", reference),
                pos,
            ))
        }
        None => {
            return Err(MacroError::resolution(
                format!("Method {} not found on class {}", reference.method, type_path),
                pos,
            ))
        }
    };
    if !field.is_method() {
        return Err(MacroError::resolution(
            format!("{} is not a method", reference),
            pos,
        ));
    }
    match &field.ty {
        Type::Fun(params, ret) => Ok((params.clone(), (**ret).clone())),
        other => Err(MacroError::resolution(
            format!("{} has type {} which is not a function", reference, other),
            pos,
        )),
    }
}

/// Resolve `reference` inside `macro_ctx`, consulting and filling `cache`.
pub fn resolve(
    cache: &mut MacroCache,
    macro_ctx: &mut CompilationContext,
    reference: &MacroRef,
    display: bool,
    pos: Position,
) -> Result<Rc<MacroBinding>, MacroError> {
    let key = reference.key();
    if let Some(binding) = cache.get(&key) {
        debug!("macro binding cache hit: {}", reference);
        return Ok(binding);
    }

    let (module_path, type_path) = reference.normalize();
    let previous = macro_ctx.config.display_mode;
    if display {
        macro_ctx.set_display_mode(true);
    }
    let loaded = macro_ctx.typer.load_module(&module_path, pos);
    if display {
        macro_ctx.set_display_mode(previous);
    }
    let module = loaded?;
    debug!("loaded macro module {}", module_path);

    // Fail fast on a missing method, then finalize before reading the
    // signature so pending typing of the method is complete.
    static_method_signature(&module.borrow(), &type_path, reference, pos)?;
    macro_ctx.typer.finalize()?;
    let (params, ret) = static_method_signature(&module.borrow(), &type_path, reference, pos)?;

    let binding = Rc::new(MacroBinding {
        params,
        ret,
        class_path: type_path,
        field: reference.method.clone(),
        module: module_path,
    });
    cache.insert(key, Rc::clone(&binding));
    Ok(binding)
}

impl MacroEngine {
    /// Resolve a macro reference for a call made from `ctx`.
    ///
    /// Every resolution, cached or not, makes the caller's current module
    /// depend on the macro module. A cache miss flushes the macro context so
    /// that types produced while loading go through the finalization
    /// pipeline. Nested calls (made from the macro context itself) skip the
    /// flush.
    pub fn load_macro(
        &mut self,
        ctx: &mut CompilationContext,
        reference: &MacroRef,
        display: bool,
        pos: Position,
    ) -> Result<Rc<MacroBinding>, MacroError> {
        self.in_macro_selection(|engine| {
            let nested = ctx.is_macro_context();
            let hit = engine.cache.contains(&reference.key());
            let binding = {
                let macro_ctx = engine.macro_context_of(ctx)?;
                resolve(&mut engine.cache, macro_ctx, reference, display, pos)?
            };
            dependencies::record(ctx, &binding.module, DependencyReason::MacroLoad);
            if !hit && !nested {
                engine.flush(ctx)?;
            }
            Ok(binding)
        })
    }
}
