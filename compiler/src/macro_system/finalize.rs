//! Macro context flush
//!
//! Types produced while macros run stay private to the macro context until a
//! flush finalizes them, runs the filter pipeline over their classes and
//! publishes their modules to the primary compilation.

use super::dependencies;
use super::errors::MacroError;
use super::filters::{FilterContext, FilterPipeline};
use super::manager::MacroEngine;
use crate::context::{CompilationContext, SharedState};
use crate::types::{ClassField, ClassType, ModuleDef, ModuleRef, Path, TypedExpr};
use log::{debug, info};
use parser::{MetadataEntry, Position};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

/// Pre-filter state of a class, used to roll it back when the class is
/// reused from a cache instead of being rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreSnapshot {
    pub path: Path,
    pub meta: Vec<MetadataEntry>,
    pub descendants: Vec<Path>,
    pub fields: Vec<ClassField>,
    pub statics: Vec<ClassField>,
    pub constructor: Option<ClassField>,
    pub init: Option<TypedExpr>,
}

impl RestoreSnapshot {
    pub fn capture(class: &ClassType) -> Self {
        Self {
            path: class.path.clone(),
            meta: class.meta.clone(),
            descendants: class.descendants.clone(),
            fields: class.fields.clone(),
            statics: class.statics.clone(),
            constructor: class.constructor.clone(),
            init: class.init.clone(),
        }
    }
}

/// Put `class` back in the state recorded by `snapshot`.
pub fn restore(snapshot: &RestoreSnapshot, class: &mut ClassType) {
    class.path = snapshot.path.clone();
    class.meta = snapshot.meta.clone();
    class.descendants = snapshot.descendants.clone();
    class.fields = snapshot.fields.clone();
    class.statics = snapshot.statics.clone();
    class.constructor = snapshot.constructor.clone();
    class.init = snapshot.init.clone();
    class.filters_applied = false;
    class.excluded = false;
}

/// Roll back every class of a cached module; returns how many were restored.
pub fn restore_cached_module(module: &mut ModuleDef) -> usize {
    let mut restored = 0;
    for class in module.classes_mut() {
        if let Some(snapshot) = class.restore.clone() {
            restore(&snapshot, class);
            restored += 1;
        }
    }
    if restored > 0 {
        debug!("restored {} classes of cached module {}", restored, module.path);
    }
    restored
}

/// Marks a flush in progress and logs its duration when dropped, whether the
/// flush succeeded or not.
pub struct FlushGuard {
    shared: Rc<RefCell<SharedState>>,
    started: Instant,
}

impl FlushGuard {
    pub fn begin(shared: &Rc<RefCell<SharedState>>) -> Self {
        shared.borrow_mut().flushing = true;
        Self {
            shared: Rc::clone(shared),
            started: Instant::now(),
        }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.shared.borrow_mut().flushing = false;
        debug!("macro flush took {:?}", self.started.elapsed());
    }
}

fn fatal(message: String, pos: Position) -> MacroError {
    MacroError::Fatal { message, pos }
}

/// Finalize, filter and collect the modules produced by `macro_ctx`.
fn flush_modules(macro_ctx: &mut CompilationContext) -> Result<Vec<ModuleRef>, MacroError> {
    macro_ctx
        .typer
        .finalize()
        .map_err(|e| fatal(format!("Macro context finalization failed: {}", e), e.pos))?;
    let produced = macro_ctx.typer.take_produced();
    let committed = dependencies::commit(&mut macro_ctx.shared.borrow_mut());
    debug!("flush: {} produced modules, {} dependency edges", produced.len(), committed);

    let mut pipeline = FilterPipeline::default_pipeline();
    for module in &produced {
        let mut module = module.borrow_mut();
        let module_path = module.path.clone();
        for class in module.classes_mut() {
            let snapshot = if class.filters_applied {
                class.restore.clone()
            } else {
                Some(RestoreSnapshot::capture(class))
            };
            let cx = FilterContext {
                module: module_path.clone(),
                snapshot,
            };
            let result = pipeline
                .run_on_class(class, &cx)
                .map_err(|e| fatal(format!("Filter failed on {}: {}", class.path, e), e.pos))?;
            if result.modified {
                tracing::debug!(class = %class.path, stats = ?result.stats, "filtered");
            }
        }
    }
    Ok(produced)
}

impl MacroEngine {
    /// Make the types produced in the macro context visible to `primary`.
    ///
    /// Any failure aborts the whole batch and invalidates the engine.
    pub fn flush(&mut self, primary: &mut CompilationContext) -> Result<usize, MacroError> {
        if primary.shared.borrow().flushing {
            debug!("flush requested while flushing, skipped");
            return Ok(0);
        }
        let result = {
            let macro_ctx = match primary.macros.as_deref_mut() {
                Some(ctx) => ctx,
                None => return Ok(0),
            };
            let _span = tracing::debug_span!("macro_flush").entered();
            let _guard = FlushGuard::begin(&macro_ctx.shared);
            flush_modules(macro_ctx)
        };

        match result {
            Ok(produced) => {
                let mut shared = primary.shared.borrow_mut();
                for module in &produced {
                    let path = module.borrow().path.clone();
                    shared.modules.insert(path, Rc::clone(module));
                }
                if !produced.is_empty() {
                    info!("flushed {} macro-produced modules", produced.len());
                }
                Ok(produced.len())
            }
            Err(e) => {
                self.invalidate(primary);
                Err(e)
            }
        }
    }

    /// Forget `module` and every module depending on it: their published
    /// definitions, queued edges and the macro bindings they provide.
    pub fn invalidate_module(&mut self, primary: &mut CompilationContext, module: &Path) -> usize {
        let affected = {
            let mut shared = primary.shared.borrow_mut();
            let mut affected = shared.graph.dependents_of(module);
            affected.insert(module.clone());
            for path in &affected {
                shared.modules.shift_remove(path);
                dependencies::discard_from(&mut shared, path);
            }
            affected
        };
        self.cache.retain_modules(|m| !affected.contains(m));
        info!("invalidated {} modules starting at {}", affected.len(), module);
        affected.len()
    }
}
