//! Macro context manager
//!
//! `MacroEngine` is the process-wide owner of the macro runtime and of the
//! binding cache. It outlives individual compilations: in server mode the same
//! engine serves many primary contexts, reusing a healthy runtime instead of
//! bootstrapping a new one each time.

use super::api::MacroApi;
use super::errors::MacroError;
use super::loader::MacroCache;
use super::native::{NativeRegistry, NativeRuntimeFactory};
use super::report::report_runtime_exception;
use super::runtime::{MacroRuntime, RuntimeFactory, RuntimeFailure, RuntimeHandle, RuntimeSelection};
use super::value::Value;
use crate::context::{CompilationContext, HookKind};
use crate::types::Path;
use log::{debug, info, warn};
use parser::Position;

/// Modules the runtime needs before it can exchange fragments
const BOOTSTRAP_MODULES: [&str; 2] = ["haxe.macro.Expr", "haxe.macro.Type"];

/// Counters describing what the engine has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub contexts_created: u32,
    pub runtimes_created: u32,
    pub bootstraps: u32,
    pub reuses: u32,
    pub invalidations: u32,
    pub calls: u32,
}

pub struct MacroEngine {
    factory: Box<dyn RuntimeFactory>,
    runtime: Option<RuntimeHandle>,
    selection: RuntimeSelection,
    pub(crate) cache: MacroCache,
    generation: u32,
    pub(crate) stats: EngineStats,
}

impl MacroEngine {
    pub fn new(factory: Box<dyn RuntimeFactory>) -> Self {
        Self {
            factory,
            runtime: None,
            selection: RuntimeSelection::Primary,
            cache: MacroCache::default(),
            generation: 0,
            stats: EngineStats::default(),
        }
    }

    /// Engine backed by host-implemented macros.
    pub fn native(registry: NativeRegistry) -> Self {
        Self::new(Box::new(NativeRuntimeFactory::new(registry)))
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn selection(&self) -> RuntimeSelection {
        self.selection
    }

    pub fn select(&mut self, selection: RuntimeSelection) {
        self.selection = selection;
    }

    /// Generation of the live runtime, if any
    pub fn runtime_generation(&self) -> Option<u32> {
        self.runtime.as_ref().map(RuntimeHandle::generation)
    }

    pub fn has_live_runtime(&self) -> bool {
        self.runtime.as_ref().is_some_and(|h| !h.is_poisoned())
    }

    pub fn cache(&self) -> &MacroCache {
        &self.cache
    }

    /// Forget every cached binding.
    pub fn reset_cache(&mut self) {
        debug!("macro binding cache reset ({} entries)", self.cache.len());
        self.cache.clear();
    }

    /// The macro context of `primary`, created on first use.
    pub fn get_or_create_macro_context<'c>(
        &mut self,
        primary: &'c mut CompilationContext,
    ) -> Result<&'c mut CompilationContext, MacroError> {
        if primary.macros.is_none() {
            self.create_macro_context(primary)?;
        }
        let caller = primary.current_module.clone();
        let macro_ctx = primary.macros.as_deref_mut().ok_or_else(|| MacroError::Fatal {
            message: "Macro context is not available".to_string(),
            pos: Position::null(),
        })?;
        macro_ctx.current_module = caller;
        Ok(macro_ctx)
    }

    /// Select the macro runtime while `f` runs, then switch back to whatever
    /// was selected before, whether `f` succeeded or not.
    pub(crate) fn in_macro_selection<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = std::mem::replace(&mut self.selection, RuntimeSelection::Macro);
        let result = f(self);
        self.selection = previous;
        result
    }

    /// The context macro code is typed in: `ctx` itself for nested calls.
    pub(crate) fn macro_context_of<'c>(
        &mut self,
        ctx: &'c mut CompilationContext,
    ) -> Result<&'c mut CompilationContext, MacroError> {
        if ctx.is_macro_context() {
            Ok(ctx)
        } else {
            self.get_or_create_macro_context(ctx)
        }
    }

    fn create_macro_context(&mut self, primary: &mut CompilationContext) -> Result<(), MacroError> {
        let mut macro_ctx = primary.fork_for_macros();
        let signature = macro_ctx.lock_signature();
        primary.shared.borrow_mut().reporter.install_macro_interceptor();
        info!(
            "created macro context (std root {}, signature {})",
            macro_ctx.config.std_root.display(),
            signature
        );
        primary.macros = Some(Box::new(macro_ctx));
        self.stats.contexts_created += 1;

        if let Err(e) = self.acquire_runtime(primary) {
            primary.macros = None;
            return Err(e);
        }
        Ok(())
    }

    fn acquire_runtime(&mut self, primary: &mut CompilationContext) -> Result<(), MacroError> {
        let reuse = primary.config.macros.reuse_runtime;
        match self.runtime.take() {
            Some(mut handle) if reuse && !handle.is_poisoned() => {
                {
                    let mut api = MacroApi::new(primary, Position::null(), "<reuse>");
                    handle.runtime().reuse(&mut api);
                }
                info!("reusing macro runtime (generation {})", handle.generation());
                self.runtime = Some(handle);
                self.stats.reuses += 1;
                return Ok(());
            }
            Some(handle) if handle.is_poisoned() => {
                warn!("discarding poisoned macro runtime (generation {})", handle.generation());
            }
            _ => {}
        }

        self.generation += 1;
        let mut handle = RuntimeHandle::new(self.factory.create(), self.generation);
        self.stats.runtimes_created += 1;
        self.bootstrap(primary)?;

        let init = {
            let mut api = MacroApi::new(primary, Position::null(), "<init>");
            handle.runtime().init(&mut api)
        };
        if let Err(failure) = init {
            return Err(MacroError::Fatal {
                message: format!("Macro runtime initialization failed: {}", failure),
                pos: Position::null(),
            });
        }
        info!("macro runtime ready (generation {})", handle.generation());
        self.runtime = Some(handle);
        Ok(())
    }

    /// Load the fragment descriptor modules into the macro context and flush.
    fn bootstrap(&mut self, primary: &mut CompilationContext) -> Result<(), MacroError> {
        {
            let macro_ctx = primary.macros.as_deref_mut().ok_or_else(|| MacroError::Fatal {
                message: "Macro context is not available".to_string(),
                pos: Position::null(),
            })?;
            for module in BOOTSTRAP_MODULES {
                macro_ctx.typer.load_module(&Path::parse(module), Position::null())?;
            }
        }
        self.stats.bootstraps += 1;
        self.flush(primary)?;
        Ok(())
    }

    /// Poison the runtime and drop the macro context; the next request
    /// rebuilds both from scratch.
    pub fn invalidate(&mut self, primary: &mut CompilationContext) {
        if let Some(handle) = self.runtime.as_mut() {
            warn!("invalidating macro runtime (generation {})", handle.generation());
            handle.poison();
        }
        primary.macros = None;
        self.selection = RuntimeSelection::Primary;
        self.stats.invalidations += 1;
        self.reset_cache();
    }

    /// Run `call` against the live runtime on behalf of macro `name`.
    ///
    /// The runtime is taken out of its slot for the duration of the call.
    /// Uncaught exceptions are reported; fatal failures invalidate the engine.
    pub(crate) fn with_runtime<T>(
        &mut self,
        primary: &mut CompilationContext,
        name: &str,
        pos: Position,
        call: impl FnOnce(&mut dyn MacroRuntime, &mut MacroApi<'_>) -> Result<T, RuntimeFailure>,
    ) -> Result<T, MacroError> {
        let mut handle = match self.runtime.take() {
            Some(handle) if !handle.is_poisoned() => handle,
            other => {
                self.runtime = other;
                return Err(MacroError::Fatal {
                    message: "No live macro runtime".to_string(),
                    pos,
                });
            }
        };
        let dump_dir = primary.config.dump_dir().to_path_buf();
        let shared = std::rc::Rc::clone(&primary.shared);

        let previous = self.selection;
        self.selection = RuntimeSelection::Macro;
        shared.borrow_mut().reporter.enter_macro(name);
        let result = {
            let mut api = MacroApi::new(primary, pos, name);
            call(handle.runtime(), &mut api)
        };
        shared.borrow_mut().reporter.leave_macro();
        self.selection = previous;
        self.stats.calls += 1;

        match result {
            Ok(value) => {
                self.runtime = Some(handle);
                Ok(value)
            }
            Err(RuntimeFailure::Exception(payload)) => {
                self.runtime = Some(handle);
                Err(report_runtime_exception(&dump_dir, name, &payload, pos))
            }
            Err(RuntimeFailure::Fatal(message)) => {
                self.runtime = Some(handle);
                self.invalidate(primary);
                Err(MacroError::Fatal { message, pos })
            }
        }
    }

    /// Call every callback registered for `kind`, in registration order.
    pub fn run_generation_hooks(
        &mut self,
        primary: &mut CompilationContext,
        kind: HookKind,
        args: &[Value],
    ) -> Result<usize, MacroError> {
        let callbacks = primary.shared.borrow().hooks.get(kind).to_vec();
        if callbacks.is_empty() {
            return Ok(0);
        }
        self.get_or_create_macro_context(primary)?;
        for callback in &callbacks {
            let name = match callback {
                Value::Function(f) => f.name.clone(),
                other => other.to_string(),
            };
            self.with_runtime(primary, &name, Position::null(), |runtime, api| {
                runtime.call_function(api, callback, args)
            })?;
        }
        debug!("ran {} {:?} hooks", callbacks.len(), kind);
        Ok(callbacks.len())
    }
}
