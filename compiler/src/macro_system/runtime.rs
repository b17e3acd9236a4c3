//! The runtime-value evaluator seam.
//!
//! The evaluator that actually executes macro bodies is consumed through
//! `MacroRuntime`. The engine holds at most one live instance in a
//! `RuntimeHandle` and recreates it through a `RuntimeFactory` when a previous
//! run left it poisoned.

use super::api::MacroApi;
use super::value::Value;
use crate::types::{Path, TypedExpr};
use std::fmt;

/// Why a runtime call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeFailure {
    /// Exception thrown by macro code and not caught
    Exception(Value),
    /// The evaluator itself is in an inconsistent state
    Fatal(String),
}

impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFailure::Exception(v) => write!(f, "uncaught exception {}", v),
            RuntimeFailure::Fatal(msg) => write!(f, "fatal runtime error: {}", msg),
        }
    }
}

pub type RuntimeResult = Result<Option<Value>, RuntimeFailure>;

pub trait MacroRuntime {
    /// One-time setup after the bootstrap modules are loaded
    fn init(&mut self, api: &mut MacroApi<'_>) -> Result<(), RuntimeFailure>;

    /// Re-associate a runtime kept from a previous compilation
    fn reuse(&mut self, api: &mut MacroApi<'_>);

    /// Call the static method `method` of class `path`.
    ///
    /// `Ok(None)` means the call completed without producing a value.
    fn call_by_path(
        &mut self,
        api: &mut MacroApi<'_>,
        path: &Path,
        method: &str,
        args: &[Value],
    ) -> RuntimeResult;

    /// Call a function value previously returned by this runtime
    fn call_function(&mut self, api: &mut MacroApi<'_>, func: &Value, args: &[Value]) -> RuntimeResult;

    fn eval_expr(&mut self, api: &mut MacroApi<'_>, expr: &TypedExpr) -> RuntimeResult;
}

pub trait RuntimeFactory {
    fn create(&self) -> Box<dyn MacroRuntime>;
}

/// Which evaluator is selected for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeSelection {
    /// Executing already-compiled user code
    #[default]
    Primary,
    /// Typing and executing macro calls
    Macro,
}

pub struct RuntimeHandle {
    runtime: Box<dyn MacroRuntime>,
    generation: u32,
    poisoned: bool,
}

impl RuntimeHandle {
    pub fn new(runtime: Box<dyn MacroRuntime>, generation: u32) -> Self {
        Self {
            runtime,
            generation,
            poisoned: false,
        }
    }

    pub fn runtime(&mut self) -> &mut dyn MacroRuntime {
        self.runtime.as_mut()
    }

    /// Incremented each time the engine creates a fresh runtime
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("generation", &self.generation)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
