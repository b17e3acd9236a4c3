//! Rayzor macro engine
//!
//! Compile-time macro execution for the Rayzor Haxe compiler: a secondary
//! compilation context for macro code, the runtime bridge that executes it,
//! and the marshalling and finalization layers around them.

pub mod config;
pub mod context;
pub mod dependency_graph;
pub mod logging;
pub mod macro_system;
pub mod types;

pub use config::{BinaryCacheConfig, CompilerConfig, MacroSettings};
pub use context::{CompilationContext, HookKind, Reporter, SharedState, TypingState};
pub use macro_system::{CallMode, MacroEngine, MacroError, MacroRef, MacroResult, Value};
