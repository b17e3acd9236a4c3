//! Macro execution engine
//!
//! Runs compile-time macro code against a dedicated macro compilation
//! context and exchanges program fragments with it:
//!
//! - **Manager**: creation, reuse and invalidation of the macro context and runtime
//! - **Loader**: resolution of `pack.Class.method` references, with a binding cache
//! - **Dispatcher**: call sites in expression, build, type and display position
//! - **Marshalling**: fragment encoding/decoding with typed mismatch reports
//! - **Finalization**: the post-macro filter pipeline and restore snapshots

pub mod api;
pub mod dependencies;
pub mod dispatch;
pub mod errors;
pub mod filters;
pub mod finalize;
pub mod loader;
pub mod manager;
pub mod marshal;
pub mod native;
pub mod report;
pub mod runtime;
pub mod value;

pub use api::MacroApi;
pub use dependencies::PendingDependencyEdge;
pub use dispatch::{split_rest_args, ArgClassification, CallMode, MacroResult, SplitArgs};
pub use errors::MacroError;
pub use filters::{ClassFilter, FilterContext, FilterError, FilterPipeline, FilterResult};
pub use finalize::{restore, restore_cached_module, RestoreSnapshot};
pub use loader::{MacroBinding, MacroCache, MacroRef};
pub use manager::{EngineStats, MacroEngine};
pub use marshal::{DecodeMismatch, DecodeResult};
pub use native::{NativeMacro, NativeRegistry, NativeRuntime, NativeRuntimeFactory};
pub use runtime::{
    MacroRuntime, RuntimeFactory, RuntimeFailure, RuntimeHandle, RuntimeResult, RuntimeSelection,
};
pub use value::{EnumValue, FunctionValue, Value};
