//! Compilation contexts
//!
//! A `CompilationContext` is one independent typing environment. The primary
//! context compiles user code; at most one macro context hangs off it and
//! compiles macro code. Both see the same `SharedState`.

use crate::config::{BinaryCacheConfig, CompilerConfig};
use crate::dependency_graph::ModuleDependencyGraph;
use crate::macro_system::dependencies::PendingDependencyEdge;
use crate::macro_system::value::Value;
use crate::types::{ModuleRef, Path, Type, Typer};
use indexmap::IndexMap;
use log::{error, info, warn};
use parser::{Field, Position};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Where a reported message came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOrigin {
    User,
    Macro { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    pub pos: Position,
    pub origin: MessageOrigin,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            MessageOrigin::User => write!(f, "{}", self.text),
            MessageOrigin::Macro { name } => write!(f, "{} (from macro {})", self.text, name),
        }
    }
}

/// Final destination of reported messages.
pub trait MessageSink {
    fn emit(&mut self, message: &Message);
}

/// Default sink: forward to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn emit(&mut self, message: &Message) {
        match message.severity {
            Severity::Error => error!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Info => info!("{}", message),
        }
    }
}

/// Error/warning/info reporting shared by both contexts.
///
/// Once the macro interceptor is installed, every message reported while a
/// macro is running is tagged with the macro's name before reaching the sink.
pub struct Reporter {
    messages: Vec<Message>,
    sink: Box<dyn MessageSink>,
    intercepting: bool,
    active_macros: Vec<String>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Box::new(LogSink))
    }
}

impl Reporter {
    pub fn new(sink: Box<dyn MessageSink>) -> Self {
        Self {
            messages: Vec::new(),
            sink,
            intercepting: false,
            active_macros: Vec::new(),
        }
    }

    pub fn install_macro_interceptor(&mut self) {
        self.intercepting = true;
    }

    pub fn is_intercepting(&self) -> bool {
        self.intercepting
    }

    pub fn enter_macro(&mut self, name: &str) {
        self.active_macros.push(name.to_string());
    }

    pub fn leave_macro(&mut self) {
        self.active_macros.pop();
    }

    pub fn report(&mut self, severity: Severity, text: impl Into<String>, pos: Position) {
        let origin = match (self.intercepting, self.active_macros.last()) {
            (true, Some(name)) => MessageOrigin::Macro { name: name.clone() },
            _ => MessageOrigin::User,
        };
        self.push(Message {
            severity,
            text: text.into(),
            pos,
            origin,
        });
    }

    pub fn push(&mut self, message: Message) {
        self.sink.emit(&message);
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    AfterInit,
    AfterTyping,
    OnGenerate,
    AfterGenerate,
}

/// Generation-time callbacks installed by macros, as runtime function values.
#[derive(Debug, Clone, Default)]
pub struct GenerationHooks {
    hooks: IndexMap<HookKind, Vec<Value>>,
}

impl GenerationHooks {
    pub fn add(&mut self, kind: HookKind, callback: Value) {
        self.hooks.entry(kind).or_default().push(callback);
    }

    pub fn get(&self, kind: HookKind) -> &[Value] {
        self.hooks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDoc {
    pub doc: String,
    pub targets: Vec<String>,
}

/// State mutated in place by both the primary and the macro context.
#[derive(Default)]
pub struct SharedState {
    pub reporter: Reporter,
    /// User-registered metadata names
    pub metadata: IndexMap<String, MetadataDoc>,
    /// User-registered define names
    pub user_defines: IndexMap<String, String>,
    pub graph: ModuleDependencyGraph,
    pub pending_edges: Vec<PendingDependencyEdge>,
    pub hooks: GenerationHooks,
    pub cache_writer: BinaryCacheConfig,
    /// Modules made visible to the primary compilation
    pub modules: IndexMap<Path, ModuleRef>,
    /// Set while a macro flush is in progress
    pub flushing: bool,
}

/// Information about the typing currently in progress.
#[derive(Debug, Clone, Default)]
pub struct TypingState {
    pub module: Path,
    pub class: Option<Path>,
    /// Fields of the class being built, when inside a build hook
    pub build_fields: Option<Vec<Field>>,
    pub locals: IndexMap<String, Type>,
    pub imports: Vec<Path>,
    pub usings: Vec<Path>,
    pub expected: Option<Type>,
}

pub struct CompilationContext {
    pub config: CompilerConfig,
    pub typer: Box<dyn Typer>,
    pub shared: Rc<RefCell<SharedState>>,
    pub current_module: Path,
    pub typing: Option<TypingState>,
    /// The macro context owned by this (primary) context
    pub macros: Option<Box<CompilationContext>>,
    is_macro: bool,
    signature: Option<String>,
    signature_locked: bool,
}

impl CompilationContext {
    pub fn new(config: CompilerConfig, typer: Box<dyn Typer>) -> Self {
        Self {
            config,
            typer,
            shared: Rc::new(RefCell::new(SharedState::default())),
            current_module: Path::new(&[], ""),
            typing: None,
            macros: None,
            is_macro: false,
            signature: None,
            signature_locked: false,
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.shared.borrow_mut().reporter = reporter;
        self
    }

    /// A macro context: macro configuration, forked typer, same shared state.
    pub fn fork_for_macros(&self) -> CompilationContext {
        let config = self.config.for_macro_context();
        let mut typer = self.typer.fork();
        typer.set_display_mode(config.display_mode);
        CompilationContext {
            config,
            typer,
            shared: Rc::clone(&self.shared),
            current_module: self.current_module.clone(),
            typing: None,
            macros: None,
            is_macro: true,
            signature: None,
            signature_locked: false,
        }
    }

    pub fn is_macro_context(&self) -> bool {
        self.is_macro
    }

    /// Switch display mode, returning the previous setting.
    pub fn set_display_mode(&mut self, display: bool) -> bool {
        let previous = self.config.display_mode;
        self.config.display_mode = display;
        self.typer.set_display_mode(display);
        previous
    }

    pub fn define(&mut self, name: &str, value: &str) {
        self.config.defines.insert(name.to_string(), value.to_string());
        if !self.signature_locked {
            self.signature = None;
        }
    }

    pub fn defined(&self, name: &str) -> bool {
        self.config.defines.contains_key(name)
    }

    pub fn defined_value(&self, name: &str) -> Option<&str> {
        self.config.defines.get(name).map(String::as_str)
    }

    /// Hash of the defines that affect compiled output.
    pub fn signature(&mut self) -> String {
        if let Some(sig) = &self.signature {
            return sig.clone();
        }
        let mut defines: Vec<(&String, &String)> = self.config.defines.iter().collect();
        defines.sort();
        let mut hasher = fxhash::FxHasher::default();
        defines.hash(&mut hasher);
        self.config.std_root.hash(&mut hasher);
        let sig = format!("{:016x}", hasher.finish());
        self.signature = Some(sig.clone());
        sig
    }

    /// Freeze the signature; later defines no longer change it.
    pub fn lock_signature(&mut self) -> String {
        let sig = self.signature();
        self.signature_locked = true;
        sig
    }

    pub fn is_signature_locked(&self) -> bool {
        self.signature_locked
    }

    pub fn report(&self, severity: Severity, text: impl Into<String>, pos: Position) {
        self.shared.borrow_mut().reporter.report(severity, text, pos);
    }

    pub fn begin_typing(&mut self, state: TypingState) {
        self.typing = Some(state);
    }

    pub fn end_typing(&mut self) -> Option<TypingState> {
        self.typing.take()
    }
}
