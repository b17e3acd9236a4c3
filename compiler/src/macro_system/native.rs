//! Host-implemented macro runtime.
//!
//! `NativeRuntime` executes macros registered as Rust closures, keyed by class
//! path and method name, and evaluates the constant subset of the fragment
//! language: literals, array/object literals, operators, conditionals, local
//! bindings and function literals (kept as closure values).

use super::api::MacroApi;
use super::marshal::{apply_binary_op, const_value};
use super::runtime::{MacroRuntime, RuntimeFactory, RuntimeFailure, RuntimeResult};
use super::value::{FunctionValue, Value};
use crate::types::{Path, TypedExpr};
use fxhash::FxHashMap;
use indexmap::IndexMap;
use log::{debug, info};
use parser::{Binop, Constant, Expr, ExprKind, Function, Unop};
use std::rc::Rc;

/// A macro body written in Rust.
pub type NativeMacro = Rc<dyn Fn(&mut MacroApi<'_>, &[Value]) -> RuntimeResult>;

/// Registered native macros, shared by every runtime a factory creates.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    functions: FxHashMap<(Path, String), NativeMacro>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `class.method`, e.g. `register("macros.Tools", "build", ...)`.
    pub fn register<F>(&mut self, class: &str, method: &str, body: F)
    where
        F: Fn(&mut MacroApi<'_>, &[Value]) -> RuntimeResult + 'static,
    {
        self.functions
            .insert((Path::parse(class), method.to_string()), Rc::new(body));
    }

    pub fn get(&self, class: &Path, method: &str) -> Option<NativeMacro> {
        self.functions.get(&(class.clone(), method.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

fn exception(message: impl Into<String>) -> RuntimeFailure {
    RuntimeFailure::Exception(Value::String(message.into()))
}

/// Lexical scopes, innermost last.
struct Env {
    scopes: Vec<IndexMap<String, Value>>,
}

impl Env {
    fn new() -> Self {
        Self {
            scopes: vec![IndexMap::new()],
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    /// Update an existing binding; false when `name` is not bound.
    fn set(&mut self, name: &str, value: Value) -> bool {
        match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Non-local exits while evaluating a body.
enum Unwind {
    Return(Value),
    Break,
    Continue,
    Failure(RuntimeFailure),
}

impl From<RuntimeFailure> for Unwind {
    fn from(failure: RuntimeFailure) -> Self {
        Unwind::Failure(failure)
    }
}

impl Unwind {
    /// Close a function body: `return` yields its value, loop exits outside a
    /// loop are errors.
    fn into_result(self) -> Result<Value, RuntimeFailure> {
        match self {
            Unwind::Return(value) => Ok(value),
            Unwind::Break => Err(exception("Break outside loop")),
            Unwind::Continue => Err(exception("Continue outside loop")),
            Unwind::Failure(failure) => Err(failure),
        }
    }
}

type Eval = Result<Value, Unwind>;

fn finish(result: Eval) -> Result<Value, RuntimeFailure> {
    result.or_else(Unwind::into_result)
}

pub struct NativeRuntime {
    registry: NativeRegistry,
    closures: FxHashMap<String, Function>,
    next_closure: u32,
    initialized: bool,
    reuse_count: u32,
}

impl NativeRuntime {
    pub fn new(registry: NativeRegistry) -> Self {
        Self {
            registry,
            closures: FxHashMap::default(),
            next_closure: 0,
            initialized: false,
            reuse_count: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reuse_count(&self) -> u32 {
        self.reuse_count
    }

    /// Closures created since the last reuse
    pub fn closure_count(&self) -> usize {
        self.closures.len()
    }

    fn make_closure(&mut self, func: &Function) -> Value {
        let name = format!("<anonymous#{}>", self.next_closure);
        self.next_closure += 1;
        self.closures.insert(name.clone(), func.clone());
        Value::Function(FunctionValue {
            name,
            arity: func.args.len(),
        })
    }

    /// `pack.Class.method` when `expr` is a dotted reference to a native macro
    fn native_reference(&self, expr: &Expr) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = expr;
        loop {
            match &current.kind {
                ExprKind::Field(inner, name) => {
                    parts.push(name.clone());
                    current = inner;
                }
                ExprKind::Const(Constant::Ident(name)) => {
                    parts.push(name.clone());
                    break;
                }
                _ => return None,
            }
        }
        parts.reverse();
        let dotted = parts.join(".");
        let (class, method) = dotted.rsplit_once('.')?;
        self.registry
            .get(&Path::parse(class), method)
            .map(|_| dotted.clone())
    }

    fn assign(&mut self, api: &mut MacroApi<'_>, op: &Binop, target: &Expr, rhs: &Expr, env: &mut Env) -> Eval {
        let name = match target.as_ident() {
            Some(name) => name.to_string(),
            None => return Err(exception(format!("Cannot assign to {}", target)).into()),
        };
        let right = self.eval(api, rhs, env)?;
        let value = match op {
            Binop::AssignOp(inner) => {
                let current = env
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| exception(format!("Unknown identifier : {}", name)))?;
                apply_binary_op(inner, &current, &right, target.pos).map_err(|e| exception(e.to_string()))?
            }
            _ => right,
        };
        if !env.set(&name, value.clone()) {
            return Err(exception(format!("Unknown identifier : {}", name)).into());
        }
        Ok(value)
    }

    fn eval(&mut self, api: &mut MacroApi<'_>, expr: &Expr, env: &mut Env) -> Eval {
        match &expr.kind {
            ExprKind::Const(Constant::Ident(name)) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| exception(format!("Unknown identifier : {}", name)).into()),
            },
            ExprKind::Const(_) => const_value(expr).map_err(|e| exception(e.to_string()).into()),
            ExprKind::Parenthesis(inner) => self.eval(api, inner, env),
            ExprKind::ArrayDecl(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(api, item, env)?);
                }
                Ok(Value::Array(values))
            }
            ExprKind::ObjectDecl(fields) => {
                let mut out = IndexMap::new();
                for field in fields {
                    let value = self.eval(api, &field.expr, env)?;
                    out.insert(field.field.clone(), value);
                }
                Ok(Value::Object(out))
            }
            ExprKind::Unop(op, false, inner) => {
                let value = self.eval(api, inner, env)?;
                match (op, value) {
                    (Unop::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                    (Unop::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (Unop::Not, v) => Ok(Value::Bool(!v.is_truthy())),
                    (Unop::NegBits, Value::Int(i)) => Ok(Value::Int(!i)),
                    (op, v) => Err(exception(format!("Cannot apply {} to {}", op.symbol(), v.type_name())).into()),
                }
            }
            ExprKind::Binop(op @ (Binop::Assign | Binop::AssignOp(_)), target, rhs) => {
                self.assign(api, op, target, rhs, env)
            }
            ExprKind::Binop(op, left, right) => {
                let l = self.eval(api, left, env)?;
                let r = self.eval(api, right, env)?;
                apply_binary_op(op, &l, &r, expr.pos).map_err(|e| exception(e.to_string()).into())
            }
            ExprKind::Ternary(cond, then, otherwise) | ExprKind::If(cond, then, Some(otherwise)) => {
                if self.eval(api, cond, env)?.is_truthy() {
                    self.eval(api, then, env)
                } else {
                    self.eval(api, otherwise, env)
                }
            }
            ExprKind::If(cond, then, None) => {
                if self.eval(api, cond, env)?.is_truthy() {
                    self.eval(api, then, env)?;
                }
                Ok(Value::Null)
            }
            ExprKind::While(cond, body, check_first) => {
                if *check_first && !self.eval(api, cond, env)?.is_truthy() {
                    return Ok(Value::Null);
                }
                loop {
                    match self.eval(api, body, env) {
                        Ok(_) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if !self.eval(api, cond, env)?.is_truthy() {
                        break;
                    }
                }
                Ok(Value::Null)
            }
            ExprKind::Break => Err(Unwind::Break),
            ExprKind::Continue => Err(Unwind::Continue),
            ExprKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(api, e, env)?,
                    None => Value::Null,
                };
                Err(Unwind::Return(value))
            }
            ExprKind::Field(inner, name) => {
                if let Some(dotted) = self.native_reference(expr) {
                    return Ok(Value::Function(FunctionValue {
                        name: dotted,
                        arity: 0,
                    }));
                }
                match self.eval(api, inner, env)? {
                    Value::Object(fields) => Ok(fields.get(name).cloned().unwrap_or(Value::Null)),
                    other => Err(exception(format!("{} has no field {}", other.type_name(), name)).into()),
                }
            }
            ExprKind::Function(_, func) => Ok(self.make_closure(func)),
            ExprKind::Block(items) => {
                env.push_scope();
                let mut last = Ok(Value::Null);
                for item in items {
                    last = self.eval(api, item, env);
                    if last.is_err() {
                        break;
                    }
                }
                env.pop_scope();
                last
            }
            ExprKind::Vars(vars) => {
                for var in vars {
                    let value = match &var.expr {
                        Some(init) => self.eval(api, init, env)?,
                        None => Value::Null,
                    };
                    env.declare(&var.name, value);
                }
                Ok(Value::Null)
            }
            ExprKind::Call(callee, args) => {
                let func = self.eval(api, callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(api, arg, env)?);
                }
                Ok(self.call_function(api, &func, &values)?.unwrap_or(Value::Null))
            }
            ExprKind::Throw(value) => {
                let payload = self.eval(api, value, env)?;
                Err(RuntimeFailure::Exception(payload).into())
            }
            ExprKind::CheckType(inner, _) | ExprKind::Cast(inner, _) | ExprKind::Meta(_, inner) => {
                self.eval(api, inner, env)
            }
            _ => Err(exception(format!("Cannot evaluate {}", expr)).into()),
        }
    }

    fn call_closure(&mut self, api: &mut MacroApi<'_>, func: &Function, args: &[Value]) -> RuntimeResult {
        let mut env = Env::new();
        for (i, param) in func.args.iter().enumerate() {
            let value = match (args.get(i), &param.value) {
                (Some(v), _) => v.clone(),
                (None, Some(default)) => finish(self.eval(api, default, &mut Env::new()))?,
                (None, None) => Value::Null,
            };
            env.declare(&param.name, value);
        }
        match &func.expr {
            Some(body) => finish(self.eval(api, body, &mut env)).map(Some),
            None => Ok(None),
        }
    }
}

impl MacroRuntime for NativeRuntime {
    fn init(&mut self, _api: &mut MacroApi<'_>) -> Result<(), RuntimeFailure> {
        self.initialized = true;
        info!("native macro runtime ready ({} macros)", self.registry.len());
        Ok(())
    }

    fn reuse(&mut self, _api: &mut MacroApi<'_>) {
        // Closures belong to the compilation that created them
        self.closures.clear();
        self.reuse_count += 1;
        debug!("native macro runtime reused ({} times)", self.reuse_count);
    }

    fn call_by_path(&mut self, api: &mut MacroApi<'_>, path: &Path, method: &str, args: &[Value]) -> RuntimeResult {
        let body = self
            .registry
            .get(path, method)
            .ok_or_else(|| exception(format!("Method {}.{} not found", path, method)))?;
        body(api, args)
    }

    fn call_function(&mut self, api: &mut MacroApi<'_>, func: &Value, args: &[Value]) -> RuntimeResult {
        let name = match func {
            Value::Function(f) => f.name.as_str(),
            other => return Err(exception(format!("{} is not a function", other.type_name()))),
        };
        if let Some(closure) = self.closures.get(name).cloned() {
            return self.call_closure(api, &closure, args);
        }
        let (class, method) = name
            .rsplit_once('.')
            .ok_or_else(|| exception(format!("Unknown function {}", name)))?;
        self.call_by_path(api, &Path::parse(class), method, args)
    }

    fn eval_expr(&mut self, api: &mut MacroApi<'_>, expr: &TypedExpr) -> RuntimeResult {
        finish(self.eval(api, &expr.expr, &mut Env::new())).map(Some)
    }
}

/// Creates `NativeRuntime`s over a shared registry.
#[derive(Clone, Default)]
pub struct NativeRuntimeFactory {
    registry: NativeRegistry,
}

impl NativeRuntimeFactory {
    pub fn new(registry: NativeRegistry) -> Self {
        Self { registry }
    }
}

impl RuntimeFactory for NativeRuntimeFactory {
    fn create(&self) -> Box<dyn MacroRuntime> {
        Box::new(NativeRuntime::new(self.registry.clone()))
    }
}
