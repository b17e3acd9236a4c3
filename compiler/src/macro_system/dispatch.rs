//! Macro call dispatcher
//!
//! Turns a call site into a runtime call: resolves the macro, checks its
//! return contract for the call mode, classifies and marshals the arguments,
//! executes through the runtime and decodes the result.

use super::errors::MacroError;
use super::loader::{MacroBinding, MacroRef};
use super::manager::MacroEngine;
use super::marshal::{
    const_value, decode_complex_type, decode_expr, decode_fields, decode_type, encode_expr,
    normalize_quotes,
};
use super::report::decode_or_report;
use super::value::Value;
use crate::context::CompilationContext;
use crate::types::{FunArg, IndexedArg, Path, Type, UnifiedArg};
use log::debug;
use parser::{walk_mut, Expr, ExprKind, Field, Position};
use smallvec::SmallVec;
use std::fmt;

/// Where a macro call appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Expression position, e.g. `Tools.log(x)`
    Expr,
    /// `@:build` / `@:autoBuild` hook
    Build,
    /// `@:genericBuild` or type-position macro
    MacroType,
    /// Display/completion query on a macro call
    Display,
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallMode::Expr => "expression",
            CallMode::Build => "build",
            CallMode::MacroType => "type",
            CallMode::Display => "display",
        };
        write!(f, "{}", s)
    }
}

/// How a macro parameter receives its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClassification {
    /// Receives the call-site expression as a fragment
    ExprLike,
    /// Receives a closure
    FunctionLike,
    /// Receives the evaluated argument
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroResult {
    Expr(Expr),
    /// Replacement field list from a build macro
    Fields(Vec<Field>),
    /// Build macro returned null: keep the declared fields
    KeepFields,
    Type(Type),
    /// Display query; nothing was executed
    DisplayOnly,
    /// Macro called from macro code; nothing was executed
    MacroInMacro,
    /// The macro completed without producing a value
    Error,
}

/// Marshalled argument list
type ArgValues = SmallVec<[Value; 4]>;

/// Call-site arguments after separating a trailing rest parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitArgs {
    pub fixed: Vec<Expr>,
    pub rest: Option<Vec<Expr>>,
}

/// Separate the arguments collected by a trailing `Array<Expr>` parameter.
///
/// With `k` fixed parameters and at least `k` arguments, the first `k`
/// arguments stay in place followed by an empty array placeholder for the
/// rest slot, and the remaining arguments form the rest list.
pub fn split_rest_args(params: &[FunArg], args: &[Expr], pos: Position) -> SplitArgs {
    let is_rest = params
        .last()
        .is_some_and(|p| p.ty == Type::array(Type::macro_expr()));
    let fixed_count = params.len().saturating_sub(1);
    if !is_rest || args.len() < fixed_count {
        return SplitArgs {
            fixed: args.to_vec(),
            rest: None,
        };
    }
    let mut fixed = args[..fixed_count].to_vec();
    fixed.push(Expr::new(ExprKind::ArrayDecl(Vec::new()), pos));
    SplitArgs {
        fixed,
        rest: Some(args[fixed_count..].to_vec()),
    }
}

/// Rewrite a trailing `haxe.Rest<T>` parameter to `Array<T>`.
fn rest_to_array(mut params: Vec<FunArg>) -> Vec<FunArg> {
    if let Some(last) = params.last_mut() {
        if let Some(elem) = last.ty.rest_element().cloned() {
            last.ty = Type::array(elem);
        }
    }
    params
}

/// Replace null positions with the call position.
fn fill_positions(expr: &mut Expr, pos: Position) {
    walk_mut(expr, &mut |e| {
        if e.pos.is_null() {
            e.pos = pos;
        }
    });
}

fn contract_error(binding: &MacroBinding, expected: &str, pos: Position) -> MacroError {
    MacroError::Typing {
        message: format!(
            "Macro {}.{} should return {} but returns {}",
            binding.class_path, binding.field, expected, binding.ret
        ),
        pos,
    }
}

impl MacroEngine {
    /// Invoke a macro from a call site of the given mode.
    pub fn invoke(
        &mut self,
        ctx: &mut CompilationContext,
        mode: CallMode,
        reference: &MacroRef,
        args: &[Expr],
        pos: Position,
    ) -> Result<MacroResult, MacroError> {
        if ctx.is_macro_context() {
            debug!("macro-in-macro call to {} rejected", reference);
            return Ok(MacroResult::MacroInMacro);
        }
        let _span = tracing::debug_span!("macro_invoke", %reference, %mode).entered();
        self.in_macro_selection(|engine| engine.dispatch(ctx, mode, reference, args, pos))
    }

    fn dispatch(
        &mut self,
        ctx: &mut CompilationContext,
        mode: CallMode,
        reference: &MacroRef,
        args: &[Expr],
        pos: Position,
    ) -> Result<MacroResult, MacroError> {
        let binding = self.load_macro(ctx, reference, mode == CallMode::Display, pos)?;
        let params = rest_to_array(binding.params.clone());

        // Return contract, checked in the macro context
        {
            let macro_ctx = self.get_or_create_macro_context(ctx)?;
            let typer = macro_ctx.typer.as_mut();
            match mode {
                CallMode::Display => return Ok(MacroResult::DisplayOnly),
                CallMode::Expr => typer
                    .unify(&binding.ret, &Type::macro_expr())
                    .map_err(|_| contract_error(&binding, "haxe.macro.Expr", pos))?,
                CallMode::Build => typer
                    .unify(&binding.ret, &Type::array(Type::macro_field()))
                    .map_err(|_| contract_error(&binding, "Array<haxe.macro.Field>", pos))?,
                CallMode::MacroType => {
                    if typer.unify(&binding.ret, &Type::macro_type()).is_err() {
                        typer
                            .unify(&binding.ret, &Type::macro_complex_type())
                            .map_err(|_| {
                                contract_error(&binding, "haxe.macro.Type or haxe.macro.ComplexType", pos)
                            })?;
                    }
                }
            }
        }

        let split = split_rest_args(&params, args, pos);
        let classes = self.classify_params(ctx, &params)?;

        // Widened parameters: fragment and evaluated arguments accept anything
        let widened: Vec<FunArg> = params
            .iter()
            .zip(&classes)
            .map(|(p, class)| match class {
                ArgClassification::FunctionLike => p.clone(),
                ArgClassification::ExprLike | ArgClassification::Other => FunArg {
                    name: p.name.clone(),
                    opt: p.opt,
                    ty: Type::Dynamic,
                },
            })
            .collect();
        let indexed: Vec<IndexedArg> = split
            .fixed
            .iter()
            .enumerate()
            .map(|(index, expr)| IndexedArg {
                index,
                expr: expr.clone(),
            })
            .collect();
        let unified = ctx.typer.unify_call_args(&indexed, &widened, pos)?;

        let name = reference.to_string();
        let mut values = self.marshal_args(ctx, &name, &params, &classes, &split.fixed, &unified, pos)?;
        if let Some(rest) = &split.rest {
            let encoded = rest.iter().map(|e| encode_expr(&normalize_quotes(e))).collect();
            if let Some(last) = values.last_mut() {
                *last = Value::Array(encoded);
            }
        }

        let result = self.with_runtime(ctx, &name, pos, |runtime, api| {
            runtime.call_by_path(api, &binding.class_path, &binding.field, &values)
        })?;
        let value = match result {
            Some(value) => value,
            None => return Ok(MacroResult::Error),
        };
        self.decode_result(ctx, mode, &value, pos)
    }

    fn classify_params(
        &mut self,
        ctx: &mut CompilationContext,
        params: &[FunArg],
    ) -> Result<Vec<ArgClassification>, MacroError> {
        let macro_ctx = self.get_or_create_macro_context(ctx)?;
        Ok(params
            .iter()
            .map(|p| {
                if macro_ctx.typer.unify(&Type::macro_expr(), &p.ty).is_ok() {
                    ArgClassification::ExprLike
                } else if p.ty.is_function() {
                    ArgClassification::FunctionLike
                } else {
                    ArgClassification::Other
                }
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn marshal_args(
        &mut self,
        ctx: &mut CompilationContext,
        name: &str,
        params: &[FunArg],
        classes: &[ArgClassification],
        call_args: &[Expr],
        unified: &[UnifiedArg],
        pos: Position,
    ) -> Result<ArgValues, MacroError> {
        let mut values = ArgValues::new();
        for (i, param) in params.iter().enumerate() {
            let (index, typed) = match unified.get(i) {
                Some(UnifiedArg::Supplied { index, typed }) => (*index, typed),
                Some(UnifiedArg::Omitted) | None => {
                    values.push(Value::Null);
                    continue;
                }
            };
            let value = match classes[i] {
                ArgClassification::ExprLike => {
                    let original = call_args.get(index).unwrap_or(&typed.expr);
                    encode_expr(&normalize_quotes(original))
                }
                ArgClassification::FunctionLike => {
                    let original = call_args.get(index).unwrap_or(&typed.expr);
                    let typed = {
                        let macro_ctx = self.get_or_create_macro_context(ctx)?;
                        macro_ctx.typer.type_expr(original, Some(&param.ty))?
                    };
                    self.with_runtime(ctx, name, pos, |runtime, api| runtime.eval_expr(api, &typed))?
                        .unwrap_or(Value::Null)
                }
                ArgClassification::Other => self
                    .with_runtime(ctx, name, pos, |runtime, api| runtime.eval_expr(api, typed))?
                    .unwrap_or(Value::Null),
            };
            values.push(value);
        }
        Ok(values)
    }

    fn decode_result(
        &mut self,
        ctx: &mut CompilationContext,
        mode: CallMode,
        value: &Value,
        pos: Position,
    ) -> Result<MacroResult, MacroError> {
        let dump_dir = ctx.config.dump_dir().to_path_buf();
        match mode {
            CallMode::Expr => {
                let mut expr = decode_or_report(&dump_dir, value, "Expr", pos, decode_expr)?;
                fill_positions(&mut expr, pos);
                Ok(MacroResult::Expr(expr))
            }
            CallMode::Build => {
                if value.is_null() {
                    return Ok(MacroResult::KeepFields);
                }
                let fields = decode_or_report(&dump_dir, value, "Array<Field>", pos, decode_fields)?;
                Ok(MacroResult::Fields(fields))
            }
            CallMode::MacroType => {
                if value.is_null() {
                    return Ok(MacroResult::Type(ctx.typer.spawn_monomorph()));
                }
                if let Ok(ct) = decode_complex_type(value) {
                    return Ok(MacroResult::Type(ctx.typer.load_complex_type(&ct, pos)?));
                }
                if let Ok(ty) = decode_type(value) {
                    return Ok(MacroResult::Type(ty));
                }
                decode_or_report(&dump_dir, value, "ComplexType", pos, decode_complex_type)?;
                Ok(MacroResult::Error)
            }
            CallMode::Display => Ok(MacroResult::DisplayOnly),
        }
    }

    /// Run an initialization macro given as source text, e.g.
    /// `Compiler.define('FOO')` or `include('my.pack')`.
    pub fn run_init_macro(
        &mut self,
        ctx: &mut CompilationContext,
        text: &str,
    ) -> Result<Option<Value>, MacroError> {
        let pos = Position::null();
        let expr = parser::parse_expr(text, pos)?;
        let (reference, args) = parse_init_call(&expr)?;
        let values = args
            .iter()
            .map(const_value)
            .collect::<Result<ArgValues, MacroError>>()?;

        let _span = tracing::debug_span!("init_macro", %reference).entered();
        self.in_macro_selection(|engine| {
            let binding = engine.load_macro(ctx, &reference, false, expr.pos)?;
            let name = reference.to_string();
            engine.with_runtime(ctx, &name, expr.pos, |runtime, api| {
                runtime.call_by_path(api, &binding.class_path, &binding.field, &values)
            })
        })
    }
}

fn flatten_callee(expr: &Expr, out: &mut Vec<String>) -> bool {
    match &expr.kind {
        ExprKind::Const(parser::Constant::Ident(name)) => {
            out.push(name.clone());
            true
        }
        ExprKind::Field(inner, name) => {
            if !flatten_callee(inner, out) {
                return false;
            }
            out.push(name.clone());
            true
        }
        _ => false,
    }
}

/// Interpret `ident(.ident)*(args)` as a macro reference.
pub fn parse_init_call(expr: &Expr) -> Result<(MacroRef, &[Expr]), MacroError> {
    let invalid = || MacroError::resolution("Invalid macro call", expr.pos);
    let (callee, args) = match &expr.kind {
        ExprKind::Call(callee, args) => (callee, args.as_slice()),
        _ => return Err(invalid()),
    };
    let mut parts = Vec::new();
    if !flatten_callee(callee, &mut parts) {
        return Err(invalid());
    }
    let haxe_macro = |name: &str| Path::new(&["haxe", "macro"], name);
    let reference = match parts.as_slice() {
        [method] => MacroRef::new(haxe_macro("Compiler"), method),
        [server, method] if server == "server" => MacroRef::new(haxe_macro("CompilationServer"), method),
        [.., class, method] => {
            let pack: Vec<&str> = parts[..parts.len() - 2].iter().map(String::as_str).collect();
            let path = if pack.is_empty()
                && matches!(class.as_str(), "Compiler" | "Context" | "CompilationServer")
            {
                haxe_macro(class)
            } else {
                Path::new(&pack, class)
            };
            MacroRef::new(path, method)
        }
        [] => return Err(invalid()),
    };
    Ok((reference, args))
}
