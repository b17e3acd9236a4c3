//! Post-macro filters
//!
//! Classes produced inside the macro context go through these filters before
//! the primary compilation sees them. Expression filters rewrite method
//! bodies and run once per class; type filters adjust the class itself and run
//! on every flush that produces it.

use super::finalize::RestoreSnapshot;
use crate::types::{ClassField, ClassType, FunArg, Path, Type, TypedExpr};
use fxhash::{FxHashMap, FxHashSet};
use parser::{Binop, Constant, Expr, ExprKind, Position, Unop, Var};
use std::fmt;

/// Per-class input handed to every filter.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub module: Path,
    /// State of the class before any filter touched it in this flush
    pub snapshot: Option<RestoreSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterError {
    pub filter: &'static str,
    pub message: String,
    pub pos: Position,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.filter, self.message)
    }
}

impl std::error::Error for FilterError {}

/// Result of a filter
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    /// Whether the class was modified
    pub modified: bool,
    /// Rewrites performed, per filter
    pub stats: FxHashMap<String, usize>,
}

impl FilterResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed(filter: &str, count: usize) -> Self {
        if count == 0 {
            return Self::unchanged();
        }
        let mut stats = FxHashMap::default();
        stats.insert(filter.to_string(), count);
        Self {
            modified: true,
            stats,
        }
    }

    pub fn combine(mut self, other: FilterResult) -> Self {
        self.modified |= other.modified;
        for (key, value) in other.stats {
            *self.stats.entry(key).or_insert(0) += value;
        }
        self
    }

    pub fn count(&self, filter: &str) -> usize {
        self.stats.get(filter).copied().unwrap_or(0)
    }
}

pub trait ClassFilter {
    fn name(&self) -> &'static str;

    fn run_on_class(
        &mut self,
        class: &mut ClassType,
        cx: &FilterContext,
    ) -> Result<FilterResult, FilterError>;
}

/// Ordered expression and type filters.
pub struct FilterPipeline {
    expr_filters: Vec<Box<dyn ClassFilter>>,
    type_filters: Vec<Box<dyn ClassFilter>>,
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::default_pipeline()
    }
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self {
            expr_filters: Vec::new(),
            type_filters: Vec::new(),
        }
    }

    pub fn add_expr_filter<F: ClassFilter + 'static>(&mut self, filter: F) {
        self.expr_filters.push(Box::new(filter));
    }

    pub fn add_type_filter<F: ClassFilter + 'static>(&mut self, filter: F) {
        self.type_filters.push(Box::new(filter));
    }

    pub fn default_pipeline() -> Self {
        let mut pipeline = Self::new();

        pipeline.add_expr_filter(AbstractCastFilter);
        pipeline.add_expr_filter(LocalStaticFilter);
        pipeline.add_expr_filter(ThrowFilter);
        pipeline.add_expr_filter(CaptureBoxFilter);

        pipeline.add_type_filter(StripGenericBaseFilter);
        pipeline.add_type_filter(ExceptionConstructorFilter);
        pipeline.add_type_filter(FieldInitFilter);
        pipeline.add_type_filter(CacheDependencyFilter);
        pipeline.add_type_filter(RecordSnapshotFilter);
        pipeline.add_type_filter(NativePathFilter);

        pipeline
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.expr_filters
            .iter()
            .chain(&self.type_filters)
            .map(|f| f.name())
            .collect()
    }

    /// Run the pipeline on one class. Stops at the first error.
    pub fn run_on_class(
        &mut self,
        class: &mut ClassType,
        cx: &FilterContext,
    ) -> Result<FilterResult, FilterError> {
        let mut total = FilterResult::unchanged();
        if !class.filters_applied {
            for filter in &mut self.expr_filters {
                total = total.combine(filter.run_on_class(class, cx)?);
            }
            class.filters_applied = true;
        }
        for filter in &mut self.type_filters {
            total = total.combine(filter.run_on_class(class, cx)?);
        }
        Ok(total)
    }
}

type BodyVisitor<'f> = dyn FnMut(&str, &mut Expr) -> Result<usize, FilterError> + 'f;

/// Visit every expression body of `class` with the name of its field.
fn for_each_body(class: &mut ClassType, f: &mut BodyVisitor<'_>) -> Result<usize, FilterError> {
    let mut count = 0;
    let fields = class
        .fields
        .iter_mut()
        .chain(class.statics.iter_mut())
        .chain(class.constructor.iter_mut());
    for field in fields {
        if let Some(body) = field.expr.as_mut() {
            count += f(&field.name, &mut body.expr)?;
        }
    }
    if let Some(init) = class.init.as_mut() {
        count += f("__init__", &mut init.expr)?;
    }
    Ok(count)
}

fn dotted(parts: &[&str], pos: Position) -> Expr {
    let mut iter = parts.iter();
    let first = iter.next().copied().unwrap_or_default();
    iter.fold(Expr::ident(first, pos), |acc, part| {
        Expr::new(ExprKind::Field(Box::new(acc), part.to_string()), pos)
    })
}

/// `cast (cast e)` collapses to a single cast carrying the outer type.
pub struct AbstractCastFilter;

impl ClassFilter for AbstractCastFilter {
    fn name(&self) -> &'static str {
        "abstract-cast"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        let count = for_each_body(class, &mut |_, body| {
            let mut count = 0;
            parser::walk_mut(body, &mut |e| {
                if let ExprKind::Cast(inner, outer_ty) = &mut e.kind {
                    if let ExprKind::Cast(innermost, None) = &mut inner.kind {
                        let innermost = std::mem::replace(&mut **innermost, Expr::null(Position::null()));
                        let outer_ty = outer_ty.take();
                        e.kind = ExprKind::Cast(Box::new(innermost), outer_ty);
                        count += 1;
                    }
                }
            });
            Ok(count)
        })?;
        Ok(FilterResult::changed(self.name(), count))
    }
}

/// Remove `static var` declarations from `expr`, outside nested functions.
fn take_static_vars(expr: &mut Expr, out: &mut Vec<Var>) {
    if let ExprKind::Function(..) = expr.kind {
        return;
    }
    if let ExprKind::Vars(vars) = &mut expr.kind {
        let (statics, locals): (Vec<Var>, Vec<Var>) = vars.drain(..).partition(|v| v.is_static);
        out.extend(statics);
        if locals.is_empty() {
            expr.kind = ExprKind::Block(Vec::new());
        } else {
            *vars = locals;
        }
        return;
    }
    expr.for_each_child_mut(&mut |child| take_static_vars(child, out));
}

fn rename_idents(expr: &mut Expr, renames: &FxHashMap<String, String>) {
    parser::walk_mut(expr, &mut |e| {
        if let ExprKind::Const(Constant::Ident(name)) = &mut e.kind {
            if let Some(new_name) = renames.get(name.as_str()) {
                *name = new_name.clone();
            }
        }
    });
}

/// Hoists `static var` locals to class statics named `<field>_<var>`.
pub struct LocalStaticFilter;

impl ClassFilter for LocalStaticFilter {
    fn name(&self) -> &'static str {
        "local-static"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        let mut taken = FxHashSet::default();
        taken.extend(class.statics.iter().map(|f| f.name.clone()));
        taken.extend(class.fields.iter().map(|f| f.name.clone()));
        let mut hoisted = Vec::new();
        let name = self.name();

        for_each_body(class, &mut |field_name, body| {
            let mut vars = Vec::new();
            take_static_vars(body, &mut vars);
            let mut renames = FxHashMap::default();
            for var in vars {
                let static_name = format!("{}_{}", field_name, var.name);
                if !taken.insert(static_name.clone()) {
                    return Err(FilterError {
                        filter: name,
                        message: format!(
                            "Static local {} in {} conflicts with field {}",
                            var.name, field_name, static_name
                        ),
                        pos: body.pos,
                    });
                }
                renames.insert(var.name.clone(), static_name.clone());
                let init = var.expr.map(|e| TypedExpr::new(*e, Type::Dynamic));
                let mut field = ClassField::var(&static_name, Type::Dynamic, init);
                field.pos = body.pos;
                hoisted.push(field);
            }
            if !renames.is_empty() {
                rename_idents(body, &renames);
            }
            Ok(renames.len())
        })?;

        let count = hoisted.len();
        class.statics.extend(hoisted);
        Ok(FilterResult::changed(name, count))
    }
}

fn is_exception_value(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::New(tp, _) => tp.name.ends_with("Exception") || tp.name.ends_with("Error"),
        ExprKind::Call(callee, _) => matches!(
            &callee.kind,
            ExprKind::Field(_, method) if method == "thrown"
        ),
        _ => false,
    }
}

/// `throw e` becomes `throw haxe.Exception.thrown(e)` unless `e` is already
/// an exception instance.
pub struct ThrowFilter;

impl ClassFilter for ThrowFilter {
    fn name(&self) -> &'static str {
        "throw"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        let count = for_each_body(class, &mut |_, body| {
            let mut count = 0;
            parser::walk_mut(body, &mut |e| {
                let pos = e.pos;
                if let ExprKind::Throw(value) = &mut e.kind {
                    if is_exception_value(value) {
                        return;
                    }
                    let thrown = std::mem::replace(&mut **value, Expr::null(pos));
                    let callee = dotted(&["haxe", "Exception", "thrown"], pos);
                    **value = Expr::new(ExprKind::Call(Box::new(callee), vec![thrown]), pos);
                    count += 1;
                }
            });
            Ok(count)
        })?;
        Ok(FilterResult::changed(self.name(), count))
    }
}

/// Names declared by `var` in `expr`, outside nested functions.
fn declared_locals(expr: &Expr, out: &mut FxHashSet<String>) {
    match &expr.kind {
        ExprKind::Function(..) => {}
        ExprKind::Vars(vars) => {
            for var in vars {
                out.insert(var.name.clone());
                if let Some(init) = &var.expr {
                    declared_locals(init, out);
                }
            }
        }
        _ => expr.for_each_child(&mut |child| declared_locals(child, out)),
    }
}

fn assigned_ident(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Binop(Binop::Assign | Binop::AssignOp(_), lhs, _) => lhs.as_ident(),
        ExprKind::Unop(Unop::Increment | Unop::Decrement, _, operand) => operand.as_ident(),
        _ => None,
    }
}

/// Names assigned inside function literals nested in `expr`.
fn modified_in_closures(expr: &Expr, inside: bool, out: &mut FxHashSet<String>) {
    if inside {
        if let Some(name) = assigned_ident(expr) {
            out.insert(name.to_string());
        }
    }
    let nested = inside || matches!(expr.kind, ExprKind::Function(..));
    expr.for_each_child(&mut |child| modified_in_closures(child, nested, out));
}

/// Locals written from inside a closure are boxed in a one-element array:
/// `var x = e` becomes `var x = [e]` and every use of `x` becomes `x[0]`.
pub struct CaptureBoxFilter;

impl ClassFilter for CaptureBoxFilter {
    fn name(&self) -> &'static str {
        "capture-box"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        let count = for_each_body(class, &mut |_, body| {
            let mut locals = FxHashSet::default();
            declared_locals(body, &mut locals);
            let mut modified = FxHashSet::default();
            modified_in_closures(body, false, &mut modified);
            let boxed: FxHashSet<String> = locals.intersection(&modified).cloned().collect();
            if boxed.is_empty() {
                return Ok(0);
            }
            parser::walk_mut(body, &mut |e| {
                let pos = e.pos;
                match &mut e.kind {
                    ExprKind::Const(Constant::Ident(name)) if boxed.contains(name.as_str()) => {
                        let ident = Expr::ident(name, pos);
                        e.kind = ExprKind::Array(Box::new(ident), Box::new(Expr::int(0, pos)));
                    }
                    ExprKind::Vars(vars) => {
                        for var in vars.iter_mut().filter(|v| boxed.contains(&v.name)) {
                            let init = var.expr.take().map(|b| *b).unwrap_or_else(|| Expr::null(pos));
                            var.expr = Some(Box::new(Expr::new(ExprKind::ArrayDecl(vec![init]), pos)));
                            var.ty = None;
                        }
                    }
                    _ => {}
                }
            });
            Ok(boxed.len())
        })?;
        Ok(FilterResult::changed(self.name(), count))
    }
}

/// Generic classes marked `@:generic` are templates: only their
/// specializations are generated.
pub struct StripGenericBaseFilter;

impl ClassFilter for StripGenericBaseFilter {
    fn name(&self) -> &'static str {
        "strip-generic-base"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        if class.excluded || class.params.is_empty() || !class.has_meta(":generic") {
            return Ok(FilterResult::unchanged());
        }
        class.excluded = true;
        Ok(FilterResult::changed(self.name(), 1))
    }
}

fn exception_base() -> Path {
    Path::new(&["haxe"], "Exception")
}

/// Subclasses of `haxe.Exception` without a constructor get
/// `new(message, ?previous)` forwarding to the base constructor.
pub struct ExceptionConstructorFilter;

impl ClassFilter for ExceptionConstructorFilter {
    fn name(&self) -> &'static str {
        "exception-constructor"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        let extends_exception = class
            .super_class
            .as_ref()
            .is_some_and(|(path, _)| *path == exception_base());
        if !extends_exception || class.constructor.is_some() || class.is_extern {
            return Ok(FilterResult::unchanged());
        }
        let pos = class.pos;
        let exception = Type::Inst(exception_base(), vec![]);
        let ty = Type::Fun(
            vec![
                FunArg::new("message", Type::string()),
                FunArg::optional("previous", exception),
            ],
            Box::new(Type::void()),
        );
        let super_call = Expr::new(
            ExprKind::Call(
                Box::new(Expr::ident("super", pos)),
                vec![Expr::ident("message", pos), Expr::ident("previous", pos)],
            ),
            pos,
        );
        let body = Expr::new(ExprKind::Block(vec![super_call]), pos);
        let mut ctor = ClassField::method("new", ty, Some(TypedExpr::new(body, Type::void())));
        ctor.pos = pos;
        class.constructor = Some(ctor);
        Ok(FilterResult::changed(self.name(), 1))
    }
}

/// Instance variable initializers move to the start of the constructor.
pub struct FieldInitFilter;

impl ClassFilter for FieldInitFilter {
    fn name(&self) -> &'static str {
        "field-init"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        if class.is_extern || class.is_interface {
            return Ok(FilterResult::unchanged());
        }
        let mut assigns = Vec::new();
        for field in class.fields.iter_mut().filter(|f| !f.is_method()) {
            if let Some(init) = field.expr.take() {
                let pos = field.pos;
                let target = Expr::new(
                    ExprKind::Field(Box::new(Expr::ident("this", pos)), field.name.clone()),
                    pos,
                );
                assigns.push(Expr::new(
                    ExprKind::Binop(Binop::Assign, Box::new(target), Box::new(init.expr)),
                    pos,
                ));
            }
        }
        if assigns.is_empty() {
            return Ok(FilterResult::unchanged());
        }
        let count = assigns.len();
        let pos = class.pos;
        let ctor = class.constructor.get_or_insert_with(|| {
            let ty = Type::Fun(vec![], Box::new(Type::void()));
            let body = Expr::new(ExprKind::Block(Vec::new()), pos);
            ClassField::method("new", ty, Some(TypedExpr::new(body, Type::void())))
        });
        let body = ctor
            .expr
            .get_or_insert_with(|| TypedExpr::new(Expr::new(ExprKind::Block(Vec::new()), pos), Type::void()));
        match &mut body.expr.kind {
            ExprKind::Block(stmts) => {
                assigns.append(stmts);
                *stmts = assigns;
            }
            _ => {
                let previous = std::mem::replace(&mut body.expr, Expr::null(pos));
                assigns.push(previous);
                body.expr = Expr::new(ExprKind::Block(assigns), pos);
            }
        }
        Ok(FilterResult::changed(self.name(), count))
    }
}

fn collect_type_paths(ty: &Type, out: &mut Vec<Path>) {
    match ty {
        Type::Mono(_) | Type::Dynamic => {}
        Type::Inst(p, params) | Type::Enum(p, params) | Type::Abstract(p, params) | Type::Def(p, params) => {
            out.push(p.clone());
            for param in params {
                collect_type_paths(param, out);
            }
        }
        Type::Fun(args, ret) => {
            for arg in args {
                collect_type_paths(&arg.ty, out);
            }
            collect_type_paths(ret, out);
        }
        Type::Anon(fields) => {
            for (_, t) in fields {
                collect_type_paths(t, out);
            }
        }
    }
}

/// Records the types a class refers to, for cache invalidation. Unbound
/// monomorphs are skipped and left open.
pub struct CacheDependencyFilter;

impl ClassFilter for CacheDependencyFilter {
    fn name(&self) -> &'static str {
        "cache-dependencies"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        let mut paths = Vec::new();
        if let Some((path, params)) = &class.super_class {
            paths.push(path.clone());
            for param in params {
                collect_type_paths(param, &mut paths);
            }
        }
        for field in class.fields.iter().chain(&class.statics).chain(&class.constructor) {
            collect_type_paths(&field.ty, &mut paths);
        }
        paths.retain(|p| *p != class.path);
        paths.sort();
        paths.dedup();
        let changed = paths != class.cache_dependencies;
        class.cache_dependencies = paths;
        Ok(FilterResult::changed(self.name(), usize::from(changed)))
    }
}

/// Attaches the pre-filter snapshot so a cached class can be rolled back.
pub struct RecordSnapshotFilter;

impl ClassFilter for RecordSnapshotFilter {
    fn name(&self) -> &'static str {
        "record-snapshot"
    }

    fn run_on_class(&mut self, class: &mut ClassType, cx: &FilterContext) -> Result<FilterResult, FilterError> {
        if class.restore.is_some() {
            return Ok(FilterResult::unchanged());
        }
        class.restore = cx.snapshot.clone();
        Ok(FilterResult::changed(self.name(), usize::from(class.restore.is_some())))
    }
}

/// Extern classes take the path given by `@:native("pack.Name")`.
pub struct NativePathFilter;

impl ClassFilter for NativePathFilter {
    fn name(&self) -> &'static str {
        "native-path"
    }

    fn run_on_class(&mut self, class: &mut ClassType, _cx: &FilterContext) -> Result<FilterResult, FilterError> {
        if !class.is_extern {
            return Ok(FilterResult::unchanged());
        }
        let native = class
            .meta
            .iter()
            .find(|m| m.name == ":native")
            .and_then(|m| m.params.first())
            .and_then(|p| match &p.kind {
                ExprKind::Const(Constant::String(s, _)) => Some(s.clone()),
                _ => None,
            });
        match native {
            Some(dotted) if Path::parse(&dotted) != class.path => {
                class.path = Path::parse(&dotted);
                Ok(FilterResult::changed(self.name(), 1))
            }
            _ => Ok(FilterResult::unchanged()),
        }
    }
}
