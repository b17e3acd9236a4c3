//! Typed program model shared by the primary and macro compilation contexts
//!
//! This is the slice of the type system the macro engine needs: paths,
//! types, class/module definitions and the `Typer` seam through which the
//! general type checker is consumed.

use crate::macro_system::finalize::RestoreSnapshot;
use parser::{Expr, MetadataEntry, Position, TypeDefinition, TypePath};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A module or type path: `pack.name`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    pub pack: Vec<String>,
    pub name: String,
}

impl Path {
    pub fn new(pack: &[&str], name: &str) -> Self {
        Self {
            pack: pack.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
        }
    }

    /// Parse a dotted path; the last segment is the name.
    pub fn parse(dotted: &str) -> Self {
        let mut parts: Vec<String> = dotted.split('.').map(str::to_string).collect();
        let name = parts.pop().unwrap_or_default();
        Self { pack: parts, name }
    }

    pub fn from_type_path(tp: &TypePath) -> Self {
        match &tp.sub {
            Some(sub) => Self {
                pack: tp.pack.clone(),
                name: sub.clone(),
            },
            None => Self {
                pack: tp.pack.clone(),
                name: tp.name.clone(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pack.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.pack {
            write!(f, "{}.", p)?;
        }
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunArg {
    pub name: String,
    pub opt: bool,
    pub ty: Type,
}

impl FunArg {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            opt: false,
            ty,
        }
    }

    pub fn optional(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            opt: true,
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// Unbound type variable
    Mono(u32),
    Dynamic,
    Inst(Path, Vec<Type>),
    Enum(Path, Vec<Type>),
    Abstract(Path, Vec<Type>),
    /// Typedef reference
    Def(Path, Vec<Type>),
    Fun(Vec<FunArg>, Box<Type>),
    Anon(Vec<(String, Type)>),
}

impl Type {
    pub fn array(of: Type) -> Type {
        Type::Inst(Path::new(&[], "Array"), vec![of])
    }

    pub fn int() -> Type {
        Type::Abstract(Path::new(&[], "Int"), vec![])
    }

    pub fn float() -> Type {
        Type::Abstract(Path::new(&[], "Float"), vec![])
    }

    pub fn bool() -> Type {
        Type::Abstract(Path::new(&[], "Bool"), vec![])
    }

    pub fn string() -> Type {
        Type::Inst(Path::new(&[], "String"), vec![])
    }

    pub fn void() -> Type {
        Type::Abstract(Path::new(&[], "Void"), vec![])
    }

    /// `haxe.macro.Expr`
    pub fn macro_expr() -> Type {
        Type::Def(Path::new(&["haxe", "macro"], "Expr"), vec![])
    }

    /// `haxe.macro.Field`
    pub fn macro_field() -> Type {
        Type::Def(Path::new(&["haxe", "macro"], "Field"), vec![])
    }

    /// `haxe.macro.Type`
    pub fn macro_type() -> Type {
        Type::Enum(Path::new(&["haxe", "macro"], "Type"), vec![])
    }

    /// `haxe.macro.ComplexType`
    pub fn macro_complex_type() -> Type {
        Type::Enum(Path::new(&["haxe", "macro"], "ComplexType"), vec![])
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Fun(_, _))
    }

    /// Element type of `haxe.Rest<T>`
    pub fn rest_element(&self) -> Option<&Type> {
        match self {
            Type::Abstract(path, params)
                if path.pack == ["haxe"] && path.name == "Rest" && params.len() == 1 =>
            {
                params.first()
            }
            _ => None,
        }
    }

    /// Path of the named type this refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Type::Inst(p, _) | Type::Enum(p, _) | Type::Abstract(p, _) | Type::Def(p, _) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn params(f: &mut fmt::Formatter<'_>, ps: &[Type]) -> fmt::Result {
            if ps.is_empty() {
                return Ok(());
            }
            let parts: Vec<String> = ps.iter().map(|p| p.to_string()).collect();
            write!(f, "<{}>", parts.join(", "))
        }
        match self {
            Type::Mono(id) => write!(f, "Unknown<{}>", id),
            Type::Dynamic => write!(f, "Dynamic"),
            Type::Inst(p, ps) | Type::Enum(p, ps) | Type::Abstract(p, ps) | Type::Def(p, ps) => {
                write!(f, "{}", p)?;
                params(f, ps)
            }
            Type::Fun(args, ret) => {
                if args.is_empty() {
                    write!(f, "Void")?;
                }
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    if a.opt {
                        write!(f, "?")?;
                    }
                    write!(f, "{}", a.ty)?;
                }
                write!(f, " -> {}", ret)
            }
            Type::Anon(fields) => {
                let parts: Vec<String> = fields.iter().map(|(n, t)| format!("{} : {}", n, t)).collect();
                write!(f, "{{ {} }}", parts.join(", "))
            }
        }
    }
}

/// A type-checked expression body.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub expr: Expr,
    pub ty: Type,
}

impl TypedExpr {
    pub fn new(expr: Expr, ty: Type) -> Self {
        Self { expr, ty }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFieldKind {
    Method,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassField {
    pub name: String,
    pub ty: Type,
    pub kind: ClassFieldKind,
    pub pos: Position,
    pub meta: Vec<MetadataEntry>,
    pub expr: Option<TypedExpr>,
}

impl ClassField {
    pub fn method(name: &str, ty: Type, body: Option<TypedExpr>) -> Self {
        Self {
            name: name.to_string(),
            ty,
            kind: ClassFieldKind::Method,
            pos: Position::null(),
            meta: Vec::new(),
            expr: body,
        }
    }

    pub fn var(name: &str, ty: Type, init: Option<TypedExpr>) -> Self {
        Self {
            name: name.to_string(),
            ty,
            kind: ClassFieldKind::Var,
            pos: Position::null(),
            meta: Vec::new(),
            expr: init,
        }
    }

    pub fn is_method(&self) -> bool {
        self.kind == ClassFieldKind::Method
    }
}

/// A class as seen after typing.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassType {
    pub path: Path,
    pub module: Path,
    pub pos: Position,
    pub meta: Vec<MetadataEntry>,
    pub params: Vec<String>,
    pub is_extern: bool,
    pub is_interface: bool,
    pub super_class: Option<(Path, Vec<Type>)>,
    pub fields: Vec<ClassField>,
    pub statics: Vec<ClassField>,
    pub constructor: Option<ClassField>,
    pub init: Option<TypedExpr>,
    pub descendants: Vec<Path>,
    /// Set once the expression filters have run over this class
    pub filters_applied: bool,
    /// Excluded from generation
    pub excluded: bool,
    /// Paths this class must be recompiled with, filled at flush
    pub cache_dependencies: Vec<Path>,
    pub restore: Option<RestoreSnapshot>,
}

impl ClassType {
    pub fn new(path: Path, module: Path) -> Self {
        Self {
            path,
            module,
            pos: Position::null(),
            meta: Vec::new(),
            params: Vec::new(),
            is_extern: false,
            is_interface: false,
            super_class: None,
            fields: Vec::new(),
            statics: Vec::new(),
            constructor: None,
            init: None,
            descendants: Vec::new(),
            filters_applied: false,
            excluded: false,
            cache_dependencies: Vec::new(),
            restore: None,
        }
    }

    pub fn find_static(&self, name: &str) -> Option<&ClassField> {
        self.statics.iter().find(|f| f.name == name)
    }

    pub fn find_field(&self, name: &str) -> Option<&ClassField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_meta(&self, name: &str) -> bool {
        self.meta.iter().any(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleType {
    Class(ClassType),
    Enum(Path),
    Typedef(Path, Type),
    Abstract(Path),
}

impl ModuleType {
    pub fn path(&self) -> &Path {
        match self {
            ModuleType::Class(c) => &c.path,
            ModuleType::Enum(p) | ModuleType::Typedef(p, _) | ModuleType::Abstract(p) => p,
        }
    }

    pub fn as_class(&self) -> Option<&ClassType> {
        match self {
            ModuleType::Class(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDef {
    pub path: Path,
    pub types: Vec<ModuleType>,
}

impl ModuleDef {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            types: Vec::new(),
        }
    }

    /// The type named after the module, if declared
    pub fn primary_type(&self) -> Option<&ModuleType> {
        self.types.iter().find(|t| t.path() == &self.path)
    }

    pub fn classes_mut(&mut self) -> impl Iterator<Item = &mut ClassType> {
        self.types.iter_mut().filter_map(|t| match t {
            ModuleType::Class(c) => Some(c),
            _ => None,
        })
    }
}

pub type ModuleRef = Rc<RefCell<ModuleDef>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingErrorKind {
    ModuleNotFound,
    TypeNotFound,
    Unify,
    Arity,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypingError {
    pub kind: TypingErrorKind,
    pub message: String,
    pub pos: Position,
}

impl TypingError {
    pub fn new(kind: TypingErrorKind, message: impl Into<String>, pos: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for TypingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TypingError {}

/// A call-site argument tagged with its original index so it can be found
/// again after call-argument unification reorders or pads the list.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedArg {
    pub index: usize,
    pub expr: Expr,
}

/// One formal parameter after call-argument unification.
#[derive(Debug, Clone, PartialEq)]
pub enum UnifiedArg {
    Supplied { index: usize, typed: TypedExpr },
    Omitted,
}

/// The general type checker, consumed as an opaque service.
///
/// Each compilation context owns its own instance; the macro context gets a
/// fork of the primary one.
pub trait Typer {
    /// A fresh typer for a secondary context
    fn fork(&self) -> Box<dyn Typer>;

    fn load_module(&mut self, path: &Path, pos: Position) -> Result<ModuleRef, TypingError>;

    fn load_instance(&mut self, path: &TypePath, pos: Position) -> Result<Type, TypingError>;

    fn load_complex_type(
        &mut self,
        ct: &parser::ComplexType,
        pos: Position,
    ) -> Result<Type, TypingError>;

    /// Check that `actual` can be used where `expected` is required
    fn unify(&mut self, actual: &Type, expected: &Type) -> Result<(), TypingError>;

    fn type_expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Result<TypedExpr, TypingError>;

    /// Match call-site arguments to formal parameters
    fn unify_call_args(
        &mut self,
        args: &[IndexedArg],
        params: &[FunArg],
        pos: Position,
    ) -> Result<Vec<UnifiedArg>, TypingError>;

    fn spawn_monomorph(&mut self) -> Type;

    fn define_module(
        &mut self,
        path: &Path,
        types: &[TypeDefinition],
        pos: Position,
    ) -> Result<ModuleRef, TypingError>;

    /// Force all pending typing work to completion
    fn finalize(&mut self) -> Result<(), TypingError>;

    /// Modules produced since the last call
    fn take_produced(&mut self) -> Vec<ModuleRef>;

    fn set_display_mode(&mut self, display: bool);
}
