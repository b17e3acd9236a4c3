//! Conversion between program fragments and runtime values.
//!
//! Fragments are encoded the way macro code sees them: expressions are
//! `{ expr, pos }` objects whose `expr` is an `ExprDef` enum value, positions
//! are `{ file, min, max }` objects, and every enum uses the constructor
//! names and indices of the `haxe.macro` declarations.
//!
//! Decoding is total. A decoder never stops at the first problem: it walks the
//! whole value and collects every mismatch together with the path at which it
//! was found, so a single report can list all of them.

use super::errors::MacroError;
use super::value::Value;
use crate::types::{FunArg, Path, Type};
use indexmap::IndexMap;
use parser::{
    walk_mut, Access, Binop, ComplexType, Constant, Expr, ExprKind, Field, FieldKind, Function,
    FunctionArg, FunctionKind, MetadataEntry, ObjectField, Position, StringQuotes, TypeDefKind,
    TypeDefinition, TypeParam, TypeParamDecl, TypePath, Unop, Var,
};
use std::fmt;

const EXPR_DEF: &str = "ExprDef";
const CONSTANT: &str = "Constant";
const BINOP: &str = "Binop";
const UNOP: &str = "Unop";
const COMPLEX_TYPE: &str = "ComplexType";
const TYPE_PARAM: &str = "TypeParam";
const FIELD_TYPE: &str = "FieldType";
const ACCESS: &str = "Access";
const FUNCTION_KIND: &str = "FunctionKind";
const TYPE_DEF_KIND: &str = "TypeDefKind";
const STRING_KIND: &str = "StringLiteralKind";
const QUOTE_STATUS: &str = "QuoteStatus";
const MACRO_TYPE: &str = "Type";

static NULL: Value = Value::Null;

const BINOPS: [&str; 25] = [
    "OpAdd",
    "OpMult",
    "OpDiv",
    "OpSub",
    "OpAssign",
    "OpEq",
    "OpNotEq",
    "OpGt",
    "OpGte",
    "OpLt",
    "OpLte",
    "OpAnd",
    "OpOr",
    "OpXor",
    "OpBoolAnd",
    "OpBoolOr",
    "OpShl",
    "OpShr",
    "OpUShr",
    "OpMod",
    "OpAssignOp",
    "OpInterval",
    "OpArrow",
    "OpIn",
    "OpNullCoal",
];

const UNOPS: [&str; 6] = [
    "OpIncrement",
    "OpDecrement",
    "OpNot",
    "OpNeg",
    "OpNegBits",
    "OpSpread",
];

const ACCESSES: [&str; 9] = [
    "APublic",
    "APrivate",
    "AStatic",
    "AOverride",
    "ADynamic",
    "AInline",
    "AMacro",
    "AFinal",
    "AExtern",
];

fn ctor(enum_name: &str, name: &str, index: usize, args: Vec<Value>) -> Value {
    Value::enum_value(enum_name, name, index, args)
}

fn opt<T>(value: Option<T>, encode: impl FnOnce(T) -> Value) -> Value {
    value.map(encode).unwrap_or(Value::Null)
}

fn array<T>(items: &[T], encode: impl Fn(&T) -> Value) -> Value {
    Value::Array(items.iter().map(encode).collect())
}

fn strings(items: &[String]) -> Value {
    array(items, |s| Value::string(s.as_str()))
}

// ---------------------------------------------------------------------------
// Encoding

pub fn encode_position(pos: Position) -> Value {
    let file = if pos.is_null() { -1 } else { pos.file_id as i64 };
    Value::object([
        ("file", Value::Int(file)),
        ("min", Value::Int(pos.min as i64)),
        ("max", Value::Int(pos.max as i64)),
    ])
}

pub fn encode_expr(expr: &Expr) -> Value {
    Value::object([
        ("expr", encode_expr_def(&expr.kind)),
        ("pos", encode_position(expr.pos)),
    ])
}

fn encode_exprs(exprs: &[Expr]) -> Value {
    array(exprs, encode_expr)
}

fn encode_expr_def(kind: &ExprKind) -> Value {
    let def = |name: &str, index: usize, args: Vec<Value>| ctor(EXPR_DEF, name, index, args);
    match kind {
        ExprKind::Const(c) => def("EConst", 0, vec![encode_constant(c)]),
        ExprKind::Array(a, b) => def("EArray", 1, vec![encode_expr(a), encode_expr(b)]),
        ExprKind::Binop(op, a, b) => def(
            "EBinop",
            2,
            vec![encode_binop(op), encode_expr(a), encode_expr(b)],
        ),
        ExprKind::Field(e, name) => def("EField", 3, vec![encode_expr(e), Value::string(name.as_str())]),
        ExprKind::Parenthesis(e) => def("EParenthesis", 4, vec![encode_expr(e)]),
        ExprKind::ObjectDecl(fields) => def("EObjectDecl", 5, vec![array(fields, encode_object_field)]),
        ExprKind::ArrayDecl(items) => def("EArrayDecl", 6, vec![encode_exprs(items)]),
        ExprKind::Call(callee, args) => def("ECall", 7, vec![encode_expr(callee), encode_exprs(args)]),
        ExprKind::New(tp, args) => def("ENew", 8, vec![encode_type_path(tp), encode_exprs(args)]),
        ExprKind::Unop(op, postfix, e) => def(
            "EUnop",
            9,
            vec![encode_unop(*op), Value::Bool(*postfix), encode_expr(e)],
        ),
        ExprKind::Vars(vars) => def("EVars", 10, vec![array(vars, encode_var)]),
        ExprKind::Function(kind, func) => def(
            "EFunction",
            11,
            vec![encode_function_kind(kind), encode_function(func)],
        ),
        ExprKind::Block(items) => def("EBlock", 12, vec![encode_exprs(items)]),
        ExprKind::For(it, body) => def("EFor", 13, vec![encode_expr(it), encode_expr(body)]),
        ExprKind::If(cond, then, otherwise) => def(
            "EIf",
            14,
            vec![
                encode_expr(cond),
                encode_expr(then),
                opt(otherwise.as_deref(), encode_expr),
            ],
        ),
        ExprKind::While(cond, body, normal) => def(
            "EWhile",
            15,
            vec![encode_expr(cond), encode_expr(body), Value::Bool(*normal)],
        ),
        ExprKind::Return(value) => def("EReturn", 18, vec![opt(value.as_deref(), encode_expr)]),
        ExprKind::Break => def("EBreak", 19, vec![]),
        ExprKind::Continue => def("EContinue", 20, vec![]),
        ExprKind::Untyped(e) => def("EUntyped", 21, vec![encode_expr(e)]),
        ExprKind::Throw(e) => def("EThrow", 22, vec![encode_expr(e)]),
        ExprKind::Cast(e, ty) => def(
            "ECast",
            23,
            vec![encode_expr(e), opt(ty.as_ref(), encode_complex_type)],
        ),
        ExprKind::Ternary(c, t, e) => def(
            "ETernary",
            25,
            vec![encode_expr(c), encode_expr(t), encode_expr(e)],
        ),
        ExprKind::CheckType(e, ty) => def(
            "ECheckType",
            26,
            vec![encode_expr(e), encode_complex_type(ty)],
        ),
        ExprKind::Meta(entry, e) => def("EMeta", 27, vec![encode_metadata(entry), encode_expr(e)]),
    }
}

fn encode_constant(c: &Constant) -> Value {
    match c {
        Constant::Int(v) => ctor(CONSTANT, "CInt", 0, vec![Value::string(v.as_str())]),
        Constant::Float(v) => ctor(CONSTANT, "CFloat", 1, vec![Value::string(v.as_str())]),
        Constant::String(s, quotes) => {
            let kind = match quotes {
                StringQuotes::Double => ctor(STRING_KIND, "DoubleQuotes", 0, vec![]),
                StringQuotes::Single => ctor(STRING_KIND, "SingleQuotes", 1, vec![]),
            };
            ctor(CONSTANT, "CString", 2, vec![Value::string(s.as_str()), kind])
        }
        Constant::Ident(name) => ctor(CONSTANT, "CIdent", 3, vec![Value::string(name.as_str())]),
        Constant::Regexp(pattern, flags) => ctor(
            CONSTANT,
            "CRegexp",
            4,
            vec![Value::string(pattern.as_str()), Value::string(flags.as_str())],
        ),
    }
}

fn binop_index(op: &Binop) -> usize {
    match op {
        Binop::Add => 0,
        Binop::Mult => 1,
        Binop::Div => 2,
        Binop::Sub => 3,
        Binop::Assign => 4,
        Binop::Eq => 5,
        Binop::NotEq => 6,
        Binop::Gt => 7,
        Binop::Gte => 8,
        Binop::Lt => 9,
        Binop::Lte => 10,
        Binop::And => 11,
        Binop::Or => 12,
        Binop::Xor => 13,
        Binop::BoolAnd => 14,
        Binop::BoolOr => 15,
        Binop::Shl => 16,
        Binop::Shr => 17,
        Binop::UShr => 18,
        Binop::Mod => 19,
        Binop::AssignOp(_) => 20,
        Binop::Interval => 21,
        Binop::Arrow => 22,
        Binop::In => 23,
        Binop::NullCoal => 24,
    }
}

fn encode_binop(op: &Binop) -> Value {
    let index = binop_index(op);
    let args = match op {
        Binop::AssignOp(inner) => vec![encode_binop(inner)],
        _ => vec![],
    };
    ctor(BINOP, BINOPS[index], index, args)
}

fn encode_unop(op: Unop) -> Value {
    let index = match op {
        Unop::Increment => 0,
        Unop::Decrement => 1,
        Unop::Not => 2,
        Unop::Neg => 3,
        Unop::NegBits => 4,
        Unop::Spread => 5,
    };
    ctor(UNOP, UNOPS[index], index, vec![])
}

fn encode_object_field(field: &ObjectField) -> Value {
    let quotes = if field.quoted {
        ctor(QUOTE_STATUS, "Quoted", 1, vec![])
    } else {
        ctor(QUOTE_STATUS, "Unquoted", 0, vec![])
    };
    Value::object([
        ("field", Value::string(field.field.as_str())),
        ("expr", encode_expr(&field.expr)),
        ("quotes", quotes),
    ])
}

fn encode_var(var: &Var) -> Value {
    Value::object([
        ("name", Value::string(var.name.as_str())),
        ("type", opt(var.ty.as_ref(), encode_complex_type)),
        ("expr", opt(var.expr.as_deref(), encode_expr)),
        ("isFinal", Value::Bool(var.is_final)),
        ("isStatic", Value::Bool(var.is_static)),
        ("meta", array(&var.meta, encode_metadata)),
    ])
}

fn encode_function_kind(kind: &FunctionKind) -> Value {
    match kind {
        FunctionKind::Anonymous => ctor(FUNCTION_KIND, "FAnonymous", 0, vec![]),
        FunctionKind::Named(name) => ctor(
            FUNCTION_KIND,
            "FNamed",
            1,
            vec![Value::string(name.as_str()), Value::Bool(false)],
        ),
        FunctionKind::Arrow => ctor(FUNCTION_KIND, "FArrow", 2, vec![]),
    }
}

fn encode_function_arg(arg: &FunctionArg) -> Value {
    Value::object([
        ("name", Value::string(arg.name.as_str())),
        ("opt", Value::Bool(arg.opt)),
        ("type", opt(arg.ty.as_ref(), encode_complex_type)),
        ("value", opt(arg.value.as_ref(), encode_expr)),
        ("meta", array(&arg.meta, encode_metadata)),
    ])
}

fn encode_function(func: &Function) -> Value {
    Value::object([
        ("args", array(&func.args, encode_function_arg)),
        ("ret", opt(func.ret.as_ref(), encode_complex_type)),
        ("expr", opt(func.expr.as_deref(), encode_expr)),
        ("params", array(&func.params, encode_type_param_decl)),
    ])
}

fn encode_type_param_decl(decl: &TypeParamDecl) -> Value {
    Value::object([
        ("name", Value::string(decl.name.as_str())),
        ("constraints", array(&decl.constraints, encode_complex_type)),
        ("params", array(&decl.params, encode_type_param_decl)),
        ("meta", array(&decl.meta, encode_metadata)),
    ])
}

pub fn encode_metadata(entry: &MetadataEntry) -> Value {
    Value::object([
        ("name", Value::string(entry.name.as_str())),
        ("params", encode_exprs(&entry.params)),
        ("pos", encode_position(entry.pos)),
    ])
}

pub fn encode_type_path(tp: &TypePath) -> Value {
    Value::object([
        ("pack", strings(&tp.pack)),
        ("name", Value::string(tp.name.as_str())),
        ("params", array(&tp.params, encode_type_param)),
        ("sub", opt(tp.sub.as_deref(), Value::string)),
    ])
}

fn encode_type_param(param: &TypeParam) -> Value {
    match param {
        TypeParam::Type(ct) => ctor(TYPE_PARAM, "TPType", 0, vec![encode_complex_type(ct)]),
        TypeParam::Expr(e) => ctor(TYPE_PARAM, "TPExpr", 1, vec![encode_expr(e)]),
    }
}

pub fn encode_complex_type(ct: &ComplexType) -> Value {
    match ct {
        ComplexType::Path(tp) => ctor(COMPLEX_TYPE, "TPath", 0, vec![encode_type_path(tp)]),
        ComplexType::Function(args, ret) => ctor(
            COMPLEX_TYPE,
            "TFunction",
            1,
            vec![array(args, encode_complex_type), encode_complex_type(ret)],
        ),
        ComplexType::Anonymous(fields) => ctor(
            COMPLEX_TYPE,
            "TAnonymous",
            2,
            vec![array(fields, encode_field)],
        ),
        ComplexType::Parent(inner) => ctor(COMPLEX_TYPE, "TParent", 3, vec![encode_complex_type(inner)]),
        ComplexType::Optional(inner) => {
            ctor(COMPLEX_TYPE, "TOptional", 5, vec![encode_complex_type(inner)])
        }
        ComplexType::Named(name, inner) => ctor(
            COMPLEX_TYPE,
            "TNamed",
            6,
            vec![Value::string(name.as_str()), encode_complex_type(inner)],
        ),
    }
}

fn encode_access(access: Access) -> Value {
    let index = match access {
        Access::Public => 0,
        Access::Private => 1,
        Access::Static => 2,
        Access::Override => 3,
        Access::Dynamic => 4,
        Access::Inline => 5,
        Access::Macro => 6,
        Access::Final => 7,
        Access::Extern => 8,
    };
    ctor(ACCESS, ACCESSES[index], index, vec![])
}

pub fn encode_field(field: &Field) -> Value {
    let kind = match &field.kind {
        FieldKind::Var(ty, init) => ctor(
            FIELD_TYPE,
            "FVar",
            0,
            vec![opt(ty.as_ref(), encode_complex_type), opt(init.as_ref(), encode_expr)],
        ),
        FieldKind::Fun(func) => ctor(FIELD_TYPE, "FFun", 1, vec![encode_function(func)]),
        FieldKind::Prop(get, set, ty, init) => ctor(
            FIELD_TYPE,
            "FProp",
            2,
            vec![
                Value::string(get.as_str()),
                Value::string(set.as_str()),
                opt(ty.as_ref(), encode_complex_type),
                opt(init.as_ref(), encode_expr),
            ],
        ),
    };
    Value::object([
        ("name", Value::string(field.name.as_str())),
        ("doc", opt(field.doc.as_deref(), Value::string)),
        ("access", array(&field.access, |a| encode_access(*a))),
        ("kind", kind),
        ("pos", encode_position(field.pos)),
        ("meta", array(&field.meta, encode_metadata)),
    ])
}

pub fn encode_type_def(def: &TypeDefinition) -> Value {
    let kind = match &def.kind {
        TypeDefKind::Enum => ctor(TYPE_DEF_KIND, "TDEnum", 0, vec![]),
        TypeDefKind::Structure => ctor(TYPE_DEF_KIND, "TDStructure", 1, vec![]),
        TypeDefKind::Class {
            super_class,
            interfaces,
            is_interface,
        } => ctor(
            TYPE_DEF_KIND,
            "TDClass",
            2,
            vec![
                opt(super_class.as_ref(), encode_type_path),
                array(interfaces, encode_type_path),
                Value::Bool(*is_interface),
            ],
        ),
        TypeDefKind::Alias(ct) => ctor(TYPE_DEF_KIND, "TDAlias", 3, vec![encode_complex_type(ct)]),
        TypeDefKind::Abstract(ct) => ctor(
            TYPE_DEF_KIND,
            "TDAbstract",
            4,
            vec![opt(ct.as_ref(), encode_complex_type)],
        ),
    };
    Value::object([
        ("pack", strings(&def.pack)),
        ("name", Value::string(def.name.as_str())),
        ("pos", encode_position(def.pos)),
        ("meta", array(&def.meta, encode_metadata)),
        ("params", array(&def.params, encode_type_param_decl)),
        ("isExtern", Value::Bool(def.is_extern)),
        ("kind", kind),
        ("fields", array(&def.fields, encode_field)),
    ])
}

fn encode_type_ref(path: &Path) -> Value {
    Value::object([
        ("pack", strings(&path.pack)),
        ("name", Value::string(path.name.as_str())),
    ])
}

/// Encode a typed-program type as a `haxe.macro.Type` value.
pub fn encode_type(ty: &Type) -> Value {
    let params = |ps: &[Type]| array(ps, encode_type);
    match ty {
        Type::Mono(id) => ctor(MACRO_TYPE, "TMono", 0, vec![Value::Int(*id as i64)]),
        Type::Enum(p, ps) => ctor(MACRO_TYPE, "TEnum", 1, vec![encode_type_ref(p), params(ps)]),
        Type::Inst(p, ps) => ctor(MACRO_TYPE, "TInst", 2, vec![encode_type_ref(p), params(ps)]),
        Type::Def(p, ps) => ctor(MACRO_TYPE, "TType", 3, vec![encode_type_ref(p), params(ps)]),
        Type::Fun(args, ret) => {
            let args = array(args, |a| {
                Value::object([
                    ("name", Value::string(a.name.as_str())),
                    ("opt", Value::Bool(a.opt)),
                    ("t", encode_type(&a.ty)),
                ])
            });
            ctor(MACRO_TYPE, "TFun", 4, vec![args, encode_type(ret)])
        }
        Type::Anon(fields) => {
            let fields = array(fields, |(name, t)| {
                Value::object([("name", Value::string(name.as_str())), ("type", encode_type(t))])
            });
            ctor(
                MACRO_TYPE,
                "TAnonymous",
                5,
                vec![Value::object([("fields", fields)])],
            )
        }
        Type::Dynamic => ctor(MACRO_TYPE, "TDynamic", 6, vec![Value::Null]),
        Type::Abstract(p, ps) => ctor(
            MACRO_TYPE,
            "TAbstract",
            8,
            vec![encode_type_ref(p), params(ps)],
        ),
    }
}

/// Rewrite every single-quoted string literal to a double-quoted one.
///
/// Single quotes mark interpolated strings; a fragment handed to macro code
/// must carry the literal text only.
pub fn normalize_quotes(expr: &Expr) -> Expr {
    let mut expr = expr.clone();
    walk_mut(&mut expr, &mut |e| {
        if let ExprKind::Const(Constant::String(_, quotes)) = &mut e.kind {
            *quotes = StringQuotes::Double;
        }
    });
    expr
}

// ---------------------------------------------------------------------------
// Decoding

/// One structural mismatch found while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeMismatch {
    /// Location inside the decoded value, e.g. `.expr.EBinop[1].pos`
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for DecodeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        write!(f, "at {}: expected {}, found {}", path, self.expected, self.found)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Enum(e) => format!("{}.{}", e.enum_name, e.constructor),
        Value::String(s) => format!("String \"{}\"", s),
        Value::Int(i) => format!("Int {}", i),
        other => other.type_name().to_string(),
    }
}

fn field<'v>(obj: &'v IndexMap<String, Value>, name: &str) -> &'v Value {
    obj.get(name).unwrap_or(&NULL)
}

struct Decoder {
    path: Vec<String>,
    errors: Vec<DecodeMismatch>,
}

impl Decoder {
    fn new() -> Self {
        Self {
            path: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn mismatch(&mut self, expected: impl Into<String>, found: impl Into<String>) {
        self.errors.push(DecodeMismatch {
            path: self.path.concat(),
            expected: expected.into(),
            found: found.into(),
        });
    }

    fn at<T>(
        &mut self,
        segment: impl Into<String>,
        value: Option<&Value>,
        decode: impl FnOnce(&mut Self, &Value) -> Option<T>,
    ) -> Option<T> {
        self.path.push(segment.into());
        let out = match value {
            Some(v) => decode(self, v),
            None => {
                self.mismatch("a value", "nothing");
                None
            }
        };
        self.path.pop();
        out
    }

    fn field<T>(
        &mut self,
        obj: &IndexMap<String, Value>,
        name: &str,
        decode: impl FnOnce(&mut Self, &Value) -> Option<T>,
    ) -> Option<T> {
        self.at(format!(".{}", name), Some(field(obj, name)), decode)
    }

    fn arg<T>(
        &mut self,
        ctor: &str,
        args: &[Value],
        index: usize,
        decode: impl FnOnce(&mut Self, &Value) -> Option<T>,
    ) -> Option<T> {
        self.at(format!(".{}[{}]", ctor, index), args.get(index), decode)
    }

    fn object<'v>(&mut self, value: &'v Value, expected: &str) -> Option<&'v IndexMap<String, Value>> {
        match value {
            Value::Object(obj) => Some(obj),
            other => {
                self.mismatch(expected, describe(other));
                None
            }
        }
    }

    fn enum_ctor<'v>(&mut self, value: &'v Value, enum_name: &str) -> Option<(&'v str, &'v [Value])> {
        match value {
            Value::Enum(e) if e.enum_name == enum_name => Some((e.constructor.as_str(), e.args.as_slice())),
            other => {
                self.mismatch(enum_name, describe(other));
                None
            }
        }
    }

    fn unknown_ctor<T>(&mut self, enum_name: &str, ctor: &str) -> Option<T> {
        self.mismatch(format!("a {} constructor", enum_name), ctor.to_string());
        None
    }

    fn optional<T>(
        &mut self,
        value: &Value,
        decode: impl FnOnce(&mut Self, &Value) -> Option<T>,
    ) -> Option<Option<T>> {
        match value {
            Value::Null => Some(None),
            v => decode(self, v).map(Some),
        }
    }

    fn array<T>(&mut self, value: &Value, decode: impl Fn(&mut Self, &Value) -> Option<T>) -> Option<Vec<T>> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                self.mismatch("Array", describe(other));
                return None;
            }
        };
        let mut out = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match self.at(format!("[{}]", i), Some(item), &decode) {
                Some(v) => out.push(v),
                None => ok = false,
            }
        }
        ok.then_some(out)
    }

    /// Arrays that macro code may leave as `null`
    fn array_or_null<T>(&mut self, value: &Value, decode: impl Fn(&mut Self, &Value) -> Option<T>) -> Option<Vec<T>> {
        match value {
            Value::Null => Some(Vec::new()),
            v => self.array(v, decode),
        }
    }

    fn string(&mut self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            other => {
                self.mismatch("String", describe(other));
                None
            }
        }
    }

    fn bool(&mut self, value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            other => {
                self.mismatch("Bool", describe(other));
                None
            }
        }
    }

    /// `Null<Bool>` fields default to false
    fn flag(&mut self, value: &Value) -> Option<bool> {
        match value {
            Value::Null => Some(false),
            v => self.bool(v),
        }
    }

    fn int(&mut self, value: &Value) -> Option<i64> {
        match value {
            Value::Int(i) => Some(*i),
            other => {
                self.mismatch("Int", describe(other));
                None
            }
        }
    }

    /// An `Int` that fits a position offset.
    fn offset(&mut self, value: &Value) -> Option<u32> {
        let i = self.int(value)?;
        match u32::try_from(i) {
            Ok(offset) => Some(offset),
            Err(_) => {
                self.mismatch("Position offset", i.to_string());
                None
            }
        }
    }

    fn position(&mut self, value: &Value) -> Option<Position> {
        if value.is_null() {
            return Some(Position::null());
        }
        let obj = self.object(value, "Position")?;
        let file = self.field(obj, "file", |d, v| match d.int(v)? {
            // Negative file ids mark a null position
            id if id < 0 => Some(u32::MAX),
            _ => d.offset(v),
        });
        let min = self.field(obj, "min", Decoder::offset);
        let max = self.field(obj, "max", Decoder::offset);
        Some(Position::new(file?, min?, max?))
    }

    fn expr(&mut self, value: &Value) -> Option<Expr> {
        let obj = self.object(value, "Expr")?;
        let kind = self.field(obj, "expr", Decoder::expr_def);
        let pos = self.field(obj, "pos", Decoder::position);
        Some(Expr::new(kind?, pos?))
    }

    fn opt_expr(&mut self, value: &Value) -> Option<Option<Expr>> {
        self.optional(value, Decoder::expr)
    }

    fn exprs(&mut self, value: &Value) -> Option<Vec<Expr>> {
        self.array(value, Decoder::expr)
    }

    fn expr_def(&mut self, value: &Value) -> Option<ExprKind> {
        let (name, args) = self.enum_ctor(value, EXPR_DEF)?;
        let boxed = |d: &mut Decoder, i: usize| d.arg(name, args, i, Decoder::expr).map(Box::new);
        let kind = match name {
            "EConst" => ExprKind::Const(self.arg(name, args, 0, Decoder::constant)?),
            "EArray" => {
                let (a, b) = (boxed(self, 0), boxed(self, 1));
                ExprKind::Array(a?, b?)
            }
            "EBinop" => {
                let op = self.arg(name, args, 0, Decoder::binop);
                let (a, b) = (boxed(self, 1), boxed(self, 2));
                ExprKind::Binop(op?, a?, b?)
            }
            "EField" => {
                let e = boxed(self, 0);
                let field = self.arg(name, args, 1, Decoder::string);
                ExprKind::Field(e?, field?)
            }
            "EParenthesis" => ExprKind::Parenthesis(boxed(self, 0)?),
            "EObjectDecl" => {
                ExprKind::ObjectDecl(self.arg(name, args, 0, |d, v| d.array(v, Decoder::object_field))?)
            }
            "EArrayDecl" => ExprKind::ArrayDecl(self.arg(name, args, 0, Decoder::exprs)?),
            "ECall" => {
                let callee = boxed(self, 0);
                let call_args = self.arg(name, args, 1, Decoder::exprs);
                ExprKind::Call(callee?, call_args?)
            }
            "ENew" => {
                let tp = self.arg(name, args, 0, Decoder::type_path);
                let call_args = self.arg(name, args, 1, Decoder::exprs);
                ExprKind::New(tp?, call_args?)
            }
            "EUnop" => {
                let op = self.arg(name, args, 0, Decoder::unop);
                let postfix = self.arg(name, args, 1, Decoder::bool);
                let e = boxed(self, 2);
                ExprKind::Unop(op?, postfix?, e?)
            }
            "EVars" => ExprKind::Vars(self.arg(name, args, 0, |d, v| d.array(v, Decoder::var))?),
            "EFunction" => {
                let kind = self.arg(name, args, 0, Decoder::function_kind);
                let func = self.arg(name, args, 1, Decoder::function);
                ExprKind::Function(kind?, func?)
            }
            "EBlock" => ExprKind::Block(self.arg(name, args, 0, Decoder::exprs)?),
            "EFor" => {
                let (it, body) = (boxed(self, 0), boxed(self, 1));
                ExprKind::For(it?, body?)
            }
            "EIf" => {
                let (cond, then) = (boxed(self, 0), boxed(self, 1));
                let otherwise = self.arg(name, args, 2, Decoder::opt_expr);
                ExprKind::If(cond?, then?, otherwise?.map(Box::new))
            }
            "EWhile" => {
                let (cond, body) = (boxed(self, 0), boxed(self, 1));
                let normal = self.arg(name, args, 2, Decoder::bool);
                ExprKind::While(cond?, body?, normal?)
            }
            "EReturn" => {
                let value = args.first().unwrap_or(&NULL);
                let e = self.at(".EReturn[0]", Some(value), Decoder::opt_expr)?;
                ExprKind::Return(e.map(Box::new))
            }
            "EBreak" => ExprKind::Break,
            "EContinue" => ExprKind::Continue,
            "EUntyped" => ExprKind::Untyped(boxed(self, 0)?),
            "EThrow" => ExprKind::Throw(boxed(self, 0)?),
            "ECast" => {
                let e = boxed(self, 0);
                let ty = args.get(1).unwrap_or(&NULL);
                let ty = self.at(".ECast[1]", Some(ty), |d, v| d.optional(v, Decoder::complex_type));
                ExprKind::Cast(e?, ty?)
            }
            "ETernary" => {
                let (c, t, e) = (boxed(self, 0), boxed(self, 1), boxed(self, 2));
                ExprKind::Ternary(c?, t?, e?)
            }
            "ECheckType" => {
                let e = boxed(self, 0);
                let ty = self.arg(name, args, 1, Decoder::complex_type);
                ExprKind::CheckType(e?, ty?)
            }
            "EMeta" => {
                let entry = self.arg(name, args, 0, Decoder::metadata);
                let e = boxed(self, 1);
                ExprKind::Meta(entry?, e?)
            }
            other => return self.unknown_ctor(EXPR_DEF, other),
        };
        Some(kind)
    }

    fn constant(&mut self, value: &Value) -> Option<Constant> {
        let (name, args) = self.enum_ctor(value, CONSTANT)?;
        let c = match name {
            "CInt" => Constant::Int(self.arg(name, args, 0, Decoder::string)?),
            "CFloat" => Constant::Float(self.arg(name, args, 0, Decoder::string)?),
            "CString" => {
                let s = self.arg(name, args, 0, Decoder::string);
                let kind = args.get(1).unwrap_or(&NULL);
                let quotes = self.at(".CString[1]", Some(kind), Decoder::string_kind);
                Constant::String(s?, quotes?)
            }
            "CIdent" => Constant::Ident(self.arg(name, args, 0, Decoder::string)?),
            "CRegexp" => {
                let pattern = self.arg(name, args, 0, Decoder::string);
                let flags = self.arg(name, args, 1, Decoder::string);
                Constant::Regexp(pattern?, flags?)
            }
            other => return self.unknown_ctor(CONSTANT, other),
        };
        Some(c)
    }

    fn string_kind(&mut self, value: &Value) -> Option<StringQuotes> {
        if value.is_null() {
            return Some(StringQuotes::Double);
        }
        match self.enum_ctor(value, STRING_KIND)? {
            ("DoubleQuotes", _) => Some(StringQuotes::Double),
            ("SingleQuotes", _) => Some(StringQuotes::Single),
            (other, _) => self.unknown_ctor(STRING_KIND, other),
        }
    }

    fn binop(&mut self, value: &Value) -> Option<Binop> {
        let (name, args) = self.enum_ctor(value, BINOP)?;
        let op = match name {
            "OpAdd" => Binop::Add,
            "OpMult" => Binop::Mult,
            "OpDiv" => Binop::Div,
            "OpSub" => Binop::Sub,
            "OpAssign" => Binop::Assign,
            "OpEq" => Binop::Eq,
            "OpNotEq" => Binop::NotEq,
            "OpGt" => Binop::Gt,
            "OpGte" => Binop::Gte,
            "OpLt" => Binop::Lt,
            "OpLte" => Binop::Lte,
            "OpAnd" => Binop::And,
            "OpOr" => Binop::Or,
            "OpXor" => Binop::Xor,
            "OpBoolAnd" => Binop::BoolAnd,
            "OpBoolOr" => Binop::BoolOr,
            "OpShl" => Binop::Shl,
            "OpShr" => Binop::Shr,
            "OpUShr" => Binop::UShr,
            "OpMod" => Binop::Mod,
            "OpAssignOp" => Binop::AssignOp(Box::new(self.arg(name, args, 0, Decoder::binop)?)),
            "OpInterval" => Binop::Interval,
            "OpArrow" => Binop::Arrow,
            "OpIn" => Binop::In,
            "OpNullCoal" => Binop::NullCoal,
            other => return self.unknown_ctor(BINOP, other),
        };
        Some(op)
    }

    fn unop(&mut self, value: &Value) -> Option<Unop> {
        let (name, _) = self.enum_ctor(value, UNOP)?;
        let op = match name {
            "OpIncrement" => Unop::Increment,
            "OpDecrement" => Unop::Decrement,
            "OpNot" => Unop::Not,
            "OpNeg" => Unop::Neg,
            "OpNegBits" => Unop::NegBits,
            "OpSpread" => Unop::Spread,
            other => return self.unknown_ctor(UNOP, other),
        };
        Some(op)
    }

    fn object_field(&mut self, value: &Value) -> Option<ObjectField> {
        let obj = self.object(value, "ObjectField")?;
        let name = self.field(obj, "field", Decoder::string);
        let expr = self.field(obj, "expr", Decoder::expr);
        let quoted = self.field(obj, "quotes", |d, v| {
            if v.is_null() {
                return Some(false);
            }
            match d.enum_ctor(v, QUOTE_STATUS)? {
                ("Unquoted", _) => Some(false),
                ("Quoted", _) => Some(true),
                (other, _) => d.unknown_ctor(QUOTE_STATUS, other),
            }
        });
        Some(ObjectField {
            field: name?,
            expr: expr?,
            quoted: quoted?,
        })
    }

    fn var(&mut self, value: &Value) -> Option<Var> {
        let obj = self.object(value, "Var")?;
        let name = self.field(obj, "name", Decoder::string);
        let ty = self.field(obj, "type", |d, v| d.optional(v, Decoder::complex_type));
        let expr = self.field(obj, "expr", Decoder::opt_expr);
        let is_final = self.field(obj, "isFinal", Decoder::flag);
        let is_static = self.field(obj, "isStatic", Decoder::flag);
        let meta = self.field(obj, "meta", |d, v| d.array_or_null(v, Decoder::metadata));
        Some(Var {
            name: name?,
            ty: ty?,
            expr: expr?.map(Box::new),
            is_final: is_final?,
            is_static: is_static?,
            meta: meta?,
        })
    }

    fn function_kind(&mut self, value: &Value) -> Option<FunctionKind> {
        if value.is_null() {
            return Some(FunctionKind::Anonymous);
        }
        let (name, args) = self.enum_ctor(value, FUNCTION_KIND)?;
        match name {
            "FAnonymous" => Some(FunctionKind::Anonymous),
            "FNamed" => Some(FunctionKind::Named(self.arg(name, args, 0, Decoder::string)?)),
            "FArrow" => Some(FunctionKind::Arrow),
            other => self.unknown_ctor(FUNCTION_KIND, other),
        }
    }

    fn function_arg(&mut self, value: &Value) -> Option<FunctionArg> {
        let obj = self.object(value, "FunctionArg")?;
        let name = self.field(obj, "name", Decoder::string);
        let opt = self.field(obj, "opt", Decoder::flag);
        let ty = self.field(obj, "type", |d, v| d.optional(v, Decoder::complex_type));
        let default = self.field(obj, "value", Decoder::opt_expr);
        let meta = self.field(obj, "meta", |d, v| d.array_or_null(v, Decoder::metadata));
        Some(FunctionArg {
            name: name?,
            opt: opt?,
            ty: ty?,
            value: default?,
            meta: meta?,
        })
    }

    fn function(&mut self, value: &Value) -> Option<Function> {
        let obj = self.object(value, "Function")?;
        let args = self.field(obj, "args", |d, v| d.array(v, Decoder::function_arg));
        let ret = self.field(obj, "ret", |d, v| d.optional(v, Decoder::complex_type));
        let expr = self.field(obj, "expr", Decoder::opt_expr);
        let params = self.field(obj, "params", |d, v| d.array_or_null(v, Decoder::type_param_decl));
        Some(Function {
            args: args?,
            ret: ret?,
            expr: expr?.map(Box::new),
            params: params?,
        })
    }

    fn type_param_decl(&mut self, value: &Value) -> Option<TypeParamDecl> {
        let obj = self.object(value, "TypeParamDecl")?;
        let name = self.field(obj, "name", Decoder::string);
        let constraints = self.field(obj, "constraints", |d, v| d.array_or_null(v, Decoder::complex_type));
        let params = self.field(obj, "params", |d, v| d.array_or_null(v, Decoder::type_param_decl));
        let meta = self.field(obj, "meta", |d, v| d.array_or_null(v, Decoder::metadata));
        Some(TypeParamDecl {
            name: name?,
            constraints: constraints?,
            params: params?,
            meta: meta?,
        })
    }

    fn metadata(&mut self, value: &Value) -> Option<MetadataEntry> {
        let obj = self.object(value, "MetadataEntry")?;
        let name = self.field(obj, "name", Decoder::string);
        let params = self.field(obj, "params", |d, v| d.array_or_null(v, Decoder::expr));
        let pos = self.field(obj, "pos", Decoder::position);
        Some(MetadataEntry {
            name: name?,
            params: params?,
            pos: pos?,
        })
    }

    fn strings(&mut self, value: &Value) -> Option<Vec<String>> {
        self.array(value, Decoder::string)
    }

    fn type_path(&mut self, value: &Value) -> Option<TypePath> {
        let obj = self.object(value, "TypePath")?;
        let pack = self.field(obj, "pack", Decoder::strings);
        let name = self.field(obj, "name", Decoder::string);
        let params = self.field(obj, "params", |d, v| d.array_or_null(v, Decoder::type_param));
        let sub = self.field(obj, "sub", |d, v| d.optional(v, Decoder::string));
        Some(TypePath {
            pack: pack?,
            name: name?,
            params: params?,
            sub: sub?,
        })
    }

    fn type_param(&mut self, value: &Value) -> Option<TypeParam> {
        let (name, args) = self.enum_ctor(value, TYPE_PARAM)?;
        match name {
            "TPType" => Some(TypeParam::Type(self.arg(name, args, 0, Decoder::complex_type)?)),
            "TPExpr" => Some(TypeParam::Expr(self.arg(name, args, 0, Decoder::expr)?)),
            other => self.unknown_ctor(TYPE_PARAM, other),
        }
    }

    fn complex_type(&mut self, value: &Value) -> Option<ComplexType> {
        let (name, args) = self.enum_ctor(value, COMPLEX_TYPE)?;
        let boxed = |d: &mut Decoder, i: usize| d.arg(name, args, i, Decoder::complex_type).map(Box::new);
        let ct = match name {
            "TPath" => ComplexType::Path(self.arg(name, args, 0, Decoder::type_path)?),
            "TFunction" => {
                let params = self.arg(name, args, 0, |d, v| d.array(v, Decoder::complex_type));
                let ret = boxed(self, 1);
                ComplexType::Function(params?, ret?)
            }
            "TAnonymous" => ComplexType::Anonymous(self.arg(name, args, 0, |d, v| d.array(v, Decoder::field_decl))?),
            "TParent" => ComplexType::Parent(boxed(self, 0)?),
            "TOptional" => ComplexType::Optional(boxed(self, 0)?),
            "TNamed" => {
                let n = self.arg(name, args, 0, Decoder::string);
                let inner = boxed(self, 1);
                ComplexType::Named(n?, inner?)
            }
            other => return self.unknown_ctor(COMPLEX_TYPE, other),
        };
        Some(ct)
    }

    fn access(&mut self, value: &Value) -> Option<Access> {
        let (name, _) = self.enum_ctor(value, ACCESS)?;
        let access = match name {
            "APublic" => Access::Public,
            "APrivate" => Access::Private,
            "AStatic" => Access::Static,
            "AOverride" => Access::Override,
            "ADynamic" => Access::Dynamic,
            "AInline" => Access::Inline,
            "AMacro" => Access::Macro,
            "AFinal" => Access::Final,
            "AExtern" => Access::Extern,
            other => return self.unknown_ctor(ACCESS, other),
        };
        Some(access)
    }

    fn field_kind(&mut self, value: &Value) -> Option<FieldKind> {
        let (name, args) = self.enum_ctor(value, FIELD_TYPE)?;
        let opt_type = |d: &mut Decoder, i: usize| {
            let v = args.get(i).unwrap_or(&NULL);
            d.at(format!(".{}[{}]", name, i), Some(v), |d, v| d.optional(v, Decoder::complex_type))
        };
        let opt_expr = |d: &mut Decoder, i: usize| {
            let v = args.get(i).unwrap_or(&NULL);
            d.at(format!(".{}[{}]", name, i), Some(v), Decoder::opt_expr)
        };
        let kind = match name {
            "FVar" => {
                let ty = opt_type(self, 0);
                let init = opt_expr(self, 1);
                FieldKind::Var(ty?, init?)
            }
            "FFun" => FieldKind::Fun(self.arg(name, args, 0, Decoder::function)?),
            "FProp" => {
                let get = self.arg(name, args, 0, Decoder::string);
                let set = self.arg(name, args, 1, Decoder::string);
                let ty = opt_type(self, 2);
                let init = opt_expr(self, 3);
                FieldKind::Prop(get?, set?, ty?, init?)
            }
            other => return self.unknown_ctor(FIELD_TYPE, other),
        };
        Some(kind)
    }

    fn field_decl(&mut self, value: &Value) -> Option<Field> {
        let obj = self.object(value, "Field")?;
        let name = self.field(obj, "name", Decoder::string);
        let doc = self.field(obj, "doc", |d, v| d.optional(v, Decoder::string));
        let access = self.field(obj, "access", |d, v| d.array_or_null(v, Decoder::access));
        let kind = self.field(obj, "kind", Decoder::field_kind);
        let pos = self.field(obj, "pos", Decoder::position);
        let meta = self.field(obj, "meta", |d, v| d.array_or_null(v, Decoder::metadata));
        Some(Field {
            name: name?,
            doc: doc?,
            access: access?,
            kind: kind?,
            pos: pos?,
            meta: meta?,
        })
    }

    fn type_def_kind(&mut self, value: &Value) -> Option<TypeDefKind> {
        let (name, args) = self.enum_ctor(value, TYPE_DEF_KIND)?;
        let kind = match name {
            "TDEnum" => TypeDefKind::Enum,
            "TDStructure" => TypeDefKind::Structure,
            "TDClass" => {
                let get = |i: usize| args.get(i).unwrap_or(&NULL);
                let super_class = self.at(".TDClass[0]", Some(get(0)), |d, v| d.optional(v, Decoder::type_path));
                let interfaces = self.at(".TDClass[1]", Some(get(1)), |d, v| d.array_or_null(v, Decoder::type_path));
                let is_interface = self.at(".TDClass[2]", Some(get(2)), Decoder::flag);
                TypeDefKind::Class {
                    super_class: super_class?,
                    interfaces: interfaces?,
                    is_interface: is_interface?,
                }
            }
            "TDAlias" => TypeDefKind::Alias(self.arg(name, args, 0, Decoder::complex_type)?),
            "TDAbstract" => {
                let v = args.first().unwrap_or(&NULL);
                TypeDefKind::Abstract(self.at(".TDAbstract[0]", Some(v), |d, v| d.optional(v, Decoder::complex_type))?)
            }
            other => return self.unknown_ctor(TYPE_DEF_KIND, other),
        };
        Some(kind)
    }

    fn type_def(&mut self, value: &Value) -> Option<TypeDefinition> {
        let obj = self.object(value, "TypeDefinition")?;
        let pack = self.field(obj, "pack", Decoder::strings);
        let name = self.field(obj, "name", Decoder::string);
        let pos = self.field(obj, "pos", Decoder::position);
        let meta = self.field(obj, "meta", |d, v| d.array_or_null(v, Decoder::metadata));
        let params = self.field(obj, "params", |d, v| d.array_or_null(v, Decoder::type_param_decl));
        let is_extern = self.field(obj, "isExtern", Decoder::flag);
        let kind = self.field(obj, "kind", Decoder::type_def_kind);
        let fields = self.field(obj, "fields", |d, v| d.array(v, Decoder::field_decl));
        Some(TypeDefinition {
            pack: pack?,
            name: name?,
            pos: pos?,
            meta: meta?,
            params: params?,
            is_extern: is_extern?,
            kind: kind?,
            fields: fields?,
        })
    }

    fn type_ref(&mut self, value: &Value) -> Option<Path> {
        let obj = self.object(value, "type reference")?;
        let pack = self.field(obj, "pack", Decoder::strings);
        let name = self.field(obj, "name", Decoder::string);
        Some(Path {
            pack: pack?,
            name: name?,
        })
    }

    fn macro_type(&mut self, value: &Value) -> Option<Type> {
        let (name, args) = self.enum_ctor(value, MACRO_TYPE)?;
        let named = |d: &mut Decoder| -> Option<(Path, Vec<Type>)> {
            let path = d.arg(name, args, 0, Decoder::type_ref);
            let params = d.arg(name, args, 1, |d, v| d.array(v, Decoder::macro_type));
            Some((path?, params?))
        };
        let ty = match name {
            "TMono" => Type::Mono(self.arg(name, args, 0, Decoder::int)? as u32),
            "TEnum" => {
                let (p, ps) = named(self)?;
                Type::Enum(p, ps)
            }
            "TInst" => {
                let (p, ps) = named(self)?;
                Type::Inst(p, ps)
            }
            "TType" => {
                let (p, ps) = named(self)?;
                Type::Def(p, ps)
            }
            "TAbstract" => {
                let (p, ps) = named(self)?;
                Type::Abstract(p, ps)
            }
            "TFun" => {
                let fun_args = self.arg(name, args, 0, |d, v| {
                    d.array(v, |d, v| {
                        let obj = d.object(v, "function argument")?;
                        let n = d.field(obj, "name", Decoder::string);
                        let o = d.field(obj, "opt", Decoder::flag);
                        let t = d.field(obj, "t", Decoder::macro_type);
                        Some(FunArg {
                            name: n?,
                            opt: o?,
                            ty: t?,
                        })
                    })
                });
                let ret = self.arg(name, args, 1, Decoder::macro_type);
                Type::Fun(fun_args?, Box::new(ret?))
            }
            "TAnonymous" => {
                let fields = self.arg(name, args, 0, |d, v| {
                    let obj = d.object(v, "AnonType")?;
                    d.field(obj, "fields", |d, v| {
                        d.array(v, |d, v| {
                            let obj = d.object(v, "ClassField")?;
                            let n = d.field(obj, "name", Decoder::string);
                            let t = d.field(obj, "type", Decoder::macro_type);
                            Some((n?, t?))
                        })
                    })
                });
                Type::Anon(fields?)
            }
            "TDynamic" => Type::Dynamic,
            other => return self.unknown_ctor(MACRO_TYPE, other),
        };
        Some(ty)
    }
}

fn run<T>(
    value: &Value,
    expected: &str,
    decode: impl FnOnce(&mut Decoder, &Value) -> Option<T>,
) -> Result<T, Vec<DecodeMismatch>> {
    let mut decoder = Decoder::new();
    match decode(&mut decoder, value) {
        Some(out) if decoder.errors.is_empty() => Ok(out),
        _ => {
            if decoder.errors.is_empty() {
                decoder.mismatch(expected, describe(value));
            }
            Err(decoder.errors)
        }
    }
}

pub type DecodeResult<T> = Result<T, Vec<DecodeMismatch>>;

pub fn decode_expr(value: &Value) -> DecodeResult<Expr> {
    run(value, "Expr", Decoder::expr)
}

pub fn decode_field(value: &Value) -> DecodeResult<Field> {
    run(value, "Field", Decoder::field_decl)
}

pub fn decode_fields(value: &Value) -> DecodeResult<Vec<Field>> {
    run(value, "Array<Field>", |d, v| d.array(v, Decoder::field_decl))
}

pub fn decode_complex_type(value: &Value) -> DecodeResult<ComplexType> {
    run(value, "ComplexType", Decoder::complex_type)
}

pub fn decode_type_def(value: &Value) -> DecodeResult<TypeDefinition> {
    run(value, "TypeDefinition", Decoder::type_def)
}

pub fn decode_type(value: &Value) -> DecodeResult<Type> {
    run(value, "Type", Decoder::macro_type)
}

pub fn decode_position(value: &Value) -> DecodeResult<Position> {
    run(value, "Position", Decoder::position)
}

pub fn decode_metadata(value: &Value) -> DecodeResult<MetadataEntry> {
    run(value, "MetadataEntry", Decoder::metadata)
}

pub fn decode_string(value: &Value) -> DecodeResult<String> {
    run(value, "String", Decoder::string)
}

// ---------------------------------------------------------------------------
// Constant folding

fn not_constant(pos: Position) -> MacroError {
    MacroError::ArgumentType {
        message: "Argument should be a constant".to_string(),
        pos,
    }
}

fn parse_int(text: &str) -> Option<i64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Convert a constant expression directly to a runtime value.
///
/// Literals, array and object literals, unary minus/not and binary operators
/// over constants are accepted; anything else is an argument error.
pub fn const_value(expr: &Expr) -> Result<Value, MacroError> {
    match &expr.kind {
        ExprKind::Const(Constant::Int(text)) => match parse_int(text) {
            Some(i) => Ok(Value::Int(i)),
            None => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| not_constant(expr.pos)),
        },
        ExprKind::Const(Constant::Float(text)) => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| not_constant(expr.pos)),
        ExprKind::Const(Constant::String(s, _)) => Ok(Value::string(s.as_str())),
        ExprKind::Const(Constant::Ident(name)) => match name.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" => Ok(Value::Null),
            _ => Err(not_constant(expr.pos)),
        },
        ExprKind::Parenthesis(inner) => const_value(inner),
        ExprKind::ArrayDecl(items) => items
            .iter()
            .map(const_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ExprKind::ObjectDecl(fields) => {
            let mut out = IndexMap::new();
            for field in fields {
                out.insert(field.field.clone(), const_value(&field.expr)?);
            }
            Ok(Value::Object(out))
        }
        ExprKind::Unop(op, false, inner) => {
            let v = const_value(inner)?;
            match (op, v) {
                (Unop::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                (Unop::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (Unop::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (Unop::NegBits, Value::Int(i)) => Ok(Value::Int(!i)),
                _ => Err(not_constant(expr.pos)),
            }
        }
        ExprKind::Binop(op, left, right) => {
            let l = const_value(left)?;
            let r = const_value(right)?;
            apply_binary_op(op, &l, &r, expr.pos)
        }
        _ => Err(not_constant(expr.pos)),
    }
}

fn type_error(message: String, pos: Position) -> MacroError {
    MacroError::ArgumentType { message, pos }
}

/// Apply a binary operator to two constant values.
pub fn apply_binary_op(op: &Binop, left: &Value, right: &Value, pos: Position) -> Result<Value, MacroError> {
    use std::cmp::Ordering;
    match op {
        Binop::Add => apply_add(left, right, pos),
        Binop::Sub => apply_numeric_op(left, right, |a, b| a.wrapping_sub(b), |a, b| a - b, pos),
        Binop::Mult => apply_numeric_op(left, right, |a, b| a.wrapping_mul(b), |a, b| a * b, pos),
        // Division always produces a Float
        Binop::Div => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(a / b)),
            _ => Err(type_error(
                format!("cannot divide {} by {}", left.type_name(), right.type_name()),
                pos,
            )),
        },
        Binop::Mod => match right {
            Value::Int(0) => Err(type_error("Division by zero".to_string(), pos)),
            _ => apply_numeric_op(left, right, |a, b| a % b, |a, b| a % b, pos),
        },
        Binop::Eq => Ok(Value::Bool(left == right)),
        Binop::NotEq => Ok(Value::Bool(left != right)),
        Binop::Lt => compare_values(left, right, |o| o == Ordering::Less, pos),
        Binop::Lte => compare_values(left, right, |o| o != Ordering::Greater, pos),
        Binop::Gt => compare_values(left, right, |o| o == Ordering::Greater, pos),
        Binop::Gte => compare_values(left, right, |o| o != Ordering::Less, pos),
        Binop::BoolAnd => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        Binop::BoolOr => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        Binop::And => apply_int_op(left, right, |a, b| a & b, pos),
        Binop::Or => apply_int_op(left, right, |a, b| a | b, pos),
        Binop::Xor => apply_int_op(left, right, |a, b| a ^ b, pos),
        Binop::Shl => apply_int_op(left, right, |a, b| a.wrapping_shl(b as u32), pos),
        Binop::Shr => apply_int_op(left, right, |a, b| a.wrapping_shr(b as u32), pos),
        Binop::UShr => apply_int_op(left, right, |a, b| ((a as u64) >> (b as u64 & 63)) as i64, pos),
        Binop::Interval => match (left.as_int(), right.as_int()) {
            (Some(start), Some(end)) => Ok(Value::Array((start..end).map(Value::Int).collect())),
            _ => Err(type_error("interval bounds must be Int".to_string(), pos)),
        },
        Binop::NullCoal => Ok(if left.is_null() { right.clone() } else { left.clone() }),
        other => Err(MacroError::unsupported(
            format!("binary operator {}", other.symbol()),
            pos,
        )),
    }
}

fn apply_add(left: &Value, right: &Value, pos: Position) -> Result<Value, MacroError> {
    match (left, right) {
        (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
        (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        _ => Err(type_error(
            format!("cannot add {} and {}", left.type_name(), right.type_name()),
            pos,
        )),
    }
}

fn apply_numeric_op(
    left: &Value,
    right: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
    pos: Position,
) -> Result<Value, MacroError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(type_error(
            format!(
                "arithmetic operation requires numeric types, found {} and {}",
                left.type_name(),
                right.type_name()
            ),
            pos,
        )),
    }
}

fn apply_int_op(left: &Value, right: &Value, op: impl Fn(i64, i64) -> i64, pos: Position) -> Result<Value, MacroError> {
    match (left.as_int(), right.as_int()) {
        (Some(a), Some(b)) => Ok(Value::Int(op(a, b))),
        _ => Err(type_error(
            format!(
                "bitwise operation requires Int, found {} and {}",
                left.type_name(),
                right.type_name()
            ),
            pos,
        )),
    }
}

fn compare_values(
    left: &Value,
    right: &Value,
    pred: impl Fn(std::cmp::Ordering) -> bool,
    pos: Position,
) -> Result<Value, MacroError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            _ => {
                return Err(type_error(
                    format!("cannot compare {} and {}", left.type_name(), right.type_name()),
                    pos,
                ))
            }
        },
    };
    Ok(Value::Bool(pred(ordering)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::{parse_complex_type, parse_expr};

    fn pos() -> Position {
        Position::new(1, 10, 20)
    }

    fn parse(text: &str) -> Expr {
        parse_expr(text, pos()).expect("fragment should parse")
    }

    #[test]
    fn test_expression_round_trip() {
        let expr = parse("if (a > 1) foo(b, [1, 2.5], { x : 'y' }) else throw new Error(\"no\")");
        let decoded = decode_expr(&encode_expr(&expr)).expect("decode");
        assert_eq!(decoded, expr);
    }

    #[test]
    fn test_function_and_vars_round_trip() {
        let expr = parse("function add(a : Int, ?b = 2) : Int { var c = a + b; return c; }");
        assert_eq!(decode_expr(&encode_expr(&expr)), Ok(expr));
    }

    #[test]
    fn test_complex_type_round_trip() {
        let ct = parse_complex_type("{ name : String, ?age : Int } -> Array<haxe.macro.Expr>", pos())
            .expect("type should parse");
        assert_eq!(decode_complex_type(&encode_complex_type(&ct)), Ok(ct));
    }

    #[test]
    fn test_expr_def_indices() {
        let v = encode_expr(&parse("1 + 2"));
        let def = v.as_object().and_then(|o| o.get("expr")).cloned();
        match def {
            Some(Value::Enum(e)) => {
                assert_eq!(e.constructor, "EBinop");
                assert_eq!(e.index, 2);
                assert!(matches!(&e.args[0], Value::Enum(op) if op.constructor == "OpAdd" && op.index == 0));
            }
            other => panic!("unexpected encoding {:?}", other),
        }
    }

    #[test]
    fn test_null_position_encoding() {
        let v = encode_position(Position::null());
        assert_eq!(v.as_object().and_then(|o| o.get("file")), Some(&Value::Int(-1)));
        assert_eq!(decode_position(&v), Ok(Position::null()));
    }

    #[test]
    fn test_position_offsets_out_of_range() {
        let v = Value::object([
            ("file", Value::Int(0)),
            ("min", Value::Int(-5)),
            ("max", Value::Int(1 << 33)),
        ]);
        let errors = decode_position(&v).expect_err("offsets must fit");
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec![".min", ".max"]);
        assert_eq!(errors[0].expected, "Position offset");
        assert_eq!(errors[0].found, "-5");

        let v = Value::object([
            ("file", Value::Int(1 << 40)),
            ("min", Value::Int(0)),
            ("max", Value::Int(1)),
        ]);
        assert!(decode_position(&v).is_err());
    }

    #[test]
    fn test_decode_collects_every_mismatch() {
        let bad = Value::object([
            (
                "expr",
                Value::enum_value(
                    EXPR_DEF,
                    "EBinop",
                    2,
                    vec![
                        Value::Int(0),
                        Value::string("left"),
                        encode_expr(&Expr::int(1, Position::null())),
                    ],
                ),
            ),
            ("pos", Value::Bool(true)),
        ]);
        let errors = decode_expr(&bad).expect_err("decode must fail");
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec![".expr.EBinop[0]", ".expr.EBinop[1]", ".pos"]);
        assert_eq!(errors[1].expected, "Expr");
    }

    #[test]
    fn test_unknown_constructor() {
        let bad = Value::enum_value(CONSTANT, "CBogus", 9, vec![]);
        let errors = decode_complex_type(&bad).expect_err("wrong enum");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].expected, COMPLEX_TYPE);
        assert_eq!(errors[0].found, "Constant.CBogus");
    }

    #[test]
    fn test_normalize_quotes_is_recursive() {
        let expr = parse("foo('a', [bar('b')])");
        let normalized = normalize_quotes(&expr);
        let mut singles = 0;
        parser::walk(&normalized, &mut |e| {
            if let ExprKind::Const(Constant::String(_, StringQuotes::Single)) = &e.kind {
                singles += 1;
            }
        });
        assert_eq!(singles, 0);
        assert_eq!(normalized.to_string(), "foo(\"a\", [bar(\"b\")])");
    }

    #[test]
    fn test_type_round_trip() {
        let ty = Type::Fun(
            vec![FunArg::optional("x", Type::int())],
            Box::new(Type::array(Type::macro_expr())),
        );
        assert_eq!(decode_type(&encode_type(&ty)), Ok(ty));
    }

    #[test]
    fn test_const_value() {
        assert_eq!(const_value(&parse("1 + 1")), Ok(Value::Int(2)));
        assert_eq!(const_value(&parse("'a' + 1")), Ok(Value::string("a1")));
        assert_eq!(const_value(&parse("[true, null, -3]")), Ok(Value::Array(vec![
            Value::Bool(true),
            Value::Null,
            Value::Int(-3),
        ])));
        assert_eq!(const_value(&parse("7 / 2")), Ok(Value::Float(3.5)));
        assert_eq!(const_value(&parse("0x10")), Ok(Value::Int(16)));
    }

    #[test]
    fn test_const_value_rejects_non_constants() {
        let err = const_value(&parse("foo(1)")).expect_err("call is not constant");
        assert_eq!(err.to_string(), "Argument should be a constant");
        assert_eq!(err.pos().file_id, 1);
        assert!(const_value(&parse("x + 1")).is_err());
    }
}
