//! Program-fragment AST
//!
//! These are the structures exchanged across the macro boundary: expressions,
//! class fields, complex types and type definitions, each carrying the
//! position it was parsed (or synthesized) at.

/// Source position of a fragment.
///
/// `min`/`max` are byte offsets into the file identified by `file_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub file_id: u32,
    pub min: u32,
    pub max: u32,
}

impl Position {
    pub fn new(file_id: u32, min: u32, max: u32) -> Self {
        Self { file_id, min, max }
    }

    /// Position used for synthesized nodes with no source.
    pub fn null() -> Self {
        Self {
            file_id: u32::MAX,
            min: 0,
            max: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.file_id == u32::MAX
    }

    pub fn union(self, other: Position) -> Position {
        if self.is_null() {
            return other;
        }
        if other.is_null() {
            return self;
        }
        Position::new(self.file_id, self.min.min(other.min), self.max.max(other.max))
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::null()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringQuotes {
    Double,
    Single,
}

/// Literal constants. Numbers keep their source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(String),
    Float(String),
    String(String, StringQuotes),
    /// Identifiers, including `true`, `false`, `null` and `this`
    Ident(String),
    /// `~/pattern/flags`
    Regexp(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binop {
    Add,
    Mult,
    Div,
    Sub,
    Assign,
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Xor,
    BoolAnd,
    BoolOr,
    Shl,
    Shr,
    UShr,
    Mod,
    /// Compound assignment, e.g. `+=` is `AssignOp(Add)`
    AssignOp(Box<Binop>),
    Interval,
    Arrow,
    In,
    NullCoal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unop {
    Increment,
    Decrement,
    Not,
    Neg,
    NegBits,
    Spread,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Position,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Position) -> Self {
        Self { kind, pos }
    }

    pub fn ident(name: &str, pos: Position) -> Self {
        Self::new(ExprKind::Const(Constant::Ident(name.to_string())), pos)
    }

    pub fn int(value: i64, pos: Position) -> Self {
        Self::new(ExprKind::Const(Constant::Int(value.to_string())), pos)
    }

    pub fn string(value: &str, pos: Position) -> Self {
        Self::new(
            ExprKind::Const(Constant::String(value.to_string(), StringQuotes::Double)),
            pos,
        )
    }

    pub fn null(pos: Position) -> Self {
        Self::ident("null", pos)
    }

    /// Returns the identifier name if this is a plain identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Const(Constant::Ident(name)) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub field: String,
    pub expr: Expr,
    pub quoted: bool,
}

/// A variable declared by `var`/`final`.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: Option<ComplexType>,
    pub expr: Option<Box<Expr>>,
    pub is_final: bool,
    pub is_static: bool,
    pub meta: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArg {
    pub name: String,
    pub opt: bool,
    pub ty: Option<ComplexType>,
    pub value: Option<Expr>,
    pub meta: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub args: Vec<FunctionArg>,
    pub ret: Option<ComplexType>,
    pub expr: Option<Box<Expr>>,
    pub params: Vec<TypeParamDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    Anonymous,
    Named(String),
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Constant),
    /// `e1[e2]`
    Array(Box<Expr>, Box<Expr>),
    Binop(Binop, Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Parenthesis(Box<Expr>),
    ObjectDecl(Vec<ObjectField>),
    ArrayDecl(Vec<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(TypePath, Vec<Expr>),
    /// Operator, postfix flag, operand
    Unop(Unop, bool, Box<Expr>),
    Vars(Vec<Var>),
    Function(FunctionKind, Function),
    Block(Vec<Expr>),
    For(Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    /// Condition, body, `true` for `while` and `false` for `do ... while`
    While(Box<Expr>, Box<Expr>, bool),
    Return(Option<Box<Expr>>),
    Break,
    Continue,
    Untyped(Box<Expr>),
    Throw(Box<Expr>),
    Cast(Box<Expr>, Option<ComplexType>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    CheckType(Box<Expr>, ComplexType),
    Meta(MetadataEntry, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypePath {
    pub pack: Vec<String>,
    pub name: String,
    pub params: Vec<TypeParam>,
    pub sub: Option<String>,
}

impl TypePath {
    pub fn new(pack: &[&str], name: &str) -> Self {
        Self {
            pack: pack.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
            params: Vec::new(),
            sub: None,
        }
    }

    pub fn with_params(mut self, params: Vec<TypeParam>) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeParam {
    Type(ComplexType),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComplexType {
    Path(TypePath),
    Function(Vec<ComplexType>, Box<ComplexType>),
    Anonymous(Vec<Field>),
    Parent(Box<ComplexType>),
    Optional(Box<ComplexType>),
    Named(String, Box<ComplexType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeParamDecl {
    pub name: String,
    pub constraints: Vec<ComplexType>,
    pub params: Vec<TypeParamDecl>,
    pub meta: Vec<MetadataEntry>,
}

/// `@name(params)` or `@:name(params)`; the name keeps its leading colon.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub name: String,
    pub params: Vec<Expr>,
    pub pos: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
    Static,
    Override,
    Dynamic,
    Inline,
    Macro,
    Final,
    Extern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Var(Option<ComplexType>, Option<Expr>),
    Fun(Function),
    /// Getter access, setter access, type, initializer
    Prop(String, String, Option<ComplexType>, Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub access: Vec<Access>,
    pub kind: FieldKind,
    pub pos: Position,
    pub meta: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefKind {
    Enum,
    Structure,
    Class {
        super_class: Option<TypePath>,
        interfaces: Vec<TypePath>,
        is_interface: bool,
    },
    Alias(ComplexType),
    Abstract(Option<ComplexType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub pack: Vec<String>,
    pub name: String,
    pub pos: Position,
    pub meta: Vec<MetadataEntry>,
    pub params: Vec<TypeParamDecl>,
    pub is_extern: bool,
    pub kind: TypeDefKind,
    pub fields: Vec<Field>,
}
