//! Source printer for program fragments

use crate::ast::*;
use std::fmt;

impl Binop {
    pub fn symbol(&self) -> String {
        let s = match self {
            Binop::Add => "+",
            Binop::Mult => "*",
            Binop::Div => "/",
            Binop::Sub => "-",
            Binop::Assign => "=",
            Binop::Eq => "==",
            Binop::NotEq => "!=",
            Binop::Gt => ">",
            Binop::Gte => ">=",
            Binop::Lt => "<",
            Binop::Lte => "<=",
            Binop::And => "&",
            Binop::Or => "|",
            Binop::Xor => "^",
            Binop::BoolAnd => "&&",
            Binop::BoolOr => "||",
            Binop::Shl => "<<",
            Binop::Shr => ">>",
            Binop::UShr => ">>>",
            Binop::Mod => "%",
            Binop::AssignOp(op) => return format!("{}=", op.symbol()),
            Binop::Interval => "...",
            Binop::Arrow => "=>",
            Binop::In => "in",
            Binop::NullCoal => "??",
        };
        s.to_string()
    }
}

impl Unop {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unop::Increment => "++",
            Unop::Decrement => "--",
            Unop::Not => "!",
            Unop::Neg => "-",
            Unop::NegBits => "~",
            Unop::Spread => "...",
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) | Constant::Float(v) | Constant::Ident(v) => write!(f, "{}", v),
            Constant::String(s, StringQuotes::Double) => write!(f, "\"{}\"", escape(s)),
            Constant::String(s, StringQuotes::Single) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Constant::Regexp(pattern, flags) => write!(f, "~/{}/{}", pattern, flags),
        }
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.pack {
            write!(f, "{}.", p)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(sub) = &self.sub {
            write!(f, ".{}", sub)?;
        }
        if !self.params.is_empty() {
            write!(f, "<{}>", join(&self.params, ", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeParam::Type(t) => write!(f, "{}", t),
            TypeParam::Expr(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for ComplexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplexType::Path(p) => write!(f, "{}", p),
            ComplexType::Function(args, ret) => {
                for a in args {
                    write!(f, "{} -> ", a)?;
                }
                write!(f, "{}", ret)
            }
            ComplexType::Anonymous(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.meta.iter().any(|m| m.name == ":optional") {
                        write!(f, "?")?;
                    }
                    match &field.kind {
                        FieldKind::Var(Some(t), _) | FieldKind::Prop(_, _, Some(t), _) => {
                            write!(f, "{} : {}", field.name, t)?
                        }
                        _ => write!(f, "{}", field.name)?,
                    }
                }
                write!(f, " }}")
            }
            ComplexType::Parent(t) => write!(f, "({})", t),
            ComplexType::Optional(t) => write!(f, "?{}", t),
            ComplexType::Named(n, t) => write!(f, "{} : {}", n, t),
        }
    }
}

impl fmt::Display for MetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.params.is_empty() {
            write!(f, "({})", join(&self.params, ", "))?;
        }
        Ok(())
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, name: Option<&str>, func: &Function) -> fmt::Result {
    write!(f, "function")?;
    if let Some(name) = name {
        write!(f, " {}", name)?;
    }
    write!(f, "(")?;
    for (i, arg) in func.args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        if arg.opt {
            write!(f, "?")?;
        }
        write!(f, "{}", arg.name)?;
        if let Some(t) = &arg.ty {
            write!(f, ":{}", t)?;
        }
        if let Some(v) = &arg.value {
            write!(f, " = {}", v)?;
        }
    }
    write!(f, ")")?;
    if let Some(ret) = &func.ret {
        write!(f, ":{}", ret)?;
    }
    match &func.expr {
        Some(body) => write!(f, " {}", body),
        None => Ok(()),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Const(c) => write!(f, "{}", c),
            ExprKind::Array(e, i) => write!(f, "{}[{}]", e, i),
            ExprKind::Binop(op, l, r) => write!(f, "{} {} {}", l, op.symbol(), r),
            ExprKind::Field(e, name) => write!(f, "{}.{}", e, name),
            ExprKind::Parenthesis(e) => write!(f, "({})", e),
            ExprKind::ObjectDecl(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.quoted {
                        write!(f, "\"{}\" : {}", escape(&field.field), field.expr)?;
                    } else {
                        write!(f, "{} : {}", field.field, field.expr)?;
                    }
                }
                write!(f, " }}")
            }
            ExprKind::ArrayDecl(items) => write!(f, "[{}]", join(items, ", ")),
            ExprKind::Call(e, args) => write!(f, "{}({})", e, join(args, ", ")),
            ExprKind::New(path, args) => write!(f, "new {}({})", path, join(args, ", ")),
            ExprKind::Unop(op, true, e) => write!(f, "{}{}", e, op.symbol()),
            ExprKind::Unop(op, false, e) => write!(f, "{}{}", op.symbol(), e),
            ExprKind::Vars(vars) => {
                for (i, v) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    } else {
                        if v.is_static {
                            write!(f, "static ")?;
                        }
                        write!(f, "{} ", if v.is_final { "final" } else { "var" })?;
                    }
                    write!(f, "{}", v.name)?;
                    if let Some(t) = &v.ty {
                        write!(f, ":{}", t)?;
                    }
                    if let Some(e) = &v.expr {
                        write!(f, " = {}", e)?;
                    }
                }
                Ok(())
            }
            ExprKind::Function(FunctionKind::Named(name), func) => {
                write_function(f, Some(name), func)
            }
            ExprKind::Function(_, func) => write_function(f, None, func),
            ExprKind::Block(items) => {
                write!(f, "{{")?;
                for e in items {
                    write!(f, " {};", e)?;
                }
                write!(f, " }}")
            }
            ExprKind::For(head, body) => write!(f, "for ({}) {}", head, body),
            ExprKind::If(c, t, Some(e)) => write!(f, "if ({}) {} else {}", c, t, e),
            ExprKind::If(c, t, None) => write!(f, "if ({}) {}", c, t),
            ExprKind::While(c, body, true) => write!(f, "while ({}) {}", c, body),
            ExprKind::While(c, body, false) => write!(f, "do {} while ({})", body, c),
            ExprKind::Return(Some(e)) => write!(f, "return {}", e),
            ExprKind::Return(None) => write!(f, "return"),
            ExprKind::Break => write!(f, "break"),
            ExprKind::Continue => write!(f, "continue"),
            ExprKind::Untyped(e) => write!(f, "untyped {}", e),
            ExprKind::Throw(e) => write!(f, "throw {}", e),
            ExprKind::Cast(e, Some(t)) => write!(f, "cast({}, {})", e, t),
            ExprKind::Cast(e, None) => write!(f, "cast {}", e),
            ExprKind::Ternary(c, t, e) => write!(f, "{} ? {} : {}", c, t, e),
            ExprKind::CheckType(e, t) => write!(f, "({} : {})", e, t),
            ExprKind::Meta(m, e) => write!(f, "{} {}", m, e),
        }
    }
}
