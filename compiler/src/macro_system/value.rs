use indexmap::IndexMap;
use serde_json::json;
use std::fmt;

/// A function value living in the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionValue {
    /// Qualified name, or `<anonymous#id>` for closures
    pub name: String,
    pub arity: usize,
}

/// An enum constructor value: `ExprDef.EConst(...)`
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub enum_name: String,
    pub constructor: String,
    pub index: usize,
    pub args: Vec<Value>,
}

/// Runtime values exchanged with macro code.
///
/// This is a closed set; every decoder is a total function over it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Anonymous object, fields in declaration order
    Object(IndexMap<String, Value>),
    Function(FunctionValue),
    Array(Vec<Value>),
    Enum(EnumValue),
}

impl Value {
    pub fn object<I, K>(fields: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn enum_value(enum_name: &str, constructor: &str, index: usize, args: Vec<Value>) -> Value {
        Value::Enum(EnumValue {
            enum_name: enum_name.to_string(),
            constructor: constructor.to_string(),
            index,
            args,
        })
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    /// Returns the type name of this value for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Object(_) => "Object",
            Value::Function(_) => "Function",
            Value::Array(_) => "Array",
            Value::Enum(_) => "Enum",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// JSON rendering used in diagnostic reports
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::String(s) => json!(s),
            Value::Object(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Function(f) => json!({ "function": f.name, "arity": f.arity }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Enum(e) => json!({
                "enum": e.enum_name,
                "constructor": e.constructor,
                "index": e.index,
                "args": e.args.iter().map(Value::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => {
                if v.fract() == 0.0 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Object(fields) => {
                let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(func) => write!(f, "<function:{}>", func.name),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            Value::Enum(e) => {
                if e.args.is_empty() {
                    write!(f, "{}", e.constructor)
                } else {
                    let parts: Vec<String> = e.args.iter().map(|v| v.to_string()).collect();
                    write!(f, "{}({})", e.constructor, parts.join(", "))
                }
            }
        }
    }
}
