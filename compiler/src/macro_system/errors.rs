use crate::context::{Message, MessageOrigin, Severity};
use crate::types::{TypingError, TypingErrorKind};
use parser::{ParseError, Position};
use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while loading, calling or flushing macros
#[derive(Debug, Clone, PartialEq)]
pub enum MacroError {
    /// Macro type or method not found, or not a callable static method
    Resolution { message: String, pos: Position },

    /// Call-site argument does not unify with the parameter type
    ArgumentType { message: String, pos: Position },

    /// A runtime value does not have the shape a decoder expects
    Decode {
        summary: String,
        report_path: Option<PathBuf>,
        pos: Position,
    },

    /// The macro body raised an uncaught exception
    RuntimeException {
        message: String,
        macro_name: String,
        report_path: Option<PathBuf>,
        pos: Position,
    },

    /// Operation needs state that is not available here
    Unsupported { operation: String, pos: Position },

    /// Error that invalidated the runtime
    Fatal { message: String, pos: Position },

    /// Typing error raised while loading or typing macro code
    Typing { message: String, pos: Position },
}

impl MacroError {
    pub fn resolution(message: impl Into<String>, pos: Position) -> Self {
        MacroError::Resolution {
            message: message.into(),
            pos,
        }
    }

    pub fn unsupported(operation: impl Into<String>, pos: Position) -> Self {
        MacroError::Unsupported {
            operation: operation.into(),
            pos,
        }
    }

    pub fn pos(&self) -> Position {
        match self {
            MacroError::Resolution { pos, .. }
            | MacroError::ArgumentType { pos, .. }
            | MacroError::Decode { pos, .. }
            | MacroError::RuntimeException { pos, .. }
            | MacroError::Unsupported { pos, .. }
            | MacroError::Fatal { pos, .. }
            | MacroError::Typing { pos, .. } => *pos,
        }
    }

    /// Whether this error discards the runtime
    pub fn is_fatal(&self) -> bool {
        matches!(self, MacroError::Fatal { .. })
    }

    /// Fine-grained error code for this specific macro error kind.
    ///
    /// Error codes E0700-E0799 are reserved for macro errors:
    /// - E0701: Macro resolution error
    /// - E0702: Argument type error
    /// - E0703: Decode error
    /// - E0704: Uncaught exception in macro
    /// - E0705: Unsupported operation
    /// - E0706: Fatal runtime error
    /// - E0707: Typing error in macro code
    pub fn error_code(&self) -> &'static str {
        match self {
            MacroError::Resolution { .. } => "E0701",
            MacroError::ArgumentType { .. } => "E0702",
            MacroError::Decode { .. } => "E0703",
            MacroError::RuntimeException { .. } => "E0704",
            MacroError::Unsupported { .. } => "E0705",
            MacroError::Fatal { .. } => "E0706",
            MacroError::Typing { .. } => "E0707",
        }
    }

    /// Convert into a reportable message, tagged with where it came from
    pub fn to_message(&self) -> Message {
        let origin = match self {
            MacroError::RuntimeException { macro_name, .. } => MessageOrigin::Macro {
                name: macro_name.clone(),
            },
            _ => MessageOrigin::User,
        };
        Message {
            severity: Severity::Error,
            text: format!("[{}] {}", self.error_code(), self),
            pos: self.pos(),
            origin,
        }
    }
}

impl fmt::Display for MacroError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroError::Resolution { message, .. } => write!(f, "{}", message),
            MacroError::ArgumentType { message, .. } => write!(f, "{}", message),
            MacroError::Decode {
                summary,
                report_path,
                ..
            } => match report_path {
                Some(path) => write!(f, "{} (see {})", summary, path.display()),
                None => write!(f, "{}", summary),
            },
            MacroError::RuntimeException {
                message,
                report_path,
                ..
            } => match report_path {
                Some(path) => write!(f, "Uncaught exception {} (see {})", message, path.display()),
                None => write!(f, "Uncaught exception {}", message),
            },
            MacroError::Unsupported { operation, .. } => {
                write!(f, "{} is not supported in this context", operation)
            }
            MacroError::Fatal { message, .. } => write!(f, "{}", message),
            MacroError::Typing { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for MacroError {}

impl From<TypingError> for MacroError {
    fn from(err: TypingError) -> Self {
        match err.kind {
            TypingErrorKind::ModuleNotFound | TypingErrorKind::TypeNotFound => {
                MacroError::Resolution {
                    message: err.message,
                    pos: err.pos,
                }
            }
            TypingErrorKind::Unify | TypingErrorKind::Arity => MacroError::ArgumentType {
                message: err.message,
                pos: err.pos,
            },
            TypingErrorKind::Other => MacroError::Typing {
                message: err.message,
                pos: err.pos,
            },
        }
    }
}

impl From<ParseError> for MacroError {
    fn from(err: ParseError) -> Self {
        MacroError::Typing {
            message: err.to_string(),
            pos: err.pos(),
        }
    }
}
