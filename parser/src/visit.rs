//! Expression traversal helpers

use crate::ast::{Expr, ExprKind, Function};

fn function_children_mut(func: &mut Function, f: &mut dyn FnMut(&mut Expr)) {
    for arg in &mut func.args {
        if let Some(value) = &mut arg.value {
            f(value);
        }
    }
    if let Some(body) = &mut func.expr {
        f(body);
    }
}

fn function_children(func: &Function, f: &mut dyn FnMut(&Expr)) {
    for arg in &func.args {
        if let Some(value) = &arg.value {
            f(value);
        }
    }
    if let Some(body) = &func.expr {
        f(body);
    }
}

impl Expr {
    /// Call `f` on each direct sub-expression, in source order.
    pub fn for_each_child_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match &mut self.kind {
            ExprKind::Const(_) | ExprKind::Break | ExprKind::Continue => {}
            ExprKind::Array(a, b) | ExprKind::Binop(_, a, b) | ExprKind::For(a, b) => {
                f(a);
                f(b);
            }
            ExprKind::While(a, b, _) => {
                f(a);
                f(b);
            }
            ExprKind::Field(e, _)
            | ExprKind::Parenthesis(e)
            | ExprKind::Unop(_, _, e)
            | ExprKind::Untyped(e)
            | ExprKind::Throw(e)
            | ExprKind::Cast(e, _)
            | ExprKind::CheckType(e, _) => f(e),
            ExprKind::ObjectDecl(fields) => {
                for field in fields {
                    f(&mut field.expr);
                }
            }
            ExprKind::ArrayDecl(items) | ExprKind::Block(items) => {
                for item in items {
                    f(item);
                }
            }
            ExprKind::Call(callee, args) => {
                f(callee);
                for arg in args {
                    f(arg);
                }
            }
            ExprKind::New(_, args) => {
                for arg in args {
                    f(arg);
                }
            }
            ExprKind::Vars(vars) => {
                for var in vars {
                    if let Some(init) = &mut var.expr {
                        f(init);
                    }
                }
            }
            ExprKind::Function(_, func) => function_children_mut(func, f),
            ExprKind::If(cond, then, otherwise) => {
                f(cond);
                f(then);
                if let Some(e) = otherwise {
                    f(e);
                }
            }
            ExprKind::Return(value) => {
                if let Some(e) = value {
                    f(e);
                }
            }
            ExprKind::Ternary(c, t, e) => {
                f(c);
                f(t);
                f(e);
            }
            ExprKind::Meta(entry, e) => {
                for param in &mut entry.params {
                    f(param);
                }
                f(e);
            }
        }
    }

    pub fn for_each_child(&self, f: &mut dyn FnMut(&Expr)) {
        match &self.kind {
            ExprKind::Const(_) | ExprKind::Break | ExprKind::Continue => {}
            ExprKind::Array(a, b) | ExprKind::Binop(_, a, b) | ExprKind::For(a, b) => {
                f(a);
                f(b);
            }
            ExprKind::While(a, b, _) => {
                f(a);
                f(b);
            }
            ExprKind::Field(e, _)
            | ExprKind::Parenthesis(e)
            | ExprKind::Unop(_, _, e)
            | ExprKind::Untyped(e)
            | ExprKind::Throw(e)
            | ExprKind::Cast(e, _)
            | ExprKind::CheckType(e, _) => f(e),
            ExprKind::ObjectDecl(fields) => {
                for field in fields {
                    f(&field.expr);
                }
            }
            ExprKind::ArrayDecl(items) | ExprKind::Block(items) => {
                for item in items {
                    f(item);
                }
            }
            ExprKind::Call(callee, args) => {
                f(callee);
                for arg in args {
                    f(arg);
                }
            }
            ExprKind::New(_, args) => {
                for arg in args {
                    f(arg);
                }
            }
            ExprKind::Vars(vars) => {
                for var in vars {
                    if let Some(init) = &var.expr {
                        f(init);
                    }
                }
            }
            ExprKind::Function(_, func) => function_children(func, f),
            ExprKind::If(cond, then, otherwise) => {
                f(cond);
                f(then);
                if let Some(e) = otherwise {
                    f(e);
                }
            }
            ExprKind::Return(value) => {
                if let Some(e) = value {
                    f(e);
                }
            }
            ExprKind::Ternary(c, t, e) => {
                f(c);
                f(t);
                f(e);
            }
            ExprKind::Meta(entry, e) => {
                for param in &entry.params {
                    f(param);
                }
                f(e);
            }
        }
    }
}

/// Rewrite `expr` bottom-up: children are visited before their parent.
pub fn walk_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    expr.for_each_child_mut(&mut |child| walk_mut(child, f));
    f(expr);
}

/// Visit `expr` top-down.
pub fn walk(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    expr.for_each_child(&mut |child| walk(child, f));
}
