//! Read-only traversal over expression trees.
//!
//! Nested lambda bodies are separate compilation units and are not visited.

use super::expr::{ArrayInit, Binding, Expr, ExprKind};

/// Direct children of `expr` in evaluation order.
pub fn children(expr: &Expr) -> Vec<&Expr> {
    let mut out: Vec<&Expr> = Vec::new();
    match &expr.kind {
        ExprKind::Constant(_)
        | ExprKind::Default
        | ExprKind::Parameter(_)
        | ExprKind::Hoisted(_)
        | ExprKind::ClosureVar(_)
        | ExprKind::Lambda(_) => {}
        ExprKind::Member { receiver, .. } => out.extend(receiver.as_deref()),
        ExprKind::Index { receiver, args, .. } => {
            out.push(receiver);
            out.extend(args);
        }
        ExprKind::Unary { operand, .. } => out.push(operand),
        ExprKind::Binary { left, right, .. }
        | ExprKind::Logical { left, right, .. }
        | ExprKind::Coalesce { left, right } => {
            out.push(left);
            out.push(right);
        }
        ExprKind::Conditional {
            test,
            if_true,
            if_false,
        } => {
            out.push(test);
            out.push(if_true);
            out.push(if_false);
        }
        ExprKind::Block { body, .. } => out.extend(body),
        ExprKind::Loop { body, .. } => out.push(body),
        ExprKind::Switch {
            value, cases, default, ..
        } => {
            out.push(value);
            for case in cases {
                out.extend(&case.tests);
                out.push(&case.body);
            }
            out.extend(default.as_deref());
        }
        ExprKind::Try {
            body,
            handlers,
            finally,
            fault,
        } => {
            out.push(body);
            for h in handlers {
                out.extend(h.filter.as_ref());
                out.push(&h.body);
            }
            out.extend(finally.as_deref());
            out.extend(fault.as_deref());
        }
        ExprKind::Call { receiver, args, .. } => {
            out.extend(receiver.as_deref());
            out.extend(args);
        }
        ExprKind::Invoke { func, args } => {
            out.push(func);
            out.extend(args);
        }
        ExprKind::New { args, .. } => out.extend(args),
        ExprKind::NewArray { init, .. } => match init {
            ArrayInit::Elements(items) | ArrayInit::Bounds(items) => out.extend(items),
        },
        ExprKind::ListInit { new, items } => {
            out.push(new);
            for item in items {
                out.extend(&item.args);
            }
        }
        ExprKind::MemberInit { new, bindings } => {
            out.push(new);
            binding_children(bindings, &mut out);
        }
        ExprKind::Assign { target, value, .. } => {
            out.push(target);
            out.extend(value.as_deref());
        }
        ExprKind::TypeTest { operand, .. } | ExprKind::Convert { operand, .. } | ExprKind::TypeAs { operand } => {
            out.push(operand)
        }
        ExprKind::Throw { operand } => out.extend(operand.as_deref()),
        ExprKind::Goto { value, .. } => out.extend(value.as_deref()),
        ExprKind::Label { default, .. } => out.extend(default.as_deref()),
    }
    out
}

fn binding_children<'a>(bindings: &'a [Binding], out: &mut Vec<&'a Expr>) {
    for binding in bindings {
        match binding {
            Binding::Assign { value, .. } => out.push(value),
            Binding::Member { bindings, .. } => binding_children(bindings, out),
            Binding::List { items, .. } => {
                for item in items {
                    out.extend(&item.args);
                }
            }
        }
    }
}

/// Whether any node in the tree satisfies `pred`.
pub fn any(expr: &Expr, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
    if pred(expr) {
        return true;
    }
    children(expr).into_iter().any(|c| any(c, pred))
}

#[cfg(test)]
mod tests {
    use exprc_vm::Ty;

    use super::*;
    use crate::ir::Variable;

    #[test]
    fn test_children_in_evaluation_order() {
        let x = Variable::new(0, "x", Ty::I32);
        let e = Expr::condition(Expr::bool(true), Expr::var(&x), Expr::int(2));
        let kids = children(&e);
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[1].kind, ExprKind::Parameter(0));
    }

    #[test]
    fn test_lambda_bodies_are_not_visited() {
        let inner = crate::ir::LambdaExpr::new("inner", vec![], Ty::I32, Expr::int(1));
        let e = Expr::lambda(inner);
        assert!(!any(&e, &mut |n| matches!(n.kind, ExprKind::Constant(_))));
    }
}
