//! Convenience constructors for expression trees.
//!
//! Result types follow the usual rules: arithmetic keeps the (lifted) operand type, comparisons yield `bool`, blocks
//! yield their last expression. Use [`Expr::typed`] to override the inferred type.

use std::sync::Arc;

use exprc_core::Num;
use exprc_vm::{FieldRef, MethodRef, PropertyRef, Ty};

use super::expr::*;

impl Expr {
    pub fn new(kind: ExprKind, ty: Ty) -> Self {
        Self { kind, ty }
    }

    /// Replace the node type.
    pub fn typed(mut self, ty: Ty) -> Self {
        self.ty = ty;
        self
    }

    // ------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------

    pub fn num(n: Num) -> Self {
        Self::new(ExprKind::Constant(Literal::Num(n)), Ty::Num(n.kind()))
    }

    pub fn int(v: i32) -> Self {
        Self::num(Num::I32(v))
    }

    pub fn long(v: i64) -> Self {
        Self::num(Num::I64(v))
    }

    pub fn double(v: f64) -> Self {
        Self::num(Num::F64(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ExprKind::Constant(Literal::Bool(v)), Ty::Bool)
    }

    pub fn string(s: &str) -> Self {
        Self::new(ExprKind::Constant(Literal::Str(s.to_string())), Ty::Str)
    }

    /// A null reference, or an absent optional when `ty` is nullable.
    pub fn null(ty: Ty) -> Self {
        Self::new(ExprKind::Constant(Literal::Null), ty)
    }

    /// An optional constant holding `n`.
    pub fn some(n: Num) -> Self {
        Self::num(n).typed(Ty::nullable(Ty::Num(n.kind())))
    }

    pub fn default(ty: Ty) -> Self {
        Self::new(ExprKind::Default, ty)
    }

    pub fn empty() -> Self {
        Self::default(Ty::Void)
    }

    pub fn var(v: &Variable) -> Self {
        Self::new(ExprKind::Parameter(v.id), v.ty.clone())
    }

    pub fn hoisted(index: u32, ty: Ty) -> Self {
        Self::new(ExprKind::Hoisted(index), ty)
    }

    pub fn closure_var(index: u32, ty: Ty) -> Self {
        Self::new(ExprKind::ClosureVar(index), ty)
    }

    // ------------------------------------------------------------------
    // Members and indexing
    // ------------------------------------------------------------------

    fn member(receiver: Option<Expr>, member: Member, ty: Ty) -> Self {
        Self::new(
            ExprKind::Member {
                receiver: receiver.map(Box::new),
                member,
            },
            ty,
        )
    }

    pub fn field(receiver: Expr, field: FieldRef, ty: Ty) -> Self {
        Self::member(Some(receiver), Member::Field(field), ty)
    }

    pub fn static_field(field: FieldRef, ty: Ty) -> Self {
        Self::member(None, Member::Field(field), ty)
    }

    pub fn property(receiver: Expr, prop: PropertyRef, ty: Ty) -> Self {
        Self::member(Some(receiver), Member::Property(prop), ty)
    }

    pub fn static_property(prop: PropertyRef, ty: Ty) -> Self {
        Self::member(None, Member::Property(prop), ty)
    }

    pub fn array_length(array: Expr) -> Self {
        Self::member(Some(array), Member::ArrayLength, Ty::I32)
    }

    pub fn list_count(list: Expr) -> Self {
        Self::member(Some(list), Member::ListCount, Ty::I32)
    }

    pub fn str_length(s: Expr) -> Self {
        Self::member(Some(s), Member::StrLength, Ty::I32)
    }

    pub fn has_value(opt: Expr) -> Self {
        Self::member(Some(opt), Member::HasValue, Ty::Bool)
    }

    pub fn value(opt: Expr) -> Self {
        let ty = opt.ty.underlying().clone();
        Self::member(Some(opt), Member::Value, ty)
    }

    /// Element access on an array, list or multi-dimensional array.
    pub fn index(receiver: Expr, args: Vec<Expr>) -> Self {
        let ty = receiver.ty.element().cloned().unwrap_or(Ty::Object);
        Self::new(
            ExprKind::Index {
                receiver: Box::new(receiver),
                args,
                indexer: None,
            },
            ty,
        )
    }

    pub fn indexer(receiver: Expr, prop: PropertyRef, args: Vec<Expr>, ty: Ty) -> Self {
        Self::new(
            ExprKind::Index {
                receiver: Box::new(receiver),
                args,
                indexer: Some(prop),
            },
            ty,
        )
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let ty = match op {
            UnaryOp::IsTrue | UnaryOp::IsFalse if !operand.ty.is_nullable() => Ty::Bool,
            _ => operand.ty.clone(),
        };
        Self::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
                checked: false,
                method: None,
            },
            ty,
        )
    }

    pub fn negate(operand: Expr) -> Self {
        Self::unary(UnaryOp::Negate, operand)
    }

    pub fn not(operand: Expr) -> Self {
        Self::unary(UnaryOp::Not, operand)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        let ty = if op.is_comparison() {
            Ty::Bool
        } else if left.ty.is_nullable() || right.ty.is_nullable() {
            Ty::nullable(left.ty.underlying().clone())
        } else {
            left.ty.clone()
        };
        Self::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                checked: false,
                method: None,
            },
            ty,
        )
    }

    /// A comparison whose result is `bool?`; absent operands may propagate.
    pub fn compare_lifted(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::binary(op, left, right).typed(Ty::nullable(Ty::Bool))
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Sub, left, right)
    }

    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Mul, left, right)
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Lt, left, right)
    }

    /// Mark an arithmetic, negation or conversion node as overflow-checked.
    pub fn checked(mut self) -> Self {
        match &mut self.kind {
            ExprKind::Unary { checked, .. }
            | ExprKind::Binary { checked, .. }
            | ExprKind::Convert { checked, .. }
            | ExprKind::Assign { checked, .. } => *checked = true,
            _ => {}
        }
        self
    }

    /// Route an operator node through a user-defined method.
    pub fn with_method(mut self, m: MethodRef) -> Self {
        match &mut self.kind {
            ExprKind::Unary { method, .. }
            | ExprKind::Binary { method, .. }
            | ExprKind::Convert { method, .. } => *method = Some(m),
            ExprKind::Switch { comparison, .. } => *comparison = Some(m),
            _ => {}
        }
        self
    }

    fn logical(op: LogicalOp, left: Expr, right: Expr) -> Self {
        let ty = if left.ty.is_nullable() || right.ty.is_nullable() {
            Ty::nullable(Ty::Bool)
        } else {
            Ty::Bool
        };
        Self::new(
            ExprKind::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    pub fn and_also(left: Expr, right: Expr) -> Self {
        Self::logical(LogicalOp::AndAlso, left, right)
    }

    pub fn or_else(left: Expr, right: Expr) -> Self {
        Self::logical(LogicalOp::OrElse, left, right)
    }

    pub fn coalesce(left: Expr, right: Expr) -> Self {
        let ty = right.ty.clone();
        Self::new(
            ExprKind::Coalesce {
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    pub fn condition(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        let ty = if_true.ty.clone();
        Self::new(
            ExprKind::Conditional {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            },
            ty,
        )
    }

    /// `if (test) body;` as a void conditional.
    pub fn if_then(test: Expr, body: Expr) -> Self {
        Self::condition(test, body, Self::empty()).typed(Ty::Void)
    }

    pub fn block(variables: Vec<Variable>, body: Vec<Expr>) -> Self {
        let ty = body.last().map(|e| e.ty.clone()).unwrap_or(Ty::Void);
        Self::new(ExprKind::Block { variables, body }, ty)
    }

    pub fn loop_(body: Expr, break_label: Option<LabelTarget>, continue_label: Option<LabelTarget>) -> Self {
        let ty = break_label.as_ref().map(|l| l.ty.clone()).unwrap_or(Ty::Void);
        Self::new(
            ExprKind::Loop {
                body: Box::new(body),
                break_label,
                continue_label,
            },
            ty,
        )
    }

    pub fn switch(value: Expr, cases: Vec<SwitchCase>, default: Option<Expr>) -> Self {
        let ty = default
            .as_ref()
            .map(|d| d.ty.clone())
            .or_else(|| cases.first().map(|c| c.body.ty.clone()))
            .unwrap_or(Ty::Void);
        Self::new(
            ExprKind::Switch {
                value: Box::new(value),
                cases,
                default: default.map(Box::new),
                comparison: None,
            },
            ty,
        )
    }

    pub fn try_catch(body: Expr, handlers: Vec<CatchBlock>) -> Self {
        Self::try_full(body, handlers, None, None)
    }

    pub fn try_finally(body: Expr, finally: Expr) -> Self {
        Self::try_full(body, Vec::new(), Some(finally), None)
    }

    pub fn try_fault(body: Expr, fault: Expr) -> Self {
        Self::try_full(body, Vec::new(), None, Some(fault))
    }

    pub fn try_full(body: Expr, handlers: Vec<CatchBlock>, finally: Option<Expr>, fault: Option<Expr>) -> Self {
        let ty = body.ty.clone();
        Self::new(
            ExprKind::Try {
                body: Box::new(body),
                handlers,
                finally: finally.map(Box::new),
                fault: fault.map(Box::new),
            },
            ty,
        )
    }

    pub fn throw(operand: Expr) -> Self {
        Self::new(
            ExprKind::Throw {
                operand: Some(Box::new(operand)),
            },
            Ty::Void,
        )
    }

    pub fn rethrow() -> Self {
        Self::new(ExprKind::Throw { operand: None }, Ty::Void)
    }

    pub fn goto(kind: GotoKind, target: &LabelTarget, value: Option<Expr>) -> Self {
        Self::new(
            ExprKind::Goto {
                kind,
                target: target.clone(),
                value: value.map(Box::new),
            },
            Ty::Void,
        )
    }

    pub fn break_(target: &LabelTarget, value: Option<Expr>) -> Self {
        Self::goto(GotoKind::Break, target, value)
    }

    pub fn continue_(target: &LabelTarget) -> Self {
        Self::goto(GotoKind::Continue, target, None)
    }

    pub fn return_(target: &LabelTarget, value: Option<Expr>) -> Self {
        Self::goto(GotoKind::Return, target, value)
    }

    pub fn label(target: &LabelTarget, default: Option<Expr>) -> Self {
        Self::new(
            ExprKind::Label {
                target: target.clone(),
                default: default.map(Box::new),
            },
            target.ty.clone(),
        )
    }

    // ------------------------------------------------------------------
    // Calls and construction
    // ------------------------------------------------------------------

    pub fn call(method: MethodRef, receiver: Option<Expr>, args: Vec<Expr>, ret: Ty) -> Self {
        Self::new(
            ExprKind::Call {
                method,
                receiver: receiver.map(Box::new),
                args,
            },
            ret,
        )
    }

    pub fn invoke(func: Expr, args: Vec<Expr>) -> Self {
        let ty = match &func.ty {
            Ty::Func { ret, .. } => (**ret).clone(),
            _ => Ty::Object,
        };
        Self::new(
            ExprKind::Invoke {
                func: Box::new(func),
                args,
            },
            ty,
        )
    }

    pub fn new_obj(ctor: MethodRef, args: Vec<Expr>, ty: Ty) -> Self {
        Self::new(ExprKind::New { ctor: Some(ctor), args }, ty)
    }

    /// Zero-initialized struct value or default-constructed object.
    pub fn new_default(ty: Ty) -> Self {
        Self::new(
            ExprKind::New {
                ctor: None,
                args: Vec::new(),
            },
            ty,
        )
    }

    pub fn new_array_init(elem: Ty, items: Vec<Expr>) -> Self {
        let ty = Ty::array(elem.clone());
        Self::new(
            ExprKind::NewArray {
                elem,
                init: ArrayInit::Elements(items),
            },
            ty,
        )
    }

    pub fn new_array_bounds(elem: Ty, bounds: Vec<Expr>) -> Self {
        let ty = match bounds.len() {
            1 => Ty::array(elem.clone()),
            rank => Ty::md_array(elem.clone(), rank as u32),
        };
        Self::new(
            ExprKind::NewArray {
                elem,
                init: ArrayInit::Bounds(bounds),
            },
            ty,
        )
    }

    pub fn list_init(new: Expr, items: Vec<ElementInit>) -> Self {
        let ty = new.ty.clone();
        Self::new(
            ExprKind::ListInit {
                new: Box::new(new),
                items,
            },
            ty,
        )
    }

    pub fn member_init(new: Expr, bindings: Vec<Binding>) -> Self {
        let ty = new.ty.clone();
        Self::new(
            ExprKind::MemberInit {
                new: Box::new(new),
                bindings,
            },
            ty,
        )
    }

    pub fn lambda(lambda: LambdaExpr) -> Self {
        let ty = lambda.func_ty();
        Self::new(ExprKind::Lambda(Arc::new(lambda)), ty)
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    pub fn assign_op(op: AssignOp, target: Expr, value: Option<Expr>) -> Self {
        let ty = target.ty.clone();
        Self::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: value.map(Box::new),
                checked: false,
                auto_extend: false,
            },
            ty,
        )
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::assign_op(AssignOp::Assign, target, Some(value))
    }

    pub fn pre_increment(target: Expr) -> Self {
        Self::assign_op(AssignOp::PreIncrement, target, None)
    }

    pub fn post_increment(target: Expr) -> Self {
        Self::assign_op(AssignOp::PostIncrement, target, None)
    }

    /// Create missing intermediate objects and grow collections while assigning.
    pub fn auto_extend(mut self) -> Self {
        if let ExprKind::Assign { auto_extend, .. } = &mut self.kind {
            *auto_extend = true;
        }
        self
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn type_is(operand: Expr, target: Ty) -> Self {
        Self::new(
            ExprKind::TypeTest {
                operand: Box::new(operand),
                target,
                exact: false,
            },
            Ty::Bool,
        )
    }

    pub fn type_equal(operand: Expr, target: Ty) -> Self {
        Self::new(
            ExprKind::TypeTest {
                operand: Box::new(operand),
                target,
                exact: true,
            },
            Ty::Bool,
        )
    }

    pub fn convert(operand: Expr, to: Ty) -> Self {
        Self::new(
            ExprKind::Convert {
                operand: Box::new(operand),
                checked: false,
                method: None,
            },
            to,
        )
    }

    pub fn type_as(operand: Expr, to: Ty) -> Self {
        Self::new(
            ExprKind::TypeAs {
                operand: Box::new(operand),
            },
            to,
        )
    }
}

impl Variable {
    pub fn new(id: VarId, name: impl Into<String>, ty: Ty) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
        }
    }
}

impl LabelTarget {
    pub fn new(id: LabelId, ty: Ty) -> Self {
        Self { id, ty }
    }
}

impl SwitchCase {
    pub fn new(tests: Vec<Expr>, body: Expr) -> Self {
        Self { tests, body }
    }
}

impl CatchBlock {
    pub fn new(ty: Ty, variable: Option<Variable>, body: Expr) -> Self {
        Self {
            ty,
            variable,
            filter: None,
            body,
        }
    }

    pub fn when(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl LambdaExpr {
    pub fn new(name: impl Into<String>, params: Vec<Variable>, ret: Ty, body: Expr) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            body,
            hidden: HiddenParams::default(),
        }
    }

    pub fn with_constants(mut self) -> Self {
        self.hidden.constants = true;
        self
    }

    pub fn with_closure(mut self) -> Self {
        self.hidden.closure = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifted_arithmetic_type() {
        let x = Variable::new(0, "x", Ty::nullable(Ty::I32));
        let e = Expr::add(Expr::var(&x), Expr::int(1));
        assert_eq!(e.ty, Ty::nullable(Ty::I32));
        assert_eq!(Expr::lt(Expr::var(&x), Expr::int(1)).ty, Ty::Bool);
    }

    #[test]
    fn test_block_type_is_last_expression() {
        assert_eq!(Expr::block(vec![], vec![Expr::empty(), Expr::string("s")]).ty, Ty::Str);
        assert_eq!(Expr::block(vec![], vec![]).ty, Ty::Void);
    }

    #[test]
    fn test_md_array_bounds_type() {
        let e = Expr::new_array_bounds(Ty::I32, vec![Expr::int(2), Expr::int(3)]);
        assert_eq!(e.ty, Ty::md_array(Ty::I32, 2));
    }
}
