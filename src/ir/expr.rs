//! Expression tree definitions.
//!
//! Every node carries its static result type. Trees are immutable once built: the emitter may construct new nodes
//! while lowering but never mutates the input.
//!
//! ## Notes
//!
//! - Variables are identified by [`VarId`], unique within one lambda. A nested lambda has its own parameters; values it
//!   shares with the enclosing function reach it through hoisted constants or closure variables.
//! - Labels are identified by [`LabelId`] and carry the type of the value a jump delivers.

use std::sync::Arc;

use exprc_core::Num;
use exprc_vm::{FieldRef, MethodRef, PropertyRef, Ty};
use serde::{Deserialize, Serialize};

pub type VarId = u32;
pub type LabelId = u32;

/// A typed expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
}

/// A parameter or block-scoped variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub ty: Ty,
}

/// Jump target; `ty` is the type of the value carried by jumps to it (`Void` for plain jumps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelTarget {
    pub id: LabelId,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Num(Num),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Constant(Literal),
    /// The zero value of the node type.
    Default,
    Parameter(VarId),
    /// Element of the hoisted constants table.
    Hoisted(u32),
    /// Element of the shared closure environment.
    ClosureVar(u32),
    Member {
        receiver: Option<Box<Expr>>,
        member: Member,
    },
    /// Array, list, multi-dimensional array or indexed-property access.
    Index {
        receiver: Box<Expr>,
        args: Vec<Expr>,
        indexer: Option<PropertyRef>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        checked: bool,
        method: Option<MethodRef>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        checked: bool,
        method: Option<MethodRef>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Coalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Block {
        variables: Vec<Variable>,
        body: Vec<Expr>,
    },
    Loop {
        body: Box<Expr>,
        break_label: Option<LabelTarget>,
        continue_label: Option<LabelTarget>,
    },
    Switch {
        value: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Box<Expr>>,
        /// Custom equality; cases are then always tested linearly.
        comparison: Option<MethodRef>,
    },
    Try {
        body: Box<Expr>,
        handlers: Vec<CatchBlock>,
        finally: Option<Box<Expr>>,
        fault: Option<Box<Expr>>,
    },
    Call {
        method: MethodRef,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// Call a function value.
    Invoke {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Object or struct construction; a struct without a constructor is zero-initialized.
    New {
        ctor: Option<MethodRef>,
        args: Vec<Expr>,
    },
    NewArray {
        elem: Ty,
        init: ArrayInit,
    },
    ListInit {
        new: Box<Expr>,
        items: Vec<ElementInit>,
    },
    MemberInit {
        new: Box<Expr>,
        bindings: Vec<Binding>,
    },
    Lambda(Arc<LambdaExpr>),
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        /// Absent for increments and decrements.
        value: Option<Box<Expr>>,
        checked: bool,
        auto_extend: bool,
    },
    TypeTest {
        operand: Box<Expr>,
        target: Ty,
        exact: bool,
    },
    /// Conversion to the node type.
    Convert {
        operand: Box<Expr>,
        checked: bool,
        method: Option<MethodRef>,
    },
    /// Checked reference conversion to the node type; null when the operand is not an instance.
    TypeAs {
        operand: Box<Expr>,
    },
    /// Throw the operand, or rethrow the current exception when absent.
    Throw {
        operand: Option<Box<Expr>>,
    },
    Goto {
        kind: GotoKind,
        target: LabelTarget,
        value: Option<Box<Expr>>,
    },
    Label {
        target: LabelTarget,
        default: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Member {
    Field(FieldRef),
    Property(PropertyRef),
    ArrayLength,
    ListCount,
    StrLength,
    HasValue,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Plus,
    /// Logical negation on booleans, bitwise complement on integers.
    Not,
    Increment,
    Decrement,
    IsTrue,
    IsFalse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    AndAlso,
    OrElse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

impl AssignOp {
    /// The arithmetic operator a compound assignment applies.
    pub fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Add | AssignOp::PreIncrement | AssignOp::PostIncrement => BinaryOp::Add,
            AssignOp::Sub | AssignOp::PreDecrement | AssignOp::PostDecrement => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Rem => BinaryOp::Rem,
            AssignOp::And => BinaryOp::And,
            AssignOp::Or => BinaryOp::Or,
            AssignOp::Xor => BinaryOp::Xor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
            AssignOp::Assign => return None,
        })
    }

    pub fn is_step(self) -> bool {
        matches!(
            self,
            AssignOp::PreIncrement | AssignOp::PreDecrement | AssignOp::PostIncrement | AssignOp::PostDecrement
        )
    }

    /// Whether the expression yields the value held before the update.
    pub fn yields_old_value(self) -> bool {
        matches!(self, AssignOp::PostIncrement | AssignOp::PostDecrement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoKind {
    Goto,
    Break,
    Continue,
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub tests: Vec<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchBlock {
    /// Exception type caught; `Object` catches everything.
    pub ty: Ty,
    pub variable: Option<Variable>,
    pub filter: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayInit {
    /// One-dimensional array holding the given elements.
    Elements(Vec<Expr>),
    /// Array with the given lengths; one bound per dimension.
    Bounds(Vec<Expr>),
}

/// One `Add` call of a collection initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInit {
    pub add: MethodRef,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberTarget {
    Field(FieldRef),
    Property(PropertyRef),
}

/// Member initializer binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    Assign { member: MemberTarget, value: Expr },
    /// Initialize members of the object already held by the member.
    Member { member: MemberTarget, bindings: Vec<Binding> },
    /// Add elements to the collection already held by the member.
    List { member: MemberTarget, items: Vec<ElementInit> },
}

/// Implicit leading parameters a compiled lambda receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiddenParams {
    pub constants: bool,
    pub closure: bool,
}

impl HiddenParams {
    pub fn count(&self) -> usize {
        usize::from(self.constants) + usize::from(self.closure)
    }
}

/// A function body with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaExpr {
    pub name: String,
    pub params: Vec<Variable>,
    pub ret: Ty,
    pub body: Expr,
    #[serde(default)]
    pub hidden: HiddenParams,
}

impl LambdaExpr {
    /// Static type of the function value.
    pub fn func_ty(&self) -> Ty {
        Ty::func(self.params.iter().map(|p| p.ty.clone()).collect(), self.ret.clone())
    }
}

impl ExprKind {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Constant(_) => "constant",
            ExprKind::Default => "default",
            ExprKind::Parameter(_) => "parameter",
            ExprKind::Hoisted(_) => "hoisted constant",
            ExprKind::ClosureVar(_) => "closure variable",
            ExprKind::Member { .. } => "member access",
            ExprKind::Index { .. } => "index",
            ExprKind::Unary { .. } => "unary",
            ExprKind::Binary { .. } => "binary",
            ExprKind::Logical { .. } => "logical",
            ExprKind::Coalesce { .. } => "coalesce",
            ExprKind::Conditional { .. } => "conditional",
            ExprKind::Block { .. } => "block",
            ExprKind::Loop { .. } => "loop",
            ExprKind::Switch { .. } => "switch",
            ExprKind::Try { .. } => "try",
            ExprKind::Call { .. } => "call",
            ExprKind::Invoke { .. } => "invoke",
            ExprKind::New { .. } => "new",
            ExprKind::NewArray { .. } => "new array",
            ExprKind::ListInit { .. } => "list init",
            ExprKind::MemberInit { .. } => "member init",
            ExprKind::Lambda(_) => "lambda",
            ExprKind::Assign { .. } => "assign",
            ExprKind::TypeTest { .. } => "type test",
            ExprKind::Convert { .. } => "convert",
            ExprKind::TypeAs { .. } => "type as",
            ExprKind::Throw { .. } => "throw",
            ExprKind::Goto { .. } => "goto",
            ExprKind::Label { .. } => "label",
        }
    }
}
