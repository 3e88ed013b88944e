//! The instruction set.
//!
//! A typed stack machine in the spirit of CLR intermediate language: operands are pushed and popped from a per-frame
//! evaluation stack, locals and arguments live in numbered slots, and protected regions are described out of band
//! (see [`Region`]).

use std::fmt;
use std::sync::Arc;

use exprc_core::{ArithOp, BitOp, Num, NumKind};

use crate::metadata::{FieldRef, MethodRef, TypeRegistry};
use crate::types::Ty;

/// Branch target; resolved to an instruction index when the routine is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// Inline constant operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    Num(Num),
    Str(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "ceq",
            CmpOp::Ne => "cne",
            CmpOp::Lt => "clt",
            CmpOp::Le => "cle",
            CmpOp::Gt => "cgt",
            CmpOp::Ge => "cge",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Nop,
    Ldc(Const),
    /// Push the zero value of a type.
    LdDefault(Ty),

    LdArg(u16),
    LdArgA(u16),
    StArg(u16),
    LdLoc(u16),
    LdLocA(u16),
    StLoc(u16),
    Dup,
    Pop,

    Arith { op: ArithOp, checked: bool },
    Bitwise(BitOp),
    Neg { checked: bool },
    /// Bitwise complement on integers, logical negation on booleans.
    Not,
    Conv { to: NumKind, checked: bool },
    Cmp(CmpOp),

    Br(Label),
    BrTrue(Label),
    BrFalse(Label),
    /// Pop a value; jump when it is null or an absent optional.
    BrNull(Label),
    /// Pop a value; jump when it is neither null nor an absent optional.
    BrInst(Label),
    /// Pop an `int`; jump to `targets[value]` when in range, otherwise fall through.
    Switch(Vec<Label>),
    /// Exit a protected region, running the enclosing `finally` handlers that the jump leaves.
    Leave(Label),
    EndFinally,
    /// Pop the filter verdict (`bool`) and end the filter block.
    EndFilter,
    Throw,
    Rethrow,
    Ret,

    NewObj(MethodRef),
    /// Pop an address and store the zero value of the type there.
    InitObj(Ty),
    LdFld(FieldRef),
    LdFldA(FieldRef),
    StFld(FieldRef),
    LdSFld(FieldRef),
    LdSFldA(FieldRef),
    StSFld(FieldRef),
    Call(MethodRef),
    /// Call a child routine directly (shared helpers).
    CallChild(u32),

    /// Pop a length and allocate a single-dimension array.
    NewArr(Ty),
    /// Pop `rank` lengths and allocate a multi-dimensional array.
    NewMdArr { elem: Ty, rank: u32 },
    NewList(Ty),
    LdLen,
    LdElem,
    LdElemA,
    StElem,
    LdInd,
    StInd,

    /// Optional scalar primitives.
    OptHasValue,
    OptGetValueOrDefault(Ty),
    OptGetValue,
    OptWrap,

    /// Push the value if it is an instance of the type (subclasses included when `exact` is false), else null.
    IsInst { ty: Ty, exact: bool },
    CastClass(Ty),
    Box(Ty),
    UnboxAny(Ty),

    /// Push a function pointer to a child routine.
    LdFtn(u32),
    /// Pop a function pointer and `captured` values; push a function value invoking the pointer with the captured
    /// values prepended to its arguments.
    NewInvoker { captured: u16 },
    /// Pop a function value and `argc` arguments; call it.
    CallInvoker { argc: u16 },

    /// Record the current evaluation stack depth in a local.
    MarkStack(u16),
    /// Truncate the evaluation stack to the depth recorded in a local.
    ResetStack(u16),
    /// Pop a switch value and push its bucket index in a table of `size` buckets.
    HashBucket { size: u32 },
}

/// Handler kind of a protected region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionKind {
    Catch(Ty),
    /// Filter block starting at the given label; the handler starts after its `endfilter`.
    Filter(Label),
    Finally,
    Fault,
}

/// A protected region described by labels, before the routine is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSpec {
    pub try_start: Label,
    pub try_end: Label,
    pub handler_start: Label,
    pub handler_end: Label,
    pub kind: RegionKind,
    /// Local holding the stack depth at try entry.
    pub stack_mark: u16,
}

/// A protected region with resolved instruction ranges (`start..end`).
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub try_start: usize,
    pub try_end: usize,
    pub handler_start: usize,
    pub handler_end: usize,
    pub kind: ResolvedKind,
    pub stack_mark: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedKind {
    Catch(Ty),
    Filter(usize),
    Finally,
    Fault,
}

impl Region {
    pub fn try_contains(&self, pc: usize) -> bool {
        (self.try_start..self.try_end).contains(&pc)
    }

    /// Whether `pc` is inside the handler block (or the filter block) of this region.
    pub fn handler_contains(&self, pc: usize) -> bool {
        let start = match self.kind {
            ResolvedKind::Filter(filter) => filter,
            _ => self.handler_start,
        };
        (start..self.handler_end).contains(&pc)
    }

    pub fn try_len(&self) -> usize {
        self.try_end - self.try_start
    }
}

impl Instr {
    /// Render for disassembly; `target` maps labels to instruction indices.
    pub fn render(&self, registry: &TypeRegistry, target: &dyn Fn(Label) -> usize) -> String {
        let il = |l: &Label| format!("IL_{:04x}", target(*l));
        let ty = |t: &Ty| t.display(registry);
        match self {
            Instr::Nop => "nop".into(),
            Instr::Ldc(c) => match c {
                Const::Null => "ldnull".into(),
                Const::Bool(b) => format!("ldc.bool {}", b),
                Const::Num(n) => format!("ldc.{} {}", n.kind().il_suffix(), n),
                Const::Str(s) => format!("ldstr {:?}", s),
            },
            Instr::LdDefault(t) => format!("lddefault {}", ty(t)),
            Instr::LdArg(i) => format!("ldarg.{}", i),
            Instr::LdArgA(i) => format!("ldarga.{}", i),
            Instr::StArg(i) => format!("starg.{}", i),
            Instr::LdLoc(i) => format!("ldloc.{}", i),
            Instr::LdLocA(i) => format!("ldloca.{}", i),
            Instr::StLoc(i) => format!("stloc.{}", i),
            Instr::Dup => "dup".into(),
            Instr::Pop => "pop".into(),
            Instr::Arith { op, checked } => {
                if *checked {
                    format!("{}.ovf", op.mnemonic())
                } else {
                    op.mnemonic().into()
                }
            }
            Instr::Bitwise(op) => op.mnemonic().into(),
            Instr::Neg { checked: true } => "neg.ovf".into(),
            Instr::Neg { checked: false } => "neg".into(),
            Instr::Not => "not".into(),
            Instr::Conv { to, checked } => {
                if *checked {
                    format!("conv.ovf.{}", to.il_suffix())
                } else {
                    format!("conv.{}", to.il_suffix())
                }
            }
            Instr::Cmp(op) => op.mnemonic().into(),
            Instr::Br(l) => format!("br {}", il(l)),
            Instr::BrTrue(l) => format!("brtrue {}", il(l)),
            Instr::BrFalse(l) => format!("brfalse {}", il(l)),
            Instr::BrNull(l) => format!("brnull {}", il(l)),
            Instr::BrInst(l) => format!("brinst {}", il(l)),
            Instr::Switch(ls) => {
                let targets: Vec<String> = ls.iter().map(il).collect();
                format!("switch ({})", targets.join(", "))
            }
            Instr::Leave(l) => format!("leave {}", il(l)),
            Instr::EndFinally => "endfinally".into(),
            Instr::EndFilter => "endfilter".into(),
            Instr::Throw => "throw".into(),
            Instr::Rethrow => "rethrow".into(),
            Instr::Ret => "ret".into(),
            Instr::NewObj(m) => format!("newobj {}", registry.method_name(m)),
            Instr::InitObj(t) => format!("initobj {}", ty(t)),
            Instr::LdFld(f) => format!("ldfld {}", registry.field_name(*f)),
            Instr::LdFldA(f) => format!("ldflda {}", registry.field_name(*f)),
            Instr::StFld(f) => format!("stfld {}", registry.field_name(*f)),
            Instr::LdSFld(f) => format!("ldsfld {}", registry.field_name(*f)),
            Instr::LdSFldA(f) => format!("ldsflda {}", registry.field_name(*f)),
            Instr::StSFld(f) => format!("stsfld {}", registry.field_name(*f)),
            Instr::Call(m) => format!("call {}", registry.method_name(m)),
            Instr::CallChild(i) => format!("call #{}", i),
            Instr::NewArr(t) => format!("newarr {}", ty(t)),
            Instr::NewMdArr { elem, rank } => format!("newarr {}", Ty::md_array(elem.clone(), *rank).display(registry)),
            Instr::NewList(t) => format!("newlist {}", ty(t)),
            Instr::LdLen => "ldlen".into(),
            Instr::LdElem => "ldelem".into(),
            Instr::LdElemA => "ldelema".into(),
            Instr::StElem => "stelem".into(),
            Instr::LdInd => "ldind".into(),
            Instr::StInd => "stind".into(),
            Instr::OptHasValue => "opt.has_value".into(),
            Instr::OptGetValueOrDefault(t) => format!("opt.get_value_or_default {}", ty(t)),
            Instr::OptGetValue => "opt.get_value".into(),
            Instr::OptWrap => "opt.wrap".into(),
            Instr::IsInst { ty: t, exact } => {
                if *exact {
                    format!("isinst.exact {}", ty(t))
                } else {
                    format!("isinst {}", ty(t))
                }
            }
            Instr::CastClass(t) => format!("castclass {}", ty(t)),
            Instr::Box(t) => format!("box {}", ty(t)),
            Instr::UnboxAny(t) => format!("unbox.any {}", ty(t)),
            Instr::LdFtn(i) => format!("ldftn #{}", i),
            Instr::NewInvoker { captured } => format!("newinvoker {}", captured),
            Instr::CallInvoker { argc } => format!("callinvoker {}", argc),
            Instr::MarkStack(i) => format!("markstack {}", i),
            Instr::ResetStack(i) => format!("resetstack {}", i),
            Instr::HashBucket { size } => format!("hashbucket {}", size),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}
