//! Shared helper routines used by auto-extension.
//!
//! Helpers are generic over an element type and synthesized on first use. The cache is shared by every compilation
//! of a [`crate::backend::Compiler`] (and may be shared across compilers); lookups take a read lock and creation is
//! double-checked under the write lock so each helper is built once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use exprc_vm::{CmpOp, Instr, Intrinsic, MethodRef, Routine, RoutineBuilder, Ty};

use super::errors::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperKind {
    /// `(T[] array, int index) -> T[]`: the array itself when `index` is in range, otherwise a copy grown to
    /// `index + 1` elements. A null array counts as empty.
    EnsureArrayLength,
    /// `(List<T> list, int count) -> void`: append default elements until the list holds `count` items.
    EnsureListCount,
}

impl HelperKind {
    pub fn name(self) -> &'static str {
        match self {
            HelperKind::EnsureArrayLength => "EnsureArrayLength",
            HelperKind::EnsureListCount => "EnsureListCount",
        }
    }
}

#[derive(Debug, Default)]
pub struct HelperCache {
    entries: RwLock<HashMap<(HelperKind, Ty), Arc<Routine>>>,
}

impl HelperCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of helpers created so far.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the helper for `(kind, elem)`, synthesizing it on first use.
    pub fn get_or_create(&self, kind: HelperKind, elem: &Ty) -> Result<Arc<Routine>, CompileError> {
        let key = (kind, elem.clone());
        {
            let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(existing) = entries.get(&key) {
                return Ok(existing.clone());
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        let routine = Arc::new(build(kind, elem)?);
        tracing::debug!(helper = kind.name(), elem = ?elem, "synthesized helper routine");
        entries.insert(key, routine.clone());
        Ok(routine)
    }
}

fn build(kind: HelperKind, elem: &Ty) -> Result<Routine, CompileError> {
    let one = Instr::Ldc(exprc_vm::Const::Num(exprc_core::Num::I32(1)));
    let zero = Instr::Ldc(exprc_vm::Const::Num(exprc_core::Num::I32(0)));
    match kind {
        HelperKind::EnsureArrayLength => {
            let array = Ty::array(elem.clone());
            let mut b = RoutineBuilder::new(kind.name(), vec![array.clone(), Ty::I32], array);
            let non_null = b.define_label();
            let grow = b.define_label();
            b.emit(Instr::LdArg(0));
            b.emit(Instr::BrInst(non_null));
            b.emit(zero);
            b.emit(Instr::NewArr(elem.clone()));
            b.emit(Instr::StArg(0));
            b.mark_label(non_null)?;
            b.emit(Instr::LdArg(1));
            b.emit(Instr::LdArg(0));
            b.emit(Instr::LdLen);
            b.emit(Instr::Cmp(CmpOp::Lt));
            b.emit(Instr::BrFalse(grow));
            b.emit(Instr::LdArg(0));
            b.emit(Instr::Ret);
            b.mark_label(grow)?;
            b.emit(Instr::LdArg(0));
            b.emit(Instr::LdArg(1));
            b.emit(one);
            b.emit(Instr::Arith {
                op: exprc_core::ArithOp::Add,
                checked: true,
            });
            b.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ArrayResize(elem.clone()))));
            b.emit(Instr::Ret);
            Ok(b.finish()?)
        }
        HelperKind::EnsureListCount => {
            let list = Ty::list(elem.clone());
            let mut b = RoutineBuilder::new(kind.name(), vec![list, Ty::I32], Ty::Void);
            let top = b.define_label();
            let done = b.define_label();
            b.mark_label(top)?;
            b.emit(Instr::LdArg(0));
            b.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ListCount(elem.clone()))));
            b.emit(Instr::LdArg(1));
            b.emit(Instr::Cmp(CmpOp::Lt));
            b.emit(Instr::BrFalse(done));
            b.emit(Instr::LdArg(0));
            b.emit(Instr::LdDefault(elem.clone()));
            b.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ListAdd(elem.clone()))));
            b.emit(Instr::Br(top));
            b.mark_label(done)?;
            b.emit(Instr::Ret);
            Ok(b.finish()?)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_are_created_once_per_key() {
        let cache = HelperCache::new();
        let a = cache.get_or_create(HelperKind::EnsureListCount, &Ty::I32).unwrap();
        let b = cache.get_or_create(HelperKind::EnsureListCount, &Ty::I32).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_create(HelperKind::EnsureListCount, &Ty::Str).unwrap();
        cache.get_or_create(HelperKind::EnsureArrayLength, &Ty::I32).unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_concurrent_lookups_share_one_routine() {
        let cache = Arc::new(HelperCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get_or_create(HelperKind::EnsureArrayLength, &Ty::I64).unwrap())
            })
            .collect();
        let routines: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(routines.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }
}
