//! Finished routines, the builder that produces them, and the disassembler.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::instr::{Instr, Label, Region, RegionKind, RegionSpec, ResolvedKind};
use crate::metadata::TypeRegistry;
use crate::types::Ty;

/// Failure finishing a routine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("label L{0} is referenced but never marked")]
    UnmarkedLabel(u32),
    #[error("label L{0} is marked more than once")]
    LabelMarkedTwice(u32),
}

/// An executable unit: code, locals signature, exception regions and nested units.
#[derive(Debug, Clone)]
pub struct Routine {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub locals: Vec<Ty>,
    pub code: Vec<Instr>,
    /// Instruction index of each label.
    pub labels: Vec<usize>,
    /// Innermost regions first.
    pub regions: Vec<Region>,
    /// Targets of `ldftn` (nested lambdas and shared helpers).
    pub children: Vec<Arc<Routine>>,
}

impl Routine {
    pub fn target(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied()
    }

    /// Render an `IL_0000: opcode operand` listing.
    pub fn disassemble(&self, registry: &TypeRegistry) -> String {
        let mut out = String::new();
        let params: Vec<String> = self.params.iter().map(|p| p.display(registry)).collect();
        let _ = writeln!(
            out,
            ".routine {}({}) -> {}",
            self.name,
            params.join(", "),
            self.ret.display(registry)
        );
        if !self.locals.is_empty() {
            let locals: Vec<String> = self
                .locals
                .iter()
                .enumerate()
                .map(|(i, t)| format!("[{}] {}", i, t.display(registry)))
                .collect();
            let _ = writeln!(out, ".locals ({})", locals.join(", "));
        }
        let target = |l: Label| self.target(l).unwrap_or(usize::MAX);
        for (pc, instr) in self.code.iter().enumerate() {
            let _ = writeln!(out, "IL_{:04x}: {}", pc, instr.render(registry, &target));
        }
        for region in &self.regions {
            let handler = match &region.kind {
                ResolvedKind::Catch(t) => format!("catch {}", t.display(registry)),
                ResolvedKind::Filter(start) => format!("filter IL_{:04x}", start),
                ResolvedKind::Finally => "finally".to_string(),
                ResolvedKind::Fault => "fault".to_string(),
            };
            let _ = writeln!(
                out,
                ".try IL_{:04x} to IL_{:04x} {} handler IL_{:04x} to IL_{:04x}",
                region.try_start, region.try_end, handler, region.handler_start, region.handler_end
            );
        }
        for (i, child) in self.children.iter().enumerate() {
            let _ = writeln!(out, ".child #{} {}", i, child.name);
        }
        out
    }
}

/// Instruction sink used while emitting a routine.
#[derive(Debug)]
pub struct RoutineBuilder {
    name: String,
    params: Vec<Ty>,
    ret: Ty,
    locals: Vec<Ty>,
    code: Vec<Instr>,
    labels: Vec<Option<usize>>,
    regions: Vec<RegionSpec>,
    children: Vec<Arc<Routine>>,
}

impl RoutineBuilder {
    pub fn new(name: impl Into<String>, params: Vec<Ty>, ret: Ty) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            locals: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            regions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Ty] {
        &self.params
    }

    pub fn ret(&self) -> &Ty {
        &self.ret
    }

    pub fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    /// Index the next emitted instruction will have.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Overwrite an already emitted instruction.
    pub fn patch(&mut self, position: usize, instr: Instr) {
        if let Some(slot) = self.code.get_mut(position) {
            *slot = instr;
        }
    }

    /// The most recently emitted instruction.
    pub fn last(&self) -> Option<&Instr> {
        self.code.last()
    }

    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn mark_label(&mut self, label: Label) -> Result<(), BuildError> {
        let position = self.code.len();
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(position);
                Ok(())
            }
            Some(Some(_)) => Err(BuildError::LabelMarkedTwice(label.0)),
            None => Err(BuildError::UnmarkedLabel(label.0)),
        }
    }

    pub fn is_marked(&self, label: Label) -> bool {
        matches!(self.labels.get(label.0 as usize), Some(Some(_)))
    }

    pub fn declare_local(&mut self, ty: Ty) -> u16 {
        self.locals.push(ty);
        (self.locals.len() - 1) as u16
    }

    pub fn local_ty(&self, slot: u16) -> Option<&Ty> {
        self.locals.get(slot as usize)
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Register a protected region. Inner regions must be added before the regions enclosing them.
    pub fn add_region(&mut self, region: RegionSpec) {
        self.regions.push(region);
    }

    pub fn add_child(&mut self, child: Arc<Routine>) -> u32 {
        if let Some(existing) = self.children.iter().position(|c| Arc::ptr_eq(c, &child)) {
            return existing as u32;
        }
        self.children.push(child);
        (self.children.len() - 1) as u32
    }

    /// Resolve labels and produce the finished routine.
    pub fn finish(self) -> Result<Routine, BuildError> {
        let labels = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, pos)| pos.ok_or(BuildError::UnmarkedLabel(i as u32)))
            .collect::<Result<Vec<_>, _>>()?;
        let resolve = |l: Label| labels.get(l.0 as usize).copied().ok_or(BuildError::UnmarkedLabel(l.0));
        let regions = self
            .regions
            .iter()
            .map(|r| {
                Ok(Region {
                    try_start: resolve(r.try_start)?,
                    try_end: resolve(r.try_end)?,
                    handler_start: resolve(r.handler_start)?,
                    handler_end: resolve(r.handler_end)?,
                    kind: match &r.kind {
                        RegionKind::Catch(t) => ResolvedKind::Catch(t.clone()),
                        RegionKind::Filter(start) => ResolvedKind::Filter(resolve(*start)?),
                        RegionKind::Finally => ResolvedKind::Finally,
                        RegionKind::Fault => ResolvedKind::Fault,
                    },
                    stack_mark: r.stack_mark,
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;
        Ok(Routine {
            name: self.name,
            params: self.params,
            ret: self.ret,
            locals: self.locals,
            code: self.code,
            labels,
            regions,
            children: self.children,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::instr::Const;
    use exprc_core::Num;

    #[test]
    fn test_unmarked_label_is_rejected() {
        let mut b = RoutineBuilder::new("f", vec![], Ty::Void);
        let l = b.define_label();
        b.emit(Instr::Br(l));
        assert_eq!(b.finish().unwrap_err(), BuildError::UnmarkedLabel(0));
    }

    #[test]
    fn test_double_mark_is_rejected() {
        let mut b = RoutineBuilder::new("f", vec![], Ty::Void);
        let l = b.define_label();
        b.mark_label(l).unwrap();
        assert_eq!(b.mark_label(l), Err(BuildError::LabelMarkedTwice(0)));
    }

    #[test]
    fn test_disassembly_listing() {
        let reg = TypeRegistry::new();
        let mut b = RoutineBuilder::new("answer", vec![Ty::I32], Ty::I32);
        let done = b.define_label();
        b.emit(Instr::LdArg(0));
        b.emit(Instr::BrTrue(done));
        b.emit(Instr::Ldc(Const::Num(Num::I32(42))));
        b.emit(Instr::Ret);
        b.mark_label(done).unwrap();
        b.emit(Instr::Ldc(Const::Num(Num::I32(0))));
        b.emit(Instr::Ret);
        let r = b.finish().unwrap();
        assert_eq!(
            r.disassemble(&reg),
            ".routine answer(int) -> int\n\
             IL_0000: ldarg.0\n\
             IL_0001: brtrue IL_0004\n\
             IL_0002: ldc.i4 42\n\
             IL_0003: ret\n\
             IL_0004: ldc.i4 0\n\
             IL_0005: ret\n"
        );
    }
}
