//! Programmatic module assembly for tests and embedders without a compiler
//! front end (§6 "any layout the compiler emits... is acceptable").
//!
//! There is no textual assembler in scope here; `ModuleBuilder` is the
//! equivalent of the teacher's test-only `ChunkBuilder` helpers, letting a
//! test construct a [`Module`] instruction by instruction while the builder
//! tracks ref allocation so callers don't have to compute `index_to_ref` by
//! hand.

use crate::bytecode::module::{BodySlice, Code, DebugInfo, Module};
use crate::bytecode::op::{Opcode, Operand, index_to_ref};
use crate::frame::Ref;
use crate::intern::{Interner, NameId};

/// One entry in a [`BodyBuilder::build_map`] literal.
#[derive(Clone, Copy)]
pub enum MapEntry {
    /// A literal `key: value` pair.
    Pair(Ref, Ref),
    /// `**source` — `source` must already be the result of [`BodyBuilder::spread`]
    /// against a `map`-valued ref.
    Spread(Ref),
}

/// Builds one function body (`main` or a nested function) within a
/// [`ModuleBuilder`]. Each `emit*` call appends one instruction and returns
/// the [`Ref`] that instruction's result lives at, mirroring how the
/// compiler assigns refs by instruction position.
pub struct BodyBuilder<'m> {
    module: &'m mut ModuleBuilder,
    params: u32,
    start: u32,
}

impl BodyBuilder<'_> {
    fn next_ref(&self) -> Ref {
        let instruction_index = self.module.code.len() as u32 - self.start;
        index_to_ref(instruction_index, self.params)
    }

    /// The ref holding this body's `index`-th positional parameter — params
    /// occupy the low refs ahead of any instruction's own result (§4.6
    /// `index_to_ref`), so this is just `Ref::new(index)`.
    #[must_use]
    pub fn param(&self, index: u32) -> Ref {
        debug_assert!(index < self.params, "param index out of range for this body's arity");
        Ref::new(index)
    }

    fn emit(&mut self, op: Opcode, data: Operand) -> Ref {
        let ref_ = self.next_ref();
        self.module.code.push(op, data);
        ref_
    }

    pub fn nop(&mut self) -> Ref {
        self.emit(Opcode::Nop, Operand::None)
    }

    pub fn int_const(&mut self, value: i64) -> Ref {
        let index = u32::try_from(self.module.ints.len()).unwrap();
        self.module.ints.push(value);
        self.emit(Opcode::Int, Operand::Int(index))
    }

    pub fn num_const(&mut self, value: f64) -> Ref {
        let index = u32::try_from(self.module.nums.len()).unwrap();
        self.module.nums.push(value);
        self.emit(Opcode::Num, Operand::Num(index))
    }

    pub fn str_const(&mut self, value: &str) -> Ref {
        let offset = u32::try_from(self.module.strings.len()).unwrap();
        self.module.strings.push_str(value);
        let len = u32::try_from(value.len()).unwrap();
        self.emit(Opcode::Str, Operand::Str { offset, len })
    }

    pub fn primitive(&mut self, tag: crate::bytecode::op::PrimitiveTag) -> Ref {
        self.emit(Opcode::Primitive, Operand::Primitive(tag))
    }

    pub fn bin(&mut self, op: Opcode, lhs: Ref, rhs: Ref) -> Ref {
        self.emit(op, Operand::Bin { lhs, rhs })
    }

    pub fn un(&mut self, op: Opcode, operand: Ref) -> Ref {
        self.emit(op, Operand::Un(operand))
    }

    pub fn copy(&mut self, source: Ref) -> Ref {
        self.emit(Opcode::Copy, Operand::Un(source))
    }

    pub fn build_list(&mut self, elements: &[Ref]) -> Ref {
        let extra = self.module.push_extra(elements);
        self.emit(Opcode::BuildList, extra)
    }

    pub fn build_tuple(&mut self, elements: &[Ref]) -> Ref {
        let extra = self.module.push_extra(elements);
        self.emit(Opcode::BuildTuple, extra)
    }

    /// A map literal's `extra` pool is flat, same as `build_list`/
    /// `build_tuple`'s: a [`MapEntry::Pair`] contributes its key ref then its
    /// value ref, while a [`MapEntry::Spread`] ref (built with
    /// [`Self::spread`] against a `map`) contributes just the one
    /// spread-tagged ref, which `vm::collections::flatten_map_pairs` expands
    /// into that source map's own pairs at construction time.
    pub fn build_map(&mut self, entries: &[MapEntry]) -> Ref {
        let mut flat = Vec::with_capacity(entries.len() * 2);
        for entry in entries {
            match *entry {
                MapEntry::Pair(key, value) => {
                    flat.push(key);
                    flat.push(value);
                }
                MapEntry::Spread(source) => flat.push(source),
            }
        }
        let extra = self.module.push_extra(&flat);
        self.emit(Opcode::BuildMap, extra)
    }

    pub fn build_range(&mut self, start: Ref, end: Ref) -> Ref {
        self.emit(Opcode::BuildRange, Operand::Bin { lhs: start, rhs: end })
    }

    pub fn build_range_step(&mut self, start: Ref, end: Ref, step: Ref) -> Ref {
        let extra = self.module.push_extra(&[start, end, step]);
        self.emit(Opcode::BuildRangeStep, extra)
    }

    pub fn build_error(&mut self, value: Ref) -> Ref {
        self.emit(Opcode::BuildError, Operand::Un(value))
    }

    pub fn build_error_null(&mut self) -> Ref {
        self.emit(Opcode::BuildErrorNull, Operand::None)
    }

    pub fn build_tagged(&mut self, name: NameId, value: Ref) -> Ref {
        self.emit(Opcode::BuildTagged, Operand::NameRef { name, value })
    }

    pub fn build_tagged_null(&mut self, name: NameId) -> Ref {
        self.emit(Opcode::BuildTaggedNull, Operand::Name(name))
    }

    /// Captures plus a `(body_start, body_len, arg_count, variadic)` header,
    /// packed into `Module::extra` ahead of the capture refs themselves —
    /// see `vm::collections::build_func`.
    pub fn build_func(&mut self, body: BodySlice, arg_count: u32, variadic: bool, captures: &[Ref]) -> Ref {
        let mut flat = Vec::with_capacity(captures.len() + 4);
        flat.push(Ref::new(body.start));
        flat.push(Ref::new(body.len));
        flat.push(Ref::new(arg_count));
        flat.push(Ref::new(u32::from(variadic)));
        flat.extend_from_slice(captures);
        let extra = self.module.push_extra(&flat);
        self.emit(Opcode::BuildFunc, extra)
    }

    pub fn get(&mut self, container: Ref, index: Ref) -> Ref {
        self.emit(Opcode::Get, Operand::Bin { lhs: container, rhs: index })
    }

    pub fn get_int(&mut self, container: Ref, index: i64) -> Ref {
        self.emit(Opcode::GetInt, Operand::GetInt { container, index })
    }

    pub fn get_or_null(&mut self, container: Ref, key: Ref) -> Ref {
        self.emit(Opcode::GetOrNull, Operand::Bin { lhs: container, rhs: key })
    }

    pub fn unwrap_error(&mut self, value: Ref) -> Ref {
        self.emit(Opcode::UnwrapError, Operand::Un(value))
    }

    pub fn unwrap_tagged(&mut self, name: NameId, value: Ref) -> Ref {
        self.emit(Opcode::UnwrapTagged, Operand::NameRef { name, value })
    }

    pub fn unwrap_tagged_or_null(&mut self, name: NameId, value: Ref) -> Ref {
        self.emit(Opcode::UnwrapTaggedOrNull, Operand::NameRef { name, value })
    }

    pub fn spread(&mut self, value: Ref) -> Ref {
        self.emit(Opcode::Spread, Operand::Un(value))
    }

    pub fn check_len(&mut self, operand: Ref, len: u32) -> Ref {
        self.emit(Opcode::CheckLen, Operand::RefLen { operand, len })
    }

    pub fn assert_len(&mut self, operand: Ref, len: u32) -> Ref {
        self.emit(Opcode::AssertLen, Operand::RefLen { operand, len })
    }

    pub fn spread_dest(&mut self, operand: Ref, head_len: u32) -> Ref {
        self.emit(Opcode::SpreadDest, Operand::RefLen { operand, len: head_len })
    }

    pub fn iter_init(&mut self, source: Ref) -> Ref {
        self.emit(Opcode::IterInit, Operand::Un(source))
    }

    pub fn iter_next(&mut self, iterator: Ref, offset: u32) -> Ref {
        self.emit(Opcode::IterNext, Operand::JumpCondition { operand: iterator, offset })
    }

    pub fn move_(&mut self, source: Ref) -> Ref {
        self.emit(Opcode::Move, Operand::Un(source))
    }

    pub fn copy_un(&mut self, source: Ref) -> Ref {
        self.emit(Opcode::CopyUn, Operand::Un(source))
    }

    pub fn load_global(&mut self, slot: u32) -> Ref {
        self.emit(Opcode::LoadGlobal, Operand::Len(slot))
    }

    pub fn jump_if_null(&mut self, operand: Ref, offset: u32) -> Ref {
        self.emit(Opcode::JumpIfNull, Operand::JumpCondition { operand, offset })
    }

    pub fn unwrap_error_or_jump(&mut self, operand: Ref, offset: u32) -> Ref {
        self.emit(Opcode::UnwrapErrorOrJump, Operand::JumpCondition { operand, offset })
    }

    pub fn call_zero(&mut self, callee: Ref) -> Ref {
        self.emit(Opcode::CallZero, Operand::Un(callee))
    }

    pub fn call_one(&mut self, callee: Ref, arg: Ref) -> Ref {
        self.emit(Opcode::CallOne, Operand::Bin { lhs: callee, rhs: arg })
    }

    pub fn this_call(&mut self, this: Ref, callee: Ref, args: &[Ref]) -> Ref {
        let mut flat = Vec::with_capacity(args.len() + 2);
        flat.push(this);
        flat.push(callee);
        flat.extend_from_slice(args);
        let extra = self.module.push_extra(&flat);
        self.emit(Opcode::ThisCall, extra)
    }

    pub fn this_call_zero(&mut self, this: Ref, callee: Ref) -> Ref {
        self.emit(Opcode::ThisCallZero, Operand::Bin { lhs: this, rhs: callee })
    }

    pub fn import(&mut self, name: &str) -> Ref {
        let offset = u32::try_from(self.module.strings.len()).unwrap();
        self.module.strings.push_str(name);
        let len = u32::try_from(name.len()).unwrap();
        self.emit(Opcode::Import, Operand::Str { offset, len })
    }

    pub fn set(&mut self, container: Ref, index: Ref, value: Ref) -> Ref {
        let extra = self.module.push_extra(&[container, index, value]);
        self.emit(Opcode::Set, extra)
    }

    pub fn append(&mut self, container: Ref, value: Ref) -> Ref {
        self.emit(Opcode::Append, Operand::Bin { lhs: container, rhs: value })
    }

    pub fn in_(&mut self, item: Ref, container: Ref) -> Ref {
        self.emit(Opcode::In, Operand::Bin { lhs: item, rhs: container })
    }

    pub fn jump(&mut self, target: u32) -> Ref {
        self.emit(Opcode::Jump, Operand::Jump(target))
    }

    pub fn jump_if_false(&mut self, operand: Ref, offset: u32) -> Ref {
        self.emit(Opcode::JumpIfFalse, Operand::JumpCondition { operand, offset })
    }

    pub fn jump_if_true(&mut self, operand: Ref, offset: u32) -> Ref {
        self.emit(Opcode::JumpIfTrue, Operand::JumpCondition { operand, offset })
    }

    pub fn push_err_handler(&mut self, target: Ref, offset: u32) -> Ref {
        self.emit(Opcode::PushErrHandler, Operand::Handler { target, offset })
    }

    /// `target` is the absolute instruction index to skip to when the
    /// protected region completed without `throw` landing in the handler's
    /// target ref (§4.6 `pop_err_handler`).
    pub fn pop_err_handler(&mut self, target: u32) -> Ref {
        self.emit(Opcode::PopErrHandler, Operand::Jump(target))
    }

    pub fn throw(&mut self, value: Ref) -> Ref {
        self.emit(Opcode::Throw, Operand::Un(value))
    }

    pub fn call(&mut self, callee: Ref, args: &[Ref]) -> Ref {
        let mut flat = Vec::with_capacity(args.len() + 1);
        flat.push(callee);
        flat.extend_from_slice(args);
        let extra = self.module.push_extra(&flat);
        self.emit(Opcode::Call, extra)
    }

    pub fn ret(&mut self, value: Ref) -> Ref {
        self.emit(Opcode::Ret, Operand::Un(value))
    }

    pub fn ret_null(&mut self) -> Ref {
        self.emit(Opcode::RetNull, Operand::None)
    }

    pub fn discard(&mut self, value: Ref) -> Ref {
        self.emit(Opcode::Discard, Operand::Un(value))
    }

    pub fn load_capture(&mut self, slot: u32) -> Ref {
        self.emit(Opcode::LoadCapture, Operand::Len(slot))
    }

    pub fn load_this(&mut self) -> Ref {
        self.emit(Opcode::LoadThis, Operand::None)
    }

    /// Marks the body complete, returning the [`BodySlice`] for use as a
    /// function value's body or the module's `main`.
    pub fn finish(self) -> BodySlice {
        let len = self.module.code.len() as u32 - self.start;
        BodySlice::new(self.start, len)
    }
}

/// Assembles a [`Module`] one instruction at a time.
#[derive(Default)]
pub struct ModuleBuilder {
    code: Code,
    extra: Vec<u32>,
    strings: String,
    ints: Vec<i64>,
    nums: Vec<f64>,
    names: Interner,
}

impl ModuleBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> NameId {
        self.names.intern(name)
    }

    fn push_extra(&mut self, refs: &[Ref]) -> Operand {
        let index = u32::try_from(self.extra.len()).unwrap();
        self.extra.extend(refs.iter().map(|r| r.index() as u32));
        let len = u32::try_from(refs.len()).unwrap();
        Operand::Extra { index, len }
    }

    /// Starts building a function body with `params` leading argument refs.
    pub fn body(&mut self, params: u32) -> BodyBuilder<'_> {
        let start = u32::try_from(self.code.len()).unwrap();
        BodyBuilder { module: self, params, start }
    }

    /// Finishes the module, taking `main` as its entry body.
    #[must_use]
    pub fn finish(self, main: BodySlice) -> Module {
        Module {
            main,
            code: self.code,
            extra: self.extra,
            strings: self.strings,
            ints: self.ints,
            nums: self.nums,
            names: self.names,
            debug_info: DebugInfo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::PrimitiveTag;

    #[test]
    fn builds_a_module_that_adds_two_constants() {
        let mut m = ModuleBuilder::new();
        let main = {
            let mut b = m.body(0);
            let lhs = b.int_const(2);
            let rhs = b.int_const(3);
            let sum = b.bin(Opcode::Add, lhs, rhs);
            b.ret(sum);
            b.finish()
        };
        let module = m.finish(main);
        assert_eq!(module.code.len(), 4);
        assert_eq!(module.ints, vec![2, 3]);
    }

    #[test]
    fn refs_follow_instruction_position_after_params() {
        let mut m = ModuleBuilder::new();
        let main = {
            let mut b = m.body(2);
            let r = b.primitive(PrimitiveTag::Null);
            assert_eq!(r, Ref::new(2));
            b.ret_null();
            b.finish()
        };
        let _ = m.finish(main);
    }
}
