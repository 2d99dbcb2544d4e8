//! The compiled module (§3 "Module").
//!
//! A `Module` is produced once by the external compiler (or loaded from a
//! serialized form, see `quillvm-cli`) and owned thereafter by the
//! [`crate::import_resolver::ImportResolver`] for the lifetime of the VM. Everything
//! in this file is read-only after construction.

use crate::bytecode::op::{Opcode, Operand};
use crate::intern::Interner;

/// A contiguous range of instructions within a module's flat code arrays.
///
/// `main` and every function body are each one `BodySlice`; they all index
/// into the *same* `Code`, which is why refs can be computed from a bare
/// instruction index without a per-function base pointer (§4.6,
/// `indexToRef`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BodySlice {
    pub start: u32,
    pub len: u32,
}

impl BodySlice {
    #[must_use]
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    pub fn end(self) -> u32 {
        self.start + self.len
    }
}

/// Parallel instruction arrays, indexed by instruction index (§3).
///
/// Kept as two `Vec`s rather than one `Vec<Instruction>` so that opcode
/// dispatch (which only ever reads `ops[ip]`) doesn't drag the `Operand`
/// payload through cache on the common `nop`/`ret`-style instructions that
/// don't need it.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Code {
    pub ops: Vec<Opcode>,
    pub data: Vec<Operand>,
}

impl Code {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push(&mut self, op: Opcode, data: Operand) -> u32 {
        let index = u32::try_from(self.ops.len()).expect("module grew past u32::MAX instructions");
        self.ops.push(op);
        self.data.push(data);
        index
    }
}

/// Debug metadata mapping instruction index to source position (§3, §6).
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct DebugInfo {
    pub source_path: String,
    pub source_bytes: String,
    /// Sorted `(instruction_index, byte_offset)` pairs; `fatal()` binary
    /// searches this to translate an `ip` into a source position.
    pub line_table: Vec<(u32, u32)>,
}

impl DebugInfo {
    pub fn byte_offset(&self, instruction_index: u32) -> u32 {
        match self.line_table.binary_search_by_key(&instruction_index, |&(ip, _)| ip) {
            Ok(i) => self.line_table[i].1,
            Err(0) => 0,
            Err(i) => self.line_table[i - 1].1,
        }
    }
}

/// An immutable compiled translation unit.
///
/// Owned by the `ImportResolver` once loaded (§4.8); every `Frame` that
/// executes code from this module borrows it for the frame's lifetime.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Module {
    pub main: BodySlice,
    pub code: Code,
    /// Flat pool of `Ref`s referenced by variable-length opcode operands
    /// (`build_tuple`, `call`, ...). Indexed via `Operand::Extra`.
    pub extra: Vec<u32>,
    /// Flat UTF-8 byte pool backing `str` literals (`Operand::Str`).
    pub strings: String,
    /// Flat `i64` pool backing `int` literals too wide to inline.
    pub ints: Vec<i64>,
    /// Flat `f64` pool backing `num` literals.
    pub nums: Vec<f64>,
    pub names: Interner,
    pub debug_info: DebugInfo,
}

impl Module {
    pub fn string_literal(&self, offset: u32, len: u32) -> &str {
        &self.strings[offset as usize..(offset + len) as usize]
    }

    pub fn extra_slice(&self, index: u32, len: u32) -> &[u32] {
        &self.extra[index as usize..(index + len) as usize]
    }
}
