//! The native calling convention (§6).
//!
//! A native function is a plain Rust `fn` pointer rather than a boxed
//! closure: the calling convention passes the bound receiver (`this`)
//! through [`Context`] instead of letting natives close over state, so a
//! bound method is just a [`crate::value::NativeValue`] carrying the same
//! function pointer plus a receiver id. This keeps `Value` `Copy`-free but
//! pointer-sized for the native case, and keeps dispatch a direct call with
//! no vtable.

use crate::heap::{Heap, OutOfMemory};
use crate::heap::HeapId;

/// What a native function handed back to the interpreter.
///
/// Mirrors the three-way native return in §6: success, a catchable throw
/// (the VM routes it through the caller's handler stack exactly like any
/// other thrown error), or a fatal error.
pub enum NativeOutcome {
    Value(HeapId),
    Throw(String),
    Fatal(String),
}

impl From<OutOfMemory> for NativeOutcome {
    fn from(e: OutOfMemory) -> Self {
        Self::Fatal(e.to_string())
    }
}

/// `fn(Context, &[Value]) -> Value | Throw | Fatal` from §6, written as a
/// Rust function pointer operating on heap ids rather than values.
pub type NativeFn = fn(&mut Context<'_>, &[HeapId]) -> NativeOutcome;

/// What a native function is given: heap access, the current `this`
/// binding, and a way to signal failure without unwinding by hand.
pub struct Context<'a> {
    pub heap: &'a mut Heap,
    this: Option<HeapId>,
}

impl<'a> Context<'a> {
    pub fn new(heap: &'a mut Heap, this: Option<HeapId>) -> Self {
        Self { heap, this }
    }

    pub fn this(&self) -> Option<HeapId> {
        self.this
    }

    pub fn throw(&self, msg: impl Into<String>) -> NativeOutcome {
        NativeOutcome::Throw(msg.into())
    }

    pub fn throw_fmt(&self, args: std::fmt::Arguments<'_>) -> NativeOutcome {
        NativeOutcome::Throw(args.to_string())
    }
}
