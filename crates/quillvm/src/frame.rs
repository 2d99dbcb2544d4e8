//! Call frames, refs, and the error-handler stack (§4.3, §4.4, §4.5).

use smallvec::SmallVec;

use crate::bytecode::module::BodySlice;
use crate::heap::{Heap, HeapId, OutOfMemory};
use crate::value::{ModuleId, Value};

/// A small unsigned index naming a slot in a [`Frame`]'s evaluation stack.
///
/// The compiler guarantees refs are dense and contiguous within a function;
/// see [`crate::bytecode::op::index_to_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Ref(u32);

impl Ref {
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One `(target-ref, jump-offset)` entry in an [`ErrorHandlerStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub target_ref: Ref,
    pub jump_offset: u32,
}

/// Per-frame stack of error handlers (§4.3).
///
/// `SmallVec<[Handler; 4]>` gives exactly the small-buffer behavior the spec
/// describes: up to four handlers live inline with no heap traffic, a fifth
/// push spills to a heap-backed buffer, and `clear()` never shrinks the
/// spilled buffer back down — matching "transitioning once and never back".
#[derive(Debug, Default)]
pub struct ErrorHandlerStack(SmallVec<[Handler; 4]>);

impl ErrorHandlerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handler: Handler) {
        self.0.push(handler);
    }

    /// Removes and returns the top handler. Panics if empty — callers are
    /// expected to check `top()` first, mirroring the spec's "asserts
    /// non-empty".
    pub fn pop(&mut self) -> Handler {
        self.0.pop().expect("pop_err_handler with no handler on the stack")
    }

    pub fn top(&self) -> Option<Handler> {
        self.0.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resets to empty without shrinking a spilled allocation back to
    /// inline, so a frame cycled through the [`FrameCache`] doesn't pay a
    /// reallocation the next time it needs more than four handlers.
    pub fn reset(&mut self) {
        self.0.clear();
    }
}

/// One function activation record (§4.4).
///
/// Owns its evaluation stack (`Vec<HeapId>`, indexed by [`Ref`]); captures
/// are shared with whatever closure produced them, so a `Frame` never frees
/// a capture on return. There is no explicit "caller frame" pointer field —
/// like the teacher's `CallFrame`, the call stack itself (a plain `Vec` in
/// [`crate::vm::Interpreter`]) is the chain, and the frame below the top
/// *is* the caller.
#[derive(Debug)]
pub struct Frame {
    /// Which loaded module's `code`/constant pools `body` indexes into —
    /// needed because `import` can have more than one module live at once
    /// (§4.8), unlike a single-module script.
    pub module: ModuleId,
    pub body: BodySlice,
    pub ip: u32,
    pub params: u32,
    stack: Vec<Option<HeapId>>,
    pub captures: Vec<HeapId>,
    pub this_binding: Option<HeapId>,
    pub handlers: ErrorHandlerStack,
    /// Anchors this frame against conservative collection while it is live
    /// (§4.6.1, §9 "Reified frames as GC roots"). Cleared on return.
    pub reified: Option<HeapId>,
}

/// A value read from an uninitialized stack hole, or the wrong tag from a
/// typed reader (`int`/`num`/`bool`). Per §4.4, typed readers throw and the
/// dispatch loop treats this as "skip this opcode's effect and continue".
pub struct WrongTag;

impl Frame {
    pub fn new(module: ModuleId, body: BodySlice, params: u32, captures: Vec<HeapId>, this_binding: Option<HeapId>) -> Self {
        Self {
            module,
            body,
            ip: body.start,
            params,
            stack: Vec::new(),
            captures,
            this_binding,
            handlers: ErrorHandlerStack::new(),
            reified: None,
        }
    }

    /// Reuses cached buffers from the [`FrameCache`] instead of allocating
    /// fresh ones.
    #[expect(clippy::too_many_arguments)]
    pub fn new_cached(
        module: ModuleId,
        body: BodySlice,
        params: u32,
        captures: Vec<HeapId>,
        this_binding: Option<HeapId>,
        stack: Vec<Option<HeapId>>,
        handlers: ErrorHandlerStack,
    ) -> Self {
        Self { module, body, ip: body.start, params, stack, captures, this_binding, handlers, reified: None }
    }

    /// The instruction index relative to this frame's body, for
    /// `index_to_ref` and debug-info lookups.
    pub fn relative_ip(&self, absolute_ip: u32) -> u32 {
        absolute_ip - self.body.start
    }

    fn ensure_capacity(&mut self, min_len: usize) {
        if self.stack.len() < min_len {
            self.stack.resize(min_len, None);
        }
    }

    /// Reads the value at `ref_`. Panics if the slot is out of bounds or
    /// still an uninitialized hole — both are compiler contract violations,
    /// not user-recoverable errors.
    pub fn val<'h>(&self, heap: &'h Heap, ref_: Ref) -> &'h Value {
        heap.get(self.val_id(ref_))
    }

    pub fn val_id(&self, ref_: Ref) -> HeapId {
        self.stack[ref_.index()].expect("read of uninitialized ref")
    }

    /// Returns a writable slot at `ref_`, growing the stack and filling new
    /// holes with uninitialized ids if needed.
    pub fn set_ref(&mut self, ref_: Ref, id: HeapId) {
        self.ensure_capacity(ref_.index() + 1);
        self.stack[ref_.index()] = Some(id);
    }

    /// §4.6 `push_err_handler`'s "pre-clear the target-ref slot": resets
    /// `ref_` back to the uninitialized hole so `pop_err_handler` can later
    /// tell "no error thrown" apart from "an error landed here" without a
    /// separate boolean flag.
    pub fn clear_ref(&mut self, ref_: Ref) {
        self.ensure_capacity(ref_.index() + 1);
        self.stack[ref_.index()] = None;
    }

    /// Non-panicking check used by `pop_err_handler`: was `ref_` left
    /// untouched since the matching `push_err_handler`'s `clear_ref`?
    pub fn is_uninitialized(&self, ref_: Ref) -> bool {
        self.stack.get(ref_.index()).copied().flatten().is_none()
    }

    /// §4.2 `Frame.new_val`: reuses the slot at `ref_` in place when its
    /// current value is one of the "simple" tags, otherwise allocates a
    /// fresh slot. Either way, writes `value` and returns its id.
    pub fn new_val(&mut self, heap: &mut Heap, ref_: Ref, value: Value) -> Result<HeapId, OutOfMemory> {
        self.ensure_capacity(ref_.index() + 1);
        if let Some(current) = self.stack[ref_.index()]
            && heap.get(current).is_simple()
        {
            *heap.get_mut(current) = value;
            return Ok(current);
        }
        let id = heap.alloc_value(value)?;
        self.stack[ref_.index()] = Some(id);
        Ok(id)
    }

    /// §4.2 `Frame.dupe_simple`: clones `id` if it holds a "simple" value
    /// (so aggregate members never alias per-loop scratch slots), otherwise
    /// returns it unchanged (compound values are already move-only
    /// references with no mutable scratch aliasing concern here).
    pub fn dupe_simple(heap: &mut Heap, id: HeapId) -> Result<HeapId, OutOfMemory> {
        if heap.get(id).is_simple() { heap.dupe(id) } else { Ok(id) }
    }

    pub fn int(&self, heap: &Heap, ref_: Ref) -> Result<i64, WrongTag> {
        match self.val(heap, ref_) {
            Value::Int(n) => Ok(*n),
            _ => Err(WrongTag),
        }
    }

    pub fn num(&self, heap: &Heap, ref_: Ref) -> Result<f64, WrongTag> {
        match self.val(heap, ref_) {
            Value::Num(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            _ => Err(WrongTag),
        }
    }

    pub fn bool(&self, heap: &Heap, ref_: Ref) -> Result<bool, WrongTag> {
        match self.val(heap, ref_) {
            Value::Bool(b) => Ok(*b),
            _ => Err(WrongTag),
        }
    }

    /// Clones the live stack contents for [`crate::import_resolver::ImportResolver`]'s
    /// per-module globals table, taken once a module's `main` frame finishes
    /// (§4.6 `load_global`).
    pub fn snapshot_stack(&self) -> Vec<Option<HeapId>> {
        self.stack.clone()
    }

    /// Returns this frame's stack and handler-stack for the [`FrameCache`],
    /// truncating both to empty first so no dangling value references
    /// survive into the next borrower.
    pub fn into_cacheable(mut self) -> (Vec<Option<HeapId>>, ErrorHandlerStack) {
        self.stack.clear();
        self.handlers.reset();
        (self.stack, self.handlers)
    }
}

/// A process-wide LIFO pool of reusable `(stack, handler-stack)` pairs
/// (§4.5). Any frame may reuse any entry — there is no keying.
#[derive(Debug, Default)]
pub struct FrameCache {
    pool: Vec<(Vec<Option<HeapId>>, ErrorHandlerStack)>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> (Vec<Option<HeapId>>, ErrorHandlerStack) {
        self.pool.pop().unwrap_or_default()
    }

    pub fn give_back(&mut self, stack: Vec<Option<HeapId>>, handlers: ErrorHandlerStack) {
        self.pool.push((stack, handlers));
    }
}
