//! The runtime value model (§3, §4.1).
//!
//! Every aggregate (`tuple`, `list`, `map`, `err`, `tagged`) holds its
//! members as [`HeapId`]s rather than inlined `Value`s, matching the
//! teacher's heap-indirection discipline for `HeapData` — it is what makes
//! the arena in [`crate::heap`] the single place a future collector would
//! need to scan.
//!
//! Operations that can fail split into two error shapes: a `Thrown` message
//! (opcode-level validation failure, routed through the handler stack) and
//! `OutOfMemory` (an allocation failure, always fatal). [`ValueOpError`]
//! unifies the two so a single `?` works in the dispatch loop.

use hashbrown::HashTable;
use hashbrown::hash_table::Entry;

use crate::bytecode::module::BodySlice;
use crate::bytecode::op::TypeTag;
use crate::heap::{Heap, HeapId, OutOfMemory};
use crate::intern::NameId;
use crate::native::NativeFn;

/// Index of a loaded [`crate::bytecode::module::Module`] within the
/// [`crate::import::ImportResolver`]'s module table. A `func` value carries
/// one of these rather than a borrowed reference so it stays `'static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// `{start, end, step}` (§3). Construction rejects `step == 0`; that check
/// lives at the `build_range`/`build_range_step` opcode, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl RangeValue {
    #[must_use]
    pub fn count(&self) -> i64 {
        if self.step > 0 {
            if self.end <= self.start { 0 } else { (self.end - self.start - 1) / self.step + 1 }
        } else if self.end >= self.start {
            0
        } else {
            (self.start - self.end - 1) / (-self.step) + 1
        }
    }
}

/// A `str` payload (§3). `capacity == 0` marks content as borrowed/shared —
/// the bytes came from a string-pool literal rather than being built up by
/// this value's own owner, so [`Value::is_simple`] allows the slot holding
/// it to be overwritten in place instead of re-allocated.
#[derive(Debug, Clone)]
pub struct VStr {
    pub bytes: Box<str>,
    pub capacity: usize,
}

impl VStr {
    #[must_use]
    pub fn owned(s: impl Into<Box<str>>) -> Self {
        let bytes = s.into();
        let capacity = bytes.len();
        Self { bytes, capacity }
    }

    #[must_use]
    pub fn shared(s: impl Into<Box<str>>) -> Self {
        Self { bytes: s.into(), capacity: 0 }
    }

    pub fn as_str(&self) -> &str {
        &self.bytes
    }
}

/// `{name, value}` (§3), a named discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedValue {
    pub name: NameId,
    pub value: HeapId,
}

/// `{module, body-slice, captures-slice, arg-count, variadic-flag}` (§3).
#[derive(Debug, Clone)]
pub struct FuncValue {
    pub module: ModuleId,
    pub body: BodySlice,
    pub captures: Vec<HeapId>,
    pub arg_count: u32,
    pub variadic: bool,
}

/// `{func-pointer, arg-count, variadic-flag}` (§3), plus the bound receiver
/// a method-dispatch `get` (§4.7) attaches. `func` is `None` only for a
/// value that has lost its pointer across a (de)serialization boundary —
/// natives are never persisted in a `Module`, so this never happens for
/// values the interpreter produces itself.
#[derive(Debug, Clone, Copy)]
pub struct NativeValue {
    pub func: NativeFn,
    pub arg_count: u32,
    pub variadic: bool,
    pub bound_this: Option<HeapId>,
}

/// Per-container iteration state produced by `iter_init` (§4.1, §4.6).
///
/// Stores indices rather than borrowed iterators so advancing never holds a
/// borrow of the heap across the call that materializes the next value.
#[derive(Debug, Clone, Copy)]
pub enum IteratorState {
    Str { source: HeapId, byte_pos: usize },
    Range { next: i64, end: i64, step: i64 },
    /// Shared by `tuple` and `list`.
    Seq { source: HeapId, index: usize },
    /// Yields `(key, value)` tuples.
    Map { source: HeapId, index: usize },
}

/// Tagged union of runtime types (§3).
#[derive(Debug)]
pub enum Value {
    /// A freshly allocated or freed slot; reading one is a VM bug, never a
    /// user-visible state.
    Uninitialized,
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(VStr),
    Range(RangeValue),
    Tuple(Vec<HeapId>),
    List(Vec<HeapId>),
    Map(ValueMap),
    /// Wraps exactly one inner value: the thrown payload.
    Err(HeapId),
    Tagged(TaggedValue),
    Func(FuncValue),
    Native(NativeValue),
    Iterator(IteratorState),
    /// Transient: only ever produced by the `spread` opcode and consumed by
    /// the very next aggregate-construction or call opcode (§3 invariants).
    Spread(HeapId),
    /// A reified frame (§9 "Reified frames as GC roots"). Carries the
    /// anchored frame's depth in the call stack purely as a debugging aid;
    /// no opcode ever reads it back out.
    Frame(u32),
}

impl Value {
    /// A freshly allocated shallow copy: aggregate members are shared
    /// (their `HeapId`s are copied, not the values they point to).
    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        match self {
            Self::Uninitialized => Self::Uninitialized,
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(n) => Self::Int(*n),
            Self::Num(n) => Self::Num(*n),
            Self::Str(s) => Self::Str(s.clone()),
            Self::Range(r) => Self::Range(*r),
            Self::Tuple(items) => Self::Tuple(items.clone()),
            Self::List(items) => Self::List(items.clone()),
            Self::Map(m) => Self::Map(m.clone()),
            Self::Err(id) => Self::Err(*id),
            Self::Tagged(t) => Self::Tagged(*t),
            Self::Func(f) => Self::Func(f.clone()),
            Self::Native(n) => Self::Native(*n),
            Self::Iterator(it) => Self::Iterator(*it),
            Self::Spread(id) => Self::Spread(*id),
            Self::Frame(depth) => Self::Frame(*depth),
        }
    }

    /// §4.2: the tags `Frame.new_val` is allowed to overwrite in place
    /// instead of allocating a fresh slot for. `str` only qualifies when its
    /// content is borrowed (`capacity == 0`) — an owned string's bytes would
    /// otherwise be silently clobbered out from under an alias.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Num(_) | Self::Range(_) | Self::Native(_))
            || matches!(self, Self::Str(s) if s.capacity == 0)
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Num(_) => "num",
            Self::Str(_) => "str",
            Self::Range(_) => "range",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Err(_) => "err",
            Self::Tagged(_) => "tagged",
            Self::Func(_) => "func",
            Self::Native(_) => "native",
            Self::Iterator(_) => "iterator",
            Self::Spread(_) => "spread",
            Self::Frame(_) => "frame",
        }
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null | Self::Uninitialized => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Num(n) => *n != 0.0,
            Self::Str(s) => !s.bytes.is_empty(),
            Self::Tuple(items) | Self::List(items) => !items.is_empty(),
            Self::Map(m) => !m.is_empty(),
            Self::Range(r) => r.count() != 0,
            _ => true,
        }
    }
}

/// An insertion-ordered mapping from value to value, keyed by structural
/// equality (§3 `map`).
///
/// `HashTable<usize>` resolves hashes to indices in the dense `entries`
/// vec, matching the teacher's `types::dict::Dict` storage strategy: O(1)
/// lookup while keeping iteration order stable.
#[derive(Debug, Default, Clone)]
pub struct ValueMap {
    indices: HashTable<usize>,
    entries: Vec<(HeapId, HeapId)>,
}

impl ValueMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeapId, HeapId)> {
        self.entries.iter()
    }

    fn find(&self, heap: &Heap, key: HeapId, hash: u64) -> Option<usize> {
        self.indices
            .find(hash, |&i| eql(heap, self.entries[i].0, key))
            .copied()
    }

    pub fn get(&self, heap: &Heap, key: HeapId) -> Option<HeapId> {
        let hash = hash_value(heap, key);
        self.find(heap, key, hash).map(|i| self.entries[i].1)
    }

    pub fn contains_key(&self, heap: &Heap, key: HeapId) -> bool {
        self.get(heap, key).is_some()
    }

    /// Inserts or overwrites `key -> value`, preserving `key`'s original
    /// position on overwrite (Python-dict-style update semantics).
    pub fn insert(&mut self, heap: &Heap, key: HeapId, value: HeapId) {
        let hash = hash_value(heap, key);
        if let Some(i) = self.find(heap, key, hash) {
            self.entries[i].1 = value;
            return;
        }
        let index = self.entries.len();
        self.entries.push((key, value));
        match self.indices.entry(hash, |&i| i == index, |&i| hash_value(heap, self.entries[i].0)) {
            Entry::Occupied(_) => unreachable!("fresh index cannot already be present"),
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
        }
    }
}

fn hash_value(heap: &Heap, id: HeapId) -> u64 {
    use std::hash::Hasher;
    let mut hasher = ahash::AHasher::default();
    hash_into(heap, id, &mut hasher);
    hasher.finish()
}

fn hash_into(heap: &Heap, id: HeapId, hasher: &mut ahash::AHasher) {
    use std::hash::{Hash, Hasher};
    match heap.get(id) {
        Value::Null | Value::Uninitialized => 0u8.hash(hasher),
        Value::Bool(b) => i64::from(*b).hash(hasher),
        Value::Int(n) => n.hash(hasher),
        // int and num must hash equally when numerically equal (they may
        // compare equal across tags, per §4.1 `eql`).
        Value::Num(n) => {
            if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                (*n as i64).hash(hasher);
            } else {
                n.to_bits().hash(hasher);
            }
        }
        Value::Str(s) => s.bytes.hash(hasher),
        Value::Tuple(items) | Value::List(items) => {
            for item in items {
                hash_into(heap, *item, hasher);
            }
        }
        Value::Tagged(t) => {
            t.name.hash(hasher);
            hash_into(heap, t.value, hasher);
        }
        Value::Err(inner) => hash_into(heap, *inner, hasher),
        Value::Range(r) => (r.start, r.end, r.step).hash(hasher),
        // Everything else (map, func, native, iterator, spread, frame) is
        // keyed by heap identity: the spec does not require maps or
        // functions to be usable as map keys with content-based identity.
        _ => id.hash(hasher),
    }
}

/// Structural equality (§4.1 `eql`). `int`/`num` compare numerically across
/// tags; `tagged` compares name-then-payload; aggregates compare
/// element-wise; everything else falls back to tag plus payload equality.
#[must_use]
pub fn eql(heap: &Heap, a: HeapId, b: HeapId) -> bool {
    if a == b {
        return true;
    }
    match (heap.get(a), heap.get(b)) {
        (Value::Null, Value::Null) | (Value::Uninitialized, Value::Uninitialized) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Int(x), Value::Num(y)) | (Value::Num(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Str(x), Value::Str(y)) => x.bytes == y.bytes,
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) | (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(&xi, &yi)| eql(heap, xi, yi))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len() && x.iter().all(|&(k, v)| y.get(heap, k).is_some_and(|yv| eql(heap, v, yv)))
        }
        (Value::Err(x), Value::Err(y)) => eql(heap, *x, *y),
        (Value::Tagged(x), Value::Tagged(y)) => x.name == y.name && eql(heap, x.value, y.value),
        _ => false,
    }
}

/// A thrown error message (§4.4 `throw`). Carries only text: the caller
/// (the dispatch loop) decides whether a handler is present and, if not,
/// whether to escalate to fatal or return an `err` value.
#[derive(Debug, Clone)]
pub struct Thrown(pub String);

impl Thrown {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Unifies the ways a value operation that allocates can fail.
///
/// `Fatal` is for failures that must bypass the handler stack entirely
/// (§5/§9 — `MAX_CALL_DEPTH`'s own check reaches `fatal_in_frame` directly
/// for the same reason, see `vm::call::call_function`), unlike `Thrown`,
/// which redirects to a `push_err_handler`-installed handler when one is
/// present on the current frame.
#[derive(Debug, Clone)]
pub enum ValueOpError {
    Thrown(Thrown),
    Fatal(String),
    OutOfMemory(OutOfMemory),
}

impl From<Thrown> for ValueOpError {
    fn from(t: Thrown) -> Self {
        Self::Thrown(t)
    }
}

impl From<OutOfMemory> for ValueOpError {
    fn from(e: OutOfMemory) -> Self {
        Self::OutOfMemory(e)
    }
}

fn sequence_len(items: &[HeapId]) -> i64 {
    i64::try_from(items.len()).unwrap_or(i64::MAX)
}

/// Resolves a (possibly negative) index against a sequence length,
/// applying the `i < 0 -> i += len` wrap from §4.1.
fn resolve_index(len: i64, index: i64) -> Result<usize, Thrown> {
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        Err(Thrown::new(format!("index out of bounds: {index} (length {len})")))
    } else {
        Ok(resolved as usize)
    }
}

/// `a in b` (§4.1). Only defined for `str`, `tuple`, `list`, `map`, `range`;
/// any other receiver is the opcode's job to reject, not this function's —
/// callers that feed an unsupported tag get `Err` here too, so the opcode
/// can just propagate it as a throw either way.
pub fn contains(heap: &Heap, container: HeapId, item: HeapId) -> Result<bool, Thrown> {
    match heap.get(container) {
        Value::Str(s) => match heap.get(item) {
            Value::Str(needle) => Ok(s.as_str().contains(needle.as_str())),
            _ => Err(Thrown::new("`in` on str requires a str operand")),
        },
        Value::Tuple(items) | Value::List(items) => Ok(items.iter().any(|&id| eql(heap, id, item))),
        Value::Map(m) => Ok(m.contains_key(heap, item)),
        Value::Range(r) => match heap.get(item) {
            Value::Int(n) => {
                if r.step > 0 {
                    Ok(*n >= r.start && *n < r.end && (n - r.start) % r.step == 0)
                } else {
                    Ok(*n <= r.start && *n > r.end && (r.start - n) % (-r.step) == 0)
                }
            }
            _ => Ok(false),
        },
        _ => Err(Thrown::new(format!("'{}' is not iterable", heap.get(container).type_name()))),
    }
}

/// `get(list|tuple, "len")` / `get(str, "len")`, the one property both
/// aggregates and strings expose directly rather than through the method
/// table (§4.1, §4.7).
pub fn len_attr(heap: &Heap, container: HeapId) -> Option<i64> {
    match heap.get(container) {
        Value::Str(s) => Some(i64::try_from(s.as_str().chars().count()).unwrap_or(i64::MAX)),
        Value::Tuple(items) | Value::List(items) => Some(sequence_len(items)),
        Value::Map(m) => Some(i64::try_from(m.len()).unwrap_or(i64::MAX)),
        _ => None,
    }
}

/// `get`/`get_int` on a sequence (`list`/`tuple`/`str`) (§4.1, §4.6). Map
/// indexing goes through [`get_map`] instead, since its key is a `Value`
/// rather than an integer.
pub fn get_index(heap: &mut Heap, container: HeapId, index: i64) -> Result<HeapId, ValueOpError> {
    match heap.get(container) {
        Value::Tuple(items) | Value::List(items) => {
            let len = sequence_len(items);
            let i = resolve_index(len, index)?;
            Ok(match heap.get(container) {
                Value::Tuple(items) | Value::List(items) => items[i],
                _ => unreachable!(),
            })
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.as_str().chars().collect();
            let i = resolve_index(sequence_len_chars(&chars), index)?;
            Ok(heap.alloc_value(Value::Str(VStr::owned(chars[i].to_string())))?)
        }
        other => Err(Thrown::new(format!("'{}' does not support integer indexing", other.type_name())).into()),
    }
}

fn sequence_len_chars(chars: &[char]) -> i64 {
    i64::try_from(chars.len()).unwrap_or(i64::MAX)
}

/// `get(map, key)` / `get_or_null(map, key)` (§4.1, §4.6).
pub fn get_map(heap: &Heap, container: HeapId, key: HeapId, or_null: bool) -> Result<Option<HeapId>, Thrown> {
    match heap.get(container) {
        Value::Map(m) => match m.get(heap, key) {
            Some(v) => Ok(Some(v)),
            None if or_null => Ok(None),
            None => Err(Thrown::new("no such key")),
        },
        other => Err(Thrown::new(format!("'{}' is not a map", other.type_name()))),
    }
}

/// `set(list, index, value)` / `set(map, key, value)` (§4.1). Tuples are
/// fixed-length and immutable, so `set` on one always throws.
pub fn set_index(heap: &mut Heap, container: HeapId, index: HeapId, value: HeapId) -> Result<(), Thrown> {
    match heap.get(container) {
        Value::List(items) => {
            let Value::Int(i) = heap.get(index) else {
                return Err(Thrown::new("list index must be an int"));
            };
            let len = sequence_len(items);
            let at = resolve_index(len, *i)?;
            let Value::List(items) = heap.get_mut(container) else { unreachable!() };
            items[at] = value;
            Ok(())
        }
        Value::Map(_) => {
            insert_into_map(heap, container, index, value);
            Ok(())
        }
        other => Err(Thrown::new(format!("'{}' does not support item assignment", other.type_name()))),
    }
}

fn insert_into_map(heap: &mut Heap, container: HeapId, key: HeapId, value: HeapId) {
    // `ValueMap::insert` needs `&Heap` to hash `key`, but `key` itself lives
    // in the very same arena as `container`'s map — so the map is removed
    // from its slot for the duration of the call and put back afterward.
    let Value::Map(mut m) = std::mem::replace(heap.get_mut(container), Value::Uninitialized) else {
        unreachable!("caller already matched Value::Map")
    };
    m.insert(heap, key, value);
    *heap.get_mut(container) = Value::Map(m);
}

/// `append(list, value)` (§4.1, §4.6 and §4.7 `list.append`).
pub fn append(heap: &mut Heap, container: HeapId, value: HeapId) -> Result<(), Thrown> {
    match heap.get_mut(container) {
        Value::List(items) => {
            items.push(value);
            Ok(())
        }
        other => Err(Thrown::new(format!("'{}' has no method 'append'", other.type_name()))),
    }
}

/// `iterator(v)` (§4.1): allocates a fresh `iterator` value over `v`.
pub fn make_iterator(heap: &mut Heap, source: HeapId) -> Result<HeapId, ValueOpError> {
    let state = match heap.get(source) {
        Value::Str(_) => IteratorState::Str { source, byte_pos: 0 },
        Value::Range(r) => IteratorState::Range { next: r.start, end: r.end, step: r.step },
        Value::Tuple(_) | Value::List(_) => IteratorState::Seq { source, index: 0 },
        Value::Map(_) => IteratorState::Map { source, index: 0 },
        other => return Err(Thrown::new(format!("'{}' is not iterable", other.type_name())).into()),
    };
    Ok(heap.alloc_value(Value::Iterator(state))?)
}

/// Advances an `iterator` value, returning the next element (allocating it
/// fresh where the element has no existing heap identity of its own — `str`
/// codepoints and `range` members) or `None` once exhausted.
pub fn iterate_next(heap: &mut Heap, iter_id: HeapId) -> Result<Option<HeapId>, ValueOpError> {
    let Value::Iterator(state) = heap.get(iter_id) else {
        return Err(Thrown::new("iterate_next on a non-iterator value").into());
    };
    let state = *state;
    match state {
        IteratorState::Range { next, end, step } => {
            let exhausted = if step > 0 { next >= end } else { next <= end };
            if exhausted {
                return Ok(None);
            }
            *heap.get_mut(iter_id) = Value::Iterator(IteratorState::Range { next: next + step, end, step });
            Ok(Some(heap.alloc_value(Value::Int(next))?))
        }
        IteratorState::Str { source, byte_pos } => {
            let Value::Str(s) = heap.get(source) else {
                return Err(Thrown::new("iterator source is no longer a str").into());
            };
            let rest = &s.as_str()[byte_pos..];
            let Some(ch) = rest.chars().next() else {
                return Ok(None);
            };
            let next_pos = byte_pos + ch.len_utf8();
            *heap.get_mut(iter_id) = Value::Iterator(IteratorState::Str { source, byte_pos: next_pos });
            Ok(Some(heap.alloc_value(Value::Str(VStr::owned(ch.to_string())))?))
        }
        IteratorState::Seq { source, index } => {
            let len = match heap.get(source) {
                Value::Tuple(items) | Value::List(items) => items.len(),
                _ => return Err(Thrown::new("iterator source is no longer a sequence").into()),
            };
            if index >= len {
                return Ok(None);
            }
            let item = match heap.get(source) {
                Value::Tuple(items) | Value::List(items) => items[index],
                _ => unreachable!(),
            };
            *heap.get_mut(iter_id) = Value::Iterator(IteratorState::Seq { source, index: index + 1 });
            Ok(Some(item))
        }
        IteratorState::Map { source, index } => {
            let entry = match heap.get(source) {
                Value::Map(m) => m.iter().nth(index).copied(),
                _ => return Err(Thrown::new("iterator source is no longer a map").into()),
            };
            let Some((key, value)) = entry else {
                return Ok(None);
            };
            *heap.get_mut(iter_id) = Value::Iterator(IteratorState::Map { source, index: index + 1 });
            Ok(Some(heap.alloc_value(Value::Tuple(vec![key, value]))?))
        }
    }
}

/// `spread` materialization (§4.6): flattens `source` to a plain list of its
/// elements. `range` is eagerly materialized; `tuple`/`list` pass through
/// their existing elements unchanged; `str` is the documented open
/// question (§9) — a `fatal` ("TODO" in the source), not a catchable throw,
/// so it bypasses `push_err_handler` the same way exceeding `MAX_CALL_DEPTH`
/// does.
pub fn spread_elements(heap: &mut Heap, source: HeapId) -> Result<Vec<HeapId>, ValueOpError> {
    match heap.get(source) {
        Value::Tuple(items) | Value::List(items) => Ok(items.clone()),
        Value::Range(r) => {
            let r = *r;
            let mut out = Vec::new();
            let mut next = r.start;
            loop {
                let exhausted = if r.step > 0 { next >= r.end } else { next <= r.end };
                if exhausted {
                    break;
                }
                out.push(heap.alloc_value(Value::Int(next))?);
                next += r.step;
            }
            Ok(out)
        }
        Value::Str(_) => Err(ValueOpError::Fatal("spreading a str is not supported".to_string())),
        other => Err(Thrown::new(format!("'{}' is not spreadable", other.type_name())).into()),
    }
}

/// `spread` materialization for a `build_map` entry (§4.6, spec "`{**m}`"):
/// `source`'s own `(key, value)` pairs, copied out in their existing order.
/// Only a `map` can be spread this way.
pub fn spread_map_entries(heap: &Heap, source: HeapId) -> Result<Vec<(HeapId, HeapId)>, Thrown> {
    match heap.get(source) {
        Value::Map(m) => Ok(m.iter().copied().collect()),
        other => Err(Thrown::new(format!("'{}' cannot be spread into a map", other.type_name()))),
    }
}

/// The outcome of resolving an `as` cast's source/target pair, computed
/// while only holding an immutable borrow of the heap so the allocation
/// that follows can take `&mut Heap` without a borrow conflict.
enum CastPlan {
    Num(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    Tuple(Vec<HeapId>),
    List(Vec<HeapId>),
    /// Source and target tag already agree: `dupe` is enough.
    AlreadyMatches,
    Unsupported(&'static str),
}

/// The `as` cast matrix (§4.1, §9 — "defined per value type, not enumerated
/// centrally"). This implements the pairs the dispatch loop's `bin_ty`
/// operand can reach; anything not listed throws rather than silently
/// no-opping.
pub fn as_cast(heap: &mut Heap, id: HeapId, target: TypeTag) -> Result<HeapId, ValueOpError> {
    let plan = match (heap.get(id), target) {
        (Value::Int(n), TypeTag::Num) => CastPlan::Num(*n as f64),
        (Value::Num(n), TypeTag::Int) => CastPlan::Int(*n as i64),
        (Value::Bool(b), TypeTag::Int) => CastPlan::Int(i64::from(*b)),
        (Value::Int(n), TypeTag::Bool) => CastPlan::Bool(*n != 0),
        (Value::Int(n), TypeTag::Str) => CastPlan::Str(n.to_string()),
        (Value::Num(n), TypeTag::Str) => CastPlan::Str(n.to_string()),
        (Value::Str(s), TypeTag::Int) => match s.as_str().trim().parse::<i64>() {
            Ok(n) => CastPlan::Int(n),
            Err(_) => CastPlan::Unsupported("str"),
        },
        (Value::Str(s), TypeTag::Num) => match s.as_str().trim().parse::<f64>() {
            Ok(n) => CastPlan::Num(n),
            Err(_) => CastPlan::Unsupported("str"),
        },
        (Value::List(items), TypeTag::Tuple) => CastPlan::Tuple(items.clone()),
        (Value::Tuple(items), TypeTag::List) => CastPlan::List(items.clone()),
        (Value::Null, TypeTag::Bool) => CastPlan::Bool(false),
        (other, t) if type_tag_matches(other, t) => CastPlan::AlreadyMatches,
        (other, _) => CastPlan::Unsupported(other.type_name()),
    };
    match plan {
        CastPlan::Num(n) => Ok(heap.alloc_value(Value::Num(n))?),
        CastPlan::Int(n) => Ok(heap.alloc_value(Value::Int(n))?),
        CastPlan::Bool(b) => Ok(heap.alloc_value(Value::Bool(b))?),
        CastPlan::Str(s) => Ok(heap.alloc_value(Value::Str(VStr::owned(s)))?),
        CastPlan::Tuple(items) => Ok(heap.alloc_value(Value::Tuple(items))?),
        CastPlan::List(items) => Ok(heap.alloc_value(Value::List(items))?),
        CastPlan::AlreadyMatches => Ok(heap.dupe(id)?),
        CastPlan::Unsupported(name) => Err(Thrown::new(format!("cannot cast {name} to the requested type")).into()),
    }
}

fn type_tag_matches(value: &Value, target: TypeTag) -> bool {
    matches!(
        (value, target),
        (Value::Null, TypeTag::Null)
            | (Value::Bool(_), TypeTag::Bool)
            | (Value::Int(_), TypeTag::Int)
            | (Value::Num(_), TypeTag::Num)
            | (Value::Str(_), TypeTag::Str)
            | (Value::Tuple(_), TypeTag::Tuple)
            | (Value::List(_), TypeTag::List)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::DEFAULT_PAGE_LIMIT;

    #[test]
    fn int_and_num_compare_equal_across_tags() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let a = heap.alloc_value(Value::Int(3)).unwrap();
        let b = heap.alloc_value(Value::Num(3.0)).unwrap();
        assert!(eql(&heap, a, b));
    }

    #[test]
    fn negative_index_wraps_from_the_end() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let one = heap.alloc_value(Value::Int(1)).unwrap();
        let two = heap.alloc_value(Value::Int(2)).unwrap();
        let three = heap.alloc_value(Value::Int(3)).unwrap();
        let list = heap.alloc_value(Value::List(vec![one, two, three])).unwrap();
        let got = get_index(&mut heap, list, -1).unwrap();
        assert!(matches!(heap.get(got), Value::Int(3)));
        let _ = three;
    }

    #[test]
    fn map_insert_then_get_round_trips() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let map = heap.alloc_value(Value::Map(ValueMap::new())).unwrap();
        let key = heap.alloc_value(Value::Str(VStr::owned("x"))).unwrap();
        let value = heap.alloc_value(Value::Int(42)).unwrap();
        set_index(&mut heap, map, key, value).unwrap();
        let got = get_map(&heap, map, key, false).unwrap().unwrap();
        assert!(matches!(heap.get(got), Value::Int(42)));
    }

    #[test]
    fn range_count_matches_materialized_length() {
        let r = RangeValue { start: 1, end: 5, step: 2 };
        assert_eq!(r.count(), 2);
    }

    #[test]
    fn out_of_bounds_index_throws() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let list = heap.alloc_value(Value::List(vec![])).unwrap();
        assert!(get_index(&mut heap, list, 0).is_err());
    }
}
