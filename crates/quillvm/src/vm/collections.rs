//! Aggregate construction, container access, destructuring, error-wrapping
//! and iteration opcodes (§4.6 "Containers"/"Destructuring"/"Error-wrapping"/
//! "Iteration", §4.1, §4.7).
//!
//! Aggregate members that came from an existing ref are passed through
//! [`Frame::dupe_simple`] as they're collected, so a `simple`-tagged member
//! (an `int`, say) never ends up aliasing the scratch slot its source ref
//! will be overwritten in place next time round a loop.

use crate::bytecode::module::{BodySlice, Module};
use crate::frame::{Frame, Ref};
use crate::heap::{Heap, HeapId};
use crate::intern::NameId;
use crate::value::{FuncValue, ModuleId, TaggedValue, Thrown, Value, ValueOpError, append, contains, get_index, get_map, len_attr, set_index, spread_elements, spread_map_entries};

/// Collects `refs` into a flat `Vec<HeapId>`, expanding any ref that
/// currently holds a `Value::Spread` marker (left by the `spread` opcode on
/// the immediately preceding instruction) into that source's elements.
pub(super) fn flatten(heap: &mut Heap, frame: &Frame, refs: &[Ref]) -> Result<Vec<HeapId>, ValueOpError> {
    let mut out = Vec::with_capacity(refs.len());
    for &r in refs {
        let id = frame.val_id(r);
        if let Value::Spread(source) = heap.get(id) {
            let source = *source;
            for item in spread_elements(heap, source)? {
                out.push(Frame::dupe_simple(heap, item)?);
            }
        } else {
            out.push(Frame::dupe_simple(heap, id)?);
        }
    }
    Ok(out)
}

fn extra_refs(module: &Module, index: u32, len: u32) -> Vec<Ref> {
    module.extra_slice(index, len).iter().map(|&i| Ref::new(i)).collect()
}

/// Like [`flatten`], but for `build_map`'s `extra` pool: a plain ref is a
/// key, immediately followed by its value ref; a ref tagged `Value::Spread`
/// (from spreading a `map` with `{**other}`) expands in place to that map's
/// own `(key, value)` pairs instead of being read as one half of a pair.
pub(super) fn flatten_map_pairs(heap: &mut Heap, frame: &Frame, refs: &[Ref]) -> Result<Vec<(HeapId, HeapId)>, ValueOpError> {
    let mut out = Vec::with_capacity(refs.len() / 2);
    let mut i = 0;
    while i < refs.len() {
        let id = frame.val_id(refs[i]);
        if let Value::Spread(source) = heap.get(id) {
            let source = *source;
            for (k, v) in spread_map_entries(heap, source)? {
                out.push((Frame::dupe_simple(heap, k)?, Frame::dupe_simple(heap, v)?));
            }
            i += 1;
        } else {
            let value_id = frame.val_id(refs[i + 1]);
            out.push((Frame::dupe_simple(heap, id)?, Frame::dupe_simple(heap, value_id)?));
            i += 2;
        }
    }
    Ok(out)
}

pub fn build_tuple(heap: &mut Heap, frame: &Frame, module: &Module, index: u32, len: u32) -> Result<Value, ValueOpError> {
    let refs = extra_refs(module, index, len);
    Ok(Value::Tuple(flatten(heap, frame, &refs)?))
}

pub fn build_list(heap: &mut Heap, frame: &Frame, module: &Module, index: u32, len: u32) -> Result<Value, ValueOpError> {
    let refs = extra_refs(module, index, len);
    Ok(Value::List(flatten(heap, frame, &refs)?))
}

pub fn build_map(heap: &mut Heap, frame: &Frame, module: &Module, index: u32, len: u32) -> Result<Value, ValueOpError> {
    let refs = extra_refs(module, index, len);
    let mut map = crate::value::ValueMap::new();
    for (key, value) in flatten_map_pairs(heap, frame, &refs)? {
        map.insert(heap, key, value);
    }
    Ok(Value::Map(map))
}

pub fn build_error(frame: &Frame, value: Ref) -> Value {
    Value::Err(frame.val_id(value))
}

pub fn build_error_null(heap: &mut Heap) -> Result<Value, ValueOpError> {
    Ok(Value::Err(heap.alloc_value(Value::Null)?))
}

pub fn build_tagged(frame: &Frame, name: NameId, value: Ref) -> Value {
    Value::Tagged(TaggedValue { name, value: frame.val_id(value) })
}

pub fn build_tagged_null(heap: &mut Heap, name: NameId) -> Result<Value, ValueOpError> {
    Ok(Value::Tagged(TaggedValue { name, value: heap.alloc_value(Value::Null)? }))
}

/// Captures are carried in `extra` as `[body.start, body.len, arg_count,
/// variadic, capture_ref...]`, packed by [`crate::bytecode::builder`]'s
/// `build_func` (a `Ref`-typed pool is the only variable-length storage a
/// `ModuleBuilder` offers, so the header fields ride along as pseudo-refs).
pub fn build_func(heap: &mut Heap, frame: &Frame, module_id: ModuleId, module: &Module, index: u32, len: u32) -> Result<Value, ValueOpError> {
    let raw = module.extra_slice(index, len);
    let (header, capture_indices) = raw.split_at(4);
    let body = BodySlice::new(header[0], header[1]);
    let arg_count = header[2];
    let variadic = header[3] != 0;
    let mut captures = Vec::with_capacity(capture_indices.len());
    for &idx in capture_indices {
        let id = frame.val_id(Ref::new(idx));
        captures.push(Frame::dupe_simple(heap, id)?);
    }
    Ok(Value::Func(FuncValue { module: module_id, body, captures, arg_count, variadic }))
}

fn range_int(heap: &Heap, frame: &Frame, r: Ref) -> Result<i64, Thrown> {
    match frame.val(heap, r) {
        Value::Int(n) => Ok(*n),
        other => Err(Thrown::new(format!("range bounds must be int, got '{}'", other.type_name()))),
    }
}

pub fn build_range(heap: &Heap, frame: &Frame, start: Ref, end: Ref) -> Result<Value, Thrown> {
    Ok(Value::Range(crate::value::RangeValue { start: range_int(heap, frame, start)?, end: range_int(heap, frame, end)?, step: 1 }))
}

pub fn build_range_step(heap: &Heap, frame: &Frame, module: &Module, index: u32, len: u32) -> Result<Value, Thrown> {
    let refs = extra_refs(module, index, len);
    let start = range_int(heap, frame, refs[0])?;
    let end = range_int(heap, frame, refs[1])?;
    let step = range_int(heap, frame, refs[2])?;
    if step == 0 {
        return Err(Thrown::new("range step must not be zero"));
    }
    Ok(Value::Range(crate::value::RangeValue { start, end, step }))
}

/// `get(container, index)` (§4.6, §4.7): integer indexing for
/// `list`/`tuple`/`str`, key lookup for `map`, and — when the index is a
/// `str` that doesn't name an existing map key — a fallback through
/// [`crate::methods::lookup`] so `xs.append` reads exactly like `xs["append"]`
/// would if `xs` were a map.
pub fn get(heap: &mut Heap, frame: &Frame, container: Ref, index: Ref) -> Result<HeapId, ValueOpError> {
    let container_id = frame.val_id(container);
    let index_id = frame.val_id(index);
    match heap.get(index_id) {
        Value::Int(i) => {
            let i = *i;
            get_index(heap, container_id, i)
        }
        Value::Str(s) => {
            let name = s.as_str().to_string();
            if name == "len" {
                if let Some(n) = len_attr(heap, container_id) {
                    return Ok(heap.alloc_value(Value::Int(n))?);
                }
            }
            if let Some(result) = crate::methods::lookup(heap, container_id, &name) {
                return Ok(result?);
            }
            match get_map(heap, container_id, index_id, false)? {
                Some(id) => Ok(id),
                None => unreachable!("get_map with or_null=false never returns Ok(None)"),
            }
        }
        _ => match get_map(heap, container_id, index_id, false)? {
            Some(id) => Ok(id),
            None => unreachable!("get_map with or_null=false never returns Ok(None)"),
        },
    }
}

pub fn get_int(heap: &mut Heap, frame: &Frame, container: Ref, index: i64) -> Result<HeapId, ValueOpError> {
    get_index(heap, frame.val_id(container), index)
}

/// `get_or_null` swallows whatever [`get`] would have thrown and returns
/// `null` instead, rather than re-deriving the map/sequence dispatch.
pub fn get_or_null(heap: &mut Heap, frame: &Frame, container: Ref, key: Ref) -> Result<HeapId, ValueOpError> {
    match get(heap, frame, container, key) {
        Ok(id) => Ok(id),
        Err(ValueOpError::Thrown(_)) => Ok(heap.alloc_value(Value::Null)?),
        Err(e @ (ValueOpError::Fatal(_) | ValueOpError::OutOfMemory(_))) => Err(e),
    }
}

pub fn set(heap: &mut Heap, frame: &Frame, container: Ref, index: Ref, value: Ref) -> Result<(), Thrown> {
    set_index(heap, frame.val_id(container), frame.val_id(index), frame.val_id(value))
}

pub fn append_op(heap: &mut Heap, frame: &Frame, container: Ref, value: Ref) -> Result<(), Thrown> {
    append(heap, frame.val_id(container), frame.val_id(value))
}

pub fn in_op(heap: &Heap, frame: &Frame, item: Ref, container: Ref) -> Result<Value, Thrown> {
    Ok(Value::Bool(contains(heap, frame.val_id(container), frame.val_id(item))?))
}

/// `spread` itself does no materialization: it just tags `operand`'s id as
/// "expand me" for the very next aggregate-construction or call opcode
/// (§3 invariants). [`flatten`] is what actually walks the source.
pub fn spread(frame: &Frame, operand: Ref) -> Value {
    Value::Spread(frame.val_id(operand))
}

/// `check_len` is a plain predicate — used by match-arm guards that branch
/// on the result rather than treating a mismatch as an error (§4.6).
pub fn check_len(heap: &Heap, frame: &Frame, operand: Ref, len: u32) -> Value {
    let id = frame.val_id(operand);
    Value::Bool(len_attr(heap, id) == Some(i64::from(len)))
}

pub fn assert_len(heap: &Heap, frame: &Frame, operand: Ref, len: u32) -> Result<(), Thrown> {
    let id = frame.val_id(operand);
    match len_attr(heap, id) {
        Some(n) if n == i64::from(len) => Ok(()),
        Some(n) => Err(Thrown::new(format!("expected {len} elements, got {n}"))),
        None => Err(Thrown::new(format!("'{}' cannot be destructured", heap.get(id).type_name()))),
    }
}

/// Collects everything in `operand` past its first `head_len` elements into
/// a fresh list, for a `[a, b, *rest]`-style destructuring pattern. The
/// `head_len <= length` bound is this opcode's own responsibility — a
/// variadic pattern's minimum-length requirement has no dedicated opcode of
/// its own (`assert_len` only expresses exact arity), so `spread_dest`
/// checks it itself rather than trusting the compiler emitted a prior guard.
pub fn spread_dest(heap: &mut Heap, frame: &Frame, operand: Ref, head_len: u32) -> Result<Value, ValueOpError> {
    let id = frame.val_id(operand);
    let items = match heap.get(id) {
        Value::Tuple(items) | Value::List(items) => items.clone(),
        other => return Err(Thrown::new(format!("'{}' cannot be destructured", other.type_name())).into()),
    };
    let head = head_len as usize;
    if head > items.len() {
        return Err(Thrown::new(format!("expected at least {head_len} elements, got {}", items.len())).into());
    }
    let mut rest = Vec::with_capacity(items.len() - head);
    for &item in &items[head..] {
        rest.push(Frame::dupe_simple(heap, item)?);
    }
    Ok(Value::List(rest))
}

pub fn unwrap_error(heap: &Heap, frame: &Frame, value: Ref) -> Result<HeapId, Thrown> {
    match heap.get(frame.val_id(value)) {
        Value::Err(inner) => Ok(*inner),
        other => Err(Thrown::new(format!("expected an err, got '{}'", other.type_name()))),
    }
}

fn matching_tag<'a>(heap: &'a Heap, frame: &Frame, name: NameId, value: Ref) -> Option<&'a TaggedValue> {
    match heap.get(frame.val_id(value)) {
        Value::Tagged(t) if t.name == name => Some(t),
        _ => None,
    }
}

pub fn unwrap_tagged(heap: &Heap, frame: &Frame, name: NameId, value: Ref) -> Result<HeapId, Thrown> {
    matching_tag(heap, frame, name, value).map(|t| t.value).ok_or_else(|| Thrown::new("tagged name mismatch"))
}

pub fn unwrap_tagged_or_null(heap: &mut Heap, frame: &Frame, name: NameId, value: Ref) -> Result<HeapId, ValueOpError> {
    match matching_tag(heap, frame, name, value) {
        Some(t) => Ok(t.value),
        None => Ok(heap.alloc_value(Value::Null)?),
    }
}

pub fn iter_init(heap: &mut Heap, frame: &Frame, source: Ref) -> Result<HeapId, ValueOpError> {
    crate::value::make_iterator(heap, frame.val_id(source))
}

pub fn iter_next(heap: &mut Heap, frame: &Frame, iterator: Ref) -> Result<Option<HeapId>, ValueOpError> {
    crate::value::iterate_next(heap, frame.val_id(iterator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::DEFAULT_PAGE_LIMIT;

    fn setup() -> (Heap, Frame) {
        let heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let frame = Frame::new(ModuleId::new(0), BodySlice::new(0, 0), 0, vec![], None);
        (heap, frame)
    }

    fn put(heap: &mut Heap, frame: &mut Frame, index: u32, value: Value) -> Ref {
        let r = Ref::new(index);
        let id = heap.alloc_value(value).unwrap();
        frame.set_ref(r, id);
        r
    }

    #[test]
    fn spread_marker_flattens_into_surrounding_list() {
        let (mut heap, mut frame) = setup();
        let one = heap.alloc_value(Value::Int(1)).unwrap();
        let list_src = put(&mut heap, &mut frame, 0, Value::List(vec![one]));
        let spread_val = spread(&frame, list_src);
        let spread_id = heap.alloc_value(spread_val).unwrap();
        frame.set_ref(Ref::new(1), spread_id);
        let tail = put(&mut heap, &mut frame, 2, Value::Int(2));
        let flat = flatten(&mut heap, &frame, &[Ref::new(1), tail]).unwrap();
        assert_eq!(flat.len(), 2);
        assert!(matches!(heap.get(flat[0]), Value::Int(1)));
        assert!(matches!(heap.get(flat[1]), Value::Int(2)));
    }

    #[test]
    fn check_len_reports_arity_mismatch_as_a_bool() {
        let (mut heap, mut frame) = setup();
        let list = put(&mut heap, &mut frame, 0, Value::List(vec![]));
        assert!(matches!(check_len(&heap, &frame, list, 1), Value::Bool(false)));
        assert!(matches!(check_len(&heap, &frame, list, 0), Value::Bool(true)));
    }

    #[test]
    fn unwrap_tagged_name_mismatch_throws() {
        let (mut heap, mut frame) = setup();
        let mut names = crate::intern::Interner::new();
        let ok_name = names.intern("Ok");
        let other_name = names.intern("Err");
        let inner = heap.alloc_value(Value::Int(1)).unwrap();
        let tagged = put(&mut heap, &mut frame, 0, Value::Tagged(TaggedValue { name: ok_name, value: inner }));
        assert!(unwrap_tagged(&heap, &frame, other_name, tagged).is_err());
        assert!(unwrap_tagged(&heap, &frame, ok_name, tagged).is_ok());
    }
}
