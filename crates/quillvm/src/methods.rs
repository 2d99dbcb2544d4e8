//! Static per-type method dispatch tables (§4.7).
//!
//! `get(container, "name")` consults [`lookup`] before falling back to the
//! ordinary indexing path in [`crate::value`]; a hit returns a bound
//! [`NativeValue`] whose `bound_this` channel carries the receiver, the same
//! pattern the teacher uses for builtin methods (`Context::this()`).
//! Deliberately small: `list.append`, `list.len`, `str.len` are the
//! representative slice named in SPEC_FULL.md, not a stdlib (non-goal).

use crate::heap::{Heap, HeapId};
use crate::native::{Context, NativeFn, NativeOutcome};
use crate::value::{Value, VStr};

fn list_append(ctx: &mut Context<'_>, args: &[HeapId]) -> NativeOutcome {
    let Some(this) = ctx.this() else {
        return ctx.throw("append called with no receiver");
    };
    let [value] = args else {
        return ctx.throw(format!("append() takes exactly one argument ({} given)", args.len()));
    };
    match crate::value::append(ctx.heap, this, *value) {
        Ok(()) => match ctx.heap.alloc_value(Value::Null) {
            Ok(id) => NativeOutcome::Value(id),
            Err(e) => e.into(),
        },
        Err(thrown) => ctx.throw(thrown.0),
    }
}

fn list_len(ctx: &mut Context<'_>, _args: &[HeapId]) -> NativeOutcome {
    let Some(this) = ctx.this() else {
        return ctx.throw("len called with no receiver");
    };
    let Some(len) = crate::value::len_attr(ctx.heap, this) else {
        return ctx.throw("receiver is not a list");
    };
    match ctx.heap.alloc_value(Value::Int(len)) {
        Ok(id) => NativeOutcome::Value(id),
        Err(e) => e.into(),
    }
}

fn str_len(ctx: &mut Context<'_>, _args: &[HeapId]) -> NativeOutcome {
    let Some(this) = ctx.this() else {
        return ctx.throw("len called with no receiver");
    };
    let Some(len) = crate::value::len_attr(ctx.heap, this) else {
        return ctx.throw("receiver is not a str");
    };
    match ctx.heap.alloc_value(Value::Int(len)) {
        Ok(id) => NativeOutcome::Value(id),
        Err(e) => e.into(),
    }
}

/// `list.append`/`list.len` table, keyed by method name.
const LIST_METHODS: &[(&str, NativeFn, u32, bool)] = &[("append", list_append as NativeFn, 1, false), ("len", list_len as NativeFn, 0, false)];

/// `str.len` table.
const STR_METHODS: &[(&str, NativeFn, u32, bool)] = &[("len", str_len as NativeFn, 0, false)];

fn table_for(value: &Value) -> Option<&'static [(&'static str, NativeFn, u32, bool)]> {
    match value {
        Value::List(_) => Some(LIST_METHODS),
        Value::Str(_) => Some(STR_METHODS),
        _ => None,
    }
}

/// `get(container, name)`'s method-dispatch fallback (§4.7): looks up `name`
/// in the receiver's type table and, on a hit, allocates a bound
/// [`Value::Native`] closing over `receiver` via `bound_this`.
pub fn lookup(heap: &mut Heap, receiver: HeapId, name: &str) -> Option<Result<HeapId, crate::heap::OutOfMemory>> {
    let table = table_for(heap.get(receiver))?;
    let &(_, func, arg_count, variadic) = table.iter().find(|&&(n, ..)| n == name)?;
    Some(heap.alloc_value(Value::Native(crate::value::NativeValue { func, arg_count, variadic, bound_this: Some(receiver) })))
}

/// Property-style `get(container, "len")` is handled directly in
/// [`crate::value::len_attr`] rather than through this table, matching §4.1
/// ("`str` supports both `int` and a `len` attribute") — but exposing `len`
/// as a zero-arg *method* too (`xs.len()`) costs nothing extra here, so both
/// call shapes work.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::DEFAULT_PAGE_LIMIT;

    #[test]
    fn list_append_method_grows_the_list() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let list = heap.alloc_value(Value::List(vec![])).unwrap();
        let bound = lookup(&mut heap, list, "append").unwrap().unwrap();
        let Value::Native(native) = heap.get(bound) else { panic!("expected native") };
        let native = *native;
        let value = heap.alloc_value(Value::Int(9)).unwrap();
        let mut ctx = Context::new(&mut heap, native.bound_this);
        let outcome = (native.func)(&mut ctx, &[value]);
        assert!(matches!(outcome, NativeOutcome::Value(_)));
        assert!(matches!(heap.get(list), Value::List(items) if items.len() == 1));
    }

    #[test]
    fn unknown_method_name_misses() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let s = heap.alloc_value(Value::Str(VStr::owned("hi"))).unwrap();
        assert!(lookup(&mut heap, s, "nonexistent").is_none());
    }
}
