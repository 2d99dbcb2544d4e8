//! Comparison opcodes (§4.6 "Comparison").
//!
//! Equality is defined for every value via [`crate::value::eql`]; ordering
//! is numeric-only and throws on anything else, matching "Ordering ops
//! require numeric operands; equality is defined for all values."

use crate::frame::{Frame, Ref};
use crate::heap::Heap;
use crate::value::{Thrown, Value, eql};

pub fn equal(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    Ok(Value::Bool(eql(heap, frame.val_id(lhs), frame.val_id(rhs))))
}

pub fn not_equal(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    Ok(Value::Bool(!eql(heap, frame.val_id(lhs), frame.val_id(rhs))))
}

fn numeric_pair(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<(f64, f64), Thrown> {
    let as_num = |v: &Value| match v {
        Value::Int(n) => Some(*n as f64),
        Value::Num(n) => Some(*n),
        _ => None,
    };
    let a = frame.val(heap, lhs);
    let b = frame.val(heap, rhs);
    match (as_num(a), as_num(b)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Thrown::new(format!("comparison requires numeric operands, got '{}' and '{}'", a.type_name(), b.type_name()))),
    }
}

pub fn less_than(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = numeric_pair(heap, frame, lhs, rhs)?;
    Ok(Value::Bool(a < b))
}

pub fn less_than_equal(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = numeric_pair(heap, frame, lhs, rhs)?;
    Ok(Value::Bool(a <= b))
}

pub fn greater_than(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = numeric_pair(heap, frame, lhs, rhs)?;
    Ok(Value::Bool(a > b))
}

pub fn greater_than_equal(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = numeric_pair(heap, frame, lhs, rhs)?;
    Ok(Value::Bool(a >= b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::module::BodySlice;
    use crate::heap::DEFAULT_PAGE_LIMIT;
    use crate::value::ModuleId;

    #[test]
    fn int_and_num_compare_equal_across_tags() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let mut frame = Frame::new(ModuleId::new(0), BodySlice::new(0, 0), 0, vec![], None);
        let a = heap.alloc_value(Value::Int(3)).unwrap();
        let b = heap.alloc_value(Value::Num(3.0)).unwrap();
        frame.set_ref(Ref::new(0), a);
        frame.set_ref(Ref::new(1), b);
        let result = equal(&heap, &frame, Ref::new(0), Ref::new(1)).unwrap();
        assert!(matches!(result, Value::Bool(true)));
    }

    #[test]
    fn ordering_on_non_numeric_operands_throws() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let mut frame = Frame::new(ModuleId::new(0), BodySlice::new(0, 0), 0, vec![], None);
        let a = heap.alloc_value(Value::Bool(true)).unwrap();
        let b = heap.alloc_value(Value::Bool(false)).unwrap();
        frame.set_ref(Ref::new(0), a);
        frame.set_ref(Ref::new(1), b);
        assert!(less_than(&heap, &frame, Ref::new(0), Ref::new(1)).is_err());
    }
}
