//! Arithmetic and unary opcodes (§4.6 "Arithmetic"/"Unary").
//!
//! Every function here is pure with respect to the heap: it reads operand
//! values and returns a `Value` or a [`Thrown`], never allocating. The
//! dispatch loop in [`super::Interpreter::run_frame`] is the only place that
//! turns the result into a heap slot (via `Frame::new_val`) or a redirected
//! throw.

use crate::frame::{Frame, Ref};
use crate::heap::Heap;
use crate::value::{Thrown, Value};

enum NumPair {
    Int(i64, i64),
    Num(f64, f64),
}

fn numeric_pair(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<NumPair, Thrown> {
    match (frame.val(heap, lhs), frame.val(heap, rhs)) {
        (Value::Int(a), Value::Int(b)) => Ok(NumPair::Int(*a, *b)),
        (Value::Int(a), Value::Num(b)) => Ok(NumPair::Num(*a as f64, *b)),
        (Value::Num(a), Value::Int(b)) => Ok(NumPair::Num(*a, *b as f64)),
        (Value::Num(a), Value::Num(b)) => Ok(NumPair::Num(*a, *b)),
        (a, b) => Err(Thrown::new(format!("unsupported operand types: '{}' and '{}'", a.type_name(), b.type_name()))),
    }
}

const OVERFLOWED: &str = "operation overflowed";

pub fn add(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => a.checked_add(b).map(Value::Int).ok_or_else(|| Thrown::new(OVERFLOWED)),
        NumPair::Num(a, b) => Ok(Value::Num(a + b)),
    }
}

pub fn sub(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => a.checked_sub(b).map(Value::Int).ok_or_else(|| Thrown::new(OVERFLOWED)),
        NumPair::Num(a, b) => Ok(Value::Num(a - b)),
    }
}

pub fn mul(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => a.checked_mul(b).map(Value::Int).ok_or_else(|| Thrown::new(OVERFLOWED)),
        NumPair::Num(a, b) => Ok(Value::Num(a * b)),
    }
}

/// `div` always performs true division and always yields `num` (§4.6),
/// unlike every other binary arithmetic op.
pub fn div(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => (a as f64, b as f64),
        NumPair::Num(a, b) => (a, b),
    };
    if b == 0.0 {
        return Err(Thrown::new("division by zero"));
    }
    Ok(Value::Num(a / b))
}

/// `div_floor` always yields `int` (§4.6), the one binary op that does not
/// follow the "either operand `num` promotes the result" rule.
pub fn div_floor(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => {
            if b == 0 {
                return Err(Thrown::new("division by zero"));
            }
            let q = a.checked_div(b).ok_or_else(|| Thrown::new(OVERFLOWED))?;
            let r = a % b;
            let floored = if (r != 0) && ((r < 0) != (b < 0)) { q.checked_sub(1).ok_or_else(|| Thrown::new(OVERFLOWED))? } else { q };
            Ok(Value::Int(floored))
        }
        NumPair::Num(a, b) => {
            if b == 0.0 {
                return Err(Thrown::new("division by zero"));
            }
            Ok(Value::Int((a / b).floor() as i64))
        }
    }
}

/// `rem` requires a non-negative denominator and preserves the dividend's
/// sign (§4.6) — this is Rust's `%` for the int case, not Euclidean mod.
pub fn rem(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => {
            if b < 0 {
                return Err(Thrown::new("rem requires a non-negative denominator"));
            }
            if b == 0 {
                return Err(Thrown::new("division by zero"));
            }
            Ok(Value::Int(a % b))
        }
        NumPair::Num(a, b) => {
            if b < 0.0 {
                return Err(Thrown::new("rem requires a non-negative denominator"));
            }
            if b == 0.0 {
                return Err(Thrown::new("division by zero"));
            }
            Ok(Value::Num(a % b))
        }
    }
}

pub fn pow(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    match numeric_pair(heap, frame, lhs, rhs)? {
        NumPair::Int(a, b) => {
            let exp = u32::try_from(b).map_err(|_| Thrown::new("pow exponent must be non-negative"))?;
            a.checked_pow(exp).map(Value::Int).ok_or_else(|| Thrown::new(OVERFLOWED))
        }
        NumPair::Num(a, b) => Ok(Value::Num(a.powf(b))),
    }
}

fn int_pair(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref, op: &str) -> Result<(i64, i64), Thrown> {
    match (frame.val(heap, lhs), frame.val(heap, rhs)) {
        (Value::Int(a), Value::Int(b)) => Ok((*a, *b)),
        (a, b) => Err(Thrown::new(format!("{op} requires int operands, got '{}' and '{}'", a.type_name(), b.type_name()))),
    }
}

/// Shift amounts beyond 63 saturate per §4.6/§9 rather than wrapping the way
/// Rust's native shift operators would (which panic on an out-of-range
/// count in debug builds). The `r_shift`-by-negative-lhs case is documented
/// as a possible bug in the behavior being matched; implemented literally.
pub fn l_shift(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = int_pair(heap, frame, lhs, rhs, "l_shift")?;
    if b < 0 {
        return Err(Thrown::new("shift amount must be non-negative"));
    }
    Ok(Value::Int(if b > 63 { 0 } else { a << b }))
}

pub fn r_shift(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = int_pair(heap, frame, lhs, rhs, "r_shift")?;
    if b < 0 {
        return Err(Thrown::new("shift amount must be non-negative"));
    }
    if b > 63 {
        return Ok(Value::Int(if a < 0 { i64::MAX } else { 0 }));
    }
    Ok(Value::Int(a >> b))
}

pub fn bit_and(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = int_pair(heap, frame, lhs, rhs, "bit_and")?;
    Ok(Value::Int(a & b))
}

pub fn bit_or(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = int_pair(heap, frame, lhs, rhs, "bit_or")?;
    Ok(Value::Int(a | b))
}

pub fn bit_xor(heap: &Heap, frame: &Frame, lhs: Ref, rhs: Ref) -> Result<Value, Thrown> {
    let (a, b) = int_pair(heap, frame, lhs, rhs, "bit_xor")?;
    Ok(Value::Int(a ^ b))
}

pub fn negate(heap: &Heap, frame: &Frame, operand: Ref) -> Result<Value, Thrown> {
    match frame.val(heap, operand) {
        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(|| Thrown::new(OVERFLOWED)),
        Value::Num(n) => Ok(Value::Num(-n)),
        other => Err(Thrown::new(format!("cannot negate '{}'", other.type_name()))),
    }
}

pub fn bool_not(heap: &Heap, frame: &Frame, operand: Ref) -> Result<Value, Thrown> {
    match frame.val(heap, operand) {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(Thrown::new(format!("bool_not requires a bool, got '{}'", other.type_name()))),
    }
}

pub fn bit_not(heap: &Heap, frame: &Frame, operand: Ref) -> Result<Value, Thrown> {
    match frame.val(heap, operand) {
        Value::Int(n) => Ok(Value::Int(!n)),
        other => Err(Thrown::new(format!("bit_not requires an int, got '{}'", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::DEFAULT_PAGE_LIMIT;
    use crate::value::ModuleId;
    use crate::bytecode::module::BodySlice;

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
    fn add_overflow_throws() {
        let (mut heap, mut frame) = setup();
        let a = put(&mut heap, &mut frame, 0, Value::Int(i64::MAX));
        let b = put(&mut heap, &mut frame, 1, Value::Int(1));
        assert!(add(&heap, &frame, a, b).is_err());
    }

    #[test]
    fn div_floor_rounds_toward_negative_infinity() {
        let (mut heap, mut frame) = setup();
        let a = put(&mut heap, &mut frame, 0, Value::Int(-7));
        let b = put(&mut heap, &mut frame, 1, Value::Int(2));
        let result = div_floor(&heap, &frame, a, b).unwrap();
        assert!(matches!(result, Value::Int(-4)));
    }

    #[test]
    fn r_shift_by_64_saturates_for_negative_lhs() {
        let (mut heap, mut frame) = setup();
        let a = put(&mut heap, &mut frame, 0, Value::Int(-5));
        let b = put(&mut heap, &mut frame, 1, Value::Int(64));
        let result = r_shift(&heap, &frame, a, b).unwrap();
        assert!(matches!(result, Value::Int(i64::MAX)));
    }

    #[test]
    fn mixed_int_num_addition_promotes_to_num() {
        let (mut heap, mut frame) = setup();
        let a = put(&mut heap, &mut frame, 0, Value::Int(2));
        let b = put(&mut heap, &mut frame, 1, Value::Num(0.5));
        let result = add(&heap, &frame, a, b).unwrap();
        assert!(matches!(result, Value::Num(n) if n == 2.5));
    }
}
