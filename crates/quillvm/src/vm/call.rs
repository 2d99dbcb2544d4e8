//! The call protocol (§4.6.1): `call`, `call_one`, `call_zero`, `this_call`,
//! `this_call_zero` all canonicalize here to `(callee, this, args[])`.
//!
//! Argument flattening mirrors aggregate construction — a spread operand
//! contributes its element count (`vm::collections::flatten`). Arity is
//! checked once the callee's shape is known: non-variadic callables require
//! an exact match, variadic callables require at least `arg_count - 1`
//! positional arguments, packing the remainder into a `list` as the final
//! parameter. A mismatch throws through the ordinary handler-stack path,
//! same as any other opcode-level validation failure; exceeding
//! `MAX_CALL_DEPTH` is unconditionally fatal (§5).

use crate::config::MAX_CALL_DEPTH;
use crate::frame::{Frame, Ref};
use crate::heap::HeapId;
use crate::tracer::VmTracer;
use crate::value::{FuncValue, NativeValue, Value, ValueOpError};
use crate::vm::error::{RunError, RunResult};
use crate::vm::exceptions::fatal_in_frame;
use crate::vm::{Interpreter, collections};

/// What a call opcode's own dest ref should do once `perform` returns.
pub enum CallOutcome {
    /// Write `id` into the call instruction's own dest ref and continue.
    Value(HeapId),
    /// The callee's failure (or a native throw) was already redirected to a
    /// handler elsewhere in the current frame — `ip` has moved, and the call
    /// instruction's own dest ref is left untouched.
    Redirected,
}

fn arity_ok(arg_count: u32, variadic: bool, given: usize) -> bool {
    if variadic { given + 1 >= arg_count as usize } else { given == arg_count as usize }
}

pub(super) fn redirect_or_escalate<Tr: VmTracer>(interp: &mut Interpreter<Tr>, frame_idx: usize, message: &str) -> RunResult<CallOutcome> {
    crate::vm::exceptions::throw_in_current_frame(&mut interp.heap, &mut interp.frames[frame_idx], &interp.resolver, message)?;
    Ok(CallOutcome::Redirected)
}

/// Evaluates a call instruction's operand refs into `(callee, this, args)`
/// (expanding any spreads among `arg_refs`) and dispatches it.
pub fn perform_call<Tr: VmTracer>(
    interp: &mut Interpreter<Tr>,
    frame_idx: usize,
    callee_ref: Ref,
    this_ref: Option<Ref>,
    arg_refs: &[Ref],
) -> RunResult<CallOutcome> {
    let callee = interp.frames[frame_idx].val_id(callee_ref);
    let this = this_ref.map(|r| interp.frames[frame_idx].val_id(r));
    let args = match collections::flatten(&mut interp.heap, &interp.frames[frame_idx], arg_refs) {
        Ok(args) => args,
        Err(ValueOpError::Thrown(t)) => return redirect_or_escalate(interp, frame_idx, &t.0),
        Err(ValueOpError::Fatal(message)) => return Err(fatal_in_frame(&interp.frames[frame_idx], &interp.resolver, &message)),
        Err(ValueOpError::OutOfMemory(e)) => return Err(e.into()),
    };
    call(interp, frame_idx, callee, this, args)
}

pub fn call<Tr: VmTracer>(interp: &mut Interpreter<Tr>, frame_idx: usize, callee: HeapId, this: Option<HeapId>, args: Vec<HeapId>) -> RunResult<CallOutcome> {
    match interp.heap.get(callee) {
        Value::Native(native) => call_native(interp, frame_idx, *native, this, args),
        Value::Func(func) => {
            let func = func.clone();
            call_function(interp, frame_idx, func, this, args)
        }
        other => {
            let message = format!("'{}' is not callable", other.type_name());
            redirect_or_escalate(interp, frame_idx, &message)
        }
    }
}

fn call_native<Tr: VmTracer>(interp: &mut Interpreter<Tr>, frame_idx: usize, native: NativeValue, this: Option<HeapId>, mut args: Vec<HeapId>) -> RunResult<CallOutcome> {
    if !arity_ok(native.arg_count, native.variadic, args.len()) {
        let message = format!("expected {} argument(s), got {}", native.arg_count, args.len());
        return redirect_or_escalate(interp, frame_idx, &message);
    }
    for id in &mut args {
        *id = Frame::dupe_simple(&mut interp.heap, *id)?;
    }
    let this = native.bound_this.or(this);
    let mut ctx = crate::native::Context::new(&mut interp.heap, this);
    match (native.func)(&mut ctx, &args) {
        crate::native::NativeOutcome::Value(id) => Ok(CallOutcome::Value(id)),
        crate::native::NativeOutcome::Throw(message) => redirect_or_escalate(interp, frame_idx, &message),
        crate::native::NativeOutcome::Fatal(message) => Err(fatal_in_frame(&interp.frames[frame_idx], &interp.resolver, &message)),
    }
}

fn call_function<Tr: VmTracer>(interp: &mut Interpreter<Tr>, frame_idx: usize, func: FuncValue, this: Option<HeapId>, mut args: Vec<HeapId>) -> RunResult<CallOutcome> {
    if !arity_ok(func.arg_count, func.variadic, args.len()) {
        let message = format!("expected {} argument(s), got {}", func.arg_count, args.len());
        return redirect_or_escalate(interp, frame_idx, &message);
    }
    if interp.frames.len() >= MAX_CALL_DEPTH {
        return Err(fatal_in_frame(&interp.frames[frame_idx], &interp.resolver, "maximum recursion depth exceeded"));
    }
    if func.variadic {
        let head = func.arg_count as usize - 1;
        let tail = args.split_off(head);
        let tail_list = interp.heap.alloc_value(Value::List(tail))?;
        args.push(tail_list);
    }
    for id in &mut args {
        *id = Frame::dupe_simple(&mut interp.heap, *id)?;
    }

    let (stack, handlers) = interp.frame_cache.take();
    let mut new_frame = Frame::new_cached(func.module, func.body, func.arg_count, func.captures, this, stack, handlers);
    for (i, id) in args.into_iter().enumerate() {
        new_frame.set_ref(Ref::new(u32::try_from(i).unwrap()), id);
    }
    let depth = u32::try_from(interp.frames.len()).unwrap();
    new_frame.reified = Some(interp.heap.alloc_value(Value::Frame(depth))?);

    interp.frames.push(new_frame);
    interp.tracer.on_call(interp.frames.len());
    let result = interp.run_frame();
    let finished = interp.frames.pop().expect("frame just pushed above");
    interp.tracer.on_return(interp.frames.len());
    if let Some(reified) = finished.reified {
        interp.heap.release(reified);
    }

    match result {
        Ok(id) => {
            let (stack, handlers) = finished.into_cacheable();
            interp.frame_cache.give_back(stack, handlers);
            if matches!(interp.heap.get(id), Value::Err(_))
                && let Some(handler) = interp.frames[frame_idx].handlers.top()
            {
                interp.frames[frame_idx].set_ref(handler.target_ref, id);
                interp.frames[frame_idx].ip = handler.jump_offset;
                return Ok(CallOutcome::Redirected);
            }
            Ok(CallOutcome::Value(id))
        }
        Err(RunError::Fatal(mut reporter)) => {
            let caller = &interp.frames[frame_idx];
            let debug = &interp.resolver.module(caller.module).debug_info;
            let offset = debug.byte_offset(caller.relative_ip(caller.ip));
            reporter.trace("called here", debug.source_path.clone(), offset);
            Err(RunError::Fatal(reporter))
        }
    }
}
