//! Error-handler stack opcodes and the throw/fatal glue shared by the
//! dispatch loop and the call protocol (§4.3, §4.4, §4.6 "Control flow").

use crate::diagnostics::ErrorReporter;
use crate::frame::{Frame, Handler, Ref};
use crate::heap::Heap;
use crate::import_resolver::ImportResolver;
use crate::value::Value;
use crate::vm::error::RunError;

pub fn push_err_handler(frame: &mut Frame, target_ref: Ref, jump_offset: u32) {
    frame.clear_ref(target_ref);
    frame.handlers.push(Handler { target_ref, jump_offset });
}

/// Pops the top handler. Returns `true` when the protected region completed
/// without a throw landing in its target ref — the dispatch loop should then
/// jump to this `pop_err_handler` instruction's own baked-in offset to skip
/// the catch body that follows.
pub fn pop_err_handler(frame: &mut Frame) -> bool {
    let handler = frame.handlers.pop();
    frame.is_uninitialized(handler.target_ref)
}

/// Builds the fatal report for `message` originating in `frame`, with the
/// byte offset derived from the instruction that just ran (`ip - 1`).
pub fn fatal_in_frame(frame: &Frame, resolver: &ImportResolver, message: &str) -> RunError {
    let debug = &resolver.module(frame.module).debug_info;
    let offset = debug.byte_offset(frame.relative_ip(frame.ip.saturating_sub(1)));
    let mut reporter = ErrorReporter::new();
    reporter.err(message, debug.source_path.clone(), offset);
    RunError::Fatal(reporter)
}

/// The tier-1(a) path (§7): an opcode-level validation failure (a type
/// mismatch, an out-of-range index, ...) redirects to the current frame's
/// top handler if one is present, else escalates straight to fatal. This is
/// distinct from the explicit `throw` opcode, which returns an `err` value
/// instead of escalating when no handler is present — see
/// `vm::Interpreter::run_frame`'s `Opcode::Throw` arm.
pub fn throw_in_current_frame(heap: &mut Heap, frame: &mut Frame, resolver: &ImportResolver, message: &str) -> Result<(), RunError> {
    if let Some(handler) = frame.handlers.top() {
        let payload = heap.alloc_value(Value::Str(crate::value::VStr::owned(message)))?;
        let wrapped = heap.alloc_value(Value::Err(payload))?;
        frame.set_ref(handler.target_ref, wrapped);
        frame.ip = handler.jump_offset;
        return Ok(());
    }
    Err(fatal_in_frame(frame, resolver, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::module::BodySlice;
    use crate::heap::DEFAULT_PAGE_LIMIT;
    use crate::value::ModuleId;

    #[test]
    fn pop_without_a_throw_reports_uninitialized() {
        let mut frame = Frame::new(ModuleId::new(0), BodySlice::new(0, 0), 0, vec![], None);
        push_err_handler(&mut frame, Ref::new(0), 99);
        assert!(pop_err_handler(&mut frame));
    }

    #[test]
    fn pop_after_a_redirect_reports_initialized() {
        let mut heap = Heap::new(DEFAULT_PAGE_LIMIT);
        let mut frame = Frame::new(ModuleId::new(0), BodySlice::new(0, 0), 0, vec![], None);
        push_err_handler(&mut frame, Ref::new(0), 99);
        let resolver = ImportResolver::default();
        throw_in_current_frame(&mut heap, &mut frame, &resolver, "boom").unwrap();
        assert!(!pop_err_handler(&mut frame));
        assert_eq!(frame.ip, 99);
    }
}
