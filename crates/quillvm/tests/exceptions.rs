//! Error-tier tests (§7): an explicit `throw` caught by a handler, an
//! explicit `throw` with no handler that becomes the program's own result,
//! and a callee's `err` result redirected into the caller's handler.

use quillvm::bytecode::builder::ModuleBuilder;
use quillvm::{Interpreter, NoopTracer, PackageRegistry, Value, VmConfig};

#[test]
fn throw_lands_in_the_handler_and_the_catch_body_unwraps_it() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);

    let err_slot = b.nop(); // idx 0: reserved catch-variable slot
    b.push_err_handler(err_slot, 5); // idx 1: catches into err_slot, jumps to idx 5 on throw
    let payload = b.int_const(99); // idx 2
    b.throw(payload); // idx 3: handler present, redirects here, never falls through
    b.pop_err_handler(999); // idx 4: success-path pop, unreached since the throw always fires
    b.pop_err_handler(999); // idx 5: catch-start pop, consumes the handler the throw used
    let unwrapped = b.unwrap_error(err_slot); // idx 6
    b.ret(unwrapped); // idx 7
    let main = b.finish();

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("a caught throw is not fatal");
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 99),
        other => panic!("expected the unwrapped throw payload Int(99), got {other:?}"),
    }
}

#[test]
fn throw_with_no_handler_becomes_the_program_result_instead_of_escalating() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);
    let payload = b.int_const(7);
    b.throw(payload);
    let main = b.finish();

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("an unhandled throw is not fatal, just an err result");
    match interp.get(id) {
        Value::Err(inner) => match interp.get(*inner) {
            Value::Int(n) => assert_eq!(*n, 7),
            other => panic!("expected the wrapped payload Int(7), got {other:?}"),
        },
        other => panic!("expected Err(..), got {other:?}"),
    }
}

#[test]
fn a_callee_err_result_redirects_into_the_callers_handler() {
    let mut m = ModuleBuilder::new();

    let failing_body = {
        let mut b = m.body(0);
        let payload = b.int_const(5);
        let wrapped = b.build_error(payload);
        b.ret(wrapped);
        b.finish()
    };

    let mut b = m.body(0);
    let func = b.build_func(failing_body, 0, false, &[]);
    let err_slot = b.nop(); // idx 1
    b.push_err_handler(err_slot, 5); // idx 2, catch-start at idx 5
    b.call_zero(func); // idx 3: the callee's err result redirects here
    b.pop_err_handler(999); // idx 4: success-path pop, unreached
    b.pop_err_handler(999); // idx 5: catch-start pop
    let unwrapped = b.unwrap_error(err_slot); // idx 6
    b.ret(unwrapped); // idx 7
    let main = b.finish();

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("a redirected callee err is not fatal");
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 5),
        other => panic!("expected the unwrapped callee err payload Int(5), got {other:?}"),
    }
}
