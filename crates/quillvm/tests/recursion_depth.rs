//! Exceeding `MAX_CALL_DEPTH` is unconditionally fatal (§5), even with a
//! handler on the stack. Built as a chain of distinct zero-arg functions
//! each calling the next, since self-capture isn't expressible through the
//! builder (a function can't name its own not-yet-built `Func` value).

use quillvm::bytecode::builder::ModuleBuilder;
use quillvm::{Interpreter, MAX_CALL_DEPTH, NoopTracer, PackageRegistry, RunError, VmConfig};

#[test]
fn a_call_chain_past_max_depth_is_fatal_not_catchable() {
    let mut m = ModuleBuilder::new();
    let chain_len = MAX_CALL_DEPTH + 8;

    let mut bodies = Vec::with_capacity(chain_len);
    {
        let mut b = m.body(0);
        let zero = b.int_const(0);
        b.ret(zero);
        bodies.push(b.finish());
    }
    for _ in 1..chain_len {
        let mut b = m.body(0);
        let next = b.load_capture(0);
        let result = b.call_zero(next);
        b.ret(result);
        bodies.push(b.finish());
    }

    let main = {
        let mut b = m.body(0);
        let mut current = b.build_func(bodies[0], 0, false, &[]);
        for body in &bodies[1..] {
            current = b.build_func(*body, 0, false, &[current]);
        }
        let result = b.call_zero(current);
        b.ret(result);
        b.finish()
    };

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    match interp.run_module("main", module) {
        Err(RunError::Fatal(report)) => {
            assert!(report.to_string().contains("recursion"));
        }
        Ok(_) => panic!("a call chain past MAX_CALL_DEPTH should not succeed"),
    }
}
