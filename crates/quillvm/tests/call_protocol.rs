//! End-to-end call protocol tests built with `ModuleBuilder` directly,
//! since there's no compiler front end to drive these from source text.

use quillvm::bytecode::builder::ModuleBuilder;
use quillvm::bytecode::op::Opcode;
use quillvm::{Interpreter, NoopTracer, PackageRegistry, Value, VmConfig};

#[test]
fn call_invokes_a_two_arg_function_and_returns_its_sum() {
    let mut m = ModuleBuilder::new();

    let add_body = {
        let mut b = m.body(2);
        let a = b.param(0);
        let bb = b.param(1);
        let sum = b.bin(Opcode::Add, a, bb);
        b.ret(sum);
        b.finish()
    };

    let main = {
        let mut b = m.body(0);
        let func = b.build_func(add_body, 2, false, &[]);
        let three = b.int_const(3);
        let four = b.int_const(4);
        let result = b.call(func, &[three, four]);
        b.ret(result);
        b.finish()
    };

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("call should succeed");
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 7),
        other => panic!("expected Int(7), got {other:?}"),
    }
}

#[test]
fn this_call_zero_binds_the_receiver_the_callee_reads_via_load_this() {
    let mut m = ModuleBuilder::new();

    let method_body = {
        let mut b = m.body(0);
        let this = b.load_this();
        let one = b.int_const(1);
        let incremented = b.bin(Opcode::Add, this, one);
        b.ret(incremented);
        b.finish()
    };

    let main = {
        let mut b = m.body(0);
        let func = b.build_func(method_body, 0, false, &[]);
        let receiver = b.int_const(41);
        let result = b.this_call_zero(receiver, func);
        b.ret(result);
        b.finish()
    };

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("this_call_zero should succeed");
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 42),
        other => panic!("expected Int(42), got {other:?}"),
    }
}

#[test]
fn variadic_call_packs_trailing_args_into_a_list() {
    let mut m = ModuleBuilder::new();

    let tail_body = {
        let mut b = m.body(2);
        let rest = b.param(1);
        b.ret(rest);
        b.finish()
    };

    let main = {
        let mut b = m.body(0);
        let func = b.build_func(tail_body, 2, true, &[]);
        let one = b.int_const(1);
        let two = b.int_const(2);
        let three = b.int_const(3);
        let result = b.call(func, &[one, two, three]);
        b.ret(result);
        b.finish()
    };

    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("variadic call should succeed");
    match interp.get(id) {
        Value::List(items) => assert_eq!(items.len(), 2),
        other => panic!("expected the packed variadic tail list, got {other:?}"),
    }
}
