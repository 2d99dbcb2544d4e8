//! Aggregate construction/access, destructuring, map containment, and a
//! `for`-style loop compiled from `iter_init`/`iter_next`/`jump` (§4.6).

use quillvm::bytecode::builder::{MapEntry, ModuleBuilder};
use quillvm::bytecode::op::Opcode;
use quillvm::{Interpreter, NoopTracer, PackageRegistry, Value, VmConfig};

fn run_and_get(module: quillvm::bytecode::module::Module) -> (Interpreter<NoopTracer>, quillvm::HeapId) {
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    let id = interp.run_module("main", module).expect("program should run to completion");
    (interp, id)
}

#[test]
fn list_construction_and_indexed_access() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);
    let a = b.int_const(10);
    let bb = b.int_const(20);
    let list = b.build_list(&[a, bb]);
    let first = b.get_int(list, 0);
    let second = b.get_int(list, 1);
    let sum = b.bin(Opcode::Add, first, second);
    b.ret(sum);
    let main = b.finish();
    let module = m.finish(main);

    let (interp, id) = run_and_get(module);
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 30),
        other => panic!("expected Int(30), got {other:?}"),
    }
}

#[test]
fn tuple_destructuring_splits_head_and_rest() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);
    let v1 = b.int_const(1);
    let v2 = b.int_const(2);
    let v3 = b.int_const(3);
    let tuple = b.build_tuple(&[v1, v2, v3]);
    b.assert_len(tuple, 3);
    let rest = b.spread_dest(tuple, 1);
    let head_of_rest = b.get_int(rest, 0);
    b.ret(head_of_rest);
    let main = b.finish();
    let module = m.finish(main);

    let (interp, id) = run_and_get(module);
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 2),
        other => panic!("expected Int(2), got {other:?}"),
    }
}

#[test]
fn assert_len_mismatch_throws_and_is_fatal_without_a_handler() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);
    let v1 = b.int_const(1);
    let v2 = b.int_const(2);
    let tuple = b.build_tuple(&[v1, v2]);
    b.assert_len(tuple, 3);
    b.ret(tuple);
    let main = b.finish();
    let module = m.finish(main);

    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    match interp.run_module("main", module) {
        Err(quillvm::RunError::Fatal(report)) => assert!(report.to_string().contains("3 elements")),
        Ok(_) => panic!("a length mismatch with no handler should be fatal"),
    }
}

#[test]
fn map_construction_and_containment() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);
    let key = b.str_const("x");
    let value = b.int_const(5);
    let map = b.build_map(&[MapEntry::Pair(key, value)]);
    let present = b.in_(key, map);
    b.ret(present);
    let main = b.finish();
    let module = m.finish(main);

    let (interp, id) = run_and_get(module);
    match interp.get(id) {
        Value::Bool(present) => assert!(*present),
        other => panic!("expected Bool(true), got {other:?}"),
    }
}

#[test]
fn spreading_a_map_into_a_map_literal_merges_its_pairs() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);
    let xk = b.str_const("x");
    let xv = b.int_const(1);
    let source = b.build_map(&[MapEntry::Pair(xk, xv)]);
    let spread_source = b.spread(source);
    let yk = b.str_const("y");
    let yv = b.int_const(2);
    let merged = b.build_map(&[MapEntry::Spread(spread_source), MapEntry::Pair(yk, yv)]);
    let count = b.check_len(merged, 2);
    let has_x = b.in_(xk, merged);
    let has_y = b.in_(yk, merged);
    let checks = b.build_tuple(&[count, has_x, has_y]);
    b.ret(checks);
    let main = b.finish();
    let module = m.finish(main);

    let (interp, id) = run_and_get(module);
    match interp.get(id) {
        Value::Tuple(items) => {
            for item in items {
                match interp.get(*item) {
                    Value::Bool(ok) => assert!(*ok, "merged map should have both the spread and the literal pair"),
                    other => panic!("expected Bool(true), got {other:?}"),
                }
            }
        }
        other => panic!("expected a 3-element tuple of bools, got {other:?}"),
    }
}

#[test]
fn spreading_a_str_is_unconditionally_fatal_even_with_a_handler() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);

    let err_slot = b.nop(); // idx 0: reserved catch-variable slot
    b.push_err_handler(err_slot, 5); // idx 1: would catch into err_slot, jumps to idx 5 on throw
    let s = b.str_const("hi"); // idx 2
    let spread = b.spread(s); // idx 3
    let list = b.build_list(&[spread]); // idx 4: `flatten` materializes the spread, which is fatal
    b.pop_err_handler(999); // idx 5: never reached
    b.pop_err_handler(999); // idx 6: never reached
    b.ret(list); // idx 7

    let main = b.finish();
    let module = m.finish(main);
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    match interp.run_module("main", module) {
        Err(quillvm::RunError::Fatal(report)) => assert!(report.to_string().contains("spreading a str")),
        Ok(_) => panic!("spreading a str should never succeed"),
    }
}

#[test]
fn a_for_loop_compiled_from_iter_init_iter_next_jump_visits_every_element() {
    let mut m = ModuleBuilder::new();
    let mut b = m.body(0);

    let e1 = b.int_const(1); // idx 0
    let e2 = b.int_const(2); // idx 1
    let e3 = b.int_const(3); // idx 2
    let source = b.build_list(&[e1, e2, e3]); // idx 3
    let collected = b.build_list(&[]); // idx 4
    let iterator = b.iter_init(source); // idx 5

    let loop_start = iterator.index() as u32 + 1; // idx 6, the next emitted instruction
    let elem = b.iter_next(iterator, 9); // idx 6, jumps to idx 9 once exhausted
    b.append(collected, elem); // idx 7
    b.jump(loop_start); // idx 8
    b.ret(collected); // idx 9

    let main = b.finish();
    let module = m.finish(main);

    let (interp, id) = run_and_get(module);
    match interp.get(id) {
        Value::List(items) => {
            assert_eq!(items.len(), 3);
            for (item, expected) in items.iter().zip([1i64, 2, 3]) {
                match interp.get(*item) {
                    Value::Int(n) => assert_eq!(*n, expected),
                    other => panic!("expected Int({expected}), got {other:?}"),
                }
            }
        }
        other => panic!("expected a 3-element list, got {other:?}"),
    }
}
