//! Import resolution (§4.8): an already-run module resolved by name, and a
//! registered native package.

use quillvm::bytecode::builder::ModuleBuilder;
use quillvm::{COMPILED_MODULE_EXTENSION, Context, Interpreter, NativeOutcome, NativePackage, NoopTracer, PackageRegistry, RunError, Value, VmConfig};

#[test]
fn import_resolves_an_already_run_module_by_name_without_rerunning_it() {
    let provider = {
        let mut m = ModuleBuilder::new();
        let mut b = m.body(0);
        let answer = b.int_const(42);
        b.ret(answer);
        let main = b.finish();
        m.finish(main)
    };

    let consumer = {
        let mut m = ModuleBuilder::new();
        let mut b = m.body(0);
        let imported = b.import("provider");
        b.ret(imported);
        let main = b.finish();
        m.finish(main)
    };

    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    interp.run_module("provider", provider).expect("provider module should run");
    let id = interp.run_module("consumer", consumer).expect("import of an already-run module should succeed");
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 42),
        other => panic!("expected the provider's cached result Int(42), got {other:?}"),
    }
}

#[derive(Debug)]
struct Answers;

impl NativePackage for Answers {
    fn load(&self, ctx: &mut Context<'_>) -> NativeOutcome {
        match ctx.heap.alloc_value(Value::Int(123)) {
            Ok(id) => NativeOutcome::Value(id),
            Err(e) => e.into(),
        }
    }
}

#[test]
fn importing_a_file_name_with_import_files_disabled_is_a_distinct_fatal_error() {
    let module = {
        let mut m = ModuleBuilder::new();
        let mut b = m.body(0);
        let imported = b.import(&format!("whatever{COMPILED_MODULE_EXTENSION}"));
        b.ret(imported);
        let main = b.finish();
        m.finish(main)
    };

    // import_files defaults to false, and no package named "whatever.qlc" is
    // registered, so this must fail with the host-disabled message rather
    // than falling through to "not found".
    let mut interp = Interpreter::new(VmConfig::new(), PackageRegistry::new(), NoopTracer);
    match interp.run_module("main", module) {
        Err(RunError::Fatal(report)) => assert!(report.to_string().contains("importing disabled by host")),
        Ok(_) => panic!("importing a file with import_files disabled should not succeed"),
    }
}

#[test]
fn import_resolves_a_registered_native_package() {
    let mut registry = PackageRegistry::new();
    registry.register("answers", Box::new(Answers));

    let module = {
        let mut m = ModuleBuilder::new();
        let mut b = m.body(0);
        let imported = b.import("answers");
        b.ret(imported);
        let main = b.finish();
        m.finish(main)
    };

    let mut interp = Interpreter::new(VmConfig::new(), registry, NoopTracer);
    let id = interp.run_module("main", module).expect("import of a native package should succeed");
    match interp.get(id) {
        Value::Int(n) => assert_eq!(*n, 123),
        other => panic!("expected the native package's value Int(123), got {other:?}"),
    }
}
