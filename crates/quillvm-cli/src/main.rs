//! Thin host harness: loads a precompiled module from disk and runs it.
//!
//! There is no parser in this workspace (the compiler is an external
//! collaborator, see `SPEC_FULL.md` §4 Non-goals), so the only input this
//! binary accepts is a module already serialized with `postcard` — the same
//! `.qlc` shape `import` loads at runtime. A host that has a real compiler
//! in front of this crate would replace this file; it exists so the VM has
//! somewhere to run from a command line at all.

use std::{env, process::ExitCode, time::Instant};

use quillvm::{Interpreter, NoopTracer, PackageRegistry, StderrTracer, VmConfig, load_compiled_module};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: quillvm <module.qlc> [--trace]");
        return ExitCode::FAILURE;
    };
    let trace = args.iter().any(|a| a == "--trace");

    let config = VmConfig::new().import_files(true);
    let module = match load_compiled_module(path, config.max_import_size) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let name = module_name(path);

    let start = Instant::now();
    let result = if trace {
        let mut interp = Interpreter::new(config, PackageRegistry::new(), StderrTracer::new());
        run(&mut interp, name, module)
    } else {
        let mut interp = Interpreter::new(config, PackageRegistry::new(), NoopTracer);
        run(&mut interp, name, module)
    };
    let elapsed = start.elapsed();

    match result {
        Ok(rendered) => {
            eprintln!("success after: {elapsed:?}\n{rendered}");
            ExitCode::SUCCESS
        }
        Err(report) => {
            eprintln!("error after: {elapsed:?}\n{report}");
            ExitCode::FAILURE
        }
    }
}

fn run<Tr: quillvm::VmTracer>(interp: &mut Interpreter<Tr>, name: &str, module: quillvm::bytecode::module::Module) -> Result<String, String> {
    match interp.run_module(name, module) {
        Ok(id) => Ok(format!("{:?}", interp.get(id))),
        Err(quillvm::RunError::Fatal(report)) => Err(report.to_string()),
    }
}

fn module_name(path: &str) -> &str {
    std::path::Path::new(path).file_stem().and_then(|s| s.to_str()).unwrap_or(path)
}
