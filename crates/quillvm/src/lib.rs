//! Execution core for a small dynamically-typed scripting language: a
//! bytecode interpreter over a managed value heap (§1 Overview).
//!
//! This crate owns the pieces downstream of a compiler: the bytecode format
//! ([`bytecode`]), the value representation and heap ([`value`], [`heap`]),
//! and the dispatch loop that runs a [`bytecode::module::Module`]
//! ([`vm::Interpreter`]). Producing a `Module` from source text is out of
//! scope — `quillvm-cli` assembles one with [`bytecode::builder::ModuleBuilder`]
//! or loads one a compiler already serialized with `postcard`.

pub mod bytecode;
mod config;
mod diagnostics;
mod frame;
mod heap;
mod import_resolver;
mod intern;
mod methods;
mod native;
mod tracer;
mod value;
mod vm;

pub use crate::{
    config::{MAX_CALL_DEPTH, VmConfig},
    diagnostics::{Diagnostic, DiagnosticKind, ErrorReporter},
    heap::{HeapId, HeapStats, OutOfMemory},
    import_resolver::{COMPILED_MODULE_EXTENSION, NativePackage, PackageRegistry, load_compiled_module},
    native::{Context, NativeOutcome},
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::{ModuleId, Value},
    vm::{Interpreter, RunError, RunResult, error},
};
