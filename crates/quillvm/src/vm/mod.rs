//! The dispatch loop (§4.4, §4.6) and the VM's top-level entry points.
//!
//! [`Interpreter`] owns everything a running program can touch: the value
//! heap, the call-frame stack, the frame cache, the tracer, and the
//! [`ImportResolver`]. Its fields are private rather than `pub(super)` —
//! Rust's visibility rules already make a private field reachable from every
//! descendant module, so `vm::call`/`vm::exceptions` read `interp.heap` etc.
//! directly without any of this module needing to expose them further.
//!
//! `run_frame` re-fetches `&Module` from `self.resolver` every iteration
//! rather than holding it across the loop: `import` and nested calls can
//! register new modules or advance another frame's globals mid-dispatch, and
//! holding a borrow of `self.resolver` across that would fight the borrow
//! checker for no benefit (the module reference is cheap to re-derive).

mod arithmetic;
mod call;
mod collections;
mod compare;
pub mod error;
mod exceptions;

use crate::bytecode::module::Module;
use crate::bytecode::op::{Opcode, Operand, PrimitiveTag, index_to_ref};
use crate::config::VmConfig;
use crate::frame::{Frame, FrameCache, Ref, WrongTag};
use crate::heap::{Heap, HeapId};
use crate::import_resolver::{ImportResolver, PackageRegistry};
use crate::tracer::VmTracer;
use crate::value::{ModuleId, Thrown, VStr, Value, ValueOpError};

pub use error::{RunError, RunResult};

/// Owns the whole of a running program's state for its lifetime.
pub struct Interpreter<Tr: VmTracer> {
    heap: Heap,
    frames: Vec<Frame>,
    frame_cache: FrameCache,
    tracer: Tr,
    config: VmConfig,
    resolver: ImportResolver,
}

impl<Tr: VmTracer> Interpreter<Tr> {
    #[must_use]
    pub fn new(config: VmConfig, packages: PackageRegistry, tracer: Tr) -> Self {
        Self {
            heap: Heap::new(config.page_limit as usize),
            frames: Vec::new(),
            frame_cache: FrameCache::new(),
            tracer,
            config,
            resolver: ImportResolver::new(packages),
        }
    }

    #[must_use]
    pub fn heap_stats(&self) -> crate::heap::HeapStats {
        self.heap.stats()
    }

    /// Reads a value produced by [`Interpreter::run_module`] — for a host
    /// that wants to print or inspect a program's result without reaching
    /// into the heap itself.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &Value {
        self.heap.get(id)
    }

    /// Registers `module` under `name` and runs its `main` to completion,
    /// publishing the result for later `import`s of the same name (§4.6,
    /// §4.8) the way any other import would. This is the host's one way in:
    /// `quillvm-cli` calls it once for the entry script.
    pub fn run_module(&mut self, name: impl Into<String>, module: Module) -> RunResult<HeapId> {
        let id = self.resolver.register_module(name, module);
        match self.run_module_main(id, None)? {
            call::CallOutcome::Value(id) => Ok(id),
            call::CallOutcome::Redirected => unreachable!("no caller frame to redirect an unhandled err into"),
        }
    }

    /// Pushes a fresh `main` frame for `module_id`, runs it, and publishes
    /// its globals/result (§4.6 `load_global`, §4.8). `caller_frame_idx` is
    /// `Some` when this is running on behalf of an `import` opcode — a fatal
    /// error gets one "called here" trace entry annotated against it, and an
    /// unhandled `err` result is offered to the caller's own handler stack,
    /// exactly like an ordinary call's result would be (§7 tier 1(c)).
    fn run_module_main(&mut self, module_id: ModuleId, caller_frame_idx: Option<usize>) -> RunResult<call::CallOutcome> {
        let main = self.resolver.module(module_id).main;
        let mut frame = Frame::new(module_id, main, 0, vec![], None);
        let depth = u32::try_from(self.frames.len()).unwrap();
        frame.reified = Some(self.heap.alloc_value(Value::Frame(depth))?);
        self.frames.push(frame);
        self.tracer.on_call(self.frames.len());
        let result = self.run_frame();
        let finished = self.frames.pop().expect("frame just pushed above");
        self.tracer.on_return(self.frames.len());
        if let Some(reified) = finished.reified {
            self.heap.release(reified);
        }
        match result {
            Ok(id) => {
                let stack = finished.snapshot_stack();
                self.resolver.publish_result(module_id, stack, id);
                if let Some(frame_idx) = caller_frame_idx
                    && matches!(self.heap.get(id), Value::Err(_))
                    && let Some(handler) = self.frames[frame_idx].handlers.top()
                {
                    self.frames[frame_idx].set_ref(handler.target_ref, id);
                    self.frames[frame_idx].ip = handler.jump_offset;
                    return Ok(call::CallOutcome::Redirected);
                }
                Ok(call::CallOutcome::Value(id))
            }
            Err(RunError::Fatal(mut reporter)) => {
                if let Some(frame_idx) = caller_frame_idx {
                    let caller = &self.frames[frame_idx];
                    let debug = &self.resolver.module(caller.module).debug_info;
                    let offset = debug.byte_offset(caller.relative_ip(caller.ip));
                    reporter.trace("called here", debug.source_path.clone(), offset);
                }
                Err(RunError::Fatal(reporter))
            }
        }
    }

    /// `import "name"` (§4.8): an already-loaded module's cached result, a
    /// `.qlc` file on disk (only when [`VmConfig::import_files`] opts in),
    /// or a registered native package, tried in that order. A module still
    /// executing (a circular import) redirects through the ordinary
    /// handler-stack path rather than recursing into itself.
    ///
    /// A name that explicitly ends in [`crate::import_resolver::COMPILED_MODULE_EXTENSION`]
    /// names a file import, not a package, so a host with `import_files`
    /// disabled gets a specific "importing disabled by host" error instead
    /// of falling through to the package lookup and reporting "not found"
    /// (§8 Boundary behaviors).
    fn do_import(&mut self, frame_idx: usize, name: &str) -> RunResult<call::CallOutcome> {
        if let Some(id) = self.resolver.by_name(name) {
            return match self.resolver.cached_result(id) {
                Some(cached) => Ok(call::CallOutcome::Value(cached)),
                None => call::redirect_or_escalate(self, frame_idx, &format!("circular import of '{name}'")),
            };
        }
        let names_a_file = name.ends_with(crate::import_resolver::COMPILED_MODULE_EXTENSION);
        if names_a_file && !self.config.import_files {
            return call::redirect_or_escalate(self, frame_idx, "importing disabled by host");
        }
        if self.config.import_files {
            let path = if names_a_file { name.to_string() } else { format!("{name}{}", crate::import_resolver::COMPILED_MODULE_EXTENSION) };
            if let Ok(module) = crate::import_resolver::load_compiled_module(&path, self.config.max_import_size) {
                let id = self.resolver.register_module(name, module);
                return self.run_module_main(id, Some(frame_idx));
            }
        }
        if let Some(package) = self.resolver.package(name) {
            let mut ctx = crate::native::Context::new(&mut self.heap, None);
            let outcome = package.load(&mut ctx);
            return match outcome {
                crate::native::NativeOutcome::Value(id) => Ok(call::CallOutcome::Value(id)),
                crate::native::NativeOutcome::Throw(message) => call::redirect_or_escalate(self, frame_idx, &message),
                crate::native::NativeOutcome::Fatal(message) => Err(exceptions::fatal_in_frame(&self.frames[frame_idx], &self.resolver, &message)),
            };
        }
        call::redirect_or_escalate(self, frame_idx, &format!("cannot import '{name}': not found"))
    }

    fn write_val(&mut self, frame_idx: usize, dest: Ref, value: Value) -> RunResult<HeapId> {
        Ok(self.frames[frame_idx].new_val(&mut self.heap, dest, value)?)
    }

    fn redirect_value_error(&mut self, frame_idx: usize, thrown: Thrown) -> RunResult<()> {
        self.tracer.on_throw(&thrown.0, self.frames.len());
        exceptions::throw_in_current_frame(&mut self.heap, &mut self.frames[frame_idx], &self.resolver, &thrown.0)
    }

    fn finish_value_op(&mut self, frame_idx: usize, dest: Ref, result: Result<Value, Thrown>) -> RunResult<()> {
        match result {
            Ok(value) => {
                self.write_val(frame_idx, dest, value)?;
                Ok(())
            }
            Err(t) => self.redirect_value_error(frame_idx, t),
        }
    }

    fn finish_value_op_oom(&mut self, frame_idx: usize, dest: Ref, result: Result<Value, ValueOpError>) -> RunResult<()> {
        match result {
            Ok(value) => {
                self.write_val(frame_idx, dest, value)?;
                Ok(())
            }
            Err(ValueOpError::Thrown(t)) => self.redirect_value_error(frame_idx, t),
            Err(ValueOpError::Fatal(message)) => Err(exceptions::fatal_in_frame(&self.frames[frame_idx], &self.resolver, &message)),
            Err(ValueOpError::OutOfMemory(e)) => Err(e.into()),
        }
    }

    /// For ops that alias or return an already-allocated [`HeapId`] rather
    /// than computing a fresh value — routed through `Frame::set_ref`
    /// directly instead of `Frame::new_val`.
    fn finish_ref_op(&mut self, frame_idx: usize, dest: Ref, result: Result<HeapId, ValueOpError>) -> RunResult<()> {
        match result {
            Ok(id) => {
                self.frames[frame_idx].set_ref(dest, id);
                Ok(())
            }
            Err(ValueOpError::Thrown(t)) => self.redirect_value_error(frame_idx, t),
            Err(ValueOpError::Fatal(message)) => Err(exceptions::fatal_in_frame(&self.frames[frame_idx], &self.resolver, &message)),
            Err(ValueOpError::OutOfMemory(e)) => Err(e.into()),
        }
    }

    fn finish_ref_op_thrown(&mut self, frame_idx: usize, dest: Ref, result: Result<HeapId, Thrown>) -> RunResult<()> {
        match result {
            Ok(id) => {
                self.frames[frame_idx].set_ref(dest, id);
                Ok(())
            }
            Err(t) => self.redirect_value_error(frame_idx, t),
        }
    }

    /// `set`/`append` have no meaningful result of their own; on success
    /// this writes `null` into the instruction's own dest ref as a
    /// placeholder, since every instruction occupies exactly one ref slot
    /// (§4.6, §9 "Ref-indexed stack vs. registers").
    fn apply_unit_or_throw(&mut self, frame_idx: usize, dest: Ref, result: Result<(), Thrown>) -> RunResult<()> {
        match result {
            Ok(()) => {
                self.write_val(frame_idx, dest, Value::Null)?;
                Ok(())
            }
            Err(t) => self.redirect_value_error(frame_idx, t),
        }
    }

    fn run_frame(&mut self) -> RunResult<HeapId> {
        let frame_idx = self.frames.len() - 1;
        loop {
            let frame = &self.frames[frame_idx];
            let ip = frame.ip;
            let instruction_index = frame.relative_ip(ip);
            let module = self.resolver.module(frame.module);
            let opcode = module.code.ops[ip as usize];
            let operand = module.code.data[ip as usize];
            self.tracer.on_instruction(ip, opcode, self.frames.len());
            self.frames[frame_idx].ip = ip + 1;
            let dest = index_to_ref(instruction_index, self.frames[frame_idx].params);

            match opcode {
                Opcode::Nop => {}

                Opcode::Primitive => {
                    let Operand::Primitive(tag) = operand else { unreachable!() };
                    let value = match tag {
                        PrimitiveTag::Null => Value::Null,
                        PrimitiveTag::True => Value::Bool(true),
                        PrimitiveTag::False => Value::Bool(false),
                    };
                    self.write_val(frame_idx, dest, value)?;
                }
                Opcode::Int => {
                    let Operand::Int(index) = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let n = module.ints[index as usize];
                    self.write_val(frame_idx, dest, Value::Int(n))?;
                }
                Opcode::Num => {
                    let Operand::Num(index) = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let n = module.nums[index as usize];
                    self.write_val(frame_idx, dest, Value::Num(n))?;
                }
                Opcode::Str => {
                    let Operand::Str { offset, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let s = module.string_literal(offset, len).to_string();
                    self.write_val(frame_idx, dest, Value::Str(VStr::shared(s)))?;
                }

                Opcode::BuildTuple => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let result = collections::build_tuple(&mut self.heap, &self.frames[frame_idx], module, index, len);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }
                Opcode::BuildList => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let result = collections::build_list(&mut self.heap, &self.frames[frame_idx], module, index, len);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }
                Opcode::BuildMap => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let result = collections::build_map(&mut self.heap, &self.frames[frame_idx], module, index, len);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }
                Opcode::BuildError => {
                    let Operand::Un(value) = operand else { unreachable!() };
                    let v = collections::build_error(&self.frames[frame_idx], value);
                    self.write_val(frame_idx, dest, v)?;
                }
                Opcode::BuildErrorNull => {
                    let result = collections::build_error_null(&mut self.heap);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }
                Opcode::BuildTagged => {
                    let Operand::NameRef { name, value } = operand else { unreachable!() };
                    let v = collections::build_tagged(&self.frames[frame_idx], name, value);
                    self.write_val(frame_idx, dest, v)?;
                }
                Opcode::BuildTaggedNull => {
                    let Operand::Name(name) = operand else { unreachable!() };
                    let result = collections::build_tagged_null(&mut self.heap, name);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }
                Opcode::BuildFunc => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module_id = self.frames[frame_idx].module;
                    let module = self.resolver.module(module_id);
                    let result = collections::build_func(&mut self.heap, &self.frames[frame_idx], module_id, module, index, len);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }
                Opcode::BuildRange => {
                    let Operand::Bin { lhs: start, rhs: end } = operand else { unreachable!() };
                    let result = collections::build_range(&self.heap, &self.frames[frame_idx], start, end);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::BuildRangeStep => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let result = collections::build_range_step(&self.heap, &self.frames[frame_idx], module, index, len);
                    self.finish_value_op(frame_idx, dest, result)?;
                }

                Opcode::Add => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::add(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::Sub => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::sub(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::Mul => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::mul(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::Div => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::div(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::DivFloor => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::div_floor(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::Rem => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::rem(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::Pow => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::pow(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::LShift => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::l_shift(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::RShift => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::r_shift(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::BitAnd => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::bit_and(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::BitOr => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::bit_or(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::BitXor => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = arithmetic::bit_xor(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }

                Opcode::Negate => {
                    let Operand::Un(operand_ref) = operand else { unreachable!() };
                    let result = arithmetic::negate(&self.heap, &self.frames[frame_idx], operand_ref);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::BoolNot => {
                    let Operand::Un(operand_ref) = operand else { unreachable!() };
                    let result = arithmetic::bool_not(&self.heap, &self.frames[frame_idx], operand_ref);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::BitNot => {
                    let Operand::Un(operand_ref) = operand else { unreachable!() };
                    let result = arithmetic::bit_not(&self.heap, &self.frames[frame_idx], operand_ref);
                    self.finish_value_op(frame_idx, dest, result)?;
                }

                Opcode::Equal => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = compare::equal(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::NotEqual => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = compare::not_equal(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::LessThan => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = compare::less_than(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::LessThanEqual => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = compare::less_than_equal(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::GreaterThan => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = compare::greater_than(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::GreaterThanEqual => {
                    let Operand::Bin { lhs, rhs } = operand else { unreachable!() };
                    let result = compare::greater_than_equal(&self.heap, &self.frames[frame_idx], lhs, rhs);
                    self.finish_value_op(frame_idx, dest, result)?;
                }

                Opcode::Get => {
                    let Operand::Bin { lhs: container, rhs: index } = operand else { unreachable!() };
                    let result = collections::get(&mut self.heap, &self.frames[frame_idx], container, index);
                    self.finish_ref_op(frame_idx, dest, result)?;
                }
                Opcode::GetInt => {
                    let Operand::GetInt { container, index } = operand else { unreachable!() };
                    let result = collections::get_int(&mut self.heap, &self.frames[frame_idx], container, index);
                    self.finish_ref_op(frame_idx, dest, result)?;
                }
                Opcode::GetOrNull => {
                    let Operand::Bin { lhs: container, rhs: key } = operand else { unreachable!() };
                    let result = collections::get_or_null(&mut self.heap, &self.frames[frame_idx], container, key);
                    self.finish_ref_op(frame_idx, dest, result)?;
                }
                Opcode::Set => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let raw = module.extra_slice(index, len);
                    let (container, index_ref, value) = (Ref::new(raw[0]), Ref::new(raw[1]), Ref::new(raw[2]));
                    let result = collections::set(&mut self.heap, &self.frames[frame_idx], container, index_ref, value);
                    self.apply_unit_or_throw(frame_idx, dest, result)?;
                }
                Opcode::Append => {
                    let Operand::Bin { lhs: container, rhs: value } = operand else { unreachable!() };
                    let result = collections::append_op(&mut self.heap, &self.frames[frame_idx], container, value);
                    self.apply_unit_or_throw(frame_idx, dest, result)?;
                }
                Opcode::In => {
                    let Operand::Bin { lhs: item, rhs: container } = operand else { unreachable!() };
                    let result = collections::in_op(&self.heap, &self.frames[frame_idx], item, container);
                    self.finish_value_op(frame_idx, dest, result)?;
                }
                Opcode::Spread => {
                    let Operand::Un(operand_ref) = operand else { unreachable!() };
                    let value = collections::spread(&self.frames[frame_idx], operand_ref);
                    self.write_val(frame_idx, dest, value)?;
                }

                Opcode::CheckLen => {
                    let Operand::RefLen { operand: container, len } = operand else { unreachable!() };
                    let value = collections::check_len(&self.heap, &self.frames[frame_idx], container, len);
                    self.write_val(frame_idx, dest, value)?;
                }
                Opcode::AssertLen => {
                    let Operand::RefLen { operand: container, len } = operand else { unreachable!() };
                    let result = collections::assert_len(&self.heap, &self.frames[frame_idx], container, len);
                    self.apply_unit_or_throw(frame_idx, dest, result)?;
                }
                Opcode::SpreadDest => {
                    let Operand::RefLen { operand: container, len: head_len } = operand else { unreachable!() };
                    let result = collections::spread_dest(&mut self.heap, &self.frames[frame_idx], container, head_len);
                    self.finish_value_op_oom(frame_idx, dest, result)?;
                }

                Opcode::UnwrapError => {
                    let Operand::Un(value) = operand else { unreachable!() };
                    let result = collections::unwrap_error(&self.heap, &self.frames[frame_idx], value);
                    self.finish_ref_op_thrown(frame_idx, dest, result)?;
                }
                Opcode::UnwrapTagged => {
                    let Operand::NameRef { name, value } = operand else { unreachable!() };
                    let result = collections::unwrap_tagged(&self.heap, &self.frames[frame_idx], name, value);
                    self.finish_ref_op_thrown(frame_idx, dest, result)?;
                }
                Opcode::UnwrapTaggedOrNull => {
                    let Operand::NameRef { name, value } = operand else { unreachable!() };
                    let result = collections::unwrap_tagged_or_null(&mut self.heap, &self.frames[frame_idx], name, value);
                    self.finish_ref_op(frame_idx, dest, result)?;
                }

                Opcode::CopyUn | Opcode::Move => {
                    let Operand::Un(source) = operand else { unreachable!() };
                    let id = self.frames[frame_idx].val_id(source);
                    self.frames[frame_idx].set_ref(dest, id);
                }
                Opcode::Copy => {
                    let Operand::Un(source) = operand else { unreachable!() };
                    let id = self.frames[frame_idx].val_id(source);
                    let copy = self.heap.dupe(id)?;
                    self.frames[frame_idx].set_ref(dest, copy);
                }
                Opcode::LoadGlobal => {
                    let Operand::Len(slot) = operand else { unreachable!() };
                    let module_id = self.frames[frame_idx].module;
                    match self.resolver.global_slot(module_id, slot) {
                        Some(id) => self.frames[frame_idx].set_ref(dest, id),
                        None => return Err(exceptions::fatal_in_frame(&self.frames[frame_idx], &self.resolver, "use of undefined variable")),
                    }
                }
                Opcode::LoadCapture => {
                    let Operand::Len(slot) = operand else { unreachable!() };
                    let id = self.frames[frame_idx].captures[slot as usize];
                    self.frames[frame_idx].set_ref(dest, id);
                }
                Opcode::LoadThis => {
                    let id = self.frames[frame_idx].this_binding.expect("load_this with no bound this");
                    self.frames[frame_idx].set_ref(dest, id);
                }

                Opcode::Jump => {
                    let Operand::Jump(target) = operand else { unreachable!() };
                    self.frames[frame_idx].ip = target;
                }
                Opcode::JumpIfTrue => {
                    let Operand::JumpCondition { operand: cond, offset } = operand else { unreachable!() };
                    match self.frames[frame_idx].bool(&self.heap, cond) {
                        Ok(true) => self.frames[frame_idx].ip = offset,
                        Ok(false) => {}
                        Err(WrongTag) => self.redirect_value_error(frame_idx, Thrown::new("expected a bool"))?,
                    }
                }
                Opcode::JumpIfFalse => {
                    let Operand::JumpCondition { operand: cond, offset } = operand else { unreachable!() };
                    match self.frames[frame_idx].bool(&self.heap, cond) {
                        Ok(false) => self.frames[frame_idx].ip = offset,
                        Ok(true) => {}
                        Err(WrongTag) => self.redirect_value_error(frame_idx, Thrown::new("expected a bool"))?,
                    }
                }
                Opcode::JumpIfNull => {
                    let Operand::JumpCondition { operand: cond, offset } = operand else { unreachable!() };
                    let id = self.frames[frame_idx].val_id(cond);
                    if matches!(self.heap.get(id), Value::Null) {
                        self.frames[frame_idx].ip = offset;
                    }
                }
                Opcode::PushErrHandler => {
                    let Operand::Handler { target, offset } = operand else { unreachable!() };
                    exceptions::push_err_handler(&mut self.frames[frame_idx], target, offset);
                    self.tracer.on_handler_push(self.frames.len());
                }
                Opcode::PopErrHandler => {
                    let Operand::Jump(target) = operand else { unreachable!() };
                    let completed_without_throw = exceptions::pop_err_handler(&mut self.frames[frame_idx]);
                    self.tracer.on_handler_pop(self.frames.len());
                    if completed_without_throw {
                        self.frames[frame_idx].ip = target;
                    }
                }
                Opcode::UnwrapErrorOrJump => {
                    let Operand::JumpCondition { operand: value, offset } = operand else { unreachable!() };
                    let id = self.frames[frame_idx].val_id(value);
                    match self.heap.get(id) {
                        Value::Err(inner) => {
                            let inner = *inner;
                            self.frames[frame_idx].set_ref(dest, inner);
                        }
                        _ => self.frames[frame_idx].ip = offset,
                    }
                }

                Opcode::IterInit => {
                    let Operand::Un(source) = operand else { unreachable!() };
                    let result = collections::iter_init(&mut self.heap, &self.frames[frame_idx], source);
                    self.finish_ref_op(frame_idx, dest, result)?;
                }
                Opcode::IterNext => {
                    let Operand::JumpCondition { operand: iterator, offset } = operand else { unreachable!() };
                    match collections::iter_next(&mut self.heap, &self.frames[frame_idx], iterator) {
                        Ok(Some(id)) => self.frames[frame_idx].set_ref(dest, id),
                        Ok(None) => self.frames[frame_idx].ip = offset,
                        Err(ValueOpError::Thrown(t)) => self.redirect_value_error(frame_idx, t)?,
                        Err(ValueOpError::Fatal(message)) => return Err(exceptions::fatal_in_frame(&self.frames[frame_idx], &self.resolver, &message)),
                        Err(ValueOpError::OutOfMemory(e)) => return Err(e.into()),
                    }
                }

                Opcode::Call => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let raw = module.extra_slice(index, len);
                    let callee = Ref::new(raw[0]);
                    let args: Vec<Ref> = raw[1..].iter().map(|&i| Ref::new(i)).collect();
                    match call::perform_call(self, frame_idx, callee, None, &args)? {
                        call::CallOutcome::Value(id) => self.frames[frame_idx].set_ref(dest, id),
                        call::CallOutcome::Redirected => {}
                    }
                }
                Opcode::CallOne => {
                    let Operand::Bin { lhs: callee, rhs: arg } = operand else { unreachable!() };
                    match call::perform_call(self, frame_idx, callee, None, &[arg])? {
                        call::CallOutcome::Value(id) => self.frames[frame_idx].set_ref(dest, id),
                        call::CallOutcome::Redirected => {}
                    }
                }
                Opcode::CallZero => {
                    let Operand::Un(callee) = operand else { unreachable!() };
                    match call::perform_call(self, frame_idx, callee, None, &[])? {
                        call::CallOutcome::Value(id) => self.frames[frame_idx].set_ref(dest, id),
                        call::CallOutcome::Redirected => {}
                    }
                }
                Opcode::ThisCall => {
                    let Operand::Extra { index, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let raw = module.extra_slice(index, len);
                    let this = Ref::new(raw[0]);
                    let callee = Ref::new(raw[1]);
                    let args: Vec<Ref> = raw[2..].iter().map(|&i| Ref::new(i)).collect();
                    match call::perform_call(self, frame_idx, callee, Some(this), &args)? {
                        call::CallOutcome::Value(id) => self.frames[frame_idx].set_ref(dest, id),
                        call::CallOutcome::Redirected => {}
                    }
                }
                Opcode::ThisCallZero => {
                    let Operand::Bin { lhs: this, rhs: callee } = operand else { unreachable!() };
                    match call::perform_call(self, frame_idx, callee, Some(this), &[])? {
                        call::CallOutcome::Value(id) => self.frames[frame_idx].set_ref(dest, id),
                        call::CallOutcome::Redirected => {}
                    }
                }
                Opcode::Ret => {
                    let Operand::Un(value) = operand else { unreachable!() };
                    return Ok(self.frames[frame_idx].val_id(value));
                }
                Opcode::RetNull => {
                    return Ok(self.heap.alloc_value(Value::Null)?);
                }
                Opcode::Throw => {
                    let Operand::Un(value) = operand else { unreachable!() };
                    let payload = self.frames[frame_idx].val_id(value);
                    let wrapped = self.heap.alloc_value(Value::Err(payload))?;
                    let message = format!("throw: {}", self.heap.get(payload).type_name());
                    self.tracer.on_throw(&message, self.frames.len());
                    match self.frames[frame_idx].handlers.top() {
                        Some(handler) => {
                            self.frames[frame_idx].set_ref(handler.target_ref, wrapped);
                            self.frames[frame_idx].ip = handler.jump_offset;
                        }
                        None => return Ok(wrapped),
                    }
                }

                Opcode::Import => {
                    let Operand::Str { offset, len } = operand else { unreachable!() };
                    let module = self.resolver.module(self.frames[frame_idx].module);
                    let name = module.string_literal(offset, len).to_string();
                    match self.do_import(frame_idx, &name)? {
                        call::CallOutcome::Value(id) => self.frames[frame_idx].set_ref(dest, id),
                        call::CallOutcome::Redirected => {}
                    }
                }
                Opcode::Discard => {
                    let Operand::Un(value) = operand else { unreachable!() };
                    let id = self.frames[frame_idx].val_id(value);
                    if matches!(self.heap.get(id), Value::Err(_)) {
                        return Err(exceptions::fatal_in_frame(&self.frames[frame_idx], &self.resolver, "discarded an unhandled err value"));
                    }
                }
            }
        }
    }
}
