//! The bytecode format a compiled [`module::Module`] is made of (§4.1, §4.6):
//! [`op::Opcode`]/[`op::Operand`] are the instruction shape the dispatch loop
//! reads, [`builder::ModuleBuilder`] is how a host assembles one by hand
//! (used by this crate's own tests and `quillvm-cli`'s demo programs).

pub mod builder;
pub mod module;
pub mod op;
