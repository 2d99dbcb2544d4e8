//! Module loading and the native-package registry (§4.8).
//!
//! Three sources resolve a name, tried in order: an already-loaded module
//! (by name), a `.qlc` (already-compiled) file on disk when the host has
//! opted in via [`crate::config::VmConfig::import_files`], or a registered
//! [`NativePackage`]. Compiling source text is explicitly out of scope (§1
//! Non-goals name the compiler as an external collaborator), so a file
//! import here loads a module the same [`crate::bytecode::module::Module`]
//! shape `quillvm-cli` would have serialized with `postcard`, rather than
//! reading a `.ql` source file directly.

use ahash::AHashMap;

use crate::bytecode::module::Module;
use crate::heap::HeapId;
use crate::native::{Context, NativeOutcome};
use crate::value::ModuleId;

/// The file extension a precompiled module is loaded from (§4.8 step 2).
pub const COMPILED_MODULE_EXTENSION: &str = ".qlc";

/// A host-provided package resolved by name instead of by file path (§4.8
/// step 3) — the native equivalent of an imported module, for standard
/// library surfaces the core itself doesn't implement.
pub trait NativePackage: std::fmt::Debug {
    /// Produces the value `import "name"` evaluates to. Most packages return
    /// a `map` of bound natives; nothing about the calling convention
    /// requires that shape.
    fn load(&self, ctx: &mut Context<'_>) -> NativeOutcome;
}

/// Named [`NativePackage`]s a host registers before running any code.
#[derive(Debug, Default)]
pub struct PackageRegistry {
    packages: AHashMap<String, Box<dyn NativePackage>>,
}

impl PackageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, package: Box<dyn NativePackage>) {
        self.packages.insert(name.into(), package);
    }

    pub fn get(&self, name: &str) -> Option<&dyn NativePackage> {
        self.packages.get(name).map(std::convert::AsRef::as_ref)
    }
}

/// Owns every loaded [`Module`] for the lifetime of the VM, plus the
/// per-module globals table `load_global` reads from (§4.6) and the
/// [`PackageRegistry`] consulted by `import` (§4.8).
#[derive(Debug, Default)]
pub struct ImportResolver {
    modules: Vec<Module>,
    by_name: AHashMap<String, ModuleId>,
    /// `main`'s finished stack, snapshotted once a module has run to
    /// completion — `None` for a module still executing (a circular import)
    /// or not yet loaded.
    globals: Vec<Option<Vec<Option<HeapId>>>>,
    /// The module's own evaluated result, cached so importing it a second
    /// time doesn't re-run `main`.
    results: Vec<Option<HeapId>>,
    packages: PackageRegistry,
}

impl ImportResolver {
    #[must_use]
    pub fn new(packages: PackageRegistry) -> Self {
        Self { packages, ..Self::default() }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn cached_result(&self, id: ModuleId) -> Option<HeapId> {
        self.results[id.index()]
    }

    pub fn register_module(&mut self, name: impl Into<String>, module: Module) -> ModuleId {
        let id = ModuleId::new(u32::try_from(self.modules.len()).unwrap());
        self.modules.push(module);
        self.globals.push(None);
        self.results.push(None);
        self.by_name.insert(name.into(), id);
        id
    }

    /// `load_global`'s read (§4.6): out-of-range or a module whose `main`
    /// hasn't finished yet both read as "no such global", left to the
    /// dispatch loop to turn into a fatal `use of undefined variable`.
    pub fn global_slot(&self, module: ModuleId, slot: u32) -> Option<HeapId> {
        self.globals[module.index()].as_ref()?.get(slot as usize).copied().flatten()
    }

    pub fn publish_result(&mut self, module: ModuleId, stack: Vec<Option<HeapId>>, result: HeapId) {
        self.globals[module.index()] = Some(stack);
        self.results[module.index()] = Some(result);
    }

    pub fn package(&self, name: &str) -> Option<&dyn NativePackage> {
        self.packages.get(name)
    }
}

/// Loads a precompiled module from disk, enforcing `max_size` before reading
/// the full contents (§5 "imported file size is bounded").
pub fn load_compiled_module(path: &str, max_size: u32) -> Result<Module, String> {
    let metadata = std::fs::metadata(path).map_err(|e| format!("cannot import '{path}': {e}"))?;
    if metadata.len() > u64::from(max_size) {
        return Err(format!("cannot import '{path}': exceeds the maximum import size of {max_size} bytes"));
    }
    let bytes = std::fs::read(path).map_err(|e| format!("cannot import '{path}': {e}"))?;
    let mut module: Module = postcard::from_bytes(&bytes).map_err(|e| format!("cannot import '{path}': malformed module ({e})"))?;
    module.names.rebuild_lookup();
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::module::Module;

    #[test]
    fn global_slot_is_none_before_the_module_has_run() {
        let mut resolver = ImportResolver::default();
        let id = resolver.register_module("m", Module::default());
        assert_eq!(resolver.global_slot(id, 0), None);
    }
}
