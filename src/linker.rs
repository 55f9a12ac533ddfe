//! The import registry.
//!
//! A [`Linker`] maps module names to synthetic [`HostModule`]s built out
//! of host-defined functions, globals, tables and memories. Instantiating
//! a main module resolves its import declarations against this registry.

use std::collections::HashMap;
use std::rc::Rc;

use crate::bridge::{self, WasmPrimitive};
use crate::config::{LinkerConfig, DEFAULT_PAGE_SIZE};
use crate::error::Error;
use crate::func::{HostFunc, RawHostFunc};
use crate::instance::{Global, Instance};
use crate::memory::Memory;
use crate::module::{ExportDesc, Module};
use crate::table::Table;
use crate::types::{ExternKind, FuncType, GlobalType};

/// A synthetic module holding host-defined entities. Each definition
/// appends to the matching index space and records an export under the
/// given name.
#[derive(Default)]
pub struct HostModule {
    pub(crate) funcs: Vec<Rc<HostFunc>>,
    pub(crate) globals: Vec<Global>,
    pub(crate) tables: Vec<Table>,
    pub(crate) memories: Vec<Memory>,
    pub(crate) exports: HashMap<String, ExportDesc>,
}

impl HostModule {
    pub fn new() -> Self {
        HostModule::default()
    }

    /// Whether `name` is already exported.
    pub fn contains(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    /// Register a host function under the raw calling convention.
    /// Signatures with more than one result are not expressible in MVP.
    pub fn add_func(&mut self, name: &str, ty: FuncType, raw: RawHostFunc) -> Result<(), Error> {
        if ty.results.len() > 1 {
            return Err(Error::InvalidSignature);
        }
        let index = self.funcs.len() as u32;
        self.funcs.push(Rc::new(HostFunc::new(ty, raw)));
        self.exports
            .insert(name.to_string(), ExportDesc { kind: ExternKind::Func, index });
        Ok(())
    }

    /// Register a global. Host-defined globals are mutable by contract.
    pub fn add_global<T: WasmPrimitive>(&mut self, name: &str, value: T) {
        let index = self.globals.len() as u32;
        self.globals.push(Global::new(
            GlobalType { ty: T::VAL_TYPE, mutable: true },
            value.into_slot(),
        ));
        self.exports
            .insert(name.to_string(), ExportDesc { kind: ExternKind::Global, index });
    }

    /// Register a funcref table with the given entries.
    pub fn add_table(&mut self, name: &str, entries: Vec<Option<u32>>) {
        let index = self.tables.len() as u32;
        self.tables.push(Table::external(entries));
        self.exports
            .insert(name.to_string(), ExportDesc { kind: ExternKind::Table, index });
    }

    /// Register a linear memory backed by `bytes`. The buffer is shared:
    /// the host and every importing instance see each other's writes.
    pub fn add_memory(&mut self, name: &str, bytes: Vec<u8>) {
        let index = self.memories.len() as u32;
        self.memories.push(Memory::external(bytes, DEFAULT_PAGE_SIZE));
        self.exports
            .insert(name.to_string(), ExportDesc { kind: ExternKind::Memory, index });
    }
}

/// A registry of named host modules used to resolve imports at
/// instantiation. The linker retains no reference to the instances it
/// creates.
pub struct Linker {
    config: LinkerConfig,
    modules: HashMap<String, HostModule>,
}

impl Linker {
    pub fn new(config: LinkerConfig) -> Self {
        Linker { config, modules: HashMap::new() }
    }

    /// Register (or replace) a whole module under `mod_name`.
    pub fn define(&mut self, mod_name: &str, module: HostModule) {
        self.modules.insert(mod_name.to_string(), module);
    }

    /// The target module for a definition of `name`, enforcing the
    /// shadowing policy.
    fn target(&mut self, mod_name: &str, name: &str) -> Result<&mut HostModule, Error> {
        if self.config.disable_shadowing {
            if let Some(module) = self.modules.get(mod_name) {
                if module.contains(name) {
                    return Err(Error::ShadowingDisabled);
                }
            }
        }
        Ok(self.modules.entry(mod_name.to_string()).or_default())
    }

    /// Register a host function with an explicit signature and raw body.
    pub fn define_func_raw(
        &mut self,
        mod_name: &str,
        name: &str,
        ty: FuncType,
        raw: RawHostFunc,
    ) -> Result<(), Error> {
        self.target(mod_name, name)?.add_func(name, ty, raw)
    }

    /// Register `fn()`.
    pub fn define_func0(
        &mut self,
        mod_name: &str,
        name: &str,
        f: impl Fn() + 'static,
    ) -> Result<(), Error> {
        let (ty, raw) = bridge::wrap0(f);
        self.define_func_raw(mod_name, name, ty, raw)
    }

    /// Register `fn() -> Z`.
    pub fn define_func0_1<Z: WasmPrimitive>(
        &mut self,
        mod_name: &str,
        name: &str,
        f: impl Fn() -> Z + 'static,
    ) -> Result<(), Error> {
        let (ty, raw) = bridge::wrap0_1(f);
        self.define_func_raw(mod_name, name, ty, raw)
    }

    /// Register `fn(A)`.
    pub fn define_func1<A: WasmPrimitive>(
        &mut self,
        mod_name: &str,
        name: &str,
        f: impl Fn(A) + 'static,
    ) -> Result<(), Error> {
        let (ty, raw) = bridge::wrap1(f);
        self.define_func_raw(mod_name, name, ty, raw)
    }

    /// Register `fn(A) -> Z`.
    pub fn define_func1_1<A: WasmPrimitive, Z: WasmPrimitive>(
        &mut self,
        mod_name: &str,
        name: &str,
        f: impl Fn(A) -> Z + 'static,
    ) -> Result<(), Error> {
        let (ty, raw) = bridge::wrap1_1(f);
        self.define_func_raw(mod_name, name, ty, raw)
    }

    /// Register `fn(A, B)`.
    pub fn define_func2<A: WasmPrimitive, B: WasmPrimitive>(
        &mut self,
        mod_name: &str,
        name: &str,
        f: impl Fn(A, B) + 'static,
    ) -> Result<(), Error> {
        let (ty, raw) = bridge::wrap2(f);
        self.define_func_raw(mod_name, name, ty, raw)
    }

    /// Register `fn(A, B) -> Z`.
    pub fn define_func2_1<A: WasmPrimitive, B: WasmPrimitive, Z: WasmPrimitive>(
        &mut self,
        mod_name: &str,
        name: &str,
        f: impl Fn(A, B) -> Z + 'static,
    ) -> Result<(), Error> {
        let (ty, raw) = bridge::wrap2_1(f);
        self.define_func_raw(mod_name, name, ty, raw)
    }

    /// Register a global whose value type is inferred from `T`.
    pub fn define_global<T: WasmPrimitive>(
        &mut self,
        mod_name: &str,
        name: &str,
        value: T,
    ) -> Result<(), Error> {
        self.target(mod_name, name)?.add_global(name, value);
        Ok(())
    }

    /// Register a funcref table.
    pub fn define_table(
        &mut self,
        mod_name: &str,
        name: &str,
        entries: Vec<Option<u32>>,
    ) -> Result<(), Error> {
        self.target(mod_name, name)?.add_table(name, entries);
        Ok(())
    }

    /// Register an external linear memory.
    pub fn define_memory(
        &mut self,
        mod_name: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), Error> {
        self.target(mod_name, name)?.add_memory(name, bytes);
        Ok(())
    }

    /// Compose `module` with the registered host modules into a runnable
    /// [`Instance`].
    pub fn instantiate(&self, module: &Module) -> Result<Instance, Error> {
        Instance::new(module.clone(), &self.modules)
    }
}
