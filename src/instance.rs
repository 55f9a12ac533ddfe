//! Instantiation and the external call surface.
//!
//! An [`Instance`] is the runnable unit: the main module's definitions
//! plus resolved imports, composed into one index space, with the operand
//! and frame stacks the interpreter runs on. Instances are not shared
//! between concurrent calls; one invocation is in flight at a time.

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::config::ModuleConfig;
use crate::error::{Error, Trap};
use crate::func::Function;
use crate::interp::{self, Frame};
use crate::linker::HostModule;
use crate::memory::{Memory, MemoryData};
use crate::module::{DataMode, ElemMode, ExportDesc, ImportKind, Module};
use crate::stack::{OperandStack, Stack};
use crate::table::Table;
use crate::types::{ConstOp, ExternKind, GlobalType};

/// A global variable: declared type plus the current slot, shared by
/// reference with whoever supplied or imported it.
#[derive(Debug, Clone)]
pub struct Global {
    ty: GlobalType,
    val: Rc<Cell<u64>>,
}

impl Global {
    pub(crate) fn new(ty: GlobalType, slot: u64) -> Self {
        Global { ty, val: Rc::new(Cell::new(slot)) }
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    /// The current raw slot.
    pub fn get(&self) -> u64 {
        self.val.get()
    }

    pub fn set(&self, slot: u64) {
        self.val.set(slot)
    }
}

/// The flat resolution table bytecode indexes into. Imports occupy the
/// low indices of each sub-sequence, module-own definitions follow in
/// declaration order.
#[derive(Default, Debug)]
pub struct IndexSpace {
    pub(crate) funcs: Vec<Function>,
    pub(crate) globals: Vec<Global>,
    pub(crate) tables: Vec<Table>,
    pub(crate) memories: Vec<Memory>,
}

impl IndexSpace {
    pub fn funcs(&self) -> &[Function] {
        &self.funcs
    }

    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }
}

/// A runnable module instance.
#[derive(Debug)]
pub struct Instance {
    pub(crate) module: Module,
    pub(crate) space: IndexSpace,
    pub(crate) operands: OperandStack,
    pub(crate) frames: Stack<Frame>,
    pub(crate) config: ModuleConfig,
    /// Runtime copies of data segments for `memory.init`; `None` once
    /// dropped. Active segments are dropped right after materialisation.
    pub(crate) data_segments: Vec<Option<Vec<u8>>>,
    /// Runtime copies of element segments for `table.init`.
    pub(crate) elem_segments: Vec<Option<Vec<Option<u32>>>>,
}

impl Instance {
    /// Run the instantiation pipeline: resolve imports, allocate memory
    /// and tables, materialise segments, then invoke the start function.
    /// Fails fast on the first unresolved or out-of-bounds step.
    pub(crate) fn new(
        module: Module,
        host_modules: &HashMap<String, HostModule>,
    ) -> Result<Instance, Error> {
        let config = module.config.clone();
        let mut space = IndexSpace::default();

        resolve_imports(&module, host_modules, &mut space)?;

        // Module-own definitions follow the imports in each sub-space.
        for func in &module.funcs {
            space.funcs.push(Function::Guest(Rc::clone(func)));
        }
        for def in &module.globals {
            let slot = eval_const(&def.init, &space.globals)?;
            space.globals.push(Global::new(def.ty, slot));
        }
        for ty in &module.tables[module.num_table_imports as usize..] {
            space.tables.push(Table::new(*ty));
        }
        let page_size = config.effective_page_size();
        for ty in &module.memories[module.num_memory_imports as usize..] {
            space.memories.push(Memory::new(*ty, page_size));
        }

        let (data_segments, elem_segments) = materialize_segments(&module, &space)?;

        let mut instance = Instance {
            module,
            space,
            operands: OperandStack::new(),
            frames: Stack::new(),
            config,
            data_segments,
            elem_segments,
        };

        if let Some(start) = instance.module.start {
            instance.log("invoking start function");
            instance.invoke_index(start, &[])?;
        }
        instance.log("instantiation complete");
        Ok(instance)
    }

    /// Invoke the exported function `name` with raw argument slots,
    /// returning its raw result slots.
    pub fn call_export(&mut self, name: &str, args: &[u64]) -> Result<Vec<u64>, Error> {
        let desc = *self
            .module
            .export(name)
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))?;
        if desc.kind != ExternKind::Func {
            return Err(Error::ExportKindMismatch(name.to_string()));
        }
        self.invoke_index(desc.index, args)
    }

    /// The export table entry under `name`.
    pub fn get_export(&self, name: &str) -> Option<ExportDesc> {
        self.module.export(name).copied()
    }

    /// The resolved index space: imports first, own definitions after.
    pub fn index_space(&self) -> &IndexSpace {
        &self.space
    }

    /// The instance's linear memory bytes, if it has a memory.
    pub fn get_memory(&self) -> Option<MemoryData> {
        self.space.memories.first().map(|m| m.data())
    }

    /// Read the exported global `name` as a raw slot.
    pub fn get_global(&self, name: &str) -> Result<u64, Error> {
        Ok(self.export_global(name)?.get())
    }

    /// Write the exported global `name`. Imported and host-defined
    /// globals are mutable by contract.
    pub fn set_global(&mut self, name: &str, slot: u64) -> Result<(), Error> {
        self.export_global(name)?.set(slot);
        Ok(())
    }

    /// The exported table `name` (a shared handle).
    pub fn get_table(&self, name: &str) -> Result<Table, Error> {
        let desc = self
            .module
            .export(name)
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))?;
        if desc.kind != ExternKind::Table {
            return Err(Error::ExportKindMismatch(name.to_string()));
        }
        self.space
            .tables
            .get(desc.index as usize)
            .cloned()
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))
    }

    fn export_global(&self, name: &str) -> Result<&Global, Error> {
        let desc = self
            .module
            .export(name)
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))?;
        if desc.kind != ExternKind::Global {
            return Err(Error::ExportKindMismatch(name.to_string()));
        }
        self.space
            .globals
            .get(desc.index as usize)
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))
    }

    /// Drive one function by index space position: the shared path of
    /// `call_export` and the start function.
    fn invoke_index(&mut self, func_idx: u32, args: &[u64]) -> Result<Vec<u64>, Error> {
        let func = self
            .space
            .funcs
            .get(func_idx as usize)
            .cloned()
            .ok_or_else(|| Error::Malformed(format!("function index {func_idx} out of bounds")))?;
        if args.len() != func.ty().params.len() {
            return Err(Error::InvalidFuncInputType);
        }

        let result = if self.config.recover {
            let this = &mut *self;
            match panic::catch_unwind(AssertUnwindSafe(|| this.execute(&func, args))) {
                Ok(result) => result,
                Err(payload) => { eprintln!("DEBUG payload type_id = {:?} str={:?} string={:?}", (*payload).type_id(), std::any::TypeId::of::<&str>(), std::any::TypeId::of::<String>()); let m = panic_message(&payload); eprintln!("DEBUG payload msg = {:?}", m); Err(Trap::HostFault(m)) },
            }
        } else {
            self.execute(&func, args)
        };

        result.map_err(|trap| {
            self.frames.clear();
            self.operands.clear();
            self.log(&format!("trap: {trap}"));
            Error::Trap(trap)
        })
    }

    fn execute(&mut self, func: &Function, args: &[u64]) -> Result<Vec<u64>, Trap> {
        match func {
            Function::Host(host) => host.invoke(self, args),
            Function::Guest(guest) => {
                for &arg in args {
                    self.operands.push(arg);
                }
                interp::push_guest_frame(self, Rc::clone(guest))?;
                interp::run(self)?;
                let results = self.operands.pop_many(guest.ty.results.len());
                debug_assert_eq!(self.operands.height(), 0);
                self.operands.clear();
                Ok(results)
            }
        }
    }

    pub(crate) fn log(&self, text: &str) {
        if let Some(logger) = &self.config.logger {
            logger(text);
        }
    }
}

fn resolve_imports(
    module: &Module,
    host_modules: &HashMap<String, HostModule>,
    space: &mut IndexSpace,
) -> Result<(), Error> {
    for import in &module.imports {
        let host = host_modules
            .get(&import.module)
            .ok_or_else(|| Error::ImportModuleNotFound(import.module.clone()))?;
        let desc = host.exports.get(&import.name).ok_or_else(|| {
            Error::ImportNotFound(import.module.clone(), import.name.clone())
        })?;
        let mismatch =
            || Error::ImportKindMismatch(import.module.clone(), import.name.clone());
        if desc.kind != import.kind.extern_kind() {
            return Err(mismatch());
        }
        let index = desc.index as usize;
        match import.kind {
            ImportKind::Func(_) => {
                let func = host.funcs.get(index).ok_or_else(mismatch)?;
                space.funcs.push(Function::Host(Rc::clone(func)));
            }
            ImportKind::Global(_) => {
                let global = host.globals.get(index).ok_or_else(mismatch)?;
                space.globals.push(global.clone());
            }
            ImportKind::Table(_) => {
                let table = host.tables.get(index).ok_or_else(mismatch)?;
                space.tables.push(table.clone());
            }
            ImportKind::Memory(_) => {
                let memory = host.memories.get(index).ok_or_else(mismatch)?;
                space.memories.push(memory.clone());
            }
        }
    }
    Ok(())
}

type RuntimeSegments = (Vec<Option<Vec<u8>>>, Vec<Option<Vec<Option<u32>>>>);

/// Apply active data and element segments, then build the runtime
/// segment copies `memory.init`/`table.init` read from. Active segments
/// are dropped once applied.
fn materialize_segments(module: &Module, space: &IndexSpace) -> Result<RuntimeSegments, Error> {
    for seg in &module.data_segments {
        if let DataMode::Active { offset } = &seg.mode {
            let offset = eval_const(offset, &space.globals)? as u32 as u64;
            let memory = space
                .memories
                .first()
                .ok_or(Error::Trap(Trap::PointerOutOfBounds))?;
            memory.store(offset, &seg.data)?;
        }
    }
    for seg in &module.elements {
        if let ElemMode::Active { table_idx, offset } = &seg.mode {
            let offset = eval_const(offset, &space.globals)? as u32;
            let table = space
                .tables
                .get(*table_idx as usize)
                .ok_or(Error::Trap(Trap::PointerOutOfBounds))?;
            table.init(offset, 0, seg.items.len() as u32, &seg.items)?;
        }
    }

    let data_segments = module
        .data_segments
        .iter()
        .map(|seg| match seg.mode {
            DataMode::Active { .. } => None,
            DataMode::Passive => Some(seg.data.clone()),
        })
        .collect();
    let elem_segments = module
        .elements
        .iter()
        .map(|seg| match seg.mode {
            ElemMode::Active { .. } | ElemMode::Declared => None,
            ElemMode::Passive => Some(seg.items.clone()),
        })
        .collect();
    Ok((data_segments, elem_segments))
}

/// Evaluate a constant expression to a raw slot.
pub(crate) fn eval_const(ops: &[ConstOp], globals: &[Global]) -> Result<u64, Error> {
    let mut last = None;
    for op in ops {
        let slot = match *op {
            ConstOp::I32Const(v) => v as u32 as u64,
            ConstOp::I64Const(v) => v as u64,
            ConstOp::F32Const(v) => v.to_bits() as u64,
            ConstOp::F64Const(v) => v.to_bits(),
            ConstOp::GlobalGet(idx) => globals
                .get(idx as usize)
                .ok_or_else(|| Error::Malformed(format!("unknown global {idx}")))?
                .get(),
        };
        last = Some(slot);
    }
    last.ok_or_else(|| Error::Malformed("empty constant expression".into()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;

    #[test]
    fn const_exprs_evaluate_to_slots() {
        assert_eq!(eval_const(&[ConstOp::I32Const(-1)], &[]).unwrap(), 0xFFFF_FFFF);
        assert_eq!(eval_const(&[ConstOp::I64Const(7)], &[]).unwrap(), 7);
        assert_eq!(
            eval_const(&[ConstOp::F64Const(1.5)], &[]).unwrap(),
            1.5f64.to_bits()
        );

        let g = Global::new(GlobalType { ty: ValType::I32, mutable: true }, 99);
        assert_eq!(eval_const(&[ConstOp::GlobalGet(0)], &[g]).unwrap(), 99);
        assert!(eval_const(&[ConstOp::GlobalGet(3)], &[]).is_err());
        assert!(eval_const(&[], &[]).is_err());
    }
}
