//! An embeddable WebAssembly MVP interpreter with per-instruction
//! metering.
//!
//! A [`Module`] is loaded from binary bytes (parsing and validation are
//! delegated to `wasmparser`), a [`Linker`] supplies host-defined
//! imports, and [`Linker::instantiate`] composes the two into a runnable
//! [`Instance`]. Execution is metered through a pluggable [`TollStation`]
//! charged once per instruction.
//!
//! ```no_run
//! use tollway::{Linker, LinkerConfig, Module, ModuleConfig};
//!
//! let wasm = wat::parse_str(
//!     r#"(module (func (export "three") (result i32) i32.const 3))"#,
//! )
//! .unwrap();
//! let module = Module::new(ModuleConfig::default(), &wasm).unwrap();
//!
//! let mut linker = Linker::new(LinkerConfig::default());
//! linker
//!     .define_func1("env", "print", |n: i32| println!("{n}"))
//!     .unwrap();
//!
//! let mut instance = linker.instantiate(&module).unwrap();
//! assert_eq!(instance.call_export("three", &[]).unwrap(), vec![3]);
//! ```

mod bridge;
mod config;
mod error;
mod func;
mod instance;
mod instruction;
mod interp;
mod linker;
mod memory;
mod module;
mod stack;
mod table;
mod toll;
mod types;

pub use bridge::WasmPrimitive;
pub use config::{
    LinkerConfig, Logger, ModuleConfig, SharedTollStation, COMPACT_PAGE_SIZE,
    DEFAULT_EXTERNAL_MAX_PAGES, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE,
};
pub use error::{Error, Trap};
pub use func::{Function, GuestFunc, HostFunc, RawHostFunc};
pub use instance::{Global, IndexSpace, Instance};
pub use instruction::{BlockType, Instruction};
pub use linker::{HostModule, Linker};
pub use memory::{Memory, MemoryData};
pub use module::{ExportDesc, Import, Module};
pub use table::{Table, TableElems};
pub use toll::{FlatRateStation, TollStation};
pub use types::{ExternKind, FuncType, GlobalType, MemoryType, TableType, ValType};
