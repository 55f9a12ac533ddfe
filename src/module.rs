//! Module loading: the immutable program artifact.
//!
//! `wasmparser` owns the binary format (magic, LEB128, section framing)
//! and validates the module before anything is built. Section payloads
//! are then folded into owned representations, and function bodies are
//! decoded into [`Instruction`] sequences with branch targets resolved,
//! so instantiation and execution never touch the raw bytes again.

use std::collections::HashMap;
use std::rc::Rc;

use wasmparser::{Parser, Payload};

use crate::config::ModuleConfig;
use crate::error::Error;
use crate::func::GuestFunc;
use crate::instruction::{decode_op, resolve_block_targets};
use crate::types::{ConstOp, ExternKind, FuncType, GlobalType, MemoryType, TableType, ValType};

/// An import declaration of the main module.
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub(crate) kind: ImportKind,
}

impl Import {
    pub fn kind(&self) -> ExternKind {
        self.kind.extern_kind()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ImportKind {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ImportKind {
    pub(crate) fn extern_kind(&self) -> ExternKind {
        match self {
            ImportKind::Func(_) => ExternKind::Func,
            ImportKind::Table(_) => ExternKind::Table,
            ImportKind::Memory(_) => ExternKind::Memory,
            ImportKind::Global(_) => ExternKind::Global,
        }
    }
}

/// An entry of the export table.
#[derive(Debug, Clone, Copy)]
pub struct ExportDesc {
    pub kind: ExternKind,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalDef {
    pub(crate) ty: GlobalType,
    pub(crate) init: Vec<ConstOp>,
}

#[derive(Debug, Clone)]
pub(crate) enum DataMode {
    Active { offset: Vec<ConstOp> },
    Passive,
}

#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    pub(crate) mode: DataMode,
    pub(crate) data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) enum ElemMode {
    Active { table_idx: u32, offset: Vec<ConstOp> },
    Passive,
    /// Declared segments occupy an index but are dropped at instantiation.
    Declared,
}

#[derive(Debug, Clone)]
pub(crate) struct ElemSegment {
    pub(crate) mode: ElemMode,
    pub(crate) items: Vec<Option<u32>>,
}

/// A loaded, validated, immutable module. Instances are created from it
/// via [`crate::Linker::instantiate`]; the module itself never changes
/// after `new` returns.
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) config: ModuleConfig,
    pub(crate) types: Vec<FuncType>,
    /// Type index per function index, imports first.
    pub(crate) func_types: Vec<u32>,
    /// Module-defined functions; index space position is
    /// `num_func_imports + i`.
    pub(crate) funcs: Vec<Rc<GuestFunc>>,
    pub(crate) imports: Vec<Import>,
    pub(crate) num_func_imports: u32,
    pub(crate) num_table_imports: u32,
    pub(crate) num_memory_imports: u32,
    /// Declared limits, imports first.
    pub(crate) memories: Vec<MemoryType>,
    pub(crate) tables: Vec<TableType>,
    /// Module-defined globals only; imported globals resolve at
    /// instantiation.
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) exports: HashMap<String, ExportDesc>,
    pub(crate) data_segments: Vec<DataSegment>,
    pub(crate) elements: Vec<ElemSegment>,
    pub(crate) start: Option<u32>,
}

impl Module {
    /// Parse and validate a binary module.
    pub fn new(config: ModuleConfig, bytes: &[u8]) -> Result<Module, Error> {
        wasmparser::Validator::new_with_features(wasmparser::WasmFeatures::default())
            .validate_all(bytes)
            .map_err(|e| Error::Malformed(e.to_string()))?;

        let mut builder = ModuleBuilder::new(config);
        for payload in Parser::new(0).parse_all(bytes) {
            let payload = payload.map_err(|e| Error::Malformed(e.to_string()))?;
            builder.section(payload)?;
        }
        builder.finish()
    }

    /// The export table entry under `name`.
    pub fn export(&self, name: &str) -> Option<&ExportDesc> {
        self.exports.get(name)
    }

    /// Names and descriptors of every export.
    pub fn exports(&self) -> impl Iterator<Item = (&str, &ExportDesc)> {
        self.exports.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Import declarations in order.
    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// Signature of the function at `func_idx` in the index space.
    pub(crate) fn func_type(&self, func_idx: u32) -> Option<&FuncType> {
        let type_idx = *self.func_types.get(func_idx as usize)?;
        self.types.get(type_idx as usize)
    }

    /// Module-defined function at `func_idx`; `None` for imports.
    pub(crate) fn get_func(&self, func_idx: u32) -> Option<&Rc<GuestFunc>> {
        if func_idx < self.num_func_imports {
            return None;
        }
        self.funcs.get((func_idx - self.num_func_imports) as usize)
    }
}

/// Accumulates parsed sections while walking the payload stream.
struct ModuleBuilder {
    config: ModuleConfig,
    types: Vec<FuncType>,
    func_types: Vec<u32>,
    funcs: Vec<Rc<GuestFunc>>,
    imports: Vec<Import>,
    num_func_imports: u32,
    num_table_imports: u32,
    num_memory_imports: u32,
    memories: Vec<MemoryType>,
    tables: Vec<TableType>,
    globals: Vec<GlobalDef>,
    exports: HashMap<String, ExportDesc>,
    data_segments: Vec<DataSegment>,
    elements: Vec<ElemSegment>,
    start: Option<u32>,
    code_idx: u32,
}

impl ModuleBuilder {
    fn new(config: ModuleConfig) -> Self {
        ModuleBuilder {
            config,
            types: Vec::new(),
            func_types: Vec::new(),
            funcs: Vec::new(),
            imports: Vec::new(),
            num_func_imports: 0,
            num_table_imports: 0,
            num_memory_imports: 0,
            memories: Vec::new(),
            tables: Vec::new(),
            globals: Vec::new(),
            exports: HashMap::new(),
            data_segments: Vec::new(),
            elements: Vec::new(),
            start: None,
            code_idx: 0,
        }
    }

    fn section(&mut self, payload: Payload<'_>) -> Result<(), Error> {
        match payload {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    let ty = ty.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.types.push(FuncType::from_parser(&ty)?);
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.import(import)?;
                }
            }
            Payload::FunctionSection(reader) => {
                for type_idx in reader {
                    let type_idx = type_idx.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.func_types.push(type_idx);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table.map_err(|e| Error::Malformed(e.to_string()))?;
                    if !matches!(table.init, wasmparser::TableInit::RefNull) {
                        return Err(Error::Malformed(
                            "table init expressions are not supported".into(),
                        ));
                    }
                    self.tables.push(convert_table_type(&table.ty));
                }
            }
            Payload::MemorySection(reader) => {
                for mem in reader {
                    let mem = mem.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.memories.push(convert_memory_type(&mem));
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.globals.push(GlobalDef {
                        ty: GlobalType {
                            ty: ValType::from_parser(global.ty.content_type)?,
                            mutable: global.ty.mutable,
                        },
                        init: decode_const_expr(&global.init_expr)?,
                    });
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(|e| Error::Malformed(e.to_string()))?;
                    let kind = match export.kind {
                        wasmparser::ExternalKind::Func => ExternKind::Func,
                        wasmparser::ExternalKind::Table => ExternKind::Table,
                        wasmparser::ExternalKind::Memory => ExternKind::Memory,
                        wasmparser::ExternalKind::Global => ExternKind::Global,
                        _ => continue,
                    };
                    self.exports
                        .insert(export.name.to_string(), ExportDesc { kind, index: export.index });
                }
            }
            Payload::StartSection { func, .. } => {
                self.start = Some(func);
            }
            Payload::ElementSection(reader) => {
                for elem in reader {
                    let elem = elem.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.element(elem)?;
                }
            }
            Payload::CodeSectionEntry(body) => {
                self.code(body)?;
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data.map_err(|e| Error::Malformed(e.to_string()))?;
                    self.data(data)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn import(&mut self, import: wasmparser::Import<'_>) -> Result<(), Error> {
        let kind = match import.ty {
            wasmparser::TypeRef::Func(type_idx) => {
                self.func_types.push(type_idx);
                self.num_func_imports += 1;
                ImportKind::Func(type_idx)
            }
            wasmparser::TypeRef::Table(ty) => {
                let ty = convert_table_type(&ty);
                self.tables.push(ty);
                self.num_table_imports += 1;
                ImportKind::Table(ty)
            }
            wasmparser::TypeRef::Memory(ty) => {
                let ty = convert_memory_type(&ty);
                self.memories.push(ty);
                self.num_memory_imports += 1;
                ImportKind::Memory(ty)
            }
            wasmparser::TypeRef::Global(ty) => ImportKind::Global(GlobalType {
                ty: ValType::from_parser(ty.content_type)?,
                mutable: ty.mutable,
            }),
            other => {
                return Err(Error::Malformed(format!("unsupported import kind: {other:?}")))
            }
        };
        self.imports.push(Import {
            module: import.module.to_string(),
            name: import.name.to_string(),
            kind,
        });
        Ok(())
    }

    fn element(&mut self, elem: wasmparser::Element<'_>) -> Result<(), Error> {
        let items = parse_elem_items(&elem.items)?;
        let mode = match elem.kind {
            wasmparser::ElementKind::Active { table_index, offset_expr } => ElemMode::Active {
                table_idx: table_index.unwrap_or(0),
                offset: decode_const_expr(&offset_expr)?,
            },
            wasmparser::ElementKind::Passive => ElemMode::Passive,
            wasmparser::ElementKind::Declared => ElemMode::Declared,
        };
        self.elements.push(ElemSegment { mode, items });
        Ok(())
    }

    fn data(&mut self, data: wasmparser::Data<'_>) -> Result<(), Error> {
        let mode = match data.kind {
            wasmparser::DataKind::Active { memory_index: 0, offset_expr } => DataMode::Active {
                offset: decode_const_expr(&offset_expr)?,
            },
            wasmparser::DataKind::Active { .. } => {
                return Err(Error::Malformed("data segment targets a non-zero memory".into()))
            }
            wasmparser::DataKind::Passive => DataMode::Passive,
        };
        self.data_segments.push(DataSegment { mode, data: data.data.to_vec() });
        Ok(())
    }

    /// Decode one code entry: flatten locals (params first), decode the
    /// body, and resolve branch targets.
    fn code(&mut self, body: wasmparser::FunctionBody<'_>) -> Result<(), Error> {
        let func_idx = self.num_func_imports + self.code_idx;
        let type_idx = *self
            .func_types
            .get(func_idx as usize)
            .ok_or_else(|| Error::Malformed("function and code section lengths differ".into()))?;
        let ty = self
            .types
            .get(type_idx as usize)
            .ok_or_else(|| Error::Malformed(format!("unknown type index {type_idx}")))?
            .clone();

        let mut locals: Vec<ValType> = ty.params.clone();
        let locals_reader = body
            .get_locals_reader()
            .map_err(|e| Error::Malformed(e.to_string()))?;
        for local in locals_reader {
            let (count, lty) = local.map_err(|e| Error::Malformed(e.to_string()))?;
            let lty = ValType::from_parser(lty)?;
            locals.extend(std::iter::repeat(lty).take(count as usize));
        }

        let ops_reader = body
            .get_operators_reader()
            .map_err(|e| Error::Malformed(e.to_string()))?;
        let mut instructions = Vec::new();
        for op in ops_reader {
            let op = op.map_err(|e| Error::Malformed(e.to_string()))?;
            instructions.push(decode_op(&op)?);
        }
        resolve_block_targets(&mut instructions)?;

        self.funcs.push(Rc::new(GuestFunc { ty, locals, body: instructions }));
        self.code_idx += 1;
        Ok(())
    }

    fn finish(self) -> Result<Module, Error> {
        if self.funcs.len() + self.num_func_imports as usize != self.func_types.len() {
            return Err(Error::Malformed("function and code section lengths differ".into()));
        }
        Ok(Module {
            config: self.config,
            types: self.types,
            func_types: self.func_types,
            funcs: self.funcs,
            imports: self.imports,
            num_func_imports: self.num_func_imports,
            num_table_imports: self.num_table_imports,
            num_memory_imports: self.num_memory_imports,
            memories: self.memories,
            tables: self.tables,
            globals: self.globals,
            exports: self.exports,
            data_segments: self.data_segments,
            elements: self.elements,
            start: self.start,
        })
    }
}

fn convert_memory_type(ty: &wasmparser::MemoryType) -> MemoryType {
    MemoryType {
        min: ty.initial as u32,
        max: ty.maximum.map(|m| m as u32),
    }
}

fn convert_table_type(ty: &wasmparser::TableType) -> TableType {
    TableType {
        min: ty.initial as u32,
        max: ty.maximum.map(|m| m as u32),
    }
}

/// Decode a constant expression into [`ConstOp`]s, dropping the trailing
/// `end`.
fn decode_const_expr(expr: &wasmparser::ConstExpr<'_>) -> Result<Vec<ConstOp>, Error> {
    let mut reader = expr.get_operators_reader();
    let mut ops = Vec::new();
    loop {
        let op = reader.read().map_err(|e| Error::Malformed(e.to_string()))?;
        match op {
            wasmparser::Operator::End => break,
            wasmparser::Operator::I32Const { value } => ops.push(ConstOp::I32Const(value)),
            wasmparser::Operator::I64Const { value } => ops.push(ConstOp::I64Const(value)),
            wasmparser::Operator::F32Const { value } => {
                ops.push(ConstOp::F32Const(f32::from_bits(value.bits())))
            }
            wasmparser::Operator::F64Const { value } => {
                ops.push(ConstOp::F64Const(f64::from_bits(value.bits())))
            }
            wasmparser::Operator::GlobalGet { global_index } => {
                ops.push(ConstOp::GlobalGet(global_index))
            }
            other => {
                return Err(Error::Malformed(format!("unsupported constant op: {other:?}")))
            }
        }
    }
    Ok(ops)
}

/// Element items are direct function indices in the MVP encoding, or
/// `ref.func`/`ref.null` expressions in the extended one.
fn parse_elem_items(items: &wasmparser::ElementItems<'_>) -> Result<Vec<Option<u32>>, Error> {
    let mut out = Vec::new();
    match items {
        wasmparser::ElementItems::Functions(reader) => {
            for idx in reader.clone() {
                let idx = idx.map_err(|e| Error::Malformed(e.to_string()))?;
                out.push(Some(idx));
            }
        }
        wasmparser::ElementItems::Expressions(_, reader) => {
            for expr in reader.clone() {
                let expr = expr.map_err(|e| Error::Malformed(e.to_string()))?;
                let mut reader = expr.get_operators_reader();
                let mut item = None;
                loop {
                    let op = reader.read().map_err(|e| Error::Malformed(e.to_string()))?;
                    match op {
                        wasmparser::Operator::End => break,
                        wasmparser::Operator::RefFunc { function_index } => {
                            item = Some(function_index)
                        }
                        wasmparser::Operator::RefNull { .. } => item = None,
                        other => {
                            return Err(Error::Malformed(format!(
                                "unsupported element expression: {other:?}"
                            )))
                        }
                    }
                }
                out.push(item);
            }
        }
    }
    Ok(out)
}
