use crate::error::Error;

/// A WASM value type. Runtime values are untyped `u64` slots; the type
/// only matters at the edges (host bridge, globals, signatures).
///
/// Slot encoding: i32 values occupy the low 32 bits zero-extended, i64
/// values the full slot, f64 values their IEEE-754 bit pattern, and f32
/// values their bit pattern in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
}

impl ValType {
    pub(crate) fn from_parser(ty: wasmparser::ValType) -> Result<Self, Error> {
        match ty {
            wasmparser::ValType::I32 => Ok(ValType::I32),
            wasmparser::ValType::I64 => Ok(ValType::I64),
            wasmparser::ValType::F32 => Ok(ValType::F32),
            wasmparser::ValType::F64 => Ok(ValType::F64),
            other => Err(Error::Malformed(format!("unsupported value type: {other:?}"))),
        }
    }
}

/// A function signature: parameter and result type sequences.
///
/// Two signatures are equal iff both sequences are element-wise equal,
/// which is the comparison `call_indirect` performs at run time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

impl FuncType {
    pub fn new(params: Vec<ValType>, results: Vec<ValType>) -> Self {
        FuncType { params, results }
    }

    pub(crate) fn from_parser(ty: &wasmparser::FuncType) -> Result<Self, Error> {
        let params = ty
            .params()
            .iter()
            .map(|&t| ValType::from_parser(t))
            .collect::<Result<_, _>>()?;
        let results = ty
            .results()
            .iter()
            .map(|&t| ValType::from_parser(t))
            .collect::<Result<_, _>>()?;
        Ok(FuncType { params, results })
    }
}

/// The kind of an import/export entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func,
    Table,
    Memory,
    Global,
}

impl std::fmt::Display for ExternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExternKind::Func => "function",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
        };
        f.write_str(s)
    }
}

/// Declared type of a global: value type plus mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub ty: ValType,
    pub mutable: bool,
}

/// Declared limits of a linear memory, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub min: u32,
    pub max: Option<u32>,
}

/// Declared limits of a funcref table, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub min: u32,
    pub max: Option<u32>,
}

/// A single operation of a constant expression (global initialisers and
/// active segment offsets). MVP constant expressions are a single
/// constant or a `global.get` of an imported global.
#[derive(Debug, Clone, Copy)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    GlobalGet(u32),
}
