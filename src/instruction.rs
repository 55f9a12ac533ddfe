//! The decoded instruction set: WASM MVP plus the bulk-memory extension.
//!
//! Function bodies are decoded from `wasmparser` operators into this enum
//! once at module load, so the interpreter dispatches on a tag instead of
//! re-reading immediates. `resolve_block_targets` runs as a pre-scan over
//! each body: it pairs every `block`/`loop`/`if` with its `end`, patching
//! the branch continuation PCs into the instructions themselves.

use wasmparser::Operator;

use crate::error::Error;
use crate::types::ValType;

/// Result shape of a `block`/`loop`/`if`. MVP block types are empty or a
/// single value type.
#[derive(Debug, Clone, Copy)]
pub enum BlockType {
    Empty,
    Val(ValType),
}

impl BlockType {
    /// Number of values the block leaves on the stack.
    pub(crate) fn arity(&self) -> usize {
        match self {
            BlockType::Empty => 0,
            BlockType::Val(_) => 1,
        }
    }
}

/// One decoded instruction. Memory access instructions carry the static
/// offset immediate; the alignment immediate is a hint and is dropped at
/// decode time.
#[derive(Debug, Clone)]
pub enum Instruction {
    // Control
    Unreachable,
    Nop,
    Block { ty: BlockType, end_pc: usize },
    Loop { ty: BlockType },
    If { ty: BlockType, end_pc: usize, else_pc: Option<usize> },
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(u32),
    CallIndirect { type_idx: u32, table_idx: u32 },

    // Parametric
    Drop,
    Select,

    // Variable
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Memory
    I32Load(u64),
    I64Load(u64),
    F32Load(u64),
    F64Load(u64),
    I32Load8S(u64),
    I32Load8U(u64),
    I32Load16S(u64),
    I32Load16U(u64),
    I64Load8S(u64),
    I64Load8U(u64),
    I64Load16S(u64),
    I64Load16U(u64),
    I64Load32S(u64),
    I64Load32U(u64),
    I32Store(u64),
    I64Store(u64),
    F32Store(u64),
    F64Store(u64),
    I32Store8(u64),
    I32Store16(u64),
    I64Store8(u64),
    I64Store16(u64),
    I64Store32(u64),
    MemorySize,
    MemoryGrow,

    // Constants
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),

    // i32 comparison
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 comparison
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // f32 comparison
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    // f64 comparison
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // i32 arithmetic
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64 arithmetic
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // f32 arithmetic
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // f64 arithmetic
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // References (the slice of the reference-types proposal the bulk
    // table instructions depend on)
    RefNull,
    RefFunc(u32),

    // Bulk memory (0xFC subopcodes 0x08..=0x11)
    MemoryInit(u32),
    DataDrop(u32),
    MemoryCopy,
    MemoryFill,
    TableInit { elem_idx: u32, table_idx: u32 },
    ElemDrop(u32),
    TableCopy { dst_table: u32, src_table: u32 },
    TableGrow(u32),
    TableSize(u32),
    TableFill(u32),
}

impl Instruction {
    /// True for every instruction that reads or produces a float, used by
    /// the `disable_float_point` option.
    pub fn is_float(&self) -> bool {
        use Instruction::*;
        matches!(
            self,
            F32Load(_) | F64Load(_) | F32Store(_) | F64Store(_)
                | F32Const(_) | F64Const(_)
                | F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge
                | F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge
                | F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt
                | F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign
                | F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt
                | F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign
                | I32TruncF32S | I32TruncF32U | I32TruncF64S | I32TruncF64U
                | I64TruncF32S | I64TruncF32U | I64TruncF64S | I64TruncF64U
                | F32ConvertI32S | F32ConvertI32U | F32ConvertI64S | F32ConvertI64U
                | F64ConvertI32S | F64ConvertI32U | F64ConvertI64S | F64ConvertI64U
                | F32DemoteF64 | F64PromoteF32
                | I32ReinterpretF32 | I64ReinterpretF64
                | F32ReinterpretI32 | F64ReinterpretI64
        )
    }
}

fn decode_block_type(bt: wasmparser::BlockType) -> Result<BlockType, Error> {
    match bt {
        wasmparser::BlockType::Empty => Ok(BlockType::Empty),
        wasmparser::BlockType::Type(ty) => Ok(BlockType::Val(ValType::from_parser(ty)?)),
        wasmparser::BlockType::FuncType(_) => {
            Err(Error::Malformed("multi-value block types are not supported".into()))
        }
    }
}

/// Decode one operator. Saturating truncations share the `0xFC` prefix
/// with bulk memory but sit outside the supported subopcode range, so
/// they are rejected as invalid subcodes rather than as malformed input.
pub(crate) fn decode_op(op: &Operator) -> Result<Instruction, Error> {
    Ok(match *op {
        Operator::Unreachable => Instruction::Unreachable,
        Operator::Nop => Instruction::Nop,
        Operator::Block { blockty } => Instruction::Block {
            ty: decode_block_type(blockty)?,
            end_pc: 0,
        },
        Operator::Loop { blockty } => Instruction::Loop { ty: decode_block_type(blockty)? },
        Operator::If { blockty } => Instruction::If {
            ty: decode_block_type(blockty)?,
            end_pc: 0,
            else_pc: None,
        },
        Operator::Else => Instruction::Else,
        Operator::End => Instruction::End,
        Operator::Br { relative_depth } => Instruction::Br(relative_depth),
        Operator::BrIf { relative_depth } => Instruction::BrIf(relative_depth),
        Operator::BrTable { ref targets } => Instruction::BrTable {
            targets: targets
                .targets()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Error::Malformed(format!("br_table targets: {e}")))?,
            default: targets.default(),
        },
        Operator::Return => Instruction::Return,
        Operator::Call { function_index } => Instruction::Call(function_index),
        Operator::CallIndirect { type_index, table_index } => Instruction::CallIndirect {
            type_idx: type_index,
            table_idx: table_index,
        },

        Operator::Drop => Instruction::Drop,
        Operator::Select => Instruction::Select,

        Operator::LocalGet { local_index } => Instruction::LocalGet(local_index),
        Operator::LocalSet { local_index } => Instruction::LocalSet(local_index),
        Operator::LocalTee { local_index } => Instruction::LocalTee(local_index),
        Operator::GlobalGet { global_index } => Instruction::GlobalGet(global_index),
        Operator::GlobalSet { global_index } => Instruction::GlobalSet(global_index),

        Operator::I32Load { memarg } => Instruction::I32Load(memarg.offset),
        Operator::I64Load { memarg } => Instruction::I64Load(memarg.offset),
        Operator::F32Load { memarg } => Instruction::F32Load(memarg.offset),
        Operator::F64Load { memarg } => Instruction::F64Load(memarg.offset),
        Operator::I32Load8S { memarg } => Instruction::I32Load8S(memarg.offset),
        Operator::I32Load8U { memarg } => Instruction::I32Load8U(memarg.offset),
        Operator::I32Load16S { memarg } => Instruction::I32Load16S(memarg.offset),
        Operator::I32Load16U { memarg } => Instruction::I32Load16U(memarg.offset),
        Operator::I64Load8S { memarg } => Instruction::I64Load8S(memarg.offset),
        Operator::I64Load8U { memarg } => Instruction::I64Load8U(memarg.offset),
        Operator::I64Load16S { memarg } => Instruction::I64Load16S(memarg.offset),
        Operator::I64Load16U { memarg } => Instruction::I64Load16U(memarg.offset),
        Operator::I64Load32S { memarg } => Instruction::I64Load32S(memarg.offset),
        Operator::I64Load32U { memarg } => Instruction::I64Load32U(memarg.offset),
        Operator::I32Store { memarg } => Instruction::I32Store(memarg.offset),
        Operator::I64Store { memarg } => Instruction::I64Store(memarg.offset),
        Operator::F32Store { memarg } => Instruction::F32Store(memarg.offset),
        Operator::F64Store { memarg } => Instruction::F64Store(memarg.offset),
        Operator::I32Store8 { memarg } => Instruction::I32Store8(memarg.offset),
        Operator::I32Store16 { memarg } => Instruction::I32Store16(memarg.offset),
        Operator::I64Store8 { memarg } => Instruction::I64Store8(memarg.offset),
        Operator::I64Store16 { memarg } => Instruction::I64Store16(memarg.offset),
        Operator::I64Store32 { memarg } => Instruction::I64Store32(memarg.offset),
        Operator::MemorySize { .. } => Instruction::MemorySize,
        Operator::MemoryGrow { .. } => Instruction::MemoryGrow,

        Operator::I32Const { value } => Instruction::I32Const(value),
        Operator::I64Const { value } => Instruction::I64Const(value),
        Operator::F32Const { value } => Instruction::F32Const(f32::from_bits(value.bits())),
        Operator::F64Const { value } => Instruction::F64Const(f64::from_bits(value.bits())),

        Operator::I32Eqz => Instruction::I32Eqz,
        Operator::I32Eq => Instruction::I32Eq,
        Operator::I32Ne => Instruction::I32Ne,
        Operator::I32LtS => Instruction::I32LtS,
        Operator::I32LtU => Instruction::I32LtU,
        Operator::I32GtS => Instruction::I32GtS,
        Operator::I32GtU => Instruction::I32GtU,
        Operator::I32LeS => Instruction::I32LeS,
        Operator::I32LeU => Instruction::I32LeU,
        Operator::I32GeS => Instruction::I32GeS,
        Operator::I32GeU => Instruction::I32GeU,

        Operator::I64Eqz => Instruction::I64Eqz,
        Operator::I64Eq => Instruction::I64Eq,
        Operator::I64Ne => Instruction::I64Ne,
        Operator::I64LtS => Instruction::I64LtS,
        Operator::I64LtU => Instruction::I64LtU,
        Operator::I64GtS => Instruction::I64GtS,
        Operator::I64GtU => Instruction::I64GtU,
        Operator::I64LeS => Instruction::I64LeS,
        Operator::I64LeU => Instruction::I64LeU,
        Operator::I64GeS => Instruction::I64GeS,
        Operator::I64GeU => Instruction::I64GeU,

        Operator::F32Eq => Instruction::F32Eq,
        Operator::F32Ne => Instruction::F32Ne,
        Operator::F32Lt => Instruction::F32Lt,
        Operator::F32Gt => Instruction::F32Gt,
        Operator::F32Le => Instruction::F32Le,
        Operator::F32Ge => Instruction::F32Ge,
        Operator::F64Eq => Instruction::F64Eq,
        Operator::F64Ne => Instruction::F64Ne,
        Operator::F64Lt => Instruction::F64Lt,
        Operator::F64Gt => Instruction::F64Gt,
        Operator::F64Le => Instruction::F64Le,
        Operator::F64Ge => Instruction::F64Ge,

        Operator::I32Clz => Instruction::I32Clz,
        Operator::I32Ctz => Instruction::I32Ctz,
        Operator::I32Popcnt => Instruction::I32Popcnt,
        Operator::I32Add => Instruction::I32Add,
        Operator::I32Sub => Instruction::I32Sub,
        Operator::I32Mul => Instruction::I32Mul,
        Operator::I32DivS => Instruction::I32DivS,
        Operator::I32DivU => Instruction::I32DivU,
        Operator::I32RemS => Instruction::I32RemS,
        Operator::I32RemU => Instruction::I32RemU,
        Operator::I32And => Instruction::I32And,
        Operator::I32Or => Instruction::I32Or,
        Operator::I32Xor => Instruction::I32Xor,
        Operator::I32Shl => Instruction::I32Shl,
        Operator::I32ShrS => Instruction::I32ShrS,
        Operator::I32ShrU => Instruction::I32ShrU,
        Operator::I32Rotl => Instruction::I32Rotl,
        Operator::I32Rotr => Instruction::I32Rotr,

        Operator::I64Clz => Instruction::I64Clz,
        Operator::I64Ctz => Instruction::I64Ctz,
        Operator::I64Popcnt => Instruction::I64Popcnt,
        Operator::I64Add => Instruction::I64Add,
        Operator::I64Sub => Instruction::I64Sub,
        Operator::I64Mul => Instruction::I64Mul,
        Operator::I64DivS => Instruction::I64DivS,
        Operator::I64DivU => Instruction::I64DivU,
        Operator::I64RemS => Instruction::I64RemS,
        Operator::I64RemU => Instruction::I64RemU,
        Operator::I64And => Instruction::I64And,
        Operator::I64Or => Instruction::I64Or,
        Operator::I64Xor => Instruction::I64Xor,
        Operator::I64Shl => Instruction::I64Shl,
        Operator::I64ShrS => Instruction::I64ShrS,
        Operator::I64ShrU => Instruction::I64ShrU,
        Operator::I64Rotl => Instruction::I64Rotl,
        Operator::I64Rotr => Instruction::I64Rotr,

        Operator::F32Abs => Instruction::F32Abs,
        Operator::F32Neg => Instruction::F32Neg,
        Operator::F32Ceil => Instruction::F32Ceil,
        Operator::F32Floor => Instruction::F32Floor,
        Operator::F32Trunc => Instruction::F32Trunc,
        Operator::F32Nearest => Instruction::F32Nearest,
        Operator::F32Sqrt => Instruction::F32Sqrt,
        Operator::F32Add => Instruction::F32Add,
        Operator::F32Sub => Instruction::F32Sub,
        Operator::F32Mul => Instruction::F32Mul,
        Operator::F32Div => Instruction::F32Div,
        Operator::F32Min => Instruction::F32Min,
        Operator::F32Max => Instruction::F32Max,
        Operator::F32Copysign => Instruction::F32Copysign,
        Operator::F64Abs => Instruction::F64Abs,
        Operator::F64Neg => Instruction::F64Neg,
        Operator::F64Ceil => Instruction::F64Ceil,
        Operator::F64Floor => Instruction::F64Floor,
        Operator::F64Trunc => Instruction::F64Trunc,
        Operator::F64Nearest => Instruction::F64Nearest,
        Operator::F64Sqrt => Instruction::F64Sqrt,
        Operator::F64Add => Instruction::F64Add,
        Operator::F64Sub => Instruction::F64Sub,
        Operator::F64Mul => Instruction::F64Mul,
        Operator::F64Div => Instruction::F64Div,
        Operator::F64Min => Instruction::F64Min,
        Operator::F64Max => Instruction::F64Max,
        Operator::F64Copysign => Instruction::F64Copysign,

        Operator::I32WrapI64 => Instruction::I32WrapI64,
        Operator::I32TruncF32S => Instruction::I32TruncF32S,
        Operator::I32TruncF32U => Instruction::I32TruncF32U,
        Operator::I32TruncF64S => Instruction::I32TruncF64S,
        Operator::I32TruncF64U => Instruction::I32TruncF64U,
        Operator::I64ExtendI32S => Instruction::I64ExtendI32S,
        Operator::I64ExtendI32U => Instruction::I64ExtendI32U,
        Operator::I64TruncF32S => Instruction::I64TruncF32S,
        Operator::I64TruncF32U => Instruction::I64TruncF32U,
        Operator::I64TruncF64S => Instruction::I64TruncF64S,
        Operator::I64TruncF64U => Instruction::I64TruncF64U,
        Operator::F32ConvertI32S => Instruction::F32ConvertI32S,
        Operator::F32ConvertI32U => Instruction::F32ConvertI32U,
        Operator::F32ConvertI64S => Instruction::F32ConvertI64S,
        Operator::F32ConvertI64U => Instruction::F32ConvertI64U,
        Operator::F32DemoteF64 => Instruction::F32DemoteF64,
        Operator::F64ConvertI32S => Instruction::F64ConvertI32S,
        Operator::F64ConvertI32U => Instruction::F64ConvertI32U,
        Operator::F64ConvertI64S => Instruction::F64ConvertI64S,
        Operator::F64ConvertI64U => Instruction::F64ConvertI64U,
        Operator::F64PromoteF32 => Instruction::F64PromoteF32,
        Operator::I32ReinterpretF32 => Instruction::I32ReinterpretF32,
        Operator::I64ReinterpretF64 => Instruction::I64ReinterpretF64,
        Operator::F32ReinterpretI32 => Instruction::F32ReinterpretI32,
        Operator::F64ReinterpretI64 => Instruction::F64ReinterpretI64,

        Operator::RefNull { .. } => Instruction::RefNull,
        Operator::RefFunc { function_index } => Instruction::RefFunc(function_index),

        Operator::MemoryInit { data_index, mem: 0 } => Instruction::MemoryInit(data_index),
        Operator::DataDrop { data_index } => Instruction::DataDrop(data_index),
        Operator::MemoryCopy { dst_mem: 0, src_mem: 0 } => Instruction::MemoryCopy,
        Operator::MemoryFill { mem: 0 } => Instruction::MemoryFill,
        Operator::TableInit { elem_index, table } => Instruction::TableInit {
            elem_idx: elem_index,
            table_idx: table,
        },
        Operator::ElemDrop { elem_index } => Instruction::ElemDrop(elem_index),
        Operator::TableCopy { dst_table, src_table } => Instruction::TableCopy { dst_table, src_table },
        Operator::TableGrow { table } => Instruction::TableGrow(table),
        Operator::TableSize { table } => Instruction::TableSize(table),
        Operator::TableFill { table } => Instruction::TableFill(table),

        Operator::I32TruncSatF32S => return Err(Error::InvalidSubcode(0x00)),
        Operator::I32TruncSatF32U => return Err(Error::InvalidSubcode(0x01)),
        Operator::I32TruncSatF64S => return Err(Error::InvalidSubcode(0x02)),
        Operator::I32TruncSatF64U => return Err(Error::InvalidSubcode(0x03)),
        Operator::I64TruncSatF32S => return Err(Error::InvalidSubcode(0x04)),
        Operator::I64TruncSatF32U => return Err(Error::InvalidSubcode(0x05)),
        Operator::I64TruncSatF64S => return Err(Error::InvalidSubcode(0x06)),
        Operator::I64TruncSatF64U => return Err(Error::InvalidSubcode(0x07)),

        ref other => {
            return Err(Error::Malformed(format!("unsupported instruction: {other:?}")))
        }
    })
}

/// Pair every `block`/`loop`/`if` with its `end` (and `if` with its
/// `else`), patching the continuation PCs into the instructions. This is
/// the load-time pre-scan that guarantees balanced control flow before
/// the interpreter ever runs the body.
pub(crate) fn resolve_block_targets(body: &mut [Instruction]) -> Result<(), Error> {
    let mut open: Vec<usize> = Vec::new();

    for pc in 0..body.len() {
        match body[pc] {
            Instruction::Block { .. } | Instruction::Loop { .. } | Instruction::If { .. } => {
                open.push(pc);
            }
            Instruction::Else => match open.last() {
                Some(&start) => {
                    if let Instruction::If { else_pc, .. } = &mut body[start] {
                        *else_pc = Some(pc);
                    } else {
                        return Err(Error::Malformed("else must close an if".into()));
                    }
                }
                None => return Err(Error::Malformed("else must close an if".into())),
            },
            Instruction::End => match open.pop() {
                Some(start) => match &mut body[start] {
                    Instruction::Block { end_pc, .. } => *end_pc = pc,
                    Instruction::If { end_pc, .. } => *end_pc = pc,
                    _ => {} // loops branch to their head, no end needed
                },
                // The closing end of the function body itself.
                None => {}
            },
            _ => {}
        }
    }

    if !open.is_empty() {
        return Err(Error::Malformed("unclosed block".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_patches_block_and_if_targets() {
        let mut body = vec![
            Instruction::Block { ty: BlockType::Empty, end_pc: 0 }, // 0
            Instruction::If { ty: BlockType::Empty, end_pc: 0, else_pc: None }, // 1
            Instruction::Nop,  // 2
            Instruction::Else, // 3
            Instruction::Nop,  // 4
            Instruction::End,  // 5 closes if
            Instruction::End,  // 6 closes block
            Instruction::End,  // 7 closes function
        ];
        resolve_block_targets(&mut body).unwrap();
        match &body[0] {
            Instruction::Block { end_pc, .. } => assert_eq!(*end_pc, 6),
            other => panic!("unexpected: {other:?}"),
        }
        match &body[1] {
            Instruction::If { end_pc, else_pc, .. } => {
                assert_eq!(*end_pc, 5);
                assert_eq!(*else_pc, Some(3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn resolve_rejects_unclosed_block() {
        let mut body = vec![
            Instruction::Block { ty: BlockType::Empty, end_pc: 0 },
            Instruction::End, // closes the block
                              // no function end, block left open by a truncated body
        ];
        assert!(resolve_block_targets(&mut body).is_ok());

        let mut truncated = vec![Instruction::Block { ty: BlockType::Empty, end_pc: 0 }];
        assert!(resolve_block_targets(&mut truncated).is_err());
    }

    #[test]
    fn float_classification_covers_conversions() {
        assert!(Instruction::F32Add.is_float());
        assert!(Instruction::I32TruncF64S.is_float());
        assert!(Instruction::F64ReinterpretI64.is_float());
        assert!(Instruction::F32Const(1.0).is_float());
        assert!(!Instruction::I32Add.is_float());
        assert!(!Instruction::I64Load(0).is_float());
    }
}
