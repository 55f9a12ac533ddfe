//! The fetch-dispatch-execute loop.
//!
//! State lives on the instance: a shared `u64` operand stack, a frame
//! stack, and a label stack per frame. Dispatch is a match over the
//! decoded [`Instruction`]; every handler returns `Result<_, Trap>`, and
//! the single conversion point to a public error is
//! [`crate::Instance::call_export`].
//!
//! Branch targets were resolved at load time, so `br` is: unwind the
//! operand stack to the label's height (keeping the label's arity worth
//! of values), truncate the label stack, jump.

use std::rc::Rc;

use crate::error::Trap;
use crate::func::{Function, GuestFunc, HostFunc};
use crate::instance::Instance;
use crate::instruction::Instruction;
use crate::memory::Memory;
use crate::stack::{Stack, MAX_OPERAND_HEIGHT};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelKind {
    Block,
    Loop,
    If,
}

/// A control-flow anchor. `target` is the matching `end` for blocks and
/// ifs, the loop head for loops; `height` is the operand height to unwind
/// to on a branch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Label {
    pub(crate) arity: usize,
    pub(crate) target: usize,
    pub(crate) height: usize,
    pub(crate) kind: LabelKind,
}

/// One call frame: the executing function, its program counter, locals,
/// and label stack. `base` is the operand height at entry (after the
/// arguments moved into locals); results are the top `arity` slots above
/// it when the frame pops.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) func: Rc<GuestFunc>,
    pub(crate) pc: usize,
    pub(crate) locals: Vec<u64>,
    pub(crate) labels: Stack<Label>,
    pub(crate) base: usize,
    pub(crate) arity: usize,
}

/// Transfer arguments from the operand stack into a fresh frame for
/// `func` and make it the active frame.
pub(crate) fn push_guest_frame(ins: &mut Instance, func: Rc<GuestFunc>) -> Result<(), Trap> {
    if let Some(limit) = ins.config.call_depth_limit {
        if ins.frames.height() >= limit {
            return Err(Trap::CallDepthExceeded);
        }
    }

    let param_count = func.ty.params.len();
    let mut locals = vec![0u64; func.locals.len()];
    for slot in locals[..param_count].iter_mut().rev() {
        *slot = ins.operands.pop();
    }

    let base = ins.operands.height();
    let arity = func.ty.results.len();
    let mut labels = Stack::with_capacity(8);
    // The implicit outermost label: `return` and `br` to the function
    // boundary both land one past the closing `end`.
    labels.push(Label {
        arity,
        target: func.body.len().saturating_sub(1),
        height: base,
        kind: LabelKind::Block,
    });

    ins.frames.push(Frame { func, pc: 0, locals, labels, base, arity });
    Ok(())
}

/// Run until the frame stack empties. The caller is responsible for
/// having pushed the entry frame and for popping result slots afterwards.
pub(crate) fn run(ins: &mut Instance) -> Result<(), Trap> {
    while let Some(frame) = ins.frames.peek() {
        let func = Rc::clone(&frame.func);
        let pc = frame.pc;

        if pc >= func.body.len() {
            do_return(ins);
            continue;
        }
        let instr = &func.body[pc];

        if let Some(station) = &ins.config.toll_station {
            if !station.borrow_mut().charge(instr) {
                return Err(Trap::OutOfToll);
            }
        }
        if ins.operands.height() > MAX_OPERAND_HEIGHT {
            return Err(Trap::StackOverflow);
        }
        if ins.config.disable_float_point && instr.is_float() {
            return Err(Trap::FloatDisabled);
        }

        ins.frames.peek_mut().expect("active frame").pc = pc + 1;
        step(ins, instr)?;
    }
    Ok(())
}

fn active(ins: &mut Instance) -> &mut Frame {
    ins.frames.peek_mut().expect("active frame")
}

/// Pop the active frame, discarding everything it left on the operand
/// stack except its result values.
fn do_return(ins: &mut Instance) {
    let frame = ins.frames.pop().expect("active frame");
    ins.operands.unwind(frame.base, frame.arity);
}

/// Branch to the label `depth` levels up the active frame's label stack.
fn branch(ins: &mut Instance, depth: u32) {
    let frame = ins.frames.peek_mut().expect("active frame");
    let idx = frame.labels.height() - 1 - depth as usize;
    let label = *frame.labels.get(idx).expect("branch target label");

    if label.kind == LabelKind::Loop {
        frame.labels.truncate(idx + 1);
    } else {
        frame.labels.truncate(idx);
    }
    frame.pc = label.target + 1;
    ins.operands.unwind(label.height, label.arity);
}

fn call_function(ins: &mut Instance, func_idx: u32) -> Result<(), Trap> {
    let func = ins
        .space
        .funcs
        .get(func_idx as usize)
        .cloned()
        .ok_or(Trap::UndefinedElement)?;
    match func {
        Function::Guest(guest) => push_guest_frame(ins, guest),
        Function::Host(host) => call_host(ins, &host),
    }
}

/// Marshal arguments off the operand stack (last parameter on top),
/// invoke, push the results back in return order.
fn call_host(ins: &mut Instance, host: &Rc<HostFunc>) -> Result<(), Trap> {
    let args = ins.operands.pop_many(host.ty().params.len());
    let results = host.invoke(ins, &args)?;
    for slot in results {
        ins.operands.push(slot);
    }
    Ok(())
}

/// The instance's sole linear memory. A cheap clone: the bytes are
/// behind a shared handle.
fn memory(ins: &Instance) -> Result<Memory, Trap> {
    ins.space
        .memories
        .first()
        .cloned()
        .ok_or(Trap::PointerOutOfBounds)
}

fn table(ins: &Instance, table_idx: u32) -> Result<Table, Trap> {
    ins.space
        .tables
        .get(table_idx as usize)
        .cloned()
        .ok_or(Trap::UndefinedElement)
}

// Table slots travel the operand stack as u64: the function index, or
// MAX for null.
const NULL_REF: u64 = u64::MAX;

fn ref_from_slot(slot: u64) -> Option<u32> {
    if slot == NULL_REF {
        None
    } else {
        Some(slot as u32)
    }
}

// --- operand helpers -------------------------------------------------

#[inline(always)]
fn pop_i32(ins: &mut Instance) -> i32 {
    ins.operands.pop() as i32
}

#[inline(always)]
fn pop_i64(ins: &mut Instance) -> i64 {
    ins.operands.pop() as i64
}

#[inline(always)]
fn pop_f32(ins: &mut Instance) -> f32 {
    f32::from_bits(ins.operands.pop() as u32)
}

#[inline(always)]
fn pop_f64(ins: &mut Instance) -> f64 {
    f64::from_bits(ins.operands.pop())
}

macro_rules! push_i32 {
    ($ins:expr, $v:expr) => {
        $ins.operands.push($v as u32 as u64)
    };
}
macro_rules! push_i64 {
    ($ins:expr, $v:expr) => {
        $ins.operands.push($v as u64)
    };
}
macro_rules! push_f32 {
    ($ins:expr, $v:expr) => {
        $ins.operands.push(($v).to_bits() as u64)
    };
}
macro_rules! push_f64 {
    ($ins:expr, $v:expr) => {
        $ins.operands.push(($v).to_bits())
    };
}

macro_rules! binop_i32 {
    ($ins:expr, $op:expr) => {{
        let b = pop_i32($ins);
        let a = pop_i32($ins);
        let r: i32 = $op(a, b);
        push_i32!($ins, r);
    }};
}
macro_rules! binop_i64 {
    ($ins:expr, $op:expr) => {{
        let b = pop_i64($ins);
        let a = pop_i64($ins);
        let r: i64 = $op(a, b);
        push_i64!($ins, r);
    }};
}
macro_rules! binop_f32 {
    ($ins:expr, $op:expr) => {{
        let b = pop_f32($ins);
        let a = pop_f32($ins);
        let r: f32 = $op(a, b);
        push_f32!($ins, r);
    }};
}
macro_rules! binop_f64 {
    ($ins:expr, $op:expr) => {{
        let b = pop_f64($ins);
        let a = pop_f64($ins);
        let r: f64 = $op(a, b);
        push_f64!($ins, r);
    }};
}

macro_rules! unop_i32 {
    ($ins:expr, $op:expr) => {{
        let a = pop_i32($ins);
        let r: i32 = $op(a);
        push_i32!($ins, r);
    }};
}
macro_rules! unop_i64 {
    ($ins:expr, $op:expr) => {{
        let a = pop_i64($ins);
        let r: i64 = $op(a);
        push_i64!($ins, r);
    }};
}
macro_rules! unop_f32 {
    ($ins:expr, $op:expr) => {{
        let a = pop_f32($ins);
        let r: f32 = $op(a);
        push_f32!($ins, r);
    }};
}
macro_rules! unop_f64 {
    ($ins:expr, $op:expr) => {{
        let a = pop_f64($ins);
        let r: f64 = $op(a);
        push_f64!($ins, r);
    }};
}

macro_rules! cmpop_i32 {
    ($ins:expr, $op:expr) => {{
        let b = pop_i32($ins);
        let a = pop_i32($ins);
        push_i32!($ins, if $op(a, b) { 1i32 } else { 0i32 });
    }};
}
macro_rules! cmpop_i64 {
    ($ins:expr, $op:expr) => {{
        let b = pop_i64($ins);
        let a = pop_i64($ins);
        push_i32!($ins, if $op(a, b) { 1i32 } else { 0i32 });
    }};
}
macro_rules! cmpop_f32 {
    ($ins:expr, $op:expr) => {{
        let b = pop_f32($ins);
        let a = pop_f32($ins);
        push_i32!($ins, if $op(a, b) { 1i32 } else { 0i32 });
    }};
}
macro_rules! cmpop_f64 {
    ($ins:expr, $op:expr) => {{
        let b = pop_f64($ins);
        let a = pop_f64($ins);
        push_i32!($ins, if $op(a, b) { 1i32 } else { 0i32 });
    }};
}

macro_rules! mem_load {
    ($ins:expr, $offset:expr, $n:literal, $conv:expr) => {{
        let addr = $ins.operands.pop() as u32 as u64;
        let mem = memory($ins)?;
        let bytes = mem.load::<$n>($offset + addr)?;
        $ins.operands.push($conv(bytes));
    }};
}

macro_rules! mem_store {
    ($ins:expr, $offset:expr, $conv:expr) => {{
        let val = $ins.operands.pop();
        let addr = $ins.operands.pop() as u32 as u64;
        let mem = memory($ins)?;
        mem.store($offset + addr, &$conv(val))?;
    }};
}

// --- float semantics -------------------------------------------------

// WASM min/max propagate NaN and order -0 below +0; the std float min/max
// do neither.

fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_negative() || b.is_sign_negative() { -0.0 } else { 0.0 }
    } else {
        a.min(b)
    }
}

fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_positive() || b.is_sign_positive() { 0.0 } else { -0.0 }
    } else {
        a.max(b)
    }
}

fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_negative() || b.is_sign_negative() { -0.0 } else { 0.0 }
    } else {
        a.min(b)
    }
}

fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_positive() || b.is_sign_positive() { 0.0 } else { -0.0 }
    } else {
        a.max(b)
    }
}

/// Trapping float→signed-int conversion. The f32 variants funnel through
/// here as well: widening f32 to f64 is exact, so the bounds checks are
/// unchanged.
fn trunc_signed(val: f64, min: f64, max: f64) -> Result<i64, Trap> {
    if val.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = val.trunc();
    if t < min || t >= max {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

/// Trapping float→unsigned-int conversion. `trunc(-0.9)` is `-0.0`,
/// which converts to zero rather than trapping.
fn trunc_unsigned(val: f64, max: f64) -> Result<u64, Trap> {
    if val.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = val.trunc();
    if t < 0.0 || t >= max {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as u64)
}

const I32_MIN_F: f64 = -2147483648.0;
const I32_MAX_F: f64 = 2147483648.0;
const U32_MAX_F: f64 = 4294967296.0;
const I64_MIN_F: f64 = -9223372036854775808.0;
const I64_MAX_F: f64 = 9223372036854775808.0;
const U64_MAX_F: f64 = 18446744073709551616.0;

// --- dispatch --------------------------------------------------------

fn step(ins: &mut Instance, instr: &Instruction) -> Result<(), Trap> {
    match instr {
        // --- control ---
        Instruction::Unreachable => return Err(Trap::Unreachable),
        Instruction::Nop => {}
        Instruction::Block { ty, end_pc } => {
            let height = ins.operands.height();
            active(ins).labels.push(Label {
                arity: ty.arity(),
                target: *end_pc,
                height,
                kind: LabelKind::Block,
            });
        }
        Instruction::Loop { .. } => {
            let height = ins.operands.height();
            let frame = active(ins);
            // pc already advanced; the label targets the loop head so a
            // branch lands on the first body instruction.
            let target = frame.pc - 1;
            frame.labels.push(Label { arity: 0, target, height, kind: LabelKind::Loop });
        }
        Instruction::If { ty, end_pc, else_pc } => {
            let cond = pop_i32(ins);
            let height = ins.operands.height();
            let frame = active(ins);
            frame.labels.push(Label {
                arity: ty.arity(),
                target: *end_pc,
                height,
                kind: LabelKind::If,
            });
            if cond == 0 {
                match else_pc {
                    Some(else_pc) => frame.pc = else_pc + 1,
                    None => {
                        // No false branch at all: skip past the end.
                        frame.pc = end_pc + 1;
                        frame.labels.pop();
                    }
                }
            }
        }
        Instruction::Else => {
            // Reached by falling out of the true branch: jump past the
            // matching end.
            let frame = active(ins);
            let label = frame.labels.pop().expect("if label");
            frame.pc = label.target + 1;
        }
        Instruction::End => {
            let frame = active(ins);
            if frame.labels.height() > 1 {
                frame.labels.pop();
            }
            // The function's own closing end leaves the implicit label;
            // the loop's return check fires when pc runs past the body.
        }
        Instruction::Br(depth) => branch(ins, *depth),
        Instruction::BrIf(depth) => {
            if pop_i32(ins) != 0 {
                branch(ins, *depth);
            }
        }
        Instruction::BrTable { targets, default } => {
            let idx = ins.operands.pop() as u32 as usize;
            let depth = targets.get(idx).copied().unwrap_or(*default);
            branch(ins, depth);
        }
        Instruction::Return => do_return(ins),
        Instruction::Call(func_idx) => call_function(ins, *func_idx)?,
        Instruction::CallIndirect { type_idx, table_idx } => {
            let elem_idx = ins.operands.pop() as u32;
            let table = table(ins, *table_idx)?;
            let func_idx = table
                .get(elem_idx)
                .ok_or(Trap::UndefinedElement)?
                .ok_or(Trap::UndefinedElement)?;
            let func = ins
                .space
                .funcs
                .get(func_idx as usize)
                .cloned()
                .ok_or(Trap::UndefinedElement)?;
            let expected = ins
                .module
                .types
                .get(*type_idx as usize)
                .ok_or(Trap::IndirectCallTypeMismatch)?;
            if func.ty() != expected {
                return Err(Trap::IndirectCallTypeMismatch);
            }
            match func {
                Function::Guest(guest) => push_guest_frame(ins, guest)?,
                Function::Host(host) => call_host(ins, &host)?,
            }
        }

        // --- parametric ---
        Instruction::Drop => ins.operands.drop_top(),
        Instruction::Select => {
            let cond = pop_i32(ins);
            let b = ins.operands.pop();
            let a = ins.operands.pop();
            ins.operands.push(if cond != 0 { a } else { b });
        }

        // --- variable ---
        Instruction::LocalGet(idx) => {
            let v = active(ins).locals[*idx as usize];
            ins.operands.push(v);
        }
        Instruction::LocalSet(idx) => {
            let v = ins.operands.pop();
            active(ins).locals[*idx as usize] = v;
        }
        Instruction::LocalTee(idx) => {
            let v = ins.operands.peek();
            active(ins).locals[*idx as usize] = v;
        }
        Instruction::GlobalGet(idx) => {
            let v = ins.space.globals[*idx as usize].get();
            ins.operands.push(v);
        }
        Instruction::GlobalSet(idx) => {
            let v = ins.operands.pop();
            ins.space.globals[*idx as usize].set(v);
        }

        // --- memory loads ---
        Instruction::I32Load(off) => {
            mem_load!(ins, off, 4, |b: [u8; 4]| u32::from_le_bytes(b) as u64)
        }
        Instruction::I64Load(off) => {
            mem_load!(ins, off, 8, u64::from_le_bytes)
        }
        Instruction::F32Load(off) => {
            mem_load!(ins, off, 4, |b: [u8; 4]| u32::from_le_bytes(b) as u64)
        }
        Instruction::F64Load(off) => {
            mem_load!(ins, off, 8, u64::from_le_bytes)
        }
        Instruction::I32Load8S(off) => {
            mem_load!(ins, off, 1, |b: [u8; 1]| b[0] as i8 as i32 as u32 as u64)
        }
        Instruction::I32Load8U(off) => {
            mem_load!(ins, off, 1, |b: [u8; 1]| b[0] as u64)
        }
        Instruction::I32Load16S(off) => {
            mem_load!(ins, off, 2, |b: [u8; 2]| i16::from_le_bytes(b) as i32 as u32 as u64)
        }
        Instruction::I32Load16U(off) => {
            mem_load!(ins, off, 2, |b: [u8; 2]| u16::from_le_bytes(b) as u64)
        }
        Instruction::I64Load8S(off) => {
            mem_load!(ins, off, 1, |b: [u8; 1]| b[0] as i8 as i64 as u64)
        }
        Instruction::I64Load8U(off) => {
            mem_load!(ins, off, 1, |b: [u8; 1]| b[0] as u64)
        }
        Instruction::I64Load16S(off) => {
            mem_load!(ins, off, 2, |b: [u8; 2]| i16::from_le_bytes(b) as i64 as u64)
        }
        Instruction::I64Load16U(off) => {
            mem_load!(ins, off, 2, |b: [u8; 2]| u16::from_le_bytes(b) as u64)
        }
        Instruction::I64Load32S(off) => {
            mem_load!(ins, off, 4, |b: [u8; 4]| i32::from_le_bytes(b) as i64 as u64)
        }
        Instruction::I64Load32U(off) => {
            mem_load!(ins, off, 4, |b: [u8; 4]| u32::from_le_bytes(b) as u64)
        }

        // --- memory stores ---
        Instruction::I32Store(off) => mem_store!(ins, off, |v: u64| (v as u32).to_le_bytes()),
        Instruction::I64Store(off) => mem_store!(ins, off, |v: u64| v.to_le_bytes()),
        Instruction::F32Store(off) => mem_store!(ins, off, |v: u64| (v as u32).to_le_bytes()),
        Instruction::F64Store(off) => mem_store!(ins, off, |v: u64| v.to_le_bytes()),
        Instruction::I32Store8(off) => mem_store!(ins, off, |v: u64| (v as u8).to_le_bytes()),
        Instruction::I32Store16(off) => mem_store!(ins, off, |v: u64| (v as u16).to_le_bytes()),
        Instruction::I64Store8(off) => mem_store!(ins, off, |v: u64| (v as u8).to_le_bytes()),
        Instruction::I64Store16(off) => mem_store!(ins, off, |v: u64| (v as u16).to_le_bytes()),
        Instruction::I64Store32(off) => mem_store!(ins, off, |v: u64| (v as u32).to_le_bytes()),

        Instruction::MemorySize => {
            let mem = memory(ins)?;
            push_i32!(ins, mem.size_pages() as i32);
        }
        Instruction::MemoryGrow => {
            let delta = ins.operands.pop() as u32;
            let mem = memory(ins)?;
            push_i32!(ins, mem.grow(delta));
        }

        // --- constants ---
        Instruction::I32Const(v) => push_i32!(ins, *v),
        Instruction::I64Const(v) => push_i64!(ins, *v),
        Instruction::F32Const(v) => push_f32!(ins, *v),
        Instruction::F64Const(v) => push_f64!(ins, *v),

        // --- i32 comparison ---
        Instruction::I32Eqz => unop_i32!(ins, |a: i32| (a == 0) as i32),
        Instruction::I32Eq => cmpop_i32!(ins, |a, b| a == b),
        Instruction::I32Ne => cmpop_i32!(ins, |a, b| a != b),
        Instruction::I32LtS => cmpop_i32!(ins, |a, b| a < b),
        Instruction::I32LtU => cmpop_i32!(ins, |a: i32, b: i32| (a as u32) < (b as u32)),
        Instruction::I32GtS => cmpop_i32!(ins, |a, b| a > b),
        Instruction::I32GtU => cmpop_i32!(ins, |a: i32, b: i32| (a as u32) > (b as u32)),
        Instruction::I32LeS => cmpop_i32!(ins, |a, b| a <= b),
        Instruction::I32LeU => cmpop_i32!(ins, |a: i32, b: i32| (a as u32) <= (b as u32)),
        Instruction::I32GeS => cmpop_i32!(ins, |a, b| a >= b),
        Instruction::I32GeU => cmpop_i32!(ins, |a: i32, b: i32| (a as u32) >= (b as u32)),

        // --- i64 comparison ---
        Instruction::I64Eqz => {
            let a = pop_i64(ins);
            push_i32!(ins, (a == 0) as i32);
        }
        Instruction::I64Eq => cmpop_i64!(ins, |a, b| a == b),
        Instruction::I64Ne => cmpop_i64!(ins, |a, b| a != b),
        Instruction::I64LtS => cmpop_i64!(ins, |a, b| a < b),
        Instruction::I64LtU => cmpop_i64!(ins, |a: i64, b: i64| (a as u64) < (b as u64)),
        Instruction::I64GtS => cmpop_i64!(ins, |a, b| a > b),
        Instruction::I64GtU => cmpop_i64!(ins, |a: i64, b: i64| (a as u64) > (b as u64)),
        Instruction::I64LeS => cmpop_i64!(ins, |a, b| a <= b),
        Instruction::I64LeU => cmpop_i64!(ins, |a: i64, b: i64| (a as u64) <= (b as u64)),
        Instruction::I64GeS => cmpop_i64!(ins, |a, b| a >= b),
        Instruction::I64GeU => cmpop_i64!(ins, |a: i64, b: i64| (a as u64) >= (b as u64)),

        // --- f32 comparison ---
        Instruction::F32Eq => cmpop_f32!(ins, |a, b| a == b),
        Instruction::F32Ne => cmpop_f32!(ins, |a, b| a != b),
        Instruction::F32Lt => cmpop_f32!(ins, |a, b| a < b),
        Instruction::F32Gt => cmpop_f32!(ins, |a, b| a > b),
        Instruction::F32Le => cmpop_f32!(ins, |a, b| a <= b),
        Instruction::F32Ge => cmpop_f32!(ins, |a, b| a >= b),

        // --- f64 comparison ---
        Instruction::F64Eq => cmpop_f64!(ins, |a, b| a == b),
        Instruction::F64Ne => cmpop_f64!(ins, |a, b| a != b),
        Instruction::F64Lt => cmpop_f64!(ins, |a, b| a < b),
        Instruction::F64Gt => cmpop_f64!(ins, |a, b| a > b),
        Instruction::F64Le => cmpop_f64!(ins, |a, b| a <= b),
        Instruction::F64Ge => cmpop_f64!(ins, |a, b| a >= b),

        // --- i32 arithmetic ---
        Instruction::I32Clz => unop_i32!(ins, |a: i32| a.leading_zeros() as i32),
        Instruction::I32Ctz => unop_i32!(ins, |a: i32| a.trailing_zeros() as i32),
        Instruction::I32Popcnt => unop_i32!(ins, |a: i32| a.count_ones() as i32),
        Instruction::I32Add => binop_i32!(ins, |a: i32, b: i32| a.wrapping_add(b)),
        Instruction::I32Sub => binop_i32!(ins, |a: i32, b: i32| a.wrapping_sub(b)),
        Instruction::I32Mul => binop_i32!(ins, |a: i32, b: i32| a.wrapping_mul(b)),
        Instruction::I32DivS => {
            let b = pop_i32(ins);
            let a = pop_i32(ins);
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            if a == i32::MIN && b == -1 {
                return Err(Trap::IntegerOverflow);
            }
            push_i32!(ins, a.wrapping_div(b));
        }
        Instruction::I32DivU => {
            let b = pop_i32(ins) as u32;
            let a = pop_i32(ins) as u32;
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            push_i32!(ins, (a / b) as i32);
        }
        Instruction::I32RemS => {
            let b = pop_i32(ins);
            let a = pop_i32(ins);
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            push_i32!(ins, a.wrapping_rem(b));
        }
        Instruction::I32RemU => {
            let b = pop_i32(ins) as u32;
            let a = pop_i32(ins) as u32;
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            push_i32!(ins, (a % b) as i32);
        }
        Instruction::I32And => binop_i32!(ins, |a, b| a & b),
        Instruction::I32Or => binop_i32!(ins, |a, b| a | b),
        Instruction::I32Xor => binop_i32!(ins, |a, b| a ^ b),
        Instruction::I32Shl => binop_i32!(ins, |a: i32, b: i32| a.wrapping_shl(b as u32)),
        Instruction::I32ShrS => binop_i32!(ins, |a: i32, b: i32| a.wrapping_shr(b as u32)),
        Instruction::I32ShrU => {
            binop_i32!(ins, |a: i32, b: i32| (a as u32).wrapping_shr(b as u32) as i32)
        }
        Instruction::I32Rotl => binop_i32!(ins, |a: i32, b: i32| a.rotate_left(b as u32 % 32)),
        Instruction::I32Rotr => binop_i32!(ins, |a: i32, b: i32| a.rotate_right(b as u32 % 32)),

        // --- i64 arithmetic ---
        Instruction::I64Clz => unop_i64!(ins, |a: i64| a.leading_zeros() as i64),
        Instruction::I64Ctz => unop_i64!(ins, |a: i64| a.trailing_zeros() as i64),
        Instruction::I64Popcnt => unop_i64!(ins, |a: i64| a.count_ones() as i64),
        Instruction::I64Add => binop_i64!(ins, |a: i64, b: i64| a.wrapping_add(b)),
        Instruction::I64Sub => binop_i64!(ins, |a: i64, b: i64| a.wrapping_sub(b)),
        Instruction::I64Mul => binop_i64!(ins, |a: i64, b: i64| a.wrapping_mul(b)),
        Instruction::I64DivS => {
            let b = pop_i64(ins);
            let a = pop_i64(ins);
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            if a == i64::MIN && b == -1 {
                return Err(Trap::IntegerOverflow);
            }
            push_i64!(ins, a.wrapping_div(b));
        }
        Instruction::I64DivU => {
            let b = pop_i64(ins) as u64;
            let a = pop_i64(ins) as u64;
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            push_i64!(ins, (a / b) as i64);
        }
        Instruction::I64RemS => {
            let b = pop_i64(ins);
            let a = pop_i64(ins);
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            push_i64!(ins, a.wrapping_rem(b));
        }
        Instruction::I64RemU => {
            let b = pop_i64(ins) as u64;
            let a = pop_i64(ins) as u64;
            if b == 0 {
                return Err(Trap::IntegerDivisionByZero);
            }
            push_i64!(ins, (a % b) as i64);
        }
        Instruction::I64And => binop_i64!(ins, |a, b| a & b),
        Instruction::I64Or => binop_i64!(ins, |a, b| a | b),
        Instruction::I64Xor => binop_i64!(ins, |a, b| a ^ b),
        Instruction::I64Shl => binop_i64!(ins, |a: i64, b: i64| a.wrapping_shl(b as u32)),
        Instruction::I64ShrS => binop_i64!(ins, |a: i64, b: i64| a.wrapping_shr(b as u32)),
        Instruction::I64ShrU => {
            binop_i64!(ins, |a: i64, b: i64| (a as u64).wrapping_shr(b as u32) as i64)
        }
        Instruction::I64Rotl => binop_i64!(ins, |a: i64, b: i64| a.rotate_left(b as u32 % 64)),
        Instruction::I64Rotr => binop_i64!(ins, |a: i64, b: i64| a.rotate_right(b as u32 % 64)),

        // --- f32 arithmetic ---
        Instruction::F32Abs => unop_f32!(ins, |a: f32| a.abs()),
        Instruction::F32Neg => unop_f32!(ins, |a: f32| -a),
        Instruction::F32Ceil => unop_f32!(ins, |a: f32| a.ceil()),
        Instruction::F32Floor => unop_f32!(ins, |a: f32| a.floor()),
        Instruction::F32Trunc => unop_f32!(ins, |a: f32| a.trunc()),
        Instruction::F32Nearest => unop_f32!(ins, |a: f32| a.round_ties_even()),
        Instruction::F32Sqrt => unop_f32!(ins, |a: f32| a.sqrt()),
        Instruction::F32Add => binop_f32!(ins, |a, b| a + b),
        Instruction::F32Sub => binop_f32!(ins, |a, b| a - b),
        Instruction::F32Mul => binop_f32!(ins, |a, b| a * b),
        Instruction::F32Div => binop_f32!(ins, |a, b| a / b),
        Instruction::F32Min => binop_f32!(ins, fmin32),
        Instruction::F32Max => binop_f32!(ins, fmax32),
        Instruction::F32Copysign => binop_f32!(ins, |a: f32, b: f32| a.copysign(b)),

        // --- f64 arithmetic ---
        Instruction::F64Abs => unop_f64!(ins, |a: f64| a.abs()),
        Instruction::F64Neg => unop_f64!(ins, |a: f64| -a),
        Instruction::F64Ceil => unop_f64!(ins, |a: f64| a.ceil()),
        Instruction::F64Floor => unop_f64!(ins, |a: f64| a.floor()),
        Instruction::F64Trunc => unop_f64!(ins, |a: f64| a.trunc()),
        Instruction::F64Nearest => unop_f64!(ins, |a: f64| a.round_ties_even()),
        Instruction::F64Sqrt => unop_f64!(ins, |a: f64| a.sqrt()),
        Instruction::F64Add => binop_f64!(ins, |a, b| a + b),
        Instruction::F64Sub => binop_f64!(ins, |a, b| a - b),
        Instruction::F64Mul => binop_f64!(ins, |a, b| a * b),
        Instruction::F64Div => binop_f64!(ins, |a, b| a / b),
        Instruction::F64Min => binop_f64!(ins, fmin64),
        Instruction::F64Max => binop_f64!(ins, fmax64),
        Instruction::F64Copysign => binop_f64!(ins, |a: f64, b: f64| a.copysign(b)),

        // --- conversions ---
        Instruction::I32WrapI64 => {
            let a = pop_i64(ins);
            push_i32!(ins, a as i32);
        }
        Instruction::I32TruncF32S => {
            let a = pop_f32(ins) as f64;
            push_i32!(ins, trunc_signed(a, I32_MIN_F, I32_MAX_F)? as i32);
        }
        Instruction::I32TruncF32U => {
            let a = pop_f32(ins) as f64;
            push_i32!(ins, trunc_unsigned(a, U32_MAX_F)? as u32 as i32);
        }
        Instruction::I32TruncF64S => {
            let a = pop_f64(ins);
            push_i32!(ins, trunc_signed(a, I32_MIN_F, I32_MAX_F)? as i32);
        }
        Instruction::I32TruncF64U => {
            let a = pop_f64(ins);
            push_i32!(ins, trunc_unsigned(a, U32_MAX_F)? as u32 as i32);
        }
        Instruction::I64ExtendI32S => {
            let a = pop_i32(ins);
            push_i64!(ins, a as i64);
        }
        Instruction::I64ExtendI32U => {
            let a = pop_i32(ins);
            push_i64!(ins, a as u32 as i64);
        }
        Instruction::I64TruncF32S => {
            let a = pop_f32(ins) as f64;
            push_i64!(ins, trunc_signed(a, I64_MIN_F, I64_MAX_F)?);
        }
        Instruction::I64TruncF32U => {
            let a = pop_f32(ins) as f64;
            push_i64!(ins, trunc_unsigned(a, U64_MAX_F)? as i64);
        }
        Instruction::I64TruncF64S => {
            let a = pop_f64(ins);
            push_i64!(ins, trunc_signed(a, I64_MIN_F, I64_MAX_F)?);
        }
        Instruction::I64TruncF64U => {
            let a = pop_f64(ins);
            push_i64!(ins, trunc_unsigned(a, U64_MAX_F)? as i64);
        }
        Instruction::F32ConvertI32S => {
            let a = pop_i32(ins);
            push_f32!(ins, a as f32);
        }
        Instruction::F32ConvertI32U => {
            let a = pop_i32(ins) as u32;
            push_f32!(ins, a as f32);
        }
        Instruction::F32ConvertI64S => {
            let a = pop_i64(ins);
            push_f32!(ins, a as f32);
        }
        Instruction::F32ConvertI64U => {
            let a = pop_i64(ins) as u64;
            push_f32!(ins, a as f32);
        }
        Instruction::F32DemoteF64 => {
            let a = pop_f64(ins);
            push_f32!(ins, a as f32);
        }
        Instruction::F64ConvertI32S => {
            let a = pop_i32(ins);
            push_f64!(ins, a as f64);
        }
        Instruction::F64ConvertI32U => {
            let a = pop_i32(ins) as u32;
            push_f64!(ins, a as f64);
        }
        Instruction::F64ConvertI64S => {
            let a = pop_i64(ins);
            push_f64!(ins, a as f64);
        }
        Instruction::F64ConvertI64U => {
            let a = pop_i64(ins) as u64;
            push_f64!(ins, a as f64);
        }
        Instruction::F64PromoteF32 => {
            let a = pop_f32(ins);
            push_f64!(ins, a as f64);
        }
        // Reinterprets are bit-identity on the slot, modulo the i32/f32
        // slot width.
        Instruction::I32ReinterpretF32 => {
            let a = ins.operands.pop();
            push_i32!(ins, a as u32 as i32);
        }
        Instruction::I64ReinterpretF64 => {}
        Instruction::F32ReinterpretI32 => {
            let a = ins.operands.pop();
            ins.operands.push(a as u32 as u64);
        }
        Instruction::F64ReinterpretI64 => {}

        // --- references ---
        Instruction::RefNull => ins.operands.push(NULL_REF),
        Instruction::RefFunc(func_idx) => ins.operands.push(*func_idx as u64),

        // --- bulk memory ---
        Instruction::MemoryInit(seg_idx) => {
            let count = ins.operands.pop() as u32 as u64;
            let src = ins.operands.pop() as u32 as u64;
            let dest = ins.operands.pop() as u32 as u64;
            let mem = memory(ins)?;
            let seg = ins
                .data_segments
                .get(*seg_idx as usize)
                .ok_or(Trap::PointerOutOfBounds)?;
            match seg {
                None => {
                    // A dropped segment is empty: any non-trivial range
                    // is out of bounds.
                    if count > 0 || src > 0 {
                        return Err(Trap::PointerOutOfBounds);
                    }
                }
                Some(data) => mem.init(dest, src, count, data)?,
            }
        }
        Instruction::DataDrop(seg_idx) => {
            let seg = ins
                .data_segments
                .get_mut(*seg_idx as usize)
                .ok_or(Trap::PointerOutOfBounds)?;
            *seg = None;
        }
        Instruction::MemoryCopy => {
            let count = ins.operands.pop() as u32 as u64;
            let src = ins.operands.pop() as u32 as u64;
            let dest = ins.operands.pop() as u32 as u64;
            memory(ins)?.copy_within(dest, src, count)?;
        }
        Instruction::MemoryFill => {
            let count = ins.operands.pop() as u32 as u64;
            let val = ins.operands.pop() as u8;
            let dest = ins.operands.pop() as u32 as u64;
            memory(ins)?.fill(dest, val, count)?;
        }
        Instruction::TableInit { elem_idx, table_idx } => {
            let count = ins.operands.pop() as u32;
            let src = ins.operands.pop() as u32;
            let dest = ins.operands.pop() as u32;
            let table = table(ins, *table_idx).map_err(|_| Trap::PointerOutOfBounds)?;
            let seg = ins
                .elem_segments
                .get(*elem_idx as usize)
                .ok_or(Trap::PointerOutOfBounds)?;
            match seg {
                None => {
                    if count > 0 || src > 0 {
                        return Err(Trap::PointerOutOfBounds);
                    }
                }
                Some(items) => table.init(dest, src, count, items)?,
            }
        }
        Instruction::ElemDrop(seg_idx) => {
            let seg = ins
                .elem_segments
                .get_mut(*seg_idx as usize)
                .ok_or(Trap::PointerOutOfBounds)?;
            *seg = None;
        }
        Instruction::TableCopy { dst_table, src_table } => {
            let count = ins.operands.pop() as u32;
            let src = ins.operands.pop() as u32;
            let dest = ins.operands.pop() as u32;
            let dst = table(ins, *dst_table).map_err(|_| Trap::PointerOutOfBounds)?;
            let src_t = table(ins, *src_table).map_err(|_| Trap::PointerOutOfBounds)?;
            Table::copy(&dst, &src_t, dest, src, count)?;
        }
        Instruction::TableGrow(table_idx) => {
            let delta = ins.operands.pop() as u32;
            let init = ref_from_slot(ins.operands.pop());
            let table = table(ins, *table_idx).map_err(|_| Trap::PointerOutOfBounds)?;
            push_i32!(ins, table.grow(delta, init));
        }
        Instruction::TableSize(table_idx) => {
            let table = table(ins, *table_idx).map_err(|_| Trap::PointerOutOfBounds)?;
            push_i32!(ins, table.size() as i32);
        }
        Instruction::TableFill(table_idx) => {
            let count = ins.operands.pop() as u32;
            let val = ref_from_slot(ins.operands.pop());
            let dest = ins.operands.pop() as u32;
            let table = table(ins, *table_idx).map_err(|_| Trap::PointerOutOfBounds)?;
            table.fill(dest, val, count)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasm_min_max_handle_nan_and_signed_zero() {
        assert!(fmin32(f32::NAN, 1.0).is_nan());
        assert!(fmax64(1.0, f64::NAN).is_nan());
        assert!(fmin32(0.0, -0.0).is_sign_negative());
        assert!(fmax32(0.0, -0.0).is_sign_positive());
        assert_eq!(fmin64(-3.0, -3.0), -3.0);
        assert!(!fmin64(-3.0, -3.0).is_nan());
        assert_eq!(fmax64(2.0, 5.0), 5.0);
    }

    #[test]
    fn trunc_bounds_follow_the_mvp_rules() {
        assert_eq!(trunc_signed(-1.7, I32_MIN_F, I32_MAX_F).unwrap(), -1);
        assert_eq!(trunc_signed(-2147483648.9, I32_MIN_F, I32_MAX_F).unwrap(), i32::MIN as i64);
        assert_eq!(
            trunc_signed(2147483648.0, I32_MIN_F, I32_MAX_F).unwrap_err(),
            Trap::IntegerOverflow
        );
        assert_eq!(
            trunc_signed(f64::NAN, I32_MIN_F, I32_MAX_F).unwrap_err(),
            Trap::InvalidConversionToInteger
        );
        assert_eq!(trunc_unsigned(-0.9, U32_MAX_F).unwrap(), 0);
        assert_eq!(trunc_unsigned(-1.0, U32_MAX_F).unwrap_err(), Trap::IntegerOverflow);
        assert_eq!(
            trunc_unsigned(f64::INFINITY, U64_MAX_F).unwrap_err(),
            Trap::IntegerOverflow
        );
    }

    #[test]
    fn ref_slots_encode_null_as_all_ones() {
        assert_eq!(ref_from_slot(NULL_REF), None);
        assert_eq!(ref_from_slot(3), Some(3));
    }
}
