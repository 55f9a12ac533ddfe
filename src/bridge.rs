//! The typed host-function bridge.
//!
//! Host closures over plain Rust primitives are wrapped into the raw
//! `(&mut Instance, &[u64]) -> Vec<u64>` convention, one thin shim per
//! arity. Parameter and result types are taken from the [`WasmPrimitive`]
//! impls at registration, so an unsupported type fails to compile instead
//! of failing at link time.

use crate::func::RawHostFunc;
use crate::types::{FuncType, ValType};

/// A Rust primitive that maps onto a WASM value type and a raw `u64`
/// operand slot.
///
/// Slot conversion rules: integers travel through the low bits with
/// two's-complement signedness (an i32 occupies the low 32 bits
/// zero-extended); `bool` is an i32 0/1; `f32` occupies its IEEE-754 bit
/// pattern in the low 32 bits; `f64` the full slot.
pub trait WasmPrimitive: Copy + 'static {
    const VAL_TYPE: ValType;

    fn from_slot(slot: u64) -> Self;
    fn into_slot(self) -> u64;
}

macro_rules! int32_primitive {
    ($ty:ty) => {
        impl WasmPrimitive for $ty {
            const VAL_TYPE: ValType = ValType::I32;

            fn from_slot(slot: u64) -> Self {
                slot as $ty
            }

            fn into_slot(self) -> u64 {
                self as i32 as u32 as u64
            }
        }
    };
}

macro_rules! int64_primitive {
    ($ty:ty) => {
        impl WasmPrimitive for $ty {
            const VAL_TYPE: ValType = ValType::I64;

            fn from_slot(slot: u64) -> Self {
                slot as $ty
            }

            fn into_slot(self) -> u64 {
                self as u64
            }
        }
    };
}

int32_primitive!(i8);
int32_primitive!(i16);
int32_primitive!(i32);
int32_primitive!(u8);
int32_primitive!(u16);

impl WasmPrimitive for u32 {
    const VAL_TYPE: ValType = ValType::I32;

    fn from_slot(slot: u64) -> Self {
        slot as u32
    }

    fn into_slot(self) -> u64 {
        self as u64
    }
}

impl WasmPrimitive for bool {
    const VAL_TYPE: ValType = ValType::I32;

    fn from_slot(slot: u64) -> Self {
        slot as u32 != 0
    }

    fn into_slot(self) -> u64 {
        self as u64
    }
}

int64_primitive!(i64);
int64_primitive!(u64);
int64_primitive!(isize);
int64_primitive!(usize);

impl WasmPrimitive for f32 {
    const VAL_TYPE: ValType = ValType::F32;

    fn from_slot(slot: u64) -> Self {
        f32::from_bits(slot as u32)
    }

    fn into_slot(self) -> u64 {
        self.to_bits() as u64
    }
}

impl WasmPrimitive for f64 {
    const VAL_TYPE: ValType = ValType::F64;

    fn from_slot(slot: u64) -> Self {
        f64::from_bits(slot)
    }

    fn into_slot(self) -> u64 {
        self.to_bits()
    }
}

// Arity shims. Each wraps a typed closure into the raw convention and
// derives the signature from the primitive types involved.

pub(crate) fn wrap0(f: impl Fn() + 'static) -> (FuncType, RawHostFunc) {
    let ty = FuncType::new(vec![], vec![]);
    let raw: RawHostFunc = Box::new(move |_ins, _args| {
        f();
        Ok(Vec::new())
    });
    (ty, raw)
}

pub(crate) fn wrap0_1<Z: WasmPrimitive>(f: impl Fn() -> Z + 'static) -> (FuncType, RawHostFunc) {
    let ty = FuncType::new(vec![], vec![Z::VAL_TYPE]);
    let raw: RawHostFunc = Box::new(move |_ins, _args| Ok(vec![f().into_slot()]));
    (ty, raw)
}

pub(crate) fn wrap1<A: WasmPrimitive>(f: impl Fn(A) + 'static) -> (FuncType, RawHostFunc) {
    let ty = FuncType::new(vec![A::VAL_TYPE], vec![]);
    let raw: RawHostFunc = Box::new(move |_ins, args| {
        f(A::from_slot(args[0]));
        Ok(Vec::new())
    });
    (ty, raw)
}

pub(crate) fn wrap1_1<A: WasmPrimitive, Z: WasmPrimitive>(
    f: impl Fn(A) -> Z + 'static,
) -> (FuncType, RawHostFunc) {
    let ty = FuncType::new(vec![A::VAL_TYPE], vec![Z::VAL_TYPE]);
    let raw: RawHostFunc = Box::new(move |_ins, args| Ok(vec![f(A::from_slot(args[0])).into_slot()]));
    (ty, raw)
}

pub(crate) fn wrap2<A: WasmPrimitive, B: WasmPrimitive>(
    f: impl Fn(A, B) + 'static,
) -> (FuncType, RawHostFunc) {
    let ty = FuncType::new(vec![A::VAL_TYPE, B::VAL_TYPE], vec![]);
    let raw: RawHostFunc = Box::new(move |_ins, args| {
        f(A::from_slot(args[0]), B::from_slot(args[1]));
        Ok(Vec::new())
    });
    (ty, raw)
}

pub(crate) fn wrap2_1<A: WasmPrimitive, B: WasmPrimitive, Z: WasmPrimitive>(
    f: impl Fn(A, B) -> Z + 'static,
) -> (FuncType, RawHostFunc) {
    let ty = FuncType::new(vec![A::VAL_TYPE, B::VAL_TYPE], vec![Z::VAL_TYPE]);
    let raw: RawHostFunc = Box::new(move |_ins, args| {
        Ok(vec![f(A::from_slot(args[0]), B::from_slot(args[1])).into_slot()])
    });
    (ty, raw)
}
