//! Function representations: guest bytecode and host closures.

use std::rc::Rc;

use crate::error::Trap;
use crate::instance::Instance;
use crate::instruction::Instruction;
use crate::types::{FuncType, ValType};

/// A module-defined function: signature, flattened local types (params
/// first), and the decoded body with branch targets resolved.
#[derive(Debug)]
pub struct GuestFunc {
    pub(crate) ty: FuncType,
    pub(crate) locals: Vec<ValType>,
    pub(crate) body: Vec<Instruction>,
}

/// The raw host calling convention: argument slots in declaration order,
/// result slots in return order. The instance is passed at call time, so
/// a host function can read and mutate linear memory, globals and tables
/// of whichever instance invoked it.
pub type RawHostFunc = Box<dyn Fn(&mut Instance, &[u64]) -> Result<Vec<u64>, Trap>>;

/// A host-defined function bound into an index space.
pub struct HostFunc {
    ty: FuncType,
    raw: RawHostFunc,
}

impl HostFunc {
    pub fn new(ty: FuncType, raw: RawHostFunc) -> Self {
        HostFunc { ty, raw }
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    /// Invoke with marshalled argument slots. The result count must match
    /// the signature; anything else is a bridge conversion failure.
    pub(crate) fn invoke(&self, ins: &mut Instance, args: &[u64]) -> Result<Vec<u64>, Trap> {
        let results = (self.raw)(ins, args)?;
        if results.len() != self.ty.results.len() {
            return Err(Trap::InvalidFuncReturnType);
        }
        Ok(results)
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish()
    }
}

/// An entry in the function index space.
#[derive(Debug, Clone)]
pub enum Function {
    Guest(Rc<GuestFunc>),
    Host(Rc<HostFunc>),
}

impl Function {
    pub fn ty(&self) -> &FuncType {
        match self {
            Function::Guest(f) => &f.ty,
            Function::Host(f) => f.ty(),
        }
    }
}
