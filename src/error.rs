use std::fmt::{Display, Formatter};

/// A runtime fault. Traps terminate the current invocation and surface
/// from [`crate::Instance::call_export`] wrapped in [`Error::Trap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    /// The `unreachable` opcode was executed.
    Unreachable,
    /// A memory or table access was out of range.
    PointerOutOfBounds,
    /// i32/i64 `div`/`rem` with a zero divisor.
    IntegerDivisionByZero,
    /// `MIN / -1`, or a float→int conversion out of the representable range.
    IntegerOverflow,
    /// A float→int conversion of NaN.
    InvalidConversionToInteger,
    /// `call_indirect` through an out-of-range or uninitialised table slot.
    UndefinedElement,
    /// `call_indirect` whose declared type differs from the callee's.
    IndirectCallTypeMismatch,
    /// The configured call-depth limit was exceeded.
    CallDepthExceeded,
    /// The operand stack grew past its hard cap.
    StackOverflow,
    /// The toll station refused to fund the next instruction.
    OutOfToll,
    /// A float instruction was executed with floats disabled.
    FloatDisabled,
    /// A host function returned a result count different from its signature.
    InvalidFuncReturnType,
    /// A host callback failed or panicked (the latter only under `recover`).
    HostFault(String),
}

impl Display for Trap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Trap::Unreachable => f.write_str("unreachable executed"),
            Trap::PointerOutOfBounds => f.write_str("pointer is out of bounds"),
            Trap::IntegerDivisionByZero => f.write_str("integer divide by zero"),
            Trap::IntegerOverflow => f.write_str("integer overflow"),
            Trap::InvalidConversionToInteger => f.write_str("invalid conversion to integer"),
            Trap::UndefinedElement => f.write_str("undefined element"),
            Trap::IndirectCallTypeMismatch => f.write_str("indirect call type mismatch"),
            Trap::CallDepthExceeded => f.write_str("call depth exceeded"),
            Trap::StackOverflow => f.write_str("operand stack overflow"),
            Trap::OutOfToll => f.write_str("out of toll"),
            Trap::FloatDisabled => f.write_str("float instructions are disabled"),
            Trap::InvalidFuncReturnType => f.write_str("invalid host func return type"),
            Trap::HostFault(msg) => write!(f, "host fault: {msg}"),
        }
    }
}

impl std::error::Error for Trap {}

/// A load, link or instantiation failure, or a [`Trap`] that surfaced
/// from execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The module bytes were rejected by the parser or validator.
    Malformed(String),
    /// An `0xFC`-prefixed subopcode outside the bulk-memory range.
    InvalidSubcode(u8),
    /// A host function signature is not expressible in WASM MVP.
    InvalidSignature,
    /// Redefinition under an existing (module, name) with shadowing disabled.
    ShadowingDisabled,
    /// An import names a module the linker does not know.
    ImportModuleNotFound(String),
    /// An import names an export its module does not provide.
    ImportNotFound(String, String),
    /// An import resolved to an export of a different kind.
    ImportKindMismatch(String, String),
    /// `call_export` was given an argument count different from the
    /// export's parameter count.
    InvalidFuncInputType,
    /// No export under the given name.
    ExportNotFound(String),
    /// The export exists but is not of the requested kind.
    ExportKindMismatch(String),
    /// Execution trapped.
    Trap(Trap),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Malformed(msg) => write!(f, "malformed module: {msg}"),
            Error::InvalidSubcode(sub) => write!(f, "invalid bulk memory subcode: 0x{sub:02x}"),
            Error::InvalidSignature => f.write_str("invalid signature"),
            Error::ShadowingDisabled => f.write_str("shadowing is disabled"),
            Error::ImportModuleNotFound(m) => write!(f, "unknown import module: {m}"),
            Error::ImportNotFound(m, n) => write!(f, "unknown import: {m}.{n}"),
            Error::ImportKindMismatch(m, n) => write!(f, "import kind mismatch: {m}.{n}"),
            Error::InvalidFuncInputType => f.write_str("invalid func input type"),
            Error::ExportNotFound(n) => write!(f, "export not found: {n}"),
            Error::ExportKindMismatch(n) => write!(f, "export kind mismatch: {n}"),
            Error::Trap(trap) => write!(f, "trap: {trap}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Trap> for Error {
    fn from(trap: Trap) -> Self {
        Error::Trap(trap)
    }
}

impl Error {
    /// The trap inside this error, if execution trapped.
    pub fn as_trap(&self) -> Option<&Trap> {
        match self {
            Error::Trap(trap) => Some(trap),
            _ => None,
        }
    }
}
